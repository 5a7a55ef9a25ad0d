use std::collections::BTreeSet;

use super::{CommandContext, CommandKind, CommandOutcome, Tally};
use crate::data::model::EntityKey;
use crate::error::Result;
use crate::extract::stages::DvOutputSeries;
use crate::extract::{Requirement, Stage, TaskFileType};

const DV_RESIDUAL_FLUX: &str = "DV_RESIDUAL_FLUX";
const DV_MODEL_LIGHT_CURVE: &str = "DV_MODEL_LIGHT_CURVE";

/// Residual flux per target and the model light curve of each of its
/// planets.
pub(super) fn run(ctx: &CommandContext<'_>) -> Result<CommandOutcome> {
    let mut tally = Tally::new(CommandKind::Dv, "targets");
    let mut dv = DvOutputSeries::default();
    ctx.extractor().extract_into(
        &ctx.query(Stage::Dv, TaskFileType::Outputs)?,
        Requirement::Required,
        &mut dv,
    )?;
    let mut residuals = dv.residual_flux.into_merged()?;
    let mut models = dv.model_light_curves.into_merged()?;

    let mut planets: BTreeSet<EntityKey> = models.keys().cloned().collect();
    planets.extend(ctx.archive.entities(DV_MODEL_LIGHT_CURVE).into_iter().cloned());

    let mut targets: BTreeSet<EntityKey> = residuals.keys().cloned().collect();
    targets.extend(ctx.archive.entities(DV_RESIDUAL_FLUX).into_iter().cloned());
    targets.extend(planets.iter().filter_map(|planet| match planet {
        EntityKey::Planet(id, _) => Some(EntityKey::Target(*id)),
        _ => None,
    }));
    let targets: Vec<EntityKey> = targets
        .into_iter()
        .filter(|e| matches!(e, EntityKey::Target(_)))
        .collect();

    for entity in ctx.sample(&targets) {
        if ctx.deadline.expired() {
            tally.time_out();
            break;
        }
        let &EntityKey::Target(kepler_id) = entity else {
            continue;
        };

        let mut equal = ctx.compare_series(
            DV_RESIDUAL_FLUX,
            entity,
            residuals.remove(entity),
            ctx.archive_compound::<f32>(entity, DV_RESIDUAL_FLUX)?,
        )?;
        let own_planets = planets
            .iter()
            .filter(|planet| matches!(planet, EntityKey::Planet(id, _) if *id == kepler_id));
        for planet in own_planets {
            equal &= ctx.compare_series(
                DV_MODEL_LIGHT_CURVE,
                planet,
                models.remove(planet),
                ctx.archive_simple::<f32>(planet, DV_MODEL_LIGHT_CURVE),
            )?;
        }
        tally.conclude(ctx, equal);
    }
    Ok(tally.finish(ctx))
}
