use std::collections::BTreeSet;

use super::{CommandContext, CommandKind, CommandOutcome, Tally};
use crate::data::model::EntityKey;
use crate::error::Result;
use crate::extract::stages::TpsResults;
use crate::extract::{Requirement, Stage, TaskFileType};

const CDPP: &str = "CDPP";
const MAX_MES: &str = "MAX_MES";

/// CDPP and maximum multiple-event statistic per trial pulse. These are not
/// cadence series, so they are compared as-is without alignment.
pub(super) fn run(ctx: &CommandContext<'_>) -> Result<CommandOutcome> {
    let mut tally = Tally::new(CommandKind::Tps, "targets");
    let mut tps = TpsResults::default();
    ctx.extractor().extract_into(
        &ctx.query(Stage::Tps, TaskFileType::Outputs)?,
        Requirement::Required,
        &mut tps,
    )?;

    let mut targets: BTreeSet<EntityKey> = tps
        .results
        .keys()
        .map(|&id| EntityKey::Target(id))
        .collect();
    targets.extend(
        ctx.archive
            .entities(CDPP)
            .into_iter()
            .filter(|e| matches!(e, EntityKey::Target(_)))
            .cloned(),
    );
    let targets: Vec<EntityKey> = targets.into_iter().collect();

    for entity in ctx.sample(&targets) {
        if ctx.deadline.expired() {
            tally.time_out();
            break;
        }
        let &EntityKey::Target(kepler_id) = entity else {
            continue;
        };
        let archived = |kind: &str| ctx.archive.get(entity, kind).map(|s| s.to_simple::<f32>());

        let mut equal = ctx.compare_unaligned(CDPP, entity, tps.cdpp(kepler_id), archived(CDPP));
        equal &= ctx.compare_unaligned(
            MAX_MES,
            entity,
            tps.max_mes(kepler_id),
            archived(MAX_MES),
        );
        tally.conclude(ctx, equal);
    }
    Ok(tally.finish(ctx))
}
