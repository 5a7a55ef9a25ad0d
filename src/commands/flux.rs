//! Per-target light curves: PA flux, background, centroids, cadence times
//! and aperture, PDC corrected flux and keywords when configured, and the
//! quality bitmask.

use std::collections::{BTreeMap, BTreeSet};

use super::{keywords, CommandContext, CommandKind, CommandOutcome, Tally};
use crate::align::resize;
use crate::data::model::{CadenceRange, EntityKey, SimpleDoubleTimeSeries, SimpleFloatTimeSeries};
use crate::data::tables::CadenceTable;
use crate::error::Result;
use crate::extract::stages::{CalCalibratedPixels, PaOutputSeries, PaPixelInputs, PdcOutputSeries};
use crate::extract::{Requirement, Stage, TaskFileType};

const SAP_FLUX: &str = "SAP_FLUX";
const SAP_BKG: &str = "SAP_BKG";
const PDCSAP_FLUX: &str = "PDCSAP_FLUX";
const MOM_CENTR1: &str = "MOM_CENTR1";
const MOM_CENTR2: &str = "MOM_CENTR2";
const PSF_CENTR1: &str = "PSF_CENTR1";
const PSF_CENTR2: &str = "PSF_CENTR2";
const TIMECORR: &str = "TIMECORR";
const TIME: &str = "TIME";
const SAP_QUALITY: &str = "SAP_QUALITY";

/// Barycentric mid-times (KJD) over `range`. A cadence is gapped where the
/// cadence table or the correction is, or where the table has no time.
fn barycentric_times(
    table: &CadenceTable,
    range: CadenceRange,
    correction: &SimpleFloatTimeSeries,
) -> SimpleDoubleTimeSeries {
    let mut values = Vec::with_capacity(range.len());
    let mut gaps = Vec::with_capacity(range.len());
    let samples = correction.values.iter().zip(&correction.gap_indicators);
    for (cadence, (&offset, &offset_gap)) in range.cadences().zip(samples) {
        let table_gap = table.flags_at(cadence).map_or(true, |f| f.gap);
        match table.mid_time_kjd(cadence) {
            Some(mid) if !table_gap && !offset_gap => {
                values.push(mid + f64::from(offset));
                gaps.push(false);
            }
            _ => {
                values.push(0.0);
                gaps.push(true);
            }
        }
    }
    SimpleDoubleTimeSeries::new(values, gaps)
}

pub(super) fn run(ctx: &CommandContext<'_>) -> Result<CommandOutcome> {
    let mut tally = Tally::new(CommandKind::Flux, "targets");
    let mut extractor = ctx.extractor();

    let mut pa = PaOutputSeries::default();
    extractor.extract_into(
        &ctx.query(Stage::Pa, TaskFileType::Outputs)?,
        Requirement::Required,
        &mut pa,
    )?;
    // Apertures feed the aperture check and the cosmic-ray quality bits.
    let mut pa_inputs = PaPixelInputs::default();
    extractor.extract_into(
        &ctx.query(Stage::Pa, TaskFileType::Inputs)?,
        Requirement::Optional,
        &mut pa_inputs,
    )?;
    let calibrated = if ctx.has_instance(Stage::Cal) {
        let mut calibrated = CalCalibratedPixels::default();
        extractor.extract_into(
            &ctx.query(Stage::Cal, TaskFileType::Outputs)?,
            Requirement::Optional,
            &mut calibrated,
        )?;
        Some(calibrated)
    } else {
        None
    };
    let mut pdc = if ctx.has_instance(Stage::Pdc) {
        let mut pdc = PdcOutputSeries::default();
        extractor.extract_into(
            &ctx.query(Stage::Pdc, TaskFileType::Outputs)?,
            Requirement::Required,
            &mut pdc,
        )?;
        Some(pdc)
    } else {
        log::info!("No PDC instance configured, skipping {PDCSAP_FLUX}");
        None
    };
    if pdc.is_some() && ctx.keyword_table.is_none() {
        log::info!("No keyword table given, skipping PDC keyword checks");
    }
    if ctx.aperture_table.is_none() {
        log::info!("No aperture table given, skipping aperture checks");
    }
    let times_table = match ctx.cadence_table {
        Some(table) if table.range().contains_range(&ctx.range) => Some(table),
        Some(table) => {
            log::warn!(
                "Cadence table covers {} but not {}, skipping {TIME}",
                table.range(),
                ctx.range
            );
            None
        }
        None => {
            log::info!("No cadence table given, skipping {TIME}");
            None
        }
    };

    let mut targets: BTreeSet<EntityKey> = pa.flux.keys().cloned().collect();
    targets.extend(
        ctx.archive
            .entities(SAP_FLUX)
            .into_iter()
            .filter(|e| matches!(e, EntityKey::Target(_)))
            .cloned(),
    );
    let targets: Vec<EntityKey> = targets.into_iter().collect();

    let mut flux = std::mem::take(&mut pa.flux).into_merged()?;
    let mut background = std::mem::take(&mut pa.background).into_merged()?;
    let mut time_correction = std::mem::take(&mut pa.time_correction).into_merged()?;
    let mut prf_row = std::mem::take(&mut pa.prf_centroid_row).into_merged()?;
    let mut prf_column = std::mem::take(&mut pa.prf_centroid_column).into_merged()?;
    let mut fw_row = std::mem::take(&mut pa.flux_weighted_centroid_row).into_merged()?;
    let mut fw_column = std::mem::take(&mut pa.flux_weighted_centroid_column).into_merged()?;
    let mut corrected = match pdc.as_mut() {
        Some(pdc) => std::mem::take(&mut pdc.corrected_flux).into_merged()?,
        None => BTreeMap::new(),
    };

    for entity in ctx.sample(&targets) {
        if ctx.deadline.expired() {
            tally.time_out();
            break;
        }
        let &EntityKey::Target(kepler_id) = entity else {
            continue;
        };

        let mut equal = true;
        equal &= ctx.compare_series(
            SAP_FLUX,
            entity,
            flux.remove(entity),
            ctx.archive_compound::<f32>(entity, SAP_FLUX)?,
        )?;
        equal &= ctx.compare_series(
            SAP_BKG,
            entity,
            background.remove(entity),
            ctx.archive_compound::<f32>(entity, SAP_BKG)?,
        )?;
        if pdc.is_some() {
            equal &= ctx.compare_series(
                PDCSAP_FLUX,
                entity,
                corrected.remove(entity),
                ctx.archive_compound::<f32>(entity, PDCSAP_FLUX)?,
            )?;
        }
        equal &= ctx.compare_series(
            MOM_CENTR1,
            entity,
            fw_row.remove(entity),
            ctx.archive_compound::<f64>(entity, MOM_CENTR1)?,
        )?;
        equal &= ctx.compare_series(
            MOM_CENTR2,
            entity,
            fw_column.remove(entity),
            ctx.archive_compound::<f64>(entity, MOM_CENTR2)?,
        )?;
        equal &= ctx.compare_series(
            PSF_CENTR1,
            entity,
            prf_row.remove(entity),
            ctx.archive_compound::<f64>(entity, PSF_CENTR1)?,
        )?;
        equal &= ctx.compare_series(
            PSF_CENTR2,
            entity,
            prf_column.remove(entity),
            ctx.archive_compound::<f64>(entity, PSF_CENTR2)?,
        )?;
        let correction = time_correction.remove(entity);
        if let Some(table) = times_table {
            let times = match &correction {
                Some((span, offsets)) => {
                    let offsets = resize(ctx.range, *span, offsets.clone())?;
                    Some((ctx.range, barycentric_times(table, ctx.range, &offsets)))
                }
                None => None,
            };
            equal &= ctx.compare_series(
                TIME,
                entity,
                times,
                ctx.archive_simple::<f64>(entity, TIME),
            )?;
        }
        equal &= ctx.compare_series(
            TIMECORR,
            entity,
            correction,
            ctx.archive_simple::<f32>(entity, TIMECORR),
        )?;

        let aperture = pa_inputs.targets.get(&kepler_id).map(|info| &info.aperture);
        equal &= ctx.compare_aperture(entity, kepler_id, &pa, aperture);
        if let (Some(pdc), Some(table)) = (pdc.as_ref(), ctx.keyword_table) {
            equal &= keywords::compare_pdc_keywords(kepler_id, pdc, table)?;
        }

        let quality =
            ctx.quality_series(kepler_id, aperture, &pa, calibrated.as_ref(), pdc.as_ref());
        equal &= ctx.compare_series(
            SAP_QUALITY,
            entity,
            Some((ctx.range, quality)),
            ctx.archive_simple::<i32>(entity, SAP_QUALITY),
        )?;

        tally.conclude(ctx, equal);
    }
    Ok(tally.finish(ctx))
}
