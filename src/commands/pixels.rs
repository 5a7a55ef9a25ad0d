//! Pixel-level commands: raw and calibrated CAL pixels, collateral,
//! background, target and ARP pixels.

use std::collections::{BTreeMap, BTreeSet};

use super::{CommandContext, CommandKind, CommandOutcome, Tally};
use crate::data::model::{
    CadenceRange, CompoundFloatTimeSeries, EntityKey, Pixel, SimpleFloatTimeSeries,
};
use crate::error::Result;
use crate::extract::stages::{
    remove_cosmic_rays, CalCalibratedPixels, CalRawPixels, PaOutputSeries, PaPixelInputs,
    PdcOutputSeries,
};
use crate::extract::{Requirement, Stage, TaskFileType};

const ORIG_VALUE: &str = "ORIG_VALUE";
const CAL_VALUE: &str = "CAL_VALUE";
const FLUX: &str = "FLUX";
const QUALITY: &str = "QUALITY";
const ARP_FLUX: &str = "ARP_FLUX";
const COSMIC_RAY: &str = "COSMIC_RAY";

fn is_pixel(entity: &EntityKey) -> bool {
    matches!(entity, EntityKey::Pixel(_))
}

fn is_collateral(entity: &EntityKey) -> bool {
    matches!(entity, EntityKey::Collateral(..))
}

/// Subtract the cosmic rays in `rays` from every series in `series`.
fn clean_pixels(
    series: BTreeMap<EntityKey, (CadenceRange, CompoundFloatTimeSeries)>,
    rays: &[&BTreeMap<(Pixel, i32), f32>],
) -> BTreeMap<EntityKey, (CadenceRange, CompoundFloatTimeSeries)> {
    series
        .into_iter()
        .map(|(entity, (span, mut values))| {
            if let EntityKey::Pixel(pixel) | EntityKey::TargetPixel(_, pixel) = entity {
                for rays in rays {
                    remove_cosmic_rays(&mut values, span, pixel, rays);
                }
            }
            (entity, (span, values))
        })
        .collect()
}

fn cal_raw(ctx: &CommandContext<'_>) -> Result<CalRawPixels> {
    let mut raw = CalRawPixels::default();
    ctx.extractor().extract_into(
        &ctx.query(Stage::Cal, TaskFileType::Inputs)?,
        Requirement::Required,
        &mut raw,
    )?;
    Ok(raw)
}

fn cal_calibrated(ctx: &CommandContext<'_>, requirement: Requirement) -> Result<CalCalibratedPixels> {
    let mut calibrated = CalCalibratedPixels::default();
    ctx.extractor().extract_into(
        &ctx.query(Stage::Cal, TaskFileType::Outputs)?,
        requirement,
        &mut calibrated,
    )?;
    Ok(calibrated)
}

fn pa_inputs(ctx: &CommandContext<'_>) -> Result<PaPixelInputs> {
    let mut inputs = PaPixelInputs::default();
    ctx.extractor().extract_into(
        &ctx.query(Stage::Pa, TaskFileType::Inputs)?,
        Requirement::Required,
        &mut inputs,
    )?;
    Ok(inputs)
}

fn pa_outputs(ctx: &CommandContext<'_>) -> Result<PaOutputSeries> {
    let mut outputs = PaOutputSeries::default();
    ctx.extractor().extract_into(
        &ctx.query(Stage::Pa, TaskFileType::Outputs)?,
        Requirement::Required,
        &mut outputs,
    )?;
    Ok(outputs)
}

fn pdc_outputs(ctx: &CommandContext<'_>) -> Result<Option<PdcOutputSeries>> {
    if !ctx.has_instance(Stage::Pdc) {
        return Ok(None);
    }
    let mut outputs = PdcOutputSeries::default();
    ctx.extractor().extract_into(
        &ctx.query(Stage::Pdc, TaskFileType::Outputs)?,
        Requirement::Required,
        &mut outputs,
    )?;
    Ok(Some(outputs))
}

// ---------------------------------------------------------------------------
// CAL
// ---------------------------------------------------------------------------

/// Uncalibrated pixel values handed to CAL.
pub(super) fn pixels_in(ctx: &CommandContext<'_>) -> Result<CommandOutcome> {
    let mut tally = Tally::new(CommandKind::PixelsIn, "pixels");
    let raw = cal_raw(ctx)?;
    ctx.compare_entities(&mut tally, ORIG_VALUE, is_pixel, raw.pixels.into_merged()?, |e| {
        Ok(ctx.archive_simple::<i32>(e, ORIG_VALUE))
    })?;
    Ok(tally.finish(ctx))
}

/// Calibrated pixels with the cosmic rays PA found removed, as archived.
pub(super) fn pixels_out(ctx: &CommandContext<'_>) -> Result<CommandOutcome> {
    let mut tally = Tally::new(CommandKind::PixelsOut, "pixels");
    let calibrated = cal_calibrated(ctx, Requirement::Required)?;
    let pa = pa_outputs(ctx)?;
    let pixels = clean_pixels(
        calibrated.pixels.into_merged()?,
        &[&pa.target_cosmic_rays, &pa.background_cosmic_rays],
    );
    ctx.compare_entities(&mut tally, CAL_VALUE, is_pixel, pixels, |e| {
        ctx.archive_compound::<f32>(e, CAL_VALUE)
    })?;
    Ok(tally.finish(ctx))
}

/// Black and smear collateral, both as read and as calibrated.
pub(super) fn collateral_pixels(ctx: &CommandContext<'_>) -> Result<CommandOutcome> {
    let mut tally = Tally::new(CommandKind::CollateralPixels, "collateral pixels");

    let raw = cal_raw(ctx)?;
    ctx.compare_entities(
        &mut tally,
        ORIG_VALUE,
        is_collateral,
        raw.collateral.into_merged()?,
        |e| Ok(ctx.archive_simple::<i32>(e, ORIG_VALUE)),
    )?;

    let calibrated = cal_calibrated(ctx, Requirement::Required)?;
    ctx.compare_entities(
        &mut tally,
        CAL_VALUE,
        is_collateral,
        calibrated.collateral.into_merged()?,
        |e| ctx.archive_compound::<f32>(e, CAL_VALUE),
    )?;
    Ok(tally.finish(ctx))
}

// ---------------------------------------------------------------------------
// PA
// ---------------------------------------------------------------------------

/// Background pixels PA read, minus the background cosmic rays it found.
pub(super) fn background_pixels(ctx: &CommandContext<'_>) -> Result<CommandOutcome> {
    let mut tally = Tally::new(CommandKind::BackgroundPixels, "background pixels");
    let inputs = pa_inputs(ctx)?;
    let pa = pa_outputs(ctx)?;
    let pixels = clean_pixels(
        inputs.background_pixels.into_merged()?,
        &[&pa.background_cosmic_rays],
    );
    ctx.compare_entities(&mut tally, FLUX, is_pixel, pixels, |e| {
        ctx.archive_compound::<f32>(e, FLUX)
    })?;
    Ok(tally.finish(ctx))
}

/// Per target: every aperture pixel's cleaned flux and cosmic-ray events,
/// the quality bitmask and the aperture itself.
pub(super) fn target_pixels(ctx: &CommandContext<'_>) -> Result<CommandOutcome> {
    let mut tally = Tally::new(CommandKind::TargetPixels, "targets");
    let inputs = pa_inputs(ctx)?;
    let pa = pa_outputs(ctx)?;
    let calibrated = cal_calibrated(ctx, Requirement::Optional)?;
    let pdc = pdc_outputs(ctx)?;

    if ctx.aperture_table.is_none() {
        log::info!("No aperture table given, skipping aperture checks");
    }

    let targets: Vec<EntityKey> = inputs
        .targets
        .keys()
        .map(|&id| EntityKey::Target(id))
        .collect();
    let mut pixel_series = clean_pixels(
        inputs.target_pixels.into_merged()?,
        &[&pa.target_cosmic_rays],
    );

    for entity in ctx.sample(&targets) {
        if ctx.deadline.expired() {
            tally.time_out();
            break;
        }
        let &EntityKey::Target(kepler_id) = entity else {
            continue;
        };
        let Some(info) = inputs.targets.get(&kepler_id) else {
            continue;
        };

        let mut equal = true;
        for pixel in info.aperture.pixels() {
            let key = EntityKey::TargetPixel(kepler_id, pixel.pixel);
            equal &= ctx.compare_series(
                FLUX,
                &key,
                pixel_series.remove(&key),
                ctx.archive_compound::<f32>(&key, FLUX)?,
            )?;

            // A pixel without events on either side has nothing to compare.
            let archived = ctx.archive_simple::<f32>(&key, COSMIC_RAY);
            let events = pa.cosmic_ray_events(pixel.pixel, ctx.range);
            if events.is_some() || archived.is_some() {
                let events = events.unwrap_or_else(|| {
                    SimpleFloatTimeSeries::new(vec![0.0; ctx.range.len()], vec![true; ctx.range.len()])
                });
                equal &= ctx.compare_series(COSMIC_RAY, &key, Some((ctx.range, events)), archived)?;
            }
        }

        let quality = ctx.quality_series(
            kepler_id,
            Some(&info.aperture),
            &pa,
            Some(&calibrated),
            pdc.as_ref(),
        );
        equal &= ctx.compare_series(
            QUALITY,
            entity,
            Some((ctx.range, quality)),
            ctx.archive_simple::<i32>(entity, QUALITY),
        )?;

        equal &= ctx.compare_aperture(entity, kepler_id, &pa, Some(&info.aperture));
        tally.conclude(ctx, equal);
    }
    Ok(tally.finish(ctx))
}

/// Pixels of the artifact-removal target. The pixel set must match the
/// archive's before the series are compared.
pub(super) fn arp_pixels(ctx: &CommandContext<'_>) -> Result<CommandOutcome> {
    let mut tally = Tally::new(CommandKind::ArpPixels, "ARP pixels");
    let inputs = pa_inputs(ctx)?;
    let Some(arp_id) = inputs.arp_target()? else {
        log::info!("No ARP target found, nothing to validate");
        return Ok(tally.finish(ctx));
    };
    let Some(info) = inputs.targets.get(&arp_id) else {
        return Ok(tally.finish(ctx));
    };

    let task_pixels: BTreeSet<EntityKey> = info
        .aperture
        .pixels()
        .map(|p| EntityKey::Pixel(p.pixel))
        .collect();
    let archive_pixels: BTreeSet<EntityKey> = ctx
        .archive
        .entities(ARP_FLUX)
        .into_iter()
        .filter(|e| is_pixel(e))
        .cloned()
        .collect();
    if task_pixels != archive_pixels {
        log::error!(
            "ARP pixel sets differ for target {arp_id}: {} in task files, {} in archive",
            task_pixels.len(),
            archive_pixels.len()
        );
        for missing in archive_pixels.difference(&task_pixels) {
            log::error!("{missing} missing from task files");
        }
        for missing in task_pixels.difference(&archive_pixels) {
            log::error!("{missing} missing from archive");
        }
        tally.fail();
    }

    let series = inputs
        .target_pixels
        .into_merged()?
        .into_iter()
        .filter_map(|(key, value)| match key {
            EntityKey::TargetPixel(id, pixel) if id == arp_id => {
                Some((EntityKey::Pixel(pixel), value))
            }
            _ => None,
        })
        .collect();
    ctx.compare_entities(&mut tally, ARP_FLUX, is_pixel, series, |e| {
        ctx.archive_compound::<f32>(e, ARP_FLUX)
    })?;
    Ok(tally.finish(ctx))
}
