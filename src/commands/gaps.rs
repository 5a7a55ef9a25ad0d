use super::{CommandContext, CommandKind, CommandOutcome, Tally};
use crate::data::model::{
    CadenceRange, CompoundFloatTimeSeries, EntityKey, SimpleIntTimeSeries, TimeSeries,
};
use crate::error::Result;
use crate::extract::stages::CalCalibratedPixels;
use crate::extract::{Requirement, Stage, TaskFileType};

const GAPS: &str = "GAPS";

/// A cadence is a channel gap when no calibrated pixel has data there.
/// Pixels that do not cover a cadence count as gapped at it.
pub(crate) fn channel_gaps<'s, I>(range: CadenceRange, pixels: I) -> SimpleIntTimeSeries
where
    I: IntoIterator<Item = &'s (CadenceRange, CompoundFloatTimeSeries)>,
{
    let mut gapped = vec![true; range.len()];
    for (span, series) in pixels {
        for (i, &gap) in series.gap_indicators().iter().enumerate() {
            let cadence = span.start() + i as i32;
            if !gap && range.contains(cadence) {
                gapped[(cadence - range.start()) as usize] = false;
            }
        }
    }
    let values = gapped.iter().map(|&g| i32::from(g)).collect();
    SimpleIntTimeSeries::new(values, vec![false; range.len()])
}

pub(super) fn run(ctx: &CommandContext<'_>) -> Result<CommandOutcome> {
    let mut tally = Tally::new(CommandKind::Gaps, "channels");
    let mut calibrated = CalCalibratedPixels::default();
    ctx.extractor().extract_into(
        &ctx.query(Stage::Cal, TaskFileType::Outputs)?,
        Requirement::Required,
        &mut calibrated,
    )?;
    let pixels = calibrated.pixels.into_merged()?;
    let task = channel_gaps(ctx.range, pixels.values());

    let equal = ctx.compare_series(
        GAPS,
        &EntityKey::Channel,
        Some((ctx.range, task)),
        ctx.archive_simple::<i32>(&EntityKey::Channel, GAPS),
    )?;
    tally.conclude(ctx, equal);
    Ok(tally.finish(ctx))
}
