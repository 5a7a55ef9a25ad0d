//! Typed visitors that pull one stage's series out of decoded fragments.
//!
//! Fragments arrive in enumeration order, not cadence order, so every
//! visitor accumulates into keyed maps and never appends positionally.

use std::collections::{BTreeMap, BTreeSet};

use super::FragmentLocator;
use crate::data::aperture::{Aperture, AperturePixel};
use crate::data::fragment::{
    CentroidPixel, FragmentRecord, PdcGoodnessMetric, PdcProcessingCharacteristics, PixelCosmicRay,
    TpsResult,
};
use crate::data::model::{
    CadenceRange, CollateralKind, CompoundDoubleTimeSeries, CompoundFloatTimeSeries, EntityKey,
    Offset, Pixel, SimpleFloatTimeSeries, SimpleIntTimeSeries,
};
use crate::error::{Result, ValidationError};
use crate::merge::WindowedSeries;

/// Label that marks the artifact-removal (ARP) target.
pub const ARP_LABEL: &str = "ARTIFACT_REMOVAL";

pub trait StageVisitor {
    fn visit(&mut self, locator: &FragmentLocator, record: &FragmentRecord) -> Result<()>;
}

fn unexpected(locator: &FragmentLocator, record: &FragmentRecord, wanted: &str) -> ValidationError {
    ValidationError::execution(format!(
        "{}: expected {wanted} but found {}",
        locator.path.display(),
        record.schema_name()
    ))
}

/// Convert an index relative to `window` into an absolute cadence.
fn absolute_cadence(locator: &FragmentLocator, window: CadenceRange, index: i32) -> Result<i32> {
    if index < 0 || index as usize >= window.len() {
        return Err(ValidationError::execution(format!(
            "{}: index {index} outside window {window}",
            locator.path.display()
        )));
    }
    Ok(window.start() + index)
}

/// Subtract every cosmic ray recorded for `pixel` from `series`, which spans
/// `span`. Rays outside the span are ignored.
pub fn remove_cosmic_rays(
    series: &mut CompoundFloatTimeSeries,
    span: CadenceRange,
    pixel: Pixel,
    rays: &BTreeMap<(Pixel, i32), f32>,
) {
    for (&(_, cadence), &delta) in rays.range((pixel, i32::MIN)..=(pixel, i32::MAX)) {
        if span.contains(cadence) {
            series.values[(cadence - span.start()) as usize] -= delta;
        }
    }
}

fn record_rays(rays: &mut BTreeMap<(Pixel, i32), f32>, events: &[PixelCosmicRay]) {
    for event in events {
        rays.insert((event.pixel, event.cadence), event.delta);
    }
}

// ---------------------------------------------------------------------------
// CAL
// ---------------------------------------------------------------------------

/// Uncalibrated pixel and collateral values from CAL inputs.
#[derive(Debug, Default)]
pub struct CalRawPixels {
    pub pixels: WindowedSeries<EntityKey, SimpleIntTimeSeries>,
    pub collateral: WindowedSeries<EntityKey, SimpleIntTimeSeries>,
}

impl StageVisitor for CalRawPixels {
    fn visit(&mut self, locator: &FragmentLocator, record: &FragmentRecord) -> Result<()> {
        let FragmentRecord::CalInputs(inputs) = record else {
            return Err(unexpected(locator, record, "cal_inputs"));
        };
        for p in &inputs.pixels {
            self.pixels
                .insert(EntityKey::Pixel(p.pixel), inputs.cadence_range, p.values.clone());
        }
        for c in &inputs.collateral {
            self.collateral.insert(
                EntityKey::Collateral(c.kind, c.offset),
                inputs.cadence_range,
                c.values.clone(),
            );
        }
        Ok(())
    }
}

/// Calibrated pixel and collateral values plus collateral cosmic rays from
/// CAL outputs.
#[derive(Debug, Default)]
pub struct CalCalibratedPixels {
    pub pixels: WindowedSeries<EntityKey, CompoundFloatTimeSeries>,
    pub collateral: WindowedSeries<EntityKey, CompoundFloatTimeSeries>,
    /// `(kind, offset, cadence) -> delta`
    pub collateral_cosmic_rays: BTreeMap<(CollateralKind, i32, i32), f32>,
}

impl CalCalibratedPixels {
    /// Cadences with a collateral cosmic ray in a row (black) or column
    /// (smear) that the optimal aperture projects onto.
    pub fn collateral_cosmic_ray_cadences(
        &self,
        rows: &BTreeSet<i32>,
        columns: &BTreeSet<i32>,
    ) -> BTreeSet<i32> {
        self.collateral_cosmic_rays
            .keys()
            .filter(|(kind, offset, _)| match kind {
                CollateralKind::MaskedSmear | CollateralKind::VirtualSmear => {
                    columns.contains(offset)
                }
                CollateralKind::BlackLevel
                | CollateralKind::BlackMasked
                | CollateralKind::BlackVirtual => rows.contains(offset),
            })
            .map(|&(_, _, cadence)| cadence)
            .collect()
    }
}

impl StageVisitor for CalCalibratedPixels {
    fn visit(&mut self, locator: &FragmentLocator, record: &FragmentRecord) -> Result<()> {
        let FragmentRecord::CalOutputs(outputs) = record else {
            return Err(unexpected(locator, record, "cal_outputs"));
        };
        for p in &outputs.pixels {
            self.pixels
                .insert(EntityKey::Pixel(p.pixel), outputs.cadence_range, p.values.clone());
        }
        for c in &outputs.collateral {
            self.collateral.insert(
                EntityKey::Collateral(c.kind, c.offset),
                outputs.cadence_range,
                c.values.clone(),
            );
        }
        for ray in &outputs.collateral_cosmic_rays {
            self.collateral_cosmic_rays
                .insert((ray.kind, ray.offset, ray.cadence), ray.delta);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PA inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PaTargetInfo {
    pub labels: BTreeSet<String>,
    pub reference_pixel: Pixel,
    pub aperture: Aperture,
}

/// Target definitions and calibrated pixel inputs from PA inputs.
#[derive(Debug, Default)]
pub struct PaPixelInputs {
    pub targets: BTreeMap<i32, PaTargetInfo>,
    pub target_pixels: WindowedSeries<EntityKey, CompoundFloatTimeSeries>,
    pub background_pixels: WindowedSeries<EntityKey, CompoundFloatTimeSeries>,
}

impl PaPixelInputs {
    /// The single target labelled for artifact removal, if any.
    pub fn arp_target(&self) -> Result<Option<i32>> {
        let mut arp = self
            .targets
            .iter()
            .filter(|(_, info)| info.labels.contains(ARP_LABEL))
            .map(|(&id, _)| id);
        let first = arp.next();
        if let Some(second) = arp.next() {
            return Err(ValidationError::execution(format!(
                "too many ARP targets: {} and {second} (at least)",
                first.unwrap_or_default()
            )));
        }
        Ok(first)
    }
}

impl StageVisitor for PaPixelInputs {
    fn visit(&mut self, locator: &FragmentLocator, record: &FragmentRecord) -> Result<()> {
        let FragmentRecord::PaInputs(inputs) = record else {
            return Err(unexpected(locator, record, "pa_inputs"));
        };
        for target in &inputs.targets {
            let mut aperture = Aperture::new();
            for p in &target.pixels {
                let offset = Offset::new(
                    p.pixel.row - target.reference_pixel.row,
                    p.pixel.column - target.reference_pixel.column,
                );
                aperture.add_pixel(
                    offset,
                    AperturePixel {
                        in_optimal_aperture: p.in_optimal_aperture,
                        ..AperturePixel::new(p.pixel)
                    },
                );
                self.target_pixels.insert(
                    EntityKey::TargetPixel(target.kepler_id, p.pixel),
                    inputs.cadence_range,
                    p.values.clone(),
                );
            }
            let info = PaTargetInfo {
                labels: target.labels.iter().cloned().collect(),
                reference_pixel: target.reference_pixel,
                aperture,
            };
            if let Some(previous) = self.targets.insert(target.kepler_id, info.clone()) {
                if previous != info {
                    log::warn!(
                        "Target {} is defined differently in {}",
                        target.kepler_id,
                        locator.path.display()
                    );
                }
            }
        }
        for p in &inputs.background_pixels {
            self.background_pixels.insert(
                EntityKey::Pixel(p.pixel),
                inputs.cadence_range,
                p.values.clone(),
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PA outputs
// ---------------------------------------------------------------------------

/// Flux, centroid and time-correction series plus cosmic rays and
/// channel-level event indices from PA outputs.
#[derive(Debug, Default)]
pub struct PaOutputSeries {
    pub flux: WindowedSeries<EntityKey, CompoundFloatTimeSeries>,
    pub background: WindowedSeries<EntityKey, CompoundFloatTimeSeries>,
    pub time_correction: WindowedSeries<EntityKey, SimpleFloatTimeSeries>,
    pub prf_centroid_row: WindowedSeries<EntityKey, CompoundDoubleTimeSeries>,
    pub prf_centroid_column: WindowedSeries<EntityKey, CompoundDoubleTimeSeries>,
    pub flux_weighted_centroid_row: WindowedSeries<EntityKey, CompoundDoubleTimeSeries>,
    pub flux_weighted_centroid_column: WindowedSeries<EntityKey, CompoundDoubleTimeSeries>,
    /// Centroid-aperture membership per target and pixel.
    pub centroid_apertures: BTreeMap<i32, BTreeMap<Pixel, CentroidPixel>>,
    /// `(pixel, cadence) -> delta`
    pub target_cosmic_rays: BTreeMap<(Pixel, i32), f32>,
    pub background_cosmic_rays: BTreeMap<(Pixel, i32), f32>,
    /// Absolute cadences.
    pub argabrightening: BTreeSet<i32>,
    pub reaction_wheel_zero_crossings: BTreeSet<i32>,
}

impl PaOutputSeries {
    /// Cadences at which any of `pixels` saw a target cosmic ray.
    pub fn cosmic_ray_cadences(&self, pixels: &BTreeSet<Pixel>) -> BTreeSet<i32> {
        self.target_cosmic_rays
            .keys()
            .filter(|(pixel, _)| pixels.contains(pixel))
            .map(|&(_, cadence)| cadence)
            .collect()
    }

    /// Target cosmic-ray deltas of `pixel` over `range`, gapped where PA saw
    /// no event. `None` if there was no event at all.
    pub fn cosmic_ray_events(&self, pixel: Pixel, range: CadenceRange) -> Option<SimpleFloatTimeSeries> {
        let mut values = vec![0.0; range.len()];
        let mut gaps = vec![true; range.len()];
        let mut any = false;
        for (&(_, cadence), &delta) in self
            .target_cosmic_rays
            .range((pixel, range.start())..=(pixel, range.end()))
        {
            let at = (cadence - range.start()) as usize;
            values[at] = delta;
            gaps[at] = false;
            any = true;
        }
        any.then(|| SimpleFloatTimeSeries::new(values, gaps))
    }

    /// Apply the centroid-aperture flags PA recorded to `aperture`.
    pub fn annotate_aperture(&self, kepler_id: i32, aperture: &Aperture) -> Aperture {
        let Some(flags) = self.centroid_apertures.get(&kepler_id) else {
            return aperture.clone();
        };
        let mut annotated = Aperture::new();
        for (offset, pixel) in aperture.entries() {
            let mut pixel = *pixel;
            if let Some(centroid) = flags.get(&pixel.pixel) {
                pixel.in_prf_centroid_aperture = centroid.in_prf_centroid_aperture;
                pixel.in_flux_weighted_centroid_aperture =
                    centroid.in_flux_weighted_centroid_aperture;
            }
            annotated.add_pixel(offset, pixel);
        }
        annotated
    }
}

impl StageVisitor for PaOutputSeries {
    fn visit(&mut self, locator: &FragmentLocator, record: &FragmentRecord) -> Result<()> {
        let FragmentRecord::PaOutputs(outputs) = record else {
            return Err(unexpected(locator, record, "pa_outputs"));
        };
        let window = outputs.cadence_range;
        for t in &outputs.flux_targets {
            let key = EntityKey::Target(t.kepler_id);
            self.flux.insert(key.clone(), window, t.flux.clone());
            self.background.insert(key.clone(), window, t.background.clone());
            self.time_correction
                .insert(key.clone(), window, t.barycentric_time_offset.clone());
            self.prf_centroid_row
                .insert(key.clone(), window, t.prf_centroid_row.clone());
            self.prf_centroid_column
                .insert(key.clone(), window, t.prf_centroid_column.clone());
            self.flux_weighted_centroid_row
                .insert(key.clone(), window, t.flux_weighted_centroid_row.clone());
            self.flux_weighted_centroid_column
                .insert(key, window, t.flux_weighted_centroid_column.clone());

            let apertures = self.centroid_apertures.entry(t.kepler_id).or_default();
            for pixel in &t.pixel_aperture {
                apertures.insert(pixel.pixel, *pixel);
            }
        }
        record_rays(&mut self.target_cosmic_rays, &outputs.target_cosmic_rays);
        record_rays(&mut self.background_cosmic_rays, &outputs.background_cosmic_rays);
        for &index in &outputs.argabrightening_indices {
            self.argabrightening
                .insert(absolute_cadence(locator, window, index)?);
        }
        for &index in &outputs.reaction_wheel_zero_crossing_indices {
            self.reaction_wheel_zero_crossings
                .insert(absolute_cadence(locator, window, index)?);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PDC
// ---------------------------------------------------------------------------

/// Corrected flux as archived: filled samples gapped, then outliers put
/// back as data. Also keeps the discontinuity and outlier cadences per
/// target, and the per-target metrics of the latest window that has them.
#[derive(Debug, Default)]
pub struct PdcOutputSeries {
    pub corrected_flux: WindowedSeries<EntityKey, CompoundFloatTimeSeries>,
    pub discontinuities: BTreeMap<i32, BTreeSet<i32>>,
    pub outliers: BTreeMap<i32, BTreeSet<i32>>,
    characteristics: BTreeMap<i32, (i32, PdcProcessingCharacteristics)>,
    goodness: BTreeMap<i32, (i32, PdcGoodnessMetric)>,
}

impl PdcOutputSeries {
    pub fn processing_characteristics(&self, kepler_id: i32) -> Option<&PdcProcessingCharacteristics> {
        self.characteristics.get(&kepler_id).map(|(_, c)| c)
    }

    pub fn goodness_metric(&self, kepler_id: i32) -> Option<&PdcGoodnessMetric> {
        self.goodness.get(&kepler_id).map(|(_, g)| g)
    }
}

/// Keep `value` unless a later window already supplied one.
fn keep_latest<T: Clone>(slot: &mut BTreeMap<i32, (i32, T)>, kepler_id: i32, start: i32, value: Option<&T>) {
    let Some(value) = value else {
        return;
    };
    match slot.get(&kepler_id) {
        Some((existing, _)) if *existing > start => {}
        _ => {
            slot.insert(kepler_id, (start, value.clone()));
        }
    }
}

impl StageVisitor for PdcOutputSeries {
    fn visit(&mut self, locator: &FragmentLocator, record: &FragmentRecord) -> Result<()> {
        let FragmentRecord::PdcOutputs(outputs) = record else {
            return Err(unexpected(locator, record, "pdc_outputs"));
        };
        let window = outputs.cadence_range;
        for t in &outputs.targets {
            let mut flux = t.corrected_flux.clone();
            for &index in &t.filled_indices {
                absolute_cadence(locator, window, index)?;
                flux.gap_indicators[index as usize] = true;
            }
            // A restored outlier is data again, even where PDC filled it.
            let outliers = self.outliers.entry(t.kepler_id).or_default();
            for (i, &index) in t.outliers.indices.iter().enumerate() {
                let cadence = absolute_cadence(locator, window, index)?;
                let at = index as usize;
                flux.values[at] = t.outliers.values[i];
                flux.uncertainties[at] = t.outliers.uncertainties[i];
                flux.gap_indicators[at] = false;
                outliers.insert(cadence);
            }
            keep_latest(
                &mut self.characteristics,
                t.kepler_id,
                window.start(),
                t.processing_characteristics.as_ref(),
            );
            keep_latest(
                &mut self.goodness,
                t.kepler_id,
                window.start(),
                t.goodness_metric.as_ref(),
            );
            let discontinuities = self.discontinuities.entry(t.kepler_id).or_default();
            for &index in &t.discontinuity_indices {
                discontinuities.insert(absolute_cadence(locator, window, index)?);
            }
            self.corrected_flux
                .insert(EntityKey::Target(t.kepler_id), window, flux);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DV and TPS
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct DvOutputSeries {
    pub residual_flux: WindowedSeries<EntityKey, CompoundFloatTimeSeries>,
    pub model_light_curves: WindowedSeries<EntityKey, SimpleFloatTimeSeries>,
}

impl StageVisitor for DvOutputSeries {
    fn visit(&mut self, locator: &FragmentLocator, record: &FragmentRecord) -> Result<()> {
        let FragmentRecord::DvOutputs(outputs) = record else {
            return Err(unexpected(locator, record, "dv_outputs"));
        };
        let window = outputs.cadence_range;
        for t in &outputs.targets {
            self.residual_flux
                .insert(EntityKey::Target(t.kepler_id), window, t.residual_flux.clone());
            for planet in &t.planets {
                self.model_light_curves.insert(
                    EntityKey::Planet(t.kepler_id, planet.planet_number),
                    window,
                    planet.model_light_curve.clone(),
                );
            }
        }
        Ok(())
    }
}

/// Per-target TPS results; these are indexed by trial pulse, not cadence.
#[derive(Debug, Default)]
pub struct TpsResults {
    pub results: BTreeMap<i32, TpsResult>,
}

impl TpsResults {
    pub fn cdpp(&self, kepler_id: i32) -> Option<SimpleFloatTimeSeries> {
        self.results
            .get(&kepler_id)
            .map(|r| per_pulse(r.cdpp.clone()))
    }

    pub fn max_mes(&self, kepler_id: i32) -> Option<SimpleFloatTimeSeries> {
        self.results
            .get(&kepler_id)
            .map(|r| per_pulse(r.max_multiple_event_statistic.clone()))
    }
}

fn per_pulse(values: Vec<f32>) -> SimpleFloatTimeSeries {
    let gaps = vec![false; values.len()];
    SimpleFloatTimeSeries::new(values, gaps)
}

impl StageVisitor for TpsResults {
    fn visit(&mut self, locator: &FragmentLocator, record: &FragmentRecord) -> Result<()> {
        let FragmentRecord::TpsOutputs(outputs) = record else {
            return Err(unexpected(locator, record, "tps_outputs"));
        };
        for result in &outputs.results {
            if self.results.insert(result.kepler_id, result.clone()).is_some() {
                log::warn!(
                    "Target {} has TPS results in more than one fragment, keeping {}",
                    result.kepler_id,
                    locator.path.display()
                );
            }
        }
        Ok(())
    }
}
