//! Decoded intermediate-file schemas.
//!
//! Each pipeline stage writes one of a small, closed set of record layouts.
//! [`FragmentRecord`] is the tagged union the extractor hands to visitors.

use serde::{Deserialize, Serialize};

use super::model::{
    CadenceRange, CollateralKind, CompoundDoubleTimeSeries, CompoundFloatTimeSeries, Pixel,
    SimpleFloatTimeSeries, SimpleIntTimeSeries, TimeSeries,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "snake_case")]
pub enum FragmentRecord {
    CalInputs(CalInputs),
    CalOutputs(CalOutputs),
    PaInputs(PaInputs),
    PaOutputs(PaOutputs),
    PdcOutputs(PdcOutputs),
    DvOutputs(DvOutputs),
    TpsOutputs(TpsOutputs),
}

impl FragmentRecord {
    pub fn schema_name(&self) -> &'static str {
        match self {
            FragmentRecord::CalInputs(_) => "cal_inputs",
            FragmentRecord::CalOutputs(_) => "cal_outputs",
            FragmentRecord::PaInputs(_) => "pa_inputs",
            FragmentRecord::PaOutputs(_) => "pa_outputs",
            FragmentRecord::PdcOutputs(_) => "pdc_outputs",
            FragmentRecord::DvOutputs(_) => "dv_outputs",
            FragmentRecord::TpsOutputs(_) => "tps_outputs",
        }
    }

    /// Cadence window the record covers.
    pub fn cadence_range(&self) -> CadenceRange {
        match self {
            FragmentRecord::CalInputs(r) => r.cadence_range,
            FragmentRecord::CalOutputs(r) => r.cadence_range,
            FragmentRecord::PaInputs(r) => r.cadence_range,
            FragmentRecord::PaOutputs(r) => r.cadence_range,
            FragmentRecord::PdcOutputs(r) => r.cadence_range,
            FragmentRecord::DvOutputs(r) => r.cadence_range,
            FragmentRecord::TpsOutputs(r) => r.cadence_range,
        }
    }

    /// Check that every embedded cadence series has consistent parallel
    /// arrays spanning the record's window.
    pub fn check_consistency(&self) -> Result<(), String> {
        let window = self.cadence_range().len();
        let check = |name: &str, series: &dyn SeriesShape| -> Result<(), String> {
            series.lengths_ok().map_err(|e| format!("{name}: {e}"))?;
            if series.sample_count() != window {
                return Err(format!(
                    "{name}: {} samples for a {window} cadence window",
                    series.sample_count()
                ));
            }
            Ok(())
        };

        match self {
            FragmentRecord::CalInputs(r) => {
                for p in &r.pixels {
                    check(&format!("pixel {}", p.pixel), &p.values)?;
                }
                for c in &r.collateral {
                    check(&format!("{} {}", c.kind.name(), c.offset), &c.values)?;
                }
            }
            FragmentRecord::CalOutputs(r) => {
                for p in &r.pixels {
                    check(&format!("pixel {}", p.pixel), &p.values)?;
                }
                for c in &r.collateral {
                    check(&format!("{} {}", c.kind.name(), c.offset), &c.values)?;
                }
            }
            FragmentRecord::PaInputs(r) => {
                for t in &r.targets {
                    for p in &t.pixels {
                        check(&format!("target {} pixel {}", t.kepler_id, p.pixel), &p.values)?;
                    }
                }
                for p in &r.background_pixels {
                    check(&format!("background pixel {}", p.pixel), &p.values)?;
                }
            }
            FragmentRecord::PaOutputs(r) => {
                for t in &r.flux_targets {
                    let id = t.kepler_id;
                    check(&format!("target {id} flux"), &t.flux)?;
                    check(&format!("target {id} background"), &t.background)?;
                    check(
                        &format!("target {id} time offset"),
                        &t.barycentric_time_offset,
                    )?;
                    check(&format!("target {id} PRF row"), &t.prf_centroid_row)?;
                    check(&format!("target {id} PRF column"), &t.prf_centroid_column)?;
                    check(&format!("target {id} centroid row"), &t.flux_weighted_centroid_row)?;
                    check(
                        &format!("target {id} centroid column"),
                        &t.flux_weighted_centroid_column,
                    )?;
                }
            }
            FragmentRecord::PdcOutputs(r) => {
                for t in &r.targets {
                    check(&format!("target {} corrected flux", t.kepler_id), &t.corrected_flux)?;
                    if t.outliers.values.len() != t.outliers.indices.len()
                        || t.outliers.uncertainties.len() != t.outliers.indices.len()
                    {
                        return Err(format!(
                            "target {}: outlier arrays differ in length",
                            t.kepler_id
                        ));
                    }
                }
            }
            FragmentRecord::DvOutputs(r) => {
                for t in &r.targets {
                    check(&format!("target {} residual flux", t.kepler_id), &t.residual_flux)?;
                    for p in &t.planets {
                        check(
                            &format!("planet {}:{} model", t.kepler_id, p.planet_number),
                            &p.model_light_curve,
                        )?;
                    }
                }
            }
            FragmentRecord::TpsOutputs(r) => {
                for t in &r.results {
                    if t.cdpp.len() != t.trial_transit_pulse_hours.len()
                        || t.max_multiple_event_statistic.len() != t.trial_transit_pulse_hours.len()
                    {
                        return Err(format!(
                            "target {}: per-pulse arrays differ in length",
                            t.kepler_id
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Object-safe view of a series used by the consistency check.
trait SeriesShape {
    fn lengths_ok(&self) -> Result<(), String>;
    fn sample_count(&self) -> usize;
}

impl<S: TimeSeries> SeriesShape for S {
    fn lengths_ok(&self) -> Result<(), String> {
        self.check_lengths()
    }

    fn sample_count(&self) -> usize {
        self.len()
    }
}

// ---------------------------------------------------------------------------
// CAL
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalInputs {
    pub cadence_range: CadenceRange,
    #[serde(default)]
    pub pixels: Vec<RawPixel>,
    #[serde(default)]
    pub collateral: Vec<RawCollateral>,
}

/// Uncalibrated target or background pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPixel {
    pub pixel: Pixel,
    pub values: SimpleIntTimeSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCollateral {
    pub kind: CollateralKind,
    pub offset: i32,
    pub values: SimpleIntTimeSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalOutputs {
    pub cadence_range: CadenceRange,
    #[serde(default)]
    pub pixels: Vec<CalibratedPixel>,
    #[serde(default)]
    pub collateral: Vec<CalibratedCollateral>,
    #[serde(default)]
    pub collateral_cosmic_rays: Vec<CollateralCosmicRay>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedPixel {
    pub pixel: Pixel,
    pub values: CompoundFloatTimeSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedCollateral {
    pub kind: CollateralKind,
    pub offset: i32,
    pub values: CompoundFloatTimeSeries,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollateralCosmicRay {
    pub kind: CollateralKind,
    pub offset: i32,
    pub cadence: i32,
    pub delta: f32,
}

// ---------------------------------------------------------------------------
// PA
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaInputs {
    pub cadence_range: CadenceRange,
    #[serde(default)]
    pub targets: Vec<PaTarget>,
    #[serde(default)]
    pub background_pixels: Vec<PaPixel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaTarget {
    pub kepler_id: i32,
    #[serde(default)]
    pub labels: Vec<String>,
    pub reference_pixel: Pixel,
    pub pixels: Vec<PaPixel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaPixel {
    pub pixel: Pixel,
    #[serde(default)]
    pub in_optimal_aperture: bool,
    pub values: CompoundFloatTimeSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaOutputs {
    pub cadence_range: CadenceRange,
    #[serde(default)]
    pub flux_targets: Vec<PaFluxTarget>,
    #[serde(default)]
    pub target_cosmic_rays: Vec<PixelCosmicRay>,
    #[serde(default)]
    pub background_cosmic_rays: Vec<PixelCosmicRay>,
    /// Offsets from `cadence_range.start()`.
    #[serde(default)]
    pub argabrightening_indices: Vec<i32>,
    /// Offsets from `cadence_range.start()`.
    #[serde(default)]
    pub reaction_wheel_zero_crossing_indices: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaFluxTarget {
    pub kepler_id: i32,
    pub flux: CompoundFloatTimeSeries,
    pub background: CompoundFloatTimeSeries,
    pub barycentric_time_offset: SimpleFloatTimeSeries,
    pub prf_centroid_row: CompoundDoubleTimeSeries,
    pub prf_centroid_column: CompoundDoubleTimeSeries,
    pub flux_weighted_centroid_row: CompoundDoubleTimeSeries,
    pub flux_weighted_centroid_column: CompoundDoubleTimeSeries,
    #[serde(default)]
    pub pixel_aperture: Vec<CentroidPixel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CentroidPixel {
    pub pixel: Pixel,
    pub in_prf_centroid_aperture: bool,
    pub in_flux_weighted_centroid_aperture: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelCosmicRay {
    pub pixel: Pixel,
    pub cadence: i32,
    pub delta: f32,
}

// ---------------------------------------------------------------------------
// PDC
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdcOutputs {
    pub cadence_range: CadenceRange,
    pub targets: Vec<PdcTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdcTarget {
    pub kepler_id: i32,
    pub corrected_flux: CompoundFloatTimeSeries,
    /// Offsets of samples PDC filled in; they count as gaps downstream.
    #[serde(default)]
    pub filled_indices: Vec<i32>,
    #[serde(default)]
    pub outliers: Outliers,
    /// Offsets flagged as discontinuities.
    #[serde(default)]
    pub discontinuity_indices: Vec<i32>,
    #[serde(default)]
    pub processing_characteristics: Option<PdcProcessingCharacteristics>,
    #[serde(default)]
    pub goodness_metric: Option<PdcGoodnessMetric>,
}

/// How PDC treated one target; archived as light-curve header keywords.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdcProcessingCharacteristics {
    pub pdc_method: String,
    pub num_discontinuities_detected: i32,
    pub num_discontinuities_removed: i32,
    pub target_variability: f32,
    #[serde(default)]
    pub bands: Vec<PdcBand>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdcBand {
    pub fit_type: String,
    pub prior_weight: f32,
    pub prior_goodness: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PdcGoodnessComponent {
    pub value: f32,
    pub percentile: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PdcGoodnessMetric {
    pub correlation: PdcGoodnessComponent,
    pub delta_variability: PdcGoodnessComponent,
    pub earth_point_removal: PdcGoodnessComponent,
    pub introduced_noise: PdcGoodnessComponent,
    pub total: PdcGoodnessComponent,
}

/// Original values PDC replaced; restored before comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outliers {
    pub indices: Vec<i32>,
    pub values: Vec<f32>,
    pub uncertainties: Vec<f32>,
}

// ---------------------------------------------------------------------------
// DV and TPS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DvOutputs {
    pub cadence_range: CadenceRange,
    pub targets: Vec<DvTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DvTarget {
    pub kepler_id: i32,
    pub residual_flux: CompoundFloatTimeSeries,
    #[serde(default)]
    pub planets: Vec<DvPlanet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DvPlanet {
    pub planet_number: i32,
    pub model_light_curve: SimpleFloatTimeSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpsOutputs {
    pub cadence_range: CadenceRange,
    pub results: Vec<TpsResult>,
}

/// Per-target search results, one entry per trial transit pulse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpsResult {
    pub kepler_id: i32,
    pub trial_transit_pulse_hours: Vec<f32>,
    pub cdpp: Vec<f32>,
    pub max_multiple_event_statistic: Vec<f32>,
}
