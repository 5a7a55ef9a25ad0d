//! Per-cadence quality bitmask assembly.

use std::collections::BTreeSet;

use crate::data::model::{CadenceRange, SimpleIntTimeSeries};
use crate::data::tables::{CadenceFlags, CadenceTable};

// ---------------------------------------------------------------------------
// Bit layout
// ---------------------------------------------------------------------------

/// One condition of the quality bitmask. Every variant owns a distinct bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QualityFlag {
    AttitudeTweak,
    SafeMode,
    CoarsePoint,
    EarthPoint,
    ReactionWheelZeroCrossing,
    ReactionWheelDesaturation,
    MultichannelArgabrightening,
    CosmicRay,
    Exclude,
    Discontinuity,
    Outlier,
    ModoutArgabrightening,
    CollateralCosmicRay,
    NotFinePoint,
    DataGap,
    DetectorElectronicsAnomaly,
}

impl QualityFlag {
    pub const ALL: [QualityFlag; 16] = [
        QualityFlag::AttitudeTweak,
        QualityFlag::SafeMode,
        QualityFlag::CoarsePoint,
        QualityFlag::EarthPoint,
        QualityFlag::ReactionWheelZeroCrossing,
        QualityFlag::ReactionWheelDesaturation,
        QualityFlag::MultichannelArgabrightening,
        QualityFlag::CosmicRay,
        QualityFlag::Exclude,
        QualityFlag::Discontinuity,
        QualityFlag::Outlier,
        QualityFlag::ModoutArgabrightening,
        QualityFlag::CollateralCosmicRay,
        QualityFlag::NotFinePoint,
        QualityFlag::DataGap,
        QualityFlag::DetectorElectronicsAnomaly,
    ];

    pub fn bit(self) -> i32 {
        match self {
            QualityFlag::AttitudeTweak => 1,
            QualityFlag::SafeMode => 1 << 1,
            QualityFlag::CoarsePoint => 1 << 2,
            QualityFlag::EarthPoint => 1 << 3,
            QualityFlag::ReactionWheelZeroCrossing => 1 << 4,
            QualityFlag::ReactionWheelDesaturation => 1 << 5,
            QualityFlag::MultichannelArgabrightening => 1 << 6,
            QualityFlag::CosmicRay => 1 << 7,
            QualityFlag::Exclude => 1 << 8,
            QualityFlag::Discontinuity => 1 << 10,
            QualityFlag::Outlier => 1 << 11,
            QualityFlag::ModoutArgabrightening => 1 << 12,
            QualityFlag::CollateralCosmicRay => 1 << 13,
            QualityFlag::NotFinePoint => 1 << 15,
            QualityFlag::DataGap => 1 << 16,
            QualityFlag::DetectorElectronicsAnomaly => 1 << 17,
        }
    }

    /// Flags set in `mask`, lowest bit first.
    pub fn decode(mask: i32) -> Vec<QualityFlag> {
        QualityFlag::ALL
            .into_iter()
            .filter(|flag| mask & flag.bit() != 0)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Single-cadence inputs
// ---------------------------------------------------------------------------

/// Detector/electronics anomaly indicators; any one sets the anomaly bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorAnomaly {
    pub sefi_acc: bool,
    pub sefi_cad: bool,
    pub lde_oos: bool,
    pub lde_par_er: bool,
    pub scrc_err: bool,
}

impl DetectorAnomaly {
    pub fn any(&self) -> bool {
        self.sefi_acc || self.sefi_cad || self.lde_oos || self.lde_par_er || self.scrc_err
    }
}

/// Every source that can contribute to one cadence's bitmask. `None` means
/// the source was not evaluated and contributes nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualityInputs {
    pub attitude_tweak: Option<bool>,
    pub safe_mode: Option<bool>,
    pub coarse_point: Option<bool>,
    pub multichannel_argabrightening: Option<bool>,
    pub exclude: Option<bool>,
    pub earth_point: Option<bool>,
    pub reaction_wheel_desaturation: Option<bool>,
    pub detector_anomaly: Option<DetectorAnomaly>,
    pub fine_point: Option<bool>,
    pub data_gap: Option<bool>,
    pub cosmic_ray_in_optimal_aperture: Option<bool>,
    pub collateral_cosmic_ray: Option<bool>,
    pub modout_argabrightening: Option<bool>,
    pub reaction_wheel_zero_crossing: Option<bool>,
    pub discontinuity: Option<bool>,
    pub outlier: Option<bool>,
}

impl QualityInputs {
    /// Inputs carried by one cadence-table row.
    pub fn from_cadence_flags(flags: &CadenceFlags) -> Self {
        QualityInputs {
            attitude_tweak: Some(flags.attitude_tweak),
            safe_mode: Some(flags.safe_mode),
            coarse_point: Some(flags.coarse_point),
            multichannel_argabrightening: Some(flags.argabrightening),
            exclude: Some(flags.exclude),
            earth_point: Some(flags.earth_point),
            reaction_wheel_desaturation: Some(flags.momentum_dump),
            detector_anomaly: Some(DetectorAnomaly {
                sefi_acc: flags.sefi_acc,
                sefi_cad: flags.sefi_cad,
                lde_oos: flags.lde_oos,
                lde_par_er: flags.lde_par_er,
                scrc_err: flags.scrc_err,
            }),
            fine_point: Some(flags.fine_point),
            data_gap: Some(flags.gap),
            ..QualityInputs::default()
        }
    }
}

/// OR together the bit of every source that is present and set.
pub fn assemble(inputs: &QualityInputs) -> i32 {
    let is_set = |source: Option<bool>| source == Some(true);

    let mut mask = 0;
    let mut raise = |on: bool, flag: QualityFlag| {
        if on {
            mask |= flag.bit();
        }
    };

    raise(is_set(inputs.attitude_tweak), QualityFlag::AttitudeTweak);
    raise(is_set(inputs.safe_mode), QualityFlag::SafeMode);
    raise(is_set(inputs.coarse_point), QualityFlag::CoarsePoint);
    raise(
        is_set(inputs.multichannel_argabrightening),
        QualityFlag::MultichannelArgabrightening,
    );
    raise(is_set(inputs.exclude), QualityFlag::Exclude);
    raise(is_set(inputs.earth_point), QualityFlag::EarthPoint);
    raise(
        is_set(inputs.reaction_wheel_desaturation),
        QualityFlag::ReactionWheelDesaturation,
    );
    raise(
        inputs.detector_anomaly.is_some_and(|a| a.any()),
        QualityFlag::DetectorElectronicsAnomaly,
    );
    // Inverted: the bit marks the absence of fine point.
    raise(inputs.fine_point == Some(false), QualityFlag::NotFinePoint);
    raise(is_set(inputs.data_gap), QualityFlag::DataGap);
    raise(
        is_set(inputs.cosmic_ray_in_optimal_aperture),
        QualityFlag::CosmicRay,
    );
    raise(
        is_set(inputs.collateral_cosmic_ray),
        QualityFlag::CollateralCosmicRay,
    );
    raise(
        is_set(inputs.modout_argabrightening),
        QualityFlag::ModoutArgabrightening,
    );
    raise(
        is_set(inputs.reaction_wheel_zero_crossing),
        QualityFlag::ReactionWheelZeroCrossing,
    );
    raise(is_set(inputs.discontinuity), QualityFlag::Discontinuity);
    raise(is_set(inputs.outlier), QualityFlag::Outlier);

    mask
}

// ---------------------------------------------------------------------------
// Range-level sources
// ---------------------------------------------------------------------------

/// Sources that describe a whole cadence range. Every cadence set holds
/// absolute cadence numbers; a `None` set is a source that was not
/// evaluated.
#[derive(Debug, Clone, Default)]
pub struct QualitySources<'a> {
    pub cadence_table: Option<&'a CadenceTable>,
    pub optimal_aperture_cosmic_rays: Option<BTreeSet<i32>>,
    pub collateral_cosmic_rays: Option<BTreeSet<i32>>,
    pub modout_argabrightening: Option<BTreeSet<i32>>,
    pub reaction_wheel_zero_crossings: Option<BTreeSet<i32>>,
    pub discontinuities: Option<BTreeSet<i32>>,
    pub outliers: Option<BTreeSet<i32>>,
}

impl QualitySources<'_> {
    pub fn inputs_at(&self, cadence: i32) -> QualityInputs {
        let mut inputs = self
            .cadence_table
            .and_then(|table| table.flags_at(cadence))
            .map(QualityInputs::from_cadence_flags)
            .unwrap_or_default();

        let member = |set: &Option<BTreeSet<i32>>| set.as_ref().map(|s| s.contains(&cadence));
        inputs.cosmic_ray_in_optimal_aperture = member(&self.optimal_aperture_cosmic_rays);
        inputs.collateral_cosmic_ray = member(&self.collateral_cosmic_rays);
        inputs.modout_argabrightening = member(&self.modout_argabrightening);
        inputs.reaction_wheel_zero_crossing = member(&self.reaction_wheel_zero_crossings);
        inputs.discontinuity = member(&self.discontinuities);
        inputs.outlier = member(&self.outliers);
        inputs
    }

    /// Bitmask series over `range`. Cadences the cadence table does not
    /// cover are gaps.
    pub fn assemble_range(&self, range: CadenceRange) -> SimpleIntTimeSeries {
        let mut values = Vec::with_capacity(range.len());
        let mut gaps = Vec::with_capacity(range.len());
        for cadence in range.cadences() {
            values.push(assemble(&self.inputs_at(cadence)));
            let covered = self
                .cadence_table
                .map_or(true, |table| table.flags_at(cadence).is_some());
            gaps.push(!covered);
        }
        SimpleIntTimeSeries::new(values, gaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_are_disjoint() {
        let mut seen = 0;
        for flag in QualityFlag::ALL {
            let bit = flag.bit();
            assert_eq!(bit.count_ones(), 1, "{flag:?}");
            assert_eq!(seen & bit, 0, "{flag:?} reuses a bit");
            seen |= bit;
        }
    }

    #[test]
    fn absent_sources_contribute_nothing() {
        assert_eq!(assemble(&QualityInputs::default()), 0);
    }

    #[test]
    fn fine_point_is_inverted() {
        let inputs = QualityInputs {
            fine_point: Some(false),
            ..QualityInputs::default()
        };
        assert_eq!(assemble(&inputs), QualityFlag::NotFinePoint.bit());
        let inputs = QualityInputs {
            fine_point: Some(true),
            ..QualityInputs::default()
        };
        assert_eq!(assemble(&inputs), 0);
    }

    #[test]
    fn any_detector_anomaly_sets_one_bit() {
        let inputs = QualityInputs {
            detector_anomaly: Some(DetectorAnomaly {
                lde_oos: true,
                scrc_err: true,
                ..DetectorAnomaly::default()
            }),
            ..QualityInputs::default()
        };
        assert_eq!(
            QualityFlag::decode(assemble(&inputs)),
            vec![QualityFlag::DetectorElectronicsAnomaly]
        );
    }

    #[test]
    fn tweak_and_cosmic_ray_combine() {
        let inputs = QualityInputs {
            attitude_tweak: Some(true),
            safe_mode: Some(false),
            cosmic_ray_in_optimal_aperture: Some(true),
            ..QualityInputs::default()
        };
        assert_eq!(
            assemble(&inputs),
            QualityFlag::AttitudeTweak.bit() | QualityFlag::CosmicRay.bit()
        );
    }

    #[test]
    fn range_uses_table_and_cadence_sets() {
        let rows = (10..=12)
            .map(|cadence| CadenceFlags {
                cadence,
                fine_point: true,
                exclude: cadence == 11,
                ..CadenceFlags::default()
            })
            .collect();
        let table = CadenceTable::from_rows(rows).unwrap();
        let sources = QualitySources {
            cadence_table: Some(&table),
            outliers: Some(BTreeSet::from([12])),
            ..QualitySources::default()
        };
        let series = sources.assemble_range(CadenceRange::new(10, 13).unwrap());
        assert_eq!(
            series.values,
            vec![
                0,
                QualityFlag::Exclude.bit(),
                QualityFlag::Outlier.bit(),
                0
            ]
        );
        assert_eq!(series.gap_indicators, vec![false, false, false, true]);
    }
}
