use cadence_check::align::resize;
use cadence_check::data::model::{
    CadenceRange, EntityKey, Pixel, SimpleFloatTimeSeries, SimpleIntTimeSeries, TimeSeries,
};
use cadence_check::diff::diff;
use cadence_check::merge::merge;
use cadence_check::quality::{assemble, DetectorAnomaly, QualityFlag, QualityInputs};
use cadence_check::ValidationError;
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

const MIN_PROPTEST_CASES: u32 = 256;

fn proptest_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|parsed| parsed.max(MIN_PROPTEST_CASES))
        .unwrap_or(MIN_PROPTEST_CASES)
}

fn range(start: i32, end: i32) -> CadenceRange {
    CadenceRange::new(start, end).expect("valid range")
}

fn ramp(len: usize) -> SimpleIntTimeSeries {
    SimpleIntTimeSeries::new((0..len as i32).collect(), vec![false; len])
}

fn entity() -> EntityKey {
    EntityKey::Pixel(Pixel::new(300, 500))
}

/// Set quality source `index` so that it raises its flag, returning the flag.
fn raise_source(inputs: &mut QualityInputs, index: usize) -> QualityFlag {
    match index {
        0 => {
            inputs.attitude_tweak = Some(true);
            QualityFlag::AttitudeTweak
        }
        1 => {
            inputs.safe_mode = Some(true);
            QualityFlag::SafeMode
        }
        2 => {
            inputs.coarse_point = Some(true);
            QualityFlag::CoarsePoint
        }
        3 => {
            inputs.multichannel_argabrightening = Some(true);
            QualityFlag::MultichannelArgabrightening
        }
        4 => {
            inputs.exclude = Some(true);
            QualityFlag::Exclude
        }
        5 => {
            inputs.earth_point = Some(true);
            QualityFlag::EarthPoint
        }
        6 => {
            inputs.reaction_wheel_desaturation = Some(true);
            QualityFlag::ReactionWheelDesaturation
        }
        7 => {
            inputs.detector_anomaly = Some(DetectorAnomaly {
                lde_oos: true,
                ..DetectorAnomaly::default()
            });
            QualityFlag::DetectorElectronicsAnomaly
        }
        8 => {
            inputs.fine_point = Some(false);
            QualityFlag::NotFinePoint
        }
        9 => {
            inputs.data_gap = Some(true);
            QualityFlag::DataGap
        }
        10 => {
            inputs.cosmic_ray_in_optimal_aperture = Some(true);
            QualityFlag::CosmicRay
        }
        11 => {
            inputs.collateral_cosmic_ray = Some(true);
            QualityFlag::CollateralCosmicRay
        }
        12 => {
            inputs.modout_argabrightening = Some(true);
            QualityFlag::ModoutArgabrightening
        }
        13 => {
            inputs.reaction_wheel_zero_crossing = Some(true);
            QualityFlag::ReactionWheelZeroCrossing
        }
        14 => {
            inputs.discontinuity = Some(true);
            QualityFlag::Discontinuity
        }
        _ => {
            inputs.outlier = Some(true);
            QualityFlag::Outlier
        }
    }
}

/// Mark source `index` as evaluated without raising anything.
fn clear_source(inputs: &mut QualityInputs, index: usize) {
    match index {
        0 => inputs.attitude_tweak = Some(false),
        1 => inputs.safe_mode = Some(false),
        2 => inputs.coarse_point = Some(false),
        3 => inputs.multichannel_argabrightening = Some(false),
        4 => inputs.exclude = Some(false),
        5 => inputs.earth_point = Some(false),
        6 => inputs.reaction_wheel_desaturation = Some(false),
        7 => inputs.detector_anomaly = Some(DetectorAnomaly::default()),
        8 => inputs.fine_point = Some(true),
        9 => inputs.data_gap = Some(false),
        10 => inputs.cosmic_ray_in_optimal_aperture = Some(false),
        11 => inputs.collateral_cosmic_ray = Some(false),
        12 => inputs.modout_argabrightening = Some(false),
        13 => inputs.reaction_wheel_zero_crossing = Some(false),
        14 => inputs.discontinuity = Some(false),
        _ => inputs.outlier = Some(false),
    }
}

// ---------------------------------------------------------------------------
// Fixed cases
// ---------------------------------------------------------------------------

#[test]
fn one_gap_disagreement_in_three_samples() {
    let task = SimpleFloatTimeSeries::new(vec![1.0, 2.0, 3.0], vec![false, false, true]);
    let archive = SimpleFloatTimeSeries::new(vec![1.0, 2.0, 3.0], vec![false, false, false]);

    let report = diff("FLUX", &entity(), &task, &archive, 10);
    assert!(!report.equal);
    assert_eq!(report.error_count, 1);
    assert_eq!(report.compared, 3);
    assert!(report.text.contains("1 error in 3 values (33.33%)"));
}

#[test]
fn window_of_a_longer_source() {
    let resized = resize(range(150, 160), range(100, 200), ramp(101)).unwrap();
    assert_eq!(resized.len(), 11);
    assert_eq!(resized.values[0], 50);
}

#[test]
fn tweak_and_optimal_aperture_cosmic_ray() {
    let inputs = QualityInputs {
        attitude_tweak: Some(true),
        safe_mode: Some(false),
        cosmic_ray_in_optimal_aperture: Some(true),
        ..QualityInputs::default()
    };
    assert_eq!(assemble(&inputs), 1 | 128);
    assert_eq!(
        QualityFlag::decode(assemble(&inputs)),
        vec![QualityFlag::AttitudeTweak, QualityFlag::CosmicRay]
    );
}

#[test]
fn merge_depends_on_order() {
    let a = SimpleIntTimeSeries::new(vec![1, 2], vec![false, false]);
    let b = SimpleIntTimeSeries::new(vec![3], vec![true]);

    let ab = merge(Some(a.clone()), Some(b.clone())).unwrap();
    let ba = merge(Some(b), Some(a)).unwrap();
    assert_eq!(ab.values, vec![1, 2, 3]);
    assert_eq!(ba.values, vec![3, 1, 2]);
    assert_ne!(ab, ba);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig {
        cases: proptest_cases(),
        .. ProptestConfig::default()
    })]

    #[test]
    fn resize_keeps_samples_at_their_cadences(
        start in -1000i32..1000,
        source_len in 1usize..200,
        offset_seed in 0usize..200,
        len_seed in 0usize..200,
    ) {
        let offset = offset_seed % source_len;
        let target_len = 1 + len_seed % (source_len - offset);
        let source = CadenceRange::with_len(start, source_len).unwrap();
        let target = CadenceRange::with_len(start + offset as i32, target_len).unwrap();

        let resized = resize(target, source, ramp(source_len)).unwrap();
        prop_assert_eq!(resized.len(), target_len);
        for (i, &value) in resized.values.iter().enumerate() {
            prop_assert_eq!(value, (i + offset) as i32);
        }
    }

    #[test]
    fn same_length_resize_hands_back_the_series(
        start in -1000i32..1000,
        len in 1usize..100,
    ) {
        let series = ramp(len);
        let before = series.values.as_ptr();
        let whole = CadenceRange::with_len(start, len).unwrap();

        let resized = resize(whole, whole, series).unwrap();
        prop_assert_eq!(resized.values.as_ptr(), before);
        prop_assert_eq!(resized, ramp(len));
    }

    #[test]
    fn target_outside_source_is_rejected(
        start in -1000i32..1000,
        len in 1usize..100,
        overhang in 1i32..50,
        past_end in any::<bool>(),
    ) {
        let source = CadenceRange::with_len(start, len).unwrap();
        let target = if past_end {
            range(source.start(), source.end() + overhang)
        } else {
            range(source.start() - overhang, source.end())
        };

        let result = resize(target, source, ramp(len));
        let out_of_bounds = matches!(result, Err(ValidationError::OutOfBounds { .. }));
        prop_assert!(out_of_bounds);
    }

    #[test]
    fn a_series_equals_itself(
        samples in prop::collection::vec((-1.0e6f32..1.0e6, any::<bool>()), 0..200),
    ) {
        let (values, gaps): (Vec<f32>, Vec<bool>) = samples.into_iter().unzip();
        let series = SimpleFloatTimeSeries::new(values, gaps);

        let report = diff("FLUX", &entity(), &series, &series.clone(), 5);
        prop_assert!(report.equal);
        prop_assert_eq!(report.error_count, 0);
        prop_assert_eq!(report.compared, series.len());
    }

    #[test]
    fn one_flipped_gap_is_one_mismatch(
        samples in prop::collection::vec((any::<i32>(), any::<bool>()), 1..200),
        index_seed in any::<usize>(),
    ) {
        let (values, gaps): (Vec<i32>, Vec<bool>) = samples.into_iter().unzip();
        let k = index_seed % values.len();
        let task = SimpleIntTimeSeries::new(values.clone(), gaps.clone());
        let mut flipped = gaps;
        flipped[k] = !flipped[k];
        let archive = SimpleIntTimeSeries::new(values, flipped);

        let report = diff("ORIG_VALUE", &entity(), &task, &archive, 10);
        prop_assert!(!report.equal);
        prop_assert_eq!(report.error_count, 1);
        let itemised: Vec<&str> = report
            .text
            .lines()
            .filter(|line| line.starts_with(|c: char| c.is_ascii_digit()) && line.contains('\t'))
            .collect();
        prop_assert_eq!(itemised.len(), 1);
        let expected_prefix = format!("{k}\t");
        prop_assert!(itemised[0].starts_with(&expected_prefix));
    }

    #[test]
    fn merge_appends_in_order(
        first in prop::collection::vec(any::<i32>(), 0..50),
        second in prop::collection::vec(any::<i32>(), 0..50),
    ) {
        let a = SimpleIntTimeSeries::new(first.clone(), vec![false; first.len()]);
        let b = SimpleIntTimeSeries::new(second.clone(), vec![true; second.len()]);

        let merged = merge(Some(a.clone()), Some(b)).unwrap();
        prop_assert_eq!(merged.len(), first.len() + second.len());
        prop_assert_eq!(&merged.values[..first.len()], &first[..]);
        prop_assert_eq!(&merged.values[first.len()..], &second[..]);
        prop_assert!(merged.gap_indicators[first.len()..].iter().all(|&gap| gap));

        prop_assert_eq!(merge(Some(a.clone()), None), Some(a.clone()));
        prop_assert_eq!(merge(None, Some(a.clone())), Some(a));
    }

    #[test]
    fn quality_bits_are_independent(
        raised in prop::collection::vec(any::<bool>(), 16),
        evaluated in prop::collection::vec(any::<bool>(), 16),
    ) {
        let mut inputs = QualityInputs::default();
        let mut expected = 0;
        for index in 0..16 {
            if raised[index] {
                expected |= raise_source(&mut inputs, index).bit();
            } else if evaluated[index] {
                clear_source(&mut inputs, index);
            }
        }
        prop_assert_eq!(assemble(&inputs), expected);
    }
}
