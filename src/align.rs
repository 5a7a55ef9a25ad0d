use crate::data::model::{CadenceRange, TimeSeries};
use crate::error::{Result, ValidationError};

/// Window `series`, which spans `source`, down to the cadences of `target`.
///
/// `target` must lie inside `source`. When both ranges have the same length
/// the series is handed back unchanged; otherwise the samples at
/// `target.start() - source.start()` onwards are copied out.
pub fn resize<S: TimeSeries>(target: CadenceRange, source: CadenceRange, series: S) -> Result<S> {
    if !source.contains_range(&target) {
        return Err(ValidationError::OutOfBounds {
            target_start: target.start(),
            target_end: target.end(),
            source_start: source.start(),
            source_end: source.end(),
        });
    }
    if target.len() == source.len() {
        return Ok(series);
    }

    let offset = (target.start() - source.start()) as usize;
    if offset + target.len() > series.len() {
        return Err(ValidationError::execution(format!(
            "series of {} samples is too short for window {target} of source {source}",
            series.len()
        )));
    }
    Ok(series.window(offset, target.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{CompoundFloatTimeSeries, SimpleIntTimeSeries};

    fn range(start: i32, end: i32) -> CadenceRange {
        CadenceRange::new(start, end).unwrap()
    }

    fn ramp(len: usize) -> SimpleIntTimeSeries {
        SimpleIntTimeSeries::new((0..len as i32).collect(), vec![false; len])
    }

    #[test]
    fn window_starts_at_offset() {
        let resized = resize(range(100, 200), range(150, 160), ramp(101));
        assert!(resized.is_err());

        let resized = resize(range(150, 160), range(100, 200), ramp(101)).unwrap();
        assert_eq!(resized.len(), 11);
        assert_eq!(resized.values[0], 50);
        assert_eq!(resized.values[10], 60);
    }

    #[test]
    fn same_length_is_identity() {
        let series = CompoundFloatTimeSeries::new(vec![1.0, 2.0], vec![0.5, 0.5], vec![true, false]);
        let resized = resize(range(7, 8), range(7, 8), series.clone()).unwrap();
        assert_eq!(resized, series);
    }

    #[test]
    fn out_of_bounds_is_not_clamped() {
        let err = resize(range(95, 105), range(100, 200), ramp(101)).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfBounds {
                target_start: 95,
                source_start: 100,
                ..
            }
        ));
        assert!(resize(range(150, 210), range(100, 200), ramp(101)).is_err());
    }

    #[test]
    fn short_series_is_an_error() {
        let err = resize(range(150, 160), range(100, 200), ramp(20)).unwrap_err();
        assert!(matches!(err, ValidationError::Execution(_)));
    }
}
