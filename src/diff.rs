use std::fmt::{Display, Write};

use crate::data::model::{CompoundTimeSeries, EntityKey, SimpleTimeSeries, TimeSeries};

/// Absolute tolerance for simple float and double series.
pub const FLOAT_TOLERANCE: f64 = 1e-8;

// ---------------------------------------------------------------------------
// Element comparison
// ---------------------------------------------------------------------------

/// Element type of a comparable series.
pub trait DiffValue: Copy + Display {
    /// Comparison used for simple series.
    fn tolerably_equal(self, other: Self) -> bool;

    /// Comparison used for compound series.
    fn exactly_equal(self, other: Self) -> bool;
}

impl DiffValue for i32 {
    fn tolerably_equal(self, other: Self) -> bool {
        self == other
    }

    fn exactly_equal(self, other: Self) -> bool {
        self == other
    }
}

impl DiffValue for f32 {
    fn tolerably_equal(self, other: Self) -> bool {
        (f64::from(self) - f64::from(other)).abs() < FLOAT_TOLERANCE
    }

    fn exactly_equal(self, other: Self) -> bool {
        self == other
    }
}

impl DiffValue for f64 {
    fn tolerably_equal(self, other: Self) -> bool {
        (self - other).abs() < FLOAT_TOLERANCE
    }

    fn exactly_equal(self, other: Self) -> bool {
        self == other
    }
}

/// A series the diff engine can walk sample by sample.
pub trait DiffSamples: TimeSeries {
    /// Whether the non-gap samples at `i` disagree.
    fn values_differ(&self, other: &Self, i: usize) -> bool;

    /// `value gap` or `value uncertainty gap` for sample `i`.
    fn describe(&self, i: usize) -> String;

    /// Column header naming what [`DiffSamples::describe`] prints.
    fn columns() -> &'static str;
}

impl<T: DiffValue> DiffSamples for SimpleTimeSeries<T> {
    fn values_differ(&self, other: &Self, i: usize) -> bool {
        !self.values[i].tolerably_equal(other.values[i])
    }

    fn describe(&self, i: usize) -> String {
        format!("{} {}", self.values[i], self.gap_indicators[i])
    }

    fn columns() -> &'static str {
        "(value, gap)"
    }
}

impl<T: DiffValue> DiffSamples for CompoundTimeSeries<T> {
    fn values_differ(&self, other: &Self, i: usize) -> bool {
        !self.values[i].exactly_equal(other.values[i])
            || !self.uncertainties[i].exactly_equal(other.uncertainties[i])
    }

    fn describe(&self, i: usize) -> String {
        format!(
            "{} {} {}",
            self.values[i], self.uncertainties[i], self.gap_indicators[i]
        )
    }

    fn columns() -> &'static str {
        "(value, uncertainty, gap)"
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of comparing one task-side series with its archive counterpart.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffReport {
    pub equal: bool,
    pub error_count: usize,
    /// Number of samples compared, the shorter of the two lengths.
    pub compared: usize,
    pub text: String,
}

impl DiffReport {
    pub fn percent(&self) -> f64 {
        if self.compared == 0 {
            0.0
        } else {
            self.error_count as f64 / self.compared as f64 * 100.0
        }
    }
}

/// Compare `task` against `archive` over their common prefix.
///
/// A sample mismatches when the gap indicators differ, or when neither side
/// is gapped and the values differ. Only the first `max_errors_displayed`
/// mismatches are itemised; the count covers all of them.
pub fn diff<S: DiffSamples>(
    label: &str,
    entity: &EntityKey,
    task: &S,
    archive: &S,
    max_errors_displayed: usize,
) -> DiffReport {
    let compared = task.len().min(archive.len());
    let task_gaps = task.gap_indicators();
    let archive_gaps = archive.gap_indicators();

    let mut text = String::new();
    let _ = writeln!(text, "\nTime series of type {label} for {entity} differ");
    let _ = writeln!(
        text,
        "Index\tTask file {columns}\tArchive {columns}",
        columns = S::columns()
    );

    let mut error_count = 0;
    for i in 0..compared {
        let mismatch = task_gaps[i] != archive_gaps[i]
            || (!task_gaps[i] && task.values_differ(archive, i));
        if !mismatch {
            continue;
        }
        error_count += 1;
        if error_count <= max_errors_displayed {
            let _ = writeln!(text, "{i}\t{}\t{}", task.describe(i), archive.describe(i));
        }
    }

    if error_count > 0 && error_count >= max_errors_displayed {
        text.push_str("...\n");
    }

    let mut report = DiffReport {
        equal: error_count == 0,
        error_count,
        compared,
        text,
    };
    let summary = format!(
        "{} error{} in {} values ({:.2}%)\n",
        error_count,
        if error_count == 1 { "" } else { "s" },
        compared,
        report.percent()
    );
    report.text.push_str(&summary);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{CompoundFloatTimeSeries, SimpleFloatTimeSeries, SimpleIntTimeSeries};

    const ENTITY: EntityKey = EntityKey::Target(8462852);

    #[test]
    fn gap_disagreement_is_one_error() {
        let a = SimpleFloatTimeSeries::new(vec![1.0, 2.0, 3.0], vec![false, false, true]);
        let b = SimpleFloatTimeSeries::new(vec![1.0, 2.0, 3.0], vec![false, false, false]);
        let report = diff("SAP_FLUX", &ENTITY, &a, &b, 10);
        assert!(!report.equal);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.compared, 3);
        assert!(report.text.contains("\n2\t3 true\t3 false\n"), "{}", report.text);
        assert!(report.text.ends_with("1 error in 3 values (33.33%)\n"));
    }

    #[test]
    fn gapped_values_are_not_compared() {
        let a = SimpleIntTimeSeries::new(vec![1, 99], vec![false, true]);
        let b = SimpleIntTimeSeries::new(vec![1, -5], vec![false, true]);
        let report = diff("ORIG", &ENTITY, &a, &b, 10);
        assert!(report.equal);
        assert!(report.text.ends_with("0 errors in 2 values (0.00%)\n"));
    }

    #[test]
    fn tolerance_is_exclusive() {
        let a = SimpleTimeSeries::new(vec![1.0_f64, 1.0], vec![false, false]);
        let b = SimpleTimeSeries::new(vec![1.0 + 5e-9, 1.0 + 2e-8], vec![false, false]);
        let report = diff("MOM_CENTR1", &ENTITY, &a, &b, 10);
        assert_eq!(report.error_count, 1);
    }

    #[test]
    fn nan_matches_nothing_unless_gapped() {
        let a = SimpleFloatTimeSeries::new(vec![f32::NAN, f32::NAN], vec![false, true]);
        let b = SimpleFloatTimeSeries::new(vec![f32::NAN, f32::NAN], vec![false, true]);
        let report = diff("SAP_BKG", &ENTITY, &a, &b, 10);
        assert_eq!(report.error_count, 1);
        assert!(report.text.contains("\n0\tNaN false\tNaN false\n"), "{}", report.text);

        let a = CompoundFloatTimeSeries::new(vec![f32::NAN], vec![0.1], vec![false]);
        assert!(!diff("FLUX", &ENTITY, &a, &a.clone(), 10).equal);
    }

    #[test]
    fn compound_series_compare_exactly() {
        let a = CompoundFloatTimeSeries::new(vec![1.0, 2.0], vec![0.1, 0.2], vec![false; 2]);
        let b = CompoundFloatTimeSeries::new(vec![1.0, 2.0], vec![0.1, 0.25], vec![false; 2]);
        let report = diff("FLUX", &ENTITY, &a, &b, 10);
        assert_eq!(report.error_count, 1);
        assert!(report.text.contains("1\t2 0.2 false\t2 0.25 false\n"));
    }

    #[test]
    fn display_limit_elides_rows_but_keeps_counting() {
        let a = SimpleIntTimeSeries::new(vec![0; 5], vec![false; 5]);
        let b = SimpleIntTimeSeries::new(vec![1; 5], vec![false; 5]);
        let report = diff("ORIG", &ENTITY, &a, &b, 2);
        assert_eq!(report.error_count, 5);
        let rows = report.text.lines().filter(|l| l.contains("\t0 false\t")).count();
        assert_eq!(rows, 2);
        assert!(report.text.contains("...\n5 errors in 5 values (100.00%)\n"));
    }

    #[test]
    fn reaching_the_display_limit_adds_the_marker() {
        let a = SimpleIntTimeSeries::new(vec![0; 3], vec![false; 3]);
        let b = SimpleIntTimeSeries::new(vec![0, 1, 1], vec![false; 3]);
        let report = diff("ORIG", &ENTITY, &a, &b, 2);
        assert_eq!(report.error_count, 2);
        assert!(report.text.contains("\n2\t0 false\t1 false\n...\n2 errors"), "{}", report.text);

        let report = diff("ORIG", &ENTITY, &a, &b, 3);
        assert!(!report.text.contains("..."));
        assert!(report.text.ends_with("2 errors in 3 values (66.67%)\n"));
    }

    #[test]
    fn shorter_side_bounds_the_comparison() {
        let a = SimpleIntTimeSeries::new(vec![1, 2, 3], vec![false; 3]);
        let b = SimpleIntTimeSeries::new(vec![1], vec![false]);
        let report = diff("ORIG", &ENTITY, &a, &b, 10);
        assert!(report.equal);
        assert_eq!(report.compared, 1);
    }
}
