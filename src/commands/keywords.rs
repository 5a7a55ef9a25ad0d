//! PDC header keywords: processing characteristics and goodness metrics,
//! checked against the archived keyword table.

use std::fmt::Display;

use crate::data::fragment::{
    PdcBand, PdcGoodnessComponent, PdcGoodnessMetric, PdcProcessingCharacteristics,
};
use crate::data::tables::KeywordTable;
use crate::error::Result;
use crate::extract::stages::PdcOutputSeries;

const PDCMETHD: &str = "PDCMETHD";
const NSPSDDET: &str = "NSPSDDET";
const NSPSDCOR: &str = "NSPSDCOR";
const PDCVAR: &str = "PDCVAR";
const NUMBAND: &str = "NUMBAND";
const FITTYPE: &str = "FITTYPE";
const PR_WGHT: &str = "PR_WGHT";
const PR_GOOD: &str = "PR_GOOD";

const PDC_COR: (&str, &str) = ("PDC_COR", "PDC_CORP");
const PDC_VAR: (&str, &str) = ("PDC_VAR", "PDC_VARP");
const PDC_EPT: (&str, &str) = ("PDC_EPT", "PDC_EPTP");
const PDC_NOI: (&str, &str) = ("PDC_NOI", "PDC_NOIP");
const PDC_TOT: (&str, &str) = ("PDC_TOT", "PDC_TOTP");

const FLOAT_TOLERANCE: f32 = 1e-6;

/// Both PDC keyword groups of one target.
pub(super) fn compare_pdc_keywords(
    kepler_id: i32,
    pdc: &PdcOutputSeries,
    table: &KeywordTable,
) -> Result<bool> {
    let archived = archived_characteristics(table, kepler_id)?;
    let mut equal = compare_characteristics(
        kepler_id,
        pdc.processing_characteristics(kepler_id),
        archived.as_ref(),
    );

    let archived = archived_goodness(table, kepler_id)?;
    let task = pdc.goodness_metric(kepler_id).copied().map(without_nans);
    equal &= compare_goodness(kepler_id, task.as_ref(), archived.as_ref());
    Ok(equal)
}

// ---------------------------------------------------------------------------
// Archived side
// ---------------------------------------------------------------------------

/// `None` when any keyword the characteristics need is absent.
fn archived_characteristics(
    table: &KeywordTable,
    kepler_id: i32,
) -> Result<Option<PdcProcessingCharacteristics>> {
    let (Some(pdc_method), Some(detected), Some(removed), Some(variability), Some(band_count)) = (
        table.keyword(kepler_id, PDCMETHD),
        table.parse::<i32>(kepler_id, NSPSDDET)?,
        table.parse::<i32>(kepler_id, NSPSDCOR)?,
        table.parse::<f32>(kepler_id, PDCVAR)?,
        table.parse::<usize>(kepler_id, NUMBAND)?,
    ) else {
        return Ok(None);
    };

    // Band keywords are numbered from 1.
    let mut bands = Vec::new();
    for band in 1..=band_count {
        let (Some(fit_type), Some(prior_weight), Some(prior_goodness)) = (
            table.keyword(kepler_id, &format!("{FITTYPE}{band}")),
            table.parse::<f32>(kepler_id, &format!("{PR_WGHT}{band}"))?,
            table.parse::<f32>(kepler_id, &format!("{PR_GOOD}{band}"))?,
        ) else {
            return Ok(None);
        };
        bands.push(PdcBand {
            fit_type: fit_type.to_string(),
            prior_weight,
            prior_goodness,
        });
    }

    Ok(Some(PdcProcessingCharacteristics {
        pdc_method: pdc_method.to_string(),
        num_discontinuities_detected: detected,
        num_discontinuities_removed: removed,
        target_variability: variability,
        bands,
    }))
}

fn archived_component(
    table: &KeywordTable,
    kepler_id: i32,
    (value, percentile): (&str, &str),
) -> Result<Option<PdcGoodnessComponent>> {
    let value = table.parse::<f32>(kepler_id, value)?;
    let percentile = table.parse::<f32>(kepler_id, percentile)?;
    Ok(value
        .zip(percentile)
        .map(|(value, percentile)| PdcGoodnessComponent { value, percentile }))
}

fn archived_goodness(table: &KeywordTable, kepler_id: i32) -> Result<Option<PdcGoodnessMetric>> {
    let (
        Some(correlation),
        Some(delta_variability),
        Some(earth_point_removal),
        Some(introduced_noise),
        Some(total),
    ) = (
        archived_component(table, kepler_id, PDC_COR)?,
        archived_component(table, kepler_id, PDC_VAR)?,
        archived_component(table, kepler_id, PDC_EPT)?,
        archived_component(table, kepler_id, PDC_NOI)?,
        archived_component(table, kepler_id, PDC_TOT)?,
    )
    else {
        return Ok(None);
    };
    Ok(Some(PdcGoodnessMetric {
        correlation,
        delta_variability,
        earth_point_removal,
        introduced_noise,
        total,
    }))
}

/// The archive writes 0 where PDC produced NaN.
fn without_nans(mut metric: PdcGoodnessMetric) -> PdcGoodnessMetric {
    for component in [
        &mut metric.correlation,
        &mut metric.delta_variability,
        &mut metric.earth_point_removal,
        &mut metric.introduced_noise,
        &mut metric.total,
    ] {
        if component.value.is_nan() {
            component.value = 0.0;
        }
        if component.percentile.is_nan() {
            component.percentile = 0.0;
        }
    }
    metric
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

fn report<T: Display>(label: &str, kepler_id: i32, task: T, archive: T, equal: bool) -> bool {
    if equal {
        log::debug!("Validated 1 {label}");
    } else {
        log::error!(
            "\n{label} differ\nKeplerId\tTask file (value)\tArchive (value)\n\
             {kepler_id}\t{task}\t{archive}\n"
        );
    }
    equal
}

fn same_text(label: &str, kepler_id: i32, task: &str, archive: &str) -> bool {
    report(label, kepler_id, task, archive, task == archive)
}

fn same_int(label: &str, kepler_id: i32, task: i32, archive: i32) -> bool {
    report(label, kepler_id, task, archive, task == archive)
}

fn same_float(label: &str, kepler_id: i32, task: f32, archive: f32) -> bool {
    report(label, kepler_id, task, archive, (task - archive).abs() < FLOAT_TOLERANCE)
}

fn both<'t, T>(label: &str, kepler_id: i32, task: Option<&'t T>, archive: Option<&'t T>) -> Option<(&'t T, &'t T)> {
    match (task, archive) {
        (Some(task), Some(archive)) => Some((task, archive)),
        (task, _) => {
            let missing = if task.is_none() { "task files" } else { "keyword table" };
            log::error!("{label} for target {kepler_id} missing from {missing}");
            None
        }
    }
}

fn compare_characteristics(
    kepler_id: i32,
    task: Option<&PdcProcessingCharacteristics>,
    archive: Option<&PdcProcessingCharacteristics>,
) -> bool {
    let Some((task, archive)) = both("PDC processing characteristics", kepler_id, task, archive)
    else {
        return false;
    };

    let mut equal = same_text("PDC method", kepler_id, &task.pdc_method, &archive.pdc_method);
    equal &= same_int(
        "number of discontinuities detected",
        kepler_id,
        task.num_discontinuities_detected,
        archive.num_discontinuities_detected,
    );
    equal &= same_int(
        "number of discontinuities removed",
        kepler_id,
        task.num_discontinuities_removed,
        archive.num_discontinuities_removed,
    );
    equal &= same_float(
        "target variability",
        kepler_id,
        task.target_variability,
        archive.target_variability,
    );
    equal &= report(
        "number of bands",
        kepler_id,
        task.bands.len(),
        archive.bands.len(),
        task.bands.len() == archive.bands.len(),
    );
    for (band, (t, a)) in task.bands.iter().zip(&archive.bands).enumerate() {
        equal &= same_text(&format!("band {band} fit type"), kepler_id, &t.fit_type, &a.fit_type);
        equal &= same_float(
            &format!("band {band} prior goodness"),
            kepler_id,
            t.prior_goodness,
            a.prior_goodness,
        );
        equal &= same_float(
            &format!("band {band} prior weight"),
            kepler_id,
            t.prior_weight,
            a.prior_weight,
        );
    }
    equal
}

fn compare_goodness(
    kepler_id: i32,
    task: Option<&PdcGoodnessMetric>,
    archive: Option<&PdcGoodnessMetric>,
) -> bool {
    let Some((task, archive)) = both("PDC goodness metric", kepler_id, task, archive) else {
        return false;
    };

    let mut equal = true;
    for (name, t, a) in [
        ("correlation", task.correlation, archive.correlation),
        ("delta variability", task.delta_variability, archive.delta_variability),
        ("earth point removal", task.earth_point_removal, archive.earth_point_removal),
        ("introduced noise", task.introduced_noise, archive.introduced_noise),
        ("total", task.total, archive.total),
    ] {
        equal &= same_float(
            &format!("target {name} goodness metric"),
            kepler_id,
            t.value,
            a.value,
        );
        equal &= same_float(
            &format!("target {name} percentile goodness metric"),
            kepler_id,
            t.percentile,
            a.percentile,
        );
    }
    equal
}
