use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, LargeListArray,
    ListArray,
};
use arrow::datatypes::{DataType, Int32Type, Int64Type};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;

use super::model::{CadenceRange, CompoundTimeSeries, EntityKey, SimpleTimeSeries};

// ---------------------------------------------------------------------------
// Archive-side series
// ---------------------------------------------------------------------------

/// One exported time series: the values of `kind` (e.g. `SAP_FLUX`) for
/// `entity`, starting at `start_cadence`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveSeries {
    pub entity: EntityKey,
    pub kind: String,
    pub start_cadence: i32,
    pub values: Vec<f64>,
    pub gaps: Vec<bool>,
    pub uncertainties: Option<Vec<f64>>,
}

impl ArchiveSeries {
    /// Cadences covered by the series; `None` for an empty series.
    pub fn range(&self) -> Option<CadenceRange> {
        CadenceRange::with_len(self.start_cadence, self.values.len()).ok()
    }

    pub fn to_simple<T: ArchiveValue>(&self) -> SimpleTimeSeries<T> {
        SimpleTimeSeries::new(
            self.values.iter().map(|&v| T::from_archive(v)).collect(),
            self.gaps.clone(),
        )
    }

    /// Compound view; fails when the export carries no uncertainties.
    pub fn to_compound<T: ArchiveValue>(&self) -> Result<CompoundTimeSeries<T>> {
        let uncertainties = self.uncertainties.as_ref().with_context(|| {
            format!("{} {} has no uncertainties column", self.entity, self.kind)
        })?;
        Ok(CompoundTimeSeries::new(
            self.values.iter().map(|&v| T::from_archive(v)).collect(),
            uncertainties.iter().map(|&u| u as f32).collect(),
            self.gaps.clone(),
        ))
    }
}

/// Element types an archive column can be narrowed to.
pub trait ArchiveValue: Copy {
    fn from_archive(value: f64) -> Self;
}

impl ArchiveValue for f64 {
    fn from_archive(value: f64) -> Self {
        value
    }
}

impl ArchiveValue for f32 {
    fn from_archive(value: f64) -> Self {
        value as f32
    }
}

impl ArchiveValue for i32 {
    /// NaN narrows to 0; gapped samples carry no meaningful value anyway.
    fn from_archive(value: f64) -> Self {
        if value.is_nan() {
            0
        } else {
            value.round() as i32
        }
    }
}

/// Every series of an archive export, keyed by `(entity, kind)`.
#[derive(Debug, Clone, Default)]
pub struct ArchiveDataset {
    series: BTreeMap<(EntityKey, String), ArchiveSeries>,
}

impl ArchiveDataset {
    pub fn from_series(series: Vec<ArchiveSeries>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for s in series {
            let key = (s.entity.clone(), s.kind.clone());
            if map.contains_key(&key) {
                bail!("duplicate archive series {} {}", s.entity, s.kind);
            }
            map.insert(key, s);
        }
        Ok(ArchiveDataset { series: map })
    }

    pub fn get(&self, entity: &EntityKey, kind: &str) -> Option<&ArchiveSeries> {
        self.series.get(&(entity.clone(), kind.to_string()))
    }

    /// Entities that carry a series of `kind`, in key order.
    pub fn entities(&self, kind: &str) -> Vec<&EntityKey> {
        self.series
            .keys()
            .filter(|(_, k)| k == kind)
            .map(|(entity, _)| entity)
            .collect()
    }

    pub fn kinds(&self) -> BTreeSet<&str> {
        self.series.keys().map(|(_, k)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load an archive export.  Dispatch by extension.
///
/// Every format carries one row per series with the columns `entity`,
/// `series`, `start_cadence`, `values`, `gaps` and optionally
/// `uncertainties`:
/// * `.parquet` – list columns (recommended)
/// * `.json`    – `[{ "entity": "target:7", "series": "SAP_FLUX", ... }, ...]`
/// * `.csv`     – list cells hold semicolon-separated values
pub fn load_archive(path: &Path) -> Result<ArchiveDataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let series = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported archive extension: .{other}"),
    }
    .with_context(|| format!("loading archive {}", path.display()))?;

    log::debug!("Loaded {} archive series from {}", series.len(), path.display());
    ArchiveDataset::from_series(series)
}

fn build_series(
    row: usize,
    entity: &str,
    kind: String,
    start_cadence: i64,
    values: Vec<f64>,
    gaps: Vec<bool>,
    uncertainties: Option<Vec<f64>>,
) -> Result<ArchiveSeries> {
    let entity: EntityKey = entity
        .parse()
        .map_err(|e: String| anyhow::anyhow!("Row {row}: {e}"))?;
    let start_cadence = i32::try_from(start_cadence)
        .with_context(|| format!("Row {row}: start cadence {start_cadence} out of range"))?;
    if gaps.len() != values.len() {
        bail!(
            "Row {row}: {} values but {} gap indicators",
            values.len(),
            gaps.len()
        );
    }
    if let Some(u) = &uncertainties {
        if u.len() != values.len() {
            bail!(
                "Row {row}: {} values but {} uncertainties",
                values.len(),
                u.len()
            );
        }
    }
    Ok(ArchiveSeries {
        entity,
        kind,
        start_cadence,
        values,
        gaps,
        uncertainties,
    })
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct JsonRow {
    entity: String,
    series: String,
    start_cadence: i64,
    values: Vec<Option<f64>>,
    gaps: Vec<bool>,
    #[serde(default)]
    uncertainties: Option<Vec<Option<f64>>>,
}

fn nan_for_null(values: Vec<Option<f64>>) -> Vec<f64> {
    values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect()
}

fn load_json(path: &Path) -> Result<Vec<ArchiveSeries>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let rows: Vec<JsonRow> = serde_json::from_str(&text).context("parsing JSON")?;

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            build_series(
                i,
                &row.entity,
                row.series,
                row.start_cadence,
                nan_for_null(row.values),
                row.gaps,
                row.uncertainties.map(nan_for_null),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CsvRow {
    entity: String,
    series: String,
    start_cadence: i64,
    values: String,
    gaps: String,
    #[serde(default)]
    uncertainties: Option<String>,
}

fn load_csv(path: &Path) -> Result<Vec<ArchiveSeries>> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let mut series = Vec::new();

    for (row_no, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("CSV row {row_no}"))?;
        let values = parse_semicolon_floats(&row.values, row_no, "values")?;
        let gaps = parse_semicolon_bools(&row.gaps, row_no)?;
        let uncertainties = row
            .uncertainties
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_semicolon_floats(&s, row_no, "uncertainties"))
            .transpose()?;
        series.push(build_series(
            row_no,
            &row.entity,
            row.series,
            row.start_cadence,
            values,
            gaps,
            uncertainties,
        )?);
    }

    Ok(series)
}

/// Empty tokens decode as NaN, an empty cell as an empty list.
fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            let tok = tok.trim();
            if tok.is_empty() {
                return Ok(f64::NAN);
            }
            tok.parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

fn parse_semicolon_bools(s: &str, row: usize) -> Result<Vec<bool>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(';')
        .enumerate()
        .map(|(j, tok)| match tok.trim() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            other => bail!("Row {row}, gaps[{j}]: '{other}' is not a boolean"),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Expected schema:
/// - `entity`, `series`: Utf8 or LargeUtf8
/// - `start_cadence`: Int32 or Int64
/// - `values`, `uncertainties`: List/LargeList of Float64, Float32 or Int32
/// - `gaps`: List/LargeList of Boolean
///
/// `uncertainties` may be absent or null per row.
fn load_parquet(path: &Path) -> Result<Vec<ArchiveSeries>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut series = Vec::new();
    let mut row_base = 0;

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let column = |name: &str| {
            schema
                .index_of(name)
                .map(|i| batch.column(i))
                .map_err(|_| anyhow::anyhow!("Parquet file missing '{name}' column"))
        };

        let entity_col = column("entity")?;
        let kind_col = column("series")?;
        let start_col = column("start_cadence")?;
        let values_col = column("values")?;
        let gaps_col = column("gaps")?;
        let uncertainties_col = column("uncertainties").ok();

        for row in 0..batch.num_rows() {
            let row_no = row_base + row;
            let entity = extract_string(entity_col, row)
                .with_context(|| format!("Row {row_no}: failed to read 'entity'"))?;
            let kind = extract_string(kind_col, row)
                .with_context(|| format!("Row {row_no}: failed to read 'series'"))?;
            let start = extract_i64(start_col, row)
                .with_context(|| format!("Row {row_no}: failed to read 'start_cadence'"))?;
            let values = extract_f64_list(values_col, row)
                .with_context(|| format!("Row {row_no}: failed to read 'values'"))?;
            let gaps = extract_bool_list(gaps_col, row)
                .with_context(|| format!("Row {row_no}: failed to read 'gaps'"))?;
            let uncertainties = match uncertainties_col {
                Some(col) if !col.is_null(row) => Some(
                    extract_f64_list(col, row)
                        .with_context(|| format!("Row {row_no}: failed to read 'uncertainties'"))?,
                ),
                _ => None,
            };

            series.push(build_series(
                row_no,
                &entity,
                kind,
                start,
                values,
                gaps,
                uncertainties,
            )?);
        }
        row_base += batch.num_rows();
    }

    Ok(series)
}

// -- Parquet / Arrow helpers --

fn list_value(col: &Arc<dyn Array>, row: usize) -> Result<Arc<dyn Array>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }
    match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            Ok(list_arr.value(row))
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            Ok(list_arr.value(row))
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    }
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
/// Null elements become NaN.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    let values_array = list_value(col, row)?;

    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr
            .iter()
            .map(|v| v.map_or(f64::NAN, |v| v as f64))
            .collect())
    } else if let Some(i32_arr) = values_array.as_any().downcast_ref::<Int32Array>() {
        Ok(i32_arr
            .iter()
            .map(|v| v.map_or(f64::NAN, |v| v as f64))
            .collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64, Float32 or Int32",
            values_array.data_type()
        )
    }
}

/// Null elements count as gaps.
fn extract_bool_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<bool>> {
    let values_array = list_value(col, row)?;
    let bools = values_array
        .as_any()
        .downcast_ref::<BooleanArray>()
        .with_context(|| {
            format!(
                "List inner type is {:?}, expected Boolean",
                values_array.data_type()
            )
        })?;
    Ok(bools.iter().map(|v| v.unwrap_or(true)).collect())
}

fn extract_string(col: &Arc<dyn Array>, row: usize) -> Result<String> {
    if col.is_null(row) {
        bail!("null string");
    }
    match col.data_type() {
        DataType::Utf8 => Ok(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Ok(col.as_string::<i64>().value(row).to_string()),
        other => bail!("Expected Utf8 column, got {other:?}"),
    }
}

fn extract_i64(col: &Arc<dyn Array>, row: usize) -> Result<i64> {
    if col.is_null(row) {
        bail!("null integer");
    }
    match col.data_type() {
        DataType::Int32 => Ok(col.as_primitive::<Int32Type>().value(row) as i64),
        DataType::Int64 => Ok(col.as_primitive::<Int64Type>().value(row)),
        other => bail!("Expected Int32 or Int64 column, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, ListBuilder, StringArray};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;

    use super::*;
    use crate::data::model::Pixel;

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn json_nulls_decode_as_nan() {
        let file = write_temp(
            ".json",
            r#"[{"entity": "target:7", "series": "SAP_FLUX", "start_cadence": 100,
                 "values": [1.5, null], "gaps": [false, true],
                 "uncertainties": [0.1, 0.2]}]"#,
        );
        let dataset = load_archive(file.path()).unwrap();
        let series = dataset.get(&EntityKey::Target(7), "SAP_FLUX").unwrap();
        assert_eq!(series.values[0], 1.5);
        assert!(series.values[1].is_nan());
        assert_eq!(series.range(), Some(CadenceRange::new(100, 101).unwrap()));
        let compound = series.to_compound::<f32>().unwrap();
        assert_eq!(compound.uncertainties, vec![0.1, 0.2]);
    }

    #[test]
    fn csv_lists_are_semicolon_separated() {
        let file = write_temp(
            ".csv",
            "entity,series,start_cadence,values,gaps,uncertainties\n\
             \"pixel:3,4\",ORIG_VALUE,10,5;6;7,0;0;1,\n",
        );
        let dataset = load_archive(file.path()).unwrap();
        let series = dataset
            .get(&EntityKey::Pixel(Pixel::new(3, 4)), "ORIG_VALUE")
            .unwrap();
        assert_eq!(series.to_simple::<i32>().values, vec![5, 6, 7]);
        assert_eq!(series.gaps, vec![false, false, true]);
        assert!(series.uncertainties.is_none());
        assert!(series.to_compound::<f32>().is_err());
    }

    #[test]
    fn duplicate_series_are_rejected() {
        let file = write_temp(
            ".json",
            r#"[{"entity": "channel", "series": "GAPS", "start_cadence": 0, "values": [], "gaps": []},
                {"entity": "channel", "series": "GAPS", "start_cadence": 0, "values": [], "gaps": []}]"#,
        );
        let err = load_archive(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate"), "{err:#}");
    }

    #[test]
    fn mismatched_gap_length_is_an_error() {
        let file = write_temp(
            ".json",
            r#"[{"entity": "target:1", "series": "SAP_BKG", "start_cadence": 0,
                 "values": [1.0, 2.0], "gaps": [false]}]"#,
        );
        assert!(load_archive(file.path()).is_err());
    }

    #[test]
    fn reads_parquet_list_columns() {
        let mut values = ListBuilder::new(Float64Builder::new());
        values.values().append_value(1.0);
        values.values().append_null();
        values.append(true);
        let mut gaps = ListBuilder::new(BooleanBuilder::new());
        gaps.values().append_value(false);
        gaps.values().append_value(true);
        gaps.append(true);

        let values: ArrayRef = Arc::new(values.finish());
        let gaps: ArrayRef = Arc::new(gaps.finish());
        let schema = Arc::new(Schema::new(vec![
            Field::new("entity", DataType::Utf8, false),
            Field::new("series", DataType::Utf8, false),
            Field::new("start_cadence", DataType::Int32, false),
            Field::new("values", values.data_type().clone(), true),
            Field::new("gaps", gaps.data_type().clone(), true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["target:9"])),
                Arc::new(StringArray::from(vec!["SAP_FLUX"])),
                Arc::new(Int32Array::from(vec![50])),
                values,
                gaps,
            ],
        )
        .unwrap();

        let file = tempfile::Builder::new().suffix(".parquet").tempfile().unwrap();
        let mut writer = ArrowWriter::try_new(file.reopen().unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let dataset = load_archive(file.path()).unwrap();
        let series = dataset.get(&EntityKey::Target(9), "SAP_FLUX").unwrap();
        assert_eq!(series.start_cadence, 50);
        assert!(series.values[1].is_nan());
        assert_eq!(series.gaps, vec![false, true]);
    }
}
