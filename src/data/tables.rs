//! CSV side tables: the task manifest, the cadence table, the aperture
//! table and archived header keywords.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};

use super::aperture::{Aperture, AperturePixel};
use super::model::{CadenceRange, Channel, Offset, Pixel};

/// Accepts `1`/`0`, `true`/`false` and an empty cell (false).
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let text = String::deserialize(deserializer)?;
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "y" => Ok(true),
        "0" | "false" | "f" | "n" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "'{other}' is not a boolean flag"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Task manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ManifestRow {
    stage: String,
    instance_id: u64,
    task_id: u64,
    ccd_module: Option<i32>,
    ccd_output: Option<i32>,
    start_cadence: i32,
    end_cadence: i32,
}

/// One pipeline task: a stage run over one channel and cadence window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub stage: String,
    pub instance_id: u64,
    pub task_id: u64,
    /// `None` for stages that are not split by channel.
    pub channel: Option<Channel>,
    pub window: CadenceRange,
}

impl TaskEntry {
    /// Directory name of the task under the tasks root.
    pub fn dir_name(&self, runtime: &str) -> String {
        format!(
            "{}-{runtime}-{}-{}",
            self.stage, self.instance_id, self.task_id
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskManifest {
    tasks: Vec<TaskEntry>,
}

impl TaskManifest {
    pub fn new(mut tasks: Vec<TaskEntry>) -> Self {
        tasks.sort_by_key(|t| (t.stage.clone(), t.instance_id, t.window.start(), t.task_id));
        TaskManifest { tasks }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening task manifest {}", path.display()))?;
        let mut tasks = Vec::new();
        for (row_no, result) in reader.deserialize::<ManifestRow>().enumerate() {
            let row = result.with_context(|| format!("task manifest row {row_no}"))?;
            let channel = match (row.ccd_module, row.ccd_output) {
                (Some(module), Some(output)) => Some(Channel::new(module, output)),
                (None, None) => None,
                _ => bail!("task manifest row {row_no}: module and output must both be set"),
            };
            let window = CadenceRange::new(row.start_cadence, row.end_cadence)
                .with_context(|| format!("task manifest row {row_no}"))?;
            tasks.push(TaskEntry {
                stage: row.stage.to_ascii_lowercase(),
                instance_id: row.instance_id,
                task_id: row.task_id,
                channel,
                window,
            });
        }
        log::debug!("Loaded {} tasks from {}", tasks.len(), path.display());
        Ok(TaskManifest::new(tasks))
    }

    /// Tasks of one stage instance, ordered by window start. A task without a
    /// channel serves every channel; a `None` query channel matches all.
    pub fn tasks(&self, stage: &str, instance_id: u64, channel: Option<Channel>) -> Vec<&TaskEntry> {
        self.tasks
            .iter()
            .filter(|t| t.stage == stage && t.instance_id == instance_id)
            .filter(|t| match (t.channel, channel) {
                (Some(task_channel), Some(wanted)) => task_channel == wanted,
                _ => true,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Cadence table
// ---------------------------------------------------------------------------

/// MJD of the Kepler epoch; KJD counts days from it.
pub const KJD_EPOCH_MJD: f64 = 54832.5;

pub fn mjd_to_kjd(mjd: f64) -> f64 {
    mjd - KJD_EPOCH_MJD
}

/// Spacecraft and data-anomaly state of one cadence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct CadenceFlags {
    pub cadence: i32,
    /// Mid-exposure time (MJD). Absent when the export carries no times.
    #[serde(default)]
    pub mid_mjd: Option<f64>,
    #[serde(default, deserialize_with = "flag")]
    pub gap: bool,
    #[serde(default, deserialize_with = "flag")]
    pub attitude_tweak: bool,
    #[serde(default, deserialize_with = "flag")]
    pub safe_mode: bool,
    #[serde(default, deserialize_with = "flag")]
    pub coarse_point: bool,
    #[serde(default, deserialize_with = "flag")]
    pub argabrightening: bool,
    #[serde(default, deserialize_with = "flag")]
    pub exclude: bool,
    #[serde(default, deserialize_with = "flag")]
    pub earth_point: bool,
    #[serde(default, deserialize_with = "flag")]
    pub momentum_dump: bool,
    #[serde(default, deserialize_with = "flag")]
    pub sefi_acc: bool,
    #[serde(default, deserialize_with = "flag")]
    pub sefi_cad: bool,
    #[serde(default, deserialize_with = "flag")]
    pub lde_oos: bool,
    #[serde(default, deserialize_with = "flag")]
    pub lde_par_er: bool,
    #[serde(default, deserialize_with = "flag")]
    pub scrc_err: bool,
    #[serde(default = "fine_point_default", deserialize_with = "flag")]
    pub fine_point: bool,
}

fn fine_point_default() -> bool {
    true
}

/// Per-cadence flags over one contiguous range.
#[derive(Debug, Clone)]
pub struct CadenceTable {
    range: CadenceRange,
    rows: Vec<CadenceFlags>,
}

impl CadenceTable {
    /// Rows may arrive in any order but must cover a contiguous range
    /// exactly once.
    pub fn from_rows(mut rows: Vec<CadenceFlags>) -> Result<Self> {
        rows.sort_by_key(|r| r.cadence);
        let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
            bail!("cadence table is empty");
        };
        let range = CadenceRange::new(first.cadence, last.cadence)?;
        for (expected, row) in range.cadences().zip(&rows) {
            if row.cadence != expected {
                bail!(
                    "cadence table is not contiguous: expected cadence {expected}, found {}",
                    row.cadence
                );
            }
        }
        if rows.len() != range.len() {
            bail!("cadence table lists some cadences more than once");
        }
        Ok(CadenceTable { range, rows })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening cadence table {}", path.display()))?;
        let rows = reader
            .deserialize::<CadenceFlags>()
            .enumerate()
            .map(|(i, r)| r.with_context(|| format!("cadence table row {i}")))
            .collect::<Result<Vec<_>>>()?;
        CadenceTable::from_rows(rows).with_context(|| format!("loading {}", path.display()))
    }

    pub fn range(&self) -> CadenceRange {
        self.range
    }

    pub fn flags_at(&self, cadence: i32) -> Option<&CadenceFlags> {
        if !self.range.contains(cadence) {
            return None;
        }
        self.rows.get((cadence - self.range.start()) as usize)
    }

    /// Mid-exposure time of `cadence` in KJD.
    pub fn mid_time_kjd(&self, cadence: i32) -> Option<f64> {
        self.flags_at(cadence)?.mid_mjd.map(mjd_to_kjd)
    }

    /// Gap indicators over `window`; `None` unless the table covers it.
    pub fn gap_indicators(&self, window: CadenceRange) -> Option<Vec<bool>> {
        if !self.range.contains_range(&window) {
            return None;
        }
        Some(
            window
                .cadences()
                .filter_map(|c| self.flags_at(c))
                .map(|f| f.gap)
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Aperture table
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApertureRow {
    kepler_id: i32,
    offset_row: i32,
    offset_column: i32,
    row: i32,
    column: i32,
    #[serde(deserialize_with = "flag")]
    in_optimal_aperture: bool,
    #[serde(default, deserialize_with = "flag")]
    in_flux_weighted_centroid_aperture: bool,
    #[serde(default, deserialize_with = "flag")]
    in_prf_centroid_aperture: bool,
}

/// Archived aperture of every target.
#[derive(Debug, Clone, Default)]
pub struct ApertureTable {
    apertures: BTreeMap<i32, Aperture>,
}

impl ApertureTable {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening aperture table {}", path.display()))?;
        let mut apertures: BTreeMap<i32, Aperture> = BTreeMap::new();
        for (row_no, result) in reader.deserialize::<ApertureRow>().enumerate() {
            let row = result.with_context(|| format!("aperture table row {row_no}"))?;
            let pixel = AperturePixel {
                pixel: Pixel::new(row.row, row.column),
                in_optimal_aperture: row.in_optimal_aperture,
                in_flux_weighted_centroid_aperture: row.in_flux_weighted_centroid_aperture,
                in_prf_centroid_aperture: row.in_prf_centroid_aperture,
            };
            apertures
                .entry(row.kepler_id)
                .or_default()
                .add_pixel(Offset::new(row.offset_row, row.offset_column), pixel);
        }
        Ok(ApertureTable { apertures })
    }

    pub fn from_apertures(apertures: BTreeMap<i32, Aperture>) -> Self {
        ApertureTable { apertures }
    }

    pub fn aperture(&self, kepler_id: i32) -> Option<&Aperture> {
        self.apertures.get(&kepler_id)
    }

    pub fn kepler_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.apertures.keys().copied()
    }
}

// ---------------------------------------------------------------------------
// Keyword table
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct KeywordRow {
    kepler_id: i32,
    keyword: String,
    value: String,
}

/// Archived per-target header keywords, kept as text until a check asks for
/// a type.
#[derive(Debug, Clone, Default)]
pub struct KeywordTable {
    keywords: BTreeMap<i32, BTreeMap<String, String>>,
}

impl KeywordTable {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening keyword table {}", path.display()))?;
        let mut table = KeywordTable::default();
        for (row_no, result) in reader.deserialize::<KeywordRow>().enumerate() {
            let row = result.with_context(|| format!("keyword table row {row_no}"))?;
            if table.keyword(row.kepler_id, &row.keyword).is_some() {
                bail!(
                    "keyword table row {row_no}: {} listed twice for target {}",
                    row.keyword,
                    row.kepler_id
                );
            }
            table.insert(row.kepler_id, row.keyword, row.value);
        }
        log::debug!(
            "Loaded keywords of {} targets from {}",
            table.keywords.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn insert(&mut self, kepler_id: i32, keyword: impl Into<String>, value: impl Into<String>) {
        self.keywords
            .entry(kepler_id)
            .or_default()
            .insert(keyword.into().to_ascii_uppercase(), value.into());
    }

    pub fn has_target(&self, kepler_id: i32) -> bool {
        self.keywords.contains_key(&kepler_id)
    }

    pub fn keyword(&self, kepler_id: i32, keyword: &str) -> Option<&str> {
        self.keywords
            .get(&kepler_id)?
            .get(&keyword.to_ascii_uppercase())
            .map(|value| value.trim())
    }

    /// Typed value of one keyword; `Ok(None)` when it is absent.
    pub fn parse<T>(&self, kepler_id: i32, keyword: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(text) = self.keyword(kepler_id, keyword) else {
            return Ok(None);
        };
        match text.parse() {
            Ok(value) => Ok(Some(value)),
            Err(e) => bail!("keyword {keyword} of target {kepler_id}: can't parse '{text}': {e}"),
        }
    }
}
