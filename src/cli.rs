use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueHint};

use crate::commands::CommandKind;
use crate::config::ValidationOptions;

/// Command line. Every option also has a key in the TOML config; flags given
/// here win over the file.
#[derive(Debug, Parser)]
#[command(
    name = "cadence-check",
    author,
    version,
    about = "Check pipeline task-file time series against the exported archive"
)]
pub struct Cli {
    /// Validations to run, in order; the first error aborts the rest
    #[arg(value_enum, required = true, num_args = 1..)]
    pub commands: Vec<CommandKind>,

    /// TOML file with default options
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Directory holding the task directories
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub tasks_root: Option<PathBuf>,

    /// Task manifest CSV (default: <tasks-root>/tasks.csv)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub task_manifest: Option<PathBuf>,

    /// Archive export (.parquet, .json or .csv)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub archive: Option<PathBuf>,

    /// Cadence table CSV used for quality flags and gaps
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub cadence_table: Option<PathBuf>,

    /// Archived aperture table CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub aperture_table: Option<PathBuf>,

    /// Archived PDC header keyword table CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub keyword_table: Option<PathBuf>,

    /// Runtime component of task directory names
    #[arg(long)]
    pub runtime: Option<String>,

    #[arg(long)]
    pub cal_id: Option<u64>,
    #[arg(long)]
    pub pa_id: Option<u64>,
    #[arg(long)]
    pub pdc_id: Option<u64>,
    #[arg(long)]
    pub dv_id: Option<u64>,
    #[arg(long)]
    pub tps_id: Option<u64>,

    #[arg(long)]
    pub ccd_module: Option<i32>,
    #[arg(long)]
    pub ccd_output: Option<i32>,

    #[arg(long, allow_negative_numbers = true)]
    pub start_cadence: Option<i32>,
    #[arg(long, allow_negative_numbers = true)]
    pub end_cadence: Option<i32>,

    /// Only validate these Kepler ids (comma separated or repeated)
    #[arg(long = "kepler-id", value_delimiter = ',')]
    pub kepler_ids: Vec<i32>,

    /// Mismatching samples itemised per series
    #[arg(long, allow_negative_numbers = true)]
    pub max_errors_displayed: Option<i32>,

    /// Validate one entity, then skip this many
    #[arg(long, allow_negative_numbers = true)]
    pub skip_count: Option<i32>,

    /// Cadences per comparison chunk, 0 for the whole range
    #[arg(long, allow_negative_numbers = true)]
    pub chunk_size: Option<i32>,

    /// Stop starting new work after this many minutes (0 = no limit)
    #[arg(long)]
    pub time_limit: Option<u64>,

    /// Decode every fragment afresh instead of caching within a command
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_cache: bool,

    /// Debug logging and full error chains
    #[arg(long, action = ArgAction::SetTrue)]
    pub debug: bool,
}

impl Cli {
    /// Options from `--config` (or defaults) with every given flag applied.
    pub fn into_options(&self) -> anyhow::Result<ValidationOptions> {
        let mut options = match &self.config {
            Some(path) => ValidationOptions::from_toml_file(path)?,
            None => ValidationOptions::default(),
        };
        self.apply(&mut options);
        Ok(options)
    }

    fn apply(&self, options: &mut ValidationOptions) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set_opt(&mut options.tasks_root, &self.tasks_root);
        set_opt(&mut options.task_manifest, &self.task_manifest);
        set_opt(&mut options.archive, &self.archive);
        set_opt(&mut options.cadence_table, &self.cadence_table);
        set_opt(&mut options.aperture_table, &self.aperture_table);
        set_opt(&mut options.keyword_table, &self.keyword_table);
        set(&mut options.runtime, &self.runtime);

        set_opt(&mut options.cal_id, &self.cal_id);
        set_opt(&mut options.pa_id, &self.pa_id);
        set_opt(&mut options.pdc_id, &self.pdc_id);
        set_opt(&mut options.dv_id, &self.dv_id);
        set_opt(&mut options.tps_id, &self.tps_id);

        set_opt(&mut options.ccd_module, &self.ccd_module);
        set_opt(&mut options.ccd_output, &self.ccd_output);
        set_opt(&mut options.start_cadence, &self.start_cadence);
        set_opt(&mut options.end_cadence, &self.end_cadence);
        if !self.kepler_ids.is_empty() {
            options.kepler_ids = self.kepler_ids.clone();
        }

        set(&mut options.max_errors_displayed, &self.max_errors_displayed);
        set(&mut options.skip_count, &self.skip_count);
        set(&mut options.chunk_size, &self.chunk_size);
        set(&mut options.time_limit_minutes, &self.time_limit);
        if self.no_cache {
            options.cache_enabled = false;
        }
        if self.debug {
            options.debug = true;
        }
    }
}
