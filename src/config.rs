use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::commands::CommandKind;
use crate::data::model::{CadenceRange, Channel};
use crate::error::{Result, ValidationError};
use crate::extract::Stage;

/// Cadences per chunk unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: i32 = 139;
pub const DEFAULT_MAX_ERRORS_DISPLAYED: i32 = 10;
pub const DEFAULT_RUNTIME: &str = "matlab";

// ---------------------------------------------------------------------------
// ValidationOptions
// ---------------------------------------------------------------------------

/// Everything a validation run needs to know. Loaded from TOML, then
/// overridden field by field from the command line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationOptions {
    pub tasks_root: Option<PathBuf>,
    /// Defaults to `<tasks_root>/tasks.csv`.
    pub task_manifest: Option<PathBuf>,
    pub archive: Option<PathBuf>,
    pub cadence_table: Option<PathBuf>,
    pub aperture_table: Option<PathBuf>,
    /// Archived header keywords (PDC characteristics and goodness).
    pub keyword_table: Option<PathBuf>,
    /// Runtime component of task directory names.
    pub runtime: String,

    pub cal_id: Option<u64>,
    pub pa_id: Option<u64>,
    pub pdc_id: Option<u64>,
    pub dv_id: Option<u64>,
    pub tps_id: Option<u64>,

    pub ccd_module: Option<i32>,
    pub ccd_output: Option<i32>,
    pub start_cadence: Option<i32>,
    pub end_cadence: Option<i32>,
    /// Restrict target-based commands to these Kepler ids.
    pub kepler_ids: Vec<i32>,

    pub max_errors_displayed: i32,
    /// Validate one entity, then skip this many.
    pub skip_count: i32,
    /// Cadences per comparison chunk; 0 compares the whole range at once.
    pub chunk_size: i32,
    /// Stop starting new work after this many minutes; 0 disables the limit.
    pub time_limit_minutes: u64,
    pub cache_enabled: bool,
    pub debug: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        ValidationOptions {
            tasks_root: None,
            task_manifest: None,
            archive: None,
            cadence_table: None,
            aperture_table: None,
            keyword_table: None,
            runtime: DEFAULT_RUNTIME.to_string(),
            cal_id: None,
            pa_id: None,
            pdc_id: None,
            dv_id: None,
            tps_id: None,
            ccd_module: None,
            ccd_output: None,
            start_cadence: None,
            end_cadence: None,
            kepler_ids: Vec::new(),
            max_errors_displayed: DEFAULT_MAX_ERRORS_DISPLAYED,
            skip_count: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            time_limit_minutes: 0,
            cache_enabled: true,
            debug: false,
        }
    }
}

impl ValidationOptions {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.task_manifest
            .clone()
            .or_else(|| self.tasks_root.as_ref().map(|root| root.join("tasks.csv")))
    }

    /// The requested cadence range; both ends must be set.
    pub fn cadence_range(&self) -> Result<CadenceRange> {
        let start = self
            .start_cadence
            .ok_or_else(|| ValidationError::usage("Start cadence not set"))?;
        let end = self
            .end_cadence
            .ok_or_else(|| ValidationError::usage("End cadence not set"))?;
        CadenceRange::new(start, end)
    }

    pub fn channel(&self) -> Result<Channel> {
        let module = self
            .ccd_module
            .ok_or_else(|| ValidationError::usage("CCD module not set"))?;
        let output = self
            .ccd_output
            .ok_or_else(|| ValidationError::usage("CCD output not set"))?;
        Ok(Channel::new(module, output))
    }

    pub fn max_errors(&self) -> usize {
        self.max_errors_displayed.max(0) as usize
    }

    pub fn skip(&self) -> usize {
        self.skip_count.max(0) as usize
    }

    pub fn chunk(&self) -> usize {
        self.chunk_size.max(0) as usize
    }

    /// Check the options `command` depends on. Reports the first problem.
    pub fn validate(&self, command: CommandKind) -> Result<()> {
        if self.tasks_root.is_none() {
            return Err(ValidationError::usage("Tasks root directory not set"));
        }
        if self.archive.is_none() {
            return Err(ValidationError::usage("Archive export not set"));
        }
        if self.max_errors_displayed < 0 {
            return Err(ValidationError::usage(
                "Max errors displayed can't be negative",
            ));
        }
        if self.skip_count < 0 {
            return Err(ValidationError::usage("Skip count can't be negative"));
        }
        if self.chunk_size < 0 {
            return Err(ValidationError::usage("Chunk size can't be negative"));
        }
        if self.chunk_size > 0 && self.chunk_size < self.skip_count {
            return Err(ValidationError::usage(format!(
                "Chunk size, {}, can't be less than skip count, {}",
                self.chunk_size, self.skip_count
            )));
        }
        self.cadence_range()?;

        for &stage in command.required_stages() {
            if self.instance_id(stage).is_none() {
                return Err(ValidationError::usage(format!(
                    "{} pipeline instance ID not set",
                    stage.name().to_ascii_uppercase()
                )));
            }
        }
        if command.per_channel() {
            self.channel()?;
        }
        Ok(())
    }

    pub fn instance_id(&self, stage: Stage) -> Option<u64> {
        match stage {
            Stage::Cal => self.cal_id,
            Stage::Pa => self.pa_id,
            Stage::Pdc => self.pdc_id,
            Stage::Dv => self.dv_id,
            Stage::Tps => self.tps_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> ValidationOptions {
        ValidationOptions {
            tasks_root: Some(PathBuf::from("/tasks")),
            archive: Some(PathBuf::from("/archive.parquet")),
            cal_id: Some(1),
            pa_id: Some(2),
            ccd_module: Some(7),
            ccd_output: Some(3),
            start_cadence: Some(100),
            end_cadence: Some(200),
            ..ValidationOptions::default()
        }
    }

    #[test]
    fn toml_fills_unset_fields_with_defaults() {
        let options = ValidationOptions::from_toml_str(
            r#"
            tasks_root = "/data/tasks"
            pa_id = 42
            kepler_ids = [7, 8]
            chunk_size = 50
            "#,
        )
        .unwrap();
        assert_eq!(options.pa_id, Some(42));
        assert_eq!(options.chunk_size, 50);
        assert_eq!(options.max_errors_displayed, DEFAULT_MAX_ERRORS_DISPLAYED);
        assert_eq!(options.runtime, "matlab");
        assert!(options.cache_enabled);
        assert_eq!(
            options.manifest_path(),
            Some(PathBuf::from("/data/tasks/tasks.csv"))
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ValidationOptions::from_toml_str("pa_instance = 3").is_err());
    }

    #[test]
    fn validate_names_the_missing_instance() {
        let options = ValidationOptions {
            pa_id: None,
            ..ready()
        };
        let err = options.validate(CommandKind::Flux).unwrap_err();
        assert!(err.is_usage());
        assert_eq!(err.to_string(), "PA pipeline instance ID not set");
        assert!(options.validate(CommandKind::PixelsIn).is_ok());
    }

    #[test]
    fn validate_checks_range_and_counts() {
        let inverted = ValidationOptions {
            start_cadence: Some(300),
            ..ready()
        };
        assert!(inverted.validate(CommandKind::PixelsIn).unwrap_err().is_usage());

        let negative = ValidationOptions {
            max_errors_displayed: -1,
            ..ready()
        };
        assert_eq!(
            negative.validate(CommandKind::PixelsIn).unwrap_err().to_string(),
            "Max errors displayed can't be negative"
        );

        let chunk = ValidationOptions {
            chunk_size: 2,
            skip_count: 5,
            ..ready()
        };
        assert!(chunk.validate(CommandKind::PixelsIn).is_err());
    }

    #[test]
    fn channel_is_only_required_for_channel_commands() {
        let options = ValidationOptions {
            ccd_module: None,
            tps_id: Some(9),
            ..ready()
        };
        assert_eq!(
            options.validate(CommandKind::PixelsIn).unwrap_err().to_string(),
            "CCD module not set"
        );
        assert!(options.validate(CommandKind::Tps).is_ok());
    }
}
