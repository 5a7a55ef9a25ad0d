use std::process::ExitCode;

use anyhow::Context;
use cadence_check::cli::Cli;
use cadence_check::commands::{exit_code, EXIT_ERROR, EXIT_OK};
use cadence_check::data::loader::load_archive;
use cadence_check::data::tables::{ApertureTable, CadenceTable, KeywordTable, TaskManifest};
use cadence_check::extract::{DirectoryFragmentSource, JsonFragmentCodec};
use cadence_check::{Orchestrator, ValidationError, ValidationOptions};
use clap::Parser;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(if e.use_stderr() { EXIT_ERROR } else { EXIT_OK });
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.debug { "debug" } else { "info" }),
    )
    .init();

    let options = match cli.into_options() {
        Ok(options) => options,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::from(EXIT_ERROR);
        }
    };
    let debug = options.debug;

    let result = validate_all(&cli, &options).and_then(|()| {
        let orchestrator = build(options).map_err(ValidationError::from)?;
        orchestrator.run_all(&cli.commands)
    });
    if let Err(e) = &result {
        if debug {
            log::error!("{e:?}");
        } else {
            log::error!("{e:#}");
        }
    }
    ExitCode::from(exit_code(&result))
}

/// Check the options of every requested command before loading anything.
fn validate_all(cli: &Cli, options: &ValidationOptions) -> cadence_check::Result<()> {
    for &command in &cli.commands {
        options.validate(command)?;
    }
    Ok(())
}

fn build(options: ValidationOptions) -> anyhow::Result<Orchestrator> {
    let tasks_root = options
        .tasks_root
        .clone()
        .context("tasks root directory not set")?;
    let archive_path = options.archive.clone().context("archive export not set")?;
    let manifest_path = options
        .manifest_path()
        .context("task manifest not set")?;

    let manifest = TaskManifest::load(&manifest_path)?;
    log::info!("Loaded {} tasks from {}", manifest.len(), manifest_path.display());
    let archive = load_archive(&archive_path)?;
    log::info!("Loaded {} archive series from {}", archive.len(), archive_path.display());

    let cadence_table = options
        .cadence_table
        .as_deref()
        .map(CadenceTable::load)
        .transpose()?;
    let aperture_table = options
        .aperture_table
        .as_deref()
        .map(ApertureTable::load)
        .transpose()?;
    let keyword_table = options
        .keyword_table
        .as_deref()
        .map(KeywordTable::load)
        .transpose()?;

    let source = DirectoryFragmentSource::new(tasks_root, options.runtime.clone(), manifest);
    let mut orchestrator = Orchestrator::new(
        options,
        Box::new(source),
        Box::new(JsonFragmentCodec),
        archive,
    );
    if let Some(table) = cadence_table {
        orchestrator = orchestrator.with_cadence_table(table);
    }
    if let Some(table) = aperture_table {
        orchestrator = orchestrator.with_aperture_table(table);
    }
    if let Some(table) = keyword_table {
        orchestrator = orchestrator.with_keyword_table(table);
    }
    Ok(orchestrator)
}
