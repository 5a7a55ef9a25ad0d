//! Validation commands and the orchestrator that runs them.
//!
//! Every command builds its own extractor and accumulators, pulls the
//! task-side series, aligns them with the archive and diffs the two. A
//! mismatch is a result, not an error.

mod dv;
mod flux;
mod gaps;
mod keywords;
mod pixels;
mod tps;

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};

use crate::align::resize;
use crate::config::ValidationOptions;
use crate::data::aperture::Aperture;
use crate::data::filter::{sample, EntityFilter};
use crate::data::loader::{ArchiveDataset, ArchiveValue};
use crate::data::model::{
    CadenceRange, Channel, CompoundTimeSeries, EntityKey, SimpleIntTimeSeries, SimpleTimeSeries,
};
use crate::data::tables::{ApertureTable, CadenceTable, KeywordTable};
use crate::diff::{diff, DiffSamples};
use crate::error::{Result, ValidationError};
use crate::extract::stages::{CalCalibratedPixels, PaOutputSeries, PdcOutputSeries};
use crate::extract::{
    ArtifactExtractor, CadenceFilter, FragmentCodec, FragmentQuery, FragmentSource, Stage,
    TaskFileType,
};
use crate::quality::QualitySources;

pub const EXIT_OK: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_MISMATCH: u8 = 2;

const HEARTBEAT_ENTITY_COUNT: usize = 1000;

// ---------------------------------------------------------------------------
// CommandKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum CommandKind {
    ArpPixels,
    BackgroundPixels,
    CollateralPixels,
    Dv,
    Flux,
    Gaps,
    PixelsIn,
    PixelsOut,
    TargetPixels,
    Tps,
}

impl CommandKind {
    pub const ALL: [CommandKind; 10] = [
        CommandKind::ArpPixels,
        CommandKind::BackgroundPixels,
        CommandKind::CollateralPixels,
        CommandKind::Dv,
        CommandKind::Flux,
        CommandKind::Gaps,
        CommandKind::PixelsIn,
        CommandKind::PixelsOut,
        CommandKind::TargetPixels,
        CommandKind::Tps,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::ArpPixels => "arp-pixels",
            CommandKind::BackgroundPixels => "background-pixels",
            CommandKind::CollateralPixels => "collateral-pixels",
            CommandKind::Dv => "dv",
            CommandKind::Flux => "flux",
            CommandKind::Gaps => "gaps",
            CommandKind::PixelsIn => "pixels-in",
            CommandKind::PixelsOut => "pixels-out",
            CommandKind::TargetPixels => "target-pixels",
            CommandKind::Tps => "tps",
        }
    }

    /// Stages whose instance id must be configured.
    pub fn required_stages(&self) -> &'static [Stage] {
        match self {
            CommandKind::ArpPixels | CommandKind::BackgroundPixels | CommandKind::Flux => {
                &[Stage::Pa]
            }
            CommandKind::CollateralPixels | CommandKind::Gaps | CommandKind::PixelsIn => {
                &[Stage::Cal]
            }
            CommandKind::PixelsOut | CommandKind::TargetPixels => &[Stage::Cal, Stage::Pa],
            CommandKind::Dv => &[Stage::Dv],
            CommandKind::Tps => &[Stage::Tps],
        }
    }

    /// Whether the command runs against one module/output.
    pub fn per_channel(&self) -> bool {
        !matches!(self, CommandKind::Dv | CommandKind::Tps)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: CommandKind,
    pub equal: bool,
    pub entities_checked: usize,
    pub mismatched_entities: usize,
    /// The time limit stopped the command before it covered everything.
    pub timed_out: bool,
}

/// Exit status for a batch that ran to completion.
pub fn verdict(outcomes: &[CommandOutcome]) -> u8 {
    if outcomes.iter().all(|o| o.equal) {
        EXIT_OK
    } else {
        EXIT_MISMATCH
    }
}

pub fn exit_code(result: &Result<Vec<CommandOutcome>>) -> u8 {
    match result {
        Ok(outcomes) => verdict(outcomes),
        Err(e) => e.exit_code(),
    }
}

/// Running count of entities a command has checked.
#[derive(Debug)]
pub(crate) struct Tally {
    command: CommandKind,
    noun: &'static str,
    checked: usize,
    mismatched: usize,
    extra_failures: usize,
    timed_out: bool,
}

impl Tally {
    pub(crate) fn new(command: CommandKind, noun: &'static str) -> Self {
        Tally {
            command,
            noun,
            checked: 0,
            mismatched: 0,
            extra_failures: 0,
            timed_out: false,
        }
    }

    pub(crate) fn record(&mut self, equal: bool) {
        self.checked += 1;
        if !equal {
            self.mismatched += 1;
        }
        if self.checked % HEARTBEAT_ENTITY_COUNT == 0 {
            log::info!("Processed {} {}", self.checked, self.noun);
        }
    }

    /// Record an entity unless the time limit cut its comparison short.
    /// A partly compared entity that already differs still counts.
    pub(crate) fn conclude(&mut self, ctx: &CommandContext<'_>, equal: bool) {
        if ctx.cut_short.get() {
            self.time_out();
            if equal {
                return;
            }
        }
        self.record(equal);
    }

    /// A failed check not tied to one entity (aperture set, pixel set, ...).
    pub(crate) fn fail(&mut self) {
        self.extra_failures += 1;
    }

    pub(crate) fn time_out(&mut self) {
        if !self.timed_out {
            log::warn!("{}: time limit reached, stopping early", self.command);
        }
        self.timed_out = true;
    }

    pub(crate) fn finish(mut self, ctx: &CommandContext<'_>) -> CommandOutcome {
        if ctx.cut_short.get() {
            self.time_out();
        }
        let equal = self.mismatched == 0 && self.extra_failures == 0;
        let scope = match ctx.channel {
            Some(channel) => format!(" for module/output {channel}"),
            None => String::new(),
        };
        log::info!(
            "{} {} {}{scope} in cadence range {}",
            if equal { "Validated" } else { "Processed" },
            self.checked,
            self.noun,
            ctx.range
        );
        CommandOutcome {
            command: self.command,
            equal,
            entities_checked: self.checked,
            mismatched_entities: self.mismatched,
            timed_out: self.timed_out,
        }
    }
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// Cooperative time limit checked at loop boundaries.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn after_minutes(minutes: u64) -> Self {
        Deadline {
            started: Instant::now(),
            limit: (minutes > 0).then(|| Duration::from_secs(minutes * 60)),
        }
    }

    pub fn none() -> Self {
        Deadline::after_minutes(0)
    }

    /// A limit that has already passed.
    pub fn expired_now() -> Self {
        Deadline {
            started: Instant::now(),
            limit: Some(Duration::ZERO),
        }
    }

    pub fn expired(&self) -> bool {
        self.limit
            .is_some_and(|limit| self.started.elapsed() >= limit)
    }
}

// ---------------------------------------------------------------------------
// CommandContext
// ---------------------------------------------------------------------------

/// Everything one command invocation reads. Built fresh per command.
pub struct CommandContext<'a> {
    pub options: &'a ValidationOptions,
    pub source: &'a dyn FragmentSource,
    pub codec: &'a dyn FragmentCodec,
    pub archive: &'a ArchiveDataset,
    pub cadence_table: Option<&'a CadenceTable>,
    pub aperture_table: Option<&'a ApertureTable>,
    pub keyword_table: Option<&'a KeywordTable>,
    pub range: CadenceRange,
    pub channel: Option<Channel>,
    pub chunks: Vec<CadenceRange>,
    pub filter: EntityFilter,
    pub deadline: Deadline,
    cut_short: Cell<bool>,
}

impl<'a> CommandContext<'a> {
    pub fn extractor(&self) -> ArtifactExtractor<'a> {
        ArtifactExtractor::new(self.source, self.codec, self.options.cache_enabled)
    }

    /// Query for `stage` fragments overlapping the requested range.
    pub fn query(&self, stage: Stage, file_type: TaskFileType) -> Result<FragmentQuery> {
        let instance_id = self.options.instance_id(stage).ok_or_else(|| {
            ValidationError::usage(format!(
                "{} pipeline instance ID not set",
                stage.name().to_ascii_uppercase()
            ))
        })?;
        Ok(FragmentQuery {
            stage,
            instance_id,
            file_type,
            channel: self.channel,
            cadence: CadenceFilter::Within(self.range),
        })
    }

    pub fn has_instance(&self, stage: Stage) -> bool {
        self.options.instance_id(stage).is_some()
    }

    /// Entities to validate after the Kepler id filter and skip count.
    pub fn sample<'e>(&self, entities: &'e [EntityKey]) -> Vec<&'e EntityKey> {
        sample(entities, &self.filter, self.options.skip())
    }

    pub fn archive_simple<T: ArchiveValue>(
        &self,
        entity: &EntityKey,
        kind: &str,
    ) -> Option<(CadenceRange, SimpleTimeSeries<T>)> {
        let series = self.archive.get(entity, kind)?;
        Some((series.range()?, series.to_simple()))
    }

    pub fn archive_compound<T: ArchiveValue>(
        &self,
        entity: &EntityKey,
        kind: &str,
    ) -> Result<Option<(CadenceRange, CompoundTimeSeries<T>)>> {
        let Some(series) = self.archive.get(entity, kind) else {
            return Ok(None);
        };
        let Some(range) = series.range() else {
            return Ok(None);
        };
        Ok(Some((range, series.to_compound()?)))
    }

    /// Align both sides with the requested range and diff them chunk by
    /// chunk. A side that is missing counts as a mismatch.
    pub fn compare_series<S>(
        &self,
        label: &str,
        entity: &EntityKey,
        task: Option<(CadenceRange, S)>,
        archive: Option<(CadenceRange, S)>,
    ) -> Result<bool>
    where
        S: DiffSamples + Clone,
    {
        let (task, archive) = match (task, archive) {
            (Some(task), Some(archive)) => (task, archive),
            (task, archive) => {
                let missing = match (task.is_none(), archive.is_none()) {
                    (true, true) => "task files and archive",
                    (true, false) => "task files",
                    _ => "archive",
                };
                log::error!("{label} for {entity} missing from {missing}");
                return Ok(false);
            }
        };

        let task = resize(self.range, task.0, task.1)?;
        let archive = resize(self.range, archive.0, archive.1)?;
        self.compare_aligned(label, entity, &task, &archive)
    }

    /// Diff two series that already span the requested range.
    pub fn compare_aligned<S>(&self, label: &str, entity: &EntityKey, task: &S, archive: &S) -> Result<bool>
    where
        S: DiffSamples + Clone,
    {
        let mut equal = true;
        for chunk in &self.chunks {
            if self.deadline.expired() {
                self.cut_short.set(true);
                break;
            }
            let (task, archive) = if self.chunks.len() == 1 {
                (task.clone(), archive.clone())
            } else {
                (
                    resize(*chunk, self.range, task.clone())?,
                    resize(*chunk, self.range, archive.clone())?,
                )
            };
            let report = diff(label, entity, &task, &archive, self.options.max_errors());
            if !report.equal {
                log::error!("{}", report.text);
                equal = false;
            }
        }
        Ok(equal)
    }

    /// Compare every entity that either side knows about for `kind`. Task
    /// series come merged; `archive` looks up the counterpart. `keep`
    /// selects which archive entities of `kind` belong to this check.
    pub(crate) fn compare_entities<S, F>(
        &self,
        tally: &mut Tally,
        kind: &str,
        keep: impl Fn(&EntityKey) -> bool,
        mut task: BTreeMap<EntityKey, (CadenceRange, S)>,
        archive: F,
    ) -> Result<()>
    where
        S: DiffSamples + Clone,
        F: Fn(&EntityKey) -> Result<Option<(CadenceRange, S)>>,
    {
        let mut entities: BTreeSet<EntityKey> = task.keys().cloned().collect();
        entities.extend(
            self.archive
                .entities(kind)
                .into_iter()
                .filter(|e| keep(e))
                .cloned(),
        );
        let entities: Vec<EntityKey> = entities.into_iter().collect();

        for entity in self.sample(&entities) {
            if self.deadline.expired() {
                tally.time_out();
                break;
            }
            let equal = self.compare_series(kind, entity, task.remove(entity), archive(entity)?)?;
            tally.conclude(self, equal);
        }
        Ok(())
    }

    /// Diff series that are not indexed by cadence (per-pulse results).
    pub fn compare_unaligned<S: DiffSamples>(
        &self,
        label: &str,
        entity: &EntityKey,
        task: Option<S>,
        archive: Option<S>,
    ) -> bool {
        match (task, archive) {
            (Some(task), Some(archive)) => {
                let report = diff(label, entity, &task, &archive, self.options.max_errors());
                if !report.equal {
                    log::error!("{}", report.text);
                }
                if task.len() != archive.len() {
                    log::error!(
                        "{label} for {entity} has {} values in task files but {} in archive",
                        task.len(),
                        archive.len()
                    );
                    return false;
                }
                report.equal
            }
            (task, _) => {
                let missing = if task.is_none() { "task files" } else { "archive" };
                log::error!("{label} for {entity} missing from {missing}");
                false
            }
        }
    }

    /// Check a task aperture, centroid flags applied, against the archived
    /// one. Passes when no aperture table was given.
    pub fn compare_aperture(
        &self,
        entity: &EntityKey,
        kepler_id: i32,
        pa: &PaOutputSeries,
        aperture: Option<&Aperture>,
    ) -> bool {
        let Some(table) = self.aperture_table else {
            return true;
        };
        match (aperture, table.aperture(kepler_id)) {
            (Some(aperture), Some(archived)) => {
                let differences = pa.annotate_aperture(kepler_id, aperture).diff(archived);
                for difference in &differences {
                    log::error!("Aperture of {entity} differs: {difference}");
                }
                differences.is_empty()
            }
            (task, _) => {
                let missing = if task.is_none() { "task files" } else { "aperture table" };
                log::error!("Aperture of {entity} missing from {missing}");
                false
            }
        }
    }

    /// Quality bitmask of one target over the requested range. Sources whose
    /// stage was not extracted stay unevaluated.
    pub fn quality_series(
        &self,
        kepler_id: i32,
        aperture: Option<&Aperture>,
        pa: &PaOutputSeries,
        cal: Option<&CalCalibratedPixels>,
        pdc: Option<&PdcOutputSeries>,
    ) -> SimpleIntTimeSeries {
        let projections = aperture.map(Aperture::optimal_projections);
        let sources = QualitySources {
            cadence_table: self.cadence_table,
            optimal_aperture_cosmic_rays: aperture
                .map(|a| pa.cosmic_ray_cadences(&a.optimal_pixels())),
            collateral_cosmic_rays: cal.zip(projections.as_ref()).map(|(cal, (rows, columns))| {
                cal.collateral_cosmic_ray_cadences(rows, columns)
            }),
            modout_argabrightening: Some(pa.argabrightening.clone()),
            reaction_wheel_zero_crossings: Some(pa.reaction_wheel_zero_crossings.clone()),
            discontinuities: pdc.map(|p| {
                p.discontinuities
                    .get(&kepler_id)
                    .cloned()
                    .unwrap_or_else(BTreeSet::new)
            }),
            outliers: pdc.map(|p| {
                p.outliers
                    .get(&kepler_id)
                    .cloned()
                    .unwrap_or_else(BTreeSet::new)
            }),
        };
        sources.assemble_range(self.range)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs validation commands against one set of inputs.
pub struct Orchestrator {
    options: ValidationOptions,
    source: Box<dyn FragmentSource>,
    codec: Box<dyn FragmentCodec>,
    archive: ArchiveDataset,
    cadence_table: Option<CadenceTable>,
    aperture_table: Option<ApertureTable>,
    keyword_table: Option<KeywordTable>,
    deadline: Option<Deadline>,
}

impl Orchestrator {
    pub fn new(
        options: ValidationOptions,
        source: Box<dyn FragmentSource>,
        codec: Box<dyn FragmentCodec>,
        archive: ArchiveDataset,
    ) -> Self {
        Orchestrator {
            options,
            source,
            codec,
            archive,
            cadence_table: None,
            aperture_table: None,
            keyword_table: None,
            deadline: None,
        }
    }

    pub fn with_cadence_table(mut self, table: CadenceTable) -> Self {
        self.cadence_table = Some(table);
        self
    }

    pub fn with_aperture_table(mut self, table: ApertureTable) -> Self {
        self.aperture_table = Some(table);
        self
    }

    pub fn with_keyword_table(mut self, table: KeywordTable) -> Self {
        self.keyword_table = Some(table);
        self
    }

    /// Use `deadline` instead of one derived from `time_limit_minutes`.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    fn context(&self, command: CommandKind) -> Result<CommandContext<'_>> {
        let range = self.options.cadence_range()?;
        let channel = if command.per_channel() {
            Some(self.options.channel()?)
        } else {
            None
        };
        Ok(CommandContext {
            options: &self.options,
            source: self.source.as_ref(),
            codec: self.codec.as_ref(),
            archive: &self.archive,
            cadence_table: self.cadence_table.as_ref(),
            aperture_table: self.aperture_table.as_ref(),
            keyword_table: self.keyword_table.as_ref(),
            range,
            channel,
            chunks: range.chunks(self.options.chunk()),
            filter: EntityFilter::new(self.options.kepler_ids.iter().copied()),
            deadline: self
                .deadline
                .unwrap_or_else(|| Deadline::after_minutes(self.options.time_limit_minutes)),
            cut_short: Cell::new(false),
        })
    }

    /// Validate options for `command`, then run it.
    pub fn dispatch(&self, command: CommandKind) -> Result<CommandOutcome> {
        self.options.validate(command)?;
        let ctx = self.context(command)?;
        log::info!("Running {command} over cadences {}", ctx.range);

        let outcome = match command {
            CommandKind::ArpPixels => pixels::arp_pixels(&ctx)?,
            CommandKind::BackgroundPixels => pixels::background_pixels(&ctx)?,
            CommandKind::CollateralPixels => pixels::collateral_pixels(&ctx)?,
            CommandKind::Dv => dv::run(&ctx)?,
            CommandKind::Flux => flux::run(&ctx)?,
            CommandKind::Gaps => gaps::run(&ctx)?,
            CommandKind::PixelsIn => pixels::pixels_in(&ctx)?,
            CommandKind::PixelsOut => pixels::pixels_out(&ctx)?,
            CommandKind::TargetPixels => pixels::target_pixels(&ctx)?,
            CommandKind::Tps => tps::run(&ctx)?,
        };
        if !outcome.equal {
            log::error!(
                "{command}: {} of {} entities differ",
                outcome.mismatched_entities,
                outcome.entities_checked
            );
        }
        Ok(outcome)
    }

    /// Run `commands` in order, stopping at the first error.
    pub fn run_all(&self, commands: &[CommandKind]) -> Result<Vec<CommandOutcome>> {
        commands.iter().map(|&command| self.dispatch(command)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(equal: bool) -> CommandOutcome {
        CommandOutcome {
            command: CommandKind::Gaps,
            equal,
            entities_checked: 1,
            mismatched_entities: usize::from(!equal),
            timed_out: false,
        }
    }

    #[test]
    fn verdict_maps_mismatch_to_two() {
        assert_eq!(verdict(&[]), EXIT_OK);
        assert_eq!(verdict(&[outcome(true), outcome(true)]), EXIT_OK);
        assert_eq!(verdict(&[outcome(true), outcome(false)]), EXIT_MISMATCH);
        assert_eq!(
            exit_code(&Err(ValidationError::usage("CCD module not set"))),
            EXIT_ERROR
        );
    }

    #[test]
    fn command_names_match_value_enum() {
        use clap::ValueEnum;

        for command in CommandKind::ALL {
            let value = command.to_possible_value().unwrap();
            assert_eq!(value.get_name(), command.name());
        }
    }

    #[test]
    fn zero_minute_deadline_never_expires() {
        assert!(!Deadline::none().expired());
        assert!(!Deadline::after_minutes(5).expired());
    }

    fn gaps_orchestrator() -> Orchestrator {
        let fragments = crate::extract::InMemoryFragments::new();
        let options = ValidationOptions {
            tasks_root: Some("/unused".into()),
            archive: Some("/unused.json".into()),
            cal_id: Some(1),
            ccd_module: Some(2),
            ccd_output: Some(1),
            start_cadence: Some(0),
            end_cadence: Some(3),
            chunk_size: 2,
            ..ValidationOptions::default()
        };
        Orchestrator::new(
            options,
            Box::new(fragments.clone()),
            Box::new(fragments),
            ArchiveDataset::from_series(Vec::new()).unwrap(),
        )
    }

    #[test]
    fn expired_deadline_leaves_entity_unchecked() {
        let orchestrator = gaps_orchestrator().with_deadline(Deadline::expired_now());
        let ctx = orchestrator.context(CommandKind::Gaps).unwrap();
        let task = SimpleIntTimeSeries::new(vec![0; 4], vec![false; 4]);
        let archive = SimpleIntTimeSeries::new(vec![1; 4], vec![false; 4]);

        assert!(ctx
            .compare_aligned("GAPS", &EntityKey::Channel, &task, &archive)
            .unwrap());
        let mut tally = Tally::new(CommandKind::Gaps, "channels");
        tally.conclude(&ctx, true);
        let outcome = tally.finish(&ctx);
        assert!(outcome.timed_out);
        assert!(outcome.equal);
        assert_eq!(outcome.entities_checked, 0);
    }

    #[test]
    fn mismatch_found_before_the_deadline_still_counts() {
        let orchestrator = gaps_orchestrator();
        let ctx = orchestrator.context(CommandKind::Gaps).unwrap();
        ctx.cut_short.set(true);

        let mut tally = Tally::new(CommandKind::Gaps, "channels");
        tally.conclude(&ctx, false);
        let outcome = tally.finish(&ctx);
        assert!(outcome.timed_out);
        assert!(!outcome.equal);
        assert_eq!(outcome.entities_checked, 1);
        assert_eq!(outcome.mismatched_entities, 1);
    }
}
