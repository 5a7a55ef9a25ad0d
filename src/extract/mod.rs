//! Fragment extraction: locate the intermediate files a stage wrote, decode
//! them and hand each record to a visitor.

pub mod scan;
pub mod stages;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use crate::data::fragment::FragmentRecord;
use crate::data::model::{CadenceRange, Channel};
use crate::error::{Result, ValidationError};

pub use scan::DirectoryFragmentSource;
pub use stages::StageVisitor;

// ---------------------------------------------------------------------------
// Query vocabulary
// ---------------------------------------------------------------------------

/// Pipeline stage that produced a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Cal,
    Pa,
    Pdc,
    Dv,
    Tps,
}

impl Stage {
    /// Lower-case name used in task directory and file names.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Cal => "cal",
            Stage::Pa => "pa",
            Stage::Pdc => "pdc",
            Stage::Dv => "dv",
            Stage::Tps => "tps",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskFileType {
    Inputs,
    Outputs,
}

impl TaskFileType {
    pub fn name(&self) -> &'static str {
        match self {
            TaskFileType::Inputs => "inputs",
            TaskFileType::Outputs => "outputs",
        }
    }
}

/// Which task windows a query wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceFilter {
    /// The one task whose window contains this cadence.
    At(i32),
    /// Every task whose window overlaps this range.
    Within(CadenceRange),
    All,
}

impl CadenceFilter {
    pub fn matches(&self, window: &CadenceRange) -> bool {
        match self {
            CadenceFilter::At(cadence) => window.contains(*cadence),
            CadenceFilter::Within(range) => {
                window.start() <= range.end() && range.start() <= window.end()
            }
            CadenceFilter::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentQuery {
    pub stage: Stage,
    pub instance_id: u64,
    pub file_type: TaskFileType,
    /// `None` for stages not split by channel.
    pub channel: Option<Channel>,
    pub cadence: CadenceFilter,
}

impl fmt::Display for FragmentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} for instance {}",
            self.stage,
            self.file_type.name(),
            self.instance_id
        )?;
        if let Some(channel) = self.channel {
            write!(f, " on module/output {channel}")?;
        }
        match self.cadence {
            CadenceFilter::At(cadence) => write!(f, " at cadence {cadence}"),
            CadenceFilter::Within(range) => write!(f, " within {range}"),
            CadenceFilter::All => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

/// Where one fragment lives and which task wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentLocator {
    pub path: PathBuf,
    pub stage: Stage,
    pub file_type: TaskFileType,
    pub task_id: u64,
    pub channel: Option<Channel>,
    /// Cadence window of the owning task.
    pub window: CadenceRange,
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Enumerates the fragments matching a query, in a stable order.
pub trait FragmentSource {
    fn locate(&self, query: &FragmentQuery) -> Result<Vec<FragmentLocator>>;
}

/// Turns a located fragment into a decoded record.
pub trait FragmentCodec {
    fn decode(&self, locator: &FragmentLocator) -> Result<FragmentRecord>;
}

/// Decodes fragments stored as serde JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFragmentCodec;

impl FragmentCodec for JsonFragmentCodec {
    fn decode(&self, locator: &FragmentLocator) -> Result<FragmentRecord> {
        let bytes = std::fs::read(&locator.path).map_err(|source| ValidationError::Io {
            path: locator.path.clone(),
            source,
        })?;
        let record: FragmentRecord =
            serde_json::from_slice(&bytes).map_err(|source| ValidationError::Decode {
                path: locator.path.clone(),
                source,
            })?;
        validate_record(locator, &record)?;
        Ok(record)
    }
}

fn validate_record(locator: &FragmentLocator, record: &FragmentRecord) -> Result<()> {
    let path = locator.path.display();
    record
        .check_consistency()
        .map_err(|e| ValidationError::execution(format!("{path}: {e}")))?;
    let window = record.cadence_range();
    if !locator.window.contains_range(&window) {
        return Err(ValidationError::execution(format!(
            "{path}: fragment window {window} lies outside task window {}",
            locator.window
        )));
    }
    Ok(())
}

/// Fragments held in memory, keyed by their locator path. Serves as both
/// source and codec.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFragments {
    fragments: Vec<(FragmentLocator, FragmentRecord)>,
}

impl InMemoryFragments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, locator: FragmentLocator, record: FragmentRecord) {
        self.fragments.push((locator, record));
    }
}

impl FragmentSource for InMemoryFragments {
    fn locate(&self, query: &FragmentQuery) -> Result<Vec<FragmentLocator>> {
        Ok(self
            .fragments
            .iter()
            .map(|(locator, _)| locator)
            .filter(|l| l.stage == query.stage && l.file_type == query.file_type)
            .filter(|l| match (l.channel, query.channel) {
                (Some(have), Some(want)) => have == want,
                _ => true,
            })
            .cloned()
            .collect())
    }
}

impl FragmentCodec for InMemoryFragments {
    fn decode(&self, locator: &FragmentLocator) -> Result<FragmentRecord> {
        let (_, record) = self
            .fragments
            .iter()
            .find(|(l, _)| l.path == locator.path)
            .ok_or_else(|| {
                ValidationError::execution(format!("no fragment at {}", locator.path.display()))
            })?;
        validate_record(locator, record)?;
        Ok(record.clone())
    }
}

// ---------------------------------------------------------------------------
// ArtifactExtractor
// ---------------------------------------------------------------------------

/// Per-command extraction front end. Decoded fragments are cached by path
/// for the extractor's lifetime when caching is enabled.
pub struct ArtifactExtractor<'a> {
    source: &'a dyn FragmentSource,
    codec: &'a dyn FragmentCodec,
    cache: Option<HashMap<PathBuf, Rc<FragmentRecord>>>,
}

impl<'a> ArtifactExtractor<'a> {
    pub fn new(
        source: &'a dyn FragmentSource,
        codec: &'a dyn FragmentCodec,
        cache_enabled: bool,
    ) -> Self {
        ArtifactExtractor {
            source,
            codec,
            cache: cache_enabled.then(HashMap::new),
        }
    }

    /// Decode every fragment matching `query` and pass it to `visit`, in
    /// the order the source lists them. Returns the number of fragments
    /// visited.
    pub fn extract<F>(
        &mut self,
        query: &FragmentQuery,
        requirement: Requirement,
        mut visit: F,
    ) -> Result<usize>
    where
        F: FnMut(&FragmentLocator, &FragmentRecord) -> Result<()>,
    {
        let locators: Vec<FragmentLocator> = self
            .source
            .locate(query)?
            .into_iter()
            .filter(|l| query.cadence.matches(&l.window))
            .collect();

        if let CadenceFilter::At(cadence) = query.cadence {
            let mut tasks: Vec<u64> = locators.iter().map(|l| l.task_id).collect();
            tasks.sort_unstable();
            tasks.dedup();
            match tasks.len() {
                0 => {
                    return Err(ValidationError::execution(format!(
                        "no task contains cadence {cadence} for {query}"
                    )))
                }
                1 => {}
                n => {
                    return Err(ValidationError::execution(format!(
                        "{n} tasks contain cadence {cadence} for {query}"
                    )))
                }
            }
        }

        let mut visited = 0;
        for locator in &locators {
            let record = self.decode(locator)?;
            log::debug!("Visiting {} ({})", locator.path.display(), record.schema_name());
            visit(locator, &record)?;
            visited += 1;
        }

        if visited == 0 && requirement == Requirement::Required {
            return Err(ValidationError::execution(format!(
                "no fragments found for {query}"
            )));
        }
        Ok(visited)
    }

    /// [`ArtifactExtractor::extract`] into a stage visitor.
    pub fn extract_into<V: StageVisitor>(
        &mut self,
        query: &FragmentQuery,
        requirement: Requirement,
        visitor: &mut V,
    ) -> Result<usize> {
        self.extract(query, requirement, |locator, record| {
            visitor.visit(locator, record)
        })
    }

    fn decode(&mut self, locator: &FragmentLocator) -> Result<Rc<FragmentRecord>> {
        let Some(cache) = self.cache.as_mut() else {
            return Ok(Rc::new(self.codec.decode(locator)?));
        };
        if let Some(record) = cache.get(&locator.path) {
            return Ok(Rc::clone(record));
        }
        let record = Rc::new(self.codec.decode(locator)?);
        cache.insert(locator.path.clone(), Rc::clone(&record));
        Ok(record)
    }

    pub fn cached_fragments(&self) -> usize {
        self.cache.as_ref().map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::data::fragment::TpsOutputs;

    /// Counts decodes so cache hits are observable.
    struct CountingCodec<'a> {
        inner: &'a InMemoryFragments,
        decodes: Cell<usize>,
    }

    impl FragmentCodec for CountingCodec<'_> {
        fn decode(&self, locator: &FragmentLocator) -> Result<FragmentRecord> {
            self.decodes.set(self.decodes.get() + 1);
            self.inner.decode(locator)
        }
    }

    fn tps_fragments(windows: &[(u64, i32, i32)]) -> InMemoryFragments {
        let mut fragments = InMemoryFragments::new();
        for &(task_id, start, end) in windows {
            let window = CadenceRange::new(start, end).unwrap();
            fragments.push(
                FragmentLocator {
                    path: PathBuf::from(format!("tps-{task_id}/tps-outputs-0.bin")),
                    stage: Stage::Tps,
                    file_type: TaskFileType::Outputs,
                    task_id,
                    channel: None,
                    window,
                },
                FragmentRecord::TpsOutputs(TpsOutputs {
                    cadence_range: window,
                    results: Vec::new(),
                }),
            );
        }
        fragments
    }

    fn query(cadence: CadenceFilter) -> FragmentQuery {
        FragmentQuery {
            stage: Stage::Tps,
            instance_id: 1,
            file_type: TaskFileType::Outputs,
            channel: None,
            cadence,
        }
    }

    #[test]
    fn single_cadence_resolves_one_task() {
        let fragments = tps_fragments(&[(1, 0, 9), (2, 10, 19)]);
        let mut extractor = ArtifactExtractor::new(&fragments, &fragments, false);
        let mut seen = Vec::new();
        extractor
            .extract(&query(CadenceFilter::At(12)), Requirement::Required, |l, _| {
                seen.push(l.task_id);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![2]);

        let err = extractor
            .extract(&query(CadenceFilter::At(40)), Requirement::Optional, |_, _| Ok(()))
            .unwrap_err();
        assert!(err.to_string().contains("no task contains cadence 40"));
    }

    #[test]
    fn required_query_without_fragments_fails() {
        let fragments = InMemoryFragments::new();
        let mut extractor = ArtifactExtractor::new(&fragments, &fragments, true);
        let all = query(CadenceFilter::All);
        assert_eq!(
            extractor.extract(&all, Requirement::Optional, |_, _| Ok(())).unwrap(),
            0
        );
        assert!(extractor
            .extract(&all, Requirement::Required, |_, _| Ok(()))
            .is_err());
    }

    #[test]
    fn cache_decodes_each_path_once() {
        let fragments = tps_fragments(&[(1, 0, 9), (2, 10, 19)]);
        let codec = CountingCodec {
            inner: &fragments,
            decodes: Cell::new(0),
        };
        let mut extractor = ArtifactExtractor::new(&fragments, &codec, true);
        let all = query(CadenceFilter::All);
        for _ in 0..3 {
            extractor
                .extract(&all, Requirement::Required, |_, _| Ok(()))
                .unwrap();
        }
        assert_eq!(codec.decodes.get(), 2);
        assert_eq!(extractor.cached_fragments(), 2);

        let mut uncached = ArtifactExtractor::new(&fragments, &codec, false);
        uncached
            .extract(&all, Requirement::Required, |_, _| Ok(()))
            .unwrap();
        assert_eq!(codec.decodes.get(), 4);
    }

    #[test]
    fn within_filter_selects_overlapping_windows() {
        let fragments = tps_fragments(&[(1, 0, 9), (2, 10, 19), (3, 20, 29)]);
        let mut extractor = ArtifactExtractor::new(&fragments, &fragments, false);
        let range = CadenceRange::new(8, 12).unwrap();
        let visited = extractor
            .extract(
                &query(CadenceFilter::Within(range)),
                Requirement::Required,
                |_, _| Ok(()),
            )
            .unwrap();
        assert_eq!(visited, 2);
    }
}
