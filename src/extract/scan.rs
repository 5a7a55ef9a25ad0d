use std::path::{Path, PathBuf};

use super::{FragmentLocator, FragmentQuery, FragmentSource};
use crate::data::tables::{TaskEntry, TaskManifest};
use crate::error::Result;

/// Finds fragments on disk. Tasks come from the manifest; each task's files
/// live under `<root>/<stage>-<runtime>-<instance>-<task>`, either directly,
/// in `st-*` sub-task directories, or in `g-0/st-*`. The first of those
/// places that holds matching files wins.
#[derive(Debug, Clone)]
pub struct DirectoryFragmentSource {
    root: PathBuf,
    runtime: String,
    manifest: TaskManifest,
}

impl DirectoryFragmentSource {
    pub fn new(root: impl Into<PathBuf>, runtime: impl Into<String>, manifest: TaskManifest) -> Self {
        DirectoryFragmentSource {
            root: root.into(),
            runtime: runtime.into(),
            manifest,
        }
    }

    pub fn manifest(&self) -> &TaskManifest {
        &self.manifest
    }

    fn task_files(&self, task: &TaskEntry, prefix: &str) -> Vec<PathBuf> {
        let task_dir = self.root.join(task.dir_name(&self.runtime));
        if !task_dir.is_dir() {
            log::warn!("Skipping missing task directory {}", task_dir.display());
            return Vec::new();
        }

        let direct = matching_files(&task_dir, prefix);
        if !direct.is_empty() {
            return direct;
        }
        let sub_tasks = sub_task_files(&task_dir, prefix);
        if !sub_tasks.is_empty() {
            return sub_tasks;
        }
        let grouped = task_dir.join("g-0");
        if grouped.is_dir() {
            return sub_task_files(&grouped, prefix);
        }
        Vec::new()
    }
}

impl FragmentSource for DirectoryFragmentSource {
    fn locate(&self, query: &FragmentQuery) -> Result<Vec<FragmentLocator>> {
        let prefix = format!("{}-{}-", query.stage.name(), query.file_type.name());
        let mut locators = Vec::new();

        for task in self
            .manifest
            .tasks(query.stage.name(), query.instance_id, query.channel)
        {
            if !query.cadence.matches(&task.window) {
                continue;
            }
            for path in self.task_files(task, &prefix) {
                locators.push(FragmentLocator {
                    path,
                    stage: query.stage,
                    file_type: query.file_type,
                    task_id: task.task_id,
                    channel: task.channel,
                    window: task.window,
                });
            }
        }
        log::debug!("Located {} fragments for {query}", locators.len());
        Ok(locators)
    }
}

/// Sorted entries of `dir` selected by `keep`. Unreadable directories are
/// logged and treated as empty.
fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Skipping unreadable directory {}: {e}", dir.display());
            return Vec::new();
        }
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| keep(path))
        .collect();
    paths.sort();
    paths
}

fn matching_files(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    sorted_entries(dir, |path| {
        path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(prefix) && name.ends_with(".bin"))
    })
}

fn sub_task_files(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    sorted_entries(dir, |path| {
        path.is_dir()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with("st-"))
    })
    .into_iter()
    .flat_map(|sub_task| matching_files(&sub_task, prefix))
    .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::data::model::{CadenceRange, Channel};
    use crate::extract::{CadenceFilter, Stage, TaskFileType};

    fn task(task_id: u64, start: i32, end: i32) -> TaskEntry {
        TaskEntry {
            stage: "cal".to_string(),
            instance_id: 3,
            task_id,
            channel: Some(Channel::new(2, 1)),
            window: CadenceRange::new(start, end).unwrap(),
        }
    }

    fn query(cadence: CadenceFilter) -> FragmentQuery {
        FragmentQuery {
            stage: Stage::Cal,
            instance_id: 3,
            file_type: TaskFileType::Outputs,
            channel: Some(Channel::new(2, 1)),
            cadence,
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"{}").unwrap();
    }

    #[test]
    fn finds_files_at_each_nesting_level() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();
        // direct
        touch(&base.join("cal-matlab-3-1/cal-outputs-0.bin"));
        touch(&base.join("cal-matlab-3-1/cal-inputs-0.bin"));
        touch(&base.join("cal-matlab-3-1/st-0/cal-outputs-9.bin"));
        // sub-tasks
        touch(&base.join("cal-matlab-3-2/st-1/cal-outputs-1.bin"));
        touch(&base.join("cal-matlab-3-2/st-0/cal-outputs-0.bin"));
        // grouped sub-tasks
        touch(&base.join("cal-matlab-3-3/g-0/st-0/cal-outputs-0.bin"));

        let manifest = TaskManifest::new(vec![task(1, 0, 9), task(2, 10, 19), task(3, 20, 29)]);
        let source = DirectoryFragmentSource::new(base, "matlab", manifest);
        let locators = source.locate(&query(CadenceFilter::All)).unwrap();

        let names: Vec<String> = locators
            .iter()
            .map(|l| {
                l.path
                    .strip_prefix(base)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "cal-matlab-3-1/cal-outputs-0.bin",
                "cal-matlab-3-2/st-0/cal-outputs-0.bin",
                "cal-matlab-3-2/st-1/cal-outputs-1.bin",
                "cal-matlab-3-3/g-0/st-0/cal-outputs-0.bin",
            ]
        );
        assert_eq!(locators[3].window, CadenceRange::new(20, 29).unwrap());
    }

    #[test]
    fn missing_task_directory_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("cal-matlab-3-2/cal-outputs-0.bin"));
        let manifest = TaskManifest::new(vec![task(1, 0, 9), task(2, 10, 19)]);
        let source = DirectoryFragmentSource::new(root.path(), "matlab", manifest);
        let locators = source.locate(&query(CadenceFilter::All)).unwrap();
        assert_eq!(locators.len(), 1);
        assert_eq!(locators[0].task_id, 2);

        let at = source.locate(&query(CadenceFilter::At(3))).unwrap();
        assert!(at.is_empty());
    }
}
