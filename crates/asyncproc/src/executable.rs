use crate::managed::ManagedProcess;
use crate::version::{FileVersion, read_file_version};
use asyncproc_core::{ExecutableSearch, ProcessError, StartInfo};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// An executable located on disk, preferring the highest embedded file version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    path: PathBuf,
    version: Option<FileVersion>,
}

struct Candidate {
    path: PathBuf,
    version: Option<FileVersion>,
}

impl Candidate {
    fn rank(&self) -> FileVersion {
        self.version.unwrap_or_default()
    }
}

/// Accumulates the best match while directories are visited
struct Scan<'a> {
    name: &'a str,
    leader: Option<Candidate>,
}

impl<'a> Scan<'a> {
    fn new(name: &'a str) -> Self {
        Self { name, leader: None }
    }

    fn consider(&mut self, dir: &Path) {
        let path = dir.join(self.name);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            _ => return,
        }

        let version = match read_file_version(&path) {
            Ok(version) => version,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable candidate");
                return;
            }
        };
        let candidate = Candidate { path, version };

        let replace = match &self.leader {
            None => true,
            Some(leader) => candidate.rank() > leader.rank(),
        };
        if replace {
            debug!(
                path = %candidate.path.display(),
                version = %candidate.rank(),
                "New executable candidate"
            );
            self.leader = Some(candidate);
        }
    }

    /// Visit `root`, and below it when `recursive`, in lexical pre-order
    fn scan_tree(&mut self, root: &Path, recursive: bool) {
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            self.consider(&dir);
            if !recursive {
                continue;
            }

            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "Skipping inaccessible directory");
                    continue;
                }
            };

            // file_type does not follow symlinks, so linked directories are skipped
            let mut children: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
                .map(|entry| entry.path())
                .collect();
            children.sort();
            pending.extend(children.into_iter().rev());
        }
    }
}

impl Executable {
    /// Search `PATH`, then the current directory and every base path
    /// recursively, for a file called `name`.
    pub fn new<P: AsRef<Path>>(name: &str, base_paths: &[P]) -> Result<Self, ProcessError> {
        let mut search = ExecutableSearch::new(name);
        search.base_paths = base_paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        Self::find(&search)
    }

    pub fn find(search: &ExecutableSearch) -> Result<Self, ProcessError> {
        if search.name.is_empty() {
            return Err(ProcessError::resolution(""));
        }
        let mut scan = Scan::new(&search.name);

        if search.include_path {
            if let Some(path) = std::env::var_os("PATH") {
                for dir in std::env::split_paths(&path) {
                    if !dir.as_os_str().is_empty() {
                        scan.scan_tree(&dir, false);
                    }
                }
            }
        }

        if search.include_current_dir {
            match std::env::current_dir() {
                Ok(cwd) => scan.scan_tree(&cwd, search.recursive),
                Err(e) => debug!(error = %e, "Current directory is not accessible"),
            }
        }

        for base in &search.base_paths {
            scan.scan_tree(base, search.recursive);
        }

        let leader = scan
            .leader
            .ok_or_else(|| ProcessError::resolution(search.name.as_str()))?;
        let path = std::path::absolute(&leader.path)?;
        info!(
            name = %search.name,
            path = %path.display(),
            version = %leader.rank(),
            "Resolved executable"
        );

        Ok(Self {
            path,
            version: leader.version,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Embedded file version, `None` for files without one
    pub fn version(&self) -> Option<FileVersion> {
        self.version
    }

    /// Launch configuration running this executable without arguments
    pub fn start_info(&self) -> StartInfo {
        StartInfo::new(&self.path)
    }

    pub fn exec(&self) -> Result<ManagedProcess, ProcessError> {
        ManagedProcess::start(self.start_info())
    }

    pub fn exec_with_args(&self, arguments: &str) -> Result<ManagedProcess, ProcessError> {
        self.exec_with(Some(arguments), None, HashMap::new())
    }

    pub fn exec_with_env(
        &self,
        env: HashMap<String, String>,
    ) -> Result<ManagedProcess, ProcessError> {
        self.exec_with(None, None, env)
    }

    pub fn exec_with_args_and_env(
        &self,
        arguments: &str,
        env: HashMap<String, String>,
    ) -> Result<ManagedProcess, ProcessError> {
        self.exec_with(Some(arguments), None, env)
    }

    pub fn exec_with(
        &self,
        arguments: Option<&str>,
        working_directory: Option<&Path>,
        env: HashMap<String, String>,
    ) -> Result<ManagedProcess, ProcessError> {
        let mut info = self.start_info();
        info.arguments = arguments.map(str::to_string);
        info.working_directory = working_directory.map(Path::to_path_buf);
        info.env = env;
        ManagedProcess::start(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::version_block;

    const TOOL: &str = "asyncproc-unit-probe";

    fn isolated(base_paths: &[&Path]) -> ExecutableSearch {
        ExecutableSearch::builder()
            .name(TOOL)
            .base_paths(base_paths.iter().copied())
            .include_path(false)
            .include_current_dir(false)
            .build()
            .unwrap()
    }

    fn plant(dir: &Path, version: Option<FileVersion>) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(TOOL);
        let mut contents = b"#!/bin/sh\nexit 0\n".to_vec();
        if let Some(version) = version {
            contents.extend(version_block(version));
        }
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_highest_version_wins_across_tree() {
        let root = tempfile::tempdir().unwrap();
        plant(&root.path().join("a"), Some(FileVersion::new(1, 0, 0, 0)));
        let best = plant(&root.path().join("b/deep"), Some(FileVersion::new(2, 0, 0, 0)));
        plant(&root.path().join("c"), Some(FileVersion::new(1, 5, 0, 0)));

        let exe = Executable::find(&isolated(&[root.path()])).unwrap();
        assert_eq!(exe.path(), best);
        assert_eq!(exe.version(), Some(FileVersion::new(2, 0, 0, 0)));
    }

    #[test]
    fn test_equal_versions_keep_first_found() {
        let root = tempfile::tempdir().unwrap();
        let first = plant(&root.path().join("a"), None);
        plant(&root.path().join("b"), None);

        let exe = Executable::find(&isolated(&[root.path()])).unwrap();
        assert_eq!(exe.path(), first);
        assert_eq!(exe.version(), None);
    }

    #[test]
    fn test_non_recursive_search_ignores_subdirectories() {
        let root = tempfile::tempdir().unwrap();
        plant(&root.path().join("nested"), Some(FileVersion::new(9, 0, 0, 0)));

        let mut search = isolated(&[root.path()]);
        search.recursive = false;
        let err = Executable::find(&search).unwrap_err();
        assert!(matches!(err, ProcessError::Resolution { ref name } if name == TOOL));
    }

    #[test]
    fn test_missing_base_paths_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let found = plant(root.path(), None);
        let missing = root.path().join("does-not-exist");

        let exe = Executable::find(&isolated(&[missing.as_path(), root.path()])).unwrap();
        assert_eq!(exe.path(), found);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directories_are_not_followed() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        plant(outside.path(), None);
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        assert!(Executable::find(&isolated(&[root.path()])).is_err());
    }

    #[test]
    fn test_empty_name_is_resolution_error() {
        let err = Executable::new::<&str>("", &[]).unwrap_err();
        assert!(matches!(err, ProcessError::Resolution { .. }));
    }
}
