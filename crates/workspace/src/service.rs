//! Run workspace allocation and cleanup.
//!
//! [`WorkspaceService`] owns a work root and hands out one [`RunWorkspace`] per pipeline run.
//!
//! # Implementation Notes
//!
//! - The work root is created on construction if missing and canonicalised, so later
//!   containment checks compare like with like
//! - Workspaces are claimed with `create_dir`, which fails on an existing directory; a clash
//!   is retried with a fresh name up to [`MAX_ALLOCATION_ATTEMPTS`] times
//! - Cleanup only ever removes a direct child of the work root whose name parses as a
//!   [`WorkspaceName`]

use crate::constants::{
    CONFIG_FILE_NAME, MASTER_DATA_FILE_NAME, MAX_ALLOCATION_ATTEMPTS, QUERY_DATA_FILE_NAME,
};
use crate::{WorkspaceError, WorkspaceName, WorkspaceResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Which staged record set a data file holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordSetKind {
    Master,
    Query,
}

impl RecordSetKind {
    /// File name of the staged CSV for this record set.
    pub fn data_file_name(self) -> &'static str {
        match self {
            RecordSetKind::Master => MASTER_DATA_FILE_NAME,
            RecordSetKind::Query => QUERY_DATA_FILE_NAME,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordSetKind::Master => "master",
            RecordSetKind::Query => "query",
        }
    }
}

/// A directory exclusively owned by one pipeline run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunWorkspace {
    name: WorkspaceName,
    path: PathBuf,
}

impl RunWorkspace {
    pub fn name(&self) -> WorkspaceName {
        self.name
    }

    /// Absolute path of the workspace directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the staged CSV for `kind`.
    pub fn data_file(&self, kind: RecordSetKind) -> PathBuf {
        self.path.join(kind.data_file_name())
    }

    /// Path of the generated engine configuration.
    pub fn config_file(&self) -> PathBuf {
        self.path.join(CONFIG_FILE_NAME)
    }
}

/// Allocates and removes run workspaces under a single work root.
#[derive(Clone, Debug)]
pub struct WorkspaceService {
    root: PathBuf,
}

impl WorkspaceService {
    /// Create a service rooted at `root`.
    ///
    /// # Arguments
    ///
    /// * `root` - Work root directory; created (with parents) if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::InvalidRootDirectory`] if `root` exists but is not a directory
    /// or cannot be created or canonicalised.
    pub fn new(root: impl AsRef<Path>) -> WorkspaceResult<Self> {
        let root = root.as_ref();

        if root.exists() && !root.is_dir() {
            return Err(WorkspaceError::InvalidRootDirectory(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        fs::create_dir_all(root).map_err(|e| {
            WorkspaceError::InvalidRootDirectory(format!("{}: {e}", root.display()))
        })?;

        let root = root.canonicalize().map_err(|e| {
            WorkspaceError::InvalidRootDirectory(format!("{}: {e}", root.display()))
        })?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh workspace named for the current second.
    ///
    /// # Errors
    ///
    /// - [`WorkspaceError::Exhausted`] if every candidate name was already taken.
    /// - [`WorkspaceError::Io`] if the directory could not be created for any other reason.
    pub fn create_workspace(&self) -> WorkspaceResult<RunWorkspace> {
        self.create_workspace_with(WorkspaceName::generate)
    }

    fn create_workspace_with(
        &self,
        mut name_source: impl FnMut() -> WorkspaceName,
    ) -> WorkspaceResult<RunWorkspace> {
        for _attempt in 0..MAX_ALLOCATION_ATTEMPTS {
            let name = name_source();
            let candidate = self.root.join(name.to_string());

            match fs::create_dir(&candidate) {
                Ok(()) => {
                    tracing::debug!("allocated workspace {}", candidate.display());
                    return Ok(RunWorkspace {
                        name,
                        path: candidate,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::warn!("workspace {} already exists, drawing a new name", name);
                    continue;
                }
                Err(e) => return Err(WorkspaceError::Io(e)),
            }
        }

        Err(WorkspaceError::Exhausted(MAX_ALLOCATION_ATTEMPTS))
    }

    /// Recursively delete `workspace`.
    ///
    /// A workspace that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// - [`WorkspaceError::OutsideRoot`] if the path is not a workspace directly under this
    ///   service's root.
    /// - [`WorkspaceError::Io`] if removal fails.
    pub fn cleanup(&self, workspace: &RunWorkspace) -> WorkspaceResult<()> {
        let path = workspace.path();
        let is_child = path.parent() == Some(self.root.as_path());
        let is_workspace = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.parse::<WorkspaceName>().is_ok());

        if !is_child || !is_workspace {
            return Err(WorkspaceError::OutsideRoot(path.display().to_string()));
        }

        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn fixed_name(suffix: u16) -> WorkspaceName {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(14, 25, 2)
            .unwrap();
        WorkspaceName::at(ts, suffix)
    }

    #[test]
    fn test_new_creates_missing_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested").join("work");

        let service = WorkspaceService::new(&root).unwrap();

        assert!(root.is_dir());
        assert_eq!(service.root(), root.canonicalize().unwrap());
    }

    #[test]
    fn test_new_rejects_file_root() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();

        let result = WorkspaceService::new(&file);
        assert!(matches!(result, Err(WorkspaceError::InvalidRootDirectory(_))));
    }

    #[test]
    fn test_two_workspaces_in_same_second_are_distinct() {
        let temp = TempDir::new().unwrap();
        let service = WorkspaceService::new(temp.path()).unwrap();

        let first = service.create_workspace().unwrap();
        let second = service.create_workspace().unwrap();

        assert_ne!(first.path(), second.path());
        assert!(first.path().is_dir());
        assert!(second.path().is_dir());
    }

    #[test]
    fn test_collision_draws_a_new_name() {
        let temp = TempDir::new().unwrap();
        let service = WorkspaceService::new(temp.path()).unwrap();
        fs::create_dir(service.root().join(fixed_name(7).to_string())).unwrap();
        fs::write(
            service.root().join(fixed_name(7).to_string()).join("master-data.csv"),
            "existing run",
        )
        .unwrap();

        let mut names = vec![fixed_name(8), fixed_name(7)];
        let workspace = service
            .create_workspace_with(|| names.pop().unwrap())
            .unwrap();

        assert_eq!(workspace.name(), fixed_name(8));
        assert!(!workspace.data_file(RecordSetKind::Master).exists());
    }

    #[test]
    fn test_exhausted_when_every_name_is_taken() {
        let temp = TempDir::new().unwrap();
        let service = WorkspaceService::new(temp.path()).unwrap();
        fs::create_dir(service.root().join(fixed_name(1).to_string())).unwrap();

        let result = service.create_workspace_with(|| fixed_name(1));
        assert!(matches!(
            result,
            Err(WorkspaceError::Exhausted(MAX_ALLOCATION_ATTEMPTS))
        ));
    }

    #[test]
    fn test_workspace_file_layout() {
        let temp = TempDir::new().unwrap();
        let service = WorkspaceService::new(temp.path()).unwrap();
        let workspace = service.create_workspace_with(|| fixed_name(42)).unwrap();

        assert!(workspace.path().ends_with("20240131-142502-042"));
        assert!(workspace
            .data_file(RecordSetKind::Master)
            .ends_with("master-data.csv"));
        assert!(workspace
            .data_file(RecordSetKind::Query)
            .ends_with("query-data.csv"));
        assert!(workspace.config_file().ends_with("config.xml"));
    }

    #[test]
    fn test_cleanup_removes_workspace_recursively() {
        let temp = TempDir::new().unwrap();
        let service = WorkspaceService::new(temp.path()).unwrap();
        let workspace = service.create_workspace().unwrap();
        fs::write(workspace.data_file(RecordSetKind::Master), "a,b\n").unwrap();
        fs::write(workspace.config_file(), "<configuration/>").unwrap();

        service.cleanup(&workspace).unwrap();
        assert!(!workspace.path().exists());

        // second call is a no-op
        service.cleanup(&workspace).unwrap();
    }

    #[test]
    fn test_cleanup_refuses_foreign_directory() {
        let temp = TempDir::new().unwrap();
        let service = WorkspaceService::new(temp.path().join("work")).unwrap();
        let other = TempDir::new().unwrap();
        let foreign = RunWorkspace {
            name: fixed_name(3),
            path: other.path().join(fixed_name(3).to_string()),
        };
        fs::create_dir(foreign.path()).unwrap();

        let result = service.cleanup(&foreign);
        assert!(matches!(result, Err(WorkspaceError::OutsideRoot(_))));
        assert!(foreign.path().exists());
    }
}
