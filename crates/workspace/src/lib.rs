//! ptmatch run workspaces
//!
//! Every record-match request is staged in its own directory under a configured work root.
//! The directory holds the exported CSV data, the generated engine configuration and the
//! engine's output files.
//!
//! ## Layout
//!
//! ```text
//! <work_root>/
//! └── 20240131-142502-017/      # YYYYMMDD-HHMMSS-RRR
//!     ├── master-data.csv
//!     ├── query-data.csv        # linkage runs only
//!     ├── config.xml
//!     └── duplicates.csv        # written by the engine
//! ```
//!
//! ## Uniqueness
//!
//! Names combine the local wall-clock second with a random suffix drawn from the operating
//! system CSPRNG. Directories are claimed with an exclusive `create_dir`, so two runs can never
//! share a directory: a clash draws a fresh name instead of reusing the existing one.
//!
//! ## Example Usage
//!
//! ```no_run
//! use ptmatch_workspace::{RecordSetKind, WorkspaceService};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = WorkspaceService::new("ptmatch_work")?;
//! let workspace = service.create_workspace()?;
//! let master_csv = workspace.data_file(RecordSetKind::Master);
//! # let _ = master_csv;
//! service.cleanup(&workspace)?;
//! # Ok(())
//! # }
//! ```

mod constants;
mod name;
mod service;

pub use constants::{
    CONFIG_FILE_NAME, MASTER_DATA_FILE_NAME, MAX_ALLOCATION_ATTEMPTS, QUERY_DATA_FILE_NAME,
};
pub use name::WorkspaceName;
pub use service::{RecordSetKind, RunWorkspace, WorkspaceService};

/// Errors that can occur while managing run workspaces
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Work root exists but is not a directory, or could not be created
    #[error("Invalid work root directory: {0}")]
    InvalidRootDirectory(String),

    /// Every candidate name was already taken
    #[error("failed to allocate a unique workspace directory after {0} attempts")]
    Exhausted(usize),

    /// Refused to operate on a path that is not a workspace under the work root
    #[error("Path is not a workspace under the work root: {0}")]
    OutsideRoot(String),

    /// Workspace name could not be parsed
    #[error("Invalid workspace name: {0}")]
    InvalidName(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for workspace operations
pub type WorkspaceResult<T> = Result<T, WorkspaceError>;
