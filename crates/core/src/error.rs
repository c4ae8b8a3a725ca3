/// Errors raised while processing a record-match request.
///
/// Every variant terminates the current request only. The orchestrator turns it into a
/// `fatal-error` response whose diagnostic is the variant's display text.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// Request envelope or parameters are missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// Remote server answered with a non-success status.
    #[error("Error response from server.  code: {status}, {message}")]
    RemoteServer { status: u16, message: String },

    /// Transport or decode failure while retrieving records.
    #[error("Unable to retrieve messages: {0}")]
    Retrieval(String),

    /// Operator misconfiguration: missing template, unresolvable output binding, bad setting.
    #[error("{0}")]
    Configuration(String),

    /// The external engine could not be started or did not finish cleanly.
    #[error("Unable to load or run match engine: {0}")]
    EngineInvocation(String),

    /// The engine reported matches but its output file is absent.
    #[error("Unable to find duplicates file: {}", path.display())]
    MissingOutput { path: std::path::PathBuf },

    /// The engine's output file could not be interpreted.
    #[error("Unable to read match results: {0}")]
    OutputFormat(String),

    /// Result message could not be delivered.
    #[error("failed to send result message: {0}")]
    Transport(String),

    /// Staging file or duplicates file could not be written or read as CSV.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("workspace error: {0}")]
    Workspace(#[from] ptmatch_workspace::WorkspaceError),

    #[error("FHIR error: {0}")]
    Fhir(#[from] fhir::FhirError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PtmatchResult<T> = std::result::Result<T, MatchError>;
