//! Record-match request processing.
//!
//! [`RecordMatchProcessor`] runs one request through the whole pipeline:
//!
//! ```text
//! validate -> retrieve master -> (retrieve query) -> generate config
//!          -> run engine -> interpret results -> assemble response -> send
//! ```
//!
//! Retrieval and staging are interleaved: every page of search results is appended to the
//! record set's CSV file as soon as it arrives. The master set is fully staged before the
//! query set is requested.
//!
//! ## Outcomes
//!
//! Every request produces exactly one response message:
//! - no master records: `ok`, "No Records Found in Master Record Set", engine not run
//! - engine found nothing: `ok`, "No Matches Found"
//! - engine found matches: `ok`, "Deduplication Complete" or "Linkage Complete", with clusters
//! - any failure: `fatal-error` with the error's message as diagnostic
//!
//! If the response itself cannot be assembled, a bare `fatal-error` response is attempted
//! once with fallback source identity. Failures to send are logged, never returned.
//!
//! ## Workspaces
//!
//! Each request owns a fresh run workspace under the configured work root. It is removed after
//! the response is sent when job results are not retained.

use crate::auth::{ServerAuthorizationStore, TokenProvider};
use crate::config::CoreConfig;
use crate::constants::{DEDUPLICATION_COMPLETE, LINKAGE_COMPLETE, NO_MASTER_RECORDS, NO_MATCHES};
use crate::engine::{MatchEngine, ProcessMatchEngine};
use crate::export::CsvExporter;
use crate::match_config::{locate_duplicates_file, LayeredTemplateSource, MatchConfigGenerator, TemplateSource};
use crate::request::{MatchMode, MatchRequest, SearchGroup};
use crate::response::{
    AcknowledgmentBuilder, RecordMatchResultsBuilder, DEFAULT_SOURCE_ENDPOINT, DEFAULT_SOURCE_NAME,
};
use crate::results::{match_count, parse_duplicates, DuplicateCluster};
use crate::retriever::{HttpSearchClient, Retriever, SearchClient};
use crate::transport::{EndpointSender, HttpResultSender, ResultSender};
use crate::{MatchError, PtmatchResult};
use fhir::{Bundle, ResponseCode};
use ptmatch_workspace::{RunWorkspace, WorkspaceService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;

/// What a processed request produced.
#[derive(Clone, Debug)]
pub struct MatchOutcome {
    pub code: ResponseCode,
    pub diagnostic: String,
    pub clusters: Vec<DuplicateCluster>,
    /// The response message handed to the sender, if one could be assembled.
    pub response: Option<Bundle>,
    /// Workspace used by the run, if one was created.
    pub workspace: Option<PathBuf>,
}

impl MatchOutcome {
    fn ok(diagnostic: &str, clusters: Vec<DuplicateCluster>) -> Self {
        Self {
            code: ResponseCode::Ok,
            diagnostic: diagnostic.to_string(),
            clusters,
            response: None,
            workspace: None,
        }
    }

    fn fatal(error: &MatchError) -> Self {
        Self {
            code: ResponseCode::FatalError,
            diagnostic: error.to_string(),
            clusters: Vec::new(),
            response: None,
            workspace: None,
        }
    }
}

/// External services the processor depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub client: Arc<dyn SearchClient>,
    pub tokens: Arc<dyn TokenProvider>,
    pub engine: Arc<dyn MatchEngine>,
    pub templates: Arc<dyn TemplateSource>,
    pub sender: Arc<dyn ResultSender>,
}

impl Collaborators {
    /// Production collaborators for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP clients cannot be built or the configured server
    /// authorization file cannot be loaded.
    pub fn from_config(config: &CoreConfig) -> PtmatchResult<Self> {
        let tokens: Arc<dyn TokenProvider> = match config.server_authorizations() {
            Some(path) => {
                let store = ServerAuthorizationStore::load(path)?;
                tracing::info!(
                    "loaded {} server authorizations from {}",
                    store.len(),
                    path.display()
                );
                Arc::new(store)
            }
            None => Arc::new(ServerAuthorizationStore::default()),
        };

        Ok(Self {
            client: Arc::new(HttpSearchClient::new(config.http_timeout())?),
            engine: Arc::new(ProcessMatchEngine::new(config.engine().clone())),
            templates: Arc::new(LayeredTemplateSource::default()),
            sender: Arc::new(EndpointSender::new(HttpResultSender::new(
                config.http_timeout(),
                tokens.clone(),
            )?)),
            tokens,
        })
    }
}

/// Runs record-match requests end to end.
#[derive(Clone)]
pub struct RecordMatchProcessor {
    config: Arc<CoreConfig>,
    workspaces: WorkspaceService,
    collaborators: Collaborators,
}

impl RecordMatchProcessor {
    /// Create a processor whose workspaces live under the configured work root.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Workspace`] if the work root cannot be created.
    pub fn new(config: Arc<CoreConfig>, collaborators: Collaborators) -> PtmatchResult<Self> {
        let workspaces = WorkspaceService::new(config.work_dir())?;
        Ok(Self {
            config,
            workspaces,
            collaborators,
        })
    }

    pub fn workspaces(&self) -> &WorkspaceService {
        &self.workspaces
    }

    /// `ok` acknowledgement of `request` from the configured source identity.
    pub fn acknowledge(&self, request: &Bundle) -> PtmatchResult<Bundle> {
        AcknowledgmentBuilder::new(
            self.config.source_name().unwrap_or(DEFAULT_SOURCE_NAME),
            self.config
                .source_endpoint()
                .unwrap_or(DEFAULT_SOURCE_ENDPOINT),
        )
        .build(request)
    }

    /// Process one request and send its response.
    ///
    /// Never fails: every error becomes a `fatal-error` outcome.
    pub async fn process(&self, request: &Bundle) -> MatchOutcome {
        let span = tracing::info_span!(
            "record_match",
            bundle_id = request.id.as_deref().unwrap_or("<no id>")
        );
        self.process_inner(request).instrument(span).await
    }

    async fn process_inner(&self, request: &Bundle) -> MatchOutcome {
        let mut workspace = None;

        let mut outcome = match self.run(request, &mut workspace).await {
            Ok(outcome) => outcome,
            Err(err) => {
                match &err {
                    MatchError::Validation(_) | MatchError::RemoteServer { .. } => {
                        tracing::warn!("{}", err)
                    }
                    _ => tracing::error!("processing failed: {}", err),
                }
                MatchOutcome::fatal(&err)
            }
        };

        outcome.response = self.respond(request, &outcome).await;
        outcome.workspace = workspace.as_ref().map(|w| w.path().to_path_buf());

        if let Some(workspace) = workspace {
            if self.config.delete_job_results() {
                match self.workspaces.cleanup(&workspace) {
                    Ok(()) => tracing::debug!("removed workspace {}", workspace.path().display()),
                    Err(e) => tracing::warn!(
                        "unable to remove workspace {}: {}",
                        workspace.path().display(),
                        e
                    ),
                }
            }
        }

        tracing::info!(
            "finished: {:?} {} ({} clusters)",
            outcome.code,
            outcome.diagnostic,
            outcome.clusters.len()
        );
        outcome
    }

    async fn run(
        &self,
        request: &Bundle,
        workspace_slot: &mut Option<RunWorkspace>,
    ) -> PtmatchResult<MatchOutcome> {
        let match_request = MatchRequest::from_bundle(request)?;
        let mode = match_request.mode();

        let workspace = workspace_slot.insert(self.workspaces.create_workspace()?);
        tracing::info!(
            "{} run in workspace {}",
            mode.as_str(),
            workspace.path().display()
        );

        let retriever = Retriever::new(
            self.collaborators.client.as_ref(),
            self.collaborators.tokens.as_ref(),
            self.config.max_pages(),
        );

        let master_count = self
            .stage(&retriever, &match_request.master, workspace)
            .await?;
        if master_count == 0 {
            return Ok(MatchOutcome::ok(NO_MASTER_RECORDS, Vec::new()));
        }

        if let Some(query) = &match_request.query {
            self.stage(&retriever, query, workspace).await?;
        }

        let config_path = MatchConfigGenerator::new(&self.config, self.collaborators.templates.as_ref())
            .generate(mode, workspace)?;

        tracing::debug!("starting match engine with {}", config_path.display());
        let matches = self.collaborators.engine.run(mode, &config_path).await?;
        tracing::info!("number of matches: {}", matches);

        if matches == 0 {
            return Ok(MatchOutcome::ok(NO_MATCHES, Vec::new()));
        }

        let duplicates = locate_duplicates_file(&config_path)?;
        let clusters = parse_duplicates(&duplicates)?;
        if match_count(&clusters) as u64 != matches {
            tracing::warn!(
                "engine reported {} matches but {} were read from {}",
                matches,
                match_count(&clusters),
                duplicates.display()
            );
        }

        Ok(MatchOutcome::ok(completion_message(mode), clusters))
    }

    async fn stage(
        &self,
        retriever: &Retriever<'_>,
        group: &SearchGroup,
        workspace: &RunWorkspace,
    ) -> PtmatchResult<u64> {
        let mut exporter = CsvExporter::new(
            workspace.data_file(group.kind),
            group.server_base.clone(),
            self.config.full_url_format(),
        );
        let count = retriever
            .retrieve(&group.search_url, &group.server_base, &mut exporter)
            .await?;
        tracing::info!(
            "staged {} {} records ({}) in {}",
            count,
            group.kind.as_str(),
            group.resource_type,
            exporter.path().display()
        );
        Ok(count)
    }

    fn results_builder<'a>(
        &self,
        request: &'a Bundle,
        outcome: &MatchOutcome,
    ) -> RecordMatchResultsBuilder<'a> {
        let builder = RecordMatchResultsBuilder::new(request, outcome.code)
            .source_name(self.config.source_name().map(str::to_string))
            .source_endpoint(self.config.source_endpoint().map(str::to_string))
            .clusters(outcome.clusters.clone());

        match outcome.code {
            ResponseCode::Ok => builder.detail_text(outcome.diagnostic.clone()),
            _ => builder.diagnostics(outcome.diagnostic.clone()),
        }
    }

    /// Assemble and send the response. Returns the message that was handed to the sender.
    async fn respond(&self, request: &Bundle, outcome: &MatchOutcome) -> Option<Bundle> {
        let message = match self.results_builder(request, outcome).build() {
            Ok(message) => message,
            Err(err) => {
                tracing::error!("unable to assemble response: {}", err);
                let fallback = RecordMatchResultsBuilder::new(request, ResponseCode::FatalError)
                    .diagnostics(err.to_string())
                    .source_name(Some(
                        self.config
                            .source_name()
                            .unwrap_or(DEFAULT_SOURCE_NAME)
                            .to_string(),
                    ))
                    .source_endpoint(Some(
                        self.config
                            .source_endpoint()
                            .unwrap_or(DEFAULT_SOURCE_ENDPOINT)
                            .to_string(),
                    ))
                    .build();
                match fallback {
                    Ok(message) => message,
                    Err(err) => {
                        tracing::error!(
                            "unable to send error response, request bundle {:?}: {}",
                            request.id,
                            err
                        );
                        return None;
                    }
                }
            }
        };

        let endpoint = self.config.response_endpoint();
        match self.collaborators.sender.send(endpoint, &message).await {
            Ok(()) => tracing::info!("sent response {:?} to {}", message.id, endpoint),
            Err(err) => tracing::error!("unable to send response to {}: {}", endpoint, err),
        }
        Some(message)
    }
}

fn completion_message(mode: MatchMode) -> &'static str {
    match mode {
        MatchMode::Deduplication => DEDUPLICATION_COMPLETE,
        MatchMode::Linkage => LINKAGE_COMPLETE,
    }
}
