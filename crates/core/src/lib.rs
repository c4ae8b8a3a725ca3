//! # ptmatch Core
//!
//! Record-match request pipeline.
//!
//! A record-match request is a FHIR `message` bundle naming a master record set (and optionally
//! a query set) as searches against remote FHIR servers. This crate:
//! - validates the request and builds the search URLs
//! - retrieves every page of results and stages patients as CSV in a per-run workspace
//! - renders the match engine configuration and runs the engine
//! - reads the engine's duplicates file into scored clusters
//! - assembles and sends exactly one result message per request
//!
//! **No transport concerns**: message brokers, inbox polling and process wiring belong in the
//! binaries. The pipeline talks to the outside world through the traits in [`retriever`],
//! [`engine`], [`auth`] and [`transport`], so tests substitute fakes for all of them.

pub mod auth;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod export;
pub mod match_config;
pub mod processor;
pub mod request;
pub mod response;
pub mod results;
pub mod retriever;
pub mod search;
pub mod transport;

pub use auth::{ServerAuthorization, ServerAuthorizationStore, TokenProvider};
pub use config::{CoreConfig, EngineSettings, FullUrlFormat};
pub use engine::{MatchEngine, ProcessMatchEngine};
pub use error::{MatchError, PtmatchResult};
pub use export::{CsvExporter, PatientCsvFormat};
pub use match_config::{
    locate_duplicates_file, render_config, EmbeddedTemplates, FileSystemTemplates,
    LayeredTemplateSource, MatchConfigGenerator, TemplateSource,
};
pub use processor::{Collaborators, MatchOutcome, RecordMatchProcessor};
pub use request::{MatchMode, MatchRequest, SearchGroup};
pub use response::{AcknowledgmentBuilder, RecordMatchResultsBuilder};
pub use results::{parse_duplicates, ClusterMember, Confidence, DuplicateCluster};
pub use retriever::{HttpSearchClient, PageSink, Retriever, SearchClient};
pub use transport::{
    is_record_match_request, DirectorySender, DuplicateMessageFilter, EndpointSender,
    HttpResultSender, InMemorySeenMessages, ResultSender, SeenMessages,
};
