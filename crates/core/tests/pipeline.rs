//! End-to-end record-match runs against fake servers, engine and transport.

use async_trait::async_trait;
use fhir::{Bundle, IssueSeverity, Resource, ResponseCode};
use ptmatch_core::constants::{
    DEDUPLICATION_COMPLETE, LINKAGE_COMPLETE, NO_MASTER_RECORDS, NO_MATCHES,
};
use ptmatch_core::response::DEFAULT_SOURCE_NAME;
use ptmatch_core::{
    locate_duplicates_file, Collaborators, Confidence, CoreConfig, LayeredTemplateSource,
    MatchEngine, MatchError, MatchMode, PtmatchResult, RecordMatchProcessor, ResultSender,
    SearchClient, ServerAuthorizationStore,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const MASTER_URL: &str = "http://master.example.org/fhir/Patient";
const QUERY_URL: &str = "http://query.example.org/base/Patient";

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeServer {
    pages: HashMap<String, Value>,
    failures: HashMap<String, u16>,
    calls: Mutex<Vec<String>>,
}

impl FakeServer {
    fn with_page(mut self, url: &str, base: &str, ids: std::ops::RangeInclusive<u32>, next: Option<&str>) -> Self {
        let mut links = vec![json!({"relation": "self", "url": url})];
        if let Some(next) = next {
            links.push(json!({"relation": "next", "url": next}));
        }
        let entries: Vec<Value> = ids
            .map(|id| {
                json!({
                    "fullUrl": format!("{base}Patient/{id}"),
                    "resource": {
                        "resourceType": "Patient",
                        "id": id.to_string(),
                        "name": [{"family": ["Smith"], "given": [format!("Pat{id}")]}],
                        "gender": "female",
                        "birthDate": "1980-01-01"
                    }
                })
            })
            .collect();
        self.pages.insert(
            url.to_string(),
            json!({"resourceType": "Bundle", "type": "searchset", "link": links, "entry": entries}),
        );
        self
    }

    fn with_failure(mut self, url: &str, status: u16) -> Self {
        self.failures.insert(url.to_string(), status);
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SearchClient for FakeServer {
    async fn fetch(&self, url: &str, _bearer_token: Option<&str>) -> PtmatchResult<Bundle> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(status) = self.failures.get(url) {
            return Err(MatchError::RemoteServer {
                status: *status,
                message: "Internal Server Error".into(),
            });
        }
        let page = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| MatchError::Retrieval(format!("unexpected url {url}")))?;
        Ok(Bundle::from_value(page)?)
    }
}

/// Writes a prepared duplicates file where the configuration says and reports its pair count.
struct FakeEngine {
    pairs: u32,
    base: String,
    write_output: bool,
    failure: Option<String>,
    runs: Mutex<Vec<(MatchMode, PathBuf)>>,
}

impl FakeEngine {
    fn finding(pairs: u32) -> Self {
        Self {
            pairs,
            base: "http://master.example.org/fhir/".into(),
            write_output: true,
            failure: None,
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Reports `pairs` matches but leaves no duplicates file behind.
    fn without_output(pairs: u32) -> Self {
        Self {
            write_output: false,
            ..Self::finding(pairs)
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::finding(0)
        }
    }

    fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl MatchEngine for FakeEngine {
    async fn run(&self, mode: MatchMode, config_path: &Path) -> PtmatchResult<u64> {
        self.runs
            .lock()
            .unwrap()
            .push((mode, config_path.to_path_buf()));

        if let Some(message) = &self.failure {
            return Err(MatchError::EngineInvocation(message.clone()));
        }

        if self.pairs > 0 && self.write_output {
            let mut text = String::from("duplicate_id,score,fullUrl\n");
            for group in 1..=self.pairs {
                text.push_str(&format!("{group},100,{}Patient/{}\n", self.base, 2 * group - 1));
                text.push_str(&format!("{group},90,{}Patient/{}\n", self.base, 2 * group));
            }
            std::fs::write(locate_duplicates_file(config_path)?, text)?;
        }
        Ok(u64::from(self.pairs))
    }
}

#[derive(Default)]
struct CapturingSender {
    sent: Mutex<Vec<(String, Bundle)>>,
}

#[async_trait]
impl ResultSender for CapturingSender {
    async fn send(&self, endpoint: &str, bundle: &Bundle) -> PtmatchResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((endpoint.to_string(), bundle.clone()));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    _tmp: TempDir,
    server: Arc<FakeServer>,
    engine: Arc<FakeEngine>,
    sender: Arc<CapturingSender>,
    processor: RecordMatchProcessor,
}

fn harness(server: FakeServer, engine: FakeEngine, delete_job_results: bool) -> Harness {
    let tmp = TempDir::new().unwrap();
    let config = CoreConfig::new(tmp.path().join("work"), "results".into())
        .unwrap()
        .with_delete_job_results(delete_job_results);

    let server = Arc::new(server);
    let engine = Arc::new(engine);
    let sender = Arc::new(CapturingSender::default());

    let collaborators = Collaborators {
        client: server.clone(),
        tokens: Arc::new(ServerAuthorizationStore::default()),
        engine: engine.clone(),
        templates: Arc::new(LayeredTemplateSource::default()),
        sender: sender.clone(),
    };
    let processor = RecordMatchProcessor::new(Arc::new(config), collaborators).unwrap();

    Harness {
        _tmp: tmp,
        server,
        engine,
        sender,
        processor,
    }
}

fn group(kind: &str, resource_url: Option<&str>) -> Value {
    let mut expression = vec![json!({"name": "family", "valueString": "Smith"})];
    if let Some(url) = resource_url {
        expression.push(json!({"name": "resourceUrl", "valueUri": url}));
    }
    json!({"fullUrl": format!("urn:uuid:{kind}-params"), "resource": {
        "resourceType": "Parameters",
        "parameter": [
            {"name": "type", "valueString": kind},
            {"name": "resourceType", "valueString": "Patient"},
            {"name": "searchExpression", "resource": {
                "resourceType": "Parameters",
                "parameter": expression
            }}
        ]
    }})
}

fn request(groups: Vec<Value>) -> Bundle {
    let mut entries = vec![json!({"resource": {
        "resourceType": "MessageHeader",
        "id": "MessageHeader/req-header-1",
        "event": {"system": "http://github.com/mitre/ptmatch/fhir/message-events", "code": "record-match"},
        "source": {"name": "requester", "endpoint": "http://requester.example.org/fhir"},
        "destination": [{"name": "ptmatch", "endpoint": "http://matcher.example.org/fhir"}]
    }})];
    entries.extend(groups);
    Bundle::from_value(json!({
        "resourceType": "Bundle",
        "id": "req-1",
        "type": "message",
        "entry": entries
    }))
    .unwrap()
}

fn single_response(h: &Harness) -> Bundle {
    let sent = h.sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1, "exactly one response per request");
    assert_eq!(sent[0].0, "results");
    sent[0].1.clone()
}

fn issue_text(message: &Bundle) -> (IssueSeverity, String) {
    match message.entry[1].resource.as_ref() {
        Some(Resource::OperationOutcome(o)) => {
            let issue = &o.issue[0];
            let text = issue
                .details
                .as_ref()
                .map(|d| d.text.clone())
                .or_else(|| issue.diagnostics.clone())
                .unwrap_or_default();
            (issue.severity, text)
        }
        other => panic!("expected outcome entry, got {other:?}"),
    }
}

fn master_page_1() -> String {
    format!("{MASTER_URL}?family=Smith")
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_thirteen_duplicate_pairs_become_thirteen_clusters() {
    let server = FakeServer::default()
        .with_page(&master_page_1(), "http://master.example.org/fhir/", 1..=20, Some("http://master.example.org/fhir?page=2"))
        .with_page("http://master.example.org/fhir?page=2", "http://master.example.org/fhir/", 21..=26, None);
    let h = harness(server, FakeEngine::finding(13), false);

    let outcome = h
        .processor
        .process(&request(vec![group("master", Some(MASTER_URL))]))
        .await;

    assert_eq!(outcome.code, ResponseCode::Ok, "{}", outcome.diagnostic);
    assert_eq!(outcome.diagnostic, DEDUPLICATION_COMPLETE);
    assert_eq!(outcome.clusters.len(), 13);
    for (i, cluster) in outcome.clusters.iter().enumerate() {
        let n = 2 * i as u32 + 1;
        assert_eq!(cluster.reference, format!("http://master.example.org/fhir/Patient/{n}"));
        assert_eq!(cluster.members.len(), 1);
        assert_eq!(
            cluster.members[0].full_url,
            format!("http://master.example.org/fhir/Patient/{}", n + 1)
        );
        assert_eq!(cluster.members[0].confidence, Confidence::Certain);
    }

    assert_eq!(h.server.call_count(), 2);
    let runs = h.engine.runs.lock().unwrap().clone();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].0, MatchMode::Deduplication);

    let workspace = outcome.workspace.clone().unwrap();
    let staged = std::fs::read_to_string(workspace.join("master-data.csv")).unwrap();
    assert_eq!(staged.lines().count(), 27);

    let response = single_response(&h);
    assert_eq!(response.entry.len(), 2 + 1 + 13);
    let (severity, text) = issue_text(&response);
    assert_eq!(severity, IssueSeverity::Information);
    assert_eq!(text, DEDUPLICATION_COMPLETE);
    assert_eq!(
        response.message_header().unwrap().response.as_ref().unwrap().identifier,
        "req-header-1"
    );
}

#[tokio::test]
async fn test_zero_duplicates_is_ok_without_clusters() {
    let server = FakeServer::default().with_page(&master_page_1(), "http://master.example.org/fhir/", 1..=5, None);
    let h = harness(server, FakeEngine::finding(0), false);

    let outcome = h
        .processor
        .process(&request(vec![group("master", Some(MASTER_URL))]))
        .await;

    assert_eq!(outcome.code, ResponseCode::Ok);
    assert_eq!(outcome.diagnostic, NO_MATCHES);
    assert!(outcome.clusters.is_empty());
    assert_eq!(h.engine.run_count(), 1);

    let response = single_response(&h);
    assert_eq!(response.entry.len(), 3);
    assert_eq!(issue_text(&response).1, NO_MATCHES);
}

#[tokio::test]
async fn test_missing_master_resource_url_fails_before_retrieval() {
    let h = harness(FakeServer::default(), FakeEngine::finding(0), false);

    let outcome = h
        .processor
        .process(&request(vec![group("master", None)]))
        .await;

    assert_eq!(outcome.code, ResponseCode::FatalError);
    assert!(outcome.diagnostic.contains("missing"), "{}", outcome.diagnostic);
    assert!(outcome.diagnostic.contains("resourceUrl"), "{}", outcome.diagnostic);
    assert_eq!(h.server.call_count(), 0);
    assert_eq!(h.engine.run_count(), 0);
    assert!(outcome.workspace.is_none());

    let (severity, text) = issue_text(&single_response(&h));
    assert_eq!(severity, IssueSeverity::Fatal);
    assert_eq!(text, outcome.diagnostic);
}

#[tokio::test]
async fn test_empty_master_set_skips_engine() {
    let server = FakeServer::default().with_page(&master_page_1(), "http://master.example.org/fhir/", 1..=0, None);
    let h = harness(server, FakeEngine::finding(3), false);

    let outcome = h
        .processor
        .process(&request(vec![
            group("master", Some(MASTER_URL)),
            group("query", Some(QUERY_URL)),
        ]))
        .await;

    assert_eq!(outcome.code, ResponseCode::Ok);
    assert_eq!(outcome.diagnostic, NO_MASTER_RECORDS);
    assert_eq!(h.engine.run_count(), 0);
    assert_eq!(h.server.call_count(), 1);
    assert_eq!(issue_text(&single_response(&h)).1, NO_MASTER_RECORDS);
}

#[tokio::test]
async fn test_query_group_runs_linkage() {
    let server = FakeServer::default()
        .with_page(&master_page_1(), "http://master.example.org/fhir/", 1..=4, None)
        .with_page(&format!("{QUERY_URL}?family=Smith"), "http://query.example.org/base/", 1..=2, None);
    let h = harness(server, FakeEngine::finding(1), false);

    let outcome = h
        .processor
        .process(&request(vec![
            group("master", Some(MASTER_URL)),
            group("QUERY", Some(QUERY_URL)),
        ]))
        .await;

    assert_eq!(outcome.code, ResponseCode::Ok, "{}", outcome.diagnostic);
    assert_eq!(outcome.diagnostic, LINKAGE_COMPLETE);
    assert_eq!(outcome.clusters.len(), 1);

    let runs = h.engine.runs.lock().unwrap().clone();
    assert_eq!(runs[0].0, MatchMode::Linkage);

    let workspace = outcome.workspace.clone().unwrap();
    let query = std::fs::read_to_string(workspace.join("query-data.csv")).unwrap();
    assert!(query.contains("\"http://query.example.org/base/Patient/2\""));
    assert_eq!(query.lines().count(), 3);

    let config = std::fs::read_to_string(workspace.join("config.xml")).unwrap();
    assert!(config.contains(&format!("{}/query-data.csv", workspace.display())));

    // header, outcome, two echoed parameter groups, one match
    assert_eq!(single_response(&h).entry.len(), 5);
}

#[tokio::test]
async fn test_remote_error_is_fatal_and_workspace_is_cleaned_up() {
    let server = FakeServer::default().with_failure(&master_page_1(), 500);
    let h = harness(server, FakeEngine::finding(1), true);

    let outcome = h
        .processor
        .process(&request(vec![group("master", Some(MASTER_URL))]))
        .await;

    assert_eq!(outcome.code, ResponseCode::FatalError);
    assert_eq!(
        outcome.diagnostic,
        "Error response from server.  code: 500, Internal Server Error"
    );
    assert_eq!(h.engine.run_count(), 0);

    let workspace = outcome.workspace.clone().unwrap();
    assert!(!workspace.exists());
    assert!(std::fs::read_dir(h.processor.workspaces().root())
        .unwrap()
        .next()
        .is_none());
    single_response(&h);
}

#[tokio::test]
async fn test_non_message_bundle_is_rejected() {
    let h = harness(FakeServer::default(), FakeEngine::finding(0), false);
    let mut bundle = request(vec![group("master", Some(MASTER_URL))]);
    bundle.bundle_type = fhir::BundleType::Collection;

    let outcome = h.processor.process(&bundle).await;

    assert_eq!(outcome.code, ResponseCode::FatalError);
    assert_eq!(outcome.diagnostic, "Unsupported Bundle type: collection");
    assert_eq!(h.server.call_count(), 0);
    single_response(&h);
}

#[tokio::test]
async fn test_acknowledgement_answers_request() {
    let h = harness(FakeServer::default(), FakeEngine::finding(0), false);
    let ack = h
        .processor
        .acknowledge(&request(vec![group("master", Some(MASTER_URL))]))
        .unwrap();

    let header = ack.message_header().unwrap();
    assert_eq!(header.response.as_ref().unwrap().code, ResponseCode::Ok);
    assert_eq!(
        header.destination[0].endpoint,
        "http://requester.example.org/fhir"
    );
}

#[tokio::test]
async fn test_engine_failure_is_fatal_with_single_response() {
    let server = FakeServer::default().with_page(&master_page_1(), "http://master.example.org/fhir/", 1..=4, None);
    let h = harness(server, FakeEngine::failing("exit status 2: out of memory"), false);

    let outcome = h
        .processor
        .process(&request(vec![group("master", Some(MASTER_URL))]))
        .await;

    assert_eq!(outcome.code, ResponseCode::FatalError);
    assert_eq!(
        outcome.diagnostic,
        "Unable to load or run match engine: exit status 2: out of memory"
    );
    assert!(outcome.clusters.is_empty());
    assert_eq!(h.engine.run_count(), 1);

    let response = single_response(&h);
    assert_eq!(response.entry.len(), 3);
    assert_eq!(
        response.message_header().unwrap().response.as_ref().unwrap().code,
        ResponseCode::FatalError
    );
    let (severity, text) = issue_text(&response);
    assert_eq!(severity, IssueSeverity::Fatal);
    assert_eq!(text, outcome.diagnostic);
}

#[tokio::test]
async fn test_matches_without_duplicates_file_are_fatal() {
    let server = FakeServer::default().with_page(&master_page_1(), "http://master.example.org/fhir/", 1..=4, None);
    let h = harness(server, FakeEngine::without_output(2), false);

    let outcome = h
        .processor
        .process(&request(vec![group("master", Some(MASTER_URL))]))
        .await;

    assert_eq!(outcome.code, ResponseCode::FatalError);
    assert!(
        outcome.diagnostic.starts_with("Unable to find duplicates file: "),
        "{}",
        outcome.diagnostic
    );
    assert!(outcome.diagnostic.ends_with("duplicates.csv"), "{}", outcome.diagnostic);
    assert_eq!(h.engine.run_count(), 1);

    let (severity, text) = issue_text(&single_response(&h));
    assert_eq!(severity, IssueSeverity::Fatal);
    assert_eq!(text, outcome.diagnostic);
}

#[tokio::test]
async fn test_unassemblable_response_falls_back_to_default_source() {
    let server = FakeServer::default().with_page(&master_page_1(), "http://master.example.org/fhir/", 1..=4, None);
    let h = harness(server, FakeEngine::finding(0), false);

    let mut bundle = request(vec![group("master", Some(MASTER_URL))]);
    let Some(Resource::MessageHeader(header)) = bundle.entry[0].resource.as_mut() else {
        panic!("request starts with its header");
    };
    let mut second = header.destination[0].clone();
    second.endpoint = "http://other-matcher.example.org/fhir".into();
    header.destination.push(second);

    let outcome = h.processor.process(&bundle).await;

    // The run itself succeeded; only the response had to fall back.
    assert_eq!(outcome.code, ResponseCode::Ok);
    assert_eq!(outcome.diagnostic, NO_MATCHES);

    let response = single_response(&h);
    let header = response.message_header().unwrap();
    assert_eq!(header.response.as_ref().unwrap().code, ResponseCode::FatalError);
    let source = header.source.as_ref().unwrap();
    assert_eq!(source.name.as_deref(), Some(DEFAULT_SOURCE_NAME));

    let (severity, text) = issue_text(&response);
    assert_eq!(severity, IssueSeverity::Fatal);
    assert_eq!(text, "Cannot Determine Source Endpoint for Response Message");
}
