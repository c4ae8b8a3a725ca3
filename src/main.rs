use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fhir::Bundle;
use ptmatch_core::{
    is_record_match_request, Collaborators, CoreConfig, DuplicateMessageFilter,
    InMemorySeenMessages, RecordMatchProcessor, ResultSender,
};

const ENV_INBOX: &str = "PTMATCH_INBOX";
const ENV_POLL_SECS: &str = "PTMATCH_POLL_SECS";
const DEFAULT_INBOX: &str = "inbox";
const DEFAULT_POLL: Duration = Duration::from_secs(5);
const PROCESSED_DIR: &str = "processed";
const REJECTED_DIR: &str = "rejected";

/// Main entry point for the record-match runner
///
/// Polls an inbox directory for request messages (`*.json` FHIR bundles) and runs each
/// record-match request through the pipeline on its own task. Acknowledgements and results
/// are sent to the configured response endpoint: an outbox directory, or a FHIR server when
/// the endpoint is an `http(s)` URL.
///
/// Handled files are moved to `processed/` (or `rejected/` if they are not record-match
/// requests) under the inbox, so a restart does not pick them up again. On Ctrl-C the runner
/// stops polling and waits for requests in flight to send their responses.
///
/// # Environment Variables
/// - `PTMATCH_INBOX`: directory polled for requests (default: "inbox")
/// - `PTMATCH_POLL_SECS`: poll interval in seconds (default: 5)
/// - `PTMATCH_*`: pipeline settings, see `ptmatch_core::config`
///
/// # Returns
/// * `Ok(())` - On Ctrl-C, once in-flight requests have finished
/// * `Err(anyhow::Error)` - If configuration is invalid or the inbox cannot be created
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ptmatch=info".parse()?)
                .add_directive("ptmatch_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(CoreConfig::from_lookup(|key| std::env::var(key).ok())?);
    let inbox = PathBuf::from(std::env::var(ENV_INBOX).unwrap_or_else(|_| DEFAULT_INBOX.into()));
    let poll = ptmatch_core::config::duration_from_env_value(
        ENV_POLL_SECS,
        std::env::var(ENV_POLL_SECS).ok(),
        DEFAULT_POLL,
    )?;

    for dir in [&inbox, &inbox.join(PROCESSED_DIR), &inbox.join(REJECTED_DIR)] {
        std::fs::create_dir_all(dir)?;
    }

    let collaborators = Collaborators::from_config(&config)?;
    let sender = collaborators.sender.clone();
    let processor = RecordMatchProcessor::new(config.clone(), collaborators)?;
    let filter = DuplicateMessageFilter::new(Arc::new(InMemorySeenMessages::default()));

    tracing::info!("++ Watching {} every {}s", inbox.display(), poll.as_secs());
    tracing::info!("++ Sending responses to {}", config.response_endpoint());
    tracing::info!("++ Work root {}", processor.workspaces().root().display());

    let mut ticker = tokio::time::interval(poll);
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                poll_inbox(&inbox, &processor, &filter, sender.as_ref(), config.response_endpoint(), &mut tasks).await;
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                log_join(joined);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down; waiting for {} requests in flight", tasks.len());
                drain(&mut tasks).await;
                return Ok(());
            }
        }
    }
}

/// Claim every request file currently in `inbox` and start processing it on `tasks`.
///
/// Filesystem failures are logged per file; the runner keeps polling.
async fn poll_inbox(
    inbox: &Path,
    processor: &RecordMatchProcessor,
    filter: &DuplicateMessageFilter,
    sender: &dyn ResultSender,
    response_endpoint: &str,
    tasks: &mut JoinSet<()>,
) {
    let files = match request_files(inbox) {
        Ok(files) => files,
        Err(e) => {
            tracing::error!("unable to list inbox {}: {}", inbox.display(), e);
            return;
        }
    };

    for path in files {
        let Some(bundle) = claim_request(&path, inbox, filter) else {
            continue;
        };

        match processor.acknowledge(&bundle) {
            Ok(ack) => {
                if let Err(e) = sender.send(response_endpoint, &ack).await {
                    tracing::warn!("unable to send acknowledgement: {}", e);
                }
            }
            Err(e) => tracing::warn!("unable to build acknowledgement: {}", e),
        }

        let processor = processor.clone();
        tasks.spawn(async move {
            processor.process(&bundle).await;
        });
    }
}

/// Read, filter and move one request file.
///
/// Returns the bundle when it is a new record-match request; the file moves to `processed/`.
/// Anything else moves to `rejected/`. A file that cannot be moved stays put and is offered
/// again on the next poll, where the duplicate filter turns it away.
fn claim_request(path: &Path, inbox: &Path, filter: &DuplicateMessageFilter) -> Option<Bundle> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("unable to read {}: {}", path.display(), e);
            return None;
        }
    };

    let accepted = match Bundle::parse(&text) {
        Ok(bundle) if is_record_match_request(&bundle) && filter.is_new_message(&bundle) => {
            Some(bundle)
        }
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("{} is not a FHIR bundle: {}", path.display(), e);
            None
        }
    };

    let target = inbox.join(if accepted.is_some() { PROCESSED_DIR } else { REJECTED_DIR });
    if let Err(e) = move_to(path, &target) {
        tracing::error!("unable to move {} to {}: {}", path.display(), target.display(), e);
    }
    accepted
}

/// Wait for every in-flight request so each one sends its response.
async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        log_join(joined);
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!("request task failed: {}", e);
    }
}

/// `*.json` files directly inside `dir`, oldest name first.
fn request_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

fn move_to(path: &Path, dir: &Path) -> std::io::Result<()> {
    if let Some(name) = path.file_name() {
        std::fs::rename(path, dir.join(name))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_request_files_lists_json_only_in_name_order() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("a.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "").unwrap();
        std::fs::create_dir(tmp.path().join("processed")).unwrap();

        let files = request_files(tmp.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_move_to_relocates_file() {
        let tmp = TempDir::new().unwrap();
        let done = tmp.path().join("processed");
        std::fs::create_dir(&done).unwrap();
        let file = tmp.path().join("req.json");
        std::fs::write(&file, "{}").unwrap();

        move_to(&file, &done).unwrap();

        assert!(!file.exists());
        assert!(done.join("req.json").exists());
    }

    const REQUEST: &str = r#"{
        "resourceType": "Bundle",
        "id": "req-1",
        "type": "message",
        "entry": [{
            "fullUrl": "urn:uuid:h1",
            "resource": {
                "resourceType": "MessageHeader",
                "id": "h1",
                "event": {
                    "system": "http://github.com/mitre/ptmatch/fhir/message-events",
                    "code": "record-match"
                },
                "source": {"endpoint": "http://requester"}
            }
        }]
    }"#;

    fn inbox() -> TempDir {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join(PROCESSED_DIR)).unwrap();
        std::fs::create_dir(tmp.path().join(REJECTED_DIR)).unwrap();
        tmp
    }

    fn filter() -> DuplicateMessageFilter {
        DuplicateMessageFilter::new(Arc::new(InMemorySeenMessages::default()))
    }

    #[test]
    fn test_claim_accepts_new_request_once() {
        let tmp = inbox();
        let filter = filter();
        let first = tmp.path().join("a.json");
        let repeat = tmp.path().join("b.json");
        std::fs::write(&first, REQUEST).unwrap();
        std::fs::write(&repeat, REQUEST).unwrap();

        let bundle = claim_request(&first, tmp.path(), &filter).unwrap();
        assert_eq!(bundle.id.as_deref(), Some("req-1"));
        assert!(tmp.path().join(PROCESSED_DIR).join("a.json").exists());

        assert!(claim_request(&repeat, tmp.path(), &filter).is_none());
        assert!(tmp.path().join(REJECTED_DIR).join("b.json").exists());
    }

    #[test]
    fn test_claim_rejects_malformed_file() {
        let tmp = inbox();
        let file = tmp.path().join("junk.json");
        std::fs::write(&file, "not json").unwrap();

        assert!(claim_request(&file, tmp.path(), &filter()).is_none());
        assert!(tmp.path().join(REJECTED_DIR).join("junk.json").exists());
    }

    #[test]
    fn test_claim_survives_unmovable_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.json");
        std::fs::write(&file, REQUEST).unwrap();

        // No processed/ directory, so the move fails but the request is still handed over.
        let bundle = claim_request(&file, tmp.path(), &filter());

        assert!(bundle.is_some());
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_drain_waits_for_requests_in_flight() {
        let finished = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut tasks = JoinSet::new();
        for delay in [30u64, 10, 50] {
            let finished = finished.clone();
            tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                finished.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });
        }

        drain(&mut tasks).await;

        assert!(tasks.is_empty());
        assert_eq!(finished.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
