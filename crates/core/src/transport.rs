//! Message transport collaborators.
//!
//! The pipeline does not own a message broker. It receives request bundles from whatever
//! drives it and hands results to a [`ResultSender`]. This module also carries the inbound
//! filters a driver applies before calling the processor:
//! - [`is_record_match_request`] passes only unanswered `record-match` request messages
//! - [`DuplicateMessageFilter`] drops messages whose header id was already seen
//!
//! Senders:
//! - [`DirectorySender`] writes each result as a JSON file into a directory
//! - [`HttpResultSender`] `PUT`s each result to `{endpoint}/Bundle/{id}` on a FHIR server
//! - [`EndpointSender`] picks one of the two by the endpoint's scheme

use crate::auth::TokenProvider;
use crate::constants::{FHIR_JSON_MEDIA_TYPE, RECORD_MATCH_EVENT_CODE, RECORD_MATCH_EVENT_SYSTEM};
use crate::{MatchError, PtmatchResult};
use async_trait::async_trait;
use fhir::{Bundle, BundleType, Resource};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Delivers a result message to an endpoint.
#[async_trait]
pub trait ResultSender: Send + Sync {
    /// Deliver `bundle` to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Transport`] if delivery fails.
    async fn send(&self, endpoint: &str, bundle: &Bundle) -> PtmatchResult<()>;
}

// ============================================================================
// Inbound filters
// ============================================================================

/// Header id of a message bundle.
pub fn message_id(bundle: &Bundle) -> Option<&str> {
    if bundle.bundle_type != BundleType::Message {
        return None;
    }
    bundle.message_header().and_then(|h| h.id.as_deref())
}

/// Whether `bundle` is a record-match request that has not been answered.
pub fn is_record_match_request(bundle: &Bundle) -> bool {
    tracing::debug!(
        "bundle id: {:?}, type: {}",
        bundle.id,
        bundle.bundle_type.as_str()
    );
    if bundle.bundle_type != BundleType::Message {
        return false;
    }

    let Some(header) = bundle.message_header() else {
        tracing::error!(
            "unexpected first entry: {}, bundle id: {:?}",
            bundle
                .entry
                .first()
                .and_then(|e| e.resource.as_ref())
                .map(Resource::resource_type)
                .unwrap_or("<none>"),
            bundle.id
        );
        return false;
    };

    if let Some(response) = &header.response {
        tracing::trace!("message is a response to {}", response.identifier);
        return false;
    }

    if header.has_event(RECORD_MATCH_EVENT_SYSTEM, RECORD_MATCH_EVENT_CODE) {
        tracing::debug!("pass record-match request");
        true
    } else {
        let event = header.event.clone().unwrap_or_default();
        tracing::warn!(
            "unsupported message type: event: {:?}, space: {:?}",
            event.code,
            event.system
        );
        false
    }
}

/// Remembers which messages have been processed.
pub trait SeenMessages: Send + Sync {
    fn has_seen(&self, message_id: &str) -> bool;

    /// Record `message_id`. Returns `false` if it was already recorded.
    fn mark_seen(&self, message_id: &str) -> bool;
}

/// Message ids remembered by [`InMemorySeenMessages::default`].
pub const DEFAULT_SEEN_CAPACITY: usize = 10_000;

/// Process-lifetime [`SeenMessages`] holding at most `capacity` ids.
///
/// Once full, the oldest id is forgotten for each new one, so a request redelivered after
/// that many newer messages is processed again.
#[derive(Debug)]
pub struct InMemorySeenMessages {
    capacity: usize,
    ids: Mutex<SeenIds>,
}

#[derive(Debug, Default)]
struct SeenIds {
    lookup: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenIds {
    fn insert(&mut self, message_id: &str, capacity: usize) -> bool {
        if !self.lookup.insert(message_id.to_string()) {
            return false;
        }
        self.order.push_back(message_id.to_string());
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.lookup.remove(&oldest);
            }
        }
        true
    }
}

impl InMemorySeenMessages {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ids: Mutex::new(SeenIds::default()),
        }
    }

    pub fn len(&self) -> usize {
        match self.ids.lock() {
            Ok(ids) => ids.order.len(),
            Err(poisoned) => poisoned.into_inner().order.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemorySeenMessages {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SEEN_CAPACITY)
    }
}

impl SeenMessages for InMemorySeenMessages {
    fn has_seen(&self, message_id: &str) -> bool {
        self.ids
            .lock()
            .map(|ids| ids.lookup.contains(message_id))
            .unwrap_or(false)
    }

    fn mark_seen(&self, message_id: &str) -> bool {
        match self.ids.lock() {
            Ok(mut ids) => ids.insert(message_id, self.capacity),
            Err(poisoned) => poisoned.into_inner().insert(message_id, self.capacity),
        }
    }
}

/// Passes each message id once.
pub struct DuplicateMessageFilter {
    seen: Arc<dyn SeenMessages>,
}

impl DuplicateMessageFilter {
    pub fn new(seen: Arc<dyn SeenMessages>) -> Self {
        Self { seen }
    }

    /// `true` the first time a message id is offered; non-message bundles never pass.
    pub fn is_new_message(&self, bundle: &Bundle) -> bool {
        let Some(id) = message_id(bundle) else {
            return false;
        };
        if self.seen.mark_seen(id) {
            tracing::info!("new message, id: {}", id);
            true
        } else {
            tracing::info!("repeat message, id: {}", id);
            false
        }
    }
}

// ============================================================================
// Senders
// ============================================================================

/// Writes each result as `<dir>/<bundle id>.json`; the endpoint is the directory.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectorySender;

#[async_trait]
impl ResultSender for DirectorySender {
    async fn send(&self, endpoint: &str, bundle: &Bundle) -> PtmatchResult<()> {
        let dir = PathBuf::from(endpoint);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MatchError::Transport(format!("{}: {e}", dir.display())))?;

        let name = bundle
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let path = dir.join(format!("{name}.json"));
        let body = bundle.render()?;

        tokio::fs::write(&path, body)
            .await
            .map_err(|e| MatchError::Transport(format!("{}: {e}", path.display())))?;
        tracing::info!("wrote result message to {}", path.display());
        Ok(())
    }
}

/// `PUT`s each result to a FHIR server as `{endpoint}/Bundle/{id}`.
pub struct HttpResultSender {
    http_client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpResultSender {
    pub fn new(timeout: Duration, tokens: Arc<dyn TokenProvider>) -> PtmatchResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("ptmatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| MatchError::Configuration(format!("unable to build HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            tokens,
        })
    }
}

#[async_trait]
impl ResultSender for HttpResultSender {
    async fn send(&self, endpoint: &str, bundle: &Bundle) -> PtmatchResult<()> {
        let id = bundle
            .id
            .as_deref()
            .ok_or_else(|| MatchError::Transport("result message has no id".into()))?;
        let url = format!("{}/Bundle/{}", endpoint.trim_end_matches('/'), id);
        tracing::debug!(url = %url, "sending result message");

        let mut request = self
            .http_client
            .put(&url)
            .header(CONTENT_TYPE, FHIR_JSON_MEDIA_TYPE)
            .body(bundle.render()?);
        if let Some(token) = self.tokens.bearer_token(endpoint) {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| MatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MatchError::Transport(format!(
                "{url} answered {}: {text}",
                status.as_u16()
            )));
        }

        tracing::info!("result of put to server: {}", status.as_u16());
        Ok(())
    }
}

/// HTTP(S) endpoints go to a FHIR server; anything else is an outbox directory.
pub struct EndpointSender {
    http: HttpResultSender,
    directory: DirectorySender,
}

impl EndpointSender {
    pub fn new(http: HttpResultSender) -> Self {
        Self {
            http,
            directory: DirectorySender,
        }
    }
}

fn is_http_endpoint(endpoint: &str) -> bool {
    let lower = endpoint.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[async_trait]
impl ResultSender for EndpointSender {
    async fn send(&self, endpoint: &str, bundle: &Bundle) -> PtmatchResult<()> {
        if is_http_endpoint(endpoint) {
            self.http.send(endpoint, bundle).await
        } else {
            self.directory.send(endpoint, bundle).await
        }
    }
}
