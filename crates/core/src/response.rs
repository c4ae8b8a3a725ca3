//! Result and acknowledgement messages.
//!
//! A result message is a `message` bundle with:
//! 1. a `MessageHeader` answering the request header
//! 2. an `OperationOutcome` carrying the diagnostic
//! 3. every `Parameters` entry of the request, echoed for correlation
//! 4. one entry per matched record, scored against its cluster's reference record
//!
//! The response's source is the configured identity when one is set, otherwise the request's
//! single destination.

use crate::constants::{MPI_MATCH_EXTENSION_URL, PATIENT_TYPE_URL};
use crate::results::DuplicateCluster;
use crate::{MatchError, PtmatchResult};
use fhir::{
    Bundle, BundleEntry, BundleLink, BundleType, EntrySearch, Extension, IssueSeverity,
    MessageDestination, MessageHeader, MessageResponse, MessageSource, OperationOutcome,
    Resource, ResponseCode,
};
use uuid::Uuid;

/// Source name used when none is configured.
pub const DEFAULT_SOURCE_NAME: &str = "Unknown";

/// Source endpoint used when none is configured.
pub const DEFAULT_SOURCE_ENDPOINT: &str = "http://acme.com/record-matcher";

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_full_url() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Identifier of the request header, without any `MessageHeader/` style prefix.
fn response_identifier(header: Option<&MessageHeader>) -> String {
    let Some(id) = header.and_then(|h| h.id.as_deref()) else {
        tracing::warn!("request message header has no id");
        return String::new();
    };
    tracing::info!("request message header id: {}", id);
    match id.find('/') {
        Some(pos) if pos > 0 => id[pos + 1..].to_string(),
        _ => id.to_string(),
    }
}

/// The request's source becomes the response's destination.
fn reply_destination(header: Option<&MessageHeader>) -> Vec<MessageDestination> {
    header
        .and_then(|h| h.source.as_ref())
        .map(|source| vec![MessageDestination::from(source)])
        .unwrap_or_default()
}

// ============================================================================
// Result message
// ============================================================================

/// Builds the result message for one record-match request.
#[derive(Clone, Debug)]
pub struct RecordMatchResultsBuilder<'a> {
    request: &'a Bundle,
    code: ResponseCode,
    diagnostics: Option<String>,
    detail_text: Option<String>,
    source_name: Option<String>,
    source_endpoint: Option<String>,
    clusters: Vec<DuplicateCluster>,
}

impl<'a> RecordMatchResultsBuilder<'a> {
    pub fn new(request: &'a Bundle, code: ResponseCode) -> Self {
        Self {
            request,
            code,
            diagnostics: None,
            detail_text: None,
            source_name: None,
            source_endpoint: None,
            clusters: Vec::new(),
        }
    }

    pub fn diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = Some(diagnostics.into());
        self
    }

    pub fn detail_text(mut self, text: impl Into<String>) -> Self {
        self.detail_text = Some(text.into());
        self
    }

    pub fn source_name(mut self, name: Option<String>) -> Self {
        self.source_name = name;
        self
    }

    pub fn source_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.source_endpoint = endpoint;
        self
    }

    pub fn clusters(mut self, clusters: Vec<DuplicateCluster>) -> Self {
        self.clusters = clusters;
        self
    }

    /// Assemble the result message.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Configuration`] if no source endpoint is configured and the
    /// request does not have exactly one destination.
    pub fn build(&self) -> PtmatchResult<Bundle> {
        let request_header = self.request.message_header();

        let mut message = Bundle::new(BundleType::Message);
        message.id = Some(new_id());

        message.push_resource(
            Some(new_full_url()),
            Resource::MessageHeader(self.message_header(request_header)?),
        );
        message.push_resource(
            Some(new_full_url()),
            Resource::OperationOutcome(self.outcome()),
        );

        message.entry.extend(
            self.request
                .entry
                .iter()
                .filter(|e| matches!(e.resource, Some(Resource::Parameters(_))))
                .cloned(),
        );

        for cluster in &self.clusters {
            for member in &cluster.members {
                message.entry.push(BundleEntry {
                    full_url: Some(cluster.reference.clone()),
                    link: vec![
                        BundleLink::new("type", PATIENT_TYPE_URL),
                        BundleLink::new("related", member.full_url.clone()),
                    ],
                    resource: None,
                    search: Some(EntrySearch {
                        mode: None,
                        score: Some(member.score),
                        extension: vec![Extension::code(
                            MPI_MATCH_EXTENSION_URL,
                            member.confidence.code(),
                        )],
                    }),
                });
            }
        }

        Ok(message)
    }

    fn message_header(&self, request: Option<&MessageHeader>) -> PtmatchResult<MessageHeader> {
        Ok(MessageHeader {
            id: Some(new_id()),
            timestamp: Some(now()),
            event: request.and_then(|h| h.event.clone()),
            response: Some(MessageResponse {
                identifier: response_identifier(request),
                code: self.code,
            }),
            source: Some(self.source(request)?),
            destination: reply_destination(request),
            data: request.map(|h| h.data.clone()).unwrap_or_default(),
        })
    }

    fn source(&self, request: Option<&MessageHeader>) -> PtmatchResult<MessageSource> {
        let mut name = self.source_name.clone();
        let mut endpoint = self.source_endpoint.clone();

        if endpoint.is_none() {
            if let Some([only]) = request.map(|h| h.destination.as_slice()) {
                name = only.name.clone();
                endpoint = Some(only.endpoint.clone());
            }
        }

        let endpoint = endpoint.filter(|e| !e.is_empty()).ok_or_else(|| {
            MatchError::Configuration("Cannot Determine Source Endpoint for Response Message".into())
        })?;

        Ok(MessageSource {
            name: name.filter(|n| !n.is_empty()),
            software: None,
            endpoint,
        })
    }

    fn outcome(&self) -> OperationOutcome {
        let (severity, code) = match self.code {
            ResponseCode::Ok => (IssueSeverity::Information, "informational"),
            ResponseCode::TransientError => (IssueSeverity::Error, "transient"),
            ResponseCode::FatalError => (IssueSeverity::Fatal, "exception"),
        };
        let mut outcome = OperationOutcome::single(
            severity,
            code,
            self.diagnostics.clone(),
            self.detail_text.clone(),
        );
        outcome.id = Some(new_id());
        outcome
    }
}

// ============================================================================
// Acknowledgement
// ============================================================================

/// Builds the immediate `ok` acknowledgement of a request message.
#[derive(Clone, Debug)]
pub struct AcknowledgmentBuilder {
    source_name: String,
    source_endpoint: String,
}

impl Default for AcknowledgmentBuilder {
    fn default() -> Self {
        Self {
            source_name: DEFAULT_SOURCE_NAME.to_string(),
            source_endpoint: DEFAULT_SOURCE_ENDPOINT.to_string(),
        }
    }
}

impl AcknowledgmentBuilder {
    pub fn new(source_name: impl Into<String>, source_endpoint: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            source_endpoint: source_endpoint.into(),
        }
    }

    /// Header-only `ok` response to `request`.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Validation`] if `request` is not a message bundle.
    pub fn build(&self, request: &Bundle) -> PtmatchResult<Bundle> {
        if request.bundle_type != BundleType::Message {
            return Err(MatchError::Validation(
                "Bundle expected to have type, message".into(),
            ));
        }
        let request_header = request.message_header();

        let header = MessageHeader {
            id: Some(new_id()),
            timestamp: Some(now()),
            event: request_header.and_then(|h| h.event.clone()),
            response: Some(MessageResponse {
                identifier: response_identifier(request_header),
                code: ResponseCode::Ok,
            }),
            source: Some(MessageSource {
                name: Some(self.source_name.clone()),
                software: None,
                endpoint: self.source_endpoint.clone(),
            }),
            destination: reply_destination(request_header),
            data: Vec::new(),
        };

        let mut ack = Bundle::new(BundleType::Message);
        ack.id = Some(new_id());
        ack.push_resource(Some(new_full_url()), Resource::MessageHeader(header));
        Ok(ack)
    }
}
