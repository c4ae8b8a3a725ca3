//! Bundle wire model.
//!
//! Bundles arrive in two shapes in this system:
//! - `message` bundles: inbound match requests and outbound match results
//! - `searchset` bundles: pages of search results returned by remote servers
//!
//! Responsibilities:
//! - Parse and render bundle JSON with a best-effort error path on schema mismatch
//! - Expose pagination (`next` link) and message-header lookups

use crate::{FhirError, FhirResult, MessageHeader, Resource};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const BUNDLE_RESOURCE_TYPE: &str = "Bundle";

// ============================================================================
// Bundle
// ============================================================================

/// Kind of bundle, as carried in `Bundle.type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Document,
    Message,
    Transaction,
    TransactionResponse,
    Batch,
    BatchResponse,
    History,
    Searchset,
    Collection,
    #[serde(other)]
    Unknown,
}

impl BundleType {
    /// The wire code of this bundle type.
    pub fn as_str(self) -> &'static str {
        match self {
            BundleType::Document => "document",
            BundleType::Message => "message",
            BundleType::Transaction => "transaction",
            BundleType::TransactionResponse => "transaction-response",
            BundleType::Batch => "batch",
            BundleType::BatchResponse => "batch-response",
            BundleType::History => "history",
            BundleType::Searchset => "searchset",
            BundleType::Collection => "collection",
            BundleType::Unknown => "unknown",
        }
    }
}

/// A FHIR bundle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(rename = "resourceType")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub bundle_type: BundleType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<BundleLink>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,
}

/// A relation link on a bundle or bundle entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

impl BundleLink {
    pub fn new(relation: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            url: url.into(),
        }
    }
}

/// One entry of a bundle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    #[serde(rename = "fullUrl", default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<BundleLink>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<EntrySearch>,
}

/// Search metadata attached to an entry (`Bundle.entry.search`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntrySearch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
}

/// A simple extension carrying a code or string value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub url: String,

    #[serde(rename = "valueCode", default, skip_serializing_if = "Option::is_none")]
    pub value_code: Option<String>,

    #[serde(rename = "valueString", default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
}

impl Extension {
    pub fn code(url: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            value_code: Some(code.into()),
            value_string: None,
        }
    }
}

// ============================================================================
// Bundle operations
// ============================================================================

impl Bundle {
    /// Create an empty bundle of the given type.
    pub fn new(bundle_type: BundleType) -> Self {
        Self {
            resource_type: BUNDLE_RESOURCE_TYPE.to_string(),
            id: None,
            bundle_type,
            total: None,
            link: Vec::new(),
            entry: Vec::new(),
        }
    }

    /// Parse a bundle from JSON text.
    ///
    /// This uses `serde_path_to_error` to surface a best-effort "path" (e.g. `entry[0].resource`)
    /// to the failing field when the JSON does not match the wire schema.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - the JSON is malformed or a modelled field has an unexpected type,
    /// - `resourceType` is not `"Bundle"`.
    pub fn parse(json_text: &str) -> FhirResult<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(json_text);

        let bundle = match serde_path_to_error::deserialize::<_, Bundle>(&mut deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    "<root>"
                } else {
                    path.as_str()
                };
                return Err(FhirError::Translation(format!(
                    "Bundle schema mismatch at {path}: {source}"
                )));
            }
        };

        if bundle.resource_type != BUNDLE_RESOURCE_TYPE {
            return Err(FhirError::InvalidInput(format!(
                "Expected resourceType 'Bundle', got '{}'",
                bundle.resource_type
            )));
        }

        Ok(bundle)
    }

    /// Parse a bundle from an already-decoded JSON value.
    pub fn from_value(value: Value) -> FhirResult<Self> {
        let bundle: Bundle = serde_json::from_value(value)?;
        if bundle.resource_type != BUNDLE_RESOURCE_TYPE {
            return Err(FhirError::InvalidInput(format!(
                "Expected resourceType 'Bundle', got '{}'",
                bundle.resource_type
            )));
        }
        Ok(bundle)
    }

    /// Render this bundle as pretty-printed JSON.
    pub fn render(&self) -> FhirResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// URL of the bundle link with the given relation, if present.
    pub fn link_url(&self, relation: &str) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == relation)
            .map(|l| l.url.as_str())
    }

    /// URL of the next page of a paginated search result, if any.
    pub fn next_link(&self) -> Option<&str> {
        self.link_url("next")
    }

    /// The message header of a message bundle.
    ///
    /// Message bundles carry their `MessageHeader` as the first entry; a header found anywhere
    /// else does not count.
    pub fn message_header(&self) -> Option<&MessageHeader> {
        match self.entry.first().and_then(|e| e.resource.as_ref()) {
            Some(Resource::MessageHeader(header)) => Some(header),
            _ => None,
        }
    }

    /// Iterate over the resources carried by this bundle, skipping empty entries.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.entry.iter().filter_map(|e| e.resource.as_ref())
    }

    /// Append an entry holding `resource` under `full_url`.
    pub fn push_resource(&mut self, full_url: Option<String>, resource: Resource) {
        self.entry.push(BundleEntry {
            full_url,
            resource: Some(resource),
            ..BundleEntry::default()
        });
    }
}
