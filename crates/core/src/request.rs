//! Record-match request validation.
//!
//! A request is a `message` bundle whose first entry is a `MessageHeader`, followed by one
//! `Parameters` entry per record set. Each set is tagged by a `type` parameter (`master` or
//! `query`, any case) and may name its `resourceType` (default `Patient`).

use crate::constants::{DEFAULT_RESOURCE_TYPE, PARAM_RESOURCE_TYPE, PARAM_TYPE};
use crate::search::{resource_url_for_group, search_url_for_group, server_base};
use crate::{MatchError, PtmatchResult};
use fhir::{Bundle, BundleType, Parameter, Parameters, Resource};
use ptmatch_workspace::RecordSetKind;

/// Whether a run searches one set for duplicates or links a query set against a master set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchMode {
    Deduplication,
    Linkage,
}

impl MatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMode::Deduplication => "deduplication",
            MatchMode::Linkage => "linkage",
        }
    }
}

/// One record set to retrieve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchGroup {
    pub kind: RecordSetKind,
    pub resource_type: String,
    pub search_url: String,
    pub server_base: String,
}

/// A validated record-match request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchRequest {
    pub bundle_id: Option<String>,
    pub master: SearchGroup,
    pub query: Option<SearchGroup>,
}

impl MatchRequest {
    /// Validate `bundle` and extract its search groups.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Validation`] if:
    /// - the bundle is not a `message` bundle,
    /// - its first entry is not a `MessageHeader`,
    /// - there is no `master` group with a resolvable `resourceUrl`.
    ///
    /// A `query` group without a `resourceUrl` is ignored with a warning.
    pub fn from_bundle(bundle: &Bundle) -> PtmatchResult<Self> {
        if bundle.bundle_type != BundleType::Message {
            return Err(MatchError::Validation(format!(
                "Unsupported Bundle type: {}",
                bundle.bundle_type.as_str()
            )));
        }

        if bundle.message_header().is_none() {
            return Err(MatchError::Validation(format!(
                "Request message does not start with a MessageHeader, bundle: {}",
                bundle_label(bundle)
            )));
        }

        let mut master = None;
        let mut query = None;

        for resource in bundle.resources() {
            let Resource::Parameters(params) = resource else {
                tracing::debug!("skipping {} entry", resource.resource_type());
                continue;
            };

            let Some(kind) = group_kind(params) else {
                continue;
            };

            let slot = match kind {
                RecordSetKind::Master => &mut master,
                RecordSetKind::Query => &mut query,
            };
            if slot.is_some() {
                tracing::warn!(
                    "ignoring additional {} parameter group in bundle {}",
                    kind.as_str(),
                    bundle_label(bundle)
                );
                continue;
            }
            *slot = Some(search_group(kind, params));
        }

        let master = master.flatten().ok_or_else(|| {
            let msg = format!(
                "Required Parameter for master record set is missing (resourceUrl), bundle: {}",
                bundle_label(bundle)
            );
            tracing::warn!("{}", msg);
            MatchError::Validation(msg)
        })?;

        Ok(Self {
            bundle_id: bundle.id.clone(),
            master,
            query: query.flatten(),
        })
    }

    /// Linkage when a query set is present, deduplication otherwise.
    pub fn mode(&self) -> MatchMode {
        if self.query.is_some() {
            MatchMode::Linkage
        } else {
            MatchMode::Deduplication
        }
    }
}

fn group_kind(params: &Parameters) -> Option<RecordSetKind> {
    let value = params
        .find_by_name(PARAM_TYPE)
        .and_then(Parameter::value_as_string)?;

    if value.eq_ignore_ascii_case(RecordSetKind::Master.as_str()) {
        Some(RecordSetKind::Master)
    } else if value.eq_ignore_ascii_case(RecordSetKind::Query.as_str()) {
        Some(RecordSetKind::Query)
    } else {
        tracing::warn!("unknown parameter group type: {}", value);
        None
    }
}

/// `None` when the group has no usable search URL.
fn search_group(kind: RecordSetKind, params: &Parameters) -> Option<SearchGroup> {
    let resource_type = params
        .find_by_name(PARAM_RESOURCE_TYPE)
        .and_then(Parameter::value_as_string)
        .unwrap_or_else(|| DEFAULT_RESOURCE_TYPE.to_string());

    let search_url = search_url_for_group(params)?;
    let resource_url = resource_url_for_group(params)?;

    Some(SearchGroup {
        kind,
        server_base: server_base(&resource_type, &resource_url),
        resource_type,
        search_url,
    })
}

fn bundle_label(bundle: &Bundle) -> &str {
    bundle.id.as_deref().unwrap_or("<no id>")
}
