//! FHIR wire support for the record-match pipeline.
//!
//! This crate provides **wire models** and **lookup helpers** for the small subset of FHIR
//! (DSTU2-style JSON) that the record-match pipeline reads and writes:
//! - message bundles carrying a `MessageHeader`, `Parameters` and `OperationOutcome`
//! - searchset bundles carrying `Patient` resources, paginated via `next` links
//!
//! This crate focuses on:
//! - serialisation/deserialisation of the fields the pipeline actually touches
//! - tolerant parsing of remote search results (unknown fields are ignored)
//! - faithful round-tripping of `Parameters` resources that are echoed back to requesters
//!
//! Resources other than the modelled ones are carried as raw JSON so they survive a
//! parse/render cycle untouched.

pub mod bundle;
pub mod message_header;
pub mod operation_outcome;
pub mod parameters;
pub mod patient;
pub mod resource;

// Re-export public wire types
pub use bundle::{Bundle, BundleEntry, BundleLink, BundleType, EntrySearch, Extension};
pub use message_header::{
    Coding, MessageDestination, MessageHeader, MessageResponse, MessageSource, Reference,
    ResponseCode,
};
pub use operation_outcome::{CodeableText, IssueSeverity, OperationOutcome, OperationOutcomeIssue};
pub use parameters::{Parameter, Parameters};
pub use patient::{ContactPoint, HumanName, Identifier, Patient, PatientMeta};
pub use resource::Resource;

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
