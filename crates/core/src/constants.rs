//! Constants shared across the record-match pipeline.

use std::time::Duration;

/// Event system of record-match request messages.
pub const RECORD_MATCH_EVENT_SYSTEM: &str = "http://github.com/mitre/ptmatch/fhir/message-events";

/// Event code of record-match request messages.
pub const RECORD_MATCH_EVENT_CODE: &str = "record-match";

/// Extension carrying the confidence bucket on a match entry.
pub const MPI_MATCH_EXTENSION_URL: &str =
    "http://hl7.org/fhir/StructureDefinition/patient-mpi-match";

/// Link target describing the type of a matched record.
pub const PATIENT_TYPE_URL: &str = "http://hl7.org/fhir/Patient";

/// Default resource type searched when a parameter group does not name one.
pub const DEFAULT_RESOURCE_TYPE: &str = "Patient";

// Request parameter names.
pub const PARAM_TYPE: &str = "type";
pub const PARAM_RESOURCE_TYPE: &str = "resourceType";
pub const PARAM_SEARCH_EXPRESSION: &str = "searchExpression";
pub const PARAM_RESOURCE_URL: &str = "resourceUrl";

// Outcome diagnostics.
pub const NO_MASTER_RECORDS: &str = "No Records Found in Master Record Set";
pub const NO_MATCHES: &str = "No Matches Found";
pub const DEDUPLICATION_COMPLETE: &str = "Deduplication Complete";
pub const LINKAGE_COMPLETE: &str = "Linkage Complete";

/// Embedded engine configuration templates.
pub const DEFAULT_DEDUPLICATION_TEMPLATE: &str = "fril-dedupe-allFieldsNearlyEqualWeight-accept60.xml";
pub const DEFAULT_LINKAGE_TEMPLATE: &str = "fril-linkage-allFieldsNearlyEqualWeight-accept60.xml";

/// Default work root for run workspaces.
pub const DEFAULT_WORK_DIR: &str = "ptmatch_work";

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(600);

/// Upper bound on pages followed for one search.
pub const DEFAULT_MAX_PAGES: usize = 10_000;

pub const FHIR_JSON_MEDIA_TYPE: &str = "application/fhir+json";
