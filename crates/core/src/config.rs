//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.
//!
//! Binaries resolve a [`CoreConfig`] through [`CoreConfig::from_lookup`], handing it a closure
//! over `std::env::var`. Tests hand it a map instead.

use crate::constants::{
    DEFAULT_DEDUPLICATION_TEMPLATE, DEFAULT_ENGINE_TIMEOUT, DEFAULT_HTTP_TIMEOUT,
    DEFAULT_LINKAGE_TEMPLATE, DEFAULT_MAX_PAGES, DEFAULT_WORK_DIR,
};
use crate::{MatchError, PtmatchResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// Environment keys read by `CoreConfig::from_lookup`.
pub const ENV_WORK_DIR: &str = "PTMATCH_WORK_DIR";
pub const ENV_DELETE_JOB_RESULTS: &str = "PTMATCH_DELETE_JOB_RESULTS";
pub const ENV_DEDUPE_TEMPLATE: &str = "PTMATCH_DEDUPE_TEMPLATE";
pub const ENV_LINKAGE_TEMPLATE: &str = "PTMATCH_LINKAGE_TEMPLATE";
pub const ENV_FULL_URL_FORMAT: &str = "PTMATCH_FULL_URL_FORMAT";
pub const ENV_SOURCE_NAME: &str = "PTMATCH_SOURCE_NAME";
pub const ENV_SOURCE_ENDPOINT: &str = "PTMATCH_SOURCE_ENDPOINT";
pub const ENV_RESPONSE_ENDPOINT: &str = "PTMATCH_RESPONSE_ENDPOINT";
pub const ENV_ENGINE_PROGRAM: &str = "PTMATCH_ENGINE_PROGRAM";
pub const ENV_ENGINE_ARGS: &str = "PTMATCH_ENGINE_ARGS";
pub const ENV_ENGINE_TIMEOUT_SECS: &str = "PTMATCH_ENGINE_TIMEOUT_SECS";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "PTMATCH_HTTP_TIMEOUT_SECS";
pub const ENV_MAX_PAGES: &str = "PTMATCH_MAX_PAGES";
pub const ENV_SERVER_AUTHORIZATIONS: &str = "PTMATCH_SERVER_AUTHORIZATIONS";

const DEFAULT_ENGINE_PROGRAM: &str = "fril";
const DEFAULT_RESPONSE_ENDPOINT: &str = "outbox";

/// Layout of the full identity URL written in the first CSV column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FullUrlFormat {
    /// `{base}/Patient/{id}`
    #[default]
    Simple,
    /// `{base}/Patient/{id}/_history/{versionId}`
    Versioned,
}

impl FromStr for FullUrlFormat {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "versioned" => Ok(Self::Versioned),
            other => Err(MatchError::Configuration(format!(
                "unknown full URL format '{other}' (expected 'simple' or 'versioned')"
            ))),
        }
    }
}

/// How to launch the external match engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_ENGINE_PROGRAM),
            args: Vec::new(),
            timeout: DEFAULT_ENGINE_TIMEOUT,
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    work_dir: PathBuf,
    delete_job_results: bool,
    deduplication_template: Option<String>,
    linkage_template: Option<String>,
    full_url_format: FullUrlFormat,
    source_name: Option<String>,
    source_endpoint: Option<String>,
    response_endpoint: String,
    engine: EngineSettings,
    http_timeout: Duration,
    max_pages: usize,
    server_authorizations: Option<PathBuf>,
}

impl CoreConfig {
    /// Create a new `CoreConfig` with defaults for everything but the work root and the
    /// endpoint results are sent to.
    pub fn new(work_dir: PathBuf, response_endpoint: String) -> PtmatchResult<Self> {
        if response_endpoint.trim().is_empty() {
            return Err(MatchError::Configuration(
                "response_endpoint cannot be empty".into(),
            ));
        }

        Ok(Self {
            work_dir,
            delete_job_results: false,
            deduplication_template: Some(DEFAULT_DEDUPLICATION_TEMPLATE.to_string()),
            linkage_template: Some(DEFAULT_LINKAGE_TEMPLATE.to_string()),
            full_url_format: FullUrlFormat::default(),
            source_name: None,
            source_endpoint: None,
            response_endpoint,
            engine: EngineSettings::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            max_pages: DEFAULT_MAX_PAGES,
            server_authorizations: None,
        })
    }

    /// Resolve configuration from a key lookup (normally the process environment).
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Configuration`] if any value is present but unparseable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PtmatchResult<Self> {
        let work_dir = non_empty(lookup(ENV_WORK_DIR)).unwrap_or_else(|| DEFAULT_WORK_DIR.into());
        let response_endpoint = non_empty(lookup(ENV_RESPONSE_ENDPOINT))
            .unwrap_or_else(|| DEFAULT_RESPONSE_ENDPOINT.into());

        let mut config = Self::new(PathBuf::from(work_dir), response_endpoint)?
            .with_delete_job_results(bool_from_env_value(
                ENV_DELETE_JOB_RESULTS,
                lookup(ENV_DELETE_JOB_RESULTS),
            )?)
            .with_templates(
                template_from_env_value(lookup(ENV_DEDUPE_TEMPLATE), DEFAULT_DEDUPLICATION_TEMPLATE),
                template_from_env_value(lookup(ENV_LINKAGE_TEMPLATE), DEFAULT_LINKAGE_TEMPLATE),
            )
            .with_source(
                non_empty(lookup(ENV_SOURCE_NAME)),
                non_empty(lookup(ENV_SOURCE_ENDPOINT)),
            )
            .with_http_timeout(duration_from_env_value(
                ENV_HTTP_TIMEOUT_SECS,
                lookup(ENV_HTTP_TIMEOUT_SECS),
                DEFAULT_HTTP_TIMEOUT,
            )?);

        if let Some(format) = non_empty(lookup(ENV_FULL_URL_FORMAT)) {
            config = config.with_full_url_format(format.parse()?);
        }

        if let Some(max_pages) = non_empty(lookup(ENV_MAX_PAGES)) {
            let max_pages = max_pages.parse::<usize>().map_err(|e| {
                MatchError::Configuration(format!("{ENV_MAX_PAGES}='{max_pages}': {e}"))
            })?;
            config = config.with_max_pages(max_pages);
        }

        config.engine = EngineSettings {
            program: non_empty(lookup(ENV_ENGINE_PROGRAM))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_PROGRAM)),
            args: args_from_env_value(lookup(ENV_ENGINE_ARGS)),
            timeout: duration_from_env_value(
                ENV_ENGINE_TIMEOUT_SECS,
                lookup(ENV_ENGINE_TIMEOUT_SECS),
                DEFAULT_ENGINE_TIMEOUT,
            )?,
        };

        config.server_authorizations = non_empty(lookup(ENV_SERVER_AUTHORIZATIONS)).map(PathBuf::from);

        Ok(config)
    }

    pub fn with_delete_job_results(mut self, delete: bool) -> Self {
        self.delete_job_results = delete;
        self
    }

    pub fn with_templates(mut self, deduplication: Option<String>, linkage: Option<String>) -> Self {
        self.deduplication_template = deduplication;
        self.linkage_template = linkage;
        self
    }

    pub fn with_full_url_format(mut self, format: FullUrlFormat) -> Self {
        self.full_url_format = format;
        self
    }

    pub fn with_source(mut self, name: Option<String>, endpoint: Option<String>) -> Self {
        self.source_name = name;
        self.source_endpoint = endpoint;
        self
    }

    pub fn with_engine(mut self, engine: EngineSettings) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn delete_job_results(&self) -> bool {
        self.delete_job_results
    }

    pub fn deduplication_template(&self) -> Option<&str> {
        self.deduplication_template.as_deref()
    }

    pub fn linkage_template(&self) -> Option<&str> {
        self.linkage_template.as_deref()
    }

    pub fn full_url_format(&self) -> FullUrlFormat {
        self.full_url_format
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn source_endpoint(&self) -> Option<&str> {
        self.source_endpoint.as_deref()
    }

    pub fn response_endpoint(&self) -> &str {
        &self.response_endpoint
    }

    pub fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Path of the server authorization file, if one was configured.
    pub fn server_authorizations(&self) -> Option<&Path> {
        self.server_authorizations.as_deref()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a boolean flag from an optional string value.
///
/// Missing or blank values are `false`.
pub fn bool_from_env_value(key: &str, value: Option<String>) -> PtmatchResult<bool> {
    match non_empty(value).map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(MatchError::Configuration(format!(
            "{key}='{other}' is not a boolean"
        ))),
    }
}

/// Parse a whole number of seconds from an optional string value.
pub fn duration_from_env_value(
    key: &str,
    value: Option<String>,
    default: Duration,
) -> PtmatchResult<Duration> {
    match non_empty(value) {
        None => Ok(default),
        Some(v) => {
            let secs = v
                .parse::<u64>()
                .map_err(|e| MatchError::Configuration(format!("{key}='{v}': {e}")))?;
            if secs == 0 {
                return Err(MatchError::Configuration(format!(
                    "{key} must be greater than zero"
                )));
            }
            Ok(Duration::from_secs(secs))
        }
    }
}

/// Resolve a template name from an optional string value.
///
/// Unset selects `default`. A value of `none` leaves the mode without a template, so requests
/// in that mode fail with a configuration error.
pub fn template_from_env_value(value: Option<String>, default: &str) -> Option<String> {
    match value.map(|v| v.trim().to_string()) {
        None => Some(default.to_string()),
        Some(v) if v.is_empty() => Some(default.to_string()),
        Some(v) if v.eq_ignore_ascii_case("none") => None,
        Some(v) => Some(v),
    }
}

/// Split engine arguments on whitespace.
pub fn args_from_env_value(value: Option<String>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}
