//! Bearer tokens for remote FHIR servers.
//!
//! Token acquisition (the OAuth2 dance) happens elsewhere. The pipeline only asks "which token,
//! if any, goes with this server base?" through [`TokenProvider`].
//!
//! [`ServerAuthorizationStore`] answers that question from a static file of server
//! authorizations. The file is YAML, so JSON exports are accepted as-is.

use crate::{MatchError, PtmatchResult};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

/// Looks up the bearer token for a server base URL.
pub trait TokenProvider: Send + Sync {
    /// Token to send to `server_base`, or `None` to call it unauthenticated.
    fn bearer_token(&self, server_base: &str) -> Option<String>;
}

/// One authorized server.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerAuthorization {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    pub server_url: String,

    pub access_token: String,

    #[serde(default)]
    pub token_type: Option<String>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub id_token: Option<String>,

    #[serde(default)]
    pub scope: Option<String>,
}

impl ServerAuthorization {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Static, file-backed set of server authorizations.
#[derive(Clone, Debug, Default)]
pub struct ServerAuthorizationStore {
    authorizations: Vec<ServerAuthorization>,
}

impl ServerAuthorizationStore {
    pub fn new(authorizations: Vec<ServerAuthorization>) -> Self {
        Self { authorizations }
    }

    /// Load authorizations from a YAML (or JSON) list.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Io`] if the file cannot be read and
    /// [`MatchError::Configuration`] if it does not match the expected shape.
    pub fn load(path: &Path) -> PtmatchResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse authorizations from YAML (or JSON) text.
    ///
    /// This uses `serde_path_to_error` to surface a best-effort "path" (e.g. `[1].serverUrl`)
    /// to the failing field.
    pub fn parse(text: &str) -> PtmatchResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(text);
        let authorizations =
            serde_path_to_error::deserialize::<_, Vec<ServerAuthorization>>(deserializer).map_err(
                |err| {
                    let path = err.path().to_string();
                    MatchError::Configuration(format!(
                        "server authorization file mismatch at {path}: {}",
                        err.into_inner()
                    ))
                },
            )?;
        Ok(Self { authorizations })
    }

    pub fn len(&self) -> usize {
        self.authorizations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorizations.is_empty()
    }

    /// Authorization registered for `server_base`, ignoring a trailing slash on either side.
    pub fn find(&self, server_base: &str) -> Option<&ServerAuthorization> {
        let wanted = server_base.trim_end_matches('/');
        if wanted.is_empty() {
            return None;
        }
        self.authorizations
            .iter()
            .find(|sa| sa.server_url.trim_end_matches('/') == wanted)
    }
}

impl TokenProvider for ServerAuthorizationStore {
    fn bearer_token(&self, server_base: &str) -> Option<String> {
        let authorization = self.find(server_base)?;
        if authorization.is_expired(Utc::now()) {
            tracing::warn!(
                "access token for {} expired at {:?}; calling without it",
                authorization.server_url,
                authorization.expires_at
            );
            return None;
        }
        Some(authorization.access_token.clone())
    }
}
