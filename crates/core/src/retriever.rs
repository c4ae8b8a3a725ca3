//! Paginated retrieval of search results.
//!
//! [`Retriever`] runs one search against a remote FHIR server and follows `next` links until
//! the result set is exhausted. Each page is handed to a [`PageSink`] as soon as it arrives, so
//! memory use is bounded by the page size rather than the result size.
//!
//! The bearer token for the server is resolved once per retrieval and passed to every call.
//! Nothing is registered on a shared client, so there is nothing to unregister when a call
//! fails part-way.

use crate::auth::TokenProvider;
use crate::constants::FHIR_JSON_MEDIA_TYPE;
use crate::search::encode_query;
use crate::{MatchError, PtmatchResult};
use async_trait::async_trait;
use fhir::{Bundle, Resource};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use std::time::Duration;

/// Executes one HTTP search call and decodes the returned bundle.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// `GET url`, authenticating with `bearer_token` for this call only.
    ///
    /// # Errors
    ///
    /// - [`MatchError::RemoteServer`] on a non-success status.
    /// - [`MatchError::Retrieval`] on transport or decode failure.
    async fn fetch(&self, url: &str, bearer_token: Option<&str>) -> PtmatchResult<Bundle>;
}

/// Receives pages of retrieved resources.
pub trait PageSink: Send {
    /// Consume one page, which may be empty.
    ///
    /// Returns the number of records accepted from the page.
    fn write_page(&mut self, resources: &[Resource]) -> PtmatchResult<usize>;
}

// ============================================================================
// Retriever
// ============================================================================

/// Runs a paginated search and streams pages into a sink.
pub struct Retriever<'a> {
    client: &'a dyn SearchClient,
    tokens: &'a dyn TokenProvider,
    max_pages: usize,
}

impl<'a> Retriever<'a> {
    pub fn new(client: &'a dyn SearchClient, tokens: &'a dyn TokenProvider, max_pages: usize) -> Self {
        Self {
            client,
            tokens,
            max_pages: max_pages.max(1),
        }
    }

    /// Retrieve every page of `search_url` into `sink`.
    ///
    /// # Arguments
    ///
    /// * `search_url` - Unencoded search URL; query values are encoded before the first call.
    /// * `server_base` - Base of the server, used to look up the bearer token.
    /// * `sink` - Destination for each page.
    ///
    /// # Returns
    ///
    /// Total number of records the sink accepted across all pages.
    ///
    /// # Errors
    ///
    /// Propagates client and sink errors. Returns [`MatchError::Retrieval`] if a `next` link
    /// cannot be resolved or more than the configured number of pages is returned.
    pub async fn retrieve(
        &self,
        search_url: &str,
        server_base: &str,
        sink: &mut dyn PageSink,
    ) -> PtmatchResult<u64> {
        let mut url = encode_query(search_url);
        tracing::info!(
            "retrieving, server base: {}  search url: {}  encoded: {}",
            server_base,
            search_url,
            url
        );

        let token = self.tokens.bearer_token(server_base);
        if token.is_some() {
            tracing::debug!("using bearer token for {}", server_base);
        }

        let mut total: u64 = 0;
        let mut pages = 0usize;

        loop {
            let page = self.client.fetch(&url, token.as_deref()).await?;
            pages += 1;

            let resources = split_page(&page);
            let accepted = sink.write_page(&resources)?;
            total += accepted as u64;
            tracing::debug!("page {} of {}: {} records", pages, search_url, accepted);

            let Some(next) = page.next_link() else {
                break;
            };

            if pages >= self.max_pages {
                return Err(MatchError::Retrieval(format!(
                    "search exceeded {} pages: {}",
                    self.max_pages, search_url
                )));
            }

            url = resolve_link(&url, next)?;
        }

        tracing::info!("retrieved {} records in {} pages", total, pages);
        Ok(total)
    }
}

/// Resources of a page, skipping entries that carry none.
fn split_page(page: &Bundle) -> Vec<Resource> {
    page.entry
        .iter()
        .filter_map(|entry| match &entry.resource {
            Some(resource) => Some(resource.clone()),
            None => {
                tracing::warn!(
                    "entry does not have a resource, fullUrl: {}",
                    entry.full_url.as_deref().unwrap_or("<none>")
                );
                None
            }
        })
        .collect()
}

/// Resolve a possibly relative `next` link against the URL of the current page.
fn resolve_link(current: &str, next: &str) -> PtmatchResult<String> {
    let base = url::Url::parse(current)
        .map_err(|e| MatchError::Retrieval(format!("invalid page url '{current}': {e}")))?;
    base.join(next)
        .map(String::from)
        .map_err(|e| MatchError::Retrieval(format!("invalid next link '{next}': {e}")))
}

// ============================================================================
// HTTP client
// ============================================================================

/// [`SearchClient`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpSearchClient {
    http_client: reqwest::Client,
}

impl HttpSearchClient {
    /// Create a client whose calls time out after `timeout`.
    pub fn new(timeout: Duration) -> PtmatchResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("ptmatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| MatchError::Configuration(format!("unable to build HTTP client: {e}")))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn fetch(&self, url: &str, bearer_token: Option<&str>) -> PtmatchResult<Bundle> {
        tracing::debug!(url = %url, "searching remote server");

        let mut request = self
            .http_client
            .get(url)
            .header(ACCEPT, FHIR_JSON_MEDIA_TYPE);
        if let Some(token) = bearer_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| MatchError::Retrieval(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MatchError::RemoteServer {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .map(|reason| format!("{reason} {message}").trim().to_string())
                    .unwrap_or(message),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| MatchError::Retrieval(e.to_string()))?;
        let value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| MatchError::Retrieval(format!("invalid search response: {e}")))?;

        Bundle::from_value(value)
            .map_err(|e| MatchError::Retrieval(format!("invalid search response: {e}")))
    }
}
