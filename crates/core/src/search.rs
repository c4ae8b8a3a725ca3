//! Search URL construction.
//!
//! A record-match request describes each record set as a nested `searchExpression`
//! Parameters resource: one `resourceUrl` plus any number of `name=value` filters. This module
//! turns that into the query URL sent to the remote server, and derives the server base used
//! to build full identity URLs and to look up bearer tokens.

use crate::constants::{PARAM_RESOURCE_URL, PARAM_SEARCH_EXPRESSION};
use fhir::{Parameter, Parameters};
use url::form_urlencoded;

/// Punctuation accepted as raw query-value characters by the historical encoder.
const DOCUMENTED_VALUE_PUNCTUATION: &str = "-_+:#|^.,<>;%*()/[]{}\\ ";

/// Build the search URL for one parameter group.
///
/// Returns `None` (after logging) when the group has no `searchExpression` or the expression
/// has no `resourceUrl`.
pub fn search_url_for_group(group: &Parameters) -> Option<String> {
    let Some(expression) = group
        .find_by_name(PARAM_SEARCH_EXPRESSION)
        .and_then(Parameter::nested_parameters)
    else {
        tracing::warn!("unable to find search expression in message parameters");
        return None;
    };
    build_search_url(expression)
}

/// `resourceUrl + "?" + filters.join("&")` for a search expression.
///
/// Filters whose value cannot be rendered as a string are skipped.
pub fn build_search_url(expression: &Parameters) -> Option<String> {
    let mut resource_url = None;
    let mut filters = Vec::new();

    for param in &expression.parameter {
        let Some(value) = param.value_as_string() else {
            tracing::error!("null value for search expression parameter, {}", param.name);
            continue;
        };

        if param.name == PARAM_RESOURCE_URL {
            resource_url = Some(value);
        } else {
            filters.push(format!("{}={}", param.name, value));
        }
    }

    let Some(resource_url) = resource_url else {
        tracing::warn!("required parameter, resourceUrl, is missing from record-match request");
        return None;
    };

    let search_url = format!("{}?{}", resource_url, filters.join("&"));
    tracing::info!("search url: {}", search_url);
    Some(search_url)
}

/// The `resourceUrl` of a parameter group's search expression.
pub fn resource_url_for_group(group: &Parameters) -> Option<String> {
    group
        .find_by_name(PARAM_SEARCH_EXPRESSION)
        .and_then(Parameter::nested_parameters)
        .and_then(|expr| expr.find_by_name(PARAM_RESOURCE_URL))
        .and_then(Parameter::value_as_string)
}

/// Server base of a resource URL, always ending in `/`.
///
/// The base is everything before the last occurrence of `resource_type`
/// (`http://h/fhir/Patient` gives `http://h/fhir/`). When the resource type does not appear
/// after the first character the whole URL is treated as the base.
pub fn server_base(resource_type: &str, resource_url: &str) -> String {
    let base = match resource_url.rfind(resource_type) {
        Some(pos) if pos > 0 => &resource_url[..pos],
        _ => {
            tracing::warn!(
                "resource type {} not found in {}; using it as the server base",
                resource_type,
                resource_url
            );
            resource_url
        }
    };

    if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    }
}

/// Percent-encode the value of each `name=value` pair in a URL's query string.
///
/// Names and the `&`/`=` separators are left untouched; values are form-encoded (space becomes
/// `+`). Pairs with an invalid name, no `=`, or an empty value are dropped. Values containing
/// characters outside the historical raw set are still encoded rather than dropped.
pub fn encode_query(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    let mut pairs = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let Some((name, value)) = pair.split_once('=') else {
            tracing::warn!("dropping query parameter without a value: {}", pair);
            continue;
        };

        if !is_valid_name(name) {
            tracing::warn!("dropping query parameter with invalid name: {}", name);
            continue;
        }

        if value.is_empty() {
            tracing::warn!("dropping query parameter with empty value: {}", name);
            continue;
        }

        if !value.chars().all(is_documented_value_char) {
            tracing::debug!(
                "query value for {} has characters outside the documented set; encoding anyway",
                name
            );
        }

        let encoded: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
        pairs.push(format!("{name}={encoded}"));
    }

    format!("{}?{}", base, pairs.join("&"))
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn is_documented_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || DOCUMENTED_VALUE_PUNCTUATION.contains(c)
}
