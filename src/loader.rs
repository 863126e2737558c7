//! Document loading from various sources.
//!
//! Handles loading JSON documents (schemas, mappings, configuration) from
//! files, strings, and HTTP URLs.

use std::path::Path;

use percent_encoding::percent_decode_str;
use serde_json::Value;

use crate::error::ResolveError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a JSON document from a file path.
///
/// # Errors
///
/// Returns `ResolveError::FileNotFound` if the file doesn't exist,
/// or `ResolveError::InvalidJson` if the file isn't valid JSON.
pub fn load_document(path: &Path) -> Result<Value, ResolveError> {
    if !path.exists() {
        return Err(ResolveError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| ResolveError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_document_str(&content)
}

/// Load a JSON document from a string.
///
/// # Errors
///
/// Returns `ResolveError::InvalidJson` if the string isn't valid JSON.
pub fn load_document_str(content: &str) -> Result<Value, ResolveError> {
    serde_json::from_str(content).map_err(|source| ResolveError::InvalidJson { source })
}

/// Load a JSON document from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `ResolveError::NetworkError` if the request fails or the response
/// isn't valid JSON.
#[cfg(feature = "remote")]
pub fn load_document_url(url: &str) -> Result<Value, ResolveError> {
    let network_error = |source| ResolveError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network_error)?;

    client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.json())
        .map_err(network_error)
}

/// Navigate a JSON Pointer fragment (e.g., "#/definitions/foo" or "#/items/0").
///
/// The leading `#` is optional. An empty fragment designates the whole
/// document. Segments are percent-decoded first, since fragments taken from
/// absolute URIs come back encoded (`my%20field`).
pub fn navigate_fragment<'a>(document: &'a Value, fragment: &str) -> Result<&'a Value, ResolveError> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Ok(document);
    }

    let not_found = || ResolveError::FragmentNotFound {
        fragment: fragment.to_string(),
    };

    let mut current = document;
    for part in path.split('/') {
        let decoded = percent_decode_str(part)
            .decode_utf8()
            .map_err(|_| not_found())?;
        // Unescape JSON Pointer encoding (~1 = /, ~0 = ~)
        let key = decoded.replace("~1", "/").replace("~0", "~");
        current = match current {
            Value::Object(map) => map.get(&key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(not_found)?;
    }
    Ok(current)
}
