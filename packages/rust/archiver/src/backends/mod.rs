//! Per-backend submit logic.
//!
//! Each module turns one original URL into one archived URL, or fails with a
//! [`WaybackError::Backend`] tagged with its slot.

pub(crate) mod ia;
pub(crate) mod ip;
pub(crate) mod is;
pub(crate) mod ph;

use reqwest::Response;
use reqwest::header::HeaderName;
use url::Url;
use wayback_shared::{Result, Slot, WaybackError};

/// Map a transport failure to a slot-tagged backend error.
pub(crate) fn request_failed(slot: Slot, url: &str, e: reqwest::Error) -> WaybackError {
    WaybackError::backend(slot, format!("{url}: {e}"))
}

/// Reject non-2xx responses.
pub(crate) fn ensure_success(slot: Slot, url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(WaybackError::backend(slot, format!("{url}: HTTP {status}")))
    }
}

/// A header value as a trimmed, non-empty string.
pub(crate) fn header(response: &Response, name: HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve a possibly relative location against the backend's endpoint.
pub(crate) fn resolve(endpoint: &str, location: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(location) {
        return Some(absolute.to_string());
    }
    let base = Url::parse(&format!("{}/", endpoint.trim_end_matches('/'))).ok()?;
    base.join(location).ok().map(|u| u.to_string())
}
