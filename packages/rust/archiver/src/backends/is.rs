//! archive.today (`/submit/`).

use reqwest::Client;
use reqwest::header::{LOCATION, REFRESH};
use tracing::instrument;
use wayback_shared::{Result, Slot, WaybackError};

use super::{ensure_success, header, request_failed, resolve};

/// Submit `url` to archive.today and return the snapshot URL.
///
/// Depending on mirror and load the snapshot shows up as a `Refresh`
/// header, a `Location` header, or as the page the submit redirected to.
#[instrument(skip(client, endpoint))]
pub(crate) async fn submit(client: &Client, endpoint: &str, url: &str) -> Result<String> {
    let endpoint = endpoint.trim_end_matches('/');
    let submit_url = format!("{endpoint}/submit/");
    let response = client
        .post(&submit_url)
        .form(&[("url", url), ("anyway", "1")])
        .send()
        .await
        .map_err(|e| request_failed(Slot::Is, url, e))?;
    let response = ensure_success(Slot::Is, url, response)?;

    if let Some(target) = header(&response, REFRESH).and_then(|v| refresh_target(&v)) {
        return resolve_or_fail(endpoint, url, &target);
    }
    if let Some(location) = header(&response, LOCATION) {
        return resolve_or_fail(endpoint, url, &location);
    }

    let landed = response.url();
    if landed.path() != "/submit/" {
        return Ok(landed.to_string());
    }

    Err(WaybackError::backend(
        Slot::Is,
        format!("{url}: no snapshot location in response"),
    ))
}

fn resolve_or_fail(endpoint: &str, url: &str, location: &str) -> Result<String> {
    resolve(endpoint, location).ok_or_else(|| {
        WaybackError::backend(Slot::Is, format!("{url}: bad snapshot location {location}"))
    })
}

/// Extract the target of a `Refresh: 0;url=...` header.
fn refresh_target(value: &str) -> Option<String> {
    let lower = value.to_ascii_lowercase();
    let start = lower.find("url=")? + "url=".len();
    let target = value[start..].trim().trim_matches(|c| c == '\'' || c == '"');
    (!target.is_empty()).then(|| target.to_string())
}
