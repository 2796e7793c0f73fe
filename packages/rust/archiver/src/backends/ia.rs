//! Internet Archive Wayback Machine (`/save/<url>`).

use reqwest::Client;
use reqwest::header::CONTENT_LOCATION;
use tracing::{debug, instrument};
use wayback_shared::{Result, Slot, WaybackError};

use super::{ensure_success, header, request_failed, resolve};

/// Ask the Wayback Machine to capture `url` and return the snapshot URL.
///
/// The snapshot location comes from `Content-Location`; when that header is
/// missing, the redirected-to `/web/...` URL is used instead.
#[instrument(skip(client, endpoint))]
pub(crate) async fn save(client: &Client, endpoint: &str, url: &str) -> Result<String> {
    let endpoint = endpoint.trim_end_matches('/');
    let response = client
        .get(format!("{endpoint}/save/{url}"))
        .send()
        .await
        .map_err(|e| request_failed(Slot::Ia, url, e))?;
    let response = ensure_success(Slot::Ia, url, response)?;

    if let Some(location) = header(&response, CONTENT_LOCATION) {
        debug!(%location, "snapshot location");
        return resolve(endpoint, &location).ok_or_else(|| {
            WaybackError::backend(Slot::Ia, format!("{url}: bad snapshot location {location}"))
        });
    }

    let landed = response.url();
    if landed.path().starts_with("/web/") {
        return Ok(landed.to_string());
    }

    Err(WaybackError::backend(
        Slot::Ia,
        format!("{url}: no snapshot location in response"),
    ))
}
