//! IPFS: fetch the page and add it to a node (`/api/v0/add`).

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, instrument};
use wayback_shared::{Result, Slot, WaybackError};

use super::{ensure_success, request_failed};

/// Response of `/api/v0/add`.
#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// Store the current content of `url` on IPFS and return its gateway link.
#[instrument(skip(client, api, gateway))]
pub(crate) async fn add(client: &Client, api: &str, gateway: &str, url: &str) -> Result<String> {
    let page = client
        .get(url)
        .send()
        .await
        .map_err(|e| request_failed(Slot::Ip, url, e))?;
    let page = ensure_success(Slot::Ip, url, page)?;
    let body = page
        .bytes()
        .await
        .map_err(|e| request_failed(Slot::Ip, url, e))?;
    debug!(bytes = body.len(), "page fetched");

    let form = Form::new().part("file", Part::bytes(body.to_vec()).file_name("index.html"));
    let api = api.trim_end_matches('/');
    let response = client
        .post(format!("{api}/api/v0/add?pin=true"))
        .multipart(form)
        .send()
        .await
        .map_err(|e| request_failed(Slot::Ip, url, e))?;
    let response = ensure_success(Slot::Ip, url, response)?;

    let added: AddResponse = response.json().await.map_err(|e| {
        WaybackError::backend(Slot::Ip, format!("{url}: unexpected add response: {e}"))
    })?;
    if added.hash.is_empty() {
        return Err(WaybackError::backend(Slot::Ip, format!("{url}: empty content hash")));
    }

    Ok(format!("{}/ipfs/{}", gateway.trim_end_matches('/'), added.hash))
}
