//! Telegraph (`/createPage`).

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::instrument;
use url::Url;
use wayback_shared::{Result, Slot, WaybackError};

use super::{ensure_success, request_failed};

/// Telegraph API envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<PageResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageResult {
    url: String,
}

/// Publish a permanent Telegraph page pointing at `url`.
#[instrument(skip(client, endpoint, token))]
pub(crate) async fn create_page(
    client: &Client,
    endpoint: &str,
    token: &SecretString,
    url: &str,
) -> Result<String> {
    let title = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string());

    let payload = serde_json::json!({
        "access_token": token.expose_secret(),
        "title": title,
        "content": [{
            "tag": "p",
            "children": [{
                "tag": "a",
                "attrs": { "href": url },
                "children": [url],
            }],
        }],
        "return_content": false,
    });

    let endpoint = endpoint.trim_end_matches('/');
    let response = client
        .post(format!("{endpoint}/createPage"))
        .json(&payload)
        .send()
        .await
        .map_err(|e| request_failed(Slot::Ph, url, e))?;
    let response = ensure_success(Slot::Ph, url, response)?;

    let body: ApiResponse = response.json().await.map_err(|e| {
        WaybackError::backend(Slot::Ph, format!("{url}: unexpected response: {e}"))
    })?;

    match body {
        ApiResponse {
            ok: true,
            result: Some(page),
            ..
        } => Ok(page.url),
        ApiResponse { error, .. } => Err(WaybackError::backend(
            Slot::Ph,
            format!("{url}: {}", error.unwrap_or_else(|| "unknown error".into())),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn returns_page_url() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/createPage"))
            .and(body_partial_json(serde_json::json!({
                "access_token": "tok",
                "title": "a.example"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": { "path": "a-example-01-01", "url": "https://telegra.ph/a-example-01-01" }
            })))
            .mount(&server)
            .await;

        let client = Client::new();
        let token = SecretString::new("tok".into());
        let archived = create_page(&client, &server.uri(), &token, "https://a.example/post")
            .await
            .unwrap();
        assert_eq!(archived, "https://telegra.ph/a-example-01-01");
    }

    #[tokio::test]
    async fn api_error_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/createPage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "ACCESS_TOKEN_INVALID"
            })))
            .mount(&server)
            .await;

        let client = Client::new();
        let token = SecretString::new("bad".into());
        let err = create_page(&client, &server.uri(), &token, "https://a.example/")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ACCESS_TOKEN_INVALID"));
    }
}
