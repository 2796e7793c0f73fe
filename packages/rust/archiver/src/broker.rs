//! HTTP adapter implementing every [`Broker`] capability.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use secrecy::SecretString;
use tracing::{debug, info, instrument, warn};

use wayback_shared::{BackendsConfig, Mapping, Result, Slot, WaybackError};

use crate::Broker;
use crate::backends::{ia, ip, is, ph};

/// Maximum number of redirects followed per backend request.
const MAX_REDIRECTS: usize = 10;

/// One HTTP client shared by all four backends.
pub struct HttpBroker {
    client: Client,
    config: BackendsConfig,
    telegraph_token: Option<SecretString>,
}

impl std::fmt::Debug for HttpBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBroker")
            .field("config", &self.config)
            .field("telegraph_token", &self.telegraph_token.is_some())
            .finish()
    }
}

impl HttpBroker {
    /// Create a broker for the given backend endpoints.
    pub fn new(config: BackendsConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WaybackError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            telegraph_token: None,
        })
    }

    /// Attach the Telegraph access token; without it the `ph` slot always fails.
    pub fn with_telegraph_token(mut self, token: Option<SecretString>) -> Self {
        self.telegraph_token = token;
        self
    }

    async fn submit(&self, slot: Slot, url: &str) -> Result<String> {
        match slot {
            Slot::Ia => ia::save(&self.client, &self.config.ia_endpoint, url).await,
            Slot::Is => is::submit(&self.client, &self.config.is_endpoint, url).await,
            Slot::Ip => {
                ip::add(
                    &self.client,
                    &self.config.ipfs_api,
                    &self.config.ipfs_gateway,
                    url,
                )
                .await
            }
            Slot::Ph => {
                let token = self.telegraph_token.as_ref().ok_or_else(|| {
                    WaybackError::backend(Slot::Ph, "telegraph access token not configured")
                })?;
                ph::create_page(&self.client, &self.config.telegraph_endpoint, token, url).await
            }
        }
    }

    /// Submit every URL to one backend concurrently and keep the successes.
    #[instrument(skip_all, fields(slot = %slot, urls = urls.len()))]
    async fn each(&self, slot: Slot, urls: &[String]) -> Result<Mapping> {
        let outcomes = join_all(urls.iter().map(|url| async move {
            debug!(%url, "submitting");
            (url, self.submit(slot, url).await)
        }))
        .await;

        let mut mapping = Mapping::new();
        let mut last_error = None;
        for (url, outcome) in outcomes {
            match outcome {
                Ok(archived) => {
                    mapping.insert(url.clone(), archived);
                }
                Err(e) => {
                    warn!(%url, error = %e, "archive failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if mapping.is_empty() => Err(e),
            _ => {
                info!(archived = mapping.len(), "backend finished");
                Ok(mapping)
            }
        }
    }
}

#[async_trait]
impl Broker for HttpBroker {
    async fn ia(&self, urls: &[String]) -> Result<Mapping> {
        self.each(Slot::Ia, urls).await
    }

    async fn is(&self, urls: &[String]) -> Result<Mapping> {
        self.each(Slot::Is, urls).await
    }

    async fn ip(&self, urls: &[String]) -> Result<Mapping> {
        self.each(Slot::Ip, urls).await
    }

    async fn ph(&self, urls: &[String]) -> Result<Mapping> {
        self.each(Slot::Ph, urls).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> BackendsConfig {
        BackendsConfig {
            ia_endpoint: server.uri(),
            is_endpoint: server.uri(),
            ipfs_api: server.uri(),
            ipfs_gateway: "https://ipfs.example".into(),
            telegraph_endpoint: server.uri(),
            timeout_secs: 5,
            ..BackendsConfig::default()
        }
    }

    #[tokio::test]
    async fn ia_keeps_successes_and_drops_failures() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path_regex("^/save/.*good"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Location", "/web/20240101000000/https://good.example/"),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path_regex("^/save/.*bad"))
            .respond_with(ResponseTemplate::new(523))
            .mount(&server)
            .await;

        let broker = HttpBroker::new(config_for(&server)).unwrap();
        let urls = vec![
            "https://good.example/".to_string(),
            "https://bad.example/".to_string(),
        ];
        let mapping = broker.ia(&urls).await.unwrap();

        assert_eq!(mapping.len(), 1);
        assert_eq!(
            mapping["https://good.example/"],
            format!("{}/web/20240101000000/https://good.example/", server.uri())
        );
    }

    #[tokio::test]
    async fn slot_fails_when_every_url_fails() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/submit/"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let broker = HttpBroker::new(config_for(&server)).unwrap();
        let result = broker.is(&["https://a.example/".to_string()]).await;

        assert!(matches!(
            result,
            Err(WaybackError::Backend { slot: Slot::Is, .. })
        ));
    }

    #[tokio::test]
    async fn ph_without_token_fails() {
        let server = MockServer::start().await;
        let broker = HttpBroker::new(config_for(&server)).unwrap();

        let err = broker
            .ph(&["https://a.example/".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access token"));
    }

    #[tokio::test]
    async fn no_urls_is_an_empty_mapping() {
        let server = MockServer::start().await;
        let broker = HttpBroker::new(config_for(&server)).unwrap();

        let mapping = broker.ia(&[]).await.unwrap();
        assert!(mapping.is_empty());
    }
}
