//! Outbound fan-out of result sets to other configured channels.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use wayback_shared::{PublishConfig, Result, ResultSet, WaybackError};

/// Timeout for a single publish request.
const PUBLISH_TIMEOUT_SECS: u64 = 30;

/// The channel a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Cli,
    Web,
    Matrix,
}

/// A destination that receives every completed result set.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Human-readable publisher name for tracing.
    fn name(&self) -> &str;

    /// Deliver `results`, which originated from `origin`.
    async fn publish(&self, results: &ResultSet, origin: Channel) -> Result<()>;
}

/// All configured publishers.
#[derive(Clone, Default)]
pub struct Publishers {
    targets: Vec<Arc<dyn Publisher>>,
}

impl Publishers {
    /// Build the webhook publishers named in `[publish]`.
    pub fn from_config(config: &PublishConfig) -> Result<Self> {
        let mut publishers = Self::default();
        if config.webhooks.is_empty() {
            return Ok(publishers);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(PUBLISH_TIMEOUT_SECS))
            .build()
            .map_err(|e| WaybackError::Network(format!("failed to build HTTP client: {e}")))?;

        for raw in &config.webhooks {
            let url = Url::parse(raw)
                .map_err(|e| WaybackError::config(format!("invalid webhook URL '{raw}': {e}")))?;
            publishers = publishers.with(Arc::new(WebhookPublisher::new(client.clone(), url)));
        }
        Ok(publishers)
    }

    pub fn with(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.targets.push(publisher);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Publish to every target concurrently. Failures are logged, never
    /// propagated; returns how many targets failed.
    pub async fn publish_all(&self, results: &ResultSet, origin: Channel) -> usize {
        let outcomes = join_all(self.targets.iter().map(|target| async move {
            let outcome = target.publish(results, origin).await;
            (target.name().to_string(), outcome)
        }))
        .await;

        let mut failed = 0;
        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => debug!(publisher = %name, "published"),
                Err(e) => {
                    warn!(publisher = %name, error = %e, "publish failed");
                    failed += 1;
                }
            }
        }
        failed
    }
}

/// Body POSTed to each webhook.
#[derive(Serialize)]
struct WebhookPayload<'a> {
    channel: Channel,
    published_at: String,
    records: &'a ResultSet,
}

/// POSTs every result set as JSON to one URL.
pub struct WebhookPublisher {
    client: Client,
    url: Url,
    name: String,
}

impl WebhookPublisher {
    pub fn new(client: Client, url: Url) -> Self {
        let name = format!("webhook:{}", url.host_str().unwrap_or("unknown"));
        Self { client, url, name }
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, results: &ResultSet, origin: Channel) -> Result<()> {
        let payload = WebhookPayload {
            channel: origin,
            published_at: Utc::now().to_rfc3339(),
            records: results,
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| WaybackError::Transport(format!("{}: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WaybackError::Transport(format!("{}: HTTP {status}", self.url)));
        }
        Ok(())
    }
}
