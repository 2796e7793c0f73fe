//! Anonymized web front-end for Wayback.
//!
//! Serves a landing page and the `/w` archive endpoint with axum, optionally
//! published as a Tor onion service.

pub mod onion;
mod routes;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use wayback_core::ServiceContext;
use wayback_shared::{Result, WaybackError};

pub use onion::OnionService;
pub use routes::router;

/// Bind `listen` and serve until the context is cancelled.
///
/// Binding failures and onion registration failures are startup errors;
/// in-flight requests finish before this returns.
#[instrument(skip_all, fields(%listen))]
pub async fn serve(ctx: ServiceContext, listen: &str) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| WaybackError::startup(format!("failed to bind {listen}: {e}")))?;
    let local: SocketAddr = listener
        .local_addr()
        .map_err(|e| WaybackError::startup(format!("failed to read bound address: {e}")))?;

    let onion = if ctx.config.web.onion.enabled {
        let service = OnionService::register(&ctx.config.web.onion, local).await?;
        info!(url = %format!("http://{}", service.hostname()), "reachable over Tor");
        Some(service)
    } else {
        None
    };

    info!(addr = %local, "web front-end listening");
    let cancel = ctx.cancel.clone();
    let served = axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| WaybackError::Transport(format!("web server failed: {e}")));

    if let Some(service) = onion {
        if let Err(e) = service.close().await {
            warn!(error = %e, "failed to remove onion service");
        }
    }
    info!("web front-end stopped");
    served
}
