//! Process-wide service state shared by every front-end handler.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use wayback_archiver::{Broker, HttpBroker};
use wayback_shared::{AppConfig, Result, SlotRegistry, WaybackError, read_secret};

use crate::dispatch::{Dispatcher, Policy};
use crate::pipeline::Pipeline;
use crate::publish::Publishers;

/// Everything a serve loop needs, constructed once at startup.
#[derive(Clone)]
pub struct ServiceContext {
    pub config: Arc<AppConfig>,
    pub registry: Arc<SlotRegistry>,
    pub pipeline: Pipeline,
    /// Tracks in-flight pipeline runs and detached publishes.
    pub tracker: TaskTracker,
    /// Cancelled when the process is asked to stop.
    pub cancel: CancellationToken,
}

impl ServiceContext {
    /// Build the HTTP broker from `config` and wire up the pipeline.
    pub fn new(config: AppConfig, registry: SlotRegistry, policy: Policy) -> Result<Self> {
        let token = read_secret(&config.backends.telegraph_token_env);
        let broker = HttpBroker::new(config.backends.clone())?.with_telegraph_token(token);
        Self::with_broker(config, registry, policy, Arc::new(broker))
    }

    /// Like [`ServiceContext::new`] with an explicit broker.
    pub fn with_broker(
        config: AppConfig,
        registry: SlotRegistry,
        policy: Policy,
        broker: Arc<dyn Broker>,
    ) -> Result<Self> {
        if registry.is_empty() {
            return Err(WaybackError::startup("no archival slot is enabled"));
        }
        let enabled: Vec<String> = registry.enabled().map(|s| s.slot.to_string()).collect();
        debug!(?enabled, ?policy, "building service context");

        let registry = Arc::new(registry);
        let tracker = TaskTracker::new();
        let publishers = Publishers::from_config(&config.publish)?;
        let dispatcher = Arc::new(Dispatcher::new(broker, Arc::clone(&registry)));
        let pipeline = Pipeline::new(
            dispatcher,
            policy,
            Duration::from_secs(config.defaults.deadline_secs),
        )
        .with_publishers(publishers)
        .with_tracker(tracker.clone());

        Ok(Self {
            config: Arc::new(config),
            registry,
            pipeline,
            tracker,
            cancel: CancellationToken::new(),
        })
    }

    /// Stop every serve loop and wait for tracked work to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        info!(pending = self.tracker.len(), "draining in-flight requests");
        self.tracker.wait().await;
        info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::State;
    use crate::testing::{RecordingSink, Script, ScriptedBroker};
    use wayback_shared::{Slot, SlotInfo};

    fn broker() -> Arc<dyn Broker> {
        Arc::new(ScriptedBroker::new([(Slot::Ia, Script::Archive(Duration::from_millis(5)))]))
    }

    #[test]
    fn empty_registry_is_a_startup_error() {
        let registry = SlotRegistry::new(Slot::ALL.map(|s| SlotInfo::with_defaults(s, false)));
        let err = ServiceContext::with_broker(AppConfig::default(), registry, Policy::Tolerant, broker())
            .err()
            .unwrap();
        assert!(matches!(err, WaybackError::Startup { .. }));
    }

    #[tokio::test]
    async fn shutdown_waits_for_tracked_runs() {
        let config = AppConfig::default();
        let registry = SlotRegistry::from(&config);
        let ctx = ServiceContext::with_broker(config, registry, Policy::Tolerant, broker()).unwrap();

        let run_ctx = ctx.clone();
        let handle = ctx.tracker.spawn(async move {
            run_ctx
                .pipeline
                .run("http://a.example", &RecordingSink::default())
                .await
                .state()
        });

        ctx.shutdown().await;
        assert!(ctx.cancel.is_cancelled());
        assert_eq!(handle.await.unwrap(), State::Done);
    }
}
