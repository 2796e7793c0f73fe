//! The message pipeline every front-end drives:
//! text → extract → dispatch → aggregate → render → publish → acknowledge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use wayback_shared::{FlattenedEntry, Result, ResultSet, WaybackError};

use crate::aggregate::flatten;
use crate::dispatch::{Dispatcher, Policy};
use crate::extract::extract_urls;
use crate::publish::{Channel, Publishers};
use crate::render::notice_entries;

/// Pipeline states, in the order a successful run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Received,
    NoUrl,
    Extracted,
    Dispatched,
    Aggregated,
    Rendered,
    Published,
    Acknowledged,
    Done,
    Failed,
}

/// What a sink is asked to show for one run.
#[derive(Debug)]
pub enum Reply<'a> {
    /// The text contained no URL.
    NoUrl { text: &'a str },
    /// Dispatch failed or produced nothing usable.
    Failed {
        text: &'a str,
        error: &'a WaybackError,
    },
    /// Archival finished with at least one archived URL.
    Archived {
        results: &'a ResultSet,
        entries: &'a [FlattenedEntry],
    },
}

impl Reply<'_> {
    /// Entries to show for this reply; notices become a single slot-less entry.
    pub fn entries(&self) -> Vec<FlattenedEntry> {
        match self {
            Reply::NoUrl { text } => notice_entries(text, &WaybackError::NoUrl.to_string()),
            Reply::Failed { text, error } => notice_entries(text, &error.to_string()),
            Reply::Archived { entries, .. } => entries.to_vec(),
        }
    }
}

/// The channel-specific end of a run: renders replies and acknowledges the
/// inbound message.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Channel the request arrived on, used to tag published results.
    fn channel(&self) -> Channel;

    /// Build and deliver the channel output for `reply`.
    async fn render(&self, reply: &Reply<'_>) -> Result<()>;

    /// Best-effort feedback on the source message (redact, mark read).
    async fn acknowledge(&self, _reply: &Reply<'_>) -> Result<()> {
        Ok(())
    }
}

/// Record of one pipeline run.
#[derive(Debug)]
pub struct Outcome {
    pub request_id: Uuid,
    pub transitions: Vec<State>,
    pub results: Option<Arc<ResultSet>>,
    pub error: Option<WaybackError>,
}

impl Outcome {
    fn new() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            transitions: vec![State::Received],
            results: None,
            error: None,
        }
    }

    fn advance(&mut self, state: State) {
        debug!(request_id = %self.request_id, ?state, "pipeline transition");
        self.transitions.push(state);
    }

    /// The state the run ended in.
    pub fn state(&self) -> State {
        self.transitions.last().copied().unwrap_or(State::Received)
    }

    pub fn is_done(&self) -> bool {
        self.state() == State::Done
    }
}

/// Drives requests through dispatch with a fixed policy and deadline.
#[derive(Clone)]
pub struct Pipeline {
    dispatcher: Arc<Dispatcher>,
    publishers: Publishers,
    tracker: TaskTracker,
    policy: Policy,
    deadline: Duration,
}

impl Pipeline {
    pub fn new(dispatcher: Arc<Dispatcher>, policy: Policy, deadline: Duration) -> Self {
        Self {
            dispatcher,
            publishers: Publishers::default(),
            tracker: TaskTracker::new(),
            policy,
            deadline,
        }
    }

    pub fn with_publishers(mut self, publishers: Publishers) -> Self {
        self.publishers = publishers;
        self
    }

    /// Track detached publishes on `tracker` so shutdown can drain them.
    pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Run `text` through the pipeline, replying via `sink`.
    ///
    /// Never fails: the outcome carries the transition history and, for runs
    /// that did not archive anything, the error that was shown to the user.
    pub async fn run(&self, text: &str, sink: &dyn ReplySink) -> Outcome {
        let outcome = Outcome::new();
        let span = info_span!(
            "pipeline",
            request_id = %outcome.request_id,
            channel = ?sink.channel(),
        );
        self.drive(outcome, text, sink).instrument(span).await
    }

    async fn drive(&self, mut outcome: Outcome, text: &str, sink: &dyn ReplySink) -> Outcome {
        let urls = extract_urls(text);
        if urls.is_empty() {
            info!("no URL found in request");
            outcome.advance(State::NoUrl);
            let reply = Reply::NoUrl { text };
            self.render(sink, &reply).await;
            self.acknowledge(sink, &reply).await;
            outcome.error = Some(WaybackError::NoUrl);
            return outcome;
        }
        info!(urls = urls.len(), "extracted URLs");
        outcome.advance(State::Extracted);

        let deadline = Instant::now() + self.deadline;
        let results = match self.dispatcher.dispatch(&urls, self.policy, deadline).await {
            Ok(results) => results,
            Err(e) => return self.fail(outcome, text, e, sink).await,
        };
        outcome.advance(State::Dispatched);

        if !results.has_results() {
            return self.fail(outcome, text, WaybackError::NoResults, sink).await;
        }
        let entries = flatten(&results);
        outcome.advance(State::Aggregated);

        let results = Arc::new(results);
        let reply = Reply::Archived {
            results: &results,
            entries: &entries,
        };
        self.render(sink, &reply).await;
        outcome.advance(State::Rendered);

        self.publish(Arc::clone(&results), sink.channel());
        outcome.advance(State::Published);

        if self.acknowledge(sink, &reply).await {
            outcome.advance(State::Acknowledged);
        }
        outcome.advance(State::Done);
        info!(records = results.len(), entries = entries.len(), "request completed");

        outcome.results = Some(results);
        outcome
    }

    async fn fail(
        &self,
        mut outcome: Outcome,
        text: &str,
        error: WaybackError,
        sink: &dyn ReplySink,
    ) -> Outcome {
        if error.is_recoverable() {
            info!(error = %error, "request failed");
        } else {
            error!(error = %error, "request failed");
        }
        outcome.advance(State::Failed);
        self.render(sink, &Reply::Failed { text, error: &error }).await;
        outcome.error = Some(error);
        outcome
    }

    async fn render(&self, sink: &dyn ReplySink, reply: &Reply<'_>) {
        if let Err(e) = sink.render(reply).await {
            warn!(error = %e, "rendering reply failed");
        }
    }

    async fn acknowledge(&self, sink: &dyn ReplySink, reply: &Reply<'_>) -> bool {
        match sink.acknowledge(reply).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "acknowledging request failed");
                false
            }
        }
    }

    fn publish(&self, results: Arc<ResultSet>, origin: Channel) {
        if self.publishers.is_empty() {
            return;
        }
        let publishers = self.publishers.clone();
        self.tracker.spawn(
            async move {
                let failed = publishers.publish_all(&results, origin).await;
                debug!(failed, "publish finished");
            }
            .in_current_span(),
        );
    }
}
