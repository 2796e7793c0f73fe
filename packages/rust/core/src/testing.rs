//! Test doubles shared by the dispatch and pipeline tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use wayback_archiver::Broker;
use wayback_shared::{Mapping, Result, Slot, SlotInfo, SlotRegistry, WaybackError};

use crate::pipeline::{Reply, ReplySink};
use crate::publish::Channel;

/// What a scripted slot does when called.
#[derive(Clone)]
pub(crate) enum Script {
    /// Archive every URL under `https://<slot>.archive/<url>` after a delay.
    Archive(Duration),
    /// Return an empty mapping.
    Empty,
    /// Fail after a delay.
    Fail(Duration),
}

/// A broker whose per-slot behavior is fixed up front.
#[derive(Default)]
pub(crate) struct ScriptedBroker {
    scripts: HashMap<Slot, Script>,
    pub(crate) calls: AtomicUsize,
}

impl ScriptedBroker {
    pub(crate) fn new(scripts: impl IntoIterator<Item = (Slot, Script)>) -> Self {
        Self {
            scripts: scripts.into_iter().collect(),
            calls: AtomicUsize::new(0),
        }
    }

    async fn run(&self, slot: Slot, urls: &[String]) -> Result<Mapping> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.get(&slot).cloned().unwrap_or(Script::Empty) {
            Script::Archive(delay) => {
                tokio::time::sleep(delay).await;
                Ok(urls
                    .iter()
                    .map(|u| (u.clone(), archived(slot, u)))
                    .collect())
            }
            Script::Empty => Ok(Mapping::new()),
            Script::Fail(delay) => {
                tokio::time::sleep(delay).await;
                Err(WaybackError::backend(slot, "scripted failure"))
            }
        }
    }
}

/// The archived URL a scripted slot produces for `url`.
pub(crate) fn archived(slot: Slot, url: &str) -> String {
    format!("https://{slot}.archive/{url}")
}

#[async_trait]
impl Broker for ScriptedBroker {
    async fn ia(&self, urls: &[String]) -> Result<Mapping> {
        self.run(Slot::Ia, urls).await
    }
    async fn is(&self, urls: &[String]) -> Result<Mapping> {
        self.run(Slot::Is, urls).await
    }
    async fn ip(&self, urls: &[String]) -> Result<Mapping> {
        self.run(Slot::Ip, urls).await
    }
    async fn ph(&self, urls: &[String]) -> Result<Mapping> {
        self.run(Slot::Ph, urls).await
    }
}

/// A registry with exactly `slots` enabled.
pub(crate) fn registry(slots: &[Slot]) -> Arc<SlotRegistry> {
    Arc::new(SlotRegistry::new(
        Slot::ALL.map(|s| SlotInfo::with_defaults(s, slots.contains(&s))),
    ))
}

/// What a [`RecordingSink`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Seen {
    NoUrl(String),
    Failed(String),
    Archived { records: usize, entries: usize },
    Ack,
}

/// A sink that records every call, optionally failing them.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) seen: Mutex<Vec<Seen>>,
    pub(crate) fail_render: bool,
    pub(crate) fail_ack: bool,
}

impl RecordingSink {
    pub(crate) fn seen(&self) -> Vec<Seen> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn push(&self, seen: Seen) {
        if let Ok(mut all) = self.seen.lock() {
            all.push(seen);
        }
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    fn channel(&self) -> Channel {
        Channel::Cli
    }

    async fn render(&self, reply: &Reply<'_>) -> Result<()> {
        self.push(match reply {
            Reply::NoUrl { text } => Seen::NoUrl(text.to_string()),
            Reply::Failed { error, .. } => Seen::Failed(error.to_string()),
            Reply::Archived { results, entries } => Seen::Archived {
                records: results.len(),
                entries: entries.len(),
            },
        });
        if self.fail_render {
            return Err(WaybackError::Render("scripted render failure".into()));
        }
        Ok(())
    }

    async fn acknowledge(&self, _reply: &Reply<'_>) -> Result<()> {
        self.push(Seen::Ack);
        if self.fail_ack {
            return Err(WaybackError::Transport("scripted ack failure".into()));
        }
        Ok(())
    }
}
