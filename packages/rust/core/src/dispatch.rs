//! Concurrent fan-out of URLs to every enabled slot.
//!
//! One task per enabled slot is spawned into a [`JoinSet`]; the calling task
//! is the only consumer and appends records in completion order, so the
//! result set needs no lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use wayback_archiver::Broker;
use wayback_shared::{Record, Result, ResultSet, SlotInfo, SlotRegistry, WaybackError};

/// How a dispatch reacts to a failing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Any slot error aborts every other slot and fails the dispatch.
    Strict,
    /// Failing slots become empty records; only a total lack of results fails.
    Tolerant,
}

/// Fans URLs out over the registry's enabled slots.
pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    registry: Arc<SlotRegistry>,
}

impl Dispatcher {
    pub fn new(broker: Arc<dyn Broker>, registry: Arc<SlotRegistry>) -> Self {
        Self { broker, registry }
    }

    /// Archive `urls` with every enabled slot, finishing by `deadline`.
    ///
    /// Under [`Policy::Strict`] the first slot error, or the deadline,
    /// aborts all outstanding slots and is returned. Under
    /// [`Policy::Tolerant`] failing slots are recorded with an empty mapping,
    /// the deadline drops whatever is still running, and the call fails with
    /// [`WaybackError::NoResults`] only if no record has a mapping.
    #[instrument(skip_all, fields(urls = urls.len(), policy = ?policy))]
    pub async fn dispatch(
        &self,
        urls: &[String],
        policy: Policy,
        deadline: Instant,
    ) -> Result<ResultSet> {
        if urls.is_empty() {
            return Err(WaybackError::NoUrl);
        }

        let budget = deadline.saturating_duration_since(Instant::now());
        let urls: Arc<[String]> = urls.into();
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, SlotInfo> = HashMap::new();

        for info in self.registry.enabled() {
            debug!(slot = %info.slot, "archiving slot");
            let broker = Arc::clone(&self.broker);
            let urls = Arc::clone(&urls);
            let slot = info.slot;
            let handle = tasks.spawn(async move { broker.archive(slot, &urls).await });
            pending.insert(handle.id(), info.clone());
        }

        let mut results = ResultSet::new();
        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                joined = tasks.join_next_with_id() => {
                    let Some(joined) = joined else { break };
                    let (id, outcome) = match joined {
                        Ok((id, outcome)) => (id, outcome),
                        Err(e) => {
                            let id = e.id();
                            let slot = pending.get(&id).map(|i| i.slot);
                            let error = match slot {
                                Some(slot) => WaybackError::backend(slot, format!("task failed: {e}")),
                                None => WaybackError::Network(format!("slot task failed: {e}")),
                            };
                            (id, Err(error))
                        }
                    };
                    let Some(info) = pending.remove(&id) else { continue };

                    match outcome {
                        Ok(dst) => {
                            if dst.is_empty() {
                                warn!(slot = %info.slot, "slot returned no results");
                            } else {
                                debug!(slot = %info.slot, archived = dst.len(), "slot finished");
                            }
                            results.push(Record::new(&info, dst));
                        }
                        Err(e) if policy == Policy::Strict => {
                            warn!(slot = %info.slot, error = %e, "slot failed, aborting dispatch");
                            tasks.abort_all();
                            return Err(e);
                        }
                        Err(e) => {
                            warn!(slot = %info.slot, error = %e, "slot failed");
                            results.push(Record::empty(&info));
                        }
                    }
                }
                () = &mut expiry => {
                    tasks.abort_all();
                    let unfinished: Vec<String> =
                        pending.values().map(|i| i.slot.to_string()).collect();
                    warn!(?unfinished, secs = budget.as_secs(), "dispatch deadline elapsed");
                    if policy == Policy::Strict {
                        return Err(WaybackError::Deadline { secs: budget.as_secs() });
                    }
                    break;
                }
            }
        }

        if policy == Policy::Tolerant && !results.has_results() {
            warn!(records = results.len(), "no slot produced any result");
            return Err(WaybackError::NoResults);
        }

        info!(records = results.len(), "dispatch completed");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::testing::{Script, ScriptedBroker, archived, registry};
    use wayback_shared::Slot;

    const FAST: Duration = Duration::from_millis(5);

    fn urls() -> Vec<String> {
        vec!["http://a.example".into(), "http://b.example".into()]
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    fn slots(results: &ResultSet) -> Vec<Slot> {
        results.iter().map(|r| r.slot).collect()
    }

    #[tokio::test]
    async fn tolerant_isolates_failing_slot() {
        let broker = ScriptedBroker::new([
            (Slot::Ia, Script::Archive(FAST)),
            (Slot::Is, Script::Fail(FAST)),
            (Slot::Ip, Script::Empty),
        ]);
        let dispatcher = Dispatcher::new(
            Arc::new(broker),
            registry(&[Slot::Ia, Slot::Is, Slot::Ip]),
        );

        let results = dispatcher
            .dispatch(&urls(), Policy::Tolerant, soon())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        let mut seen = slots(&results);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 3);

        for record in &results {
            match record.slot {
                Slot::Ia => {
                    assert_eq!(record.dst.len(), 2);
                    assert_eq!(
                        record.dst["http://a.example"],
                        archived(Slot::Ia, "http://a.example")
                    );
                }
                _ => assert!(record.dst.is_empty()),
            }
        }
    }

    #[tokio::test]
    async fn tolerant_fails_without_any_result() {
        let broker = ScriptedBroker::new([
            (Slot::Ia, Script::Fail(FAST)),
            (Slot::Is, Script::Empty),
        ]);
        let dispatcher = Dispatcher::new(Arc::new(broker), registry(&[Slot::Ia, Slot::Is]));

        let result = dispatcher.dispatch(&urls(), Policy::Tolerant, soon()).await;
        assert!(matches!(result, Err(WaybackError::NoResults)));
    }

    #[tokio::test]
    async fn strict_aborts_on_first_error() {
        let broker = ScriptedBroker::new([
            (Slot::Ia, Script::Archive(Duration::from_secs(30))),
            (Slot::Is, Script::Fail(FAST)),
        ]);
        let dispatcher = Dispatcher::new(Arc::new(broker), registry(&[Slot::Ia, Slot::Is]));

        let started = Instant::now();
        let result = dispatcher.dispatch(&urls(), Policy::Strict, soon()).await;

        assert!(matches!(
            result,
            Err(WaybackError::Backend { slot: Slot::Is, .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn strict_keeps_empty_slots() {
        let broker = ScriptedBroker::new([
            (Slot::Ia, Script::Archive(FAST)),
            (Slot::Ip, Script::Empty),
        ]);
        let dispatcher = Dispatcher::new(Arc::new(broker), registry(&[Slot::Ia, Slot::Ip]));

        let results = dispatcher
            .dispatch(&urls(), Policy::Strict, soon())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn deadline_fails_strict_dispatch() {
        let broker = ScriptedBroker::new([(Slot::Ia, Script::Archive(Duration::from_secs(30)))]);
        let dispatcher = Dispatcher::new(Arc::new(broker), registry(&[Slot::Ia]));

        let deadline = Instant::now() + Duration::from_millis(50);
        let result = dispatcher.dispatch(&urls(), Policy::Strict, deadline).await;
        assert!(matches!(result, Err(WaybackError::Deadline { .. })));
    }

    #[tokio::test]
    async fn deadline_keeps_finished_slots_when_tolerant() {
        let broker = ScriptedBroker::new([
            (Slot::Ia, Script::Archive(Duration::from_secs(30))),
            (Slot::Is, Script::Archive(FAST)),
        ]);
        let dispatcher = Dispatcher::new(Arc::new(broker), registry(&[Slot::Ia, Slot::Is]));

        let deadline = Instant::now() + Duration::from_millis(200);
        let results = dispatcher
            .dispatch(&urls(), Policy::Tolerant, deadline)
            .await
            .unwrap();
        assert_eq!(slots(&results), vec![Slot::Is]);
    }

    #[tokio::test]
    async fn records_arrive_in_completion_order() {
        let broker = ScriptedBroker::new([
            (Slot::Ia, Script::Archive(Duration::from_millis(150))),
            (Slot::Is, Script::Archive(FAST)),
        ]);
        let dispatcher = Dispatcher::new(Arc::new(broker), registry(&[Slot::Ia, Slot::Is]));

        let results = dispatcher
            .dispatch(&urls(), Policy::Tolerant, soon())
            .await
            .unwrap();
        assert_eq!(slots(&results), vec![Slot::Is, Slot::Ia]);
    }

    #[tokio::test]
    async fn empty_urls_never_reach_backends() {
        let broker = Arc::new(ScriptedBroker::new([(Slot::Ia, Script::Archive(FAST))]));
        let dispatcher = Dispatcher::new(broker.clone(), registry(&[Slot::Ia]));

        let result = dispatcher.dispatch(&[], Policy::Tolerant, soon()).await;
        assert!(matches!(result, Err(WaybackError::NoUrl)));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_slots_are_not_called() {
        let broker = Arc::new(ScriptedBroker::new([
            (Slot::Ia, Script::Archive(FAST)),
            (Slot::Ph, Script::Archive(FAST)),
        ]));
        let dispatcher = Dispatcher::new(broker.clone(), registry(&[Slot::Ia]));

        let results = dispatcher
            .dispatch(&urls(), Policy::Tolerant, soon())
            .await
            .unwrap();
        assert_eq!(slots(&results), vec![Slot::Ia]);
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
    }
}
