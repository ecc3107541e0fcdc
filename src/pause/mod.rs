//! Broadcast pause/resume coordination for pipeline workers
//!
//! A [`PauseController`] flips between *running* and *paused*. Any number of
//! [`Subscription`]s observe the current state through a `watch` channel, so a
//! pause that has not been consumed yet is never duplicated and a subscriber
//! created while paused sees the pause immediately.
//!
//! Pausing is keyed by cause: every watcher pauses and resumes under its own
//! cause id, and the controller only resumes once the last cause is lifted.
//!
//! Resuming is synchronous. [`PauseController::resume`] first waits until every
//! subscriber has parked, then flips the state, then waits until every parked
//! subscriber has acknowledged the new generation. When it returns, all
//! workers have resumed.

mod subscription;

pub use subscription::Subscription;

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Notify};

/// State published to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ControlState {
    pub paused: bool,
    /// Bumped on every paused -> running transition
    pub generation: u64,
}

#[derive(Default)]
struct PauseCauses {
    reasons: BTreeMap<String, String>,
    since: Option<DateTime<Utc>>,
}

/// Per-subscriber rendezvous flags
#[derive(Default)]
pub(crate) struct SubscriberSlot {
    pub parked: AtomicBool,
    pub resumed_generation: AtomicU64,
}

/// Pause/resume broadcaster
pub struct PauseController {
    paused: AtomicBool,
    state: watch::Sender<ControlState>,
    causes: Mutex<PauseCauses>,
    subscribers: Mutex<HashMap<u64, Arc<SubscriberSlot>>>,
    next_subscriber: AtomicU64,
    rendezvous: Notify,
    transition: tokio::sync::Mutex<()>,
}

impl PauseController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ControlState::default());

        Self {
            paused: AtomicBool::new(false),
            state,
            causes: Mutex::new(PauseCauses::default()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(0),
            rendezvous: Notify::new(),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// Registers a new subscriber
    ///
    /// The subscription reflects the current state right away.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(SubscriberSlot::default());
        // A subscriber registered mid-resume must not hold that resume up.
        slot.resumed_generation
            .store(self.state.borrow().generation, Ordering::Release);

        self.lock_subscribers().insert(id, Arc::clone(&slot));
        tracing::trace!("Pause subscriber {} registered", id);

        Subscription::new(id, Arc::clone(self), slot, self.state.subscribe())
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        if self.lock_subscribers().remove(&id).is_some() {
            tracing::trace!("Pause subscriber {} removed", id);
            self.rendezvous.notify_waiters();
        }
    }

    /// Pauses every subscriber on behalf of `cause`
    ///
    /// Adding a cause while already paused only records it (and refreshes the
    /// reason of an existing cause). Returns true if this call moved the
    /// controller from running to paused.
    pub fn pause(&self, cause: impl Into<String>, reason: impl Into<String>) -> bool {
        let cause = cause.into();
        let reason = reason.into();
        let mut causes = self.lock_causes();
        causes.reasons.insert(cause.clone(), reason.clone());

        if self
            .paused
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        causes.since = Some(Utc::now());
        self.state.send_modify(|state| state.paused = true);
        tracing::warn!("Crawl paused ({}): {}", cause, reason);
        true
    }

    /// Lifts the pause held by `cause`
    ///
    /// Returns once every subscriber has resumed, or immediately when other
    /// causes still hold the pause. Returns true if this call moved the
    /// controller back to running. Lifting an unknown cause is a no-op.
    pub async fn resume(&self, cause: &str) -> bool {
        {
            let mut causes = self.lock_causes();
            if causes.reasons.remove(cause).is_none() {
                return false;
            }
            if !causes.reasons.is_empty() {
                tracing::debug!(
                    "Cause '{}' lifted, still paused by: {}",
                    cause,
                    join_causes(&causes.reasons)
                );
                return false;
            }
        }

        let _transition = self.transition.lock().await;

        self.wait_for_subscribers(|slot| slot.parked.load(Ordering::Acquire))
            .await;

        let generation = {
            let mut causes = self.lock_causes();
            if !causes.reasons.is_empty() {
                // Paused again while waiting for the rendezvous.
                return false;
            }
            if self
                .paused
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return false;
            }
            causes.since = None;

            let mut generation = 0;
            self.state.send_modify(|state| {
                state.paused = false;
                state.generation += 1;
                generation = state.generation;
            });
            generation
        };

        self.wait_for_subscribers(|slot| {
            !slot.parked.load(Ordering::Acquire)
                || slot.resumed_generation.load(Ordering::Acquire) >= generation
        })
        .await;

        tracing::info!("Crawl resumed ({} lifted)", cause);
        true
    }

    /// Waits until `ready` holds for every registered subscriber
    async fn wait_for_subscribers(&self, ready: impl Fn(&SubscriberSlot) -> bool) {
        loop {
            let notified = self.rendezvous.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock_subscribers().values().all(|slot| ready(slot)) {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn notify_rendezvous(&self) {
        self.rendezvous.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Every active pause reason, joined with "; "
    ///
    /// Empty while running.
    pub fn reason(&self) -> String {
        let causes = self.lock_causes();
        causes
            .reasons
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Active causes and their reasons
    pub fn causes(&self) -> BTreeMap<String, String> {
        self.lock_causes().reasons.clone()
    }

    /// When the current pause started
    pub fn paused_since(&self) -> Option<DateTime<Utc>> {
        self.lock_causes().since
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn lock_causes(&self) -> MutexGuard<'_, PauseCauses> {
        self.causes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, HashMap<u64, Arc<SubscriberSlot>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new()
    }
}

fn join_causes(reasons: &BTreeMap<String, String>) -> String {
    reasons.keys().cloned().collect::<Vec<_>>().join(", ")
}
