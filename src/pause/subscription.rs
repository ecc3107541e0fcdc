use super::{ControlState, PauseController, SubscriberSlot};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A worker's handle on a [`PauseController`]
///
/// Workers select on [`Subscription::paused`] (or call
/// [`Subscription::checkpoint`]) between units of work and then park until
/// the controller resumes them. Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: u64,
    controller: Arc<PauseController>,
    slot: Arc<SubscriberSlot>,
    state: watch::Receiver<ControlState>,
    active: bool,
}

impl Subscription {
    pub(super) fn new(
        id: u64,
        controller: Arc<PauseController>,
        slot: Arc<SubscriberSlot>,
        state: watch::Receiver<ControlState>,
    ) -> Self {
        Self {
            id,
            controller,
            slot,
            state,
            active: true,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true while a pause is in effect
    pub fn is_pause_requested(&self) -> bool {
        self.state.borrow().paused
    }

    /// Completes as soon as a pause is in effect
    ///
    /// Cancel-safe, meant to be one branch of a `tokio::select!`.
    pub async fn paused(&mut self) {
        let _ = self.state.wait_for(|state| state.paused).await;
    }

    /// Blocks until the controller resumes this subscriber
    ///
    /// Returns immediately when no pause is in effect.
    pub async fn park(&mut self) {
        let parked_at = {
            let state = self.state.borrow_and_update();
            if !state.paused {
                return;
            }
            state.generation
        };

        let mut guard = ParkGuard {
            controller: Arc::clone(&self.controller),
            slot: Arc::clone(&self.slot),
            acknowledged: None,
        };
        guard.slot.parked.store(true, Ordering::Release);
        self.controller.notify_rendezvous();
        tracing::trace!("Pause subscriber {} parked", self.id);

        let woke = self
            .state
            .wait_for(|state| !state.paused || state.generation != parked_at)
            .await;
        guard.acknowledged = woke.ok().map(|state| state.generation);
    }

    /// Parks until resumed or until `cancel` fires
    ///
    /// Returns false if cancelled.
    pub async fn park_until(&mut self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.park() => true,
        }
    }

    /// Parks if a pause is in effect
    pub async fn checkpoint(&mut self) {
        if self.is_pause_requested() {
            self.park().await;
        }
    }

    /// Removes this subscription from the controller
    ///
    /// Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.active {
            self.active = false;
            self.controller.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Clears the parked flag when a park ends, including by cancellation
struct ParkGuard {
    controller: Arc<PauseController>,
    slot: Arc<SubscriberSlot>,
    acknowledged: Option<u64>,
}

impl Drop for ParkGuard {
    fn drop(&mut self) {
        if let Some(generation) = self.acknowledged {
            self.slot
                .resumed_generation
                .store(generation, Ordering::Release);
        }
        self.slot.parked.store(false, Ordering::Release);
        self.controller.notify_rendezvous();
    }
}
