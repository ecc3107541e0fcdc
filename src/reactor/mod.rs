//! Reactor: global admission control and in-flight tracking
//!
//! The reactor is the single gateway between new or returning work and the
//! pipeline. Every item admitted through [`Reactor::receive_insert`] holds one
//! token from a fixed pool until [`Reactor::mark_as_finished`] returns it, so
//! the whole multi-stage pipeline never holds more items than the configured
//! worker budget, whatever each stage spawns internally.
//!
//! # Lifecycle
//!
//! 1. [`Reactor::start`] creates the token pool and the forwarding task.
//! 2. Sources call [`Reactor::receive_insert`]; the finisher calls
//!    [`Reactor::receive_feedback`] and [`Reactor::mark_as_finished`].
//! 3. [`Reactor::freeze`] rejects new admissions while in-flight items drain.
//! 4. [`Reactor::stop`] cancels the forwarding task and waits for it.

mod error;

pub use error::ReactorError;

use crate::item::{Item, ItemId, ItemSource};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Admission controller and state table of every in-flight item
///
/// Cloning a `Reactor` yields another handle to the same instance.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<ReactorInner>,
}

struct ReactorInner {
    started: AtomicBool,
    runtime: OnceLock<Runtime>,
    state_table: DashMap<ItemId, Item>,
    shutdown: CancellationToken,
    freeze: CancellationToken,
}

struct Runtime {
    capacity: usize,
    tokens: Arc<Semaphore>,
    input: mpsc::Sender<Item>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    /// Creates a reactor that is not started yet
    pub fn new() -> Self {
        let shutdown = CancellationToken::new();
        let freeze = shutdown.child_token();

        Self {
            inner: Arc::new(ReactorInner {
                started: AtomicBool::new(false),
                runtime: OnceLock::new(),
                state_table: DashMap::new(),
                shutdown,
                freeze,
            }),
        }
    }

    /// Initializes the token pool and starts the forwarding loop
    ///
    /// Admitted and fed-back items are forwarded, in the order received, to
    /// `output`. A reactor can only be started once; every later call fails
    /// with [`ReactorError::AlreadyInitialized`].
    ///
    /// # Arguments
    ///
    /// * `max_tokens` - Capacity of the token pool (maximum in-flight items)
    /// * `output` - Channel feeding the first pipeline stage
    pub fn start(&self, max_tokens: usize, output: mpsc::Sender<Item>) -> Result<(), ReactorError> {
        if max_tokens == 0 {
            return Err(ReactorError::InvalidCapacity);
        }

        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ReactorError::AlreadyInitialized);
        }

        let (input_tx, input_rx) = mpsc::channel(max_tokens);
        let forwarder = tokio::spawn(forward(input_rx, output, self.inner.shutdown.clone()));

        let runtime = Runtime {
            capacity: max_tokens,
            tokens: Arc::new(Semaphore::new(max_tokens)),
            input: input_tx,
            forwarder: Mutex::new(Some(forwarder)),
        };

        if self.inner.runtime.set(runtime).is_err() {
            return Err(ReactorError::AlreadyInitialized);
        }

        tracing::info!("Reactor started with {} tokens", max_tokens);
        Ok(())
    }

    fn runtime(&self) -> Result<&Runtime, ReactorError> {
        self.inner.runtime.get().ok_or(ReactorError::NotInitialized)
    }

    /// Admits a new item into the pipeline
    ///
    /// Waits for a free token. Fails with [`ReactorError::ShuttingDown`] once
    /// the reactor is stopped and with [`ReactorError::Frozen`] once it is
    /// frozen, including while the call is already waiting.
    ///
    /// Items coming from a queue keep their source tag; anything else is
    /// tagged [`ItemSource::Insert`].
    ///
    /// Cancel-safe: nothing is registered until the item can be forwarded
    /// without waiting.
    pub async fn receive_insert(&self, mut item: Item) -> Result<(), ReactorError> {
        let runtime = self.runtime()?;

        let token = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => return Err(ReactorError::ShuttingDown),
            _ = self.inner.freeze.cancelled() => return Err(ReactorError::Frozen),
            token = runtime.tokens.acquire() => token.map_err(|_| ReactorError::ShuttingDown)?,
        };

        let slot = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => return Err(ReactorError::ShuttingDown),
            _ = self.inner.freeze.cancelled() => return Err(ReactorError::Frozen),
            slot = runtime.input.reserve() => slot.map_err(|_| ReactorError::ShuttingDown)?,
        };

        if !matches!(item.source, ItemSource::Queue | ItemSource::Hq) {
            item.source = ItemSource::Insert;
        }

        let id = item.id;
        match self.inner.state_table.entry(id) {
            // Dropping the token and the slot hands both back.
            Entry::Occupied(_) => return Err(ReactorError::AlreadyPresent(id)),
            Entry::Vacant(entry) => {
                entry.insert(item.clone());
            }
        }
        token.forget();
        slot.send(item);

        tracing::trace!("Admitted item {}", id);
        Ok(())
    }

    /// Re-publishes an item that is already in flight
    ///
    /// The state-table entry is refreshed with the new item and no token is
    /// consumed. An item the reactor never admitted fails with
    /// [`ReactorError::FeedbackItemNotPresent`]; that points to a bookkeeping
    /// bug in the caller.
    pub async fn receive_feedback(&self, mut item: Item) -> Result<(), ReactorError> {
        let runtime = self.runtime()?;

        if !self.inner.state_table.contains_key(&item.id) {
            return Err(ReactorError::FeedbackItemNotPresent(item.id));
        }

        let permit = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => return Err(ReactorError::ShuttingDown),
            _ = self.inner.freeze.cancelled() => return Err(ReactorError::Frozen),
            permit = runtime.input.reserve() => permit.map_err(|_| ReactorError::ShuttingDown)?,
        };

        item.source = ItemSource::Feedback;
        {
            let Some(mut entry) = self.inner.state_table.get_mut(&item.id) else {
                return Err(ReactorError::FeedbackItemNotPresent(item.id));
            };
            *entry = item.clone();
        }

        tracing::trace!("Fed back item {}", item.id);
        permit.send(item);
        Ok(())
    }

    /// Removes a finished item and releases its token
    ///
    /// Fails with [`ReactorError::FinishedItemNotFound`] if the item is not
    /// registered, which means it was either never admitted or already
    /// finished. No token is released in that case.
    pub fn mark_as_finished(&self, item: &Item) -> Result<(), ReactorError> {
        let runtime = self.runtime()?;

        if self.inner.state_table.remove(&item.id).is_none() {
            return Err(ReactorError::FinishedItemNotFound(item.id));
        }
        runtime.tokens.add_permits(1);

        tracing::trace!("Finished item {}", item.id);
        Ok(())
    }

    /// Stops new admissions, leaving in-flight items and tokens untouched
    ///
    /// Idempotent. Stopping the reactor also freezes it.
    pub fn freeze(&self) {
        if !self.inner.freeze.is_cancelled() {
            self.inner.freeze.cancel();
            tracing::info!(
                "Reactor frozen with {} items in flight",
                self.inner.state_table.len()
            );
        }
    }

    /// Cancels the forwarding loop and waits for it to exit
    ///
    /// Call only after upstream producers have stopped sending, typically
    /// after [`Reactor::freeze`].
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();

        if let Some(runtime) = self.inner.runtime.get() {
            let forwarder = runtime
                .forwarder
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();

            if let Some(handle) = forwarder {
                if let Err(e) = handle.await {
                    tracing::warn!("Reactor forwarding loop ended abnormally: {}", e);
                }
            }
        }

        tracing::info!(
            "Reactor stopped ({} items left in the state table)",
            self.inner.state_table.len()
        );
    }

    /// Returns true once [`Reactor::start`] has been called
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Returns true once the reactor has been frozen or stopped
    pub fn is_frozen(&self) -> bool {
        self.inner.freeze.is_cancelled()
    }

    /// Capacity of the token pool, zero before start
    pub fn capacity(&self) -> usize {
        self.inner.runtime.get().map_or(0, |r| r.capacity)
    }

    /// Number of tokens currently held by admitted items
    pub fn tokens_in_use(&self) -> usize {
        self.inner
            .runtime
            .get()
            .map_or(0, |r| r.capacity - r.tokens.available_permits())
    }

    /// Number of items currently in the state table
    pub fn in_flight(&self) -> usize {
        self.inner.state_table.len()
    }

    /// Point-in-time copy of the state table
    ///
    /// Not synchronized with admission: an item may finish right after the
    /// snapshot is taken.
    pub fn state_table(&self) -> HashMap<ItemId, Item> {
        self.inner
            .state_table
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Point-in-time list of the items in the state table
    pub fn state_table_items(&self) -> Vec<Item> {
        self.inner
            .state_table
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards admitted items to the first stage in arrival order
async fn forward(
    mut input: mpsc::Receiver<Item>,
    output: mpsc::Sender<Item>,
    shutdown: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            item = input.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            sent = output.send(item) => {
                if sent.is_err() {
                    tracing::warn!("Reactor output channel closed, stopping forwarding loop");
                    break;
                }
            }
        }
    }

    tracing::debug!("Reactor forwarding loop exited");
}
