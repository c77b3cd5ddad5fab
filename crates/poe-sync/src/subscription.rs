//! Subscription manager
//!
//! Keeps at most one live ledger subscription per [`Slot`]. Every watch runs
//! in its own task which forwards values into a single notification queue
//! shared by all slots. Each notification is stamped with the slot's
//! generation; [`SubscriptionManager::accept`] drops anything from a
//! superseded generation, so values for an old key never reach the engine
//! after the key changes.
//!
//! ## Lifecycle of a watch task
//!
//! 1. `subscribe` is always awaited to completion, even if the watch is
//!    cancelled meanwhile, so an acknowledged subscription is never lost.
//! 2. Values are forwarded until cancellation, feed closure, or the queue
//!    consumer going away.
//! 3. `unsubscribe` is called exactly once with the acknowledged id. A
//!    failure is forwarded as [`SlotEvent::ReleaseFailed`].
//!
//! Releasing a slot waits at most the teardown timeout. A task still waiting
//! for its subscribe acknowledgment is then detached rather than aborted; it
//! unsubscribes on its own once the acknowledgment arrives.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use poe_core::{LedgerClient, LedgerError, RawValue, StorageItem, StorageKey};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, trace, warn};

/// A watched-key slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    /// The digest whose claim is being displayed
    Claim,
    /// The account whose owned-claims index is being listed
    OwnedClaims,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Claim => write!(f, "claim"),
            Slot::OwnedClaims => write!(f, "owned-claims"),
        }
    }
}

/// What a slot is currently bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchedKey {
    pub slot: Slot,
    pub item: StorageItem,
    pub key: StorageKey,
}

/// Payload of a slot notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotEvent {
    /// Current or changed value
    Value(RawValue),
    /// Subscribe was rejected
    Failed(String),
    /// The ledger closed the feed
    Closed,
    /// Unsubscribe was rejected; the ledger may still hold the subscription
    ReleaseFailed(String),
}

/// One entry of the shared notification queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotNotification {
    pub slot: Slot,
    pub generation: u64,
    pub key: StorageKey,
    pub event: SlotEvent,
}

struct ActiveWatch {
    watched: WatchedKey,
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Cloneable one-shot read access to the ledger
#[derive(Clone)]
pub struct Lookup {
    ledger: Arc<dyn LedgerClient>,
}

impl Lookup {
    pub async fn lookup_once(
        &self,
        item: &StorageItem,
        key: &StorageKey,
    ) -> Result<RawValue, LedgerError> {
        self.ledger.query_once(item, key).await
    }
}

/// One live subscription per slot, multiplexed into one queue
pub struct SubscriptionManager {
    ledger: Arc<dyn LedgerClient>,
    queue: mpsc::Sender<SlotNotification>,
    slots: HashMap<Slot, ActiveWatch>,
    next_generation: u64,
    teardown_timeout: Duration,
    dedup: bool,
}

impl SubscriptionManager {
    /// Create a manager and the receiving end of its notification queue.
    ///
    /// `dedup_idempotent` only takes effect if the ledger client reports
    /// idempotent notifications.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        queue_capacity: usize,
        teardown_timeout: Duration,
        dedup_idempotent: bool,
    ) -> (Self, mpsc::Receiver<SlotNotification>) {
        let (queue, rx) = mpsc::channel(queue_capacity.max(1));
        let dedup = dedup_idempotent && ledger.idempotent_notifications();
        let manager = Self {
            ledger,
            queue,
            slots: HashMap::new(),
            next_generation: 1,
            teardown_timeout,
            dedup,
        };
        (manager, rx)
    }

    /// Bind `slot` to `item[key]`, releasing whatever it was bound to.
    ///
    /// Returns the generation of the new subscription. Watching the key the
    /// slot is already bound to is a no-op returning the current generation.
    pub async fn watch(&mut self, slot: Slot, item: StorageItem, key: StorageKey) -> u64 {
        if let Some(active) = self.slots.get(&slot) {
            if active.watched.item == item && active.watched.key == key {
                return active.generation;
            }
        }
        self.release(slot).await;

        let generation = self.next_generation;
        self.next_generation += 1;

        let watched = WatchedKey { slot, item, key };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_watch(
            Arc::clone(&self.ledger),
            watched.clone(),
            generation,
            self.queue.clone(),
            cancel.clone(),
            self.dedup,
        )
        .in_current_span());
        debug!(slot = %slot, key = %watched.key, generation, "Slot watch started");

        self.slots.insert(
            slot,
            ActiveWatch {
                watched,
                generation,
                cancel,
                handle,
            },
        );
        generation
    }

    /// Release the subscription bound to `slot`, if any.
    pub async fn unwatch(&mut self, slot: Slot) {
        self.release(slot).await;
    }

    /// Release every slot.
    pub async fn shutdown(&mut self) {
        let slots: Vec<Slot> = self.slots.keys().copied().collect();
        for slot in slots {
            self.release(slot).await;
        }
        info!("Subscription manager shut down");
    }

    /// Drop the binding of a slot whose feed has ended.
    ///
    /// Only unbinds if `generation` is still current. The watch task has
    /// already finished or is unsubscribing, so nothing is awaited. A later
    /// [`watch`](Self::watch) of the same key subscribes again.
    pub fn forget(&mut self, slot: Slot, generation: u64) -> bool {
        let current = self
            .slots
            .get(&slot)
            .is_some_and(|active| active.generation == generation);
        if current {
            self.slots.remove(&slot);
            debug!(slot = %slot, generation, "Slot binding dropped after feed ended");
        }
        current
    }

    /// Whether a notification belongs to a slot's current generation.
    pub fn accept(&self, notification: &SlotNotification) -> bool {
        self.slots
            .get(&notification.slot)
            .is_some_and(|active| active.generation == notification.generation)
    }

    /// One-shot read through the manager's ledger.
    pub async fn lookup_once(
        &self,
        item: &StorageItem,
        key: &StorageKey,
    ) -> Result<RawValue, LedgerError> {
        self.ledger.query_once(item, key).await
    }

    /// A handle for one-shot reads from other tasks.
    pub fn lookups(&self) -> Lookup {
        Lookup {
            ledger: Arc::clone(&self.ledger),
        }
    }

    /// Slots currently bound, in order.
    pub fn active_slots(&self) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self.slots.keys().copied().collect();
        slots.sort();
        slots
    }

    /// What a slot is bound to.
    pub fn watched(&self, slot: Slot) -> Option<&WatchedKey> {
        self.slots.get(&slot).map(|active| &active.watched)
    }

    async fn release(&mut self, slot: Slot) {
        let Some(active) = self.slots.remove(&slot) else {
            return;
        };
        active.cancel.cancel();
        // Detached on timeout, not aborted; the task unsubscribes once its
        // ack arrives.
        match tokio::time::timeout(self.teardown_timeout, active.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(slot = %slot, error = %e, "Slot watch task failed"),
            Err(_) => warn!(
                slot = %slot,
                key = %active.watched.key,
                timeout = ?self.teardown_timeout,
                "Slot teardown timed out, detaching watch task"
            ),
        }
        debug!(slot = %slot, generation = active.generation, "Slot released");
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        // Tasks observe the token and unsubscribe on their own.
        for active in self.slots.values() {
            active.cancel.cancel();
        }
    }
}

async fn run_watch(
    ledger: Arc<dyn LedgerClient>,
    watched: WatchedKey,
    generation: u64,
    queue: mpsc::Sender<SlotNotification>,
    cancel: CancellationToken,
    dedup: bool,
) {
    let WatchedKey { slot, item, key } = watched;
    let notification = |event| SlotNotification {
        slot,
        generation,
        key: key.clone(),
        event,
    };

    let mut subscription = match ledger.subscribe(&item, &key).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(slot = %slot, key = %key, error = %e, "Subscribe failed");
            if !cancel.is_cancelled() {
                let _ = queue.send(notification(SlotEvent::Failed(e.to_string()))).await;
            }
            return;
        }
    };
    debug!(slot = %slot, key = %key, subscription = %subscription.id, "Subscribed");

    let mut last: Option<RawValue> = None;
    let reason = loop {
        let value = tokio::select! {
            biased;
            _ = cancel.cancelled() => break "cancelled",
            value = subscription.updates.recv() => value,
        };
        let event = match value {
            Some(value) => {
                if dedup && last.as_ref() == Some(&value) {
                    continue;
                }
                last = Some(value.clone());
                trace!(slot = %slot, generation, shape = %value.shape(), "Forwarding value");
                SlotEvent::Value(value)
            }
            None => SlotEvent::Closed,
        };
        let closed = event == SlotEvent::Closed;
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break "cancelled",
            sent = queue.send(notification(event)) => sent,
        };
        if sent.is_err() {
            break "consumer gone";
        }
        if closed {
            break "feed closed";
        }
    };

    if let Err(e) = ledger.unsubscribe(subscription.id).await {
        warn!(slot = %slot, key = %key, error = %e, "Unsubscribe failed");
        // The engine may be blocked releasing this very slot
        let _ = queue.try_send(notification(SlotEvent::ReleaseFailed(e.to_string())));
    }
    debug!(slot = %slot, key = %key, reason, "Unsubscribed");
}
