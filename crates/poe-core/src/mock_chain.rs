//! In-memory ledger for tests and demos
//!
//! [`MockChain`] plays all three external collaborators at once: it serves
//! storage reads and change feeds ([`LedgerClient`]), applies claim calls
//! with the proof-of-existence pallet rules ([`TxSubmitter`]), and hands out
//! signers ([`SignerProvider`]).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use poe_core::{ClaimSchema, MockChain, StorageKey};
//!
//! let chain = MockChain::new(ClaimSchema::ProofInfo);
//! let mut sub = chain
//!     .subscribe(&ClaimSchema::ProofInfo.claims_item(), &StorageKey::Digest(d))
//!     .await?;
//! assert!(sub.updates.recv().await.unwrap().is_none());
//! ```
//!
//! Failure and latency can be injected per key, and transactions can be
//! held so they never confirm.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::account::AccountId;
use crate::digest::ContentDigest;
use crate::error::{LedgerError, TxError};
use crate::ledger::{LedgerClient, LedgerSubscription, StorageItem, StorageKey, SubscriptionId};
use crate::raw::{RawField, RawValue};
use crate::record::ClaimInfo;
use crate::schema::{ClaimSchema, DEFAULT_MAX_NOTE_BYTES, proof_info_value};
use crate::tx::{Call, CallParam, Signer, SignerProvider, TxStatus, TxStatusStream, TxSubmitter};

/// Milliseconds between mock blocks, used for `created_on`
const BLOCK_TIME_MS: u64 = 6_000;

/// Dispatch errors, named after the pallet's error variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum DispatchError {
    ProofAlreadyClaimed,
    NoSuchProof,
    NotProofOwner,
    CannotTransferProofToSelf,
    CommentTooLong,
    InsufficientPrice,
    AccountBalanceNotEnough,
    BadCall,
}

#[derive(Debug, Default)]
struct ChainState {
    block: u64,
    proofs: HashMap<ContentDigest, ClaimInfo>,
    owned: HashMap<AccountId, Vec<ContentDigest>>,
    balances: HashMap<AccountId, u128>,
}

struct Subscriber {
    item: StorageItem,
    key: StorageKey,
    tx: mpsc::Sender<RawValue>,
}

struct Inner {
    schema: ClaimSchema,
    max_note_bytes: usize,
    buffer_size: usize,
    state: Mutex<ChainState>,
    subscribers: DashMap<SubscriptionId, Subscriber>,
    overrides: DashMap<(StorageItem, StorageKey), RawValue>,
    subscribe_failures: DashMap<StorageKey, String>,
    unsubscribe_failures: DashMap<StorageKey, String>,
    closed_feeds: DashMap<SubscriptionId, ()>,
    query_failures: DashMap<StorageKey, String>,
    query_delays: DashMap<StorageKey, Duration>,
    subscribe_delay: std::sync::Mutex<Option<Duration>>,
    locked_signers: DashMap<AccountId, ()>,
    next_subscription: AtomicU64,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    hold_transactions: AtomicBool,
    idempotent: AtomicBool,
}

/// An in-memory proof-of-existence chain
#[derive(Clone)]
pub struct MockChain {
    inner: Arc<Inner>,
}

impl MockChain {
    /// Create a chain that stores claims in the given layout
    pub fn new(schema: ClaimSchema) -> Self {
        Self::with_buffer_size(schema, 64)
    }

    /// Create a chain with a specific per-subscription buffer size
    pub fn with_buffer_size(schema: ClaimSchema, buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                schema,
                max_note_bytes: DEFAULT_MAX_NOTE_BYTES,
                buffer_size,
                state: Mutex::new(ChainState::default()),
                subscribers: DashMap::new(),
                overrides: DashMap::new(),
                subscribe_failures: DashMap::new(),
                unsubscribe_failures: DashMap::new(),
                closed_feeds: DashMap::new(),
                query_failures: DashMap::new(),
                query_delays: DashMap::new(),
                subscribe_delay: std::sync::Mutex::new(None),
                locked_signers: DashMap::new(),
                next_subscription: AtomicU64::new(1),
                subscribe_calls: AtomicUsize::new(0),
                unsubscribe_calls: AtomicUsize::new(0),
                hold_transactions: AtomicBool::new(false),
                idempotent: AtomicBool::new(false),
            }),
        }
    }

    pub fn schema(&self) -> ClaimSchema {
        self.inner.schema
    }

    // ------------------------------------------------------------------
    // Direct state manipulation
    // ------------------------------------------------------------------

    /// Write a claim as if a block had stored it, notifying subscribers
    pub async fn insert_claim(&self, digest: ContentDigest, info: ClaimInfo) {
        let mut accounts = vec![info.owner.clone()];
        {
            let mut state = self.inner.state.lock().await;
            if let Some(prev) = state.proofs.get(&digest).cloned() {
                if prev.owner != info.owner {
                    remove_owned(&mut state, &prev.owner, &digest);
                    accounts.push(prev.owner);
                }
            }
            add_owned(&mut state, &info.owner, digest);
            state.proofs.insert(digest, info);
        }
        self.notify_claim(digest, &accounts).await;
    }

    /// Remove a claim, notifying subscribers
    pub async fn remove_claim(&self, digest: ContentDigest) {
        let removed = {
            let mut state = self.inner.state.lock().await;
            let removed = state.proofs.remove(&digest);
            if let Some(prev) = &removed {
                remove_owned(&mut state, &prev.owner, &digest);
            }
            removed
        };
        let accounts: Vec<AccountId> = removed.into_iter().map(|info| info.owner).collect();
        self.notify_claim(digest, &accounts).await;
    }

    /// Serve an arbitrary raw value for `item[key]`, notifying subscribers
    pub async fn set_raw(&self, item: StorageItem, key: StorageKey, value: RawValue) {
        self.inner
            .overrides
            .insert((item.clone(), key.clone()), value);
        self.notify(&item, &key).await;
    }

    /// Re-send the current value of `item[key]` without changing it
    pub async fn renotify(&self, item: &StorageItem, key: &StorageKey) {
        self.notify(item, key).await;
    }

    /// Credit an account's free balance
    pub async fn fund(&self, account: &AccountId, amount: u128) {
        let mut state = self.inner.state.lock().await;
        *state.balances.entry(account.clone()).or_default() += amount;
    }

    pub async fn balance(&self, account: &AccountId) -> u128 {
        let state = self.inner.state.lock().await;
        state.balances.get(account).copied().unwrap_or_default()
    }

    pub async fn current_block(&self) -> u64 {
        self.inner.state.lock().await.block
    }

    /// Current claim for a digest, bypassing subscriptions
    pub async fn claim(&self, digest: &ContentDigest) -> Option<ClaimInfo> {
        self.inner.state.lock().await.proofs.get(digest).cloned()
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Make `subscribe` fail for a key
    pub fn fail_subscribe(&self, key: StorageKey, cause: impl Into<String>) {
        self.inner.subscribe_failures.insert(key, cause.into());
    }

    /// Make `unsubscribe` fail for subscriptions on a key
    pub fn fail_unsubscribe(&self, key: StorageKey, cause: impl Into<String>) {
        self.inner.unsubscribe_failures.insert(key, cause.into());
    }

    /// End every live feed for a key from the ledger side
    ///
    /// Subscribers see their channel close after any buffered values.
    /// Unsubscribing a closed feed still succeeds.
    pub fn close_feeds(&self, key: &StorageKey) {
        let ids: Vec<SubscriptionId> = self
            .inner
            .subscribers
            .iter()
            .filter(|entry| entry.value().key == *key)
            .map(|entry| *entry.key())
            .collect();
        for id in ids {
            self.inner.subscribers.remove(&id);
            self.inner.closed_feeds.insert(id, ());
            debug!(subscription = %id, key = %key, "Mock chain closed feed");
        }
    }

    /// Make `query_once` fail for a key
    pub fn fail_query(&self, key: StorageKey, cause: impl Into<String>) {
        self.inner.query_failures.insert(key, cause.into());
    }

    /// Delay `query_once` for a key
    pub fn delay_query(&self, key: StorageKey, delay: Duration) {
        self.inner.query_delays.insert(key, delay);
    }

    /// Delay every subscribe acknowledgment
    ///
    /// The subscription is registered, and counted as active, while the
    /// acknowledgment is in flight.
    pub fn delay_subscribe(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.inner.subscribe_delay.lock() {
            *guard = delay;
        }
    }

    /// Accept transactions but never include them
    pub fn hold_transactions(&self, hold: bool) {
        self.inner.hold_transactions.store(hold, Ordering::SeqCst);
    }

    /// Claim idempotent notifications (see [`LedgerClient::idempotent_notifications`])
    pub fn set_idempotent(&self, idempotent: bool) {
        self.inner.idempotent.store(idempotent, Ordering::SeqCst);
    }

    /// Refuse to hand out a signer for an account
    pub fn lock_signer(&self, account: AccountId) {
        self.inner.locked_signers.insert(account, ());
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Number of subscriptions not yet released
    pub fn active_subscriptions(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Number of live subscriptions for one key
    pub fn subscriptions_for(&self, key: &StorageKey) -> usize {
        self.inner
            .subscribers
            .iter()
            .filter(|entry| entry.value().key == *key)
            .count()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.inner.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.inner.unsubscribe_calls.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn read(&self, item: &StorageItem, key: &StorageKey) -> RawValue {
        if let Some(value) = self.inner.overrides.get(&(item.clone(), key.clone())) {
            return value.clone();
        }
        let schema = self.inner.schema;
        let state = self.inner.state.lock().await;
        match key {
            StorageKey::Digest(d) if *item == schema.claims_item() => state
                .proofs
                .get(d)
                .map(|info| encode_claim(schema, info))
                .unwrap_or(RawValue::None),
            StorageKey::Account(a) if Some(item) == schema.owned_item().as_ref() => state
                .owned
                .get(a)
                .map(|ids| {
                    RawValue::List(
                        ids.iter()
                            .map(|d| RawField::Bytes(d.as_bytes().to_vec()))
                            .collect(),
                    )
                })
                .unwrap_or(RawValue::None),
            _ => RawValue::None,
        }
    }

    async fn notify(&self, item: &StorageItem, key: &StorageKey) {
        let value = self.read(item, key).await;
        let targets: Vec<(SubscriptionId, mpsc::Sender<RawValue>)> = self
            .inner
            .subscribers
            .iter()
            .filter(|entry| entry.value().item == *item && entry.value().key == *key)
            .map(|entry| (*entry.key(), entry.value().tx.clone()))
            .collect();
        for (id, tx) in targets {
            if tx.send(value.clone()).await.is_err() {
                debug!(subscription = %id, "Mock chain subscriber gone");
            }
        }
    }

    async fn notify_claim(&self, digest: ContentDigest, accounts: &[AccountId]) {
        let schema = self.inner.schema;
        self.notify(&schema.claims_item(), &StorageKey::Digest(digest))
            .await;
        if let Some(owned) = schema.owned_item() {
            let unique: HashSet<&AccountId> = accounts.iter().collect();
            for account in unique {
                self.notify(&owned, &StorageKey::Account(account.clone()))
                    .await;
            }
        }
    }

    /// Apply one call in a fresh block; returns the block number and the
    /// accounts whose owned-id index changed
    async fn dispatch(
        &self,
        call: &Call,
        who: &AccountId,
    ) -> Result<(u64, ContentDigest, Vec<AccountId>), DispatchError> {
        let calls = self.inner.schema.calls();
        let mut state = self.inner.state.lock().await;
        let block = state.block + 1;
        let digest = match call.params.first() {
            Some(CallParam::Digest(d)) => *d,
            _ => return Err(DispatchError::BadCall),
        };

        let touched = if call.method == calls.create {
            let note = call.params.iter().skip(1).find_map(|p| match p {
                CallParam::Bytes(b) => Some(b.clone()),
                _ => None,
            });
            let price = call.params.iter().skip(1).find_map(|p| match p {
                CallParam::Balance(b) => Some(*b),
                _ => None,
            });
            if state.proofs.contains_key(&digest) {
                return Err(DispatchError::ProofAlreadyClaimed);
            }
            let note = match note {
                Some(bytes) if bytes.is_empty() => None,
                Some(bytes) if bytes.len() > self.inner.max_note_bytes => {
                    return Err(DispatchError::CommentTooLong);
                }
                Some(bytes) => Some(String::from_utf8(bytes).map_err(|_| DispatchError::BadCall)?),
                None => None,
            };
            let mut info = ClaimInfo::new(who.clone(), block)
                .with_claimer(who.clone())
                .with_created_on(block * BLOCK_TIME_MS);
            info.note = note;
            info.price = price;
            state.proofs.insert(digest, info);
            add_owned(&mut state, who, digest);
            vec![who.clone()]
        } else if call.method == calls.revoke {
            let info = state.proofs.get(&digest).ok_or(DispatchError::NoSuchProof)?;
            if info.owner != *who {
                return Err(DispatchError::NotProofOwner);
            }
            state.proofs.remove(&digest);
            remove_owned(&mut state, who, &digest);
            vec![who.clone()]
        } else if call.method == calls.transfer {
            let dest = match call.params.get(1) {
                Some(CallParam::Account(a)) => a.clone(),
                _ => return Err(DispatchError::BadCall),
            };
            let info = state.proofs.get(&digest).ok_or(DispatchError::NoSuchProof)?;
            if info.owner != *who {
                return Err(DispatchError::NotProofOwner);
            }
            if dest == *who {
                return Err(DispatchError::CannotTransferProofToSelf);
            }
            if let Some(info) = state.proofs.get_mut(&digest) {
                info.owner = dest.clone();
            }
            remove_owned(&mut state, who, &digest);
            add_owned(&mut state, &dest, digest);
            vec![who.clone(), dest]
        } else if Some(call.method.as_str()) == calls.purchase {
            let amount = match call.params.get(1) {
                Some(CallParam::Balance(a)) => *a,
                _ => return Err(DispatchError::BadCall),
            };
            let info = state.proofs.get(&digest).ok_or(DispatchError::NoSuchProof)?;
            if amount < info.price.unwrap_or_default() {
                return Err(DispatchError::InsufficientPrice);
            }
            let seller = info.owner.clone();
            let available = state.balances.get(who).copied().unwrap_or_default();
            if available < amount {
                return Err(DispatchError::AccountBalanceNotEnough);
            }
            state.balances.insert(who.clone(), available - amount);
            *state.balances.entry(seller.clone()).or_default() += amount;
            if let Some(info) = state.proofs.get_mut(&digest) {
                info.owner = who.clone();
                info.price = Some(amount);
            }
            remove_owned(&mut state, &seller, &digest);
            add_owned(&mut state, who, digest);
            vec![seller, who.clone()]
        } else {
            return Err(DispatchError::BadCall);
        };

        state.block = block;
        Ok((block, digest, touched))
    }
}

fn add_owned(state: &mut ChainState, owner: &AccountId, digest: ContentDigest) {
    let ids = state.owned.entry(owner.clone()).or_default();
    if !ids.contains(&digest) {
        ids.push(digest);
    }
}

fn remove_owned(state: &mut ChainState, owner: &AccountId, digest: &ContentDigest) {
    if let Some(ids) = state.owned.get_mut(owner) {
        ids.retain(|d| d != digest);
    }
}

/// Encode a claim in the storage layout of `schema`
pub fn encode_claim(schema: ClaimSchema, info: &ClaimInfo) -> RawValue {
    match schema {
        ClaimSchema::OwnerBlock => RawValue::Tuple(vec![
            RawField::Account(info.owner.clone()),
            RawField::Uint(u128::from(info.created_at_block)),
        ]),
        ClaimSchema::OwnerBlockNote => RawValue::Tuple(vec![
            RawField::Account(info.owner.clone()),
            RawField::Uint(u128::from(info.created_at_block)),
            info.created_on
                .map(|m| RawField::Uint(u128::from(m)))
                .unwrap_or(RawField::Null),
            info.note
                .as_ref()
                .map(|n| RawField::Bytes(n.as_bytes().to_vec()))
                .unwrap_or(RawField::Null),
        ]),
        ClaimSchema::ProofInfo => proof_info_value(info),
    }
}

#[async_trait]
impl LedgerClient for MockChain {
    async fn subscribe(
        &self,
        item: &StorageItem,
        key: &StorageKey,
    ) -> Result<LedgerSubscription, LedgerError> {
        self.inner.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(cause) = self.inner.subscribe_failures.get(key) {
            return Err(LedgerError::SubscribeFailed(cause.clone()));
        }

        let (tx, rx) = mpsc::channel(self.inner.buffer_size);
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::SeqCst));

        // Initial value goes out before the subscriber is registered so it
        // always precedes change notifications.
        let initial = self.read(item, key).await;
        tx.send(initial).await.map_err(|_| LedgerError::Closed)?;

        self.inner.subscribers.insert(
            id,
            Subscriber {
                item: item.clone(),
                key: key.clone(),
                tx,
            },
        );
        debug!(subscription = %id, item = %item, key = %key, "Mock chain subscribed");

        // Registered server-side before the ack reaches the caller
        let delay = self
            .inner
            .subscribe_delay
            .lock()
            .ok()
            .and_then(|guard| *guard);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(LedgerSubscription { id, updates: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), LedgerError> {
        self.inner.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.closed_feeds.remove(&id).is_some() {
            return Ok(());
        }
        let failure = self
            .inner
            .subscribers
            .get(&id)
            .and_then(|subscriber| {
                self.inner
                    .unsubscribe_failures
                    .get(&subscriber.key)
                    .map(|cause| cause.clone())
            });
        if let Some(cause) = failure {
            return Err(LedgerError::UnsubscribeFailed(cause));
        }
        match self.inner.subscribers.remove(&id) {
            Some(_) => Ok(()),
            None => Err(LedgerError::UnsubscribeFailed(format!("unknown {id}"))),
        }
    }

    async fn query_once(
        &self,
        item: &StorageItem,
        key: &StorageKey,
    ) -> Result<RawValue, LedgerError> {
        let delay = self.inner.query_delays.get(key).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(cause) = self.inner.query_failures.get(key) {
            return Err(LedgerError::QueryFailed(cause.clone()));
        }
        Ok(self.read(item, key).await)
    }

    fn idempotent_notifications(&self) -> bool {
        self.inner.idempotent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignerProvider for MockChain {
    async fn signer_for(&self, account: &AccountId) -> Result<Signer, TxError> {
        if self.inner.locked_signers.contains_key(account) {
            return Err(TxError::SignerUnavailable(account.to_string()));
        }
        Ok(Signer::new(account.clone(), "mock"))
    }
}

#[async_trait]
impl TxSubmitter for MockChain {
    async fn submit(&self, call: Call, signer: &Signer) -> Result<TxStatusStream, TxError> {
        if call.pallet != self.inner.schema.pallet() {
            return Err(TxError::Rejected(format!("unknown pallet {}", call.pallet)));
        }
        let chain = self.clone();
        let who = signer.account.clone();
        let held = self.inner.hold_transactions.load(Ordering::SeqCst);

        Ok(Box::pin(async_stream::stream! {
            yield TxStatus::Ready;
            yield TxStatus::Broadcast;
            if held {
                debug!(call = %call, "Mock chain holding transaction");
                return;
            }
            match chain.dispatch(&call, &who).await {
                Ok((block, digest, touched)) => {
                    chain.notify_claim(digest, &touched).await;
                    yield TxStatus::InBlock(block);
                    yield TxStatus::Finalized(block);
                }
                Err(e) => {
                    warn!(call = %call, error = %e, "Mock chain dispatch failed");
                    yield TxStatus::Error(e.to_string());
                }
            }
        }))
    }
}
