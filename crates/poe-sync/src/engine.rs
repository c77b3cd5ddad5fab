//! Claim synchronization engine
//!
//! One engine task owns the [`SubscriptionManager`], the
//! [`ClaimStateMachine`] and the [`Aggregator`]. UI commands, slot
//! notifications, aggregation results, transaction failures and the
//! pending-confirmation deadline are all handled to completion inside that
//! task, one at a time. [`ClaimSync`] is the cloneable handle the UI layer
//! talks to; it publishes snapshots through `watch` channels and a stream of
//! [`SyncEvent`]s.
//!
//! Every handler runs inside a `claim_sync` span carrying the engine's
//! session id and the selected account, and the tasks it spawns inherit
//! that span. JSON log lines therefore show which account an event
//! belongs to.
//!
//! ## Example
//!
//! ```rust,ignore
//! let sync = ClaimSync::from_chain(chain, SyncConfig::default())?;
//! sync.select_account(Some(AccountId::from("alice"))).await?;
//!
//! let digest = sync.compute_digest(&std::fs::read("invoice.pdf")?);
//! let mut view = sync.watch_claim(Some(digest)).await?;
//! while view.changed().await.is_ok() {
//!     println!("{}", view.borrow().state);
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use poe_core::{
    AccountId, Blake3Hasher, Call, CallParam, ClaimDecoder, ClaimListEntry, ClaimRecord,
    ClaimSchema, ContentDigest, ContentHasher, LedgerClient, RawValue, SignerProvider, StorageKey,
    TxStatus, TxStatusStream, TxSubmitter,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, field, info, warn, warn_span};
use uuid::Uuid;

use crate::aggregator::{AggregationResult, Aggregator};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::state::{ClaimState, ClaimStateMachine, PendingExpectation, StateSignal};
use crate::stream::{BoxStream, broadcast_to_stream, mpsc_to_stream};
use crate::subscription::{Slot, SlotEvent, SlotNotification, SubscriptionManager};

/// A claim lifecycle transaction requested by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimAction {
    Create {
        digest: ContentDigest,
        note: Option<String>,
        price: Option<u128>,
    },
    Revoke {
        digest: ContentDigest,
    },
    Transfer {
        digest: ContentDigest,
        to: AccountId,
    },
    Purchase {
        digest: ContentDigest,
        amount: u128,
    },
}

impl ClaimAction {
    pub fn digest(&self) -> ContentDigest {
        match self {
            ClaimAction::Create { digest, .. }
            | ClaimAction::Revoke { digest }
            | ClaimAction::Transfer { digest, .. }
            | ClaimAction::Purchase { digest, .. } => *digest,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClaimAction::Create { .. } => "create",
            ClaimAction::Revoke { .. } => "revoke",
            ClaimAction::Transfer { .. } => "transfer",
            ClaimAction::Purchase { .. } => "purchase",
        }
    }

    /// Build the call for a pallet layout.
    pub fn to_call(&self, schema: ClaimSchema) -> Result<Call> {
        let calls = schema.calls();
        let call = match self {
            ClaimAction::Create {
                digest,
                note,
                price,
            } => {
                let mut params = vec![CallParam::Digest(*digest)];
                let note = note.clone().unwrap_or_default().into_bytes();
                match schema {
                    ClaimSchema::OwnerBlock => {}
                    ClaimSchema::OwnerBlockNote => params.push(CallParam::Bytes(note)),
                    ClaimSchema::ProofInfo => {
                        params.push(CallParam::Bytes(note));
                        params.push(CallParam::Balance(price.unwrap_or_default()));
                    }
                }
                Call::new(schema.pallet(), calls.create, params)
            }
            ClaimAction::Revoke { digest } => Call::new(
                schema.pallet(),
                calls.revoke,
                vec![CallParam::Digest(*digest)],
            ),
            ClaimAction::Transfer { digest, to } => Call::new(
                schema.pallet(),
                calls.transfer,
                vec![CallParam::Digest(*digest), CallParam::Account(to.clone())],
            ),
            ClaimAction::Purchase { digest, amount } => {
                let method = calls.purchase.ok_or_else(|| {
                    SyncError::submission(self.to_string(), format!("{schema} has no purchase call"))
                })?;
                Call::new(
                    schema.pallet(),
                    method,
                    vec![CallParam::Digest(*digest), CallParam::Balance(*amount)],
                )
            }
        };
        Ok(call)
    }

    /// Owner the ledger should show once the action lands, if it is tracked.
    pub fn expectation(&self, signer: &AccountId) -> Option<PendingExpectation> {
        match self {
            ClaimAction::Transfer { to, .. } => Some(PendingExpectation::Transfer { to: to.clone() }),
            ClaimAction::Purchase { .. } => Some(PendingExpectation::Purchase {
                buyer: signer.clone(),
            }),
            ClaimAction::Create { .. } | ClaimAction::Revoke { .. } => None,
        }
    }
}

impl fmt::Display for ClaimAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name(), self.digest().short_hex())
    }
}

/// Snapshot of the watched digest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimView {
    pub digest: Option<ContentDigest>,
    /// `None` until the ledger has reported a value
    pub record: Option<ClaimRecord>,
    pub state: ClaimState,
    pub error: Option<SyncError>,
}

/// Snapshot of the watched account's claim list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountClaims {
    pub account: Option<AccountId>,
    /// In the order of the ledger's owned-id index
    pub entries: Vec<ClaimListEntry>,
    pub error: Option<SyncError>,
}

/// Things that happened inside the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    ClaimStateChanged {
        digest: ContentDigest,
        state: ClaimState,
    },
    Confirmed {
        digest: ContentDigest,
        expectation: PendingExpectation,
    },
    Contradicted {
        digest: ContentDigest,
        expectation: PendingExpectation,
        reason: String,
    },
    ConfirmationTimeout {
        digest: ContentDigest,
        expectation: PendingExpectation,
        waited: Duration,
    },
    TxStatus {
        action: String,
        digest: ContentDigest,
        status: TxStatus,
    },
    AccountClaimsUpdated {
        account: AccountId,
        count: usize,
    },
    Error(SyncError),
}

enum Command {
    WatchClaim {
        digest: Option<ContentDigest>,
        done: oneshot::Sender<()>,
    },
    SelectAccount {
        account: Option<AccountId>,
        done: oneshot::Sender<()>,
    },
    WatchAccount {
        account: Option<AccountId>,
        done: oneshot::Sender<()>,
    },
    Refresh {
        done: oneshot::Sender<()>,
    },
    Submit {
        action: ClaimAction,
        timeout: Duration,
        reply: oneshot::Sender<Result<TxStatusStream>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

enum Internal {
    TxFailed {
        digest: ContentDigest,
        reason: String,
    },
}

/// Handle to a running claim synchronization engine
#[derive(Clone)]
pub struct ClaimSync {
    commands: mpsc::Sender<Command>,
    claim_rx: watch::Receiver<ClaimView>,
    account_rx: watch::Receiver<AccountClaims>,
    events: broadcast::Sender<SyncEvent>,
    hasher: Arc<dyn ContentHasher>,
    config: SyncConfig,
    session: Uuid,
}

impl ClaimSync {
    /// Spawn an engine over the given collaborators.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        submitter: Arc<dyn TxSubmitter>,
        signers: Arc<dyn SignerProvider>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (commands, command_rx) = mpsc::channel(64);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (aggregation_tx, aggregation_rx) = mpsc::channel(16);
        let (claim_tx, claim_rx) = watch::channel(ClaimView::default());
        let (account_tx, account_rx) = watch::channel(AccountClaims::default());
        let (events, _) = broadcast::channel(config.event_channel_capacity);

        let (manager, notifications) = SubscriptionManager::new(
            ledger,
            config.event_channel_capacity,
            config.teardown_timeout,
            config.dedup_idempotent,
        );
        let decoder = config.decoder();
        let aggregator = Aggregator::new(
            manager.lookups(),
            decoder,
            config.schema.claims_item(),
        );

        let session = Uuid::new_v4();
        let engine = Engine {
            session,
            config: config.clone(),
            decoder,
            manager,
            notifications,
            commands: command_rx,
            internal_tx,
            internal_rx,
            aggregator,
            aggregation_tx,
            aggregation_rx,
            machine: ClaimStateMachine::default(),
            watched_digest: None,
            claim_error: None,
            last_state: ClaimState::default(),
            claim_tx,
            selected: None,
            claims_account: None,
            owned_known: false,
            account_tx,
            events: events.clone(),
            submitter,
            signers,
        };
        tokio::spawn(engine.run());
        info!(session = %session, schema = %config.schema, "Claim sync engine started");

        Ok(Self {
            commands,
            claim_rx,
            account_rx,
            events,
            hasher: Arc::new(Blake3Hasher),
            config,
            session,
        })
    }

    /// Spawn an engine over a single value implementing every collaborator.
    pub fn from_chain<C>(chain: C, config: SyncConfig) -> Result<Self>
    where
        C: LedgerClient + TxSubmitter + SignerProvider,
    {
        let chain = Arc::new(chain);
        Self::new(chain.clone(), chain.clone(), chain, config)
    }

    /// Replace the digest function.
    ///
    /// Must match the hash the ledger keys claims by, or every digest
    /// computed here looks unclaimed.
    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Identifies this engine's log lines.
    pub fn session_id(&self) -> Uuid {
        self.session
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn compute_digest(&self, bytes: &[u8]) -> ContentDigest {
        self.hasher.hash(bytes)
    }

    /// Watch a digest's claim, or stop watching with `None`.
    ///
    /// The returned receiver already reflects the new digest.
    pub async fn watch_claim(
        &self,
        digest: Option<ContentDigest>,
    ) -> Result<watch::Receiver<ClaimView>> {
        self.request(|done| Command::WatchClaim { digest, done })
            .await?;
        Ok(self.claim_rx.clone())
    }

    /// Set the signing account; it is also the viewer and the listed account.
    pub async fn select_account(&self, account: Option<AccountId>) -> Result<()> {
        self.request(|done| Command::SelectAccount { account, done })
            .await
    }

    /// List claims of an account without changing the signing account.
    pub async fn watch_account_claims(
        &self,
        account: Option<AccountId>,
    ) -> Result<watch::Receiver<AccountClaims>> {
        self.request(|done| Command::WatchAccount { account, done })
            .await?;
        Ok(self.account_rx.clone())
    }

    /// Re-run the per-id lookups for the listed account.
    pub async fn refresh_account_claims(&self) -> Result<()> {
        self.request(|done| Command::Refresh { done }).await
    }

    /// Sign and submit an action with the configured confirmation timeout.
    pub async fn submit(&self, action: ClaimAction) -> Result<TxStatusStream> {
        self.submit_with_timeout(action, self.config.confirmation_timeout)
            .await
    }

    /// Sign and submit an action.
    ///
    /// Transfers and purchases of the watched digest put the view into a
    /// pending state until the ledger confirms, contradicts, or `timeout`
    /// passes. The engine keeps driving the returned stream even if the
    /// caller drops it.
    pub async fn submit_with_timeout(
        &self,
        action: ClaimAction,
        timeout: Duration,
    ) -> Result<TxStatusStream> {
        self.request(|reply| Command::Submit {
            action,
            timeout,
            reply,
        })
        .await?
    }

    pub fn claim_view(&self) -> watch::Receiver<ClaimView> {
        self.claim_rx.clone()
    }

    pub fn account_claims(&self) -> watch::Receiver<AccountClaims> {
        self.account_rx.clone()
    }

    /// Stream of events from now on.
    pub fn events(&self) -> BoxStream<SyncEvent> {
        broadcast_to_stream(self.events.subscribe())
    }

    /// Release every subscription and stop the engine.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|done| Command::Shutdown { done }).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SyncError::EngineClosed)?;
        rx.await.map_err(|_| SyncError::EngineClosed)
    }
}

struct Engine {
    session: Uuid,
    config: SyncConfig,
    decoder: ClaimDecoder,
    manager: SubscriptionManager,
    notifications: mpsc::Receiver<SlotNotification>,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    aggregator: Aggregator,
    aggregation_tx: mpsc::Sender<AggregationResult>,
    aggregation_rx: mpsc::Receiver<AggregationResult>,

    machine: ClaimStateMachine,
    watched_digest: Option<ContentDigest>,
    claim_error: Option<SyncError>,
    last_state: ClaimState,
    claim_tx: watch::Sender<ClaimView>,

    selected: Option<AccountId>,
    claims_account: Option<AccountId>,
    owned_known: bool,
    account_tx: watch::Sender<AccountClaims>,

    events: broadcast::Sender<SyncEvent>,
    submitter: Arc<dyn TxSubmitter>,
    signers: Arc<dyn SignerProvider>,
}

impl Engine {
    async fn run(mut self) {
        loop {
            let deadline = self.machine.deadline();
            let span = self.span();
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        self.shutdown().instrument(span).await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).instrument(span).await,
                    None => {
                        self.shutdown().instrument(span).await;
                        break;
                    }
                },
                Some(internal) = self.internal_rx.recv() => {
                    span.in_scope(|| self.handle_internal(internal))
                }
                Some(notification) = self.notifications.recv() => {
                    span.in_scope(|| self.handle_notification(notification))
                }
                Some(result) = self.aggregation_rx.recv() => {
                    span.in_scope(|| self.handle_aggregation(result))
                }
                _ = sleep_until(deadline) => span.in_scope(|| self.handle_timeout()),
            }
        }
        info!("Claim sync engine stopped");
    }

    /// Warn level so the account rides along whenever engine warnings are
    /// enabled.
    fn span(&self) -> Span {
        let span = warn_span!("claim_sync", session = %self.session, account = field::Empty);
        if let Some(account) = &self.selected {
            span.record("account", field::display(account));
        }
        span
    }

    async fn shutdown(&mut self) {
        self.aggregator.clear();
        self.manager.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::WatchClaim { digest, done } => {
                self.set_claim(digest).await;
                let _ = done.send(());
            }
            Command::SelectAccount { account, done } => {
                debug!(account = ?account, "Account selected");
                if let Some(account) = &account {
                    Span::current().record("account", field::display(account));
                }
                self.selected = account.clone();
                self.machine.set_viewer(account.clone());
                self.publish_claim();
                self.set_claims_account(account).await;
                let _ = done.send(());
            }
            Command::WatchAccount { account, done } => {
                self.set_claims_account(account).await;
                let _ = done.send(());
            }
            Command::Refresh { done } => {
                if self.owned_known {
                    self.aggregator.restart(self.aggregation_tx.clone());
                }
                let _ = done.send(());
            }
            Command::Submit {
                action,
                timeout,
                reply,
            } => self.submit(action, timeout, reply),
            // Handled by the run loop
            Command::Shutdown { done } => {
                let _ = done.send(());
            }
        }
    }

    async fn set_claim(&mut self, digest: Option<ContentDigest>) {
        let same = digest == self.watched_digest;
        // A feed that ended leaves the slot unbound; watching again retries
        if same && (digest.is_none() || self.manager.watched(Slot::Claim).is_some()) {
            return;
        }
        if !same {
            self.watched_digest = digest;
            self.machine.reset();
        }
        self.claim_error = None;
        match digest {
            Some(d) => {
                let item = self.config.schema.claims_item();
                self.manager.watch(Slot::Claim, item, d.into()).await;
            }
            None => self.manager.unwatch(Slot::Claim).await,
        }
        self.publish_claim();
    }

    async fn set_claims_account(&mut self, account: Option<AccountId>) {
        let bound = self.manager.watched(Slot::OwnedClaims).is_some();
        let indexed = self.config.schema.owned_item().is_some();
        if account == self.claims_account && (account.is_none() || bound || !indexed) {
            return;
        }
        self.claims_account = account.clone();
        self.aggregator.clear();
        self.owned_known = false;

        let mut view = AccountClaims {
            account: account.clone(),
            ..Default::default()
        };
        match (account, self.config.schema.owned_item()) {
            (Some(account), Some(item)) => {
                self.manager
                    .watch(Slot::OwnedClaims, item, account.into())
                    .await;
            }
            (Some(account), None) => {
                self.manager.unwatch(Slot::OwnedClaims).await;
                let error = SyncError::SubscriptionFailed {
                    key: StorageKey::Account(account),
                    cause: format!("{} has no owned-claims index", self.config.schema),
                };
                self.emit(SyncEvent::Error(error.clone()));
                view.error = Some(error);
            }
            (None, _) => self.manager.unwatch(Slot::OwnedClaims).await,
        }
        self.account_tx.send_replace(view);
    }

    fn handle_notification(&mut self, notification: SlotNotification) {
        let current = self.manager.accept(&notification);
        let SlotNotification {
            slot,
            generation,
            key,
            event,
        } = notification;
        match event {
            // Usually raised by a watch that was just superseded
            SlotEvent::ReleaseFailed(cause) => {
                let error = SyncError::UnsubscribeFailed { key, cause };
                warn!(slot = %slot, error = %error, "Sync error");
                self.emit(SyncEvent::Error(error));
            }
            _ if !current => {
                debug!(
                    slot = %slot,
                    generation,
                    "Dropping notification from superseded watch"
                );
            }
            SlotEvent::Value(raw) => match slot {
                Slot::Claim => self.on_claim_value(key, &raw),
                Slot::OwnedClaims => self.on_owned_value(key, &raw),
            },
            SlotEvent::Failed(cause) => self.feed_ended(slot, generation, key, cause),
            SlotEvent::Closed => {
                self.feed_ended(slot, generation, key, "ledger closed the feed".to_string())
            }
        }
    }

    /// Surface a dead feed and unbind its slot so the key can be watched
    /// again.
    fn feed_ended(&mut self, slot: Slot, generation: u64, key: StorageKey, cause: String) {
        self.manager.forget(slot, generation);
        self.surface(slot, SyncError::SubscriptionFailed { key, cause });
    }

    fn on_claim_value(&mut self, key: StorageKey, raw: &RawValue) {
        let decoded = match self.decoder.decode(raw) {
            Ok(decoded) => decoded,
            Err(source) => {
                self.surface(Slot::Claim, SyncError::Decode { key, source });
                return;
            }
        };
        for error in &decoded.malformed {
            warn!(key = %key, error = %error, "Claim field left empty");
        }

        let changed = self.machine.record() != Some(&decoded.record);
        if let Some(signal) = self.machine.observe(decoded.record) {
            self.emit_signal(signal);
        }
        self.claim_error = None;
        self.publish_claim();

        let listed = self
            .watched_digest
            .is_some_and(|d| self.aggregator.contains(&d));
        if changed && listed && self.owned_known {
            debug!(key = %key, "Listed claim changed, refreshing account claims");
            self.aggregator.restart(self.aggregation_tx.clone());
        }
    }

    fn on_owned_value(&mut self, key: StorageKey, raw: &RawValue) {
        match self.decoder.decode_owned_ids(raw) {
            Ok(ids) => {
                if !self.owned_known || ids != self.aggregator.ids() {
                    debug!(key = %key, count = ids.len(), "Owned claims changed");
                    self.owned_known = true;
                    self.aggregator.start(ids, self.aggregation_tx.clone());
                }
            }
            Err(source) => self.surface(Slot::OwnedClaims, SyncError::Decode { key, source }),
        }
    }

    fn handle_aggregation(&mut self, result: AggregationResult) {
        if !self.aggregator.accept(&result) {
            debug!(generation = result.generation, "Dropping superseded aggregation");
            return;
        }
        let count = result.entries.len();
        self.account_tx.send_modify(|view| {
            view.entries = result.entries;
            view.error = None;
        });
        if let Some(account) = self.claims_account.clone() {
            debug!(account = %account, count, "Account claims updated");
            self.emit(SyncEvent::AccountClaimsUpdated { account, count });
        }
    }

    fn handle_timeout(&mut self) {
        if let Some(signal) = self.machine.poll_timeout(Instant::now()) {
            self.emit_signal(signal);
            self.publish_claim();
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::TxFailed { digest, reason } => {
                if Some(digest) != self.watched_digest {
                    return;
                }
                if let Some(signal) = self.machine.fail_pending(reason) {
                    self.emit_signal(signal);
                    self.publish_claim();
                }
            }
        }
    }

    fn submit(
        &mut self,
        action: ClaimAction,
        timeout: Duration,
        reply: oneshot::Sender<Result<TxStatusStream>>,
    ) {
        let label = action.to_string();
        let Some(account) = self.selected.clone() else {
            let _ = reply.send(Err(SyncError::submission(label, "no account selected")));
            return;
        };
        if let ClaimAction::Create {
            note: Some(note), ..
        } = &action
        {
            if note.len() > self.config.max_note_bytes {
                let cause = format!(
                    "note is {} bytes, limit is {}",
                    note.len(),
                    self.config.max_note_bytes
                );
                let _ = reply.send(Err(SyncError::submission(label, cause)));
                return;
            }
        }
        let call = match action.to_call(self.config.schema) {
            Ok(call) => call,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let digest = action.digest();
        if Some(digest) == self.watched_digest {
            if let Some(expectation) = action.expectation(&account) {
                self.machine
                    .begin_pending(expectation, Instant::now() + timeout);
                self.publish_claim();
            }
        }

        info!(action = %label, account = %account, call = %call, "Submitting claim transaction");
        tokio::spawn(
            run_submission(
                Arc::clone(&self.signers),
                Arc::clone(&self.submitter),
                account,
                call,
                label,
                digest,
                reply,
                self.events.clone(),
                self.internal_tx.clone(),
            )
            .in_current_span(),
        );
    }

    fn surface(&mut self, slot: Slot, error: SyncError) {
        warn!(slot = %slot, error = %error, "Sync error");
        self.emit(SyncEvent::Error(error.clone()));
        match slot {
            Slot::Claim => {
                self.claim_error = Some(error);
                self.publish_claim();
            }
            Slot::OwnedClaims => {
                self.account_tx.send_modify(|view| view.error = Some(error));
            }
        }
    }

    fn emit_signal(&mut self, signal: StateSignal) {
        let Some(digest) = self.watched_digest else {
            return;
        };
        let event = match signal {
            StateSignal::Confirmed { expectation } => {
                info!(digest = %digest, expectation = ?expectation, "Pending claim change confirmed");
                SyncEvent::Confirmed {
                    digest,
                    expectation,
                }
            }
            StateSignal::Contradicted {
                expectation,
                reason,
            } => {
                warn!(digest = %digest, expectation = ?expectation, reason = %reason, "Pending claim change contradicted");
                SyncEvent::Contradicted {
                    digest,
                    expectation,
                    reason,
                }
            }
            StateSignal::TimedOut {
                expectation,
                waited,
            } => {
                warn!(digest = %digest, waited = ?waited, "Pending claim change timed out");
                self.claim_error = Some(SyncError::ConfirmationTimeout { digest, waited });
                SyncEvent::ConfirmationTimeout {
                    digest,
                    expectation,
                    waited,
                }
            }
        };
        self.emit(event);
    }

    fn publish_claim(&mut self) {
        let view = ClaimView {
            digest: self.watched_digest,
            record: self.machine.record().cloned(),
            state: self.machine.state(),
            error: self.claim_error.clone(),
        };
        let state = view.state;
        self.claim_tx.send_replace(view);

        if state != self.last_state {
            self.last_state = state;
            if let Some(digest) = self.watched_digest {
                debug!(digest = %digest, state = %state, "Claim state changed");
                self.emit(SyncEvent::ClaimStateChanged { digest, state });
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_submission(
    signers: Arc<dyn SignerProvider>,
    submitter: Arc<dyn TxSubmitter>,
    account: AccountId,
    call: Call,
    label: String,
    digest: ContentDigest,
    reply: oneshot::Sender<Result<TxStatusStream>>,
    events: broadcast::Sender<SyncEvent>,
    internal: mpsc::UnboundedSender<Internal>,
) {
    let fail = |cause: String| {
        let _ = internal.send(Internal::TxFailed {
            digest,
            reason: cause.clone(),
        });
        SyncError::submission(label.clone(), cause)
    };

    let signer = match signers.signer_for(&account).await {
        Ok(signer) => signer,
        Err(e) => {
            warn!(action = %label, error = %e, "No signer");
            let _ = reply.send(Err(fail(e.to_string())));
            return;
        }
    };
    let mut statuses = match submitter.submit(call, &signer).await {
        Ok(statuses) => statuses,
        Err(e) => {
            warn!(action = %label, error = %e, "Submission rejected");
            let _ = reply.send(Err(fail(e.to_string())));
            return;
        }
    };

    let (tx, rx) = mpsc::channel(16);
    let _ = reply.send(Ok(mpsc_to_stream(rx)));

    while let Some(status) = statuses.next().await {
        debug!(action = %label, status = %status, "Transaction status");
        if let TxStatus::Error(reason) = &status {
            warn!(action = %label, reason = %reason, "Transaction failed");
            let _ = internal.send(Internal::TxFailed {
                digest,
                reason: reason.clone(),
            });
        }
        let _ = events.send(SyncEvent::TxStatus {
            action: label.clone(),
            digest,
            status: status.clone(),
        });
        // Keep driving the transaction if the caller stopped listening
        let _ = tx.send(status).await;
    }
}
