//! # PoE Sync
//!
//! Live synchronization of proof-of-existence claims with a ledger.
//!
//! Given a file digest, the engine keeps a subscription to its on-chain
//! claim, derives the claim's lifecycle state for the current viewer, and
//! tracks locally submitted transfers and purchases until the ledger
//! confirms them. Given an account, it follows the account's owned-claims
//! index and keeps an ordered list of claim summaries.
//!
//! ## Quick Start
//!
//! ```ignore
//! use poe_core::{AccountId, ClaimSchema, MockChain};
//! use poe_sync::prelude::*;
//!
//! let chain = MockChain::new(ClaimSchema::ProofInfo);
//! let sync = ClaimSync::from_chain(chain, SyncConfig::default())?;
//!
//! sync.select_account(Some(AccountId::from("alice"))).await?;
//! let digest = sync.compute_digest(b"hello");
//! let view = sync.watch_claim(Some(digest)).await?;
//! sync.submit(ClaimAction::Create { digest, note: None, price: None }).await?;
//! ```
//!
//! ## Modules
//!
//! - [`subscription`]: one live ledger subscription per slot
//! - [`state`]: lifecycle derivation and pending-transaction tracking
//! - [`aggregator`]: ordered fan-out lookups for an account's claims
//! - [`engine`]: the single-queue engine and its [`ClaimSync`] handle

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod state;
pub mod stream;
pub mod subscription;

pub use aggregator::{AggregationResult, Aggregator, aggregate};
pub use config::{Preset, SyncConfig};
pub use engine::{AccountClaims, ClaimAction, ClaimSync, ClaimView, SyncEvent};
pub use error::{Result, SyncError};
pub use state::{ClaimState, ClaimStateMachine, PendingExpectation, StateSignal, derive};
pub use stream::{BoxStream, broadcast_to_stream, mpsc_to_stream, watch_to_stream};
pub use subscription::{Lookup, Slot, SlotEvent, SlotNotification, SubscriptionManager, WatchedKey};

/// Commonly used types
pub mod prelude {
    pub use crate::config::{Preset, SyncConfig};
    pub use crate::engine::{AccountClaims, ClaimAction, ClaimSync, ClaimView, SyncEvent};
    pub use crate::error::{Result, SyncError};
    pub use crate::state::{ClaimState, PendingExpectation};
}
