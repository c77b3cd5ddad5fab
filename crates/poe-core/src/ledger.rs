//! Ledger query/subscribe collaborator
//!
//! The ledger client is external; this module only fixes the interface the
//! synchronization engine consumes.
//!
//! ## Key Types
//!
//! - [`StorageItem`]: a `(pallet, item)` storage location
//! - [`StorageKey`]: the map key (a digest or an account)
//! - [`LedgerClient`]: subscribe / unsubscribe / query-once

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::account::AccountId;
use crate::digest::ContentDigest;
use crate::error::LedgerError;
use crate::raw::RawValue;

/// A storage map inside a pallet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageItem {
    pub pallet: String,
    pub item: String,
}

impl StorageItem {
    pub fn new(pallet: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            pallet: pallet.into(),
            item: item.into(),
        }
    }
}

impl fmt::Display for StorageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pallet, self.item)
    }
}

/// Key into a storage map
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKey {
    Digest(ContentDigest),
    Account(AccountId),
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKey::Digest(d) => write!(f, "digest:{}", d.short_hex()),
            StorageKey::Account(a) => write!(f, "account:{}", a.short_id()),
        }
    }
}

impl From<ContentDigest> for StorageKey {
    fn from(d: ContentDigest) -> Self {
        StorageKey::Digest(d)
    }
}

impl From<AccountId> for StorageKey {
    fn from(a: AccountId) -> Self {
        StorageKey::Account(a)
    }
}

/// Identifier the ledger client assigns to a live subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// An acknowledged subscription
///
/// `updates` yields the current value first and then one value per change
/// notification, in ledger order. It closes when the ledger drops the feed.
#[derive(Debug)]
pub struct LedgerSubscription {
    pub id: SubscriptionId,
    pub updates: mpsc::Receiver<RawValue>,
}

/// Ledger query/subscribe interface
///
/// Every successful `subscribe` must eventually be matched by exactly one
/// `unsubscribe` with the returned id.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    /// Open a change feed for `item[key]`
    async fn subscribe(
        &self,
        item: &StorageItem,
        key: &StorageKey,
    ) -> Result<LedgerSubscription, LedgerError>;

    /// Release a change feed
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), LedgerError>;

    /// Read `item[key]` once
    async fn query_once(&self, item: &StorageItem, key: &StorageKey)
    -> Result<RawValue, LedgerError>;

    /// Whether the client promises never to repeat an unchanged value
    ///
    /// When true, consumers may collapse immediately repeated identical
    /// values; otherwise they must pass them through.
    fn idempotent_notifications(&self) -> bool {
        false
    }
}
