//! Typed claim records
//!
//! [`ClaimRecord`] is the ledger's view of one digest. Absence has its own
//! variant: block 0 is a real chain height and is never used as a marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::digest::ContentDigest;

/// Fields of a present claim
///
/// A superset of the layouts the decoder knows; fields a layout does not
/// carry stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimInfo {
    /// Current owner
    pub owner: AccountId,
    /// Account that originally created the claim, when the layout records it
    pub claimer: Option<AccountId>,
    /// Block the claim was written in
    pub created_at_block: u64,
    /// Note / comment attached to the claim
    pub note: Option<String>,
    /// Asking price (or last paid amount after a purchase)
    pub price: Option<u128>,
    /// Ledger timestamp in milliseconds since the Unix epoch
    pub created_on: Option<u64>,
}

impl ClaimInfo {
    /// Minimal record: owner and block only
    pub fn new(owner: AccountId, created_at_block: u64) -> Self {
        Self {
            owner,
            claimer: None,
            created_at_block,
            note: None,
            price: None,
            created_on: None,
        }
    }

    pub fn with_claimer(mut self, claimer: AccountId) -> Self {
        self.claimer = Some(claimer);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_price(mut self, price: u128) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_created_on(mut self, millis: u64) -> Self {
        self.created_on = Some(millis);
        self
    }

    /// `created_on` as a UTC datetime
    pub fn created_on_utc(&self) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(self.created_on?).ok()?;
        DateTime::from_timestamp_millis(millis)
    }
}

/// The ledger's view of a digest at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ClaimRecord {
    /// Never claimed, or revoked and not reissued
    #[default]
    Absent,
    /// A live claim
    Present(ClaimInfo),
}

impl ClaimRecord {
    pub fn is_present(&self) -> bool {
        matches!(self, ClaimRecord::Present(_))
    }

    /// The claim fields, if present
    pub fn info(&self) -> Option<&ClaimInfo> {
        match self {
            ClaimRecord::Present(info) => Some(info),
            ClaimRecord::Absent => None,
        }
    }

    /// Current owner, if present
    pub fn owner(&self) -> Option<&AccountId> {
        self.info().map(|info| &info.owner)
    }
}

impl From<Option<ClaimInfo>> for ClaimRecord {
    fn from(info: Option<ClaimInfo>) -> Self {
        match info {
            Some(info) => ClaimRecord::Present(info),
            None => ClaimRecord::Absent,
        }
    }
}

/// Outcome of looking up one digest during aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimLookup {
    /// The lookup succeeded (the record may still be absent)
    Found(ClaimRecord),
    /// The lookup failed; siblings are unaffected
    LookupFailed { cause: String },
}

impl ClaimLookup {
    pub fn record(&self) -> Option<&ClaimRecord> {
        match self {
            ClaimLookup::Found(record) => Some(record),
            ClaimLookup::LookupFailed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ClaimLookup::LookupFailed { .. })
    }
}

/// One row of an account's claim list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimListEntry {
    pub digest: ContentDigest,
    pub lookup: ClaimLookup,
}

impl ClaimListEntry {
    pub fn found(digest: ContentDigest, record: ClaimRecord) -> Self {
        Self {
            digest,
            lookup: ClaimLookup::Found(record),
        }
    }

    pub fn failed(digest: ContentDigest, cause: impl Into<String>) -> Self {
        Self {
            digest,
            lookup: ClaimLookup::LookupFailed {
                cause: cause.into(),
            },
        }
    }

    /// Claim fields when the lookup succeeded and the claim is present
    pub fn info(&self) -> Option<&ClaimInfo> {
        self.lookup.record().and_then(ClaimRecord::info)
    }
}
