//! Error types for the claim synchronization engine.
//!
//! Every variant carries the key, digest or action it concerns so that a
//! UI snapshot can show what failed without extra bookkeeping.

use std::time::Duration;

use poe_core::{ContentDigest, DecodeError, StorageKey};

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the engine.
///
/// `Clone` so the latest error can ride along in
/// [`ClaimView`](crate::ClaimView) and [`AccountClaims`](crate::AccountClaims).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// A ledger value did not match the configured layout.
    #[error("Decode failed for {key}: {source}")]
    Decode {
        key: StorageKey,
        #[source]
        source: DecodeError,
    },

    /// The ledger refused or dropped a subscription.
    #[error("Subscription failed for {key}: {cause}")]
    SubscriptionFailed { key: StorageKey, cause: String },

    /// The ledger rejected releasing a subscription; it may still be live.
    #[error("Unsubscribe failed for {key}: {cause}")]
    UnsubscribeFailed { key: StorageKey, cause: String },

    /// A one-shot claim lookup failed.
    #[error("Lookup failed for {digest}: {cause}")]
    LookupFailed { digest: ContentDigest, cause: String },

    /// A pending transfer/purchase was not confirmed in time.
    #[error("No confirmation for {digest} after {waited:?}")]
    ConfirmationTimeout {
        digest: ContentDigest,
        waited: Duration,
    },

    /// A transaction could not be built, signed or submitted.
    #[error("{action} submission failed: {cause}")]
    Submission { action: String, cause: String },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine task is no longer running.
    #[error("Claim sync engine is closed")]
    EngineClosed,
}

impl SyncError {
    pub(crate) fn submission(action: impl Into<String>, cause: impl ToString) -> Self {
        SyncError::Submission {
            action: action.into(),
            cause: cause.to_string(),
        }
    }
}
