//! Error types for the claim core

use thiserror::Error;

use crate::schema::ClaimSchema;

/// Errors produced while mapping a raw ledger value into a typed record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The raw value does not have the shape the configured schema expects.
    #[error("Schema mismatch for {schema}: expected {expected}, found {found}")]
    SchemaMismatch {
        schema: ClaimSchema,
        expected: String,
        found: String,
    },

    /// One field could not be decoded.
    #[error("Malformed field `{field}`: {cause}")]
    MalformedField { field: &'static str, cause: String },
}

impl DecodeError {
    pub(crate) fn mismatch(
        schema: ClaimSchema,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::SchemaMismatch {
            schema,
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn malformed(field: &'static str, cause: impl Into<String>) -> Self {
        Self::MalformedField {
            field,
            cause: cause.into(),
        }
    }
}

/// Errors reported by the ledger query/subscribe collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Unsubscribe failed: {0}")]
    UnsubscribeFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Ledger connection closed")]
    Closed,
}

/// Errors related to digest parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    #[error("Invalid digest hex: {0}")]
    InvalidHex(String),

    #[error("Invalid digest length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Errors raised while handing a call to the signer/submitter collaborators
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("No signer available for account {0}")]
    SignerUnavailable(String),

    #[error("Call rejected: {0}")]
    Rejected(String),

    #[error("Submission failed: {0}")]
    Submission(String),
}
