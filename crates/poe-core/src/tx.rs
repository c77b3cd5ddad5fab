//! Transaction submission and signer collaborators
//!
//! Signing and broadcast mechanics live outside this crate. The engine only
//! builds a [`Call`], resolves a [`Signer`] and follows the status stream.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::digest::ContentDigest;
use crate::error::TxError;

/// A positional call argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CallParam {
    Digest(ContentDigest),
    Account(AccountId),
    Bytes(Vec<u8>),
    Balance(u128),
}

/// Call descriptor handed to the submitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub pallet: String,
    pub method: String,
    pub params: Vec<CallParam>,
}

impl Call {
    pub fn new(pallet: impl Into<String>, method: impl Into<String>, params: Vec<CallParam>) -> Self {
        Self {
            pallet: pallet.into(),
            method: method.into(),
            params,
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({} params)", self.pallet, self.method, self.params.len())
    }
}

/// Lifecycle of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// Accepted into the local pool
    Ready,
    /// Gossiped to peers
    Broadcast,
    /// Included in a block
    InBlock(u64),
    /// Included in a finalized block
    Finalized(u64),
    /// Dropped, invalid, or failed during dispatch
    Error(String),
}

impl TxStatus {
    /// No further statuses follow a terminal one
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Finalized(_) | TxStatus::Error(_))
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStatus::Ready => write!(f, "Ready"),
            TxStatus::Broadcast => write!(f, "Broadcast"),
            TxStatus::InBlock(n) => write!(f, "InBlock(#{n})"),
            TxStatus::Finalized(n) => write!(f, "Finalized(#{n})"),
            TxStatus::Error(reason) => write!(f, "Error: {reason}"),
        }
    }
}

/// Stream of status updates for one submission
pub type TxStatusStream = Pin<Box<dyn Stream<Item = TxStatus> + Send>>;

/// A resolved signing capability for one account
///
/// Opaque to the engine; the submitter knows what `handle` refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
    pub account: AccountId,
    pub handle: String,
}

impl Signer {
    pub fn new(account: AccountId, handle: impl Into<String>) -> Self {
        Self {
            account,
            handle: handle.into(),
        }
    }
}

/// Resolves a selected account to a signer
///
/// May negotiate with an external extension, hence async.
#[async_trait]
pub trait SignerProvider: Send + Sync + 'static {
    async fn signer_for(&self, account: &AccountId) -> Result<Signer, TxError>;
}

/// Signs and broadcasts calls
#[async_trait]
pub trait TxSubmitter: Send + Sync + 'static {
    async fn submit(&self, call: Call, signer: &Signer) -> Result<TxStatusStream, TxError>;
}
