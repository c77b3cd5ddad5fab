//! Account identities
//!
//! Accounts are opaque ledger addresses (SS58 strings on the chains this
//! crate was built against). The core never interprets them beyond exact
//! equality, which is all owner derivation needs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A ledger account address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Wrap an address string
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short display form for logs (first 8 characters)
    pub fn short_id(&self) -> String {
        self.0.chars().take(8).collect()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
