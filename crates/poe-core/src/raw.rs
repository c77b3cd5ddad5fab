//! Raw storage values as handed over by the ledger client
//!
//! The ledger client is expected to have done the SCALE/JSON unpacking into
//! this neutral shape. Whether the shape means anything is decided by the
//! schema-aware decoder in [`crate::schema`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::account::AccountId;

/// A single scalar or byte field inside a raw value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RawField {
    /// An account address
    Account(AccountId),
    /// An unsigned integer (block numbers, moments, balances)
    Uint(u128),
    /// A byte vector (`Vec<u8>` storage fields)
    Bytes(Vec<u8>),
    /// Text already decoded by the client
    Text(String),
    /// An explicit null/none inside a composite
    Null,
}

impl RawField {
    /// Name of the variant, used in mismatch diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            RawField::Account(_) => "account",
            RawField::Uint(_) => "uint",
            RawField::Bytes(_) => "bytes",
            RawField::Text(_) => "text",
            RawField::Null => "null",
        }
    }
}

/// A storage value read from the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "shape", content = "fields", rename_all = "snake_case")]
pub enum RawValue {
    /// No value is stored under the key
    #[default]
    None,
    /// Positional tuple
    Tuple(Vec<RawField>),
    /// Named struct fields
    Struct(BTreeMap<String, RawField>),
    /// A vector of fields (index storage such as owned ids)
    List(Vec<RawField>),
}

impl RawValue {
    /// Whether the ledger reported no value
    pub fn is_none(&self) -> bool {
        matches!(self, RawValue::None)
    }

    /// Short description of the shape, used in mismatch diagnostics
    pub fn shape(&self) -> String {
        match self {
            RawValue::None => "none".to_string(),
            RawValue::Tuple(fields) => format!("tuple({})", fields.len()),
            RawValue::Struct(fields) => {
                let names: Vec<&str> = fields.keys().map(String::as_str).collect();
                format!("struct{{{}}}", names.join(","))
            }
            RawValue::List(fields) => format!("list({})", fields.len()),
        }
    }

    /// Build a struct value from `(name, field)` pairs
    pub fn structure<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, RawField)>,
        K: Into<String>,
    {
        RawValue::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.shape())
    }
}
