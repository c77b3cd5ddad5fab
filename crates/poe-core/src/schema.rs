//! Schema-aware claim decoding
//!
//! Different pallet versions store "the same" claim in incompatible shapes.
//! Each known layout is one [`ClaimSchema`] variant with its own mapping
//! function; the decoder never guesses a layout from the value it is given.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::account::AccountId;
use crate::digest::ContentDigest;
use crate::error::DecodeError;
use crate::ledger::StorageItem;
use crate::raw::{RawField, RawValue};
use crate::record::{ClaimInfo, ClaimRecord};

/// Default upper bound on note/comment length in bytes
pub const DEFAULT_MAX_NOTE_BYTES: usize = 256;

/// The closed set of known claim storage layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaimSchema {
    /// `poeModule.proofs`: `(owner, block)`
    OwnerBlock,
    /// `poeModule.proofsWithNote`: `(owner, block, moment, note)`
    OwnerBlockNote,
    /// `poe.proofs`: `ProofInfo { claimer, owner, claim_block, price?, comment?, created_on? }`
    #[default]
    ProofInfo,
}

impl fmt::Display for ClaimSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClaimSchema::OwnerBlock => "owner-block",
            ClaimSchema::OwnerBlockNote => "owner-block-note",
            ClaimSchema::ProofInfo => "proof-info",
        };
        f.write_str(name)
    }
}

/// Dispatchable call names of a pallet layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallNames {
    pub create: &'static str,
    pub revoke: &'static str,
    pub transfer: &'static str,
    /// `None` when the pallet has no purchase call
    pub purchase: Option<&'static str>,
}

impl ClaimSchema {
    /// Pallet the layout lives in
    pub fn pallet(&self) -> &'static str {
        match self {
            ClaimSchema::OwnerBlock | ClaimSchema::OwnerBlockNote => "poeModule",
            ClaimSchema::ProofInfo => "poe",
        }
    }

    /// Storage item holding digest → claim
    pub fn claims_item(&self) -> StorageItem {
        let item = match self {
            ClaimSchema::OwnerBlock => "proofs",
            ClaimSchema::OwnerBlockNote => "proofsWithNote",
            ClaimSchema::ProofInfo => "proofs",
        };
        StorageItem::new(self.pallet(), item)
    }

    /// Storage item holding account → owned digests
    pub fn owned_item(&self) -> Option<StorageItem> {
        match self {
            ClaimSchema::OwnerBlock => None,
            ClaimSchema::OwnerBlockNote => Some(StorageItem::new(self.pallet(), "accountProofs")),
            ClaimSchema::ProofInfo => Some(StorageItem::new(self.pallet(), "ownedProofs")),
        }
    }

    /// Call names for claim lifecycle transactions
    pub fn calls(&self) -> CallNames {
        match self {
            ClaimSchema::OwnerBlock => CallNames {
                create: "createClaim",
                revoke: "revokeClaim",
                transfer: "transferClaim",
                purchase: None,
            },
            ClaimSchema::OwnerBlockNote => CallNames {
                create: "createClaimWithNote",
                revoke: "revokeClaim",
                transfer: "transferClaim",
                purchase: None,
            },
            ClaimSchema::ProofInfo => CallNames {
                create: "createClaim",
                revoke: "revokeClaim",
                transfer: "transferClaim",
                purchase: Some("buyClaim"),
            },
        }
    }

    fn expected_shape(&self) -> &'static str {
        match self {
            ClaimSchema::OwnerBlock => "tuple(2)",
            ClaimSchema::OwnerBlockNote => "tuple(4)",
            ClaimSchema::ProofInfo => "struct{owner,claim_block,..}",
        }
    }
}

/// A decoded record plus any optional fields that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub record: ClaimRecord,
    /// `MalformedField` errors for optional fields that were left empty
    pub malformed: Vec<DecodeError>,
}

impl Decoded {
    fn clean(record: ClaimRecord) -> Self {
        Self {
            record,
            malformed: Vec::new(),
        }
    }
}

/// Maps raw storage values of one configured layout into records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimDecoder {
    schema: ClaimSchema,
    max_note_bytes: usize,
}

impl ClaimDecoder {
    pub fn new(schema: ClaimSchema) -> Self {
        Self {
            schema,
            max_note_bytes: DEFAULT_MAX_NOTE_BYTES,
        }
    }

    pub fn with_max_note_bytes(mut self, max: usize) -> Self {
        self.max_note_bytes = max;
        self
    }

    pub fn schema(&self) -> ClaimSchema {
        self.schema
    }

    /// Decode a claim value
    ///
    /// `RawValue::None` is always `Absent`. Shape errors are fatal; malformed
    /// optional fields are collected in [`Decoded::malformed`].
    pub fn decode(&self, raw: &RawValue) -> Result<Decoded, DecodeError> {
        let result = match raw {
            RawValue::None => Ok(Decoded::clean(ClaimRecord::Absent)),
            _ => match self.schema {
                ClaimSchema::OwnerBlock => self.decode_owner_block(raw),
                ClaimSchema::OwnerBlockNote => self.decode_owner_block_note(raw),
                ClaimSchema::ProofInfo => self.decode_proof_info(raw),
            },
        };
        if let Err(e) = &result {
            warn!(schema = %self.schema, shape = %raw, error = %e, "Claim decode failed");
        }
        result
    }

    /// Decode the account → owned digests index
    pub fn decode_owned_ids(&self, raw: &RawValue) -> Result<Vec<ContentDigest>, DecodeError> {
        match raw {
            RawValue::None => Ok(Vec::new()),
            RawValue::List(fields) => fields
                .iter()
                .map(|field| match field {
                    RawField::Bytes(bytes) => ContentDigest::from_slice(bytes)
                        .map_err(|e| DecodeError::malformed("owned_id", e.to_string())),
                    other => Err(DecodeError::malformed(
                        "owned_id",
                        format!("expected bytes, found {}", other.kind()),
                    )),
                })
                .collect(),
            other => Err(DecodeError::mismatch(self.schema, "list", other.shape())),
        }
    }

    fn tuple<'a>(&self, raw: &'a RawValue, arity: usize) -> Result<&'a [RawField], DecodeError> {
        match raw {
            RawValue::Tuple(fields) if fields.len() == arity => Ok(fields),
            other => Err(DecodeError::mismatch(
                self.schema,
                self.schema.expected_shape(),
                other.shape(),
            )),
        }
    }

    fn decode_owner_block(&self, raw: &RawValue) -> Result<Decoded, DecodeError> {
        let fields = self.tuple(raw, 2)?;
        let owner = account("owner", &fields[0])?;
        let block = block_number("created_at_block", &fields[1])?;
        Ok(Decoded::clean(ClaimRecord::Present(ClaimInfo::new(owner, block))))
    }

    fn decode_owner_block_note(&self, raw: &RawValue) -> Result<Decoded, DecodeError> {
        let fields = self.tuple(raw, 4)?;
        let owner = account("owner", &fields[0])?;
        let block = block_number("created_at_block", &fields[1])?;

        let mut info = ClaimInfo::new(owner, block);
        let mut malformed = Vec::new();
        info.created_on = optional(moment("created_on", &fields[2]), &mut malformed);
        info.note = optional(self.note("note", &fields[3]), &mut malformed);

        Ok(Decoded {
            record: ClaimRecord::Present(info),
            malformed,
        })
    }

    fn decode_proof_info(&self, raw: &RawValue) -> Result<Decoded, DecodeError> {
        let RawValue::Struct(fields) = raw else {
            return Err(DecodeError::mismatch(
                self.schema,
                self.schema.expected_shape(),
                raw.shape(),
            ));
        };
        let required = |name: &str| -> Result<&RawField, DecodeError> {
            fields
                .get(name)
                .ok_or_else(|| {
                    DecodeError::mismatch(self.schema, self.schema.expected_shape(), raw.shape())
                })
        };

        let owner = account("owner", required("owner")?)?;
        let block = block_number("created_at_block", required("claim_block")?)?;

        let mut info = ClaimInfo::new(owner, block);
        let mut malformed = Vec::new();
        let field = |name: &str| fields.get(name).filter(|f| **f != RawField::Null);

        if let Some(f) = field("claimer") {
            info.claimer = optional(account("claimer", f).map(Some), &mut malformed);
        }
        if let Some(f) = field("price") {
            info.price = optional(uint("price", f).map(Some), &mut malformed);
        }
        if let Some(f) = field("comment") {
            info.note = optional(self.note("comment", f), &mut malformed);
        }
        if let Some(f) = field("created_on") {
            info.created_on = optional(moment("created_on", f), &mut malformed);
        }

        Ok(Decoded {
            record: ClaimRecord::Present(info),
            malformed,
        })
    }

    fn note(&self, name: &'static str, field: &RawField) -> Result<Option<String>, DecodeError> {
        let text = match field {
            RawField::Null => return Ok(None),
            RawField::Bytes(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| DecodeError::malformed(name, format!("invalid utf-8: {e}")))?
                .to_string(),
            RawField::Text(text) => text.clone(),
            other => {
                return Err(DecodeError::malformed(
                    name,
                    format!("expected bytes, found {}", other.kind()),
                ));
            }
        };
        if text.len() > self.max_note_bytes {
            return Err(DecodeError::malformed(
                name,
                format!("{} bytes exceeds limit of {}", text.len(), self.max_note_bytes),
            ));
        }
        Ok(Some(text))
    }
}

/// Keep a decoded optional value, or record the failure and leave it empty
fn optional<T>(result: Result<Option<T>, DecodeError>, malformed: &mut Vec<DecodeError>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            malformed.push(e);
            None
        }
    }
}

fn account(name: &'static str, field: &RawField) -> Result<AccountId, DecodeError> {
    match field {
        RawField::Account(id) => Ok(id.clone()),
        RawField::Text(text) => Ok(AccountId::new(text.clone())),
        other => Err(DecodeError::malformed(
            name,
            format!("expected account, found {}", other.kind()),
        )),
    }
}

fn uint(name: &'static str, field: &RawField) -> Result<u128, DecodeError> {
    match field {
        RawField::Uint(n) => Ok(*n),
        other => Err(DecodeError::malformed(
            name,
            format!("expected uint, found {}", other.kind()),
        )),
    }
}

fn block_number(name: &'static str, field: &RawField) -> Result<u64, DecodeError> {
    let n = uint(name, field)?;
    u64::try_from(n).map_err(|_| DecodeError::malformed(name, format!("{n} overflows u64")))
}

fn moment(name: &'static str, field: &RawField) -> Result<Option<u64>, DecodeError> {
    if *field == RawField::Null {
        return Ok(None);
    }
    block_number(name, field).map(Some)
}

/// Convenience for building ProofInfo-shaped values
pub fn proof_info_value(info: &ClaimInfo) -> RawValue {
    let mut fields = BTreeMap::new();
    fields.insert("owner".to_string(), RawField::Account(info.owner.clone()));
    fields.insert(
        "claimer".to_string(),
        info.claimer
            .clone()
            .map(RawField::Account)
            .unwrap_or(RawField::Null),
    );
    fields.insert(
        "claim_block".to_string(),
        RawField::Uint(u128::from(info.created_at_block)),
    );
    fields.insert(
        "price".to_string(),
        info.price.map(RawField::Uint).unwrap_or(RawField::Null),
    );
    fields.insert(
        "comment".to_string(),
        info.note
            .as_ref()
            .map(|n| RawField::Bytes(n.as_bytes().to_vec()))
            .unwrap_or(RawField::Null),
    );
    fields.insert(
        "created_on".to_string(),
        info.created_on
            .map(|m| RawField::Uint(u128::from(m)))
            .unwrap_or(RawField::Null),
    );
    RawValue::Struct(fields)
}
