//! # PoE Core
//!
//! Core types, decoding and collaborator traits for proof-of-existence
//! claims.
//!
//! This crate holds everything the synchronization engine needs that does
//! not itself spawn tasks: digests, typed claim records, the schema-aware
//! decoder, and the traits behind which the ledger client, transaction
//! submitter and signer provider live.
//!
//! ## Key Traits
//!
//! - [`ContentHasher`]: Content digest function
//! - [`LedgerClient`]: Storage subscribe / unsubscribe / query-once
//! - [`TxSubmitter`]: Sign and broadcast a [`Call`]
//! - [`SignerProvider`]: Resolve an account to a [`Signer`]
//!
//! ## Key Types
//!
//! - [`ContentDigest`]: 32-byte identifier of a file's bytes
//! - [`ClaimRecord`]: `Absent` or `Present(ClaimInfo)`
//! - [`ClaimSchema`] / [`ClaimDecoder`]: Known storage layouts and their mapping
//! - [`MockChain`]: In-memory ledger for tests and demos

pub mod account;
pub mod digest;
pub mod error;
pub mod ledger;
pub mod mock_chain;
pub mod raw;
pub mod record;
pub mod schema;
pub mod tx;

// Re-export main types
pub use account::*;
pub use digest::*;
pub use error::*;
pub use ledger::*;
pub use mock_chain::*;
pub use raw::*;
pub use record::*;
pub use schema::*;
pub use tx::*;
