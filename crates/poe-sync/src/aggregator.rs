//! Account claim list aggregation
//!
//! Turns an account's owned-id list into an ordered list of claim entries by
//! fanning out one-shot lookups. Lookups run concurrently; results keep the
//! order of the input list.

use futures::future::join_all;
use poe_core::{ClaimDecoder, ClaimListEntry, ContentDigest, StorageItem, StorageKey};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

use crate::subscription::Lookup;

/// Look up every id concurrently and assemble entries in input order.
///
/// A failed lookup or an undecodable value yields a `LookupFailed` entry;
/// the other entries are unaffected.
pub async fn aggregate(
    lookup: &Lookup,
    decoder: &ClaimDecoder,
    item: &StorageItem,
    ids: &[ContentDigest],
) -> Vec<ClaimListEntry> {
    let lookups = ids.iter().map(|digest| async move {
        let key = StorageKey::Digest(*digest);
        let raw = match lookup.lookup_once(item, &key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(digest = %digest, error = %e, "Claim lookup failed");
                return ClaimListEntry::failed(*digest, e.to_string());
            }
        };
        match decoder.decode(&raw) {
            Ok(decoded) => {
                for field in &decoded.malformed {
                    debug!(digest = %digest, error = %field, "Optional claim field left empty");
                }
                ClaimListEntry::found(*digest, decoded.record)
            }
            Err(e) => ClaimListEntry::failed(*digest, e.to_string()),
        }
    });
    join_all(lookups).await
}

/// Result of one aggregation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationResult {
    pub generation: u64,
    pub entries: Vec<ClaimListEntry>,
}

/// Runs aggregations in background tasks, one at a time
///
/// Starting a new run cancels the previous one; [`Aggregator::accept`]
/// filters out results of runs that were superseded before they finished.
pub struct Aggregator {
    lookup: Lookup,
    decoder: ClaimDecoder,
    item: StorageItem,
    ids: Vec<ContentDigest>,
    generation: u64,
    inflight: Option<CancellationToken>,
}

impl Aggregator {
    pub fn new(lookup: Lookup, decoder: ClaimDecoder, item: StorageItem) -> Self {
        Self {
            lookup,
            decoder,
            item,
            ids: Vec::new(),
            generation: 0,
            inflight: None,
        }
    }

    /// The id list of the latest run
    pub fn ids(&self) -> &[ContentDigest] {
        &self.ids
    }

    pub fn contains(&self, digest: &ContentDigest) -> bool {
        self.ids.contains(digest)
    }

    /// Start a run for `ids`, cancelling any run in flight.
    pub fn start(
        &mut self,
        ids: Vec<ContentDigest>,
        results: mpsc::Sender<AggregationResult>,
    ) -> u64 {
        self.cancel();
        self.generation += 1;
        self.ids = ids.clone();

        let generation = self.generation;
        let cancel = CancellationToken::new();
        self.inflight = Some(cancel.clone());

        let lookup = self.lookup.clone();
        let decoder = self.decoder;
        let item = self.item.clone();
        debug!(generation, count = ids.len(), "Aggregation started");
        tokio::spawn(async move {
            let entries = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(generation, "Aggregation cancelled");
                    return;
                }
                entries = aggregate(&lookup, &decoder, &item, &ids) => entries,
            };
            let _ = results.send(AggregationResult { generation, entries }).await;
        }
        .in_current_span());
        generation
    }

    /// Re-run with the current ids.
    pub fn restart(&mut self, results: mpsc::Sender<AggregationResult>) -> u64 {
        let ids = self.ids.clone();
        self.start(ids, results)
    }

    /// Cancel the run in flight, if any.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.inflight.take() {
            cancel.cancel();
        }
    }

    /// Cancel and forget the id list.
    pub fn clear(&mut self) {
        self.cancel();
        self.generation += 1;
        self.ids.clear();
    }

    /// Whether a result belongs to the latest run.
    pub fn accept(&mut self, result: &AggregationResult) -> bool {
        let current = result.generation == self.generation;
        if current {
            self.inflight = None;
        }
        current
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.cancel();
    }
}
