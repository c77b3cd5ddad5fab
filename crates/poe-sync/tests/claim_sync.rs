//! End-to-end tests for the claim synchronization engine against the
//! in-memory chain.
//!
//! Tests cover:
//! - Claim lifecycle as seen by the owner and by another account
//! - Account claim lists: ordering, partial failure, refresh on change
//! - Pending transfers and purchases: confirmation, contradiction, timeout
//! - Subscription hygiene when switching keys, on slow acknowledgments and
//!   on shutdown
//! - Feeds ended by the ledger and rejected unsubscribes
//! - Every supported storage layout

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use poe_core::{
    AccountId, ClaimInfo, ClaimRecord, ClaimSchema, ContentDigest, ContentHasher, MockChain,
    RawValue, StorageKey, TxStatus, digest,
};
use poe_sync::prelude::*;
use poe_sync::BoxStream;
use tokio::sync::watch;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(30);

fn alice() -> AccountId {
    AccountId::from("5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY")
}

fn bob() -> AccountId {
    AccountId::from("5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty")
}

fn engine(chain: &MockChain) -> ClaimSync {
    let config = SyncConfig::testing().with_schema(chain.schema());
    ClaimSync::from_chain(chain.clone(), config).unwrap()
}

/// Wait until a watched snapshot satisfies `pred` and return a copy of it.
async fn wait<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl FnMut(&T) -> bool) -> T {
    let value = timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for snapshot")
        .expect("engine stopped");
    (*value).clone()
}

/// Skip events until one satisfies `pred`.
async fn next_event(
    events: &mut BoxStream<SyncEvent>,
    mut pred: impl FnMut(&SyncEvent) -> bool,
) -> SyncEvent {
    timeout(WAIT, async {
        while let Some(event) = events.next().await {
            if pred(&event) {
                return event;
            }
        }
        panic!("event stream closed");
    })
    .await
    .expect("timed out waiting for event")
}

async fn claimed(chain: &MockChain, d: ContentDigest, info: ClaimInfo) {
    chain.insert_claim(d, info).await;
}

// ============================================================
// Scenario: claim lifecycle
// ============================================================

#[tokio::test]
async fn test_create_claim_seen_by_owner_and_other() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let alice_sync = engine(&chain);
    let bob_sync = engine(&chain);
    alice_sync.select_account(Some(alice())).await.unwrap();
    bob_sync.select_account(Some(bob())).await.unwrap();

    let d = alice_sync.compute_digest(b"%PDF-1.7 contract");
    let mut alice_view = alice_sync.watch_claim(Some(d)).await.unwrap();
    let mut bob_view = bob_sync.watch_claim(Some(d)).await.unwrap();

    let view = wait(&mut alice_view, |v| v.record.is_some()).await;
    assert_eq!(view.digest, Some(d));
    assert_eq!(view.record, Some(ClaimRecord::Absent));
    assert_eq!(view.state, ClaimState::Unclaimed);

    let statuses: Vec<TxStatus> = alice_sync
        .submit(ClaimAction::Create {
            digest: d,
            note: Some("signed contract".into()),
            price: None,
        })
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(statuses.last(), Some(&TxStatus::Finalized(1)));

    let view = wait(&mut alice_view, |v| v.state == ClaimState::ClaimedByViewer).await;
    let info = view.record.as_ref().and_then(ClaimRecord::info).unwrap();
    assert_eq!(info.owner, alice());
    assert_eq!(info.created_at_block, 1);
    assert_eq!(info.note.as_deref(), Some("signed contract"));
    assert!(view.error.is_none());

    let view = wait(&mut bob_view, |v| v.state == ClaimState::ClaimedByOther).await;
    assert_eq!(view.record.as_ref().and_then(ClaimRecord::owner), Some(&alice()));
}

#[tokio::test]
async fn test_revocation_is_observed() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"draft");
    claimed(&chain, d, ClaimInfo::new(alice(), 4)).await;

    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;

    sync.submit(ClaimAction::Revoke { digest: d })
        .await
        .unwrap()
        .collect::<Vec<_>>()
        .await;

    let view = wait(&mut view, |v| v.state == ClaimState::Revoked).await;
    assert_eq!(view.record, Some(ClaimRecord::Absent));
}

#[tokio::test]
async fn test_viewer_change_rederives_state() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"photo");
    claimed(&chain, d, ClaimInfo::new(alice(), 2)).await;

    let sync = engine(&chain);
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    wait(&mut view, |v| v.state == ClaimState::ClaimedByOther).await;

    sync.select_account(Some(alice())).await.unwrap();
    assert_eq!(view.borrow().state, ClaimState::ClaimedByViewer);

    sync.select_account(Some(bob())).await.unwrap();
    assert_eq!(view.borrow().state, ClaimState::ClaimedByOther);
}

#[tokio::test]
async fn test_block_zero_claim_is_present() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"genesis");
    claimed(&chain, d, ClaimInfo::new(alice(), 0)).await;

    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    let view = wait(&mut view, |v| v.record.is_some()).await;
    assert_eq!(view.state, ClaimState::ClaimedByViewer);
}

/// Stands in for a ledger that keys claims by a different hash
struct TaggedHasher;

impl ContentHasher for TaggedHasher {
    fn hash(&self, bytes: &[u8]) -> ContentDigest {
        let mut tagged = b"ledger-hash:".to_vec();
        tagged.extend_from_slice(bytes);
        digest(&tagged)
    }
}

#[tokio::test]
async fn test_hasher_must_match_ledger_keys() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let file = b"scanned deed";
    let ledger_key = TaggedHasher.hash(file);
    claimed(&chain, ledger_key, ClaimInfo::new(alice(), 4)).await;

    let default_sync = engine(&chain);
    let default_digest = default_sync.compute_digest(file);
    assert_ne!(default_digest, ledger_key);
    let mut view = default_sync.watch_claim(Some(default_digest)).await.unwrap();
    let snapshot = wait(&mut view, |v| v.record.is_some()).await;
    assert_eq!(snapshot.state, ClaimState::Unclaimed);

    let sync = engine(&chain).with_hasher(Arc::new(TaggedHasher));
    sync.select_account(Some(alice())).await.unwrap();
    let d = sync.compute_digest(file);
    assert_eq!(d, ledger_key);
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;
}

// ============================================================
// Scenario: account claim list
// ============================================================

#[tokio::test]
async fn test_account_claims_in_index_order() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d1 = digest(b"first");
    let d2 = digest(b"second");
    claimed(&chain, d1, ClaimInfo::new(alice(), 1)).await;
    claimed(
        &chain,
        d2,
        ClaimInfo::new(alice(), 2).with_price(100).with_note("invoice"),
    )
    .await;

    let sync = engine(&chain);
    let mut events = sync.events();
    sync.select_account(Some(alice())).await.unwrap();
    let mut claims = sync.account_claims();

    let list = wait(&mut claims, |c| c.entries.len() == 2).await;
    assert_eq!(list.account, Some(alice()));
    assert_eq!(list.entries[0].digest, d1);
    assert_eq!(list.entries[1].digest, d2);
    let second = list.entries[1].info().unwrap();
    assert_eq!(second.price, Some(100));
    assert_eq!(second.note.as_deref(), Some("invoice"));
    assert_eq!(second.owner, alice());

    let event = next_event(&mut events, |e| {
        matches!(e, SyncEvent::AccountClaimsUpdated { .. })
    })
    .await;
    assert_eq!(
        event,
        SyncEvent::AccountClaimsUpdated {
            account: alice(),
            count: 2
        }
    );
}

#[tokio::test]
async fn test_account_claims_isolate_failed_lookup() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d1 = digest(b"first");
    let d2 = digest(b"second");
    claimed(&chain, d1, ClaimInfo::new(alice(), 1)).await;
    claimed(&chain, d2, ClaimInfo::new(alice(), 2)).await;
    chain.fail_query(d2.into(), "state pruned");

    let sync = engine(&chain);
    let mut claims = sync.watch_account_claims(Some(alice())).await.unwrap();
    let list = wait(&mut claims, |c| c.entries.len() == 2).await;

    assert!(list.entries[0].info().is_some());
    assert!(list.entries[1].lookup.is_failed());
    assert_eq!(list.entries[1].digest, d2);
}

#[tokio::test]
async fn test_account_claims_follow_transfers() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d1 = digest(b"first");
    let d2 = digest(b"second");
    claimed(&chain, d1, ClaimInfo::new(alice(), 1)).await;
    claimed(&chain, d2, ClaimInfo::new(alice(), 2)).await;

    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();
    let mut claims = sync.account_claims();
    wait(&mut claims, |c| c.entries.len() == 2).await;

    sync.submit(ClaimAction::Transfer {
        digest: d1,
        to: bob(),
    })
    .await
    .unwrap()
    .collect::<Vec<_>>()
    .await;

    let list = wait(&mut claims, |c| c.entries.len() == 1).await;
    assert_eq!(list.entries[0].digest, d2);

    let mut bob_claims = sync.watch_account_claims(Some(bob())).await.unwrap();
    let list = wait(&mut bob_claims, |c| {
        c.account == Some(bob()) && c.entries.len() == 1
    })
    .await;
    assert_eq!(list.entries[0].digest, d1);
}

#[tokio::test]
async fn test_refresh_reflects_listed_claim_change() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"listing");
    claimed(&chain, d, ClaimInfo::new(alice(), 1).with_price(10)).await;

    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();
    let mut claims = sync.account_claims();
    wait(&mut claims, |c| c.entries.len() == 1).await;

    // Price change does not touch the owned index
    claimed(&chain, d, ClaimInfo::new(alice(), 1).with_price(99)).await;
    sync.refresh_account_claims().await.unwrap();

    let list = wait(&mut claims, |c| {
        c.entries
            .first()
            .and_then(|e| e.info())
            .is_some_and(|info| info.price == Some(99))
    })
    .await;
    assert_eq!(list.entries.len(), 1);
}

#[tokio::test]
async fn test_watched_claim_change_refreshes_list() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"listing");
    claimed(&chain, d, ClaimInfo::new(alice(), 1).with_note("v1")).await;

    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    let mut claims = sync.account_claims();
    wait(&mut claims, |c| c.entries.len() == 1).await;

    claimed(&chain, d, ClaimInfo::new(alice(), 1).with_note("v2")).await;
    wait(&mut view, |v| {
        v.record
            .as_ref()
            .and_then(ClaimRecord::info)
            .is_some_and(|info| info.note.as_deref() == Some("v2"))
    })
    .await;
    wait(&mut claims, |c| {
        c.entries
            .first()
            .and_then(|e| e.info())
            .is_some_and(|info| info.note.as_deref() == Some("v2"))
    })
    .await;
}

#[tokio::test]
async fn test_empty_account() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let sync = engine(&chain);
    let mut events = sync.events();
    let claims = sync.watch_account_claims(Some(bob())).await.unwrap();

    next_event(&mut events, |e| {
        matches!(e, SyncEvent::AccountClaimsUpdated { count: 0, .. })
    })
    .await;
    assert!(claims.borrow().entries.is_empty());
    assert!(claims.borrow().error.is_none());
}

// ============================================================
// Scenario: pending transfers and purchases
// ============================================================

#[tokio::test]
async fn test_transfer_confirmed() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"deed");
    claimed(&chain, d, ClaimInfo::new(alice(), 3)).await;

    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;

    let mut events = sync.events();
    sync.submit(ClaimAction::Transfer { digest: d, to: bob() })
        .await
        .unwrap();

    next_event(&mut events, |e| {
        matches!(
            e,
            SyncEvent::ClaimStateChanged {
                state: ClaimState::TransferPending,
                ..
            }
        )
    })
    .await;
    let confirmed = next_event(&mut events, |e| matches!(e, SyncEvent::Confirmed { .. })).await;
    assert_eq!(
        confirmed,
        SyncEvent::Confirmed {
            digest: d,
            expectation: PendingExpectation::Transfer { to: bob() },
        }
    );
    let view = wait(&mut view, |v| v.state == ClaimState::ClaimedByOther).await;
    assert_eq!(view.record.as_ref().and_then(ClaimRecord::owner), Some(&bob()));
}

#[tokio::test(start_paused = true)]
async fn test_pending_transfer_times_out() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"deed");
    claimed(&chain, d, ClaimInfo::new(alice(), 3)).await;

    let config = SyncConfig::testing().with_confirmation_timeout(Duration::from_secs(20));
    let sync = ClaimSync::from_chain(chain.clone(), config).unwrap();
    sync.select_account(Some(alice())).await.unwrap();
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;

    chain.hold_transactions(true);
    let mut events = sync.events();
    let statuses: Vec<TxStatus> = sync
        .submit(ClaimAction::Transfer { digest: d, to: bob() })
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(statuses, vec![TxStatus::Ready, TxStatus::Broadcast]);
    assert_eq!(view.borrow().state, ClaimState::TransferPending);

    let event = next_event(&mut events, |e| {
        matches!(e, SyncEvent::ConfirmationTimeout { .. })
    })
    .await;
    match event {
        SyncEvent::ConfirmationTimeout { digest, waited, .. } => {
            assert_eq!(digest, d);
            assert!(waited >= Duration::from_secs(20));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let view = wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;
    assert!(matches!(
        view.error,
        Some(SyncError::ConfirmationTimeout { .. })
    ));
    assert_eq!(chain.claim(&d).await.unwrap().owner, alice());
}

#[tokio::test]
async fn test_failed_transaction_contradicts_pending() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"deed");
    claimed(&chain, d, ClaimInfo::new(alice(), 3)).await;

    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;

    let mut events = sync.events();
    let statuses: Vec<TxStatus> = sync
        .submit(ClaimAction::Transfer {
            digest: d,
            to: alice(),
        })
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(
        statuses.last(),
        Some(&TxStatus::Error("CannotTransferProofToSelf".into()))
    );

    let event = next_event(&mut events, |e| matches!(e, SyncEvent::Contradicted { .. })).await;
    assert!(matches!(
        event,
        SyncEvent::Contradicted { reason, .. } if reason == "CannotTransferProofToSelf"
    ));
    wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;
}

#[tokio::test]
async fn test_purchase_confirmed() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"artwork");
    claimed(&chain, d, ClaimInfo::new(alice(), 5).with_price(50)).await;
    chain.fund(&bob(), 100).await;

    let sync = engine(&chain);
    sync.select_account(Some(bob())).await.unwrap();
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    wait(&mut view, |v| v.state == ClaimState::ClaimedByOther).await;

    let mut events = sync.events();
    sync.submit(ClaimAction::Purchase {
        digest: d,
        amount: 60,
    })
    .await
    .unwrap();

    next_event(&mut events, |e| {
        matches!(
            e,
            SyncEvent::ClaimStateChanged {
                state: ClaimState::PurchasePending,
                ..
            }
        )
    })
    .await;
    next_event(&mut events, |e| matches!(e, SyncEvent::Confirmed { .. })).await;

    let view = wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;
    assert_eq!(view.record.as_ref().and_then(|r| r.info()).unwrap().price, Some(60));
    assert_eq!(chain.balance(&bob()).await, 40);
}

#[tokio::test]
async fn test_unavailable_signer() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"deed");
    claimed(&chain, d, ClaimInfo::new(alice(), 3)).await;
    chain.lock_signer(alice());

    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;

    let result = sync
        .submit(ClaimAction::Transfer { digest: d, to: bob() })
        .await;
    assert!(matches!(result, Err(SyncError::Submission { .. })));
    wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;
}

#[tokio::test]
async fn test_submit_without_account() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let sync = engine(&chain);
    let result = sync
        .submit(ClaimAction::Revoke {
            digest: digest(b"x"),
        })
        .await;
    assert!(matches!(
        result,
        Err(SyncError::Submission { cause, .. }) if cause == "no account selected"
    ));
}

#[tokio::test]
async fn test_submit_rejects_long_note() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();
    let result = sync
        .submit(ClaimAction::Create {
            digest: digest(b"x"),
            note: Some("n".repeat(300)),
            price: None,
        })
        .await;
    assert!(matches!(result, Err(SyncError::Submission { .. })));
    assert!(chain.claim(&digest(b"x")).await.is_none());
}

// ============================================================
// Scenario: subscription hygiene
// ============================================================

#[tokio::test]
async fn test_switching_digests_keeps_one_subscription() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let sync = engine(&chain);
    let digests: Vec<_> = (0u8..5).map(|i| digest(&[i])).collect();

    for d in &digests {
        sync.watch_claim(Some(*d)).await.unwrap();
    }
    let mut view = sync.claim_view();
    let last = *digests.last().unwrap();
    let snapshot = wait(&mut view, |v| v.record.is_some()).await;
    assert_eq!(snapshot.digest, Some(last));

    assert_eq!(chain.active_subscriptions(), 1);
    assert_eq!(chain.subscriptions_for(&StorageKey::Digest(last)), 1);
    assert_eq!(chain.subscribe_calls(), 5);
    assert_eq!(chain.unsubscribe_calls(), 4);
}

#[tokio::test]
async fn test_old_digest_changes_are_ignored() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let old = digest(b"old");
    let new = digest(b"new");

    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();
    let mut view = sync.watch_claim(Some(old)).await.unwrap();
    wait(&mut view, |v| v.record.is_some()).await;
    let mut view = sync.watch_claim(Some(new)).await.unwrap();
    wait(&mut view, |v| v.record.is_some()).await;

    claimed(&chain, old, ClaimInfo::new(alice(), 1)).await;
    // Round-trip through the engine so any stray notification is processed
    sync.refresh_account_claims().await.unwrap();

    let snapshot = view.borrow().clone();
    assert_eq!(snapshot.digest, Some(new));
    assert_eq!(snapshot.record, Some(ClaimRecord::Absent));
    assert_eq!(snapshot.state, ClaimState::Unclaimed);
}

#[tokio::test]
async fn test_unwatch_clears_view() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let sync = engine(&chain);
    let mut view = sync.watch_claim(Some(digest(b"a"))).await.unwrap();
    wait(&mut view, |v| v.record.is_some()).await;

    let view = sync.watch_claim(None).await.unwrap();
    assert_eq!(*view.borrow(), ClaimView::default());
    assert_eq!(chain.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_shutdown_releases_subscriptions() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();
    let mut view = sync.watch_claim(Some(digest(b"a"))).await.unwrap();
    wait(&mut view, |v| v.record.is_some()).await;
    assert_eq!(chain.active_subscriptions(), 2);

    sync.shutdown().await.unwrap();
    assert_eq!(chain.active_subscriptions(), 0);
    assert_eq!(chain.unsubscribe_calls(), 2);
    assert!(matches!(
        sync.watch_claim(None).await,
        Err(SyncError::EngineClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_slow_acks_while_switching_never_leak() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    chain.delay_subscribe(Some(Duration::from_millis(300)));
    let config = SyncConfig::testing()
        .with_schema(chain.schema())
        .with_teardown_timeout(Duration::from_secs(1));
    let sync = ClaimSync::from_chain(chain.clone(), config).unwrap();
    let digests: Vec<_> = (0u8..4).map(|i| digest(&[i])).collect();

    for d in &digests {
        sync.watch_claim(Some(*d)).await.unwrap();
    }
    let mut view = sync.claim_view();
    let snapshot = wait(&mut view, |v| v.record.is_some()).await;
    let last = *digests.last().unwrap();
    assert_eq!(snapshot.digest, Some(last));
    assert_eq!(chain.active_subscriptions(), 1);
    assert_eq!(chain.subscriptions_for(&StorageKey::Digest(last)), 1);

    sync.shutdown().await.unwrap();
    assert_eq!(chain.active_subscriptions(), 0);
    assert_eq!(chain.subscribe_calls(), 4);
    assert_eq!(chain.unsubscribe_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_acks_slower_than_teardown_are_released_eventually() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    chain.delay_subscribe(Some(Duration::from_secs(3)));
    let config = SyncConfig::testing()
        .with_schema(chain.schema())
        .with_teardown_timeout(Duration::from_millis(500));
    let sync = ClaimSync::from_chain(chain.clone(), config).unwrap();
    let a = digest(b"a");
    let b = digest(b"b");

    sync.watch_claim(Some(a)).await.unwrap();
    let mut view = sync.watch_claim(Some(b)).await.unwrap();
    let snapshot = wait(&mut view, |v| v.record.is_some()).await;
    assert_eq!(snapshot.digest, Some(b));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(chain.subscriptions_for(&StorageKey::Digest(a)), 0);
    assert_eq!(chain.active_subscriptions(), 1);

    sync.watch_claim(Some(digest(b"c"))).await.unwrap();
    sync.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(chain.active_subscriptions(), 0);
    assert_eq!(chain.subscribe_calls(), chain.unsubscribe_calls());
}

// ============================================================
// Scenario: errors surfaced on views
// ============================================================

#[tokio::test]
async fn test_schema_mismatch_surfaces_on_view() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"legacy");
    chain
        .set_raw(
            ClaimSchema::ProofInfo.claims_item(),
            d.into(),
            RawValue::Tuple(vec![]),
        )
        .await;

    let sync = engine(&chain);
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    let snapshot = wait(&mut view, |v| v.error.is_some()).await;
    assert!(matches!(
        snapshot.error,
        Some(SyncError::Decode { key: StorageKey::Digest(k), .. }) if k == d
    ));
    assert!(snapshot.record.is_none());
}

#[tokio::test]
async fn test_subscription_failure_surfaces_on_view() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"unreachable");
    chain.fail_subscribe(d.into(), "rpc unavailable");

    let sync = engine(&chain);
    let mut events = sync.events();
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    let snapshot = wait(&mut view, |v| v.error.is_some()).await;
    assert!(matches!(
        snapshot.error,
        Some(SyncError::SubscriptionFailed { ref cause, .. }) if cause.contains("rpc unavailable")
    ));
    next_event(&mut events, |e| matches!(e, SyncEvent::Error(_))).await;
}

#[tokio::test]
async fn test_closed_feed_surfaces_and_can_be_rewatched() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"doc");
    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();
    let mut events = sync.events();
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    wait(&mut view, |v| v.record.is_some()).await;

    chain.close_feeds(&d.into());
    let snapshot = wait(&mut view, |v| v.error.is_some()).await;
    assert!(matches!(
        snapshot.error,
        Some(SyncError::SubscriptionFailed { key: StorageKey::Digest(k), .. }) if k == d
    ));
    next_event(&mut events, |e| {
        matches!(e, SyncEvent::Error(SyncError::SubscriptionFailed { .. }))
    })
    .await;

    // Same digest again resubscribes instead of being ignored
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    assert!(view.borrow().error.is_none());

    claimed(&chain, d, ClaimInfo::new(alice(), 1)).await;
    wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;
    assert_eq!(chain.subscriptions_for(&d.into()), 1);
    assert_eq!(chain.subscribe_calls(), 3);
}

#[tokio::test]
async fn test_closed_owned_index_surfaces_on_list() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let sync = engine(&chain);
    let mut events = sync.events();
    let mut claims = sync.watch_account_claims(Some(alice())).await.unwrap();
    next_event(&mut events, |e| matches!(e, SyncEvent::AccountClaimsUpdated { .. })).await;

    chain.close_feeds(&StorageKey::Account(alice()));
    let snapshot = wait(&mut claims, |c| c.error.is_some()).await;
    assert!(matches!(
        snapshot.error,
        Some(SyncError::SubscriptionFailed { ref cause, .. }) if cause.contains("closed")
    ));

    let mut claims = sync.watch_account_claims(Some(alice())).await.unwrap();
    claimed(&chain, digest(b"x"), ClaimInfo::new(alice(), 1)).await;
    let snapshot = wait(&mut claims, |c| c.entries.len() == 1).await;
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn test_unsubscribe_failure_is_reported() {
    let chain = MockChain::new(ClaimSchema::ProofInfo);
    let d = digest(b"sticky");
    chain.fail_unsubscribe(d.into(), "node restarting");
    let sync = engine(&chain);
    let mut events = sync.events();

    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    wait(&mut view, |v| v.record.is_some()).await;
    sync.watch_claim(Some(digest(b"other"))).await.unwrap();

    let event = next_event(&mut events, |e| matches!(e, SyncEvent::Error(_))).await;
    assert!(matches!(
        event,
        SyncEvent::Error(SyncError::UnsubscribeFailed { key: StorageKey::Digest(k), ref cause })
            if k == d && cause.contains("node restarting")
    ));
    // The new digest's view is unaffected
    assert!(sync.claim_view().borrow().error.is_none());
}

// ============================================================
// Scenario: storage layouts
// ============================================================

#[tokio::test]
async fn test_owner_block_layout() {
    let chain = MockChain::new(ClaimSchema::OwnerBlock);
    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();

    // No owned-claims index in this layout
    let claims = sync.account_claims();
    assert!(matches!(
        claims.borrow().error,
        Some(SyncError::SubscriptionFailed { .. })
    ));

    let d = digest(b"kitty");
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    sync.submit(ClaimAction::Create {
        digest: d,
        note: None,
        price: None,
    })
    .await
    .unwrap()
    .collect::<Vec<_>>()
    .await;

    let snapshot = wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;
    let info = snapshot.record.as_ref().and_then(ClaimRecord::info).unwrap();
    assert_eq!(info.created_at_block, 1);
    assert!(info.note.is_none());

    let purchase = sync
        .submit(ClaimAction::Purchase {
            digest: d,
            amount: 1,
        })
        .await;
    assert!(matches!(purchase, Err(SyncError::Submission { .. })));
}

#[tokio::test]
async fn test_owner_block_note_layout() {
    let chain = MockChain::new(ClaimSchema::OwnerBlockNote);
    let sync = engine(&chain);
    sync.select_account(Some(alice())).await.unwrap();

    let d = digest(b"kitty");
    let mut view = sync.watch_claim(Some(d)).await.unwrap();
    sync.submit(ClaimAction::Create {
        digest: d,
        note: Some("hello".into()),
        price: None,
    })
    .await
    .unwrap()
    .collect::<Vec<_>>()
    .await;

    let snapshot = wait(&mut view, |v| v.state == ClaimState::ClaimedByViewer).await;
    let info = snapshot.record.as_ref().and_then(ClaimRecord::info).unwrap();
    assert_eq!(info.note.as_deref(), Some("hello"));
    assert!(info.created_on.is_some());

    let mut claims = sync.account_claims();
    let list = wait(&mut claims, |c| c.entries.len() == 1).await;
    assert_eq!(list.entries[0].digest, d);
}
