//! Claim lifecycle state
//!
//! [`derive`] is the pure mapping from a ledger record and the viewer to a
//! state. [`ClaimStateMachine`] adds the two things a single record cannot
//! tell: a revocation observed during this session, and a locally submitted
//! transfer or purchase that the ledger has not reflected yet.

use std::fmt;
use std::time::Duration;

use poe_core::{AccountId, ClaimRecord};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Lifecycle stage of the watched claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClaimState {
    #[default]
    Unclaimed,
    ClaimedByViewer,
    ClaimedByOther,
    /// Absent now, present earlier in this session
    Revoked,
    TransferPending,
    PurchasePending,
}

impl ClaimState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ClaimState::TransferPending | ClaimState::PurchasePending)
    }
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClaimState::Unclaimed => "unclaimed",
            ClaimState::ClaimedByViewer => "claimed by you",
            ClaimState::ClaimedByOther => "claimed by another account",
            ClaimState::Revoked => "revoked",
            ClaimState::TransferPending => "transfer pending",
            ClaimState::PurchasePending => "purchase pending",
        };
        f.write_str(name)
    }
}

/// Ledger-derived state of a record as seen by `viewer`.
pub fn derive(record: &ClaimRecord, viewer: Option<&AccountId>) -> ClaimState {
    match record {
        ClaimRecord::Absent => ClaimState::Unclaimed,
        ClaimRecord::Present(info) if Some(&info.owner) == viewer => ClaimState::ClaimedByViewer,
        ClaimRecord::Present(_) => ClaimState::ClaimedByOther,
    }
}

/// Owner a submitted transaction is expected to produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingExpectation {
    Transfer { to: AccountId },
    Purchase { buyer: AccountId },
}

impl PendingExpectation {
    pub fn expected_owner(&self) -> &AccountId {
        match self {
            PendingExpectation::Transfer { to } => to,
            PendingExpectation::Purchase { buyer } => buyer,
        }
    }

    fn state(&self) -> ClaimState {
        match self {
            PendingExpectation::Transfer { .. } => ClaimState::TransferPending,
            PendingExpectation::Purchase { .. } => ClaimState::PurchasePending,
        }
    }
}

/// How a pending expectation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSignal {
    /// The ledger shows the expected owner
    Confirmed { expectation: PendingExpectation },
    /// The ledger changed some other way, or the transaction failed
    Contradicted {
        expectation: PendingExpectation,
        reason: String,
    },
    /// No confirming observation before the deadline
    TimedOut {
        expectation: PendingExpectation,
        waited: Duration,
    },
}

#[derive(Debug, Clone)]
struct Pending {
    expectation: PendingExpectation,
    started: Instant,
    deadline: Instant,
}

/// Session-scoped lifecycle tracking for one watched digest
#[derive(Debug, Clone, Default)]
pub struct ClaimStateMachine {
    viewer: Option<AccountId>,
    last: Option<ClaimRecord>,
    revoked: bool,
    pending: Option<Pending>,
}

impl ClaimStateMachine {
    pub fn new(viewer: Option<AccountId>) -> Self {
        Self {
            viewer,
            ..Default::default()
        }
    }

    pub fn viewer(&self) -> Option<&AccountId> {
        self.viewer.as_ref()
    }

    pub fn set_viewer(&mut self, viewer: Option<AccountId>) {
        self.viewer = viewer;
    }

    /// Last observed record, `None` before the first observation
    pub fn record(&self) -> Option<&ClaimRecord> {
        self.last.as_ref()
    }

    /// Forget everything except the viewer.
    pub fn reset(&mut self) {
        self.last = None;
        self.revoked = false;
        self.pending = None;
    }

    /// Feed a newly observed ledger record.
    ///
    /// Returns a signal when the observation resolves a pending expectation.
    pub fn observe(&mut self, record: ClaimRecord) -> Option<StateSignal> {
        let changed = self.last.as_ref() != Some(&record);

        let resolved = if changed { self.pending.take() } else { None };
        let signal = resolved.map(|pending| {
            let expectation = pending.expectation;
            if record.owner() == Some(expectation.expected_owner()) {
                StateSignal::Confirmed { expectation }
            } else {
                let reason = match record.owner() {
                    Some(owner) => format!("ledger shows owner {owner}"),
                    None => "ledger shows no claim".to_string(),
                };
                StateSignal::Contradicted { expectation, reason }
            }
        });

        self.revoked = match (&record, &self.last) {
            (ClaimRecord::Present(_), _) => false,
            (ClaimRecord::Absent, Some(ClaimRecord::Present(_))) => true,
            (ClaimRecord::Absent, Some(ClaimRecord::Absent)) => self.revoked,
            (ClaimRecord::Absent, None) => false,
        };
        self.last = Some(record);

        if let Some(signal) = &signal {
            debug!(signal = ?signal, "Pending expectation resolved by ledger");
        }
        signal
    }

    /// Enter a pending state until `deadline`.
    pub fn begin_pending(&mut self, expectation: PendingExpectation, deadline: Instant) {
        self.pending = Some(Pending {
            expectation,
            started: Instant::now(),
            deadline,
        });
    }

    /// Clear a pending state because its transaction failed.
    pub fn fail_pending(&mut self, reason: impl Into<String>) -> Option<StateSignal> {
        self.pending.take().map(|pending| StateSignal::Contradicted {
            expectation: pending.expectation,
            reason: reason.into(),
        })
    }

    /// Clear a pending state whose deadline has passed.
    pub fn poll_timeout(&mut self, now: Instant) -> Option<StateSignal> {
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|pending| now >= pending.deadline);
        if !expired {
            return None;
        }
        let pending = self.pending.take()?;
        Some(StateSignal::TimedOut {
            expectation: pending.expectation,
            waited: now.saturating_duration_since(pending.started),
        })
    }

    /// Deadline of the pending expectation, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.deadline)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Current state: pending first, then session revocation, then the ledger.
    pub fn state(&self) -> ClaimState {
        if let Some(pending) = &self.pending {
            return pending.expectation.state();
        }
        match &self.last {
            None => ClaimState::Unclaimed,
            Some(ClaimRecord::Absent) if self.revoked => ClaimState::Revoked,
            Some(record) => derive(record, self.viewer.as_ref()),
        }
    }
}
