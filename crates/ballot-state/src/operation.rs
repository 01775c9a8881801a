use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ballot_protocol::{Address, PartyId, TxHash, VotingState};

/// Identifier of a user-initiated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of write. At most one operation per (account, kind) is in flight.
///
/// Identifier-based and wallet-based votes are separate kinds: nothing
/// guarantees they share one eligibility record on the contract side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    IdentifierVote,
    WalletVote,
    AuthorityVerify,
    ToggleVoting,
    Finalize,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IdentifierVote => "identifier vote",
            Self::WalletVote => "wallet vote",
            Self::AuthorityVerify => "authority verification",
            Self::ToggleVoting => "voting toggle",
            Self::Finalize => "finalization",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PendingStatus {
    Submitted,
    Confirmed,
    Failed,
}

/// How the network answered a submitted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Confirmed,
    Failed,
}

/// Speculative change shown before the network confirms a write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisticDelta {
    pub tally_increments: BTreeMap<PartyId, u64>,
    pub voting_open: Option<bool>,
    pub results_finalized: Option<bool>,
}

impl OptimisticDelta {
    /// No visible effect; the operation is tracked only for dedup and progress.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn vote(party: PartyId) -> Self {
        let mut tally_increments = BTreeMap::new();
        tally_increments.insert(party, 1);
        Self {
            tally_increments,
            ..Self::default()
        }
    }

    pub fn voting_open(open: bool) -> Self {
        Self {
            voting_open: Some(open),
            ..Self::default()
        }
    }

    pub fn finalize() -> Self {
        Self {
            voting_open: Some(false),
            results_finalized: Some(true),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tally_increments.is_empty()
            && self.voting_open.is_none()
            && self.results_finalized.is_none()
    }

    pub fn apply_to(&self, state: &mut VotingState) {
        for (party, inc) in &self.tally_increments {
            let current = state.tally(*party);
            state.set_tally(*party, current.saturating_add(*inc));
        }
        self.apply_flags_to(state);
    }

    pub(crate) fn apply_flags_to(&self, state: &mut VotingState) {
        if let Some(open) = self.voting_open {
            state.set_voting_open(open);
        }
        if let Some(finalized) = self.results_finalized {
            state.set_results_finalized(finalized);
        }
    }
}

/// A write that has been started but not yet reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub account: Address,
    pub delta: OptimisticDelta,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    pub tx: Option<TxHash>,
    pub status: PendingStatus,
}
