use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Address, PartyId};

/// Contract events the client listens to for freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    VoteCast,
    VotingStatusChanged,
    AuthorityVerified,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::VoteCast,
        EventKind::VotingStatusChanged,
        EventKind::AuthorityVerified,
    ];

    /// Event name as declared in the contract ABI.
    pub fn name(&self) -> &'static str {
        match self {
            Self::VoteCast => "VoteCast",
            Self::VotingStatusChanged => "VotingStatusChanged",
            Self::AuthorityVerified => "AuthorityVerified",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded contract log.
///
/// Payloads are treated as a freshness hint only; they may arrive partial,
/// duplicated or out of order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    VoteCast {
        voter: Address,
        party: PartyId,
        identifier: String,
        timestamp: u64,
    },
    VotingStatusChanged {
        open: bool,
        changed_by: Address,
        timestamp: u64,
    },
    AuthorityVerified {
        authority: Address,
        purpose: String,
        timestamp: u64,
    },
}

impl ContractEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::VoteCast { .. } => EventKind::VoteCast,
            Self::VotingStatusChanged { .. } => EventKind::VotingStatusChanged,
            Self::AuthorityVerified { .. } => EventKind::AuthorityVerified,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Self::VoteCast { timestamp, .. }
            | Self::VotingStatusChanged { timestamp, .. }
            | Self::AuthorityVerified { timestamp, .. } => *timestamp,
        }
    }
}
