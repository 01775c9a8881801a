//! Ballot State - local view of remote voting state
//!
//! Holds the last authoritative [`VotingState`](ballot_protocol::VotingState)
//! read from the contract together with the in-flight
//! [`PendingOperation`]s whose optimistic deltas are layered on top of it
//! for display.

pub mod operation;
pub mod store;

pub use operation::*;
pub use store::{SharedStateStore, StateStore};

use ballot_protocol::{Address, ClientError};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("a {kind} operation is already pending for {account}")]
    AlreadyInFlight { kind: OperationKind, account: Address },
    #[error("voting state has not been loaded yet")]
    NotLoaded,
    #[error("unknown operation: {0}")]
    UnknownOperation(OperationId),
}

impl From<StateError> for ClientError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::AlreadyInFlight { kind, .. } => ClientError::invalid_input(format!(
                "A {kind} request is already in progress for this account"
            )),
            StateError::NotLoaded => {
                ClientError::not_permitted("Voting data is still loading. Try again shortly.")
            }
            StateError::UnknownOperation(id) => {
                ClientError::new(ballot_protocol::ErrorKind::Unknown, format!("Unknown operation {id}"))
            }
        }
    }
}
