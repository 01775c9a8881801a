//! Ballot Protocol - Core types for the voting client
//!
//! Shared vocabulary of the client-side synchronization layer: addresses,
//! chain identifiers, sessions, the voting-state snapshot, contract events
//! and the failure taxonomy every other crate reports through.

pub mod classifier;
pub mod constants;
pub mod error;
pub mod events;
pub mod state;
pub mod types;

pub use classifier::classify;
pub use constants::*;
pub use error::*;
pub use events::*;
pub use state::*;
pub use types::*;
