//! Ballot Client - in-process API for the voting contract
//!
//! Connects a wallet, keeps a local view of the contract's voting state in
//! sync and runs writes through an optimistic lifecycle:
//!
//! - [`client::VotingClient`]: lifecycle facade (connect, resume, disconnect,
//!   status, wallet notifications)
//! - [`updater::OptimisticUpdater`]: cast, verify, toggle and finalize with
//!   immediate feedback and rollback on failure
//! - [`subscriber::EventSubscriber`]: reread-on-notify event handling
//! - [`config::ClientConfig`] and [`logging::init_logging`]

pub mod client;
pub mod config;
pub mod logging;
pub mod subscriber;
pub mod updater;

pub use client::{ClientStatus, VotingClient};
pub use config::{ClientConfig, LoggingConfig};
pub use logging::init_logging;
pub use subscriber::EventSubscriber;
pub use updater::{OperationStatus, OperationUpdate, OptimisticUpdater};
