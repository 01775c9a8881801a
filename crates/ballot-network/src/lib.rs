//! Ballot Network - wallet session and contract access
//!
//! - [`provider::WalletProvider`]: seam over the injected wallet
//! - [`contract::ContractBackend`]: seam over the deployed contract's RPC surface
//! - [`contract::ContractClient`]: typed facade owning the single active binding
//! - [`connection::ConnectionManager`]: connect/disconnect, required-chain
//!   enforcement and reaction to wallet notifications
//! - [`mock`]: deterministic in-memory wallet and contract

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use ballot_protocol::{ClientError, RawFailure};

pub mod connection;
pub mod contract;
pub mod flag;
pub mod mock;
pub mod provider;

pub use connection::{ConnectOutcome, ConnectionConfig, ConnectionManager, SessionChange};
pub use contract::{
    ContractBackend, ContractBinding, ContractClient, ContractSettings, PendingTransaction,
    ReadCall, ReadValue, Receipt, SubscriptionHandle, WriteCall,
};
pub use flag::SessionFlag;
pub use provider::{WalletNotification, WalletProvider};

/// Boxed future returned across the wallet/contract seams.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RawFailure>> + Send + 'a>>;

/// Identifier of a registered listener on the wallet or contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("no contract binding; connect a wallet first")]
    NotBound,
    #[error("unexpected {expected} result from contract read")]
    UnexpectedValue { expected: &'static str },
    #[error(transparent)]
    Raw(#[from] RawFailure),
}

impl From<NetworkError> for ClientError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::NotBound => ClientError::not_permitted("Connect a wallet first"),
            NetworkError::UnexpectedValue { .. } => ClientError::new(
                ballot_protocol::ErrorKind::Unknown,
                "Unexpected response from the contract",
            ),
            NetworkError::Raw(raw) => ballot_protocol::classify(&raw),
        }
    }
}

/// Bound a seam call; an elapsed limit becomes [`RawFailure::Timeout`].
pub(crate) async fn timed<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, RawFailure>>,
) -> Result<T, RawFailure> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RawFailure::Timeout),
    }
}
