//! Injected wallet provider seam.

use tokio::sync::mpsc;

use ballot_protocol::{Address, ChainDescriptor, ChainId};

use crate::{BackendFuture, SubscriptionId};

/// Notifications the wallet fires on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletNotification {
    /// The exposed account list changed; empty means the user locked or
    /// disconnected the wallet.
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
}

/// The subset of an EIP-1193 wallet this client consumes.
pub trait WalletProvider: Send + Sync {
    /// Ask the user to expose accounts (`eth_requestAccounts`).
    fn request_accounts(&self) -> BackendFuture<'_, Vec<Address>>;

    /// Accounts already authorised for this origin, without prompting (`eth_accounts`).
    fn authorized_accounts(&self) -> BackendFuture<'_, Vec<Address>>;

    fn chain_id(&self) -> BackendFuture<'_, ChainId>;

    /// `wallet_switchEthereumChain`. Fails with code 4902 when the chain is unknown.
    fn switch_chain(&self, chain_id: ChainId) -> BackendFuture<'_, ()>;

    /// `wallet_addEthereumChain`.
    fn add_chain<'a>(&'a self, descriptor: &'a ChainDescriptor) -> BackendFuture<'a, ()>;

    /// Register for account- and chain-change notifications.
    fn subscribe(&self, sink: mpsc::UnboundedSender<WalletNotification>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}
