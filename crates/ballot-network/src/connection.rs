//! Wallet session lifecycle.
//!
//! [`ConnectionManager`] owns the single [`Session`]. It requests accounts,
//! enforces the required chain (one switch attempt, adding the chain first
//! when the wallet does not know it), persists the advisory connected flag
//! and turns wallet notifications into [`SessionChange`]s for the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use ballot_protocol::{
    ChainDescriptor, ChainId, ClientError, ErrorKind, RawFailure, Session,
    DEFAULT_REQUEST_TIMEOUT_SECS, PROVIDER_UNKNOWN_CHAIN,
};

use crate::flag::SessionFlag;
use crate::provider::{WalletNotification, WalletProvider};
use crate::{timed, SubscriptionId};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub required_chain: ChainDescriptor,
    /// Limit for every wallet request, prompts included.
    pub request_timeout: Duration,
    pub flag: SessionFlag,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            required_chain: ChainDescriptor::sepolia(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            flag: SessionFlag::disabled(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected(Session),
    /// Another connect was already waiting on the wallet; nothing was sent.
    AlreadyPending,
}

/// Effect of a wallet notification on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// The wallet exposes no account any more; the session is gone.
    Ended,
    /// Same wallet, different active account.
    AccountSwitched(Session),
    /// The wallet moved to another chain. The session was discarded and
    /// must be bootstrapped again.
    ChainChanged { from: ChainId, to: ChainId },
    Unchanged,
}

/// Resets the in-progress marker even when the connect future is dropped.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ConnectionManager {
    provider: Option<Arc<dyn WalletProvider>>,
    config: ConnectionConfig,
    session: watch::Sender<Option<Session>>,
    connecting: AtomicBool,
    wallet_subscription: Mutex<Option<SubscriptionId>>,
}

impl ConnectionManager {
    /// `provider` is `None` when no wallet is injected.
    pub fn new(provider: Option<Arc<dyn WalletProvider>>, config: ConnectionConfig) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            provider,
            config,
            session,
            connecting: AtomicBool::new(false),
            wallet_subscription: Mutex::new(None),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn required_chain(&self) -> &ChainDescriptor {
        &self.config.required_chain
    }

    pub fn session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    pub fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    pub fn on_required_chain(&self) -> bool {
        self.session
            .borrow()
            .as_ref()
            .map(|s| s.chain_id == self.config.required_chain.chain_id)
            .unwrap_or(false)
    }

    fn provider(&self) -> Result<Arc<dyn WalletProvider>, ClientError> {
        self.provider.clone().ok_or_else(ClientError::no_provider)
    }

    /// Ask the wallet for an account and make sure it sits on the required
    /// chain. A second call while the first still waits on the wallet
    /// returns [`ConnectOutcome::AlreadyPending`] without a request.
    pub async fn connect(&self) -> Result<ConnectOutcome, ClientError> {
        let provider = self.provider()?;
        if self.connecting.swap(true, Ordering::SeqCst) {
            tracing::debug!("Connect already pending");
            return Ok(ConnectOutcome::AlreadyPending);
        }
        let _guard = ConnectingGuard(&self.connecting);

        let limit = self.config.request_timeout;
        let accounts = timed(limit, provider.request_accounts()).await.map_err(|e| {
            tracing::warn!(error = %e, "Account request failed");
            ClientError::from(e)
        })?;
        let Some(account) = accounts.into_iter().next() else {
            return Err(ClientError::new(
                ErrorKind::UserRejected,
                "No accounts available. Unlock your wallet and try again.",
            ));
        };
        let chain = timed(limit, provider.chain_id()).await?;

        let session = Session::new(account, chain);
        self.establish(session.clone());
        tracing::info!(account = %session.account.short(), chain = %chain, "Wallet connected");

        let required = self.config.required_chain.chain_id;
        if chain == required {
            return Ok(ConnectOutcome::Connected(session));
        }

        self.ensure_required_chain(provider.as_ref(), chain).await?;
        self.session.send_modify(|s| {
            if let Some(s) = s {
                s.chain_id = required;
            }
        });
        let session = self.session().unwrap_or(Session { chain_id: required, ..session });
        Ok(ConnectOutcome::Connected(session))
    }

    /// One switch request; on "unknown chain" one add request followed by
    /// one more switch. Any refusal leaves the session as it is.
    async fn ensure_required_chain(
        &self,
        provider: &dyn WalletProvider,
        current: ChainId,
    ) -> Result<(), ClientError> {
        let required = &self.config.required_chain;
        let limit = self.config.request_timeout;
        tracing::info!(current = %current, required = %required.chain_id, "Requesting network switch");

        match timed(limit, provider.switch_chain(required.chain_id)).await {
            Ok(()) => Ok(()),
            Err(RawFailure::Provider { code, .. }) if code == PROVIDER_UNKNOWN_CHAIN => {
                tracing::info!(chain = %required.chain_name, "Wallet does not know the chain, adding it");
                timed(limit, provider.add_chain(required))
                    .await
                    .map_err(|e| self.switch_failed(e))?;
                timed(limit, provider.switch_chain(required.chain_id))
                    .await
                    .map_err(|e| self.switch_failed(e))
            }
            Err(e) => Err(self.switch_failed(e)),
        }
    }

    /// An unanswered prompt is a network fault; anything else is a refusal.
    fn switch_failed(&self, err: RawFailure) -> ClientError {
        tracing::warn!(error = %err, "Network switch failed");
        if matches!(err, RawFailure::Timeout) {
            return ClientError::from(err);
        }
        ClientError::chain_switch_rejected(format!(
            "Please switch your wallet to the {} network.",
            self.config.required_chain.chain_name
        ))
    }

    fn establish(&self, session: Session) {
        self.session.send_replace(Some(session));
        if let Err(e) = self.config.flag.set(true) {
            tracing::warn!(error = %e, "Failed to persist connected flag");
        }
    }

    /// Forget the session and clear the flag. Returns whether a session
    /// existed; calling it again is a no-op.
    pub fn disconnect(&self) -> bool {
        let had = self.session.send_replace(None).is_some();
        if let Err(e) = self.config.flag.set(false) {
            tracing::warn!(error = %e, "Failed to clear connected flag");
        }
        if had {
            tracing::info!("Wallet disconnected");
        }
        had
    }

    /// Silent reconnect on start-up: when the flag says we were connected,
    /// reuse already-authorised accounts without prompting. No chain switch
    /// is requested.
    pub async fn resume(&self) -> Result<Option<Session>, ClientError> {
        if !self.config.flag.is_set() {
            return Ok(None);
        }
        let Some(provider) = self.provider.clone() else {
            return Ok(None);
        };
        let accounts = timed(self.config.request_timeout, provider.authorized_accounts()).await?;
        let Some(account) = accounts.into_iter().next() else {
            tracing::debug!("No authorised accounts, clearing stale connected flag");
            if let Err(e) = self.config.flag.set(false) {
                tracing::warn!(error = %e, "Failed to clear connected flag");
            }
            return Ok(None);
        };
        let chain = timed(self.config.request_timeout, provider.chain_id()).await?;
        let session = Session::new(account, chain);
        self.establish(session.clone());
        tracing::info!(account = %session.account.short(), chain = %chain, "Session resumed");
        Ok(Some(session))
    }

    pub fn handle_notification(&self, notification: WalletNotification) -> SessionChange {
        let Some(current) = self.session() else {
            return SessionChange::Unchanged;
        };
        match notification {
            WalletNotification::AccountsChanged(accounts) => match accounts.into_iter().next() {
                None => {
                    self.disconnect();
                    SessionChange::Ended
                }
                Some(account) if account == current.account => SessionChange::Unchanged,
                Some(account) => {
                    let session = Session::new(account, current.chain_id);
                    self.session.send_replace(Some(session.clone()));
                    tracing::info!(account = %session.account.short(), "Active account changed");
                    SessionChange::AccountSwitched(session)
                }
            },
            WalletNotification::ChainChanged(chain) if chain == current.chain_id => {
                SessionChange::Unchanged
            }
            WalletNotification::ChainChanged(chain) => {
                self.session.send_replace(None);
                tracing::info!(from = %current.chain_id, to = %chain, "Wallet changed network, session discarded");
                SessionChange::ChainChanged {
                    from: current.chain_id,
                    to: chain,
                }
            }
        }
    }

    /// Register for wallet notifications, replacing an earlier registration.
    pub fn listen(&self) -> Option<mpsc::UnboundedReceiver<WalletNotification>> {
        let provider = self.provider.as_ref()?;
        let mut slot = self.wallet_subscription.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.take() {
            provider.unsubscribe(old);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *slot = Some(provider.subscribe(tx));
        Some(rx)
    }

    pub fn stop_listening(&self) -> bool {
        let Some(provider) = self.provider.as_ref() else {
            return false;
        };
        let mut slot = self.wallet_subscription.lock().unwrap_or_else(|e| e.into_inner());
        match slot.take() {
            Some(id) => {
                provider.unsubscribe(id);
                true
            }
            None => false,
        }
    }
}
