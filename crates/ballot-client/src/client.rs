//! The `VotingClient` that ties everything together.
//!
//! Owns the connection manager, the contract client, the state store, the
//! event subscriber and the optimistic updater, and sequences them on
//! session changes: every new session unbinds, clears and rebinds before
//! the first authoritative read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use ballot_network::{
    ConnectOutcome, ConnectionConfig, ConnectionManager, ContractBackend, ContractClient,
    ContractSettings, SessionChange, WalletNotification, WalletProvider,
};
use ballot_protocol::{
    ClientError, NationalId, Session, VoterEligibilityRecord, VoterRef,
    VotingState,
};
use ballot_state::{PendingOperation, SharedStateStore, StateStore};

use crate::config::ClientConfig;
use crate::subscriber::{EventSubscriber, Reread};
use crate::updater::{LastError, OperationUpdate, OptimisticUpdater};

/// Snapshot for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub session: Option<Session>,
    pub bound: bool,
    pub voting_state: Option<VotingState>,
    pub pending: Vec<PendingOperation>,
    pub last_error: Option<ClientError>,
}

/// Clears the client's connect marker when the connect future ends or is
/// dropped.
struct ConnectInFlight<'a>(&'a AtomicBool);

impl Drop for ConnectInFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct VotingClient {
    connection: Arc<ConnectionManager>,
    contract: Arc<ContractClient>,
    store: SharedStateStore,
    events: EventSubscriber,
    updater: OptimisticUpdater,
    /// Serialises connect, disconnect and notification handling.
    lifecycle: tokio::sync::Mutex<()>,
    /// Set from the wallet prompt until bootstrap is done.
    connecting: AtomicBool,
    last_error: LastError,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl VotingClient {
    pub fn new(
        config: &ClientConfig,
        provider: Option<Arc<dyn WalletProvider>>,
        backend: Arc<dyn ContractBackend>,
    ) -> Arc<Self> {
        Self::from_parts(
            config.connection_config(),
            config.contract_settings(),
            provider,
            backend,
        )
    }

    pub fn from_parts(
        connection: ConnectionConfig,
        settings: ContractSettings,
        provider: Option<Arc<dyn WalletProvider>>,
        backend: Arc<dyn ContractBackend>,
    ) -> Arc<Self> {
        let connection = Arc::new(ConnectionManager::new(provider, connection));
        let contract = Arc::new(ContractClient::new(backend, settings));
        let store = StateStore::shared();
        let reread = Reread::new(contract.clone(), store.clone());
        let last_error = LastError::default();

        Arc::new(Self {
            events: EventSubscriber::new(contract.clone(), reread.clone()),
            updater: OptimisticUpdater::new(contract.clone(), store.clone(), reread, last_error.clone()),
            connection,
            contract,
            store,
            lifecycle: tokio::sync::Mutex::new(()),
            connecting: AtomicBool::new(false),
            last_error,
            listener: Mutex::new(None),
        })
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn contract(&self) -> &ContractClient {
        &self.contract
    }

    pub fn events(&self) -> &EventSubscriber {
        &self.events
    }

    /// Cast, verify, toggle and finalize operations.
    pub fn updater(&self) -> &OptimisticUpdater {
        &self.updater
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<OperationUpdate> {
        self.updater.subscribe()
    }

    pub async fn watch_state(&self) -> watch::Receiver<Option<VotingState>> {
        self.store.read().await.subscribe()
    }

    pub fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.connection.watch_session()
    }

    pub async fn voting_state(&self) -> Option<VotingState> {
        self.store.read().await.read()
    }

    pub async fn status(&self) -> ClientStatus {
        let (voting_state, pending) = {
            let store = self.store.read().await;
            (store.read(), store.pending().to_vec())
        };
        ClientStatus {
            session: self.connection.session(),
            bound: self.contract.is_bound().await,
            voting_state,
            pending,
            last_error: self.last_error.get(),
        }
    }

    /// Connect the wallet, then bind and load the contract state. A call
    /// made while another connect is still in flight, wallet prompt or
    /// bootstrap, is ignored.
    pub async fn connect(&self) -> Result<ConnectOutcome, ClientError> {
        if self.connecting.swap(true, Ordering::SeqCst) {
            tracing::debug!("Connect already in flight");
            return Ok(ConnectOutcome::AlreadyPending);
        }
        let _in_flight = ConnectInFlight(&self.connecting);
        let _lifecycle = self.lifecycle.lock().await;

        let outcome = match self.connection.connect().await {
            Ok(outcome) => outcome,
            Err(e) => {
                // A failed switch keeps the session, but on the wrong chain.
                if self.connection.session().is_some() && !self.connection.on_required_chain() {
                    self.teardown().await;
                }
                return Err(self.fail(e));
            }
        };
        if let ConnectOutcome::Connected(session) = &outcome {
            self.bootstrap(session).await.map_err(|e| self.fail(e))?;
        }
        Ok(outcome)
    }

    /// Drop the session and every binding. Returns whether a session
    /// existed; a second call changes nothing.
    pub async fn disconnect(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;
        self.last_error.clear();
        self.connection.disconnect()
    }

    /// Silent reconnect using the persisted flag. `Ok(None)` when there is
    /// nothing to resume.
    pub async fn resume(&self) -> Result<Option<Session>, ClientError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.resume_locked().await
    }

    async fn resume_locked(&self) -> Result<Option<Session>, ClientError> {
        let Some(session) = self.connection.resume().await.map_err(|e| self.fail(e))? else {
            return Ok(None);
        };
        self.bootstrap(&session).await.map_err(|e| self.fail(e))?;
        Ok(Some(session))
    }

    /// Fresh has-voted lookup for a national identifier. The identifier is
    /// validated before any network call.
    pub async fn check_eligibility(&self, identifier: &str) -> Result<VoterEligibilityRecord, ClientError> {
        let id = NationalId::parse(identifier)?;
        let record = self
            .contract
            .eligibility(&VoterRef::NationalId(id))
            .await
            .map_err(|e| self.fail(e.into()))?;
        tracing::debug!(voter = %record.voter, has_voted = record.has_voted, "Eligibility checked");
        Ok(record)
    }

    /// Apply one wallet notification: account changes rebind, a locked
    /// wallet ends the session, a chain change discards everything and
    /// bootstraps again from the wallet's new state.
    pub async fn handle_wallet_notification(
        &self,
        notification: WalletNotification,
    ) -> Result<SessionChange, ClientError> {
        let _lifecycle = self.lifecycle.lock().await;
        let change = self.connection.handle_notification(notification);
        match &change {
            SessionChange::Unchanged => {}
            SessionChange::Ended => self.teardown().await,
            SessionChange::AccountSwitched(session) => {
                self.bootstrap(session).await.map_err(|e| self.fail(e))?;
            }
            SessionChange::ChainChanged { .. } => {
                self.teardown().await;
                self.resume_locked().await?;
            }
        }
        Ok(change)
    }

    /// Start applying wallet notifications in the background. Returns
    /// `false` when there is no wallet provider.
    pub fn spawn_wallet_listener(self: &Arc<Self>) -> bool {
        let Some(mut rx) = self.connection.listen() else {
            return false;
        };
        let client: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                let Some(client) = client.upgrade() else {
                    break;
                };
                if let Err(e) = client.handle_wallet_notification(notification).await {
                    tracing::warn!(kind = %e.kind, error = %e, "Wallet notification handling failed");
                }
            }
        });
        let previous = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        true
    }

    /// Stop background work and release subscriptions. The session and
    /// the persisted flag are kept.
    pub async fn shutdown(&self) {
        let listener = self.listener.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(listener) = listener {
            listener.abort();
        }
        self.connection.stop_listening();
        self.updater.cancel_all();
        self.events.detach().await;
        self.contract.unbind().await;
        tracing::info!("Voting client shut down");
    }

    async fn bootstrap(&self, session: &Session) -> Result<(), ClientError> {
        self.teardown().await;
        let required = self.connection.required_chain();
        if session.chain_id != required.chain_id {
            return Err(ClientError::chain_switch_rejected(format!(
                "Wallet is on chain {}. Please switch to the {} network.",
                session.chain_id, required.chain_name
            )));
        }
        self.contract.bind(session).await?;
        self.events.attach().await?;
        self.events.refresh().await?;
        self.last_error.clear();
        tracing::info!(account = %session.account.short(), "Client ready");
        Ok(())
    }

    async fn teardown(&self) {
        let cancelled = self.updater.cancel_all();
        self.events.detach().await;
        self.contract.unbind().await;
        self.store.write().await.clear();
        if cancelled > 0 {
            tracing::info!(cancelled, "In-flight operations cancelled");
        }
    }

    fn fail(&self, err: ClientError) -> ClientError {
        tracing::warn!(kind = %err.kind, error = %err, "Client operation failed");
        self.last_error.record(&err);
        err
    }
}

impl Drop for VotingClient {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().ok().and_then(Option::take) {
            listener.abort();
        }
    }
}
