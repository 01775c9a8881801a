//! Contract event subscriptions.
//!
//! Events are only a hint that something changed: every event triggers a
//! full authoritative reread which replaces the stored state wholesale.
//! Duplicate or reordered events therefore converge to the same state.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use ballot_network::{ContractClient, NetworkError, SubscriptionHandle};
use ballot_protocol::{ClientError, ContractEvent, EventKind, VotingState};
use ballot_state::SharedStateStore;

/// The single "reread and replace" path shared by event handling and
/// transaction confirmation.
#[derive(Clone)]
pub(crate) struct Reread {
    contract: Arc<ContractClient>,
    store: SharedStateStore,
    completed: Arc<watch::Sender<u64>>,
}

impl Reread {
    pub(crate) fn new(contract: Arc<ContractClient>, store: SharedStateStore) -> Self {
        let (completed, _) = watch::channel(0);
        Self {
            contract,
            store,
            completed: Arc::new(completed),
        }
    }

    /// Read the full voting state and apply it. Returns `None` when the
    /// binding changed while the read was in flight; that result belongs to
    /// a previous session and is dropped.
    pub(crate) async fn run(&self) -> Result<Option<VotingState>, ClientError> {
        let generation = self
            .contract
            .binding()
            .await
            .map(|b| b.generation)
            .ok_or(NetworkError::NotBound)?;

        let state = self.contract.read_voting_state().await?;

        if self.contract.binding().await.map(|b| b.generation) != Some(generation) {
            tracing::debug!(generation, "Binding changed during reread, dropping result");
            return Ok(None);
        }
        self.store.write().await.apply_authoritative(state.clone());
        self.completed.send_modify(|n| *n += 1);
        tracing::debug!(total_votes = state.total_votes(), "Voting state reread");
        Ok(Some(state))
    }

    pub(crate) fn watch(&self) -> watch::Receiver<u64> {
        self.completed.subscribe()
    }
}

pub struct EventSubscriber {
    contract: Arc<ContractClient>,
    reread: Reread,
    handles: Mutex<Vec<SubscriptionHandle>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl EventSubscriber {
    pub(crate) fn new(contract: Arc<ContractClient>, reread: Reread) -> Self {
        Self {
            contract,
            reread,
            handles: Mutex::new(Vec::new()),
            pump: Mutex::new(None),
        }
    }

    /// Subscribe to every event kind on the current binding and start the
    /// task that rereads on each delivery. Earlier subscriptions are
    /// released first.
    pub async fn attach(&self) -> Result<(), ClientError> {
        self.detach().await;

        let (tx, mut rx) = mpsc::unbounded_channel::<ContractEvent>();
        let mut handles = Vec::with_capacity(EventKind::ALL.len());
        for kind in EventKind::ALL {
            match self.contract.subscribe(kind, tx.clone()).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in &handles {
                        self.contract.unsubscribe(handle).await;
                    }
                    return Err(e.into());
                }
            }
        }
        drop(tx);

        let reread = self.reread.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tracing::debug!(event = %event.kind(), timestamp = event.timestamp(), "Contract event received");
                if let Err(e) = reread.run().await {
                    tracing::warn!(kind = %e.kind, error = %e, "Reread after event failed");
                }
            }
        });

        tracing::info!(subscriptions = handles.len(), "Event subscriptions attached");
        *self.handles.lock().await = handles;
        *self.pump.lock().await = Some(pump);
        Ok(())
    }

    /// Stop the pump and release every subscription. Returns how many
    /// subscriptions were held.
    pub async fn detach(&self) -> usize {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in &handles {
            self.contract.unsubscribe(handle).await;
        }
        if !handles.is_empty() {
            tracing::debug!(released = handles.len(), "Event subscriptions detached");
        }
        handles.len()
    }

    pub async fn is_attached(&self) -> bool {
        !self.handles.lock().await.is_empty()
    }

    /// Handle one event directly, outside the pump. The payload is ignored.
    pub async fn handle_event(&self, event: &ContractEvent) -> Result<(), ClientError> {
        tracing::debug!(event = %event.kind(), "Handling contract event");
        self.reread.run().await.map(|_| ())
    }

    pub async fn refresh(&self) -> Result<Option<VotingState>, ClientError> {
        self.reread.run().await
    }

    /// Count of completed rereads.
    pub fn watch_refreshes(&self) -> watch::Receiver<u64> {
        self.reread.watch()
    }
}
