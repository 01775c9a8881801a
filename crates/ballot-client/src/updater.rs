//! Optimistic write lifecycle.
//!
//! Each operation moves `submitted -> confirmed | failed`. Local validation
//! runs before anything else and never creates a pending operation. Once
//! the delta is in the store, every exit path resolves it, so the store is
//! never left holding a stale optimistic value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};

use ballot_network::{ContractClient, NetworkError, Receipt, WriteCall};
use ballot_protocol::{
    Address, ClientError, NationalId, PartyId, RawFailure, TxHash, VoterRef,
};
use ballot_state::{OperationId, OperationKind, OptimisticDelta, Outcome, SharedStateStore};

use crate::subscriber::Reread;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Progress of one operation, for progress UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OperationStatus {
    Submitted { tx: TxHash },
    Confirmed { tx: TxHash, block_number: u64 },
    Failed { error: ClientError },
}

impl OperationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "Transaction submitted, waiting for confirmation",
            Self::Confirmed { .. } => "Transaction confirmed",
            Self::Failed { .. } => "Transaction failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationUpdate {
    pub id: OperationId,
    pub kind: OperationKind,
    pub status: OperationStatus,
}

/// Most recent failure, shared with the client facade for status reporting.
#[derive(Debug, Clone, Default)]
pub(crate) struct LastError(Arc<Mutex<Option<ClientError>>>);

impl LastError {
    pub(crate) fn record(&self, err: &ClientError) {
        *self.lock() = Some(err.clone());
    }

    pub(crate) fn get(&self) -> Option<ClientError> {
        self.lock().clone()
    }

    pub(crate) fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<ClientError>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct OptimisticUpdater {
    contract: Arc<ContractClient>,
    store: SharedStateStore,
    reread: Reread,
    updates: broadcast::Sender<OperationUpdate>,
    cancels: Mutex<HashMap<OperationId, oneshot::Sender<()>>>,
    last_error: LastError,
}

impl OptimisticUpdater {
    pub(crate) fn new(
        contract: Arc<ContractClient>,
        store: SharedStateStore,
        reread: Reread,
        last_error: LastError,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            contract,
            store,
            reread,
            updates,
            cancels: Mutex::new(HashMap::new()),
            last_error,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationUpdate> {
        self.updates.subscribe()
    }

    /// Vote for `party` with an identifier-derived voter key.
    pub async fn cast_vote(&self, party: PartyId, identifier: &str) -> Result<Receipt, ClientError> {
        let id = NationalId::parse(identifier)?;
        self.check_party(party)?;
        self.execute(
            OperationKind::IdentifierVote,
            OptimisticDelta::vote(party),
            WriteCall::CastVote {
                party,
                voter: VoterRef::NationalId(id),
            },
        )
        .await
    }

    /// Vote for `party` as the connected wallet account.
    pub async fn cast_wallet_vote(&self, party: PartyId) -> Result<Receipt, ClientError> {
        self.check_party(party)?;
        let account = self.account().await?;
        self.execute(
            OperationKind::WalletVote,
            OptimisticDelta::vote(party),
            WriteCall::CastVote {
                party,
                voter: VoterRef::Wallet(account),
            },
        )
        .await
    }

    pub async fn verify_authority(&self, purpose: &str) -> Result<Receipt, ClientError> {
        let purpose = purpose.trim();
        if purpose.is_empty() {
            return Err(ClientError::invalid_input("Please enter a verification purpose"));
        }
        self.execute(
            OperationKind::AuthorityVerify,
            OptimisticDelta::none(),
            WriteCall::SubmitAuthorityVerification {
                purpose: purpose.to_string(),
            },
        )
        .await
    }

    pub async fn set_voting_open(&self, open: bool) -> Result<Receipt, ClientError> {
        self.execute(
            OperationKind::ToggleVoting,
            OptimisticDelta::voting_open(open),
            WriteCall::SetVotingOpen(open),
        )
        .await
    }

    pub async fn finalize(&self) -> Result<Receipt, ClientError> {
        self.execute(
            OperationKind::Finalize,
            OptimisticDelta::finalize(),
            WriteCall::FinalizeResults,
        )
        .await
    }

    /// Abort the wait of an in-flight operation. It resolves as failed
    /// (`UserRejected`) and its delta is rolled back.
    pub fn cancel(&self, id: OperationId) -> bool {
        let sender = self.cancels().remove(&id);
        match sender {
            Some(tx) => {
                tracing::info!(op_id = %id, "Cancelling operation");
                tx.send(()).is_ok()
            }
            None => false,
        }
    }

    /// Cancel everything in flight; used when the session goes away.
    pub fn cancel_all(&self) -> usize {
        let senders: Vec<_> = self.cancels().drain().collect();
        let count = senders.len();
        for (_, tx) in senders {
            let _ = tx.send(());
        }
        count
    }

    fn check_party(&self, party: PartyId) -> Result<(), ClientError> {
        if self.contract.parties().contains(&party) {
            Ok(())
        } else {
            Err(ClientError::invalid_input(format!("Unknown party {party}")))
        }
    }

    async fn account(&self) -> Result<Address, ClientError> {
        self.contract
            .binding()
            .await
            .map(|b| b.session.account)
            .ok_or_else(|| NetworkError::NotBound.into())
    }

    async fn execute(
        &self,
        kind: OperationKind,
        delta: OptimisticDelta,
        call: WriteCall,
    ) -> Result<Receipt, ClientError> {
        let account = self.account().await?;
        let id = self.store.write().await.begin_optimistic(&account, kind, delta)?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancels().insert(id, cancel_tx);
        let result = self.submit_and_wait(id, kind, call, cancel_rx).await;
        self.cancels().remove(&id);

        match result {
            Ok(receipt) => {
                // On a failed reread the confirmed delta stays on display.
                if let Err(e) = self.reread.run().await {
                    tracing::warn!(op_id = %id, error = %e, "Reread after confirmation failed");
                    self.last_error.record(&e);
                }
                self.resolve(id, Outcome::Confirmed).await;
                tracing::info!(op_id = %id, kind = %kind, tx = %receipt.tx, block = receipt.block_number, "Operation confirmed");
                self.publish(
                    id,
                    kind,
                    OperationStatus::Confirmed {
                        tx: receipt.tx.clone(),
                        block_number: receipt.block_number,
                    },
                );
                Ok(receipt)
            }
            Err(err) => {
                self.resolve(id, Outcome::Failed).await;
                tracing::warn!(op_id = %id, kind = %kind, error_kind = %err.kind, error = %err, "Operation failed");
                self.last_error.record(&err);
                self.publish(id, kind, OperationStatus::Failed { error: err.clone() });
                Err(err)
            }
        }
    }

    async fn submit_and_wait(
        &self,
        id: OperationId,
        kind: OperationKind,
        call: WriteCall,
        mut cancel: oneshot::Receiver<()>,
    ) -> Result<Receipt, ClientError> {
        let pending = tokio::select! {
            submitted = self.contract.write(call) => submitted?,
            _ = &mut cancel => return Err(RawFailure::Cancelled.into()),
        };

        if let Err(e) = self.store.write().await.attach_transaction(id, pending.hash.clone()) {
            tracing::debug!(op_id = %id, error = %e, "Operation no longer pending");
        }
        self.publish(
            id,
            kind,
            OperationStatus::Submitted {
                tx: pending.hash.clone(),
            },
        );

        tokio::select! {
            mined = pending.wait() => mined.map_err(ClientError::from),
            _ = &mut cancel => Err(RawFailure::Cancelled.into()),
        }
    }

    async fn resolve(&self, id: OperationId, outcome: Outcome) {
        // The store may have been cleared by a session change meanwhile.
        if let Err(e) = self.store.write().await.resolve_optimistic(id, outcome) {
            tracing::debug!(op_id = %id, error = %e, "Nothing to resolve");
        }
    }

    fn publish(&self, id: OperationId, kind: OperationKind, status: OperationStatus) {
        let _ = self.updates.send(OperationUpdate { id, kind, status });
    }

    fn cancels(&self) -> MutexGuard<'_, HashMap<OperationId, oneshot::Sender<()>>> {
        self.cancels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        let submitted = OperationStatus::Submitted {
            tx: TxHash("0xabc".into()),
        };
        assert_eq!(
            submitted.label(),
            "Transaction submitted, waiting for confirmation"
        );
        assert!(!submitted.is_terminal());
        let failed = OperationStatus::Failed {
            error: ClientError::invalid_input("bad"),
        };
        assert!(failed.is_terminal());
    }

    #[test]
    fn last_error_is_shared() {
        let slot = LastError::default();
        let other = slot.clone();
        slot.record(&ClientError::no_provider());
        assert_eq!(other.get().unwrap().kind, ballot_protocol::ErrorKind::NoProviderAvailable);
        other.clear();
        assert!(slot.get().is_none());
    }
}
