//! Typed facade over the deployed voting contract.
//!
//! [`ContractClient`] owns the single active [`ContractBinding`]. Binding
//! validates the configured address and issues one canary read so that an
//! absent contract is reported as unreachable instead of surfacing later as
//! a plausible `0`/`false`. Rebinding always drops the old binding's event
//! subscriptions first.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use ballot_protocol::{
    Address, ClientError, ContractEvent, EventKind, PartyId, RawFailure, Session, SystemStatus,
    TxHash, VoterEligibilityRecord, VoterRef, VotingState, DEFAULT_CONFIRMATION_TIMEOUT_SECS,
    DEFAULT_CONTRACT_ADDRESS, DEFAULT_PARTIES, DEFAULT_REQUEST_TIMEOUT_SECS,
};

use crate::{timed, BackendFuture, NetworkError, SubscriptionId};

// ---------------------------------------------------------------------------
// Remote surface
// ---------------------------------------------------------------------------

/// Read-only calls on the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadCall {
    PartyTally(PartyId),
    VotingOpen,
    ResultsFinalized,
    AuthoritiesFullyVerified,
    HasVoted(VoterRef),
    SystemStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadValue {
    Count(u64),
    Flag(bool),
    Status(SystemStatus),
}

/// State-changing calls on the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteCall {
    CastVote { party: PartyId, voter: VoterRef },
    SubmitAuthorityVerification { purpose: String },
    SetVotingOpen(bool),
    FinalizeResults,
}

/// A mined, successful transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx: TxHash,
    pub block_number: u64,
}

/// The contract as reachable through the wallet's RPC connection.
pub trait ContractBackend: Send + Sync {
    fn read<'a>(&'a self, contract: &'a Address, call: &'a ReadCall) -> BackendFuture<'a, ReadValue>;

    /// Sign and broadcast a transaction from `from`.
    fn submit<'a>(
        &'a self,
        contract: &'a Address,
        from: &'a Address,
        call: &'a WriteCall,
    ) -> BackendFuture<'a, TxHash>;

    /// Resolve once the transaction is mined; a reverted transaction yields
    /// [`RawFailure::Revert`]. May never resolve.
    fn wait_for_receipt<'a>(&'a self, tx: &'a TxHash) -> BackendFuture<'a, Receipt>;

    fn subscribe(
        &self,
        contract: &Address,
        kind: EventKind,
        sink: mpsc::UnboundedSender<ContractEvent>,
    ) -> Result<SubscriptionId, RawFailure>;

    fn unsubscribe(&self, id: SubscriptionId);
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ContractSettings {
    /// Contract address as configured; validated at bind time.
    pub address: String,
    pub parties: Vec<PartyId>,
    pub call_timeout: Duration,
    pub confirmation_timeout: Duration,
}

impl Default for ContractSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_CONTRACT_ADDRESS.to_string(),
            parties: DEFAULT_PARTIES.iter().copied().map(PartyId).collect(),
            call_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            confirmation_timeout: Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
        }
    }
}

/// The contract bound to one session.
#[derive(Debug, Clone)]
pub struct ContractBinding {
    pub address: Address,
    pub session: Session,
    /// Increases on every bind; handles from older generations are stale.
    pub generation: u64,
    subscriptions: Vec<SubscriptionId>,
}

impl ContractBinding {
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

/// Returned by [`ContractClient::subscribe`]; pass back to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub kind: EventKind,
    pub generation: u64,
}

/// Handle of a submitted write.
pub struct PendingTransaction {
    pub hash: TxHash,
    backend: Arc<dyn ContractBackend>,
    timeout: Duration,
}

impl PendingTransaction {
    /// Wait for confirmation. Fails with `Revert` (carrying the reason) or
    /// with `Timeout` when the transaction is still pending after the
    /// confirmation timeout.
    pub async fn wait(&self) -> Result<Receipt, RawFailure> {
        timed(self.timeout, self.backend.wait_for_receipt(&self.hash)).await
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Debug for PendingTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransaction")
            .field("hash", &self.hash)
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub struct ContractClient {
    backend: Arc<dyn ContractBackend>,
    settings: ContractSettings,
    binding: RwLock<Option<ContractBinding>>,
    generation: AtomicU64,
}

impl ContractClient {
    pub fn new(backend: Arc<dyn ContractBackend>, settings: ContractSettings) -> Self {
        Self {
            backend,
            settings,
            binding: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn parties(&self) -> &[PartyId] {
        &self.settings.parties
    }

    /// Bind to the configured contract for `session`, replacing any previous
    /// binding.
    pub async fn bind(&self, session: &Session) -> Result<Address, ClientError> {
        self.unbind().await;

        let configured = self.settings.address.trim();
        if configured.is_empty() {
            return Err(ClientError::unreachable("Contract address not configured"));
        }
        let address = Address::parse(configured).map_err(|e| {
            tracing::warn!(error = %e, "Rejecting configured contract address");
            ClientError::unreachable(format!("Invalid contract address: {configured}"))
        })?;

        // Canary: a throwing read means nothing usable lives at this address.
        let canary = match self.settings.parties.first() {
            Some(party) => ReadCall::PartyTally(*party),
            None => ReadCall::SystemStatus,
        };
        if let Err(e) = timed(self.settings.call_timeout, self.backend.read(&address, &canary)).await {
            tracing::warn!(contract = %address, error = %e, "Canary read failed");
            return Err(ClientError::unreachable(
                "Contract not found at this address. Verify it is deployed on the selected network.",
            ));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.binding.write().await = Some(ContractBinding {
            address: address.clone(),
            session: session.clone(),
            generation,
            subscriptions: Vec::new(),
        });
        tracing::info!(
            contract = %address,
            account = %session.account.short(),
            chain = %session.chain_id,
            generation,
            "Contract bound"
        );
        Ok(address)
    }

    /// Drop the active binding and every subscription made through it.
    /// Returns whether a binding existed.
    pub async fn unbind(&self) -> bool {
        let Some(old) = self.binding.write().await.take() else {
            return false;
        };
        for id in &old.subscriptions {
            self.backend.unsubscribe(*id);
        }
        tracing::info!(
            contract = %old.address,
            generation = old.generation,
            released = old.subscriptions.len(),
            "Contract unbound"
        );
        true
    }

    pub async fn binding(&self) -> Option<ContractBinding> {
        self.binding.read().await.clone()
    }

    pub async fn is_bound(&self) -> bool {
        self.binding.read().await.is_some()
    }

    async fn bound(&self) -> Result<(Address, Address), NetworkError> {
        self.binding
            .read()
            .await
            .as_ref()
            .map(|b| (b.address.clone(), b.session.account.clone()))
            .ok_or(NetworkError::NotBound)
    }

    async fn read(&self, call: ReadCall) -> Result<ReadValue, NetworkError> {
        let (contract, _) = self.bound().await?;
        let value = timed(self.settings.call_timeout, self.backend.read(&contract, &call)).await?;
        Ok(value)
    }

    async fn read_count(&self, call: ReadCall) -> Result<u64, NetworkError> {
        match self.read(call).await? {
            ReadValue::Count(n) => Ok(n),
            _ => Err(NetworkError::UnexpectedValue { expected: "count" }),
        }
    }

    async fn read_flag(&self, call: ReadCall) -> Result<bool, NetworkError> {
        match self.read(call).await? {
            ReadValue::Flag(b) => Ok(b),
            _ => Err(NetworkError::UnexpectedValue { expected: "flag" }),
        }
    }

    pub async fn tally(&self, party: PartyId) -> Result<u64, NetworkError> {
        self.read_count(ReadCall::PartyTally(party)).await
    }

    pub async fn voting_open(&self) -> Result<bool, NetworkError> {
        self.read_flag(ReadCall::VotingOpen).await
    }

    pub async fn results_finalized(&self) -> Result<bool, NetworkError> {
        self.read_flag(ReadCall::ResultsFinalized).await
    }

    pub async fn authorities_fully_verified(&self) -> Result<bool, NetworkError> {
        self.read_flag(ReadCall::AuthoritiesFullyVerified).await
    }

    pub async fn system_status(&self) -> Result<SystemStatus, NetworkError> {
        match self.read(ReadCall::SystemStatus).await? {
            ReadValue::Status(status) => Ok(status),
            _ => Err(NetworkError::UnexpectedValue { expected: "status" }),
        }
    }

    /// Fresh has-voted lookup; the record is never cached.
    pub async fn eligibility(&self, voter: &VoterRef) -> Result<VoterEligibilityRecord, NetworkError> {
        let has_voted = self.read_flag(ReadCall::HasVoted(voter.clone())).await?;
        Ok(VoterEligibilityRecord {
            voter: voter.clone(),
            has_voted,
            checked_at: chrono::Utc::now(),
        })
    }

    /// Bulk authoritative read: every configured party's tally plus the
    /// aggregate status.
    pub async fn read_voting_state(&self) -> Result<VotingState, NetworkError> {
        let mut tallies = BTreeMap::new();
        for party in &self.settings.parties {
            tallies.insert(*party, self.tally(*party).await?);
        }
        let status = self.system_status().await?;
        Ok(VotingState::new(tallies, &status))
    }

    /// Submit a transaction from the bound account.
    pub async fn write(&self, call: WriteCall) -> Result<PendingTransaction, NetworkError> {
        let (contract, account) = self.bound().await?;
        let hash = timed(
            self.settings.call_timeout,
            self.backend.submit(&contract, &account, &call),
        )
        .await?;
        tracing::info!(tx = %hash, call = ?call, "Transaction submitted");
        Ok(PendingTransaction {
            hash,
            backend: Arc::clone(&self.backend),
            timeout: self.settings.confirmation_timeout,
        })
    }

    /// Register `sink` for `kind` events against the current binding.
    pub async fn subscribe(
        &self,
        kind: EventKind,
        sink: mpsc::UnboundedSender<ContractEvent>,
    ) -> Result<SubscriptionHandle, NetworkError> {
        let mut guard = self.binding.write().await;
        let binding = guard.as_mut().ok_or(NetworkError::NotBound)?;
        let id = self.backend.subscribe(&binding.address, kind, sink)?;
        binding.subscriptions.push(id);
        tracing::debug!(event = %kind, subscription = %id, generation = binding.generation, "Subscribed");
        Ok(SubscriptionHandle {
            id,
            kind,
            generation: binding.generation,
        })
    }

    /// Release one subscription. Handles of a previous binding were already
    /// released by the rebind and are ignored.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut guard = self.binding.write().await;
        let Some(binding) = guard.as_mut() else {
            return;
        };
        if binding.generation != handle.generation {
            return;
        }
        if let Some(pos) = binding.subscriptions.iter().position(|id| *id == handle.id) {
            binding.subscriptions.remove(pos);
            self.backend.unsubscribe(handle.id);
            tracing::debug!(event = %handle.kind, subscription = %handle.id, "Unsubscribed");
        }
    }
}
