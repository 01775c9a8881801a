//! Deterministic in-memory wallet and contract.
//!
//! `InMemoryContract` follows the deployed contract's rules closely enough
//! (revert reasons, event emission, authority quorum) to drive the whole
//! client without a browser or a chain. Both doubles count every call so
//! tests can assert on network traffic.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use ballot_protocol::{
    Address, ChainDescriptor, ChainId, ContractEvent, EventKind, PartyId, RawFailure,
    SystemStatus, TxHash, VoterRef, PROVIDER_UNKNOWN_CHAIN,
};

use crate::contract::{ContractBackend, ReadCall, ReadValue, Receipt, WriteCall};
use crate::provider::{WalletNotification, WalletProvider};
use crate::{BackendFuture, SubscriptionId};

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// Request counters of a [`MockWallet`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletCalls {
    pub request_accounts: u32,
    pub authorized_accounts: u32,
    pub chain_id: u32,
    pub switch_chain: u32,
    pub add_chain: u32,
    pub subscribe: u32,
    pub unsubscribe: u32,
}

struct WalletState {
    accounts: Vec<Address>,
    authorized: bool,
    chain: ChainId,
    known_chains: HashSet<ChainId>,
    accounts_error: Option<RawFailure>,
    switch_error: Option<RawFailure>,
    add_error: Option<RawFailure>,
    accounts_delay: Option<Duration>,
    switch_delay: Option<Duration>,
    listeners: HashMap<SubscriptionId, mpsc::UnboundedSender<WalletNotification>>,
    next_subscription: u64,
    calls: WalletCalls,
}

impl WalletState {
    fn notify(&mut self, notification: WalletNotification) {
        self.listeners
            .retain(|_, sink| sink.send(notification.clone()).is_ok());
    }
}

/// Scripted browser wallet.
pub struct MockWallet {
    state: Mutex<WalletState>,
}

impl MockWallet {
    /// A wallet exposing `accounts` on `chain`, knowing no other chain.
    pub fn new(accounts: Vec<Address>, chain: ChainId) -> Self {
        let mut known_chains = HashSet::new();
        known_chains.insert(chain);
        Self {
            state: Mutex::new(WalletState {
                accounts,
                authorized: false,
                chain,
                known_chains,
                accounts_error: None,
                switch_error: None,
                add_error: None,
                accounts_delay: None,
                switch_delay: None,
                listeners: HashMap::new(),
                next_subscription: 0,
                calls: WalletCalls::default(),
            }),
        }
    }

    pub fn with_known_chain(self, chain: ChainId) -> Self {
        self.lock().known_chains.insert(chain);
        self
    }

    /// Accounts are already authorised for this origin (silent resume works).
    pub fn with_authorized(self, authorized: bool) -> Self {
        self.lock().authorized = authorized;
        self
    }

    pub fn with_accounts_error(self, err: RawFailure) -> Self {
        self.lock().accounts_error = Some(err);
        self
    }

    pub fn with_switch_error(self, err: RawFailure) -> Self {
        self.lock().switch_error = Some(err);
        self
    }

    pub fn with_add_error(self, err: RawFailure) -> Self {
        self.lock().add_error = Some(err);
        self
    }

    /// Delay every account request, e.g. while the user looks at the prompt.
    pub fn with_accounts_delay(self, delay: Duration) -> Self {
        self.lock().accounts_delay = Some(delay);
        self
    }

    /// Delay every switch request before the wallet answers it.
    pub fn with_switch_delay(self, delay: Duration) -> Self {
        self.lock().switch_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> WalletCalls {
        self.lock().calls.clone()
    }

    pub fn current_chain(&self) -> ChainId {
        self.lock().chain
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Simulate the user switching or locking accounts in the extension.
    pub fn change_accounts(&self, accounts: Vec<Address>) {
        let mut state = self.lock();
        state.accounts = accounts.clone();
        state.notify(WalletNotification::AccountsChanged(accounts));
    }

    /// Simulate the user switching networks in the extension.
    pub fn change_chain(&self, chain: ChainId) {
        let mut state = self.lock();
        state.chain = chain;
        state.known_chains.insert(chain);
        state.notify(WalletNotification::ChainChanged(chain));
    }

    fn lock(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl WalletProvider for MockWallet {
    fn request_accounts(&self) -> BackendFuture<'_, Vec<Address>> {
        Box::pin(async move {
            let delay = {
                let mut state = self.lock();
                state.calls.request_accounts += 1;
                state.accounts_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut state = self.lock();
            if let Some(err) = state.accounts_error.clone() {
                return Err(err);
            }
            state.authorized = true;
            Ok(state.accounts.clone())
        })
    }

    fn authorized_accounts(&self) -> BackendFuture<'_, Vec<Address>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.authorized_accounts += 1;
            if state.authorized {
                Ok(state.accounts.clone())
            } else {
                Ok(Vec::new())
            }
        })
    }

    fn chain_id(&self) -> BackendFuture<'_, ChainId> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.chain_id += 1;
            Ok(state.chain)
        })
    }

    fn switch_chain(&self, chain_id: ChainId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let delay = {
                let mut state = self.lock();
                state.calls.switch_chain += 1;
                state.switch_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut state = self.lock();
            if let Some(err) = state.switch_error.clone() {
                return Err(err);
            }
            if !state.known_chains.contains(&chain_id) {
                return Err(RawFailure::Provider {
                    code: PROVIDER_UNKNOWN_CHAIN,
                    message: format!("Unrecognized chain ID \"{chain_id}\""),
                });
            }
            if state.chain != chain_id {
                state.chain = chain_id;
                state.notify(WalletNotification::ChainChanged(chain_id));
            }
            Ok(())
        })
    }

    fn add_chain<'a>(&'a self, descriptor: &'a ChainDescriptor) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.add_chain += 1;
            if let Some(err) = state.add_error.clone() {
                return Err(err);
            }
            state.known_chains.insert(descriptor.chain_id);
            Ok(())
        })
    }

    fn subscribe(&self, sink: mpsc::UnboundedSender<WalletNotification>) -> SubscriptionId {
        let mut state = self.lock();
        state.calls.subscribe += 1;
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.listeners.insert(id, sink);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.lock();
        state.calls.unsubscribe += 1;
        state.listeners.remove(&id);
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Request counters of an [`InMemoryContract`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractCalls {
    pub reads: u32,
    pub submits: u32,
    pub waits: u32,
    pub subscribes: u32,
    pub unsubscribes: u32,
}

/// Transactions are mined lazily, on the first receipt request.
enum TxState {
    Queued { from: Address, call: WriteCall },
    Mined(Result<Receipt, RawFailure>),
}

struct ContractState {
    deployed: bool,
    tallies: BTreeMap<PartyId, u64>,
    voting_open: bool,
    results_finalized: bool,
    authorities: Vec<Address>,
    verified: HashSet<Address>,
    voted: HashSet<VoterRef>,
    transactions: HashMap<TxHash, TxState>,
    hold_receipts: bool,
    reads_down: bool,
    drop_reads_when_mined: bool,
    read_delay: Option<Duration>,
    forced_revert: Option<String>,
    submit_error: Option<RawFailure>,
    listeners: HashMap<SubscriptionId, (EventKind, mpsc::UnboundedSender<ContractEvent>)>,
    next_subscription: u64,
    nonce: u64,
    block: u64,
    calls: ContractCalls,
}

impl ContractState {
    fn all_verified(&self) -> bool {
        !self.authorities.is_empty() && self.authorities.iter().all(|a| self.verified.contains(a))
    }

    fn is_authority(&self, who: &Address) -> bool {
        self.authorities.contains(who)
    }

    fn emit(&mut self, event: ContractEvent) {
        let kind = event.kind();
        self.listeners.retain(|_, (listening, sink)| {
            if *listening != kind {
                return true;
            }
            sink.send(event.clone()).is_ok()
        });
    }

    fn mine(&mut self, tx: &TxHash) -> Option<Result<Receipt, RawFailure>> {
        let (from, call) = match self.transactions.get(tx)? {
            TxState::Mined(result) => return Some(result.clone()),
            TxState::Queued { from, call } => (from.clone(), call.clone()),
        };
        let outcome = match self.forced_revert.clone() {
            Some(reason) => Err(reason),
            None => self.execute(&from, &call),
        };
        let result = match outcome {
            Ok(events) => {
                if self.drop_reads_when_mined {
                    self.drop_reads_when_mined = false;
                    self.reads_down = true;
                }
                self.block += 1;
                for event in events {
                    self.emit(event);
                }
                Ok(Receipt {
                    tx: tx.clone(),
                    block_number: self.block,
                })
            }
            Err(reason) => Err(RawFailure::Revert { reason }),
        };
        self.transactions.insert(tx.clone(), TxState::Mined(result.clone()));
        Some(result)
    }

    /// Apply a call with the contract's rules; `Err` carries the revert reason.
    fn execute(&mut self, from: &Address, call: &WriteCall) -> Result<Vec<ContractEvent>, String> {
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        match call {
            WriteCall::CastVote { party, voter } => {
                if !self.voting_open || self.results_finalized {
                    return Err("Voting is closed".into());
                }
                if !self.tallies.contains_key(party) {
                    return Err("Invalid party".into());
                }
                if self.voted.contains(voter) {
                    return Err(match voter {
                        VoterRef::NationalId(_) => "Aadhar already voted".into(),
                        VoterRef::Wallet(_) => "Address already voted".into(),
                    });
                }
                self.voted.insert(voter.clone());
                *self.tallies.entry(*party).or_insert(0) += 1;
                let identifier = match voter {
                    VoterRef::NationalId(id) => id.as_str().to_string(),
                    VoterRef::Wallet(addr) => addr.to_string(),
                };
                Ok(vec![ContractEvent::VoteCast {
                    voter: from.clone(),
                    party: *party,
                    identifier,
                    timestamp,
                }])
            }
            WriteCall::SubmitAuthorityVerification { purpose } => {
                if !self.is_authority(from) {
                    return Err("Only authorities can verify".into());
                }
                if self.verified.contains(from) {
                    return Err("Already verified".into());
                }
                self.verified.insert(from.clone());
                Ok(vec![ContractEvent::AuthorityVerified {
                    authority: from.clone(),
                    purpose: purpose.clone(),
                    timestamp,
                }])
            }
            WriteCall::SetVotingOpen(open) => {
                if !self.is_authority(from) {
                    return Err("Only authorities can toggle voting".into());
                }
                if !self.all_verified() {
                    return Err("All authorities must verify first".into());
                }
                if self.results_finalized {
                    return Err("Election already finalized".into());
                }
                self.voting_open = *open;
                Ok(vec![ContractEvent::VotingStatusChanged {
                    open: *open,
                    changed_by: from.clone(),
                    timestamp,
                }])
            }
            WriteCall::FinalizeResults => {
                if !self.is_authority(from) {
                    return Err("Only authorities can finalize".into());
                }
                if self.results_finalized {
                    return Err("Election already finalized".into());
                }
                self.results_finalized = true;
                self.voting_open = false;
                Ok(vec![ContractEvent::VotingStatusChanged {
                    open: false,
                    changed_by: from.clone(),
                    timestamp,
                }])
            }
        }
    }
}

/// In-memory stand-in for the deployed voting contract.
pub struct InMemoryContract {
    state: Mutex<ContractState>,
}

impl InMemoryContract {
    /// A deployed contract with zeroed tallies for `parties`, voting closed
    /// and no authority verified yet.
    pub fn new(parties: &[PartyId], authorities: Vec<Address>) -> Self {
        Self {
            state: Mutex::new(ContractState {
                deployed: true,
                tallies: parties.iter().map(|p| (*p, 0)).collect(),
                voting_open: false,
                results_finalized: false,
                authorities,
                verified: HashSet::new(),
                voted: HashSet::new(),
                transactions: HashMap::new(),
                hold_receipts: false,
                reads_down: false,
                drop_reads_when_mined: false,
                read_delay: None,
                forced_revert: None,
                submit_error: None,
                listeners: HashMap::new(),
                next_subscription: 0,
                nonce: 0,
                block: 0,
                calls: ContractCalls::default(),
            }),
        }
    }

    pub fn with_tallies(self, tallies: &[(PartyId, u64)]) -> Self {
        {
            let mut state = self.lock();
            for (party, count) in tallies {
                state.tallies.insert(*party, *count);
            }
        }
        self
    }

    pub fn with_voting_open(self, open: bool) -> Self {
        self.lock().voting_open = open;
        self
    }

    /// Delay every read, as a slow RPC endpoint would.
    pub fn with_read_delay(self, delay: Duration) -> Self {
        self.lock().read_delay = Some(delay);
        self
    }

    /// Mark every authority as verified.
    pub fn with_all_verified(self) -> Self {
        {
            let mut state = self.lock();
            let authorities = state.authorities.clone();
            state.verified.extend(authorities);
        }
        self
    }

    pub fn calls(&self) -> ContractCalls {
        self.lock().calls.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn tally(&self, party: PartyId) -> u64 {
        self.lock().tallies.get(&party).copied().unwrap_or(0)
    }

    /// Absent contract: every read fails with `CALL_EXCEPTION`.
    pub fn set_deployed(&self, deployed: bool) {
        self.lock().deployed = deployed;
    }

    /// Transactions stay pending forever (nothing is mined).
    pub fn hold_receipts(&self, hold: bool) {
        self.lock().hold_receipts = hold;
    }

    /// Reads fail with a network error while `down` is set.
    pub fn set_reads_down(&self, down: bool) {
        self.lock().reads_down = down;
    }

    /// Reads start failing as soon as the next transaction is mined.
    pub fn drop_reads_when_mined(&self) {
        self.lock().drop_reads_when_mined = true;
    }

    /// Every transaction mined from now on reverts with `reason` (until cleared).
    pub fn force_revert(&self, reason: Option<&str>) {
        self.lock().forced_revert = reason.map(str::to_string);
    }

    /// The next submission fails before reaching the chain.
    pub fn fail_next_submit(&self, err: RawFailure) {
        self.lock().submit_error = Some(err);
    }

    /// Change a tally behind the client's back, as another voter would.
    pub fn set_tally(&self, party: PartyId, count: u64) {
        self.lock().tallies.insert(party, count);
    }

    /// Deliver an arbitrary event to subscribers.
    pub fn emit(&self, event: ContractEvent) {
        self.lock().emit(event);
    }

    fn lock(&self) -> MutexGuard<'_, ContractState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryContract {
    fn default() -> Self {
        Self::new(&[PartyId(1), PartyId(2)], Vec::new())
    }
}

fn tx_hash(from: &Address, nonce: u64) -> TxHash {
    let mut hasher = Sha256::new();
    hasher.update(from.as_str().as_bytes());
    hasher.update(nonce.to_le_bytes());
    TxHash(format!("0x{}", hex::encode(hasher.finalize())))
}

impl ContractBackend for InMemoryContract {
    fn read<'a>(&'a self, _contract: &'a Address, call: &'a ReadCall) -> BackendFuture<'a, ReadValue> {
        Box::pin(async move {
            let delay = {
                let mut state = self.lock();
                state.calls.reads += 1;
                state.read_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let state = self.lock();
            if !state.deployed {
                return Err(RawFailure::Rpc {
                    code: "CALL_EXCEPTION".into(),
                    message: "missing revert data".into(),
                });
            }
            if state.reads_down {
                return Err(RawFailure::Network("connection reset by peer".into()));
            }
            let value = match call {
                ReadCall::PartyTally(party) => {
                    ReadValue::Count(state.tallies.get(party).copied().unwrap_or(0))
                }
                ReadCall::VotingOpen => ReadValue::Flag(state.voting_open),
                ReadCall::ResultsFinalized => ReadValue::Flag(state.results_finalized),
                ReadCall::AuthoritiesFullyVerified => ReadValue::Flag(state.all_verified()),
                ReadCall::HasVoted(voter) => ReadValue::Flag(state.voted.contains(voter)),
                ReadCall::SystemStatus => ReadValue::Status(SystemStatus {
                    voting_open: state.voting_open,
                    authorities_fully_verified: state.all_verified(),
                    results_finalized: state.results_finalized,
                    total_votes: state.tallies.values().sum(),
                    verified_authorities: state.verified.len() as u64,
                }),
            };
            Ok(value)
        })
    }

    fn submit<'a>(
        &'a self,
        _contract: &'a Address,
        from: &'a Address,
        call: &'a WriteCall,
    ) -> BackendFuture<'a, TxHash> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.submits += 1;
            if let Some(err) = state.submit_error.take() {
                return Err(err);
            }
            state.nonce += 1;
            let hash = tx_hash(from, state.nonce);
            state.transactions.insert(
                hash.clone(),
                TxState::Queued {
                    from: from.clone(),
                    call: call.clone(),
                },
            );
            Ok(hash)
        })
    }

    fn wait_for_receipt<'a>(&'a self, tx: &'a TxHash) -> BackendFuture<'a, Receipt> {
        Box::pin(async move {
            let outcome = {
                let mut state = self.lock();
                state.calls.waits += 1;
                if state.hold_receipts {
                    None
                } else {
                    Some(state.mine(tx))
                }
            };
            match outcome {
                None => std::future::pending().await,
                Some(Some(receipt)) => receipt,
                Some(None) => Err(RawFailure::Rpc {
                    code: "TRANSACTION_NOT_FOUND".into(),
                    message: format!("unknown transaction {tx}"),
                }),
            }
        })
    }

    fn subscribe(
        &self,
        _contract: &Address,
        kind: EventKind,
        sink: mpsc::UnboundedSender<ContractEvent>,
    ) -> Result<SubscriptionId, RawFailure> {
        let mut state = self.lock();
        state.calls.subscribes += 1;
        if !state.deployed {
            return Err(RawFailure::Unreachable("no contract at address".into()));
        }
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.listeners.insert(id, (kind, sink));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.lock();
        state.calls.unsubscribes += 1;
        state.listeners.remove(&id);
    }
}
