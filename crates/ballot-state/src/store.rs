//! The single in-memory source of displayed voting state.
//!
//! Every authoritative read replaces the displayed view wholesale. A
//! pending operation's delta is shown only until the next such read; after
//! that the operation is kept for double-submit detection and its outcome
//! needs no arithmetic. Readers only ever see a complete snapshot and
//! nothing is patched from event payloads.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};

use ballot_protocol::{Address, TxHash, VotingState};

use crate::operation::*;
use crate::StateError;

pub type SharedStateStore = Arc<RwLock<StateStore>>;

pub struct StateStore {
    authoritative: Option<VotingState>,
    view: Option<VotingState>,
    /// In submission order; later flag overrides win.
    pending: Vec<PendingOperation>,
    /// Operations whose delta is still part of `view`.
    shown: HashSet<OperationId>,
    publisher: watch::Sender<Option<VotingState>>,
    consistency_warnings: u64,
}

impl StateStore {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(None);
        Self {
            authoritative: None,
            view: None,
            pending: Vec::new(),
            shown: HashSet::new(),
            publisher,
            consistency_warnings: 0,
        }
    }

    pub fn shared() -> SharedStateStore {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Displayed snapshot, `None` until the first authoritative read.
    pub fn read(&self) -> Option<VotingState> {
        self.view.clone()
    }

    pub fn authoritative(&self) -> Option<&VotingState> {
        self.authoritative.as_ref()
    }

    /// Receiver notified with every new displayed snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Option<VotingState>> {
        self.publisher.subscribe()
    }

    /// Replace the displayed state entirely. Deltas of pending operations
    /// are dropped from the view; the read already reflects whatever the
    /// chain has mined.
    pub fn apply_authoritative(&mut self, state: VotingState) {
        tracing::debug!(
            total_votes = state.total_votes(),
            voting_open = state.voting_open(),
            pending = self.pending.len(),
            "Applying authoritative voting state"
        );
        self.view = Some(state.clone());
        self.authoritative = Some(state);
        self.shown.clear();
        self.publish();
    }

    /// Record a new operation and merge its delta into the displayed view.
    ///
    /// Rejects a second operation of the same kind for the same account.
    pub fn begin_optimistic(
        &mut self,
        account: &Address,
        kind: OperationKind,
        delta: OptimisticDelta,
    ) -> Result<OperationId, StateError> {
        if self.is_in_flight(account, kind) {
            return Err(StateError::AlreadyInFlight {
                kind,
                account: account.clone(),
            });
        }
        let view = self.view.as_mut().ok_or(StateError::NotLoaded)?;
        delta.apply_to(view);

        let op = PendingOperation {
            id: OperationId::new(),
            kind,
            account: account.clone(),
            delta,
            submitted_at: chrono::Utc::now(),
            tx: None,
            status: PendingStatus::Submitted,
        };
        let id = op.id;
        tracing::debug!(op_id = %id, kind = %kind, account = %account.short(), "Optimistic operation started");
        self.pending.push(op);
        self.shown.insert(id);
        self.publish();
        Ok(id)
    }

    pub fn attach_transaction(&mut self, id: OperationId, tx: TxHash) -> Result<(), StateError> {
        let op = self
            .pending
            .iter_mut()
            .find(|op| op.id == id)
            .ok_or(StateError::UnknownOperation(id))?;
        op.tx = Some(tx);
        Ok(())
    }

    /// Remove a pending operation once its outcome is known.
    ///
    /// Confirmed: the view is left as it is. A delta still on display is
    /// folded into the authoritative layer. Failed: a delta still on display
    /// is subtracted again, clamping at zero with a consistency warning; one
    /// already replaced by a read needs nothing.
    pub fn resolve_optimistic(
        &mut self,
        id: OperationId,
        outcome: Outcome,
    ) -> Result<PendingOperation, StateError> {
        let index = self
            .pending
            .iter()
            .position(|op| op.id == id)
            .ok_or(StateError::UnknownOperation(id))?;
        let mut op = self.pending.remove(index);
        let shown = self.shown.remove(&id);

        match outcome {
            Outcome::Confirmed => {
                op.status = PendingStatus::Confirmed;
                if shown {
                    if let Some(base) = self.authoritative.as_mut() {
                        op.delta.apply_to(base);
                    }
                }
            }
            Outcome::Failed => {
                op.status = PendingStatus::Failed;
                if shown {
                    self.revert(&op.delta);
                }
            }
        }
        tracing::debug!(op_id = %id, kind = %op.kind, status = ?op.status, "Optimistic operation resolved");
        self.publish();
        Ok(op)
    }

    pub fn is_in_flight(&self, account: &Address, kind: OperationKind) -> bool {
        self.pending
            .iter()
            .any(|op| op.kind == kind && &op.account == account)
    }

    pub fn pending(&self) -> &[PendingOperation] {
        &self.pending
    }

    pub fn pending_operation(&self, id: OperationId) -> Option<&PendingOperation> {
        self.pending.iter().find(|op| op.id == id)
    }

    /// Number of reverts that would have driven a tally negative.
    pub fn consistency_warnings(&self) -> u64 {
        self.consistency_warnings
    }

    /// Drop everything; used when the session ends or the chain changes.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            tracing::info!(dropped = self.pending.len(), "Discarding pending operations");
        }
        self.authoritative = None;
        self.view = None;
        self.pending.clear();
        self.shown.clear();
        self.publish();
    }

    fn revert(&mut self, delta: &OptimisticDelta) {
        let Some(view) = self.view.as_mut() else {
            return;
        };
        for (party, dec) in &delta.tally_increments {
            let current = view.tally(*party);
            if current < *dec {
                self.consistency_warnings += 1;
                tracing::warn!(
                    party = %party,
                    shown = current,
                    rollback = dec,
                    "Rollback would make tally negative; clamping to zero"
                );
            }
            view.set_tally(*party, current.saturating_sub(*dec));
        }

        // Flags come back from the authoritative layer, then whatever is
        // still shown re-applies its overrides.
        if let Some(base) = &self.authoritative {
            view.set_voting_open(base.voting_open());
            view.set_results_finalized(base.results_finalized());
        }
        for op in self.pending.iter().filter(|op| self.shown.contains(&op.id)) {
            op.delta.apply_flags_to(view);
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.view.clone());
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ballot_protocol::PartyId;

    use super::*;

    fn account() -> Address {
        Address::parse("0x00000000000000000000000000000000000000a1").unwrap()
    }

    fn state(p1: u64, p2: u64, open: bool) -> VotingState {
        let mut tallies = BTreeMap::new();
        tallies.insert(PartyId(1), p1);
        tallies.insert(PartyId(2), p2);
        VotingState::from_parts(tallies, open, false, true)
    }

    fn loaded(p1: u64, p2: u64) -> StateStore {
        let mut store = StateStore::new();
        store.apply_authoritative(state(p1, p2, true));
        store
    }

    #[test]
    fn optimistic_vote_is_visible_immediately() {
        let mut store = loaded(5, 3);
        store
            .begin_optimistic(&account(), OperationKind::IdentifierVote, OptimisticDelta::vote(PartyId(1)))
            .unwrap();
        let view = store.read().unwrap();
        assert_eq!(view.tally(PartyId(1)), 6);
        assert_eq!(view.tally(PartyId(2)), 3);
        assert_eq!(view.total_votes(), 9);
    }

    #[test]
    fn failure_restores_exact_prior_state() {
        let mut store = loaded(5, 3);
        let before = store.read().unwrap();
        let id = store
            .begin_optimistic(&account(), OperationKind::IdentifierVote, OptimisticDelta::vote(PartyId(1)))
            .unwrap();
        let op = store.resolve_optimistic(id, Outcome::Failed).unwrap();
        assert_eq!(op.status, PendingStatus::Failed);
        assert_eq!(store.read().unwrap(), before);
        assert!(store.pending().is_empty());
    }

    #[test]
    fn confirmation_takes_authoritative_value() {
        let mut store = loaded(5, 3);
        let id = store
            .begin_optimistic(&account(), OperationKind::IdentifierVote, OptimisticDelta::vote(PartyId(1)))
            .unwrap();
        store.apply_authoritative(state(6, 3, true));
        // The read already counts the vote; the delta is not stacked on it.
        assert_eq!(store.read().unwrap().tally(PartyId(1)), 6);
        assert!(store.is_in_flight(&account(), OperationKind::IdentifierVote));
        store.resolve_optimistic(id, Outcome::Confirmed).unwrap();
        assert_eq!(store.read().unwrap(), state(6, 3, true));
    }

    #[test]
    fn confirmation_without_fresh_read_keeps_shown_value() {
        let mut store = loaded(5, 3);
        let id = store
            .begin_optimistic(&account(), OperationKind::IdentifierVote, OptimisticDelta::vote(PartyId(1)))
            .unwrap();
        store.resolve_optimistic(id, Outcome::Confirmed).unwrap();
        assert_eq!(store.read().unwrap(), state(6, 3, true));
        assert_eq!(store.authoritative().unwrap(), &state(6, 3, true));

        // A later failed toggle restores flags from the folded layer.
        let toggle = store
            .begin_optimistic(&account(), OperationKind::ToggleVoting, OptimisticDelta::voting_open(false))
            .unwrap();
        store.resolve_optimistic(toggle, Outcome::Failed).unwrap();
        assert_eq!(store.read().unwrap(), state(6, 3, true));
    }

    #[test]
    fn failure_after_fresh_read_keeps_chain_value() {
        let mut store = loaded(5, 3);
        let id = store
            .begin_optimistic(&account(), OperationKind::IdentifierVote, OptimisticDelta::vote(PartyId(1)))
            .unwrap();
        // Someone else's vote lands; ours is not mined.
        store.apply_authoritative(state(5, 4, true));
        store.resolve_optimistic(id, Outcome::Failed).unwrap();
        assert_eq!(store.read().unwrap(), state(5, 4, true));
        assert_eq!(store.consistency_warnings(), 0);
    }

    #[test]
    fn duplicate_kind_for_same_account_rejected() {
        let mut store = loaded(0, 0);
        store
            .begin_optimistic(&account(), OperationKind::WalletVote, OptimisticDelta::vote(PartyId(2)))
            .unwrap();
        let err = store
            .begin_optimistic(&account(), OperationKind::WalletVote, OptimisticDelta::vote(PartyId(2)))
            .unwrap_err();
        assert!(matches!(err, StateError::AlreadyInFlight { .. }));
        // A different kind is independent.
        assert!(store
            .begin_optimistic(&account(), OperationKind::IdentifierVote, OptimisticDelta::vote(PartyId(2)))
            .is_ok());
    }

    #[test]
    fn begin_before_first_read_fails() {
        let mut store = StateStore::new();
        let err = store
            .begin_optimistic(&account(), OperationKind::Finalize, OptimisticDelta::finalize())
            .unwrap_err();
        assert!(matches!(err, StateError::NotLoaded));
    }

    #[test]
    fn rollback_clamps_at_zero_and_warns() {
        let mut store = loaded(0, 0);
        let id = store
            .begin_optimistic(&account(), OperationKind::IdentifierVote, OptimisticDelta::vote(PartyId(1)))
            .unwrap();
        // A new round reset the tallies while the vote was in flight, and the
        // view was patched down underneath the delta.
        store.view.as_mut().unwrap().set_tally(PartyId(1), 0);
        store.resolve_optimistic(id, Outcome::Failed).unwrap();
        let view = store.read().unwrap();
        assert_eq!(view.tally(PartyId(1)), 0);
        assert_eq!(store.consistency_warnings(), 1);
        assert!(view.is_consistent());
    }

    #[test]
    fn failed_toggle_restores_flag() {
        let mut store = StateStore::new();
        store.apply_authoritative(state(1, 1, false));
        let id = store
            .begin_optimistic(&account(), OperationKind::ToggleVoting, OptimisticDelta::voting_open(true))
            .unwrap();
        assert!(store.read().unwrap().voting_open());
        store.resolve_optimistic(id, Outcome::Failed).unwrap();
        assert!(!store.read().unwrap().voting_open());
    }

    #[test]
    fn clear_drops_everything() {
        let mut store = loaded(2, 2);
        let rx = store.subscribe();
        store
            .begin_optimistic(&account(), OperationKind::Finalize, OptimisticDelta::finalize())
            .unwrap();
        store.clear();
        assert!(store.read().is_none());
        assert!(store.pending().is_empty());
        assert!(rx.borrow().is_none());
    }

    #[test]
    fn resolve_unknown_operation() {
        let mut store = loaded(1, 1);
        assert!(matches!(
            store.resolve_optimistic(OperationId::new(), Outcome::Confirmed),
            Err(StateError::UnknownOperation(_))
        ));
    }
}
