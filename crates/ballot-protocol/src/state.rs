//! Voting-state snapshot and the read models returned by the contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{PartyId, VoterRef};

/// Snapshot of the remote election state as shown to the user.
///
/// `total_votes` is derived: it is recomputed on every mutation, so it always
/// equals the sum of `party_tallies`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct VotingState {
    party_tallies: BTreeMap<PartyId, u64>,
    voting_open: bool,
    results_finalized: bool,
    authorities_fully_verified: bool,
    total_votes: u64,
}

impl VotingState {
    pub fn new(party_tallies: BTreeMap<PartyId, u64>, status: &SystemStatus) -> Self {
        Self::from_parts(
            party_tallies,
            status.voting_open,
            status.results_finalized,
            status.authorities_fully_verified,
        )
    }

    pub fn from_parts(
        party_tallies: BTreeMap<PartyId, u64>,
        voting_open: bool,
        results_finalized: bool,
        authorities_fully_verified: bool,
    ) -> Self {
        let mut state = Self {
            party_tallies,
            voting_open,
            results_finalized,
            authorities_fully_verified,
            total_votes: 0,
        };
        state.recompute_total();
        state
    }

    pub fn party_tallies(&self) -> &BTreeMap<PartyId, u64> {
        &self.party_tallies
    }

    pub fn tally(&self, party: PartyId) -> u64 {
        self.party_tallies.get(&party).copied().unwrap_or(0)
    }

    pub fn total_votes(&self) -> u64 {
        self.total_votes
    }

    pub fn voting_open(&self) -> bool {
        self.voting_open
    }

    pub fn results_finalized(&self) -> bool {
        self.results_finalized
    }

    pub fn authorities_fully_verified(&self) -> bool {
        self.authorities_fully_verified
    }

    pub fn set_tally(&mut self, party: PartyId, count: u64) {
        self.party_tallies.insert(party, count);
        self.recompute_total();
    }

    pub fn set_voting_open(&mut self, open: bool) {
        self.voting_open = open;
    }

    pub fn set_results_finalized(&mut self, finalized: bool) {
        self.results_finalized = finalized;
    }

    pub fn set_authorities_fully_verified(&mut self, verified: bool) {
        self.authorities_fully_verified = verified;
    }

    /// Whether the derived total still matches the tallies.
    pub fn is_consistent(&self) -> bool {
        self.total_votes == Self::sum(&self.party_tallies)
    }

    fn recompute_total(&mut self) {
        self.total_votes = Self::sum(&self.party_tallies);
    }

    fn sum(tallies: &BTreeMap<PartyId, u64>) -> u64 {
        tallies.values().fold(0u64, |acc, v| acc.saturating_add(*v))
    }
}

/// Aggregate system-status tuple returned by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    pub voting_open: bool,
    pub authorities_fully_verified: bool,
    pub results_finalized: bool,
    pub total_votes: u64,
    pub verified_authorities: u64,
}

/// Result of a has-voted lookup. Produced per query and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterEligibilityRecord {
    pub voter: VoterRef,
    pub has_voted: bool,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

impl VoterEligibilityRecord {
    pub fn is_eligible(&self) -> bool {
        !self.has_voted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tallies(pairs: &[(u32, u64)]) -> BTreeMap<PartyId, u64> {
        pairs.iter().map(|(p, c)| (PartyId(*p), *c)).collect()
    }

    #[test]
    fn total_tracks_tallies() {
        let mut state = VotingState::from_parts(tallies(&[(1, 5), (2, 3)]), true, false, true);
        assert_eq!(state.total_votes(), 8);
        state.set_tally(PartyId(1), 6);
        assert_eq!(state.total_votes(), 9);
        state.set_tally(PartyId(3), 1);
        assert_eq!(state.total_votes(), 10);
        assert!(state.is_consistent());
    }

    #[test]
    fn missing_party_reads_as_zero() {
        let state = VotingState::default();
        assert_eq!(state.tally(PartyId(7)), 0);
        assert_eq!(state.total_votes(), 0);
    }

    #[test]
    fn built_from_system_status() {
        let status = SystemStatus {
            voting_open: true,
            authorities_fully_verified: true,
            results_finalized: false,
            total_votes: 2,
            verified_authorities: 3,
        };
        let state = VotingState::new(tallies(&[(1, 1), (2, 1)]), &status);
        assert!(state.voting_open());
        assert!(state.authorities_fully_verified());
        assert!(!state.results_finalized());
        assert_eq!(state.total_votes(), 2);
    }
}
