//! Failure classification.
//!
//! Maps a raw provider/contract/network failure onto the canonical
//! [`ErrorKind`] taxonomy with a stable user message. Pure: no I/O, no
//! retries. Revert wording is only ever inspected here.

use crate::constants::*;
use crate::{ClientError, ErrorKind, RawFailure};

/// Revert-reason fragments (matched case-insensitively) and their outcome.
const REVERT_RULES: &[(&str, ErrorKind, &str)] = &[
    (
        "already voted",
        ErrorKind::AlreadyActedOnIdentifier,
        "This identifier has already voted",
    ),
    (
        "already verified",
        ErrorKind::AlreadyActedOnIdentifier,
        "This authority has already verified",
    ),
    (
        "voting is closed",
        ErrorKind::OperationNotPermittedInCurrentState,
        "Voting is currently closed",
    ),
    (
        "voting is not open",
        ErrorKind::OperationNotPermittedInCurrentState,
        "Voting is currently closed",
    ),
    (
        "all authorities must verify",
        ErrorKind::OperationNotPermittedInCurrentState,
        "All authorities must verify first",
    ),
    (
        "only authorities",
        ErrorKind::OperationNotPermittedInCurrentState,
        "Only authorities can perform this action",
    ),
    (
        "already initialized",
        ErrorKind::OperationNotPermittedInCurrentState,
        "Candidates are already initialized",
    ),
    (
        "finalized",
        ErrorKind::OperationNotPermittedInCurrentState,
        "Results are already finalized",
    ),
    (
        "invalid aadhar",
        ErrorKind::InvalidInput,
        "Identifier rejected by the contract",
    ),
];

const MSG_USER_REJECTED: &str = "Request rejected in wallet";
const MSG_REQUEST_PENDING: &str = "A wallet request is already pending. Check your wallet.";
const MSG_NETWORK: &str = "Network error. Check your connection and try again.";
const MSG_TIMEOUT: &str = "Timed out waiting for the network";
const MSG_WALLET_BUSY: &str =
    "Wallet is temporarily unavailable. Wait a moment and try again.";
const MSG_UNREACHABLE: &str = "Contract not reachable at the configured address";
const MSG_REVERTED: &str = "Transaction reverted by the contract";
const MSG_UNKNOWN: &str = "Unexpected failure. Please try again.";

/// Classify a raw failure.
pub fn classify(failure: &RawFailure) -> ClientError {
    match failure {
        RawFailure::Provider { code, message } => classify_provider(*code, message),
        RawFailure::Revert { reason } => match match_revert(reason) {
            Some(err) => err,
            None => ClientError::new(ErrorKind::Unknown, MSG_REVERTED),
        },
        RawFailure::Rpc { code, message } => classify_rpc(code, message),
        RawFailure::Network(message) => {
            if contains(message, "circuit breaker") {
                ClientError::new(ErrorKind::ChainOrNetworkFault, MSG_WALLET_BUSY)
            } else {
                ClientError::new(ErrorKind::ChainOrNetworkFault, MSG_NETWORK)
            }
        }
        RawFailure::Timeout => ClientError::new(ErrorKind::ChainOrNetworkFault, MSG_TIMEOUT),
        RawFailure::Cancelled => ClientError::new(ErrorKind::UserRejected, "Operation cancelled"),
        RawFailure::Unreachable(_) => ClientError::unreachable(MSG_UNREACHABLE),
    }
}

fn classify_provider(code: i64, message: &str) -> ClientError {
    match code {
        PROVIDER_USER_REJECTED | PROVIDER_UNAUTHORIZED => {
            ClientError::new(ErrorKind::UserRejected, MSG_USER_REJECTED)
        }
        RPC_REQUEST_PENDING => ClientError::new(ErrorKind::ChainOrNetworkFault, MSG_REQUEST_PENDING),
        PROVIDER_DISCONNECTED | PROVIDER_CHAIN_DISCONNECTED | PROVIDER_UNKNOWN_CHAIN => {
            ClientError::new(ErrorKind::ChainOrNetworkFault, MSG_NETWORK)
        }
        // Wallets wrap contract reverts into internal errors.
        RPC_INTERNAL_ERROR => match match_revert(message) {
            Some(err) => err,
            None => ClientError::new(ErrorKind::ChainOrNetworkFault, MSG_NETWORK),
        },
        _ => classify_message(message),
    }
}

fn classify_rpc(code: &str, message: &str) -> ClientError {
    match code {
        "ACTION_REJECTED" => ClientError::new(ErrorKind::UserRejected, MSG_USER_REJECTED),
        "CALL_EXCEPTION" => match match_revert(message) {
            Some(err) => err,
            None => ClientError::unreachable(MSG_UNREACHABLE),
        },
        "NETWORK_ERROR" | "SERVER_ERROR" => {
            ClientError::new(ErrorKind::ChainOrNetworkFault, MSG_NETWORK)
        }
        "TIMEOUT" => ClientError::new(ErrorKind::ChainOrNetworkFault, MSG_TIMEOUT),
        "UNKNOWN_ERROR" if contains(message, "circuit breaker") => {
            ClientError::new(ErrorKind::ChainOrNetworkFault, MSG_WALLET_BUSY)
        }
        _ => classify_message(message),
    }
}

/// Last resort: look at free text for a recognisable revert or rejection.
fn classify_message(message: &str) -> ClientError {
    if let Some(err) = match_revert(message) {
        return err;
    }
    if contains(message, "user rejected") || contains(message, "user denied") {
        return ClientError::new(ErrorKind::UserRejected, MSG_USER_REJECTED);
    }
    if contains(message, "timeout") || contains(message, "timed out") {
        return ClientError::new(ErrorKind::ChainOrNetworkFault, MSG_TIMEOUT);
    }
    ClientError::new(ErrorKind::Unknown, MSG_UNKNOWN)
}

fn match_revert(reason: &str) -> Option<ClientError> {
    REVERT_RULES
        .iter()
        .find(|(needle, _, _)| contains(reason, needle))
        .map(|(_, kind, message)| ClientError::new(*kind, *message))
}

fn contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revert(reason: &str) -> RawFailure {
        RawFailure::Revert { reason: reason.into() }
    }

    #[test]
    fn user_rejection_is_retryable() {
        let err = classify(&RawFailure::Provider {
            code: PROVIDER_USER_REJECTED,
            message: "User rejected the request.".into(),
        });
        assert_eq!(err.kind, ErrorKind::UserRejected);
        assert!(err.retryable);
    }

    #[test]
    fn already_voted_is_terminal() {
        let err = classify(&revert("Aadhar already voted"));
        assert_eq!(err.kind, ErrorKind::AlreadyActedOnIdentifier);
        assert!(!err.retryable);
        assert_eq!(err.message, "This identifier has already voted");
    }

    #[test]
    fn closed_voting_is_not_permitted() {
        let err = classify(&revert("Voting is closed"));
        assert_eq!(err.kind, ErrorKind::OperationNotPermittedInCurrentState);
        assert!(!err.retryable);
    }

    #[test]
    fn authority_rules_are_not_permitted() {
        for reason in ["Only authorities can call", "All authorities must verify first"] {
            let err = classify(&revert(reason));
            assert_eq!(err.kind, ErrorKind::OperationNotPermittedInCurrentState, "{reason}");
        }
    }

    #[test]
    fn wrapped_revert_inside_internal_error() {
        let err = classify(&RawFailure::Provider {
            code: RPC_INTERNAL_ERROR,
            message: "execution reverted: Already verified".into(),
        });
        assert_eq!(err.kind, ErrorKind::AlreadyActedOnIdentifier);
    }

    #[test]
    fn pending_request_is_network_fault() {
        let err = classify(&RawFailure::Provider {
            code: RPC_REQUEST_PENDING,
            message: "Request of type 'wallet_requestPermissions' already pending".into(),
        });
        assert_eq!(err.kind, ErrorKind::ChainOrNetworkFault);
        assert!(err.retryable);
    }

    #[test]
    fn call_exception_without_reason_is_unreachable() {
        let err = classify(&RawFailure::Rpc {
            code: "CALL_EXCEPTION".into(),
            message: "missing revert data".into(),
        });
        assert_eq!(err.kind, ErrorKind::ContractUnreachable);
        assert!(!err.retryable);
    }

    #[test]
    fn timeout_and_network_are_faults() {
        assert_eq!(classify(&RawFailure::Timeout).kind, ErrorKind::ChainOrNetworkFault);
        assert_eq!(
            classify(&RawFailure::Network("connection reset".into())).kind,
            ErrorKind::ChainOrNetworkFault
        );
        assert_eq!(
            classify(&RawFailure::Rpc {
                code: "UNKNOWN_ERROR".into(),
                message: "execution prevented because the circuit breaker is open".into(),
            })
            .message,
            MSG_WALLET_BUSY
        );
    }

    #[test]
    fn unrecognised_revert_is_unknown() {
        let err = classify(&revert("weird"));
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(err.retryable);
    }

    #[test]
    fn messages_are_stable_across_wording() {
        let a = classify(&revert("Aadhar already voted"));
        let b = classify(&revert("ERROR: ALREADY VOTED for this election"));
        assert_eq!((a.kind, a.message), (b.kind, b.message));
    }

    #[test]
    fn cancellation_maps_to_user_rejected() {
        assert_eq!(classify(&RawFailure::Cancelled).kind, ErrorKind::UserRejected);
    }
}
