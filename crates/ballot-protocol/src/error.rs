use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Local parse/validation failures of protocol types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid chain id: {0}")]
    InvalidChainId(String),
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A failure as it arrives from the wallet provider or the contract RPC,
/// before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RawFailure {
    /// Numeric error returned by the injected wallet provider.
    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },
    /// Transaction or call reverted with a reason string.
    #[error("execution reverted: {reason}")]
    Revert { reason: String },
    /// Symbolic error code from the RPC client (`CALL_EXCEPTION`, `NETWORK_ERROR`, ...).
    #[error("rpc error {code}: {message}")]
    Rpc { code: String, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("cancelled locally")]
    Cancelled,
    #[error("contract unreachable: {0}")]
    Unreachable(String),
}

/// Canonical failure kinds surfaced to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NoProviderAvailable,
    ChainSwitchRejected,
    ContractUnreachable,
    InvalidInput,
    AlreadyActedOnIdentifier,
    OperationNotPermittedInCurrentState,
    ChainOrNetworkFault,
    UserRejected,
    Unknown,
}

impl ErrorKind {
    /// Whether re-invoking the same operation may succeed without any
    /// change of configuration or election state.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UserRejected
            | Self::ChainOrNetworkFault
            | Self::ChainSwitchRejected
            | Self::Unknown => true,
            Self::NoProviderAvailable
            | Self::ContractUnreachable
            | Self::InvalidInput
            | Self::AlreadyActedOnIdentifier
            | Self::OperationNotPermittedInCurrentState => false,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoProviderAvailable => "no_provider_available",
            Self::ChainSwitchRejected => "chain_switch_rejected",
            Self::ContractUnreachable => "contract_unreachable",
            Self::InvalidInput => "invalid_input",
            Self::AlreadyActedOnIdentifier => "already_acted_on_identifier",
            Self::OperationNotPermittedInCurrentState => "operation_not_permitted",
            Self::ChainOrNetworkFault => "chain_or_network_fault",
            Self::UserRejected => "user_rejected",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Outward-facing failure: a stable `(kind, message)` pair plus the retry hint.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ClientError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    pub fn no_provider() -> Self {
        Self::new(
            ErrorKind::NoProviderAvailable,
            "No wallet provider detected. Install a browser wallet to continue.",
        )
    }

    pub fn chain_switch_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChainSwitchRejected, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContractUnreachable, message)
    }

    pub fn not_permitted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationNotPermittedInCurrentState, message)
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        Self::invalid_input(err.to_string())
    }
}

impl From<RawFailure> for ClientError {
    fn from(raw: RawFailure) -> Self {
        crate::classify(&raw)
    }
}
