/// Chain the deployed voting contract lives on (Sepolia testnet).
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

/// Address of the deployed voting contract.
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x249E2bf7Ae7DBcAA89c68EDF40A09c78A1b7e7Bd";

/// Parties the contract keeps tallies for.
pub const DEFAULT_PARTIES: [u32; 2] = [1, 2];

/// Number of decimal digits in a national voter identifier.
pub const NATIONAL_ID_DIGITS: usize = 12;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 120; // several block confirmations

// Injected wallet provider error codes (EIP-1193 / EIP-3085).
pub const PROVIDER_USER_REJECTED: i64 = 4001;
pub const PROVIDER_UNAUTHORIZED: i64 = 4100;
pub const PROVIDER_DISCONNECTED: i64 = 4900;
pub const PROVIDER_CHAIN_DISCONNECTED: i64 = 4901;
pub const PROVIDER_UNKNOWN_CHAIN: i64 = 4902;
pub const RPC_REQUEST_PENDING: i64 = -32002;
pub const RPC_INTERNAL_ERROR: i64 = -32603;
