use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{NATIONAL_ID_DIGITS, SEPOLIA_CHAIN_ID};
use crate::ProtocolError;

/// A 20-byte account or contract address.
///
/// Stored in canonical lowercase `0x`-prefixed form so two spellings of
/// the same address compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidAddress("address is empty".into()));
        }
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| ProtocolError::InvalidAddress(format!("{trimmed}: missing 0x prefix")))?;
        let bytes = hex::decode(body)
            .map_err(|e| ProtocolError::InvalidAddress(format!("{trimmed}: {e}")))?;
        if bytes.len() != 20 {
            return Err(ProtocolError::InvalidAddress(format!(
                "{trimmed}: expected 20 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(format!("0x{}", hex::encode(bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines, e.g. `0x249e…e7bd`.
    pub fn short(&self) -> String {
        format!("{}…{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

/// Numeric chain identifier. Wallets report it as a hex quantity (`0xaa36a7`),
/// configuration files may use either hex or decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawChainId", into = "String")]
pub struct ChainId(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawChainId {
    Number(u64),
    Text(String),
}

impl TryFrom<RawChainId> for ChainId {
    type Error = ProtocolError;

    fn try_from(value: RawChainId) -> Result<Self, Self::Error> {
        match value {
            RawChainId::Number(n) => Ok(Self(n)),
            RawChainId::Text(s) => Self::parse(&s),
        }
    }
}

impl ChainId {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
            Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed
            .map(Self)
            .map_err(|e| ProtocolError::InvalidChainId(format!("{trimmed}: {e}")))
    }

    /// Hex quantity form used on the wallet RPC surface.
    pub fn to_hex(&self) -> String {
        format!("{:#x}", self.0)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<ChainId> for String {
    fn from(value: ChainId) -> Self {
        value.to_hex()
    }
}

/// Party identifier as used by the contract's tally getters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub u32);

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque voter key derived from a 12-digit national identity number.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NationalId(String);

impl NationalId {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.len() != NATIONAL_ID_DIGITS || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidIdentifier(format!(
                "identifier must be exactly {NATIONAL_ID_DIGITS} digits"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier with all but the last four digits hidden.
    pub fn masked(&self) -> String {
        let visible = &self.0[self.0.len() - 4..];
        format!("{}{visible}", "*".repeat(self.0.len() - 4))
    }
}

// Never print the full identifier through Debug.
impl fmt::Debug for NationalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NationalId({})", self.masked())
    }
}

impl TryFrom<String> for NationalId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NationalId> for String {
    fn from(value: NationalId) -> Self {
        value.0
    }
}

/// Whom an eligibility record or a cast vote refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoterRef {
    /// Voting as the connected wallet account.
    Wallet(Address),
    /// Voting with an identifier-derived key.
    NationalId(NationalId),
}

impl fmt::Display for VoterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wallet(addr) => write!(f, "wallet:{}", addr.short()),
            Self::NationalId(id) => write!(f, "id:{}", id.masked()),
        }
    }
}

/// The active wallet-account/chain pairing the client operates as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub account: Address,
    pub chain_id: ChainId,
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

impl Session {
    pub fn new(account: Address, chain_id: ChainId) -> Self {
        Self {
            account,
            chain_id,
            connected_at: chrono::Utc::now(),
        }
    }
}

/// Handle of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Descriptor submitted with an add-chain request when the wallet does not
/// know the required network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDescriptor {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl ChainDescriptor {
    pub fn sepolia() -> Self {
        Self {
            chain_id: ChainId(SEPOLIA_CHAIN_ID),
            chain_name: "Sepolia Testnet".into(),
            native_currency: NativeCurrency {
                name: "Sepolia ETH".into(),
                symbol: "ETH".into(),
                decimals: 18,
            },
            rpc_urls: vec!["https://sepolia.infura.io/v3/".into()],
            block_explorer_urls: vec!["https://sepolia.etherscan.io".into()],
        }
    }
}

impl Default for ChainDescriptor {
    fn default() -> Self {
        Self::sepolia()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_canonicalised() {
        let a = Address::parse("0x249E2bf7Ae7DBcAA89c68EDF40A09c78A1b7e7Bd").unwrap();
        let b = Address::parse("0x249e2bf7ae7dbcaa89c68edf40a09c78a1b7e7bd").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.short(), "0x249e…e7bd");
    }

    #[test]
    fn address_rejects_bad_input() {
        assert!(Address::parse("").is_err());
        assert!(Address::parse("249e2bf7ae7dbcaa89c68edf40a09c78a1b7e7bd").is_err());
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzz9e2bf7ae7dbcaa89c68edf40a09c78a1b7e7bd").is_err());
    }

    #[test]
    fn chain_id_hex_and_decimal() {
        assert_eq!(ChainId::parse("0xaa36a7").unwrap(), ChainId(SEPOLIA_CHAIN_ID));
        assert_eq!(ChainId::parse("11155111").unwrap(), ChainId(SEPOLIA_CHAIN_ID));
        assert_eq!(ChainId(SEPOLIA_CHAIN_ID).to_hex(), "0xaa36a7");
        assert!(ChainId::parse("0xnope").is_err());
    }

    #[test]
    fn chain_id_deserializes_from_number_or_string() {
        let from_num: ChainId = serde_json::from_str("11155111").unwrap();
        let from_str: ChainId = serde_json::from_str("\"0xaa36a7\"").unwrap();
        assert_eq!(from_num, from_str);
    }

    #[test]
    fn national_id_requires_twelve_digits() {
        assert!(NationalId::parse("123456789012").is_ok());
        assert!(NationalId::parse("12345678901").is_err());
        assert!(NationalId::parse("1234567890123").is_err());
        assert!(NationalId::parse("12345678901a").is_err());
    }

    #[test]
    fn national_id_debug_is_masked() {
        let id = NationalId::parse("123456789012").unwrap();
        assert_eq!(id.masked(), "********9012");
        assert!(!format!("{id:?}").contains("12345678"));
    }
}
