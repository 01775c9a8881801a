//! Client configuration.
//!
//! Loaded from a TOML file (JSON is accepted by extension). Every section
//! is optional and falls back to the Sepolia deployment defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use ballot_network::{ConnectionConfig, ContractSettings, SessionFlag};
use ballot_protocol::{
    ChainDescriptor, ChainId, NativeCurrency, PartyId, DEFAULT_CONFIRMATION_TIMEOUT_SECS,
    DEFAULT_CONTRACT_ADDRESS, DEFAULT_PARTIES, DEFAULT_REQUEST_TIMEOUT_SECS,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub contract: ContractSection,
    pub chain: ChainSection,
    pub timeouts: TimeoutSection,
    pub session: SessionSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractSection {
    /// Checked when binding, not when loading.
    pub address: String,
    pub parties: Vec<u32>,
}

impl Default for ContractSection {
    fn default() -> Self {
        Self {
            address: DEFAULT_CONTRACT_ADDRESS.to_string(),
            parties: DEFAULT_PARTIES.to_vec(),
        }
    }
}

/// The network the wallet must be on, and the descriptor offered to wallets
/// that do not know it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub currency_name: String,
    pub currency_symbol: String,
    pub decimals: u8,
    pub rpc_urls: Vec<String>,
    pub explorer_urls: Vec<String>,
}

impl Default for ChainSection {
    fn default() -> Self {
        let sepolia = ChainDescriptor::sepolia();
        Self {
            chain_id: sepolia.chain_id,
            chain_name: sepolia.chain_name,
            currency_name: sepolia.native_currency.name,
            currency_symbol: sepolia.native_currency.symbol,
            decimals: sepolia.native_currency.decimals,
            rpc_urls: sepolia.rpc_urls,
            explorer_urls: sepolia.block_explorer_urls,
        }
    }
}

impl ChainSection {
    pub fn descriptor(&self) -> ChainDescriptor {
        ChainDescriptor {
            chain_id: self.chain_id,
            chain_name: self.chain_name.clone(),
            native_currency: NativeCurrency {
                name: self.currency_name.clone(),
                symbol: self.currency_symbol.clone(),
                decimals: self.decimals,
            },
            rpc_urls: self.rpc_urls.clone(),
            block_explorer_urls: self.explorer_urls.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    /// Non-interactive wallet requests and contract reads.
    pub request_secs: u64,
    /// Waiting for a transaction to be mined.
    pub confirmation_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            request_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            confirmation_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Where the "was connected" flag lives. Defaults to the platform's
    /// local data directory.
    pub flag_path: Option<PathBuf>,
}

impl SessionSection {
    pub fn flag(&self) -> SessionFlag {
        match &self.flag_path {
            Some(path) => SessionFlag::at(path),
            None => SessionFlag::default_location(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("invalid client configuration")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("invalid JSON in {}", path.display())),
            _ => Self::from_toml_str(&content)
                .with_context(|| format!("while loading {}", path.display())),
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            required_chain: self.chain.descriptor(),
            request_timeout: Duration::from_secs(self.timeouts.request_secs),
            flag: self.session.flag(),
        }
    }

    pub fn contract_settings(&self) -> ContractSettings {
        ContractSettings {
            address: self.contract.address.clone(),
            parties: self.contract.parties.iter().copied().map(PartyId).collect(),
            call_timeout: Duration::from_secs(self.timeouts.request_secs),
            confirmation_timeout: Duration::from_secs(self.timeouts.confirmation_secs),
        }
    }
}
