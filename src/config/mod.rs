//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the payment
//! watcher service. Configuration includes the per-chain watch table, API
//! server settings, and webhook dispatch settings.
//!
//! Configuration is loaded once at startup from a TOML file and is immutable
//! afterwards. The environment variables named below override the file so the
//! service can also be configured entirely from the environment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// NETWORK IDENTIFIERS
// ============================================================================

/// Identifier of a supported EVM-compatible network.
///
/// The string forms (`BEP20`, `BEP20_TESTNET`, `POLYGON`, `AMOY`) are used in
/// the config file, in environment variable prefixes, and on the API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    #[serde(rename = "BEP20")]
    Bep20,
    #[serde(rename = "BEP20_TESTNET")]
    Bep20Testnet,
    #[serde(rename = "POLYGON")]
    Polygon,
    #[serde(rename = "AMOY")]
    Amoy,
}

impl Network {
    /// All networks the service knows how to watch.
    pub const ALL: [Network; 4] = [
        Network::Bep20,
        Network::Bep20Testnet,
        Network::Polygon,
        Network::Amoy,
    ];

    /// Stable string tag, also used as the environment variable prefix
    /// (e.g. `BEP20_TESTNET_RPC_URL`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Bep20 => "BEP20",
            Network::Bep20Testnet => "BEP20_TESTNET",
            Network::Polygon => "POLYGON",
            Network::Amoy => "AMOY",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "BEP20" => Ok(Network::Bep20),
            "BEP20_TESTNET" => Ok(Network::Bep20Testnet),
            "POLYGON" => Ok(Network::Polygon),
            "AMOY" => Ok(Network::Amoy),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Per-chain watch configuration. Only chains listed here are watched.
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    /// API server configuration (host, port, auth).
    pub api: ApiConfig,
    /// Webhook dispatch configuration (optional).
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    /// Interval between expiry scans in seconds.
    #[serde(default = "default_expiry_scan_interval_secs")]
    pub expiry_scan_interval_secs: u64,
    /// Deadline for flushing event bus subscribers on shutdown, milliseconds.
    #[serde(default = "default_shutdown_flush_ms")]
    pub shutdown_flush_ms: u64,
}

/// Configuration for one watched chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Network identifier (BEP20, BEP20_TESTNET, POLYGON, AMOY).
    pub network: Network,
    /// JSON-RPC endpoint URL for the chain.
    #[serde(default)]
    pub rpc_url: String,
    /// USDT token contract address (20-byte hex).
    #[serde(default)]
    pub token_contract: String,
    /// Number of decimals of the token. Must be in [0, 30].
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u8,
    /// Confirmations required before a transfer completes a session. Must be >= 1.
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u64,
    /// Polling interval of the chain watcher in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum block range fetched in a single catch-up tick.
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    /// Recipient address the watcher filters transfer logs for (20-byte hex).
    #[serde(default)]
    pub recipient: String,
    /// Optional fixed target amount (decimal string). When set, it overrides
    /// the per-session amount in the completion match.
    #[serde(default)]
    pub target_amount: Option<String>,
    /// Optional sender allowlist. Empty means any sender is accepted.
    #[serde(default)]
    pub sender_allowlist: Vec<String>,
}

/// API server configuration for external communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host address to bind the API server to.
    pub host: String,
    /// Port number to bind the API server to.
    pub port: u16,
    /// Shared bearer token required on API requests.
    #[serde(default)]
    pub api_key: String,
    /// When true, GET endpoints are served without authentication.
    #[serde(default)]
    pub public_reads: bool,
}

/// Webhook dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Destination URLs that receive every domain event.
    pub urls: Vec<String>,
    /// Shared secret used for the HMAC-SHA256 payload signature.
    pub secret: String,
}

fn default_expiry_scan_interval_secs() -> u64 {
    30
}

fn default_shutdown_flush_ms() -> u64 {
    5_000
}

fn default_token_decimals() -> u8 {
    18
}

fn default_required_confirmations() -> u64 {
    1
}

fn default_poll_interval_ms() -> u64 {
    15_000
}

fn default_max_block_range() -> u64 {
    500
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Loads configuration from the TOML file and applies environment
    /// overrides.
    ///
    /// The config path defaults to `config/watcher.toml` and can be changed
    /// with the `WATCHER_CONFIG_PATH` environment variable. A missing file is
    /// not an error: the service can be configured from the environment alone.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded configuration
    /// * `Err(anyhow::Error)` - Malformed file or invalid override values
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("WATCHER_CONFIG_PATH")
            .unwrap_or_else(|_| "config/watcher.toml".to_string());

        let mut config = if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            Config::empty()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// A configuration with no chains and default API settings, used as the
    /// starting point for environment-only deployments.
    pub fn empty() -> Self {
        Self {
            chains: Vec::new(),
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                api_key: String::new(),
                public_reads: false,
            },
            webhook: None,
            expiry_scan_interval_secs: default_expiry_scan_interval_secs(),
            shutdown_flush_ms: default_shutdown_flush_ms(),
        }
    }

    /// Looks up the chain configuration for a network.
    pub fn chain(&self, network: Network) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.network == network)
    }

    /// Applies environment variable overrides on top of the file contents.
    ///
    /// `ACTIVE_NETWORKS` selects which chains are watched (comma-separated
    /// network tags; empty string keeps no chains). `<CHAIN>_RPC_URL`,
    /// `<CHAIN>_TOKEN_CONTRACT`, `<CHAIN>_TOKEN_DECIMALS`, `<CHAIN>_RECIPIENT`,
    /// `<CHAIN>_REQUIRED_CONFIRMATIONS`, `<CHAIN>_POLL_INTERVAL_MS` and
    /// `<CHAIN>_MAX_BLOCK_RANGE` override per-chain fields, creating the chain
    /// entry if it is absent. `TARGET_USDT_AMOUNT` and `SENDER_ADDRESS` apply
    /// to every configured chain. `API_KEY`, `HOST` and `PORT` override the
    /// API settings.
    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        for network in Network::ALL {
            self.apply_chain_env(network)?;
        }

        if let Ok(active) = std::env::var("ACTIVE_NETWORKS") {
            let selected: Vec<Network> = active
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| Network::from_str(s).map_err(|e| anyhow::anyhow!(e)))
                .collect::<anyhow::Result<_>>()?;
            self.chains.retain(|c| selected.contains(&c.network));
            for network in selected {
                if self.chain(network).is_none() {
                    self.chains.push(ChainConfig::unset(network));
                }
            }
        }

        if let Ok(target) = std::env::var("TARGET_USDT_AMOUNT") {
            for chain in &mut self.chains {
                chain.target_amount = Some(target.clone());
            }
        }
        if let Ok(sender) = std::env::var("SENDER_ADDRESS") {
            for chain in &mut self.chains {
                if !chain.sender_allowlist.contains(&sender) {
                    chain.sender_allowlist.push(sender.clone());
                }
            }
        }

        if let Ok(key) = std::env::var("API_KEY") {
            self.api.api_key = key;
        }
        if let Ok(host) = std::env::var("HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            self.api.port = port.parse()?;
        }

        Ok(())
    }

    /// Applies the `<CHAIN>_*` environment variables for one network.
    fn apply_chain_env(&mut self, network: Network) -> anyhow::Result<()> {
        let prefix = network.as_str();
        let vars = [
            "RPC_URL",
            "TOKEN_CONTRACT",
            "TOKEN_DECIMALS",
            "RECIPIENT",
            "REQUIRED_CONFIRMATIONS",
            "POLL_INTERVAL_MS",
            "MAX_BLOCK_RANGE",
        ];
        let any_set = vars
            .iter()
            .any(|v| std::env::var(format!("{}_{}", prefix, v)).is_ok());
        if !any_set {
            return Ok(());
        }

        if self.chain(network).is_none() {
            self.chains.push(ChainConfig::unset(network));
        }
        let chain = self
            .chains
            .iter_mut()
            .find(|c| c.network == network)
            .expect("chain entry inserted above");

        if let Ok(v) = std::env::var(format!("{}_RPC_URL", prefix)) {
            chain.rpc_url = v;
        }
        if let Ok(v) = std::env::var(format!("{}_TOKEN_CONTRACT", prefix)) {
            chain.token_contract = v;
        }
        if let Ok(v) = std::env::var(format!("{}_TOKEN_DECIMALS", prefix)) {
            chain.token_decimals = v.parse()?;
        }
        if let Ok(v) = std::env::var(format!("{}_RECIPIENT", prefix)) {
            chain.recipient = v;
        }
        if let Ok(v) = std::env::var(format!("{}_REQUIRED_CONFIRMATIONS", prefix)) {
            chain.required_confirmations = v.parse()?;
        }
        if let Ok(v) = std::env::var(format!("{}_POLL_INTERVAL_MS", prefix)) {
            chain.poll_interval_ms = v.parse()?;
        }
        if let Ok(v) = std::env::var(format!("{}_MAX_BLOCK_RANGE", prefix)) {
            chain.max_block_range = v.parse()?;
        }
        Ok(())
    }
}

impl ChainConfig {
    /// A chain entry with only the network set; endpoint fields are filled in
    /// by environment overrides and validated before the watcher starts.
    fn unset(network: Network) -> Self {
        Self {
            network,
            rpc_url: String::new(),
            token_contract: String::new(),
            token_decimals: default_token_decimals(),
            required_confirmations: default_required_confirmations(),
            poll_interval_ms: default_poll_interval_ms(),
            max_block_range: default_max_block_range(),
            recipient: String::new(),
            target_amount: None,
            sender_allowlist: Vec::new(),
        }
    }

    /// Validates the chain entry before a watcher is started for it.
    ///
    /// A failing validation is a fatal configuration error for this chain:
    /// the watcher refuses to start and the chain is reported as halted. The
    /// API keeps serving.
    pub fn validate(&self) -> Result<(), String> {
        if self.rpc_url.is_empty() {
            return Err(format!("{}: missing RPC URL", self.network));
        }
        if !is_hex_address(&self.token_contract) {
            return Err(format!(
                "{}: token contract is not a 20-byte hex address",
                self.network
            ));
        }
        if !is_hex_address(&self.recipient) {
            return Err(format!(
                "{}: recipient is not a 20-byte hex address",
                self.network
            ));
        }
        if self.token_decimals > 30 {
            return Err(format!(
                "{}: token decimals {} out of range [0, 30]",
                self.network, self.token_decimals
            ));
        }
        if self.required_confirmations == 0 {
            return Err(format!("{}: required confirmations must be >= 1", self.network));
        }
        if self.poll_interval_ms == 0 {
            return Err(format!("{}: poll interval must be positive", self.network));
        }
        if self.max_block_range == 0 {
            return Err(format!("{}: max block range must be positive", self.network));
        }
        for sender in &self.sender_allowlist {
            if !is_hex_address(sender) {
                return Err(format!(
                    "{}: allowlist entry {} is not a 20-byte hex address",
                    self.network, sender
                ));
            }
        }
        Ok(())
    }
}

/// Returns true when `s` is a `0x`-prefixed 20-byte hex address.
pub fn is_hex_address(s: &str) -> bool {
    let hex_part = match s.strip_prefix("0x") {
        Some(h) => h,
        None => return false,
    };
    hex_part.len() == 40 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_round_trips_through_str() {
        for network in Network::ALL {
            assert_eq!(Network::from_str(network.as_str()).unwrap(), network);
        }
        assert!(Network::from_str("SOLANA").is_err());
    }

    #[test]
    fn hex_address_validation() {
        assert!(is_hex_address("0x55d398326f99059fF775485246999027B3197955"));
        assert!(!is_hex_address("55d398326f99059fF775485246999027B3197955"));
        assert!(!is_hex_address("0x55d398"));
        assert!(!is_hex_address("0x55d398326f99059fF775485246999027B319795g"));
    }

    #[test]
    fn chain_validation_rejects_bad_entries() {
        let mut chain = ChainConfig::unset(Network::Bep20Testnet);
        assert!(chain.validate().is_err(), "missing RPC URL must fail");

        chain.rpc_url = "http://127.0.0.1:8545".to_string();
        chain.token_contract = "0x0000000000000000000000000000000000000001".to_string();
        chain.recipient = "0x0000000000000000000000000000000000000002".to_string();
        assert!(chain.validate().is_ok());

        chain.token_decimals = 31;
        assert!(chain.validate().is_err(), "decimals above 30 must fail");
        chain.token_decimals = 18;

        chain.required_confirmations = 0;
        assert!(chain.validate().is_err(), "zero confirmations must fail");
    }
}
