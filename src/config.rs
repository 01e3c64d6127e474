use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::gateway::Operation;

/// Explorer networks with a known Etherscan-family API host; `mainnet` is an
/// alias of `ethereum`.
pub const EXPLORER_NETWORKS: [&str; 6] = [
    "ethereum",
    "mainnet",
    "sepolia",
    "polygon",
    "arbitrum",
    "optimism",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub graph_db: GraphDbConfig,
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDbConfig {
    pub enabled: bool,
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    /// Upper bound on concurrent sessions
    pub pool_size: usize,
    pub connection_timeout_ms: u64,
    /// The pool is reopened once it is older than this
    pub max_connection_lifetime_secs: u64,
    pub fetch_size: usize,
    pub row_limit: i64,
}

impl GraphDbConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn max_connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_connection_lifetime_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    pub network: String,
    /// Overrides the host derived from `network`
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub max_transactions: usize,
}

impl ExplorerConfig {
    pub fn api_base_url(&self) -> Result<String> {
        if let Some(base_url) = &self.base_url {
            return Ok(base_url.trim_end_matches('/').to_string());
        }

        let base_url = match self.network.as_str() {
            "mainnet" | "ethereum" => "https://api.etherscan.io",
            "sepolia" => "https://api-sepolia.etherscan.io",
            "polygon" => "https://api.polygonscan.com",
            "arbitrum" => "https://api.arbiscan.io",
            "optimism" => "https://api-optimistic.etherscan.io",
            other => return Err(anyhow!("Unsupported network for Etherscan: {}", other)),
        };
        Ok(base_url.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Skip the graph database entirely
    pub use_secondary_only: bool,
    /// Also merge the explorer's neighborhood into a non-empty primary one
    pub supplement_graph: bool,
    pub empty_triggers_fallback: FallbackTriggers,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            use_secondary_only: false,
            supplement_graph: false,
            empty_triggers_fallback: FallbackTriggers::default(),
        }
    }
}

impl GatewayConfig {
    /// Whether an empty primary answer for `operation` means "not found"
    /// rather than "legitimately nothing".
    pub fn empty_is_miss(&self, operation: Operation) -> bool {
        let triggers = &self.empty_triggers_fallback;
        match operation {
            Operation::AddressInfo => triggers.address_info,
            Operation::Transactions => triggers.transactions,
            Operation::Neighborhood => triggers.neighborhood,
            Operation::BalanceHistory => triggers.balance_history,
            Operation::GasHistory => triggers.gas_history,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackTriggers {
    pub address_info: bool,
    pub transactions: bool,
    pub neighborhood: bool,
    pub balance_history: bool,
    pub gas_history: bool,
}

impl Default for FallbackTriggers {
    fn default() -> Self {
        Self {
            address_info: true,
            transactions: true,
            neighborhood: true,
            balance_history: false,
            gas_history: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub transport: String,
    pub stdio: StdioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdioConfig {
    pub buffer_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graph_db: GraphDbConfig {
                enabled: true,
                uri: "neo4j://localhost:7687".to_string(),
                user: "neo4j".to_string(),
                password: String::new(),
                database: None,
                pool_size: 16,
                connection_timeout_ms: 5_000,
                max_connection_lifetime_secs: 3_600,
                fetch_size: 500,
                row_limit: 1_000,
            },
            explorer: ExplorerConfig {
                network: "ethereum".to_string(),
                base_url: None,
                api_key: None,
                request_timeout_ms: 10_000,
                max_transactions: 1_000,
            },
            gateway: GatewayConfig::default(),
            server: ServerConfig {
                transport: "stdio".to_string(),
                stdio: StdioConfig {
                    buffer_size: Some(1024 * 1024), // 1MB buffer
                },
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path, e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow!("Failed to create config directory {:?}: {}", parent, e)
                })?;
            }
        }

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {:?}: {}", path, e))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub async fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Self {
        let mut config = match path {
            Some(path) => match Self::load_from_file(path).await {
                Ok(config) => {
                    tracing::info!("Loaded configuration from file");
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config file, using defaults: {}", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_vars();
        config
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_vars(&mut self) {
        if let Ok(uri) = std::env::var("NEO4J_URI") {
            tracing::debug!("Using NEO4J_URI environment variable");
            self.graph_db.uri = uri;
        }
        if let Ok(user) = std::env::var("NEO4J_USER") {
            self.graph_db.user = user;
        }
        if let Ok(password) = std::env::var("NEO4J_PASSWORD") {
            self.graph_db.password = password;
        }

        if let Ok(api_key) = std::env::var("ETHERSCAN_API_KEY") {
            tracing::debug!("Using ETHERSCAN_API_KEY environment variable");
            self.explorer.api_key = Some(api_key);
        } else if self.explorer.api_key.is_none() {
            tracing::warn!(
                "No explorer API key configured, set ETHERSCAN_API_KEY for higher rate limits"
            );
        }

        if let Ok(flag) = std::env::var("STUDIO_SECONDARY_ONLY") {
            self.gateway.use_secondary_only = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        if self.graph_db.enabled && self.graph_db.password.is_empty() {
            tracing::warn!("Graph database password is empty, set NEO4J_PASSWORD");
        }
    }

    /// Get default config file path
    pub fn default_config_path() -> Result<std::path::PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("studio-explorer").join("config.toml"))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# Studio Explorer Configuration File
# Configures the graph database, the block explorer fallback and the gateway policy

# Primary source: Cypher-queried graph database
[graph_db]
enabled = true
uri = "neo4j://localhost:7687"
user = "neo4j"
password = ""                        # or set NEO4J_PASSWORD
# database = "neo4j"
pool_size = 16                       # max concurrent sessions
connection_timeout_ms = 5000         # max wait for a session
max_connection_lifetime_secs = 3600  # pool is reopened after this
fetch_size = 500
row_limit = 1000

# Secondary source: Etherscan-family block explorer
[explorer]
network = "ethereum"                 # ethereum, sepolia, polygon, arbitrum, optimism
# base_url = "https://api.etherscan.io"
# api_key = "YOUR_API_KEY_HERE"      # or set ETHERSCAN_API_KEY
request_timeout_ms = 10000
max_transactions = 1000

[gateway]
use_secondary_only = false
supplement_graph = false

# Operations where an empty primary answer means "not found"
[gateway.empty_triggers_fallback]
address_info = true
transactions = true
neighborhood = true
balance_history = false
gas_history = false

# Server configuration
[server]
transport = "stdio"

[server.stdio]
buffer_size = 1048576  # 1MB

# Environment variables that can be used:
# NEO4J_URI, NEO4J_USER, NEO4J_PASSWORD - graph database connection
# ETHERSCAN_API_KEY - Your Etherscan API key
# STUDIO_SECONDARY_ONLY - set to 1 to skip the graph database
"#;
        sample_config.to_string()
    }
}
