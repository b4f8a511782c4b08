//! Client session configuration

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Error;

/// Configuration for a grid client session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// JSON-RPC endpoint of the chain hosting the grid contract
    pub rpc_url: String,
    /// FHE co-processor relayer endpoint
    pub relayer_url: String,
    /// Grid contract address
    pub contract_address: Address,
    /// Chain ID (1=mainnet, 11155111=sepolia)
    pub chain_id: u64,
    /// Environment variable holding the signer private key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    /// Confirmations required before a transaction counts as final
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Max concurrent record fetches during refresh
    #[serde(default = "default_refresh_concurrency")]
    pub refresh_concurrency: usize,
    #[serde(default = "default_success_display_ms")]
    pub success_display_ms: u64,
    #[serde(default = "default_error_display_ms")]
    pub error_display_ms: u64,
    #[serde(default = "default_ticker_interval_ms")]
    pub ticker_interval_ms: u64,
    #[serde(default = "default_ticker_window")]
    pub ticker_window: usize,
}

fn default_private_key_env() -> String {
    "GRID_PRIVATE_KEY".to_string()
}

fn default_confirmations() -> u64 {
    1
}

fn default_refresh_concurrency() -> usize {
    8
}

fn default_success_display_ms() -> u64 {
    2_000
}

fn default_error_display_ms() -> u64 {
    3_000
}

fn default_ticker_interval_ms() -> u64 {
    2_000
}

fn default_ticker_window() -> usize {
    20
}

impl GridConfig {
    /// Create a configuration for the given endpoints and contract
    pub fn new(rpc_url: impl Into<String>, relayer_url: impl Into<String>, contract_address: Address) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            relayer_url: relayer_url.into(),
            contract_address,
            ..Self::default()
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.refresh_concurrency == 0 {
            return Err(Error::InvalidConfig {
                field: "refresh_concurrency".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.ticker_window == 0 {
            return Err(Error::InvalidConfig {
                field: "ticker_window".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn success_display(&self) -> Duration {
        Duration::from_millis(self.success_display_ms)
    }

    pub fn error_display(&self) -> Duration {
        Duration::from_millis(self.error_display_ms)
    }

    pub fn ticker_interval(&self) -> Duration {
        Duration::from_millis(self.ticker_interval_ms)
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".into(),
            relayer_url: "http://localhost:3000".into(),
            contract_address: Address::ZERO,
            chain_id: 11155111, // Sepolia
            private_key_env: default_private_key_env(),
            confirmations: default_confirmations(),
            refresh_concurrency: default_refresh_concurrency(),
            success_display_ms: default_success_display_ms(),
            error_display_ms: default_error_display_ms(),
            ticker_interval_ms: default_ticker_interval_ms(),
            ticker_window: default_ticker_window(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = GridConfig::default();
        assert_eq!(config.chain_id, 11155111);
        assert_eq!(config.success_display(), Duration::from_secs(2));
        assert_eq!(config.error_display(), Duration::from_secs(3));
        assert_eq!(config.ticker_window, 20);
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.json");

        let config = GridConfig::new(
            "http://node:8545",
            "http://relayer:3000",
            Address::repeat_byte(0x11),
        )
        .with_chain_id(1)
        .with_confirmations(3);
        config.save(&path).unwrap();

        let loaded = GridConfig::load(&path).unwrap();
        assert_eq!(loaded.rpc_url, "http://node:8545");
        assert_eq!(loaded.contract_address, Address::repeat_byte(0x11));
        assert_eq!(loaded.chain_id, 1);
        assert_eq!(loaded.confirmations, 3);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minimal.json");
        std::fs::write(
            &path,
            r#"{
                "rpc_url": "http://a",
                "relayer_url": "http://b",
                "contract_address": "0x1111111111111111111111111111111111111111",
                "chain_id": 5
            }"#,
        )
        .unwrap();

        let loaded = GridConfig::load(&path).unwrap();
        assert_eq!(loaded.private_key_env, "GRID_PRIVATE_KEY");
        assert_eq!(loaded.refresh_concurrency, 8);
        assert_eq!(loaded.error_display_ms, 3_000);
    }

    #[test]
    fn test_config_rejects_zero_concurrency() {
        let mut config = GridConfig::default();
        config.refresh_concurrency = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }
}
