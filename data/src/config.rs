use feed::Market;
use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::InternalError;

/// Smallest lookback the SMA accepts; anything lower would average an
/// empty window.
pub const MIN_SMA_LOOKBACK: usize = 2;

/// Runtime settings, read from an optional JSON file. Every field has a
/// default so a partial file works.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL for REST fetches.
    pub http_base: String,
    /// Base URL the stream socket path is appended to.
    pub ws_base: String,
    /// Symbol whose series the session renders.
    pub market: Market,
    pub sma_lookback: usize,
    /// Bars-left-of-viewport count below which a backward extension is
    /// requested.
    pub prefetch_threshold: f64,
    pub debounce_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            http_base: "http://127.0.0.1:8000".to_string(),
            ws_base: "ws://127.0.0.1:8000".to_string(),
            market: Market::new("bitfinex", "btc", "usd"),
            sma_lookback: 20,
            prefetch_threshold: 200.0,
            debounce_ms: 50,
            reconnect_delay_ms: 1_000,
        }
    }
}

impl SyncConfig {
    /// Loads settings from `path`, falling back to defaults when the file
    /// is absent or unreadable. The SMA lookback is clamped up to its
    /// minimum.
    pub fn load(path: Option<String>) -> Self {
        let mut config = match path {
            Some(path) => match read_config(Path::new(&path)) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Failed to load config from {path}: {e}; using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        };

        if config.sma_lookback < MIN_SMA_LOOKBACK {
            log::warn!(
                "sma_lookback {} is below the minimum, using {MIN_SMA_LOOKBACK}",
                config.sma_lookback
            );
            config.sma_lookback = MIN_SMA_LOOKBACK;
        }

        config
    }
}

fn read_config(path: &Path) -> Result<SyncConfig, InternalError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| InternalError::Config(e.to_string()))?;

    serde_json::from_str(&contents).map_err(|e| InternalError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_path_given() {
        let config = SyncConfig::load(None);

        assert_eq!(config.sma_lookback, 20);
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.reconnect_delay_ms, 1_000);
        assert_eq!(config.market, Market::new("bitfinex", "btc", "usd"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let json = r#"{
            "sma_lookback": 9,
            "market": {"exchange": "bitfinex", "base_id": "eth", "quote_id": "usd"}
        }"#;

        let config: SyncConfig = serde_json::from_str(json).expect("partial config");

        assert_eq!(config.sma_lookback, 9);
        assert_eq!(config.market.base_id, "eth");
        assert_eq!(config.prefetch_threshold, 200.0);
        assert_eq!(config.http_base, "http://127.0.0.1:8000");
    }

    #[test]
    fn lookback_clamped_to_minimum() {
        let path = std::env::temp_dir().join("candlesync-config-test.json");
        std::fs::write(&path, r#"{"sma_lookback": 1}"#).expect("write config");

        let config = SyncConfig::load(Some(path.to_string_lossy().into_owned()));
        assert_eq!(config.sma_lookback, MIN_SMA_LOOKBACK);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let config = SyncConfig::load(Some("/nonexistent/candlesync.json".to_string()));

        assert_eq!(config.sma_lookback, 20);
        assert_eq!(config.ws_base, "ws://127.0.0.1:8000");
    }
}
