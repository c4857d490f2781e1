// =============================================================================
// Configuration — engine settings loaded from the environment
// =============================================================================
//
// Every field carries a default so a partial environment still produces a
// usable `Config`, matching `runtime_config.rs`'s `#[serde(default = "...")]`
// convention. Unlike `RuntimeConfig`, this crate has no Non-goal exemption
// for *reading* configuration (only for persisting application state), so
// there is a `load` but no `save`.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

fn default_api_base() -> String {
    "https://api.ledgerx.com".to_string()
}

fn default_websocket_base() -> String {
    "wss://api.ledgerx.com/ws".to_string()
}

fn default_legacy_api_base() -> String {
    "https://trade.ledgerx.com/api".to_string()
}

fn default_verify_ssl() -> bool {
    true
}

fn default_limit() -> u32 {
    200
}

fn default_delay_seconds() -> f64 {
    0.2
}

/// Engine configuration (spec §6). `api_key` is never serialized — it must
/// not end up in logs or a persisted snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_websocket_base")]
    pub websocket_base: String,

    #[serde(default = "default_legacy_api_base")]
    pub legacy_api_base: String,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    #[serde(default = "default_limit")]
    pub default_limit: u32,

    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            websocket_base: default_websocket_base(),
            legacy_api_base: default_legacy_api_base(),
            api_key: None,
            verify_ssl: default_verify_ssl(),
            default_limit: default_limit(),
            delay_seconds: default_delay_seconds(),
        }
    }
}

impl Config {
    /// Load from `dotenv`-sourced process environment, falling back to
    /// defaults for anything unset. Never fails: a missing `API_KEY` is
    /// logged at `warn` (the engine can still run unauthenticated against a
    /// public feed) rather than treated as fatal.
    pub fn load() -> Self {
        dotenv::dotenv().ok();

        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("LEDGERX_API_BASE") {
            cfg.api_base = v;
        }
        if let Ok(v) = std::env::var("LEDGERX_WEBSOCKET_BASE") {
            cfg.websocket_base = v;
        }
        if let Ok(v) = std::env::var("LEDGERX_LEGACY_API_BASE") {
            cfg.legacy_api_base = v;
        }
        match std::env::var("LEDGERX_API_KEY") {
            Ok(v) if !v.is_empty() => cfg.api_key = Some(v),
            _ => warn!("LEDGERX_API_KEY not set, running unauthenticated"),
        }
        if let Ok(v) = std::env::var("LEDGERX_VERIFY_SSL") {
            cfg.verify_ssl = v.parse().unwrap_or(cfg.verify_ssl);
        }
        if let Ok(v) = std::env::var("LEDGERX_DEFAULT_LIMIT") {
            cfg.default_limit = v.parse().unwrap_or(cfg.default_limit);
        }
        if let Ok(v) = std::env::var("LEDGERX_DELAY_SECONDS") {
            cfg.delay_seconds = v.parse().unwrap_or(cfg.delay_seconds);
        }

        info!(
            api_base = %cfg.api_base,
            websocket_base = %cfg.websocket_base,
            authenticated = cfg.api_key.is_some(),
            "configuration loaded"
        );

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.default_limit, 200);
        assert!(cfg.verify_ssl);
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn api_key_never_serialized() {
        let mut cfg = Config::default();
        cfg.api_key = Some("secret-token".to_string());
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("secret-token"));
    }
}
