//! # Configuration
//!
//! Environment-driven settings, grouped per subsystem. Every knob has a
//! working default so the engine can be constructed with `Config::default()`
//! in tests; `Config::from_env` applies the deployment environment on top.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::AnalyticsError;

const ENV_PREFIX: &str = "POOLSCOPE_";

//================================================================================================//
//                                       Top-Level Config                                         //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub rpc: RpcSettings,
    pub cache: CacheSettings,
    pub oracle: OracleSettings,
    pub router: RouterSettings,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, AnalyticsError> {
        let cfg = Self {
            rpc: RpcSettings::from_env(),
            cache: CacheSettings::from_env(),
            oracle: OracleSettings::from_env(),
            router: RouterSettings::from_env(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), AnalyticsError> {
        if self.rpc.urls.is_empty() {
            return Err(AnalyticsError::Config(format!(
                "at least one RPC endpoint is required ({}RPC_URLS)",
                ENV_PREFIX
            )));
        }
        if self.rpc.timeout_ms == 0 {
            return Err(AnalyticsError::Config("rpc timeout must be non-zero".into()));
        }
        if self.rpc.max_retries == 0 {
            return Err(AnalyticsError::Config("rpc max_retries must be non-zero".into()));
        }
        for (name, ttl) in [
            ("pool", self.cache.pool_ttl_secs),
            ("price", self.cache.price_ttl_secs),
            ("token", self.cache.token_ttl_secs),
        ] {
            if ttl == 0 {
                return Err(AnalyticsError::Config(format!(
                    "{} cache TTL must be non-zero",
                    name
                )));
            }
        }
        if self.oracle.native_band.0 >= self.oracle.native_band.1
            || self.oracle.ecosystem_band.0 >= self.oracle.ecosystem_band.1
        {
            return Err(AnalyticsError::Config(
                "oracle sanity bands must be non-empty intervals".into(),
            ));
        }
        Ok(())
    }
}

fn env_var(suffix: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, suffix))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(suffix: &str, default: T) -> T {
    env_var(suffix)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

//================================================================================================//
//                                        RPC SETTINGS                                            //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Ordered endpoint list; earlier entries are preferred.
    pub urls: Vec<String>,
    /// Per-call timeout.
    pub timeout_ms: u64,
    /// Total failover passes over the endpoint list before giving up.
    pub max_retries: u32,
    /// Base of the linear inter-pass backoff (`base × attempt`).
    pub backoff_base_ms: u64,
    /// Failures beyond this count mark an endpoint unhealthy.
    pub failure_threshold: u32,
    /// How long an unhealthy endpoint is skipped.
    pub skip_window_secs: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            urls: vec!["https://bsc-dataseed.bnbchain.org".to_string()],
            timeout_ms: 10_000,
            max_retries: 3,
            backoff_base_ms: 500,
            failure_threshold: 2,
            skip_window_secs: 60,
        }
    }
}

impl RpcSettings {
    fn from_env() -> Self {
        let defaults = Self::default();
        let urls = env_var("RPC_URLS")
            .map(|raw| {
                raw.split(',')
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|urls| !urls.is_empty())
            .unwrap_or(defaults.urls);
        Self {
            urls,
            timeout_ms: env_parse("RPC_TIMEOUT_MS", defaults.timeout_ms),
            max_retries: env_parse("RPC_MAX_RETRIES", defaults.max_retries),
            backoff_base_ms: env_parse("RPC_BACKOFF_MS", defaults.backoff_base_ms),
            failure_threshold: env_parse("RPC_FAILURE_THRESHOLD", defaults.failure_threshold),
            skip_window_secs: env_parse("RPC_SKIP_WINDOW_SECS", defaults.skip_window_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn skip_window(&self) -> Duration {
        Duration::from_secs(self.skip_window_secs)
    }
}

//================================================================================================//
//                                       CACHE SETTINGS                                           //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// TTL for pool and full-analysis entries.
    pub pool_ttl_secs: u64,
    pub price_ttl_secs: u64,
    pub token_ttl_secs: u64,
    /// Single-flight lock wait before a waiter force-removes the lock.
    pub lock_timeout_ms: u64,
    /// Pre-run a full analysis for the base set at startup.
    pub warm_analyze_bases: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            pool_ttl_secs: 300,
            price_ttl_secs: 30,
            token_ttl_secs: 3600,
            lock_timeout_ms: 5000,
            warm_analyze_bases: false,
        }
    }
}

impl CacheSettings {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pool_ttl_secs: env_parse("POOL_TTL_SECS", defaults.pool_ttl_secs),
            price_ttl_secs: env_parse("PRICE_TTL_SECS", defaults.price_ttl_secs),
            token_ttl_secs: env_parse("TOKEN_TTL_SECS", defaults.token_ttl_secs),
            lock_timeout_ms: env_parse("CACHE_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
            warm_analyze_bases: env_parse("WARM_ANALYZE_BASES", defaults.warm_analyze_bases),
        }
    }

    pub fn pool_ttl(&self) -> Duration {
        Duration::from_secs(self.pool_ttl_secs)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

//================================================================================================//
//                                       ORACLE SETTINGS                                          //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSettings {
    /// Prices older than this are refreshed on demand.
    pub stale_after_secs: u64,
    /// Accepted band for the wrapped-native USD price; values outside are
    /// discarded in favor of the cached value.
    pub native_band: (f64, f64),
    /// Accepted band for the ecosystem-token USD price.
    pub ecosystem_band: (f64, f64),
    /// Seed price for the wrapped native token before the first refresh.
    pub default_native_usd: f64,
    /// Seed price for the ecosystem token before the first refresh.
    pub default_ecosystem_usd: f64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            stale_after_secs: 30,
            native_band: (100.0, 2000.0),
            ecosystem_band: (0.1, 100.0),
            default_native_usd: 300.0,
            default_ecosystem_usd: 2.5,
        }
    }
}

impl OracleSettings {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stale_after_secs: env_parse("ORACLE_STALE_SECS", defaults.stale_after_secs),
            native_band: (
                env_parse("ORACLE_NATIVE_MIN_USD", defaults.native_band.0),
                env_parse("ORACLE_NATIVE_MAX_USD", defaults.native_band.1),
            ),
            ecosystem_band: (
                env_parse("ORACLE_ECOSYSTEM_MIN_USD", defaults.ecosystem_band.0),
                env_parse("ORACLE_ECOSYSTEM_MAX_USD", defaults.ecosystem_band.1),
            ),
            default_native_usd: env_parse("ORACLE_DEFAULT_NATIVE_USD", defaults.default_native_usd),
            default_ecosystem_usd: env_parse(
                "ORACLE_DEFAULT_ECOSYSTEM_USD",
                defaults.default_ecosystem_usd,
            ),
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

//================================================================================================//
//                                       ROUTER SETTINGS                                          //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Interval of the background route pre-warm cycle.
    pub refresh_interval_secs: u64,
    /// TTL of pre-warmed route entries.
    pub route_ttl_secs: u64,
    /// Default trade size assumed when the caller does not supply one.
    pub default_trade_usd: f64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 600,
            route_ttl_secs: 600,
            default_trade_usd: 1000.0,
        }
    }
}

impl RouterSettings {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            refresh_interval_secs: env_parse(
                "ROUTE_REFRESH_SECS",
                defaults.refresh_interval_secs,
            ),
            route_ttl_secs: env_parse("ROUTE_TTL_SECS", defaults.route_ttl_secs),
            default_trade_usd: env_parse("DEFAULT_TRADE_USD", defaults.default_trade_usd),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn route_ttl(&self) -> Duration {
        Duration::from_secs(self.route_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn empty_endpoints_rejected() {
        let mut cfg = Config::default();
        cfg.rpc.urls.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_band_rejected() {
        let mut cfg = Config::default();
        cfg.oracle.native_band = (2000.0, 100.0);
        assert!(cfg.validate().is_err());
    }
}
