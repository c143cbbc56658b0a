//! # Price Oracle
//!
//! Maintains USD prices for the base-token set. The wrapped-native price is
//! read from the wrapper/stable concentrated-liquidity pool, the ecosystem
//! token from the ecosystem/wrapper pool; both refreshes go out in one batch
//! and are protected by sanity bands: an implausible value is discarded in
//! favor of the cached one. Unknown pool-token prices are derived from pool
//! ratios at valuation time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use ethers::types::{Address, U256};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::abi;
use crate::config::OracleSettings;
use crate::dex_math::{amount_to_float, sqrt_price_x96_to_price};
use crate::errors::PriceError;
use crate::multicall::{BatchCall, SubCall};
use crate::tokens::{
    KNOWN_BY_ADDRESS, KNOWN_TOKENS, ECOSYSTEM_TOKEN, ORACLE_ECOSYSTEM_NATIVE_POOL,
    ORACLE_NATIVE_STABLE_POOL, WRAPPED_NATIVE,
};

pub struct PriceOracle {
    batch: Arc<dyn BatchCall>,
    settings: OracleSettings,
    prices: DashMap<Address, f64>,
    last_update: std::sync::RwLock<Instant>,
    refresh_lock: Mutex<()>,
}

impl PriceOracle {
    pub fn new(batch: Arc<dyn BatchCall>, settings: OracleSettings) -> Self {
        let prices = DashMap::new();
        for token in KNOWN_TOKENS.iter() {
            let seed = if token.is_native_wrapper {
                settings.default_native_usd
            } else if token.is_stable {
                1.0
            } else if token.is_ecosystem {
                settings.default_ecosystem_usd
            } else {
                continue;
            };
            prices.insert(token.address_parsed(), seed);
        }
        Self {
            batch,
            settings,
            prices,
            last_update: std::sync::RwLock::new(Instant::now()),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn native_price_usd(&self) -> f64 {
        self.prices
            .get(&WRAPPED_NATIVE.address_parsed())
            .map(|p| *p)
            .unwrap_or(self.settings.default_native_usd)
    }

    pub fn price_usd(&self, token: Address) -> Option<f64> {
        self.prices.get(&token).map(|p| *p)
    }

    /// Runtime price overlay used by the administrative price endpoint.
    pub fn set_price(&self, token: Address, price_usd: f64) {
        self.prices.insert(token, price_usd);
    }

    pub fn all_prices(&self) -> HashMap<Address, f64> {
        self.prices.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    pub fn are_stale(&self) -> bool {
        self.last_update
            .read()
            .map(|t| t.elapsed() > self.settings.stale_after())
            .unwrap_or(true)
    }

    fn mark_updated(&self) {
        if let Ok(mut guard) = self.last_update.write() {
            *guard = Instant::now();
        }
    }

    /// Refresh the wrapped-native and ecosystem prices from their pools.
    ///
    /// Single-flight: a caller arriving while a refresh is in progress waits
    /// for it and returns the (freshly) cached native price instead of
    /// issuing a second batch.
    #[instrument(skip(self))]
    pub async fn refresh_from_chain(&self) -> Result<f64, PriceError> {
        let _guard = match self.refresh_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let _wait = self.refresh_lock.lock().await;
                return Ok(self.native_price_usd());
            }
        };

        let native_pool = *ORACLE_NATIVE_STABLE_POOL;
        let eco_pool = *ORACLE_ECOSYSTEM_NATIVE_POOL;
        let calls = vec![
            SubCall::new(native_pool, abi::slot0()),
            SubCall::new(native_pool, abi::token0()),
            SubCall::new(eco_pool, abi::slot0()),
            SubCall::new(eco_pool, abi::token0()),
        ];
        let results = self.batch.batch(calls).await?;

        let mut any_decoded = false;

        // Wrapper price from the wrapper/stable pool; invert when the stable
        // side is token0.
        let native_decoded = results[0]
            .ok_data()
            .and_then(abi::decode_slot0)
            .zip(results[1].ok_data().and_then(abi::decode_address));
        if let Some((slot0, token0)) = native_decoded {
            any_decoded = true;
            let wrapper = WRAPPED_NATIVE.address_parsed();
            let ratio = pool_ratio_for(slot0.sqrt_price_x96, token0);
            let candidate = if token0 == wrapper { ratio } else { invert(ratio) };
            let (lo, hi) = self.settings.native_band;
            if candidate > lo && candidate < hi {
                self.prices.insert(wrapper, candidate);
                debug!(price = candidate, "wrapped-native price refreshed");
            } else {
                warn!(
                    candidate,
                    "wrapped-native price outside sanity band, keeping cached value"
                );
            }
        }

        // Ecosystem price from the ecosystem/wrapper pool, priced through the
        // (possibly just refreshed) wrapper price.
        let eco_decoded = results[2]
            .ok_data()
            .and_then(abi::decode_slot0)
            .zip(results[3].ok_data().and_then(abi::decode_address));
        if let Some((slot0, token0)) = eco_decoded {
            any_decoded = true;
            let eco = ECOSYSTEM_TOKEN.address_parsed();
            let ratio = pool_ratio_for(slot0.sqrt_price_x96, token0);
            let in_native = if token0 == eco { ratio } else { invert(ratio) };
            let candidate = in_native * self.native_price_usd();
            let (lo, hi) = self.settings.ecosystem_band;
            if candidate > lo && candidate < hi {
                self.prices.insert(eco, candidate);
                debug!(price = candidate, "ecosystem price refreshed");
            } else {
                warn!(
                    candidate,
                    "ecosystem price outside sanity band, keeping cached value"
                );
            }
        }

        if !any_decoded {
            return Err(PriceError::Decode(
                "neither oracle pool returned decodable state".into(),
            ));
        }
        self.mark_updated();
        info!(
            native = self.native_price_usd(),
            "oracle prices refreshed from chain"
        );
        Ok(self.native_price_usd())
    }

    /// USD value of a pool's two sides.
    ///
    /// If both token prices are known the sides are summed directly.
    /// Otherwise the unknown side's price is derived from the known one via
    /// the pool ratio (price of token0 in token1), or via the reserve ratio
    /// when the pool ratio is unusable. With neither price known the value
    /// is 0.
    pub fn pool_value_usd(
        &self,
        token0: Address,
        token1: Address,
        amount0_raw: U256,
        amount1_raw: U256,
        dec0: u8,
        dec1: u8,
        pool_price_ratio: f64,
    ) -> f64 {
        let amount0 = amount_to_float(amount0_raw, dec0);
        let amount1 = amount_to_float(amount1_raw, dec1);
        let p0 = self.price_usd(token0);
        let p1 = self.price_usd(token1);

        match (p0, p1) {
            (Some(p0), Some(p1)) => amount0 * p0 + amount1 * p1,
            (Some(p0), None) => {
                let p1 = if pool_price_ratio > 0.0 {
                    p0 / pool_price_ratio
                } else if amount1 > 0.0 {
                    p0 * amount0 / amount1
                } else {
                    0.0
                };
                amount0 * p0 + amount1 * p1
            }
            (None, Some(p1)) => {
                let p0 = if pool_price_ratio > 0.0 {
                    p1 * pool_price_ratio
                } else if amount0 > 0.0 {
                    p1 * amount1 / amount0
                } else {
                    0.0
                };
                amount0 * p0 + amount1 * p1
            }
            (None, None) => 0.0,
        }
    }

    /// Price of token0 in token1 from a Q64.96 square-root price; exposed
    /// here so oracle consumers don't reach into the math module directly.
    pub fn sqrt_price_to_price(&self, sqrt_price_x96: U256, dec0: u8, dec1: u8) -> f64 {
        sqrt_price_x96_to_price(sqrt_price_x96, dec0, dec1)
    }

    /// Convert a USD amount to wrapped-native units.
    pub fn usd_to_native(&self, usd: f64) -> f64 {
        let native = self.native_price_usd();
        if native > 0.0 {
            usd / native
        } else {
            0.0
        }
    }
}

fn invert(ratio: f64) -> f64 {
    if ratio > 0.0 {
        1.0 / ratio
    } else {
        0.0
    }
}

/// Price of token0 in token1, decimal-adjusted via the known-token table
/// (both oracle pools pair 18-decimal tokens, but the table stays the source
/// of truth).
fn pool_ratio_for(sqrt_price_x96: U256, token0: Address) -> f64 {
    let dec0 = KNOWN_BY_ADDRESS.get(&token0).map(|t| t.decimals).unwrap_or(18);
    sqrt_price_x96_to_price(sqrt_price_x96, dec0, 18)
}

impl std::fmt::Debug for PriceOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceOracle")
            .field("tracked", &self.prices.len())
            .field("stale", &self.are_stale())
            .finish()
    }
}
