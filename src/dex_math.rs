//! # Pool Pricing Mathematics
//!
//! Pure functions converting protocol state into price ratios, plus the
//! outlier-filtered liquidity-weighted aggregation over a pool set.
//!
//! All multiply-before-divide paths run in 512-bit integers so that V2
//! reserve products and the V3 `sqrtPriceX96²` term cannot overflow; the
//! conversion to floating point happens exactly once, on the final
//! 1e18-scaled ratio.

use ethers::types::{Address, U256, U512};
use tracing::warn;

use crate::types::{AggregatePricing, PairPrice};

//================================================================================================//
//                                         CONSTANTS                                              //
//================================================================================================//

/// 2^96, the Q64.96 scaling factor of V3 sqrt prices.
pub fn q96() -> U256 {
    U256::one() << 96
}

/// 2^192 = Q96².
pub fn q192() -> U512 {
    U512::one() << 192
}

fn one_e18() -> U512 {
    U512::from(10u128.pow(18))
}

fn pow10(exp: u32) -> U512 {
    U512::from(10u8).pow(U512::from(exp))
}

/// Accepted band around the median for aggregation, as (lower, upper)
/// multipliers.
pub const OUTLIER_BAND: (f64, f64) = (0.1, 10.0);

//================================================================================================//
//                                    FLOAT CONVERSIONS                                           //
//================================================================================================//

pub fn u256_to_f64(value: U256) -> f64 {
    let mut out = 0.0_f64;
    for limb in value.0.iter().rev() {
        out = out * 18_446_744_073_709_551_616.0 + *limb as f64;
    }
    out
}

pub fn u512_to_f64(value: U512) -> f64 {
    let mut out = 0.0_f64;
    for limb in value.0.iter().rev() {
        out = out * 18_446_744_073_709_551_616.0 + *limb as f64;
    }
    out
}

/// Raw token units → decimal-adjusted amount.
pub fn amount_to_float(raw: U256, decimals: u8) -> f64 {
    if raw.is_zero() {
        return 0.0;
    }
    u256_to_f64(raw) / 10f64.powi(decimals as i32)
}

//================================================================================================//
//                                        V2 PRICING                                              //
//================================================================================================//

/// Price of token0 in token1 and its inverse, from constant-product reserves.
///
/// The ratio is computed 1e18-scaled in integers first:
/// `reserve1 × 1e18 × 10^(dec0−dec1) / reserve0` (the decimal shift moves to
/// the denominator when negative), then divided down in floating point.
/// Zero reserves on either side yield zeros.
pub fn v2_prices(reserve0: U256, reserve1: U256, dec0: u8, dec1: u8) -> (f64, f64) {
    if reserve0.is_zero() || reserve1.is_zero() {
        return (0.0, 0.0);
    }
    let diff = dec0 as i32 - dec1 as i32;
    let r0 = U512::from(reserve0);
    let r1 = U512::from(reserve1);

    let scaled = if diff >= 0 {
        r1.checked_mul(one_e18())
            .and_then(|v| v.checked_mul(pow10(diff as u32)))
            .and_then(|v| v.checked_div(r0))
    } else {
        r0.checked_mul(pow10((-diff) as u32))
            .and_then(|denom| r1.checked_mul(one_e18()).and_then(|num| num.checked_div(denom)))
    };

    let Some(scaled) = scaled else {
        warn!("v2 price computation overflowed, reporting zero");
        return (0.0, 0.0);
    };

    let token0_price = u512_to_f64(scaled) / 1e18;
    let token1_price = if token0_price > 0.0 {
        1.0 / token0_price
    } else {
        0.0
    };
    (token0_price, token1_price)
}

//================================================================================================//
//                                        V3 PRICING                                              //
//================================================================================================//

/// Price of token0 in token1 from a Q64.96 square-root price:
/// `(sqrtPriceX96² × 1e18 × 10^max(0, dec0−dec1)) / (Q96² × 10^max(0, dec1−dec0))`
/// evaluated in 512-bit integers, then divided by 1e18 in floating point.
/// Returns 0 for zero input.
pub fn sqrt_price_x96_to_price(sqrt_price_x96: U256, dec0: u8, dec1: u8) -> f64 {
    if sqrt_price_x96.is_zero() {
        return 0.0;
    }
    let sp = U512::from(sqrt_price_x96);
    let up_shift = dec0.saturating_sub(dec1) as u32;
    let down_shift = dec1.saturating_sub(dec0) as u32;

    let numerator = sp
        .checked_mul(sp)
        .and_then(|sq| sq.checked_mul(one_e18()))
        .and_then(|v| v.checked_mul(pow10(up_shift)));
    let denominator = q192().checked_mul(pow10(down_shift));

    let scaled = match (numerator, denominator) {
        (Some(num), Some(den)) if !den.is_zero() => num / den,
        _ => {
            warn!("sqrt price computation overflowed, reporting zero");
            return 0.0;
        }
    };
    u512_to_f64(scaled) / 1e18
}

//================================================================================================//
//                                        AGGREGATION                                             //
//================================================================================================//

/// One pool's contribution to the aggregate.
#[derive(Debug, Clone)]
pub struct PriceSample {
    pub pool: Address,
    pub pair_token_symbol: String,
    pub price_usd: f64,
    pub price_native: f64,
    pub liquidity_usd: f64,
    pub liquidity_native: f64,
}

fn median(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2],
        n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

fn weighted_mean(values: &[(f64, f64)]) -> f64 {
    let weight: f64 = values.iter().map(|(_, w)| w).sum();
    if weight > 0.0 {
        values.iter().map(|(p, w)| p * w).sum::<f64>() / weight
    } else if !values.is_empty() {
        values.iter().map(|(p, _)| p).sum::<f64>() / values.len() as f64
    } else {
        0.0
    }
}

/// Two-pass aggregation: collect per-pool prices, then accumulate the
/// liquidity-weighted mean over pools whose price lies within
/// `[median × 0.1, median × 10]`. Min/max are left as observed; the per-pair
/// breakdown is preserved.
pub fn aggregate_prices(samples: &[PriceSample]) -> AggregatePricing {
    // Pass 1: collect valid observations.
    let usd: Vec<&PriceSample> = samples
        .iter()
        .filter(|s| s.price_usd > 0.0 && s.price_usd.is_finite())
        .collect();
    let native: Vec<&PriceSample> = samples
        .iter()
        .filter(|s| s.price_native > 0.0 && s.price_native.is_finite())
        .collect();

    if usd.is_empty() && native.is_empty() {
        return AggregatePricing::empty();
    }

    let by_pair = usd
        .iter()
        .map(|s| PairPrice {
            pair_token_symbol: s.pair_token_symbol.clone(),
            price_usd: s.price_usd,
            liquidity_usd: s.liquidity_usd,
            pool: s.pool,
        })
        .collect();

    let mut usd_sorted: Vec<f64> = usd.iter().map(|s| s.price_usd).collect();
    usd_sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut native_sorted: Vec<f64> = native.iter().map(|s| s.price_native).collect();
    native_sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    // Pass 2: medians, band filter, weighted accumulation.
    let median_usd = median(&usd_sorted);
    let median_native = median(&native_sorted);
    let usd_band = (median_usd * OUTLIER_BAND.0, median_usd * OUTLIER_BAND.1);
    let native_band = (median_native * OUTLIER_BAND.0, median_native * OUTLIER_BAND.1);

    let usd_in_band: Vec<(f64, f64)> = usd
        .iter()
        .filter(|s| s.price_usd >= usd_band.0 && s.price_usd <= usd_band.1)
        .map(|s| (s.price_usd, s.liquidity_usd.max(0.0)))
        .collect();
    let native_in_band: Vec<(f64, f64)> = native
        .iter()
        .filter(|s| s.price_native >= native_band.0 && s.price_native <= native_band.1)
        .map(|s| (s.price_native, s.liquidity_native.max(0.0)))
        .collect();

    AggregatePricing {
        avg_price_usd: weighted_mean(&usd_in_band),
        avg_price_native: weighted_mean(&native_in_band),
        median_price_usd: median_usd,
        median_price_native: median_native,
        min_price_usd: usd_sorted.first().copied().unwrap_or(0.0),
        max_price_usd: usd_sorted.last().copied().unwrap_or(0.0),
        min_price_native: native_sorted.first().copied().unwrap_or(0.0),
        max_price_native: native_sorted.last().copied().unwrap_or(0.0),
        by_pair,
        priced_pools: usd.len(),
        outliers_filtered: usd.len() - usd_in_band.len(),
    }
}
