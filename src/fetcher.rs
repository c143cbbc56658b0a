//! # Pool Fetcher
//!
//! Reconstructs the on-chain state of discovered candidate pools. The two
//! protocol families are fetched in parallel batches (V2: token0/token1/
//! reserves; V3: token0/token1/fee/liquidity/slot0 plus a second balance
//! batch), token metadata is filled through the registry, and each pool is
//! enriched with derived liquidity and price records.
//!
//! Partial-failure model: one protocol failing marks its status `failed` and
//! sets `partial_results`; the other protocol's pools are still returned.
//! Only when every batch fails does the fetcher fall back to sequential
//! per-pool fetches in chunks of 8, and only if that also produces nothing
//! does it error.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::types::{Address, U256};
use tracing::{debug, instrument, warn};

use crate::abi;
use crate::discovery::PoolCandidate;
use crate::dex_math::{amount_to_float, sqrt_price_x96_to_price, v2_prices};
use crate::errors::{BatchError, FetchError};
use crate::multicall::{BatchCall, SubCall, SubResult};
use crate::price_oracle::PriceOracle;
use crate::token_registry::TokenRegistry;
use crate::tokens::{is_wrapped_native, V2_DEFAULT_FEE_BPS};
use crate::types::{
    unix_now, FetchStatus, LiquidityInfo, LiquidityStatus, Pool, PoolState, PriceInfo,
    PriceSource, ProtocolKind, ProtocolStatus, TokenInfo,
};

//================================================================================================//
//                                         CONSTANTS                                              //
//================================================================================================//

/// Chunk size of the sequential fallback path.
const SEQUENTIAL_CHUNK: usize = 8;

/// Tick distance from the extremes treated as an abandoned pool.
const RUG_TICK_MARGIN: i32 = 100;
pub const MAX_TICK: i32 = 887_272;

/// USD thresholds for the liquidity status ladder.
const ACTIVE_MIN_USD: f64 = 1000.0;
const WARNING_MIN_USD: f64 = 100.0;

//================================================================================================//
//                                        RAW STATE                                               //
//================================================================================================//

#[derive(Debug, Clone)]
struct RawV2 {
    address: Address,
    token0: Address,
    token1: Address,
    reserve0: U256,
    reserve1: U256,
    block_timestamp_last: u32,
}

#[derive(Debug, Clone)]
struct RawV3 {
    address: Address,
    token0: Address,
    token1: Address,
    fee: u32,
    liquidity: u128,
    sqrt_price_x96: U256,
    tick: i32,
    actual_balance0: U256,
    actual_balance1: U256,
}

/// Result of a full fetch pass.
#[derive(Debug)]
pub struct FetchOutcome {
    pub pools: Vec<Pool>,
    pub protocol_status: HashMap<String, ProtocolStatus>,
    pub partial_results: bool,
}

//================================================================================================//
//                                          FETCHER                                               //
//================================================================================================//

pub struct PoolFetcher {
    batch: Arc<dyn BatchCall>,
    registry: Arc<TokenRegistry>,
    oracle: Arc<PriceOracle>,
}

impl PoolFetcher {
    pub fn new(
        batch: Arc<dyn BatchCall>,
        registry: Arc<TokenRegistry>,
        oracle: Arc<PriceOracle>,
    ) -> Self {
        Self {
            batch,
            registry,
            oracle,
        }
    }

    /// Fetch and enrich every candidate, tolerating per-protocol failure.
    #[instrument(skip(self, candidates), fields(target = %target, candidates = candidates.len()))]
    pub async fn fetch(
        &self,
        target: Address,
        candidates: &[PoolCandidate],
    ) -> Result<FetchOutcome, FetchError> {
        let v2_candidates: Vec<&PoolCandidate> = candidates
            .iter()
            .filter(|c| c.kind == ProtocolKind::V2)
            .collect();
        let v3_candidates: Vec<&PoolCandidate> = candidates
            .iter()
            .filter(|c| c.kind == ProtocolKind::V3)
            .collect();

        let (v2_result, v3_result) = tokio::join!(
            self.fetch_v2_batch(&v2_candidates),
            self.fetch_v3_batch(&v3_candidates),
        );

        let mut raw_v2 = Vec::new();
        let mut raw_v3 = Vec::new();
        let mut v2_error: Option<String> = None;
        let mut v3_error: Option<String> = None;

        match v2_result {
            Ok(raws) => raw_v2 = raws,
            Err(e) => v2_error = Some(e.to_string()),
        }
        match v3_result {
            Ok(raws) => raw_v3 = raws,
            Err(e) => v3_error = Some(e.to_string()),
        }

        // Both batches down: sequential per-pool fallback in small chunks.
        let both_failed = v2_error.is_some() && v3_error.is_some();
        if both_failed && !candidates.is_empty() {
            warn!("both protocol batches failed, falling back to sequential chunks");
            let (seq_v2, seq_v3) = self.sequential_fallback(candidates).await;
            raw_v2 = seq_v2;
            raw_v3 = seq_v3;
            if raw_v2.is_empty() && raw_v3.is_empty() {
                return Err(FetchError::AllProtocolsFailed {
                    v2: v2_error.unwrap_or_default(),
                    v3: v3_error.unwrap_or_default(),
                });
            }
        }

        let v2_status = protocol_status(&v2_candidates, raw_v2.len(), &v2_error);
        let v3_status = protocol_status(&v3_candidates, raw_v3.len(), &v3_error);
        let partial_results = v2_status.status == FetchStatus::Failed
            || v3_status.status == FetchStatus::Failed;

        // Token metadata fill across everything the raws reference.
        let mut token_addresses: Vec<Address> = vec![target];
        for raw in &raw_v2 {
            token_addresses.push(raw.token0);
            token_addresses.push(raw.token1);
        }
        for raw in &raw_v3 {
            token_addresses.push(raw.token0);
            token_addresses.push(raw.token1);
        }
        let tokens = self.registry.get_many(&token_addresses).await?;

        let mut pools = Vec::with_capacity(raw_v2.len() + raw_v3.len());
        for raw in &raw_v2 {
            pools.push(self.enrich_v2(raw, target, &tokens));
        }
        for raw in &raw_v3 {
            pools.push(self.enrich_v3(raw, target, &tokens));
        }

        debug!(
            pools = pools.len(),
            partial = partial_results,
            "fetch complete"
        );

        let mut protocol_status = HashMap::new();
        protocol_status.insert("v2".to_string(), v2_status);
        protocol_status.insert("v3".to_string(), v3_status);

        Ok(FetchOutcome {
            pools,
            protocol_status,
            partial_results,
        })
    }

    //--------------------------------------------------------------------------------------------//
    //                                      batched reads                                         //
    //--------------------------------------------------------------------------------------------//

    /// One batch of `{token0, token1, getReserves}` per V2 candidate.
    async fn fetch_v2_batch(
        &self,
        candidates: &[&PoolCandidate],
    ) -> Result<Vec<RawV2>, BatchError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let mut calls = Vec::with_capacity(candidates.len() * 3);
        for candidate in candidates {
            calls.push(SubCall::new(candidate.address, abi::token0()));
            calls.push(SubCall::new(candidate.address, abi::token1()));
            calls.push(SubCall::new(candidate.address, abi::get_reserves()));
        }
        let results = self.batch.batch(calls).await?;

        let mut raws = Vec::with_capacity(candidates.len());
        for (i, candidate) in candidates.iter().enumerate() {
            match decode_v2_slice(candidate.address, &results[i * 3..i * 3 + 3]) {
                Some(raw) => raws.push(raw),
                None => debug!(pool = %candidate.address, "v2 pool dropped: undecodable state"),
            }
        }
        Ok(raws)
    }

    /// Two batches for V3: pool state, then `balanceOf(pool)` on both tokens.
    async fn fetch_v3_batch(
        &self,
        candidates: &[&PoolCandidate],
    ) -> Result<Vec<RawV3>, BatchError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let mut calls = Vec::with_capacity(candidates.len() * 5);
        for candidate in candidates {
            calls.push(SubCall::new(candidate.address, abi::token0()));
            calls.push(SubCall::new(candidate.address, abi::token1()));
            calls.push(SubCall::new(candidate.address, abi::fee()));
            calls.push(SubCall::new(candidate.address, abi::liquidity()));
            calls.push(SubCall::new(candidate.address, abi::slot0()));
        }
        let results = self.batch.batch(calls).await?;

        let mut raws = Vec::with_capacity(candidates.len());
        for (i, candidate) in candidates.iter().enumerate() {
            match decode_v3_slice(candidate.address, candidate.fee, &results[i * 5..i * 5 + 5]) {
                Some(raw) => raws.push(raw),
                None => debug!(pool = %candidate.address, "v3 pool dropped: undecodable state"),
            }
        }

        // Balance reads against the pool's own address.
        if !raws.is_empty() {
            let mut balance_calls = Vec::with_capacity(raws.len() * 2);
            for raw in &raws {
                balance_calls.push(SubCall::new(raw.token0, abi::balance_of(raw.address)));
                balance_calls.push(SubCall::new(raw.token1, abi::balance_of(raw.address)));
            }
            let balances = self.batch.batch(balance_calls).await?;
            for (i, raw) in raws.iter_mut().enumerate() {
                raw.actual_balance0 = balances[i * 2]
                    .ok_data()
                    .and_then(abi::decode_uint)
                    .unwrap_or_default();
                raw.actual_balance1 = balances[i * 2 + 1]
                    .ok_data()
                    .and_then(abi::decode_uint)
                    .unwrap_or_default();
            }
        }
        Ok(raws)
    }

    /// Last-resort path: per-pool fetches in chunks of 8, errors swallowed
    /// per chunk so one bad pool cannot take down the rest.
    async fn sequential_fallback(
        &self,
        candidates: &[PoolCandidate],
    ) -> (Vec<RawV2>, Vec<RawV3>) {
        let mut raw_v2 = Vec::new();
        let mut raw_v3 = Vec::new();
        for chunk in candidates.chunks(SEQUENTIAL_CHUNK) {
            let v2_chunk: Vec<&PoolCandidate> =
                chunk.iter().filter(|c| c.kind == ProtocolKind::V2).collect();
            let v3_chunk: Vec<&PoolCandidate> =
                chunk.iter().filter(|c| c.kind == ProtocolKind::V3).collect();
            match self.fetch_v2_batch(&v2_chunk).await {
                Ok(raws) => raw_v2.extend(raws),
                Err(e) => debug!(error = %e, "sequential v2 chunk failed"),
            }
            match self.fetch_v3_batch(&v3_chunk).await {
                Ok(raws) => raw_v3.extend(raws),
                Err(e) => debug!(error = %e, "sequential v3 chunk failed"),
            }
        }
        (raw_v2, raw_v3)
    }

    //--------------------------------------------------------------------------------------------//
    //                                        enrichment                                          //
    //--------------------------------------------------------------------------------------------//

    fn enrich_v2(
        &self,
        raw: &RawV2,
        target: Address,
        tokens: &HashMap<Address, TokenInfo>,
    ) -> Pool {
        let token0 = resolve(tokens, raw.token0);
        let token1 = resolve(tokens, raw.token1);

        let (price0, price1) = v2_prices(
            raw.reserve0,
            raw.reserve1,
            token0.decimals,
            token1.decimals,
        );
        let amount0 = amount_to_float(raw.reserve0, token0.decimals);
        let amount1 = amount_to_float(raw.reserve1, token1.decimals);

        let total_usd = self.oracle.pool_value_usd(
            raw.token0,
            raw.token1,
            raw.reserve0,
            raw.reserve1,
            token0.decimals,
            token1.decimals,
            price0,
        );
        let status = liquidity_status(total_usd, amount0, amount1);

        let price = self.price_info(
            target,
            &token0,
            &token1,
            price0,
            price1,
            PriceSource::Reserves,
        );

        Pool {
            address: raw.address,
            kind: ProtocolKind::V2,
            protocol: ProtocolKind::V2.protocol_name().to_string(),
            token0,
            token1,
            fee_bps: V2_DEFAULT_FEE_BPS,
            state: PoolState::V2 {
                reserve0: raw.reserve0,
                reserve1: raw.reserve1,
                block_timestamp_last: raw.block_timestamp_last,
            },
            liquidity: LiquidityInfo {
                total_usd,
                total_native: self.oracle.usd_to_native(total_usd),
                token0_amount: amount0,
                token1_amount: amount1,
                status,
                status_reason: None,
                raw0: raw.reserve0,
                raw1: raw.reserve1,
            },
            price,
            last_updated: unix_now(),
        }
    }

    fn enrich_v3(
        &self,
        raw: &RawV3,
        target: Address,
        tokens: &HashMap<Address, TokenInfo>,
    ) -> Pool {
        let token0 = resolve(tokens, raw.token0);
        let token1 = resolve(tokens, raw.token1);
        let amount0 = amount_to_float(raw.actual_balance0, token0.decimals);
        let amount1 = amount_to_float(raw.actual_balance1, token1.decimals);

        // Rug detection comes before any pricing: zero in-range liquidity or
        // a tick pinned at the extremes means the pool was abandoned.
        let tick_pinned = MAX_TICK - raw.tick.abs() <= RUG_TICK_MARGIN;
        if raw.liquidity == 0 || tick_pinned {
            let reason = if raw.liquidity == 0 {
                "no active liquidity in range".to_string()
            } else {
                format!("tick {} pinned at range extreme", raw.tick)
            };
            let pair_symbol = if raw.token0 == target {
                token1.symbol.clone()
            } else {
                token0.symbol.clone()
            };
            return Pool {
                address: raw.address,
                kind: ProtocolKind::V3,
                protocol: ProtocolKind::V3.protocol_name().to_string(),
                token0,
                token1,
                fee_bps: raw.fee,
                state: PoolState::V3 {
                    sqrt_price_x96: raw.sqrt_price_x96,
                    tick: raw.tick,
                    liquidity: raw.liquidity,
                    actual_balance0: raw.actual_balance0,
                    actual_balance1: raw.actual_balance1,
                },
                liquidity: LiquidityInfo {
                    total_usd: 0.0,
                    total_native: 0.0,
                    token0_amount: amount0,
                    token1_amount: amount1,
                    status: LiquidityStatus::Rugged,
                    status_reason: Some(reason),
                    raw0: raw.actual_balance0,
                    raw1: raw.actual_balance1,
                },
                price: PriceInfo::empty(pair_symbol, PriceSource::SqrtPrice),
                last_updated: unix_now(),
            };
        }

        let price0 = sqrt_price_x96_to_price(
            raw.sqrt_price_x96,
            token0.decimals,
            token1.decimals,
        );
        let price1 = if price0 > 0.0 { 1.0 / price0 } else { 0.0 };

        let total_usd = self.oracle.pool_value_usd(
            raw.token0,
            raw.token1,
            raw.actual_balance0,
            raw.actual_balance1,
            token0.decimals,
            token1.decimals,
            price0,
        );
        let status = liquidity_status(total_usd, amount0, amount1);

        let price = self.price_info(
            target,
            &token0,
            &token1,
            price0,
            price1,
            PriceSource::SqrtPrice,
        );

        Pool {
            address: raw.address,
            kind: ProtocolKind::V3,
            protocol: ProtocolKind::V3.protocol_name().to_string(),
            token0,
            token1,
            fee_bps: raw.fee,
            state: PoolState::V3 {
                sqrt_price_x96: raw.sqrt_price_x96,
                tick: raw.tick,
                liquidity: raw.liquidity,
                actual_balance0: raw.actual_balance0,
                actual_balance1: raw.actual_balance1,
            },
            liquidity: LiquidityInfo {
                total_usd,
                total_native: self.oracle.usd_to_native(total_usd),
                token0_amount: amount0,
                token1_amount: amount1,
                status,
                status_reason: None,
                raw0: raw.actual_balance0,
                raw1: raw.actual_balance1,
            },
            price,
            last_updated: unix_now(),
        }
    }

    /// Orient the raw ratio toward the analyzed token and derive its USD and
    /// native prices through the oracle.
    fn price_info(
        &self,
        target: Address,
        token0: &TokenInfo,
        token1: &TokenInfo,
        price0: f64,
        price1: f64,
        source: PriceSource,
    ) -> PriceInfo {
        let target_is_token0 = token0.address == target;
        let (ratio, pair) = if target_is_token0 {
            (price0, token1)
        } else {
            (price1, token0)
        };

        let native_price = self.oracle.native_price_usd();
        let (in_usd, in_native) = if ratio <= 0.0 {
            (0.0, 0.0)
        } else if is_wrapped_native(pair.address) {
            (ratio * native_price, ratio)
        } else if let Some(pair_usd) = self.oracle.price_usd(pair.address) {
            let usd = ratio * pair_usd;
            (usd, if native_price > 0.0 { usd / native_price } else { 0.0 })
        } else {
            (0.0, 0.0)
        };

        PriceInfo {
            token0_price: price0,
            token1_price: price1,
            price_ratio: ratio,
            in_usd,
            in_native,
            pair_token_symbol: pair.symbol.clone(),
            display_price: format!("{} {}", format_significant(ratio), pair.symbol),
            source,
        }
    }
}

//================================================================================================//
//                                          HELPERS                                               //
//================================================================================================//

fn resolve(tokens: &HashMap<Address, TokenInfo>, address: Address) -> TokenInfo {
    tokens
        .get(&address)
        .cloned()
        .unwrap_or_else(|| TokenInfo::unknown(address))
}

fn decode_v2_slice(address: Address, results: &[SubResult]) -> Option<RawV2> {
    let token0 = results.first()?.ok_data().and_then(abi::decode_address)?;
    let token1 = results.get(1)?.ok_data().and_then(abi::decode_address)?;
    let (reserve0, reserve1, ts) = results.get(2)?.ok_data().and_then(abi::decode_reserves)?;
    Some(RawV2 {
        address,
        token0,
        token1,
        reserve0,
        reserve1,
        block_timestamp_last: ts,
    })
}

fn decode_v3_slice(address: Address, fee_hint: Option<u32>, results: &[SubResult]) -> Option<RawV3> {
    let token0 = results.first()?.ok_data().and_then(abi::decode_address)?;
    let token1 = results.get(1)?.ok_data().and_then(abi::decode_address)?;
    let fee = results
        .get(2)?
        .ok_data()
        .and_then(abi::decode_u32)
        .or(fee_hint)?;
    let liquidity = results.get(3)?.ok_data().and_then(abi::decode_u128)?;
    let slot0 = results.get(4)?.ok_data().and_then(abi::decode_slot0)?;
    Some(RawV3 {
        address,
        token0,
        token1,
        fee,
        liquidity,
        sqrt_price_x96: slot0.sqrt_price_x96,
        tick: slot0.tick,
        actual_balance0: U256::zero(),
        actual_balance1: U256::zero(),
    })
}

fn protocol_status(
    candidates: &[&PoolCandidate],
    returned: usize,
    error: &Option<String>,
) -> ProtocolStatus {
    if candidates.is_empty() {
        return ProtocolStatus::skipped();
    }
    match error {
        // A failed batch that the sequential fallback later repaired still
        // counts as success for the protocol.
        Some(e) if returned == 0 => ProtocolStatus {
            status: FetchStatus::Failed,
            pools: candidates.len(),
            returned: 0,
            error: Some(e.clone()),
        },
        _ => ProtocolStatus {
            status: FetchStatus::Success,
            pools: candidates.len(),
            returned,
            error: None,
        },
    }
}

fn liquidity_status(total_usd: f64, amount0: f64, amount1: f64) -> LiquidityStatus {
    if total_usd >= ACTIVE_MIN_USD {
        LiquidityStatus::Active
    } else if total_usd >= WARNING_MIN_USD {
        LiquidityStatus::WarningLiquidity
    } else if amount0 <= 0.0 && amount1 <= 0.0 && total_usd <= 0.0 {
        LiquidityStatus::Empty
    } else {
        LiquidityStatus::LowLiquidity
    }
}

/// Compact display formatting: four significant digits, no scientific
/// notation for ordinary magnitudes.
fn format_significant(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if value >= 1000.0 {
        format!("{:.2}", value)
    } else if value >= 1.0 {
        format!("{:.4}", value)
    } else {
        format!("{:.8}", value)
    }
}
