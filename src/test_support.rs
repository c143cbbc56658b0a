//! Shared unit-test fixtures: an in-memory chain answering batched calls and
//! builders for pools and analysis results. Compiled only for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{Address, Bytes, U256};

use crate::errors::BatchError;
use crate::multicall::{BatchCall, SubCall, SubResult};
use crate::types::*;

//================================================================================================//
//                                         MOCK CHAIN                                             //
//================================================================================================//

/// In-memory chain: batched sub-calls are answered from a (target, calldata)
/// reply table; anything unknown comes back as a failed sub-call. A whole
/// batch can be poisoned by selector to exercise partial-failure paths.
#[derive(Default)]
pub struct MockChain {
    replies: Mutex<HashMap<(Address, Vec<u8>), Bytes>>,
    poisoned_selectors: Mutex<Vec<[u8; 4]>>,
    pub batches: AtomicUsize,
    pub sub_calls: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, target: Address, call_data: Bytes, return_data: Bytes) {
        self.replies
            .lock()
            .unwrap()
            .insert((target, call_data.to_vec()), return_data);
    }

    /// Any batch containing a sub-call with this selector fails wholesale.
    pub fn poison_selector(&self, selector: [u8; 4]) {
        self.poisoned_selectors.lock().unwrap().push(selector);
    }

    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchCall for MockChain {
    async fn batch(&self, calls: Vec<SubCall>) -> Result<Vec<SubResult>, BatchError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.sub_calls.fetch_add(calls.len(), Ordering::SeqCst);

        let poisoned = self.poisoned_selectors.lock().unwrap();
        for call in &calls {
            if call.call_data.len() >= 4
                && poisoned.iter().any(|s| s[..] == call.call_data[..4])
            {
                return Err(BatchError::Decode("injected batch failure".into()));
            }
        }
        drop(poisoned);

        let replies = self.replies.lock().unwrap();
        Ok(calls
            .iter()
            .map(|c| match replies.get(&(c.target, c.call_data.to_vec())) {
                Some(data) => SubResult {
                    success: true,
                    return_data: data.clone(),
                },
                None => SubResult {
                    success: false,
                    return_data: Bytes::new(),
                },
            })
            .collect())
    }
}

//================================================================================================//
//                                          FIXTURES                                              //
//================================================================================================//

pub fn token(symbol: &str, address: Address, decimals: u8) -> TokenInfo {
    TokenInfo {
        address,
        symbol: symbol.to_string(),
        name: format!("{} Token", symbol),
        decimals,
    }
}

/// Address with a fixed low byte, for deterministic canonical ordering.
pub fn addr(n: u8) -> Address {
    let mut raw = [0u8; 20];
    raw[19] = n;
    raw[0] = 0x10; // keep it non-zero and below the base-token addresses
    Address::from(raw)
}

pub fn e18(units: u64) -> U256 {
    U256::from(units) * U256::from(10u128.pow(18))
}

/// Minimal V2 pool with the given normalized amounts and USD liquidity.
pub fn v2_pool(
    token0: TokenInfo,
    token1: TokenInfo,
    amount0: f64,
    amount1: f64,
    total_usd: f64,
    price_in_usd: f64,
    fee_bps: u32,
) -> Pool {
    let ratio = if amount0 > 0.0 { amount1 / amount0 } else { 0.0 };
    let status = if total_usd >= 1000.0 {
        LiquidityStatus::Active
    } else if total_usd >= 100.0 {
        LiquidityStatus::WarningLiquidity
    } else if amount0 <= 0.0 && amount1 <= 0.0 {
        LiquidityStatus::Empty
    } else {
        LiquidityStatus::LowLiquidity
    };
    let pair_symbol = token1.symbol.clone();
    Pool {
        address: Address::random(),
        kind: ProtocolKind::V2,
        protocol: ProtocolKind::V2.protocol_name().to_string(),
        token0: token0.clone(),
        token1,
        fee_bps,
        state: PoolState::V2 {
            reserve0: U256::from((amount0 * 1e18) as u128),
            reserve1: U256::from((amount1 * 1e18) as u128),
            block_timestamp_last: 0,
        },
        liquidity: LiquidityInfo {
            total_usd,
            total_native: total_usd / 300.0,
            token0_amount: amount0,
            token1_amount: amount1,
            status,
            status_reason: None,
            raw0: U256::from((amount0 * 1e18) as u128),
            raw1: U256::from((amount1 * 1e18) as u128),
        },
        price: PriceInfo {
            token0_price: ratio,
            token1_price: if ratio > 0.0 { 1.0 / ratio } else { 0.0 },
            price_ratio: ratio,
            in_usd: price_in_usd,
            in_native: price_in_usd / 300.0,
            pair_token_symbol: pair_symbol,
            display_price: format!("{:.6}", ratio),
            source: PriceSource::Reserves,
        },
        last_updated: unix_now(),
    }
}

/// Minimal V3 pool with live in-range liquidity.
#[allow(clippy::too_many_arguments)]
pub fn v3_pool(
    token0: TokenInfo,
    token1: TokenInfo,
    amount0: f64,
    amount1: f64,
    total_usd: f64,
    price_in_usd: f64,
    fee_bps: u32,
) -> Pool {
    let mut pool = v2_pool(
        token0, token1, amount0, amount1, total_usd, price_in_usd, fee_bps,
    );
    pool.kind = ProtocolKind::V3;
    pool.protocol = ProtocolKind::V3.protocol_name().to_string();
    pool.state = PoolState::V3 {
        sqrt_price_x96: U256::one() << 96,
        tick: 0,
        liquidity: 10u128.pow(18),
        actual_balance0: U256::from((amount0 * 1e18) as u128),
        actual_balance1: U256::from((amount1 * 1e18) as u128),
    };
    pool.price.source = PriceSource::SqrtPrice;
    pool
}

pub fn dummy_pool(a: Address, b: Address) -> Pool {
    let (token0_addr, token1_addr) = if a < b { (a, b) } else { (b, a) };
    v2_pool(
        token("TK0", token0_addr, 18),
        token("TK1", token1_addr, 18),
        1000.0,
        1000.0,
        5000.0,
        1.0,
        2500,
    )
}

pub fn empty_analysis(token_addr: Address) -> AnalysisResult {
    AnalysisResult {
        token: TokenInfo::unknown(token_addr),
        pricing: AggregatePricing::empty(),
        summary: AnalysisSummary {
            total_pools: 0,
            active_pools: 0,
            v2_pools: 0,
            v3_pools: 0,
            rugged_pools: 0,
        },
        best_pools: BestPools::default(),
        pools: Vec::new(),
        analysis: AnalysisBreakdown {
            total_liquidity_usd: 0.0,
            total_liquidity_native: 0.0,
            price_spread_pct: 0.0,
            distribution: Vec::new(),
        },
        performance: Performance::from_millis(0),
        meta: AnalysisMeta {
            timestamp: Utc::now(),
            cached: false,
            cache_age_ms: 0,
            deduplicated: false,
            prices_stale: false,
            partial_results: false,
            protocol_status: HashMap::new(),
        },
        warnings: Vec::new(),
    }
}

pub fn empty_route_plan(token_in: Address, token_out: Address) -> RoutePlan {
    let ti = TokenInfo::unknown(token_in);
    let to = TokenInfo::unknown(token_out);
    RoutePlan {
        token_in: ti.clone(),
        token_out: to.clone(),
        amount_in: 0.0,
        best: Route {
            kind: RouteKind::Direct,
            path: vec![ti, to],
            legs: Vec::new(),
            estimated_output: 0.0,
            price_impact_pct: 0.0,
            total_fee_bps: 0,
            score: 0.0,
        },
        alternatives: Vec::new(),
        timestamp: Utc::now(),
    }
}
