//! # Analytics Service Facade
//!
//! The typed operations the external HTTP transport consumes: analysis
//! projections, best-pool selection by criterion, direct quotes, cache-only
//! swap-pool lookup, trade-size recommendations and scenarios, the greedy
//! split-trade heuristic, and the administrative cache/price surface.
//!
//! Every operation re-validates raw inputs (canonical hex addresses,
//! positive finite amounts) and maps failures onto the typed
//! [`ServiceError`] taxonomy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::analyzer::Analyzer;
use crate::cache::{AnalyticsCache, CacheStats};
use crate::config::Config;
use crate::discovery::PoolDiscovery;
use crate::errors::{AnalyticsError, ServiceError};
use crate::fetcher::PoolFetcher;
use crate::multicall::{BatchCall, MulticallClient};
use crate::price_oracle::PriceOracle;
use crate::route_cache::RouteCache;
use crate::router::{estimate_leg_output, Router};
use crate::rpc::RpcGateway;
use crate::scorer::PoolScorer;
use crate::token_registry::TokenRegistry;
use crate::tokens::DISCOVERY_BASES;
use crate::types::*;

//================================================================================================//
//                                      REQUEST / RESPONSE                                        //
//================================================================================================//

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AnalyzeOptions {
    /// Bypass the analysis cache.
    pub refresh: bool,
    /// Return the trimmed projection with the top-5 pools.
    pub fast: bool,
    /// Drop pools below this USD liquidity from the response.
    pub min_liquidity: Option<f64>,
}

/// Trimmed projection returned by `fast=true`.
#[derive(Debug, Clone, Serialize)]
pub struct FastAnalysis {
    pub token: TokenInfo,
    pub price_usd: f64,
    pub price_native: f64,
    pub total_liquidity_usd: f64,
    pub pool_count: usize,
    pub top_pools: Vec<PoolRef>,
    pub recommended: Option<PoolEvaluation>,
    pub warnings: Vec<Warning>,
    pub meta: AnalysisMeta,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AnalyzeResponse {
    Full(Box<AnalysisResult>),
    Fast(Box<FastAnalysis>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BestPoolCriteria {
    Liquidity,
    Price,
    Fee,
    V2,
    V3,
    Balanced,
    Recommended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    #[default]
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize)]
pub struct BestPoolResponse {
    pub token: TokenInfo,
    pub criteria: String,
    pub pool: PoolRef,
    pub evaluation: Option<PoolEvaluation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRequest {
    pub token_in: String,
    pub token_out: String,
    /// Decimal string in token units.
    pub amount_in: String,
    /// Slippage tolerance in percent.
    pub slippage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteResponse {
    pub pool: PoolRef,
    pub amount_in: f64,
    pub estimated_out: f64,
    pub min_amount_out: f64,
    pub price_impact_pct: f64,
    pub fee_bps: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwapPoolResponse {
    pub token: TokenInfo,
    pub native_amount: f64,
    pub trade_usd: f64,
    pub recommendation: PoolEvaluation,
    /// Age of the cached analysis backing this synchronous answer.
    pub cache_age_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeScenario {
    pub trade_usd: f64,
    pub trade_size: TradeSize,
    pub recommendation: Option<PoolEvaluation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitAllocation {
    pub pool: PoolRef,
    pub amount_usd: f64,
    pub share_pct: f64,
}

/// Output of the greedy split heuristic. Any single pool is capped at 50%
/// of the total and at 5% of its own liquidity; the remainder that no pool
/// could absorb is reported, not hidden. This is a heuristic, not a proven
/// optimum.
#[derive(Debug, Clone, Serialize)]
pub struct SplitPlan {
    pub total_usd: f64,
    pub covered_usd: f64,
    pub uncovered_usd: f64,
    pub allocations: Vec<SplitAllocation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub rpc_endpoints: usize,
    pub prices_stale: bool,
    pub tracked_prices: usize,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheClearScope {
    All,
    Pools,
    Prices,
}

const DEFAULT_POOLS_LIMIT: usize = 20;
const DEFAULT_SCENARIO_SIZES: [f64; 4] = [100.0, 1_000.0, 10_000.0, 100_000.0];
const SPLIT_MAX_POOL_SHARE: f64 = 0.5;
const SPLIT_MAX_LIQUIDITY_CONSUMPTION: f64 = 0.05;

//================================================================================================//
//                                          SERVICE                                               //
//================================================================================================//

pub struct AnalyticsService {
    analyzer: Arc<Analyzer>,
    router: Arc<Router>,
    route_cache: Arc<RouteCache>,
    scorer: PoolScorer,
    config: Config,
    rpc_endpoints: usize,
    started: Instant,
}

impl AnalyticsService {
    /// Wire the full engine from configuration: gateway → batch caller →
    /// cache/registry/oracle → discovery/fetcher → analyzer → router.
    pub fn new(config: Config) -> Result<Self, AnalyticsError> {
        config.validate()?;
        let gateway = Arc::new(RpcGateway::new(config.rpc.clone())?);
        let rpc_endpoints = gateway.endpoint_count();
        let batch: Arc<dyn BatchCall> = Arc::new(MulticallClient::new(gateway));
        Ok(Self::from_parts(batch, config, rpc_endpoints))
    }

    /// Assemble the engine over an arbitrary batch-call transport. Tests
    /// inject their in-memory chain here.
    pub fn from_parts(batch: Arc<dyn BatchCall>, config: Config, rpc_endpoints: usize) -> Self {
        let cache = Arc::new(AnalyticsCache::new(&config.cache));
        let registry = Arc::new(TokenRegistry::new(batch.clone(), cache.clone()));
        let oracle = Arc::new(PriceOracle::new(batch.clone(), config.oracle.clone()));
        let discovery = Arc::new(PoolDiscovery::new(batch.clone()));
        let fetcher = Arc::new(PoolFetcher::new(
            batch,
            registry.clone(),
            oracle.clone(),
        ));
        let analyzer = Arc::new(Analyzer::new(
            registry,
            oracle,
            discovery,
            fetcher,
            cache.clone(),
            config.clone(),
        ));
        let router = Arc::new(Router::new(analyzer.clone()));
        let route_cache = Arc::new(RouteCache::new(
            router.clone(),
            cache,
            config.router.clone(),
        ));
        Self {
            analyzer,
            router,
            route_cache,
            scorer: PoolScorer::new(),
            config,
            rpc_endpoints,
            started: Instant::now(),
        }
    }

    pub fn analyzer(&self) -> &Arc<Analyzer> {
        &self.analyzer
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn route_cache(&self) -> &Arc<RouteCache> {
        &self.route_cache
    }

    /// Startup warmers: base-set token metadata, one oracle refresh, and
    /// (when configured) a sequential pre-analysis of the base set.
    pub async fn warm_up(&self) {
        let bases: Vec<Address> = DISCOVERY_BASES.iter().map(|b| b.address_parsed()).collect();
        if let Err(e) = self.analyzer.registry().get_many(&bases).await {
            warn!(error = %e, "base token warm-up failed");
        }
        if let Err(e) = self.analyzer.oracle().refresh_from_chain().await {
            warn!(error = %e, "initial price refresh failed");
        }
        if self.config.cache.warm_analyze_bases {
            for base in &bases {
                if let Err(e) = self.analyzer.analyze_token(*base, false).await {
                    warn!(token = %base, error = %e, "base analysis warm-up failed");
                }
            }
        }
        info!("cache warm-up complete");
    }

    /// Start the background route pre-warmer; returns its join handle.
    pub fn spawn_route_prewarmer(&self) -> tokio::task::JoinHandle<()> {
        self.route_cache.clone().spawn()
    }

    pub fn shutdown(&self) {
        self.route_cache.shutdown();
    }

    //--------------------------------------------------------------------------------------------//
    //                                        analysis                                            //
    //--------------------------------------------------------------------------------------------//

    #[instrument(skip(self))]
    pub async fn analyze(
        &self,
        token: &str,
        options: AnalyzeOptions,
    ) -> Result<AnalyzeResponse, ServiceError> {
        let token = parse_token(token)?;
        let result = self.analyzer.analyze_token(token, options.refresh).await?;

        let mut full = (*result).clone();
        if let Some(min_liquidity) = options.min_liquidity {
            full.pools.retain(|p| p.liquidity.total_usd >= min_liquidity);
        }

        if options.fast {
            let mut top: Vec<&Pool> = full.pools.iter().collect();
            top.sort_by(|a, b| {
                b.liquidity
                    .total_usd
                    .partial_cmp(&a.liquidity.total_usd)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let fast = FastAnalysis {
                token: full.token.clone(),
                price_usd: full.pricing.avg_price_usd,
                price_native: full.pricing.avg_price_native,
                total_liquidity_usd: full.analysis.total_liquidity_usd,
                pool_count: full.summary.total_pools,
                top_pools: top.into_iter().take(5).map(PoolRef::from_pool).collect(),
                recommended: full.best_pools.recommended.clone(),
                warnings: full.warnings.clone(),
                meta: full.meta.clone(),
            };
            return Ok(AnalyzeResponse::Fast(Box::new(fast)));
        }
        Ok(AnalyzeResponse::Full(Box::new(full)))
    }

    #[instrument(skip(self))]
    pub async fn best_pool(
        &self,
        token: &str,
        criteria: BestPoolCriteria,
        base_pair: Option<&str>,
        direction: PriceDirection,
    ) -> Result<BestPoolResponse, ServiceError> {
        let token = parse_token(token)?;
        let result = self.analyzer.analyze_token(token, false).await?;

        let mut pools: Vec<&Pool> = result
            .pools
            .iter()
            .filter(|p| p.liquidity.status != LiquidityStatus::Rugged)
            .collect();
        if let Some(base) = base_pair {
            pools.retain(|p| p.price.pair_token_symbol.eq_ignore_ascii_case(base));
        }
        if pools.is_empty() {
            return Err(ServiceError::NoPools(token));
        }

        let mut evaluation = None;
        let pool_ref = match criteria {
            BestPoolCriteria::Liquidity => pools
                .iter()
                .max_by(|a, b| cmp_f64(a.liquidity.total_usd, b.liquidity.total_usd))
                .map(|p| PoolRef::from_pool(p)),
            BestPoolCriteria::Price => {
                let priced = pools.iter().filter(|p| p.price.in_usd > 0.0);
                match direction {
                    // Buying the token: the cheapest pool is the best.
                    PriceDirection::Buy => priced
                        .min_by(|a, b| cmp_f64(a.price.in_usd, b.price.in_usd))
                        .map(|p| PoolRef::from_pool(p)),
                    PriceDirection::Sell => priced
                        .max_by(|a, b| cmp_f64(a.price.in_usd, b.price.in_usd))
                        .map(|p| PoolRef::from_pool(p)),
                }
            }
            BestPoolCriteria::Fee => pools
                .iter()
                .min_by_key(|p| p.fee_bps)
                .map(|p| PoolRef::from_pool(p)),
            BestPoolCriteria::V2 => pools
                .iter()
                .filter(|p| p.kind == ProtocolKind::V2)
                .max_by(|a, b| cmp_f64(a.liquidity.total_usd, b.liquidity.total_usd))
                .map(|p| PoolRef::from_pool(p)),
            BestPoolCriteria::V3 => pools
                .iter()
                .filter(|p| p.kind == ProtocolKind::V3)
                .max_by(|a, b| cmp_f64(a.liquidity.total_usd, b.liquidity.total_usd))
                .map(|p| PoolRef::from_pool(p)),
            BestPoolCriteria::Recommended => {
                let owned: Vec<Pool> = pools.iter().map(|p| (*p).clone()).collect();
                let rec = self.scorer.recommend(
                    &owned,
                    token,
                    self.config.router.default_trade_usd,
                    &result.pricing,
                );
                evaluation = rec.clone();
                rec.map(|r| r.pool)
            }
            // Balanced weighs cost against safety: highest composite score.
            BestPoolCriteria::Balanced => {
                let best = pools
                    .iter()
                    .map(|p| {
                        self.scorer.evaluate(
                            p,
                            token,
                            self.config.router.default_trade_usd,
                            &result.pricing,
                        )
                    })
                    .filter(|e| e.tradeable)
                    .max_by(|a, b| cmp_f64(a.score, b.score));
                evaluation = best.clone();
                best.map(|e| e.pool)
            }
        };

        let pool = pool_ref.ok_or(ServiceError::NoPools(token))?;
        Ok(BestPoolResponse {
            token: result.token.clone(),
            criteria: format!("{:?}", criteria).to_lowercase(),
            pool,
            evaluation,
        })
    }

    pub async fn pools(
        &self,
        token: &str,
        kind: Option<ProtocolKind>,
        min_liquidity: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<Pool>, ServiceError> {
        let token = parse_token(token)?;
        let result = self.analyzer.analyze_token(token, false).await?;
        let mut pools: Vec<Pool> = result
            .pools
            .iter()
            .filter(|p| kind.map(|k| p.kind == k).unwrap_or(true))
            .filter(|p| {
                min_liquidity
                    .map(|min| p.liquidity.total_usd >= min)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        pools.sort_by(|a, b| cmp_f64(b.liquidity.total_usd, a.liquidity.total_usd));
        pools.truncate(limit.unwrap_or(DEFAULT_POOLS_LIMIT));
        Ok(pools)
    }

    /// Pools containing both tokens, taken from the first token's analysis.
    pub async fn pair_pools(&self, a: &str, b: &str) -> Result<Vec<Pool>, ServiceError> {
        let a = parse_token(a)?;
        let b = parse_token(b)?;
        let result = self.analyzer.analyze_token(a, false).await?;
        let pools: Vec<Pool> = result
            .pools
            .iter()
            .filter(|p| p.involves(b))
            .cloned()
            .collect();
        if pools.is_empty() {
            return Err(ServiceError::NoPools(a));
        }
        Ok(pools)
    }

    //--------------------------------------------------------------------------------------------//
    //                                     quoting & routing                                      //
    //--------------------------------------------------------------------------------------------//

    #[instrument(skip(self, request))]
    pub async fn quote(&self, request: QuoteRequest) -> Result<QuoteResponse, ServiceError> {
        let token_in = parse_token(&request.token_in)?;
        let token_out = parse_token(&request.token_out)?;
        let amount_in = parse_amount(&request.amount_in)?;
        if !(0.0..=100.0).contains(&request.slippage) {
            return Err(ServiceError::InvalidAmount(format!(
                "slippage {} out of range",
                request.slippage
            )));
        }

        let result = self.analyzer.analyze_token(token_in, false).await?;
        let direct: Vec<Pool> = result
            .pools
            .iter()
            .filter(|p| p.involves(token_out) && p.liquidity.status.is_active())
            .cloned()
            .collect();
        if direct.is_empty() {
            return Err(ServiceError::NoPools(token_in));
        }

        let usd_in = self
            .analyzer
            .oracle()
            .price_usd(token_in)
            .or(if result.pricing.avg_price_usd > 0.0 {
                Some(result.pricing.avg_price_usd)
            } else {
                None
            })
            .unwrap_or(0.0);
        let trade_usd = amount_in * usd_in;

        let recommendation = self
            .scorer
            .recommend(&direct, token_in, trade_usd, &result.pricing)
            .ok_or(ServiceError::NoTradeablePool(token_in))?;
        // The safety policy is a hard gate for quoting.
        if recommendation.risk_level == RiskLevel::Critical
            || recommendation.safety.safety_score < 30.0
        {
            return Err(ServiceError::SwapBlocked {
                risk_level: recommendation.risk_level,
                safety_score: recommendation.safety.safety_score,
            });
        }

        let pool = direct
            .iter()
            .find(|p| p.address == recommendation.pool.address)
            .expect("recommended pool comes from the candidate list");
        let oracle = self.analyzer.oracle().clone();
        let usd_of = move |t: Address| {
            if t == token_in && usd_in > 0.0 {
                Some(usd_in)
            } else {
                oracle.price_usd(t)
            }
        };
        let (estimated_out, impact_frac) =
            estimate_leg_output(amount_in, token_in, pool, &usd_of);
        let min_amount_out = estimated_out * (1.0 - request.slippage / 100.0);

        Ok(QuoteResponse {
            pool: recommendation.pool,
            amount_in,
            estimated_out,
            min_amount_out,
            price_impact_pct: impact_frac * 100.0,
            fee_bps: pool.fee_bps,
        })
    }

    pub async fn route(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: f64,
    ) -> Result<RoutePlan, ServiceError> {
        let token_in = parse_token(token_in)?;
        let token_out = parse_token(token_out)?;
        if !(amount_in.is_finite() && amount_in > 0.0) {
            return Err(ServiceError::InvalidAmount(amount_in.to_string()));
        }
        Ok(self
            .router
            .find_best_route(token_in, token_out, amount_in)
            .await?)
    }

    /// Synchronous, cache-only: pick a pool for swapping `native_amount` of
    /// the wrapped native token into `token`. A missing cached analysis is
    /// the typed 428 precondition.
    pub fn swap_pool(
        &self,
        token: &str,
        native_amount: f64,
    ) -> Result<SwapPoolResponse, ServiceError> {
        let token = parse_token(token)?;
        if !(native_amount.is_finite() && native_amount > 0.0) {
            return Err(ServiceError::InvalidAmount(native_amount.to_string()));
        }
        let cached = self
            .analyzer
            .cached_analysis(token)
            .ok_or(ServiceError::TokenNotCached(token))?;

        let trade_usd = native_amount * self.analyzer.oracle().native_price_usd();
        let recommendation = self
            .scorer
            .recommend(&cached.pools, token, trade_usd, &cached.pricing)
            .ok_or(ServiceError::NoPools(token))?;
        if !recommendation.tradeable {
            return Err(ServiceError::NoTradeablePool(token));
        }

        Ok(SwapPoolResponse {
            token: cached.token.clone(),
            native_amount,
            trade_usd,
            recommendation,
            cache_age_ms: cached.meta.cache_age_ms,
        })
    }

    //--------------------------------------------------------------------------------------------//
    //                                  trade-size tooling                                        //
    //--------------------------------------------------------------------------------------------//

    pub async fn smart_recommend(
        &self,
        token: &str,
        trade_usd: f64,
    ) -> Result<PoolEvaluation, ServiceError> {
        let token = parse_token(token)?;
        if !(trade_usd.is_finite() && trade_usd > 0.0) {
            return Err(ServiceError::InvalidAmount(trade_usd.to_string()));
        }
        let result = self.analyzer.analyze_token(token, false).await?;
        self.scorer
            .recommend(&result.pools, token, trade_usd, &result.pricing)
            .ok_or(ServiceError::NoPools(token))
    }

    pub async fn trade_scenarios(
        &self,
        token: &str,
        sizes: Option<Vec<f64>>,
    ) -> Result<Vec<TradeScenario>, ServiceError> {
        let token = parse_token(token)?;
        let sizes = sizes.unwrap_or_else(|| DEFAULT_SCENARIO_SIZES.to_vec());
        for size in &sizes {
            if !(size.is_finite() && *size > 0.0) {
                return Err(ServiceError::InvalidAmount(size.to_string()));
            }
        }
        let result = self.analyzer.analyze_token(token, false).await?;
        Ok(sizes
            .into_iter()
            .map(|trade_usd| TradeScenario {
                trade_usd,
                trade_size: TradeSize::classify(trade_usd),
                recommendation: self.scorer.recommend(
                    &result.pools,
                    token,
                    trade_usd,
                    &result.pricing,
                ),
            })
            .collect())
    }

    /// Greedy split across tradeable pools, cheapest execution first. Caps:
    /// 50% of the total per pool, 5% of each pool's own liquidity.
    pub async fn split_trade(
        &self,
        token: &str,
        total_usd: f64,
    ) -> Result<SplitPlan, ServiceError> {
        let token = parse_token(token)?;
        if !(total_usd.is_finite() && total_usd > 0.0) {
            return Err(ServiceError::InvalidAmount(total_usd.to_string()));
        }
        let result = self.analyzer.analyze_token(token, false).await?;

        let mut evaluations: Vec<PoolEvaluation> = result
            .pools
            .iter()
            .filter(|p| p.liquidity.status != LiquidityStatus::Rugged)
            .map(|p| {
                self.scorer
                    .evaluate(p, token, total_usd * SPLIT_MAX_POOL_SHARE, &result.pricing)
            })
            .filter(|e| e.tradeable)
            .collect();
        if evaluations.is_empty() {
            return Err(ServiceError::NoTradeablePool(token));
        }
        evaluations.sort_by(|a, b| cmp_f64(a.costs.total_cost_pct, b.costs.total_cost_pct));

        let mut allocations = Vec::new();
        let mut remaining = total_usd;
        for evaluation in &evaluations {
            if remaining <= 0.0 {
                break;
            }
            let cap = (total_usd * SPLIT_MAX_POOL_SHARE)
                .min(evaluation.pool.liquidity_usd * SPLIT_MAX_LIQUIDITY_CONSUMPTION);
            let amount = cap.min(remaining);
            if amount <= 0.0 {
                continue;
            }
            allocations.push(SplitAllocation {
                pool: evaluation.pool.clone(),
                amount_usd: amount,
                share_pct: amount / total_usd * 100.0,
            });
            remaining -= amount;
        }

        Ok(SplitPlan {
            total_usd,
            covered_usd: total_usd - remaining,
            uncovered_usd: remaining,
            allocations,
        })
    }

    //--------------------------------------------------------------------------------------------//
    //                                     administration                                         //
    //--------------------------------------------------------------------------------------------//

    pub fn health(&self) -> HealthReport {
        let oracle = self.analyzer.oracle();
        HealthReport {
            status: "ok",
            uptime_secs: self.started.elapsed().as_secs(),
            rpc_endpoints: self.rpc_endpoints,
            prices_stale: oracle.are_stale(),
            tracked_prices: oracle.all_prices().len(),
            cache: self.analyzer.cache().stats(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.analyzer.cache().stats()
    }

    pub async fn cache_clear(&self, scope: CacheClearScope) {
        let cache = self.analyzer.cache();
        match scope {
            CacheClearScope::All => cache.clear_all().await,
            CacheClearScope::Pools => cache.clear_pools(),
            CacheClearScope::Prices => cache.clear_prices(),
        }
        info!(?scope, "cache cleared");
    }

    /// Current oracle prices, keyed by checksummed address.
    pub fn prices(&self) -> HashMap<String, f64> {
        self.analyzer
            .oracle()
            .all_prices()
            .into_iter()
            .map(|(addr, price)| (addr_display(addr), price))
            .collect()
    }

    pub fn set_price(&self, token: &str, price_usd: f64) -> Result<(), ServiceError> {
        let token = parse_token(token)?;
        if !(price_usd.is_finite() && price_usd > 0.0) {
            return Err(ServiceError::InvalidAmount(price_usd.to_string()));
        }
        self.analyzer.oracle().set_price(token, price_usd);
        Ok(())
    }
}

//================================================================================================//
//                                          HELPERS                                               //
//================================================================================================//

fn parse_token(raw: &str) -> Result<Address, ServiceError> {
    parse_address(raw).ok_or_else(|| ServiceError::InvalidAddress(raw.to_string()))
}

fn parse_amount(raw: &str) -> Result<f64, ServiceError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ServiceError::InvalidAmount(raw.to_string()))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ServiceError::InvalidAmount(raw.to_string()))
    }
}

fn cmp_f64(a: f64, b: f64) -> std::cmp::Ordering {
    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PoolEntry;
    use crate::test_support::{addr, token, v2_pool, MockChain};
    use crate::tokens::WRAPPED_NATIVE;

    fn service() -> AnalyticsService {
        AnalyticsService::from_parts(Arc::new(MockChain::new()), Config::default(), 1)
    }

    fn seed_analysis(service: &AnalyticsService, target: Address, pools: Vec<Pool>) {
        let mut analysis = crate::test_support::empty_analysis(target);
        analysis.token = token("TGT", target, 18);
        let samples: Vec<crate::dex_math::PriceSample> = pools
            .iter()
            .map(|p| crate::dex_math::PriceSample {
                pool: p.address,
                pair_token_symbol: p.price.pair_token_symbol.clone(),
                price_usd: p.price.in_usd,
                price_native: p.price.in_native,
                liquidity_usd: p.liquidity.total_usd,
                liquidity_native: p.liquidity.total_native,
            })
            .collect();
        analysis.pricing = crate::dex_math::aggregate_prices(&samples);
        analysis.pools = pools;
        service
            .analyzer()
            .cache()
            .pools
            .insert(
                &crate::cache::AnalyticsCache::analysis_key(target),
                PoolEntry::Analysis(Arc::new(analysis)),
            )
            .unwrap();
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(matches!(
            parse_token("0x123"),
            Err(ServiceError::InvalidAddress(_))
        ));
        assert!(parse_token("0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c").is_ok());
        assert!(parse_amount("1.5").is_ok());
        assert!(parse_amount("-3").is_err());
        assert!(parse_amount("NaN").is_err());
        assert!(parse_amount("1e4").is_ok());
        assert!(parse_amount("lots").is_err());
    }

    #[test]
    fn swap_pool_requires_cached_analysis() {
        let service = service();
        let target = addr(1);
        let err = service
            .swap_pool(&addr_display(target), 1.0)
            .expect_err("uncached token must 428");
        assert!(matches!(err, ServiceError::TokenNotCached(t) if t == target));
    }

    #[test]
    fn swap_pool_serves_from_cache_without_chain_calls() {
        let service = service();
        let target = addr(1);
        let wrapper = token("WBNB", WRAPPED_NATIVE.address_parsed(), 18);
        let pool = v2_pool(
            token("TGT", target, 18),
            wrapper,
            250_000.0,
            1_666.0,
            500_000.0,
            1.0,
            2500,
        );
        seed_analysis(&service, target, vec![pool]);

        let response = service.swap_pool(&addr_display(target), 2.0).unwrap();
        assert!((response.trade_usd - 600.0).abs() < 1e-9);
        assert!(response.recommendation.tradeable);
    }

    #[tokio::test]
    async fn split_trade_honors_both_caps() {
        let service = service();
        let target = addr(1);
        let wrapper = || token("WBNB", WRAPPED_NATIVE.address_parsed(), 18);
        // Two deep pools: the 5% liquidity cap binds for pool B, the 50%
        // share cap for pool A.
        let pool_a = v2_pool(
            token("TGT", target, 18),
            wrapper(),
            1_000_000.0,
            6_666.0,
            2_000_000.0,
            1.0,
            500,
        );
        let pool_b = v2_pool(
            token("TGT", target, 18),
            wrapper(),
            50_000.0,
            333.0,
            100_000.0,
            1.0,
            2500,
        );
        seed_analysis(&service, target, vec![pool_a, pool_b]);

        let plan = service
            .split_trade(&addr_display(target), 20_000.0)
            .await
            .unwrap();
        assert_eq!(plan.allocations.len(), 2);
        // Cheapest pool first, capped at 50% of the total.
        assert!((plan.allocations[0].amount_usd - 10_000.0).abs() < 1e-9);
        // Second pool capped at 5% of its own $100k liquidity.
        assert!((plan.allocations[1].amount_usd - 5_000.0).abs() < 1e-9);
        assert!((plan.uncovered_usd - 5_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn quote_blocks_unsafe_pools() {
        let service = service();
        let target = addr(1);
        let out = addr(2);
        // Drained pair side: the scorer zeroes safety.
        let drained = v2_pool(
            token("TGT", target, 18),
            token("OUT", out, 18),
            1_000_000.0,
            1e-9,
            5_000.0,
            1.0,
            2500,
        );
        seed_analysis(&service, target, vec![drained]);

        let err = service
            .quote(QuoteRequest {
                token_in: addr_display(target),
                token_out: addr_display(out),
                amount_in: "100".to_string(),
                slippage: 0.5,
            })
            .await
            .expect_err("rugged pool must not quote");
        assert!(matches!(
            err,
            ServiceError::SwapBlocked { .. } | ServiceError::NoTradeablePool(_)
        ));
    }

    #[test]
    fn responses_serialize_for_the_transport_layer() {
        let service = service();
        let target = addr(1);
        let wrapper = token("WBNB", WRAPPED_NATIVE.address_parsed(), 18);
        let pool = v2_pool(
            token("TGT", target, 18),
            wrapper,
            50_000.0,
            166.0,
            100_000.0,
            1.0,
            2500,
        );
        seed_analysis(&service, target, vec![pool]);

        let response = service.swap_pool(&addr_display(target), 1.0).unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["token"]["symbol"], "TGT");
        assert!(json["recommendation"]["costs"]["total_cost_pct"].is_number());

        let health = serde_json::to_value(service.health()).unwrap();
        assert_eq!(health["status"], "ok");
        assert!(health["cache"]["pools"]["entries"].is_number());
    }

    #[test]
    fn price_overlay_round_trips() {
        let service = service();
        let target = addr(9);
        service.set_price(&addr_display(target), 4.2).unwrap();
        let prices = service.prices();
        let displayed = addr_display(target);
        assert!((prices[&displayed] - 4.2).abs() < 1e-12);
        assert!(service.set_price(&displayed, -1.0).is_err());
    }
}
