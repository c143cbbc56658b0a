//! # Token Analyzer
//!
//! Orchestrates the full pipeline for one token: cache lookup, concurrent
//! in-flight deduplication, optional invalidation, metadata + price refresh,
//! discovery, state fetch, aggregation, scoring, warning generation, and
//! result caching.
//!
//! Deduplication is keyed `(token, force_refresh)`: concurrent callers attach
//! to the leader's broadcast channel and receive the same result, annotated
//! `deduplicated`; the entry is removed when the leader settles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use ethers::types::Address;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::cache::{AnalyticsCache, PoolEntry};
use crate::config::Config;
use crate::discovery::{DiscoveryMode, PoolDiscovery};
use crate::dex_math::{aggregate_prices, PriceSample};
use crate::errors::AnalyzeError;
use crate::fetcher::{FetchOutcome, PoolFetcher};
use crate::price_oracle::PriceOracle;
use crate::scorer::PoolScorer;
use crate::token_registry::TokenRegistry;
use crate::tokens::min_pair_reserve;
use crate::types::*;

type FlightKey = (Address, bool);
type FlightResult = Result<Arc<AnalysisResult>, String>;

pub struct Analyzer {
    registry: Arc<TokenRegistry>,
    oracle: Arc<PriceOracle>,
    discovery: Arc<PoolDiscovery>,
    fetcher: Arc<PoolFetcher>,
    scorer: PoolScorer,
    cache: Arc<AnalyticsCache>,
    inflight: DashMap<FlightKey, broadcast::Sender<FlightResult>>,
    config: Config,
}

impl Analyzer {
    pub fn new(
        registry: Arc<TokenRegistry>,
        oracle: Arc<PriceOracle>,
        discovery: Arc<PoolDiscovery>,
        fetcher: Arc<PoolFetcher>,
        cache: Arc<AnalyticsCache>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            oracle,
            discovery,
            fetcher,
            scorer: PoolScorer::new(),
            cache,
            inflight: DashMap::new(),
            config,
        }
    }

    pub fn cache(&self) -> &Arc<AnalyticsCache> {
        &self.cache
    }

    pub fn oracle(&self) -> &Arc<PriceOracle> {
        &self.oracle
    }

    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    /// Cached analysis only; never touches the chain.
    pub fn cached_analysis(&self, token: Address) -> Option<Arc<AnalysisResult>> {
        self.cache
            .pools
            .get(&AnalyticsCache::analysis_key(token))
            .and_then(|entry| entry.as_analysis())
    }

    /// Analyze a token, serving from cache within the TTL and deduplicating
    /// concurrent callers.
    #[instrument(skip(self), fields(token = %token, force = force_refresh))]
    pub async fn analyze_token(
        &self,
        token: Address,
        force_refresh: bool,
    ) -> Result<Arc<AnalysisResult>, AnalyzeError> {
        let key = AnalyticsCache::analysis_key(token);
        if !force_refresh {
            if let Some((entry, age)) = self.cache.pools.get_with_age(&key) {
                if let Some(analysis) = entry.as_analysis() {
                    debug!(age_ms = age.as_millis() as u64, "analysis served from cache");
                    return Ok(Arc::new(analysis.as_cached(age.as_millis() as u64)));
                }
            }
        }

        enum Role {
            Leader(broadcast::Sender<FlightResult>),
            Waiter(broadcast::Receiver<FlightResult>),
        }

        let flight_key = (token, force_refresh);
        let role = match self.inflight.entry(flight_key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Role::Waiter(entry.get().subscribe())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let (tx, _rx) = broadcast::channel(1);
                slot.insert(tx.clone());
                Role::Leader(tx)
            }
        };

        match role {
            Role::Waiter(mut rx) => {
                debug!("awaiting in-flight analysis");
                match rx.recv().await {
                    Ok(Ok(result)) => Ok(Arc::new(result.as_deduplicated())),
                    Ok(Err(message)) => Err(AnalyzeError::Internal(message)),
                    Err(_) => Err(AnalyzeError::Internal(
                        "in-flight analysis dropped without a result".to_string(),
                    )),
                }
            }
            Role::Leader(tx) => {
                let outcome = self.perform_analysis(token, force_refresh).await;
                self.inflight.remove(&flight_key);
                let payload: FlightResult = match &outcome {
                    Ok(result) => Ok(result.clone()),
                    Err(e) => Err(e.to_string()),
                };
                let _ = tx.send(payload);
                outcome
            }
        }
    }

    async fn perform_analysis(
        &self,
        token: Address,
        force_refresh: bool,
    ) -> Result<Arc<AnalysisResult>, AnalyzeError> {
        let started = Instant::now();

        if force_refresh {
            self.cache.clear_token_analysis(token).await;
        }

        // Token metadata, a stale-price refresh, and discovery are
        // independent; run them concurrently. A failed refresh is logged and
        // the previous oracle values are reused.
        let refresh = async {
            if self.oracle.are_stale() {
                if let Err(e) = self.oracle.refresh_from_chain().await {
                    warn!(error = %e, "price refresh failed, using cached prices");
                }
            }
        };
        let (token_info, _, candidates) = tokio::join!(
            self.registry.get(token),
            refresh,
            self.discovery.discover(token, DiscoveryMode::Full),
        );
        let token_info = token_info?;
        let candidates = candidates?;
        let prices_stale = self.oracle.are_stale();

        let FetchOutcome {
            pools,
            protocol_status,
            partial_results,
        } = self.fetcher.fetch(token, &candidates).await?;

        let samples: Vec<PriceSample> = pools
            .iter()
            .filter(|p| p.liquidity.status != LiquidityStatus::Rugged)
            .map(|p| PriceSample {
                pool: p.address,
                pair_token_symbol: p.price.pair_token_symbol.clone(),
                price_usd: p.price.in_usd,
                price_native: p.price.in_native,
                liquidity_usd: p.liquidity.total_usd,
                liquidity_native: p.liquidity.total_native,
            })
            .collect();
        let pricing = aggregate_prices(&samples);

        // Record the consensus USD price in the short-lived price store so
        // cache-only consumers (router fallbacks, invalidation) see it.
        if pricing.avg_price_usd > 0.0 {
            let _ = self
                .cache
                .prices
                .insert(&addr_key(token), pricing.avg_price_usd);
        }

        let trade_usd = self.config.router.default_trade_usd;
        let best_pools = self.scorer.best_pools(&pools, token, trade_usd, &pricing);

        let summary = summarize(&pools);
        let analysis = breakdown(&pools, &pricing);
        let performance = Performance::from_millis(started.elapsed().as_millis() as u64);
        let meta = AnalysisMeta {
            timestamp: Utc::now(),
            cached: false,
            cache_age_ms: 0,
            deduplicated: false,
            prices_stale,
            partial_results,
            protocol_status,
        };

        let mut result = AnalysisResult {
            token: token_info,
            pricing,
            summary,
            best_pools,
            pools,
            analysis,
            performance,
            meta,
            warnings: Vec::new(),
        };
        let warnings = generate_warnings(&result, token);
        result.warnings = warnings;

        let result = Arc::new(result);
        self.cache.pools.insert_with_ttl(
            &AnalyticsCache::analysis_key(token),
            PoolEntry::Analysis(result.clone()),
            self.config.cache.pool_ttl(),
        )?;

        info!(
            token = %result.token.symbol,
            pools = result.summary.total_pools,
            active = result.summary.active_pools,
            total_ms = result.performance.total_ms,
            grade = result.performance.grade,
            "analysis complete"
        );
        Ok(result)
    }
}

//================================================================================================//
//                                   RESULT DERIVATION                                            //
//================================================================================================//

fn summarize(pools: &[Pool]) -> AnalysisSummary {
    AnalysisSummary {
        total_pools: pools.len(),
        active_pools: pools
            .iter()
            .filter(|p| p.liquidity.status.is_active())
            .count(),
        v2_pools: pools.iter().filter(|p| p.kind == ProtocolKind::V2).count(),
        v3_pools: pools.iter().filter(|p| p.kind == ProtocolKind::V3).count(),
        rugged_pools: pools
            .iter()
            .filter(|p| p.liquidity.status == LiquidityStatus::Rugged)
            .count(),
    }
}

fn breakdown(pools: &[Pool], pricing: &AggregatePricing) -> AnalysisBreakdown {
    let total_usd: f64 = pools.iter().map(|p| p.liquidity.total_usd).sum();
    let total_native: f64 = pools.iter().map(|p| p.liquidity.total_native).sum();

    let mut per_protocol: HashMap<String, (usize, f64)> = HashMap::new();
    for pool in pools {
        let entry = per_protocol.entry(pool.protocol.clone()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += pool.liquidity.total_usd;
    }
    let mut distribution: Vec<ProtocolShare> = per_protocol
        .into_iter()
        .map(|(protocol, (count, usd))| ProtocolShare {
            protocol,
            pools: count,
            liquidity_usd: usd,
            share_pct: if total_usd > 0.0 {
                usd / total_usd * 100.0
            } else {
                0.0
            },
        })
        .collect();
    distribution.sort_by(|a, b| {
        b.liquidity_usd
            .partial_cmp(&a.liquidity_usd)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let price_spread_pct = if pricing.avg_price_usd > 0.0 {
        (pricing.max_price_usd - pricing.min_price_usd) / pricing.avg_price_usd * 100.0
    } else {
        0.0
    };

    AnalysisBreakdown {
        total_liquidity_usd: total_usd,
        total_liquidity_native: total_native,
        price_spread_pct,
        distribution,
    }
}

/// Walk the formed result and emit warnings, most severe first.
pub(crate) fn generate_warnings(result: &AnalysisResult, target: Address) -> Vec<Warning> {
    let mut warnings = Vec::new();

    if result.meta.partial_results {
        let failed: Vec<&str> = result
            .meta
            .protocol_status
            .iter()
            .filter(|(_, s)| s.status == FetchStatus::Failed)
            .map(|(name, _)| name.as_str())
            .collect();
        warnings.push(Warning::new(
            "PARTIAL_RESULTS",
            Severity::Medium,
            format!("protocol fetch failed for: {}", failed.join(", ")),
        ));
    }

    if result.meta.prices_stale {
        warnings.push(Warning::new(
            "STALE_PRICES",
            Severity::Medium,
            "oracle prices were stale during this analysis",
        ));
    }

    if result.performance.total_ms > 2000 {
        warnings.push(Warning::new(
            "SLOW_RESPONSE",
            Severity::Low,
            format!("analysis took {} ms", result.performance.total_ms),
        ));
    }

    if result.summary.active_pools == 0 {
        warnings.push(Warning::new(
            "NO_ACTIVE_POOLS",
            Severity::Critical,
            "no pool has usable liquidity for this token",
        ));
    }

    // Rug-pull sweep across all pools, independent of the scorer.
    let rug_pulled = result.pools.iter().any(|p| {
        p.target_amount(target) > 0.0
            && p.pair_amount(target) < min_pair_reserve(&p.pair_token(target).symbol)
    });
    if rug_pulled {
        warnings.push(Warning::new(
            "RUG_PULL_DETECTED",
            Severity::Critical,
            "at least one pool has had its pair-side liquidity drained",
        ));
    }

    if result
        .pools
        .iter()
        .any(|p| p.kind == ProtocolKind::V3 && p.liquidity.status == LiquidityStatus::Rugged)
    {
        warnings.push(Warning::new(
            "V3_RUGGED_POOLS",
            Severity::Critical,
            format!(
                "{} concentrated-liquidity pool(s) look abandoned",
                result.summary.rugged_pools
            ),
        ));
    }

    if let Some(best) = &result.best_pools.by_liquidity {
        if best.liquidity_usd < 1_000.0 {
            warnings.push(Warning::new(
                "EXTREMELY_LOW_LIQUIDITY",
                Severity::Critical,
                format!("best pool holds only ${:.0}", best.liquidity_usd),
            ));
        } else if best.liquidity_usd < 10_000.0 {
            warnings.push(Warning::new(
                "LOW_LIQUIDITY",
                Severity::High,
                format!("best pool holds only ${:.0}", best.liquidity_usd),
            ));
        } else if best.liquidity_usd < 50_000.0 {
            warnings.push(Warning::new(
                "MODERATE_LIQUIDITY",
                Severity::Medium,
                format!("best pool holds ${:.0}", best.liquidity_usd),
            ));
        }
    }

    if let Some(recommended) = &result.best_pools.recommended {
        let slippage = recommended.costs.slippage_pct;
        if slippage > 5.0 {
            warnings.push(Warning::new(
                "SLIPPAGE_CRITICAL",
                Severity::Critical,
                format!("estimated slippage {:.2}%", slippage),
            ));
        } else if slippage > 2.0 {
            warnings.push(Warning::new(
                "SLIPPAGE_HIGH",
                Severity::High,
                format!("estimated slippage {:.2}%", slippage),
            ));
        } else if slippage > 1.0 {
            warnings.push(Warning::new(
                "SLIPPAGE_MODERATE",
                Severity::Medium,
                format!("estimated slippage {:.2}%", slippage),
            ));
        }
    }

    if result.pricing.avg_price_usd > 0.0 {
        let spread_pct = (result.pricing.max_price_usd - result.pricing.min_price_usd)
            / result.pricing.avg_price_usd
            * 100.0;
        if spread_pct > 10.0 {
            warnings.push(Warning::new(
                "PRICE_SPREAD_HIGH",
                Severity::High,
                format!("cross-pool price spread {:.1}%", spread_pct),
            ));
        } else if spread_pct > 5.0 {
            warnings.push(Warning::new(
                "PRICE_SPREAD_MODERATE",
                Severity::Medium,
                format!("cross-pool price spread {:.1}%", spread_pct),
            ));
        }
    }

    if result.summary.active_pools == 1 {
        warnings.push(Warning::new(
            "SINGLE_POOL",
            Severity::Medium,
            "all liquidity is concentrated in a single pool",
        ));
    }

    warnings.sort_by(|a, b| b.severity.cmp(&a.severity));
    warnings
}
