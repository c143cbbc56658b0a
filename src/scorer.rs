//! # Pool Scorer
//!
//! Trade-size-aware scoring of individual pools: estimated execution cost
//! (fee + slippage), a battery of safety checks that burn down a 100-point
//! safety score, a risk-level ladder, and the selection of the recommended
//! pool plus the default best-by-criterion variants.
//!
//! Rugged pools are excluded from every selection, regardless of any other
//! metric.

use std::collections::HashMap;

use ethers::types::Address;
use tracing::debug;

use crate::tokens::{is_stablecoin, is_wrapped_native, min_pair_reserve};
use crate::types::{
    AggregatePricing, BestPools, LiquidityStatus, Pool, PoolEvaluation, PoolRef, PoolState,
    RiskLevel, SafetyReport, SandwichRisk, Severity, TradeCosts, TradeSize, Warning,
};

//================================================================================================//
//                                         CONSTANTS                                              //
//================================================================================================//

/// V2 slippage model: `(trade / liquidity) × 50` percent.
const V2_SLIPPAGE_FACTOR: f64 = 50.0;
/// Concentrated liquidity is assumed this much more capital-efficient.
const V3_EFFICIENCY_FACTOR: f64 = 5.0;
/// Slippage assigned to effectively untradeable pools.
const UNTRADEABLE_SLIPPAGE_PCT: f64 = 50.0;

const MIN_SAFETY_FOR_TRADE: f64 = 30.0;
const MIN_LIQUIDITY_RATIO_FOR_TRADE: f64 = 0.1;

//================================================================================================//
//                                           SCORER                                               //
//================================================================================================//

#[derive(Debug, Default)]
pub struct PoolScorer;

impl PoolScorer {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one pool for a trade of `trade_usd`.
    pub fn evaluate(
        &self,
        pool: &Pool,
        target: Address,
        trade_usd: f64,
        aggregate: &AggregatePricing,
    ) -> PoolEvaluation {
        let liquidity_usd = pool.liquidity.total_usd;
        let safety = self.safety_checks(pool, target, trade_usd, aggregate);

        let fee_pct = pool.fee_bps as f64 / 10_000.0;
        let slippage_pct = if safety.out_of_range {
            UNTRADEABLE_SLIPPAGE_PCT
        } else if liquidity_usd > 0.0 {
            let base = trade_usd / liquidity_usd * V2_SLIPPAGE_FACTOR;
            match pool.kind {
                crate::types::ProtocolKind::V2 => base,
                crate::types::ProtocolKind::V3 => base / V3_EFFICIENCY_FACTOR,
            }
        } else {
            UNTRADEABLE_SLIPPAGE_PCT
        };
        let total_cost_pct = fee_pct + slippage_pct;
        let costs = TradeCosts {
            fee_pct,
            slippage_pct,
            total_cost_pct,
            fee_usd: trade_usd * fee_pct / 100.0,
            slippage_usd: trade_usd * slippage_pct / 100.0,
            total_cost_usd: trade_usd * total_cost_pct / 100.0,
        };

        let liquidity_ratio = if trade_usd > 0.0 {
            liquidity_usd / trade_usd
        } else {
            0.0
        };
        let tradeable = !safety.is_untradeable
            && liquidity_usd >= MIN_LIQUIDITY_RATIO_FOR_TRADE * trade_usd
            && safety.safety_score >= MIN_SAFETY_FOR_TRADE;

        let risk_level = risk_level(
            liquidity_ratio,
            safety.safety_score,
            safety.sandwich_risk,
            trade_usd,
        );

        let base = (100.0 - total_cost_pct * 10.0
            + if liquidity_ratio > 50.0 { 10.0 } else { 0.0 })
        .max(0.0);
        let score = base * safety.safety_score / 100.0;

        let protection = protection_advice(&safety, liquidity_ratio);
        let reason = format!(
            "fee {:.3}% + slippage {:.3}% at ${:.0}",
            fee_pct, slippage_pct, trade_usd
        );

        PoolEvaluation {
            pool: PoolRef::from_pool(pool),
            trade_usd,
            trade_size: TradeSize::classify(trade_usd),
            score,
            costs,
            tradeable,
            risk_level,
            safety,
            protection,
            reason,
        }
    }

    /// Accumulate safety warnings and deduct from the 100-point score.
    fn safety_checks(
        &self,
        pool: &Pool,
        target: Address,
        trade_usd: f64,
        aggregate: &AggregatePricing,
    ) -> SafetyReport {
        let mut warnings: Vec<Warning> = Vec::new();
        let mut deductions = 0.0_f64;
        let mut is_untradeable = false;
        let mut out_of_range = false;
        let mut rug_pull_detected = false;
        let liquidity_usd = pool.liquidity.total_usd;

        // 1. V3 with no in-range liquidity is unswappable outright.
        if let PoolState::V3 { liquidity: 0, .. } = pool.state {
            warnings.push(Warning::new(
                "V3_NO_LIQUIDITY_IN_RANGE",
                Severity::Critical,
                "pool has zero liquidity in the active range",
            ));
            deductions += 50.0;
            is_untradeable = true;
            out_of_range = true;
        }

        // 2. Deviation from the aggregate consensus price.
        if pool.price.in_usd > 0.0 && aggregate.avg_price_usd > 0.0 {
            let deviation_pct =
                (pool.price.in_usd - aggregate.avg_price_usd).abs() / aggregate.avg_price_usd
                    * 100.0;
            if deviation_pct > 10.0 {
                warnings.push(Warning::new(
                    "PRICE_MANIPULATION_RISK",
                    Severity::Critical,
                    format!("price deviates {:.1}% from aggregate", deviation_pct),
                ));
                deductions += 40.0;
            } else if deviation_pct > 5.0 {
                warnings.push(Warning::new(
                    "PRICE_DEVIATION_HIGH",
                    Severity::High,
                    format!("price deviates {:.1}% from aggregate", deviation_pct),
                ));
                deductions += 20.0;
            } else if deviation_pct > 2.0 {
                warnings.push(Warning::new(
                    "PRICE_DEVIATION_MODERATE",
                    Severity::Medium,
                    format!("price deviates {:.1}% from aggregate", deviation_pct),
                ));
                deductions += 5.0;
            }
        }

        // 3. Sandwich exposure scales with trade-to-liquidity ratio.
        let consumption = if liquidity_usd > 0.0 {
            trade_usd / liquidity_usd
        } else {
            1.0
        };
        let sandwich_risk = if consumption > 0.10 {
            deductions += 30.0;
            warnings.push(Warning::new(
                "SANDWICH_RISK_CRITICAL",
                Severity::Critical,
                format!("trade consumes {:.1}% of pool liquidity", consumption * 100.0),
            ));
            SandwichRisk::Critical
        } else if consumption > 0.05 {
            deductions += 15.0;
            warnings.push(Warning::new(
                "SANDWICH_RISK_HIGH",
                Severity::High,
                format!("trade consumes {:.1}% of pool liquidity", consumption * 100.0),
            ));
            SandwichRisk::High
        } else if consumption > 0.01 {
            SandwichRisk::Medium
        } else {
            SandwichRisk::Low
        };

        // 4. Absolute liquidity depth.
        if liquidity_usd < 1_000.0 {
            warnings.push(Warning::new(
                "EXTREMELY_LOW_LIQUIDITY",
                Severity::Critical,
                format!("pool holds only ${:.0}", liquidity_usd),
            ));
            deductions += 30.0;
        } else if liquidity_usd < 10_000.0 {
            warnings.push(Warning::new(
                "LOW_LIQUIDITY",
                Severity::High,
                format!("pool holds only ${:.0}", liquidity_usd),
            ));
            deductions += 15.0;
        }

        // 5. Rug-pull: the pair side has been drained below its per-symbol
        //    minimum while the target side still holds supply.
        let pair_symbol = pool.pair_token(target).symbol.clone();
        let pair_amount = pool.pair_amount(target);
        let target_amount = pool.target_amount(target);
        if target_amount > 0.0 && pair_amount < min_pair_reserve(&pair_symbol) {
            warnings.push(Warning::new(
                "RUG_PULL_DETECTED",
                Severity::Critical,
                format!(
                    "pair-side reserve {:.6} {} below plausible minimum",
                    pair_amount, pair_symbol
                ),
            ));
            rug_pull_detected = true;
            is_untradeable = true;
        }

        // 6. Non-active liquidity status.
        if pool.liquidity.status != LiquidityStatus::Active {
            warnings.push(Warning::new(
                "POOL_INACTIVE",
                Severity::Medium,
                format!("pool status is {:?}", pool.liquidity.status),
            ));
            deductions += 20.0;
        }

        // 7. Large trades against volatile pairs.
        let pair_address = pool.pair_token(target).address;
        if trade_usd > 10_000.0
            && !is_stablecoin(pair_address)
            && !is_wrapped_native(pair_address)
        {
            warnings.push(Warning::new(
                "VOLATILE_PAIR_FOR_LARGE_TRADE",
                Severity::Medium,
                format!("${:.0} trade against volatile pair {}", trade_usd, pair_symbol),
            ));
            deductions += 10.0;
        }

        // 8. Fee sanity.
        if pool.fee_bps > 10_000 {
            warnings.push(Warning::new(
                "UNUSUALLY_HIGH_FEE",
                Severity::High,
                format!("fee tier {} bps", pool.fee_bps),
            ));
            deductions += 15.0;
        }

        let safety_score = if rug_pull_detected {
            0.0
        } else {
            (100.0 - deductions).max(0.0)
        };

        SafetyReport {
            safety_score,
            sandwich_risk,
            is_untradeable,
            out_of_range,
            rug_pull_detected,
            warnings,
        }
    }

    /// Recommended pool: lowest total cost among tradeable candidates,
    /// ties broken by deeper liquidity. When nothing is tradeable, the first
    /// candidate is returned zero-scored so callers still see the costs.
    pub fn recommend(
        &self,
        pools: &[Pool],
        target: Address,
        trade_usd: f64,
        aggregate: &AggregatePricing,
    ) -> Option<PoolEvaluation> {
        let evaluations: Vec<PoolEvaluation> = pools
            .iter()
            .filter(|p| p.liquidity.status != LiquidityStatus::Rugged)
            .map(|p| self.evaluate(p, target, trade_usd, aggregate))
            .collect();
        if evaluations.is_empty() {
            return None;
        }

        let mut tradeable: Vec<&PoolEvaluation> =
            evaluations.iter().filter(|e| e.tradeable).collect();
        tradeable.sort_by(|a, b| {
            a.costs
                .total_cost_pct
                .partial_cmp(&b.costs.total_cost_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.pool
                        .liquidity_usd
                        .partial_cmp(&a.pool.liquidity_usd)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        if let Some(best) = tradeable.first() {
            debug!(
                pool = %best.pool.address,
                cost_pct = best.costs.total_cost_pct,
                "recommendation selected"
            );
            return Some((*best).clone());
        }

        let mut fallback = evaluations.into_iter().next().expect("non-empty");
        fallback.score = 0.0;
        fallback.reason = "No optimal pool found".to_string();
        Some(fallback)
    }

    /// The default best-by-criterion variants returned alongside the
    /// recommendation.
    pub fn best_pools(
        &self,
        pools: &[Pool],
        target: Address,
        trade_usd: f64,
        aggregate: &AggregatePricing,
    ) -> BestPools {
        let usable: Vec<&Pool> = pools
            .iter()
            .filter(|p| p.liquidity.status != LiquidityStatus::Rugged)
            .collect();

        let by_liquidity = usable
            .iter()
            .max_by(|a, b| {
                compare_f64(a.liquidity.total_usd, b.liquidity.total_usd).then_with(|| {
                    // With no USD valuation anywhere, fall back to raw size.
                    compare_f64(
                        a.liquidity.token0_amount + a.liquidity.token1_amount,
                        b.liquidity.token0_amount + b.liquidity.token1_amount,
                    )
                })
            })
            .map(|p| PoolRef::from_pool(p));

        let by_price_usd = usable
            .iter()
            .filter(|p| p.price.in_usd > 0.0)
            .max_by(|a, b| compare_f64(a.price.in_usd, b.price.in_usd))
            .map(|p| PoolRef::from_pool(p));

        let by_price_native = usable
            .iter()
            .filter(|p| p.price.in_native > 0.0)
            .max_by(|a, b| compare_f64(a.price.in_native, b.price.in_native))
            .map(|p| PoolRef::from_pool(p));

        let by_fee = usable
            .iter()
            .min_by_key(|p| p.fee_bps)
            .map(|p| PoolRef::from_pool(p));

        let mut by_protocol: HashMap<String, PoolRef> = HashMap::new();
        for pool in &usable {
            let entry = by_protocol.entry(pool.protocol.clone());
            match entry {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(PoolRef::from_pool(pool));
                }
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    if pool.liquidity.total_usd > slot.get().liquidity_usd {
                        slot.insert(PoolRef::from_pool(pool));
                    }
                }
            }
        }

        BestPools {
            by_liquidity,
            by_price_usd,
            by_price_native,
            by_fee,
            by_protocol,
            recommended: self.recommend(pools, target, trade_usd, aggregate),
        }
    }
}

//================================================================================================//
//                                          HELPERS                                               //
//================================================================================================//

fn compare_f64(a: f64, b: f64) -> std::cmp::Ordering {
    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
}

/// Risk ladder: seeded from the liquidity ratio, then only ever upgraded by
/// safety score, sandwich risk, and trade size.
fn risk_level(
    liquidity_ratio: f64,
    safety_score: f64,
    sandwich_risk: SandwichRisk,
    trade_usd: f64,
) -> RiskLevel {
    let mut level = if liquidity_ratio < 5.0 {
        RiskLevel::High
    } else if liquidity_ratio < 20.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    if safety_score < 50.0 || sandwich_risk == SandwichRisk::Critical {
        level = RiskLevel::Critical;
    } else if safety_score < 70.0 || sandwich_risk == SandwichRisk::High {
        level = level.max(RiskLevel::High);
    } else if safety_score < 85.0 && level == RiskLevel::Low {
        level = RiskLevel::Medium;
    }
    if trade_usd > 50_000.0 && level == RiskLevel::Low {
        level = RiskLevel::Medium;
    }
    level
}

fn protection_advice(safety: &SafetyReport, liquidity_ratio: f64) -> Vec<String> {
    let mut advice = Vec::new();
    if safety.rug_pull_detected {
        advice.push("do not trade: counter-liquidity has been removed".to_string());
        return advice;
    }
    match safety.sandwich_risk {
        SandwichRisk::Critical | SandwichRisk::High => {
            advice.push("split the order or route through a private relay".to_string());
            advice.push("use a tight slippage tolerance".to_string());
        }
        SandwichRisk::Medium => {
            advice.push("use a moderate slippage tolerance".to_string());
        }
        SandwichRisk::Low => {}
    }
    if liquidity_ratio < 5.0 {
        advice.push("reduce the trade size relative to pool depth".to_string());
    }
    advice
}
