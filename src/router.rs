//! # Multi-Hop Router
//!
//! Plans 1-, 2-, and 3-hop swap routes between two arbitrary tokens on top
//! of cached analyses. Two-hop routes go through the primary intermediates
//! (wrapped native and the deepest stables); three-hop routes through the
//! secondary set are attempted only when everything else scores poorly.
//!
//! Output estimation uses the independent-legs approximation:
//! `out = in × price × (1 − fee) × (1 − impact)` per leg, with the impact
//! capped at 50% of the swap value. It is not exact slippage composition.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ethers::types::Address;
use tracing::{debug, instrument, warn};

use crate::analyzer::Analyzer;
use crate::errors::RouteError;
use crate::tokens::{ROUTING_PRIMARY, ROUTING_SECONDARY};
use crate::types::{
    AnalysisResult, Pool, PoolRef, Route, RouteKind, RouteLeg, RoutePlan, TokenInfo,
};

//================================================================================================//
//                                         CONSTANTS                                              //
//================================================================================================//

/// Maximum share of the swap value counted as price impact on one leg.
const MAX_LEG_IMPACT: f64 = 0.5;
/// Liquidity tie band for leg-pool selection: within this, prefer lower fee.
const LEG_LIQUIDITY_TIE_USD: f64 = 1000.0;
/// Three-hop fallback triggers when no route reaches this score.
const FALLBACK_SCORE_THRESHOLD: f64 = 50.0;
const MAX_ALTERNATIVES: usize = 3;

//================================================================================================//
//                                           ROUTER                                               //
//================================================================================================//

pub struct Router {
    analyzer: Arc<Analyzer>,
}

impl Router {
    pub fn new(analyzer: Arc<Analyzer>) -> Self {
        Self { analyzer }
    }

    pub fn analyzer(&self) -> &Arc<Analyzer> {
        &self.analyzer
    }

    /// Find the best route and up to three alternatives for swapping
    /// `amount_in` (token units) of `token_in` into `token_out`.
    #[instrument(skip(self), fields(token_in = %token_in, token_out = %token_out))]
    pub async fn find_best_route(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: f64,
    ) -> Result<RoutePlan, RouteError> {
        // Analyze both sides in parallel; a failed side is dropped and the
        // routes that needed it simply don't materialize.
        let (in_result, out_result) = tokio::join!(
            self.analyzer.analyze_token(token_in, false),
            self.analyzer.analyze_token(token_out, false),
        );
        let in_analysis = match in_result {
            Ok(a) => Some(a),
            Err(e) => {
                warn!(error = %e, "token_in analysis failed, dropping that side");
                None
            }
        };
        let out_analysis = match out_result {
            Ok(a) => Some(a),
            Err(e) => {
                warn!(error = %e, "token_out analysis failed, dropping that side");
                None
            }
        };

        let token_in_info = in_analysis
            .as_ref()
            .map(|a| a.token.clone())
            .unwrap_or_else(|| TokenInfo::unknown(token_in));
        let token_out_info = out_analysis
            .as_ref()
            .map(|a| a.token.clone())
            .unwrap_or_else(|| TokenInfo::unknown(token_out));

        let usd_of = self.price_lookup(&[in_analysis.clone(), out_analysis.clone()]);
        let mut routes = plan_direct_and_two_hop(
            &token_in_info,
            &token_out_info,
            amount_in,
            in_analysis.as_deref(),
            out_analysis.as_deref(),
            &usd_of,
        );

        // Escalate to 3-hop only when nothing decent exists.
        let best_score = routes
            .iter()
            .map(|r| r.score)
            .fold(f64::NEG_INFINITY, f64::max);
        if routes.is_empty() || best_score < FALLBACK_SCORE_THRESHOLD {
            debug!("escalating to 3-hop candidates");
            let mut secondary_analyses: HashMap<Address, Arc<AnalysisResult>> = HashMap::new();
            for secondary in ROUTING_SECONDARY.iter() {
                let addr = secondary.address_parsed();
                match self.analyzer.analyze_token(addr, false).await {
                    Ok(a) => {
                        secondary_analyses.insert(addr, a);
                    }
                    Err(e) => warn!(error = %e, "secondary intermediate analysis failed"),
                }
            }
            let usd_of = self.price_lookup(&[
                in_analysis.clone(),
                out_analysis.clone(),
            ]);
            routes.extend(plan_three_hop(
                &token_in_info,
                &token_out_info,
                amount_in,
                in_analysis.as_deref(),
                out_analysis.as_deref(),
                &secondary_analyses,
                &usd_of,
            ));
        }

        routes.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let mut iter = routes.into_iter();
        let best = iter.next().ok_or(RouteError::NoRoute {
            token_in,
            token_out,
        })?;
        let alternatives: Vec<Route> = iter.take(MAX_ALTERNATIVES).collect();

        Ok(RoutePlan {
            token_in: token_in_info,
            token_out: token_out_info,
            amount_in,
            best,
            alternatives,
            timestamp: Utc::now(),
        })
    }

    /// USD price lookup: oracle first (bases), then the analysis aggregates
    /// at hand, then the short-lived price store.
    fn price_lookup(
        &self,
        analyses: &[Option<Arc<AnalysisResult>>],
    ) -> impl Fn(Address) -> Option<f64> {
        let oracle = self.analyzer.oracle().clone();
        let cache = self.analyzer.cache().clone();
        let aggregates: HashMap<Address, f64> = analyses
            .iter()
            .flatten()
            .filter(|a| a.pricing.avg_price_usd > 0.0)
            .map(|a| (a.token.address, a.pricing.avg_price_usd))
            .collect();
        move |token| {
            oracle
                .price_usd(token)
                .or_else(|| aggregates.get(&token).copied())
                .or_else(|| cache.prices.get(&crate::types::addr_key(token)))
        }
    }
}

//================================================================================================//
//                                       ROUTE BUILDING                                           //
//================================================================================================//

/// Best pool for one leg: deepest liquidity, with lower fee winning inside
/// the $1000 tie band.
fn best_leg_pool<'a>(analysis: &'a AnalysisResult, other: Address) -> Option<&'a Pool> {
    let mut candidates: Vec<&Pool> = analysis
        .active_pools()
        .filter(|p| p.involves(other))
        .collect();
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| {
        b.liquidity
            .total_usd
            .partial_cmp(&a.liquidity.total_usd)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let top_liquidity = candidates[0].liquidity.total_usd;
    candidates
        .into_iter()
        .take_while(|p| top_liquidity - p.liquidity.total_usd <= LEG_LIQUIDITY_TIE_USD)
        .min_by_key(|p| p.fee_bps)
}

/// Simplified single-leg estimate:
/// `out = in × price × (1 − feeFrac) × (1 − impactFrac)`,
/// `impactFrac = min(0.5, swapValueUSD / liquidityUSD)`.
pub(crate) fn estimate_leg_output(
    amount_in: f64,
    token_in: Address,
    pool: &Pool,
    usd_of: &impl Fn(Address) -> Option<f64>,
) -> (f64, f64) {
    let price = if pool.token0.address == token_in {
        pool.price.token0_price
    } else {
        pool.price.token1_price
    };
    let fee_frac = pool.fee_bps as f64 / 1_000_000.0;

    let swap_value_usd = usd_of(token_in).unwrap_or(0.0) * amount_in;
    let impact_frac = if pool.liquidity.total_usd > 0.0 {
        (swap_value_usd / pool.liquidity.total_usd).min(MAX_LEG_IMPACT)
    } else {
        MAX_LEG_IMPACT
    };

    let out = amount_in * price * (1.0 - fee_frac) * (1.0 - impact_frac);
    (out, impact_frac)
}

fn build_route(
    kind: RouteKind,
    path_tokens: Vec<TokenInfo>,
    pools: Vec<&Pool>,
    amount_in: f64,
    usd_of: &impl Fn(Address) -> Option<f64>,
) -> Route {
    let mut legs = Vec::with_capacity(pools.len());
    let mut amount = amount_in;
    let mut total_impact_frac = 0.0;
    let mut total_fee_bps = 0u32;

    for (i, pool) in pools.iter().enumerate() {
        let leg_in = &path_tokens[i];
        let leg_out = &path_tokens[i + 1];
        let (out, impact) = estimate_leg_output(amount, leg_in.address, pool, usd_of);
        legs.push(RouteLeg {
            token_in: leg_in.clone(),
            token_out: leg_out.clone(),
            pool: PoolRef::from_pool(pool),
            estimated_output: out,
            price_impact_pct: impact * 100.0,
            fee_bps: pool.fee_bps,
        });
        total_impact_frac += impact;
        total_fee_bps += pool.fee_bps;
        amount = out;
    }

    let mut route = Route {
        kind,
        path: path_tokens,
        legs,
        estimated_output: amount,
        price_impact_pct: total_impact_frac * 100.0,
        total_fee_bps,
        score: 0.0,
    };
    route.score = score_route(&route);
    route
}

fn plan_direct_and_two_hop(
    token_in: &TokenInfo,
    token_out: &TokenInfo,
    amount_in: f64,
    in_analysis: Option<&AnalysisResult>,
    out_analysis: Option<&AnalysisResult>,
    usd_of: &impl Fn(Address) -> Option<f64>,
) -> Vec<Route> {
    let mut routes = Vec::new();

    // Two-hop through every base both sides can reach.
    if let (Some(in_a), Some(out_a)) = (in_analysis, out_analysis) {
        let bases = ROUTING_PRIMARY
            .iter()
            .chain(ROUTING_SECONDARY.iter());
        for base in bases {
            let base_addr = base.address_parsed();
            if base_addr == token_in.address || base_addr == token_out.address {
                continue;
            }
            let first = best_leg_pool(in_a, base_addr);
            let second = best_leg_pool(out_a, base_addr);
            if let (Some(first), Some(second)) = (first, second) {
                routes.push(build_route(
                    RouteKind::TwoHop,
                    vec![token_in.clone(), base.token_info(), token_out.clone()],
                    vec![first, second],
                    amount_in,
                    usd_of,
                ));
            }
        }
    }

    // Direct pool between the two tokens.
    if let Some(in_a) = in_analysis {
        if let Some(direct) = best_leg_pool(in_a, token_out.address) {
            routes.push(build_route(
                RouteKind::Direct,
                vec![token_in.clone(), token_out.clone()],
                vec![direct],
                amount_in,
                usd_of,
            ));
        }
    }

    routes
}

fn plan_three_hop(
    token_in: &TokenInfo,
    token_out: &TokenInfo,
    amount_in: f64,
    in_analysis: Option<&AnalysisResult>,
    out_analysis: Option<&AnalysisResult>,
    secondary_analyses: &HashMap<Address, Arc<AnalysisResult>>,
    usd_of: &impl Fn(Address) -> Option<f64>,
) -> Vec<Route> {
    let (Some(in_a), Some(out_a)) = (in_analysis, out_analysis) else {
        return Vec::new();
    };
    let mut routes = Vec::new();

    for primary in ROUTING_PRIMARY.iter() {
        let primary_addr = primary.address_parsed();
        if primary_addr == token_in.address || primary_addr == token_out.address {
            continue;
        }
        for secondary in ROUTING_SECONDARY.iter() {
            let secondary_addr = secondary.address_parsed();
            if secondary_addr == token_in.address
                || secondary_addr == token_out.address
                || secondary_addr == primary_addr
            {
                continue;
            }
            let Some(secondary_a) = secondary_analyses.get(&secondary_addr) else {
                continue;
            };
            let first = best_leg_pool(in_a, primary_addr);
            let middle = best_leg_pool(secondary_a, primary_addr);
            let last = best_leg_pool(out_a, secondary_addr);
            if let (Some(first), Some(middle), Some(last)) = (first, middle, last) {
                routes.push(build_route(
                    RouteKind::ThreeHop,
                    vec![
                        token_in.clone(),
                        primary.token_info(),
                        secondary.token_info(),
                        token_out.clone(),
                    ],
                    vec![first, middle, last],
                    amount_in,
                    usd_of,
                ));
            }
        }
    }
    routes
}

//================================================================================================//
//                                        ROUTE SCORING                                           //
//================================================================================================//

fn min_leg_liquidity(route: &Route) -> f64 {
    route
        .legs
        .iter()
        .map(|l| l.pool.liquidity_usd)
        .fold(f64::INFINITY, f64::min)
}

/// Heuristic route score. Direct and 2-hop routes start from 100 with a
/// liquidity bonus up to +50 and a fee bonus up to +20; 3-hop routes start
/// from 70 with shallower ladders and a steeper impact penalty; direct
/// routes get a flat +40.
fn score_route(route: &Route) -> f64 {
    let min_liquidity = min_leg_liquidity(route);
    let total_fee_pct = route.total_fee_bps as f64 / 10_000.0;
    let impact_pct = route.price_impact_pct;

    let score = match route.kind {
        RouteKind::Direct | RouteKind::TwoHop => {
            let mut score: f64 = 100.0;
            score += if min_liquidity >= 1_000_000.0 {
                50.0
            } else if min_liquidity >= 250_000.0 {
                30.0
            } else if min_liquidity >= 50_000.0 {
                20.0
            } else {
                10.0
            };
            score += if total_fee_pct <= 0.1 {
                20.0
            } else if total_fee_pct <= 0.3 {
                15.0
            } else if total_fee_pct <= 0.6 {
                10.0
            } else {
                5.0
            };
            score -= 5.0 * impact_pct;
            if route.kind == RouteKind::Direct {
                score += 40.0;
            }
            score
        }
        RouteKind::ThreeHop => {
            let mut score: f64 = 70.0;
            score += if min_liquidity >= 1_000_000.0 {
                25.0
            } else if min_liquidity >= 250_000.0 {
                15.0
            } else if min_liquidity >= 50_000.0 {
                10.0
            } else {
                5.0
            };
            score += if total_fee_pct <= 0.1 {
                15.0
            } else if total_fee_pct <= 0.5 {
                10.0
            } else {
                5.0
            };
            score -= 7.0 * impact_pct;
            score
        }
    };
    score.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{addr, empty_analysis, token, v2_pool};
    use crate::tokens::{ROUTING_PRIMARY, WRAPPED_NATIVE};

    fn usd_table(entries: &[(Address, f64)]) -> impl Fn(Address) -> Option<f64> {
        let map: HashMap<Address, f64> = entries.iter().copied().collect();
        move |a| map.get(&a).copied()
    }

    fn analysis_with(target: Address, pools: Vec<Pool>) -> AnalysisResult {
        let mut a = empty_analysis(target);
        a.token = token("TK", target, 18);
        a.pools = pools;
        a
    }

    #[test]
    fn leg_estimate_applies_fee_and_impact() {
        let t = addr(1);
        let w = WRAPPED_NATIVE.address_parsed();
        // 0.002 WBNB per token, $100k pool, 0.25% fee.
        let pool = v2_pool(
            token("TGT", t, 18),
            token("WBNB", w, 18),
            100_000.0,
            200.0,
            100_000.0,
            0.6,
            2500,
        );
        let usd_of = usd_table(&[(t, 0.6)]);
        // $600 swap into a $100k pool: impact 0.6%.
        let (out, impact) = estimate_leg_output(1000.0, t, &pool, &usd_of);
        assert!((impact - 0.006).abs() < 1e-12);
        let expected = 1000.0 * 0.002 * (1.0 - 0.0025) * (1.0 - 0.006);
        assert!((out - expected).abs() < 1e-9);
    }

    #[test]
    fn leg_impact_is_capped() {
        let t = addr(1);
        let w = WRAPPED_NATIVE.address_parsed();
        let pool = v2_pool(
            token("TGT", t, 18),
            token("WBNB", w, 18),
            500.0,
            1.0,
            1_000.0,
            1.0,
            2500,
        );
        let usd_of = usd_table(&[(t, 1.0)]);
        let (_, impact) = estimate_leg_output(100_000.0, t, &pool, &usd_of);
        assert_eq!(impact, MAX_LEG_IMPACT);
    }

    #[test]
    fn leg_pool_tie_breaks_on_fee() {
        let t = addr(1);
        let w = WRAPPED_NATIVE.address_parsed();
        let mut a = analysis_with(t, Vec::new());
        let deep_expensive = v2_pool(
            token("TGT", t, 18),
            token("WBNB", w, 18),
            100_000.0,
            333.0,
            200_500.0,
            1.0,
            2500,
        );
        let cheap = v2_pool(
            token("TGT", t, 18),
            token("WBNB", w, 18),
            100_000.0,
            333.0,
            200_000.0,
            1.0,
            500,
        );
        a.pools = vec![deep_expensive.clone(), cheap.clone()];

        // $500 apart: inside the tie band, the lower fee wins.
        let best = best_leg_pool(&a, w).unwrap();
        assert_eq!(best.address, cheap.address);

        // Widen the gap beyond the band: depth wins again.
        a.pools[0].liquidity.total_usd = 250_000.0;
        let best = best_leg_pool(&a, w).unwrap();
        assert_eq!(best.address, a.pools[0].address);
    }

    #[test]
    fn direct_route_outscores_equivalent_two_hop() {
        let t_in = addr(1);
        let t_out = addr(2);
        let w = WRAPPED_NATIVE.address_parsed();
        let usd_of = usd_table(&[(t_in, 1.0), (t_out, 1.0)]);

        let direct_pool = v2_pool(
            token("TIN", t_in, 18),
            token("TOUT", t_out, 18),
            150_000.0,
            150_000.0,
            300_000.0,
            1.0,
            2500,
        );
        let in_leg = v2_pool(
            token("TIN", t_in, 18),
            token("WBNB", w, 18),
            150_000.0,
            500.0,
            300_000.0,
            1.0,
            2500,
        );
        let out_leg = v2_pool(
            token("TOUT", t_out, 18),
            token("WBNB", w, 18),
            150_000.0,
            500.0,
            300_000.0,
            1.0,
            2500,
        );

        let in_a = analysis_with(t_in, vec![direct_pool, in_leg]);
        let out_a = analysis_with(t_out, vec![out_leg]);

        let routes = plan_direct_and_two_hop(
            &token("TIN", t_in, 18),
            &token("TOUT", t_out, 18),
            1000.0,
            Some(&in_a),
            Some(&out_a),
            &usd_of,
        );

        let direct = routes.iter().find(|r| r.kind == RouteKind::Direct).unwrap();
        let two_hop = routes.iter().find(|r| r.kind == RouteKind::TwoHop).unwrap();
        assert!(direct.score > two_hop.score);
        assert_eq!(two_hop.legs.len(), 2);
        assert_eq!(two_hop.path[1].address, ROUTING_PRIMARY[0].address_parsed());
    }

    #[test]
    fn two_hop_needs_both_sides_active() {
        let t_in = addr(1);
        let t_out = addr(2);
        let w = WRAPPED_NATIVE.address_parsed();
        let usd_of = usd_table(&[(t_in, 1.0)]);

        let in_leg = v2_pool(
            token("TIN", t_in, 18),
            token("WBNB", w, 18),
            10_000.0,
            33.0,
            20_000.0,
            1.0,
            2500,
        );
        let in_a = analysis_with(t_in, vec![in_leg]);
        let out_a = analysis_with(t_out, Vec::new()); // no pools on the out side

        let routes = plan_direct_and_two_hop(
            &token("TIN", t_in, 18),
            &token("TOUT", t_out, 18),
            1000.0,
            Some(&in_a),
            Some(&out_a),
            &usd_of,
        );
        assert!(routes.is_empty());
    }

    #[test]
    fn three_hop_composes_through_primary_and_secondary() {
        let t_in = addr(1);
        let t_out = addr(2);
        let w = WRAPPED_NATIVE.address_parsed();
        let cake = crate::tokens::ECOSYSTEM_TOKEN.address_parsed();
        let usd_of = usd_table(&[(t_in, 1.0), (t_out, 1.0)]);

        let in_leg = v2_pool(
            token("TIN", t_in, 18),
            token("WBNB", w, 18),
            50_000.0,
            166.0,
            100_000.0,
            1.0,
            2500,
        );
        // CAKE's analysis holds the CAKE/WBNB middle leg.
        let middle = v2_pool(
            token("CAKE", cake, 18),
            token("WBNB", w, 18),
            50_000.0,
            416.0,
            250_000.0,
            2.5,
            2500,
        );
        let out_leg = v2_pool(
            token("CAKE", cake, 18),
            token("TOUT", t_out, 18),
            40_000.0,
            100_000.0,
            200_000.0,
            1.0,
            2500,
        );

        let in_a = analysis_with(t_in, vec![in_leg]);
        let out_a = analysis_with(t_out, vec![out_leg]);
        let mut secondary = HashMap::new();
        secondary.insert(cake, Arc::new(analysis_with(cake, vec![middle])));

        let routes = plan_three_hop(
            &token("TIN", t_in, 18),
            &token("TOUT", t_out, 18),
            1000.0,
            Some(&in_a),
            Some(&out_a),
            &secondary,
            &usd_of,
        );
        assert!(!routes.is_empty());
        let route = &routes[0];
        assert_eq!(route.kind, RouteKind::ThreeHop);
        assert_eq!(route.legs.len(), 3);
        assert_eq!(route.path.len(), 4);
        assert_eq!(route.total_fee_bps, 7500);
    }

    #[test]
    fn scores_reward_depth_and_punish_impact() {
        let t = addr(1);
        let w = WRAPPED_NATIVE.address_parsed();
        let usd_of = usd_table(&[(t, 1.0)]);
        let deep = v2_pool(
            token("TGT", t, 18),
            token("WBNB", w, 18),
            1_000_000.0,
            3_333.0,
            2_000_000.0,
            1.0,
            2500,
        );
        let shallow = v2_pool(
            token("TGT", t, 18),
            token("WBNB", w, 18),
            15_000.0,
            50.0,
            30_000.0,
            1.0,
            2500,
        );
        let info = |sym: &str, a: Address| token(sym, a, 18);
        let deep_route = build_route(
            RouteKind::Direct,
            vec![info("TGT", t), info("WBNB", w)],
            vec![&deep],
            1000.0,
            &usd_of,
        );
        let shallow_route = build_route(
            RouteKind::Direct,
            vec![info("TGT", t), info("WBNB", w)],
            vec![&shallow],
            1000.0,
            &usd_of,
        );
        assert!(deep_route.score > shallow_route.score);
    }
}
