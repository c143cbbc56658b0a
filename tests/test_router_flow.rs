//! Router integration tests: multi-hop planning over live analyses from the
//! in-memory chain, and the route pre-warm cycle.

mod common;

use std::sync::Arc;

use eyre::Result;

use poolscope::config::Config;
use poolscope::route_cache::RouteCache;
use poolscope::service::AnalyticsService;
use poolscope::tokens::WRAPPED_NATIVE;
use poolscope::types::RouteKind;

use common::mocks::{addr, e18, register_token, register_v2_pool, MockChain};

/// Two tokens, each pooled against WBNB.
fn two_token_world(chain: &MockChain) {
    let wrapper = WRAPPED_NATIVE.address_parsed();
    let t_in = addr(1);
    let t_out = addr(2);
    register_token(chain, t_in, "TIN", 18);
    register_token(chain, t_out, "TOUT", 18);
    // 300k TIN vs 1000 WBNB and 300k TOUT vs 1000 WBNB: both ≈ $1 tokens
    // against the $300 wrapped-native seed.
    register_v2_pool(chain, addr(0x60), t_in, wrapper, e18(300_000), e18(1000));
    register_v2_pool(chain, addr(0x61), t_out, wrapper, e18(300_000), e18(1000));
}

fn service_over(chain: Arc<MockChain>) -> AnalyticsService {
    common::init_tracing();
    AnalyticsService::from_parts(chain, Config::default(), 1)
}

#[tokio::test]
async fn routes_through_the_wrapped_native_intermediate() -> Result<()> {
    let chain = Arc::new(MockChain::new());
    two_token_world(&chain);
    let service = service_over(chain);

    let plan = service
        .router()
        .find_best_route(addr(1), addr(2), 100.0)
        .await?;

    assert_eq!(plan.best.kind, RouteKind::TwoHop);
    assert_eq!(plan.best.legs.len(), 2);
    assert_eq!(plan.best.path.len(), 3);
    assert_eq!(plan.best.path[1].address, WRAPPED_NATIVE.address_parsed());
    assert!(plan.best.estimated_output > 0.0);
    // 100 TIN ≈ $100 through two deep pools: output lands near 100 TOUT
    // less fees and impact.
    assert!(plan.best.estimated_output > 90.0);
    assert!(plan.best.estimated_output < 100.0);
    Ok(())
}

#[tokio::test]
async fn direct_pool_beats_the_two_hop_detour() -> Result<()> {
    let chain = Arc::new(MockChain::new());
    let wrapper = WRAPPED_NATIVE.address_parsed();
    let usdt = poolscope::tokens::KNOWN_TOKENS[1].address_parsed();
    let t_in = addr(1);
    register_token(&chain, t_in, "TIN", 18);
    // TIN/WBNB and USDT/WBNB support the two-hop detour…
    register_v2_pool(&chain, addr(0x60), t_in, wrapper, e18(300_000), e18(1000));
    register_v2_pool(&chain, addr(0x63), usdt, wrapper, e18(3_000_000), e18(10_000));
    // …but a deep direct TIN/USDT pool exists too.
    register_v2_pool(&chain, addr(0x62), t_in, usdt, e18(200_000), e18(200_000));
    let service = service_over(chain);

    let plan = service
        .router()
        .find_best_route(t_in, usdt, 100.0)
        .await?;

    assert_eq!(plan.best.kind, RouteKind::Direct);
    assert_eq!(plan.best.legs.len(), 1);
    assert!(!plan.alternatives.is_empty(), "two-hop remains as alternative");
    assert!(plan
        .alternatives
        .iter()
        .all(|alt| alt.score <= plan.best.score));
    Ok(())
}

#[tokio::test]
async fn unroutable_pair_is_a_typed_error() {
    let chain = Arc::new(MockChain::new());
    // Only TIN has a pool; TOUT is completely unknown.
    let wrapper = WRAPPED_NATIVE.address_parsed();
    register_token(&chain, addr(1), "TIN", 18);
    register_v2_pool(&chain, addr(0x60), addr(1), wrapper, e18(1000), e18(10));
    let service = service_over(chain);

    let result = service
        .router()
        .find_best_route(addr(1), addr(2), 100.0)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn route_prewarm_cycle_fills_and_serves_the_pair_store() -> Result<()> {
    let chain = Arc::new(MockChain::new());
    two_token_world(&chain);
    let service = service_over(chain);

    let route_cache = Arc::new(
        RouteCache::new(
            service.router().clone(),
            service.analyzer().cache().clone(),
            Config::default().router,
        )
        .with_pairs(vec![(addr(1), addr(2))]),
    );

    assert!(route_cache.get(addr(1), addr(2)).is_none());
    route_cache.refresh_cycle().await;

    let plan = route_cache
        .get(addr(1), addr(2))
        .expect("pair pre-warmed by the cycle");
    assert_eq!(plan.best.kind, RouteKind::TwoHop);

    // The reverse direction was not in the curated set.
    assert!(route_cache.get(addr(2), addr(1)).is_none());
    Ok(())
}
