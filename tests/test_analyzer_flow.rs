//! End-to-end analyzer tests over an in-memory chain: discovery → batched
//! fetch → enrichment → aggregation → scoring → warnings, plus the cache,
//! deduplication, and partial-failure behaviors.

mod common;

use std::sync::Arc;

use ethers::types::U256;
use eyre::Result;

use poolscope::config::Config;
use poolscope::service::{AnalyticsService, AnalyzeOptions, AnalyzeResponse};
use poolscope::tokens::WRAPPED_NATIVE;
use poolscope::types::{addr_display, FetchStatus, LiquidityStatus, ProtocolKind};

use common::mocks::{addr, e18, register_token, register_v2_pool, register_v3_pool, MockChain};

/// One healthy V2 pool: 1000 TGT against 2 WBNB.
fn world_with_balanced_pool(chain: &MockChain) {
    let target = addr(1);
    let wrapper = WRAPPED_NATIVE.address_parsed();
    register_token(chain, target, "TGT", 18);
    register_v2_pool(chain, addr(0x50), target, wrapper, e18(1000), e18(2));
}

fn service_over(chain: Arc<MockChain>) -> AnalyticsService {
    common::init_tracing();
    AnalyticsService::from_parts(chain, Config::default(), 1)
}

#[tokio::test]
async fn balanced_pool_end_to_end() -> Result<()> {
    let chain = Arc::new(MockChain::new());
    world_with_balanced_pool(&chain);
    let service = service_over(chain);
    let target = addr(1);

    let response = service
        .analyze(&addr_display(target), AnalyzeOptions::default())
        .await?;
    let AnalyzeResponse::Full(result) = response else {
        panic!("expected the full projection");
    };

    assert_eq!(result.token.symbol, "TGT");
    assert_eq!(result.summary.total_pools, 1);
    assert_eq!(result.summary.active_pools, 1);

    let pool = &result.pools[0];
    assert!(pool.token0.address < pool.token1.address);
    assert_eq!(pool.kind, ProtocolKind::V2);
    assert_eq!(pool.liquidity.status, LiquidityStatus::Active);
    // 2 WBNB at the $300 seed + 1000 TGT valued through the 0.002 ratio.
    assert!((pool.liquidity.total_usd - 1200.0).abs() < 1e-6);
    assert!((pool.price.price_ratio - 0.002).abs() < 1e-12);
    assert!((pool.price.in_usd - 0.6).abs() < 1e-9);

    // The single pool is both the liquidity best and the recommendation.
    let best = result.best_pools.by_liquidity.as_ref().unwrap();
    assert_eq!(best.address, pool.address);
    let recommended = result.best_pools.recommended.as_ref().unwrap();
    assert!(recommended.tradeable);
    assert!(result.warnings.iter().any(|w| w.code == "SINGLE_POOL"));

    // Aggregate price invariants over the returned set.
    assert!(result.pricing.min_price_usd <= pool.price.in_usd);
    assert!(pool.price.in_usd <= result.pricing.max_price_usd);
    Ok(())
}

#[tokio::test]
async fn concurrent_analyzes_share_one_upstream_fetch() -> Result<()> {
    // Reference run: one analysis alone.
    let reference_chain = Arc::new(MockChain::new());
    world_with_balanced_pool(&reference_chain);
    let reference = service_over(reference_chain.clone());
    reference
        .analyzer()
        .analyze_token(addr(1), false)
        .await?;
    let single_run_batches = reference_chain.batch_count();

    // Two concurrent callers: same number of upstream batches.
    let chain = Arc::new(MockChain::new());
    world_with_balanced_pool(&chain);
    let service = service_over(chain.clone());
    let analyzer = service.analyzer();
    let (a, b) = tokio::join!(
        analyzer.analyze_token(addr(1), false),
        analyzer.analyze_token(addr(1), false),
    );
    let a = a?;
    let b = b?;

    assert_eq!(chain.batch_count(), single_run_batches);
    assert_ne!(
        a.meta.deduplicated, b.meta.deduplicated,
        "exactly one caller is the leader"
    );
    assert_eq!(a.pools, b.pools);
    assert_eq!(a.pricing, b.pricing);
    Ok(())
}

#[tokio::test]
async fn repeat_analysis_within_ttl_is_served_from_cache() -> Result<()> {
    let chain = Arc::new(MockChain::new());
    world_with_balanced_pool(&chain);
    let service = service_over(chain.clone());
    let analyzer = service.analyzer();

    let first = analyzer.analyze_token(addr(1), false).await?;
    let batches_after_first = chain.batch_count();
    let second = analyzer.analyze_token(addr(1), false).await?;

    assert_eq!(chain.batch_count(), batches_after_first, "no new upstream work");
    assert!(!first.meta.cached);
    assert!(second.meta.cached);
    // Identical payloads apart from the cache annotations.
    assert_eq!(first.pools, second.pools);
    assert_eq!(first.pricing, second.pricing);
    assert_eq!(first.summary, second.summary);
    Ok(())
}

#[tokio::test]
async fn force_refresh_invalidates_and_refetches() -> Result<()> {
    let chain = Arc::new(MockChain::new());
    world_with_balanced_pool(&chain);
    let service = service_over(chain.clone());
    let analyzer = service.analyzer();

    analyzer.analyze_token(addr(1), false).await?;
    let batches_after_first = chain.batch_count();

    let refreshed = analyzer.analyze_token(addr(1), true).await?;
    assert!(chain.batch_count() > batches_after_first, "upstream refetched");
    assert!(!refreshed.meta.cached);
    Ok(())
}

#[tokio::test]
async fn failed_protocol_still_returns_partial_results() -> Result<()> {
    let chain = Arc::new(MockChain::new());
    let target = addr(1);
    let wrapper = WRAPPED_NATIVE.address_parsed();
    register_token(&chain, target, "TGT", 18);
    register_v2_pool(&chain, addr(0x50), target, wrapper, e18(1000), e18(2));
    register_v3_pool(
        &chain,
        addr(0x51),
        target,
        wrapper,
        2500,
        10u128.pow(18),
        U256::one() << 96,
        0,
        e18(100),
        e18(100),
    );

    // Every V3 state batch reads fee(); poisoning the selector downs the
    // whole protocol while V2 keeps answering.
    let fee_calldata = poolscope::abi::fee();
    let mut fee_selector = [0u8; 4];
    fee_selector.copy_from_slice(&fee_calldata[..4]);
    chain.poison_selector(fee_selector);

    let service = service_over(chain);
    let result = service.analyzer().analyze_token(target, false).await?;

    assert!(result.meta.partial_results);
    assert_eq!(result.summary.total_pools, 1);
    assert_eq!(result.pools[0].kind, ProtocolKind::V2);
    assert_eq!(
        result.meta.protocol_status["v3"].status,
        FetchStatus::Failed
    );
    assert!(result
        .warnings
        .iter()
        .any(|w| w.code == "PARTIAL_RESULTS"));
    Ok(())
}

#[tokio::test]
async fn rugged_v3_pool_is_flagged_and_excluded() -> Result<()> {
    let chain = Arc::new(MockChain::new());
    let target = addr(1);
    let wrapper = WRAPPED_NATIVE.address_parsed();
    register_token(&chain, target, "TGT", 18);
    register_v2_pool(&chain, addr(0x50), target, wrapper, e18(1000), e18(2));
    // Abandoned V3 pool: zero in-range liquidity.
    register_v3_pool(
        &chain,
        addr(0x51),
        target,
        wrapper,
        2500,
        0,
        U256::one() << 96,
        0,
        e18(500),
        e18(1),
    );

    let service = service_over(chain);
    let result = service.analyzer().analyze_token(target, false).await?;

    assert_eq!(result.summary.total_pools, 2);
    assert_eq!(result.summary.rugged_pools, 1);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.code == "V3_RUGGED_POOLS"));

    // Invariant: a rugged pool never appears in any best-pool selection.
    let rugged_addr = addr(0x51);
    let best = &result.best_pools;
    for candidate in [&best.by_liquidity, &best.by_price_usd, &best.by_fee] {
        if let Some(pool) = candidate {
            assert_ne!(pool.address, rugged_addr);
        }
    }
    if let Some(rec) = &best.recommended {
        assert_ne!(rec.pool.address, rugged_addr);
    }
    Ok(())
}

#[tokio::test]
async fn fast_projection_trims_to_top_pools() -> Result<()> {
    let chain = Arc::new(MockChain::new());
    world_with_balanced_pool(&chain);
    let service = service_over(chain);

    let response = service
        .analyze(
            &addr_display(addr(1)),
            AnalyzeOptions {
                fast: true,
                ..Default::default()
            },
        )
        .await?;
    let AnalyzeResponse::Fast(fast) = response else {
        panic!("expected the fast projection");
    };
    assert_eq!(fast.pool_count, 1);
    assert_eq!(fast.top_pools.len(), 1);
    assert!(fast.top_pools.len() <= 5);
    Ok(())
}
