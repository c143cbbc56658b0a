//! # Route Pre-Warmer
//!
//! Background loop that periodically refreshes route plans for a small
//! curated set of ordered token pairs. A refresh cycle first analyzes each
//! unique token once (in parallel), then walks the pair list against the
//! now-warm analyses. Cycles are single-flight (an overlapping trigger is a
//! no-op) and the loop stops cleanly through a cancellation token.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ethers::types::Address;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{AnalyticsCache, PoolEntry};
use crate::config::RouterSettings;
use crate::router::Router;
use crate::tokens::{DISCOVERY_BASES, ECOSYSTEM_TOKEN, WRAPPED_NATIVE};
use crate::types::RoutePlan;

pub struct RouteCache {
    router: Arc<Router>,
    cache: Arc<AnalyticsCache>,
    settings: RouterSettings,
    pairs: Vec<(Address, Address)>,
    is_refreshing: AtomicBool,
    cancel: CancellationToken,
}

/// Default pre-warm set: wrapped native against each base, plus the
/// ecosystem token against the deepest stable. Ordered pairs, both
/// directions are distinct entries.
fn default_pairs() -> Vec<(Address, Address)> {
    let wrapper = WRAPPED_NATIVE.address_parsed();
    let eco = ECOSYSTEM_TOKEN.address_parsed();
    let mut pairs = Vec::new();
    for base in DISCOVERY_BASES.iter().filter(|b| !b.is_native_wrapper) {
        let other = base.address_parsed();
        pairs.push((wrapper, other));
        pairs.push((other, wrapper));
    }
    let usdt = DISCOVERY_BASES[1].address_parsed();
    pairs.push((eco, usdt));
    pairs.push((usdt, eco));
    pairs
}

impl RouteCache {
    pub fn new(router: Arc<Router>, cache: Arc<AnalyticsCache>, settings: RouterSettings) -> Self {
        Self {
            router,
            cache,
            settings,
            pairs: default_pairs(),
            is_refreshing: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_pairs(mut self, pairs: Vec<(Address, Address)>) -> Self {
        self.pairs = pairs;
        self
    }

    /// Cached plan for an ordered pair, if pre-warmed and fresh.
    pub fn get(&self, token_in: Address, token_out: Address) -> Option<Arc<RoutePlan>> {
        self.cache
            .pools
            .get(&AnalyticsCache::route_key(token_in, token_out))
            .and_then(|entry| entry.as_routes())
    }

    /// Spawn the background refresh loop. The first cycle runs after one
    /// full interval, not at startup; warm-up handles the initial fill.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.settings.refresh_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => {
                        info!("route pre-warmer stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        this.refresh_cycle().await;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// One refresh cycle. Overlapping invocations return immediately.
    pub async fn refresh_cycle(&self) {
        if self
            .is_refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("route refresh already in progress, skipping cycle");
            return;
        }

        let unique_tokens: HashSet<Address> = self
            .pairs
            .iter()
            .flat_map(|(a, b)| [*a, *b])
            .collect();
        debug!(
            pairs = self.pairs.len(),
            tokens = unique_tokens.len(),
            "route refresh cycle starting"
        );

        // Analyze every token once, in parallel; pair routing below reuses
        // the cached analyses.
        let analyzer = self.router.analyzer().clone();
        let warmups = unique_tokens.into_iter().map(|token| {
            let analyzer = analyzer.clone();
            async move {
                if let Err(e) = analyzer.analyze_token(token, false).await {
                    warn!(token = %token, error = %e, "pre-warm analysis failed");
                }
            }
        });
        join_all(warmups).await;

        let mut refreshed = 0usize;
        for (token_in, token_out) in &self.pairs {
            match self.router.find_best_route(*token_in, *token_out, 1.0).await {
                Ok(plan) => {
                    let key = AnalyticsCache::route_key(*token_in, *token_out);
                    if let Err(e) = self.cache.pools.insert_with_ttl(
                        &key,
                        PoolEntry::Routes(Arc::new(plan)),
                        self.settings.route_ttl(),
                    ) {
                        warn!(error = %e, "failed to cache pre-warmed route");
                    } else {
                        refreshed += 1;
                    }
                }
                Err(e) => {
                    debug!(token_in = %token_in, token_out = %token_out, error = %e, "no route for pre-warm pair");
                }
            }
        }

        // Piggyback the periodic cache sweep on the refresh cadence.
        let purged = self.cache.purge_expired();
        info!(refreshed, purged, "route refresh cycle complete");
        self.is_refreshing.store(false, Ordering::SeqCst);
    }
}

impl Drop for RouteCache {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pairs_are_ordered_and_unique() {
        let pairs = default_pairs();
        let set: HashSet<(Address, Address)> = pairs.iter().copied().collect();
        assert_eq!(set.len(), pairs.len());
        // Both directions exist for the wrapper/USDT pair.
        let wrapper = WRAPPED_NATIVE.address_parsed();
        let usdt = DISCOVERY_BASES[1].address_parsed();
        assert!(set.contains(&(wrapper, usdt)));
        assert!(set.contains(&(usdt, wrapper)));
    }
}
