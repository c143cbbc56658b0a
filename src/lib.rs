//! # poolscope
//!
//! Read-only analytics engine for AMM liquidity pools on a BNB-chain-shaped
//! EVM network. Given a token, it discovers every pool trading it against a
//! curated base set across constant-product pairs and concentrated-liquidity
//! pools, reconstructs pool state through batched RPC reads, derives prices
//! and TVL, scores pools for a given trade size with rug-pull/sandwich/price
//! safety checks, and plans multi-hop routes between arbitrary tokens.
//!
//! The engine never submits transactions; it only reads chain state. The
//! HTTP transport, authentication, and rate limiting live outside this crate
//! and consume [`service::AnalyticsService`].
//!
//! ## Construction
//!
//! ```no_run
//! use poolscope::config::Config;
//! use poolscope::service::AnalyticsService;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let service = AnalyticsService::new(Config::from_env()?)?;
//! service.warm_up().await;
//! let handle = service.spawn_route_prewarmer();
//! # let _ = handle;
//! # Ok(())
//! # }
//! ```

pub mod abi;
pub mod analyzer;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod dex_math;
pub mod errors;
pub mod fetcher;
pub mod multicall;
pub mod price_oracle;
pub mod route_cache;
pub mod router;
pub mod rpc;
pub mod scorer;
pub mod service;
pub mod token_registry;
pub mod tokens;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::AnalyticsError;
pub use service::AnalyticsService;
