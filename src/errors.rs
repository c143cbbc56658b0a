//! # Centralized Error Handling
//!
//! One typed enum per subsystem plus a top-level `AnalyticsError` wrapper.
//! Keeping the taxonomy in a single module prevents string-typed errors from
//! leaking across component boundaries and lets callers match on the exact
//! failure class (transport, decode, state, domain, safety).

use ethers::types::Address;
use thiserror::Error;

use crate::types::RiskLevel;

/// Top-level error type for the analytics engine.
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
    #[error("Batch call error: {0}")]
    Batch(#[from] BatchError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Token registry error: {0}")]
    Token(#[from] TokenError),
    #[error("Price oracle error: {0}")]
    Price(#[from] PriceError),
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("Pool fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("Analysis error: {0}")]
    Analyze(#[from] AnalyzeError),
    #[error("Routing error: {0}")]
    Route(#[from] RouteError),
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

/// Failures of the endpoint gateway (transport layer).
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("no RPC endpoints configured")]
    NoEndpoints,
    #[error("invalid RPC endpoint url: {0}")]
    InvalidEndpoint(String),
    #[error("RPC call timed out after {0} ms")]
    Timeout(u64),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("all RPC providers failed, last error: {last_error}")]
    AllProvidersFailed { last_error: String },
}

/// Failures of the aggregated multicall layer.
///
/// A failed sub-call is NOT an error here: it surfaces as
/// `success == false` in the positional result. These variants cover the
/// batch itself failing to encode, transport, or decode.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("failed to encode batch call: {0}")]
    Encode(String),
    #[error("failed to decode batch result: {0}")]
    Decode(String),
    #[error("batch returned {got} results for {expected} calls")]
    LengthMismatch { expected: usize, got: usize },
}

/// Cache key and store failures.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid {store} cache key: {key}")]
    InvalidKey { store: &'static str, key: String },
}

/// Token metadata resolution failures.
///
/// Per-field decode failures never surface here; they degrade to the
/// UNKNOWN/18 fallback. Only a failed metadata batch does.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Price oracle failures.
#[derive(Error, Debug)]
pub enum PriceError {
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("failed to decode oracle pool state: {0}")]
    Decode(String),
    #[error("no USD price available for token {0:?}")]
    Unavailable(Address),
}

/// Pool discovery failures.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Pool state fetch failures.
///
/// A single protocol failing is tolerated and reported through
/// `ProtocolStatus`; this error is returned only when no pool state could be
/// obtained at all.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("all protocol fetches failed (v2: {v2}; v3: {v3})")]
    AllProtocolsFailed { v2: String, v3: String },
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Analyzer-level failures.
#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("invalid token address: {0}")]
    InvalidAddress(String),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("analysis failed: {0}")]
    Internal(String),
}

/// Router failures.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error("no viable route from {token_in:?} to {token_out:?}")]
    NoRoute { token_in: Address, token_out: Address },
}

/// Failures of the service facade consumed by the external transport layer.
///
/// The transport maps these onto HTTP statuses: invalid input → 400,
/// missing pools → 404, cache precondition → 428, safety refusal → 4xx
/// policy response, everything else → 500.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid token address: {0}")]
    InvalidAddress(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("token {0:?} is not in the analysis cache")]
    TokenNotCached(Address),
    #[error("no pools found for token {0:?}")]
    NoPools(Address),
    #[error("no tradeable pool for token {0:?}")]
    NoTradeablePool(Address),
    #[error("swap blocked: risk level {risk_level:?}, safety score {safety_score:.0}")]
    SwapBlocked {
        risk_level: RiskLevel,
        safety_score: f64,
    },
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Price(#[from] PriceError),
}
