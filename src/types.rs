//! # Core Type Definitions
//!
//! Single source of truth for the data model shared across the engine:
//! token metadata, protocol-tagged pool state, derived liquidity and price
//! records, the full analysis result, trade scoring outputs, and route plans.
//! Centralizing these types keeps the components decoupled and makes the
//! external (HTTP-facing) serialization shape explicit.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};

//================================================================================================//
//                                      ADDRESS HANDLING                                          //
//================================================================================================//

/// Canonical lowercased form of an address, used for every cache key.
pub fn addr_key(address: Address) -> String {
    format!("{:#x}", address)
}

/// Checksummed display form of an address.
pub fn addr_display(address: Address) -> String {
    to_checksum(&address, None)
}

/// Parse an address from its canonical hex shape (`0x` + 40 hex chars).
pub fn parse_address(raw: &str) -> Option<Address> {
    let trimmed = raw.trim();
    let hex_part = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X"))?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// Current unix timestamp in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

//================================================================================================//
//                                       TOKEN METADATA                                           //
//================================================================================================//

/// Resolved token metadata. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

impl TokenInfo {
    /// Fallback for tokens whose metadata could not be decoded.
    pub fn unknown(address: Address) -> Self {
        Self {
            address,
            symbol: "UNKNOWN".to_string(),
            name: "Unknown".to_string(),
            decimals: 18,
        }
    }
}

//================================================================================================//
//                                     POOLS AND PROTOCOLS                                        //
//================================================================================================//

/// The two AMM families the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// Constant-product pair with a single fixed fee.
    V2,
    /// Concentrated-liquidity pool with a per-pool fee tier.
    V3,
}

impl ProtocolKind {
    pub fn protocol_name(&self) -> &'static str {
        match self {
            Self::V2 => "pancakeswap_v2",
            Self::V3 => "pancakeswap_v3",
        }
    }

    pub fn key_prefix(&self) -> &'static str {
        match self {
            Self::V2 => "v2",
            Self::V3 => "v3",
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key_prefix())
    }
}

/// Protocol-tagged on-chain pool state.
///
/// All downstream pricing and valuation branches on this tag; the two
/// families share no fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PoolState {
    V2 {
        reserve0: U256,
        reserve1: U256,
        block_timestamp_last: u32,
    },
    V3 {
        sqrt_price_x96: U256,
        tick: i32,
        liquidity: u128,
        actual_balance0: U256,
        actual_balance1: U256,
    },
}

/// Liquidity health buckets, derived strictly from USD TVL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiquidityStatus {
    Active,
    WarningLiquidity,
    LowLiquidity,
    Empty,
    Rugged,
}

impl LiquidityStatus {
    /// Statuses that count as usable for routing and recommendations.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active | Self::WarningLiquidity)
    }
}

/// Derived liquidity record for one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityInfo {
    pub total_usd: f64,
    pub total_native: f64,
    /// Normalized (decimal-adjusted) token amounts.
    pub token0_amount: f64,
    pub token1_amount: f64,
    pub status: LiquidityStatus,
    /// Reason attached when `status == Rugged`.
    pub status_reason: Option<String>,
    /// Raw on-chain amounts backing the normalized values.
    pub raw0: U256,
    pub raw1: U256,
}

/// How a pool price ratio was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Reserves,
    SqrtPrice,
}

/// Derived price record for one pool, oriented toward the analyzed token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceInfo {
    /// Price of token0 denominated in token1.
    pub token0_price: f64,
    /// Price of token1 denominated in token0.
    pub token1_price: f64,
    /// Price of the analyzed token denominated in the pair token.
    pub price_ratio: f64,
    /// Price of the analyzed token in USD (0 when underivable).
    pub in_usd: f64,
    /// Price of the analyzed token in the wrapped-native token.
    pub in_native: f64,
    pub pair_token_symbol: String,
    pub display_price: String,
    pub source: PriceSource,
}

impl PriceInfo {
    pub fn empty(pair_token_symbol: String, source: PriceSource) -> Self {
        Self {
            token0_price: 0.0,
            token1_price: 0.0,
            price_ratio: 0.0,
            in_usd: 0.0,
            in_native: 0.0,
            pair_token_symbol,
            display_price: "0".to_string(),
            source,
        }
    }
}

/// A fully reconstructed pool: on-chain state plus derived records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub address: Address,
    pub kind: ProtocolKind,
    pub protocol: String,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
    pub fee_bps: u32,
    pub state: PoolState,
    pub liquidity: LiquidityInfo,
    pub price: PriceInfo,
    pub last_updated: u64,
}

impl Pool {
    /// Cache key, e.g. `v3_0xabc…`.
    pub fn cache_key(&self) -> String {
        format!("{}_{}", self.kind.key_prefix(), addr_key(self.address))
    }

    pub fn involves(&self, token: Address) -> bool {
        self.token0.address == token || self.token1.address == token
    }

    pub fn target_is_token0(&self, target: Address) -> bool {
        self.token0.address == target
    }

    /// The non-target side of the pool.
    pub fn pair_token(&self, target: Address) -> &TokenInfo {
        if self.target_is_token0(target) {
            &self.token1
        } else {
            &self.token0
        }
    }

    /// Normalized reserve amount on the target side.
    pub fn target_amount(&self, target: Address) -> f64 {
        if self.target_is_token0(target) {
            self.liquidity.token0_amount
        } else {
            self.liquidity.token1_amount
        }
    }

    /// Normalized reserve amount on the pair side.
    pub fn pair_amount(&self, target: Address) -> f64 {
        if self.target_is_token0(target) {
            self.liquidity.token1_amount
        } else {
            self.liquidity.token0_amount
        }
    }
}

/// Lightweight pool reference embedded in best-pool selections and routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolRef {
    pub address: Address,
    pub kind: ProtocolKind,
    pub pair_token_symbol: String,
    pub fee_bps: u32,
    pub liquidity_usd: f64,
    pub price_usd: f64,
    pub price_native: f64,
}

impl PoolRef {
    pub fn from_pool(pool: &Pool) -> Self {
        Self {
            address: pool.address,
            kind: pool.kind,
            pair_token_symbol: pool.price.pair_token_symbol.clone(),
            fee_bps: pool.fee_bps,
            liquidity_usd: pool.liquidity.total_usd,
            price_usd: pool.price.in_usd,
            price_native: pool.price.in_native,
        }
    }
}

//================================================================================================//
//                                    SCORING AND SAFETY                                          //
//================================================================================================//

/// Trade size classes used by the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeSize {
    Micro,
    Small,
    Medium,
    Large,
    Whale,
}

impl TradeSize {
    pub fn classify(trade_usd: f64) -> Self {
        if trade_usd < 100.0 {
            Self::Micro
        } else if trade_usd < 1_000.0 {
            Self::Small
        } else if trade_usd < 10_000.0 {
            Self::Medium
        } else if trade_usd < 100_000.0 {
            Self::Large
        } else {
            Self::Whale
        }
    }
}

/// Sandwich-attack exposure, scaled by the trade-to-liquidity ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandwichRisk {
    Low,
    Medium,
    High,
    Critical,
}

/// Overall execution risk for a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Estimated execution costs for a given trade size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeCosts {
    pub fee_pct: f64,
    pub slippage_pct: f64,
    pub total_cost_pct: f64,
    pub fee_usd: f64,
    pub slippage_usd: f64,
    pub total_cost_usd: f64,
}

/// Result of the safety checks: remaining score out of 100 plus the flags
/// that reduced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyReport {
    pub safety_score: f64,
    pub sandwich_risk: SandwichRisk,
    pub is_untradeable: bool,
    /// V3 pool with zero in-range liquidity.
    pub out_of_range: bool,
    pub rug_pull_detected: bool,
    pub warnings: Vec<Warning>,
}

/// Full scorer output for one pool at one trade size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolEvaluation {
    pub pool: PoolRef,
    pub trade_usd: f64,
    pub trade_size: TradeSize,
    pub score: f64,
    pub costs: TradeCosts,
    pub tradeable: bool,
    pub risk_level: RiskLevel,
    pub safety: SafetyReport,
    /// Actionable mitigations derived from the flagged risks.
    pub protection: Vec<String>,
    pub reason: String,
}

//================================================================================================//
//                                     ANALYSIS RESULT                                            //
//================================================================================================//

/// Warning severity, ordered so that sorting descending puts CRITICAL first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A user-facing warning with a stable machine code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl Warning {
    pub fn new(code: &'static str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
        }
    }
}

/// Outcome of one protocol's batched fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStatus {
    pub status: FetchStatus,
    /// Candidate pools submitted to the fetch.
    pub pools: usize,
    /// Pools actually reconstructed.
    pub returned: usize,
    pub error: Option<String>,
}

impl ProtocolStatus {
    pub fn skipped() -> Self {
        Self {
            status: FetchStatus::Skipped,
            pools: 0,
            returned: 0,
            error: None,
        }
    }
}

/// Liquidity-weighted aggregate pricing across all priced pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatePricing {
    pub avg_price_usd: f64,
    pub avg_price_native: f64,
    pub median_price_usd: f64,
    pub median_price_native: f64,
    pub min_price_usd: f64,
    pub max_price_usd: f64,
    pub min_price_native: f64,
    pub max_price_native: f64,
    /// Per-pair-token price observations, preserved for display.
    pub by_pair: Vec<PairPrice>,
    pub priced_pools: usize,
    /// Pools excluded by the median outlier band.
    pub outliers_filtered: usize,
}

impl AggregatePricing {
    pub fn empty() -> Self {
        Self {
            avg_price_usd: 0.0,
            avg_price_native: 0.0,
            median_price_usd: 0.0,
            median_price_native: 0.0,
            min_price_usd: 0.0,
            max_price_usd: 0.0,
            min_price_native: 0.0,
            max_price_native: 0.0,
            by_pair: Vec::new(),
            priced_pools: 0,
            outliers_filtered: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairPrice {
    pub pair_token_symbol: String,
    pub price_usd: f64,
    pub liquidity_usd: f64,
    pub pool: Address,
}

/// Headline counts for the analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_pools: usize,
    pub active_pools: usize,
    pub v2_pools: usize,
    pub v3_pools: usize,
    pub rugged_pools: usize,
}

/// Totals and spread derived from the pool set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisBreakdown {
    pub total_liquidity_usd: f64,
    pub total_liquidity_native: f64,
    pub price_spread_pct: f64,
    pub distribution: Vec<ProtocolShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolShare {
    pub protocol: String,
    pub pools: usize,
    pub liquidity_usd: f64,
    pub share_pct: f64,
}

/// Best-pool selections across the standard criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct BestPools {
    pub by_liquidity: Option<PoolRef>,
    pub by_price_usd: Option<PoolRef>,
    pub by_price_native: Option<PoolRef>,
    pub by_fee: Option<PoolRef>,
    pub by_protocol: HashMap<String, PoolRef>,
    pub recommended: Option<PoolEvaluation>,
}

/// Wall-clock cost of the analysis with a letter grade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Performance {
    pub total_ms: u64,
    pub grade: &'static str,
}

impl Performance {
    pub fn from_millis(total_ms: u64) -> Self {
        let grade = if total_ms < 500 {
            "A+"
        } else if total_ms < 1000 {
            "A"
        } else if total_ms < 2000 {
            "B"
        } else {
            "C"
        };
        Self { total_ms, grade }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMeta {
    pub timestamp: DateTime<Utc>,
    pub cached: bool,
    pub cache_age_ms: u64,
    pub deduplicated: bool,
    pub prices_stale: bool,
    pub partial_results: bool,
    pub protocol_status: HashMap<String, ProtocolStatus>,
}

/// The complete output of `Analyzer::analyze_token`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub token: TokenInfo,
    pub pricing: AggregatePricing,
    pub summary: AnalysisSummary,
    pub best_pools: BestPools,
    pub pools: Vec<Pool>,
    pub analysis: AnalysisBreakdown,
    pub performance: Performance,
    pub meta: AnalysisMeta,
    pub warnings: Vec<Warning>,
}

impl AnalysisResult {
    /// Clone annotated as a cache hit of the given age.
    pub fn as_cached(&self, age_ms: u64) -> Self {
        let mut out = self.clone();
        out.meta.cached = true;
        out.meta.cache_age_ms = age_ms;
        out
    }

    /// Clone annotated as the shared result of a deduplicated call.
    pub fn as_deduplicated(&self) -> Self {
        let mut out = self.clone();
        out.meta.deduplicated = true;
        out
    }

    /// Pools usable for routing (active, never rugged).
    pub fn active_pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.iter().filter(|p| p.liquidity.status.is_active())
    }
}

//================================================================================================//
//                                          ROUTING                                               //
//================================================================================================//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    Direct,
    TwoHop,
    ThreeHop,
}

/// One swap leg of a route plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteLeg {
    pub token_in: TokenInfo,
    pub token_out: TokenInfo,
    pub pool: PoolRef,
    /// Estimated output in token_out units for this leg's input.
    pub estimated_output: f64,
    pub price_impact_pct: f64,
    pub fee_bps: u32,
}

/// A complete route between two tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub kind: RouteKind,
    pub path: Vec<TokenInfo>,
    pub legs: Vec<RouteLeg>,
    pub estimated_output: f64,
    pub price_impact_pct: f64,
    pub total_fee_bps: u32,
    pub score: f64,
}

/// Best route plus ranked alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub token_in: TokenInfo,
    pub token_out: TokenInfo,
    pub amount_in: f64,
    pub best: Route,
    pub alternatives: Vec<Route>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trip() {
        let addr = parse_address("0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c").unwrap();
        assert_eq!(addr_key(addr), "0xbb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c");
        assert_eq!(addr_display(addr), "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c");
    }

    #[test]
    fn address_rejects_malformed_input() {
        assert!(parse_address("").is_none());
        assert!(parse_address("0x123").is_none());
        assert!(parse_address("bb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c").is_none());
        assert!(parse_address("0xZZ4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c").is_none());
    }

    #[test]
    fn trade_size_boundaries() {
        assert_eq!(TradeSize::classify(99.0), TradeSize::Micro);
        assert_eq!(TradeSize::classify(100.0), TradeSize::Small);
        assert_eq!(TradeSize::classify(999.0), TradeSize::Small);
        assert_eq!(TradeSize::classify(1_000.0), TradeSize::Medium);
        assert_eq!(TradeSize::classify(10_000.0), TradeSize::Large);
        assert_eq!(TradeSize::classify(100_000.0), TradeSize::Whale);
    }

    #[test]
    fn severity_sorts_critical_first() {
        let mut warnings = vec![
            Warning::new("A", Severity::Low, "a"),
            Warning::new("B", Severity::Critical, "b"),
            Warning::new("C", Severity::Medium, "c"),
        ];
        warnings.sort_by(|a, b| b.severity.cmp(&a.severity));
        assert_eq!(warnings[0].code, "B");
        assert_eq!(warnings[2].code, "A");
    }

    #[test]
    fn performance_grades() {
        assert_eq!(Performance::from_millis(499).grade, "A+");
        assert_eq!(Performance::from_millis(500).grade, "A");
        assert_eq!(Performance::from_millis(1999).grade, "B");
        assert_eq!(Performance::from_millis(2000).grade, "C");
    }
}
