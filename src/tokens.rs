//! # Known Token and Contract Tables
//!
//! Compile-time constants for the curated base-token set, the factory and
//! aggregation contracts, and the two pools the price oracle reads. Keys are
//! canonical lowercased addresses; the tables are immutable. The oracle keeps
//! its own runtime-mutable price overlay.

use std::collections::HashMap;

use ethers::types::Address;
use once_cell::sync::Lazy;

use crate::types::TokenInfo;

//================================================================================================//
//                                          CONTRACTS                                             //
//================================================================================================//

/// Constant-product pair factory.
pub static V2_FACTORY: Lazy<Address> = Lazy::new(|| {
    "0xcA143Ce32Fe78f1f7019d7d551a6402fC5350c73"
        .parse()
        .expect("static v2 factory address")
});

/// Concentrated-liquidity pool factory.
pub static V3_FACTORY: Lazy<Address> = Lazy::new(|| {
    "0x0BFbCF9fa4f9C56B0F40a671Ad40E0805A091865"
        .parse()
        .expect("static v3 factory address")
});

/// Multicall3 aggregation contract (canonical deployment).
pub static MULTICALL3: Lazy<Address> = Lazy::new(|| {
    "0xcA11bde05977b3631167028862bE2a173976CA11"
        .parse()
        .expect("static multicall3 address")
});

/// Fee tiers probed during V3 discovery, in contract units (bps × 100 is the
/// on-chain encoding; these values are the raw uint24 the factory expects).
pub const V3_FEE_TIERS: [u32; 5] = [100, 500, 2500, 3000, 10000];

/// Default fee for constant-product pairs (0.25%).
pub const V2_DEFAULT_FEE_BPS: u32 = 2500;

//================================================================================================//
//                                        KNOWN TOKENS                                            //
//================================================================================================//

/// One entry of the hardcoded token table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownToken {
    pub symbol: &'static str,
    pub name: &'static str,
    pub address: &'static str,
    pub decimals: u8,
    pub is_stable: bool,
    pub is_native_wrapper: bool,
    pub is_ecosystem: bool,
}

impl KnownToken {
    pub fn address_parsed(&self) -> Address {
        self.address.parse().expect("static token address")
    }

    pub fn token_info(&self) -> TokenInfo {
        TokenInfo {
            address: self.address_parsed(),
            symbol: self.symbol.to_string(),
            name: self.name.to_string(),
            decimals: self.decimals,
        }
    }
}

/// The full hardcoded table: wrapped native, four stablecoins, ecosystem token.
pub const KNOWN_TOKENS: [KnownToken; 6] = [
    KnownToken {
        symbol: "WBNB",
        name: "Wrapped BNB",
        address: "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c",
        decimals: 18,
        is_stable: false,
        is_native_wrapper: true,
        is_ecosystem: false,
    },
    KnownToken {
        symbol: "USDT",
        name: "Tether USD",
        address: "0x55d398326f99059fF775485246999027B3197955",
        decimals: 18,
        is_stable: true,
        is_native_wrapper: false,
        is_ecosystem: false,
    },
    KnownToken {
        symbol: "BUSD",
        name: "BUSD Token",
        address: "0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56",
        decimals: 18,
        is_stable: true,
        is_native_wrapper: false,
        is_ecosystem: false,
    },
    KnownToken {
        symbol: "USDC",
        name: "USD Coin",
        address: "0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d",
        decimals: 18,
        is_stable: true,
        is_native_wrapper: false,
        is_ecosystem: false,
    },
    KnownToken {
        symbol: "DAI",
        name: "Dai Token",
        address: "0x1AF3F329e8BE154074D8769D1FFa4eE058B1DBc3",
        decimals: 18,
        is_stable: true,
        is_native_wrapper: false,
        is_ecosystem: false,
    },
    KnownToken {
        symbol: "CAKE",
        name: "PancakeSwap Token",
        address: "0x0E09FaBB73Bd3Ade0a17ECC321fD13a19e81cE82",
        decimals: 18,
        is_stable: false,
        is_native_wrapper: false,
        is_ecosystem: true,
    },
];

/// Hardcoded table indexed by address for the registry hot path.
pub static KNOWN_BY_ADDRESS: Lazy<HashMap<Address, &'static KnownToken>> = Lazy::new(|| {
    KNOWN_TOKENS
        .iter()
        .map(|t| (t.address_parsed(), t))
        .collect()
});

pub static WRAPPED_NATIVE: Lazy<&'static KnownToken> = Lazy::new(|| {
    KNOWN_TOKENS
        .iter()
        .find(|t| t.is_native_wrapper)
        .expect("table contains the wrapped native token")
});

pub static ECOSYSTEM_TOKEN: Lazy<&'static KnownToken> = Lazy::new(|| {
    KNOWN_TOKENS
        .iter()
        .find(|t| t.is_ecosystem)
        .expect("table contains the ecosystem token")
});

pub fn is_stablecoin(address: Address) -> bool {
    KNOWN_BY_ADDRESS
        .get(&address)
        .map(|t| t.is_stable)
        .unwrap_or(false)
}

pub fn is_wrapped_native(address: Address) -> bool {
    WRAPPED_NATIVE.address_parsed() == address
}

//================================================================================================//
//                                         BASE SETS                                              //
//================================================================================================//

/// Base tokens paired against during discovery, highest liquidity first.
/// Full mode probes all five; fast mode the first three.
pub static DISCOVERY_BASES: Lazy<Vec<&'static KnownToken>> = Lazy::new(|| {
    ["WBNB", "USDT", "BUSD", "USDC", "CAKE"]
        .iter()
        .map(|sym| {
            KNOWN_TOKENS
                .iter()
                .find(|t| t.symbol == *sym)
                .expect("base set symbols exist in the token table")
        })
        .collect()
});

pub const FAST_MODE_BASES: usize = 3;

/// Primary routing intermediates: the wrapped native plus two deepest stables.
pub static ROUTING_PRIMARY: Lazy<Vec<&'static KnownToken>> = Lazy::new(|| {
    ["WBNB", "USDT", "BUSD"]
        .iter()
        .map(|sym| {
            KNOWN_TOKENS
                .iter()
                .find(|t| t.symbol == *sym)
                .expect("primary routing symbols exist in the token table")
        })
        .collect()
});

/// Secondary routing intermediates tried only on 3-hop fallback.
pub static ROUTING_SECONDARY: Lazy<Vec<&'static KnownToken>> =
    Lazy::new(|| vec![*ECOSYSTEM_TOKEN]);

//================================================================================================//
//                                       ORACLE POOLS                                             //
//================================================================================================//

/// Concentrated-liquidity pool the oracle reads the wrapped-native USD price
/// from (WBNB/USDT, 0.05% tier).
pub static ORACLE_NATIVE_STABLE_POOL: Lazy<Address> = Lazy::new(|| {
    "0x36696169C63e42cd08ce11f5deeBbCeBae652050"
        .parse()
        .expect("static oracle pool address")
});

/// Pool the oracle derives the ecosystem-token price from (CAKE/WBNB).
pub static ORACLE_ECOSYSTEM_NATIVE_POOL: Lazy<Address> = Lazy::new(|| {
    "0x133B3D95bAD5405d14d53473671200e9342896BF"
        .parse()
        .expect("static oracle pool address")
});

//================================================================================================//
//                                     RUG-PULL MINIMUMS                                          //
//================================================================================================//

/// Minimum plausible pair-side reserve (normalized units) by pair symbol.
/// A pool whose pair side sits below this while the target side is non-empty
/// has almost certainly had its counter-liquidity pulled.
pub fn min_pair_reserve(pair_symbol: &str) -> f64 {
    let known = KNOWN_TOKENS.iter().find(|t| t.symbol == pair_symbol);
    match known {
        Some(t) if t.is_native_wrapper => 0.001,
        Some(t) if t.is_stable => 10.0,
        Some(t) if t.is_ecosystem => 5.0,
        _ => 10.0,
    }
}
