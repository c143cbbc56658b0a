//! # Contract Interface Descriptors
//!
//! Selector-based calldata builders and tolerant return-data decoders for
//! every on-chain method the engine reads. Decoders return `Option`: a
//! sub-call whose bytes fail to decode degrades to "value missing" and never
//! aborts the surrounding batch.

use ethers::abi::{decode, encode, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;
use once_cell::sync::Lazy;

//================================================================================================//
//                                          SELECTORS                                             //
//================================================================================================//

static GET_PAIR: Lazy<[u8; 4]> = Lazy::new(|| id("getPair(address,address)"));
static GET_POOL: Lazy<[u8; 4]> = Lazy::new(|| id("getPool(address,address,uint24)"));
static TOKEN0: Lazy<[u8; 4]> = Lazy::new(|| id("token0()"));
static TOKEN1: Lazy<[u8; 4]> = Lazy::new(|| id("token1()"));
static GET_RESERVES: Lazy<[u8; 4]> = Lazy::new(|| id("getReserves()"));
static FEE: Lazy<[u8; 4]> = Lazy::new(|| id("fee()"));
static LIQUIDITY: Lazy<[u8; 4]> = Lazy::new(|| id("liquidity()"));
static SLOT0: Lazy<[u8; 4]> = Lazy::new(|| id("slot0()"));
static NAME: Lazy<[u8; 4]> = Lazy::new(|| id("name()"));
static SYMBOL: Lazy<[u8; 4]> = Lazy::new(|| id("symbol()"));
static DECIMALS: Lazy<[u8; 4]> = Lazy::new(|| id("decimals()"));
static BALANCE_OF: Lazy<[u8; 4]> = Lazy::new(|| id("balanceOf(address)"));

fn with_args(selector: &[u8; 4], args: &[Token]) -> Bytes {
    let mut data = selector.to_vec();
    data.extend_from_slice(&encode(args));
    Bytes::from(data)
}

fn no_args(selector: &[u8; 4]) -> Bytes {
    Bytes::from(selector.to_vec())
}

//================================================================================================//
//                                      CALLDATA BUILDERS                                         //
//================================================================================================//

pub fn get_pair(token_a: Address, token_b: Address) -> Bytes {
    with_args(&GET_PAIR, &[Token::Address(token_a), Token::Address(token_b)])
}

pub fn get_pool(token_a: Address, token_b: Address, fee: u32) -> Bytes {
    with_args(
        &GET_POOL,
        &[
            Token::Address(token_a),
            Token::Address(token_b),
            Token::Uint(U256::from(fee)),
        ],
    )
}

pub fn token0() -> Bytes {
    no_args(&TOKEN0)
}

pub fn token1() -> Bytes {
    no_args(&TOKEN1)
}

pub fn get_reserves() -> Bytes {
    no_args(&GET_RESERVES)
}

pub fn fee() -> Bytes {
    no_args(&FEE)
}

pub fn liquidity() -> Bytes {
    no_args(&LIQUIDITY)
}

pub fn slot0() -> Bytes {
    no_args(&SLOT0)
}

pub fn name() -> Bytes {
    no_args(&NAME)
}

pub fn symbol() -> Bytes {
    no_args(&SYMBOL)
}

pub fn decimals() -> Bytes {
    no_args(&DECIMALS)
}

pub fn balance_of(owner: Address) -> Bytes {
    with_args(&BALANCE_OF, &[Token::Address(owner)])
}

//================================================================================================//
//                                          DECODERS                                              //
//================================================================================================//

/// The slot0 fields the engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot0 {
    pub sqrt_price_x96: U256,
    pub tick: i32,
}

pub fn decode_address(data: &[u8]) -> Option<Address> {
    let tokens = decode(&[ParamType::Address], data).ok()?;
    tokens.into_iter().next()?.into_address()
}

pub fn decode_u8(data: &[u8]) -> Option<u8> {
    let value = decode_uint(data)?;
    if value > U256::from(u8::MAX) {
        return None;
    }
    Some(value.as_u32() as u8)
}

pub fn decode_u32(data: &[u8]) -> Option<u32> {
    let value = decode_uint(data)?;
    if value > U256::from(u32::MAX) {
        return None;
    }
    Some(value.as_u32())
}

pub fn decode_u128(data: &[u8]) -> Option<u128> {
    let value = decode_uint(data)?;
    if value > U256::from(u128::MAX) {
        return None;
    }
    Some(value.as_u128())
}

pub fn decode_uint(data: &[u8]) -> Option<U256> {
    let tokens = decode(&[ParamType::Uint(256)], data).ok()?;
    tokens.into_iter().next()?.into_uint()
}

/// Tolerant string decode: standard ABI string, with a fallback for tokens
/// that return a fixed `bytes32` for `name()`/`symbol()`.
pub fn decode_string(data: &[u8]) -> Option<String> {
    if let Ok(tokens) = decode(&[ParamType::String], data) {
        if let Some(Token::String(s)) = tokens.into_iter().next() {
            let trimmed = s.trim_matches(char::from(0)).trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    if data.len() == 32 {
        let trimmed: Vec<u8> = data.iter().copied().take_while(|b| *b != 0).collect();
        let s = String::from_utf8(trimmed).ok()?;
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }
    None
}

/// `getReserves()` → `(uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast)`.
pub fn decode_reserves(data: &[u8]) -> Option<(U256, U256, u32)> {
    let tokens = decode(
        &[
            ParamType::Uint(112),
            ParamType::Uint(112),
            ParamType::Uint(32),
        ],
        data,
    )
    .ok()?;
    let mut iter = tokens.into_iter();
    let reserve0 = iter.next()?.into_uint()?;
    let reserve1 = iter.next()?.into_uint()?;
    let ts = iter.next()?.into_uint()?;
    Some((reserve0, reserve1, ts.low_u32()))
}

/// `slot0()` → `(uint160 sqrtPriceX96, int24 tick, …)`; trailing observation
/// and fee-protocol fields are decoded but ignored.
pub fn decode_slot0(data: &[u8]) -> Option<Slot0> {
    let tokens = decode(
        &[
            ParamType::Uint(160),
            ParamType::Int(24),
            ParamType::Uint(16),
            ParamType::Uint(16),
            ParamType::Uint(16),
            ParamType::Uint(8),
            ParamType::Bool,
        ],
        data,
    )
    .ok()?;
    let mut iter = tokens.into_iter();
    let sqrt_price_x96 = iter.next()?.into_uint()?;
    let tick_raw = iter.next()?.into_int()?;
    Some(Slot0 {
        sqrt_price_x96,
        tick: int_to_i32(tick_raw)?,
    })
}

/// Sign-extended 256-bit two's complement → i32.
fn int_to_i32(value: U256) -> Option<i32> {
    if value.bit(255) {
        let magnitude = (!value).overflowing_add(U256::one()).0;
        if magnitude > U256::from(1u64 << 31) {
            return None;
        }
        Some(-(magnitude.as_u64() as i64) as i32)
    } else {
        if value > U256::from(i32::MAX) {
            return None;
        }
        Some(value.as_u32() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_have_expected_values() {
        // Spot-check against the well-known 4-byte ids.
        assert_eq!(hex::encode(*DECIMALS), "313ce567");
        assert_eq!(hex::encode(*BALANCE_OF), "70a08231");
        assert_eq!(hex::encode(*GET_RESERVES), "0902f1ac");
        assert_eq!(hex::encode(*SLOT0), "3850c7bd");
    }

    #[test]
    fn address_decode_round_trip() {
        let addr: Address = "0x55d398326f99059fF775485246999027B3197955".parse().unwrap();
        let encoded = encode(&[Token::Address(addr)]);
        assert_eq!(decode_address(&encoded), Some(addr));
        assert_eq!(decode_address(&[0u8; 3]), None);
    }

    #[test]
    fn reserves_decode() {
        let encoded = encode(&[
            Token::Uint(U256::from(1_000u64)),
            Token::Uint(U256::from(2_000u64)),
            Token::Uint(U256::from(1_700_000_000u64)),
        ]);
        let (r0, r1, ts) = decode_reserves(&encoded).unwrap();
        assert_eq!(r0, U256::from(1_000u64));
        assert_eq!(r1, U256::from(2_000u64));
        assert_eq!(ts, 1_700_000_000);
    }

    #[test]
    fn slot0_decode_handles_negative_tick() {
        let encoded = encode(&[
            Token::Uint(U256::one() << 96),
            Token::Int(U256::MAX - U256::from(99u64)), // -100 in two's complement
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Bool(false),
        ]);
        let slot0 = decode_slot0(&encoded).unwrap();
        assert_eq!(slot0.tick, -100);
        assert_eq!(slot0.sqrt_price_x96, U256::one() << 96);
    }

    #[test]
    fn string_decode_falls_back_to_bytes32() {
        let mut raw = [0u8; 32];
        raw[..4].copy_from_slice(b"MKRX");
        assert_eq!(decode_string(&raw), Some("MKRX".to_string()));

        let encoded = encode(&[Token::String("PancakeSwap Token".to_string())]);
        assert_eq!(decode_string(&encoded), Some("PancakeSwap Token".to_string()));

        assert_eq!(decode_string(&[]), None);
    }
}
