//! In-memory chain standing in for the RPC/multicall transport, plus
//! builders that register a coherent little token world on it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, U256};

use poolscope::abi;
use poolscope::errors::BatchError;
use poolscope::multicall::{BatchCall, SubCall, SubResult};
use poolscope::tokens::{V2_FACTORY, V3_FACTORY};

/// Batched sub-calls are answered from a (target, calldata) table; anything
/// unregistered comes back as a failed sub-call. Whole batches can be
/// poisoned by selector to simulate a protocol-wide outage.
#[derive(Default)]
pub struct MockChain {
    replies: Mutex<HashMap<(Address, Vec<u8>), Bytes>>,
    poisoned_selectors: Mutex<Vec<[u8; 4]>>,
    pub batches: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, target: Address, call_data: Bytes, return_data: Bytes) {
        self.replies
            .lock()
            .unwrap()
            .insert((target, call_data.to_vec()), return_data);
    }

    pub fn poison_selector(&self, selector: [u8; 4]) {
        self.poisoned_selectors.lock().unwrap().push(selector);
    }

    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchCall for MockChain {
    async fn batch(&self, calls: Vec<SubCall>) -> Result<Vec<SubResult>, BatchError> {
        self.batches.fetch_add(1, Ordering::SeqCst);

        let poisoned = self.poisoned_selectors.lock().unwrap();
        for call in &calls {
            if call.call_data.len() >= 4 && poisoned.iter().any(|s| s[..] == call.call_data[..4]) {
                return Err(BatchError::Decode("injected batch failure".into()));
            }
        }
        drop(poisoned);

        let replies = self.replies.lock().unwrap();
        Ok(calls
            .iter()
            .map(|c| match replies.get(&(c.target, c.call_data.to_vec())) {
                Some(data) => SubResult {
                    success: true,
                    return_data: data.clone(),
                },
                None => SubResult {
                    success: false,
                    return_data: Bytes::new(),
                },
            })
            .collect())
    }
}

//================================================================================================//
//                                      WORLD BUILDERS                                            //
//================================================================================================//

pub fn addr(n: u8) -> Address {
    let mut raw = [0u8; 20];
    raw[0] = 0x10;
    raw[19] = n;
    Address::from(raw)
}

pub fn e18(units: u64) -> U256 {
    U256::from(units) * U256::from(10u128.pow(18))
}

fn uint_reply(value: U256) -> Bytes {
    Bytes::from(encode(&[Token::Uint(value)]))
}

fn address_reply(address: Address) -> Bytes {
    Bytes::from(encode(&[Token::Address(address)]))
}

/// Register ERC-20 metadata for a token.
pub fn register_token(chain: &MockChain, token: Address, symbol: &str, decimals: u8) {
    chain.reply(
        token,
        abi::name(),
        Bytes::from(encode(&[Token::String(format!("{} Token", symbol))])),
    );
    chain.reply(
        token,
        abi::symbol(),
        Bytes::from(encode(&[Token::String(symbol.to_string())])),
    );
    chain.reply(token, abi::decimals(), uint_reply(U256::from(decimals)));
}

/// Register a V2 pair: its factory mapping and its on-chain state.
/// `token0 < token1` must hold, matching canonical factory ordering.
pub fn register_v2_pool(
    chain: &MockChain,
    pool: Address,
    token0: Address,
    token1: Address,
    reserve0: U256,
    reserve1: U256,
) {
    assert!(token0 < token1, "factory ordering violated in fixture");
    chain.reply(*V2_FACTORY, abi::get_pair(token0, token1), address_reply(pool));
    chain.reply(*V2_FACTORY, abi::get_pair(token1, token0), address_reply(pool));
    chain.reply(pool, abi::token0(), address_reply(token0));
    chain.reply(pool, abi::token1(), address_reply(token1));
    chain.reply(
        pool,
        abi::get_reserves(),
        Bytes::from(encode(&[
            Token::Uint(reserve0),
            Token::Uint(reserve1),
            Token::Uint(U256::from(1_700_000_000u64)),
        ])),
    );
}

/// Register a V3 pool: factory mapping, state, and token balances.
#[allow(clippy::too_many_arguments)]
pub fn register_v3_pool(
    chain: &MockChain,
    pool: Address,
    token0: Address,
    token1: Address,
    fee: u32,
    liquidity: u128,
    sqrt_price_x96: U256,
    tick: i32,
    balance0: U256,
    balance1: U256,
) {
    assert!(token0 < token1, "factory ordering violated in fixture");
    chain.reply(
        *V3_FACTORY,
        abi::get_pool(token0, token1, fee),
        address_reply(pool),
    );
    chain.reply(
        *V3_FACTORY,
        abi::get_pool(token1, token0, fee),
        address_reply(pool),
    );
    chain.reply(pool, abi::token0(), address_reply(token0));
    chain.reply(pool, abi::token1(), address_reply(token1));
    chain.reply(pool, abi::fee(), uint_reply(U256::from(fee)));
    chain.reply(pool, abi::liquidity(), uint_reply(U256::from(liquidity)));

    let tick_token = if tick >= 0 {
        U256::from(tick as u64)
    } else {
        U256::MAX - U256::from((-(tick as i64) - 1) as u64)
    };
    chain.reply(
        pool,
        abi::slot0(),
        Bytes::from(encode(&[
            Token::Uint(sqrt_price_x96),
            Token::Int(tick_token),
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Bool(true),
        ])),
    );
    chain.reply(token0, abi::balance_of(pool), uint_reply(balance0));
    chain.reply(token1, abi::balance_of(pool), uint_reply(balance1));
}
