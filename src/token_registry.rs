//! # Token Registry
//!
//! Resolves token address → {symbol, name, decimals}. Resolution order:
//! hardcoded table (instant), token cache, then one batched
//! `{name, symbol, decimals}` read covering every still-unresolved address.
//! Per-field decode failures degrade to the UNKNOWN/Unknown/18 fallback and
//! never fail the lookup.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::types::Address;
use tracing::{debug, instrument};

use crate::abi;
use crate::cache::AnalyticsCache;
use crate::errors::TokenError;
use crate::multicall::{BatchCall, SubCall, SubResult};
use crate::tokens::KNOWN_BY_ADDRESS;
use crate::types::TokenInfo;

pub struct TokenRegistry {
    batch: Arc<dyn BatchCall>,
    cache: Arc<AnalyticsCache>,
}

impl TokenRegistry {
    pub fn new(batch: Arc<dyn BatchCall>, cache: Arc<AnalyticsCache>) -> Self {
        Self { batch, cache }
    }

    /// Resolve a single token.
    pub async fn get(&self, address: Address) -> Result<TokenInfo, TokenError> {
        if let Some(known) = KNOWN_BY_ADDRESS.get(&address) {
            return Ok(known.token_info());
        }
        if let Some(hit) = self.cache.token_get(address).await {
            return Ok(hit);
        }
        let mut resolved = self.fetch_batch(&[address]).await?;
        Ok(resolved
            .remove(&address)
            .unwrap_or_else(|| TokenInfo::unknown(address)))
    }

    /// Resolve many tokens, batching the uncached tail into a single
    /// multicall.
    #[instrument(skip_all, fields(requested = addresses.len()))]
    pub async fn get_many(
        &self,
        addresses: &[Address],
    ) -> Result<HashMap<Address, TokenInfo>, TokenError> {
        let mut out = HashMap::with_capacity(addresses.len());
        let mut missing: Vec<Address> = Vec::new();

        for &address in addresses {
            if out.contains_key(&address) {
                continue;
            }
            if let Some(known) = KNOWN_BY_ADDRESS.get(&address) {
                out.insert(address, known.token_info());
            } else if let Some(hit) = self.cache.token_get(address).await {
                out.insert(address, hit);
            } else if !missing.contains(&address) {
                missing.push(address);
            }
        }

        if !missing.is_empty() {
            debug!(uncached = missing.len(), "fetching token metadata batch");
            let fetched = self.fetch_batch(&missing).await?;
            out.extend(fetched);
        }
        Ok(out)
    }

    /// One batched `{name, symbol, decimals}` read per address; results are
    /// positional, three sub-calls per token.
    async fn fetch_batch(
        &self,
        addresses: &[Address],
    ) -> Result<HashMap<Address, TokenInfo>, TokenError> {
        let mut calls = Vec::with_capacity(addresses.len() * 3);
        for &address in addresses {
            calls.push(SubCall::new(address, abi::name()));
            calls.push(SubCall::new(address, abi::symbol()));
            calls.push(SubCall::new(address, abi::decimals()));
        }
        let results = self.batch.batch(calls).await?;

        let mut out = HashMap::with_capacity(addresses.len());
        for (i, &address) in addresses.iter().enumerate() {
            let info = decode_token_info(address, &results[i * 3..i * 3 + 3]);
            self.cache.token_insert(info.clone()).await;
            out.insert(address, info);
        }
        Ok(out)
    }
}

/// Decode one token's three metadata fields, falling back per field.
fn decode_token_info(address: Address, fields: &[SubResult]) -> TokenInfo {
    let fallback = TokenInfo::unknown(address);
    let name = fields
        .first()
        .and_then(|r| r.ok_data())
        .and_then(abi::decode_string)
        .unwrap_or(fallback.name);
    let symbol = fields
        .get(1)
        .and_then(|r| r.ok_data())
        .and_then(abi::decode_string)
        .unwrap_or(fallback.symbol);
    let decimals = fields
        .get(2)
        .and_then(|r| r.ok_data())
        .and_then(abi::decode_u8)
        .filter(|d| *d <= 36)
        .unwrap_or(fallback.decimals);

    TokenInfo {
        address,
        symbol,
        name,
        decimals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::{encode, Token};
    use ethers::types::{Bytes, U256};

    fn ok(data: Vec<u8>) -> SubResult {
        SubResult {
            success: true,
            return_data: Bytes::from(data),
        }
    }

    fn failed() -> SubResult {
        SubResult {
            success: false,
            return_data: Bytes::new(),
        }
    }

    #[test]
    fn decodes_standard_metadata() {
        let address = Address::random();
        let fields = vec![
            ok(encode(&[Token::String("Some Token".into())])),
            ok(encode(&[Token::String("SOME".into())])),
            ok(encode(&[Token::Uint(U256::from(9u8))])),
        ];
        let info = decode_token_info(address, &fields);
        assert_eq!(info.name, "Some Token");
        assert_eq!(info.symbol, "SOME");
        assert_eq!(info.decimals, 9);
    }

    #[test]
    fn per_field_failures_fall_back_independently() {
        let address = Address::random();
        let fields = vec![
            failed(),
            ok(encode(&[Token::String("SOME".into())])),
            ok(encode(&[Token::Uint(U256::from(60u8))])), // out of range
        ];
        let info = decode_token_info(address, &fields);
        assert_eq!(info.name, "Unknown");
        assert_eq!(info.symbol, "SOME");
        assert_eq!(info.decimals, 18);
    }

    #[test]
    fn all_failures_yield_unknown_token() {
        let address = Address::random();
        let info = decode_token_info(address, &[failed(), failed(), failed()]);
        assert_eq!(info, TokenInfo::unknown(address));
    }
}
