//! # Batch Caller
//!
//! Dispatches many encoded sub-calls through the chain's Multicall3
//! `aggregate3` entry point in a single RPC round-trip, and decodes the
//! per-sub-call success flag and return bytes. Results are strictly
//! positional: same length, same order as the submitted calls.
//!
//! The `BatchCall` trait is the seam the rest of the engine depends on, so
//! tests can substitute an in-memory chain.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::{decode, encode, ParamType, Token};
use ethers::providers::Middleware;
use ethers::types::{transaction::eip2718::TypedTransaction, Address, Bytes, TransactionRequest};
use tracing::{debug, instrument};

use crate::errors::{BatchError, RpcError};
use crate::rpc::RpcGateway;
use crate::tokens::MULTICALL3;

//================================================================================================//
//                                            TYPES                                               //
//================================================================================================//

/// One encoded sub-call. `allow_failure` defaults to true so a single
/// reverting sub-call never aborts the batch.
#[derive(Debug, Clone)]
pub struct SubCall {
    pub target: Address,
    pub allow_failure: bool,
    pub call_data: Bytes,
}

impl SubCall {
    pub fn new(target: Address, call_data: Bytes) -> Self {
        Self {
            target,
            allow_failure: true,
            call_data,
        }
    }
}

/// Positional result of one sub-call.
#[derive(Debug, Clone)]
pub struct SubResult {
    pub success: bool,
    pub return_data: Bytes,
}

impl SubResult {
    /// Return bytes only when the sub-call succeeded and returned data.
    pub fn ok_data(&self) -> Option<&[u8]> {
        if self.success && !self.return_data.is_empty() {
            Some(self.return_data.as_ref())
        } else {
            None
        }
    }
}

/// Transport seam for every component that reads chain state in batches.
#[async_trait]
pub trait BatchCall: Send + Sync {
    async fn batch(&self, calls: Vec<SubCall>) -> Result<Vec<SubResult>, BatchError>;
}

//================================================================================================//
//                                      MULTICALL CLIENT                                          //
//================================================================================================//

/// Production `BatchCall` backed by Multicall3 over the RPC gateway.
pub struct MulticallClient {
    gateway: Arc<RpcGateway>,
    contract: Address,
}

impl MulticallClient {
    pub fn new(gateway: Arc<RpcGateway>) -> Self {
        Self {
            gateway,
            contract: *MULTICALL3,
        }
    }

    pub fn with_contract(gateway: Arc<RpcGateway>, contract: Address) -> Self {
        Self { gateway, contract }
    }
}

#[async_trait]
impl BatchCall for MulticallClient {
    #[instrument(skip_all, fields(calls = calls.len()))]
    async fn batch(&self, calls: Vec<SubCall>) -> Result<Vec<SubResult>, BatchError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let expected = calls.len();
        let call_data = encode_aggregate3(&calls);
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.contract)
            .data(call_data)
            .into();

        let raw = self
            .gateway
            .execute("aggregate3", |provider| {
                let tx = tx.clone();
                async move {
                    provider
                        .call(&tx, None)
                        .await
                        .map_err(|e| RpcError::Provider(e.to_string()))
                }
            })
            .await?;

        let results = decode_aggregate3(&raw)?;
        if results.len() != expected {
            return Err(BatchError::LengthMismatch {
                expected,
                got: results.len(),
            });
        }
        debug!(
            succeeded = results.iter().filter(|r| r.success).count(),
            total = expected,
            "batch dispatched"
        );
        Ok(results)
    }
}

//================================================================================================//
//                                      ENCODE / DECODE                                           //
//================================================================================================//

static AGGREGATE3_SELECTOR: once_cell::sync::Lazy<[u8; 4]> =
    once_cell::sync::Lazy::new(|| ethers::utils::id("aggregate3((address,bool,bytes)[])"));

pub fn encode_aggregate3(calls: &[SubCall]) -> Bytes {
    let call_tokens: Vec<Token> = calls
        .iter()
        .map(|c| {
            Token::Tuple(vec![
                Token::Address(c.target),
                Token::Bool(c.allow_failure),
                Token::Bytes(c.call_data.to_vec()),
            ])
        })
        .collect();

    let mut data = AGGREGATE3_SELECTOR.to_vec();
    data.extend_from_slice(&encode(&[Token::Array(call_tokens)]));
    Bytes::from(data)
}

pub fn decode_aggregate3(raw: &[u8]) -> Result<Vec<SubResult>, BatchError> {
    let result_type = ParamType::Array(Box::new(ParamType::Tuple(vec![
        ParamType::Bool,
        ParamType::Bytes,
    ])));
    let tokens = decode(&[result_type], raw)
        .map_err(|e| BatchError::Decode(format!("aggregate3 return: {}", e)))?;

    let array = tokens
        .into_iter()
        .next()
        .and_then(Token::into_array)
        .ok_or_else(|| BatchError::Decode("aggregate3 return is not an array".into()))?;

    let mut results = Vec::with_capacity(array.len());
    for entry in array {
        let mut fields = entry
            .into_tuple()
            .ok_or_else(|| BatchError::Decode("aggregate3 entry is not a tuple".into()))?
            .into_iter();
        let success = fields
            .next()
            .and_then(Token::into_bool)
            .ok_or_else(|| BatchError::Decode("missing success flag".into()))?;
        let return_data = fields
            .next()
            .and_then(Token::into_bytes)
            .ok_or_else(|| BatchError::Decode("missing return bytes".into()))?;
        results.push(SubResult {
            success,
            return_data: Bytes::from(return_data),
        });
    }
    Ok(results)
}
