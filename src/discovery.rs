//! # Pool Discovery
//!
//! Enumerates every candidate pool trading the target token against the
//! curated base set, across both protocol families, in a single batched
//! call: one `getPair` per (target, base) plus one `getPool` per
//! (target, base, fee tier). Zero addresses are filtered and candidates are
//! deduplicated on (kind, address).

use std::collections::HashSet;
use std::sync::Arc;

use ethers::types::Address;
use tracing::{debug, instrument};

use crate::abi;
use crate::errors::DiscoveryError;
use crate::multicall::{BatchCall, SubCall};
use crate::tokens::{
    KnownToken, DISCOVERY_BASES, FAST_MODE_BASES, V2_FACTORY, V3_FACTORY, V3_FEE_TIERS,
};
use crate::types::ProtocolKind;

/// Base-set breadth: fast mode probes only the three deepest bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    Fast,
    Full,
}

/// A discovered pool address, not yet fetched.
#[derive(Debug, Clone)]
pub struct PoolCandidate {
    pub address: Address,
    pub kind: ProtocolKind,
    pub base: &'static KnownToken,
    /// Fee tier for V3 candidates; V2 pairs carry the protocol-fixed fee.
    pub fee: Option<u32>,
}

pub struct PoolDiscovery {
    batch: Arc<dyn BatchCall>,
}

impl PoolDiscovery {
    pub fn new(batch: Arc<dyn BatchCall>) -> Self {
        Self { batch }
    }

    fn bases(mode: DiscoveryMode) -> &'static [&'static KnownToken] {
        match mode {
            DiscoveryMode::Fast => &DISCOVERY_BASES[..FAST_MODE_BASES],
            DiscoveryMode::Full => &DISCOVERY_BASES[..],
        }
    }

    /// Enumerate candidates for `target`. The batch layout is positional:
    /// per base, one V2 `getPair` followed by one V3 `getPool` per fee tier.
    #[instrument(skip(self), fields(target = %target, mode = ?mode))]
    pub async fn discover(
        &self,
        target: Address,
        mode: DiscoveryMode,
    ) -> Result<Vec<PoolCandidate>, DiscoveryError> {
        let bases: Vec<&'static KnownToken> = Self::bases(mode)
            .iter()
            .copied()
            .filter(|b| b.address_parsed() != target)
            .collect();

        let mut calls = Vec::with_capacity(bases.len() * (1 + V3_FEE_TIERS.len()));
        // Shadow list describing what each positional result decodes to.
        let mut layout: Vec<(ProtocolKind, &'static KnownToken, Option<u32>)> =
            Vec::with_capacity(calls.capacity());

        for base in &bases {
            let base_addr = base.address_parsed();
            calls.push(SubCall::new(*V2_FACTORY, abi::get_pair(target, base_addr)));
            layout.push((ProtocolKind::V2, base, None));
            for &fee in V3_FEE_TIERS.iter() {
                calls.push(SubCall::new(
                    *V3_FACTORY,
                    abi::get_pool(target, base_addr, fee),
                ));
                layout.push((ProtocolKind::V3, base, Some(fee)));
            }
        }

        let results = self.batch.batch(calls).await?;

        let mut seen: HashSet<(ProtocolKind, Address)> = HashSet::new();
        let mut candidates = Vec::new();
        for (result, (kind, base, fee)) in results.iter().zip(layout) {
            let Some(address) = result.ok_data().and_then(abi::decode_address) else {
                continue;
            };
            if address.is_zero() {
                continue;
            }
            if seen.insert((kind, address)) {
                candidates.push(PoolCandidate {
                    address,
                    kind,
                    base,
                    fee,
                });
            }
        }

        debug!(
            candidates = candidates.len(),
            bases = bases.len(),
            "discovery complete"
        );
        Ok(candidates)
    }
}
