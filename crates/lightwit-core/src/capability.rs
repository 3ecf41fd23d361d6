//! # Worker Capabilities
//!
//! The three collaborators the witness worker is built on. None of them are
//! implemented here; the node injects real ones and tests inject fixtures
//! from [`crate::memory`].

use crate::error::Result;
use crate::types::{BigNum, BlockHeight, Denomination, PeerHandle, WitnessFilter};
use async_trait::async_trait;
use bytes::Bytes;

/// Block at a resolved height
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Height the chain reports for the block
    pub height: BlockHeight,
    /// Block hash
    pub hash: [u8; 32],
}

/// Read-only view of the active chain
pub trait ChainView: Send + Sync {
    /// Map a height to its block, or `None` if the chain has not reached it
    fn resolve_height(&self, height: BlockHeight) -> Option<BlockDescriptor>;
}

/// Inputs of one bounded witness computation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WitnessParams {
    pub denomination: Denomination,
    pub filter: WitnessFilter,
    /// Accumulator value at `start_height`
    pub accumulator_seed: BigNum,
    /// Resolved height the scan starts from
    pub start_height: BlockHeight,
    /// Max mints added per invocation
    pub mint_budget: u32,
    /// Max blocks walked forward from `start_height`
    pub max_scan_height: u32,
}

/// Result of a successful witness computation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WitnessComputation {
    /// Accumulator after the scanned mints were added
    pub accumulator_value: BigNum,
    /// Witness value
    pub witness_value: BigNum,
    /// Mints that contributed to the witness, in scan order
    pub mint_values: Vec<BigNum>,
    /// Height where scanning stopped
    pub height_stop: BlockHeight,
}

/// Classified outcome of a witness computation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WitnessOutcome {
    /// Witness produced
    Computed(WitnessComputation),
    /// Anonymity set still too small; expected to clear as the chain grows
    NotEnoughMints { reason: String },
    /// Any other failure the accumulator layer could classify
    Failed { reason: String },
}

/// Accumulator/witness mathematics.
///
/// Invoked from a blocking thread, at most once at a time per worker.
/// `Err` means a lower-level fault the accumulator layer could not classify;
/// the worker treats it as fatal.
pub trait AccumulatorMath: Send + Sync {
    fn compute_witness(&self, params: &WitnessParams) -> Result<WitnessOutcome>;
}

/// Outbound message path to connected peers
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Send `payload` under `command` to `peer`.
    ///
    /// Fails with `LightError::PeerUnreachable` once the peer disconnected.
    async fn send(&self, peer: &PeerHandle, command: &'static str, payload: Bytes) -> Result<()>;
}
