//! Error types for light witness operations

use crate::types::{PeerId, RequestId};
use thiserror::Error;

/// Result type alias for witness operations
pub type Result<T> = std::result::Result<T, LightError>;

/// Errors that can occur while serving witness requests
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LightError {
    // === Request Data ===
    /// Denomination outside the Zerocoin set
    #[error("Invalid denomination: {0}")]
    InvalidDenomination(u32),

    /// Malformed request field
    #[error("Invalid request {request_id}: {reason}")]
    InvalidRequest { request_id: RequestId, reason: String },

    // === Delivery ===
    /// Peer disconnected or otherwise unreachable
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(PeerId),

    // === Computation ===
    /// Lower-level fault raised by the accumulator layer
    #[error("Accumulator fault: {0}")]
    AccumulatorFault(String),

    /// Computation task panicked or was cancelled
    #[error("Computation task aborted: {0}")]
    ComputationAborted(String),

    // === Worker ===
    /// No async runtime available to host the worker loop
    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LightError {
    /// Whether this error must stop the worker loop.
    ///
    /// Anything the pipeline cannot classify into a reply or a requeue is fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AccumulatorFault(_) | Self::ComputationAborted(_) | Self::Internal(_)
        )
    }
}
