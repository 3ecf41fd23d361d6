//! # Lightwit Core
//!
//! Shared building blocks for serving accumulator witnesses to light peers.
//!
//! This crate provides:
//! - `WitnessRequest` - one unit of witness work submitted by a peer
//! - `ChainView`, `AccumulatorMath`, `PeerLink` - the capabilities the worker consumes
//! - `codec` - the `pubcoins` reply encoding
//! - `memory` - in-memory capabilities for tests and local simulation
//!
//! ```text
//!   peer ──► WitnessRequest ──► worker ──► ChainView (height)
//!                                   │
//!                                   ├──► AccumulatorMath (witness)
//!                                   │
//!   peer ◄── "pubcoins" reply ◄─────┘  PeerLink
//! ```

pub mod capability;
pub mod codec;
pub mod error;
pub mod memory;
pub mod types;

pub use capability::*;
pub use error::*;
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::capability::{
        AccumulatorMath, BlockDescriptor, ChainView, PeerLink, WitnessComputation, WitnessOutcome,
        WitnessParams,
    };
    pub use crate::codec::{RejectCode, WitnessReply, PUBCOINS_COMMAND};
    pub use crate::error::{LightError, Result};
    pub use crate::types::*;
}
