//! Core type definitions for light witness requests
//!
//! A `WitnessRequest` is built by the inbound message handler and never
//! changes afterwards; retries re-enqueue the very same value.

use crate::error::{LightError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Block height as tracked by the active chain
pub type BlockHeight = u32;

/// Largest filter accepted from a peer (bytes)
pub const MAX_FILTER_SIZE: usize = 36_000;

/// Largest number of filter hash functions accepted from a peer
pub const MAX_FILTER_HASH_FUNCS: u32 = 50;

/// Request identifier chosen by the requesting peer.
///
/// Opaque to this node: it is only ever echoed back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection-scoped peer identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer={}", self.0)
    }
}

/// Non-owning reference to the peer that asked for a witness.
///
/// Holding a handle does not keep the connection alive; delivery goes
/// through `PeerLink` and fails harmlessly once the peer is gone.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle {
    /// Connection identifier
    pub id: PeerId,
    /// Remote address, for logs
    pub addr: String,
}

impl PeerHandle {
    pub fn new(id: u64, addr: impl Into<String>) -> Self {
        Self {
            id: PeerId(id),
            addr: addr.into(),
        }
    }
}

/// Zerocoin denominations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Denomination {
    One,
    Five,
    Ten,
    Fifty,
    OneHundred,
    FiveHundred,
    OneThousand,
    FiveThousand,
}

impl Denomination {
    /// All denominations, smallest first
    pub const ALL: [Denomination; 8] = [
        Self::One,
        Self::Five,
        Self::Ten,
        Self::Fifty,
        Self::OneHundred,
        Self::FiveHundred,
        Self::OneThousand,
        Self::FiveThousand,
    ];

    /// Coin value of the denomination
    pub fn value(&self) -> u32 {
        match self {
            Self::One => 1,
            Self::Five => 5,
            Self::Ten => 10,
            Self::Fifty => 50,
            Self::OneHundred => 100,
            Self::FiveHundred => 500,
            Self::OneThousand => 1000,
            Self::FiveThousand => 5000,
        }
    }

    /// Parse a wire value
    pub fn from_value(value: u32) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.value() == value)
            .ok_or(LightError::InvalidDenomination(value))
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Arbitrary-precision unsigned value (accumulator, witness, mint commitment).
///
/// Stored as little-endian magnitude bytes without trailing zeros, so equal
/// numbers always have equal encodings. Zero is the empty vector.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BigNum(Vec<u8>);

impl BigNum {
    /// Build from little-endian bytes
    pub fn from_le_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let mut bytes = bytes.into();
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        Self(bytes)
    }

    /// Build from a machine word
    pub fn from_u64(value: u64) -> Self {
        Self::from_le_bytes(value.to_le_bytes().to_vec())
    }

    /// Little-endian magnitude bytes
    pub fn as_le_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    /// Hex of the big-endian form, for logs
    pub fn to_hex(&self) -> String {
        let mut be = self.0.clone();
        be.reverse();
        hex::encode(be)
    }
}

impl fmt::Debug for BigNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        if hex.len() > 16 {
            write!(f, "BigNum({}..)", &hex[..16])
        } else {
            write!(f, "BigNum({})", hex)
        }
    }
}

/// Bloom-style selector narrowing which mints are scanned.
///
/// Only affects how much work the accumulator layer does, never the result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WitnessFilter {
    /// Filter bit field
    pub data: Vec<u8>,
    /// Number of hash functions
    pub hash_funcs: u32,
    /// Random tweak
    pub tweak: u32,
}

impl WitnessFilter {
    pub fn new(data: Vec<u8>, hash_funcs: u32, tweak: u32) -> Self {
        Self {
            data,
            hash_funcs,
            tweak,
        }
    }

    /// Filter that lets every mint through
    pub fn match_all() -> Self {
        Self::new(vec![0xff], 1, 0)
    }
}

/// One witness request from a light peer
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WitnessRequest {
    request_id: RequestId,
    starting_height: BlockHeight,
    denomination: Denomination,
    filter: WitnessFilter,
    accumulator_seed: BigNum,
    peer: PeerHandle,
}

impl WitnessRequest {
    /// Create a request, checking the peer-supplied filter bounds
    pub fn new(
        request_id: RequestId,
        starting_height: BlockHeight,
        denomination: Denomination,
        filter: WitnessFilter,
        accumulator_seed: BigNum,
        peer: PeerHandle,
    ) -> Result<Self> {
        if filter.data.len() > MAX_FILTER_SIZE {
            return Err(LightError::InvalidRequest {
                request_id,
                reason: format!(
                    "filter is {} bytes, max {}",
                    filter.data.len(),
                    MAX_FILTER_SIZE
                ),
            });
        }
        if filter.hash_funcs > MAX_FILTER_HASH_FUNCS {
            return Err(LightError::InvalidRequest {
                request_id,
                reason: format!(
                    "filter uses {} hash functions, max {}",
                    filter.hash_funcs, MAX_FILTER_HASH_FUNCS
                ),
            });
        }

        Ok(Self {
            request_id,
            starting_height,
            denomination,
            filter,
            accumulator_seed,
            peer,
        })
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn starting_height(&self) -> BlockHeight {
        self.starting_height
    }

    pub fn denomination(&self) -> Denomination {
        self.denomination
    }

    pub fn filter(&self) -> &WitnessFilter {
        &self.filter
    }

    /// Accumulator value at `starting_height`, as claimed by the peer
    pub fn accumulator_seed(&self) -> &BigNum {
        &self.accumulator_seed
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }
}

impl fmt::Display for WitnessRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request {} from {} ({}) den={} height={}",
            self.request_id, self.peer.id, self.peer.addr, self.denomination, self.starting_height
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerHandle {
        PeerHandle::new(1, "10.0.0.1:12700")
    }

    #[test]
    fn test_denomination_values() {
        assert_eq!(Denomination::from_value(50).unwrap(), Denomination::Fifty);
        assert_eq!(Denomination::FiveThousand.value(), 5000);
        assert_eq!(
            Denomination::from_value(2),
            Err(LightError::InvalidDenomination(2))
        );
    }

    #[test]
    fn test_bignum_normalizes_trailing_zeros() {
        let a = BigNum::from_le_bytes(vec![0x01, 0x02, 0x00, 0x00]);
        let b = BigNum::from_u64(0x0201);
        assert_eq!(a, b);
        assert_eq!(a.as_le_bytes(), &[0x01, 0x02]);
        assert_eq!(a.to_hex(), "0201");
        assert!(BigNum::from_u64(0).is_zero());
    }

    #[test]
    fn test_request_rejects_oversized_filter() {
        let filter = WitnessFilter::new(vec![0u8; MAX_FILTER_SIZE + 1], 3, 0);
        let err = WitnessRequest::new(
            RequestId(5),
            100,
            Denomination::One,
            filter,
            BigNum::from_u64(7),
            peer(),
        )
        .unwrap_err();
        assert!(matches!(err, LightError::InvalidRequest { request_id: RequestId(5), .. }));
    }

    #[test]
    fn test_request_rejects_too_many_hash_funcs() {
        let filter = WitnessFilter::new(vec![0xff; 8], MAX_FILTER_HASH_FUNCS + 1, 0);
        let result = WitnessRequest::new(
            RequestId(6),
            100,
            Denomination::One,
            filter,
            BigNum::from_u64(7),
            peer(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_request_display() {
        let request = WitnessRequest::new(
            RequestId(12),
            450,
            Denomination::Ten,
            WitnessFilter::match_all(),
            BigNum::from_u64(99),
            peer(),
        )
        .unwrap();

        let line = request.to_string();
        assert!(line.contains("#12"));
        assert!(line.contains("den=10"));
        assert!(line.contains("height=450"));
    }
}
