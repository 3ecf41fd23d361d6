//! # Reply Codec
//!
//! Encodes the `pubcoins` replies sent back to light peers. Layout follows
//! the node's network serialization: little-endian integers, and
//! CompactSize-prefixed big numbers. A big number whose top magnitude byte
//! has its high bit set carries one extra 0x00 byte so peers never read it
//! as negative.
//!
//! ```text
//! success:   request_id u32 | accumulator bn | witness bn | mint_count u32 | mint bn * count | height_stop u32
//! rejection: request_id u32 | error_code u32
//! ```

use crate::capability::WitnessComputation;
use crate::types::{BigNum, BlockHeight, RequestId};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message command for witness replies and rejections
pub const PUBCOINS_COMMAND: &str = "pubcoins";

/// Rejection codes understood by light peers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum RejectCode {
    /// Anonymity set too small. Only sent when a retry policy gives up.
    NotEnoughMints = 0,
    /// Every other rejected outcome
    NonDetermined = 1,
}

impl RejectCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotEnoughMints => "not_enough_mints",
            Self::NonDetermined => "non_determined",
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.as_str(), self.as_u32())
    }
}

/// Successful witness reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WitnessReply {
    pub request_id: RequestId,
    pub accumulator_value: BigNum,
    pub witness_value: BigNum,
    pub mint_values: Vec<BigNum>,
    pub height_stop: BlockHeight,
}

impl WitnessReply {
    /// Pair a computation with the request it answers
    pub fn from_computation(request_id: RequestId, computation: WitnessComputation) -> Self {
        Self {
            request_id,
            accumulator_value: computation.accumulator_value,
            witness_value: computation.witness_value,
            mint_values: computation.mint_values,
            height_stop: computation.height_stop,
        }
    }
}

/// Encode a successful witness reply
pub fn encode_success(reply: &WitnessReply) -> Bytes {
    let mint_bytes: usize = reply
        .mint_values
        .iter()
        .map(|m| {
            let len = bignum_wire_len(m);
            compact_size_len(len as u64) + len
        })
        .sum();
    let mut buf = BytesMut::with_capacity(64 + mint_bytes);

    buf.put_u32_le(reply.request_id.0);
    put_bignum(&mut buf, &reply.accumulator_value);
    put_bignum(&mut buf, &reply.witness_value);
    buf.put_u32_le(reply.mint_values.len() as u32);
    for mint in &reply.mint_values {
        put_bignum(&mut buf, mint);
    }
    buf.put_u32_le(reply.height_stop);

    buf.freeze()
}

/// Encode a rejection
pub fn encode_rejection(request_id: RequestId, code: RejectCode) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32_le(request_id.0);
    buf.put_u32_le(code.as_u32());
    buf.freeze()
}

fn put_bignum(buf: &mut BytesMut, value: &BigNum) {
    let bytes = value.as_le_bytes();
    put_compact_size(buf, bignum_wire_len(value) as u64);
    buf.put_slice(bytes);
    if needs_sign_byte(bytes) {
        buf.put_u8(0x00);
    }
}

fn needs_sign_byte(le_bytes: &[u8]) -> bool {
    le_bytes.last().map_or(false, |top| top & 0x80 != 0)
}

/// Encoded magnitude length, sign byte included
fn bignum_wire_len(value: &BigNum) -> usize {
    let bytes = value.as_le_bytes();
    bytes.len() + usize::from(needs_sign_byte(bytes))
}

fn put_compact_size(buf: &mut BytesMut, n: u64) {
    match n {
        0..=0xfc => buf.put_u8(n as u8),
        0xfd..=0xffff => {
            buf.put_u8(0xfd);
            buf.put_u16_le(n as u16);
        }
        0x1_0000..=0xffff_ffff => {
            buf.put_u8(0xfe);
            buf.put_u32_le(n as u32);
        }
        _ => {
            buf.put_u8(0xff);
            buf.put_u64_le(n);
        }
    }
}

fn compact_size_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
