//! Execution state and its compact on-chain encoding.
//!
//! Each field is encoded independently as the shortest little-endian byte
//! string: `0 → []`, `1..=255 → [v]`, larger values → two bytes. The same
//! encoding is used for numbers inside phase scripts, so a state's stack
//! elements and its commitment bytes always agree.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DisputeError, Result};

/// Encode one number with the minimal compact encoding.
pub fn encode_num(v: u16) -> Vec<u8> {
    match v {
        0 => Vec::new(),
        1..=255 => vec![v as u8],
        _ => v.to_le_bytes().to_vec(),
    }
}

/// Decode a compact number, rejecting non-minimal or oversized encodings.
pub fn decode_num(bytes: &[u8]) -> Result<u16> {
    match bytes {
        [] => Ok(0),
        [0] => Err(DisputeError::StateEncoding(
            "zero must be encoded as the empty string".to_string(),
        )),
        [b] => Ok(*b as u16),
        [_, 0] => Err(DisputeError::StateEncoding(format!(
            "non-minimal two-byte encoding {:02x}00",
            bytes[0]
        ))),
        [lo, hi] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(DisputeError::StateEncoding(format!(
            "{} bytes exceed the two-byte limit",
            bytes.len()
        ))),
    }
}

/// One execution state of the disputed computation.
///
/// `pc` is always the last field: on a witness stack it sits on top, and in
/// the commitment encoding it comes last.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct State {
    pub x: u16,
    pub i: u16,
    pub pc: u16,
}

impl State {
    pub fn new(x: u16, i: u16, pc: u16) -> Self {
        Self { x, i, pc }
    }

    /// The state every trace starts from for public input `x`.
    pub fn initial(x: u16) -> Self {
        Self { x, i: 0, pc: 0 }
    }

    /// `enc(x) || enc(i) || enc(pc)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = encode_num(self.x);
        out.extend(encode_num(self.i));
        out.extend(encode_num(self.pc));
        out
    }

    /// Stack elements bottom to top: `x, i, pc`.
    pub fn stack_items(&self) -> [Vec<u8>; 3] {
        [encode_num(self.x), encode_num(self.i), encode_num(self.pc)]
    }

    /// Inverse of [`State::stack_items`].
    pub fn from_stack_items(items: &[Vec<u8>]) -> Result<Self> {
        match items {
            [x, i, pc] => Ok(Self {
                x: decode_num(x)?,
                i: decode_num(i)?,
                pc: decode_num(pc)?,
            }),
            _ => Err(DisputeError::StateEncoding(format!(
                "a state takes 3 stack elements, got {}",
                items.len()
            ))),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(x={}, i={}, pc={})", self.x, self.i, self.pc)
    }
}
