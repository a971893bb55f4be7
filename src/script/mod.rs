//! Script IR for phase leaves and step programs.
//!
//! Phase scripts and step programs are written against a small typed
//! instruction set. The same `Script` value is assembled into ledger script
//! bytes for the taproot leaf and interpreted by the reference [`Machine`]
//! when a step is executed or a spend is dry-run before publishing.
//!
//! Numbers pushed by scripts use the compact state encoding
//! (`crate::trace::encode_num`), so the evaluator's arithmetic and the
//! commitment bytes agree on every value.

pub mod eval;
pub mod program;

use std::fmt;

use bitcoin::opcodes::all::*;
use bitcoin::opcodes::Opcode;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::ScriptBuf;

use crate::error::{DisputeError, Result};
use crate::trace::encode_num;

pub use eval::{CheckMode, ContractCheck, ContractKey, ExecContext, Machine, NoContext, TapTreeRef};
pub use program::StepProgram;

/// `OP_CHECKCONTRACTVERIFY` occupies the `OP_SUCCESS187` slot (0xbb).
pub const OP_CHECKCONTRACTVERIFY: Opcode = OP_RETURN_187;

/// Stack element meaning "the current input" for index and taptree
/// arguments, and "check an input" for the flags argument.
pub const CURRENT: [u8; 1] = [0x81];

// ─── Instructions ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    // ── Push ──
    /// Raw data push.
    Push(Vec<u8>),
    /// Compact-encoded number push.
    Num(u16),

    // ── Stack ──
    Drop,
    Dup,
    TwoDup,
    ThreeDup,
    Over,
    Swap,
    Rot,
    ToAlt,
    FromAlt,

    // ── Arithmetic ──
    Add,
    OneAdd,
    LessThan,

    // ── Comparison ──
    Equal,
    EqualVerify,
    Verify,

    // ── Flow ──
    If,
    Else,
    EndIf,
    Nop,

    // ── Crypto ──
    Cat,
    Sha256,
    CheckSig,

    // ── Covenant ──
    /// Pops `data index pk taptree flags` (flags on top).
    CheckContractVerify,
    /// Requires the input's relative height to reach the top number.
    CheckSequenceVerify,
}

impl Instr {
    fn opcode(&self) -> Option<Opcode> {
        let op = match self {
            Instr::Push(_) | Instr::Num(_) => return None,
            Instr::Drop => OP_DROP,
            Instr::Dup => OP_DUP,
            Instr::TwoDup => OP_2DUP,
            Instr::ThreeDup => OP_3DUP,
            Instr::Over => OP_OVER,
            Instr::Swap => OP_SWAP,
            Instr::Rot => OP_ROT,
            Instr::ToAlt => OP_TOALTSTACK,
            Instr::FromAlt => OP_FROMALTSTACK,
            Instr::Add => OP_ADD,
            Instr::OneAdd => OP_1ADD,
            Instr::LessThan => OP_LESSTHAN,
            Instr::Equal => OP_EQUAL,
            Instr::EqualVerify => OP_EQUALVERIFY,
            Instr::Verify => OP_VERIFY,
            Instr::If => OP_IF,
            Instr::Else => OP_ELSE,
            Instr::EndIf => OP_ENDIF,
            Instr::Nop => OP_NOP,
            Instr::Cat => OP_CAT,
            Instr::Sha256 => OP_SHA256,
            Instr::CheckSig => OP_CHECKSIG,
            Instr::CheckContractVerify => OP_CHECKCONTRACTVERIFY,
            Instr::CheckSequenceVerify => OP_CSV,
        };
        Some(op)
    }
}

impl Instr {
    fn mnemonic(&self) -> &'static str {
        match self {
            Instr::Push(_) | Instr::Num(_) => "",
            Instr::Drop => "OP_DROP",
            Instr::Dup => "OP_DUP",
            Instr::TwoDup => "OP_2DUP",
            Instr::ThreeDup => "OP_3DUP",
            Instr::Over => "OP_OVER",
            Instr::Swap => "OP_SWAP",
            Instr::Rot => "OP_ROT",
            Instr::ToAlt => "OP_TOALTSTACK",
            Instr::FromAlt => "OP_FROMALTSTACK",
            Instr::Add => "OP_ADD",
            Instr::OneAdd => "OP_1ADD",
            Instr::LessThan => "OP_LESSTHAN",
            Instr::Equal => "OP_EQUAL",
            Instr::EqualVerify => "OP_EQUALVERIFY",
            Instr::Verify => "OP_VERIFY",
            Instr::If => "OP_IF",
            Instr::Else => "OP_ELSE",
            Instr::EndIf => "OP_ENDIF",
            Instr::Nop => "OP_NOP",
            Instr::Cat => "OP_CAT",
            Instr::Sha256 => "OP_SHA256",
            Instr::CheckSig => "OP_CHECKSIG",
            Instr::CheckContractVerify => "OP_CHECKCONTRACTVERIFY",
            Instr::CheckSequenceVerify => "OP_CHECKSEQUENCEVERIFY",
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Push(bytes) if bytes.is_empty() => write!(f, "OP_0"),
            Instr::Push(bytes) => {
                write!(f, "<")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, ">")
            }
            Instr::Num(n) => write!(f, "{}", n),
            other => f.write_str(other.mnemonic()),
        }
    }
}

// ─── Script ────────────────────────────────────────────────────────

/// An instruction sequence, built by chaining.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub instrs: Vec<Instr>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, instr: Instr) -> Self {
        self.instrs.push(instr);
        self
    }

    pub fn ops(mut self, instrs: impl IntoIterator<Item = Instr>) -> Self {
        self.instrs.extend(instrs);
        self
    }

    pub fn push(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.op(Instr::Push(bytes.into()))
    }

    pub fn num(self, n: u16) -> Self {
        self.op(Instr::Num(n))
    }

    pub fn append(mut self, other: &Script) -> Self {
        self.instrs.extend(other.instrs.iter().cloned());
        self
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Assemble into ledger script bytes with minimal pushes.
    pub fn to_script_buf(&self) -> Result<ScriptBuf> {
        let mut builder = Builder::new();
        for (index, instr) in self.instrs.iter().enumerate() {
            builder = match instr {
                Instr::Push(bytes) => push_minimal(builder, bytes, index)?,
                Instr::Num(n) => push_minimal(builder, &encode_num(*n), index)?,
                other => match other.opcode() {
                    Some(op) => builder.push_opcode(op),
                    None => builder,
                },
            };
        }
        Ok(builder.into_script())
    }
}

fn push_minimal(builder: Builder, bytes: &[u8], index: usize) -> Result<Builder> {
    let builder = match bytes {
        [] => builder.push_opcode(OP_PUSHBYTES_0),
        [n @ 1..=16] => builder.push_opcode(Opcode::from(OP_PUSHNUM_1.to_u8() + n - 1)),
        [0x81] => builder.push_opcode(OP_PUSHNUM_NEG1),
        _ => {
            let data = PushBytesBuf::try_from(bytes.to_vec()).map_err(|e| DisputeError::Script {
                index,
                reason: e.to_string(),
            })?;
            builder.push_slice(data)
        }
    };
    Ok(builder)
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instr) in self.instrs.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", instr)?;
        }
        Ok(())
    }
}
