//! Taproot trees for phase outputs.
//!
//! A phase output's internal key is the NUMS point tweaked by the phase
//! commitment, `P = NUMS + sha256(NUMS || data)·G`, and its script tree is
//! the phase tree. The contract output uses the bare NUMS point.

use std::fmt;

use bitcoin::key::XOnlyPublicKey;
use bitcoin::secp256k1::{Scalar, Secp256k1};
use bitcoin::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::{ScriptBuf, TapNodeHash};
use serde::Serialize;
use tracing::debug;

use super::{Phase, Role};
use crate::commitment::sha256;
use crate::error::{DisputeError, Result};
use crate::script::Script;

/// x-only NUMS point `H = lift_x(sha256(G))` with no known discrete log.
pub const NUMS_KEY: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a, 0x5e,
    0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80, 0x3a, 0xc0,
];

fn taproot_err(e: impl fmt::Display) -> DisputeError {
    DisputeError::Taproot(e.to_string())
}

pub fn nums_key() -> Result<XOnlyPublicKey> {
    XOnlyPublicKey::from_slice(&NUMS_KEY).map_err(taproot_err)
}

/// The NUMS point tweaked by `data`; bare NUMS for empty data.
pub fn contract_key(data: &[u8]) -> Result<XOnlyPublicKey> {
    tweaked_key(nums_key()?, data)
}

/// `base + sha256(base || data)·G`, or `base` itself for empty data.
pub fn tweaked_key(base: XOnlyPublicKey, data: &[u8]) -> Result<XOnlyPublicKey> {
    if data.is_empty() {
        return Ok(base);
    }
    let mut preimage = base.serialize().to_vec();
    preimage.extend_from_slice(data);
    let tweak = Scalar::from_be_bytes(sha256(&preimage).0).map_err(taproot_err)?;
    let secp = Secp256k1::verification_only();
    let (key, _parity) = base.add_tweak(&secp, &tweak).map_err(taproot_err)?;
    Ok(key)
}

// ─── Leaves ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum LeafKind {
    /// The phase's own script.
    Phase,
    /// Leaf settlement for one program counter.
    Step(u16),
    Timeout { role: Role, delay: u16 },
}

impl fmt::Display for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafKind::Phase => write!(f, "phase"),
            LeafKind::Step(pc) => write!(f, "step pc={}", pc),
            LeafKind::Timeout { role, delay } => write!(f, "timeout {} after {}", role, delay),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseLeaf {
    pub kind: LeafKind,
    pub script: Script,
    pub script_buf: ScriptBuf,
}

// ─── Tree ──────────────────────────────────────────────────────────

/// The alternative spend scripts of one phase and their taproot commitment.
#[derive(Clone, Debug)]
pub struct PhaseScriptTree {
    pub phase: Phase,
    leaves: Vec<PhaseLeaf>,
    builder: TaprootBuilder,
    root: TapNodeHash,
}

impl PhaseScriptTree {
    pub fn build(phase: Phase, leaves: Vec<(LeafKind, Script)>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(leaves.len());
        for (kind, script) in leaves {
            let script_buf = script.to_script_buf()?;
            compiled.push(PhaseLeaf {
                kind,
                script,
                script_buf,
            });
        }

        let builder =
            TaprootBuilder::with_huffman_tree(compiled.iter().map(|l| (1u32, l.script_buf.clone())))
                .map_err(taproot_err)?;
        let secp = Secp256k1::verification_only();
        let root = builder
            .clone()
            .finalize(&secp, nums_key()?)
            .map_err(|_| DisputeError::Taproot(format!("{} tree is incomplete", phase)))?
            .merkle_root()
            .ok_or_else(|| DisputeError::Taproot(format!("{} tree has no leaves", phase)))?;

        debug!(%phase, leaves = compiled.len(), root = %root, "built phase tree");
        Ok(Self {
            phase,
            leaves: compiled,
            builder,
            root,
        })
    }

    pub fn root(&self) -> TapNodeHash {
        self.root
    }

    pub fn leaves(&self) -> &[PhaseLeaf] {
        &self.leaves
    }

    pub fn leaf(&self, kind: LeafKind) -> Result<&PhaseLeaf> {
        if let Some(leaf) = self.leaves.iter().find(|l| l.kind == kind) {
            return Ok(leaf);
        }
        match kind {
            LeafKind::Step(pc) => Err(DisputeError::UnknownProgramCounter {
                pc,
                steps: self
                    .leaves
                    .iter()
                    .filter(|l| matches!(l.kind, LeafKind::Step(_)))
                    .count(),
            }),
            other => Err(DisputeError::Taproot(format!(
                "{} tree has no {} leaf",
                self.phase, other
            ))),
        }
    }

    pub fn timeout_leaf(&self) -> Result<&PhaseLeaf> {
        self.leaves
            .iter()
            .find(|l| matches!(l.kind, LeafKind::Timeout { .. }))
            .ok_or_else(|| DisputeError::Taproot(format!("{} tree has no timeout leaf", self.phase)))
    }

    /// Spend info for an output of this tree committing to `data`.
    pub fn spend_info(&self, data: &[u8]) -> Result<TaprootSpendInfo> {
        let secp = Secp256k1::verification_only();
        self.builder
            .clone()
            .finalize(&secp, contract_key(data)?)
            .map_err(|_| DisputeError::Taproot(format!("{} tree is incomplete", self.phase)))
    }

    pub fn script_pubkey(&self, data: &[u8]) -> Result<ScriptBuf> {
        Ok(ScriptBuf::new_p2tr_tweaked(self.spend_info(data)?.output_key()))
    }

    pub fn control_block(&self, leaf: &PhaseLeaf, data: &[u8]) -> Result<ControlBlock> {
        self.spend_info(data)?
            .control_block(&(leaf.script_buf.clone(), LeafVersion::TapScript))
            .ok_or_else(|| {
                DisputeError::Taproot(format!("{} leaf is not in the {} tree", leaf.kind, self.phase))
            })
    }
}

impl fmt::Display for PhaseScriptTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} tree (root {})", self.phase, self.root)?;
        for leaf in &self.leaves {
            writeln!(f, "  [{}] {}", leaf.kind, leaf.script)?;
        }
        Ok(())
    }
}
