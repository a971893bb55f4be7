//! Phase scripts as one covenant template plus per-phase bodies.
//!
//! Every phase script has the shape
//!
//! ```text
//! <body>                    authenticate the spent output, transform data
//! 0 0 <next root> 0 CCV     forward H(output data) to output 0 (not Leaf)
//! <actor key> CHECKSIG
//! ```
//!
//! Witness stacks are listed bottom to top; the signature is always at the
//! bottom so it is the last element consumed.

use bitcoin::hashes::Hash;
use bitcoin::key::XOnlyPublicKey;
use bitcoin::TapNodeHash;

use super::tree::LeafKind;
use super::{ContractParams, Phase};
use crate::error::{DisputeError, Result};
use crate::script::{Instr, Script, CURRENT};
use crate::trace::StepExecutor;

/// The shared skeleton of every phase script.
pub struct Covenant {
    pub body: Script,
    pub forward: Option<TapNodeHash>,
    pub signer: XOnlyPublicKey,
}

impl Covenant {
    pub fn assemble(self) -> Script {
        let mut script = self.body;
        if let Some(root) = self.forward {
            script = script.append(&forward_output(&root));
        }
        script.append(&require_signature(&self.signer))
    }
}

// ─── Fragments ─────────────────────────────────────────────────────

/// Consumes the data on top: the spent input must be locked by the NUMS
/// key tweaked with it and by the current script tree.
pub fn authenticate_input() -> Script {
    Script::new()
        .push(CURRENT.to_vec())
        .push(Vec::new())
        .push(CURRENT.to_vec())
        .push(CURRENT.to_vec())
        .op(Instr::CheckContractVerify)
}

/// Consumes the data on top: output 0 must be locked by the NUMS key
/// tweaked with it and by the tree with `root`.
pub fn forward_output(root: &TapNodeHash) -> Script {
    Script::new()
        .num(0)
        .push(Vec::new())
        .push(root.to_byte_array().to_vec())
        .num(0)
        .op(Instr::CheckContractVerify)
}

pub fn require_signature(key: &XOnlyPublicKey) -> Script {
    Script::new().push(key.serialize().to_vec()).op(Instr::CheckSig)
}

/// `state → enc(state)` for the three state elements on top.
fn encode_state() -> Script {
    Script::new().op(Instr::Cat).op(Instr::Cat)
}

// ─── Phase bodies ──────────────────────────────────────────────────

/// Witness `[sig, x]`. Forwards `H(enc(x, 0, 0))`.
pub fn question(next: TapNodeHash, verifier: XOnlyPublicKey) -> Script {
    let body = Script::new()
        .push(Vec::new())
        .push(Vec::new())
        .append(&encode_state())
        .op(Instr::Sha256);
    Covenant {
        body,
        forward: Some(next),
        signer: verifier,
    }
    .assemble()
}

/// Witness `[sig, cd, ex, ei, epc, sx, si, spc]`. Authenticates the start
/// state, requires the end state to halt, and forwards the root node
/// `H(enc(start) || enc(end) || cd)`.
pub fn answer(next: TapNodeHash, prover: XOnlyPublicKey, halt_pc: u16) -> Script {
    let body = Script::new()
        .op(Instr::ThreeDup)
        .append(&encode_state())
        .op(Instr::Sha256)
        .append(&authenticate_input())
        .append(&encode_state())
        .op(Instr::ToAlt)
        .op(Instr::Dup)
        .num(halt_pc)
        .op(Instr::EqualVerify)
        .append(&encode_state())
        .ops([
            Instr::FromAlt,
            Instr::Swap,
            Instr::Cat,
            Instr::Swap,
            Instr::Cat,
            Instr::Sha256,
        ]);
    Covenant {
        body,
        forward: Some(next),
        signer: prover,
    }
    .assemble()
}

/// Witness `[sig, c]`. Forwards the authenticated commitment unchanged.
pub fn challenge(next: TapNodeHash, verifier: XOnlyPublicKey) -> Script {
    let body = Script::new().op(Instr::Dup).append(&authenticate_input());
    Covenant {
        body,
        forward: Some(next),
        signer: verifier,
    }
    .assemble()
}

/// Witness `[sig, cdR, ex, ei, epc, cdL, mx, mi, mpc, sx, si, spc]`.
///
/// Opens node `H(enc(s) || enc(e) || cd)` into its halves
/// `hL = H(enc(s) || enc(m) || cdL)` and `hR = H(enc(m) || enc(e) || cdR)`,
/// authenticates the node, and forwards `cd = H(hL || hR)`.
pub fn reveal(next: TapNodeHash, prover: XOnlyPublicKey) -> Script {
    let body = Script::new()
        // enc(s) to alt
        .append(&encode_state())
        .op(Instr::ToAlt)
        // enc(m), keeping a copy of enc(s) on alt
        .append(&encode_state())
        .ops([Instr::FromAlt, Instr::Dup, Instr::ToAlt])
        // hL
        .ops([Instr::Over, Instr::Cat, Instr::Rot, Instr::Cat, Instr::Sha256])
        .ops([Instr::ToAlt, Instr::ToAlt])
        // hR
        .append(&encode_state())
        .ops([
            Instr::FromAlt,
            Instr::Over,
            Instr::Cat,
            Instr::Rot,
            Instr::Cat,
            Instr::Sha256,
        ])
        // cd
        .ops([Instr::FromAlt, Instr::Swap, Instr::Cat, Instr::Sha256])
        // node
        .ops([
            Instr::Dup,
            Instr::Rot,
            Instr::FromAlt,
            Instr::Swap,
            Instr::Cat,
            Instr::Swap,
            Instr::Cat,
            Instr::Sha256,
        ])
        .append(&authenticate_input());
    Covenant {
        body,
        forward: Some(next),
        signer: prover,
    }
    .assemble()
}

/// Witness `[sig, dir, hL, hR]` with `dir = []` for left and `[1]` for
/// right. Authenticates `H(hL || hR)` and forwards the selected half.
pub fn choose(next: TapNodeHash, verifier: XOnlyPublicKey) -> Script {
    let body = Script::new()
        .ops([Instr::TwoDup, Instr::Cat, Instr::Sha256])
        .append(&authenticate_input())
        .ops([Instr::Rot, Instr::If, Instr::Swap, Instr::EndIf, Instr::Drop]);
    Covenant {
        body,
        forward: Some(next),
        signer: verifier,
    }
    .assemble()
}

/// Witness `[sig, sx, si, spc]`. Runs the step for `pc` and authenticates
/// the unit node `H(enc(s) || enc(step(s)) || H(H(∅) || H(∅)))`.
pub fn leaf(pc: u16, step: &Script, prover: XOnlyPublicKey) -> Script {
    let body = Script::new()
        .op(Instr::Dup)
        .num(pc)
        .op(Instr::EqualVerify)
        .op(Instr::ThreeDup)
        .append(step)
        .append(&encode_state())
        .op(Instr::ToAlt)
        .append(&encode_state())
        .ops([Instr::FromAlt, Instr::Cat])
        .push(Vec::new())
        .ops([
            Instr::Sha256,
            Instr::Dup,
            Instr::Cat,
            Instr::Sha256,
            Instr::Cat,
            Instr::Sha256,
        ])
        .append(&authenticate_input());
    Covenant {
        body,
        forward: None,
        signer: prover,
    }
    .assemble()
}

/// Witness `[sig]`. Spendable by `key` once the output is `delay` blocks
/// deep.
pub fn timeout(key: XOnlyPublicKey, delay: u16) -> Script {
    Script::new()
        .num(delay)
        .op(Instr::CheckSequenceVerify)
        .op(Instr::Drop)
        .append(&require_signature(&key))
}

// ─── Dispatch ──────────────────────────────────────────────────────

/// All leaves of `phase`'s tree, timeout last. `next` is the successor's
/// tree root and is required for every phase but Leaf.
pub fn phase_leaves(
    phase: Phase,
    params: &ContractParams,
    next: Option<TapNodeHash>,
) -> Result<Vec<(LeafKind, Script)>> {
    phase.validate(params.total_levels)?;
    let parties = &params.parties;
    let need_next = || {
        next.ok_or_else(|| DisputeError::Taproot(format!("{} needs its successor's tree root", phase)))
    };

    let mut leaves = match phase {
        Phase::Question => vec![(LeafKind::Phase, question(need_next()?, parties.verifier))],
        Phase::Answer => vec![(
            LeafKind::Phase,
            answer(need_next()?, parties.prover, params.program.halt_pc()),
        )],
        Phase::Challenge => vec![(LeafKind::Phase, challenge(need_next()?, parties.verifier))],
        Phase::Reveal(_) => vec![(LeafKind::Phase, reveal(need_next()?, parties.prover))],
        Phase::Choose(_) => vec![(LeafKind::Phase, choose(need_next()?, parties.verifier))],
        Phase::Leaf => params
            .program
            .steps()
            .iter()
            .enumerate()
            .map(|(pc, step)| (LeafKind::Step(pc as u16), leaf(pc as u16, step, parties.prover)))
            .collect(),
    };

    let role = phase.timeout_role();
    leaves.push((
        LeafKind::Timeout {
            role,
            delay: params.timeout_blocks,
        },
        timeout(parties.key(role), params.timeout_blocks),
    ));
    Ok(leaves)
}
