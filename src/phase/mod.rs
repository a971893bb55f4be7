//! Protocol phases and their script trees.
//!
//! Each phase is spent from an output locked by that phase's script tree:
//! the phase's own leaves plus a timeout leaf for the counterparty of the
//! phase's actor. Every script but Leaf forwards a fresh commitment into an
//! output locked by the successor's tree, so the trees are built from the
//! end of the chain backwards (see [`graph`]).

pub mod graph;
pub mod template;
pub mod tree;

use std::fmt;

use bitcoin::key::XOnlyPublicKey;
use serde::{Deserialize, Serialize};

use crate::error::{DisputeError, Result};
use crate::script::StepProgram;

pub use graph::{build_phase_script, CommitmentRule, PhaseChain};
pub use tree::{contract_key, nums_key, tweaked_key, LeafKind, PhaseLeaf, PhaseScriptTree, NUMS_KEY};

// ─── Roles ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Prover,
    Verifier,
}

impl Role {
    pub fn counterparty(self) -> Role {
        match self {
            Role::Prover => Role::Verifier,
            Role::Verifier => Role::Prover,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Prover => write!(f, "prover"),
            Role::Verifier => write!(f, "verifier"),
        }
    }
}

// ─── Phases ────────────────────────────────────────────────────────

/// A protocol phase. `Reveal` and `Choose` carry the level, counting down
/// from the total number of levels to 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Question,
    Answer,
    Challenge,
    Reveal(u32),
    Choose(u32),
    Leaf,
}

impl Phase {
    /// The role whose signature the phase's script requires.
    pub fn actor(self) -> Role {
        match self {
            Phase::Question | Phase::Challenge | Phase::Choose(_) => Role::Verifier,
            Phase::Answer | Phase::Reveal(_) | Phase::Leaf => Role::Prover,
        }
    }

    /// The role allowed to claim the phase's output after the delay.
    pub fn timeout_role(self) -> Role {
        self.actor().counterparty()
    }

    pub fn level(self) -> Option<u32> {
        match self {
            Phase::Reveal(l) | Phase::Choose(l) => Some(l),
            _ => None,
        }
    }

    /// Check the level is within `[1, total_levels]`.
    pub fn validate(self, total_levels: u32) -> Result<()> {
        match self.level() {
            Some(level) if level == 0 || level > total_levels => Err(DisputeError::UnsupportedLevel {
                level,
                total: total_levels,
            }),
            _ => Ok(()),
        }
    }

    /// The phase that spends this phase's output, if any.
    pub fn next(self, total_levels: u32) -> Option<Phase> {
        match self {
            Phase::Question => Some(Phase::Answer),
            Phase::Answer => Some(Phase::Challenge),
            Phase::Challenge => Some(Phase::Reveal(total_levels)),
            Phase::Reveal(l) => Some(Phase::Choose(l)),
            Phase::Choose(1) => Some(Phase::Leaf),
            Phase::Choose(l) => Some(Phase::Reveal(l - 1)),
            Phase::Leaf => None,
        }
    }

    /// Every phase of a dispute with `total_levels` levels, in protocol order.
    pub fn sequence(total_levels: u32) -> Vec<Phase> {
        let mut phases = vec![Phase::Question, Phase::Answer, Phase::Challenge];
        for l in (1..=total_levels).rev() {
            phases.push(Phase::Reveal(l));
            phases.push(Phase::Choose(l));
        }
        phases.push(Phase::Leaf);
        phases
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Question => write!(f, "Question"),
            Phase::Answer => write!(f, "Answer"),
            Phase::Challenge => write!(f, "Challenge"),
            Phase::Reveal(l) => write!(f, "Reveal({})", l),
            Phase::Choose(l) => write!(f, "Choose({})", l),
            Phase::Leaf => write!(f, "Leaf"),
        }
    }
}

// ─── Parameters ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Parties {
    pub prover: XOnlyPublicKey,
    pub verifier: XOnlyPublicKey,
}

impl Parties {
    pub fn key(&self, role: Role) -> XOnlyPublicKey {
        match role {
            Role::Prover => self.prover,
            Role::Verifier => self.verifier,
        }
    }
}

/// Everything the script trees of one dispute depend on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractParams {
    pub total_levels: u32,
    /// Relative delay, in blocks, before a timeout leaf becomes spendable.
    pub timeout_blocks: u16,
    pub parties: Parties,
    pub program: StepProgram,
}

impl ContractParams {
    pub fn new(total_levels: u32, timeout_blocks: u16, parties: Parties, program: StepProgram) -> Result<Self> {
        if total_levels == 0 {
            return Err(DisputeError::UnsupportedLevel {
                level: 0,
                total: 0,
            });
        }
        Ok(Self {
            total_levels,
            timeout_blocks,
            parties,
            program,
        })
    }
}
