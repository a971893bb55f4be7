//! The bisection state machine.
//!
//! ```text
//! Question -> Answer -> Challenge -> Reveal(L) -> Choose(L) -> Reveal(L-1) -> ...
//!          -> Choose(1) -> Leaf
//! any phase -> Timeout (the counterparty of the expected actor)
//! ```
//!
//! A [`ProtocolSession`] tracks the next phase, the remaining level, the
//! disputed interval and the commitment locked in the current output.
//! [`ProtocolSession::apply`] is the single transition function: it checks a
//! witness against the commitment the way the phase script would and returns
//! the next session together with the commitment of the new output.

pub mod agent;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::commitment::{empty_subtree, hash_pair, node_hash, sha256, Digest};
use crate::error::{DisputeError, Result};
use crate::phase::{CommitmentRule, Phase, Role};
use crate::trace::{encode_num, Interval, State, StepExecutor};

pub use agent::{drive_next_phase, run_dispute, Agent, DisputeTranscript, ProverAgent, TranscriptEntry, VerifierAgent};

// ─── Witnesses ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
}

/// The data a party posts to spend the current output, signature excluded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseWitness {
    Question {
        x: u16,
    },
    Answer {
        start: State,
        end: State,
        children: Digest,
    },
    Challenge {
        commitment: Digest,
    },
    Reveal {
        start: State,
        mid: State,
        end: State,
        left_children: Digest,
        right_children: Digest,
    },
    Choose {
        direction: Direction,
        left: Digest,
        right: Digest,
    },
    Leaf {
        start: State,
    },
    Timeout {
        role: Role,
    },
}

impl PhaseWitness {
    /// Stack elements bottom to top, as the phase script consumes them.
    pub fn to_stack(&self) -> Vec<Vec<u8>> {
        let mut stack = Vec::new();
        match self {
            PhaseWitness::Question { x } => stack.push(encode_num(*x)),
            PhaseWitness::Answer {
                start,
                end,
                children,
            } => {
                stack.push(children.0.to_vec());
                stack.extend(end.stack_items());
                stack.extend(start.stack_items());
            }
            PhaseWitness::Challenge { commitment } => stack.push(commitment.0.to_vec()),
            PhaseWitness::Reveal {
                start,
                mid,
                end,
                left_children,
                right_children,
            } => {
                stack.push(right_children.0.to_vec());
                stack.extend(end.stack_items());
                stack.push(left_children.0.to_vec());
                stack.extend(mid.stack_items());
                stack.extend(start.stack_items());
            }
            PhaseWitness::Choose {
                direction,
                left,
                right,
            } => {
                stack.push(match direction {
                    Direction::Left => Vec::new(),
                    Direction::Right => vec![1],
                });
                stack.push(left.0.to_vec());
                stack.push(right.0.to_vec());
            }
            PhaseWitness::Leaf { start } => stack.extend(start.stack_items()),
            PhaseWitness::Timeout { .. } => {}
        }
        stack
    }

    pub fn name(&self) -> &'static str {
        match self {
            PhaseWitness::Question { .. } => "Question",
            PhaseWitness::Answer { .. } => "Answer",
            PhaseWitness::Challenge { .. } => "Challenge",
            PhaseWitness::Reveal { .. } => "Reveal",
            PhaseWitness::Choose { .. } => "Choose",
            PhaseWitness::Leaf { .. } => "Leaf",
            PhaseWitness::Timeout { .. } => "Timeout",
        }
    }
}

// ─── Outcome ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Settlement {
    /// The prover re-executed the disputed step on-chain.
    Leaf,
    /// The expected actor of `phase` never acted.
    Timeout { phase: Phase },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub winner: Role,
    pub settlement: Settlement,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.settlement {
            Settlement::Leaf => write!(f, "{} wins by Leaf settlement", self.winner),
            Settlement::Timeout { phase } => {
                write!(f, "{} wins by timeout at {}", self.winner, phase)
            }
        }
    }
}

// ─── Session ───────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProtocolSession {
    pub total_levels: u32,
    /// The phase whose spend is expected next.
    pub phase: Phase,
    /// Remaining bisection rounds.
    pub level: u32,
    pub interval: Interval,
    /// Commitment locked in the current output; `None` for the contract.
    pub commitment: Option<Digest>,
    /// `(hL, hR)` opened by the last Reveal, while Choose is pending.
    pub revealed: Option<(Digest, Digest)>,
    pub outcome: Option<Outcome>,
}

/// Result of applying one witness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub session: ProtocolSession,
    /// Commitment of the output the spend creates, if it creates one.
    pub commitment: Option<Digest>,
}

impl ProtocolSession {
    pub fn new(total_levels: u32) -> Result<Self> {
        if total_levels == 0 || total_levels >= usize::BITS {
            return Err(DisputeError::UnsupportedLevel {
                level: total_levels,
                total: total_levels,
            });
        }
        Ok(Self {
            total_levels,
            phase: Phase::Question,
            level: total_levels,
            interval: Interval {
                from: 0,
                to: 1usize << total_levels,
            },
            commitment: None,
            revealed: None,
            outcome: None,
        })
    }

    pub fn trace_len(&self) -> usize {
        (1usize << self.total_levels) + 1
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    fn expect_commitment(&self) -> Result<Digest> {
        self.commitment.ok_or_else(|| {
            DisputeError::ProtocolViolation(format!("{} has no commitment to spend", self.phase))
        })
    }

    fn check(&self, expected: Digest, actual: Digest) -> Result<()> {
        if expected != actual {
            return Err(DisputeError::CommitmentMismatch { expected, actual });
        }
        Ok(())
    }

    /// Apply `witness` to the pending phase.
    pub fn apply(&self, witness: &PhaseWitness, executor: &dyn StepExecutor) -> Result<Transition> {
        if let Some(outcome) = self.outcome {
            return Err(DisputeError::ProtocolViolation(format!(
                "session already settled: {}",
                outcome
            )));
        }

        let mut next = self.clone();
        let commitment = match (self.phase, witness) {
            (phase, PhaseWitness::Timeout { role }) => {
                if *role != phase.timeout_role() {
                    return Err(DisputeError::witness(
                        phase,
                        format!("timeout belongs to the {}", phase.timeout_role()),
                    ));
                }
                next.outcome = Some(Outcome {
                    winner: *role,
                    settlement: Settlement::Timeout { phase },
                });
                None
            }

            (Phase::Question, PhaseWitness::Question { x }) => {
                next.phase = Phase::Answer;
                Some(sha256(&State::initial(*x).encode()))
            }

            (Phase::Answer, PhaseWitness::Answer {
                start,
                end,
                children,
            }) => {
                self.check(self.expect_commitment()?, sha256(&start.encode()))?;
                let halt = executor.halt_pc();
                if end.pc != halt {
                    return Err(DisputeError::witness(
                        Phase::Answer,
                        format!("end state {} does not halt at pc {}", end, halt),
                    ));
                }
                next.phase = Phase::Challenge;
                Some(node_hash(start, end, children))
            }

            (Phase::Challenge, PhaseWitness::Challenge { commitment }) => {
                self.check(self.expect_commitment()?, *commitment)?;
                next.phase = Phase::Reveal(self.level);
                Some(*commitment)
            }

            (Phase::Reveal(level), PhaseWitness::Reveal {
                start,
                mid,
                end,
                left_children,
                right_children,
            }) => {
                self.check_level(level)?;
                let hl = node_hash(start, mid, left_children);
                let hr = node_hash(mid, end, right_children);
                let cd = hash_pair(&hl, &hr);
                self.check(self.expect_commitment()?, node_hash(start, end, &cd))?;
                next.phase = Phase::Choose(level);
                next.revealed = Some((hl, hr));
                Some(cd)
            }

            (Phase::Choose(level), PhaseWitness::Choose {
                direction,
                left,
                right,
            }) => {
                self.check_level(level)?;
                self.check(self.expect_commitment()?, hash_pair(left, right))?;
                let (l, r) = self.interval.halves().ok_or_else(|| {
                    DisputeError::ProtocolViolation(format!("{} cannot split {}", Phase::Choose(level), self.interval))
                })?;
                let (interval, selected) = match direction {
                    Direction::Left => (l, *left),
                    Direction::Right => (r, *right),
                };
                next.interval = interval;
                next.level = level - 1;
                next.revealed = None;
                next.phase = if next.level == 0 {
                    Phase::Leaf
                } else {
                    Phase::Reveal(next.level)
                };
                Some(selected)
            }

            (Phase::Leaf, PhaseWitness::Leaf { start }) => {
                let steps = executor.step_count();
                if start.pc as usize >= steps {
                    return Err(DisputeError::UnknownProgramCounter { pc: start.pc, steps });
                }
                let end = executor.execute(start)?;
                self.check(self.expect_commitment()?, node_hash(start, &end, &empty_subtree()))?;
                next.outcome = Some(Outcome {
                    winner: Role::Prover,
                    settlement: Settlement::Leaf,
                });
                None
            }

            (phase, other) => {
                return Err(DisputeError::witness(
                    phase,
                    format!("got a {} witness", other.name()),
                ))
            }
        };

        next.commitment = commitment;
        if let Some(outcome) = next.outcome {
            info!(%outcome, "dispute settled");
        } else {
            debug!(
                phase = %self.phase,
                rule = ?CommitmentRule::of(self.phase),
                level = next.level,
                from = next.interval.from,
                to = next.interval.to,
                commitment = ?next.commitment,
                "applied witness"
            );
        }
        Ok(Transition {
            session: next,
            commitment,
        })
    }

    fn check_level(&self, level: u32) -> Result<()> {
        if level == 0 || level > self.total_levels {
            return Err(DisputeError::UnsupportedLevel {
                level,
                total: self.total_levels,
            });
        }
        if level != self.level {
            return Err(DisputeError::ProtocolViolation(format!(
                "level {} out of step with session level {}",
                level, self.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
