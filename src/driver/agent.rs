//! Prover and verifier agents and the local dispute loop.
//!
//! An agent proposes the witness for its own phases from its own trace.
//! [`drive_next_phase`] checks every proposal against the session before it
//! is posted: a proposal that does not match the committed data means the
//! agent cannot act, and its counterparty will take the timeout branch.

use serde::Serialize;
use tracing::{info, warn};

use super::{Direction, Outcome, PhaseWitness, ProtocolSession};
use crate::commitment::{root_commitment, sub_commitment, Digest};
use crate::error::{DisputeError, Result};
use crate::phase::{Phase, Role};
use crate::trace::{Interval, State, StepExecutor, Trace};

pub trait Agent {
    fn role(&self) -> Role;

    /// The witness this agent would post for the pending phase, or `None`
    /// when it has nothing to post.
    fn respond(&self, session: &ProtocolSession) -> Result<Option<PhaseWitness>>;
}

fn halves(trace: &Trace, interval: Interval) -> Result<(Interval, Interval)> {
    interval.halves().ok_or_else(|| {
        DisputeError::InvalidInterval {
            from: interval.from,
            to: interval.to,
            len: trace.len(),
        }
    })
}

fn state_at(trace: &Trace, index: usize) -> Result<State> {
    trace.get(index).copied().ok_or(DisputeError::InvalidInterval {
        from: index,
        to: index + 1,
        len: trace.len(),
    })
}

// ─── Prover ────────────────────────────────────────────────────────

/// Claims the computation ends where its trace ends.
pub struct ProverAgent {
    trace: Trace,
}

impl ProverAgent {
    pub fn new(trace: Trace) -> Self {
        Self { trace }
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }
}

impl Agent for ProverAgent {
    fn role(&self) -> Role {
        Role::Prover
    }

    fn respond(&self, session: &ProtocolSession) -> Result<Option<PhaseWitness>> {
        if self.trace.len() != session.trace_len() {
            return Err(DisputeError::TraceLengthInvalid {
                len: self.trace.len(),
            });
        }
        let witness = match session.phase {
            Phase::Answer => {
                let root = sub_commitment(&self.trace, self.trace.full_interval())?;
                PhaseWitness::Answer {
                    start: self.trace.first(),
                    end: self.trace.last(),
                    children: root.children,
                }
            }
            Phase::Reveal(_) => {
                let interval = session.interval;
                let (l, r) = halves(&self.trace, interval)?;
                PhaseWitness::Reveal {
                    start: state_at(&self.trace, interval.from)?,
                    mid: state_at(&self.trace, interval.mid())?,
                    end: state_at(&self.trace, interval.to)?,
                    left_children: sub_commitment(&self.trace, l)?.children,
                    right_children: sub_commitment(&self.trace, r)?.children,
                }
            }
            Phase::Leaf => PhaseWitness::Leaf {
                start: state_at(&self.trace, session.interval.from)?,
            },
            _ => return Ok(None),
        };
        Ok(Some(witness))
    }
}

// ─── Verifier ──────────────────────────────────────────────────────

/// Poses the question for `input` and disputes against its own trace.
pub struct VerifierAgent {
    input: u16,
    trace: Trace,
}

impl VerifierAgent {
    pub fn new(input: u16, trace: Trace) -> Self {
        Self { input, trace }
    }

    /// Pick the half whose claimed hash disagrees with our own trace,
    /// preferring the left one.
    pub fn select(&self, interval: Interval, claimed: (Digest, Digest)) -> Result<Direction> {
        let (l, r) = halves(&self.trace, interval)?;
        if sub_commitment(&self.trace, l)?.sub_commit != claimed.0 {
            return Ok(Direction::Left);
        }
        if sub_commitment(&self.trace, r)?.sub_commit != claimed.1 {
            return Ok(Direction::Right);
        }
        Err(DisputeError::ProtocolViolation(format!(
            "both halves of {} agree with the claim",
            interval
        )))
    }
}

impl Agent for VerifierAgent {
    fn role(&self) -> Role {
        Role::Verifier
    }

    fn respond(&self, session: &ProtocolSession) -> Result<Option<PhaseWitness>> {
        let witness = match session.phase {
            Phase::Question => PhaseWitness::Question { x: self.input },
            Phase::Challenge => {
                let claimed = match session.commitment {
                    Some(c) => c,
                    None => return Ok(None),
                };
                if claimed == root_commitment(&self.trace) {
                    info!("verifier agrees with the claimed trace");
                    return Ok(None);
                }
                PhaseWitness::Challenge { commitment: claimed }
            }
            Phase::Choose(_) => {
                let (left, right) = session.revealed.ok_or_else(|| {
                    DisputeError::ProtocolViolation("Choose without a Reveal".to_string())
                })?;
                PhaseWitness::Choose {
                    direction: self.select(session.interval, (left, right))?,
                    left,
                    right,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(witness))
    }
}

// ─── Driving ───────────────────────────────────────────────────────

/// Apply the counterparty's witness, if any, and produce this agent's reply.
///
/// Returns the session the reply applies to and the reply itself. `None`
/// means the agent has nothing valid to post: the session is settled, it is
/// not the agent's turn, or its trace cannot produce a reply that matches
/// the commitment.
pub fn drive_next_phase(
    agent: &dyn Agent,
    session: &ProtocolSession,
    peer_witness: Option<&PhaseWitness>,
    executor: &dyn StepExecutor,
) -> Result<(ProtocolSession, Option<PhaseWitness>)> {
    let session = match peer_witness {
        Some(w) => session.apply(w, executor)?.session,
        None => session.clone(),
    };
    if session.is_settled() || session.phase.actor() != agent.role() {
        return Ok((session, None));
    }

    let checked = agent
        .respond(&session)
        .and_then(|reply| match reply {
            Some(w) => session.apply(&w, executor).map(|_| Some(w)),
            None => Ok(None),
        });
    match checked {
        Ok(reply) => Ok((session, reply)),
        Err(e) if e.is_recoverable() => {
            warn!(role = %agent.role(), phase = %session.phase, error = %e, "cannot act");
            Ok((session, None))
        }
        Err(e) => Err(e),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub phase: Phase,
    pub role: Role,
    pub witness: PhaseWitness,
    /// Commitment of the output created by this spend.
    pub commitment: Option<Digest>,
    pub interval: Interval,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisputeTranscript {
    pub entries: Vec<TranscriptEntry>,
    pub final_interval: Interval,
    pub outcome: Outcome,
}

/// Run a whole dispute locally. An agent that cannot act forfeits to its
/// counterparty's timeout.
pub fn run_dispute(
    prover: &dyn Agent,
    verifier: &dyn Agent,
    total_levels: u32,
    executor: &dyn StepExecutor,
) -> Result<DisputeTranscript> {
    let mut session = ProtocolSession::new(total_levels)?;
    let mut entries = Vec::new();

    loop {
        if let Some(outcome) = session.outcome {
            return Ok(DisputeTranscript {
                entries,
                final_interval: session.interval,
                outcome,
            });
        }

        let actor = session.phase.actor();
        let agent = match actor {
            Role::Prover => prover,
            Role::Verifier => verifier,
        };
        let (current, reply) = drive_next_phase(agent, &session, None, executor)?;
        let (witness, role) = match reply {
            Some(w) => (w, actor),
            None => (
                PhaseWitness::Timeout {
                    role: actor.counterparty(),
                },
                actor.counterparty(),
            ),
        };

        let transition = current.apply(&witness, executor)?;
        entries.push(TranscriptEntry {
            phase: current.phase,
            role,
            witness,
            commitment: transition.commitment,
            interval: transition.session.interval,
        });
        session = transition.session;
    }
}
