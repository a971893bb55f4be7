use bitcoin::key::{Keypair, XOnlyPublicKey};
use bitcoin::secp256k1::Secp256k1;

use super::*;
use crate::commitment::{root_commitment, sub_commitment};
use crate::phase::{ContractParams, LeafKind, Parties, PhaseChain};
use crate::script::eval::RecordingContext;
use crate::script::{CheckMode, Machine, StepProgram};
use crate::trace::{generate_trace, Trace};

fn program() -> StepProgram {
    StepProgram::doubling(8)
}

fn honest() -> Trace {
    generate_trace(&program(), 2, 5, 64).unwrap()
}

fn corrupted_at(index: usize) -> Trace {
    let trace = honest();
    let s = trace.states()[index];
    trace.with_state(index, State::new(s.x + 1, s.i, s.pc)).unwrap()
}

fn key(seed: u8) -> XOnlyPublicKey {
    let secp = Secp256k1::new();
    Keypair::from_seckey_slice(&secp, &[seed; 32])
        .unwrap()
        .x_only_public_key()
        .0
}

/// Session after Question, Answer and Challenge against `claimed`.
fn challenged(claimed: &Trace) -> ProtocolSession {
    let p = program();
    let s = ProtocolSession::new(5).unwrap();
    let s = s.apply(&PhaseWitness::Question { x: 2 }, &p).unwrap().session;
    let answer = PhaseWitness::Answer {
        start: claimed.first(),
        end: claimed.last(),
        children: sub_commitment(claimed, claimed.full_interval()).unwrap().children,
    };
    let s = s.apply(&answer, &p).unwrap().session;
    let c = PhaseWitness::Challenge {
        commitment: root_commitment(claimed),
    };
    s.apply(&c, &p).unwrap().session
}

// ─── Transitions ───────────────────────────────────────────────────

#[test]
fn test_new_session_rejects_zero_levels() {
    assert!(matches!(
        ProtocolSession::new(0),
        Err(DisputeError::UnsupportedLevel { level: 0, .. })
    ));
    let s = ProtocolSession::new(5).unwrap();
    assert_eq!(s.phase, Phase::Question);
    assert_eq!(s.interval, Interval { from: 0, to: 32 });
    assert_eq!(s.trace_len(), 33);
}

#[test]
fn test_question_commits_initial_state() {
    let t = ProtocolSession::new(5)
        .unwrap()
        .apply(&PhaseWitness::Question { x: 2 }, &program())
        .unwrap();
    assert_eq!(t.commitment, Some(sha256(&State::initial(2).encode())));
    assert_eq!(t.session.phase, Phase::Answer);
}

#[test]
fn test_answer_commits_root_node() {
    let trace = honest();
    let s = challenged(&trace);
    assert_eq!(s.phase, Phase::Reveal(5));
    assert_eq!(s.commitment, Some(root_commitment(&trace)));
}

#[test]
fn test_answer_must_start_at_the_question() {
    let p = program();
    let trace = generate_trace(&p, 3, 5, 64).unwrap();
    let s = ProtocolSession::new(5).unwrap();
    let s = s.apply(&PhaseWitness::Question { x: 2 }, &p).unwrap().session;
    let answer = PhaseWitness::Answer {
        start: trace.first(),
        end: trace.last(),
        children: sub_commitment(&trace, trace.full_interval()).unwrap().children,
    };
    assert!(matches!(
        s.apply(&answer, &p),
        Err(DisputeError::CommitmentMismatch { .. })
    ));
}

#[test]
fn test_answer_end_must_halt() {
    let p = program();
    let trace = honest();
    let s = ProtocolSession::new(5).unwrap();
    let s = s.apply(&PhaseWitness::Question { x: 2 }, &p).unwrap().session;
    let answer = PhaseWitness::Answer {
        start: trace.first(),
        end: State::new(512, 8, 0),
        children: Digest([0; 32]),
    };
    assert!(matches!(
        s.apply(&answer, &p),
        Err(DisputeError::InvalidWitness { .. })
    ));
}

#[test]
fn test_reveal_and_choose_halve_the_interval() {
    let trace = honest();
    let p = program();
    let s = challenged(&trace);
    let prover = ProverAgent::new(trace.clone());
    let reveal = prover.respond(&s).unwrap().unwrap();
    let t = s.apply(&reveal, &p).unwrap();
    assert_eq!(t.session.phase, Phase::Choose(5));

    let (l, r) = trace.full_interval().halves().unwrap();
    let hl = sub_commitment(&trace, l).unwrap().sub_commit;
    let hr = sub_commitment(&trace, r).unwrap().sub_commit;
    assert_eq!(t.session.revealed, Some((hl, hr)));
    assert_eq!(t.commitment, Some(hash_pair(&hl, &hr)));

    let choose = PhaseWitness::Choose {
        direction: Direction::Right,
        left: hl,
        right: hr,
    };
    let t = t.session.apply(&choose, &p).unwrap();
    assert_eq!(t.session.phase, Phase::Reveal(4));
    assert_eq!(t.session.level, 4);
    assert_eq!(t.session.interval, Interval { from: 16, to: 32 });
    assert_eq!(t.commitment, Some(hr));
    assert_eq!(t.session.revealed, None);
}

#[test]
fn test_reveal_rejects_foreign_midpoint() {
    let trace = honest();
    let s = challenged(&trace);
    let other = corrupted_at(16);
    let reveal = ProverAgent::new(other).respond(&s).unwrap().unwrap();
    assert!(matches!(
        s.apply(&reveal, &program()),
        Err(DisputeError::CommitmentMismatch { .. })
    ));
}

#[test]
fn test_choose_rejects_swapped_hashes() {
    let trace = honest();
    let p = program();
    let s = challenged(&trace);
    let reveal = ProverAgent::new(trace).respond(&s).unwrap().unwrap();
    let s = s.apply(&reveal, &p).unwrap().session;
    let (hl, hr) = s.revealed.unwrap();
    let swapped = PhaseWitness::Choose {
        direction: Direction::Left,
        left: hr,
        right: hl,
    };
    assert!(matches!(
        s.apply(&swapped, &p),
        Err(DisputeError::CommitmentMismatch { .. })
    ));
}

#[test]
fn test_wrong_witness_kind_is_rejected() {
    let s = ProtocolSession::new(5).unwrap();
    let err = s
        .apply(&PhaseWitness::Leaf { start: State::initial(2) }, &program())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid witness for Question: got a Leaf witness"
    );
}

#[test]
fn test_timeout_belongs_to_counterparty() {
    let s = ProtocolSession::new(5).unwrap();
    assert!(s
        .apply(&PhaseWitness::Timeout { role: Role::Verifier }, &program())
        .is_err());
    let t = s
        .apply(&PhaseWitness::Timeout { role: Role::Prover }, &program())
        .unwrap();
    assert_eq!(
        t.session.outcome,
        Some(Outcome {
            winner: Role::Prover,
            settlement: Settlement::Timeout {
                phase: Phase::Question
            },
        })
    );
    assert_eq!(t.commitment, None);
}

#[test]
fn test_settled_session_is_final() {
    let s = ProtocolSession::new(5)
        .unwrap()
        .apply(&PhaseWitness::Timeout { role: Role::Prover }, &program())
        .unwrap()
        .session;
    assert!(s.is_settled());
    assert!(matches!(
        s.apply(&PhaseWitness::Question { x: 2 }, &program()),
        Err(DisputeError::ProtocolViolation(_))
    ));
}

#[test]
fn test_leaf_accepts_every_honest_unit_interval() {
    let trace = honest();
    let p = program();
    for from in 0..32 {
        let interval = Interval { from, to: from + 1 };
        let mut s = ProtocolSession::new(5).unwrap();
        s.phase = Phase::Leaf;
        s.level = 0;
        s.interval = interval;
        s.commitment = Some(sub_commitment(&trace, interval).unwrap().sub_commit);
        let t = s
            .apply(&PhaseWitness::Leaf { start: trace.states()[from] }, &p)
            .unwrap();
        assert_eq!(t.session.outcome.map(|o| o.winner), Some(Role::Prover));
    }
}

#[test]
fn test_leaf_rejects_unknown_pc() {
    let mut s = ProtocolSession::new(5).unwrap();
    s.phase = Phase::Leaf;
    s.level = 0;
    s.commitment = Some(Digest([0; 32]));
    assert!(matches!(
        s.apply(&PhaseWitness::Leaf { start: State::new(1, 1, 9) }, &program()),
        Err(DisputeError::UnknownProgramCounter { pc: 9, steps: 3 })
    ));
}

// ─── Disputes ──────────────────────────────────────────────────────

#[test]
fn test_honest_prover_wins_by_challenge_timeout() {
    let p = program();
    let transcript = run_dispute(
        &ProverAgent::new(honest()),
        &VerifierAgent::new(2, honest()),
        5,
        &p,
    )
    .unwrap();
    assert_eq!(
        transcript.outcome,
        Outcome {
            winner: Role::Prover,
            settlement: Settlement::Timeout {
                phase: Phase::Challenge
            },
        }
    );
    assert_eq!(transcript.entries.len(), 3);
}

#[test]
fn test_corruption_localizes_to_single_step() {
    let p = program();
    let transcript = run_dispute(
        &ProverAgent::new(corrupted_at(9)),
        &VerifierAgent::new(2, honest()),
        5,
        &p,
    )
    .unwrap();
    assert_eq!(transcript.final_interval, Interval { from: 8, to: 9 });
    assert_eq!(
        transcript.outcome,
        Outcome {
            winner: Role::Verifier,
            settlement: Settlement::Timeout { phase: Phase::Leaf },
        }
    );

    let directions: Vec<Direction> = transcript
        .entries
        .iter()
        .filter_map(|e| match e.witness {
            PhaseWitness::Choose { direction, .. } => Some(direction),
            _ => None,
        })
        .collect();
    assert_eq!(
        directions,
        vec![
            Direction::Left,
            Direction::Right,
            Direction::Left,
            Direction::Left,
            Direction::Left
        ]
    );
    // Question, Answer, Challenge, 5 x (Reveal, Choose), Leaf timeout.
    assert_eq!(transcript.entries.len(), 14);
}

#[test]
fn test_actors_alternate_verifier_first() {
    let transcript = run_dispute(
        &ProverAgent::new(corrupted_at(9)),
        &VerifierAgent::new(2, honest()),
        5,
        &program(),
    )
    .unwrap();
    let entries = &transcript.entries[..transcript.entries.len() - 1];
    for (n, entry) in entries.iter().enumerate() {
        let expected = if n % 2 == 0 { Role::Verifier } else { Role::Prover };
        assert_eq!(entry.role, expected, "entry {} ({})", n, entry.phase);
    }
}

#[test]
fn test_midpoint_corruption_defaults_left() {
    let transcript = run_dispute(
        &ProverAgent::new(corrupted_at(16)),
        &VerifierAgent::new(2, honest()),
        5,
        &program(),
    )
    .unwrap();
    let first_choice = transcript.entries.iter().find_map(|e| match e.witness {
        PhaseWitness::Choose { direction, .. } => Some(direction),
        _ => None,
    });
    assert_eq!(first_choice, Some(Direction::Left));
    assert_eq!(transcript.final_interval, Interval { from: 15, to: 16 });
    assert_eq!(transcript.outcome.winner, Role::Verifier);
}

#[test]
fn test_lying_verifier_loses_at_leaf() {
    let transcript = run_dispute(
        &ProverAgent::new(honest()),
        &VerifierAgent::new(2, corrupted_at(9)),
        5,
        &program(),
    )
    .unwrap();
    assert_eq!(transcript.final_interval, Interval { from: 8, to: 9 });
    assert_eq!(
        transcript.outcome,
        Outcome {
            winner: Role::Prover,
            settlement: Settlement::Leaf,
        }
    );
}

/// A well-formed trace for a 3-level contract.
fn short() -> Trace {
    Trace::new(honest().states()[..9].to_vec()).unwrap()
}

#[test]
fn test_short_prover_trace_forfeits() {
    let p = program();
    let transcript = run_dispute(
        &ProverAgent::new(short()),
        &VerifierAgent::new(2, honest()),
        5,
        &p,
    )
    .unwrap();
    assert_eq!(
        transcript.outcome,
        Outcome {
            winner: Role::Verifier,
            settlement: Settlement::Timeout {
                phase: Phase::Answer
            },
        }
    );

    let session = challenged(&honest());
    assert_eq!(session.phase, Phase::Reveal(5));
    let (_, reply) = drive_next_phase(&ProverAgent::new(short()), &session, None, &p).unwrap();
    assert!(reply.is_none());
}

#[test]
fn test_verifier_that_cannot_choose_times_out() {
    let transcript = run_dispute(
        &ProverAgent::new(honest()),
        &VerifierAgent::new(2, short()),
        5,
        &program(),
    )
    .unwrap();
    assert_eq!(
        transcript.outcome,
        Outcome {
            winner: Role::Prover,
            settlement: Settlement::Timeout {
                phase: Phase::Choose(5)
            },
        }
    );
    // Question, Answer, Challenge, Reveal, Choose timeout.
    assert_eq!(transcript.entries.len(), 5);
}

#[test]
fn test_transcript_serializes() {
    let transcript = run_dispute(
        &ProverAgent::new(honest()),
        &VerifierAgent::new(2, honest()),
        5,
        &program(),
    )
    .unwrap();
    let json = serde_json::to_value(&transcript).unwrap();
    assert_eq!(json["outcome"]["winner"], "Prover");
    assert_eq!(json["entries"][0]["phase"], "Question");
}

// ─── Witness stacks ────────────────────────────────────────────────

#[test]
fn test_stack_orders() {
    let s = State::new(4, 1, 0);
    let e = State::new(8, 2, 1);
    let answer = PhaseWitness::Answer {
        start: s,
        end: e,
        children: Digest([7; 32]),
    };
    let stack = answer.to_stack();
    assert_eq!(stack.len(), 7);
    assert_eq!(stack[0], vec![7; 32]);
    assert_eq!(stack[1..4], e.stack_items());
    assert_eq!(stack[4..7], s.stack_items());

    let choose = PhaseWitness::Choose {
        direction: Direction::Right,
        left: Digest([1; 32]),
        right: Digest([2; 32]),
    };
    assert_eq!(
        choose.to_stack(),
        vec![vec![1], vec![1; 32], vec![2; 32]]
    );
    assert_eq!(PhaseWitness::Question { x: 0 }.to_stack(), vec![Vec::<u8>::new()]);
    assert!(PhaseWitness::Timeout { role: Role::Prover }.to_stack().is_empty());
}

/// Every witness of a full dispute satisfies its phase script, and the
/// script forwards exactly the commitment the session computes.
#[test]
fn test_witnesses_satisfy_phase_scripts() {
    let p = program();
    let parties = Parties {
        prover: key(1),
        verifier: key(2),
    };
    let params = ContractParams::new(5, 100, parties, p.clone()).unwrap();
    let chain = PhaseChain::build(&params).unwrap();
    let transcript = run_dispute(
        &ProverAgent::new(honest()),
        &VerifierAgent::new(2, corrupted_at(9)),
        5,
        &p,
    )
    .unwrap();

    let mut spent: Option<Digest> = None;
    for entry in &transcript.entries {
        let tree = chain.tree(entry.phase).unwrap();
        let kind = match entry.witness {
            PhaseWitness::Leaf { start } => LeafKind::Step(start.pc),
            _ => LeafKind::Phase,
        };
        let leaf = tree.leaf(kind).unwrap();
        let ctx = RecordingContext::default();
        let mut stack = vec![vec![0x11; 64]];
        stack.extend(entry.witness.to_stack());
        Machine::verify_spend(&ctx, &leaf.script, stack)
            .unwrap_or_else(|e| panic!("{}: {}", entry.phase, e));

        let checks = ctx.checks.into_inner();
        for check in &checks {
            match check.mode {
                CheckMode::Input => assert_eq!(Some(check.data.as_slice()), spent.as_ref().map(|d| &d.0[..])),
                CheckMode::Output => assert_eq!(Some(check.data.as_slice()), entry.commitment.as_ref().map(|d| &d.0[..])),
            }
        }
        spent = entry.commitment;
    }
}
