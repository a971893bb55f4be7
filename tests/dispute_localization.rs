use bisection::commitment::{root_commitment, sub_commitment};
use bisection::driver::{run_dispute, Direction, PhaseWitness, ProverAgent, Settlement, VerifierAgent};
use bisection::trace::io::{load_trace, save_trace};
use bisection::{
    doubling_trace, generate_trace, load_claim, ContractConfig, DisputeError, Interval, Role, State,
    StepProgram, Trace,
};

fn honest(levels: u32) -> Trace {
    generate_trace(&StepProgram::doubling(8), 2, levels, 1 << levels).unwrap()
}

/// Bump `x` at `index`, keeping the rest of the state.
fn corrupt(trace: &Trace, index: usize) -> Trace {
    let s = trace.states()[index];
    trace.with_state(index, State::new(s.x ^ 1, s.i, s.pc)).unwrap()
}

fn choices(entries: &[bisection::driver::TranscriptEntry]) -> usize {
    entries
        .iter()
        .filter(|e| matches!(e.witness, PhaseWitness::Choose { .. }))
        .count()
}

// ── Localization ──

#[test]
fn test_every_corruption_localizes_to_its_step() {
    let program = StepProgram::doubling(8);
    let good = honest(5);
    for index in 1..=32 {
        let bad = corrupt(&good, index);
        let transcript = run_dispute(
            &ProverAgent::new(bad),
            &VerifierAgent::new(2, good.clone()),
            5,
            &program,
        )
        .unwrap();

        let Interval { from, to } = transcript.final_interval;
        assert_eq!(to - from, 1, "index {}", index);
        assert!(
            index == from || index == to,
            "index {} localized to [{}, {})",
            index,
            from,
            to
        );
        assert_eq!(choices(&transcript.entries), 5);
        assert_eq!(transcript.outcome.winner, Role::Verifier, "index {}", index);
    }
}

#[test]
fn test_interval_halves_every_round() {
    let program = StepProgram::doubling(8);
    let good = honest(5);
    let transcript = run_dispute(
        &ProverAgent::new(corrupt(&good, 21)),
        &VerifierAgent::new(2, good),
        5,
        &program,
    )
    .unwrap();

    let sizes: Vec<usize> = transcript
        .entries
        .iter()
        .filter(|e| matches!(e.witness, PhaseWitness::Choose { .. }))
        .map(|e| e.interval.len())
        .collect();
    assert_eq!(sizes, vec![16, 8, 4, 2, 1]);
}

#[test]
fn test_prover_timeout_at_leaf_when_corrupted() {
    let program = StepProgram::doubling(8);
    let good = honest(5);
    let transcript = run_dispute(
        &ProverAgent::new(corrupt(&good, 9)),
        &VerifierAgent::new(2, good),
        5,
        &program,
    )
    .unwrap();
    assert_eq!(transcript.final_interval, Interval { from: 8, to: 9 });
    assert_eq!(
        transcript.outcome.settlement,
        Settlement::Timeout {
            phase: bisection::Phase::Leaf
        }
    );
    let last = transcript.entries.last().unwrap();
    assert_eq!(last.witness, PhaseWitness::Timeout { role: Role::Verifier });
}

#[test]
fn test_midpoint_corruption_picks_left() {
    let program = StepProgram::doubling(8);
    let good = honest(5);
    let transcript = run_dispute(
        &ProverAgent::new(corrupt(&good, 16)),
        &VerifierAgent::new(2, good),
        5,
        &program,
    )
    .unwrap();
    let first = transcript.entries.iter().find_map(|e| match e.witness {
        PhaseWitness::Choose { direction, .. } => Some(direction),
        _ => None,
    });
    assert_eq!(first, Some(Direction::Left));
    assert_eq!(transcript.outcome.winner, Role::Verifier);
}

#[test]
fn test_lying_verifier_loses_for_every_index() {
    let program = StepProgram::doubling(8);
    let good = honest(5);
    for index in 1..=32 {
        let transcript = run_dispute(
            &ProverAgent::new(good.clone()),
            &VerifierAgent::new(2, corrupt(&good, index)),
            5,
            &program,
        )
        .unwrap();
        assert_eq!(transcript.outcome.winner, Role::Prover, "index {}", index);
        assert_eq!(transcript.outcome.settlement, Settlement::Leaf, "index {}", index);
    }
}

#[test]
fn test_commitments_survive_a_trace_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("claim.trace");
    let good = honest(5);
    save_trace(&path, &good).unwrap();
    let loaded = load_trace(&path).unwrap();
    assert_eq!(root_commitment(&loaded), root_commitment(&good));
    let unit = Interval::new(8, 9, loaded.len()).unwrap();
    assert_eq!(
        sub_commitment(&loaded, unit).unwrap(),
        sub_commitment(&good, unit).unwrap()
    );
}

#[test]
fn test_load_claim_checks_endpoints() {
    let program = StepProgram::doubling(8);
    let good = doubling_trace(&ContractConfig::default(), 2, 8).unwrap();
    assert_eq!(good, honest(5));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("claim.trace");
    save_trace(&path, &good).unwrap();
    assert_eq!(load_claim(&path, 2, &program).unwrap(), good);
    assert!(matches!(
        load_claim(&path, 3, &program),
        Err(DisputeError::TraceFormat(_))
    ));

    let last = good.last();
    let unfinished = good
        .with_state(good.len() - 1, State::new(last.x, last.i, 0))
        .unwrap();
    save_trace(&path, &unfinished).unwrap();
    assert!(matches!(
        load_claim(&path, 2, &program),
        Err(DisputeError::TraceFormat(_))
    ));
}
