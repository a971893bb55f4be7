use std::path::PathBuf;

use bisection::config::ContractConfig;
use bisection::driver::{run_dispute, DisputeTranscript, PhaseWitness, ProverAgent, VerifierAgent};
use bisection::phase::PhaseChain;
use bisection::spend::{MemoryLedger, OnLedgerDispute, Party, SpendBuilder};
use bisection::{doubling_trace, load_claim, StepProgram};

use super::{demo_parties, demo_signers, fail};

fn describe(witness: &PhaseWitness) -> String {
    match witness {
        PhaseWitness::Question { x } => format!("x={}", x),
        PhaseWitness::Answer { start, end, .. } => format!("{} .. {}", start, end),
        PhaseWitness::Challenge { commitment } => format!("disputes {}", commitment),
        PhaseWitness::Reveal { start, mid, end, .. } => format!("{} | {} | {}", start, mid, end),
        PhaseWitness::Choose { direction, .. } => format!("{:?}", direction),
        PhaseWitness::Leaf { start } => format!("steps from {}", start),
        PhaseWitness::Timeout { .. } => "timeout".to_string(),
    }
}

fn print_transcript(transcript: &DisputeTranscript) {
    for entry in &transcript.entries {
        let commitment = entry
            .commitment
            .map(|c| c.to_short())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<8} {:<40} -> {} {}",
            entry.phase.to_string(),
            entry.role.to_string(),
            describe(&entry.witness),
            commitment,
            entry.interval
        );
    }
    println!("final interval {}", transcript.final_interval);
    println!("{}", transcript.outcome);
}

pub fn cmd_simulate(config: &ContractConfig, prover: PathBuf, bound: u16, onchain: bool, json: bool) {
    let program = StepProgram::doubling(bound);
    let claimed = load_claim(&prover, config.input, &program).unwrap_or_else(|e| fail(e));
    if claimed.levels() != config.levels {
        fail(format!(
            "{} has {} levels, the contract uses {}",
            prover.display(),
            claimed.levels(),
            config.levels
        ));
    }
    let honest = doubling_trace(config, config.input, bound).unwrap_or_else(|e| fail(e));

    let prover_agent = ProverAgent::new(claimed);
    let verifier_agent = VerifierAgent::new(config.input, honest);

    let (transcript, txids) = if onchain {
        let (prover_signer, verifier_signer) = demo_signers();
        let params = config
            .params(demo_parties(), program.clone())
            .unwrap_or_else(|e| fail(e));
        let chain = PhaseChain::build(&params).unwrap_or_else(|e| fail(e));
        let builder = SpendBuilder::new(&chain, &params);
        let mut ledger = MemoryLedger::new();
        let funding = ledger.fund(
            config.value(),
            builder.contract_txout(config.value()).unwrap_or_else(|e| fail(e)).script_pubkey,
        );
        let contract = builder
            .contract_output(funding, config.value())
            .unwrap_or_else(|e| fail(e));

        let report = OnLedgerDispute::new(builder, &mut ledger, &program)
            .run(
                Party {
                    agent: &prover_agent,
                    signer: &prover_signer,
                },
                Party {
                    agent: &verifier_agent,
                    signer: &verifier_signer,
                },
                contract,
            )
            .unwrap_or_else(|e| fail(e));
        eprintln!(
            "Published {} spends, ledger height {}",
            report.txids.len(),
            ledger.height()
        );
        (report.transcript, report.txids)
    } else {
        let transcript = run_dispute(&prover_agent, &verifier_agent, config.levels, &program)
            .unwrap_or_else(|e| fail(e));
        (transcript, Vec::new())
    };

    if json {
        match serde_json::to_string_pretty(&transcript) {
            Ok(s) => println!("{}", s),
            Err(e) => fail(e),
        }
        return;
    }
    print_transcript(&transcript);
    for txid in txids {
        println!("  {}", txid);
    }
}
