pub mod commitment;
pub mod config;
pub mod diagnostic;
pub mod driver;
pub mod error;
pub mod phase;
pub mod script;
pub mod span;
pub mod spend;
pub mod trace;

// Re-exports of the dispute entry points
pub use commitment::{commit, root_commitment, sub_commitment, Digest};
pub use config::ContractConfig;
pub use driver::{drive_next_phase, run_dispute, Outcome, PhaseWitness, ProtocolSession};
pub use error::{DisputeError, Result};
pub use phase::{build_phase_script, ContractParams, Parties, Phase, Role};
pub use script::StepProgram;
pub use spend::{Ledger, Signer, SpendBuilder};
pub use trace::{generate_trace, Interval, State, StepExecutor, Trace};

use std::path::Path;

/// Generate the trace of the built-in doubling program for input `x`,
/// sized for the levels of `config`.
pub fn doubling_trace(config: &ContractConfig, x: u16, bound: u16) -> Result<Trace> {
    let program = StepProgram::doubling(bound);
    generate_trace(&program, x, config.levels, 1usize << config.levels)
}

/// Load a trace file and check it is a complete run for input `x`.
pub fn load_claim(path: &Path, x: u16, executor: &dyn StepExecutor) -> Result<Trace> {
    let trace = trace::io::load_trace(path)?;
    trace.check_endpoints(x, executor.halt_pc())?;
    Ok(trace)
}
