pub mod commit;
pub mod scripts;
pub mod simulate;
pub mod trace;

use std::fmt::Display;
use std::path::Path;
use std::process;

use bisection::config::ContractConfig;
use bisection::phase::{Parties, Role};
use bisection::spend::KeypairSigner;
use tracing_subscriber::EnvFilter;

/// Secrets of the built-in demo parties, used when dispute.toml names no
/// keys and by the in-memory ledger run.
const DEMO_PROVER_SECRET: [u8; 32] = [0x01; 32];
const DEMO_VERIFIER_SECRET: [u8; 32] = [0x02; 32];

pub fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "bisection=debug",
        _ => "bisection=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Print `error: <e>` and exit with status 1.
pub fn fail(e: impl Display) -> ! {
    eprintln!("error: {}", e);
    process::exit(1);
}

pub fn load_config(path: Option<&Path>) -> ContractConfig {
    let result = match path {
        Some(p) => ContractConfig::load(p),
        None => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| ".".into());
            ContractConfig::discover(&cwd)
        }
    };
    result.unwrap_or_else(|e| fail(e))
}

pub fn demo_signers() -> (KeypairSigner, KeypairSigner) {
    let prover = KeypairSigner::from_secret(Role::Prover, &DEMO_PROVER_SECRET).unwrap_or_else(|e| fail(e));
    let verifier =
        KeypairSigner::from_secret(Role::Verifier, &DEMO_VERIFIER_SECRET).unwrap_or_else(|e| fail(e));
    (prover, verifier)
}

pub fn demo_parties() -> Parties {
    use bisection::spend::Signer;

    let (prover, verifier) = demo_signers();
    Parties {
        prover: prover.public_key(Role::Prover).unwrap_or_else(|e| fail(e)),
        verifier: verifier.public_key(Role::Verifier).unwrap_or_else(|e| fail(e)),
    }
}

/// Parties from dispute.toml, falling back to the demo keys.
pub fn parties(config: &ContractConfig) -> Parties {
    match (config.prover, config.verifier) {
        (None, None) => demo_parties(),
        _ => config.parties().unwrap_or_else(|e| fail(e)),
    }
}
