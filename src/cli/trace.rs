use std::path::PathBuf;

use bisection::config::ContractConfig;
use bisection::trace::io::{save_trace, write_trace};
use bisection::doubling_trace;
use bisection::trace::State;

use super::fail;

/// Parse `INDEX=X,I,PC`.
fn parse_corruption(arg: &str) -> Option<(usize, State)> {
    let (index, state) = arg.split_once('=')?;
    let fields: Vec<u16> = state
        .split(',')
        .map(|f| f.trim().parse().ok())
        .collect::<Option<_>>()?;
    match fields.as_slice() {
        [x, i, pc] => Some((index.trim().parse().ok()?, State::new(*x, *i, *pc))),
        _ => None,
    }
}

pub fn cmd_trace(
    config: &ContractConfig,
    input: Option<u16>,
    bound: u16,
    output: Option<PathBuf>,
    corrupt: Option<String>,
) {
    let x = input.unwrap_or(config.input);
    let mut trace = doubling_trace(config, x, bound).unwrap_or_else(|e| fail(e));

    if let Some(arg) = corrupt {
        let Some((index, state)) = parse_corruption(&arg) else {
            fail(format!("--corrupt expects INDEX=X,I,PC, got '{}'", arg));
        };
        trace = trace.with_state(index, state).unwrap_or_else(|e| fail(e));
        eprintln!("Corrupted state {} to {}", index, state);
    }

    match output {
        Some(path) => {
            save_trace(&path, &trace).unwrap_or_else(|e| fail(e));
            eprintln!("Wrote {} states to {}", trace.len(), path.display());
        }
        None => print!("{}", write_trace(&trace)),
    }
}
