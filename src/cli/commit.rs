use std::path::PathBuf;

use bisection::commitment::commitment_report;
use bisection::trace::io::load_trace;

use super::fail;

pub fn cmd_commit(input: PathBuf, tree: bool) {
    let trace = load_trace(&input).unwrap_or_else(|e| fail(e));
    let report = commitment_report(&trace, trace.full_interval()).unwrap_or_else(|e| fail(e));

    eprintln!(
        "Trace: {} states, {} levels, {}",
        trace.len(),
        trace.levels(),
        input.display()
    );
    if tree {
        println!("{}", report);
    } else {
        println!("{}", report.root.to_hex());
    }
}
