use bisection::config::ContractConfig;
use bisection::phase::{build_phase_script, Phase};
use bisection::StepProgram;

use super::{fail, parties};

fn parse_phase(name: &str, level: Option<u32>, total: u32) -> Option<Phase> {
    let level = level.unwrap_or(total);
    match name.to_ascii_lowercase().as_str() {
        "question" => Some(Phase::Question),
        "answer" => Some(Phase::Answer),
        "challenge" => Some(Phase::Challenge),
        "reveal" => Some(Phase::Reveal(level)),
        "choose" => Some(Phase::Choose(level)),
        "leaf" => Some(Phase::Leaf),
        _ => None,
    }
}

pub fn cmd_scripts(config: &ContractConfig, phase: &str, level: Option<u32>, hex: bool) {
    let Some(phase) = parse_phase(phase, level, config.levels) else {
        fail(format!(
            "unknown phase '{}' (expected question, answer, challenge, reveal, choose or leaf)",
            phase
        ));
    };
    let params = config
        .params(parties(config), StepProgram::doubling(8))
        .unwrap_or_else(|e| fail(e));
    let tree = build_phase_script(phase, &params).unwrap_or_else(|e| fail(e));

    eprintln!(
        "{} levels, timeout {} blocks, actor {}",
        params.total_levels,
        params.timeout_blocks,
        phase.actor()
    );
    print!("{}", tree);
    if hex {
        for leaf in tree.leaves() {
            println!("{}: {}", leaf.kind, leaf.script_buf.to_hex_string());
        }
    }
}
