//! The phase chain as an explicit graph.
//!
//! Nodes are phases, edges point from a phase to the phase that spends its
//! output and carry the rule for the commitment written into that output.
//! Trees are built in reverse topological order so each script can embed
//! its successor's tree root.

use std::collections::HashMap;
use std::fmt;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use tracing::info;

use super::template::phase_leaves;
use super::tree::PhaseScriptTree;
use super::{ContractParams, Phase};
use crate::error::{DisputeError, Result};

/// How a phase derives the commitment of the output it creates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CommitmentRule {
    /// `H(enc(x, 0, 0))`
    InitialState,
    /// `H(enc(start) || enc(end) || cd)` over the whole trace.
    RootNode,
    /// The spent commitment, unchanged.
    Forward,
    /// `H(hL || hR)` of the opened node.
    ChildrenDigest,
    /// The claimed hash of the selected half.
    SelectedHalf,
}

impl CommitmentRule {
    /// `None` for Leaf, which creates no covenant output.
    pub fn of(phase: Phase) -> Option<CommitmentRule> {
        match phase {
            Phase::Question => Some(CommitmentRule::InitialState),
            Phase::Answer => Some(CommitmentRule::RootNode),
            Phase::Challenge => Some(CommitmentRule::Forward),
            Phase::Reveal(_) => Some(CommitmentRule::ChildrenDigest),
            Phase::Choose(_) => Some(CommitmentRule::SelectedHalf),
            Phase::Leaf => None,
        }
    }
}

impl fmt::Display for CommitmentRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitmentRule::InitialState => "H(enc(x,0,0))",
            CommitmentRule::RootNode => "H(enc(s)||enc(e)||cd)",
            CommitmentRule::Forward => "forward",
            CommitmentRule::ChildrenDigest => "H(hL||hR)",
            CommitmentRule::SelectedHalf => "selected half",
        };
        f.write_str(s)
    }
}

// ─── Chain ─────────────────────────────────────────────────────────

/// All phase trees of one dispute.
pub struct PhaseChain {
    graph: DiGraph<Phase, CommitmentRule>,
    nodes: HashMap<Phase, NodeIndex>,
    trees: HashMap<Phase, PhaseScriptTree>,
    total_levels: u32,
}

impl PhaseChain {
    pub fn build(params: &ContractParams) -> Result<Self> {
        let total = params.total_levels;
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        for phase in Phase::sequence(total) {
            nodes.insert(phase, graph.add_node(phase));
        }
        for (&phase, &from) in &nodes {
            if let (Some(next), Some(rule)) = (phase.next(total), CommitmentRule::of(phase)) {
                let to = *nodes
                    .get(&next)
                    .ok_or(DisputeError::UnsupportedLevel { level: 0, total })?;
                graph.add_edge(from, to, rule);
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            DisputeError::Taproot(format!("phase graph has a cycle at {}", graph[cycle.node_id()]))
        })?;

        let mut trees: HashMap<Phase, PhaseScriptTree> = HashMap::new();
        for node in order.into_iter().rev() {
            let phase = graph[node];
            let next_root = graph
                .neighbors_directed(node, Direction::Outgoing)
                .next()
                .and_then(|succ| trees.get(&graph[succ]))
                .map(|tree| tree.root());
            let tree = PhaseScriptTree::build(phase, phase_leaves(phase, params, next_root)?)?;
            trees.insert(phase, tree);
        }

        info!(levels = total, phases = trees.len(), "built phase chain");
        Ok(Self {
            graph,
            nodes,
            trees,
            total_levels: total,
        })
    }

    pub fn total_levels(&self) -> u32 {
        self.total_levels
    }

    pub fn tree(&self, phase: Phase) -> Result<&PhaseScriptTree> {
        phase.validate(self.total_levels)?;
        self.trees.get(&phase).ok_or(DisputeError::UnsupportedLevel {
            level: phase.level().unwrap_or(0),
            total: self.total_levels,
        })
    }

    /// The phase spending `phase`'s output and the commitment rule between.
    pub fn successor(&self, phase: Phase) -> Option<(Phase, CommitmentRule)> {
        let node = *self.nodes.get(&phase)?;
        let edge = self.graph.edges_directed(node, Direction::Outgoing).next()?;
        Some((self.graph[edge.target()], *edge.weight()))
    }

    /// Phases in protocol order.
    pub fn phases(&self) -> Vec<Phase> {
        Phase::sequence(self.total_levels)
    }
}

/// Build the tree for a single phase. The successors' trees are built too,
/// since each tree embeds the next one's root.
pub fn build_phase_script(phase: Phase, params: &ContractParams) -> Result<PhaseScriptTree> {
    phase.validate(params.total_levels)?;
    let chain = PhaseChain::build(params)?;
    chain.tree(phase).cloned()
}
