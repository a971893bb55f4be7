//! Execution traces, dyadic intervals over them, and trace generation.
//!
//! A trace always holds `2^L + 1` states so that every interval the
//! bisection visits splits evenly. Generation runs a [`StepExecutor`] from
//! the initial state until the halting program counter and pads the tail by
//! repeating the final state.

pub mod io;
pub mod state;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DisputeError, Result};
pub use state::{decode_num, encode_num, State};

// ─── Step Executor ─────────────────────────────────────────────────

/// Executes exactly one step of the disputed computation.
///
/// The state's program counter selects the step. Implementations must be
/// deterministic: Leaf settlement re-executes a single step and compares the
/// result against the committed end state.
pub trait StepExecutor {
    fn execute(&self, state: &State) -> Result<State>;

    /// Program counter marking a finished computation.
    fn halt_pc(&self) -> u16;

    /// Number of program counters with a step (`0..step_count()`).
    fn step_count(&self) -> usize;
}

// ─── Interval ──────────────────────────────────────────────────────

/// Half-open range `[from, to)` of trace indices whose length is a power of
/// two. The state at `to` is the interval's end state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub from: usize,
    pub to: usize,
}

impl Interval {
    /// Checked constructor against a trace of `trace_len` states.
    pub fn new(from: usize, to: usize, trace_len: usize) -> Result<Self> {
        if from >= to || to >= trace_len || !(to - from).is_power_of_two() {
            return Err(DisputeError::InvalidInterval {
                from,
                to,
                len: trace_len,
            });
        }
        Ok(Self { from, to })
    }

    pub fn len(&self) -> usize {
        self.to - self.from
    }

    pub fn is_unit(&self) -> bool {
        self.len() == 1
    }

    pub fn mid(&self) -> usize {
        self.from + self.len() / 2
    }

    /// Left and right halves, or `None` for a unit interval.
    pub fn halves(&self) -> Option<(Interval, Interval)> {
        if self.is_unit() {
            return None;
        }
        let mid = self.mid();
        Some((
            Interval {
                from: self.from,
                to: mid,
            },
            Interval { from: mid, to: self.to },
        ))
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

// ─── Trace ─────────────────────────────────────────────────────────

/// A validated trace of `2^L + 1` states.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTrace")]
pub struct Trace {
    states: Vec<State>,
}

#[derive(Deserialize)]
struct RawTrace {
    states: Vec<State>,
}

impl TryFrom<RawTrace> for Trace {
    type Error = DisputeError;

    fn try_from(raw: RawTrace) -> Result<Self> {
        Trace::new(raw.states)
    }
}

impl Trace {
    pub fn new(states: Vec<State>) -> Result<Self> {
        let len = states.len();
        if len < 2 || !(len - 1).is_power_of_two() {
            return Err(DisputeError::TraceLengthInvalid { len });
        }
        Ok(Self { states })
    }

    /// `L` such that the trace holds `2^L + 1` states.
    pub fn levels(&self) -> u32 {
        (self.states.len() - 1).trailing_zeros()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn get(&self, index: usize) -> Option<&State> {
        self.states.get(index)
    }

    pub fn first(&self) -> State {
        self.states[0]
    }

    pub fn last(&self) -> State {
        self.states[self.states.len() - 1]
    }

    /// `[0, len - 1)`, the interval the Answer phase commits to.
    pub fn full_interval(&self) -> Interval {
        Interval {
            from: 0,
            to: self.states.len() - 1,
        }
    }

    /// A copy with one state replaced.
    pub fn with_state(&self, index: usize, state: State) -> Result<Self> {
        if index >= self.states.len() {
            return Err(DisputeError::InvalidInterval {
                from: index,
                to: index + 1,
                len: self.states.len(),
            });
        }
        let mut states = self.states.clone();
        states[index] = state;
        Ok(Self { states })
    }

    /// Checks the start and end invariants for public input `x`.
    pub fn check_endpoints(&self, x: u16, halt_pc: u16) -> Result<()> {
        if self.first() != State::initial(x) {
            return Err(DisputeError::TraceFormat(format!(
                "trace starts at {} instead of {}",
                self.first(),
                State::initial(x)
            )));
        }
        if self.last().pc != halt_pc {
            return Err(DisputeError::TraceFormat(format!(
                "trace ends at {} without reaching halting pc {}",
                self.last(),
                halt_pc
            )));
        }
        Ok(())
    }
}

/// Run `executor` from the initial state of `x` and pad the result to
/// `2^levels + 1` states.
pub fn generate_trace(
    executor: &dyn StepExecutor,
    x: u16,
    levels: u32,
    max_steps: usize,
) -> Result<Trace> {
    let target = (1usize << levels) + 1;
    let mut current = State::initial(x);
    let mut states = vec![current];

    while current.pc != executor.halt_pc() {
        if states.len() > max_steps {
            return Err(DisputeError::TraceFormat(format!(
                "execution did not halt within {} steps",
                max_steps
            )));
        }
        current = executor.execute(&current)?;
        states.push(current);
    }

    let steps = states.len() - 1;
    if states.len() > target {
        return Err(DisputeError::TraceLengthInvalid { len: states.len() });
    }
    states.resize(target, current);
    debug!(x, levels, steps, padded = target, "generated trace");
    Trace::new(states)
}
