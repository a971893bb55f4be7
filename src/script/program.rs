//! Step programs: one script per program counter.
//!
//! A step script runs on the stack `x i pc` (pc on top) and must leave the
//! next state in the same shape. The halting pc maps to a no-op step so that
//! re-executing a padded tail reproduces it.

use tracing::trace;

use super::eval::{Machine, NoContext};
use super::{Instr, Script};
use crate::error::{DisputeError, Result};
use crate::trace::{State, StepExecutor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepProgram {
    steps: Vec<Script>,
    halt_pc: u16,
}

impl StepProgram {
    pub fn new(steps: Vec<Script>, halt_pc: u16) -> Result<Self> {
        if halt_pc as usize >= steps.len() {
            return Err(DisputeError::UnknownProgramCounter {
                pc: halt_pc,
                steps: steps.len(),
            });
        }
        Ok(Self { steps, halt_pc })
    }

    /// Doubles `x` while `i < bound`, then halts at pc 2.
    ///
    /// ```text
    /// pc 0: DROP DUP <bound> LESSTHAN IF 1 ELSE 2 ENDIF
    /// pc 1: DROP 1ADD SWAP DUP ADD SWAP 0
    /// pc 2: NOP
    /// ```
    pub fn doubling(bound: u16) -> Self {
        let branch = Script::new()
            .op(Instr::Drop)
            .op(Instr::Dup)
            .num(bound)
            .op(Instr::LessThan)
            .op(Instr::If)
            .num(1)
            .op(Instr::Else)
            .num(2)
            .op(Instr::EndIf);
        let double = Script::new().ops([
            Instr::Drop,
            Instr::OneAdd,
            Instr::Swap,
            Instr::Dup,
            Instr::Add,
            Instr::Swap,
            Instr::Num(0),
        ]);
        let halt = Script::new().op(Instr::Nop);
        Self {
            steps: vec![branch, double, halt],
            halt_pc: 2,
        }
    }

    pub fn step(&self, pc: u16) -> Result<&Script> {
        self.steps
            .get(pc as usize)
            .ok_or(DisputeError::UnknownProgramCounter {
                pc,
                steps: self.steps.len(),
            })
    }

    pub fn steps(&self) -> &[Script] {
        &self.steps
    }
}

impl StepExecutor for StepProgram {
    fn execute(&self, state: &State) -> Result<State> {
        let script = self.step(state.pc)?;
        let mut machine = Machine::new(&NoContext, state.stack_items().to_vec());
        machine.run(script)?;
        let next = State::from_stack_items(machine.stack())?;
        trace!(from = %state, to = %next, "step");
        Ok(next)
    }

    fn halt_pc(&self) -> u16 {
        self.halt_pc
    }

    fn step_count(&self) -> usize {
        self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::generate_trace;

    #[test]
    fn test_doubling_steps() {
        let p = StepProgram::doubling(8);
        assert_eq!(p.execute(&State::new(2, 0, 0)).unwrap(), State::new(2, 0, 1));
        assert_eq!(p.execute(&State::new(2, 0, 1)).unwrap(), State::new(4, 1, 0));
        assert_eq!(p.execute(&State::new(512, 8, 0)).unwrap(), State::new(512, 8, 2));
        assert_eq!(p.execute(&State::new(512, 8, 2)).unwrap(), State::new(512, 8, 2));
        assert_eq!(p.step_count(), 3);
    }

    #[test]
    fn test_unknown_pc() {
        let p = StepProgram::doubling(8);
        assert!(matches!(
            p.execute(&State::new(1, 0, 7)),
            Err(DisputeError::UnknownProgramCounter { pc: 7, steps: 3 })
        ));
        assert!(StepProgram::new(vec![Script::new()], 1).is_err());
    }

    #[test]
    fn test_overflow_is_a_script_error() {
        let p = StepProgram::doubling(u16::MAX);
        assert!(matches!(
            p.execute(&State::new(40000, 3, 1)),
            Err(DisputeError::Script { .. })
        ));
    }

    #[test]
    fn test_generates_toy_trace() {
        let trace = generate_trace(&StepProgram::doubling(8), 2, 5, 64).unwrap();
        assert_eq!(trace.len(), 33);
        assert_eq!(trace.states()[17], State::new(512, 8, 2));
        assert_eq!(trace.last(), State::new(512, 8, 2));
    }

    #[test]
    fn test_custom_program() {
        // pc 0: increment i and halt
        let inc = Script::new().ops([Instr::Drop, Instr::OneAdd, Instr::Num(1)]);
        let p = StepProgram::new(vec![inc, Script::new()], 1).unwrap();
        assert_eq!(p.execute(&State::initial(5)).unwrap(), State::new(5, 1, 1));
        let trace = generate_trace(&p, 5, 1, 4).unwrap();
        assert_eq!(trace.states(), &[State::initial(5), State::new(5, 1, 1), State::new(5, 1, 1)]);
    }
}
