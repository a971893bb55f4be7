//! Reference stack machine over the script IR.
//!
//! Executes scripts on byte-string stack elements. Numbers are compact
//! encoded (see `trace::state`), `OP_IF` takes only `[]` or `[1]`, and a
//! failing signature is fatal rather than pushing false. Anything the script
//! cannot decide on its own (signatures, relative height, covenant checks)
//! is asked of an [`ExecContext`].

use std::cell::RefCell;

use crate::commitment::sha256;
use crate::error::{DisputeError, Result};
use crate::trace::{decode_num, encode_num};

use super::{Instr, Script, CURRENT};

const MAX_ELEMENT_SIZE: usize = 520;

// ─── Context ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckMode {
    Input,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContractKey {
    /// The unspendable NUMS point.
    Nums,
    Explicit([u8; 32]),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TapTreeRef {
    /// The script tree of the input being spent.
    Current,
    Root([u8; 32]),
}

/// Decoded `OP_CHECKCONTRACTVERIFY` arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractCheck {
    pub data: Vec<u8>,
    /// `None` selects the input being spent.
    pub index: Option<u16>,
    pub key: ContractKey,
    pub taptree: TapTreeRef,
    pub mode: CheckMode,
}

/// What a script may ask of the transaction it runs in.
pub trait ExecContext {
    fn check_sig(&self, sig: &[u8], pubkey: &[u8]) -> bool;

    /// Confirmations of the spent output as enforced by the input sequence.
    fn relative_height(&self) -> Option<u16>;

    fn check_contract(&self, check: &ContractCheck) -> bool;
}

/// Context for pure computation: every transaction-level check fails.
pub struct NoContext;

impl ExecContext for NoContext {
    fn check_sig(&self, _sig: &[u8], _pubkey: &[u8]) -> bool {
        false
    }

    fn relative_height(&self) -> Option<u16> {
        None
    }

    fn check_contract(&self, _check: &ContractCheck) -> bool {
        false
    }
}

// ─── Machine ───────────────────────────────────────────────────────

pub struct Machine<'a> {
    stack: Vec<Vec<u8>>,
    alt: Vec<Vec<u8>>,
    ctx: &'a dyn ExecContext,
}

fn fail(index: usize, reason: impl Into<String>) -> DisputeError {
    DisputeError::Script {
        index,
        reason: reason.into(),
    }
}

fn encode_bool(b: bool) -> Vec<u8> {
    if b {
        vec![1]
    } else {
        Vec::new()
    }
}

fn cast_to_bool(bytes: &[u8]) -> bool {
    match bytes.split_last() {
        None => false,
        Some((last, rest)) => rest.iter().any(|b| *b != 0) || (*last != 0 && *last != 0x80),
    }
}

impl<'a> Machine<'a> {
    pub fn new(ctx: &'a dyn ExecContext, initial: Vec<Vec<u8>>) -> Self {
        Self {
            stack: initial,
            alt: Vec::new(),
            ctx,
        }
    }

    pub fn stack(&self) -> &[Vec<u8>] {
        &self.stack
    }

    pub fn into_stack(self) -> Vec<Vec<u8>> {
        self.stack
    }

    /// Run `script` as a spend: `witness` is the initial stack and exactly
    /// one true element must remain.
    pub fn verify_spend(ctx: &dyn ExecContext, script: &Script, witness: Vec<Vec<u8>>) -> Result<()> {
        let mut m = Machine::new(ctx, witness);
        m.run(script)?;
        match m.stack.as_slice() {
            [top] if cast_to_bool(top) => Ok(()),
            [_] => Err(fail(script.len(), "script finished with false")),
            other => Err(fail(
                script.len(),
                format!("script finished with {} stack elements", other.len()),
            )),
        }
    }

    pub fn run(&mut self, script: &Script) -> Result<()> {
        let mut exec: Vec<bool> = Vec::new();
        for (index, instr) in script.instrs.iter().enumerate() {
            let executing = exec.iter().all(|b| *b);
            match instr {
                Instr::If => {
                    let taken = if executing {
                        match self.pop(index)?.as_slice() {
                            [] => false,
                            [1] => true,
                            _ => return Err(fail(index, "OP_IF argument must be minimal")),
                        }
                    } else {
                        false
                    };
                    exec.push(taken);
                }
                Instr::Else => match exec.last_mut() {
                    Some(top) => *top = !*top,
                    None => return Err(fail(index, "OP_ELSE without OP_IF")),
                },
                Instr::EndIf => {
                    if exec.pop().is_none() {
                        return Err(fail(index, "OP_ENDIF without OP_IF"));
                    }
                }
                _ if !executing => {}
                other => self.step(index, other)?,
            }
        }
        if !exec.is_empty() {
            return Err(fail(script.len(), "unbalanced OP_IF"));
        }
        Ok(())
    }

    fn step(&mut self, index: usize, instr: &Instr) -> Result<()> {
        match instr {
            Instr::Push(bytes) => self.stack.push(bytes.clone()),
            Instr::Num(n) => self.stack.push(encode_num(*n)),

            Instr::Drop => {
                self.pop(index)?;
            }
            Instr::Dup => self.copy_top(index, 1)?,
            Instr::TwoDup => self.copy_top(index, 2)?,
            Instr::ThreeDup => self.copy_top(index, 3)?,
            Instr::Over => {
                self.need(index, 2)?;
                let v = self.stack[self.stack.len() - 2].clone();
                self.stack.push(v);
            }
            Instr::Swap => {
                self.need(index, 2)?;
                let n = self.stack.len();
                self.stack.swap(n - 1, n - 2);
            }
            Instr::Rot => {
                self.need(index, 3)?;
                let v = self.stack.remove(self.stack.len() - 3);
                self.stack.push(v);
            }
            Instr::ToAlt => {
                let v = self.pop(index)?;
                self.alt.push(v);
            }
            Instr::FromAlt => {
                let v = self.alt.pop().ok_or_else(|| fail(index, "alt stack is empty"))?;
                self.stack.push(v);
            }

            Instr::Add => {
                let b = self.pop_num(index)?;
                let a = self.pop_num(index)?;
                let sum = a.checked_add(b).ok_or_else(|| fail(index, "addition overflows"))?;
                self.stack.push(encode_num(sum));
            }
            Instr::OneAdd => {
                let a = self.pop_num(index)?;
                let sum = a.checked_add(1).ok_or_else(|| fail(index, "addition overflows"))?;
                self.stack.push(encode_num(sum));
            }
            Instr::LessThan => {
                let b = self.pop_num(index)?;
                let a = self.pop_num(index)?;
                self.stack.push(encode_bool(a < b));
            }

            Instr::Equal => {
                let b = self.pop(index)?;
                let a = self.pop(index)?;
                self.stack.push(encode_bool(a == b));
            }
            Instr::EqualVerify => {
                let b = self.pop(index)?;
                let a = self.pop(index)?;
                if a != b {
                    return Err(fail(index, "OP_EQUALVERIFY failed"));
                }
            }
            Instr::Verify => {
                if !cast_to_bool(&self.pop(index)?) {
                    return Err(fail(index, "OP_VERIFY failed"));
                }
            }
            Instr::Nop => {}

            Instr::Cat => {
                let b = self.pop(index)?;
                let mut a = self.pop(index)?;
                if a.len() + b.len() > MAX_ELEMENT_SIZE {
                    return Err(fail(index, "OP_CAT result exceeds 520 bytes"));
                }
                a.extend(b);
                self.stack.push(a);
            }
            Instr::Sha256 => {
                let v = self.pop(index)?;
                self.stack.push(sha256(&v).0.to_vec());
            }
            Instr::CheckSig => {
                let pubkey = self.pop(index)?;
                let sig = self.pop(index)?;
                if sig.is_empty() {
                    self.stack.push(encode_bool(false));
                } else if self.ctx.check_sig(&sig, &pubkey) {
                    self.stack.push(encode_bool(true));
                } else {
                    return Err(fail(index, "signature check failed"));
                }
            }

            Instr::CheckContractVerify => {
                let check = self.pop_contract_check(index)?;
                if !self.ctx.check_contract(&check) {
                    return Err(fail(
                        index,
                        format!("{:?} contract check failed", check.mode),
                    ));
                }
            }
            Instr::CheckSequenceVerify => {
                self.need(index, 1)?;
                let delay = decode_num(&self.stack[self.stack.len() - 1])
                    .map_err(|e| fail(index, e.to_string()))?;
                match self.ctx.relative_height() {
                    Some(h) if h >= delay => {}
                    Some(h) => {
                        return Err(fail(index, format!("relative height {} below {}", h, delay)))
                    }
                    None => return Err(fail(index, "input sequence carries no relative height")),
                }
            }

            Instr::If | Instr::Else | Instr::EndIf => {
                return Err(fail(index, "flow control outside of run"))
            }
        }
        Ok(())
    }

    fn pop_contract_check(&mut self, index: usize) -> Result<ContractCheck> {
        let flags = self.pop(index)?;
        let taptree = self.pop(index)?;
        let pk = self.pop(index)?;
        let idx = self.pop(index)?;
        let data = self.pop(index)?;

        let mode = match flags.as_slice() {
            [] => CheckMode::Output,
            f if f == CURRENT => CheckMode::Input,
            _ => return Err(fail(index, "unsupported contract flags")),
        };
        let taptree = if taptree == CURRENT {
            TapTreeRef::Current
        } else {
            let root: [u8; 32] = taptree
                .as_slice()
                .try_into()
                .map_err(|_| fail(index, "taptree must be 32 bytes or the current marker"))?;
            TapTreeRef::Root(root)
        };
        let key = match pk.as_slice() {
            [] => ContractKey::Nums,
            bytes => ContractKey::Explicit(
                bytes
                    .try_into()
                    .map_err(|_| fail(index, "contract key must be 32 bytes"))?,
            ),
        };
        let index_arg = if idx == CURRENT {
            None
        } else {
            Some(decode_num(&idx).map_err(|e| fail(index, e.to_string()))?)
        };
        Ok(ContractCheck {
            data,
            index: index_arg,
            key,
            taptree,
            mode,
        })
    }

    fn need(&self, index: usize, n: usize) -> Result<()> {
        if self.stack.len() < n {
            return Err(fail(
                index,
                format!("stack underflow: need {}, have {}", n, self.stack.len()),
            ));
        }
        Ok(())
    }

    fn pop(&mut self, index: usize) -> Result<Vec<u8>> {
        self.stack.pop().ok_or_else(|| fail(index, "stack underflow"))
    }

    fn pop_num(&mut self, index: usize) -> Result<u16> {
        let v = self.pop(index)?;
        decode_num(&v).map_err(|e| fail(index, e.to_string()))
    }

    fn copy_top(&mut self, index: usize, n: usize) -> Result<()> {
        self.need(index, n)?;
        let start = self.stack.len() - n;
        let copied: Vec<Vec<u8>> = self.stack[start..].to_vec();
        self.stack.extend(copied);
        Ok(())
    }
}

// ─── Recording context ─────────────────────────────────────────────

/// Context that accepts every check and records covenant checks in order.
/// Useful for inspecting what a script asks of its transaction.
#[derive(Default)]
pub struct RecordingContext {
    pub height: Option<u16>,
    pub checks: RefCell<Vec<ContractCheck>>,
}

impl ExecContext for RecordingContext {
    fn check_sig(&self, _sig: &[u8], _pubkey: &[u8]) -> bool {
        true
    }

    fn relative_height(&self) -> Option<u16> {
        self.height
    }

    fn check_contract(&self, check: &ContractCheck) -> bool {
        self.checks.borrow_mut().push(check.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(script: &Script, initial: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        let mut m = Machine::new(&NoContext, initial);
        m.run(script)?;
        Ok(m.into_stack())
    }

    #[test]
    fn test_cat_appends_top_to_second() {
        let s = Script::new().op(Instr::Cat);
        assert_eq!(run(&s, vec![vec![1], vec![2, 3]]).unwrap(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_rot_and_over() {
        let s = Script::new().op(Instr::Rot);
        let out = run(&s, vec![vec![1], vec![2], vec![3]]).unwrap();
        assert_eq!(out, vec![vec![2], vec![3], vec![1]]);
        let s = Script::new().op(Instr::Over);
        let out = run(&s, vec![vec![1], vec![2]]).unwrap();
        assert_eq!(out, vec![vec![1], vec![2], vec![1]]);
    }

    #[test]
    fn test_arithmetic_uses_compact_numbers() {
        let s = Script::new().op(Instr::Dup).op(Instr::Add).op(Instr::OneAdd);
        assert_eq!(run(&s, vec![encode_num(200)]).unwrap(), vec![encode_num(401)]);
        let s = Script::new().op(Instr::Add);
        assert!(run(&s, vec![encode_num(u16::MAX), vec![1]]).is_err());
        // non-minimal operands are rejected
        assert!(run(&s, vec![vec![0], vec![1]]).is_err());
    }

    #[test]
    fn test_if_else_branches() {
        let s = Script::new()
            .op(Instr::If)
            .num(1)
            .op(Instr::Else)
            .num(2)
            .op(Instr::EndIf);
        assert_eq!(run(&s, vec![vec![1]]).unwrap(), vec![vec![1]]);
        assert_eq!(run(&s, vec![vec![]]).unwrap(), vec![vec![2]]);
        assert!(run(&s, vec![vec![2]]).is_err());
        let unbalanced = Script::new().op(Instr::If);
        assert!(run(&unbalanced, vec![vec![1]]).is_err());
    }

    #[test]
    fn test_alt_stack() {
        let s = Script::new().op(Instr::ToAlt).num(7).op(Instr::FromAlt);
        assert_eq!(run(&s, vec![vec![9]]).unwrap(), vec![vec![7], vec![9]]);
        assert!(run(&Script::new().op(Instr::FromAlt), vec![]).is_err());
    }

    #[test]
    fn test_equalverify_reports_index() {
        let s = Script::new().num(3).num(4).op(Instr::EqualVerify);
        match run(&s, vec![]) {
            Err(DisputeError::Script { index, .. }) => assert_eq!(index, 2),
            other => panic!("expected script failure, got {:?}", other),
        }
    }

    #[test]
    fn test_checksig_needs_context() {
        let s = Script::new().push(vec![0u8; 32]).op(Instr::CheckSig);
        assert!(run(&s, vec![vec![1; 64]]).is_err());
        // empty signature is a clean false
        assert_eq!(run(&s, vec![vec![]]).unwrap(), vec![Vec::<u8>::new()]);
        let ctx = RecordingContext::default();
        assert!(Machine::verify_spend(&ctx, &s, vec![vec![1; 64]]).is_ok());
    }

    #[test]
    fn test_contract_check_arguments() {
        let ctx = RecordingContext::default();
        let s = Script::new()
            .push(vec![0xaa; 32])
            .push(CURRENT.to_vec())
            .push(Vec::new())
            .push(CURRENT.to_vec())
            .push(CURRENT.to_vec())
            .op(Instr::CheckContractVerify)
            .push(vec![0xbb; 32])
            .num(0)
            .push(Vec::new())
            .push(vec![0xcc; 32])
            .num(0)
            .op(Instr::CheckContractVerify)
            .num(1);
        Machine::verify_spend(&ctx, &s, vec![]).unwrap();
        let checks = ctx.checks.borrow();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].mode, CheckMode::Input);
        assert_eq!(checks[0].index, None);
        assert_eq!(checks[0].taptree, TapTreeRef::Current);
        assert_eq!(checks[1].mode, CheckMode::Output);
        assert_eq!(checks[1].index, Some(0));
        assert_eq!(checks[1].key, ContractKey::Nums);
        assert_eq!(checks[1].taptree, TapTreeRef::Root([0xcc; 32]));
        assert_eq!(checks[1].data, vec![0xbb; 32]);
    }

    #[test]
    fn test_csv_compares_relative_height() {
        let s = Script::new()
            .num(100)
            .op(Instr::CheckSequenceVerify)
            .op(Instr::Drop)
            .num(1);
        let early = RecordingContext {
            height: Some(99),
            ..Default::default()
        };
        assert!(Machine::verify_spend(&early, &s, vec![]).is_err());
        let mature = RecordingContext {
            height: Some(100),
            ..Default::default()
        };
        assert!(Machine::verify_spend(&mature, &s, vec![]).is_ok());
        assert!(Machine::verify_spend(&NoContext, &s, vec![]).is_err());
    }

    #[test]
    fn test_cleanstack() {
        let s = Script::new().num(1).num(1);
        assert!(Machine::verify_spend(&NoContext, &s, vec![]).is_err());
        let s = Script::new().num(0);
        assert!(Machine::verify_spend(&NoContext, &s, vec![]).is_err());
    }
}
