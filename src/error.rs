use thiserror::Error;

use crate::commitment::Digest;

/// Errors raised by the dispute core and its ledger-facing helpers.
///
/// `CommitmentMismatch` is the expected signal that drives bisection: an
/// agent that hits it cannot act in the current phase and its counterparty
/// takes the timeout branch. `ProtocolViolation` is the only kind that must
/// abort a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisputeError {
    #[error("invalid interval [{from}, {to}) for a trace of {len} states")]
    InvalidInterval { from: usize, to: usize, len: usize },

    #[error("trace length {len} is not 2^L + 1")]
    TraceLengthInvalid { len: usize },

    #[error("commitment mismatch: expected {expected}, got {actual}")]
    CommitmentMismatch { expected: Digest, actual: Digest },

    #[error("level {level} outside [1, {total}]")]
    UnsupportedLevel { level: u32, total: u32 },

    #[error("program counter {pc} has no step in a program of {steps} steps")]
    UnknownProgramCounter { pc: u16, steps: usize },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("state encoding: {0}")]
    StateEncoding(String),

    #[error("invalid witness for {phase}: {reason}")]
    InvalidWitness { phase: String, reason: String },

    #[error("script evaluation failed at instruction {index}: {reason}")]
    Script { index: usize, reason: String },

    #[error("taproot: {0}")]
    Taproot(String),

    #[error("signer: {0}")]
    Signer(String),

    #[error("ledger: {0}")]
    Ledger(String),

    #[error("config: {0}")]
    Config(String),

    #[error("trace format: {0}")]
    TraceFormat(String),
}

impl DisputeError {
    /// True for the kinds a party recovers from by letting the counterparty
    /// time out.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DisputeError::ProtocolViolation(_))
    }

    pub(crate) fn witness(phase: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        DisputeError::InvalidWitness {
            phase: phase.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DisputeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_protocol_violation_is_fatal() {
        assert!(!DisputeError::ProtocolViolation("x".into()).is_recoverable());
        assert!(DisputeError::TraceLengthInvalid { len: 4 }.is_recoverable());
        assert!(DisputeError::UnsupportedLevel { level: 0, total: 5 }.is_recoverable());
    }

    #[test]
    fn test_messages_carry_context() {
        let e = DisputeError::InvalidInterval {
            from: 3,
            to: 6,
            len: 33,
        };
        assert_eq!(e.to_string(), "invalid interval [3, 6) for a trace of 33 states");
        let e = DisputeError::witness("Choose(2)", "bad direction");
        assert_eq!(e.to_string(), "invalid witness for Choose(2): bad direction");
    }
}
