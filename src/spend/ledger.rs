//! Ledger access and the on-ledger dispute runner.

use std::collections::HashMap;

use bitcoin::absolute::LockTime;
use bitcoin::relative;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use tracing::{info, warn};

use super::{ContractOutput, PhaseSpend, Signer, SpendBuilder};
use crate::commitment::Digest;
use crate::driver::{
    drive_next_phase, Agent, DisputeTranscript, PhaseWitness, ProtocolSession, TranscriptEntry,
};
use crate::error::{DisputeError, Result};
use crate::phase::Role;
use crate::trace::StepExecutor;

/// The chain the covenant outputs live on.
pub trait Ledger {
    /// Submit `tx`. Acceptance is the only commit barrier the protocol has.
    fn publish(&mut self, tx: &Transaction) -> Result<Txid>;

    /// Block until `txid` is `depth` blocks deep; returns its height.
    fn await_confirmation(&mut self, txid: Txid, depth: u32) -> Result<u32>;

    /// Block until `n` more blocks exist.
    fn wait_blocks(&mut self, n: u16) -> Result<()>;
}

// ─── In-memory ledger ──────────────────────────────────────────────

/// A single-node ledger that mines one block per published transaction.
///
/// Enforces that inputs exist and are unspent and that relative-height
/// sequences have matured. Scripts are not evaluated here.
#[derive(Default)]
pub struct MemoryLedger {
    height: u32,
    utxos: HashMap<OutPoint, (TxOut, u32)>,
    confirmed: HashMap<Txid, u32>,
    funded: u32,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn utxo(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.utxos.get(outpoint).map(|(out, _)| out)
    }

    /// Create an output out of thin air, confirmed in a new block.
    pub fn fund(&mut self, value: Amount, script_pubkey: ScriptBuf) -> OutPoint {
        self.funded += 1;
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(self.funded.to_le_bytes().to_vec()),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value,
                script_pubkey,
            }],
        };
        self.mine(&tx)
    }

    fn mine(&mut self, tx: &Transaction) -> OutPoint {
        self.height += 1;
        let txid = tx.compute_txid();
        for input in &tx.input {
            self.utxos.remove(&input.previous_output);
        }
        for (vout, out) in tx.output.iter().enumerate() {
            self.utxos
                .insert(OutPoint::new(txid, vout as u32), (out.clone(), self.height));
        }
        self.confirmed.insert(txid, self.height);
        OutPoint::new(txid, 0)
    }
}

impl Ledger for MemoryLedger {
    fn publish(&mut self, tx: &Transaction) -> Result<Txid> {
        let next_height = self.height + 1;
        for input in &tx.input {
            let (_, confirmed_at) = self.utxos.get(&input.previous_output).ok_or_else(|| {
                DisputeError::Ledger(format!("{} is missing or spent", input.previous_output))
            })?;
            if let Some(relative::LockTime::Blocks(h)) = input.sequence.to_relative_lock_time() {
                let depth = next_height - confirmed_at;
                if depth < u32::from(h.value()) {
                    return Err(DisputeError::Ledger(format!(
                        "{} is {} blocks deep, sequence needs {}",
                        input.previous_output,
                        depth,
                        h.value()
                    )));
                }
            }
        }
        let outpoint = self.mine(tx);
        Ok(outpoint.txid)
    }

    fn await_confirmation(&mut self, txid: Txid, depth: u32) -> Result<u32> {
        let height = *self
            .confirmed
            .get(&txid)
            .ok_or_else(|| DisputeError::Ledger(format!("{} was never published", txid)))?;
        let target = height + depth.saturating_sub(1);
        if self.height < target {
            self.height = target;
        }
        Ok(height)
    }

    fn wait_blocks(&mut self, n: u16) -> Result<()> {
        self.height += u32::from(n);
        Ok(())
    }
}

// ─── Runner ────────────────────────────────────────────────────────

/// One side of an on-ledger dispute.
#[derive(Clone, Copy)]
pub struct Party<'a> {
    pub agent: &'a dyn Agent,
    pub signer: &'a dyn Signer,
}

#[derive(Clone, Debug)]
pub struct OnLedgerReport {
    pub transcript: DisputeTranscript,
    /// Published spends, in order.
    pub txids: Vec<Txid>,
    /// The winner's payout.
    pub payout: OutPoint,
}

/// Drives two agents over a [`Ledger`], one confirmed spend per phase.
pub struct OnLedgerDispute<'a> {
    builder: SpendBuilder<'a>,
    ledger: &'a mut dyn Ledger,
    executor: &'a dyn StepExecutor,
}

impl<'a> OnLedgerDispute<'a> {
    pub fn new(builder: SpendBuilder<'a>, ledger: &'a mut dyn Ledger, executor: &'a dyn StepExecutor) -> Self {
        Self {
            builder,
            ledger,
            executor,
        }
    }

    /// Run the dispute from the funded contract output to a payout.
    ///
    /// An agent that has nothing valid to post, or whose spend fails the
    /// dry run, forfeits: its counterparty waits out the delay and spends
    /// the timeout leaf.
    pub fn run(&mut self, prover: Party<'_>, verifier: Party<'_>, contract: ContractOutput) -> Result<OnLedgerReport> {
        let total_levels = self.builder.params().total_levels;
        let delay = self.builder.params().timeout_blocks;
        let mut session = ProtocolSession::new(total_levels)?;
        let mut output = contract;
        let mut entries = Vec::new();
        let mut txids = Vec::new();

        loop {
            let actor = session.phase.actor();
            let (acting, waiting) = match actor {
                Role::Prover => (prover, verifier),
                Role::Verifier => (verifier, prover),
            };

            let (current, reply) = drive_next_phase(acting.agent, &session, None, self.executor)?;
            let posted = match reply {
                Some(witness) => self.try_spend(&current, &output, witness, acting)?,
                None => None,
            };
            let (witness, role, spend, commitment) = match posted {
                Some((witness, spend, commitment)) => (witness, actor, spend, commitment),
                None => {
                    let role = actor.counterparty();
                    info!(phase = %current.phase, %role, delay, "waiting out the timeout");
                    self.ledger.wait_blocks(delay)?;
                    let witness = PhaseWitness::Timeout { role };
                    let spend = self.builder.spend(&output, &witness, None, waiting.signer)?;
                    spend.verify()?;
                    (witness, role, spend, None)
                }
            };

            let transition = current.apply(&witness, self.executor)?;
            let txid = self.ledger.publish(&spend.tx)?;
            let height = self.ledger.await_confirmation(txid, 1)?;
            info!(phase = %current.phase, %role, %txid, height, "spend confirmed");
            txids.push(txid);
            entries.push(TranscriptEntry {
                phase: current.phase,
                role,
                witness,
                commitment,
                interval: transition.session.interval,
            });
            session = transition.session;

            match (session.outcome, spend.next) {
                (Some(outcome), _) => {
                    return Ok(OnLedgerReport {
                        transcript: DisputeTranscript {
                            entries,
                            final_interval: session.interval,
                            outcome,
                        },
                        txids,
                        payout: OutPoint::new(txid, 0),
                    })
                }
                (None, Some(next)) => output = next,
                (None, None) => {
                    return Err(DisputeError::ProtocolViolation(format!(
                        "{} spend created no successor output",
                        current.phase
                    )))
                }
            }
        }
    }

    /// Build, sign and dry-run `witness`; `None` when the party cannot post it.
    fn try_spend(
        &self,
        session: &ProtocolSession,
        output: &ContractOutput,
        witness: PhaseWitness,
        party: Party<'_>,
    ) -> Result<Option<(PhaseWitness, PhaseSpend, Option<Digest>)>> {
        let transition = session.apply(&witness, self.executor)?;
        let spend = self
            .builder
            .spend(output, &witness, transition.commitment, party.signer)
            .and_then(|spend| spend.verify().map(|_| spend));
        match spend {
            Ok(spend) => Ok(Some((witness, spend, transition.commitment))),
            Err(e) if e.is_recoverable() => {
                warn!(phase = %session.phase, error = %e, "spend rejected by dry run");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
