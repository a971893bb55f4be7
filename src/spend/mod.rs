//! Phase spends as ledger transactions.
//!
//! Each spend has one input, the live covenant output, and one output:
//! either the successor phase's output committing to the new data, or a
//! key-path payout to the winner. The input is signed with
//! `SIGHASH_ALL|ANYONECANPAY` so a separate fee layer may attach inputs, and
//! output 0 carries the full contract value.
//!
//! Before a spend is handed to a [`Ledger`], [`PhaseSpend::verify`] runs the
//! leaf script through the reference [`Machine`] against the transaction.

pub mod ledger;

use std::fmt;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::key::{Keypair, XOnlyPublicKey};
use bitcoin::relative;
use bitcoin::secp256k1::{schnorr, Message, Secp256k1};
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::taproot::{LeafVersion, Signature as TaprootSignature};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, ScriptBuf, Sequence, TapLeafHash, TapNodeHash, TapSighash, TapSighashType,
    Transaction, TxIn, TxOut, Txid, Witness,
};
use tracing::debug;

use crate::commitment::Digest;
use crate::driver::PhaseWitness;
use crate::error::{DisputeError, Result};
use crate::phase::{nums_key, tweaked_key, ContractParams, LeafKind, Phase, PhaseChain, Role};
use crate::script::{CheckMode, ContractCheck, ContractKey, ExecContext, Machine, Script, TapTreeRef};

pub use ledger::{Ledger, MemoryLedger, OnLedgerDispute, OnLedgerReport, Party};

const SIGHASH_TYPE: TapSighashType = TapSighashType::AllPlusAnyoneCanPay;

fn signer_err(e: impl fmt::Display) -> DisputeError {
    DisputeError::Signer(e.to_string())
}

// ─── Signing ───────────────────────────────────────────────────────

pub trait Signer {
    fn public_key(&self, role: Role) -> Result<XOnlyPublicKey>;

    fn sign(&self, sighash: TapSighash, role: Role) -> Result<schnorr::Signature>;
}

/// Signs for a single role with an in-memory keypair.
pub struct KeypairSigner {
    role: Role,
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(role: Role, keypair: Keypair) -> Self {
        Self { role, keypair }
    }

    pub fn from_secret(role: Role, secret: &[u8; 32]) -> Result<Self> {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, secret).map_err(signer_err)?;
        Ok(Self { role, keypair })
    }

    fn check_role(&self, role: Role) -> Result<()> {
        if role != self.role {
            return Err(DisputeError::Signer(format!(
                "{} signer asked to sign for the {}",
                self.role, role
            )));
        }
        Ok(())
    }
}

impl Signer for KeypairSigner {
    fn public_key(&self, role: Role) -> Result<XOnlyPublicKey> {
        self.check_role(role)?;
        Ok(self.keypair.x_only_public_key().0)
    }

    fn sign(&self, sighash: TapSighash, role: Role) -> Result<schnorr::Signature> {
        self.check_role(role)?;
        let secp = Secp256k1::signing_only();
        let msg = Message::from_digest(sighash.to_byte_array());
        Ok(secp.sign_schnorr_no_aux_rand(&msg, &self.keypair))
    }
}

fn script_sighash(
    tx: &Transaction,
    prevout: &TxOut,
    leaf_hash: TapLeafHash,
    sighash_type: TapSighashType,
) -> Result<TapSighash> {
    SighashCache::new(tx)
        .taproot_script_spend_signature_hash(0, &Prevouts::One(0, prevout), leaf_hash, sighash_type)
        .map_err(signer_err)
}

// ─── Outputs ───────────────────────────────────────────────────────

/// A live covenant output and the data its internal key commits to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractOutput {
    /// The phase whose tree locks this output.
    pub phase: Phase,
    pub outpoint: OutPoint,
    pub txout: TxOut,
    pub data: Vec<u8>,
}

/// A signed single-input spend of a [`ContractOutput`].
#[derive(Clone, Debug)]
pub struct PhaseSpend {
    pub phase: Phase,
    pub leaf: LeafKind,
    pub tx: Transaction,
    pub prevout: TxOut,
    script: Script,
    tree_root: TapNodeHash,
    /// The successor's output, when the spend creates one.
    pub next: Option<ContractOutput>,
}

impl PhaseSpend {
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    /// Dry-run the leaf script against this transaction.
    pub fn verify(&self) -> Result<()> {
        let input = self
            .tx
            .input
            .first()
            .ok_or_else(|| DisputeError::witness(self.phase, "spend has no input"))?;
        let items: Vec<Vec<u8>> = input.witness.iter().map(|w| w.to_vec()).collect();
        if items.len() < 2 {
            return Err(DisputeError::witness(self.phase, "witness lacks script and control block"));
        }
        let stack = items[..items.len() - 2].to_vec();
        let leaf_script = ScriptBuf::from_bytes(items[items.len() - 2].clone());
        let ctx = TxContext {
            tx: &self.tx,
            prevout: &self.prevout,
            leaf_hash: TapLeafHash::from_script(&leaf_script, LeafVersion::TapScript),
            tree_root: self.tree_root,
        };
        Machine::verify_spend(&ctx, &self.script, stack)?;
        debug!(phase = %self.phase, leaf = %self.leaf, txid = %self.txid(), "spend verified");
        Ok(())
    }
}

// ─── Builder ───────────────────────────────────────────────────────

pub struct SpendBuilder<'a> {
    chain: &'a PhaseChain,
    params: &'a ContractParams,
}

impl<'a> SpendBuilder<'a> {
    pub fn new(chain: &'a PhaseChain, params: &'a ContractParams) -> Self {
        Self { chain, params }
    }

    pub fn params(&self) -> &ContractParams {
        self.params
    }

    /// The contract output: the Question tree under the bare NUMS key.
    pub fn contract_txout(&self, value: Amount) -> Result<TxOut> {
        Ok(TxOut {
            value,
            script_pubkey: self.chain.tree(Phase::Question)?.script_pubkey(&[])?,
        })
    }

    pub fn contract_output(&self, outpoint: OutPoint, value: Amount) -> Result<ContractOutput> {
        Ok(ContractOutput {
            phase: Phase::Question,
            outpoint,
            txout: self.contract_txout(value)?,
            data: Vec::new(),
        })
    }

    /// Build and sign the spend of `output` carrying `witness`.
    ///
    /// `commitment` is the data of the output the spend creates, as returned
    /// by the session transition; `None` pays the signer's key instead.
    pub fn spend(
        &self,
        output: &ContractOutput,
        witness: &PhaseWitness,
        commitment: Option<Digest>,
        signer: &dyn Signer,
    ) -> Result<PhaseSpend> {
        let tree = self.chain.tree(output.phase)?;
        let (leaf, role) = match witness {
            PhaseWitness::Timeout { role } => (tree.timeout_leaf()?, *role),
            PhaseWitness::Leaf { start } => (tree.leaf(LeafKind::Step(start.pc))?, Role::Prover),
            _ => (tree.leaf(LeafKind::Phase)?, output.phase.actor()),
        };

        let key = signer.public_key(role)?;
        if key != self.params.parties.key(role) {
            return Err(DisputeError::Signer(format!(
                "key {} is not the {}'s contract key",
                key, role
            )));
        }

        let sequence = match leaf.kind {
            LeafKind::Timeout { delay, .. } => Sequence::from_height(delay),
            _ => Sequence::ENABLE_RBF_NO_LOCKTIME,
        };

        let value = output.txout.value;
        let next_phase = match commitment {
            Some(c) => {
                let phase = output
                    .phase
                    .next(self.params.total_levels)
                    .ok_or_else(|| DisputeError::witness(output.phase, "no successor for a commitment"))?;
                Some((phase, c))
            }
            None => None,
        };
        let txout = match next_phase {
            Some((phase, c)) => TxOut {
                value,
                script_pubkey: self.chain.tree(phase)?.script_pubkey(&c.0)?,
            },
            None => {
                let secp = Secp256k1::verification_only();
                TxOut {
                    value,
                    script_pubkey: ScriptBuf::new_p2tr(&secp, key, None),
                }
            }
        };

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: output.outpoint,
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::new(),
            }],
            output: vec![txout.clone()],
        };

        let leaf_hash = TapLeafHash::from_script(&leaf.script_buf, LeafVersion::TapScript);
        let sighash = script_sighash(&tx, &output.txout, leaf_hash, SIGHASH_TYPE)?;
        let signature = TaprootSignature {
            signature: signer.sign(sighash, role)?,
            sighash_type: SIGHASH_TYPE,
        };
        let control = tree.control_block(leaf, &output.data)?;

        let mut w = Witness::new();
        w.push(signature.to_vec());
        for item in witness.to_stack() {
            w.push(item);
        }
        w.push(leaf.script_buf.as_bytes());
        w.push(control.serialize());
        tx.input[0].witness = w;

        let txid = tx.compute_txid();
        let next = next_phase.map(|(phase, c)| ContractOutput {
            phase,
            outpoint: OutPoint::new(txid, 0),
            txout,
            data: c.0.to_vec(),
        });
        debug!(
            phase = %output.phase,
            leaf = %leaf.kind,
            %txid,
            commitment = ?commitment,
            "built spend"
        );
        Ok(PhaseSpend {
            phase: output.phase,
            leaf: leaf.kind,
            tx,
            prevout: output.txout.clone(),
            script: leaf.script.clone(),
            tree_root: tree.root(),
            next,
        })
    }
}

// ─── Transaction context ───────────────────────────────────────────

/// Answers script queries from a single-input transaction.
struct TxContext<'a> {
    tx: &'a Transaction,
    prevout: &'a TxOut,
    leaf_hash: TapLeafHash,
    tree_root: TapNodeHash,
}

impl TxContext<'_> {
    fn expected_script_pubkey(&self, check: &ContractCheck) -> Result<ScriptBuf> {
        let base = match check.key {
            ContractKey::Nums => nums_key()?,
            ContractKey::Explicit(bytes) => {
                XOnlyPublicKey::from_slice(&bytes).map_err(|e| DisputeError::Taproot(e.to_string()))?
            }
        };
        let internal = tweaked_key(base, &check.data)?;
        let root = match check.taptree {
            TapTreeRef::Current => self.tree_root,
            TapTreeRef::Root(bytes) => TapNodeHash::from_byte_array(bytes),
        };
        let secp = Secp256k1::verification_only();
        Ok(ScriptBuf::new_p2tr(&secp, internal, Some(root)))
    }
}

impl ExecContext for TxContext<'_> {
    fn check_sig(&self, sig: &[u8], pubkey: &[u8]) -> bool {
        let (sig, key) = match (
            TaprootSignature::from_slice(sig),
            XOnlyPublicKey::from_slice(pubkey),
        ) {
            (Ok(sig), Ok(key)) => (sig, key),
            _ => return false,
        };
        let sighash = match script_sighash(self.tx, self.prevout, self.leaf_hash, sig.sighash_type) {
            Ok(h) => h,
            Err(_) => return false,
        };
        let msg = Message::from_digest(sighash.to_byte_array());
        Secp256k1::verification_only()
            .verify_schnorr(&sig.signature, &msg, &key)
            .is_ok()
    }

    fn relative_height(&self) -> Option<u16> {
        match self.tx.input.first()?.sequence.to_relative_lock_time()? {
            relative::LockTime::Blocks(height) => Some(height.value()),
            relative::LockTime::Time(_) => None,
        }
    }

    fn check_contract(&self, check: &ContractCheck) -> bool {
        let expected = match self.expected_script_pubkey(check) {
            Ok(spk) => spk,
            Err(_) => return false,
        };
        match check.mode {
            CheckMode::Input => {
                matches!(check.index, None | Some(0)) && self.prevout.script_pubkey == expected
            }
            CheckMode::Output => {
                let out = match check.index.and_then(|i| self.tx.output.get(i as usize)) {
                    Some(out) => out,
                    None => return false,
                };
                out.script_pubkey == expected && out.value >= self.prevout.value
            }
        }
    }
}
