//! Interval commitments over a trace.
//!
//! Every dyadic interval `[from, to)` has a node
//!
//! ```text
//! preimage   = enc(trace[from]) || enc(trace[to]) || children
//! sub_commit = H(preimage)
//! children   = H(sub_commit(left) || sub_commit(right))    (to - from > 1)
//!            = H(H(∅) || H(∅))                             (to - from == 1)
//! ```
//!
//! with `H = SHA-256` and `left`, `right` the two halves split at the
//! midpoint. The root node over `[0, len - 1)` is what the prover commits to
//! in the Answer phase; each Reveal opens one node into its two children.

use std::fmt;

use bitcoin::hashes::{sha256, Hash};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::trace;

use crate::error::{DisputeError, Result};
use crate::trace::{Interval, State, Trace};

/// Intervals at least this long hash their halves on separate rayon tasks.
const PARALLEL_THRESHOLD: usize = 64;

// ─── Digest ────────────────────────────────────────────────────────

/// A 256-bit SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Display as full hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let hi = hex_digit(chunk[0])?;
            let lo = hex_digit(chunk[1])?;
            bytes[i] = (hi << 4) | lo;
        }
        Some(Digest(bytes))
    }

    /// First four bytes as hex, for logs.
    pub fn to_short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Digest(arr))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.to_short())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).ok_or_else(|| serde::de::Error::custom("expected 64 hex characters"))
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// ─── Hash primitives ───────────────────────────────────────────────

pub fn sha256(data: &[u8]) -> Digest {
    Digest(sha256::Hash::hash(data).to_byte_array())
}

/// `H(a || b)`.
pub fn hash_pair(a: &Digest, b: &Digest) -> Digest {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&a.0);
    buf[32..].copy_from_slice(&b.0);
    sha256(&buf)
}

/// Children digest of a single-step interval: `H(H(∅) || H(∅))`.
pub fn empty_subtree() -> Digest {
    let empty = sha256(&[]);
    hash_pair(&empty, &empty)
}

/// `enc(start) || enc(end) || children`.
pub fn node_preimage(start: &State, end: &State, children: &Digest) -> Vec<u8> {
    let mut out = start.encode();
    out.extend(end.encode());
    out.extend_from_slice(&children.0);
    out
}

pub fn node_hash(start: &State, end: &State, children: &Digest) -> Digest {
    sha256(&node_preimage(start, end, children))
}

// ─── Commitment tree ───────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitmentNode {
    pub interval: Interval,
    pub children: Digest,
    pub preimage: Vec<u8>,
    pub sub_commit: Digest,
}

/// Compute the node for `interval` of `trace`.
pub fn sub_commitment(trace: &Trace, interval: Interval) -> Result<CommitmentNode> {
    let interval = Interval::new(interval.from, interval.to, trace.len())?;
    Ok(build_node(trace.states(), interval))
}

/// `(nodeBytes, subCommit)` for `interval`.
pub fn commit(trace: &Trace, interval: Interval) -> Result<(Vec<u8>, Digest)> {
    let node = sub_commitment(trace, interval)?;
    Ok((node.preimage, node.sub_commit))
}

/// Root commitment over the whole trace.
pub fn root_commitment(trace: &Trace) -> Digest {
    build_node(trace.states(), trace.full_interval()).sub_commit
}

fn build_node(states: &[State], interval: Interval) -> CommitmentNode {
    let children = match interval.halves() {
        None => empty_subtree(),
        Some((left, right)) => {
            let (l, r) = if interval.len() >= PARALLEL_THRESHOLD {
                rayon::join(
                    || build_node(states, left).sub_commit,
                    || build_node(states, right).sub_commit,
                )
            } else {
                (
                    build_node(states, left).sub_commit,
                    build_node(states, right).sub_commit,
                )
            };
            hash_pair(&l, &r)
        }
    };
    let preimage = node_preimage(&states[interval.from], &states[interval.to], &children);
    let sub_commit = sha256(&preimage);
    trace!(from = interval.from, to = interval.to, commit = %sub_commit.to_short(), "node");
    CommitmentNode {
        interval,
        children,
        preimage,
        sub_commit,
    }
}

/// Check that `claimed` is the sub-commitment of `interval` in `trace`.
pub fn verify_sub_commitment(trace: &Trace, interval: Interval, claimed: &Digest) -> Result<()> {
    let actual = sub_commitment(trace, interval)?.sub_commit;
    if actual != *claimed {
        return Err(DisputeError::CommitmentMismatch {
            expected: *claimed,
            actual,
        });
    }
    Ok(())
}

// ─── Report ────────────────────────────────────────────────────────

/// One row of a [`CommitmentReport`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub interval: Interval,
    /// `start fields | end fields | children`, each hex.
    pub node: String,
    pub sub_commit: Digest,
}

/// The full commitment tree of an interval, grouped by depth.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommitmentReport {
    pub root: Digest,
    pub depths: Vec<Vec<ReportEntry>>,
}

pub fn commitment_report(trace: &Trace, interval: Interval) -> Result<CommitmentReport> {
    let interval = Interval::new(interval.from, interval.to, trace.len())?;
    let mut depths: Vec<Vec<ReportEntry>> = Vec::new();
    let root = collect(trace.states(), interval, 0, &mut depths);
    Ok(CommitmentReport { root, depths })
}

fn collect(
    states: &[State],
    interval: Interval,
    depth: usize,
    depths: &mut Vec<Vec<ReportEntry>>,
) -> Digest {
    let children = match interval.halves() {
        None => empty_subtree(),
        Some((left, right)) => {
            let l = collect(states, left, depth + 1, depths);
            let r = collect(states, right, depth + 1, depths);
            hash_pair(&l, &r)
        }
    };
    let start = &states[interval.from];
    let end = &states[interval.to];
    let sub_commit = node_hash(start, end, &children);

    let mut node = String::new();
    for field in start.stack_items().iter().chain(end.stack_items().iter()) {
        node.push_str(&hex(field));
        node.push('|');
    }
    node.push_str(&children.to_hex());

    if depths.len() <= depth {
        depths.resize_with(depth + 1, Vec::new);
    }
    depths[depth].push(ReportEntry {
        interval,
        node,
        sub_commit,
    });
    sub_commit
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl fmt::Display for CommitmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, entries) in self.depths.iter().enumerate() {
            writeln!(f, "depth {}:", depth)?;
            for e in entries {
                writeln!(f, "  {:<10} {} -> {}", e.interval.to_string(), e.node, e.sub_commit.to_short())?;
            }
        }
        write!(f, "root: {}", self.root)
    }
}
