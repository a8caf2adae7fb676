//! Order-sensitive commitment over a batch of leaf hashes.
//!
//! Levels are built pairwise from left to right. When a level has an odd
//! number of nodes the last one is promoted unchanged, so no leaf is ever
//! duplicated and every distinct ordering yields a distinct root.
use std::fmt;

use crate::Sha256Hasher;
use crate::hasher::MerkleHasher;
use crate::proof::MerkleProof;

/// 32-byte hash used for leaves and roots.
pub type Hash32 = [u8; 32];

/// Computes the root of `leaves` under hasher `MH`.
///
/// An empty list yields the zero hash and a single leaf is its own root.
pub fn compute_root<MH: MerkleHasher>(leaves: &[MH::Hash]) -> MH::Hash {
    if leaves.is_empty() {
        return MH::zero_hash();
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level::<MH>(&level);
    }
    level[0]
}

fn next_level<MH: MerkleHasher>(level: &[MH::Hash]) -> Vec<MH::Hash> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => MH::hash_node(*left, *right),
            [single] => *single,
            _ => unreachable!("chunks(2) yields one or two nodes"),
        })
        .collect()
}

/// Generates an inclusion proof for the leaf at `index`.
pub fn gen_proof<MH: MerkleHasher>(leaves: &[MH::Hash], index: usize) -> Option<MerkleProof<MH::Hash>> {
    if index >= leaves.len() {
        return None;
    }

    let mut level = leaves.to_vec();
    let mut idx = index;
    let mut path = Vec::new();

    while level.len() > 1 {
        if let Some(sibling) = level.get(idx ^ 1) {
            path.push(*sibling);
        }
        level = next_level::<MH>(&level);
        idx >>= 1;
    }

    Some(MerkleProof::from_cohashes(
        path,
        index as u64,
        leaves.len() as u64,
    ))
}

/// Root plus ordered leaves of one flushed batch.
///
/// Computed once per batch and never mutated afterwards.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MerkleCommitment {
    root: Hash32,
    leaves: Vec<Hash32>,
}

impl MerkleCommitment {
    /// Commits to already-hashed leaves, preserving their order.
    pub fn from_leaves(leaves: Vec<Hash32>) -> Self {
        let root = compute_root::<Sha256Hasher>(&leaves);
        Self { root, leaves }
    }

    /// Hashes each blob as a leaf, then commits to the result.
    pub fn from_blobs<B: AsRef<[u8]>>(blobs: impl IntoIterator<Item = B>) -> Self {
        Self::from_leaves(
            blobs
                .into_iter()
                .map(|b| Sha256Hasher::hash_leaf(b.as_ref()))
                .collect(),
        )
    }

    /// Returns the root.
    pub fn root(&self) -> &Hash32 {
        &self.root
    }

    /// Returns the root as lowercase hex.
    pub fn root_hex(&self) -> String {
        hex::encode(self.root)
    }

    /// Returns the ordered leaves.
    pub fn leaves(&self) -> &[Hash32] {
        &self.leaves
    }

    /// Returns the number of leaves.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Returns whether the commitment has no leaves.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Generates an inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof<Hash32>> {
        gen_proof::<Sha256Hasher>(&self.leaves, index)
    }

    /// Verifies `proof` for `leaf` against this commitment's root.
    pub fn verify(&self, proof: &MerkleProof<Hash32>, leaf: &Hash32) -> bool {
        proof.verify::<Sha256Hasher>(&self.root, leaf)
    }

    /// Consumes the commitment and returns its parts.
    pub fn into_parts(self) -> (Hash32, Vec<Hash32>) {
        (self.root, self.leaves)
    }
}

impl fmt::Debug for MerkleCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerkleCommitment")
            .field("root", &self.root_hex())
            .field("leaves", &self.leaves.len())
            .finish()
    }
}
