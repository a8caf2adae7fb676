//! Inclusion proofs against a batch commitment root.

use crate::hasher::{MerkleHash, MerkleHasher};

/// Proof that a leaf sits at `index` in a tree of `leaf_count` leaves.
///
/// Trees promote the last node of an odd-width level unchanged, so a proof may
/// carry fewer cohashes than the tree has levels. The leaf count is needed to
/// tell which levels were skipped.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MerkleProof<H>
where
    H: MerkleHash,
{
    /// Sibling hashes from the leaf level upwards.
    pub(crate) cohashes: Vec<H>,

    /// Index of the element for which this proof is for.
    pub(crate) index: u64,

    /// Number of leaves in the tree the proof was generated from.
    pub(crate) leaf_count: u64,
}

impl<H: MerkleHash> MerkleProof<H> {
    /// Constructs a new instance from the path.
    pub fn from_cohashes(cohashes: Vec<H>, index: u64, leaf_count: u64) -> Self {
        Self {
            cohashes,
            index,
            leaf_count,
        }
    }

    /// Returns the cohash path for this proof.
    pub fn cohashes(&self) -> &[H] {
        &self.cohashes
    }

    /// Returns the index this proof is for.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Returns the leaf count of the proven tree.
    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    /// Computes the root obtained by applying this proof to `leaf`.
    ///
    /// Returns `None` if the proof is inconsistent with its own index and leaf
    /// count.
    pub fn compute_root<MH>(&self, leaf: &H) -> Option<H>
    where
        MH: MerkleHasher<Hash = H>,
    {
        if self.index >= self.leaf_count {
            return None;
        }

        let mut cur = *leaf;
        let mut idx = self.index;
        let mut width = self.leaf_count;
        let mut cohashes = self.cohashes.iter();

        while width > 1 {
            let sibling = idx ^ 1;
            if sibling < width {
                let co = *cohashes.next()?;
                cur = if idx & 1 == 1 {
                    MH::hash_node(co, cur)
                } else {
                    MH::hash_node(cur, co)
                };
            }
            idx >>= 1;
            width = width.div_ceil(2);
        }

        if cohashes.next().is_some() {
            return None;
        }

        Some(cur)
    }

    /// Verifies this proof for `leaf` against the expected `root`.
    pub fn verify<MH>(&self, root: &H, leaf: &H) -> bool
    where
        MH: MerkleHasher<Hash = H>,
    {
        self.compute_root::<MH>(leaf)
            .is_some_and(|computed| <H as MerkleHash>::eq_ct(&computed, root))
    }
}
