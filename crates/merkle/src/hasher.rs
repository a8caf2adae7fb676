//! Hashing primitives for batch commitments: hash types and hashing strategies.
use std::sync::LazyLock;

use digest::Digest;
use sha2::Sha256;

type Tag = [u8; 64];

static NODE_TAG_PREFIX: LazyLock<Tag> = LazyLock::new(|| make_tag(b"darelay/node"));
static LEAF_TAG_PREFIX: LazyLock<Tag> = LazyLock::new(|| make_tag(b"darelay/leaf"));

/// Makes a 64 byte tag from a slice, which ideally contains a ASCII string.
fn make_tag(s: &[u8]) -> Tag {
    let raw = Sha256::digest(s);
    let mut buf = [0; 64];
    buf[..32].copy_from_slice(&raw);
    buf[32..].copy_from_slice(&raw);
    buf
}

/// Hash wrapper trait used by the commitment tree.
pub trait MerkleHash: Copy + Clone + Eq + 'static {
    /// Length of the hash in bytes.
    const HASH_LEN: usize;

    /// Returns a zero hash.
    fn zero() -> Self;

    /// Checks if two hashes are equal without short-circuiting.
    fn eq_ct(a: &Self, b: &Self) -> bool;
}

impl<const LEN: usize> MerkleHash for [u8; LEN] {
    const HASH_LEN: usize = LEN;

    fn zero() -> Self {
        [0; LEN]
    }

    fn eq_ct(a: &Self, b: &Self) -> bool {
        let mut acc: u8 = 0;
        for i in 0..LEN {
            acc |= a[i] ^ b[i];
        }

        acc == 0
    }
}

/// Generic merkle hashing trait.
pub trait MerkleHasher {
    /// Hash value.
    type Hash: MerkleHash;

    /// Hashes an arbitrary message as leaf data to compute a leaf hash.
    fn hash_leaf(buf: &[u8]) -> Self::Hash;

    /// Hashes a node's left and right children to compute the node's hash.
    fn hash_node(left: Self::Hash, right: Self::Hash) -> Self::Hash;

    /// Convenience function that returns a zero hash from the associated hash
    /// type.
    fn zero_hash() -> Self::Hash {
        <Self::Hash as MerkleHash>::zero()
    }
}

/// Merkle hasher for an arbitrary digest impl with domain-separated leaf and
/// node inputs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DigestMerkleHasher<D: Digest, const N: usize>(std::marker::PhantomData<D>);

impl<D: Digest, const N: usize> DigestMerkleHasher<D, N> {
    fn finish(context: D) -> [u8; N] {
        let mut out = [0; N];
        let result = context.finalize();
        let len = result.len().min(N);
        out[..len].copy_from_slice(&result[..len]);
        out
    }
}

impl<D: Digest, const N: usize> MerkleHasher for DigestMerkleHasher<D, N> {
    type Hash = [u8; N];

    fn hash_leaf(buf: &[u8]) -> Self::Hash {
        // Prefixes keep a leaf from ever being mistaken for an inner node.
        let mut context = D::new();
        context.update(*LEAF_TAG_PREFIX);
        context.update(buf);
        Self::finish(context)
    }

    fn hash_node(left: Self::Hash, right: Self::Hash) -> Self::Hash {
        let mut context = D::new();
        context.update(*NODE_TAG_PREFIX);
        context.update(left);
        context.update(right);
        Self::finish(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sha256Hasher;

    #[test]
    fn leaf_and_node_are_domain_separated() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let mut concat = Vec::new();
        concat.extend_from_slice(&a);
        concat.extend_from_slice(&b);

        assert_ne!(Sha256Hasher::hash_leaf(&concat), Sha256Hasher::hash_node(a, b));
    }

    #[test]
    fn node_hash_is_order_sensitive() {
        let a = Sha256Hasher::hash_leaf(b"a");
        let b = Sha256Hasher::hash_leaf(b"b");
        assert_ne!(Sha256Hasher::hash_node(a, b), Sha256Hasher::hash_node(b, a));
    }

    #[test]
    fn eq_ct_matches_eq() {
        let a = [7u8; 32];
        let mut b = a;
        assert!(<[u8; 32]>::eq_ct(&a, &b));
        b[31] ^= 1;
        assert!(!<[u8; 32]>::eq_ct(&a, &b));
    }
}
