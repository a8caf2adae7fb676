//! Merkle commitments over relay batches.
//!
//! # Modules
//!
//! - `hasher`: common hash and hasher traits/impls
//! - `proof`: inclusion proofs for trees with odd-node promotion
//! - `tree`: [`MerkleCommitment`] and the root/proof functions behind it

pub mod hasher;
pub mod proof;
pub mod tree;

use hasher::DigestMerkleHasher;
use sha2::Sha256;

/// Merkle hash impl for SHA-256 `Digest` impl.
pub type Sha256Hasher = DigestMerkleHasher<Sha256, 32>;

// Common re-exports for ergonomic access at the crate root.
pub use hasher::{MerkleHash, MerkleHasher};
pub use proof::MerkleProof;
pub use tree::{Hash32, MerkleCommitment, compute_root, gen_proof};
