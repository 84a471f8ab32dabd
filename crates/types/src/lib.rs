//! Core type definitions for schain distributed key generation.
//!
//! This crate provides the shared data structures used across the DKG system:
//! curve point encodings, participant identifiers, the encrypted key shares
//! carried by a broadcast, and the digest that binds a broadcast on-chain.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

// =========================
// CRYPTOGRAPHIC PRIMITIVES
// =========================

/// Compressed G1 point on BLS12-381 (48 bytes)
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct G1Point(#[serde_as(as = "[_; 48]")] pub [u8; 48]);

impl Default for G1Point {
    fn default() -> Self {
        Self([0u8; 48])
    }
}

/// Compressed G2 point on BLS12-381 (96 bytes)
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct G2Point(#[serde_as(as = "[_; 96]")] pub [u8; 96]);

impl Default for G2Point {
    fn default() -> Self {
        Self([0u8; 96])
    }
}

/// Scalar field element (32 bytes, little-endian)
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Scalar(pub [u8; 32]);

// =========================
// IDENTIFIERS
// =========================

/// Generic address type (32 bytes). Identifies transaction senders and validators.
pub type Address = [u8; 32];

/// Identifier of a group (schain), derived from its name.
pub type GroupId = [u8; 32];

/// Identifier of a node in the node registry.
pub type NodeId = u64;

/// Position of a node inside its group, `0..n`.
pub type ParticipantIndex = u32;

// =========================
// DKG PAYLOADS
// =========================

/// Secret key contribution addressed to one recipient.
///
/// The dealer encrypts the share `f(j + 1)` for recipient `j` under a key
/// derived from Diffie-Hellman between its ephemeral secret and the
/// recipient's encryption key.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct KeyShare {
    /// Dealer's ephemeral public key (`secret · G1`)
    pub public_key: G1Point,
    /// Share XOR keystream
    pub share: [u8; 32],
}

/// Point in time at which something happened on-chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ChainTime {
    pub timestamp: u64,
    pub block_height: u64,
}

// =========================
// HELPER FUNCTIONS
// =========================

/// Number of verification-vector points required from each dealer in a group of `n`.
pub fn threshold_for(n: u32) -> u32 {
    (n * 2 + 1) / 3
}

/// Compute the group identifier for a schain name.
pub fn compute_group_id(name: &str) -> GroupId {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"SCHAIN_GROUP_V1:");
    hasher.update(name.as_bytes());
    hasher.finalize().into()
}

/// Compute the digest binding a dealer's broadcast.
///
/// Covers the verification vector and every encrypted share in order, so a
/// later pre-response can be checked against what was actually broadcast.
pub fn compute_commitment_digest(verification_vector: &[G2Point], shares: &[KeyShare]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"SCHAIN_DKG_COMMITMENT_V1:");
    hasher.update((verification_vector.len() as u32).to_le_bytes());
    for point in verification_vector {
        hasher.update(point.0);
    }
    hasher.update((shares.len() as u32).to_le_bytes());
    for share in shares {
        hasher.update(share.public_key.0);
        hasher.update(share.share);
    }
    hasher.finalize().into()
}

/// Compute SHA-256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_share(byte: u8) -> KeyShare {
        KeyShare {
            public_key: G1Point([byte; 48]),
            share: [byte; 32],
        }
    }

    #[test]
    fn test_threshold_for() {
        assert_eq!(threshold_for(1), 1);
        assert_eq!(threshold_for(3), 2);
        assert_eq!(threshold_for(4), 3);
        assert_eq!(threshold_for(16), 11);
    }

    #[test]
    fn test_compute_group_id() {
        let a = compute_group_id("schain-a");
        let b = compute_group_id("schain-b");
        assert_ne!(a, b);
        assert_eq!(a, compute_group_id("schain-a"));
    }

    #[test]
    fn test_commitment_digest_binds_content() {
        let vv = vec![G2Point([1u8; 96]), G2Point([2u8; 96])];
        let shares = vec![key_share(3), key_share(4)];
        let digest = compute_commitment_digest(&vv, &shares);

        // Order of shares matters
        let swapped = vec![key_share(4), key_share(3)];
        assert_ne!(digest, compute_commitment_digest(&vv, &swapped));

        // Moving a point between the vector and the shares changes the length prefix
        assert_ne!(digest, compute_commitment_digest(&vv[..1], &shares));
        assert_eq!(digest, compute_commitment_digest(&vv, &shares));
    }

    #[test]
    fn test_g1_point_serialization() {
        let point = G1Point([42u8; 48]);
        let encoded = borsh::to_vec(&point).unwrap();
        let decoded: G1Point = borsh::from_slice(&encoded).unwrap();
        assert_eq!(point, decoded);
    }
}
