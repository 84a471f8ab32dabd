//! DKG type definitions.

use borsh::{BorshDeserialize, BorshSerialize};
use schain_types::{threshold_for, G1Point, G2Point, KeyShare, ParticipantIndex, Scalar};
use serde::{Deserialize, Serialize};

use crate::error::ParticipantError;

/// DKG configuration.
#[derive(Debug, Clone)]
pub struct DkgConfig {
    /// Total number of participants
    pub n: u32,
    /// Verification vector length, and shares needed to recover the secret
    pub threshold: u32,
    /// This participant's position in the group (0-based)
    pub index: ParticipantIndex,
}

impl DkgConfig {
    /// Configuration for position `index` in a group of `n`.
    pub fn new(n: u32, index: ParticipantIndex) -> Result<Self, ParticipantError> {
        if index >= n {
            return Err(ParticipantError::InvalidParticipantIndex(index));
        }
        Ok(Self {
            n,
            threshold: threshold_for(n),
            index,
        })
    }
}

/// Payload of a broadcast call.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Feldman commitments: g^{a_i} for polynomial coefficients
    pub verification_vector: Vec<G2Point>,
    /// Share for each member, encrypted to its key, in group order
    pub secret_key_contribution: Vec<KeyShare>,
}

/// Payload of a pre-response call.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PreResponseMessage {
    pub verification_vector: Vec<G2Point>,
    /// Verification vector scaled by powers of the accuser's evaluation point
    pub verification_vector_multiplied: Vec<G2Point>,
    pub secret_key_contribution: Vec<KeyShare>,
}

/// Payload of a response call.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Ephemeral secret the accuser's share was encrypted under
    pub secret: Scalar,
    /// Accuser's share times the G2 generator
    pub multiplied_share: G2Point,
}

/// Output of DKG for a participant.
#[derive(Debug, Clone)]
pub struct DkgOutput {
    /// This participant's secret share
    pub secret_share: Scalar,
    /// This participant's public key share (g2^{sk_i})
    pub public_share: G2Point,
    /// Group public key (sum of every dealer's free coefficient commitment)
    pub group_public_key: G2Point,
    /// Threshold
    pub threshold: u32,
}

/// Key material a node keeps between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeKeyFile {
    pub encryption_secret: Scalar,
    pub encryption_public_key: G1Point,
}
