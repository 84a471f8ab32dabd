//! Error types for the node-side DKG.

use schain_types::ParticipantIndex;
use thiserror::Error;

/// Errors that can occur while dealing or checking shares.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParticipantError {
    #[error("Invalid G1 point encoding")]
    InvalidG1Point,

    #[error("Invalid G2 point encoding")]
    InvalidG2Point,

    #[error("Invalid scalar encoding")]
    InvalidScalar,

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("Invalid participant index {0}")]
    InvalidParticipantIndex(ParticipantIndex),

    #[error("Invalid share from participant {0}")]
    InvalidShare(ParticipantIndex),

    #[error("Duplicate broadcast from participant {0}")]
    DuplicateBroadcast(ParticipantIndex),

    #[error("Missing broadcast from participant {0}")]
    MissingBroadcast(ParticipantIndex),

    #[error("Incorrect verification vector length: expected {expected}, got {got}")]
    WrongVectorLength { expected: u32, got: u32 },

    #[error("Incorrect share count: expected {expected}, got {got}")]
    WrongShareCount { expected: u32, got: u32 },

    #[error("Need one encryption key per member: expected {expected}, got {got}")]
    WrongKeyCount { expected: u32, got: u32 },

    #[error("Participant has not broadcasted yet")]
    NotBroadcasted,

    #[error("Protocol not complete")]
    ProtocolIncomplete,
}
