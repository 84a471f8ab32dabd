//! DKG module error types.

use schain_types::{GroupId, NodeId, ParticipantIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad class of a rejected call.
///
/// Off-chain coordinators use this to tell "try again later" apart from
/// "this action will never succeed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No such ceremony, complaint or group member
    NotFound,
    /// Caller does not control the named node or lacks the lifecycle role
    Unauthorized,
    /// Duplicate broadcast, confirmation or pre-response
    AlreadyDone,
    /// Attempted outside the phase or timing window that allows it
    OutOfWindow,
    /// Submitted data does not match what was committed on-chain
    VerificationFailed,
    /// Malformed payload
    InvalidInput,
}

impl ErrorKind {
    /// Whether the same call may succeed later without any other change.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::OutOfWindow)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::AlreadyDone => "already_done",
            ErrorKind::OutOfWindow => "out_of_window",
            ErrorKind::VerificationFailed => "verification_failed",
            ErrorKind::InvalidInput => "invalid_input",
        }
    }
}

/// Errors that can occur in the DKG module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DkgError {
    #[error("No ceremony for group {}", hex::encode(.0))]
    CeremonyNotFound(GroupId),

    #[error("Ceremony for group {} is not active", hex::encode(.0))]
    CeremonyNotActive(GroupId),

    #[error("Ceremony for group {} is already active", hex::encode(.0))]
    CeremonyAlreadyActive(GroupId),

    #[error("Group {} has no members", hex::encode(.0))]
    EmptyGroup(GroupId),

    #[error("Node {0} is not in the group")]
    NodeNotInGroup(NodeId),

    #[error("No node at participant index {0}")]
    ParticipantNotFound(ParticipantIndex),

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Caller does not control node {0}")]
    NotNodeOwner(NodeId),

    #[error("Participant {0} already broadcasted")]
    AlreadyBroadcasted(ParticipantIndex),

    #[error("Participant {0} already sent alright")]
    AlreadyConfirmed(ParticipantIndex),

    #[error("Participant {0} has not broadcasted")]
    NotBroadcasted(ParticipantIndex),

    #[error("Not everyone broadcasted: have {have}, need {need}")]
    BroadcastIncomplete { have: u32, need: u32 },

    #[error("Participant {0} is accused and cannot send alright")]
    AccusedCannotConfirm(ParticipantIndex),

    #[error("Participant cannot complain about itself")]
    SelfComplaint,

    #[error("Accuser {0} has not broadcasted")]
    AccuserNotBroadcasted(ParticipantIndex),

    #[error("Another complaint is outstanding against participant {0}")]
    ComplaintOutstanding(ParticipantIndex),

    #[error("Complaint is not possible before {available_at}")]
    ComplaintTooEarly { available_at: u64 },

    #[error("No grounds to complain about participant {0}")]
    NoGroundsForComplaint(ParticipantIndex),

    #[error("No outstanding complaint")]
    NoOutstandingComplaint,

    #[error("Node {0} is not the accused participant")]
    NotAccused(NodeId),

    #[error("Pre-response already submitted")]
    AlreadyPreResponded,

    #[error("Pre-response has not been submitted")]
    PreResponseMissing,

    #[error("Response window closed at {closed_at}")]
    ResponseWindowClosed { closed_at: u64 },

    #[error("Pre-response does not match the broadcast digest")]
    DigestMismatch,

    #[error("Multiplied verification vector is invalid")]
    InvalidMultipliedVector,

    #[error("Incorrect verification vector length: expected {expected}, got {got}")]
    InvalidVerificationVector { expected: u32, got: u32 },

    #[error("Incorrect secret key contribution count: expected {expected}, got {got}")]
    InvalidShareCount { expected: u32, got: u32 },

    #[error("No encryption key registered for node {0}")]
    MissingEncryptionKey(NodeId),
}

impl DkgError {
    pub fn kind(&self) -> ErrorKind {
        use DkgError::*;
        match self {
            CeremonyNotFound(_)
            | CeremonyNotActive(_)
            | NodeNotInGroup(_)
            | ParticipantNotFound(_)
            | NotBroadcasted(_)
            | NoOutstandingComplaint
            | MissingEncryptionKey(_) => ErrorKind::NotFound,

            NotAuthorized | NotNodeOwner(_) | NotAccused(_) => ErrorKind::Unauthorized,

            CeremonyAlreadyActive(_)
            | AlreadyBroadcasted(_)
            | AlreadyConfirmed(_)
            | AlreadyPreResponded => ErrorKind::AlreadyDone,

            BroadcastIncomplete { .. }
            | AccusedCannotConfirm(_)
            | AccuserNotBroadcasted(_)
            | ComplaintOutstanding(_)
            | ComplaintTooEarly { .. }
            | PreResponseMissing
            | ResponseWindowClosed { .. } => ErrorKind::OutOfWindow,

            DigestMismatch | InvalidMultipliedVector => ErrorKind::VerificationFailed,

            EmptyGroup(_)
            | SelfComplaint
            | NoGroundsForComplaint(_)
            | InvalidVerificationVector { .. }
            | InvalidShareCount { .. } => ErrorKind::InvalidInput,
        }
    }

    /// Stable reason code surfaced to callers.
    pub fn code(&self) -> &'static str {
        use DkgError::*;
        match self {
            CeremonyNotFound(_) => "ceremony_not_found",
            CeremonyNotActive(_) => "ceremony_not_active",
            CeremonyAlreadyActive(_) => "ceremony_already_active",
            EmptyGroup(_) => "empty_group",
            NodeNotInGroup(_) => "node_not_in_group",
            ParticipantNotFound(_) => "participant_not_found",
            NotAuthorized => "not_authorized",
            NotNodeOwner(_) => "not_node_owner",
            AlreadyBroadcasted(_) => "already_broadcasted",
            AlreadyConfirmed(_) => "already_confirmed",
            NotBroadcasted(_) => "not_broadcasted",
            BroadcastIncomplete { .. } => "broadcast_incomplete",
            AccusedCannotConfirm(_) => "accused_cannot_confirm",
            SelfComplaint => "self_complaint",
            AccuserNotBroadcasted(_) => "accuser_not_broadcasted",
            ComplaintOutstanding(_) => "complaint_outstanding",
            ComplaintTooEarly { .. } => "complaint_too_early",
            NoGroundsForComplaint(_) => "no_grounds_for_complaint",
            NoOutstandingComplaint => "no_outstanding_complaint",
            NotAccused(_) => "not_accused",
            AlreadyPreResponded => "already_pre_responded",
            PreResponseMissing => "pre_response_missing",
            ResponseWindowClosed { .. } => "response_window_closed",
            DigestMismatch => "digest_mismatch",
            InvalidMultipliedVector => "invalid_multiplied_vector",
            InvalidVerificationVector { .. } => "invalid_verification_vector",
            InvalidShareCount { .. } => "invalid_share_count",
            MissingEncryptionKey(_) => "missing_encryption_key",
        }
    }
}
