//! Call message types for the DKG module.

use borsh::{BorshDeserialize, BorshSerialize};
use schain_types::{G2Point, GroupId, KeyShare, NodeId, Scalar};

/// Call messages for the DKG module.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum DkgCall {
    // === Channel Lifecycle ===
    /// Start a ceremony for a group (ceremony openers only).
    OpenChannel { group: GroupId },

    /// Delete a group's ceremony and key (membership authority only).
    DeleteChannel { group: GroupId },

    // === Protocol ===
    /// Publish a verification vector and one encrypted share per member.
    Broadcast {
        group: GroupId,
        node: NodeId,
        verification_vector: Vec<G2Point>,
        secret_key_contribution: Vec<KeyShare>,
    },

    /// Confirm every received share verified.
    Alright { group: GroupId, node: NodeId },

    /// Accuse another member of the group.
    Complaint {
        group: GroupId,
        accuser: NodeId,
        accused: NodeId,
    },

    /// Commit to a defense by re-submitting the broadcast.
    PreResponse {
        group: GroupId,
        node: NodeId,
        verification_vector: Vec<G2Point>,
        verification_vector_multiplied: Vec<G2Point>,
        secret_key_contribution: Vec<KeyShare>,
    },

    /// Reveal the secret behind the accuser's share.
    Response {
        group: GroupId,
        node: NodeId,
        secret: Scalar,
        multiplied_share: G2Point,
    },
}

impl DkgCall {
    /// Group the call targets.
    pub fn group(&self) -> &GroupId {
        match self {
            DkgCall::OpenChannel { group }
            | DkgCall::DeleteChannel { group }
            | DkgCall::Broadcast { group, .. }
            | DkgCall::Alright { group, .. }
            | DkgCall::Complaint { group, .. }
            | DkgCall::PreResponse { group, .. }
            | DkgCall::Response { group, .. } => group,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_borsh_encoding() {
        let call = DkgCall::Complaint {
            group: [3u8; 32],
            accuser: 1,
            accused: 2,
        };
        let encoded = borsh::to_vec(&call).unwrap();
        let decoded: DkgCall = borsh::from_slice(&encoded).unwrap();
        assert!(matches!(
            decoded,
            DkgCall::Complaint { accuser: 1, accused: 2, .. }
        ));
        assert_eq!(decoded.group(), &[3u8; 32]);
    }
}
