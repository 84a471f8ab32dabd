//! Notifications emitted by the DKG module.
//!
//! Handlers queue events on the module state once a call has passed all of
//! its checks; the runtime drains them after every call.

use schain_types::{G2Point, GroupId, KeyShare, NodeId, ParticipantIndex};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DkgEvent {
    /// A fresh ceremony started for the group.
    ChannelOpened { group: GroupId, group_size: u32 },

    /// The group was disbanded and its ceremony deleted.
    ChannelClosed { group: GroupId },

    /// A participant broadcasted its verification vector and encrypted shares.
    BroadcastAndKeyShare {
        group: GroupId,
        from: ParticipantIndex,
        verification_vector: Vec<G2Point>,
        secret_key_contribution: Vec<KeyShare>,
    },

    /// A participant confirmed it validated every share it received.
    AllDataReceived { group: GroupId, from: ParticipantIndex },

    /// Every participant confirmed; the group key is usable.
    SuccessfulDkg { group: GroupId },

    ComplaintSent {
        group: GroupId,
        accuser: ParticipantIndex,
        accused: ParticipantIndex,
    },

    /// The accused committed to its defense.
    PreResponseSubmitted { group: GroupId, accused: ParticipantIndex },

    /// The accused proved its share correct.
    ComplaintDismissed {
        group: GroupId,
        accuser: ParticipantIndex,
        accused: ParticipantIndex,
    },

    /// A node was found guilty.
    BadGuy { group: GroupId, node: NodeId },

    FailedDkg { group: GroupId },

    /// A replacement node was rotated into the group.
    NewGuy { group: GroupId, node: NodeId },

    /// No replacement was available; the guilty node left the group.
    NodeRemoved { group: GroupId, node: NodeId },
}

impl DkgEvent {
    /// Group the event belongs to.
    pub fn group(&self) -> &GroupId {
        match self {
            DkgEvent::ChannelOpened { group, .. }
            | DkgEvent::ChannelClosed { group }
            | DkgEvent::BroadcastAndKeyShare { group, .. }
            | DkgEvent::AllDataReceived { group, .. }
            | DkgEvent::SuccessfulDkg { group }
            | DkgEvent::ComplaintSent { group, .. }
            | DkgEvent::PreResponseSubmitted { group, .. }
            | DkgEvent::ComplaintDismissed { group, .. }
            | DkgEvent::BadGuy { group, .. }
            | DkgEvent::FailedDkg { group }
            | DkgEvent::NewGuy { group, .. }
            | DkgEvent::NodeRemoved { group, .. } => group,
        }
    }
}
