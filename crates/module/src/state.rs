//! On-chain state structures for the DKG module.

use schain_types::{Address, ChainTime, G2Point, GroupId, KeyShare, ParticipantIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::events::DkgEvent;
use crate::genesis::DkgGenesisConfig;

/// Per-participant broadcast and confirmation flags for one ceremony.
///
/// Counters always equal the number of set flags; both vectors are exactly
/// `group_size` long.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastState {
    pub broadcasted_count: u32,
    pub completed_count: u32,
    pub broadcasted: Vec<bool>,
    pub completed: Vec<bool>,
}

impl BroadcastState {
    pub fn new(group_size: u32) -> Self {
        Self {
            broadcasted_count: 0,
            completed_count: 0,
            broadcasted: vec![false; group_size as usize],
            completed: vec![false; group_size as usize],
        }
    }

    pub fn is_broadcasted(&self, index: ParticipantIndex) -> bool {
        self.broadcasted.get(index as usize).copied().unwrap_or(false)
    }

    pub fn is_completed(&self, index: ParticipantIndex) -> bool {
        self.completed.get(index as usize).copied().unwrap_or(false)
    }

    pub fn everyone_broadcasted(&self) -> bool {
        self.broadcasted_count as usize == self.broadcasted.len()
    }

    pub fn everyone_completed(&self) -> bool {
        self.completed_count as usize == self.completed.len()
    }

    /// Set the broadcast flag. Returns `false` if it was already set.
    pub fn mark_broadcasted(&mut self, index: ParticipantIndex) -> bool {
        match self.broadcasted.get_mut(index as usize) {
            Some(flag) if !*flag => {
                *flag = true;
                self.broadcasted_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Set the confirmation flag. Returns `false` if it was already set.
    pub fn mark_completed(&mut self, index: ParticipantIndex) -> bool {
        match self.completed.get_mut(index as usize) {
            Some(flag) if !*flag => {
                *flag = true;
                self.completed_count += 1;
                true
            }
            _ => false,
        }
    }
}

/// Defense data committed by the accused before it reveals its secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingResponse {
    /// Encrypted share the accused sent to the accuser
    pub accuser_key_share: KeyShare,
    /// Accused's verification vector evaluated at the accuser's index
    pub accuser_verification_vector_sum: G2Point,
}

/// An outstanding accusation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complaint {
    pub accuser: ParticipantIndex,
    pub accused: ParticipantIndex,
    pub filed_at: u64,
    /// Set once the accused submitted its pre-response
    pub response: Option<PendingResponse>,
}

impl Complaint {
    pub fn is_response_phase(&self) -> bool {
        self.response.is_some()
    }

    /// First timestamp at which the complaint counts as unanswered.
    pub fn expires_at(&self, timelimit: u64) -> u64 {
        self.filed_at.saturating_add(timelimit)
    }
}

/// One run of the protocol for a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ceremony {
    /// Whether the group currently runs or holds a key from this ceremony
    pub active: bool,
    pub group_size: u32,
    pub started_at: ChainTime,
    /// Timestamp of the final broadcast, origin of the alright window
    pub all_broadcasted_at: Option<u64>,
    pub broadcasts: BroadcastState,
    pub complaint: Option<Complaint>,
    /// Commitment digest per participant, written once
    pub digests: Vec<Option<[u8; 32]>>,
}

impl Ceremony {
    pub fn new(group_size: u32, started_at: ChainTime) -> Self {
        Self {
            active: true,
            group_size,
            started_at,
            all_broadcasted_at: None,
            broadcasts: BroadcastState::new(group_size),
            complaint: None,
            digests: vec![None; group_size as usize],
        }
    }

    pub fn digest(&self, index: ParticipantIndex) -> Option<&[u8; 32]> {
        self.digests.get(index as usize).and_then(|d| d.as_ref())
    }

    /// Whether `index` is the target of the outstanding complaint.
    pub fn is_accused(&self, index: ParticipantIndex) -> bool {
        self.complaint.as_ref().is_some_and(|c| c.accused == index)
    }
}

/// DKG module state.
///
/// In a chain runtime these maps would be persistent storage keyed by group.
/// This is a simplified in-memory representation.
#[derive(Debug)]
pub struct DkgState {
    /// Ceremony per group
    pub ceremonies: HashMap<GroupId, Ceremony>,

    /// Timestamp of the last successful ceremony per group
    pub last_successful_dkg: HashMap<GroupId, u64>,

    /// Complaint and phase window length
    pub complaint_timelimit: u64,

    /// Addresses allowed to open a channel
    pub ceremony_openers: Vec<Address>,

    /// Address allowed to delete a channel
    pub membership_authority: Address,

    /// Notifications not yet drained by the runtime
    events: Vec<DkgEvent>,
}

impl Default for DkgState {
    fn default() -> Self {
        Self::from_genesis(&DkgGenesisConfig::default())
    }
}

impl DkgState {
    /// Create a DKG state with the default genesis configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_genesis(config: &DkgGenesisConfig) -> Self {
        Self {
            ceremonies: HashMap::new(),
            last_successful_dkg: HashMap::new(),
            complaint_timelimit: config.complaint_timelimit,
            ceremony_openers: config.ceremony_openers.clone(),
            membership_authority: config.membership_authority,
            events: Vec::new(),
        }
    }

    pub fn get_ceremony(&self, group: &GroupId) -> Option<&Ceremony> {
        self.ceremonies.get(group)
    }

    pub fn get_ceremony_mut(&mut self, group: &GroupId) -> Option<&mut Ceremony> {
        self.ceremonies.get_mut(group)
    }

    pub fn is_ceremony_opener(&self, address: &Address) -> bool {
        self.ceremony_openers.contains(address)
    }

    pub fn last_successful_dkg(&self, group: &GroupId) -> Option<u64> {
        self.last_successful_dkg.get(group).copied()
    }

    /// Queue a notification.
    pub fn emit(&mut self, event: DkgEvent) {
        debug!(group = hex::encode(event.group()), ?event, "DKG event");
        self.events.push(event);
    }

    pub fn pending_events(&self) -> &[DkgEvent] {
        &self.events
    }

    /// Take every queued notification.
    pub fn drain_events(&mut self) -> Vec<DkgEvent> {
        std::mem::take(&mut self.events)
    }
}
