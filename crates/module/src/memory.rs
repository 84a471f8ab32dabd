//! In-memory collaborators.
//!
//! [`InMemoryEnvironment`] stands in for the node registry, group roster,
//! key storage and slashing table. The mock chain runs the module against it
//! and so do the tests. Curve arithmetic is delegated to a pluggable
//! [`ResponseVerifier`].

use schain_types::{Address, G1Point, G2Point, GroupId, NodeId, ParticipantIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::collaborators::{
    Identity, KeyStorage, Membership, ResponseVerification, ResponseVerifier, Slasher,
};

/// Registry entry for a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Address allowed to act for the node
    pub owner: Address,
    /// Validator slashed for the node's faults
    pub validator: Address,
    /// Key the node's shares are encrypted to
    pub encryption_key: G1Point,
}

/// Group public key as assembled from broadcasts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupKey {
    /// Free coefficient commitment of each dealer, in broadcast order
    pub contributions: Vec<G2Point>,
    /// Sum of the contributions, set on finalization
    pub public_key: Option<G2Point>,
    pub finalized: bool,
}

/// A membership change made by escalation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rotation {
    pub group: GroupId,
    pub leaving: NodeId,
    pub joining: NodeId,
}

#[derive(Debug, Default)]
pub struct InMemoryEnvironment<V> {
    nodes: HashMap<NodeId, NodeRecord>,
    groups: HashMap<GroupId, Vec<NodeId>>,
    free_nodes: Vec<NodeId>,
    keys: HashMap<GroupId, GroupKey>,
    slashes: Vec<(Address, String)>,
    rotations: Vec<Rotation>,
    verifier: V,
}

impl<V> InMemoryEnvironment<V> {
    pub fn new(verifier: V) -> Self {
        Self {
            nodes: HashMap::new(),
            groups: HashMap::new(),
            free_nodes: Vec::new(),
            keys: HashMap::new(),
            slashes: Vec::new(),
            rotations: Vec::new(),
            verifier,
        }
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    pub fn register_node(
        &mut self,
        node: NodeId,
        owner: Address,
        validator: Address,
        encryption_key: G1Point,
    ) {
        self.nodes.insert(
            node,
            NodeRecord {
                owner,
                validator,
                encryption_key,
            },
        );
    }

    pub fn node(&self, node: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&node)
    }

    /// Set the roster of a group, replacing any previous one.
    pub fn create_group(&mut self, group: GroupId, members: Vec<NodeId>) {
        self.groups.insert(group, members);
    }

    pub fn group_members(&self, group: &GroupId) -> Option<&[NodeId]> {
        self.groups.get(group).map(Vec::as_slice)
    }

    /// Make a registered node available as a replacement.
    pub fn add_free_node(&mut self, node: NodeId) {
        if !self.free_nodes.contains(&node) {
            self.free_nodes.push(node);
        }
    }

    pub fn free_nodes(&self) -> &[NodeId] {
        &self.free_nodes
    }

    pub fn group_key(&self, group: &GroupId) -> Option<&GroupKey> {
        self.keys.get(group)
    }

    pub fn slashes(&self) -> &[(Address, String)] {
        &self.slashes
    }

    /// Take the rotations made since the last call.
    pub fn take_rotations(&mut self) -> Vec<Rotation> {
        std::mem::take(&mut self.rotations)
    }
}

impl<V> Membership for InMemoryEnvironment<V> {
    fn index_of(&self, group: &GroupId, node: NodeId) -> Option<ParticipantIndex> {
        self.groups
            .get(group)?
            .iter()
            .position(|&member| member == node)
            .map(|i| i as ParticipantIndex)
    }

    fn node_at(&self, group: &GroupId, index: ParticipantIndex) -> Option<NodeId> {
        self.groups.get(group)?.get(index as usize).copied()
    }

    fn group_size(&self, group: &GroupId) -> u32 {
        self.groups.get(group).map_or(0, |members| members.len() as u32)
    }

    fn encryption_key(&self, node: NodeId) -> Option<G1Point> {
        self.nodes.get(&node).map(|n| n.encryption_key.clone())
    }

    fn validator_of(&self, node: NodeId) -> Option<Address> {
        self.nodes.get(&node).map(|n| n.validator)
    }

    fn has_free_replacement(&self, _group: &GroupId) -> bool {
        !self.free_nodes.is_empty()
    }

    fn remove_from_group(&mut self, group: &GroupId, node: NodeId) {
        if let Some(members) = self.groups.get_mut(group) {
            members.retain(|&member| member != node);
        }
    }

    fn rotate_in(&mut self, group: &GroupId, leaving: NodeId) -> Option<NodeId> {
        let members = self.groups.get_mut(group)?;
        let slot = members.iter().position(|&member| member == leaving)?;
        if self.free_nodes.is_empty() {
            return None;
        }
        let joining = self.free_nodes.remove(0);
        members[slot] = joining;

        debug!(group = hex::encode(group), leaving, joining, "Rotation applied");
        self.rotations.push(Rotation {
            group: *group,
            leaving,
            joining,
        });
        Some(joining)
    }
}

impl<V> Identity for InMemoryEnvironment<V> {
    fn caller_controls(&self, caller: &Address, node: NodeId) -> bool {
        self.nodes.get(&node).is_some_and(|n| &n.owner == caller)
    }
}

impl<V: ResponseVerifier> KeyStorage for InMemoryEnvironment<V> {
    fn begin_key_in_progress(&mut self, group: &GroupId) {
        self.keys.insert(*group, GroupKey::default());
    }

    fn add_public_key_contribution(&mut self, group: &GroupId, contribution: &G2Point) {
        self.keys
            .entry(*group)
            .or_default()
            .contributions
            .push(contribution.clone());
    }

    fn finalize_key(&mut self, group: &GroupId) {
        if let Some(key) = self.keys.get_mut(group) {
            key.public_key = self.verifier.sum_points(&key.contributions);
            key.finalized = true;
        }
    }

    fn delete_key(&mut self, group: &GroupId) {
        self.keys.remove(group);
    }
}

impl<V> Slasher for InMemoryEnvironment<V> {
    fn slash(&mut self, validator: &Address, offense: &str) {
        self.slashes.push((*validator, offense.to_string()));
    }
}

impl<V: ResponseVerifier> ResponseVerifier for InMemoryEnvironment<V> {
    fn check_multiplied_vector(
        &self,
        accuser_index: ParticipantIndex,
        verification_vector: &[G2Point],
        multiplied: &[G2Point],
    ) -> bool {
        self.verifier
            .check_multiplied_vector(accuser_index, verification_vector, multiplied)
    }

    fn sum_points(&self, points: &[G2Point]) -> Option<G2Point> {
        self.verifier.sum_points(points)
    }

    fn verify_response(&self, request: &ResponseVerification<'_>) -> bool {
        self.verifier.verify_response(request)
    }
}

/// Verifier that skips curve arithmetic and returns a fixed verdict.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubVerifier {
    pub accept_responses: bool,
}

impl StubVerifier {
    pub fn accepting() -> Self {
        Self {
            accept_responses: true,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accept_responses: false,
        }
    }
}

impl ResponseVerifier for StubVerifier {
    fn check_multiplied_vector(
        &self,
        _accuser_index: ParticipantIndex,
        verification_vector: &[G2Point],
        multiplied: &[G2Point],
    ) -> bool {
        verification_vector.len() == multiplied.len()
    }

    fn sum_points(&self, points: &[G2Point]) -> Option<G2Point> {
        Some(points.first().cloned().unwrap_or_default())
    }

    fn verify_response(&self, _request: &ResponseVerification<'_>) -> bool {
        self.accept_responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: GroupId = [1u8; 32];

    fn env() -> InMemoryEnvironment<StubVerifier> {
        let mut env = InMemoryEnvironment::new(StubVerifier::accepting());
        for node in 0..5 {
            env.register_node(node, [node as u8; 32], [node as u8 + 50; 32], G1Point::default());
        }
        env.create_group(GROUP, vec![0, 1, 2]);
        env
    }

    #[test]
    fn test_membership_lookup() {
        let env = env();
        assert_eq!(env.index_of(&GROUP, 2), Some(2));
        assert_eq!(env.index_of(&GROUP, 4), None);
        assert_eq!(env.node_at(&GROUP, 1), Some(1));
        assert_eq!(env.group_size(&GROUP), 3);
        assert_eq!(env.group_size(&[9u8; 32]), 0);
        assert_eq!(env.validator_of(3), Some([53u8; 32]));
        assert!(env.caller_controls(&[1u8; 32], 1));
        assert!(!env.caller_controls(&[1u8; 32], 2));
    }

    #[test]
    fn test_rotation_keeps_position() {
        let mut env = env();
        assert!(!env.has_free_replacement(&GROUP));
        assert_eq!(env.rotate_in(&GROUP, 1), None);

        env.add_free_node(4);
        assert!(env.has_free_replacement(&GROUP));
        assert_eq!(env.rotate_in(&GROUP, 1), Some(4));
        assert_eq!(env.group_members(&GROUP), Some(&[0, 4, 2][..]));
        assert!(env.free_nodes().is_empty());

        let rotations = env.take_rotations();
        assert_eq!(
            rotations,
            vec![Rotation {
                group: GROUP,
                leaving: 1,
                joining: 4,
            }]
        );
        assert!(env.take_rotations().is_empty());
    }

    #[test]
    fn test_removal_shifts_indices() {
        let mut env = env();
        env.remove_from_group(&GROUP, 0);
        assert_eq!(env.index_of(&GROUP, 2), Some(1));
        assert_eq!(env.group_size(&GROUP), 2);
    }

    #[test]
    fn test_key_lifecycle() {
        let mut env = env();
        env.begin_key_in_progress(&GROUP);
        env.add_public_key_contribution(&GROUP, &G2Point([7u8; 96]));
        env.finalize_key(&GROUP);

        let key = env.group_key(&GROUP).unwrap();
        assert!(key.finalized);
        assert_eq!(key.public_key, Some(G2Point([7u8; 96])));

        env.delete_key(&GROUP);
        assert!(env.group_key(&GROUP).is_none());
    }
}
