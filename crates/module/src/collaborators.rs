//! Interfaces the DKG module consumes from the rest of the chain.
//!
//! The module never owns membership, identity, key material or slashing
//! data. It reads and commands them through these traits.

use schain_types::{Address, G1Point, G2Point, GroupId, KeyShare, NodeId, ParticipantIndex, Scalar};

/// Offense reported to the slashing collaborator when a ceremony fails.
pub const FAILED_DKG: &str = "FailedDKG";

/// Node registry and group membership.
pub trait Membership {
    /// Position of `node` inside `group`, if it is a member.
    fn index_of(&self, group: &GroupId, node: NodeId) -> Option<ParticipantIndex>;

    /// Node at position `index` of `group`.
    fn node_at(&self, group: &GroupId, index: ParticipantIndex) -> Option<NodeId>;

    fn group_size(&self, group: &GroupId) -> u32;

    /// Public key the node's shares are encrypted to.
    fn encryption_key(&self, node: NodeId) -> Option<G1Point>;

    /// Validator that operates the node.
    fn validator_of(&self, node: NodeId) -> Option<Address>;

    fn has_free_replacement(&self, group: &GroupId) -> bool;

    fn remove_from_group(&mut self, group: &GroupId, node: NodeId);

    /// Replace `leaving` with a free node. Returns the node rotated in.
    fn rotate_in(&mut self, group: &GroupId, leaving: NodeId) -> Option<NodeId>;
}

/// Maps transaction senders to the nodes they operate.
pub trait Identity {
    fn caller_controls(&self, caller: &Address, node: NodeId) -> bool;
}

/// Group public key bookkeeping.
pub trait KeyStorage {
    fn begin_key_in_progress(&mut self, group: &GroupId);

    /// Record the free coefficient commitment of one dealer.
    fn add_public_key_contribution(&mut self, group: &GroupId, contribution: &G2Point);

    fn finalize_key(&mut self, group: &GroupId);

    fn delete_key(&mut self, group: &GroupId);
}

pub trait Slasher {
    fn slash(&mut self, validator: &Address, offense: &str);
}

/// Everything the verifier needs to judge an accused dealer's response.
#[derive(Debug, Clone, Copy)]
pub struct ResponseVerification<'a> {
    pub accuser_index: ParticipantIndex,
    /// Accuser's registered encryption key
    pub accuser_encryption_key: &'a G1Point,
    /// Encrypted share the accused sent to the accuser
    pub accuser_key_share: &'a KeyShare,
    /// Sum of the multiplied verification vector from the pre-response
    pub accuser_verification_vector_sum: &'a G2Point,
    /// Dealer's ephemeral secret
    pub secret: &'a Scalar,
    /// Share multiplied by the G2 generator
    pub multiplied_share: &'a G2Point,
}

/// Curve arithmetic, kept outside the module.
pub trait ResponseVerifier {
    /// Check `multiplied[k] == verification_vector[k] * (accuser_index + 1)^k`.
    fn check_multiplied_vector(
        &self,
        accuser_index: ParticipantIndex,
        verification_vector: &[G2Point],
        multiplied: &[G2Point],
    ) -> bool;

    /// Sum of G2 points, `None` if any fails to decode.
    fn sum_points(&self, points: &[G2Point]) -> Option<G2Point>;

    /// `true` if the accused dealt the accuser a correct share.
    fn verify_response(&self, request: &ResponseVerification<'_>) -> bool;
}

/// The full set of collaborators a handler runs against.
pub trait Environment: Membership + Identity + KeyStorage + Slasher + ResponseVerifier {}

impl<T> Environment for T where T: Membership + Identity + KeyStorage + Slasher + ResponseVerifier {}
