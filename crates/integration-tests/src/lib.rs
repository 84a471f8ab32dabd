//! End-to-end tests for schain DKG coordination.
//!
//! These tests drive the module through whole ceremonies with real
//! BLS12-381 participants:
//! 1. Honest ceremony to a usable group key
//! 2. Missing broadcast, escalation and rotation
//! 3. Missing broadcast without a replacement, and the smaller restart
//! 4. False accusation defeated by a valid defense
//! 5. Corrupted share exposed by the dealer's own defense

#![cfg(test)]

use bls12_381::G2Projective;
use group::Curve;
use rand::rngs::OsRng;

use schain_dkg::curve::{compress_g2, evaluation_point, scalar_from_bytes};
use schain_dkg::feldman::combine_shares;
use schain_dkg::{
    BroadcastMessage, DkgConfig, DkgOutput, DkgParticipant, EncryptionKeypair,
    FeldmanResponseVerifier, PreResponseMessage,
};
use schain_dkg_module::genesis::{DEFAULT_MEMBERSHIP_AUTHORITY, DEFAULT_SCHAIN_CREATOR};
use schain_dkg_module::queries::{self, ComplaintGround};
use schain_dkg_module::state::Ceremony;
use schain_dkg_module::{
    handlers, AlrightOutcome, CallContext, CallOutcome, ComplaintOutcome, DkgCall, DkgError,
    DkgEvent, DkgState, ErrorKind, Escalation, HandlerResult, InMemoryEnvironment,
    ResponseOutcome, FAILED_DKG,
};
use schain_types::{compute_group_id, Address, G1Point, GroupId, NodeId};

const TIMELIMIT: u64 = 1800;

fn owner(node: NodeId) -> Address {
    [100 + node as u8; 32]
}

fn validator(node: NodeId) -> Address {
    [200 + node as u8; 32]
}

/// Module, collaborators and node keys for one schain.
struct Harness {
    state: DkgState,
    env: InMemoryEnvironment<FeldmanResponseVerifier>,
    keys: Vec<EncryptionKeypair>,
    group: GroupId,
    timestamp: u64,
    block_height: u64,
    /// Every event emitted so far
    events: Vec<DkgEvent>,
}

impl Harness {
    /// Register `registered` nodes and put the first `group_size` in the group.
    fn new(registered: u64, group_size: u64) -> Self {
        let mut env = InMemoryEnvironment::new(FeldmanResponseVerifier);
        let mut keys = Vec::new();
        for node in 0..registered {
            let keypair = EncryptionKeypair::generate(&mut OsRng);
            env.register_node(node, owner(node), validator(node), keypair.public_key().clone());
            keys.push(keypair);
        }

        let group = compute_group_id("integration-schain");
        env.create_group(group, (0..group_size).collect());

        Self {
            state: DkgState::new(),
            env,
            keys,
            group,
            timestamp: 1_000,
            block_height: 1,
            events: Vec::new(),
        }
    }

    fn advance(&mut self, seconds: u64) {
        self.timestamp += seconds;
        self.block_height += 1;
    }

    fn context(&self, sender: Address) -> CallContext {
        CallContext {
            sender,
            block_height: self.block_height,
            timestamp: self.timestamp,
        }
    }

    fn call(&mut self, sender: Address, call: DkgCall) -> HandlerResult<CallOutcome> {
        let ctx = self.context(sender);
        let result = handlers::dispatch(&mut self.state, &mut self.env, &ctx, call);
        self.events.extend(self.state.drain_events());
        result
    }

    fn open(&mut self) -> HandlerResult<CallOutcome> {
        let group = self.group;
        self.call(DEFAULT_SCHAIN_CREATOR, DkgCall::OpenChannel { group })
    }

    fn members(&self) -> Vec<NodeId> {
        self.env
            .group_members(&self.group)
            .map(<[NodeId]>::to_vec)
            .unwrap_or_default()
    }

    fn ceremony(&self) -> &Ceremony {
        self.state.get_ceremony(&self.group).unwrap()
    }

    /// One participant per current member, in roster order.
    fn participants(&self) -> Vec<DkgParticipant> {
        let members = self.members();
        let member_keys: Vec<G1Point> = members
            .iter()
            .map(|&m| self.keys[m as usize].public_key().clone())
            .collect();
        let n = members.len() as u32;

        members
            .iter()
            .enumerate()
            .map(|(i, &m)| {
                DkgParticipant::new(
                    DkgConfig::new(n, i as u32).unwrap(),
                    self.keys[m as usize].clone(),
                    member_keys.clone(),
                )
                .unwrap()
            })
            .collect()
    }

    fn broadcast(&mut self, node: NodeId, msg: &BroadcastMessage) -> HandlerResult<CallOutcome> {
        let group = self.group;
        self.call(
            owner(node),
            DkgCall::Broadcast {
                group,
                node,
                verification_vector: msg.verification_vector.clone(),
                secret_key_contribution: msg.secret_key_contribution.clone(),
            },
        )
    }

    fn alright(&mut self, node: NodeId) -> HandlerResult<CallOutcome> {
        let group = self.group;
        self.call(owner(node), DkgCall::Alright { group, node })
    }

    fn complaint(&mut self, accuser: NodeId, accused: NodeId) -> HandlerResult<CallOutcome> {
        let group = self.group;
        self.call(
            owner(accuser),
            DkgCall::Complaint {
                group,
                accuser,
                accused,
            },
        )
    }

    fn pre_response(&mut self, node: NodeId, msg: PreResponseMessage) -> HandlerResult<CallOutcome> {
        let group = self.group;
        self.call(
            owner(node),
            DkgCall::PreResponse {
                group,
                node,
                verification_vector: msg.verification_vector,
                verification_vector_multiplied: msg.verification_vector_multiplied,
                secret_key_contribution: msg.secret_key_contribution,
            },
        )
    }

    fn response(
        &mut self,
        node: NodeId,
        participant: &DkgParticipant,
        accuser_index: u32,
    ) -> HandlerResult<CallOutcome> {
        let group = self.group;
        let response = participant.response(accuser_index).unwrap();
        self.call(
            owner(node),
            DkgCall::Response {
                group,
                node,
                secret: response.secret,
                multiplied_share: response.multiplied_share,
            },
        )
    }

    /// Run the current ceremony with every member honest.
    fn run_honest(&mut self) -> Vec<DkgOutput> {
        let members = self.members();
        let mut participants = self.participants();
        let broadcasts: Vec<BroadcastMessage> = participants
            .iter_mut()
            .map(|p| p.broadcast(&mut OsRng).unwrap())
            .collect();

        for (&node, msg) in members.iter().zip(&broadcasts) {
            self.broadcast(node, msg).unwrap();
        }
        for participant in participants.iter_mut() {
            for (from, msg) in broadcasts.iter().enumerate() {
                participant.process_broadcast(from as u32, msg).unwrap();
            }
        }

        self.advance(12);
        for &node in &members {
            self.alright(node).unwrap();
        }
        participants.iter().map(|p| p.finalize().unwrap()).collect()
    }

    fn saw(&self, expected: &DkgEvent) -> bool {
        self.events.iter().any(|e| e == expected)
    }
}

fn is_complaint(event: &DkgEvent) -> bool {
    matches!(event, DkgEvent::ComplaintSent { .. })
}

/// Scenario A: four honest nodes produce a key.
#[test]
fn test_honest_ceremony() {
    let mut h = Harness::new(4, 4);
    assert_eq!(h.open().unwrap(), CallOutcome::Opened { group_size: 4 });

    // ========================================
    // Broadcast, verify, confirm
    // ========================================
    let outputs = h.run_honest();
    let group = h.group;

    let ceremony = h.ceremony();
    assert!(ceremony.active);
    assert_eq!(ceremony.broadcasts.broadcasted_count, 4);
    assert_eq!(ceremony.broadcasts.completed_count, 4);
    assert!(ceremony.complaint.is_none());

    assert_eq!(h.state.last_successful_dkg(&group), Some(h.timestamp));
    assert!(queries::is_last_dkg_successful(&h.state, &group));
    assert!(h.saw(&DkgEvent::SuccessfulDkg { group }));
    assert!(!h.events.iter().any(is_complaint));
    assert!(h.env.slashes().is_empty());

    // ========================================
    // Everyone agrees on the group key
    // ========================================
    let key = h.env.group_key(&group).unwrap();
    assert!(key.finalized);
    for output in &outputs {
        assert_eq!(Some(&output.group_public_key), key.public_key.as_ref());
        assert_eq!(output.threshold, 3);
    }

    // Any threshold subset reconstructs the group secret.
    let shares: Vec<_> = [0u32, 2, 3]
        .iter()
        .map(|&i| {
            let share = scalar_from_bytes(&outputs[i as usize].secret_share.0).unwrap();
            (evaluation_point(i), share)
        })
        .collect();
    let secret = combine_shares(&shares).unwrap();
    let recovered = compress_g2(&(G2Projective::generator() * secret).to_affine());
    assert_eq!(recovered, outputs[0].group_public_key);

    println!("Group key: {}", hex::encode(recovered.0));
}

/// Scenario B: a silent node is replaced by a free one.
#[test]
fn test_missing_broadcast_rotates() {
    let mut h = Harness::new(5, 4);
    h.env.add_free_node(4);
    h.open().unwrap();
    let group = h.group;

    let mut participants = h.participants();
    for node in [0u64, 1, 3] {
        let msg = participants[node as usize].broadcast(&mut OsRng).unwrap();
        h.broadcast(node, &msg).unwrap();
    }

    // Too early to blame node 2.
    let err = h.complaint(0, 2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfWindow);
    assert!(err.kind().is_retryable());

    h.advance(TIMELIMIT);
    assert_eq!(
        h.complaint(0, 2).unwrap(),
        CallOutcome::Complaint(ComplaintOutcome::Filed {
            accuser: 0,
            accused: 2,
            ground: ComplaintGround::MissingBroadcast,
        })
    );

    // Node 2 stays silent through its response window.
    h.advance(TIMELIMIT - 1);
    assert!(matches!(
        h.complaint(0, 2),
        Err(DkgError::ComplaintTooEarly { .. })
    ));
    h.advance(1);
    assert_eq!(
        h.complaint(0, 2).unwrap(),
        CallOutcome::Complaint(ComplaintOutcome::Escalated(Escalation::Rotated {
            guilty: 2,
            replacement: 4,
        }))
    );

    assert!(!h.ceremony().active);
    assert!(h.ceremony().complaint.is_none());
    assert_eq!(h.members(), vec![0, 1, 4, 3]);
    assert_eq!(h.env.slashes(), &[(validator(2), FAILED_DKG.to_string())]);
    assert!(h.saw(&DkgEvent::BadGuy { group, node: 2 }));
    assert!(h.saw(&DkgEvent::FailedDkg { group }));
    assert!(h.saw(&DkgEvent::NewGuy { group, node: 4 }));
    assert!(h.state.last_successful_dkg(&group).is_none());

    // Nothing can happen until the ceremony is opened again.
    assert!(matches!(h.alright(0), Err(DkgError::CeremonyNotActive(_))));

    // ========================================
    // The new roster completes a fresh ceremony
    // ========================================
    h.open().unwrap();
    assert_eq!(h.ceremony().broadcasts.broadcasted_count, 0);
    h.run_honest();
    assert!(queries::is_last_dkg_successful(&h.state, &group));
}

/// Scenario C: without a free node the group shrinks and restarts.
#[test]
fn test_missing_broadcast_without_replacement_restarts() {
    let mut h = Harness::new(4, 4);
    h.open().unwrap();
    let group = h.group;

    let mut participants = h.participants();
    for node in [0u64, 1, 3] {
        let msg = participants[node as usize].broadcast(&mut OsRng).unwrap();
        h.broadcast(node, &msg).unwrap();
    }

    h.advance(TIMELIMIT);
    h.complaint(0, 2).unwrap();
    h.advance(TIMELIMIT);
    assert_eq!(
        h.complaint(0, 2).unwrap(),
        CallOutcome::Complaint(ComplaintOutcome::Escalated(Escalation::Restarted {
            guilty: 2,
            group_size: 3,
        }))
    );

    assert_eq!(h.members(), vec![0, 1, 3]);
    let ceremony = h.ceremony();
    assert!(ceremony.active);
    assert_eq!(ceremony.group_size, 3);
    assert_eq!(ceremony.started_at.timestamp, h.timestamp);
    assert_eq!(ceremony.broadcasts.broadcasted_count, 0);
    assert_eq!(ceremony.broadcasts.broadcasted.len(), 3);
    assert!(ceremony.complaint.is_none());

    assert!(h.saw(&DkgEvent::NodeRemoved { group, node: 2 }));
    assert!(h.saw(&DkgEvent::ChannelOpened {
        group,
        group_size: 3
    }));
    assert_eq!(h.env.slashes().len(), 1);

    // Node 2 is gone for good.
    let msg = participants[2].broadcast(&mut OsRng).unwrap();
    assert!(matches!(
        h.broadcast(2, &msg),
        Err(DkgError::NodeNotInGroup(2))
    ));

    // Three nodes run with threshold (2 * 3 + 1) / 3 = 2.
    let outputs = h.run_honest();
    assert!(outputs.iter().all(|o| o.threshold == 2));
    assert!(queries::is_last_dkg_successful(&h.state, &group));
}

/// Scenario D: a false accusation is answered and the ceremony completes.
#[test]
fn test_valid_defense_dismisses_complaint() {
    let mut h = Harness::new(4, 4);
    h.open().unwrap();
    let group = h.group;

    let mut participants = h.participants();
    let broadcasts: Vec<BroadcastMessage> = participants
        .iter_mut()
        .map(|p| p.broadcast(&mut OsRng).unwrap())
        .collect();
    for (node, msg) in broadcasts.iter().enumerate() {
        h.broadcast(node as u64, msg).unwrap();
    }

    assert_eq!(
        h.complaint(0, 1).unwrap(),
        CallOutcome::Complaint(ComplaintOutcome::Filed {
            accuser: 0,
            accused: 1,
            ground: ComplaintGround::ContestedBroadcast,
        })
    );

    // The accused cannot confirm while under suspicion.
    assert!(matches!(
        h.alright(1),
        Err(DkgError::AccusedCannotConfirm(1))
    ));
    // Only one complaint at a time.
    assert!(matches!(
        h.complaint(2, 3),
        Err(DkgError::ComplaintOutstanding(1))
    ));
    // Response before pre-response.
    assert!(matches!(
        h.response(1, &participants[1], 0),
        Err(DkgError::PreResponseMissing)
    ));

    h.advance(60);
    let pre = participants[1].pre_response(0).unwrap();
    assert_eq!(h.pre_response(1, pre.clone()).unwrap(), CallOutcome::PreResponded);
    assert!(matches!(
        h.pre_response(1, pre),
        Err(DkgError::AlreadyPreResponded)
    ));

    h.advance(60);
    assert_eq!(
        h.response(1, &participants[1], 0).unwrap(),
        CallOutcome::Response(ResponseOutcome::Dismissed {
            accuser: 0,
            accused: 1,
        })
    );
    assert!(h.ceremony().complaint.is_none());
    assert!(h.ceremony().active);
    assert!(h.saw(&DkgEvent::ComplaintDismissed {
        group,
        accuser: 0,
        accused: 1,
    }));
    // The accuser is not penalized.
    assert!(h.env.slashes().is_empty());
    assert_eq!(h.members(), vec![0, 1, 2, 3]);

    for participant in participants.iter_mut() {
        for (from, msg) in broadcasts.iter().enumerate() {
            participant.process_broadcast(from as u32, msg).unwrap();
        }
    }
    for node in 0..3 {
        assert_eq!(
            h.alright(node).unwrap(),
            CallOutcome::Alright(AlrightOutcome::Recorded {
                completed: node as u32 + 1
            })
        );
    }
    assert_eq!(
        h.alright(3).unwrap(),
        CallOutcome::Alright(AlrightOutcome::Successful)
    );
    assert!(queries::is_last_dkg_successful(&h.state, &group));
}

/// A dealer that sent a bad share convicts itself when it defends.
#[test]
fn test_corrupted_share_found_guilty() {
    let mut h = Harness::new(4, 4);
    h.open().unwrap();

    let mut participants = h.participants();
    let mut broadcasts: Vec<BroadcastMessage> = participants
        .iter_mut()
        .map(|p| p.broadcast(&mut OsRng).unwrap())
        .collect();

    // Node 3 garbles the share it deals to node 0.
    broadcasts[3].secret_key_contribution[0].share[0] ^= 0x01;
    for (node, msg) in broadcasts.iter().enumerate() {
        h.broadcast(node as u64, msg).unwrap();
    }

    let err = participants[0].process_broadcast(3, &broadcasts[3]).unwrap_err();
    assert!(matches!(err, schain_dkg::ParticipantError::InvalidShare(3)));
    h.complaint(0, 3).unwrap();

    // Defending with the honest pre-response fails the digest check.
    let honest = participants[3].pre_response(0).unwrap();
    let err = h.pre_response(3, honest.clone()).unwrap_err();
    assert_eq!(err, DkgError::DigestMismatch);
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);

    // Replaying what was actually broadcast passes the commitment checks...
    let replay = PreResponseMessage {
        secret_key_contribution: broadcasts[3].secret_key_contribution.clone(),
        ..honest
    };
    h.pre_response(3, replay).unwrap();

    // ...but the revealed share does not decrypt to the committed value.
    assert_eq!(
        h.response(3, &participants[3], 0).unwrap(),
        CallOutcome::Response(ResponseOutcome::Escalated(Escalation::Restarted {
            guilty: 3,
            group_size: 3,
        }))
    );
    assert_eq!(h.env.slashes(), &[(validator(3), FAILED_DKG.to_string())]);
    assert_eq!(h.members(), vec![0, 1, 2]);
}

/// Late and duplicate calls leave the ceremony untouched.
#[test]
fn test_rejected_calls_change_nothing() {
    let mut h = Harness::new(4, 4);
    h.open().unwrap();

    let mut participants = h.participants();
    let msg = participants[0].broadcast(&mut OsRng).unwrap();
    h.broadcast(0, &msg).unwrap();

    let before = h.ceremony().clone();
    let err = h.broadcast(0, &msg).unwrap_err();
    assert_eq!(err, DkgError::AlreadyBroadcasted(0));
    assert_eq!(err.kind(), ErrorKind::AlreadyDone);
    assert_eq!(h.ceremony(), &before);

    // Someone else's key cannot speak for node 1.
    let other = participants[1].broadcast(&mut OsRng).unwrap();
    let group = h.group;
    let err = h
        .call(
            owner(0),
            DkgCall::Broadcast {
                group,
                node: 1,
                verification_vector: other.verification_vector,
                secret_key_contribution: other.secret_key_contribution,
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(h.ceremony(), &before);

    // Accused lets its response window lapse, then tries to answer.
    for node in 1..4u64 {
        let msg = participants[node as usize].broadcast(&mut OsRng).unwrap();
        h.broadcast(node, &msg).unwrap();
    }
    h.complaint(2, 1).unwrap();
    h.advance(TIMELIMIT);
    let pre = participants[1].pre_response(2).unwrap();
    assert!(matches!(
        h.pre_response(1, pre),
        Err(DkgError::ResponseWindowClosed { .. })
    ));

    // Reopening an active ceremony is refused; closing needs the authority.
    assert!(matches!(h.open(), Err(DkgError::CeremonyAlreadyActive(_))));
    assert_eq!(
        h.call(DEFAULT_SCHAIN_CREATOR, DkgCall::DeleteChannel { group })
            .unwrap_err()
            .kind(),
        ErrorKind::Unauthorized
    );
    assert_eq!(
        h.call(DEFAULT_MEMBERSHIP_AUTHORITY, DkgCall::DeleteChannel { group })
            .unwrap(),
        CallOutcome::Closed
    );
    assert!(h.state.get_ceremony(&group).is_none());
    assert!(h.saw(&DkgEvent::ChannelClosed { group }));
}
