//! Complaint, pre-response and response handling, plus escalation of a
//! guilty participant to slashing and rotation.
//!
//! A complaint moves through
//! `None -> Filed -> PreResponded -> {Dismissed | Escalated}`, or from
//! `Filed`/`PreResponded` straight to `Escalated` once the response window
//! lapses and someone files against the same accused again.

use schain_types::{
    compute_commitment_digest, G2Point, GroupId, KeyShare, NodeId, ParticipantIndex, Scalar,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collaborators::{Environment, ResponseVerification, FAILED_DKG};
use crate::error::DkgError;
use crate::events::DkgEvent;
use crate::handlers::{open_channel, CallContext, HandlerResult};
use crate::queries::{check_complaint, check_pre_response, check_response, ComplaintGround};
use crate::state::{Complaint, DkgState, PendingResponse};

/// Result of a complaint call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplaintOutcome {
    /// A new complaint is outstanding.
    Filed {
        accuser: ParticipantIndex,
        accused: ParticipantIndex,
        ground: ComplaintGround,
    },
    /// The accused let the response window lapse and was found guilty.
    Escalated(Escalation),
}

/// Result of a response call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseOutcome {
    /// The share checked out; the complaint is dropped.
    Dismissed {
        accuser: ParticipantIndex,
        accused: ParticipantIndex,
    },
    /// The share did not check out.
    Escalated(Escalation),
}

/// What happened to the group after a guilty verdict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Escalation {
    /// A free node replaced the guilty one. The ceremony stays inactive
    /// until the rotation authority opens it again.
    Rotated { guilty: NodeId, replacement: NodeId },
    /// No replacement; the guilty node left and a smaller ceremony started.
    Restarted { guilty: NodeId, group_size: u32 },
    /// The guilty node was the last member; nothing left to restart.
    Disbanded { guilty: NodeId },
}

/// Handle Complaint call.
pub fn handle_complaint<E: Environment>(
    state: &mut DkgState,
    env: &mut E,
    ctx: &CallContext,
    group: GroupId,
    accuser_node: NodeId,
    accused_node: NodeId,
) -> HandlerResult<ComplaintOutcome> {
    let check = check_complaint(state, &*env, ctx, &group, accuser_node, accused_node)?;

    if check.ground == ComplaintGround::UnansweredComplaint {
        info!(
            group = hex::encode(group),
            accuser = check.accuser,
            accused = check.accused,
            "Complaint went unanswered"
        );
        let escalation = escalate(state, env, ctx, group, accused_node)?;
        return Ok(ComplaintOutcome::Escalated(escalation));
    }

    let ceremony = state
        .get_ceremony_mut(&group)
        .ok_or(DkgError::CeremonyNotFound(group))?;
    ceremony.complaint = Some(Complaint {
        accuser: check.accuser,
        accused: check.accused,
        filed_at: ctx.timestamp,
        response: None,
    });

    info!(
        group = hex::encode(group),
        accuser = check.accuser,
        accused = check.accused,
        ground = ?check.ground,
        "Complaint filed"
    );
    state.emit(DkgEvent::ComplaintSent {
        group,
        accuser: check.accuser,
        accused: check.accused,
    });

    Ok(ComplaintOutcome::Filed {
        accuser: check.accuser,
        accused: check.accused,
        ground: check.ground,
    })
}

/// Handle PreResponse call.
///
/// The accused re-submits its broadcast, which must hash to the stored
/// digest, together with its verification vector multiplied by powers of the
/// accuser's evaluation point. Only the accuser's share and the sum of the
/// multiplied vector are kept for the response.
#[allow(clippy::too_many_arguments)]
pub fn handle_pre_response<E: Environment>(
    state: &mut DkgState,
    env: &mut E,
    ctx: &CallContext,
    group: GroupId,
    node: NodeId,
    verification_vector: Vec<G2Point>,
    verification_vector_multiplied: Vec<G2Point>,
    secret_key_contribution: Vec<KeyShare>,
) -> HandlerResult<()> {
    let complaint = check_pre_response(state, &*env, ctx, &group, node)?;
    let (accuser, accused) = (complaint.accuser, complaint.accused);

    let ceremony = state
        .get_ceremony(&group)
        .ok_or(DkgError::CeremonyNotFound(group))?;
    let stored = ceremony
        .digest(accused)
        .ok_or(DkgError::NotBroadcasted(accused))?;

    if compute_commitment_digest(&verification_vector, &secret_key_contribution) != *stored {
        return Err(DkgError::DigestMismatch);
    }

    if verification_vector_multiplied.len() != verification_vector.len()
        || !env.check_multiplied_vector(
            accuser,
            &verification_vector,
            &verification_vector_multiplied,
        )
    {
        return Err(DkgError::InvalidMultipliedVector);
    }

    let vector_sum = env
        .sum_points(&verification_vector_multiplied)
        .ok_or(DkgError::InvalidMultipliedVector)?;

    let accuser_key_share = secret_key_contribution
        .into_iter()
        .nth(accuser as usize)
        .ok_or(DkgError::ParticipantNotFound(accuser))?;

    let pending = state
        .get_ceremony_mut(&group)
        .and_then(|c| c.complaint.as_mut())
        .ok_or(DkgError::NoOutstandingComplaint)?;
    pending.response = Some(PendingResponse {
        accuser_key_share,
        accuser_verification_vector_sum: vector_sum,
    });

    info!(group = hex::encode(group), accuser, accused, "Pre-response submitted");
    state.emit(DkgEvent::PreResponseSubmitted { group, accused });
    Ok(())
}

/// Handle Response call.
///
/// The accused reveals the ephemeral secret behind the accuser's share and
/// the share multiplied by the G2 generator. A verdict is always reached: the
/// complaint is either dismissed or escalated.
///
/// If the accuser's node or encryption key cannot be resolved the call fails
/// with `ParticipantNotFound` or `MissingEncryptionKey` and the complaint
/// stays in the response phase until it is re-filed and escalates.
pub fn handle_response<E: Environment>(
    state: &mut DkgState,
    env: &mut E,
    ctx: &CallContext,
    group: GroupId,
    node: NodeId,
    secret: Scalar,
    multiplied_share: G2Point,
) -> HandlerResult<ResponseOutcome> {
    let complaint = check_response(state, &*env, ctx, &group, node)?.clone();
    let pending = complaint
        .response
        .as_ref()
        .ok_or(DkgError::PreResponseMissing)?;

    let accuser_node = env
        .node_at(&group, complaint.accuser)
        .ok_or(DkgError::ParticipantNotFound(complaint.accuser))?;
    let accuser_key = env
        .encryption_key(accuser_node)
        .ok_or(DkgError::MissingEncryptionKey(accuser_node))?;

    let verified = env.verify_response(&ResponseVerification {
        accuser_index: complaint.accuser,
        accuser_encryption_key: &accuser_key,
        accuser_key_share: &pending.accuser_key_share,
        accuser_verification_vector_sum: &pending.accuser_verification_vector_sum,
        secret: &secret,
        multiplied_share: &multiplied_share,
    });

    if !verified {
        warn!(
            group = hex::encode(group),
            accuser = complaint.accuser,
            accused = complaint.accused,
            "Response failed verification"
        );
        let escalation = escalate(state, env, ctx, group, node)?;
        return Ok(ResponseOutcome::Escalated(escalation));
    }

    if let Some(ceremony) = state.get_ceremony_mut(&group) {
        ceremony.complaint = None;
    }

    info!(
        group = hex::encode(group),
        accuser = complaint.accuser,
        accused = complaint.accused,
        "Complaint dismissed"
    );
    state.emit(DkgEvent::ComplaintDismissed {
        group,
        accuser: complaint.accuser,
        accused: complaint.accused,
    });

    Ok(ResponseOutcome::Dismissed {
        accuser: complaint.accuser,
        accused: complaint.accused,
    })
}

/// Punish `guilty` and move the group on without it.
///
/// The current ceremony ends: its complaint is cleared and it is marked
/// inactive. The guilty node is then either rotated out for a free node or
/// removed, in which case a ceremony for the remaining members starts at
/// once. Its validator is slashed either way.
pub(crate) fn escalate<E: Environment>(
    state: &mut DkgState,
    env: &mut E,
    ctx: &CallContext,
    group: GroupId,
    guilty: NodeId,
) -> HandlerResult<Escalation> {
    let ceremony = state
        .get_ceremony_mut(&group)
        .ok_or(DkgError::CeremonyNotFound(group))?;
    ceremony.complaint = None;
    ceremony.active = false;

    warn!(group = hex::encode(group), node = guilty, "DKG failed");
    state.emit(DkgEvent::BadGuy { group, node: guilty });
    state.emit(DkgEvent::FailedDkg { group });

    let rotated = if env.has_free_replacement(&group) {
        env.rotate_in(&group, guilty)
    } else {
        None
    };

    let escalation = match rotated {
        Some(replacement) => {
            info!(
                group = hex::encode(group),
                leaving = guilty,
                joining = replacement,
                "Node rotated"
            );
            state.emit(DkgEvent::NewGuy {
                group,
                node: replacement,
            });
            Escalation::Rotated {
                guilty,
                replacement,
            }
        }
        None => {
            env.remove_from_group(&group, guilty);
            state.emit(DkgEvent::NodeRemoved { group, node: guilty });

            let group_size = env.group_size(&group);
            if group_size == 0 {
                warn!(group = hex::encode(group), "No members left after removal");
                Escalation::Disbanded { guilty }
            } else {
                open_channel(state, env, group, group_size, ctx.now());
                Escalation::Restarted { guilty, group_size }
            }
        }
    };

    match env.validator_of(guilty) {
        Some(validator) => {
            info!(
                validator = hex::encode(validator),
                node = guilty,
                offense = FAILED_DKG,
                "Slashing validator"
            );
            env.slash(&validator, FAILED_DKG);
        }
        None => warn!(node = guilty, "No validator to slash"),
    }

    Ok(escalation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Membership, ResponseVerifier};
    use crate::genesis::DEFAULT_SCHAIN_CREATOR;
    use crate::handlers::{handle_alright, handle_broadcast, handle_open_channel, AlrightOutcome};
    use crate::memory::{InMemoryEnvironment, StubVerifier};
    use schain_types::{threshold_for, Address, G1Point};

    const GROUP: GroupId = [5u8; 32];

    fn owner(node: NodeId) -> Address {
        [node as u8 + 100; 32]
    }

    fn validator(node: NodeId) -> Address {
        [node as u8 + 200; 32]
    }

    fn ctx(node: NodeId, timestamp: u64) -> CallContext {
        CallContext {
            sender: owner(node),
            block_height: 50,
            timestamp,
        }
    }

    fn payload(n: u32, tag: u8) -> (Vec<G2Point>, Vec<KeyShare>) {
        let vv = (0..threshold_for(n)).map(|_| G2Point([tag; 96])).collect();
        let shares = (0..n)
            .map(|j| KeyShare {
                public_key: G1Point([tag; 48]),
                share: [j as u8; 32],
            })
            .collect();
        (vv, shares)
    }

    struct Fixture {
        state: DkgState,
        env: InMemoryEnvironment<StubVerifier>,
    }

    impl Fixture {
        fn new(n: u64, verifier: StubVerifier) -> Self {
            let mut env = InMemoryEnvironment::new(verifier);
            for node in 0..n {
                env.register_node(node, owner(node), validator(node), G1Point([node as u8; 48]));
            }
            env.create_group(GROUP, (0..n).collect());

            let mut state = DkgState::new();
            let open = CallContext {
                sender: DEFAULT_SCHAIN_CREATOR,
                block_height: 1,
                timestamp: 1000,
            };
            handle_open_channel(&mut state, &mut env, &open, GROUP).unwrap();
            Self { state, env }
        }

        fn broadcast(&mut self, node: NodeId, timestamp: u64) {
            let n = self.env.group_size(&GROUP);
            let (vv, shares) = payload(n, node as u8);
            handle_broadcast(
                &mut self.state,
                &mut self.env,
                &ctx(node, timestamp),
                GROUP,
                node,
                vv,
                shares,
            )
            .unwrap();
        }

        fn complain(
            &mut self,
            accuser: NodeId,
            accused: NodeId,
            timestamp: u64,
        ) -> HandlerResult<ComplaintOutcome> {
            handle_complaint(
                &mut self.state,
                &mut self.env,
                &ctx(accuser, timestamp),
                GROUP,
                accuser,
                accused,
            )
        }

        fn pre_respond(&mut self, node: NodeId, timestamp: u64) -> HandlerResult<()> {
            let n = self.env.group_size(&GROUP);
            let (vv, shares) = payload(n, node as u8);
            handle_pre_response(
                &mut self.state,
                &mut self.env,
                &ctx(node, timestamp),
                GROUP,
                node,
                vv.clone(),
                vv,
                shares,
            )
        }

        fn respond(&mut self, node: NodeId, timestamp: u64) -> HandlerResult<ResponseOutcome> {
            handle_response(
                &mut self.state,
                &mut self.env,
                &ctx(node, timestamp),
                GROUP,
                node,
                Scalar([1u8; 32]),
                G2Point([2u8; 96]),
            )
        }

        fn complaint(&self) -> Option<&Complaint> {
            self.state.get_ceremony(&GROUP).unwrap().complaint.as_ref()
        }
    }

    #[test]
    fn test_contested_broadcast_dismissed() {
        let mut fx = Fixture::new(4, StubVerifier::accepting());
        for node in 0..4 {
            fx.broadcast(node, 1010);
        }

        let outcome = fx.complain(0, 1, 1020).unwrap();
        assert!(matches!(
            outcome,
            ComplaintOutcome::Filed {
                ground: ComplaintGround::ContestedBroadcast,
                accuser: 0,
                accused: 1,
            }
        ));
        assert_eq!(fx.complaint().unwrap().filed_at, 1020);

        fx.pre_respond(1, 1030).unwrap();
        let pending = fx.complaint().unwrap().response.clone().unwrap();
        assert_eq!(pending.accuser_key_share.share, [0u8; 32]);

        let outcome = fx.respond(1, 1040).unwrap();
        assert_eq!(outcome, ResponseOutcome::Dismissed { accuser: 0, accused: 1 });
        assert!(fx.complaint().is_none());
        assert!(fx.state.get_ceremony(&GROUP).unwrap().active);
        assert!(fx.env.slashes().is_empty());
    }

    #[test]
    fn test_accused_cannot_confirm() {
        let mut fx = Fixture::new(3, StubVerifier::accepting());
        for node in 0..3 {
            fx.broadcast(node, 1010);
        }
        fx.complain(0, 2, 1020).unwrap();

        let result = handle_alright(&mut fx.state, &mut fx.env, &ctx(2, 1030), GROUP, 2);
        assert_eq!(result, Err(DkgError::AccusedCannotConfirm(2)));

        let outcome = handle_alright(&mut fx.state, &mut fx.env, &ctx(1, 1030), GROUP, 1).unwrap();
        assert_eq!(outcome, AlrightOutcome::Recorded { completed: 1 });
    }

    #[test]
    fn test_pre_response_digest_mismatch() {
        let mut fx = Fixture::new(3, StubVerifier::accepting());
        for node in 0..3 {
            fx.broadcast(node, 1010);
        }
        fx.complain(0, 1, 1020).unwrap();

        let (vv, shares) = payload(3, 77);
        let result = handle_pre_response(
            &mut fx.state,
            &mut fx.env,
            &ctx(1, 1030),
            GROUP,
            1,
            vv.clone(),
            vv,
            shares,
        );
        assert_eq!(result, Err(DkgError::DigestMismatch));
        assert!(!fx.complaint().unwrap().is_response_phase());
    }

    #[test]
    fn test_pre_response_twice() {
        let mut fx = Fixture::new(3, StubVerifier::accepting());
        for node in 0..3 {
            fx.broadcast(node, 1010);
        }
        fx.complain(2, 0, 1020).unwrap();
        fx.pre_respond(0, 1030).unwrap();
        assert_eq!(fx.pre_respond(0, 1031), Err(DkgError::AlreadyPreResponded));
    }

    #[test]
    fn test_response_with_unresolved_accuser_keeps_complaint() {
        let mut fx = Fixture::new(3, StubVerifier::accepting());
        for node in 0..3 {
            fx.broadcast(node, 1010);
        }
        fx.complain(2, 0, 1020).unwrap();
        fx.pre_respond(0, 1030).unwrap();

        // Accuser no longer resolvable in the roster.
        fx.env.create_group(GROUP, vec![0, 1]);
        assert_eq!(fx.respond(0, 1040), Err(DkgError::ParticipantNotFound(2)));

        let complaint = fx.complaint().unwrap();
        assert!(complaint.is_response_phase());
        assert_eq!((complaint.accuser, complaint.accused), (2, 0));
        assert!(fx.env.slashes().is_empty());
    }

    #[test]
    fn test_bad_response_rotates() {
        let mut fx = Fixture::new(4, StubVerifier::rejecting());
        fx.env.register_node(10, owner(10), validator(10), G1Point::default());
        fx.env.add_free_node(10);
        for node in 0..4 {
            fx.broadcast(node, 1010);
        }

        fx.complain(3, 1, 1020).unwrap();
        fx.pre_respond(1, 1030).unwrap();
        let outcome = fx.respond(1, 1040).unwrap();

        assert_eq!(
            outcome,
            ResponseOutcome::Escalated(Escalation::Rotated {
                guilty: 1,
                replacement: 10,
            })
        );
        let ceremony = fx.state.get_ceremony(&GROUP).unwrap();
        assert!(!ceremony.active);
        assert!(ceremony.complaint.is_none());
        assert_eq!(fx.env.slashes(), &[(validator(1), FAILED_DKG.to_string())]);
        assert_eq!(fx.env.group_members(&GROUP), Some(&[0, 10, 2, 3][..]));

        // A second verdict cannot be reached against the same complaint.
        assert_eq!(fx.respond(1, 1050), Err(DkgError::CeremonyNotActive(GROUP)));
        assert_eq!(fx.env.slashes().len(), 1);
    }

    #[test]
    fn test_unanswered_complaint_restarts_smaller_group() {
        let mut fx = Fixture::new(4, StubVerifier::accepting());
        for node in [0, 1, 3] {
            fx.broadcast(node, 1010);
        }

        assert_eq!(
            fx.complain(0, 2, 2799),
            Err(DkgError::ComplaintTooEarly { available_at: 2800 })
        );
        fx.complain(0, 2, 2800).unwrap();
        assert_eq!(
            fx.complain(1, 2, 4599),
            Err(DkgError::ComplaintTooEarly { available_at: 4600 })
        );

        let outcome = fx.complain(1, 2, 4600).unwrap();
        assert_eq!(
            outcome,
            ComplaintOutcome::Escalated(Escalation::Restarted {
                guilty: 2,
                group_size: 3,
            })
        );

        let ceremony = fx.state.get_ceremony(&GROUP).unwrap();
        assert!(ceremony.active);
        assert_eq!(ceremony.group_size, 3);
        assert_eq!(ceremony.started_at.timestamp, 4600);
        assert_eq!(ceremony.broadcasts.broadcasted_count, 0);
        assert!(ceremony.complaint.is_none());
        assert_eq!(fx.env.index_of(&GROUP, 2), None);
        assert_eq!(fx.env.slashes(), &[(validator(2), FAILED_DKG.to_string())]);

        let events = fx.state.drain_events();
        let tail: Vec<_> = events.iter().rev().take(4).rev().collect();
        assert!(matches!(
            tail.as_slice(),
            [
                DkgEvent::BadGuy { node: 2, .. },
                DkgEvent::FailedDkg { .. },
                DkgEvent::NodeRemoved { node: 2, .. },
                DkgEvent::ChannelOpened { group_size: 3, .. },
            ]
        ));
    }

    #[test]
    fn test_response_after_window() {
        let mut fx = Fixture::new(3, StubVerifier::accepting());
        for node in 0..3 {
            fx.broadcast(node, 1010);
        }
        fx.complain(0, 1, 1020).unwrap();
        fx.pre_respond(1, 1030).unwrap();

        let result = fx.respond(1, 2820);
        assert_eq!(result, Err(DkgError::ResponseWindowClosed { closed_at: 2820 }));
        assert!(fx.complaint().unwrap().is_response_phase());
    }

    #[test]
    fn test_missing_alright_escalates_after_window() {
        let mut fx = Fixture::new(2, StubVerifier::accepting());
        fx.broadcast(0, 1010);
        fx.broadcast(1, 1500);
        handle_alright(&mut fx.state, &mut fx.env, &ctx(0, 1600), GROUP, 0).unwrap();

        assert!(matches!(
            fx.complain(0, 1, 3299),
            Err(DkgError::ComplaintTooEarly { available_at: 3300 })
        ));
        let outcome = fx.complain(0, 1, 3300).unwrap();
        assert!(matches!(
            outcome,
            ComplaintOutcome::Filed {
                ground: ComplaintGround::MissingAlright,
                ..
            }
        ));

        let outcome = fx.complain(0, 1, 5100).unwrap();
        assert_eq!(
            outcome,
            ComplaintOutcome::Escalated(Escalation::Restarted {
                guilty: 1,
                group_size: 1,
            })
        );
    }

    #[test]
    fn test_stub_verifier_sums() {
        let verifier = StubVerifier::accepting();
        assert!(verifier.sum_points(&[]).is_some());
    }
}
