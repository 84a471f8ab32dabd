//! Call handlers for the DKG module.
//!
//! These functions implement the channel lifecycle, the broadcast tracker and
//! the completion tracker. Complaint handling lives in [`crate::complaint`].
//! Every handler runs all of its checks before touching state, so a rejected
//! call leaves the module unchanged.

use schain_types::{
    compute_commitment_digest, threshold_for, Address, ChainTime, G2Point, GroupId, KeyShare,
    NodeId, ParticipantIndex,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::call::DkgCall;
use crate::collaborators::{Environment, KeyStorage, Membership};
use crate::complaint::{
    handle_complaint, handle_pre_response, handle_response, ComplaintOutcome, ResponseOutcome,
};
use crate::error::DkgError;
use crate::events::DkgEvent;
use crate::queries::{check_alright, check_broadcast};
use crate::state::{Ceremony, DkgState};

/// Context provided by the runtime for each call.
#[derive(Clone, Debug)]
pub struct CallContext {
    /// Sender of the transaction
    pub sender: Address,
    /// Current block height
    pub block_height: u64,
    /// Current timestamp
    pub timestamp: u64,
}

impl CallContext {
    pub fn now(&self) -> ChainTime {
        ChainTime {
            timestamp: self.timestamp,
            block_height: self.block_height,
        }
    }
}

/// Result type for handlers.
pub type HandlerResult<T> = Result<T, DkgError>;

/// Result of an alright confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlrightOutcome {
    /// Confirmation stored, others still pending.
    Recorded { completed: u32 },
    /// Last confirmation; the group key is final.
    Successful,
}

/// Result of a dispatched call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    Opened { group_size: u32 },
    Closed,
    Broadcasted { index: ParticipantIndex },
    Alright(AlrightOutcome),
    Complaint(ComplaintOutcome),
    PreResponded,
    Response(ResponseOutcome),
}

/// Route a call message to its handler.
pub fn dispatch<E: Environment>(
    state: &mut DkgState,
    env: &mut E,
    ctx: &CallContext,
    call: DkgCall,
) -> HandlerResult<CallOutcome> {
    match call {
        DkgCall::OpenChannel { group } => handle_open_channel(state, env, ctx, group)
            .map(|group_size| CallOutcome::Opened { group_size }),

        DkgCall::DeleteChannel { group } => {
            handle_delete_channel(state, env, ctx, group).map(|()| CallOutcome::Closed)
        }

        DkgCall::Broadcast {
            group,
            node,
            verification_vector,
            secret_key_contribution,
        } => handle_broadcast(
            state,
            env,
            ctx,
            group,
            node,
            verification_vector,
            secret_key_contribution,
        )
        .map(|index| CallOutcome::Broadcasted { index }),

        DkgCall::Alright { group, node } => {
            handle_alright(state, env, ctx, group, node).map(CallOutcome::Alright)
        }

        DkgCall::Complaint {
            group,
            accuser,
            accused,
        } => handle_complaint(state, env, ctx, group, accuser, accused).map(CallOutcome::Complaint),

        DkgCall::PreResponse {
            group,
            node,
            verification_vector,
            verification_vector_multiplied,
            secret_key_contribution,
        } => handle_pre_response(
            state,
            env,
            ctx,
            group,
            node,
            verification_vector,
            verification_vector_multiplied,
            secret_key_contribution,
        )
        .map(|()| CallOutcome::PreResponded),

        DkgCall::Response {
            group,
            node,
            secret,
            multiplied_share,
        } => handle_response(state, env, ctx, group, node, secret, multiplied_share)
            .map(CallOutcome::Response),
    }
}

/// Handle OpenChannel call. Returns the size of the new ceremony.
pub fn handle_open_channel<E: Membership + KeyStorage>(
    state: &mut DkgState,
    env: &mut E,
    ctx: &CallContext,
    group: GroupId,
) -> HandlerResult<u32> {
    if !state.is_ceremony_opener(&ctx.sender) {
        return Err(DkgError::NotAuthorized);
    }

    if state.get_ceremony(&group).is_some_and(|c| c.active) {
        return Err(DkgError::CeremonyAlreadyActive(group));
    }

    let group_size = env.group_size(&group);
    if group_size == 0 {
        return Err(DkgError::EmptyGroup(group));
    }

    open_channel(state, env, group, group_size, ctx.now());
    Ok(group_size)
}

/// Start a fresh ceremony, replacing whatever the group had before.
pub(crate) fn open_channel<E: KeyStorage>(
    state: &mut DkgState,
    env: &mut E,
    group: GroupId,
    group_size: u32,
    now: ChainTime,
) {
    state
        .ceremonies
        .insert(group, Ceremony::new(group_size, now));
    env.begin_key_in_progress(&group);

    info!(
        group = hex::encode(group),
        group_size,
        timestamp = now.timestamp,
        "Channel opened"
    );
    state.emit(DkgEvent::ChannelOpened { group, group_size });
}

/// Handle DeleteChannel call.
pub fn handle_delete_channel<E: KeyStorage>(
    state: &mut DkgState,
    env: &mut E,
    ctx: &CallContext,
    group: GroupId,
) -> HandlerResult<()> {
    if ctx.sender != state.membership_authority {
        return Err(DkgError::NotAuthorized);
    }

    if state.ceremonies.remove(&group).is_none() {
        return Err(DkgError::CeremonyNotFound(group));
    }
    state.last_successful_dkg.remove(&group);
    env.delete_key(&group);

    info!(group = hex::encode(group), "Channel closed");
    state.emit(DkgEvent::ChannelClosed { group });
    Ok(())
}

/// Handle Broadcast call. Returns the broadcaster's index.
pub fn handle_broadcast<E: Environment>(
    state: &mut DkgState,
    env: &mut E,
    ctx: &CallContext,
    group: GroupId,
    node: NodeId,
    verification_vector: Vec<G2Point>,
    secret_key_contribution: Vec<KeyShare>,
) -> HandlerResult<ParticipantIndex> {
    let index = check_broadcast(state, &*env, ctx, &group, node)?;

    let ceremony = state
        .get_ceremony_mut(&group)
        .ok_or(DkgError::CeremonyNotFound(group))?;
    let n = ceremony.group_size;

    let expected = threshold_for(n);
    if verification_vector.len() != expected as usize {
        return Err(DkgError::InvalidVerificationVector {
            expected,
            got: verification_vector.len() as u32,
        });
    }
    if secret_key_contribution.len() != n as usize {
        return Err(DkgError::InvalidShareCount {
            expected: n,
            got: secret_key_contribution.len() as u32,
        });
    }

    let digest = compute_commitment_digest(&verification_vector, &secret_key_contribution);
    if let Some(slot) = ceremony.digests.get_mut(index as usize) {
        *slot = Some(digest);
    }
    ceremony.broadcasts.mark_broadcasted(index);

    let broadcasted = ceremony.broadcasts.broadcasted_count;
    if ceremony.broadcasts.everyone_broadcasted() {
        ceremony.all_broadcasted_at = Some(ctx.timestamp);
    }

    if let Some(free_coefficient) = verification_vector.first() {
        env.add_public_key_contribution(&group, free_coefficient);
    }

    info!(
        group = hex::encode(group),
        index,
        broadcasted,
        group_size = n,
        "Broadcast recorded"
    );
    state.emit(DkgEvent::BroadcastAndKeyShare {
        group,
        from: index,
        verification_vector,
        secret_key_contribution,
    });

    Ok(index)
}

/// Handle Alright call.
pub fn handle_alright<E: Environment>(
    state: &mut DkgState,
    env: &mut E,
    ctx: &CallContext,
    group: GroupId,
    node: NodeId,
) -> HandlerResult<AlrightOutcome> {
    let index = check_alright(state, &*env, ctx, &group, node)?;

    let ceremony = state
        .get_ceremony_mut(&group)
        .ok_or(DkgError::CeremonyNotFound(group))?;
    ceremony.broadcasts.mark_completed(index);
    let completed = ceremony.broadcasts.completed_count;
    let successful = ceremony.broadcasts.everyone_completed();

    info!(group = hex::encode(group), index, completed, "Alright recorded");
    state.emit(DkgEvent::AllDataReceived { group, from: index });

    if !successful {
        return Ok(AlrightOutcome::Recorded { completed });
    }

    state.last_successful_dkg.insert(group, ctx.timestamp);
    env.finalize_key(&group);

    info!(group = hex::encode(group), timestamp = ctx.timestamp, "DKG successful");
    state.emit(DkgEvent::SuccessfulDkg { group });
    Ok(AlrightOutcome::Successful)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::{DEFAULT_MEMBERSHIP_AUTHORITY, DEFAULT_SCHAIN_CREATOR};
    use crate::memory::{InMemoryEnvironment, StubVerifier};
    use crate::queries::is_last_dkg_successful;
    use schain_types::G1Point;

    const GROUP: GroupId = [9u8; 32];

    fn owner(node: NodeId) -> Address {
        [node as u8 + 100; 32]
    }

    fn test_context(sender: Address, timestamp: u64) -> CallContext {
        CallContext {
            sender,
            block_height: 100,
            timestamp,
        }
    }

    fn setup(n: u64) -> (DkgState, InMemoryEnvironment<StubVerifier>) {
        let mut env = InMemoryEnvironment::new(StubVerifier::accepting());
        for node in 0..n {
            env.register_node(node, owner(node), owner(node), G1Point::default());
        }
        env.create_group(GROUP, (0..n).collect());

        let mut state = DkgState::new();
        handle_open_channel(
            &mut state,
            &mut env,
            &test_context(DEFAULT_SCHAIN_CREATOR, 1000),
            GROUP,
        )
        .unwrap();
        (state, env)
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

    fn broadcast(
        state: &mut DkgState,
        env: &mut InMemoryEnvironment<StubVerifier>,
        node: NodeId,
        timestamp: u64,
    ) -> HandlerResult<ParticipantIndex> {
        let n = env.group_size(&GROUP);
        let (vv, shares) = payload(n, node as u8);
        handle_broadcast(
            state,
            env,
            &test_context(owner(node), timestamp),
            GROUP,
            node,
            vv,
            shares,
        )
    }

    #[test]
    fn test_open_channel() {
        let (state, env) = setup(4);
        let ceremony = state.get_ceremony(&GROUP).unwrap();
        assert!(ceremony.active);
        assert_eq!(ceremony.group_size, 4);
        assert_eq!(ceremony.started_at.timestamp, 1000);
        assert!(env.group_key(&GROUP).is_some());
        assert!(matches!(
            state.pending_events(),
            [DkgEvent::ChannelOpened { group_size: 4, .. }]
        ));
    }

    #[test]
    fn test_open_channel_unauthorized() {
        let mut env = InMemoryEnvironment::new(StubVerifier::accepting());
        env.create_group(GROUP, vec![0]);
        let mut state = DkgState::new();

        let result = handle_open_channel(&mut state, &mut env, &test_context([0xee; 32], 1), GROUP);
        assert!(matches!(result, Err(DkgError::NotAuthorized)));
        assert!(state.get_ceremony(&GROUP).is_none());
    }

    #[test]
    fn test_open_channel_twice() {
        let (mut state, mut env) = setup(3);
        let result = handle_open_channel(
            &mut state,
            &mut env,
            &test_context(DEFAULT_SCHAIN_CREATOR, 2000),
            GROUP,
        );
        assert!(matches!(result, Err(DkgError::CeremonyAlreadyActive(_))));
    }

    #[test]
    fn test_open_empty_group() {
        let mut env = InMemoryEnvironment::new(StubVerifier::accepting());
        let mut state = DkgState::new();
        let result = handle_open_channel(
            &mut state,
            &mut env,
            &test_context(DEFAULT_SCHAIN_CREATOR, 1),
            GROUP,
        );
        assert!(matches!(result, Err(DkgError::EmptyGroup(_))));
    }

    #[test]
    fn test_broadcast() {
        let (mut state, mut env) = setup(4);
        assert_eq!(broadcast(&mut state, &mut env, 2, 1010), Ok(2));

        let ceremony = state.get_ceremony(&GROUP).unwrap();
        assert_eq!(ceremony.broadcasts.broadcasted_count, 1);
        assert!(ceremony.broadcasts.is_broadcasted(2));
        assert!(ceremony.digest(2).is_some());
        assert!(ceremony.digest(0).is_none());
        assert!(ceremony.all_broadcasted_at.is_none());
    }

    #[test]
    fn test_duplicate_broadcast() {
        let (mut state, mut env) = setup(4);
        broadcast(&mut state, &mut env, 1, 1010).unwrap();
        let digest = state.get_ceremony(&GROUP).unwrap().digest(1).copied();

        let result = broadcast(&mut state, &mut env, 1, 1020);
        assert_eq!(result, Err(DkgError::AlreadyBroadcasted(1)));
        assert_eq!(result.unwrap_err().kind(), crate::ErrorKind::AlreadyDone);

        let ceremony = state.get_ceremony(&GROUP).unwrap();
        assert_eq!(ceremony.broadcasts.broadcasted_count, 1);
        assert_eq!(ceremony.digest(1).copied(), digest);
    }

    #[test]
    fn test_broadcast_for_foreign_node() {
        let (mut state, mut env) = setup(4);
        let (vv, shares) = payload(4, 0);
        let result = handle_broadcast(
            &mut state,
            &mut env,
            &test_context(owner(1), 1010),
            GROUP,
            0,
            vv,
            shares,
        );
        assert_eq!(result, Err(DkgError::NotNodeOwner(0)));
    }

    #[test]
    fn test_broadcast_wrong_lengths() {
        let (mut state, mut env) = setup(4);
        let (mut vv, shares) = payload(4, 0);
        vv.pop();
        let result = handle_broadcast(
            &mut state,
            &mut env,
            &test_context(owner(0), 1010),
            GROUP,
            0,
            vv,
            shares.clone(),
        );
        assert_eq!(
            result,
            Err(DkgError::InvalidVerificationVector { expected: 3, got: 2 })
        );

        let (vv, _) = payload(4, 0);
        let result = handle_broadcast(
            &mut state,
            &mut env,
            &test_context(owner(0), 1010),
            GROUP,
            0,
            vv,
            shares[..3].to_vec(),
        );
        assert_eq!(result, Err(DkgError::InvalidShareCount { expected: 4, got: 3 }));
        assert_eq!(state.get_ceremony(&GROUP).unwrap().broadcasts.broadcasted_count, 0);
    }

    #[test]
    fn test_alright_before_everyone_broadcasted() {
        let (mut state, mut env) = setup(3);
        broadcast(&mut state, &mut env, 0, 1010).unwrap();
        let result = handle_alright(&mut state, &mut env, &test_context(owner(0), 1020), GROUP, 0);
        assert_eq!(result, Err(DkgError::BroadcastIncomplete { have: 1, need: 3 }));
        assert!(result.unwrap_err().kind().is_retryable());
    }

    #[test]
    fn test_successful_dkg() {
        let (mut state, mut env) = setup(3);
        for node in 0..3 {
            broadcast(&mut state, &mut env, node, 1010 + node).unwrap();
        }
        assert_eq!(state.get_ceremony(&GROUP).unwrap().all_broadcasted_at, Some(1012));

        for node in 0..2 {
            let outcome =
                handle_alright(&mut state, &mut env, &test_context(owner(node), 1100), GROUP, node)
                    .unwrap();
            assert_eq!(outcome, AlrightOutcome::Recorded { completed: node as u32 + 1 });
        }
        assert!(!is_last_dkg_successful(&state, &GROUP));

        let outcome =
            handle_alright(&mut state, &mut env, &test_context(owner(2), 1200), GROUP, 2).unwrap();
        assert_eq!(outcome, AlrightOutcome::Successful);
        assert_eq!(state.last_successful_dkg(&GROUP), Some(1200));
        assert!(is_last_dkg_successful(&state, &GROUP));
        assert!(state.get_ceremony(&GROUP).unwrap().active);
        assert!(env.group_key(&GROUP).unwrap().finalized);

        let again = handle_alright(&mut state, &mut env, &test_context(owner(2), 1300), GROUP, 2);
        assert_eq!(again, Err(DkgError::AlreadyConfirmed(2)));
        assert_eq!(state.get_ceremony(&GROUP).unwrap().broadcasts.completed_count, 3);
    }

    #[test]
    fn test_delete_channel() {
        let (mut state, mut env) = setup(2);
        let result = handle_delete_channel(
            &mut state,
            &mut env,
            &test_context(DEFAULT_SCHAIN_CREATOR, 1100),
            GROUP,
        );
        assert_eq!(result, Err(DkgError::NotAuthorized));

        handle_delete_channel(
            &mut state,
            &mut env,
            &test_context(DEFAULT_MEMBERSHIP_AUTHORITY, 1100),
            GROUP,
        )
        .unwrap();
        assert!(state.get_ceremony(&GROUP).is_none());
        assert!(env.group_key(&GROUP).is_none());
        assert!(matches!(
            state.pending_events().last(),
            Some(DkgEvent::ChannelClosed { .. })
        ));
    }

    #[test]
    fn test_reopen_resets_state() {
        let (mut state, mut env) = setup(4);
        for node in 0..4 {
            broadcast(&mut state, &mut env, node, 1010).unwrap();
        }
        handle_delete_channel(
            &mut state,
            &mut env,
            &test_context(DEFAULT_MEMBERSHIP_AUTHORITY, 1100),
            GROUP,
        )
        .unwrap();

        env.create_group(GROUP, vec![0, 1, 3]);
        let size = handle_open_channel(
            &mut state,
            &mut env,
            &test_context(DEFAULT_SCHAIN_CREATOR, 1200),
            GROUP,
        )
        .unwrap();
        assert_eq!(size, 3);

        let ceremony = state.get_ceremony(&GROUP).unwrap();
        assert_eq!(ceremony.broadcasts.broadcasted, vec![false; 3]);
        assert_eq!(ceremony.broadcasts.completed, vec![false; 3]);
        assert_eq!(ceremony.broadcasts.broadcasted_count, 0);
        assert!(ceremony.complaint.is_none());
        assert!(ceremony.all_broadcasted_at.is_none());
    }

    #[test]
    fn test_groups_are_independent() {
        const OTHER_GROUP: GroupId = [10u8; 32];

        let (mut state, mut env) = setup(3);
        for node in 3..6 {
            env.register_node(node, owner(node), owner(node), G1Point::default());
        }
        env.create_group(OTHER_GROUP, vec![3, 4, 5]);
        handle_open_channel(
            &mut state,
            &mut env,
            &test_context(DEFAULT_SCHAIN_CREATOR, 1000),
            OTHER_GROUP,
        )
        .unwrap();

        // Node 3 only belongs to the other group.
        let (vv, shares) = payload(3, 3);
        let result = handle_broadcast(
            &mut state,
            &mut env,
            &test_context(owner(3), 1005),
            GROUP,
            3,
            vv,
            shares,
        );
        assert_eq!(result, Err(DkgError::NodeNotInGroup(3)));

        for node in 0..3 {
            broadcast(&mut state, &mut env, node, 1010).unwrap();
        }
        assert_eq!(
            state.get_ceremony(&OTHER_GROUP).unwrap().broadcasts.broadcasted_count,
            0
        );

        let result = handle_alright(&mut state, &mut env, &test_context(owner(3), 1020), GROUP, 3);
        assert_eq!(result, Err(DkgError::NodeNotInGroup(3)));

        for node in 0..3 {
            handle_alright(&mut state, &mut env, &test_context(owner(node), 1100), GROUP, node)
                .unwrap();
        }
        assert_eq!(state.last_successful_dkg(&GROUP), Some(1100));
        assert_eq!(state.last_successful_dkg(&OTHER_GROUP), None);
        let other = state.get_ceremony(&OTHER_GROUP).unwrap();
        assert_eq!(other.broadcasts.completed_count, 0);
        assert!(other.all_broadcasted_at.is_none());

        // Node 5 never deals in the other group and is escalated there.
        for node in 3..5 {
            let (vv, shares) = payload(3, node as u8);
            handle_broadcast(
                &mut state,
                &mut env,
                &test_context(owner(node), 1200),
                OTHER_GROUP,
                node,
                vv,
                shares,
            )
            .unwrap();
        }
        let filed =
            handle_complaint(&mut state, &mut env, &test_context(owner(3), 2800), OTHER_GROUP, 3, 5)
                .unwrap();
        assert!(matches!(filed, ComplaintOutcome::Filed { accused: 2, .. }));
        assert!(state.get_ceremony(&GROUP).unwrap().complaint.is_none());

        let escalated =
            handle_complaint(&mut state, &mut env, &test_context(owner(3), 4600), OTHER_GROUP, 3, 5)
                .unwrap();
        assert!(matches!(
            escalated,
            ComplaintOutcome::Escalated(crate::complaint::Escalation::Restarted {
                guilty: 5,
                group_size: 2
            })
        ));
        assert_eq!(env.slashes().len(), 1);

        let ceremony = state.get_ceremony(&GROUP).unwrap();
        assert!(ceremony.active);
        assert!(ceremony.complaint.is_none());
        assert_eq!(ceremony.group_size, 3);
        assert_eq!(ceremony.broadcasts.completed_count, 3);
        assert_eq!(env.group_size(&GROUP), 3);
        assert_eq!(state.last_successful_dkg(&GROUP), Some(1100));
        assert!(is_last_dkg_successful(&state, &GROUP));
        assert!(env.group_key(&GROUP).unwrap().finalized);
        assert_eq!(state.get_ceremony(&OTHER_GROUP).unwrap().group_size, 2);
    }

    #[test]
    fn test_dispatch_routes_calls() {
        let (mut state, mut env) = setup(2);
        let (vv, shares) = payload(2, 1);
        let outcome = dispatch(
            &mut state,
            &mut env,
            &test_context(owner(1), 1010),
            DkgCall::Broadcast {
                group: GROUP,
                node: 1,
                verification_vector: vv,
                secret_key_contribution: shares,
            },
        )
        .unwrap();
        assert_eq!(outcome, CallOutcome::Broadcasted { index: 1 });

        let outcome = dispatch(
            &mut state,
            &mut env,
            &test_context(DEFAULT_MEMBERSHIP_AUTHORITY, 1020),
            DkgCall::DeleteChannel { group: GROUP },
        )
        .unwrap();
        assert_eq!(outcome, CallOutcome::Closed);
    }
}
