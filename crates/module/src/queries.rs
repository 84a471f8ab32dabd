//! Query handlers for the DKG module.
//!
//! Every `check_*` function is a pure function of the current state that
//! either returns what the matching handler needs or the reason the call
//! would be rejected. The `is_*_possible` predicates are thin wrappers used by
//! off-chain participants to decide what to do next.

use schain_types::{Address, ChainTime, GroupId, NodeId, ParticipantIndex};
use serde::{Deserialize, Serialize};

use crate::collaborators::{Identity, Membership};
use crate::error::DkgError;
use crate::handlers::{CallContext, HandlerResult};
use crate::state::{BroadcastState, Ceremony, Complaint, DkgState};

/// Why a complaint is admissible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplaintGround {
    /// The accused broadcasted and the accuser disputes its data.
    ContestedBroadcast,
    /// The outstanding complaint against the accused went unanswered.
    UnansweredComplaint,
    /// The accused never broadcasted within the broadcast window.
    MissingBroadcast,
    /// The accused never sent alright within the alright window.
    MissingAlright,
}

/// Resolved participants of an admissible complaint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComplaintCheck {
    pub accuser: ParticipantIndex,
    pub accused: ParticipantIndex,
    pub ground: ComplaintGround,
}

/// Look up the ceremony for `group`, requiring it to be active.
pub fn active_ceremony<'a>(state: &'a DkgState, group: &GroupId) -> HandlerResult<&'a Ceremony> {
    let ceremony = state
        .get_ceremony(group)
        .ok_or(DkgError::CeremonyNotFound(*group))?;
    if !ceremony.active {
        return Err(DkgError::CeremonyNotActive(*group));
    }
    Ok(ceremony)
}

/// Resolve `node` inside `group` and require the caller to control it.
fn controlled_index<E: Membership + Identity>(
    env: &E,
    ctx: &CallContext,
    group: &GroupId,
    node: NodeId,
) -> HandlerResult<ParticipantIndex> {
    let index = env
        .index_of(group, node)
        .ok_or(DkgError::NodeNotInGroup(node))?;
    if !env.caller_controls(&ctx.sender, node) {
        return Err(DkgError::NotNodeOwner(node));
    }
    Ok(index)
}

pub fn check_broadcast<E: Membership + Identity>(
    state: &DkgState,
    env: &E,
    ctx: &CallContext,
    group: &GroupId,
    node: NodeId,
) -> HandlerResult<ParticipantIndex> {
    let ceremony = active_ceremony(state, group)?;
    let index = controlled_index(env, ctx, group, node)?;
    if ceremony.broadcasts.is_broadcasted(index) {
        return Err(DkgError::AlreadyBroadcasted(index));
    }
    Ok(index)
}

pub fn check_alright<E: Membership + Identity>(
    state: &DkgState,
    env: &E,
    ctx: &CallContext,
    group: &GroupId,
    node: NodeId,
) -> HandlerResult<ParticipantIndex> {
    let ceremony = active_ceremony(state, group)?;
    let index = controlled_index(env, ctx, group, node)?;
    let broadcasts = &ceremony.broadcasts;

    if !broadcasts.everyone_broadcasted() {
        return Err(DkgError::BroadcastIncomplete {
            have: broadcasts.broadcasted_count,
            need: ceremony.group_size,
        });
    }
    if ceremony.is_accused(index) {
        return Err(DkgError::AccusedCannotConfirm(index));
    }
    if broadcasts.is_completed(index) {
        return Err(DkgError::AlreadyConfirmed(index));
    }
    Ok(index)
}

pub fn check_complaint<E: Membership + Identity>(
    state: &DkgState,
    env: &E,
    ctx: &CallContext,
    group: &GroupId,
    accuser_node: NodeId,
    accused_node: NodeId,
) -> HandlerResult<ComplaintCheck> {
    let ceremony = active_ceremony(state, group)?;
    let accuser = controlled_index(env, ctx, group, accuser_node)?;
    let accused = env
        .index_of(group, accused_node)
        .ok_or(DkgError::NodeNotInGroup(accused_node))?;

    if accuser == accused {
        return Err(DkgError::SelfComplaint);
    }

    let broadcasts = &ceremony.broadcasts;
    if !broadcasts.is_broadcasted(accuser) {
        return Err(DkgError::AccuserNotBroadcasted(accuser));
    }

    let ground = complaint_ground(
        ceremony,
        state.complaint_timelimit,
        ctx.timestamp,
        accuser,
        accused,
    )?;

    Ok(ComplaintCheck {
        accuser,
        accused,
        ground,
    })
}

/// Which of the four filing windows admits a complaint right now.
fn complaint_ground(
    ceremony: &Ceremony,
    timelimit: u64,
    now: u64,
    accuser: ParticipantIndex,
    accused: ParticipantIndex,
) -> HandlerResult<ComplaintGround> {
    let broadcasts = &ceremony.broadcasts;

    if let Some(complaint) = &ceremony.complaint {
        if complaint.accused != accused {
            return Err(DkgError::ComplaintOutstanding(complaint.accused));
        }
        let expires_at = complaint.expires_at(timelimit);
        if expires_at <= now {
            return Ok(ComplaintGround::UnansweredComplaint);
        }
        return Err(DkgError::ComplaintTooEarly {
            available_at: expires_at,
        });
    }

    if !broadcasts.is_broadcasted(accused) {
        let available_at = ceremony.started_at.timestamp.saturating_add(timelimit);
        if available_at <= now {
            return Ok(ComplaintGround::MissingBroadcast);
        }
        return Err(DkgError::ComplaintTooEarly { available_at });
    }

    if !broadcasts.is_completed(accuser) {
        return Ok(ComplaintGround::ContestedBroadcast);
    }

    if broadcasts.is_completed(accused) {
        return Err(DkgError::NoGroundsForComplaint(accused));
    }

    // Accuser sent alright, so every broadcast is in.
    let origin = ceremony
        .all_broadcasted_at
        .unwrap_or(ceremony.started_at.timestamp);
    let available_at = origin.saturating_add(timelimit);
    if available_at <= now {
        Ok(ComplaintGround::MissingAlright)
    } else {
        Err(DkgError::ComplaintTooEarly { available_at })
    }
}

/// Resolve the accused node and its outstanding complaint.
fn check_accused<'a, E: Membership + Identity>(
    state: &'a DkgState,
    env: &E,
    ctx: &CallContext,
    group: &GroupId,
    node: NodeId,
) -> HandlerResult<&'a Complaint> {
    let ceremony = active_ceremony(state, group)?;
    let index = controlled_index(env, ctx, group, node)?;
    let complaint = ceremony
        .complaint
        .as_ref()
        .ok_or(DkgError::NoOutstandingComplaint)?;

    if complaint.accused != index {
        return Err(DkgError::NotAccused(node));
    }

    let closed_at = complaint.expires_at(state.complaint_timelimit);
    if ctx.timestamp >= closed_at {
        return Err(DkgError::ResponseWindowClosed { closed_at });
    }
    Ok(complaint)
}

pub fn check_pre_response<'a, E: Membership + Identity>(
    state: &'a DkgState,
    env: &E,
    ctx: &CallContext,
    group: &GroupId,
    node: NodeId,
) -> HandlerResult<&'a Complaint> {
    let complaint = check_accused(state, env, ctx, group, node)?;
    if complaint.is_response_phase() {
        return Err(DkgError::AlreadyPreResponded);
    }
    Ok(complaint)
}

pub fn check_response<'a, E: Membership + Identity>(
    state: &'a DkgState,
    env: &E,
    ctx: &CallContext,
    group: &GroupId,
    node: NodeId,
) -> HandlerResult<&'a Complaint> {
    let complaint = check_accused(state, env, ctx, group, node)?;
    if !complaint.is_response_phase() {
        return Err(DkgError::PreResponseMissing);
    }
    Ok(complaint)
}

pub fn is_broadcast_possible<E: Membership + Identity>(
    state: &DkgState,
    env: &E,
    ctx: &CallContext,
    group: &GroupId,
    node: NodeId,
) -> bool {
    check_broadcast(state, env, ctx, group, node).is_ok()
}

pub fn is_alright_possible<E: Membership + Identity>(
    state: &DkgState,
    env: &E,
    ctx: &CallContext,
    group: &GroupId,
    node: NodeId,
) -> bool {
    check_alright(state, env, ctx, group, node).is_ok()
}

pub fn is_complaint_possible<E: Membership + Identity>(
    state: &DkgState,
    env: &E,
    ctx: &CallContext,
    group: &GroupId,
    accuser: NodeId,
    accused: NodeId,
) -> bool {
    check_complaint(state, env, ctx, group, accuser, accused).is_ok()
}

pub fn is_pre_response_possible<E: Membership + Identity>(
    state: &DkgState,
    env: &E,
    ctx: &CallContext,
    group: &GroupId,
    node: NodeId,
) -> bool {
    check_pre_response(state, env, ctx, group, node).is_ok()
}

pub fn is_response_possible<E: Membership + Identity>(
    state: &DkgState,
    env: &E,
    ctx: &CallContext,
    group: &GroupId,
    node: NodeId,
) -> bool {
    check_response(state, env, ctx, group, node).is_ok()
}

/// Whether the key from the current ceremony is the last successful one.
pub fn is_last_dkg_successful(state: &DkgState, group: &GroupId) -> bool {
    match (state.get_ceremony(group), state.last_successful_dkg(group)) {
        (Some(ceremony), Some(last)) => ceremony.started_at.timestamp <= last,
        _ => false,
    }
}

/// Query request types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DkgQuery {
    IsChannelOpened { group: GroupId },
    GetChannelStarted { group: GroupId },
    GetBroadcastState { group: GroupId },
    IsEveryoneBroadcasted { group: GroupId },
    IsNodeBroadcasted { group: GroupId, index: ParticipantIndex },
    IsAllDataReceived { group: GroupId, index: ParticipantIndex },
    GetComplaint { group: GroupId },
    IsLastDkgSuccessful { group: GroupId },
    GetTimeOfLastSuccessfulDkg { group: GroupId },
    GetComplaintTimelimit,

    IsBroadcastPossible { group: GroupId, node: NodeId, caller: Address },
    IsAlrightPossible { group: GroupId, node: NodeId, caller: Address },
    IsComplaintPossible {
        group: GroupId,
        accuser: NodeId,
        accused: NodeId,
        caller: Address,
    },
    IsPreResponsePossible { group: GroupId, node: NodeId, caller: Address },
    IsResponsePossible { group: GroupId, node: NodeId, caller: Address },
}

/// Query response types.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DkgQueryResponse {
    /// Predicate result.
    Bool(bool),

    /// Ceremony origin.
    ChannelStarted(Option<ChainTime>),

    /// Broadcast and alright accounting.
    BroadcastState(Option<BroadcastState>),

    /// Outstanding complaint.
    Complaint(Option<Complaint>),

    /// Timestamp.
    Timestamp(Option<u64>),

    /// Window length.
    Timelimit(u64),
}

/// Handle a query at chain time `now`.
pub fn handle_query<E: Membership + Identity>(
    state: &DkgState,
    env: &E,
    now: ChainTime,
    query: DkgQuery,
) -> DkgQueryResponse {
    let ctx_for = |caller: Address| CallContext {
        sender: caller,
        block_height: now.block_height,
        timestamp: now.timestamp,
    };

    match query {
        DkgQuery::IsChannelOpened { group } => {
            DkgQueryResponse::Bool(state.get_ceremony(&group).is_some_and(|c| c.active))
        }

        DkgQuery::GetChannelStarted { group } => {
            DkgQueryResponse::ChannelStarted(state.get_ceremony(&group).map(|c| c.started_at))
        }

        DkgQuery::GetBroadcastState { group } => DkgQueryResponse::BroadcastState(
            state.get_ceremony(&group).map(|c| c.broadcasts.clone()),
        ),

        DkgQuery::IsEveryoneBroadcasted { group } => DkgQueryResponse::Bool(
            state
                .get_ceremony(&group)
                .is_some_and(|c| c.broadcasts.everyone_broadcasted()),
        ),

        DkgQuery::IsNodeBroadcasted { group, index } => DkgQueryResponse::Bool(
            state
                .get_ceremony(&group)
                .is_some_and(|c| c.broadcasts.is_broadcasted(index)),
        ),

        DkgQuery::IsAllDataReceived { group, index } => DkgQueryResponse::Bool(
            state
                .get_ceremony(&group)
                .is_some_and(|c| c.broadcasts.is_completed(index)),
        ),

        DkgQuery::GetComplaint { group } => DkgQueryResponse::Complaint(
            state.get_ceremony(&group).and_then(|c| c.complaint.clone()),
        ),

        DkgQuery::IsLastDkgSuccessful { group } => {
            DkgQueryResponse::Bool(is_last_dkg_successful(state, &group))
        }

        DkgQuery::GetTimeOfLastSuccessfulDkg { group } => {
            DkgQueryResponse::Timestamp(state.last_successful_dkg(&group))
        }

        DkgQuery::GetComplaintTimelimit => DkgQueryResponse::Timelimit(state.complaint_timelimit),

        DkgQuery::IsBroadcastPossible { group, node, caller } => DkgQueryResponse::Bool(
            is_broadcast_possible(state, env, &ctx_for(caller), &group, node),
        ),

        DkgQuery::IsAlrightPossible { group, node, caller } => DkgQueryResponse::Bool(
            is_alright_possible(state, env, &ctx_for(caller), &group, node),
        ),

        DkgQuery::IsComplaintPossible {
            group,
            accuser,
            accused,
            caller,
        } => DkgQueryResponse::Bool(is_complaint_possible(
            state,
            env,
            &ctx_for(caller),
            &group,
            accuser,
            accused,
        )),

        DkgQuery::IsPreResponsePossible { group, node, caller } => DkgQueryResponse::Bool(
            is_pre_response_possible(state, env, &ctx_for(caller), &group, node),
        ),

        DkgQuery::IsResponsePossible { group, node, caller } => DkgQueryResponse::Bool(
            is_response_possible(state, env, &ctx_for(caller), &group, node),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryEnvironment, StubVerifier};
    use schain_types::G1Point;

    const GROUP: GroupId = [7u8; 32];

    fn owner(node: NodeId) -> Address {
        [node as u8 + 100; 32]
    }

    fn setup(n: u64) -> (DkgState, InMemoryEnvironment<StubVerifier>) {
        let mut env = InMemoryEnvironment::new(StubVerifier::accepting());
        for node in 0..n {
            env.register_node(node, owner(node), owner(node), G1Point::default());
        }
        env.create_group(GROUP, (0..n).collect());

        let mut state = DkgState::new();
        state
            .ceremonies
            .insert(GROUP, Ceremony::new(n as u32, ChainTime { timestamp: 1000, block_height: 1 }));
        (state, env)
    }

    fn ctx(node: NodeId, timestamp: u64) -> CallContext {
        CallContext {
            sender: owner(node),
            block_height: 2,
            timestamp,
        }
    }

    #[test]
    fn test_broadcast_possible_requires_control() {
        let (state, env) = setup(4);
        assert!(is_broadcast_possible(&state, &env, &ctx(1, 1000), &GROUP, 1));
        assert!(!is_broadcast_possible(&state, &env, &ctx(2, 1000), &GROUP, 1));
        assert!(!is_broadcast_possible(&state, &env, &ctx(9, 1000), &GROUP, 9));
    }

    #[test]
    fn test_missing_broadcast_window() {
        let (mut state, env) = setup(4);
        state
            .get_ceremony_mut(&GROUP)
            .unwrap()
            .broadcasts
            .mark_broadcasted(0);

        let early = check_complaint(&state, &env, &ctx(0, 2799), &GROUP, 0, 2);
        assert_eq!(early, Err(DkgError::ComplaintTooEarly { available_at: 2800 }));

        let check = check_complaint(&state, &env, &ctx(0, 2800), &GROUP, 0, 2).unwrap();
        assert_eq!(check.ground, ComplaintGround::MissingBroadcast);
        assert_eq!(check.accused, 2);
    }

    #[test]
    fn test_contested_broadcast_is_immediate() {
        let (mut state, env) = setup(3);
        let ceremony = state.get_ceremony_mut(&GROUP).unwrap();
        ceremony.broadcasts.mark_broadcasted(0);
        ceremony.broadcasts.mark_broadcasted(1);

        let check = check_complaint(&state, &env, &ctx(0, 1001), &GROUP, 0, 1).unwrap();
        assert_eq!(check.ground, ComplaintGround::ContestedBroadcast);
    }

    #[test]
    fn test_missing_alright_window_starts_at_last_broadcast() {
        let (mut state, env) = setup(2);
        let ceremony = state.get_ceremony_mut(&GROUP).unwrap();
        ceremony.broadcasts.mark_broadcasted(0);
        ceremony.broadcasts.mark_broadcasted(1);
        ceremony.all_broadcasted_at = Some(5000);
        ceremony.broadcasts.mark_completed(0);

        assert_eq!(
            check_complaint(&state, &env, &ctx(0, 6000), &GROUP, 0, 1),
            Err(DkgError::ComplaintTooEarly { available_at: 6800 })
        );
        let check = check_complaint(&state, &env, &ctx(0, 6800), &GROUP, 0, 1).unwrap();
        assert_eq!(check.ground, ComplaintGround::MissingAlright);
    }

    #[test]
    fn test_no_grounds_after_both_confirmed() {
        let (mut state, env) = setup(2);
        let ceremony = state.get_ceremony_mut(&GROUP).unwrap();
        for i in 0..2 {
            ceremony.broadcasts.mark_broadcasted(i);
            ceremony.broadcasts.mark_completed(i);
        }
        assert_eq!(
            check_complaint(&state, &env, &ctx(0, 99_999), &GROUP, 0, 1),
            Err(DkgError::NoGroundsForComplaint(1))
        );
    }

    #[test]
    fn test_second_complaint_against_other_node_rejected() {
        let (mut state, env) = setup(4);
        let ceremony = state.get_ceremony_mut(&GROUP).unwrap();
        for i in 0..4 {
            ceremony.broadcasts.mark_broadcasted(i);
        }
        ceremony.complaint = Some(Complaint {
            accuser: 0,
            accused: 1,
            filed_at: 1500,
            response: None,
        });

        assert_eq!(
            check_complaint(&state, &env, &ctx(2, 9000), &GROUP, 2, 3),
            Err(DkgError::ComplaintOutstanding(1))
        );
        let check = check_complaint(&state, &env, &ctx(2, 3300), &GROUP, 2, 1).unwrap();
        assert_eq!(check.ground, ComplaintGround::UnansweredComplaint);
    }

    #[test]
    fn test_response_window() {
        let (mut state, env) = setup(3);
        state.get_ceremony_mut(&GROUP).unwrap().complaint = Some(Complaint {
            accuser: 0,
            accused: 1,
            filed_at: 2000,
            response: None,
        });

        assert!(is_pre_response_possible(&state, &env, &ctx(1, 3799), &GROUP, 1));
        assert!(!is_pre_response_possible(&state, &env, &ctx(1, 3800), &GROUP, 1));
        assert!(!is_pre_response_possible(&state, &env, &ctx(0, 2001), &GROUP, 0));
        assert_eq!(
            check_response(&state, &env, &ctx(1, 2001), &GROUP, 1),
            Err(DkgError::PreResponseMissing)
        );
    }

    #[test]
    fn test_query_is_last_dkg_successful() {
        let (mut state, env) = setup(2);
        let now = ChainTime { timestamp: 1200, block_height: 3 };
        let query = DkgQuery::IsLastDkgSuccessful { group: GROUP };

        assert_eq!(handle_query(&state, &env, now, query.clone()), DkgQueryResponse::Bool(false));
        state.last_successful_dkg.insert(GROUP, 1100);
        assert_eq!(handle_query(&state, &env, now, query), DkgQueryResponse::Bool(true));
    }
}
