//! Decision logic of a node taking part in a ceremony.
//!
//! The driver turns module events into the calls this node should make.
//! It never talks to the chain; the runner submits the actions after
//! checking the matching predicate.

use std::collections::BTreeSet;

use rand::{CryptoRng, RngCore};
use tracing::{debug, info, warn};

use schain_dkg::{
    BroadcastMessage, DkgConfig, DkgOutput, DkgParticipant, EncryptionKeypair, ParticipantError,
    PreResponseMessage, ResponseMessage,
};
use schain_dkg_module::DkgEvent;
use schain_types::{G1Point, NodeId, ParticipantIndex};

/// A call the node wants to make.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Broadcast(BroadcastMessage),
    Alright,
    Complaint { accused: NodeId },
    PreResponse(PreResponseMessage),
    Response(ResponseMessage),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Broadcast(_) => "broadcast",
            Action::Alright => "alright",
            Action::Complaint { .. } => "complaint",
            Action::PreResponse(_) => "pre_response",
            Action::Response(_) => "response",
        }
    }
}

/// Our view of the ceremony in progress.
struct Round {
    members: Vec<NodeId>,
    participant: DkgParticipant,
    broadcasted: Vec<bool>,
    confirmed: Vec<bool>,
    /// Dealers whose share failed our checks
    accused: BTreeSet<ParticipantIndex>,
    alright_sent: bool,
    /// Accuser we are defending against
    defending: Option<ParticipantIndex>,
}

impl Round {
    fn node_at(&self, index: ParticipantIndex) -> Option<NodeId> {
        self.members.get(index as usize).copied()
    }

    fn is_me(&self, index: ParticipantIndex) -> bool {
        self.participant.index() == index
    }
}

pub struct Driver {
    node: NodeId,
    keypair: EncryptionKeypair,
    round: Option<Round>,
}

impl Driver {
    pub fn new(node: NodeId, keypair: EncryptionKeypair) -> Self {
        Self {
            node,
            keypair,
            round: None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn is_running(&self) -> bool {
        self.round.is_some()
    }

    /// Join a freshly opened ceremony and deal our polynomial.
    ///
    /// Returns `None` when this node is not in the roster.
    pub fn start<R: RngCore + CryptoRng>(
        &mut self,
        members: Vec<NodeId>,
        keys: Vec<G1Point>,
        rng: &mut R,
    ) -> Result<Option<Action>, ParticipantError> {
        self.round = None;
        let Some(position) = members.iter().position(|m| *m == self.node) else {
            debug!(node = self.node, "Not in the roster, sitting this ceremony out");
            return Ok(None);
        };

        let n = members.len() as u32;
        let config = DkgConfig::new(n, position as ParticipantIndex)?;
        let mut participant = DkgParticipant::new(config, self.keypair.clone(), keys)?;
        let broadcast = participant.broadcast(rng)?;

        info!(node = self.node, index = position, group_size = n, "Joined ceremony");
        self.round = Some(Round {
            members,
            participant,
            broadcasted: vec![false; n as usize],
            confirmed: vec![false; n as usize],
            accused: BTreeSet::new(),
            alright_sent: false,
            defending: None,
        });
        Ok(Some(Action::Broadcast(broadcast)))
    }

    /// React to a module event of our group.
    pub fn handle_event(&mut self, event: &DkgEvent) -> Vec<Action> {
        let mut actions = Vec::new();
        let Some(round) = self.round.as_mut() else {
            return actions;
        };

        match event {
            DkgEvent::BroadcastAndKeyShare {
                from,
                verification_vector,
                secret_key_contribution,
                ..
            } => {
                if let Some(flag) = round.broadcasted.get_mut(*from as usize) {
                    *flag = true;
                }
                let message = BroadcastMessage {
                    verification_vector: verification_vector.clone(),
                    secret_key_contribution: secret_key_contribution.clone(),
                };
                match round.participant.process_broadcast(*from, &message) {
                    Ok(()) => {
                        if round.participant.has_all_data() && !round.alright_sent {
                            round.alright_sent = true;
                            actions.push(Action::Alright);
                        }
                    }
                    Err(ParticipantError::DuplicateBroadcast(_)) => {}
                    Err(err) => {
                        warn!(from, %err, "Rejecting dealt share");
                        if let Some(accused) = round.node_at(*from) {
                            if !round.is_me(*from) && round.accused.insert(*from) {
                                actions.push(Action::Complaint { accused });
                            }
                        }
                    }
                }
            }

            DkgEvent::AllDataReceived { from, .. } => {
                if let Some(flag) = round.confirmed.get_mut(*from as usize) {
                    *flag = true;
                }
            }

            DkgEvent::ComplaintSent {
                accuser, accused, ..
            } if round.is_me(*accused) => match round.participant.pre_response(*accuser) {
                Ok(pre) => {
                    info!(accuser, "Accused, committing to defense");
                    round.defending = Some(*accuser);
                    actions.push(Action::PreResponse(pre));
                }
                Err(err) => warn!(accuser, %err, "Cannot defend"),
            },

            DkgEvent::PreResponseSubmitted { accused, .. } if round.is_me(*accused) => {
                if let Some(accuser) = round.defending {
                    match round.participant.response(accuser) {
                        Ok(response) => actions.push(Action::Response(response)),
                        Err(err) => warn!(accuser, %err, "Cannot reveal share"),
                    }
                }
            }

            DkgEvent::ComplaintDismissed {
                accuser, accused, ..
            } => {
                if round.is_me(*accused) {
                    round.defending = None;
                }
                if round.is_me(*accuser) {
                    warn!(accused, "Our complaint was dismissed");
                    round.accused.remove(accused);
                }
            }

            DkgEvent::FailedDkg { .. } | DkgEvent::ChannelClosed { .. } => {
                debug!(node = self.node, "Ceremony ended without a key");
                self.round = None;
            }

            _ => {}
        }
        actions
    }

    /// Members we may be able to file a timeout complaint against.
    ///
    /// The runner confirms each one with the complaint predicate first.
    pub fn timeout_targets(&self) -> Vec<NodeId> {
        let Some(round) = &self.round else {
            return Vec::new();
        };

        let mut targets: BTreeSet<ParticipantIndex> = round.accused.clone();
        let everyone_broadcasted = round.broadcasted.iter().all(|b| *b);
        let waiting_on = if !everyone_broadcasted {
            &round.broadcasted
        } else if round.alright_sent {
            &round.confirmed
        } else {
            return collect_nodes(round, targets);
        };
        for (index, done) in waiting_on.iter().enumerate() {
            let index = index as ParticipantIndex;
            if !done && !round.is_me(index) {
                targets.insert(index);
            }
        }
        collect_nodes(round, targets)
    }

    /// Combine the verified shares into our key share.
    pub fn finalize(&mut self) -> Result<DkgOutput, ParticipantError> {
        let round = self.round.take().ok_or(ParticipantError::ProtocolIncomplete)?;
        round.participant.finalize()
    }
}

fn collect_nodes(round: &Round, indices: BTreeSet<ParticipantIndex>) -> Vec<NodeId> {
    indices.into_iter().filter_map(|i| round.node_at(i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use schain_types::GroupId;

    const GROUP: GroupId = [9u8; 32];

    struct Net {
        keys: Vec<EncryptionKeypair>,
        members: Vec<NodeId>,
    }

    impl Net {
        fn new(n: usize) -> Self {
            Self {
                keys: (0..n).map(|_| EncryptionKeypair::generate(&mut OsRng)).collect(),
                members: (10..10 + n as u64).collect(),
            }
        }

        fn public_keys(&self) -> Vec<G1Point> {
            self.keys.iter().map(|k| k.public_key().clone()).collect()
        }

        fn driver(&self, position: usize) -> (Driver, BroadcastMessage) {
            let mut driver = Driver::new(self.members[position], self.keys[position].clone());
            let action = driver
                .start(self.members.clone(), self.public_keys(), &mut OsRng)
                .unwrap();
            match action {
                Some(Action::Broadcast(msg)) => (driver, msg),
                other => panic!("expected broadcast, got {:?}", other),
            }
        }
    }

    fn broadcast_event(from: ParticipantIndex, msg: &BroadcastMessage) -> DkgEvent {
        DkgEvent::BroadcastAndKeyShare {
            group: GROUP,
            from,
            verification_vector: msg.verification_vector.clone(),
            secret_key_contribution: msg.secret_key_contribution.clone(),
        }
    }

    #[test]
    fn test_non_member_sits_out() {
        let net = Net::new(4);
        let mut outsider = Driver::new(99, EncryptionKeypair::generate(&mut OsRng));
        let action = outsider
            .start(net.members.clone(), net.public_keys(), &mut OsRng)
            .unwrap();
        assert!(action.is_none());
        assert!(!outsider.is_running());
        assert!(outsider.timeout_targets().is_empty());
    }

    #[test]
    fn test_alright_after_all_shares() {
        let net = Net::new(4);
        let (mut me, mine) = net.driver(1);
        let dealt: Vec<BroadcastMessage> = (0..4)
            .map(|i| if i == 1 { mine.clone() } else { net.driver(i).1 })
            .collect();

        for (i, msg) in dealt.iter().enumerate() {
            let actions = me.handle_event(&broadcast_event(i as u32, msg));
            if i < 3 {
                assert!(actions.is_empty());
            } else {
                assert_eq!(actions, vec![Action::Alright]);
            }
        }

        let output = me.finalize().unwrap();
        assert_eq!(output.threshold, 3);
        assert!(!me.is_running());
    }

    #[test]
    fn test_corrupted_share_triggers_complaint() {
        let net = Net::new(4);
        let (mut me, _) = net.driver(0);
        let (_, mut bad) = net.driver(2);
        bad.secret_key_contribution[0].share[0] ^= 0xff;

        let actions = me.handle_event(&broadcast_event(2, &bad));
        assert_eq!(actions, vec![Action::Complaint { accused: 12 }]);

        // Re-filing is left to the timeout path.
        assert!(me.handle_event(&broadcast_event(2, &bad)).is_empty());
        assert!(me.timeout_targets().contains(&12));
    }

    #[test]
    fn test_accused_defends_in_two_steps() {
        let net = Net::new(4);
        let (mut me, _) = net.driver(3);

        let actions = me.handle_event(&DkgEvent::ComplaintSent {
            group: GROUP,
            accuser: 0,
            accused: 3,
        });
        assert!(matches!(actions.as_slice(), [Action::PreResponse(_)]));

        let actions = me.handle_event(&DkgEvent::PreResponseSubmitted {
            group: GROUP,
            accused: 3,
        });
        assert!(matches!(actions.as_slice(), [Action::Response(_)]));
    }

    #[test]
    fn test_other_complaints_ignored() {
        let net = Net::new(4);
        let (mut me, _) = net.driver(1);
        let actions = me.handle_event(&DkgEvent::ComplaintSent {
            group: GROUP,
            accuser: 0,
            accused: 2,
        });
        assert!(actions.is_empty());
    }

    #[test]
    fn test_timeout_targets_follow_progress() {
        let net = Net::new(4);
        let (mut me, mine) = net.driver(0);
        me.handle_event(&broadcast_event(0, &mine));

        // Waiting on broadcasts from everyone else.
        assert_eq!(me.timeout_targets(), vec![11, 12, 13]);

        for i in 1..4 {
            let (_, msg) = net.driver(i);
            me.handle_event(&broadcast_event(i as u32, &msg));
        }
        // Alright sent, waiting on the others' confirmations.
        assert_eq!(me.timeout_targets(), vec![11, 12, 13]);

        me.handle_event(&DkgEvent::AllDataReceived { group: GROUP, from: 2 });
        assert_eq!(me.timeout_targets(), vec![11, 13]);
    }

    #[test]
    fn test_failed_ceremony_resets() {
        let net = Net::new(4);
        let (mut me, _) = net.driver(0);
        me.handle_event(&DkgEvent::FailedDkg { group: GROUP });
        assert!(!me.is_running());
        assert!(me.finalize().is_err());
    }
}
