//! Simulated chain around the DKG module.
//!
//! Owns the module state and the in-memory collaborators, stamps every call
//! with the simulated block time, records emitted events, and reacts to
//! rotations the way a node-rotation contract would: by opening a fresh
//! ceremony once the replacement is installed.

use schain_dkg::FeldmanResponseVerifier;
use schain_dkg_module::{
    handlers, queries, CallContext, CallOutcome, DkgCall, DkgEvent, DkgGenesisConfig, DkgQuery,
    DkgQueryResponse, DkgState, GenesisValidationError, HandlerResult, InMemoryEnvironment,
};
use schain_types::{compute_group_id, Address, ChainTime, G1Point, GroupId, NodeId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// An event with the block it was emitted in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub block_height: u64,
    pub timestamp: u64,
    pub event: DkgEvent,
}

pub struct ChainState {
    /// Module state
    pub module: DkgState,
    /// Node registry, rosters, keys and slashing
    pub env: InMemoryEnvironment<FeldmanResponseVerifier>,
    /// Every event emitted so far
    pub events: Vec<EventRecord>,
    /// Sender used to reopen a ceremony after a rotation
    pub rotation_authority: Address,
    /// Current block height (simulated)
    pub block_height: u64,
    /// Current timestamp (simulated, can be advanced)
    pub timestamp: u64,
    /// Seconds added per block
    pub block_time: u64,
}

impl ChainState {
    pub fn new() -> Self {
        Self {
            module: DkgState::new(),
            env: InMemoryEnvironment::new(FeldmanResponseVerifier),
            events: Vec::new(),
            rotation_authority: schain_dkg_module::genesis::DEFAULT_NODE_ROTATION,
            block_height: 0,
            timestamp: 0,
            block_time: 12,
        }
    }

    /// Reset the module with a new genesis configuration.
    pub fn init(
        &mut self,
        config: &DkgGenesisConfig,
        rotation_authority: Address,
        initial_timestamp: Option<u64>,
    ) -> Result<(), GenesisValidationError> {
        config.validate()?;

        self.module = DkgState::from_genesis(config);
        self.env = InMemoryEnvironment::new(FeldmanResponseVerifier);
        self.events.clear();
        self.rotation_authority = rotation_authority;
        if let Some(ts) = initial_timestamp {
            self.timestamp = ts;
        }
        Ok(())
    }

    pub fn advance_block(&mut self) {
        self.block_height += 1;
        self.timestamp += self.block_time;
    }

    pub fn set_timestamp(&mut self, ts: u64) {
        self.timestamp = ts;
    }

    pub fn now(&self) -> ChainTime {
        ChainTime {
            timestamp: self.timestamp,
            block_height: self.block_height,
        }
    }

    pub fn context(&self, sender: Address) -> CallContext {
        CallContext {
            sender,
            block_height: self.block_height,
            timestamp: self.timestamp,
        }
    }

    pub fn register_node(
        &mut self,
        node: NodeId,
        owner: Address,
        validator: Address,
        encryption_key: G1Point,
    ) {
        self.env
            .register_node(node, owner, validator, encryption_key);
        info!(node, owner = hex::encode(owner), "Node registered");
    }

    /// Create the group for schain `name`. Returns its id.
    pub fn create_group(&mut self, name: &str, members: Vec<NodeId>) -> GroupId {
        let group = compute_group_id(name);
        info!(name, group = hex::encode(group), size = members.len(), "Group created");
        self.env.create_group(group, members);
        group
    }

    /// Execute a call from `sender` in the current block.
    pub fn submit(&mut self, sender: Address, call: DkgCall) -> HandlerResult<CallOutcome> {
        let ctx = self.context(sender);
        let result = handlers::dispatch(&mut self.module, &mut self.env, &ctx, call);
        self.collect_events();

        if result.is_ok() {
            self.reopen_rotated_groups();
        }
        result
    }

    /// Open a fresh ceremony for every group that just had a node rotated in.
    fn reopen_rotated_groups(&mut self) {
        for rotation in self.env.take_rotations() {
            let ctx = self.context(self.rotation_authority);
            match handlers::handle_open_channel(&mut self.module, &mut self.env, &ctx, rotation.group)
            {
                Ok(group_size) => info!(
                    group = hex::encode(rotation.group),
                    joining = rotation.joining,
                    group_size,
                    "Ceremony reopened after rotation"
                ),
                Err(err) => warn!(
                    group = hex::encode(rotation.group),
                    %err,
                    "Could not reopen ceremony after rotation"
                ),
            }
            self.collect_events();
        }
    }

    fn collect_events(&mut self) {
        for event in self.module.drain_events() {
            let sequence = self.events.len() as u64;
            self.events.push(EventRecord {
                sequence,
                block_height: self.block_height,
                timestamp: self.timestamp,
                event,
            });
        }
    }

    pub fn query(&self, query: DkgQuery) -> DkgQueryResponse {
        queries::handle_query(&self.module, &self.env, self.now(), query)
    }

    /// Events with a sequence number at or after `from`.
    pub fn events_since(&self, from: u64) -> &[EventRecord] {
        let start = (from as usize).min(self.events.len());
        &self.events[start..]
    }
}

impl Default for ChainState {
    fn default() -> Self {
        Self::new()
    }
}
