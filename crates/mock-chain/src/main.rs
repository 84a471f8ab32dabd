//! Mock chain server for local testing of schain DKG.
//!
//! This provides a JSON-RPC server that simulates on-chain state management
//! for the DKG module without requiring a real blockchain.

use anyhow::Result;
use clap::Parser;
use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::Server;
use jsonrpsee::types::ErrorObjectOwned;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use schain_dkg_module::{
    genesis::DEFAULT_NODE_ROTATION, CallOutcome, DkgCall, DkgError, DkgGenesisConfig, DkgQuery,
    DkgQueryResponse, Membership,
};
use schain_types::NodeId;

mod chain;
mod types;
use chain::{ChainState, EventRecord};
use types::*;

#[derive(Parser)]
#[command(name = "mock-chain")]
#[command(about = "JSON-RPC chain simulator for schain DKG")]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:9944")]
    listen: SocketAddr,

    /// Seconds each simulated block advances the clock
    #[arg(long, default_value = "12")]
    block_time: u64,

    /// Advance one block per interval instead of on request
    #[arg(long)]
    auto_mine: bool,
}

/// RPC API definition for the mock chain.
#[rpc(server)]
pub trait MockChainApi {
    // ============ Admin Methods ============

    /// Initialize the chain with genesis config.
    #[method(name = "admin_init")]
    async fn admin_init(&self, config: GenesisConfigRpc) -> Result<bool, ErrorObjectOwned>;

    /// Advance the chain by one block.
    #[method(name = "admin_advanceBlock")]
    async fn admin_advance_block(&self) -> Result<BlockInfo, ErrorObjectOwned>;

    /// Set the current timestamp (for testing time-dependent logic).
    #[method(name = "admin_setTimestamp")]
    async fn admin_set_timestamp(&self, timestamp: u64) -> Result<bool, ErrorObjectOwned>;

    /// Add a node to the registry.
    #[method(name = "admin_registerNode")]
    async fn admin_register_node(&self, params: RegisterNodeParams) -> Result<bool, ErrorObjectOwned>;

    /// Create the roster for a schain. Returns the hex group id.
    #[method(name = "admin_createGroup")]
    async fn admin_create_group(
        &self,
        name: String,
        members: Vec<NodeId>,
    ) -> Result<String, ErrorObjectOwned>;

    /// Make a registered node available for rotation.
    #[method(name = "admin_addFreeNode")]
    async fn admin_add_free_node(&self, node: NodeId) -> Result<bool, ErrorObjectOwned>;

    // ============ DKG Methods ============

    #[method(name = "dkg_openChannel")]
    async fn dkg_open_channel(
        &self,
        sender: String,
        group: String,
    ) -> Result<CallOutcome, ErrorObjectOwned>;

    #[method(name = "dkg_deleteChannel")]
    async fn dkg_delete_channel(
        &self,
        sender: String,
        group: String,
    ) -> Result<CallOutcome, ErrorObjectOwned>;

    #[method(name = "dkg_broadcast")]
    async fn dkg_broadcast(&self, params: BroadcastParams) -> Result<CallOutcome, ErrorObjectOwned>;

    #[method(name = "dkg_alright")]
    async fn dkg_alright(
        &self,
        sender: String,
        group: String,
        node: NodeId,
    ) -> Result<CallOutcome, ErrorObjectOwned>;

    #[method(name = "dkg_complaint")]
    async fn dkg_complaint(
        &self,
        sender: String,
        group: String,
        accuser: NodeId,
        accused: NodeId,
    ) -> Result<CallOutcome, ErrorObjectOwned>;

    #[method(name = "dkg_preResponse")]
    async fn dkg_pre_response(
        &self,
        params: PreResponseParams,
    ) -> Result<CallOutcome, ErrorObjectOwned>;

    #[method(name = "dkg_response")]
    async fn dkg_response(&self, params: ResponseParams) -> Result<CallOutcome, ErrorObjectOwned>;

    // ============ Query Methods ============

    /// Get current block info.
    #[method(name = "chain_getBlockInfo")]
    async fn chain_get_block_info(&self) -> Result<BlockInfo, ErrorObjectOwned>;

    /// Run a module query at the current block.
    #[method(name = "query_dkg")]
    async fn query_dkg(&self, query: DkgQuery) -> Result<DkgQueryResponse, ErrorObjectOwned>;

    /// Roster and encryption keys of a group.
    #[method(name = "query_getGroup")]
    async fn query_get_group(&self, group: String) -> Result<Option<GroupInfoRpc>, ErrorObjectOwned>;

    /// Events with a sequence number at or after `from`.
    #[method(name = "query_getEvents")]
    async fn query_get_events(&self, from: u64) -> Result<Vec<EventRecord>, ErrorObjectOwned>;

    /// Every slashing request so far.
    #[method(name = "query_getSlashes")]
    async fn query_get_slashes(&self) -> Result<Vec<SlashRpc>, ErrorObjectOwned>;
}

/// Implementation of the mock chain RPC server.
struct MockChainServer {
    state: Arc<RwLock<ChainState>>,
}

impl MockChainServer {
    fn new(state: Arc<RwLock<ChainState>>) -> Self {
        Self { state }
    }

    fn rpc_error(msg: &str) -> ErrorObjectOwned {
        ErrorObjectOwned::owned(-32000, msg.to_string(), None::<()>)
    }

    fn call_error(err: &DkgError) -> ErrorObjectOwned {
        ErrorObjectOwned::owned(-32001, err.to_string(), Some(DkgErrorData::from(err)))
    }

    fn invalid_params(msg: String) -> ErrorObjectOwned {
        ErrorObjectOwned::owned(-32602, msg, None::<()>)
    }

    fn submit(&self, sender: &str, call: DkgCall) -> Result<CallOutcome, ErrorObjectOwned> {
        let mut state = self.state.write();
        let sender = parse_address(sender);
        let group = hex::encode(call.group());

        state.submit(sender, call).map_err(|err| {
            warn!(%group, code = err.code(), %err, "Call rejected");
            Self::call_error(&err)
        })
    }
}

#[async_trait]
impl MockChainApiServer for MockChainServer {
    async fn admin_init(&self, config: GenesisConfigRpc) -> Result<bool, ErrorObjectOwned> {
        let mut genesis = DkgGenesisConfig::default();
        if let Some(limit) = config.complaint_timelimit {
            genesis.complaint_timelimit = limit;
        }
        if let Some(openers) = &config.ceremony_openers {
            genesis.ceremony_openers = openers.iter().map(|o| parse_address(o)).collect();
        }
        if let Some(authority) = &config.membership_authority {
            genesis.membership_authority = parse_address(authority);
        }
        let rotation_authority = config
            .rotation_authority
            .as_deref()
            .map(parse_address)
            .unwrap_or(DEFAULT_NODE_ROTATION);

        let mut state = self.state.write();
        state
            .init(&genesis, rotation_authority, config.initial_timestamp)
            .map_err(|e| Self::rpc_error(&format!("Invalid genesis: {}", e)))?;

        info!(
            complaint_timelimit = genesis.complaint_timelimit,
            openers = genesis.ceremony_openers.len(),
            "Chain initialized"
        );
        Ok(true)
    }

    async fn admin_advance_block(&self) -> Result<BlockInfo, ErrorObjectOwned> {
        let mut state = self.state.write();
        state.advance_block();
        Ok(BlockInfo {
            height: state.block_height,
            timestamp: state.timestamp,
        })
    }

    async fn admin_set_timestamp(&self, timestamp: u64) -> Result<bool, ErrorObjectOwned> {
        let mut state = self.state.write();
        state.set_timestamp(timestamp);
        info!("Timestamp set to {}", timestamp);
        Ok(true)
    }

    async fn admin_register_node(&self, params: RegisterNodeParams) -> Result<bool, ErrorObjectOwned> {
        let encryption_key = parse_g1(&params.encryption_key).map_err(Self::invalid_params)?;
        let owner = parse_address(&params.owner);
        let validator = params.validator.as_deref().map(parse_address).unwrap_or(owner);

        let mut state = self.state.write();
        state.register_node(params.node, owner, validator, encryption_key);
        Ok(true)
    }

    async fn admin_create_group(
        &self,
        name: String,
        members: Vec<NodeId>,
    ) -> Result<String, ErrorObjectOwned> {
        let mut state = self.state.write();
        if let Some(unknown) = members.iter().find(|&&m| state.env.node(m).is_none()) {
            return Err(Self::rpc_error(&format!("Node {} is not registered", unknown)));
        }
        let group = state.create_group(&name, members);
        Ok(hex::encode(group))
    }

    async fn admin_add_free_node(&self, node: NodeId) -> Result<bool, ErrorObjectOwned> {
        let mut state = self.state.write();
        if state.env.node(node).is_none() {
            return Err(Self::rpc_error(&format!("Node {} is not registered", node)));
        }
        state.env.add_free_node(node);
        info!(node, "Free node added");
        Ok(true)
    }

    async fn dkg_open_channel(
        &self,
        sender: String,
        group: String,
    ) -> Result<CallOutcome, ErrorObjectOwned> {
        let group = parse_group(&group).map_err(Self::invalid_params)?;
        self.submit(&sender, DkgCall::OpenChannel { group })
    }

    async fn dkg_delete_channel(
        &self,
        sender: String,
        group: String,
    ) -> Result<CallOutcome, ErrorObjectOwned> {
        let group = parse_group(&group).map_err(Self::invalid_params)?;
        self.submit(&sender, DkgCall::DeleteChannel { group })
    }

    async fn dkg_broadcast(&self, params: BroadcastParams) -> Result<CallOutcome, ErrorObjectOwned> {
        let call = DkgCall::Broadcast {
            group: parse_group(&params.group).map_err(Self::invalid_params)?,
            node: params.node,
            verification_vector: parse_g2_vec(&params.verification_vector)
                .map_err(Self::invalid_params)?,
            secret_key_contribution: parse_key_shares(&params.secret_key_contribution)
                .map_err(Self::invalid_params)?,
        };
        self.submit(&params.sender, call)
    }

    async fn dkg_alright(
        &self,
        sender: String,
        group: String,
        node: NodeId,
    ) -> Result<CallOutcome, ErrorObjectOwned> {
        let group = parse_group(&group).map_err(Self::invalid_params)?;
        self.submit(&sender, DkgCall::Alright { group, node })
    }

    async fn dkg_complaint(
        &self,
        sender: String,
        group: String,
        accuser: NodeId,
        accused: NodeId,
    ) -> Result<CallOutcome, ErrorObjectOwned> {
        let group = parse_group(&group).map_err(Self::invalid_params)?;
        self.submit(
            &sender,
            DkgCall::Complaint {
                group,
                accuser,
                accused,
            },
        )
    }

    async fn dkg_pre_response(
        &self,
        params: PreResponseParams,
    ) -> Result<CallOutcome, ErrorObjectOwned> {
        let call = DkgCall::PreResponse {
            group: parse_group(&params.group).map_err(Self::invalid_params)?,
            node: params.node,
            verification_vector: parse_g2_vec(&params.verification_vector)
                .map_err(Self::invalid_params)?,
            verification_vector_multiplied: parse_g2_vec(&params.verification_vector_multiplied)
                .map_err(Self::invalid_params)?,
            secret_key_contribution: parse_key_shares(&params.secret_key_contribution)
                .map_err(Self::invalid_params)?,
        };
        self.submit(&params.sender, call)
    }

    async fn dkg_response(&self, params: ResponseParams) -> Result<CallOutcome, ErrorObjectOwned> {
        let call = DkgCall::Response {
            group: parse_group(&params.group).map_err(Self::invalid_params)?,
            node: params.node,
            secret: parse_scalar(&params.secret).map_err(Self::invalid_params)?,
            multiplied_share: parse_g2(&params.multiplied_share).map_err(Self::invalid_params)?,
        };
        self.submit(&params.sender, call)
    }

    async fn chain_get_block_info(&self) -> Result<BlockInfo, ErrorObjectOwned> {
        let state = self.state.read();
        Ok(BlockInfo {
            height: state.block_height,
            timestamp: state.timestamp,
        })
    }

    async fn query_dkg(&self, query: DkgQuery) -> Result<DkgQueryResponse, ErrorObjectOwned> {
        let state = self.state.read();
        Ok(state.query(query))
    }

    async fn query_get_group(&self, group: String) -> Result<Option<GroupInfoRpc>, ErrorObjectOwned> {
        let group_id = parse_group(&group).map_err(Self::invalid_params)?;
        let state = self.state.read();

        let Some(members) = state.env.group_members(&group_id) else {
            return Ok(None);
        };
        let encryption_keys = members
            .iter()
            .map(|&m| {
                state
                    .env
                    .encryption_key(m)
                    .map(|k| hex::encode(k.0))
                    .unwrap_or_default()
            })
            .collect();

        Ok(Some(GroupInfoRpc {
            group,
            members: members.to_vec(),
            encryption_keys,
        }))
    }

    async fn query_get_events(&self, from: u64) -> Result<Vec<EventRecord>, ErrorObjectOwned> {
        let state = self.state.read();
        Ok(state.events_since(from).to_vec())
    }

    async fn query_get_slashes(&self) -> Result<Vec<SlashRpc>, ErrorObjectOwned> {
        let state = self.state.read();
        Ok(state
            .env
            .slashes()
            .iter()
            .map(|(validator, offense)| SlashRpc {
                validator: hex::encode(validator),
                offense: offense.clone(),
            })
            .collect())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mock_chain=info".parse()?)
                .add_directive("schain_dkg_module=info".parse()?)
                .add_directive("jsonrpsee=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut chain = ChainState::new();
    chain.block_time = cli.block_time.max(1);
    let state = Arc::new(RwLock::new(chain));

    info!("Starting mock chain server on {}", cli.listen);

    let server = Server::builder().build(cli.listen).await?;
    let handle = server.start(MockChainServer::new(state.clone()).into_rpc());

    if cli.auto_mine {
        let block_time = cli.block_time.max(1);
        info!(block_time, "Auto-mining enabled");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(block_time));
            loop {
                interval.tick().await;
                state.write().advance_block();
            }
        });
    }

    info!("Mock chain server running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    handle.stop()?;
    handle.stopped().await;

    Ok(())
}
