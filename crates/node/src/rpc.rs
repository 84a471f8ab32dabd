//! JSON-RPC client for the mock chain.

use anyhow::{anyhow, Result};
use jsonrpsee::core::client::{ClientT, Error as ClientError};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Deserialize;
use serde_json::{json, Value};

use schain_dkg_module::{CallOutcome, DkgEvent, DkgQuery, DkgQueryResponse};
use schain_types::{Address, G1Point, G2Point, GroupId, KeyShare, NodeId};

use crate::driver::Action;

#[derive(Debug, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub timestamp: u64,
}

#[derive(Debug, Deserialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub event: DkgEvent,
}

#[derive(Debug, Deserialize)]
struct GroupInfoRpc {
    members: Vec<NodeId>,
    encryption_keys: Vec<String>,
}

/// Roster of a group with decoded keys.
#[derive(Debug)]
pub struct GroupInfo {
    pub members: Vec<NodeId>,
    pub encryption_keys: Vec<G1Point>,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    code: String,
    retryable: bool,
}

/// A call the module refused.
#[derive(Debug)]
pub struct Rejection {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

pub struct ChainClient {
    client: HttpClient,
}

impl ChainClient {
    pub fn connect(url: &str) -> Result<Self> {
        Ok(Self {
            client: HttpClientBuilder::default().build(url)?,
        })
    }

    pub async fn block_info(&self) -> Result<BlockInfo> {
        Ok(self.client.request("chain_getBlockInfo", rpc_params![]).await?)
    }

    pub async fn register_node(
        &self,
        node: NodeId,
        owner: &Address,
        validator: Option<&Address>,
        encryption_key: &G1Point,
    ) -> Result<bool> {
        let params = json!({
            "node": node,
            "owner": hex::encode(owner),
            "validator": validator.map(hex::encode),
            "encryption_key": hex::encode(encryption_key.0),
        });
        Ok(self
            .client
            .request("admin_registerNode", rpc_params![params])
            .await?)
    }

    pub async fn group(&self, group: &GroupId) -> Result<Option<GroupInfo>> {
        let info: Option<GroupInfoRpc> = self
            .client
            .request("query_getGroup", rpc_params![hex::encode(group)])
            .await?;
        let Some(info) = info else {
            return Ok(None);
        };

        let encryption_keys = info
            .encryption_keys
            .iter()
            .map(|k| decode_hex(k).map(G1Point))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(GroupInfo {
            members: info.members,
            encryption_keys,
        }))
    }

    pub async fn events(&self, from: u64) -> Result<Vec<EventRecord>> {
        Ok(self
            .client
            .request("query_getEvents", rpc_params![from])
            .await?)
    }

    pub async fn query(&self, query: DkgQuery) -> Result<DkgQueryResponse> {
        Ok(self.client.request("query_dkg", rpc_params![query]).await?)
    }

    /// Run a predicate query.
    pub async fn check(&self, query: DkgQuery) -> Result<bool> {
        match self.query(query).await? {
            DkgQueryResponse::Bool(value) => Ok(value),
            other => Err(anyhow!("Expected a predicate result, got {:?}", other)),
        }
    }

    /// Submit `action` for `node`. The outer error is transport failure.
    pub async fn submit(
        &self,
        sender: &Address,
        group: &GroupId,
        node: NodeId,
        action: &Action,
    ) -> Result<std::result::Result<CallOutcome, Rejection>> {
        let sender = hex::encode(sender);
        let group = hex::encode(group);

        let result: std::result::Result<CallOutcome, ClientError> = match action {
            Action::Broadcast(msg) => {
                let params = json!({
                    "sender": sender,
                    "group": group,
                    "node": node,
                    "verification_vector": encode_g2_vec(&msg.verification_vector),
                    "secret_key_contribution": encode_key_shares(&msg.secret_key_contribution),
                });
                self.client.request("dkg_broadcast", rpc_params![params]).await
            }
            Action::Alright => {
                self.client
                    .request("dkg_alright", rpc_params![sender, group, node])
                    .await
            }
            Action::Complaint { accused } => {
                self.client
                    .request("dkg_complaint", rpc_params![sender, group, node, accused])
                    .await
            }
            Action::PreResponse(msg) => {
                let params = json!({
                    "sender": sender,
                    "group": group,
                    "node": node,
                    "verification_vector": encode_g2_vec(&msg.verification_vector),
                    "verification_vector_multiplied":
                        encode_g2_vec(&msg.verification_vector_multiplied),
                    "secret_key_contribution": encode_key_shares(&msg.secret_key_contribution),
                });
                self.client
                    .request("dkg_preResponse", rpc_params![params])
                    .await
            }
            Action::Response(msg) => {
                let params = json!({
                    "sender": sender,
                    "group": group,
                    "node": node,
                    "secret": hex::encode(msg.secret.0),
                    "multiplied_share": hex::encode(msg.multiplied_share.0),
                });
                self.client.request("dkg_response", rpc_params![params]).await
            }
        };

        match result {
            Ok(outcome) => Ok(Ok(outcome)),
            Err(ClientError::Call(err)) => {
                let data = err
                    .data()
                    .and_then(|raw| serde_json::from_str::<ErrorData>(raw.get()).ok());
                Ok(Err(Rejection {
                    code: data.as_ref().map(|d| d.code.clone()).unwrap_or_default(),
                    retryable: data.is_some_and(|d| d.retryable),
                    message: err.message().to_string(),
                }))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn decode_hex<const N: usize>(s: &str) -> Result<[u8; N]> {
    hex::decode(s.trim_start_matches("0x"))?
        .try_into()
        .map_err(|_| anyhow!("Expected {} bytes", N))
}

fn encode_g2_vec(points: &[G2Point]) -> Vec<String> {
    points.iter().map(|p| hex::encode(p.0)).collect()
}

fn encode_key_shares(shares: &[KeyShare]) -> Vec<Value> {
    shares
        .iter()
        .map(|s| {
            json!({
                "public_key": hex::encode(s.public_key.0),
                "share": hex::encode(s.share),
            })
        })
        .collect()
}
