//! RPC-compatible types for the mock chain.
//!
//! Addresses, group ids and curve points travel as hex strings. Everything
//! else uses the serde encoding of the module types.

use schain_dkg_module::DkgError;
use schain_types::{Address, G1Point, G2Point, GroupId, KeyShare, NodeId, Scalar};
use serde::{Deserialize, Serialize};

/// Genesis configuration for RPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenesisConfigRpc {
    pub complaint_timelimit: Option<u64>,
    /// Hex addresses allowed to open a channel
    pub ceremony_openers: Option<Vec<String>>,
    /// Hex address allowed to delete a channel
    pub membership_authority: Option<String>,
    /// Hex address that reopens ceremonies after a rotation
    pub rotation_authority: Option<String>,
    pub initial_timestamp: Option<u64>,
}

/// Block info response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub timestamp: u64,
}

/// Parameters for registering a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodeParams {
    pub node: NodeId,
    pub owner: String,
    /// Defaults to the owner
    pub validator: Option<String>,
    /// Hex-encoded G1 point (48 bytes)
    pub encryption_key: String,
}

/// Group roster response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfoRpc {
    pub group: String,
    pub members: Vec<NodeId>,
    /// Hex-encoded encryption key per member, in roster order
    pub encryption_keys: Vec<String>,
}

/// Encrypted share for RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyShareRpc {
    /// Hex-encoded G1 point (48 bytes)
    pub public_key: String,
    /// Hex-encoded share ciphertext (32 bytes)
    pub share: String,
}

impl From<&KeyShare> for KeyShareRpc {
    fn from(share: &KeyShare) -> Self {
        Self {
            public_key: hex::encode(share.public_key.0),
            share: hex::encode(share.share),
        }
    }
}

impl TryFrom<&KeyShareRpc> for KeyShare {
    type Error = String;

    fn try_from(rpc: &KeyShareRpc) -> Result<Self, Self::Error> {
        Ok(KeyShare {
            public_key: G1Point(decode_hex(&rpc.public_key, "key share public key")?),
            share: decode_hex(&rpc.share, "key share")?,
        })
    }
}

/// Parameters for a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastParams {
    pub sender: String,
    pub group: String,
    pub node: NodeId,
    /// Hex-encoded G2 points
    pub verification_vector: Vec<String>,
    pub secret_key_contribution: Vec<KeyShareRpc>,
}

/// Parameters for a pre-response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreResponseParams {
    pub sender: String,
    pub group: String,
    pub node: NodeId,
    pub verification_vector: Vec<String>,
    pub verification_vector_multiplied: Vec<String>,
    pub secret_key_contribution: Vec<KeyShareRpc>,
}

/// Parameters for a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseParams {
    pub sender: String,
    pub group: String,
    pub node: NodeId,
    /// Hex-encoded scalar (32 bytes)
    pub secret: String,
    /// Hex-encoded G2 point (96 bytes)
    pub multiplied_share: String,
}

/// Slashing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashRpc {
    pub validator: String,
    pub offense: String,
}

/// Structured data attached to a rejected call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgErrorData {
    pub code: String,
    pub kind: String,
    pub retryable: bool,
}

impl From<&DkgError> for DkgErrorData {
    fn from(err: &DkgError) -> Self {
        Self {
            code: err.code().to_string(),
            kind: err.kind().as_str().to_string(),
            retryable: err.kind().is_retryable(),
        }
    }
}

fn decode_hex<const N: usize>(s: &str, what: &str) -> Result<[u8; N], String> {
    hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| format!("Invalid {} hex: {}", what, e))?
        .try_into()
        .map_err(|_| format!("{} must be {} bytes", what, N))
}

/// Parse a hex address, left-aligning shorter input.
pub fn parse_address(s: &str) -> Address {
    let mut addr = [0u8; 32];
    if let Ok(bytes) = hex::decode(s.trim_start_matches("0x")) {
        let len = bytes.len().min(32);
        addr[..len].copy_from_slice(&bytes[..len]);
    }
    addr
}

pub fn parse_group(s: &str) -> Result<GroupId, String> {
    decode_hex(s, "group id")
}

pub fn parse_g1(s: &str) -> Result<G1Point, String> {
    decode_hex(s, "G1 point").map(G1Point)
}

pub fn parse_g2(s: &str) -> Result<G2Point, String> {
    decode_hex(s, "G2 point").map(G2Point)
}

pub fn parse_g2_vec(points: &[String]) -> Result<Vec<G2Point>, String> {
    points.iter().map(|p| parse_g2(p)).collect()
}

pub fn parse_scalar(s: &str) -> Result<Scalar, String> {
    decode_hex(s, "scalar").map(Scalar)
}

pub fn parse_key_shares(shares: &[KeyShareRpc]) -> Result<Vec<KeyShare>, String> {
    shares.iter().map(KeyShare::try_from).collect()
}
