//! Key material persisted in the data directory.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use schain_dkg::curve::{scalar_from_bytes, scalar_to_bytes};
use schain_dkg::{DkgOutput, EncryptionKeypair, NodeKeyFile};
use schain_types::{sha256, Address, G1Point, GroupId, NodeId};

/// Owner address a node registers under, bound to its encryption key.
pub fn owner_address(encryption_key: &G1Point) -> Address {
    sha256(&encryption_key.0)
}

pub fn key_file(data_dir: &Path, node: NodeId) -> PathBuf {
    data_dir.join(format!("node-{}.json", node))
}

pub fn output_file(data_dir: &Path, node: NodeId, schain: &str) -> PathBuf {
    data_dir.join(format!("node-{}-{}-share.json", node, schain))
}

pub fn save_keypair(path: &Path, keypair: &EncryptionKeypair) -> Result<()> {
    let file = NodeKeyFile {
        encryption_secret: scalar_to_bytes(keypair.secret()),
        encryption_public_key: keypair.public_key().clone(),
    };
    write_json(path, &file)
}

pub fn load_keypair(path: &Path) -> Result<EncryptionKeypair> {
    let data = std::fs::read_to_string(path)?;
    let file: NodeKeyFile = serde_json::from_str(&data)?;
    let secret = scalar_from_bytes(&file.encryption_secret.0)?;
    Ok(EncryptionKeypair::from_secret(secret))
}

/// Key share produced by a successful ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareFile {
    /// Hex group id
    pub group: String,
    pub threshold: u32,
    /// Hex-encoded scalar
    pub secret_share: String,
    /// Hex-encoded G2 point
    pub public_share: String,
    /// Hex-encoded G2 point
    pub group_public_key: String,
}

impl ShareFile {
    pub fn new(group: &GroupId, output: &DkgOutput) -> Self {
        Self {
            group: hex::encode(group),
            threshold: output.threshold,
            secret_share: hex::encode(output.secret_share.0),
            public_share: hex::encode(output.public_share.0),
            group_public_key: hex::encode(output.group_public_key.0),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::create_dir_all(path.parent().unwrap_or(path))?;
    let data = serde_json::to_string_pretty(value)?;
    std::fs::write(path, data)?;
    Ok(())
}
