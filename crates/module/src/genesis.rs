//! Genesis configuration for the DKG module.
//!
//! This module defines the deployment parameters the DKG core is started
//! with: the complaint time limit and the addresses allowed to drive the
//! channel lifecycle.

use schain_types::Address;
use serde::{Deserialize, Serialize};

/// Default window, in seconds, for every complaint and phase timeout.
pub const DEFAULT_COMPLAINT_TIMELIMIT: u64 = 1800;

/// Default address of the schain creation authority.
pub const DEFAULT_SCHAIN_CREATOR: Address = [0x01; 32];

/// Default address of the node rotation authority.
pub const DEFAULT_NODE_ROTATION: Address = [0x02; 32];

/// Default address of the membership authority.
pub const DEFAULT_MEMBERSHIP_AUTHORITY: Address = [0x03; 32];

/// Genesis configuration for the DKG module.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DkgGenesisConfig {
    /// Length of the broadcast, alright and complaint windows
    pub complaint_timelimit: u64,

    /// Addresses allowed to open a channel
    pub ceremony_openers: Vec<Address>,

    /// Address allowed to delete a channel
    pub membership_authority: Address,
}

impl Default for DkgGenesisConfig {
    fn default() -> Self {
        Self {
            complaint_timelimit: DEFAULT_COMPLAINT_TIMELIMIT,
            ceremony_openers: vec![DEFAULT_SCHAIN_CREATOR, DEFAULT_NODE_ROTATION],
            membership_authority: DEFAULT_MEMBERSHIP_AUTHORITY,
        }
    }
}

impl DkgGenesisConfig {
    /// Validate the genesis configuration.
    pub fn validate(&self) -> Result<(), GenesisValidationError> {
        if self.complaint_timelimit == 0 {
            return Err(GenesisValidationError::InvalidTimeLimit);
        }

        if self.ceremony_openers.is_empty() {
            return Err(GenesisValidationError::MissingOpeners);
        }

        for (i, opener) in self.ceremony_openers.iter().enumerate() {
            if self.ceremony_openers[..i].contains(opener) {
                return Err(GenesisValidationError::DuplicateOpener(hex::encode(opener)));
            }
        }

        Ok(())
    }
}

/// Errors that can occur during genesis validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenesisValidationError {
    #[error("Complaint time limit cannot be zero")]
    InvalidTimeLimit,

    #[error("At least one ceremony opener is required")]
    MissingOpeners,

    #[error("Duplicate ceremony opener: {0}")]
    DuplicateOpener(String),
}
