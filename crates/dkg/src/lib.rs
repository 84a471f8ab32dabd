//! Node-side Joint-Feldman distributed key generation.
//!
//! Each member of a group of `n` acts as a dealer:
//!
//! 1. It picks a random polynomial of degree t-1, `t = (2n + 1) / 3`
//! 2. It broadcasts Feldman commitments to the coefficients and one share per member,
//!    each encrypted to that member's key
//! 3. Members check the shares dealt to them against the commitments
//! 4. Each member's key share is the sum of the shares it received
//! 5. The group public key is the sum of the free coefficient commitments
//!
//! When a member disputes its share, the dealer defends itself with the
//! pre-response and response built here, and the chain checks them with
//! [`FeldmanResponseVerifier`].

pub mod curve;
pub mod encryption;
pub mod error;
pub mod feldman;
pub mod participant;
pub mod types;
pub mod verifier;

pub use encryption::EncryptionKeypair;
pub use error::ParticipantError;
pub use participant::DkgParticipant;
pub use types::{
    BroadcastMessage, DkgConfig, DkgOutput, NodeKeyFile, PreResponseMessage, ResponseMessage,
};
pub use verifier::FeldmanResponseVerifier;
