//! On-chain coordination of Joint-Feldman distributed key generation for
//! schain groups.
//!
//! The module tracks one ceremony per group through its phases:
//!
//! - Channel lifecycle: open and delete ceremonies
//! - Broadcast: each member publishes its verification vector and encrypted shares once
//! - Alright: each member confirms the shares it received; the last confirmation finalizes the key
//! - Complaints: accusations, the two-stage defense, and guilty verdicts
//! - Escalation: slashing plus rotation of a replacement or restart without the guilty node
//!
//! Timeouts are plain comparisons against the call's timestamp. Nothing runs
//! in the background; every transition is driven by a call.
//!
//! # Architecture
//!
//! - `call`: Message types for state-changing operations
//! - `handlers`: Lifecycle, broadcast and alright logic, plus call dispatch
//! - `complaint`: Complaint resolution and escalation
//! - `queries`: Pure predicates and read-only state access
//! - `state`: On-chain state structures
//! - `events`: Notifications drained by the runtime
//! - `collaborators`: Interfaces to membership, identity, keys, slashing and curve checks
//! - `memory`: In-memory collaborators
//! - `genesis`: Initial configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```ignore
//! use schain_dkg_module::{handlers, DkgCall, DkgState, InMemoryEnvironment, StubVerifier};
//!
//! let mut state = DkgState::new();
//! let mut env = InMemoryEnvironment::new(StubVerifier::accepting());
//! let ctx = handlers::CallContext { ... };
//!
//! handlers::dispatch(&mut state, &mut env, &ctx, DkgCall::OpenChannel { group })?;
//! for event in state.drain_events() { ... }
//! ```

pub mod call;
pub mod collaborators;
pub mod complaint;
pub mod error;
pub mod events;
pub mod genesis;
pub mod handlers;
pub mod memory;
pub mod queries;
pub mod state;

pub use call::DkgCall;
pub use collaborators::{
    Environment, Identity, KeyStorage, Membership, ResponseVerification, ResponseVerifier,
    Slasher, FAILED_DKG,
};
pub use complaint::{ComplaintOutcome, Escalation, ResponseOutcome};
pub use error::{DkgError, ErrorKind};
pub use events::DkgEvent;
pub use genesis::{DkgGenesisConfig, GenesisValidationError};
pub use handlers::{AlrightOutcome, CallContext, CallOutcome, HandlerResult};
pub use memory::{InMemoryEnvironment, StubVerifier};
pub use queries::{ComplaintGround, DkgQuery, DkgQueryResponse};
pub use state::DkgState;
