//! Instance data model.
//!
//! - `types`: identifiers, endpoints, credentials, specs and views.
//! - `state`: the lifecycle state machine.

pub mod state;
pub mod types;

pub use state::InstanceState;
pub use types::{
    BackendKind, BackendRef, Bytes, ConnectInfo, Credentials, Endpoint, Instance, InstanceId,
    InstanceSpec, InstanceView,
};
