//! vpslite - lifecycle manager for ephemeral SSH-reachable compute
//! instances.
//!
//! The runtime allocates a collision-checked identity and host-side SSH
//! port for each instance, reserves both in an authoritative registry
//! before any backend work starts, delegates creation/teardown to a
//! pluggable [`provisioner::Provisioner`] (mock or docker container), and
//! commits every state change through compare-and-set transitions so
//! partial backend failures leave auditable records instead of corrupt or
//! missing state.
//!
//! # Example
//!
//! ```no_run
//! use vpslite::{VpsliteOptions, VpsliteRuntime};
//!
//! # async fn example() -> vpslite::VpsliteResult<()> {
//! let runtime = VpsliteRuntime::new(VpsliteOptions::default())?;
//! let info = runtime
//!     .create_vps("alice", "ubuntu:22.04", Some("512m"), Some("5g"))
//!     .await?;
//! println!("ssh {}@{} -p {}", info.username, info.host, info.port);
//! runtime.delete_vps(&info.id).await?;
//! # Ok(())
//! # }
//! ```

pub mod alloc;
pub mod errors;
pub mod instance;
pub mod provisioner;
pub mod registry;
pub mod runtime;
pub mod secret;

pub use errors::{VpsliteError, VpsliteResult};
pub use instance::{
    BackendKind, BackendRef, Bytes, ConnectInfo, Credentials, Endpoint, Instance, InstanceId,
    InstanceSpec, InstanceState, InstanceView,
};
pub use registry::InstanceRegistry;
pub use runtime::{DeleteOutcome, VpsliteOptions, VpsliteRuntime};
