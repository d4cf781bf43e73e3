//! Pluggable backend capability.
//!
//! The provisioner performs the actual create/destroy side effects. The
//! variant is selected once at startup and injected as a trait object, so
//! lifecycle logic never branches on the backend kind.
//!
//! - `mock`: deterministic in-process fake; the test suite runs against it.
//! - `container`: drives the docker CLI.

mod container;
mod mock;

pub use container::ContainerProvisioner;
pub use mock::{FailureMode, MockProvisioner};

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::VpsliteResult;
use crate::instance::{BackendKind, BackendRef, Credentials, Endpoint, InstanceId, InstanceSpec};
use crate::runtime::options::VpsliteOptions;

/// Result of a successful provision call.
///
/// Best-effort steps that failed (image pull, in-guest password set) are
/// reported as warnings rather than thrown away; they never fail the
/// overall operation, but the caller is expected to log them.
#[derive(Clone, Debug)]
pub struct ProvisionOutcome {
    pub backend_ref: BackendRef,
    pub warnings: Vec<String>,
}

/// Best-effort backend liveness, used only for reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Alive,
    Dead,
    Unknown,
}

/// Backend capability performing create/destroy side effects.
///
/// Contract:
/// - `provision` must be safe to retry: implementations look up a prior
///   resource tagged with the instance id before creating a duplicate.
/// - `deprovision` is idempotent: an already-removed resource is success.
/// - `health` is advisory; correctness of create/delete never depends on it.
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn provision(
        &self,
        id: &InstanceId,
        owner_id: &str,
        spec: &InstanceSpec,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> VpsliteResult<ProvisionOutcome>;

    async fn deprovision(&self, backend_ref: &BackendRef) -> VpsliteResult<()>;

    async fn health(&self, backend_ref: &BackendRef) -> HealthStatus;
}

/// Build the provisioner selected by the options.
///
/// Called once at runtime startup; an unknown backend never gets this far
/// because options parsing fails fast on it.
pub fn provisioner_for(options: &VpsliteOptions) -> Arc<dyn Provisioner> {
    match options.backend {
        BackendKind::Mock => Arc::new(MockProvisioner::new()),
        BackendKind::Container => Arc::new(ContainerProvisioner::new(options.docker_bin.clone())),
    }
}
