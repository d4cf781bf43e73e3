//! The lifecycle orchestrator.
//!
//! `VpsliteRuntime` ties the allocator, secret generator, registry and
//! provisioner together. The registry record is inserted **before** the
//! backend is called, so the id and port are claimed even if provisioning
//! is slow; no registry-wide lock is ever held across a backend call, and
//! per-instance ordering is linearized through compare-and-set.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::alloc::{self, PortRange, MAX_ALLOC_ATTEMPTS};
use crate::errors::{VpsliteError, VpsliteResult};
use crate::instance::{
    Bytes, ConnectInfo, Credentials, Endpoint, Instance, InstanceId, InstanceSpec, InstanceState,
    InstanceView,
};
use crate::provisioner::{provisioner_for, HealthStatus, ProvisionOutcome, Provisioner};
use crate::registry::InstanceRegistry;
use crate::runtime::options::VpsliteOptions;
use crate::secret::{generate_password, ALPHANUMERIC};

/// Initial backoff after a transient provisioning failure; doubles per
/// attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Result of a delete call. `deleted` is false when the instance was
/// already gone (idempotent no-op).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted: bool,
}

/// Runtime handle.
///
/// Cheaply cloneable via `Arc`; all clones share the registry and
/// provisioner. Safe to call from many tasks concurrently: operations on
/// different instances never contend beyond the registry's short
/// read/write sections.
#[derive(Clone)]
pub struct VpsliteRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    options: VpsliteOptions,
    registry: InstanceRegistry,
    provisioner: Arc<dyn Provisioner>,
    ports: PortRange,
}

impl VpsliteRuntime {
    /// Create a runtime with the provisioner the options select.
    ///
    /// # Errors
    ///
    /// Fails fast on invalid options (including `UnknownBackend` at parse
    /// time) and on an unreadable registry snapshot.
    pub fn new(options: VpsliteOptions) -> VpsliteResult<Self> {
        options.validate()?;
        let provisioner = provisioner_for(&options);
        Self::with_provisioner(options, provisioner)
    }

    /// Create a runtime with an injected provisioner.
    ///
    /// This is the seam tests use to share a `MockProvisioner` handle with
    /// the runtime under test.
    pub fn with_provisioner(
        options: VpsliteOptions,
        provisioner: Arc<dyn Provisioner>,
    ) -> VpsliteResult<Self> {
        options.validate()?;
        let ports = PortRange::new(options.ssh_base_port, options.port_pool_size)?;
        let registry = match &options.state_file {
            Some(path) => InstanceRegistry::open(path.clone())?,
            None => InstanceRegistry::new(),
        };

        tracing::debug!(backend = %provisioner.kind(), "initialized runtime");
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                options,
                registry,
                provisioner,
                ports,
            }),
        })
    }

    /// Direct registry access, for embedders that need raw records.
    pub fn registry(&self) -> &InstanceRegistry {
        &self.inner.registry
    }

    /// Create an instance and return its connection descriptor.
    ///
    /// The descriptor (including the password, handed out only here) is
    /// returned only after the instance reaches `Running`. On backend
    /// failure the reserved record is kept in state `Failed` for audit and
    /// the port is freed; the record never silently vanishes.
    pub async fn create_vps(
        &self,
        owner_id: &str,
        os_image: &str,
        ram: Option<&str>,
        disk: Option<&str>,
    ) -> VpsliteResult<ConnectInfo> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(VpsliteError::InvalidArgument("owner_id is empty".into()));
        }
        let os_image = os_image.trim();
        if os_image.is_empty() {
            return Err(VpsliteError::InvalidArgument("os_image is empty".into()));
        }
        let spec = InstanceSpec {
            os_image: os_image.to_string(),
            ram: Bytes::parse_opt(ram)?,
            disk: Bytes::parse_opt(disk)?,
        };

        let credentials = Credentials {
            username: self.inner.options.username.clone(),
            password: generate_password(self.inner.options.password_length, ALPHANUMERIC),
        };

        let instance = self.reserve(owner_id, spec, credentials)?;
        let id = instance.id.clone();
        tracing::info!(
            instance_id = %id,
            owner = %owner_id,
            port = instance.endpoint.port,
            "instance reserved, provisioning"
        );

        match self.provision_with_retry(&instance).await {
            Ok(outcome) => self.commit_running(instance, outcome).await,
            Err(e) => {
                tracing::warn!(instance_id = %id, error = %e, "provisioning failed");
                // Keep the record as a Failed tombstone; terminality frees
                // the port.
                let _ = self.inner.registry.compare_and_set_state(
                    &id,
                    InstanceState::Provisioning,
                    InstanceState::Failed,
                )?;
                self.inner.registry.release_port(instance.endpoint.port);
                Err(e)
            }
        }
    }

    /// Delete an instance.
    ///
    /// Idempotent: deleting an already-`Deleted` instance is a successful
    /// no-op (`deleted: false`). A deletion already in flight is a
    /// `Conflict`. On persistent backend failure the record stays in
    /// `Deleting` for a later `reconcile` pass to retry.
    pub async fn delete_vps(&self, id: &InstanceId) -> VpsliteResult<DeleteOutcome> {
        let instance = self
            .inner
            .registry
            .get(id)
            .ok_or_else(|| VpsliteError::NotFound(id.to_string()))?;

        match instance.state {
            InstanceState::Deleted => return Ok(DeleteOutcome { deleted: false }),
            InstanceState::Deleting => {
                return Err(VpsliteError::Conflict(format!(
                    "deletion of {} already in flight",
                    id
                )));
            }
            state if state.can_delete() => {
                if !self
                    .inner
                    .registry
                    .compare_and_set_state(id, state, InstanceState::Deleting)?
                {
                    return Err(VpsliteError::Conflict(format!(
                        "instance {} changed state concurrently",
                        id
                    )));
                }
            }
            state => {
                return Err(VpsliteError::Conflict(format!(
                    "instance {} cannot be deleted from state {}",
                    id, state
                )));
            }
        }

        // The record may have gained its backend_ref after our snapshot
        // (delete racing a create), so re-read before deprovisioning.
        let backend_ref = self.inner.registry.get(id).and_then(|i| i.backend_ref);
        if let Some(backend_ref) = backend_ref {
            self.deprovision_with_retry(&backend_ref).await?;
        }

        if self
            .inner
            .registry
            .compare_and_set_state(id, InstanceState::Deleting, InstanceState::Deleted)?
        {
            self.inner.registry.release_port(instance.endpoint.port);
            tracing::info!(instance_id = %id, "instance deleted");
            Ok(DeleteOutcome { deleted: true })
        } else {
            Err(VpsliteError::Conflict(format!(
                "instance {} changed state during deletion",
                id
            )))
        }
    }

    /// List non-terminal instances, optionally filtered by owner.
    pub fn list_vps(&self, owner: Option<&str>) -> Vec<InstanceView> {
        self.inner
            .registry
            .list(owner, false)
            .iter()
            .map(Instance::to_view)
            .collect()
    }

    /// List everything, tombstones included.
    pub fn list_all(&self, owner: Option<&str>) -> Vec<InstanceView> {
        self.inner
            .registry
            .list(owner, true)
            .iter()
            .map(Instance::to_view)
            .collect()
    }

    /// Look up one instance.
    ///
    /// A `Deleted` tombstone within the retention window is returned (with
    /// redacted credentials); after `purge_expired` it is `NotFound`.
    pub fn get_vps_info(&self, id: &InstanceId) -> VpsliteResult<InstanceView> {
        self.inner
            .registry
            .get(id)
            .map(|i| i.to_view())
            .ok_or_else(|| VpsliteError::NotFound(id.to_string()))
    }

    /// Reconciliation pass.
    ///
    /// Retries teardown for instances stuck in `Deleting` and marks
    /// `Running` instances whose backend resource died as `Failed`.
    /// Returns the number of records repaired. Never required for the
    /// correctness of create/delete.
    pub async fn reconcile(&self) -> usize {
        let mut repaired = 0;
        for instance in self.inner.registry.list(None, false) {
            match instance.state {
                InstanceState::Deleting => {
                    let result = match &instance.backend_ref {
                        Some(backend_ref) => {
                            self.deprovision_with_retry(backend_ref).await
                        }
                        // Nothing was ever created; finishing is safe.
                        None => Ok(()),
                    };
                    match result {
                        Ok(()) => {
                            if self
                                .inner
                                .registry
                                .compare_and_set_state(
                                    &instance.id,
                                    InstanceState::Deleting,
                                    InstanceState::Deleted,
                                )
                                .unwrap_or(false)
                            {
                                self.inner.registry.release_port(instance.endpoint.port);
                                repaired += 1;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                instance_id = %instance.id,
                                error = %e,
                                "reconcile: deprovision still failing"
                            );
                        }
                    }
                }
                InstanceState::Running => {
                    if let Some(backend_ref) = &instance.backend_ref {
                        if self.inner.provisioner.health(backend_ref).await == HealthStatus::Dead {
                            tracing::warn!(
                                instance_id = %instance.id,
                                backend_ref = %backend_ref,
                                "reconcile: backend resource dead, marking failed"
                            );
                            if self
                                .inner
                                .registry
                                .compare_and_set_state(
                                    &instance.id,
                                    InstanceState::Running,
                                    InstanceState::Failed,
                                )
                                .unwrap_or(false)
                            {
                                repaired += 1;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        repaired
    }

    /// Purge terminal tombstones older than the retention window.
    pub fn purge_expired(&self) -> VpsliteResult<usize> {
        self.inner
            .registry
            .purge_terminal(self.inner.options.retention())
    }
}

// ============================================================================
// INTERNAL HELPERS
// ============================================================================

impl VpsliteRuntime {
    /// Reserve id + port by inserting the `Provisioning` record.
    ///
    /// The insert is the atomic claim; a lost race (port taken between the
    /// free-port read and the insert, or an id collision) retries against
    /// a fresh registry read, bounded.
    fn reserve(
        &self,
        owner_id: &str,
        spec: InstanceSpec,
        credentials: Credentials,
    ) -> VpsliteResult<Instance> {
        for attempt in 1..=MAX_ALLOC_ATTEMPTS {
            let id = alloc::allocate_id(&self.inner.registry)?;
            let held = self.inner.registry.held_ports();
            let port = alloc::pick_free_port(&self.inner.ports, &held)
                .ok_or(VpsliteError::PoolExhausted("port"))?;

            let now = Utc::now();
            let instance = Instance {
                id,
                owner_id: owner_id.to_string(),
                state: InstanceState::Provisioning,
                endpoint: Endpoint {
                    host: self.inner.options.host_ip.clone(),
                    port,
                },
                credentials: credentials.clone(),
                backend_kind: self.inner.provisioner.kind(),
                backend_ref: None,
                spec: spec.clone(),
                created_at: now,
                last_updated: now,
            };

            match self.inner.registry.insert(instance.clone()) {
                Ok(()) => return Ok(instance),
                Err(VpsliteError::Conflict(_)) | Err(VpsliteError::DuplicateId(_)) => {
                    tracing::debug!(attempt, port, "lost allocation race, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(VpsliteError::PoolExhausted("port"))
    }

    /// Record the backend ref and promote to `Running`.
    async fn commit_running(
        &self,
        instance: Instance,
        outcome: ProvisionOutcome,
    ) -> VpsliteResult<ConnectInfo> {
        let id = &instance.id;
        for warning in &outcome.warnings {
            tracing::warn!(instance_id = %id, warning = %warning, "best-effort provisioning step failed");
        }
        self.inner
            .registry
            .set_backend_ref(id, outcome.backend_ref.clone())?;

        if !self.inner.registry.compare_and_set_state(
            id,
            InstanceState::Provisioning,
            InstanceState::Running,
        )? {
            // A concurrent delete won while we were provisioning. The
            // deleter may have read a record without our backend ref, so
            // tear the resource down ourselves.
            tracing::warn!(instance_id = %id, "instance deleted during provisioning");
            if let Err(e) = self.deprovision_with_retry(&outcome.backend_ref).await {
                tracing::warn!(
                    instance_id = %id,
                    error = %e,
                    "cleanup of concurrently deleted instance failed"
                );
            }
            return Err(VpsliteError::Conflict(format!(
                "instance {} was deleted during provisioning",
                id
            )));
        }

        tracing::info!(
            instance_id = %id,
            backend_ref = %outcome.backend_ref,
            endpoint = %instance.endpoint,
            "instance running"
        );
        Ok(ConnectInfo {
            id: instance.id,
            host: instance.endpoint.host,
            port: instance.endpoint.port,
            username: instance.credentials.username,
            password: instance.credentials.password,
            backend_kind: instance.backend_kind,
        })
    }

    /// Call provision with a timeout, retrying transient failures with
    /// doubling backoff up to the configured attempt count. A timeout is a
    /// transient failure.
    async fn provision_with_retry(&self, instance: &Instance) -> VpsliteResult<ProvisionOutcome> {
        let timeout = self.inner.options.provision_timeout;
        let max_attempts = self.inner.options.max_provision_attempts;
        let mut delay = RETRY_BASE_DELAY;
        let mut last_error = VpsliteError::transient("provisioning never attempted");

        for attempt in 1..=max_attempts {
            let call = self.inner.provisioner.provision(
                &instance.id,
                &instance.owner_id,
                &instance.spec,
                &instance.endpoint,
                &instance.credentials,
            );
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(outcome)) => return Ok(outcome),
                Ok(Err(e)) if e.is_transient() => last_error = e,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last_error =
                        VpsliteError::transient(format!("provision timed out after {:?}", timeout));
                }
            }
            if attempt < max_attempts {
                tracing::warn!(
                    instance_id = %instance.id,
                    attempt,
                    error = %last_error,
                    "transient provisioning failure, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(last_error)
    }

    /// Call deprovision with a timeout and bounded retries. Deprovision is
    /// idempotent by contract, so every failure is worth retrying.
    async fn deprovision_with_retry(
        &self,
        backend_ref: &crate::instance::BackendRef,
    ) -> VpsliteResult<()> {
        let timeout = self.inner.options.provision_timeout;
        let max_attempts = self.inner.options.max_provision_attempts;
        let mut delay = RETRY_BASE_DELAY;
        let mut last_error = VpsliteError::Deprovision("deprovisioning never attempted".into());

        for attempt in 1..=max_attempts {
            match tokio::time::timeout(timeout, self.inner.provisioner.deprovision(backend_ref))
                .await
            {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = VpsliteError::Deprovision(format!(
                        "deprovision timed out after {:?}",
                        timeout
                    ));
                }
            }
            if attempt < max_attempts {
                tracing::warn!(
                    backend_ref = %backend_ref,
                    attempt,
                    error = %last_error,
                    "deprovision failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(last_error)
    }
}

impl std::fmt::Debug for VpsliteRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VpsliteRuntime")
            .field("backend", &self.inner.provisioner.kind())
            .field("instances", &self.inner.registry.count())
            .finish()
    }
}

// Compile-time assertion that the runtime can be shared across tasks.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<VpsliteRuntime>;
};
