//! In-process fake backend.
//!
//! Deterministic enough for the full test suite: failure injection for
//! transient/permanent/deprovision errors, a delay knob for timeout tests,
//! and call counters for retry assertions.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::{VpsliteError, VpsliteResult};
use crate::instance::{BackendKind, BackendRef, Credentials, Endpoint, InstanceId, InstanceSpec};
use crate::provisioner::{HealthStatus, ProvisionOutcome, Provisioner};

/// Which call the next injected failure hits, and how it fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureMode {
    /// Next provision fails with a transient error.
    Transient,
    /// Next provision fails with a permanent error.
    Permanent,
    /// Next deprovision fails.
    Deprovision,
}

#[derive(Debug)]
struct MockResource {
    instance: InstanceId,
    alive: bool,
}

#[derive(Debug, Default)]
struct MockState {
    live: HashMap<BackendRef, MockResource>,
    by_instance: HashMap<InstanceId, BackendRef>,
    fail_next: Vec<FailureMode>,
    warn_next: Vec<String>,
    provision_delay: Option<Duration>,
    provision_calls: usize,
    deprovision_calls: usize,
}

/// Mock provisioner.
#[derive(Debug, Default)]
pub struct MockProvisioner {
    state: Mutex<MockState>,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for an upcoming call. Queued failures are consumed
    /// in order, one per matching call.
    pub fn fail_next(&self, mode: FailureMode) {
        self.state.lock().fail_next.push(mode);
    }

    /// Attach a best-effort-step warning to the next successful provision.
    /// Queued warnings are all drained by that one call.
    pub fn warn_next(&self, warning: impl Into<String>) {
        self.state.lock().warn_next.push(warning.into());
    }

    /// Make every provision call sleep first (for timeout tests).
    pub fn set_provision_delay(&self, delay: Duration) {
        self.state.lock().provision_delay = Some(delay);
    }

    /// Simulate a crashed backend resource.
    pub fn kill(&self, backend_ref: &BackendRef) {
        if let Some(resource) = self.state.lock().live.get_mut(backend_ref) {
            resource.alive = false;
        }
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn provision_calls(&self) -> usize {
        self.state.lock().provision_calls
    }

    pub fn deprovision_calls(&self) -> usize {
        self.state.lock().deprovision_calls
    }

    fn take_failure(&self, want: fn(&FailureMode) -> bool) -> Option<FailureMode> {
        let mut state = self.state.lock();
        let index = state.fail_next.iter().position(want)?;
        Some(state.fail_next.remove(index))
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    async fn provision(
        &self,
        id: &InstanceId,
        _owner_id: &str,
        _spec: &InstanceSpec,
        _endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> VpsliteResult<ProvisionOutcome> {
        let delay = {
            let mut state = self.state.lock();
            state.provision_calls += 1;
            state.provision_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(mode) =
            self.take_failure(|m| matches!(m, FailureMode::Transient | FailureMode::Permanent))
        {
            return Err(match mode {
                FailureMode::Transient => VpsliteError::transient("injected transient failure"),
                _ => VpsliteError::permanent("injected permanent failure"),
            });
        }

        let mut state = self.state.lock();
        let warnings = std::mem::take(&mut state.warn_next);

        // Retry safety: a prior attempt for this instance reuses its resource.
        if let Some(existing) = state.by_instance.get(id) {
            return Ok(ProvisionOutcome {
                backend_ref: existing.clone(),
                warnings,
            });
        }

        let backend_ref = BackendRef::new(format!("mock-{}", id));
        state.live.insert(
            backend_ref.clone(),
            MockResource {
                instance: id.clone(),
                alive: true,
            },
        );
        state.by_instance.insert(id.clone(), backend_ref.clone());
        Ok(ProvisionOutcome {
            backend_ref,
            warnings,
        })
    }

    async fn deprovision(&self, backend_ref: &BackendRef) -> VpsliteResult<()> {
        self.state.lock().deprovision_calls += 1;

        if self
            .take_failure(|m| matches!(m, FailureMode::Deprovision))
            .is_some()
        {
            return Err(VpsliteError::Deprovision("injected failure".into()));
        }

        let mut state = self.state.lock();
        if let Some(resource) = state.live.remove(backend_ref) {
            state.by_instance.remove(&resource.instance);
        }
        // Already-removed resources are success, not error.
        Ok(())
    }

    async fn health(&self, backend_ref: &BackendRef) -> HealthStatus {
        match self.state.lock().live.get(backend_ref) {
            Some(resource) if resource.alive => HealthStatus::Alive,
            Some(_) => HealthStatus::Dead,
            None => HealthStatus::Dead,
        }
    }
}
