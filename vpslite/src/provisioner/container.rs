//! Docker-CLI container backend.
//!
//! Containers expose SSH on 22, mapped to the instance's host port. Every
//! resource is labeled with the instance id and owner so a retried
//! provision finds a half-created container instead of duplicating it,
//! and so out-of-band reconciliation can match backend resources to
//! registry records.

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;

use crate::errors::{VpsliteError, VpsliteResult};
use crate::instance::{BackendKind, BackendRef, Credentials, Endpoint, InstanceId, InstanceSpec};
use crate::provisioner::{HealthStatus, ProvisionOutcome, Provisioner};

/// Label keys applied to every container this backend creates.
pub const LABEL_INSTANCE: &str = "vpslite.instance";
pub const LABEL_OWNER: &str = "vpslite.owner";

/// Container provisioner driving the docker CLI.
#[derive(Debug)]
pub struct ContainerProvisioner {
    docker_bin: PathBuf,
}

impl ContainerProvisioner {
    pub fn new(docker_bin: PathBuf) -> Self {
        Self { docker_bin }
    }

    async fn docker(&self, args: &[&str]) -> VpsliteResult<Output> {
        tracing::debug!(bin = %self.docker_bin.display(), ?args, "running docker");
        tokio::process::Command::new(&self.docker_bin)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                VpsliteError::transient(format!(
                    "failed to run {}: {}",
                    self.docker_bin.display(),
                    e
                ))
            })
    }

    /// Find a container a prior provision attempt may have created.
    async fn find_existing(&self, id: &InstanceId) -> VpsliteResult<Option<BackendRef>> {
        let filter = format!("label={}={}", LABEL_INSTANCE, id);
        let output = self.docker(&["ps", "-aq", "--filter", &filter]).await?;
        if !output.status.success() {
            return Err(classify_run_error(&output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .next()
            .map(|line| BackendRef::new(line.trim())))
    }

    /// Best-effort in-guest root password set. Some images lack chpasswd;
    /// that is a warning, not a failure.
    async fn set_root_password(
        &self,
        backend_ref: &BackendRef,
        credentials: &Credentials,
    ) -> Option<String> {
        let cmd = format!(
            "echo {}:{} | chpasswd",
            credentials.username, credentials.password
        );
        match self
            .docker(&["exec", backend_ref.as_str(), "sh", "-c", &cmd])
            .await
        {
            Ok(output) if output.status.success() => None,
            Ok(output) => Some(format!(
                "in-guest password set failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Err(e) => Some(format!("in-guest password set failed: {}", e)),
        }
    }
}

/// Map a failed `docker run` to the error taxonomy. A missing daemon is
/// worth retrying; anything else (bad image, bad flags) is permanent.
fn classify_run_error(output: &Output) -> VpsliteError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = format!("docker exited with {}: {}", output.status, stderr.trim());
    if stderr.contains("Cannot connect to the Docker daemon") {
        VpsliteError::transient(message)
    } else {
        VpsliteError::permanent(message)
    }
}

#[async_trait]
impl Provisioner for ContainerProvisioner {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    async fn provision(
        &self,
        id: &InstanceId,
        owner_id: &str,
        spec: &InstanceSpec,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> VpsliteResult<ProvisionOutcome> {
        let mut warnings = Vec::new();

        // Retry safety: reuse a container from a prior attempt.
        if let Some(existing) = self.find_existing(id).await? {
            tracing::debug!(instance_id = %id, backend_ref = %existing, "reusing existing container");
            if let Some(warning) = self.set_root_password(&existing, credentials).await {
                warnings.push(warning);
            }
            return Ok(ProvisionOutcome {
                backend_ref: existing,
                warnings,
            });
        }

        // Best-effort pull; a warm local cache makes this skippable.
        match self.docker(&["pull", &spec.os_image]).await {
            Ok(output) if output.status.success() => {}
            Ok(output) => warnings.push(format!(
                "image pull failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Err(e) => warnings.push(format!("image pull failed: {}", e)),
        }

        let instance_label = format!("{}={}", LABEL_INSTANCE, id);
        let owner_label = format!("{}={}", LABEL_OWNER, owner_id);
        let port_map = format!("{}:22", endpoint.port);
        let password_env = format!("PASSWORD={}", credentials.password);
        let mut args = vec![
            "run",
            "-d",
            "-t",
            "--label",
            &instance_label,
            "--label",
            &owner_label,
            "-p",
            &port_map,
            "-e",
            &password_env,
        ];
        let memory;
        if let Some(ram) = spec.ram {
            memory = ram.to_string();
            args.extend_from_slice(&["--memory", &memory]);
        }
        args.push(&spec.os_image);

        let output = self.docker(&args).await?;
        if !output.status.success() {
            return Err(classify_run_error(&output));
        }
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(VpsliteError::permanent("docker run returned no container id"));
        }
        let backend_ref = BackendRef::new(container_id);

        if let Some(warning) = self.set_root_password(&backend_ref, credentials).await {
            warnings.push(warning);
        }

        Ok(ProvisionOutcome {
            backend_ref,
            warnings,
        })
    }

    async fn deprovision(&self, backend_ref: &BackendRef) -> VpsliteResult<()> {
        let output = self.docker(&["rm", "-f", backend_ref.as_str()]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Resource already gone: idempotent success.
        if stderr.contains("No such container") {
            return Ok(());
        }
        Err(VpsliteError::Deprovision(format!(
            "docker rm exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }

    async fn health(&self, backend_ref: &BackendRef) -> HealthStatus {
        let output = self
            .docker(&[
                "inspect",
                "-f",
                "{{.State.Running}}",
                backend_ref.as_str(),
            ])
            .await;
        match output {
            Ok(output) if output.status.success() => {
                match String::from_utf8_lossy(&output.stdout).trim() {
                    "true" => HealthStatus::Alive,
                    "false" => HealthStatus::Dead,
                    _ => HealthStatus::Unknown,
                }
            }
            Ok(output) => {
                if String::from_utf8_lossy(&output.stderr).contains("No such") {
                    HealthStatus::Dead
                } else {
                    HealthStatus::Unknown
                }
            }
            Err(_) => HealthStatus::Unknown,
        }
    }
}
