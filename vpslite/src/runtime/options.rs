//! Configuration for the vpslite runtime.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{VpsliteError, VpsliteResult};
use crate::instance::BackendKind;

/// Environment variable names recognized by `VpsliteOptions::from_env`.
pub mod envs {
    /// Provisioner variant: "mock" or "container".
    pub const BACKEND: &str = "BACKEND";
    /// Advertised public host for SSH endpoints.
    pub const HOST_IP: &str = "HOST_IP";
    /// Base of the host-side SSH port pool (ports are base+1..=base+size).
    pub const SSH_BASE_PORT: &str = "SSH_BASE_PORT";
    /// Size of the port pool.
    pub const SSH_PORT_POOL: &str = "SSH_PORT_POOL";
    /// Login username provisioned into guests.
    pub const VPS_USERNAME: &str = "VPS_USERNAME";
    /// Docker binary used by the container backend.
    pub const DOCKER_BIN: &str = "DOCKER_BIN";
    /// Registry snapshot file; unset means in-memory only.
    pub const VPSLITE_STATE: &str = "VPSLITE_STATE";
}

/// Defaults matching the historical deployment.
pub mod defaults {
    pub const HOST_IP: &str = "127.0.0.1";
    pub const SSH_BASE_PORT: u16 = 22000;
    pub const POOL_SIZE: u16 = 1000;
    pub const USERNAME: &str = "root";
    pub const DOCKER_BIN: &str = "docker";
    pub const PROVISION_TIMEOUT_SECS: u64 = 60;
    pub const MAX_PROVISION_ATTEMPTS: u32 = 3;
    pub const RETENTION_SECS: u64 = 24 * 60 * 60;
}

/// Runtime configuration.
///
/// Built from `Default`, `from_env`, or assembled by an embedding
/// application; validated once at runtime construction so misconfiguration
/// fails at startup rather than on first use.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VpsliteOptions {
    /// Provisioner variant, selected once at startup.
    pub backend: BackendKind,

    /// Advertised public host for SSH endpoints.
    pub host_ip: String,

    /// Port pool base; allocatable ports are `base+1..=base+size`.
    pub ssh_base_port: u16,

    /// Port pool size.
    pub port_pool_size: u16,

    /// Username provisioned into guests and returned to callers.
    pub username: String,

    /// Generated password length.
    pub password_length: usize,

    /// Upper bound on a single provision/deprovision backend call.
    pub provision_timeout: Duration,

    /// Bounded attempt count for transient backend failures.
    pub max_provision_attempts: u32,

    /// How long terminal tombstones are retained before `purge_expired`
    /// removes them.
    pub retention_secs: u64,

    /// Docker binary for the container backend.
    pub docker_bin: PathBuf,

    /// Registry snapshot file; `None` keeps state in memory only.
    pub state_file: Option<PathBuf>,
}

impl Default for VpsliteOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::Mock,
            host_ip: defaults::HOST_IP.to_string(),
            ssh_base_port: defaults::SSH_BASE_PORT,
            port_pool_size: defaults::POOL_SIZE,
            username: defaults::USERNAME.to_string(),
            password_length: crate::secret::DEFAULT_PASSWORD_LENGTH,
            provision_timeout: Duration::from_secs(defaults::PROVISION_TIMEOUT_SECS),
            max_provision_attempts: defaults::MAX_PROVISION_ATTEMPTS,
            retention_secs: defaults::RETENTION_SECS,
            docker_bin: PathBuf::from(defaults::DOCKER_BIN),
            state_file: None,
        }
    }
}

impl VpsliteOptions {
    /// Build options from the environment.
    ///
    /// # Errors
    ///
    /// `UnknownBackend` for an unrecognized `BACKEND` value and
    /// `InvalidArgument` for unparsable numbers — both at startup, not on
    /// first use.
    pub fn from_env() -> VpsliteResult<Self> {
        let mut options = Self::default();

        if let Ok(backend) = std::env::var(envs::BACKEND) {
            options.backend = backend.parse()?;
        }
        if let Ok(host_ip) = std::env::var(envs::HOST_IP) {
            options.host_ip = host_ip;
        }
        if let Ok(port) = std::env::var(envs::SSH_BASE_PORT) {
            options.ssh_base_port = parse_number(envs::SSH_BASE_PORT, &port)?;
        }
        if let Ok(size) = std::env::var(envs::SSH_PORT_POOL) {
            options.port_pool_size = parse_number(envs::SSH_PORT_POOL, &size)?;
        }
        if let Ok(username) = std::env::var(envs::VPS_USERNAME) {
            options.username = username;
        }
        if let Ok(bin) = std::env::var(envs::DOCKER_BIN) {
            options.docker_bin = PathBuf::from(bin);
        }
        if let Ok(state) = std::env::var(envs::VPSLITE_STATE) {
            options.state_file = Some(PathBuf::from(state));
        }

        options.validate()?;
        Ok(options)
    }

    /// Reject misconfiguration before any state exists.
    pub fn validate(&self) -> VpsliteResult<()> {
        if self.host_ip.trim().is_empty() {
            return Err(VpsliteError::InvalidArgument("HOST_IP is empty".into()));
        }
        if self.username.trim().is_empty() {
            return Err(VpsliteError::InvalidArgument("username is empty".into()));
        }
        if self.password_length == 0 {
            return Err(VpsliteError::InvalidArgument(
                "password length must be positive".into(),
            ));
        }
        if self.max_provision_attempts == 0 {
            return Err(VpsliteError::InvalidArgument(
                "max provision attempts must be positive".into(),
            ));
        }
        // PortRange re-checks, but failing here keeps all startup
        // validation in one place.
        crate::alloc::PortRange::new(self.ssh_base_port, self.port_pool_size).map(|_| ())
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs as i64)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> VpsliteResult<T> {
    value.parse().map_err(|_| {
        VpsliteError::InvalidArgument(format!("{} has invalid value '{}'", name, value))
    })
}
