//! Core data types for instance lifecycle management.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{VpsliteError, VpsliteResult};
use crate::instance::state::InstanceState;

// ============================================================================
// INSTANCE ID
// ============================================================================

/// Instance identifier (8 lowercase hex characters).
///
/// Ids are random, checked against the registry's all-time id set at
/// allocation, and never reused once assigned — even after the instance's
/// tombstone is purged.
///
/// # Example
///
/// ```
/// use vpslite::instance::InstanceId;
///
/// let id = InstanceId::new_random();
/// assert_eq!(id.as_str().len(), 8);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    /// Length of an instance id (8 hex chars = 32 bits).
    pub const LENGTH: usize = 8;

    /// Generate a random candidate id.
    ///
    /// Uniqueness is not guaranteed by construction; the allocator checks
    /// the candidate against the registry and retries on collision.
    pub fn new_random() -> Self {
        let mut bytes = [0u8; Self::LENGTH / 2];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Parse an id from an existing string.
    ///
    /// Rejects anything that is not 8 lowercase hex characters.
    pub fn parse(s: &str) -> VpsliteResult<Self> {
        if Self::is_valid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(VpsliteError::InvalidArgument(format!(
                "malformed instance id '{}'",
                s
            )))
        }
    }

    /// Check whether a string is a valid instance id.
    pub fn is_valid(s: &str) -> bool {
        s.len() == Self::LENGTH
            && s.chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_uppercase())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// BACKEND TYPES
// ============================================================================

/// Provisioner variant that created (or will create) an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process fake used by tests and local development.
    Mock,
    /// Docker-CLI container backend.
    Container,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Mock => "mock",
            BackendKind::Container => "container",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = VpsliteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mock" => Ok(BackendKind::Mock),
            "container" => Ok(BackendKind::Container),
            other => Err(VpsliteError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque backend-specific resource handle (e.g. a container id).
///
/// Meaningful only to the provisioner that issued it; the core treats
/// it as a token to be handed back on deprovision/health calls.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendRef(String);

impl BackendRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for BackendRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackendRef({})", self.0)
    }
}

// ============================================================================
// RESOURCE SIZES
// ============================================================================

/// Byte size for memory and disk limits.
///
/// Parses the human-readable notation callers pass in ("512m", "5g",
/// "1024k", plain byte counts), so resource limits never travel through
/// the system as raw strings.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Bytes(pub u64);

impl Bytes {
    #[inline]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    #[inline]
    pub const fn from_kib(kib: u64) -> Self {
        Self(kib * 1024)
    }

    #[inline]
    pub const fn from_mib(mib: u64) -> Self {
        Self(mib * 1024 * 1024)
    }

    #[inline]
    pub const fn from_gib(gib: u64) -> Self {
        Self(gib * 1024 * 1024 * 1024)
    }

    #[inline]
    pub const fn as_bytes(&self) -> u64 {
        self.0
    }

    /// Parse a size string: decimal digits with an optional `b`/`k`/`m`/`g`
    /// suffix (case-insensitive).
    pub fn parse(s: &str) -> VpsliteResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VpsliteError::InvalidArgument("empty size".into()));
        }
        let (digits, multiplier) = match s.chars().last() {
            Some(c) if c.is_ascii_digit() => (s, 1u64),
            Some('b') | Some('B') => (&s[..s.len() - 1], 1),
            Some('k') | Some('K') => (&s[..s.len() - 1], 1024),
            Some('m') | Some('M') => (&s[..s.len() - 1], 1024 * 1024),
            Some('g') | Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
            _ => {
                return Err(VpsliteError::InvalidArgument(format!(
                    "unrecognized size '{}'",
                    s
                )));
            }
        };
        let value: u64 = digits.parse().map_err(|_| {
            VpsliteError::InvalidArgument(format!("unrecognized size '{}'", s))
        })?;
        value
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| VpsliteError::InvalidArgument(format!("size '{}' overflows", s)))
    }

    /// Parse an optional size; `None` and empty strings mean "no limit".
    pub fn parse_opt(s: Option<&str>) -> VpsliteResult<Option<Self>> {
        match s {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => Bytes::parse(s).map(Some),
        }
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1024 * 1024 * 1024 && self.0 % (1024 * 1024 * 1024) == 0 {
            write!(f, "{}g", self.0 / (1024 * 1024 * 1024))
        } else if self.0 >= 1024 * 1024 && self.0 % (1024 * 1024) == 0 {
            write!(f, "{}m", self.0 / (1024 * 1024))
        } else if self.0 >= 1024 && self.0 % 1024 == 0 {
            write!(f, "{}k", self.0 / 1024)
        } else {
            write!(f, "{}b", self.0)
        }
    }
}

// ============================================================================
// ENDPOINT & CREDENTIALS
// ============================================================================

/// SSH-reachable address of an instance.
///
/// The port is exclusively owned by this instance while it is in any
/// non-terminal state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Login credentials, generated once at creation and never regenerated.
///
/// The password is redacted when the instance reaches `Deleted`, and is
/// kept out of `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Clear the password, keeping the username for the audit record.
    pub fn redact(&mut self) {
        self.password.clear();
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// SPEC & RECORDS
// ============================================================================

/// Caller-requested instance parameters, retained verbatim for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub os_image: String,
    pub ram: Option<Bytes>,
    pub disk: Option<Bytes>,
}

/// Full instance record as held by the registry.
///
/// Mutated only through the registry's insert and compare-and-set
/// operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub owner_id: String,
    pub state: InstanceState,
    pub endpoint: Endpoint,
    pub credentials: Credentials,
    pub backend_kind: BackendKind,
    pub backend_ref: Option<BackendRef>,
    pub spec: InstanceSpec,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Instance {
    /// Project the public view returned by list/info operations.
    pub fn to_view(&self) -> InstanceView {
        InstanceView {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            state: self.state,
            host: self.endpoint.host.clone(),
            port: self.endpoint.port,
            username: self.credentials.username.clone(),
            backend_kind: self.backend_kind,
            os_image: self.spec.os_image.clone(),
            created_at: self.created_at,
            last_updated: self.last_updated,
        }
    }
}

/// Public projection of an instance (no password).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceView {
    pub id: InstanceId,
    pub owner_id: String,
    pub state: InstanceState,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub backend_kind: BackendKind,
    pub os_image: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Connection descriptor returned by a successful create.
///
/// This is the only place the password is handed out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub id: InstanceId,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub backend_kind: BackendKind,
}
