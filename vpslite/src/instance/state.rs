//! Instance lifecycle state machine.
//!
//! Defines the possible states of an instance and the valid transitions
//! between them.

use serde::{Deserialize, Serialize};

/// Lifecycle state of an instance.
///
/// State machine:
/// ```text
/// create  → Provisioning → Running → Deleting → Deleted (terminal)
/// any state may transition to Failed (terminal) on unrecoverable error;
/// Failed instances may still be cleaned up (Failed → Deleting).
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Reserved in the registry; backend creation in flight.
    Provisioning,

    /// Backend resource exists and the SSH endpoint is live.
    Running,

    /// Deletion in flight; the backend resource may still exist.
    Deleting,

    /// Tombstone: deletion completed, record retained for audit.
    Deleted,

    /// Tombstone: unrecoverable error, record retained for audit.
    Failed,
}

impl InstanceState {
    /// Terminal states no longer hold their port.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Deleted | InstanceState::Failed)
    }

    /// States whose port is exclusively held (the port-pool view).
    pub fn holds_port(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if delete may begin from this state.
    ///
    /// Running is the normal case; Provisioning and Failed are permitted
    /// so stuck instances can be cleaned up. Deleting means another
    /// deletion is already in flight.
    pub fn can_delete(&self) -> bool {
        matches!(
            self,
            InstanceState::Running | InstanceState::Provisioning | InstanceState::Failed
        )
    }

    /// Check if a transition to the target state is valid.
    pub fn can_transition_to(&self, target: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, target),
            // Provisioning → Running (backend up), Deleting (cleanup of a
            // stuck create), or Failed (backend gave up)
            (Provisioning, Running)
                | (Provisioning, Deleting)
                | (Provisioning, Failed)
                // Running → Deleting (normal teardown) or Failed (backend died)
                | (Running, Deleting)
                | (Running, Failed)
                // Deleting → Deleted (teardown complete) or Failed
                | (Deleting, Deleted)
                | (Deleting, Failed)
                // Failed → Deleting (operator cleanup of the backend resource)
                | (Failed, Deleting)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Provisioning => "provisioning",
            InstanceState::Running => "running",
            InstanceState::Deleting => "deleting",
            InstanceState::Deleted => "deleted",
            InstanceState::Failed => "failed",
        }
    }
}

impl std::str::FromStr for InstanceState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(InstanceState::Provisioning),
            "running" => Ok(InstanceState::Running),
            "deleting" => Ok(InstanceState::Deleting),
            "deleted" => Ok(InstanceState::Deleted),
            "failed" => Ok(InstanceState::Failed),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
