//! Authoritative instance registry.
//!
//! Single source of truth for every instance and its state. All mutation
//! goes through `insert` and `compare_and_set_state`, both atomic with
//! respect to concurrent readers and writers; no reader ever observes a
//! half-updated record. The port pool is a derived view over non-terminal
//! instances, not an independently mutable set, so there is no second
//! source of truth to drift.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::{VpsliteError, VpsliteResult};
use crate::instance::{Instance, InstanceId, InstanceState};

/// Thread-safe registry of instance records.
///
/// Cloneable via `Arc`; all clones share the same store. Uses an `RwLock`
/// for concurrent reads (list/get) with exclusive writes (insert/CAS).
///
/// With a snapshot path configured, every committed mutation is persisted
/// to disk (write-to-temp then rename), and `open` restores the store on
/// startup. Tombstones of deleted/failed instances are retained until
/// `purge_terminal`; their ids are retired forever.
#[derive(Clone, Debug)]
pub struct InstanceRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Debug)]
struct RegistryInner {
    instances: HashMap<InstanceId, Instance>,
    /// Ids ever assigned, including purged tombstones. Never shrinks.
    retired: HashSet<InstanceId>,
    snapshot: Option<PathBuf>,
}

/// On-disk snapshot format.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    instances: Vec<Instance>,
    retired: Vec<InstanceId>,
}

impl InstanceRegistry {
    /// Create an empty in-memory registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                instances: HashMap::new(),
                retired: HashSet::new(),
                snapshot: None,
            })),
        }
    }

    /// Open a registry backed by a snapshot file, restoring any existing
    /// state.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or parsed.
    pub fn open(path: PathBuf) -> VpsliteResult<Self> {
        let (instances, retired) = if path.exists() {
            let data = std::fs::read(&path).map_err(|e| {
                VpsliteError::Internal(format!(
                    "failed to read registry snapshot {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let snapshot: Snapshot = serde_json::from_slice(&data).map_err(|e| {
                VpsliteError::Internal(format!(
                    "corrupt registry snapshot {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let instances: HashMap<InstanceId, Instance> = snapshot
                .instances
                .into_iter()
                .map(|i| (i.id.clone(), i))
                .collect();
            // Live ids count as retired too: an id is never reused.
            let mut retired: HashSet<InstanceId> = snapshot.retired.into_iter().collect();
            retired.extend(instances.keys().cloned());
            (instances, retired)
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    VpsliteError::Internal(format!(
                        "failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            (HashMap::new(), HashSet::new())
        };

        tracing::debug!(
            path = %path.display(),
            instances = instances.len(),
            "opened registry snapshot"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                instances,
                retired,
                snapshot: Some(path),
            })),
        })
    }

    /// Insert a freshly allocated instance.
    ///
    /// This is the atomic claim for both the id and the port: under one
    /// lock it rejects ids ever seen before (`DuplicateId`) and ports held
    /// by any non-terminal instance (`Conflict`). A caller losing the port
    /// race retries against a fresh registry read.
    pub fn insert(&self, instance: Instance) -> VpsliteResult<()> {
        let mut inner = self.inner.write();

        if inner.instances.contains_key(&instance.id) || inner.retired.contains(&instance.id) {
            return Err(VpsliteError::DuplicateId(instance.id.to_string()));
        }

        let port = instance.endpoint.port;
        if let Some(holder) = inner
            .instances
            .values()
            .find(|i| i.state.holds_port() && i.endpoint.port == port)
        {
            return Err(VpsliteError::Conflict(format!(
                "port {} already held by instance {}",
                port, holder.id
            )));
        }

        tracing::debug!(
            instance_id = %instance.id,
            owner = %instance.owner_id,
            port = port,
            "registering instance"
        );
        let id = instance.id.clone();
        inner.retired.insert(id.clone());
        inner.instances.insert(id, instance);
        inner.persist()
    }

    /// Atomically transition an instance's state.
    ///
    /// Returns `Ok(false)` without committing when the current state does
    /// not match `expected` (a concurrent modification won). Credentials
    /// are redacted on entry to `Deleted`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the id is unknown; `Internal` if the edge itself is
    /// not part of the state machine (an invariant violation, not a race)
    /// or if the snapshot cannot be written — in which case the in-memory
    /// record is rolled back, nothing is committed.
    pub fn compare_and_set_state(
        &self,
        id: &InstanceId,
        expected: InstanceState,
        new: InstanceState,
    ) -> VpsliteResult<bool> {
        let mut inner = self.inner.write();
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| VpsliteError::NotFound(id.to_string()))?;

        if instance.state != expected {
            tracing::debug!(
                instance_id = %id,
                expected = %expected,
                actual = %instance.state,
                "compare-and-set lost"
            );
            return Ok(false);
        }
        if !expected.can_transition_to(new) {
            return Err(VpsliteError::Internal(format!(
                "invalid transition {} -> {} for instance {}",
                expected, new, id
            )));
        }

        tracing::debug!(instance_id = %id, from = %expected, to = %new, "state transition");
        let before = instance.clone();
        instance.state = new;
        instance.last_updated = Utc::now();
        if new == InstanceState::Deleted {
            instance.credentials.redact();
        }
        // A transition only commits if it also persists; otherwise memory
        // and snapshot would diverge behind the caller's back.
        if let Err(e) = inner.persist() {
            if let Some(slot) = inner.instances.get_mut(id) {
                *slot = before;
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Record the backend handle once provisioning has created a resource.
    pub fn set_backend_ref(
        &self,
        id: &InstanceId,
        backend_ref: crate::instance::BackendRef,
    ) -> VpsliteResult<()> {
        let mut inner = self.inner.write();
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| VpsliteError::NotFound(id.to_string()))?;
        instance.backend_ref = Some(backend_ref);
        instance.last_updated = Utc::now();
        inner.persist()
    }

    /// Get a copy of an instance record, tombstones included.
    pub fn get(&self, id: &InstanceId) -> Option<Instance> {
        self.inner.read().instances.get(id).cloned()
    }

    /// List instances, newest first, optionally filtered by owner.
    ///
    /// Terminal tombstones are excluded unless `include_terminal` is set.
    pub fn list(&self, owner: Option<&str>, include_terminal: bool) -> Vec<Instance> {
        let inner = self.inner.read();
        let mut result: Vec<Instance> = inner
            .instances
            .values()
            .filter(|i| include_terminal || !i.state.is_terminal())
            .filter(|i| owner.is_none_or(|o| i.owner_id == o))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    /// Ports currently held by non-terminal instances.
    ///
    /// This is the port pool's source of truth; there is no separate
    /// allocated-port set to fall out of sync.
    pub fn held_ports(&self) -> HashSet<u16> {
        self.inner
            .read()
            .instances
            .values()
            .filter(|i| i.state.holds_port())
            .map(|i| i.endpoint.port)
            .collect()
    }

    /// Whether an id has ever been assigned (live or retired).
    pub fn id_taken(&self, id: &InstanceId) -> bool {
        let inner = self.inner.read();
        inner.instances.contains_key(id) || inner.retired.contains(id)
    }

    /// Idempotent release hook, called when an instance reaches a terminal
    /// state. The pool is derived from the registry, so the release itself
    /// happened with the state transition; this logs it for audit.
    pub fn release_port(&self, port: u16) {
        let still_held = self
            .inner
            .read()
            .instances
            .values()
            .any(|i| i.state.holds_port() && i.endpoint.port == port);
        if still_held {
            tracing::warn!(port = port, "port released while still held");
        } else {
            tracing::debug!(port = port, "port released");
        }
    }

    /// Remove terminal tombstones older than the retention window.
    ///
    /// Purged ids stay in the retired set: an id is never reused, even
    /// after its audit record is gone.
    pub fn purge_terminal(&self, older_than: Duration) -> VpsliteResult<usize> {
        let cutoff = Utc::now() - older_than;
        let mut inner = self.inner.write();
        let expired: Vec<InstanceId> = inner
            .instances
            .values()
            .filter(|i| i.state.is_terminal() && i.last_updated < cutoff)
            .map(|i| i.id.clone())
            .collect();
        for id in &expired {
            tracing::debug!(instance_id = %id, "purging tombstone");
            inner.instances.remove(id);
        }
        if !expired.is_empty() {
            inner.persist()?;
        }
        Ok(expired.len())
    }

    /// Number of records currently held, tombstones included.
    pub fn count(&self) -> usize {
        self.inner.read().instances.len()
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryInner {
    /// Persist the store to the snapshot file, if one is configured.
    ///
    /// Called with the write lock held, so snapshots always reflect a
    /// committed state. Writes to a sibling temp file and renames.
    fn persist(&self) -> VpsliteResult<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let snapshot = Snapshot {
            instances: self.instances.values().cloned().collect(),
            retired: self.retired.iter().cloned().collect(),
        };
        let data = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| VpsliteError::Internal(format!("failed to encode snapshot: {}", e)))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data).map_err(|e| {
            VpsliteError::Internal(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        std::fs::rename(&tmp, path).map_err(|e| {
            VpsliteError::Internal(format!("failed to commit {}: {}", path.display(), e))
        })
    }
}
