//! Identifier and port allocation.
//!
//! Candidates are picked at random, but uniqueness is enforced against the
//! registry, never assumed by construction: id candidates are checked
//! against the all-time id set, and a port only becomes owned when the
//! registry insert (the atomic claim) succeeds. Callers losing that race
//! retry against a fresh registry read.

use std::collections::HashSet;

use rand::Rng;

use crate::errors::{VpsliteError, VpsliteResult};
use crate::instance::InstanceId;
use crate::registry::InstanceRegistry;

/// Bounded retry count for id generation and port claim races.
pub const MAX_ALLOC_ATTEMPTS: usize = 16;

/// Bounded host-side SSH port pool.
///
/// Allocatable ports are `(base, base + size]`, matching the historical
/// `SSH_BASE_PORT + offset` scheme where offsets start at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRange {
    base: u16,
    size: u16,
}

impl PortRange {
    pub fn new(base: u16, size: u16) -> VpsliteResult<Self> {
        if size == 0 {
            return Err(VpsliteError::InvalidArgument(
                "port pool size must be positive".into(),
            ));
        }
        if base.checked_add(size).is_none() {
            return Err(VpsliteError::InvalidArgument(format!(
                "port pool {}+{} exceeds 65535",
                base, size
            )));
        }
        Ok(Self { base, size })
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn contains(&self, port: u16) -> bool {
        port > self.base && port <= self.base + self.size
    }

    fn iter(&self) -> impl Iterator<Item = u16> {
        let base = self.base;
        (1..=self.size).map(move |offset| base + offset)
    }
}

/// Pick a random port from the pool that no non-terminal instance holds.
///
/// Returns `None` when the pool is exhausted. The returned port is only a
/// candidate; the registry insert is what claims it.
pub fn pick_free_port(range: &PortRange, held: &HashSet<u16>) -> Option<u16> {
    let free: Vec<u16> = range.iter().filter(|p| !held.contains(p)).collect();
    if free.is_empty() {
        return None;
    }
    let index = rand::rng().random_range(0..free.len());
    Some(free[index])
}

/// Allocate an instance id not present in the registry, past or present.
///
/// With 32 bits of randomness collisions are rare; the bounded retry turns
/// a pathological registry (or broken entropy) into an explicit error
/// instead of a spin.
pub fn allocate_id(registry: &InstanceRegistry) -> VpsliteResult<InstanceId> {
    for _ in 0..MAX_ALLOC_ATTEMPTS {
        let candidate = InstanceId::new_random();
        if !registry.id_taken(&candidate) {
            return Ok(candidate);
        }
        tracing::debug!(candidate = %candidate, "id collision, retrying");
    }
    Err(VpsliteError::PoolExhausted("id"))
}
