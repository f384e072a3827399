//! Resource arbiter: exclusive device ownership with port-conflict detection.
//!
//! Two drivers silently sharing one electrical pin would corrupt each
//! other's state, so every driver borrows its device identity from the
//! [`Arbiter`] before touching hardware. A borrow is refused when the
//! identity is already held, and also when its port mask intersects the
//! ports of any *other* currently-borrowed identity, the subtler case
//! where two different device identities electrically alias the same pin.
//!
//! All checks and the borrowed-mark happen atomically under one registry
//! lock, so two borrowers can never both pass the conflict scan. The scan is
//! linear in the number of borrowed devices, which on the targeted systems
//! is tens at most.
//!
//! The arbiter is an explicit service value: construct one per process (or
//! per test) and pass it to driver constructors. [`Arbiter`] is a cheap
//! `Clone` handle over shared state.

use crate::error::{PeriphError, Result};
use crate::topology::{DeviceId, PortMask, Topology};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

struct ArbiterInner {
    topology: Topology,
    // Identities absent from the map are implicitly free. Entries are
    // created lazily on first borrow and toggled thereafter.
    in_use: Mutex<HashMap<DeviceId, bool>>,
}

impl ArbiterInner {
    fn release(&self, id: DeviceId) {
        let mut in_use = self.in_use.lock();
        if let Some(flag) = in_use.get_mut(&id) {
            *flag = false;
            debug!(device = %id, "device released");
        }
    }
}

/// Registry of currently-borrowed device identities.
#[derive(Clone)]
pub struct Arbiter {
    inner: Arc<ArbiterInner>,
}

impl Arbiter {
    /// Create an arbiter over a fixed topology. Every device starts free.
    pub fn new(topology: Topology) -> Self {
        Self {
            inner: Arc::new(ArbiterInner {
                topology,
                in_use: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The topology this arbiter enforces.
    pub fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    /// Exclusively borrow `id`.
    ///
    /// Fails with [`PeriphError::DeviceAlreadyInUse`] if `id` is currently
    /// borrowed, or [`PeriphError::PortAlreadyInUse`] if its ports intersect
    /// those of any other borrowed identity. The returned token frees the
    /// device when dropped.
    pub fn borrow(&self, id: DeviceId) -> Result<OwnershipToken> {
        let mut in_use = self.inner.in_use.lock();
        if in_use.get(&id).copied().unwrap_or(false) {
            return Err(PeriphError::DeviceAlreadyInUse(id));
        }
        let ports = self.inner.topology.ports_of(id);
        if let Some(owner) = overlapping_owner_locked(&in_use, &self.inner.topology, ports) {
            return Err(PeriphError::PortAlreadyInUse(owner));
        }
        in_use.insert(id, true);
        debug!(device = %id, "device borrowed");
        Ok(OwnershipToken {
            id,
            arbiter: Arc::clone(&self.inner),
        })
    }

    /// The borrowed device (if any) whose port mask contains `port`.
    pub fn port_owner(&self, port: u8) -> Option<DeviceId> {
        self.overlapping_owner(PortMask::single(port))
    }

    /// The borrowed device (if any) whose port mask intersects `ports`.
    pub fn overlapping_owner(&self, ports: PortMask) -> Option<DeviceId> {
        let in_use = self.inner.in_use.lock();
        overlapping_owner_locked(&in_use, &self.inner.topology, ports)
    }

    /// Ports of `id`, only while it is borrowed.
    pub fn device_ports_in_use(&self, id: DeviceId) -> Option<PortMask> {
        let in_use = self.inner.in_use.lock();
        if in_use.get(&id).copied().unwrap_or(false) {
            Some(self.inner.topology.ports_of(id))
        } else {
            None
        }
    }

    /// Whether `id` is currently borrowed.
    pub fn is_in_use(&self, id: DeviceId) -> bool {
        self.inner.in_use.lock().get(&id).copied().unwrap_or(false)
    }
}

fn overlapping_owner_locked(
    in_use: &HashMap<DeviceId, bool>,
    topology: &Topology,
    ports: PortMask,
) -> Option<DeviceId> {
    if ports.is_empty() {
        return None;
    }
    in_use
        .iter()
        .filter(|(_, used)| **used)
        .map(|(id, _)| *id)
        .find(|id| topology.ports_of(*id).intersects(ports))
}

/// Scoped, non-copyable claim on one device identity.
///
/// Exactly one live token may exist per [`DeviceId`]; dropping it
/// unconditionally frees the device. Ownership transfers by move only.
pub struct OwnershipToken {
    id: DeviceId,
    arbiter: Arc<ArbiterInner>,
}

impl OwnershipToken {
    /// The identity this token holds.
    pub fn id(&self) -> DeviceId {
        self.id
    }
}

impl fmt::Debug for OwnershipToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnershipToken")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Drop for OwnershipToken {
    fn drop(&mut self) {
        self.arbiter.release(self.id);
    }
}
