//! Service registry implementation
//!
//! A fixed-capacity name-to-endpoint table shared by every protocol
//! handler. Entries are found and placed by a simple linear scan; with at
//! most a few dozen live names this beats maintaining an index, and it
//! reproduces the slot-reuse order of the system being emulated.
//!
//! Entries are never removed while the broker runs. The owning process of
//! a registered endpoint may die and leave a stale name behind; that is a
//! known limitation of the emulated system, preserved deliberately.

use crate::port::{PortName, PortRight, PortSpace};

use super::entry::{ServiceEntry, ServiceName};
use super::error::RegistryError;

/// Default table capacity
///
/// The display daemon registers ~17 names, the system app ~35, a guest
/// app ~5, so 128 leaves comfortable headroom.
pub const DEFAULT_CAPACITY: usize = 128;

/// Fixed-capacity name-to-endpoint table
#[derive(Debug)]
pub struct ServiceRegistry {
    slots: Vec<Option<ServiceEntry>>,
}

impl ServiceRegistry {
    /// Create a registry with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a registry with a custom capacity, fixed for its lifetime
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        ServiceRegistry { slots }
    }

    /// Table capacity
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Check for an empty table
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Register an endpoint under a name
    ///
    /// Fails with `NameInUse` if the name is already live, `NoCapacity`
    /// if the table is full.
    pub fn register(&mut self, name: ServiceName, right: PortRight) -> Result<(), RegistryError> {
        if self.find(name.as_str()).is_some() {
            tracing::warn!(service = %name, "service already registered");
            return Err(RegistryError::NameInUse(name.as_str().to_owned()));
        }

        for (slot_index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                tracing::info!(service = %name, port = %right.name, slot = slot_index, "registered service");
                *slot = Some(ServiceEntry { name, right });
                return Ok(());
            }
        }

        tracing::warn!(service = %name, "no free registry slots");
        Err(RegistryError::NoCapacity)
    }

    /// Look up the endpoint registered under a name
    pub fn lookup(&self, name: &str) -> Option<PortName> {
        match self.find(name) {
            Some(entry) => {
                tracing::debug!(service = name, port = %entry.right.name, "service found");
                Some(entry.right.name)
            }
            None => {
                tracing::debug!(service = name, "service not found");
                None
            }
        }
    }

    /// Check whether a name is live
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Create a fresh endpoint and register it under a name, atomically
    /// from the caller's point of view
    ///
    /// On success returns the fresh receive-right name; the broker keeps
    /// the corresponding send right in the table. On failure the freshly
    /// allocated endpoint is released, never leaked.
    pub fn check_in(
        &mut self,
        name: ServiceName,
        space: &mut dyn PortSpace,
    ) -> Result<PortName, RegistryError> {
        let fresh = match space.allocate() {
            Ok(port) => port,
            Err(e) => {
                tracing::warn!(service = %name, error = %e, "endpoint allocation failed");
                return Err(RegistryError::NoCapacity);
            }
        };

        match self.register(name, PortRight::owned(fresh)) {
            Ok(()) => Ok(fresh),
            Err(e) => {
                space.release(fresh);
                Err(e)
            }
        }
    }

    /// Iterate over live names in slot order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|entry| entry.name.as_str()))
    }

    fn find(&self, name: &str) -> Option<&ServiceEntry> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .find(|entry| entry.name.as_str() == name)
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
