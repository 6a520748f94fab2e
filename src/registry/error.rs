//! Registry error types
//!
//! Each variant maps onto the numeric status the emulated platform
//! returns for the same condition; that mapping is part of the wire
//! contract, not a diagnostic nicety.

use crate::protocol::status;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An entry with this name is already live
    NameInUse(String),
    /// The table is full and the name is new
    NoCapacity,
    /// Name exceeds the fixed wire field
    NameTooLong(usize),
}

impl RegistryError {
    /// Platform status code surfaced to the caller
    pub fn status(&self) -> i32 {
        match self {
            RegistryError::NameInUse(_) => status::BOOTSTRAP_NAME_IN_USE,
            RegistryError::NoCapacity => status::BOOTSTRAP_NO_MEMORY,
            RegistryError::NameTooLong(_) => status::BOOTSTRAP_BAD_COUNT,
        }
    }
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::NameInUse(name) => write!(f, "service already registered: {name}"),
            RegistryError::NoCapacity => write!(f, "no free registry slots"),
            RegistryError::NameTooLong(len) => write!(f, "service name too long: {len} bytes"),
        }
    }
}

impl std::error::Error for RegistryError {}
