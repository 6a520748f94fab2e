//! Service name and entry types

use crate::port::PortRight;

use super::error::RegistryError;

/// Width of the fixed wire name field, terminator included
pub const NAME_FIELD_LEN: usize = 128;

/// Longest representable service name in bytes
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;

/// A bounded service name
///
/// At most [`MAX_NAME_LEN`] bytes so it always fits the fixed 128-byte
/// wire field with its terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName(String);

impl ServiceName {
    /// Validate and wrap a name
    pub fn new(name: impl Into<String>) -> Result<Self, RegistryError> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(RegistryError::NameTooLong(name.len()));
        }
        Ok(ServiceName(name))
    }

    /// The name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One live registration
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    /// Registered name, unique among live entries
    pub name: ServiceName,
    /// The send right the broker holds for look-up replies
    pub right: PortRight,
}
