//! XPC value types
//!
//! The rendezvous payload is a self-describing, type-tagged association
//! structure. This enum is the decoded form shared by the serializer and
//! the pipe handler.

use std::collections::HashMap;

use crate::port::PortName;

/// Decoded XPC payload value
///
/// Endpoint-carrying variants remember which capability travels with the
/// message: a send right (look-up results) or a receive right (check-in
/// results).
#[derive(Debug, Clone, PartialEq)]
pub enum XpcValue {
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int64(i64),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// UTF-8 string
    String(String),
    /// Key-value association; keys are always strings
    Dictionary(HashMap<String, XpcValue>),
    /// An endpoint transferred as a send right
    SendRight(PortName),
    /// An endpoint transferred as a receive right
    ReceiveRight(PortName),
}

impl XpcValue {
    /// Empty dictionary
    pub fn dictionary() -> Self {
        XpcValue::Dictionary(HashMap::new())
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            XpcValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as a signed integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            XpcValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get this value as an unsigned integer
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            XpcValue::Uint64(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get this value as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            XpcValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a dictionary reference
    pub fn as_dictionary(&self) -> Option<&HashMap<String, XpcValue>> {
        match self {
            XpcValue::Dictionary(m) => Some(m),
            _ => None,
        }
    }

    /// The endpoint carried by this value, if any
    pub fn as_port(&self) -> Option<PortName> {
        match self {
            XpcValue::SendRight(p) | XpcValue::ReceiveRight(p) => Some(*p),
            _ => None,
        }
    }

    /// Get an entry from a dictionary value
    pub fn get(&self, key: &str) -> Option<&XpcValue> {
        self.as_dictionary()?.get(key)
    }

    /// Get a string entry from a dictionary value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Get an unsigned integer entry from a dictionary value
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key)?.as_u64()
    }

    /// Get a signed integer entry from a dictionary value
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.as_i64()
    }

    /// Insert into a dictionary value, builder style
    ///
    /// No-op on non-dictionary values.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<XpcValue>) -> Self {
        if let XpcValue::Dictionary(ref mut m) = self {
            m.insert(key.into(), value.into());
        }
        self
    }
}

impl From<bool> for XpcValue {
    fn from(v: bool) -> Self {
        XpcValue::Bool(v)
    }
}

impl From<i64> for XpcValue {
    fn from(v: i64) -> Self {
        XpcValue::Int64(v)
    }
}

impl From<u64> for XpcValue {
    fn from(v: u64) -> Self {
        XpcValue::Uint64(v)
    }
}

impl From<&str> for XpcValue {
    fn from(v: &str) -> Self {
        XpcValue::String(v.to_string())
    }
}

impl From<String> for XpcValue {
    fn from(v: String) -> Self {
        XpcValue::String(v)
    }
}

impl From<HashMap<String, XpcValue>> for XpcValue {
    fn from(v: HashMap<String, XpcValue>) -> Self {
        XpcValue::Dictionary(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(XpcValue::Bool(true).as_bool(), Some(true));
        assert_eq!(XpcValue::Int64(-5).as_i64(), Some(-5));
        assert_eq!(XpcValue::Uint64(7).as_u64(), Some(7));
        assert_eq!(XpcValue::String("x".into()).as_str(), Some("x"));
        assert_eq!(XpcValue::Bool(true).as_str(), None);
        assert_eq!(XpcValue::Int64(1).as_u64(), None);
    }

    #[test]
    fn test_dictionary_builder() {
        let dict = XpcValue::dictionary()
            .with("routine", 804u64)
            .with("name", "com.example.Server");

        assert_eq!(dict.get_u64("routine"), Some(804));
        assert_eq!(dict.get_str("name"), Some("com.example.Server"));
        assert_eq!(dict.get("missing"), None);
    }

    #[test]
    fn test_as_port() {
        let port = PortName::from_raw(0x2000);
        assert_eq!(XpcValue::SendRight(port).as_port(), Some(port));
        assert_eq!(XpcValue::ReceiveRight(port).as_port(), Some(port));
        assert_eq!(XpcValue::Uint64(0x2000).as_port(), None);
    }

    #[test]
    fn test_get_on_non_dictionary() {
        assert!(XpcValue::Bool(false).get("key").is_none());
        assert!(XpcValue::String("s".into()).get_u64("key").is_none());
    }
}
