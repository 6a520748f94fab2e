//! Self-describing typed payloads for the launchd-rendezvous emulation
//!
//! Some guest code asks the (nonexistent) launchd for a named service via
//! an XPC pipe instead of the plain bootstrap calls. The payload of that
//! handshake is a type-tagged key/value structure; this module holds the
//! decoded value type and its serializer. The message envelope around the
//! payload lives in `protocol::pipe`.

pub mod value;
pub mod wire;

pub use value::XpcValue;
pub use wire::XpcDecoder;
