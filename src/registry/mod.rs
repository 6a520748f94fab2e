//! Bounded service-name registry
//!
//! The one table every protocol handler reads and writes: a name
//! registered through any of the three wire families is visible to
//! look-ups from all of them. The registry is a plain owned value passed
//! by reference into each handler invocation; the single-threaded
//! dispatch loop means it needs no interior locking.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{ServiceEntry, ServiceName, MAX_NAME_LEN, NAME_FIELD_LEN};
pub use error::RegistryError;
pub use store::{ServiceRegistry, DEFAULT_CAPACITY};
