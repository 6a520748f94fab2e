//! User-space bootstrap port broker
//!
//! Sandboxed guest processes expect a bootstrap server to resolve
//! service names to IPC endpoints. Nothing provides one inside the
//! sandbox, so this crate emulates it: a broker process that owns a
//! bounded name registry, speaks the three wire dialects guests use
//! (the MIG bootstrap subsystem, a private legacy protocol, and the
//! XPC launchd rendezvous), and supervises the guest process tree.
//!
//! The flow is one loop: receive a frame on the primary endpoint,
//! classify it by message ID, decode, act on the shared registry, and
//! answer on the caller's one-shot reply right. Malformed traffic is
//! answered with a typed error and never stops the loop.
//!
//! ```no_run
//! use portbroker::server::{Broker, BrokerConfig};
//!
//! #[tokio::main]
//! async fn main() -> portbroker::Result<()> {
//!     let config = BrokerConfig::default()
//!         .child("/opt/guest/launcher")
//!         .require_service("com.apple.SystemConfiguration.configd");
//!     Broker::new(config).run().await
//! }
//! ```

pub mod broker;
pub mod error;
pub mod port;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod xpc;

pub use broker::{BrokerCore, Dispatcher};
pub use error::{BrokerError, CodecError, Result};
pub use port::{Inbound, PortName, PortRight};
pub use registry::{ServiceName, ServiceRegistry};
pub use server::{Broker, BrokerConfig};
pub use xpc::XpcValue;
