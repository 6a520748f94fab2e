//! Opaque endpoint handles and the port-space capability
//!
//! The broker's "endpoint" concept maps to a kernel-managed port with
//! send/receive/ownership semantics that has no portable equivalent, so it
//! is abstracted as an opaque name plus an explicit ownership tag. The
//! primitives that actually create and transfer rights live behind the
//! [`PortSpace`] trait and are injected into the broker core; the core
//! never constructs them itself.
//!
//! The in-process transport at the bottom of this module stands in for the
//! kernel message queue: the broker's primary endpoint is an `mpsc`
//! receiver of raw frames, and each inbound frame carries the caller's
//! one-shot reply right as a `oneshot` sender.

use std::collections::HashSet;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

/// Name of an endpoint within the broker's port space
///
/// Zero is the null name, matching the platform convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortName(u32);

impl PortName {
    /// The null port name
    pub const NULL: PortName = PortName(0);

    /// Wrap a raw wire value
    pub fn from_raw(raw: u32) -> Self {
        PortName(raw)
    }

    /// Raw wire value of this name
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Check for the null name
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for PortName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Ownership tag carried alongside an endpoint name
///
/// Encodes who holds the right after the message that carries it:
/// `Owned` stays with the broker, `Borrowed` is copied to the peer while
/// the broker keeps its own right, `MoveOut` transfers the right entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The broker holds this right
    Owned,
    /// The peer receives a copy; the broker's right survives
    Borrowed,
    /// The right leaves the broker with the message
    MoveOut,
}

/// An endpoint name with its ownership tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRight {
    pub name: PortName,
    pub ownership: Ownership,
}

impl PortRight {
    /// A right the broker keeps
    pub fn owned(name: PortName) -> Self {
        PortRight { name, ownership: Ownership::Owned }
    }

    /// A copy handed to the peer (send-right semantics)
    pub fn borrowed(name: PortName) -> Self {
        PortRight { name, ownership: Ownership::Borrowed }
    }

    /// A right transferred out with the message (receive-right hand-off)
    pub fn move_out(name: PortName) -> Self {
        PortRight { name, ownership: Ownership::MoveOut }
    }
}

/// Port-space allocation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    /// No more names available
    Exhausted,
}

impl std::fmt::Display for PortError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortError::Exhausted => write!(f, "port space exhausted"),
        }
    }
}

impl std::error::Error for PortError {}

/// Injected capability for creating and releasing endpoints
///
/// The broker core calls `allocate` for check-in style operations and
/// `release` when a freshly created endpoint must not leak after a failed
/// registration.
pub trait PortSpace {
    /// Allocate a fresh channel and return its receive-right name
    fn allocate(&mut self) -> std::result::Result<PortName, PortError>;

    /// Release a previously allocated right
    fn release(&mut self, name: PortName);
}

/// In-process port space backing the emulated transport and the tests
///
/// Names are handed out from a monotonically increasing counter; live
/// names are tracked so a double release is a no-op rather than a corruption.
#[derive(Debug)]
pub struct LocalPortSpace {
    next: u32,
    live: HashSet<u32>,
}

impl LocalPortSpace {
    /// Create an empty port space
    ///
    /// The first allocated name is well above the null name so that wire
    /// dumps are easy to tell apart from zeroed padding.
    pub fn new() -> Self {
        LocalPortSpace { next: 0x1000, live: HashSet::new() }
    }

    /// Number of live allocated names
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Check whether a name is currently allocated
    pub fn is_live(&self, name: PortName) -> bool {
        self.live.contains(&name.raw())
    }
}

impl Default for LocalPortSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl PortSpace for LocalPortSpace {
    fn allocate(&mut self) -> std::result::Result<PortName, PortError> {
        let raw = self.next;
        self.next = self.next.checked_add(4).ok_or(PortError::Exhausted)?;
        self.live.insert(raw);
        Ok(PortName::from_raw(raw))
    }

    fn release(&mut self, name: PortName) {
        self.live.remove(&name.raw());
    }
}

/// One received message: the raw frame plus the caller's reply right
///
/// The reply slot is one-shot by construction, mirroring a send-once right.
/// `None` models a request sent without a reply port.
#[derive(Debug)]
pub struct Inbound {
    pub frame: Bytes,
    pub reply: Option<oneshot::Sender<Bytes>>,
}

impl Inbound {
    /// A request that expects a reply; returns the receiver for the reply
    pub fn with_reply(frame: Bytes) -> (Self, oneshot::Receiver<Bytes>) {
        let (tx, rx) = oneshot::channel();
        (Inbound { frame, reply: Some(tx) }, rx)
    }

    /// A one-way message with no reply right attached
    pub fn one_way(frame: Bytes) -> Self {
        Inbound { frame, reply: None }
    }
}

/// The broker's primary endpoint
///
/// `sender` is the side injected into children as their bootstrap port;
/// it can be cloned freely, like a send right. `receiver` is held by the
/// dispatch loop alone.
#[derive(Debug)]
pub struct BrokerPort {
    pub sender: mpsc::Sender<Inbound>,
    pub receiver: mpsc::Receiver<Inbound>,
}

impl BrokerPort {
    /// Create the primary endpoint with a bounded queue
    pub fn create(queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth);
        BrokerPort { sender, receiver }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_fresh_names() {
        let mut space = LocalPortSpace::new();
        let a = space.allocate().unwrap();
        let b = space.allocate().unwrap();
        assert_ne!(a, b);
        assert!(space.is_live(a));
        assert!(space.is_live(b));
        assert_eq!(space.live_count(), 2);
    }

    #[test]
    fn test_release() {
        let mut space = LocalPortSpace::new();
        let a = space.allocate().unwrap();
        space.release(a);
        assert!(!space.is_live(a));
        // Double release is a no-op
        space.release(a);
        assert_eq!(space.live_count(), 0);
    }

    #[test]
    fn test_null_name() {
        assert!(PortName::NULL.is_null());
        assert!(!PortName::from_raw(0x1000).is_null());
    }

    #[tokio::test]
    async fn test_inbound_reply_slot() {
        let (inbound, rx) = Inbound::with_reply(Bytes::from_static(b"req"));
        let tx = inbound.reply.unwrap();
        tx.send(Bytes::from_static(b"rep")).unwrap();
        assert_eq!(rx.await.unwrap(), Bytes::from_static(b"rep"));
    }
}
