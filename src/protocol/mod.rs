//! Wire protocols spoken by the broker
//!
//! Three message families share the broker's receive endpoint, told apart
//! by disjoint message-ID ranges:
//!
//! ```text
//! 0x10000000        XPC pipe rendezvous (single sentinel value)
//! 400..=499         MIG bootstrap subsystem (check_in, register, look_up,
//!                   parent, subset)
//! 700..=799         private legacy broker protocol (register, lookup,
//!                   spawn-app)
//! ```
//!
//! Replies to the MIG and legacy families reuse the request ID plus the
//! fixed reply offset; pipe replies use their own sentinel, and clients
//! discard a pipe reply whose ID is not that constant.

pub mod header;
pub mod legacy;
pub mod message;
pub mod mig;
pub mod pipe;

pub use message::{Reply, Request, RequestBody};

// MIG bootstrap subsystem (400)
pub const BOOTSTRAP_CHECK_IN: i32 = 402;
pub const BOOTSTRAP_REGISTER: i32 = 403;
pub const BOOTSTRAP_LOOK_UP: i32 = 404;
pub const BOOTSTRAP_PARENT: i32 = 406;
pub const BOOTSTRAP_SUBSET: i32 = 409;

/// Reply ID = request ID + this offset (MIG and legacy families)
pub const MIG_REPLY_OFFSET: i32 = 100;

// Private legacy broker protocol
pub const BROKER_REGISTER_PORT: i32 = 700;
pub const BROKER_LOOKUP_PORT: i32 = 701;
pub const BROKER_SPAWN_APP: i32 = 702;

/// XPC pipe request sentinel
pub const PIPE_REQUEST_ID: i32 = 0x1000_0000;
/// XPC pipe reply sentinel, disjoint from the request sentinel
pub const PIPE_REPLY_ID: i32 = 0x2000_0000;

/// Well-known rendezvous name; the broker seeds it into its registry so
/// a lookup resolves to the broker's own endpoint
pub const PIPE_SERVICE_NAME: &str = "com.apple.xpc.launchd";

// Pipe routines
pub const PIPE_ROUTINE_LIST_JOBS: u64 = 803;
pub const PIPE_ROUTINE_LOOKUP_ENDPOINT: u64 = 804;
pub const PIPE_ROUTINE_CHECK_IN: u64 = 805;

/// Platform status codes surfaced to callers
///
/// Exact numeric compatibility is a hard requirement; client code in the
/// guests branches on these values.
pub mod status {
    pub const BOOTSTRAP_SUCCESS: i32 = 0;
    pub const BOOTSTRAP_NOT_PRIVILEGED: i32 = 1100;
    pub const BOOTSTRAP_NAME_IN_USE: i32 = 1101;
    pub const BOOTSTRAP_UNKNOWN_SERVICE: i32 = 1102;
    pub const BOOTSTRAP_SERVICE_ACTIVE: i32 = 1103;
    pub const BOOTSTRAP_BAD_COUNT: i32 = 1104;
    pub const BOOTSTRAP_NO_MEMORY: i32 = 1105;

    pub const KERN_INVALID_RIGHT: i32 = 17;
    pub const KERN_NOT_SUPPORTED: i32 = 46;

    /// Generic "unrecognized request" status
    pub const MIG_BAD_ID: i32 = -303;
    /// Request recognized but its body failed to decode
    pub const MIG_BAD_ARGUMENTS: i32 = -304;
}

/// Protocol family of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// XPC pipe rendezvous
    Pipe,
    /// MIG bootstrap subsystem
    Mig,
    /// Private legacy broker protocol
    Legacy,
}

/// Classify a message ID into its protocol family
///
/// Checked in fixed priority order: the pipe sentinel first (a single
/// value), then the MIG range, then the legacy range.
pub fn classify(msg_id: i32) -> Option<Family> {
    if msg_id == PIPE_REQUEST_ID {
        Some(Family::Pipe)
    } else if (400..=499).contains(&msg_id) {
        Some(Family::Mig)
    } else if (700..=799).contains(&msg_id) {
        Some(Family::Legacy)
    } else {
        None
    }
}

/// Reply message ID for a given request ID
pub fn reply_id(request_id: i32) -> i32 {
    if request_id == PIPE_REQUEST_ID {
        PIPE_REPLY_ID
    } else {
        request_id + MIG_REPLY_OFFSET
    }
}
