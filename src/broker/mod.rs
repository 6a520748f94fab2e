//! Request handling and the dispatch loop
//!
//! `handler` turns decoded requests into replies against the shared
//! registry; `dispatch` owns the receive loop, the framing, and the
//! rule that bad traffic never kills the broker.

pub mod dispatch;
pub mod handler;

pub use dispatch::Dispatcher;
pub use handler::BrokerCore;
