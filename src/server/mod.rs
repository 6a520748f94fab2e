//! Process-level concerns: configuration and lifecycle
//!
//! `config` gathers everything tunable about a broker run; `lifecycle`
//! turns a config into a running, supervised broker.

pub mod config;
pub mod lifecycle;

pub use config::BrokerConfig;
pub use lifecycle::{Broker, Phase};
