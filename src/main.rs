//! Broker binary entry point
//!
//! Configuration comes entirely from the environment (see
//! [`BrokerConfig::from_env`]); diagnostics go to stderr unbuffered so
//! they interleave correctly with the supervised child's output.

use portbroker::server::{Broker, BrokerConfig};

#[tokio::main]
async fn main() -> portbroker::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = BrokerConfig::from_env();
    tracing::info!(
        capacity = config.capacity,
        child = ?config.child_path,
        "portbroker starting"
    );

    Broker::new(config).run().await
}
