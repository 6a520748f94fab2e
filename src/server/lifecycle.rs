//! Broker process lifecycle
//!
//! Owns everything around the dispatch loop: the PID marker, guest home
//! provisioning, spawning and supervising the child, the readiness gate,
//! and signal-driven shutdown. The phases run strictly
//! Starting -> Running -> ShuttingDown -> Stopped; shutdown work happens
//! exactly once on every exit path, spawn failure included.

use std::future::Future;
use std::path::Path;
use std::process;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::broker::{BrokerCore, Dispatcher};
use crate::error::{BrokerError, Result};
use crate::port::{BrokerPort, Inbound, LocalPortSpace, PortName, PortRight};
use crate::protocol::PIPE_SERVICE_NAME;
use crate::registry::{ServiceName, ServiceRegistry};

use super::config::BrokerConfig;

/// Endpoint name advertised to children through the environment
///
/// The transport is in-process, so the child cannot inherit a right the
/// way the emulated platform would hand one down; the name is published
/// for shims that expect to find one.
pub const BOOTSTRAP_PORT_NAME: u32 = 0x103;

/// Guest home subdirectories provisioned before spawn
const SIM_HOME_DIRS: &[&str] = &[
    "Library/Preferences",
    "Library/Caches",
    "Library/Logs",
    "Library/SpringBoard",
    "Documents",
    "Media",
    "tmp",
];

/// Lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::ShuttingDown => "shutting down",
            Phase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// The broker process: dispatch loop plus lifecycle management
pub struct Broker {
    config: BrokerConfig,
    dispatcher: Dispatcher<LocalPortSpace>,
    receiver: mpsc::Receiver<Inbound>,
    sender: mpsc::Sender<Inbound>,
    phase: Phase,
}

impl Broker {
    /// Build a broker from a config
    pub fn new(config: BrokerConfig) -> Self {
        let port = BrokerPort::create(config.queue_depth);
        let mut registry = ServiceRegistry::with_capacity(config.capacity);

        // Guests that rendezvous by name instead of using the inherited
        // right find the broker's own endpoint under the well-known name.
        if let Ok(name) = ServiceName::new(PIPE_SERVICE_NAME) {
            let right = PortRight::borrowed(PortName::from_raw(BOOTSTRAP_PORT_NAME));
            if let Err(e) = registry.register(name, right) {
                tracing::warn!(error = %e, "failed to seed the rendezvous name");
            }
        }

        let core = BrokerCore::new(registry, LocalPortSpace::new());
        Broker {
            config,
            dispatcher: Dispatcher::new(core),
            receiver: port.receiver,
            sender: port.sender,
            phase: Phase::Starting,
        }
    }

    /// A send right to the primary endpoint
    pub fn endpoint(&self) -> mpsc::Sender<Inbound> {
        self.sender.clone()
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run until SIGTERM or SIGINT
    pub async fn run(self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        self.run_until(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("SIGTERM received"),
                _ = sigint.recv() => tracing::info!("SIGINT received"),
            }
        })
        .await
    }

    /// Run until the given future resolves
    ///
    /// The loop also ends when the supervised child exits; an unsupervised
    /// broker serves until told to stop.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.set_phase(Phase::Starting);
        self.write_pid_marker();

        let mut child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => {
                // Startup failed after the marker went down; clean it up
                remove_pid_marker(&self.config.pid_file);
                return Err(e);
            }
        };

        self.await_services().await;
        self.set_phase(Phase::Running);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                status = wait_child(&mut child) => {
                    match status {
                        Ok(status) => tracing::info!(%status, "supervised child exited"),
                        Err(e) => tracing::warn!(error = %e, "failed waiting on child"),
                    }
                    child = None;
                    break;
                }
                inbound = self.receiver.recv() => match inbound {
                    Some(inbound) => self.dispatcher.handle_inbound(inbound),
                    // Unreachable while the broker holds its own sender
                    None => break,
                }
            }
        }

        self.shutdown(child).await
    }

    /// Dispatch inbound traffic until every required name is registered
    ///
    /// Bounded by the configured attempt budget of timed receives; on
    /// exhaustion the broker logs the missing names and proceeds anyway.
    async fn await_services(&mut self) {
        if self.config.ready_services.is_empty() {
            return;
        }
        let required = self.config.ready_services.clone();
        let mut attempts = self.config.ready_attempts;

        loop {
            if required
                .iter()
                .all(|name| self.dispatcher.core().registry().contains(name))
            {
                tracing::info!(services = required.len(), "all required services registered");
                return;
            }
            if attempts == 0 {
                let missing: Vec<&String> = required
                    .iter()
                    .filter(|name| !self.dispatcher.core().registry().contains(name))
                    .collect();
                tracing::warn!(?missing, "readiness wait exhausted, continuing");
                return;
            }
            match timeout(self.config.ready_wait, self.receiver.recv()).await {
                Ok(Some(inbound)) => self.dispatcher.handle_inbound(inbound),
                Ok(None) => return,
                Err(_) => attempts -= 1,
            }
        }
    }

    fn spawn_child(&mut self) -> Result<Option<Child>> {
        let Some(path) = self.config.child_path.clone() else {
            return Ok(None);
        };

        self.ensure_sim_home();

        let mut command = Command::new(&path);
        command
            .args(&self.config.child_args)
            .envs(self.config.child_env())
            .env("BROKER_BOOTSTRAP_PORT", BOOTSTRAP_PORT_NAME.to_string());

        match command.spawn() {
            Ok(child) => {
                tracing::info!(path = %path.display(), pid = child.id(), "child spawned");
                Ok(Some(child))
            }
            Err(source) => Err(BrokerError::Spawn { path, source }),
        }
    }

    /// Create the guest home tree; failures are logged and tolerated
    fn ensure_sim_home(&self) {
        for dir in SIM_HOME_DIRS {
            let path = self.config.sim_home.join(dir);
            if let Err(e) = std::fs::create_dir_all(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to provision guest home");
            }
        }
    }

    /// Write the PID marker; failure is logged, not fatal
    fn write_pid_marker(&self) {
        let path = &self.config.pid_file;
        match std::fs::write(path, process::id().to_string()) {
            Ok(()) => tracing::info!(path = %path.display(), "pid marker written"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to write pid marker"),
        }
    }

    async fn shutdown(mut self, child: Option<Child>) -> Result<()> {
        self.set_phase(Phase::ShuttingDown);

        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                tracing::warn!(error = %e, "failed to signal child");
            }
            match timeout(Duration::from_secs(5), child.wait()).await {
                Ok(Ok(status)) => tracing::info!(%status, "child stopped"),
                Ok(Err(e)) => tracing::warn!(error = %e, "failed waiting on child"),
                Err(_) => tracing::warn!("child did not stop within the grace period"),
            }
        }

        remove_pid_marker(&self.config.pid_file);
        self.set_phase(Phase::Stopped);
        Ok(())
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        tracing::info!(%phase, "broker phase");
    }
}

async fn wait_child(child: &mut Option<Child>) -> std::io::Result<std::process::ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

fn remove_pid_marker(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "pid marker removed"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove pid marker"),
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use crate::protocol::mig::{self, WireReply};
    use crate::port::PortName;

    use super::*;

    fn test_config(tag: &str) -> BrokerConfig {
        BrokerConfig::default()
            .pid_file(std::env::temp_dir().join(format!("portbroker-{tag}-{}.pid", process::id())))
            .sim_home(std::env::temp_dir().join(format!("portbroker-{tag}-home-{}", process::id())))
    }

    #[tokio::test]
    async fn test_serves_and_removes_pid_marker() {
        let config = test_config("serve");
        let pid_file = config.pid_file.clone();

        let broker = Broker::new(config);
        let endpoint = broker.endpoint();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(broker.run_until(async {
            stop_rx.await.ok();
        }));

        let frame = mig::encode_check_in_request(PortName::from_raw(0x900), "svc").unwrap();
        let (inbound, reply_rx) = Inbound::with_reply(frame);
        endpoint.send(inbound).await.unwrap();

        let reply = reply_rx.await.unwrap();
        let (id, body) = mig::decode_reply(&reply).unwrap();
        assert_eq!(id, 502);
        assert!(matches!(body, WireReply::Endpoint { .. }));

        // Marker is present while running
        assert!(pid_file.exists());

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn test_rendezvous_name_resolves_to_broker_endpoint() {
        let broker = Broker::new(test_config("rendezvous"));
        let endpoint = broker.endpoint();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(broker.run_until(async {
            stop_rx.await.ok();
        }));

        let frame = mig::encode_look_up_request(PortName::from_raw(0x900), PIPE_SERVICE_NAME)
            .unwrap();
        let (inbound, reply_rx) = Inbound::with_reply(frame);
        endpoint.send(inbound).await.unwrap();

        let reply = reply_rx.await.unwrap();
        let (_, body) = mig::decode_reply(&reply).unwrap();
        let WireReply::Endpoint { port, .. } = body else {
            panic!("rendezvous name must resolve");
        };
        assert_eq!(port, PortName::from_raw(BOOTSTRAP_PORT_NAME));

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal_and_cleans_up() {
        let config = test_config("spawnfail").child("/nonexistent/portbroker-no-such-binary");
        let pid_file = config.pid_file.clone();

        let result = Broker::new(config).run_until(std::future::pending()).await;
        assert!(matches!(result, Err(BrokerError::Spawn { .. })));
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn test_child_exit_ends_run() {
        let config = test_config("childexit").child("/bin/true");
        let broker = Broker::new(config);
        // Keep a sender alive so the loop can only end through the child
        let _endpoint = broker.endpoint();

        let result = timeout(Duration::from_secs(10), broker.run_until(std::future::pending())).await;
        assert!(result.expect("run should end when the child exits").is_ok());
    }

    #[tokio::test]
    async fn test_readiness_budget_exhaustion_continues() {
        let mut config = test_config("ready").require_service("never.arrives");
        config.ready_wait = Duration::from_millis(1);
        config.ready_attempts = 3;

        let broker = Broker::new(config);
        let endpoint = broker.endpoint();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(broker.run_until(async {
            stop_rx.await.ok();
        }));

        // The gate gives up quickly and requests are still served
        let frame = mig::encode_look_up_request(PortName::from_raw(0x900), "x").unwrap();
        let (inbound, reply_rx) = Inbound::with_reply(frame);
        endpoint.send(inbound).await.unwrap();
        let reply = timeout(Duration::from_secs(5), reply_rx).await.unwrap().unwrap();
        let (_, body) = mig::decode_reply(&reply).unwrap();
        assert!(matches!(body, WireReply::Error { .. }));

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_readiness_gate_opens_on_registration() {
        let mut config = test_config("ready2").require_service("com.example.display");
        config.ready_wait = Duration::from_millis(20);
        config.ready_attempts = 200;

        let broker = Broker::new(config);
        let endpoint = broker.endpoint();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(broker.run_until(async {
            stop_rx.await.ok();
        }));

        let frame = mig::encode_check_in_request(PortName::from_raw(0x900), "com.example.display")
            .unwrap();
        let (inbound, reply_rx) = Inbound::with_reply(frame);
        endpoint.send(inbound).await.unwrap();
        // The gate itself dispatches the registration
        let reply = timeout(Duration::from_secs(5), reply_rx).await.unwrap().unwrap();
        assert!(matches!(mig::decode_reply(&reply).unwrap().1, WireReply::Endpoint { .. }));

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
