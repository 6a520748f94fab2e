//! Broker configuration
//!
//! Configuration comes from the environment with fixed defaults; there is
//! no argument parsing. The guest-facing device identity values are
//! constants here because the shims hard-code checks against them.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::registry::DEFAULT_CAPACITY;

/// Queue depth of the primary endpoint
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Default PID marker path
pub const DEFAULT_PID_FILE: &str = "/tmp/portbroker.pid";

// Device identity advertised to guests
pub const DEVICE_NAME: &str = "iPhone 6s";
pub const MODEL_IDENTIFIER: &str = "iPhone8,1";
pub const RUNTIME_VERSION: &str = "10.3";
pub const RUNTIME_BUILD_VERSION: &str = "14E8301";
pub const MAINSCREEN_WIDTH: &str = "750";
pub const MAINSCREEN_HEIGHT: &str = "1334";
pub const MAINSCREEN_SCALE: &str = "2.0";

/// Broker configuration options
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Registry capacity, fixed for the broker's lifetime
    pub capacity: usize,

    /// Primary endpoint queue depth
    pub queue_depth: usize,

    /// Guest executable to spawn and supervise (none = serve only)
    pub child_path: Option<PathBuf>,

    /// Arguments passed to the child
    pub child_args: Vec<String>,

    /// Simulator SDK root injected as the guest's dyld root
    pub sdk_root: PathBuf,

    /// Shim library force-loaded into the guest (none = no insertion)
    pub shim_library: Option<PathBuf>,

    /// Guest home directory, provisioned before spawn
    pub sim_home: PathBuf,

    /// PID marker path
    pub pid_file: PathBuf,

    /// Names that must be registered before the broker reports ready
    pub ready_services: Vec<String>,

    /// Per-message wait while gating on readiness
    pub ready_wait: Duration,

    /// Timed receives allowed before giving up on readiness
    pub ready_attempts: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            child_path: None,
            child_args: Vec::new(),
            sdk_root: PathBuf::from("/opt/simroot"),
            shim_library: None,
            sim_home: PathBuf::from("/tmp/portbroker-home"),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            ready_services: Vec::new(),
            ready_wait: Duration::from_millis(100),
            ready_attempts: 300,
        }
    }
}

impl BrokerConfig {
    /// Build a config from the environment, falling back to defaults
    ///
    /// `PORTBROKER_CHILD`, `PORTBROKER_SDK_ROOT`, `PORTBROKER_SHIM_LIB`,
    /// `PORTBROKER_SIM_HOME`, `PORTBROKER_PID_FILE`, and
    /// `PORTBROKER_READY_SERVICES` (comma separated) are honored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(child) = env::var("PORTBROKER_CHILD") {
            config.child_path = Some(PathBuf::from(child));
        }
        if let Ok(root) = env::var("PORTBROKER_SDK_ROOT") {
            config.sdk_root = PathBuf::from(root);
        }
        if let Ok(lib) = env::var("PORTBROKER_SHIM_LIB") {
            config.shim_library = Some(PathBuf::from(lib));
        }
        if let Ok(home) = env::var("PORTBROKER_SIM_HOME") {
            config.sim_home = PathBuf::from(home);
        }
        if let Ok(pid) = env::var("PORTBROKER_PID_FILE") {
            config.pid_file = PathBuf::from(pid);
        }
        if let Ok(services) = env::var("PORTBROKER_READY_SERVICES") {
            config.ready_services = services
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
        config
    }

    /// Set the registry capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the primary endpoint queue depth
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set the supervised child
    pub fn child(mut self, path: impl Into<PathBuf>) -> Self {
        self.child_path = Some(path.into());
        self
    }

    /// Set the simulator SDK root
    pub fn sdk_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sdk_root = root.into();
        self
    }

    /// Set the guest home directory
    pub fn sim_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.sim_home = home.into();
        self
    }

    /// Set the PID marker path
    pub fn pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = path.into();
        self
    }

    /// Require a service name before the broker reports ready
    pub fn require_service(mut self, name: impl Into<String>) -> Self {
        self.ready_services.push(name.into());
        self
    }

    /// The environment injected into the supervised child
    ///
    /// A pure function of the config so the contract can be tested without
    /// spawning anything. The guest's dyld and CoreFoundation read these
    /// before any broker message is exchanged.
    pub fn child_env(&self) -> Vec<(String, String)> {
        let sdk = path_str(&self.sdk_root);
        let home = path_str(&self.sim_home);
        let mut env = vec![
            ("DYLD_ROOT_PATH".to_owned(), sdk.clone()),
            ("IPHONE_SIMULATOR_ROOT".to_owned(), sdk.clone()),
            ("SIMULATOR_ROOT".to_owned(), sdk),
            ("HOME".to_owned(), home.clone()),
            ("CFFIXED_USER_HOME".to_owned(), home.clone()),
            ("TMPDIR".to_owned(), format!("{home}/tmp")),
            ("SIMULATOR_DEVICE_NAME".to_owned(), DEVICE_NAME.to_owned()),
            ("SIMULATOR_MODEL_IDENTIFIER".to_owned(), MODEL_IDENTIFIER.to_owned()),
            ("SIMULATOR_RUNTIME_VERSION".to_owned(), RUNTIME_VERSION.to_owned()),
            ("SIMULATOR_RUNTIME_BUILD_VERSION".to_owned(), RUNTIME_BUILD_VERSION.to_owned()),
            ("SIMULATOR_MAINSCREEN_WIDTH".to_owned(), MAINSCREEN_WIDTH.to_owned()),
            ("SIMULATOR_MAINSCREEN_HEIGHT".to_owned(), MAINSCREEN_HEIGHT.to_owned()),
            ("SIMULATOR_MAINSCREEN_SCALE".to_owned(), MAINSCREEN_SCALE.to_owned()),
        ];
        if let Some(lib) = &self.shim_library {
            env.push(("DYLD_INSERT_LIBRARIES".to_owned(), path_str(lib)));
        }
        env
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert!(config.child_path.is_none());
        assert_eq!(config.pid_file, PathBuf::from(DEFAULT_PID_FILE));
        assert!(config.ready_services.is_empty());
    }

    #[test]
    fn test_builder_chaining() {
        let config = BrokerConfig::default()
            .capacity(16)
            .queue_depth(8)
            .child("/bin/true")
            .sim_home("/tmp/guest")
            .require_service("com.apple.SystemConfiguration.configd");

        assert_eq!(config.capacity, 16);
        assert_eq!(config.queue_depth, 8);
        assert_eq!(config.child_path, Some(PathBuf::from("/bin/true")));
        assert_eq!(config.sim_home, PathBuf::from("/tmp/guest"));
        assert_eq!(config.ready_services, vec!["com.apple.SystemConfiguration.configd"]);
    }

    #[test]
    fn test_child_env_contract() {
        let config = BrokerConfig::default()
            .sdk_root("/opt/sdk")
            .sim_home("/tmp/guest");
        let env = config.child_env();

        let get = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("DYLD_ROOT_PATH"), Some("/opt/sdk"));
        assert_eq!(get("IPHONE_SIMULATOR_ROOT"), Some("/opt/sdk"));
        assert_eq!(get("HOME"), Some("/tmp/guest"));
        assert_eq!(get("CFFIXED_USER_HOME"), Some("/tmp/guest"));
        assert_eq!(get("TMPDIR"), Some("/tmp/guest/tmp"));
        assert_eq!(get("SIMULATOR_DEVICE_NAME"), Some(DEVICE_NAME));
        assert_eq!(get("SIMULATOR_MODEL_IDENTIFIER"), Some("iPhone8,1"));
        assert_eq!(get("SIMULATOR_MAINSCREEN_SCALE"), Some("2.0"));
        // No insertion without a shim library
        assert_eq!(get("DYLD_INSERT_LIBRARIES"), None);
    }

    #[test]
    fn test_child_env_with_shim() {
        let mut config = BrokerConfig::default();
        config.shim_library = Some(PathBuf::from("/opt/shim.dylib"));
        let env = config.child_env();
        assert!(env
            .iter()
            .any(|(k, v)| k == "DYLD_INSERT_LIBRARIES" && v == "/opt/shim.dylib"));
    }
}
