//! Bootstrap operation handlers
//!
//! One decoded request in, one reply out. All three wire families funnel
//! into the same registry, so a name checked in over MIG resolves over
//! the legacy protocol and the XPC pipe alike. Handlers never touch the
//! transport; the dispatch loop owns framing and delivery.

use crate::port::{PortRight, PortSpace};
use crate::protocol::{status, Reply, RequestBody};
use crate::registry::{ServiceName, ServiceRegistry};
use crate::xpc::XpcValue;

use crate::protocol::{
    PIPE_ROUTINE_CHECK_IN, PIPE_ROUTINE_LIST_JOBS, PIPE_ROUTINE_LOOKUP_ENDPOINT,
};

/// The broker's service-level state: registry plus the injected
/// endpoint-creation capability
#[derive(Debug)]
pub struct BrokerCore<S: PortSpace> {
    registry: ServiceRegistry,
    space: S,
}

impl<S: PortSpace> BrokerCore<S> {
    /// Wrap a registry and a port space
    pub fn new(registry: ServiceRegistry, space: S) -> Self {
        BrokerCore { registry, space }
    }

    /// Read access to the registry, for the readiness gate and tests
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Handle one decoded request
    pub fn handle(&mut self, body: RequestBody) -> Reply {
        match body {
            RequestBody::MigCheckIn { name } => self.check_in(name),
            RequestBody::MigRegister { name, right }
            | RequestBody::LegacyRegister { name, right } => self.register(name, right),
            RequestBody::MigLookUp { name } | RequestBody::LegacyLookUp { name } => {
                self.look_up(&name)
            }
            RequestBody::MigParent => {
                tracing::debug!("parent bootstrap requested, refusing");
                Reply::Error { code: status::KERN_INVALID_RIGHT }
            }
            RequestBody::MigSubset => {
                tracing::debug!("subset creation requested, refusing");
                Reply::Error { code: status::KERN_INVALID_RIGHT }
            }
            RequestBody::LegacySpawnApp => {
                tracing::debug!("spawn-app requested, not implemented");
                Reply::Error { code: status::KERN_NOT_SUPPORTED }
            }
            RequestBody::Pipe { routine, payload } => self.pipe(routine, &payload),
        }
    }

    /// Create a fresh endpoint under a name and hand its receive right
    /// back; the broker keeps the send right in the table
    fn check_in(&mut self, name: ServiceName) -> Reply {
        match self.registry.check_in(name, &mut self.space) {
            Ok(fresh) => Reply::Endpoint { right: PortRight::move_out(fresh) },
            Err(e) => Reply::Error { code: e.status() },
        }
    }

    /// Register a caller-supplied send right; success is acknowledged
    /// with a zero status
    fn register(&mut self, name: ServiceName, right: PortRight) -> Reply {
        match self.registry.register(name, right) {
            Ok(()) => Reply::Error { code: status::BOOTSTRAP_SUCCESS },
            Err(e) => Reply::Error { code: e.status() },
        }
    }

    /// Resolve a name to a copied send right
    fn look_up(&self, name: &ServiceName) -> Reply {
        match self.registry.lookup(name.as_str()) {
            Some(port) => Reply::Endpoint { right: PortRight::borrowed(port) },
            None => Reply::Error { code: status::BOOTSTRAP_UNKNOWN_SERVICE },
        }
    }

    /// Serve one pipe routine; errors travel inside the payload under
    /// the `error` key, in the same status space as the plain protocols
    fn pipe(&mut self, routine: u64, payload: &XpcValue) -> Reply {
        let payload = match routine {
            PIPE_ROUTINE_LIST_JOBS => self.pipe_list_jobs(),
            PIPE_ROUTINE_LOOKUP_ENDPOINT => self.pipe_lookup(payload),
            PIPE_ROUTINE_CHECK_IN => self.pipe_check_in(payload),
            other => {
                tracing::warn!(routine = other, "unknown pipe routine");
                pipe_error(status::KERN_NOT_SUPPORTED)
            }
        };
        Reply::Pipe { payload }
    }

    fn pipe_list_jobs(&self) -> XpcValue {
        let mut jobs = XpcValue::dictionary();
        for name in self.registry.names() {
            jobs = jobs.with(name, true);
        }
        XpcValue::dictionary()
            .with("error", 0i64)
            .with("jobs", jobs)
    }

    fn pipe_lookup(&self, payload: &XpcValue) -> XpcValue {
        let Some(name) = payload.get_str("name") else {
            return pipe_error(status::BOOTSTRAP_BAD_COUNT);
        };
        match self.registry.lookup(name) {
            Some(port) => XpcValue::dictionary()
                .with("error", 0i64)
                .with("port", XpcValue::SendRight(port)),
            None => pipe_error(status::BOOTSTRAP_UNKNOWN_SERVICE),
        }
    }

    fn pipe_check_in(&mut self, payload: &XpcValue) -> XpcValue {
        let Some(name) = payload.get_str("name") else {
            return pipe_error(status::BOOTSTRAP_BAD_COUNT);
        };
        let name = match ServiceName::new(name.to_owned()) {
            Ok(name) => name,
            Err(_) => return pipe_error(status::BOOTSTRAP_BAD_COUNT),
        };
        match self.registry.check_in(name, &mut self.space) {
            Ok(fresh) => XpcValue::dictionary()
                .with("error", 0i64)
                .with("port", XpcValue::ReceiveRight(fresh)),
            Err(e) => pipe_error(e.status()),
        }
    }
}

fn pipe_error(code: i32) -> XpcValue {
    XpcValue::dictionary().with("error", i64::from(code))
}

#[cfg(test)]
mod tests {
    use crate::port::{LocalPortSpace, Ownership, PortName};

    use super::*;

    fn core() -> BrokerCore<LocalPortSpace> {
        BrokerCore::new(ServiceRegistry::new(), LocalPortSpace::new())
    }

    fn name(s: &str) -> ServiceName {
        ServiceName::new(s).unwrap()
    }

    #[test]
    fn test_check_in_then_look_up() {
        let mut core = core();

        let reply = core.handle(RequestBody::MigCheckIn { name: name("svc") });
        let Reply::Endpoint { right } = reply else { panic!("expected endpoint") };
        assert_eq!(right.ownership, Ownership::MoveOut);

        // The same name resolves through the legacy family
        let reply = core.handle(RequestBody::LegacyLookUp { name: name("svc") });
        let Reply::Endpoint { right: found } = reply else { panic!("expected endpoint") };
        assert_eq!(found.name, right.name);
        assert_eq!(found.ownership, Ownership::Borrowed);
    }

    #[test]
    fn test_check_in_conflict_status() {
        let mut core = core();
        core.handle(RequestBody::MigCheckIn { name: name("svc") });

        // A conflicting check-in reports the name as taken, same code as
        // a conflicting register
        let reply = core.handle(RequestBody::MigCheckIn { name: name("svc") });
        assert_eq!(reply, Reply::Error { code: status::BOOTSTRAP_NAME_IN_USE });
    }

    #[test]
    fn test_register_ack_and_conflict() {
        let mut core = core();
        let right = PortRight::owned(PortName::from_raw(0x2000));

        let reply = core.handle(RequestBody::MigRegister { name: name("svc"), right });
        assert_eq!(reply, Reply::Error { code: status::BOOTSTRAP_SUCCESS });

        let reply = core.handle(RequestBody::LegacyRegister { name: name("svc"), right });
        assert_eq!(reply, Reply::Error { code: status::BOOTSTRAP_NAME_IN_USE });
    }

    #[test]
    fn test_look_up_unknown() {
        let mut core = core();
        let reply = core.handle(RequestBody::MigLookUp { name: name("nope") });
        assert_eq!(reply, Reply::Error { code: status::BOOTSTRAP_UNKNOWN_SERVICE });

        // Repeated misses stay misses; nothing is created as a side effect
        let reply = core.handle(RequestBody::MigLookUp { name: name("nope") });
        assert_eq!(reply, Reply::Error { code: status::BOOTSTRAP_UNKNOWN_SERVICE });
        assert!(core.registry().is_empty());
    }

    #[test]
    fn test_parent_and_subset_refused() {
        let mut core = core();
        assert_eq!(
            core.handle(RequestBody::MigParent),
            Reply::Error { code: status::KERN_INVALID_RIGHT }
        );
        assert_eq!(
            core.handle(RequestBody::MigSubset),
            Reply::Error { code: status::KERN_INVALID_RIGHT }
        );
    }

    #[test]
    fn test_spawn_app_not_supported() {
        let mut core = core();
        assert_eq!(
            core.handle(RequestBody::LegacySpawnApp),
            Reply::Error { code: status::KERN_NOT_SUPPORTED }
        );
    }

    #[test]
    fn test_pipe_lookup_returns_send_right() {
        let mut core = core();
        core.handle(RequestBody::MigCheckIn { name: name("svc") });

        let payload = XpcValue::dictionary()
            .with("routine", PIPE_ROUTINE_LOOKUP_ENDPOINT)
            .with("name", "svc");
        let reply = core.handle(RequestBody::Pipe {
            routine: PIPE_ROUTINE_LOOKUP_ENDPOINT,
            payload,
        });

        let Reply::Pipe { payload } = reply else { panic!("expected pipe reply") };
        assert_eq!(payload.get_i64("error"), Some(0));
        assert!(matches!(payload.get("port"), Some(XpcValue::SendRight(_))));
    }

    #[test]
    fn test_pipe_check_in_returns_receive_right() {
        let mut core = core();
        let payload = XpcValue::dictionary()
            .with("routine", PIPE_ROUTINE_CHECK_IN)
            .with("name", "svc");
        let reply = core.handle(RequestBody::Pipe { routine: PIPE_ROUTINE_CHECK_IN, payload });

        let Reply::Pipe { payload } = reply else { panic!("expected pipe reply") };
        assert_eq!(payload.get_i64("error"), Some(0));
        assert!(matches!(payload.get("port"), Some(XpcValue::ReceiveRight(_))));

        // Visible to the plain protocols too
        assert!(core.registry().contains("svc"));
    }

    #[test]
    fn test_pipe_list_jobs() {
        let mut core = core();
        core.handle(RequestBody::MigCheckIn { name: name("a") });
        core.handle(RequestBody::MigCheckIn { name: name("b") });

        let payload = XpcValue::dictionary().with("routine", PIPE_ROUTINE_LIST_JOBS);
        let reply = core.handle(RequestBody::Pipe { routine: PIPE_ROUTINE_LIST_JOBS, payload });

        let Reply::Pipe { payload } = reply else { panic!("expected pipe reply") };
        let jobs = payload.get("jobs").unwrap();
        assert_eq!(jobs.get("a"), Some(&XpcValue::Bool(true)));
        assert_eq!(jobs.get("b"), Some(&XpcValue::Bool(true)));
    }

    #[test]
    fn test_pipe_unknown_routine() {
        let mut core = core();
        let payload = XpcValue::dictionary().with("routine", 999u64);
        let reply = core.handle(RequestBody::Pipe { routine: 999, payload });

        let Reply::Pipe { payload } = reply else { panic!("expected pipe reply") };
        assert_eq!(payload.get_i64("error"), Some(i64::from(status::KERN_NOT_SUPPORTED)));
    }

    #[test]
    fn test_pipe_lookup_without_name() {
        let mut core = core();
        let payload = XpcValue::dictionary().with("routine", PIPE_ROUTINE_LOOKUP_ENDPOINT);
        let reply = core.handle(RequestBody::Pipe {
            routine: PIPE_ROUTINE_LOOKUP_ENDPOINT,
            payload,
        });

        let Reply::Pipe { payload } = reply else { panic!("expected pipe reply") };
        assert_eq!(payload.get_i64("error"), Some(i64::from(status::BOOTSTRAP_BAD_COUNT)));
    }
}
