//! # Host container: ordered component lifecycle and registration.
//!
//! A [`Host`] owns a set of named broker-side [`Component`]s and starts
//! them in dependency order (downstream components first), stopping them in
//! reverse. Start and stop are idempotent. Each component declares a
//! **build-time capability manifest** — a static list of the service
//! capabilities it provides — and the host registers every component under
//! its capabilities with an external [`ServiceRegistry`]; no runtime
//! introspection is involved.
//!
//! The activation runtime itself only requires that the broker component be
//! started before `activate` and remain reachable until `deactivate`; the
//! host is how embedding applications arrange that.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::HostError;

/// A startable, stoppable broker-side component.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Stable component name.
    fn name(&self) -> &str;

    /// Build-time capability manifest: the service capabilities this
    /// component provides when registered.
    fn capabilities(&self) -> &[&str];

    /// Starts the component. Called in dependency order.
    async fn start(&self) -> Result<(), HostError>;

    /// Stops the component. Called in reverse dependency order.
    async fn stop(&self) -> Result<(), HostError>;
}

/// External registry the host publishes component capabilities to.
pub trait ServiceRegistry: Send + Sync {
    /// Registers `name` under `capabilities`; returns a registration id.
    fn register(&self, name: &str, capabilities: &[&str]) -> u64;

    /// Removes a prior registration.
    fn unregister(&self, registration: u64);
}

/// Ordered component container.
///
/// Components are added in dependency order: the first added is the first
/// started and the last stopped.
pub struct Host {
    name: String,
    components: Vec<Arc<dyn Component>>,
    started: Mutex<bool>,
    registrations: Mutex<Vec<u64>>,
}

impl Host {
    /// Creates an empty host.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
            started: Mutex::new(false),
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Adds a component at the end of the start order.
    pub fn with_component(mut self, component: Arc<dyn Component>) -> Self {
        self.components.push(component);
        self
    }

    /// The host's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once [`start`](Host::start) completed.
    pub fn is_started(&self) -> bool {
        *self.started.lock().expect("host state poisoned")
    }

    /// Starts every component in dependency order.
    ///
    /// Idempotent: a second call is a no-op. If any component fails, the
    /// ones already started are stopped again in reverse order and the
    /// error propagates.
    pub async fn start(&self) -> Result<(), HostError> {
        {
            let started = self.started.lock().expect("host state poisoned");
            if *started {
                return Ok(());
            }
        }

        tracing::info!(host = %self.name, "starting components");
        for (index, component) in self.components.iter().enumerate() {
            if let Err(err) = component.start().await {
                for rollback in self.components[..index].iter().rev() {
                    let _ = rollback.stop().await;
                }
                return Err(err);
            }
        }

        *self.started.lock().expect("host state poisoned") = true;
        Ok(())
    }

    /// Stops every component in reverse order. Idempotent.
    pub async fn stop(&self) -> Result<(), HostError> {
        {
            let started = self.started.lock().expect("host state poisoned");
            if !*started {
                return Ok(());
            }
        }

        for component in self.components.iter().rev() {
            component.stop().await?;
        }
        *self.started.lock().expect("host state poisoned") = false;
        Ok(())
    }

    /// Registers every component under its capability manifest.
    pub fn register(&self, registry: &dyn ServiceRegistry) {
        let mut registrations = self.registrations.lock().expect("host state poisoned");
        for component in &self.components {
            registrations.push(registry.register(component.name(), component.capabilities()));
        }
    }

    /// Removes all registrations made by [`register`](Host::register).
    pub fn unregister(&self, registry: &dyn ServiceRegistry) {
        let registrations: Vec<u64> = self
            .registrations
            .lock()
            .expect("host state poisoned")
            .drain(..)
            .collect();
        for registration in registrations {
            registry.unregister(registration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Recorded {
        name: &'static str,
        caps: Vec<&'static str>,
        log: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    }

    #[async_trait]
    impl Component for Recorded {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> &[&str] {
            &self.caps
        }

        async fn start(&self) -> Result<(), HostError> {
            if self.fail_start {
                return Err(HostError::Component {
                    name: self.name.to_string(),
                    reason: "induced".into(),
                });
            }
            self.log.lock().unwrap().push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&self) -> Result<(), HostError> {
            self.log.lock().unwrap().push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    fn component(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    ) -> Arc<dyn Component> {
        Arc::new(Recorded {
            name,
            caps: vec!["broker"],
            log: log.clone(),
            fail_start,
        })
    }

    #[derive(Default)]
    struct MapRegistry {
        next: AtomicU64,
        entries: Mutex<HashMap<u64, String>>,
    }

    impl ServiceRegistry for MapRegistry {
        fn register(&self, name: &str, capabilities: &[&str]) -> u64 {
            let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
            self.entries
                .lock()
                .unwrap()
                .insert(id, format!("{name}:{}", capabilities.join(",")));
            id
        }

        fn unregister(&self, registration: u64) {
            self.entries.lock().unwrap().remove(&registration);
        }
    }

    #[tokio::test]
    async fn starts_in_order_and_stops_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let host = Host::new("broker-host")
            .with_component(component("store", &log, false))
            .with_component(component("core", &log, false));

        host.start().await.expect("start");
        assert!(host.is_started());
        host.stop().await.expect("stop");
        assert!(!host.is_started());

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start:store", "start:core", "stop:core", "stop:store"]
        );
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let host = Host::new("broker-host").with_component(component("core", &log, false));

        host.start().await.expect("start");
        host.start().await.expect("second start is a no-op");
        host.stop().await.expect("stop");
        host.stop().await.expect("second stop is a no-op");

        assert_eq!(*log.lock().unwrap(), vec!["start:core", "stop:core"]);
    }

    #[tokio::test]
    async fn failed_start_unwinds_started_components() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let host = Host::new("broker-host")
            .with_component(component("store", &log, false))
            .with_component(component("broken", &log, true));

        assert!(host.start().await.is_err());
        assert!(!host.is_started());
        assert_eq!(*log.lock().unwrap(), vec!["start:store", "stop:store"]);
    }

    #[tokio::test]
    async fn registers_capability_manifests() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let host = Host::new("broker-host")
            .with_component(component("core", &log, false))
            .with_component(component("jms", &log, false));
        let registry = MapRegistry::default();

        host.register(&registry);
        assert_eq!(registry.entries.lock().unwrap().len(), 2);

        host.unregister(&registry);
        assert!(registry.entries.lock().unwrap().is_empty());
    }
}
