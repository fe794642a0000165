use core::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use prometheus_client::encoding::text::encode;
pub use prometheus_client::registry::Registry;

/// Name every metric of the process is exported under.
pub const NAMESPACE: &str = "dcmanager";

/// Registry shared by the download pipeline and the upgrade daemon.
///
/// Each subsystem registers its metrics once, under its own prefix, through
/// [`SharedRegistry::component`]. Scrapes only ever take the read lock.
#[derive(Clone)]
pub struct SharedRegistry(Arc<RwLock<Registry>>);

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        Self(Arc::new(RwLock::new(registry)))
    }

    /// The process-wide registry, namespaced under [`NAMESPACE`].
    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<SharedRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| SharedRegistry::new(Registry::with_prefix(NAMESPACE)))
    }

    /// Registers the metrics of one subsystem under `name`.
    pub fn component<A>(&self, name: &str, register: impl FnOnce(&mut Registry) -> A) -> A {
        let mut registry = self.0.write().unwrap_or_else(PoisonError::into_inner);
        register(registry.sub_registry_with_prefix(name))
    }

    /// Encodes every registered metric in the Prometheus text format.
    pub fn export<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let registry = self.0.read().unwrap_or_else(PoisonError::into_inner);
        encode(writer, &registry)
    }
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::new(Registry::default())
    }
}
