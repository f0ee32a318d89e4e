//! Engine Provider
//!
//! Builds engines and caches one per execution scope. The scope of a test is
//! the thread it runs on, so concurrently running tests never share an
//! engine; successive tests on one thread reuse it until it is disposed.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use log::{debug, info};

use super::resources::ResourceLoader;
use crate::engine::{lock, EngineConfig, ProcessEngine};
use crate::error::Result;

static NEXT_DETACHED_SCOPE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ScopeId {
    Thread(ThreadId),
    Detached(u64),
}

/// Opaque isolation unit for engine reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionScope(ScopeId);

impl ExecutionScope {
    /// Scope of the calling thread.
    pub fn current() -> Self {
        Self(ScopeId::Thread(thread::current().id()))
    }

    /// A scope tied to no thread; never equal to any other scope.
    pub fn detached() -> Self {
        Self(ScopeId::Detached(
            NEXT_DETACHED_SCOPE.fetch_add(1, Ordering::Relaxed),
        ))
    }
}

/// A running engine plus the configuration resource it was built from.
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<ProcessEngine>,
    configuration_resource: String,
}

impl EngineHandle {
    pub fn new(engine: Arc<ProcessEngine>, configuration_resource: impl Into<String>) -> Self {
        Self {
            engine,
            configuration_resource: configuration_resource.into(),
        }
    }

    pub fn engine(&self) -> &Arc<ProcessEngine> {
        &self.engine
    }

    pub fn configuration_resource(&self) -> &str {
        &self.configuration_resource
    }

    /// True if both handles refer to the same engine instance.
    pub fn same_engine(&self, other: &EngineHandle) -> bool {
        Arc::ptr_eq(&self.engine, &other.engine)
    }
}

impl Deref for EngineHandle {
    type Target = ProcessEngine;

    fn deref(&self) -> &ProcessEngine {
        &self.engine
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("engine", &self.engine.name())
            .field("storage", &self.engine.storage_namespace())
            .field("configuration_resource", &self.configuration_resource)
            .finish()
    }
}

enum EngineSource {
    /// Build engines from a configuration resource
    Configured {
        resource: String,
        loader: Arc<dyn ResourceLoader>,
    },
    /// Hand out one caller-supplied engine; never closed here
    Shared(EngineHandle),
}

pub struct EngineProvider {
    source: EngineSource,
    engines: Mutex<HashMap<ExecutionScope, EngineHandle>>,
}

impl EngineProvider {
    /// Builds engines from the named configuration resource.
    pub fn new(loader: Arc<dyn ResourceLoader>, configuration_resource: impl Into<String>) -> Self {
        Self {
            source: EngineSource::Configured {
                resource: configuration_resource.into(),
                loader,
            },
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Hands out the supplied engine to every scope.
    pub fn shared(engine: Arc<ProcessEngine>) -> Self {
        Self {
            source: EngineSource::Shared(EngineHandle::new(engine, "<supplied>")),
            engines: Mutex::new(HashMap::new()),
        }
    }

    pub fn configuration_resource(&self) -> &str {
        match &self.source {
            EngineSource::Configured { resource, .. } => resource,
            EngineSource::Shared(handle) => handle.configuration_resource(),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.source, EngineSource::Shared(_))
    }

    /// Returns the scope's engine, building one on first use.
    pub fn acquire(&self, scope: ExecutionScope) -> Result<EngineHandle> {
        if let Some(handle) = self.cached(scope) {
            return Ok(handle);
        }

        let handle = match &self.source {
            EngineSource::Shared(handle) => handle.clone(),
            EngineSource::Configured { resource, loader } => {
                let config = EngineConfig::from_resource(loader.as_ref(), resource)?;
                let engine = Arc::new(ProcessEngine::new(config));
                info!(
                    "Built engine '{}' on {} for {:?}",
                    engine.name(),
                    engine.storage_namespace(),
                    scope
                );
                EngineHandle::new(engine, resource.clone())
            }
        };

        let mut engines = lock(&self.engines);
        let cached = engines.entry(scope).or_insert_with(|| handle.clone()).clone();
        if !cached.same_engine(&handle) && !self.is_shared() {
            // Lost a race for a detached scope shared between threads.
            handle.close();
        }
        Ok(cached)
    }

    /// The scope's engine, if one is cached.
    pub fn cached(&self, scope: ExecutionScope) -> Option<EngineHandle> {
        lock(&self.engines).get(&scope).cloned()
    }

    /// Forgets the engine for every scope holding it and closes it.
    ///
    /// A supplied shared engine is only forgotten, never closed.
    pub fn dispose(&self, handle: &EngineHandle) {
        lock(&self.engines).retain(|_, cached| !cached.same_engine(handle));

        if self.is_shared() {
            debug!("Released shared engine '{}'", handle.name());
        } else {
            handle.close();
        }
    }

    /// Number of scopes with a cached engine.
    pub fn len(&self) -> usize {
        lock(&self.engines).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for EngineProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineProvider")
            .field("configuration_resource", &self.configuration_resource())
            .field("shared", &self.is_shared())
            .field("scopes", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use crate::harness::resources::MemoryLoader;

    fn provider() -> EngineProvider {
        let loader = MemoryLoader::new().with("flowtest.cfg.yaml", "name: unit\n");
        EngineProvider::new(Arc::new(loader), "flowtest.cfg.yaml")
    }

    #[test]
    fn test_acquire_caches_per_scope() {
        let provider = provider();
        let scope = ExecutionScope::detached();

        let first = provider.acquire(scope).unwrap();
        let second = provider.acquire(scope).unwrap();

        assert!(first.same_engine(&second));
        assert_eq!(first.name(), "unit");
        assert_eq!(first.configuration_resource(), "flowtest.cfg.yaml");
    }

    #[test]
    fn test_scopes_get_private_storage() {
        let provider = provider();

        let first = provider.acquire(ExecutionScope::detached()).unwrap();
        let second = provider.acquire(ExecutionScope::detached()).unwrap();

        assert!(!first.same_engine(&second));
        assert_ne!(first.storage_namespace(), second.storage_namespace());
        assert_eq!(provider.len(), 2);
    }

    #[test]
    fn test_threads_never_share_engines() {
        let provider = Arc::new(provider());

        let spawn = |provider: Arc<EngineProvider>| {
            thread::spawn(move || {
                let handle = provider.acquire(ExecutionScope::current()).unwrap();
                let again = provider.acquire(ExecutionScope::current()).unwrap();
                assert!(handle.same_engine(&again));
                handle.storage_namespace().to_string()
            })
        };
        let first = spawn(Arc::clone(&provider)).join().unwrap();
        let second = spawn(Arc::clone(&provider)).join().unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_dispose_closes_and_invalidates() {
        let provider = provider();
        let scope = ExecutionScope::detached();
        let handle = provider.acquire(scope).unwrap();

        provider.dispose(&handle);

        assert!(handle.is_closed());
        assert!(provider.cached(scope).is_none());
        let rebuilt = provider.acquire(scope).unwrap();
        assert!(!rebuilt.same_engine(&handle));
    }

    #[test]
    fn test_shared_engine_is_never_closed() {
        let engine = Arc::new(ProcessEngine::new(EngineConfig::default()));
        let provider = EngineProvider::shared(Arc::clone(&engine));

        let first = provider.acquire(ExecutionScope::detached()).unwrap();
        let second = provider.acquire(ExecutionScope::detached()).unwrap();
        provider.dispose(&first);

        assert!(first.same_engine(&second));
        assert!(!engine.is_closed());
        assert!(provider.is_empty());
    }

    #[test]
    fn test_missing_configuration() {
        let provider = EngineProvider::new(Arc::new(MemoryLoader::new()), "absent.cfg.yaml");
        let err = provider.acquire(ExecutionScope::detached()).unwrap_err();
        assert!(matches!(err, HarnessError::ConfigNotFound(_)));
    }
}
