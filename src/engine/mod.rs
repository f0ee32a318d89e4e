//! Engine Module
//!
//! An in-process workflow engine the harness provisions per execution scope.
//!
//! # Structure
//!
//! - [`config`]: Configuration resource and defaults
//! - [`storage`]: Namespaced in-memory persistence
//! - [`clock`]: Logical clock and block id generator
//! - [`application`]: Process applications and their listeners
//! - [`repository`]: Deployments and definition queries
//! - [`runtime`]: Instances, tasks and decisions
//!
//! # Example
//!
//! ```
//! use flowtest::engine::{EngineConfig, ProcessEngine};
//!
//! let engine = ProcessEngine::new(EngineConfig::default());
//! let deployment = engine
//!     .repository()
//!     .create_deployment()
//!     .add_resource("Flow.bpmn", "key: flow\nactivities:\n  - id: start\n    type: start\n")
//!     .deploy()
//!     .unwrap();
//!
//! assert_eq!(deployment.resource_names, vec!["Flow.bpmn"]);
//! engine.close();
//! ```

pub mod application;
pub mod clock;
pub mod config;
pub mod repository;
pub mod runtime;
pub mod storage;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};

pub use application::{
    ExecutionEvent, ExecutionEventKind, ExecutionListener, ProcessApplication,
    ProcessApplicationRegistration, TaskEvent, TaskEventKind, TaskListener,
};
pub use clock::{Clock, IdGenerator};
pub use config::{EngineConfig, DEFAULT_CONFIGURATION_RESOURCE};
pub use repository::{DeploymentBuilder, RepositoryService};
pub use runtime::{DecisionService, RuntimeService, TaskService};
pub use storage::{
    DecisionDefinition, Deployment, HistoricInstance, ProcessDefinition, ProcessInstance, Storage,
    Task,
};

use crate::error::{EngineError, EngineResult};
use crate::workflow::{DecisionTable, ProcessModel};
use application::Notification;
use storage::Tables;

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Parsed definitions keyed by definition id.
#[derive(Debug, Default)]
struct DefinitionCache {
    processes: HashMap<String, Arc<ProcessModel>>,
    decisions: HashMap<String, Arc<DecisionTable>>,
}

impl DefinitionCache {
    fn len(&self) -> usize {
        self.processes.len() + self.decisions.len()
    }

    fn clear(&mut self) {
        self.processes.clear();
        self.decisions.clear();
    }
}

/// Current user, their groups and tenants.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Authentication {
    pub user_id: String,
    pub groups: Vec<String>,
    pub tenant_ids: Vec<String>,
}

impl Authentication {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn with_tenants(mut self, tenants: &[&str]) -> Self {
        self.tenant_ids = tenants.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// A running engine.
///
/// All services borrow the engine; the engine itself is shared through
/// `Arc` by the harness.
#[derive(Debug)]
pub struct ProcessEngine {
    config: EngineConfig,
    storage: Storage,
    cache: Mutex<DefinitionCache>,
    clock: Clock,
    ids: IdGenerator,
    authentication: Mutex<Option<Authentication>>,
    tenant_check: AtomicBool,
    applications: Mutex<HashMap<String, ProcessApplication>>,
    closed: AtomicBool,
}

impl ProcessEngine {
    /// Builds an engine on the configuration's storage namespace.
    pub fn new(config: EngineConfig) -> Self {
        let storage = Storage::open(&config.storage_namespace);
        info!(
            "Process engine '{}' started on {}",
            config.name, config.storage_namespace
        );

        Self {
            storage,
            cache: Mutex::new(DefinitionCache::default()),
            clock: Clock::new(),
            ids: IdGenerator::new(config.id_block_size),
            authentication: Mutex::new(None),
            tenant_check: AtomicBool::new(config.tenant_check_enabled),
            applications: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage_namespace(&self) -> &str {
        self.storage.namespace()
    }

    pub fn repository(&self) -> RepositoryService<'_> {
        RepositoryService::new(self)
    }

    pub fn runtime(&self) -> RuntimeService<'_> {
        RuntimeService::new(self)
    }

    pub fn tasks(&self) -> TaskService<'_> {
        TaskService::new(self)
    }

    pub fn decisions(&self) -> DecisionService<'_> {
        DecisionService::new(self)
    }

    pub fn management(&self) -> ManagementService<'_> {
        ManagementService { engine: self }
    }

    pub fn identity(&self) -> IdentityService<'_> {
        IdentityService { engine: self }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn set_tenant_check_enabled(&self, enabled: bool) {
        self.tenant_check.store(enabled, Ordering::SeqCst);
    }

    pub fn is_tenant_check_enabled(&self) -> bool {
        self.tenant_check.load(Ordering::SeqCst)
    }

    /// Discards the current id block.
    pub fn reset_id_generator(&self) {
        self.ids.reset();
    }

    /// Lists everything left in storage and in the definition cache.
    pub fn residue(&self) -> Vec<String> {
        let mut residue = self.storage.tables().residue();
        let cached = lock(&self.cache).len();
        if cached > 0 {
            residue.push(format!("cached definitions: {}", cached));
        }
        residue
    }

    /// Empties storage and cache.
    pub fn purge(&self) {
        let mut tables = self.storage.tables();
        tables.clear();
        lock(&self.cache).clear();
        lock(&self.applications).clear();
        debug!("Purged engine '{}'", self.config.name);
    }

    /// Shuts the engine down and drops its storage; calling it again is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.cache).clear();
        lock(&self.applications).clear();
        self.storage.drop_namespace();
        info!("Process engine '{}' closed", self.config.name);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> EngineResult<()> {
        if self.is_closed() {
            return Err(EngineError::Closed(self.config.name.clone()));
        }
        Ok(())
    }

    pub(crate) fn tables(&self) -> MutexGuard<'_, Tables> {
        self.storage.tables()
    }

    /// Next id, reserving from the already locked tables when needed.
    pub(crate) fn next_id(&self, tables: &mut Tables) -> String {
        self.ids.next_id(|count| tables.reserve_ids(count))
    }

    pub(crate) fn authentication(&self) -> Option<Authentication> {
        lock(&self.authentication).clone()
    }

    /// Parsed model of a process definition; parsed on first use.
    pub(crate) fn process_model(
        &self,
        tables: &Tables,
        definition: &ProcessDefinition,
    ) -> EngineResult<Arc<ProcessModel>> {
        if let Some(model) = lock(&self.cache).processes.get(&definition.id) {
            return Ok(Arc::clone(model));
        }

        let bytes = resource_bytes(tables, &definition.deployment_id, &definition.resource_name)?;
        let model = crate::workflow::parse_process(bytes).map_err(|reason| {
            EngineError::InvalidResource {
                resource: definition.resource_name.clone(),
                reason,
            }
        })?;
        Ok(self.cache_process(&definition.id, model))
    }

    pub(crate) fn cache_process(&self, definition_id: &str, model: ProcessModel) -> Arc<ProcessModel> {
        let model = Arc::new(model);
        lock(&self.cache)
            .processes
            .insert(definition_id.to_string(), Arc::clone(&model));
        model
    }

    pub(crate) fn decision_table(
        &self,
        tables: &Tables,
        definition: &DecisionDefinition,
    ) -> EngineResult<Arc<DecisionTable>> {
        if let Some(table) = lock(&self.cache).decisions.get(&definition.id) {
            return Ok(Arc::clone(table));
        }

        let bytes = resource_bytes(tables, &definition.deployment_id, &definition.resource_name)?;
        let table = crate::workflow::parse_decision(bytes).map_err(|reason| {
            EngineError::InvalidResource {
                resource: definition.resource_name.clone(),
                reason,
            }
        })?;
        Ok(self.cache_decision(&definition.id, table))
    }

    pub(crate) fn cache_decision(&self, definition_id: &str, table: DecisionTable) -> Arc<DecisionTable> {
        let table = Arc::new(table);
        lock(&self.cache)
            .decisions
            .insert(definition_id.to_string(), Arc::clone(&table));
        table
    }

    /// Evicts every cached definition that came from the deployment.
    pub(crate) fn evict_deployment(&self, tables: &Tables, deployment_id: &str) {
        let mut cache = lock(&self.cache);
        for definition in tables.process_definitions.values() {
            if definition.deployment_id == deployment_id {
                cache.processes.remove(&definition.id);
            }
        }
        for definition in tables.decision_definitions.values() {
            if definition.deployment_id == deployment_id {
                cache.decisions.remove(&definition.id);
            }
        }
    }

    /// Hands events to the application registered for the deployment.
    ///
    /// Must be called with no engine lock held; listeners may call back
    /// into the engine.
    pub(crate) fn deliver(&self, deployment_id: &str, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        let application = lock(&self.applications).get(deployment_id).cloned();
        if let Some(application) = application {
            for notification in &notifications {
                application.dispatch(notification);
            }
        }
    }

    pub(crate) fn forget_application(&self, deployment_id: &str) -> bool {
        lock(&self.applications).remove(deployment_id).is_some()
    }
}

fn resource_bytes<'t>(tables: &'t Tables, deployment_id: &str, name: &str) -> EngineResult<&'t [u8]> {
    tables
        .deployments
        .get(deployment_id)
        .ok_or_else(|| EngineError::DeploymentNotFound(deployment_id.to_string()))?
        .resources
        .iter()
        .find(|(resource, _)| resource == name)
        .map(|(_, bytes)| bytes.as_slice())
        .ok_or_else(|| EngineError::InvalidResource {
            resource: name.to_string(),
            reason: format!("missing from deployment {}", deployment_id),
        })
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Process application registrations.
pub struct ManagementService<'a> {
    engine: &'a ProcessEngine,
}

impl<'a> ManagementService<'a> {
    /// Binds an application to a deployment, replacing any previous binding.
    pub fn register_process_application(
        &self,
        deployment_id: &str,
        application: ProcessApplication,
    ) -> EngineResult<ProcessApplicationRegistration> {
        self.engine.ensure_open()?;
        if !self.engine.tables().deployments.contains_key(deployment_id) {
            return Err(EngineError::DeploymentNotFound(deployment_id.to_string()));
        }

        debug!(
            "Registering application '{}' for deployment {}",
            application.name(),
            deployment_id
        );
        lock(&self.engine.applications).insert(deployment_id.to_string(), application);

        Ok(ProcessApplicationRegistration::new(
            deployment_id,
            self.engine.name(),
        ))
    }

    /// Removes the binding; returns false if there was none.
    pub fn unregister_process_application(&self, deployment_id: &str, remove_from_cache: bool) -> bool {
        let removed = self.engine.forget_application(deployment_id);
        if removed && remove_from_cache {
            let tables = self.engine.tables();
            self.engine.evict_deployment(&tables, deployment_id);
        }
        if removed {
            debug!("Unregistered application for deployment {}", deployment_id);
        }
        removed
    }

    pub fn has_registrations(&self) -> bool {
        !lock(&self.engine.applications).is_empty()
    }

    pub fn registration_for(&self, deployment_id: &str) -> Option<String> {
        lock(&self.engine.applications)
            .get(deployment_id)
            .map(|app| app.name().to_string())
    }
}

/// Ambient authentication.
pub struct IdentityService<'a> {
    engine: &'a ProcessEngine,
}

impl<'a> IdentityService<'a> {
    pub fn set_authenticated_user_id(&self, user_id: &str) {
        self.set_authentication(Authentication::new(user_id));
    }

    pub fn set_authentication(&self, authentication: Authentication) {
        *lock(&self.engine.authentication) = Some(authentication);
    }

    pub fn current_authentication(&self) -> Option<Authentication> {
        self.engine.authentication()
    }

    pub fn clear_authentication(&self) {
        *lock(&self.engine.authentication) = None;
    }
}
