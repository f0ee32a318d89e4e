//! The handle injected into test code.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use super::deployments::{DeploymentManager, DeploymentRecord};
use super::provider::EngineHandle;
use crate::engine::{
    DecisionService, EngineConfig, IdentityService, ManagementService, ProcessApplication,
    ProcessApplicationRegistration, ProcessEngine, RepositoryService, RuntimeService, TaskService,
};
use crate::error::{HarnessError, Result};

/// Engine services plus the current context's deployment.
#[derive(Debug, Clone)]
pub struct TestHandle {
    engine: EngineHandle,
    deployments: Arc<DeploymentManager>,
}

impl TestHandle {
    pub(crate) fn new(engine: EngineHandle, deployments: Arc<DeploymentManager>) -> Self {
        Self {
            engine,
            deployments,
        }
    }

    pub fn engine(&self) -> &ProcessEngine {
        &self.engine
    }

    pub fn engine_handle(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn configuration(&self) -> &EngineConfig {
        self.engine.config()
    }

    pub fn repository(&self) -> RepositoryService<'_> {
        self.engine.repository()
    }

    pub fn runtime(&self) -> RuntimeService<'_> {
        self.engine.runtime()
    }

    pub fn tasks(&self) -> TaskService<'_> {
        self.engine.tasks()
    }

    pub fn decisions(&self) -> DecisionService<'_> {
        self.engine.decisions()
    }

    pub fn management(&self) -> ManagementService<'_> {
        self.engine.management()
    }

    pub fn identity(&self) -> IdentityService<'_> {
        self.engine.identity()
    }

    /// Id of the context's primary deployment.
    pub fn deployment_id(&self) -> Option<String> {
        self.deployments.primary_id()
    }

    pub fn deployment(&self) -> Option<DeploymentRecord> {
        self.deployments.primary()
    }

    /// Has the deployment removed together with the primary one at tear-down.
    pub fn manage_deployment(&self, deployment_id: impl Into<String>) {
        self.deployments.register_additional(deployment_id);
    }

    /// Pins the engine clock.
    pub fn set_current_time(&self, time: DateTime<Utc>) {
        self.engine.clock().set_current_time(time);
    }

    /// Binds the application to the primary deployment.
    ///
    /// The binding is released when the returned handle is closed or
    /// dropped, and at tear-down at the latest.
    pub fn register_process_application(&self, application: ProcessApplication) -> Result<RegistrationHandle> {
        let deployment_id = self
            .deployment_id()
            .ok_or_else(|| HarnessError::NoDeployment(self.deployments.run_id().to_string()))?;

        let registration = self
            .engine
            .management()
            .register_process_application(&deployment_id, application)?;

        Ok(RegistrationHandle {
            engine: self.engine.clone(),
            deployment_id,
            registration,
            closed: false,
        })
    }

    /// Unbinds the primary deployment's application and evicts its definitions.
    pub fn unregister_process_application(&self) -> bool {
        self.unregister_process_application_with(true)
    }

    pub fn unregister_process_application_with(&self, remove_from_cache: bool) -> bool {
        match self.deployment_id() {
            Some(id) => self
                .engine
                .management()
                .unregister_process_application(&id, remove_from_cache),
            None => false,
        }
    }
}

/// A live application binding; unregistered on close or drop.
#[must_use = "the registration is released as soon as the handle is dropped"]
#[derive(Debug)]
pub struct RegistrationHandle {
    engine: EngineHandle,
    deployment_id: String,
    registration: ProcessApplicationRegistration,
    closed: bool,
}

impl RegistrationHandle {
    pub fn registration(&self) -> &ProcessApplicationRegistration {
        &self.registration
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn engine_name(&self) -> &str {
        self.registration.engine_name()
    }

    /// Unregisters now. Returns false if the binding was already gone.
    pub fn close(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;

        let removed = self
            .engine
            .management()
            .unregister_process_application(&self.deployment_id, true);
        if !removed {
            debug!(
                "Registration for deployment {} was already removed",
                self.deployment_id
            );
        }
        removed
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::fixtures::REVIEW;
    use crate::harness::resources::ResourceSet;
    use chrono::TimeZone;

    fn handle() -> TestHandle {
        let engine = EngineHandle::new(
            Arc::new(ProcessEngine::new(EngineConfig::default())),
            "test",
        );
        let deployments = Arc::new(DeploymentManager::new("Review/run()#1"));
        let mut resources = ResourceSet::new();
        resources.insert("Review.bpmn", REVIEW.as_bytes().to_vec());
        deployments.publish(resources, &engine).unwrap();
        TestHandle::new(engine, deployments)
    }

    #[test]
    fn test_registration_close() {
        let handle = handle();

        let registration = handle
            .register_process_application(ProcessApplication::new("app"))
            .unwrap();
        assert_eq!(registration.engine_name(), "default");
        assert!(handle.management().has_registrations());

        assert!(registration.close());
        assert!(!handle.management().has_registrations());
    }

    #[test]
    fn test_registration_released_on_drop() {
        let handle = handle();
        {
            let _registration = handle
                .register_process_application(ProcessApplication::new("app"))
                .unwrap();
            assert!(handle.management().has_registrations());
        }
        assert!(!handle.management().has_registrations());
    }

    #[test]
    fn test_close_after_external_unregister_is_noop() {
        let handle = handle();
        let registration = handle
            .register_process_application(ProcessApplication::new("app"))
            .unwrap();

        assert!(handle.unregister_process_application());
        assert!(!registration.close());
    }

    #[test]
    fn test_register_without_deployment() {
        let engine = EngineHandle::new(
            Arc::new(ProcessEngine::new(EngineConfig::default())),
            "test",
        );
        let handle = TestHandle::new(engine, Arc::new(DeploymentManager::new("plain")));

        let err = handle
            .register_process_application(ProcessApplication::new("app"))
            .unwrap_err();

        assert!(matches!(err, HarnessError::NoDeployment(ref run) if run == "plain"));
        assert!(!handle.unregister_process_application());
    }

    #[test]
    fn test_set_current_time_stamps_instances() {
        let handle = handle();
        let pinned = Utc.with_ymd_and_hms(2018, 6, 1, 8, 0, 0).unwrap();

        handle.set_current_time(pinned);
        let instance = handle.runtime().start_process_instance_by_key("review").unwrap();

        assert_eq!(instance.started_at, pinned);
    }

    #[test]
    fn test_manage_deployment_is_tracked() {
        let handle = handle();
        let extra = handle.repository().create_deployment().deploy().unwrap();

        handle.manage_deployment(extra.id.clone());

        assert_eq!(handle.deployments.additional(), vec![extra.id]);
    }
}
