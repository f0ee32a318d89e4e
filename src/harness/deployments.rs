//! Deployment tracking for one execution context.

use std::sync::Mutex;

use log::{debug, info, warn};

use super::provider::EngineHandle;
use super::resources::ResourceSet;
use crate::engine::lock;
use crate::error::{EngineError, EngineResult, HarnessError, Result};

/// The primary deployment of a context.
#[derive(Debug, Clone)]
pub struct DeploymentRecord {
    pub id: String,
    /// Deployment name; the context's run id
    pub name: String,
    pub resource_names: Vec<String>,
    pub engine: EngineHandle,
}

/// Owns a context's primary deployment and any additional ones.
#[derive(Debug)]
pub struct DeploymentManager {
    run_id: String,
    primary: Mutex<Option<DeploymentRecord>>,
    additional: Mutex<Vec<String>>,
}

impl DeploymentManager {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            primary: Mutex::new(None),
            additional: Mutex::new(Vec::new()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Deploys every resource as one unit named after the run id.
    ///
    /// The record replaces any previous primary deployment of the context.
    pub fn publish(&self, resources: ResourceSet, engine: &EngineHandle) -> Result<DeploymentRecord> {
        let mut builder = engine.repository().create_deployment().name(&self.run_id);
        for (name, content) in resources {
            builder = builder.add_resource(name, content);
        }

        let deployment = builder.deploy().map_err(|err| {
            if let EngineError::InvalidResource { resource, .. } = &err {
                let resource = resource.clone();
                return HarnessError::Deployment {
                    resource,
                    source: err,
                };
            }
            HarnessError::Engine(err)
        })?;

        let record = DeploymentRecord {
            id: deployment.id,
            name: self.run_id.clone(),
            resource_names: deployment.resource_names,
            engine: engine.clone(),
        };
        info!(
            "Published deployment {} for {} ({} resource(s))",
            record.id,
            self.run_id,
            record.resource_names.len()
        );

        *lock(&self.primary) = Some(record.clone());
        Ok(record)
    }

    pub fn primary(&self) -> Option<DeploymentRecord> {
        lock(&self.primary).clone()
    }

    pub fn primary_id(&self) -> Option<String> {
        lock(&self.primary).as_ref().map(|record| record.id.clone())
    }

    /// Tracks a deployment made by test code so cleanup removes it too.
    pub fn register_additional(&self, deployment_id: impl Into<String>) {
        let deployment_id = deployment_id.into();
        debug!("Tracking additional deployment {} for {}", deployment_id, self.run_id);
        lock(&self.additional).push(deployment_id);
    }

    pub fn additional(&self) -> Vec<String> {
        lock(&self.additional).clone()
    }

    /// Deletes the primary deployment, then every additional one in order.
    ///
    /// Every deletion is attempted; the first failure is returned. Already
    /// deleted deployments are skipped. All records are cleared either way.
    pub fn cleanup(&self, engine: &EngineHandle) -> EngineResult<()> {
        let repository = engine.repository();
        self.cleanup_with(|deployment_id| repository.delete_deployment(deployment_id, true))
    }

    fn cleanup_with(&self, mut delete: impl FnMut(&str) -> EngineResult<()>) -> EngineResult<()> {
        let primary = lock(&self.primary).take();
        let additional = std::mem::take(&mut *lock(&self.additional));

        let mut first_error = None;
        for deployment_id in primary.map(|record| record.id).into_iter().chain(additional) {
            match delete(&deployment_id) {
                Ok(()) => {}
                Err(EngineError::DeploymentNotFound(_)) => {
                    debug!("Deployment {} already deleted", deployment_id);
                }
                Err(err) => {
                    warn!("Failed to delete deployment {}: {}", deployment_id, err);
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
