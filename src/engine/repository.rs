//! Repository service: deployments and the definitions they carry.

use log::{debug, info};

use super::storage::{DecisionDefinition, Deployment, DeploymentEntity, ProcessDefinition, Tables};
use super::ProcessEngine;
use crate::error::{EngineError, EngineResult};
use crate::workflow::{self, DecisionTable, ProcessModel, ResourceKind};

/// Parsed content of one resource, before it is stored.
enum Parsed {
    Process(ProcessModel),
    Decision(DecisionTable),
    Opaque,
}

pub struct RepositoryService<'a> {
    engine: &'a ProcessEngine,
}

impl<'a> RepositoryService<'a> {
    pub(crate) fn new(engine: &'a ProcessEngine) -> Self {
        Self { engine }
    }

    pub fn create_deployment(&self) -> DeploymentBuilder<'a> {
        DeploymentBuilder {
            engine: self.engine,
            name: None,
            tenant_id: None,
            resources: Vec::new(),
        }
    }

    /// Deployments visible to the current authentication.
    pub fn deployments(&self) -> EngineResult<Vec<Deployment>> {
        self.engine.ensure_open()?;
        let tenants = self.visible_tenants();
        let tables = self.engine.tables();

        Ok(tables
            .deployments
            .values()
            .map(|entity| &entity.deployment)
            .filter(|d| is_visible(d.tenant_id.as_deref(), tenants.as_deref()))
            .cloned()
            .collect())
    }

    pub fn deployment(&self, deployment_id: &str) -> EngineResult<Option<Deployment>> {
        self.engine.ensure_open()?;
        let tenants = self.visible_tenants();
        Ok(self
            .engine
            .tables()
            .deployments
            .get(deployment_id)
            .map(|entity| entity.deployment.clone())
            .filter(|d| is_visible(d.tenant_id.as_deref(), tenants.as_deref())))
    }

    /// Resource names in deployment order.
    pub fn deployment_resource_names(&self, deployment_id: &str) -> EngineResult<Vec<String>> {
        self.deployment(deployment_id)?
            .map(|d| d.resource_names)
            .ok_or_else(|| EngineError::DeploymentNotFound(deployment_id.to_string()))
    }

    pub fn resource(&self, deployment_id: &str, name: &str) -> EngineResult<Option<Vec<u8>>> {
        self.engine.ensure_open()?;
        let tables = self.engine.tables();
        let entity = tables
            .deployments
            .get(deployment_id)
            .ok_or_else(|| EngineError::DeploymentNotFound(deployment_id.to_string()))?;

        Ok(entity
            .resources
            .iter()
            .find(|(resource, _)| resource == name)
            .map(|(_, bytes)| bytes.clone()))
    }

    /// Latest version of the process definition with this key.
    pub fn process_definition(&self, key: &str) -> EngineResult<ProcessDefinition> {
        self.engine.ensure_open()?;
        latest_process_definition(&self.engine.tables(), key)
            .cloned()
            .ok_or_else(|| EngineError::DefinitionNotFound(key.to_string()))
    }

    pub fn process_definitions(&self) -> EngineResult<Vec<ProcessDefinition>> {
        self.engine.ensure_open()?;
        Ok(self
            .engine
            .tables()
            .process_definitions
            .values()
            .cloned()
            .collect())
    }

    pub fn decision_definitions(&self) -> EngineResult<Vec<DecisionDefinition>> {
        self.engine.ensure_open()?;
        Ok(self
            .engine
            .tables()
            .decision_definitions
            .values()
            .cloned()
            .collect())
    }

    /// Deletes a deployment.
    ///
    /// Without `cascade` the delete fails while instances of its definitions
    /// are still running.
    pub fn delete_deployment(&self, deployment_id: &str, cascade: bool) -> EngineResult<()> {
        self.engine.ensure_open()?;
        {
            let mut tables = self.engine.tables();
            if !tables.deployments.contains_key(deployment_id) {
                return Err(EngineError::DeploymentNotFound(deployment_id.to_string()));
            }

            let running = tables.running_instances_of(deployment_id);
            if running > 0 && !cascade {
                return Err(EngineError::DeploymentInUse {
                    id: deployment_id.to_string(),
                    instances: running,
                });
            }

            self.engine.evict_deployment(&tables, deployment_id);
            tables.remove_deployment_cascade(deployment_id);
        }
        self.engine.forget_application(deployment_id);

        info!("Deleted deployment {}", deployment_id);
        Ok(())
    }

    /// Tenants the caller may see; `None` means unrestricted.
    fn visible_tenants(&self) -> Option<Vec<String>> {
        if !self.engine.is_tenant_check_enabled() {
            return None;
        }
        self.engine
            .authentication()
            .map(|authentication| authentication.tenant_ids)
    }
}

fn is_visible(tenant_id: Option<&str>, tenants: Option<&[String]>) -> bool {
    match (tenant_id, tenants) {
        (_, None) | (None, _) => true,
        (Some(tenant), Some(allowed)) => allowed.iter().any(|t| t == tenant),
    }
}

pub(crate) fn latest_process_definition<'t>(tables: &'t Tables, key: &str) -> Option<&'t ProcessDefinition> {
    tables
        .process_definitions
        .values()
        .filter(|d| d.key == key)
        .max_by_key(|d| d.version)
}

pub(crate) fn latest_decision_definition<'t>(tables: &'t Tables, key: &str) -> Option<&'t DecisionDefinition> {
    tables
        .decision_definitions
        .values()
        .filter(|d| d.key == key)
        .max_by_key(|d| d.version)
}

/// Collects resources for one deployment.
pub struct DeploymentBuilder<'a> {
    engine: &'a ProcessEngine,
    name: Option<String>,
    tenant_id: Option<String>,
    resources: Vec<(String, Vec<u8>)>,
}

impl<'a> DeploymentBuilder<'a> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Adds a resource; adding the same name again replaces the content.
    pub fn add_resource(mut self, name: impl Into<String>, content: impl AsRef<[u8]>) -> Self {
        let name = name.into();
        let content = content.as_ref().to_vec();
        match self.resources.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = content,
            None => self.resources.push((name, content)),
        }
        self
    }

    /// Parses every resource, then stores the deployment as one unit.
    ///
    /// Nothing is stored if any resource is rejected.
    pub fn deploy(self) -> EngineResult<Deployment> {
        self.engine.ensure_open()?;

        let mut parsed = Vec::with_capacity(self.resources.len());
        for (name, content) in &self.resources {
            parsed.push(parse_resource(name, content)?);
        }

        let engine = self.engine;
        let mut tables = engine.tables();
        let deployment_id = engine.next_id(&mut tables);
        let deployed_at = engine.clock().now();

        for ((resource_name, _), artifact) in self.resources.iter().zip(parsed) {
            match artifact {
                Parsed::Process(model) => {
                    let version = latest_process_definition(&tables, &model.key)
                        .map_or(1, |d| d.version + 1);
                    let id = format!("{}:{}:{}", model.key, version, engine.next_id(&mut tables));
                    debug!("Deployed process definition {}", id);

                    tables.process_definitions.insert(
                        id.clone(),
                        ProcessDefinition {
                            id: id.clone(),
                            key: model.key.clone(),
                            name: model.name.clone(),
                            version,
                            deployment_id: deployment_id.clone(),
                            resource_name: resource_name.clone(),
                        },
                    );
                    engine.cache_process(&id, model);
                }
                Parsed::Decision(table) => {
                    let version = latest_decision_definition(&tables, &table.key)
                        .map_or(1, |d| d.version + 1);
                    let id = format!("{}:{}:{}", table.key, version, engine.next_id(&mut tables));
                    debug!("Deployed decision definition {}", id);

                    tables.decision_definitions.insert(
                        id.clone(),
                        DecisionDefinition {
                            id: id.clone(),
                            key: table.key.clone(),
                            name: table.name.clone(),
                            version,
                            deployment_id: deployment_id.clone(),
                            resource_name: resource_name.clone(),
                        },
                    );
                    engine.cache_decision(&id, table);
                }
                Parsed::Opaque => {}
            }
        }

        let deployment = Deployment {
            id: deployment_id.clone(),
            name: self.name,
            tenant_id: self.tenant_id,
            deployed_at,
            resource_names: self.resources.iter().map(|(name, _)| name.clone()).collect(),
        };
        tables.deployments.insert(
            deployment_id,
            DeploymentEntity {
                deployment: deployment.clone(),
                resources: self.resources,
            },
        );

        info!(
            "Deployment {} published with {} resource(s)",
            deployment.id,
            deployment.resource_names.len()
        );
        Ok(deployment)
    }
}

fn parse_resource(name: &str, content: &[u8]) -> EngineResult<Parsed> {
    let invalid = |reason: String| EngineError::InvalidResource {
        resource: name.to_string(),
        reason,
    };

    match workflow::resource_kind(name) {
        ResourceKind::Process => workflow::parse_process(content)
            .map(Parsed::Process)
            .map_err(invalid),
        ResourceKind::Decision => workflow::parse_decision(content)
            .map(Parsed::Decision)
            .map_err(invalid),
        ResourceKind::Other => Ok(Parsed::Opaque),
    }
}
