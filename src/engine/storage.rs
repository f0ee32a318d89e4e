//! Engine Storage
//!
//! In-memory persistence for engine entities, addressed by namespace.
//!
//! Namespaces live in a process-wide registry: opening the same namespace
//! twice yields the same tables, the way two connections to the same named
//! in-memory database see the same rows. The provider hands every engine a
//! fresh `mem:<uuid>` namespace, so engines never share data unless a caller
//! asks for it explicitly.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::debug;
use once_cell::sync::Lazy;
use serde::Serialize;

use super::lock;
use crate::workflow::InstanceProgress;

static NAMESPACES: Lazy<Mutex<HashMap<String, Arc<Mutex<Tables>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// A published deployment.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub id: String,
    pub name: Option<String>,
    pub tenant_id: Option<String>,
    pub deployed_at: DateTime<Utc>,
    /// Resource names in the order they were added
    pub resource_names: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProcessDefinition {
    pub id: String,
    pub key: String,
    pub name: Option<String>,
    pub version: u32,
    pub deployment_id: String,
    pub resource_name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DecisionDefinition {
    pub id: String,
    pub key: String,
    pub name: Option<String>,
    pub version: u32,
    pub deployment_id: String,
    pub resource_name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProcessInstance {
    pub id: String,
    pub definition_id: String,
    pub definition_key: String,
    pub business_key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub activity_id: String,
    pub instance_id: String,
    pub created_at: DateTime<Utc>,
}

/// A finished instance kept for history queries.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct HistoricInstance {
    pub id: String,
    pub definition_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct DeploymentEntity {
    pub deployment: Deployment,
    pub resources: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone)]
pub(crate) struct InstanceEntity {
    pub instance: ProcessInstance,
    pub progress: InstanceProgress,
}

/// All rows of one namespace.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    /// Next id not yet reserved by any id block
    pub next_dbid: u64,
    pub deployments: BTreeMap<String, DeploymentEntity>,
    pub process_definitions: BTreeMap<String, ProcessDefinition>,
    pub decision_definitions: BTreeMap<String, DecisionDefinition>,
    pub instances: BTreeMap<String, InstanceEntity>,
    pub tasks: BTreeMap<String, Task>,
    pub history: BTreeMap<String, HistoricInstance>,
}

impl Tables {
    /// Reserves `count` consecutive ids, returning the first.
    pub fn reserve_ids(&mut self, count: u64) -> u64 {
        let first = self.next_dbid.max(1);
        self.next_dbid = first + count;
        first
    }

    /// Describes every non-empty table.
    pub fn residue(&self) -> Vec<String> {
        let counts = [
            ("deployments", self.deployments.len()),
            ("process definitions", self.process_definitions.len()),
            ("decision definitions", self.decision_definitions.len()),
            ("process instances", self.instances.len()),
            ("tasks", self.tasks.len()),
            ("historic instances", self.history.len()),
        ];

        counts
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(table, count)| format!("{}: {}", table, count))
            .collect()
    }

    /// Deletes every row; the id counter survives so ids are never reused.
    pub fn clear(&mut self) {
        let next_dbid = self.next_dbid;
        *self = Tables {
            next_dbid,
            ..Tables::default()
        };
    }

    /// Removes a deployment and everything created from it.
    pub fn remove_deployment_cascade(&mut self, deployment_id: &str) -> Option<DeploymentEntity> {
        let entity = self.deployments.remove(deployment_id)?;

        let definition_ids: Vec<String> = self
            .process_definitions
            .values()
            .filter(|d| d.deployment_id == deployment_id)
            .map(|d| d.id.clone())
            .collect();

        self.process_definitions
            .retain(|_, d| d.deployment_id != deployment_id);
        self.decision_definitions
            .retain(|_, d| d.deployment_id != deployment_id);

        let instance_ids: Vec<String> = self
            .instances
            .values()
            .filter(|i| definition_ids.contains(&i.instance.definition_id))
            .map(|i| i.instance.id.clone())
            .collect();

        self.instances
            .retain(|id, _| !instance_ids.contains(id));
        self.tasks
            .retain(|_, t| !instance_ids.contains(&t.instance_id));
        self.history
            .retain(|_, h| !definition_ids.contains(&h.definition_id));

        Some(entity)
    }

    /// Number of running instances of definitions from the deployment.
    pub fn running_instances_of(&self, deployment_id: &str) -> usize {
        self.instances
            .values()
            .filter(|i| {
                self.process_definitions
                    .get(&i.instance.definition_id)
                    .is_some_and(|d| d.deployment_id == deployment_id)
            })
            .count()
    }
}

/// Handle on one namespace's tables.
#[derive(Debug, Clone)]
pub struct Storage {
    namespace: String,
    tables: Arc<Mutex<Tables>>,
}

impl Storage {
    /// Opens a namespace, creating it on first use.
    pub fn open(namespace: &str) -> Self {
        let mut registry = lock(&NAMESPACES);
        let tables = registry
            .entry(namespace.to_string())
            .or_insert_with(|| {
                debug!("Creating storage namespace {}", namespace);
                Arc::new(Mutex::new(Tables::default()))
            })
            .clone();

        Self {
            namespace: namespace.to_string(),
            tables,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns true if the namespace is currently registered.
    pub fn exists(namespace: &str) -> bool {
        lock(&NAMESPACES).contains_key(namespace)
    }

    /// Unregisters the namespace; later `open` calls start empty.
    pub fn drop_namespace(&self) {
        if lock(&NAMESPACES).remove(&self.namespace).is_some() {
            debug!("Dropped storage namespace {}", self.namespace);
        }
    }

    pub(crate) fn tables(&self) -> MutexGuard<'_, Tables> {
        lock(&self.tables)
    }
}
