//! Runtime services: process instances, user tasks and decision evaluation.
//!
//! Instances are advanced with [`InstancePlanner`]. Listener notifications
//! are collected while the storage lock is held and delivered after it is
//! released.

use log::{debug, info};
use serde_json::{Map, Value};

use super::application::{
    ExecutionEvent, ExecutionEventKind, Notification, TaskEvent, TaskEventKind,
};
use super::repository::{latest_decision_definition, latest_process_definition};
use super::storage::{HistoricInstance, InstanceEntity, ProcessInstance, Tables, Task};
use super::ProcessEngine;
use crate::error::{EngineError, EngineResult};
use crate::workflow::{InstancePlanner, InstanceProgress, PlannerEvent, ProcessModel};

pub struct RuntimeService<'a> {
    engine: &'a ProcessEngine,
}

impl<'a> RuntimeService<'a> {
    pub(crate) fn new(engine: &'a ProcessEngine) -> Self {
        Self { engine }
    }

    /// Starts the latest version of the process with this key.
    pub fn start_process_instance_by_key(&self, key: &str) -> EngineResult<ProcessInstance> {
        self.start(key, None)
    }

    pub fn start_process_instance_with_business_key(
        &self,
        key: &str,
        business_key: &str,
    ) -> EngineResult<ProcessInstance> {
        self.start(key, Some(business_key.to_string()))
    }

    fn start(&self, key: &str, business_key: Option<String>) -> EngineResult<ProcessInstance> {
        let engine = self.engine;
        engine.ensure_open()?;

        let (instance, deployment_id, notifications) = {
            let mut tables = engine.tables();
            let definition = latest_process_definition(&tables, key)
                .cloned()
                .ok_or_else(|| EngineError::DefinitionNotFound(key.to_string()))?;
            let model = engine.process_model(&tables, &definition)?;

            let instance = ProcessInstance {
                id: engine.next_id(&mut tables),
                definition_id: definition.id.clone(),
                definition_key: definition.key.clone(),
                business_key,
                started_at: engine.clock().now(),
                ended: false,
            };
            let mut entity = InstanceEntity {
                instance,
                progress: InstanceProgress::new(),
            };

            let mut notifications = vec![execution(ExecutionEventKind::Start, &entity, None)];
            let events = InstancePlanner::new(&model, &mut entity.progress).advance();
            notifications.extend(apply(engine, &mut tables, &model, &mut entity, events));

            let instance = entity.instance.clone();
            if !instance.ended {
                tables.instances.insert(instance.id.clone(), entity);
            }
            (instance, definition.deployment_id, notifications)
        };

        info!("Started process instance {} of '{}'", instance.id, key);
        engine.deliver(&deployment_id, notifications);
        Ok(instance)
    }

    /// Running instances.
    pub fn process_instances(&self) -> EngineResult<Vec<ProcessInstance>> {
        self.engine.ensure_open()?;
        Ok(self
            .engine
            .tables()
            .instances
            .values()
            .map(|entity| entity.instance.clone())
            .collect())
    }

    pub fn process_instance(&self, instance_id: &str) -> EngineResult<Option<ProcessInstance>> {
        self.engine.ensure_open()?;
        Ok(self
            .engine
            .tables()
            .instances
            .get(instance_id)
            .map(|entity| entity.instance.clone()))
    }

    pub fn historic_instances(&self) -> EngineResult<Vec<HistoricInstance>> {
        self.engine.ensure_open()?;
        Ok(self.engine.tables().history.values().cloned().collect())
    }
}

pub struct TaskService<'a> {
    engine: &'a ProcessEngine,
}

impl<'a> TaskService<'a> {
    pub(crate) fn new(engine: &'a ProcessEngine) -> Self {
        Self { engine }
    }

    /// Open tasks, oldest first.
    pub fn list(&self) -> EngineResult<Vec<Task>> {
        self.engine.ensure_open()?;
        let mut tasks: Vec<Task> = self.engine.tables().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| (a.created_at, id_order(&a.id)).cmp(&(b.created_at, id_order(&b.id))));
        Ok(tasks)
    }

    pub fn for_instance(&self, instance_id: &str) -> EngineResult<Vec<Task>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|task| task.instance_id == instance_id)
            .collect())
    }

    pub fn task(&self, task_id: &str) -> EngineResult<Option<Task>> {
        self.engine.ensure_open()?;
        Ok(self.engine.tables().tasks.get(task_id).cloned())
    }

    /// Completes a task and advances its instance.
    pub fn complete(&self, task_id: &str) -> EngineResult<()> {
        let engine = self.engine;
        engine.ensure_open()?;

        let (deployment_id, notifications) = {
            let mut tables = engine.tables();
            let task = tables
                .tasks
                .get(task_id)
                .cloned()
                .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
            let mut entity = tables
                .instances
                .get(&task.instance_id)
                .cloned()
                .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
            let definition = tables
                .process_definitions
                .get(&entity.instance.definition_id)
                .cloned()
                .ok_or_else(|| EngineError::DefinitionNotFound(entity.instance.definition_id.clone()))?;
            let model = engine.process_model(&tables, &definition)?;

            let mut notifications = vec![Notification::Task(TaskEvent {
                kind: TaskEventKind::Complete,
                task_id: task.id.clone(),
                name: task.name.clone(),
                instance_id: task.instance_id.clone(),
            })];

            let events = InstancePlanner::new(&model, &mut entity.progress)
                .complete_wait_state(&task.activity_id)
                .map_err(|_| EngineError::TaskNotFound(task_id.to_string()))?;
            tables.tasks.remove(task_id);
            notifications.extend(apply(engine, &mut tables, &model, &mut entity, events));

            if entity.instance.ended {
                tables.instances.remove(&entity.instance.id);
            } else {
                tables.instances.insert(entity.instance.id.clone(), entity);
            }
            (definition.deployment_id, notifications)
        };

        debug!("Completed task {}", task_id);
        engine.deliver(&deployment_id, notifications);
        Ok(())
    }
}

/// Ids are numeric strings; order them numerically.
fn id_order(id: &str) -> (usize, &str) {
    (id.len(), id)
}

/// Stores the effects of planner events and turns them into notifications.
fn apply(
    engine: &ProcessEngine,
    tables: &mut Tables,
    model: &ProcessModel,
    entity: &mut InstanceEntity,
    events: Vec<PlannerEvent>,
) -> Vec<Notification> {
    let mut notifications = Vec::with_capacity(events.len() + 1);

    for event in events {
        match event {
            PlannerEvent::ActivityStarted(activity) => {
                notifications.push(execution(ExecutionEventKind::Start, entity, Some(activity)));
            }
            PlannerEvent::ActivityCompleted(activity) => {
                notifications.push(execution(ExecutionEventKind::End, entity, Some(activity)));
            }
            PlannerEvent::TaskCreated { activity_id, name } => {
                let task = Task {
                    id: engine.next_id(tables),
                    name,
                    activity_id,
                    instance_id: entity.instance.id.clone(),
                    created_at: engine.clock().now(),
                };
                notifications.push(Notification::Task(TaskEvent {
                    kind: TaskEventKind::Create,
                    task_id: task.id.clone(),
                    name: task.name.clone(),
                    instance_id: task.instance_id.clone(),
                }));
                tables.tasks.insert(task.id.clone(), task);
            }
        }
    }

    let finished = InstancePlanner::new(model, &mut entity.progress).is_finished();
    if finished {
        entity.instance.ended = true;
        notifications.push(execution(ExecutionEventKind::End, entity, None));

        tables.history.insert(
            entity.instance.id.clone(),
            HistoricInstance {
                id: entity.instance.id.clone(),
                definition_id: entity.instance.definition_id.clone(),
                started_at: entity.instance.started_at,
                ended_at: engine.clock().now(),
            },
        );
        debug!("Process instance {} ended", entity.instance.id);
    }

    notifications
}

fn execution(kind: ExecutionEventKind, entity: &InstanceEntity, activity_id: Option<String>) -> Notification {
    Notification::Execution(ExecutionEvent {
        kind,
        instance_id: entity.instance.id.clone(),
        definition_key: entity.instance.definition_key.clone(),
        activity_id,
    })
}

pub struct DecisionService<'a> {
    engine: &'a ProcessEngine,
}

impl<'a> DecisionService<'a> {
    pub(crate) fn new(engine: &'a ProcessEngine) -> Self {
        Self { engine }
    }

    /// Evaluates the latest decision table with this key.
    pub fn evaluate(&self, key: &str, inputs: &Map<String, Value>) -> EngineResult<Vec<Value>> {
        self.engine.ensure_open()?;

        let table = {
            let tables = self.engine.tables();
            let definition = latest_decision_definition(&tables, key)
                .cloned()
                .ok_or_else(|| EngineError::DecisionNotFound(key.to_string()))?;
            self.engine.decision_table(&tables, &definition)?
        };

        table.evaluate(inputs).map_err(|reason| EngineError::DecisionFailed {
            key: key.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, ProcessApplication};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    const REVIEW: &str = "key: review\nactivities:\n  - id: start\n    type: start\n  - id: check\n    type: user_task\n    name: Check order\n  - id: end\n    type: end\n";

    fn engine_with(resource: &str, content: &str) -> (ProcessEngine, String) {
        let engine = ProcessEngine::new(EngineConfig::default());
        let deployment = engine
            .repository()
            .create_deployment()
            .add_resource(resource, content)
            .deploy()
            .unwrap();
        (engine, deployment.id)
    }

    #[test]
    fn test_instance_waits_at_user_task() {
        let (engine, _) = engine_with("Review.bpmn", REVIEW);

        let instance = engine
            .runtime()
            .start_process_instance_with_business_key("review", "order-1")
            .unwrap();

        assert_eq!(instance.business_key.as_deref(), Some("order-1"));
        assert!(!instance.ended);
        let tasks = engine.tasks().for_instance(&instance.id).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "Check order");
    }

    #[test]
    fn test_completing_task_ends_instance() {
        let (engine, _) = engine_with("Review.bpmn", REVIEW);
        let instance = engine.runtime().start_process_instance_by_key("review").unwrap();
        let task = engine.tasks().list().unwrap().remove(0);

        engine.tasks().complete(&task.id).unwrap();

        assert!(engine.runtime().process_instance(&instance.id).unwrap().is_none());
        assert!(engine.tasks().list().unwrap().is_empty());
        assert_eq!(engine.runtime().historic_instances().unwrap().len(), 1);

        let err = engine.tasks().complete(&task.id).unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound(_)));
    }

    #[test]
    fn test_unknown_key() {
        let engine = ProcessEngine::new(EngineConfig::default());
        let err = engine.runtime().start_process_instance_by_key("nope").unwrap_err();
        assert!(matches!(err, EngineError::DefinitionNotFound(_)));
    }

    #[test]
    fn test_listeners_only_for_registered_deployment() {
        let (engine, deployment_id) = engine_with("Review.bpmn", REVIEW);
        let created = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&created);

        engine.runtime().start_process_instance_by_key("review").unwrap();
        engine
            .management()
            .register_process_application(
                &deployment_id,
                ProcessApplication::new("app")
                    .with_task_listener(move |e: &TaskEvent| sink.lock().unwrap().push(e.kind)),
            )
            .unwrap();
        engine.runtime().start_process_instance_by_key("review").unwrap();

        assert_eq!(*created.lock().unwrap(), vec![TaskEventKind::Create]);
    }

    #[test]
    fn test_listener_may_call_back_into_engine() {
        let engine = Arc::new(ProcessEngine::new(EngineConfig::default()));
        let deployment = engine
            .repository()
            .create_deployment()
            .add_resource("Review.bpmn", REVIEW)
            .deploy()
            .unwrap();
        let seen = Arc::new(Mutex::new(0));
        let (inner, counter) = (Arc::downgrade(&engine), Arc::clone(&seen));

        engine
            .management()
            .register_process_application(
                &deployment.id,
                ProcessApplication::new("app").with_task_listener(move |_: &TaskEvent| {
                    if let Some(engine) = inner.upgrade() {
                        *counter.lock().unwrap() += engine.tasks().list().unwrap().len();
                    }
                }),
            )
            .unwrap();
        engine.runtime().start_process_instance_by_key("review").unwrap();

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_execution_events_in_order() {
        let (engine, deployment_id) = engine_with("Review.bpmn", REVIEW);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        engine
            .management()
            .register_process_application(
                &deployment_id,
                ProcessApplication::new("app").with_execution_listener(move |e: &ExecutionEvent| {
                    sink.lock().unwrap().push((e.kind, e.activity_id.clone()))
                }),
            )
            .unwrap();

        engine.runtime().start_process_instance_by_key("review").unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events[0], (ExecutionEventKind::Start, None));
        assert_eq!(events[1], (ExecutionEventKind::Start, Some("start".to_string())));
        assert_eq!(events[2], (ExecutionEventKind::End, Some("start".to_string())));
        assert_eq!(events[3], (ExecutionEventKind::Start, Some("check".to_string())));
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_decision_hit_policies() {
        let (engine, _) = engine_with(
            "Discount.dmn",
            "key: discount\nhit_policy: unique\nrules:\n  - when: {tier: gold}\n    then: 10\n  - when: {tier: gold}\n    then: 15\n  - when: {tier: silver}\n    then: 5\n",
        );
        let decisions = engine.decisions();

        let silver = json!({"tier": "silver"}).as_object().cloned().unwrap();
        assert_eq!(decisions.evaluate("discount", &silver).unwrap(), vec![json!(5)]);

        let gold = json!({"tier": "gold"}).as_object().cloned().unwrap();
        let err = decisions.evaluate("discount", &gold).unwrap_err();
        assert!(matches!(err, EngineError::DecisionFailed { .. }));

        let err = decisions.evaluate("missing", &silver).unwrap_err();
        assert!(matches!(err, EngineError::DecisionNotFound(_)));
    }
}
