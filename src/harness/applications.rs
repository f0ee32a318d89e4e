//! Ready-made process applications for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::engine::{
    lock, ExecutionListener, ProcessApplication, TaskEvent, TaskEventKind, TaskListener,
};

const APPLICATION_NAME: &str = "test-application";

/// An application with both listeners.
pub fn process_application(
    execution_listener: impl ExecutionListener + 'static,
    task_listener: impl TaskListener + 'static,
) -> ProcessApplication {
    ProcessApplication::new(APPLICATION_NAME)
        .with_execution_listener(execution_listener)
        .with_task_listener(task_listener)
}

/// Keeps `current_task` set to the name of the most recently created task.
pub fn tracking_current_task(
    execution_listener: impl ExecutionListener + 'static,
    current_task: Arc<Mutex<Option<String>>>,
) -> ProcessApplication {
    process_application(execution_listener, move |event: &TaskEvent| {
        if event.kind == TaskEventKind::Create {
            *lock(&current_task) = Some(event.name.clone());
        }
    })
}

/// Appends the name of every created task to `created_tasks`.
pub fn queueing_tasks(
    execution_listener: impl ExecutionListener + 'static,
    created_tasks: Arc<Mutex<VecDeque<String>>>,
) -> ProcessApplication {
    process_application(execution_listener, move |event: &TaskEvent| {
        if event.kind == TaskEventKind::Create {
            lock(&created_tasks).push_back(event.name.clone());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, ExecutionEvent, ProcessEngine};
    use crate::harness::fixtures::TWO_STEPS;

    fn ignore(_: &ExecutionEvent) {}

    fn engine() -> (ProcessEngine, String) {
        let engine = ProcessEngine::new(EngineConfig::default());
        let deployment = engine
            .repository()
            .create_deployment()
            .add_resource("TwoSteps.bpmn", TWO_STEPS)
            .deploy()
            .unwrap();
        (engine, deployment.id)
    }

    #[test]
    fn test_tracking_current_task() {
        let (engine, deployment_id) = engine();
        let current = Arc::new(Mutex::new(None));
        engine
            .management()
            .register_process_application(&deployment_id, tracking_current_task(ignore, Arc::clone(&current)))
            .unwrap();

        engine.runtime().start_process_instance_by_key("two_steps").unwrap();
        assert_eq!(current.lock().unwrap().as_deref(), Some("Enter data"));

        let task = engine.tasks().list().unwrap().remove(0);
        engine.tasks().complete(&task.id).unwrap();
        assert_eq!(current.lock().unwrap().as_deref(), Some("Approve"));
    }

    #[test]
    fn test_queueing_tasks() {
        let (engine, deployment_id) = engine();
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        engine
            .management()
            .register_process_application(&deployment_id, queueing_tasks(ignore, Arc::clone(&queue)))
            .unwrap();

        engine.runtime().start_process_instance_by_key("two_steps").unwrap();
        let task = engine.tasks().list().unwrap().remove(0);
        engine.tasks().complete(&task.id).unwrap();

        let queue = queue.lock().unwrap();
        assert_eq!(queue.iter().collect::<Vec<_>>(), vec!["Enter data", "Approve"]);
    }
}
