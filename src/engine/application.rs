//! Process applications: listener sets bound to a deployment.
//!
//! While an application is registered for a deployment, the engine calls its
//! listeners for every instance of a definition from that deployment.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Execution event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionEventKind {
    Start,
    End,
}

/// Process or activity start/end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionEvent {
    pub kind: ExecutionEventKind,
    pub instance_id: String,
    pub definition_key: String,
    /// `None` for the process instance itself
    pub activity_id: Option<String>,
}

/// Task event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEventKind {
    Create,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task_id: String,
    pub name: String,
    pub instance_id: String,
}

pub trait ExecutionListener: Send + Sync {
    fn notify(&self, event: &ExecutionEvent);
}

impl<F> ExecutionListener for F
where
    F: Fn(&ExecutionEvent) + Send + Sync,
{
    fn notify(&self, event: &ExecutionEvent) {
        self(event)
    }
}

pub trait TaskListener: Send + Sync {
    fn notify(&self, event: &TaskEvent);
}

impl<F> TaskListener for F
where
    F: Fn(&TaskEvent) + Send + Sync,
{
    fn notify(&self, event: &TaskEvent) {
        self(event)
    }
}

/// A named set of listeners.
#[derive(Clone)]
pub struct ProcessApplication {
    name: String,
    execution_listener: Option<Arc<dyn ExecutionListener>>,
    task_listener: Option<Arc<dyn TaskListener>>,
}

impl ProcessApplication {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            execution_listener: None,
            task_listener: None,
        }
    }

    pub fn with_execution_listener(mut self, listener: impl ExecutionListener + 'static) -> Self {
        self.execution_listener = Some(Arc::new(listener));
        self
    }

    pub fn with_task_listener(mut self, listener: impl TaskListener + 'static) -> Self {
        self.task_listener = Some(Arc::new(listener));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn dispatch(&self, event: &Notification) {
        match event {
            Notification::Execution(e) => {
                if let Some(listener) = &self.execution_listener {
                    listener.notify(e);
                }
            }
            Notification::Task(e) => {
                if let Some(listener) = &self.task_listener {
                    listener.notify(e);
                }
            }
        }
    }
}

impl fmt::Debug for ProcessApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessApplication")
            .field("name", &self.name)
            .field("execution_listener", &self.execution_listener.is_some())
            .field("task_listener", &self.task_listener.is_some())
            .finish()
    }
}

/// Event queued while the engine holds its locks, delivered afterwards.
#[derive(Debug, Clone)]
pub(crate) enum Notification {
    Execution(ExecutionEvent),
    Task(TaskEvent),
}

/// Result of registering an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessApplicationRegistration {
    deployment_ids: BTreeSet<String>,
    engine_name: String,
}

impl ProcessApplicationRegistration {
    pub(crate) fn new(deployment_id: &str, engine_name: &str) -> Self {
        Self {
            deployment_ids: std::iter::once(deployment_id.to_string()).collect(),
            engine_name: engine_name.to_string(),
        }
    }

    pub fn deployment_ids(&self) -> &BTreeSet<String> {
        &self.deployment_ids
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_dispatch_routes_by_kind() {
        let executions = Arc::new(Mutex::new(Vec::new()));
        let tasks = Arc::new(Mutex::new(Vec::new()));
        let (e, t) = (Arc::clone(&executions), Arc::clone(&tasks));

        let app = ProcessApplication::new("app")
            .with_execution_listener(move |ev: &ExecutionEvent| e.lock().unwrap().push(ev.kind))
            .with_task_listener(move |ev: &TaskEvent| t.lock().unwrap().push(ev.name.clone()));

        app.dispatch(&Notification::Execution(ExecutionEvent {
            kind: ExecutionEventKind::Start,
            instance_id: "1".to_string(),
            definition_key: "p".to_string(),
            activity_id: None,
        }));
        app.dispatch(&Notification::Task(TaskEvent {
            kind: TaskEventKind::Create,
            task_id: "2".to_string(),
            name: "Review".to_string(),
            instance_id: "1".to_string(),
        }));

        assert_eq!(*executions.lock().unwrap(), vec![ExecutionEventKind::Start]);
        assert_eq!(*tasks.lock().unwrap(), vec!["Review".to_string()]);
    }

    #[test]
    fn test_missing_listener_is_ignored() {
        let app = ProcessApplication::new("quiet");
        app.dispatch(&Notification::Task(TaskEvent {
            kind: TaskEventKind::Complete,
            task_id: "2".to_string(),
            name: "Review".to_string(),
            instance_id: "1".to_string(),
        }));
        assert!(format!("{:?}", app).contains("quiet"));
    }
}
