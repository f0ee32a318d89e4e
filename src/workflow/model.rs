//! Process Definition Model
//!
//! Core data structures representing the activities of a deployable process
//! and their ordering.
//!
//! # Example YAML Format
//!
//! ```yaml
//! key: Example_Process
//! name: Example Workflow
//! activities:
//!   - id: start
//!     type: start
//!
//!   - id: review
//!     type: user_task
//!     name: Review order
//!
//!   - id: end
//!     type: end
//! ```
//!
//! Without any `previous` entries the activities run in declaration order.
//! With explicit `previous` lists the graph is taken as written.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Kind of activity, deciding whether it waits for a task completion.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Start,
    UserTask,
    ServiceTask,
    End,
}

impl ActivityKind {
    /// User tasks wait for `complete`; everything else completes on arrival.
    pub fn is_wait_state(self) -> bool {
        matches!(self, Self::UserTask)
    }
}

/// A single activity in a process definition.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Activity {
    /// Unique identifier within the process
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ActivityKind,

    /// Display name; user tasks carry it onto the created task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// IDs of activities that must complete before this one starts
    #[serde(default)]
    pub previous: Vec<String>,

    /// IDs of activities that follow this one (auto-populated)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next: Vec<String>,
}

impl Activity {
    /// Creates a new activity.
    ///
    /// # Example
    ///
    /// ```
    /// use flowtest::workflow::{Activity, ActivityKind};
    ///
    /// let review = Activity::new("review", ActivityKind::UserTask)
    ///     .with_name("Review order")
    ///     .depends_on("start");
    /// assert!(review.kind.is_wait_state());
    /// ```
    pub fn new(id: impl Into<String>, kind: ActivityKind) -> Self {
        Self {
            id: id.into().trim().to_string(),
            kind,
            name: None,
            previous: Vec::new(),
            next: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a dependency on another activity.
    pub fn depends_on(mut self, activity_id: impl Into<String>) -> Self {
        self.previous.push(activity_id.into());
        self
    }

    /// Name shown on tasks, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A complete process definition with its activities.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProcessModel {
    /// Key used to start instances
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Activities, topologically ordered after validation
    #[serde(default)]
    pub activities: Vec<Activity>,
}

impl ProcessModel {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            activities: Vec::new(),
        }
    }

    /// Creates a model from a list of activities.
    pub fn from_activities(key: impl Into<String>, activities: Vec<Activity>) -> Self {
        Self {
            key: key.into(),
            name: None,
            activities,
        }
    }

    /// Adds an activity to the model.
    pub fn add_activity(&mut self, activity: Activity) -> Result<(), String> {
        if self.activities.iter().any(|a| a.id == activity.id) {
            return Err(format!("Activity '{}' already exists", activity.id));
        }
        self.activities.push(activity);
        Ok(())
    }

    pub fn get_activity(&self, id: &str) -> Option<&Activity> {
        self.activities.iter().find(|a| a.id == id)
    }

    pub fn get_activity_mut(&mut self, id: &str) -> Option<&mut Activity> {
        self.activities.iter_mut().find(|a| a.id == id)
    }

    /// Returns activities with no dependencies (entry points).
    pub fn root_activities(&self) -> Vec<&Activity> {
        self.activities.iter().filter(|a| a.previous.is_empty()).collect()
    }

    /// IDs of all user tasks in the model.
    pub fn user_task_ids(&self) -> HashSet<&str> {
        self.activities
            .iter()
            .filter(|a| a.kind.is_wait_state())
            .map(|a| a.id.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}
