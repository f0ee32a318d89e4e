//! Instance Planner
//!
//! Drives a single process instance through its model:
//! - Dependency tracking
//! - Automatic completion of non-waiting activities
//! - Wait-state bookkeeping for user tasks

use std::collections::BTreeSet;

use log::debug;
use serde::{Deserialize, Serialize};

use super::model::{Activity, ProcessModel};

/// Status of an activity within one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityStatus {
    /// Waiting for predecessors
    Pending,
    /// User task created, waiting for completion
    Waiting,
    /// Activity finished
    Completed,
}

/// Something that happened while advancing an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannerEvent {
    ActivityStarted(String),
    ActivityCompleted(String),
    /// A wait state was reached; the engine creates a task for it
    TaskCreated { activity_id: String, name: String },
}

/// Persisted progress of one instance.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceProgress {
    completed: BTreeSet<String>,
    waiting: BTreeSet<String>,
}

impl InstanceProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waiting(&self) -> impl Iterator<Item = &str> {
        self.waiting.iter().map(String::as_str)
    }
}

/// Advances an instance's progress against its model.
pub struct InstancePlanner<'a> {
    model: &'a ProcessModel,
    progress: &'a mut InstanceProgress,
}

impl<'a> InstancePlanner<'a> {
    pub fn new(model: &'a ProcessModel, progress: &'a mut InstanceProgress) -> Self {
        Self { model, progress }
    }

    /// Returns activities that are ready to start.
    ///
    /// An activity is ready if it has neither completed nor started waiting
    /// and all of its predecessors are completed.
    pub fn ready_activities(&self) -> Vec<&'a Activity> {
        self.model
            .activities
            .iter()
            .filter(|a| {
                !self.progress.completed.contains(&a.id) && !self.progress.waiting.contains(&a.id)
            })
            .filter(|a| a.previous.iter().all(|p| self.progress.completed.contains(p)))
            .collect()
    }

    pub fn status(&self, activity_id: &str) -> ActivityStatus {
        if self.progress.completed.contains(activity_id) {
            ActivityStatus::Completed
        } else if self.progress.waiting.contains(activity_id) {
            ActivityStatus::Waiting
        } else {
            ActivityStatus::Pending
        }
    }

    /// Runs every ready activity until only wait states (or nothing) remain.
    pub fn advance(&mut self) -> Vec<PlannerEvent> {
        let mut events = Vec::new();

        loop {
            let ready = self.ready_activities();
            if ready.is_empty() {
                break;
            }

            for activity in ready {
                events.push(PlannerEvent::ActivityStarted(activity.id.clone()));

                if activity.kind.is_wait_state() {
                    self.progress.waiting.insert(activity.id.clone());
                    events.push(PlannerEvent::TaskCreated {
                        activity_id: activity.id.clone(),
                        name: activity.display_name().to_string(),
                    });
                    debug!("Activity '{}' is waiting", activity.id);
                } else {
                    self.progress.completed.insert(activity.id.clone());
                    events.push(PlannerEvent::ActivityCompleted(activity.id.clone()));
                }
            }
        }

        events
    }

    /// Completes a waiting activity and advances past it.
    pub fn complete_wait_state(&mut self, activity_id: &str) -> Result<Vec<PlannerEvent>, String> {
        if !self.progress.waiting.remove(activity_id) {
            return Err(format!("Activity '{}' is not waiting", activity_id));
        }
        self.progress.completed.insert(activity_id.to_string());

        let mut events = vec![PlannerEvent::ActivityCompleted(activity_id.to_string())];
        events.extend(self.advance());
        Ok(events)
    }

    /// Returns true once every activity has completed.
    pub fn is_finished(&self) -> bool {
        self.progress.completed.len() >= self.model.activities.len()
    }

    /// Returns the current progress as (completed, total).
    pub fn progress(&self) -> (usize, usize) {
        (self.progress.completed.len(), self.model.activities.len())
    }
}
