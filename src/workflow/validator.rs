//! Process Definition Validation
//!
//! Checks a parsed process model before the engine accepts it:
//! - Activity field validation
//! - Reference integrity checking
//! - Dependency graph validation (no cycles)
//! - Topological sorting

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, warn};

use super::model::{Activity, ActivityKind, ProcessModel};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone)]
pub enum ValidationError {
    EmptyKey,
    EmptyProcess,
    DuplicateActivityId(String),
    EmptyActivityId,
    InvalidReference { activity: String, reference: String },
    CyclicDependency,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyKey => write!(f, "Process has no key"),
            Self::EmptyProcess => write!(f, "Process has no activities"),
            Self::DuplicateActivityId(id) => write!(f, "Duplicate activity ID: '{}'", id),
            Self::EmptyActivityId => write!(f, "Activity has empty or whitespace-only ID"),
            Self::InvalidReference {
                activity,
                reference,
            } => {
                write!(
                    f,
                    "Activity '{}' references unknown activity '{}'",
                    activity, reference
                )
            }
            Self::CyclicDependency => {
                write!(f, "Process contains cyclic dependencies")
            }
        }
    }
}

/// Validates a single activity's fields.
fn validate_activity(activity: &Activity) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if activity.id.trim().is_empty() {
        errors.push(ValidationError::EmptyActivityId);
        return errors;
    }

    if activity.kind == ActivityKind::Start && !activity.previous.is_empty() {
        warn!(
            "Activity '{}': start activity has predecessors {:?}",
            activity.id, activity.previous
        );
    }

    errors
}

/// Validates the entire process model.
///
/// Performs the following checks:
/// 1. Key and activity list are not empty
/// 2. No duplicate activity IDs
/// 3. All activities have valid fields
/// 4. All references point to existing activities
/// 5. No cyclic dependencies
///
/// On success, the activities are reordered topologically.
pub fn validate_process(model: &mut ProcessModel) -> Result<(), String> {
    debug!(
        "Validating process '{}' with {} activities",
        model.key,
        model.activities.len()
    );

    if model.key.trim().is_empty() {
        return Err(ValidationError::EmptyKey.to_string());
    }

    if model.activities.is_empty() {
        return Err(ValidationError::EmptyProcess.to_string());
    }

    let mut seen_ids: HashSet<String> = HashSet::new();
    for activity in &model.activities {
        if !seen_ids.insert(activity.id.clone()) {
            return Err(ValidationError::DuplicateActivityId(activity.id.clone()).to_string());
        }
    }

    let mut all_errors = Vec::new();
    for activity in &model.activities {
        all_errors.extend(validate_activity(activity));

        for reference in activity.previous.iter().chain(activity.next.iter()) {
            if !seen_ids.contains(reference) {
                all_errors.push(ValidationError::InvalidReference {
                    activity: activity.id.clone(),
                    reference: reference.clone(),
                });
            }
        }
    }

    if !all_errors.is_empty() {
        let messages: Vec<String> = all_errors.iter().map(|e| e.to_string()).collect();
        return Err(messages.join("\n"));
    }

    topological_sort(model)?;

    debug!("Process '{}' validated", model.key);
    Ok(())
}

/// Performs topological sort on activities using Kahn's algorithm.
///
/// Also detects cyclic dependencies.
fn topological_sort(model: &mut ProcessModel) -> Result<(), String> {
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    for activity in &model.activities {
        in_degree.insert(activity.id.clone(), activity.previous.len());
    }

    let mut queue: VecDeque<String> = model
        .activities
        .iter()
        .filter(|a| a.previous.is_empty())
        .map(|a| a.id.clone())
        .collect();

    let mut sorted_order: Vec<String> = Vec::new();

    while let Some(current_id) = queue.pop_front() {
        sorted_order.push(current_id.clone());

        let successors: Vec<String> = model
            .get_activity(&current_id)
            .map(|a| a.next.clone())
            .unwrap_or_default();

        for successor_id in successors {
            if let Some(degree) = in_degree.get_mut(&successor_id) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push_back(successor_id);
                }
            }
        }
    }

    if sorted_order.len() != model.activities.len() {
        return Err(ValidationError::CyclicDependency.to_string());
    }

    let mut by_id: HashMap<String, Activity> = model
        .activities
        .drain(..)
        .map(|a| (a.id.clone(), a))
        .collect();

    model.activities = sorted_order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect();

    debug!(
        "Topological order: {:?}",
        model.activities.iter().map(|a| &a.id).collect::<Vec<_>>()
    );

    Ok(())
}
