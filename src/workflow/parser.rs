//! Process Definition Parser
//!
//! Parses process definitions from deployed resource bytes.
//! Supports both explicit ordering (`previous` lists) and implicit
//! ordering (activities chained in declaration order).

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use super::model::ProcessModel;
use super::validator::validate_process;

/// Parses and validates a process definition.
///
/// This function:
/// 1. Decodes the YAML document
/// 2. Populates `next` links (explicit or implicit ordering)
/// 3. Validates the model and sorts it topologically
///
/// # Example
///
/// ```
/// use flowtest::workflow::parse_process;
///
/// let yaml = b"key: p\nactivities:\n  - id: start\n    type: start\n  - id: end\n    type: end\n";
/// let model = parse_process(yaml).unwrap();
/// assert_eq!(model.activities[1].previous, vec!["start"]);
/// ```
pub fn parse_process(content: &[u8]) -> Result<ProcessModel, String> {
    let text = std::str::from_utf8(content)
        .map_err(|e| format!("Process definition is not valid UTF-8: {}", e))?;

    let mut model: ProcessModel = serde_yaml::from_str(text)
        .map_err(|e| format!("Failed to parse process definition: {}", e))?;

    debug!(
        "Parsed process '{}' with {} activities",
        model.key,
        model.activities.len()
    );

    populate_dependencies(&mut model)?;
    validate_process(&mut model)?;

    Ok(model)
}

/// Populates activity links based on the model structure.
///
/// Supports two modes:
/// - **Explicit ordering**: some activity lists `previous`; links are taken as written
/// - **Implicit ordering**: no activity lists `previous`; activities chain in declaration order
pub fn populate_dependencies(model: &mut ProcessModel) -> Result<(), String> {
    let has_explicit = model.activities.iter().any(|a| !a.previous.is_empty());

    if has_explicit {
        debug!("Process '{}': using explicit ordering", model.key);
        link_explicit(model)
    } else {
        debug!("Process '{}': chaining activities in declaration order", model.key);
        chain_in_order(model);
        Ok(())
    }
}

/// Derives `next` from `previous`, rejecting unknown references.
fn link_explicit(model: &mut ProcessModel) -> Result<(), String> {
    let ids: HashSet<String> = model.activities.iter().map(|a| a.id.clone()).collect();

    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for activity in &model.activities {
        for prev_id in &activity.previous {
            if !ids.contains(prev_id) {
                return Err(format!(
                    "Activity '{}' references unknown predecessor: '{}'",
                    activity.id, prev_id
                ));
            }
            dependents
                .entry(prev_id.clone())
                .or_default()
                .push(activity.id.clone());
        }
    }

    for activity in &mut model.activities {
        if !activity.next.is_empty() {
            warn!(
                "Activity '{}': ignoring declared next {:?}, derived from previous instead",
                activity.id, activity.next
            );
        }
        activity.next = dependents.remove(&activity.id).unwrap_or_default();
        activity.next.sort();
        activity.next.dedup();
    }

    Ok(())
}

fn chain_in_order(model: &mut ProcessModel) {
    let ids: Vec<String> = model.activities.iter().map(|a| a.id.clone()).collect();

    for (index, activity) in model.activities.iter_mut().enumerate() {
        activity.previous = index
            .checked_sub(1)
            .map(|i| vec![ids[i].clone()])
            .unwrap_or_default();
        activity.next = ids.get(index + 1).cloned().into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{Activity, ActivityKind};

    #[test]
    fn test_parse_sequential_process() {
        let yaml = br#"
key: Example_Process
name: Example Workflow
activities:
  - id: start
    type: start
  - id: review
    type: user_task
    name: Review order
  - id: end
    type: end
"#;
        let model = parse_process(yaml).unwrap();

        assert_eq!(model.key, "Example_Process");
        assert_eq!(model.activities.len(), 3);
        assert_eq!(model.activities[1].previous, vec!["start"]);
        assert_eq!(model.activities[1].next, vec!["end"]);
        assert!(model.activities[0].previous.is_empty());
    }

    #[test]
    fn test_parse_explicit_graph() {
        let yaml = br#"
key: fork
activities:
  - id: join
    type: end
    previous: [left, right]
  - id: start
    type: start
  - id: left
    type: user_task
    previous: [start]
  - id: right
    type: user_task
    previous: [start]
"#;
        let model = parse_process(yaml).unwrap();

        assert_eq!(model.activities[0].id, "start");
        assert_eq!(model.activities[3].id, "join");
        let start = model.get_activity("start").unwrap();
        assert_eq!(start.next, vec!["left", "right"]);
    }

    #[test]
    fn test_parse_rejects_malformed_yaml() {
        let err = parse_process(b"this is not: [[[ valid").unwrap_err();
        assert!(err.contains("Failed to parse"));
    }

    #[test]
    fn test_parse_rejects_unknown_field() {
        let yaml = b"key: p\nsteps: []\n";
        assert!(parse_process(yaml).is_err());
    }

    #[test]
    fn test_parse_rejects_empty_process() {
        let err = parse_process(b"key: p\nactivities: []\n").unwrap_err();
        assert!(err.contains("no activities"));
    }

    #[test]
    fn test_parse_rejects_invalid_utf8() {
        assert!(parse_process(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_link_explicit_unknown_predecessor() {
        let mut model = ProcessModel::from_activities(
            "p",
            vec![Activity::new("a", ActivityKind::UserTask).depends_on("ghost")],
        );
        let err = populate_dependencies(&mut model).unwrap_err();
        assert!(err.contains("ghost"));
    }

    #[test]
    fn test_chain_in_order_single_activity() {
        let mut model =
            ProcessModel::from_activities("p", vec![Activity::new("only", ActivityKind::Start)]);
        populate_dependencies(&mut model).unwrap();

        assert!(model.activities[0].previous.is_empty());
        assert!(model.activities[0].next.is_empty());
    }
}
