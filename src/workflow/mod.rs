//! Definition Module
//!
//! Data structures and parsing for the artifacts a deployment carries:
//! process definitions and decision tables.
//!
//! # Structure
//!
//! - [`model`]: Core process data structures (Activity, ProcessModel)
//! - [`parser`]: YAML parsing and ordering
//! - [`validator`]: Validation rules and dependency checking
//! - [`planner`]: Per-instance progress through a model
//! - [`decision`]: Decision tables and their evaluation

pub mod decision;
pub mod model;
pub mod parser;
pub mod planner;
pub mod validator;

pub use decision::{parse_decision, DecisionTable, HitPolicy};
pub use model::{Activity, ActivityKind, ProcessModel};
pub use parser::parse_process;
pub use planner::{InstancePlanner, InstanceProgress, PlannerEvent};

/// Filename suffixes recognised as process definitions.
pub const PROCESS_SUFFIXES: &[&str] = &["bpmn", "bpmn.yaml"];

/// Filename suffixes recognised as decision tables.
pub const DECISION_SUFFIXES: &[&str] = &["dmn", "dmn.yaml"];

/// Every suffix tried by convention-based resource resolution, in lookup order.
pub const RESOURCE_SUFFIXES: &[&str] = &["bpmn", "bpmn.yaml", "dmn", "dmn.yaml"];

/// Kind of artifact a resource name denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Process,
    Decision,
    Other,
}

/// Classifies a resource by its name's suffix.
pub fn resource_kind(name: &str) -> ResourceKind {
    let has_suffix = |suffixes: &[&str]| {
        suffixes
            .iter()
            .any(|suffix| name.ends_with(&format!(".{}", suffix)))
    };

    if has_suffix(PROCESS_SUFFIXES) {
        ResourceKind::Process
    } else if has_suffix(DECISION_SUFFIXES) {
        ResourceKind::Decision
    } else {
        ResourceKind::Other
    }
}
