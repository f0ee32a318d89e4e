//! Error types for the engine and the test harness.

use std::fmt;

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors raised by the process engine services.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A deployed resource could not be parsed or validated.
    #[error("invalid resource '{resource}': {reason}")]
    InvalidResource { resource: String, reason: String },

    /// Deployment id is unknown to the engine.
    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    /// No process definition is deployed under the key.
    #[error("no process definition deployed with key '{0}'")]
    DefinitionNotFound(String),

    /// No decision definition is deployed under the key.
    #[error("no decision definition deployed with key '{0}'")]
    DecisionNotFound(String),

    /// Task id is unknown or the task was already completed.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Non-cascading delete of a deployment that still has running instances.
    #[error("deployment {id} still has {instances} running process instance(s)")]
    DeploymentInUse { id: String, instances: usize },

    /// Decision evaluation produced a result the hit policy forbids.
    #[error("decision '{key}' failed: {reason}")]
    DecisionFailed { key: String, reason: String },

    /// Any service call after `close()`.
    #[error("process engine '{0}' is closed")]
    Closed(String),
}

/// Errors raised by the lifecycle harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Engine configuration resource could not be found by the loader.
    #[error("engine configuration resource not found: {0}")]
    ConfigNotFound(String),

    /// Engine configuration resource is not valid YAML for `EngineConfig`.
    #[error("invalid engine configuration resource '{resource}': {source}")]
    InvalidConfig {
        resource: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// The engine rejected a resource while publishing the deployment.
    #[error("deployment failed for resource '{resource}': {source}")]
    Deployment {
        resource: String,
        #[source]
        source: EngineError,
    },

    /// `before_test` was called twice for the same run.
    #[error("execution context {0} is already prepared")]
    AlreadyPrepared(String),

    /// The operation needs a primary deployment and the context has none.
    #[error("execution context {0} has no deployment")]
    NoDeployment(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

/// Named steps of the tear-down sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    ClearAuthentication,
    EnableTenantCheck,
    UnregisterApplication,
    DeleteDeployments,
    AssertClean,
    ResetEngineState,
    DisposeEngine,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ClearAuthentication => "clear authentication",
            Self::EnableTenantCheck => "enable tenant check",
            Self::UnregisterApplication => "unregister process application",
            Self::DeleteDeployments => "delete deployments",
            Self::AssertClean => "assert clean engine",
            Self::ResetEngineState => "reset id generator and clock",
            Self::DisposeEngine => "dispose engine",
        };
        f.write_str(name)
    }
}

/// One failed tear-down step.
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub step: TeardownStep,
    pub message: String,
}

/// Aggregated tear-down failure listing every step that failed.
#[derive(Debug, Clone, Default)]
pub struct TeardownError {
    failures: Vec<StepFailure>,
}

impl TeardownError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed step.
    pub fn push(&mut self, step: TeardownStep, message: impl Into<String>) {
        self.failures.push(StepFailure {
            step,
            message: message.into(),
        });
    }

    pub fn failures(&self) -> &[StepFailure] {
        &self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns true if the given step is among the failures.
    pub fn has_failed(&self, step: TeardownStep) -> bool {
        self.failures.iter().any(|f| f.step == step)
    }

    /// `Ok(())` when nothing failed, otherwise `Err(self)`.
    pub fn into_result(self) -> std::result::Result<(), TeardownError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tear-down failed in {} step(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.step, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_error_lists_every_step() {
        let mut err = TeardownError::new();
        err.push(TeardownStep::DeleteDeployments, "deployment 7 is locked");
        err.push(TeardownStep::AssertClean, "1 deployment(s) left");

        let text = err.to_string();
        assert!(text.contains("2 step(s)"));
        assert!(text.contains("delete deployments: deployment 7 is locked"));
        assert!(text.contains("assert clean engine: 1 deployment(s) left"));
        assert!(err.has_failed(TeardownStep::AssertClean));
        assert!(!err.has_failed(TeardownStep::DisposeEngine));
    }

    #[test]
    fn test_empty_teardown_error_is_ok() {
        assert!(TeardownError::new().into_result().is_ok());
    }

    #[test]
    fn test_deployment_error_names_resource() {
        let err = HarnessError::Deployment {
            resource: "Broken.bpmn".to_string(),
            source: EngineError::InvalidResource {
                resource: "Broken.bpmn".to_string(),
                reason: "no activities".to_string(),
            },
        };
        assert!(err.to_string().contains("Broken.bpmn"));
    }
}
