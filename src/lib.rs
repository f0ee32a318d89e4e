//! flowtest - Test Lifecycle Harness for Workflow Engines
//!
//! Gives every test an isolated engine, deploys the workflow resources the
//! test names or that follow the naming convention, hands the test a handle
//! to the engine and tears everything down afterwards. Tests running on
//! different threads never share an engine.
//!
//! # Architecture
//!
//! The library is organized into three main modules:
//!
//! - [`workflow`]: Process definitions, decision tables and instance planning
//! - [`engine`]: The in-process engine the harness provisions
//! - [`harness`]: Resource resolution and the per-test lifecycle
//!
//! # Example
//!
//! ```rust,no_run
//! use flowtest::{DeploymentMarker, DirectoryLoader, ExecutionContext, LifecycleCoordinator};
//! use flowtest::{TestClass, TestMethod};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     flowtest::logging::init();
//!
//!     // Resources and flowtest.cfg.yaml live under tests/resources
//!     let coordinator = LifecycleCoordinator::new(DirectoryLoader::new("tests/resources"));
//!
//!     let class = TestClass::new("OrderTest").in_package("com.acme");
//!     let method = TestMethod::new("approves").with_deployment(DeploymentMarker::new());
//!     let ctx = ExecutionContext::new(class, method);
//!
//!     coordinator.run(&ctx, |handle| {
//!         let instance = handle.runtime().start_process_instance_by_key("order")?;
//!         for task in handle.tasks().for_instance(&instance.id)? {
//!             handle.tasks().complete(&task.id)?;
//!         }
//!         Ok::<_, flowtest::EngineError>(())
//!     })??;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod harness;
pub mod logging;
pub mod workflow;

// Re-export commonly used types
pub use engine::{EngineConfig, ProcessApplication, ProcessEngine};
pub use error::{EngineError, HarnessError, Result, TeardownError};
pub use harness::{
    DeploymentMarker, DirectoryLoader, ExecutionContext, LifecycleCoordinator, MemoryLoader,
    RegistrationHandle, TestClass, TestHandle, TestMethod,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const APP_NAME: &str = "flowtest";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "flowtest");
    }

    #[test]
    fn test_module_exports_coordinator() {
        logging::init();
        let coordinator = LifecycleCoordinator::new(MemoryLoader::new());
        assert_eq!(
            coordinator.configuration_resource(),
            engine::DEFAULT_CONFIGURATION_RESOURCE
        );
    }

    #[test]
    fn test_module_exports_context() {
        let ctx = ExecutionContext::new(
            TestClass::new("Flow").with_deployment(DeploymentMarker::new()),
            TestMethod::new("run"),
        );
        assert!(ctx.has_deployment_marker());
    }
}
