//! Harness Module
//!
//! Per-test lifecycle around an engine: which resources a test deploys,
//! which engine it runs against, and how everything is torn down.
//!
//! # Structure
//!
//! - [`context`]: Test metadata and execution contexts
//! - [`resources`]: Resource loaders and convention-based resolution
//! - [`provider`]: One engine per execution scope
//! - [`deployments`]: Publishing and cleaning up a context's deployments
//! - [`handle`]: The handle injected into test code
//! - [`applications`]: Ready-made process applications
//! - [`coordinator`]: The lifecycle state machine

pub mod applications;
pub mod context;
pub mod coordinator;
pub mod deployments;
pub mod handle;
pub mod provider;
pub mod resources;

#[cfg(test)]
pub(crate) mod fixtures;

pub use applications::{process_application, queueing_tasks, tracking_current_task};
pub use context::{DeploymentMarker, ExecutionContext, TestClass, TestMethod};
pub use coordinator::{LifecycleCoordinator, Phase};
pub use deployments::{DeploymentManager, DeploymentRecord};
pub use handle::{RegistrationHandle, TestHandle};
pub use provider::{EngineHandle, EngineProvider, ExecutionScope};
pub use resources::{resolve, DirectoryLoader, MemoryLoader, ResourceLoader, ResourceSet};
