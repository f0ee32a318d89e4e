//! Lifecycle Coordinator
//!
//! Drives one test invocation through
//! `Idle → Preparing → Ready → Running → TearingDown → Idle`:
//!
//! - **before_test**: resolve resources, acquire the scope's engine, publish
//!   the deployment. Without a deployment marker nothing happens.
//! - **resolve_handle**: hand the [`TestHandle`] to the test body.
//! - **after_test**: clear authentication, re-enable the tenant check,
//!   unregister the application, delete deployments, assert a clean engine
//!   (strict clean only), reset ids and clock, dispose the engine (strict
//!   clean only). Every step runs; failures are reported together.
//!
//! One coordinator may be shared by tests running on many threads.
//!
//! # Example
//!
//! ```
//! use flowtest::harness::{
//!     DeploymentMarker, ExecutionContext, LifecycleCoordinator, MemoryLoader, TestClass, TestMethod,
//! };
//!
//! let loader = MemoryLoader::new()
//!     .with("flowtest.cfg.yaml", "name: docs\n")
//!     .with("Simple.bpmn", "key: simple\nactivities:\n  - id: start\n    type: start\n");
//! let coordinator = LifecycleCoordinator::new(loader);
//!
//! let class = TestClass::new("Simple").with_deployment(DeploymentMarker::new());
//! let ctx = ExecutionContext::new(class, TestMethod::new("starts"));
//!
//! coordinator
//!     .run(&ctx, |handle| {
//!         let instance = handle.runtime().start_process_instance_by_key("simple").unwrap();
//!         assert!(instance.ended);
//!     })
//!     .unwrap();
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use super::context::ExecutionContext;
use super::deployments::DeploymentManager;
use super::handle::TestHandle;
use super::provider::{EngineHandle, EngineProvider, ExecutionScope};
use super::resources::{resolve, ResourceLoader};
use crate::engine::{lock, ProcessEngine, DEFAULT_CONFIGURATION_RESOURCE};
use crate::error::{HarnessError, Result, TeardownError, TeardownStep};

/// Lifecycle phase of one execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Preparing,
    Ready,
    Running,
    TearingDown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Preparing => "preparing",
            Phase::Ready => "ready",
            Phase::Running => "running",
            Phase::TearingDown => "tearing down",
        };
        f.write_str(name)
    }
}

struct ContextState {
    phase: Phase,
    /// Set only by `before_test`; tear-down runs only for prepared contexts
    prepared: bool,
    engine: Option<EngineHandle>,
    deployments: Arc<DeploymentManager>,
}

impl ContextState {
    fn new(run_id: &str, phase: Phase) -> Self {
        Self {
            phase,
            prepared: phase == Phase::Preparing,
            engine: None,
            deployments: Arc::new(DeploymentManager::new(run_id)),
        }
    }
}

pub struct LifecycleCoordinator {
    loader: Arc<dyn ResourceLoader>,
    provider: EngineProvider,
    contexts: Mutex<HashMap<String, ContextState>>,
}

impl LifecycleCoordinator {
    /// Builds engines from the default configuration resource.
    pub fn new(loader: impl ResourceLoader + 'static) -> Self {
        Self::with_configuration_resource(loader, DEFAULT_CONFIGURATION_RESOURCE)
    }

    pub fn with_configuration_resource(
        loader: impl ResourceLoader + 'static,
        configuration_resource: impl Into<String>,
    ) -> Self {
        let loader: Arc<dyn ResourceLoader> = Arc::new(loader);
        Self {
            provider: EngineProvider::new(Arc::clone(&loader), configuration_resource),
            loader,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Uses a caller-supplied engine for every test; it is never closed here.
    pub fn with_engine(loader: impl ResourceLoader + 'static, engine: Arc<ProcessEngine>) -> Self {
        Self {
            loader: Arc::new(loader),
            provider: EngineProvider::shared(engine),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider(&self) -> &EngineProvider {
        &self.provider
    }

    pub fn configuration_resource(&self) -> &str {
        self.provider.configuration_resource()
    }

    pub fn phase(&self, ctx: &ExecutionContext) -> Phase {
        lock(&self.contexts)
            .get(ctx.run_id())
            .map_or(Phase::Idle, |state| state.phase)
    }

    fn update(&self, ctx: &ExecutionContext, apply: impl FnOnce(&mut ContextState)) {
        if let Some(state) = lock(&self.contexts).get_mut(ctx.run_id()) {
            apply(state);
        }
    }

    /// Prepares the context: resolve, acquire, publish.
    ///
    /// On error the context stays prepared far enough for `after_test` to
    /// clean up whatever was created.
    pub fn before_test(&self, ctx: &ExecutionContext) -> Result<()> {
        let deployments = {
            let mut contexts = lock(&self.contexts);
            if contexts.contains_key(ctx.run_id()) {
                return Err(HarnessError::AlreadyPrepared(ctx.run_id().to_string()));
            }
            if !ctx.has_deployment_marker() {
                debug!("{} has no deployment marker", ctx);
                return Ok(());
            }

            let state = ContextState::new(ctx.run_id(), Phase::Preparing);
            let deployments = Arc::clone(&state.deployments);
            contexts.insert(ctx.run_id().to_string(), state);
            deployments
        };

        let resources = resolve(ctx, self.loader.as_ref());
        let engine = self.provider.acquire(ExecutionScope::current())?;
        self.update(ctx, |state| state.engine = Some(engine.clone()));

        deployments.publish(resources, &engine)?;
        self.update(ctx, |state| state.phase = Phase::Ready);
        Ok(())
    }

    /// The handle for this context's test body.
    ///
    /// Without a deployment marker the handle carries the scope's engine
    /// and no deployment, and `after_test` leaves that engine as it is.
    pub fn resolve_handle(&self, ctx: &ExecutionContext) -> Result<TestHandle> {
        let existing = lock(&self.contexts)
            .get(ctx.run_id())
            .and_then(|state| state.engine.clone());
        let engine = match existing {
            Some(engine) => engine,
            None => self.provider.acquire(ExecutionScope::current())?,
        };

        let mut contexts = lock(&self.contexts);
        let state = contexts
            .entry(ctx.run_id().to_string())
            .or_insert_with(|| ContextState::new(ctx.run_id(), Phase::Idle));
        state.engine.get_or_insert_with(|| engine.clone());
        state.phase = Phase::Running;

        Ok(TestHandle::new(engine, Arc::clone(&state.deployments)))
    }

    /// Tears the context down and forgets it.
    ///
    /// A context that was never prepared is forgotten without touching its
    /// engine.
    pub fn after_test(&self, ctx: &ExecutionContext) -> Result<()> {
        let (engine, deployments) = {
            let mut contexts = lock(&self.contexts);
            let Some(state) = contexts.get_mut(ctx.run_id()) else {
                return Ok(());
            };
            if !state.prepared {
                debug!("{} was never prepared, nothing to tear down", ctx);
                contexts.remove(ctx.run_id());
                return Ok(());
            }
            state.phase = Phase::TearingDown;
            (state.engine.clone(), Arc::clone(&state.deployments))
        };

        let outcome = match engine {
            Some(engine) => self.tear_down(ctx, &engine, &deployments),
            None => Ok(()),
        };
        lock(&self.contexts).remove(ctx.run_id());

        outcome.map_err(HarnessError::from)
    }

    fn tear_down(
        &self,
        ctx: &ExecutionContext,
        engine: &EngineHandle,
        deployments: &DeploymentManager,
    ) -> std::result::Result<(), TeardownError> {
        let strict_clean = ctx.strict_clean();
        let mut failures = TeardownError::new();

        guarded(&mut failures, TeardownStep::ClearAuthentication, || {
            engine.identity().clear_authentication();
            Ok(())
        });
        guarded(&mut failures, TeardownStep::EnableTenantCheck, || {
            engine.set_tenant_check_enabled(true);
            Ok(())
        });
        guarded(&mut failures, TeardownStep::UnregisterApplication, || {
            if let Some(deployment_id) = deployments.primary_id() {
                if engine
                    .management()
                    .unregister_process_application(&deployment_id, true)
                {
                    debug!("Released application left registered by {}", ctx);
                }
            }
            Ok(())
        });
        guarded(&mut failures, TeardownStep::DeleteDeployments, || {
            deployments.cleanup(engine).map_err(|err| err.to_string())
        });
        if strict_clean {
            guarded(&mut failures, TeardownStep::AssertClean, || assert_clean(engine));
        }
        guarded(&mut failures, TeardownStep::ResetEngineState, || {
            engine.reset_id_generator();
            engine.clock().reset();
            Ok(())
        });
        if strict_clean {
            guarded(&mut failures, TeardownStep::DisposeEngine, || {
                self.provider.dispose(engine);
                Ok(())
            });
        }

        if failures.is_empty() {
            info!("Tore down {}", ctx);
        } else {
            warn!("Tore down {} with {} failed step(s)", ctx, failures.failures().len());
        }
        failures.into_result()
    }

    /// Runs a whole test: prepare, body, tear down.
    ///
    /// Tear-down runs even if preparation fails or the body panics. A
    /// preparation error is reported in preference to tear-down errors; a
    /// panic is resumed after tear-down.
    pub fn run<T>(&self, ctx: &ExecutionContext, body: impl FnOnce(&TestHandle) -> T) -> Result<T> {
        let outcome = self
            .before_test(ctx)
            .and_then(|()| self.resolve_handle(ctx))
            .map(|handle| panic::catch_unwind(AssertUnwindSafe(|| body(&handle))));

        let teardown = self.after_test(ctx);

        match outcome {
            Err(err) => {
                if let Err(teardown) = teardown {
                    warn!("Tear-down after failed preparation of {}: {}", ctx, teardown);
                }
                Err(err)
            }
            Ok(Err(payload)) => {
                if let Err(teardown) = teardown {
                    warn!("Tear-down after panic in {}: {}", ctx, teardown);
                }
                panic::resume_unwind(payload)
            }
            Ok(Ok(value)) => teardown.map(|()| value),
        }
    }
}

impl fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("provider", &self.provider)
            .field("contexts", &lock(&self.contexts).len())
            .finish()
    }
}

/// Runs one tear-down step, recording an error or panic as its failure.
fn guarded(
    failures: &mut TeardownError,
    step: TeardownStep,
    action: impl FnOnce() -> std::result::Result<(), String>,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(action))
        .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())));

    if let Err(message) = outcome {
        warn!("Tear-down step '{}' failed: {}", step, message);
        failures.push(step, message);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}

/// Fails with the residue if the engine is not empty, purging it either way.
fn assert_clean(engine: &ProcessEngine) -> std::result::Result<(), String> {
    let residue = engine.residue();
    if residue.is_empty() {
        return Ok(());
    }
    engine.purge();
    Err(format!(
        "engine '{}' is not clean: {}",
        engine.name(),
        residue.join(", ")
    ))
}
