//! Test metadata and the per-invocation execution context.

use std::fmt;

/// Marks a test method or class as needing a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentMarker {
    /// Explicit resource names, in declaration order
    pub resources: Vec<String>,
}

impl DeploymentMarker {
    /// A marker with no explicit resources; only conventions apply.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resources(resources: &[&str]) -> Self {
        Self {
            resources: resources.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// A test class: its simple name, package and class-level markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestClass {
    pub name: String,
    /// Dotted package, empty for the root package
    pub package: String,
    pub deployment: Option<DeploymentMarker>,
    pub strict_clean: bool,
}

impl TestClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: String::new(),
            deployment: None,
            strict_clean: false,
        }
    }

    pub fn in_package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn with_deployment(mut self, marker: DeploymentMarker) -> Self {
        self.deployment = Some(marker);
        self
    }

    pub fn strict_clean(mut self) -> Self {
        self.strict_clean = true;
        self
    }

    /// Package as a `/`-separated resource path, empty for the root package.
    pub fn package_path(&self) -> String {
        self.package.replace('.', "/")
    }

    /// Fully qualified name.
    pub fn qualified_name(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.package, self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMethod {
    pub name: String,
    pub deployment: Option<DeploymentMarker>,
    pub strict_clean: bool,
}

impl TestMethod {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deployment: None,
            strict_clean: false,
        }
    }

    pub fn with_deployment(mut self, marker: DeploymentMarker) -> Self {
        self.deployment = Some(marker);
        self
    }

    pub fn strict_clean(mut self) -> Self {
        self.strict_clean = true;
        self
    }
}

/// One test invocation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    class: TestClass,
    method: TestMethod,
    run_id: String,
}

impl ExecutionContext {
    /// Creates a context with a fresh run id.
    pub fn new(class: TestClass, method: TestMethod) -> Self {
        let run_id = format!(
            "{}/{}()#{}",
            class.qualified_name(),
            method.name,
            uuid::Uuid::new_v4()
        );
        Self {
            class,
            method,
            run_id,
        }
    }

    pub fn class(&self) -> &TestClass {
        &self.class
    }

    pub fn method(&self) -> &TestMethod {
        &self.method
    }

    /// Unique id of this invocation; also names its deployment.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The marker in effect: the method's, else the class's.
    pub fn deployment_marker(&self) -> Option<&DeploymentMarker> {
        self.method
            .deployment
            .as_ref()
            .or(self.class.deployment.as_ref())
    }

    pub fn has_deployment_marker(&self) -> bool {
        self.deployment_marker().is_some()
    }

    /// Strict clean applies when either the method or the class asks for it.
    pub fn strict_clean(&self) -> bool {
        self.method.strict_clean || self.class.strict_clean
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.run_id)
    }
}
