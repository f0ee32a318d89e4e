//! Resource Resolution
//!
//! Works out which resources a test deploys. Three layers are unioned,
//! highest precedence first:
//!
//! 1. Explicit names from the deployment marker, each looked up relative to
//!    the test class's package and then from the loader root. A copy next
//!    to the class wins over one at the root.
//! 2. `<Class>.<method>.<suffix>` when the method carries the marker.
//! 3. `<Class>.<suffix>` when the class carries the marker.
//!
//! A name already supplied by a higher layer is never replaced. Names that
//! do not resolve are skipped silently.
//!
//! # Example
//!
//! ```
//! use flowtest::harness::{resolve, DeploymentMarker, ExecutionContext, MemoryLoader, TestClass, TestMethod};
//!
//! let loader = MemoryLoader::new().with("Simple.bpmn", "key: simple\n");
//! let class = TestClass::new("Simple").with_deployment(DeploymentMarker::new());
//! let ctx = ExecutionContext::new(class, TestMethod::new("run"));
//!
//! let resources = resolve(&ctx, &loader);
//! assert_eq!(resources.names(), vec!["Simple.bpmn"]);
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use log::debug;

use super::context::ExecutionContext;
use crate::workflow::RESOURCE_SUFFIXES;

/// Read-only access to named resources.
pub trait ResourceLoader: Send + Sync {
    /// Reads a root-relative, `/`-separated name.
    fn read(&self, name: &str) -> Option<Vec<u8>>;
}

/// Loads resources from one or more directories, searched in order.
#[derive(Debug, Clone, Default)]
pub struct DirectoryLoader {
    roots: Vec<PathBuf>,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![root.into()],
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Splits a root-relative name into path segments.
///
/// Leading slashes, empty segments and `.`/`..` never resolve.
fn segments(name: &str) -> Option<Vec<&str>> {
    let parts: Vec<&str> = name.split('/').collect();
    if parts
        .iter()
        .any(|part| part.is_empty() || *part == "." || *part == "..")
    {
        return None;
    }
    Some(parts)
}

impl ResourceLoader for DirectoryLoader {
    fn read(&self, name: &str) -> Option<Vec<u8>> {
        let parts = segments(name)?;

        self.roots.iter().find_map(|root| {
            let path = parts
                .iter()
                .fold(root.clone(), |path: PathBuf, part| path.join(part));
            if !path.is_file() {
                return None;
            }
            fs::read(&path).ok()
        })
    }
}

/// Resources held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, content: impl AsRef<[u8]>) -> Self {
        self.insert(name, content);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, content: impl AsRef<[u8]>) {
        self.entries.insert(name.into(), content.as_ref().to_vec());
    }
}

impl ResourceLoader for MemoryLoader {
    fn read(&self, name: &str) -> Option<Vec<u8>> {
        segments(name)?;
        self.entries.get(name).cloned()
    }
}

/// Resolved resources, in resolution order, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSet {
    entries: Vec<(String, Vec<u8>)>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource unless the name is already present; returns whether it was added.
    pub fn insert(&mut self, name: impl Into<String>, content: Vec<u8>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.entries.push((name, content));
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == name)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, content)| content.as_slice())
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(name, content)| (name.as_str(), content.as_slice()))
    }
}

impl IntoIterator for ResourceSet {
    type Item = (String, Vec<u8>);
    type IntoIter = std::vec::IntoIter<(String, Vec<u8>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Looks a name up relative to the test class's package.
///
/// A leading `/` means the name is absolute and is resolved from the root.
pub fn read_class_relative(ctx: &ExecutionContext, loader: &dyn ResourceLoader, name: &str) -> Option<Vec<u8>> {
    if let Some(absolute) = name.strip_prefix('/') {
        return loader.read(absolute);
    }

    let package = ctx.class().package_path();
    if package.is_empty() {
        loader.read(name)
    } else {
        loader.read(&format!("{}/{}", package, name))
    }
}

/// Resolves the resources a test deploys. No marker means no resources.
pub fn resolve(ctx: &ExecutionContext, loader: &dyn ResourceLoader) -> ResourceSet {
    let mut resources = ResourceSet::new();
    let Some(marker) = ctx.deployment_marker() else {
        return resources;
    };

    for name in &marker.resources {
        let found = [read_class_relative(ctx, loader, name), loader.read(name)];
        let mut resolved = false;
        for content in found.into_iter().flatten() {
            resolved |= resources.insert(name.clone(), content);
        }
        if !resolved {
            debug!("Explicit resource '{}' not found, skipped", name);
        }
    }

    let class = ctx.class();
    if ctx.method().deployment.is_some() {
        let stem = format!("{}.{}", class.name, ctx.method().name);
        add_conventional(ctx, loader, &stem, &mut resources);
    }
    if class.deployment.is_some() {
        add_conventional(ctx, loader, &class.name, &mut resources);
    }

    debug!("Resolved {} resource(s) for {}: {:?}", resources.len(), ctx, resources.names());
    resources
}

fn add_conventional(ctx: &ExecutionContext, loader: &dyn ResourceLoader, stem: &str, resources: &mut ResourceSet) {
    for suffix in RESOURCE_SUFFIXES {
        let candidate = format!("{}.{}", stem, suffix);
        match read_class_relative(ctx, loader, &candidate) {
            Some(content) => {
                if resources.insert(candidate.clone(), content) {
                    debug!("Found conventional resource '{}'", candidate);
                }
            }
            None => debug!("No resource '{}'", candidate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::context::{DeploymentMarker, TestClass, TestMethod};
    use std::path::Path;
    use tempfile::tempdir;

    fn write(root: &Path, name: &str, content: &str) {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_directory_loader_reads_nested_names() {
        let dir = tempdir().unwrap();
        write(dir.path(), "com/acme/Flow.bpmn", "nested");
        let loader = DirectoryLoader::new(dir.path());

        assert_eq!(loader.read("com/acme/Flow.bpmn"), Some(b"nested".to_vec()));
        assert_eq!(loader.read("/com/acme/Flow.bpmn"), None);
        assert_eq!(loader.read("com/../com/acme/Flow.bpmn"), None);
        assert_eq!(loader.read("com//acme/Flow.bpmn"), None);
        assert_eq!(loader.read("com/acme"), None);
    }

    #[test]
    fn test_directory_loader_searches_roots_in_order() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        write(first.path(), "a.bpmn", "first");
        write(second.path(), "a.bpmn", "second");
        write(second.path(), "b.bpmn", "only second");

        let loader = DirectoryLoader::new(first.path()).with_root(second.path());

        assert_eq!(loader.read("a.bpmn"), Some(b"first".to_vec()));
        assert_eq!(loader.read("b.bpmn"), Some(b"only second".to_vec()));
        assert_eq!(loader.roots().len(), 2);
    }

    #[test]
    fn test_resource_set_first_writer_wins() {
        let mut set = ResourceSet::new();
        assert!(set.insert("a", b"one".to_vec()));
        assert!(!set.insert("a", b"two".to_vec()));

        assert_eq!(set.get("a"), Some(&b"one"[..]));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_explicit_and_method_convention_union() {
        let loader = MemoryLoader::new()
            .with("Flow.bpmn", "root content")
            .with("Flow.run.bpmn", "method content");
        let method = TestMethod::new("run").with_deployment(DeploymentMarker::with_resources(&["Flow.bpmn"]));
        let ctx = ExecutionContext::new(TestClass::new("Flow"), method);

        let resources = resolve(&ctx, &loader);

        assert_eq!(resources.names(), vec!["Flow.bpmn", "Flow.run.bpmn"]);
        assert_eq!(resources.get("Flow.bpmn"), Some(&b"root content"[..]));
        assert_eq!(resources.get("Flow.run.bpmn"), Some(&b"method content"[..]));
    }

    #[test]
    fn test_explicit_prefers_class_relative_copy() {
        let loader = MemoryLoader::new()
            .with("Order.bpmn", "explicit from root")
            .with("com/acme/Order.bpmn", "class relative");
        let class = TestClass::new("Order").in_package("com.acme");
        let method = TestMethod::new("run").with_deployment(DeploymentMarker::with_resources(&["Order.bpmn"]));
        let ctx = ExecutionContext::new(class, method);

        let resources = resolve(&ctx, &loader);

        assert_eq!(resources.names(), vec!["Order.bpmn"]);
        assert_eq!(resources.get("Order.bpmn"), Some(&b"class relative"[..]));
    }

    #[test]
    fn test_explicit_and_class_convention_union() {
        let loader = MemoryLoader::new()
            .with("Order.bpmn", "class convention")
            .with("shared/Order.bpmn", "explicit");
        let class = TestClass::new("Order").with_deployment(DeploymentMarker::with_resources(&["shared/Order.bpmn"]));
        let ctx = ExecutionContext::new(class, TestMethod::new("run"));

        let resources = resolve(&ctx, &loader);

        assert_eq!(resources.names(), vec!["shared/Order.bpmn", "Order.bpmn"]);
        assert_eq!(resources.get("shared/Order.bpmn"), Some(&b"explicit"[..]));
        assert_eq!(resources.get("Order.bpmn"), Some(&b"class convention"[..]));
    }

    #[test]
    fn test_class_convention() {
        let loader = MemoryLoader::new()
            .with("Simple.bpmn", "process")
            .with("Simple.dmn", "decision")
            .with("Simple.run.bpmn", "method only");
        let class = TestClass::new("Simple").with_deployment(DeploymentMarker::new());
        let ctx = ExecutionContext::new(class, TestMethod::new("run"));

        let resources = resolve(&ctx, &loader);

        assert_eq!(resources.names(), vec!["Simple.bpmn", "Simple.dmn"]);
    }

    #[test]
    fn test_method_convention_needs_method_marker() {
        let loader = MemoryLoader::new().with("Flow.run.bpmn", "method content");
        let class = TestClass::new("Flow").with_deployment(DeploymentMarker::new());
        let ctx = ExecutionContext::new(class, TestMethod::new("run"));

        assert!(resolve(&ctx, &loader).is_empty());
    }

    #[test]
    fn test_missing_resources_are_omitted() {
        let loader = MemoryLoader::new();
        let method = TestMethod::new("run").with_deployment(DeploymentMarker::with_resources(&["Missing.bpmn"]));
        let ctx = ExecutionContext::new(TestClass::new("Nothing"), method);

        assert!(resolve(&ctx, &loader).is_empty());
    }

    #[test]
    fn test_no_marker_resolves_nothing() {
        let loader = MemoryLoader::new().with("Plain.bpmn", "content");
        let ctx = ExecutionContext::new(TestClass::new("Plain"), TestMethod::new("run"));

        assert!(resolve(&ctx, &loader).is_empty());
    }

    #[test]
    fn test_explicit_name_forms() {
        let dir = tempdir().unwrap();
        write(dir.path(), "shared/Common.bpmn", "full path");
        write(dir.path(), "com/acme/Local.bpmn", "package relative");
        write(dir.path(), "pkg/Absolute.bpmn", "absolute");
        let loader = DirectoryLoader::new(dir.path());

        let marker = DeploymentMarker::with_resources(&[
            "shared/Common.bpmn",
            "Local.bpmn",
            "/pkg/Absolute.bpmn",
        ]);
        let class = TestClass::new("Forms").in_package("com.acme");
        let ctx = ExecutionContext::new(class, TestMethod::new("run").with_deployment(marker));

        let resources = resolve(&ctx, &loader);

        assert_eq!(
            resources.names(),
            vec!["shared/Common.bpmn", "Local.bpmn", "/pkg/Absolute.bpmn"]
        );
        assert_eq!(resources.get("/pkg/Absolute.bpmn"), Some(&b"absolute"[..]));
        assert_eq!(resources.get("Local.bpmn"), Some(&b"package relative"[..]));
    }

    #[test]
    fn test_conventions_resolve_in_class_package() {
        let loader = MemoryLoader::new().with("com/acme/Pkg.bpmn", "content");
        let class = TestClass::new("Pkg")
            .in_package("com.acme")
            .with_deployment(DeploymentMarker::new());
        let ctx = ExecutionContext::new(class, TestMethod::new("run"));

        assert_eq!(resolve(&ctx, &loader).names(), vec!["Pkg.bpmn"]);
    }
}
