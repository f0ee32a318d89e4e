//! Shared workflow fixtures for unit tests.

use std::fs;

use tempfile::{tempdir, TempDir};

use super::resources::DirectoryLoader;

/// Start and end only; instances finish immediately.
pub const FLOW: &str = "\
key: flow
activities:
  - id: start
    type: start
  - id: end
    type: end
";

/// Waits at one user task.
pub const REVIEW: &str = "\
key: review
activities:
  - id: start
    type: start
  - id: check
    type: user_task
    name: Check order
  - id: end
    type: end
";

/// Two user tasks in sequence.
pub const TWO_STEPS: &str = "\
key: two_steps
activities:
  - id: start
    type: start
  - id: enter
    type: user_task
    name: Enter data
  - id: approve
    type: user_task
    name: Approve
  - id: end
    type: end
";

pub const RULES: &str = "\
key: rules
rules:
  - when: {}
    then: ok
";

/// Not a valid process definition.
pub const INVALID: &str = "key: [unclosed";

pub const CONFIG: &str = "name: unit\nid_block_size: 10\n";

/// Writes the files to a fresh directory and returns a loader over it.
///
/// The directory lives as long as the returned `TempDir`.
pub fn classpath(files: &[(&str, &str)]) -> (TempDir, DirectoryLoader) {
    let dir = tempdir().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    let loader = DirectoryLoader::new(dir.path());
    (dir, loader)
}
