//! Shared helpers for workspace integration tests.

use cli::{Session, SessionOptions};
use std::path::Path;

/// Builds a session over a fixture directory populated with `files`.
pub fn session_with_files(dir: &Path, files: &[(&str, &str)]) -> Session {
    for (name, source) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture dirs");
        }
        std::fs::write(path, source).expect("write fixture");
    }
    Session::new(dir, SessionOptions::default())
}
