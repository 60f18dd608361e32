//! Loader errors.

use core_types::Diagnostic;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong while loading a module graph.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// No resolver in the chain accepted the specifier.
    #[error("cannot resolve module {specifier:?}{}", importer_note(.importer))]
    Unresolved {
        /// The specifier as written.
        specifier: String,
        /// The importing module, when resolution was triggered by an import.
        importer: Option<PathBuf>,
    },

    /// Source could not be read.
    #[error("failed to load {}: {source}", .path.display())]
    Load {
        /// The resolved path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Lexing or parsing failed.
    #[error("{diagnostic}")]
    Parse {
        /// The failing module.
        path: PathBuf,
        /// The parse diagnostic.
        diagnostic: Diagnostic,
    },

    /// Type checking failed with `ignore_type_errors` off.
    #[error("{diagnostic}")]
    Check {
        /// The failing module.
        path: PathBuf,
        /// The type diagnostic.
        diagnostic: Diagnostic,
    },

    /// Lowering failed.
    #[error("{diagnostic}")]
    Compile {
        /// The failing module.
        path: PathBuf,
        /// The compile diagnostic.
        diagnostic: Diagnostic,
    },

    /// A module's top-level code threw.
    #[error("error initializing {}: {message}", .path.display())]
    Execute {
        /// The failing module.
        path: PathBuf,
        /// Rendered runtime error.
        message: String,
    },

    /// The module graph contains a cycle.
    #[error("circular dependency: {}", .cycle.join(" -> "))]
    CircularDependency {
        /// The members of the cycle, in discovery order.
        cycle: Vec<String>,
    },

    /// The parallel load exceeded its deadline.
    #[error("module loading timed out after {0:?}")]
    Timeout(Duration),

    /// A record refused an invalid lifecycle transition.
    #[error("invalid module state transition for {}: {detail}", .path.display())]
    State {
        /// The module.
        path: PathBuf,
        /// What was attempted.
        detail: String,
    },

    /// `process.exit` was called during module initialization.
    #[error("process exit requested with code {0}")]
    Exit(i32),
}

fn importer_note(importer: &Option<PathBuf>) -> String {
    match importer {
        Some(path) => format!(" (imported from {})", path.display()),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_display() {
        let err = LoaderError::Unresolved {
            specifier: "./missing".into(),
            importer: Some(PathBuf::from("/src/a.ts")),
        };
        let text = err.to_string();
        assert!(text.contains("./missing"));
        assert!(text.contains("/src/a.ts"));
    }

    #[test]
    fn test_cycle_display() {
        let err = LoaderError::CircularDependency {
            cycle: vec!["/a.ts".into(), "/b.ts".into()],
        };
        assert_eq!(err.to_string(), "circular dependency: /a.ts -> /b.ts");
    }
}
