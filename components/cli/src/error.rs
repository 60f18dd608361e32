//! Session errors and exit-code mapping.

use core_types::Diagnostic;
use module_loader::LoaderError;
use thiserror::Error;

/// Process exit code for usage errors.
pub const EXIT_USAGE: i32 = 64;
/// Process exit code for data-format (syntax/type/compile) errors.
pub const EXIT_DATA: i32 = 65;
/// Process exit code for internal and runtime errors.
pub const EXIT_INTERNAL: i32 = 70;

/// Everything a session entry point can fail with.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Input could not be read.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Lexing or parsing failed.
    #[error("{0}")]
    Syntax(Diagnostic),

    /// Type checking or lowering failed.
    #[error("{0}")]
    Compile(Diagnostic),

    /// Execution failed with an uncaught exception.
    #[error("{message}")]
    Runtime {
        /// Rendered diagnostic.
        message: String,
    },

    /// Module loading failed.
    #[error("{0}")]
    Loader(LoaderError),

    /// `process.exit(code)` was called.
    #[error("exit({0})")]
    Exit(i32),

    /// REPL infrastructure failure.
    #[error("repl: {0}")]
    Repl(String),
}

impl SessionError {
    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionError::Syntax(_) | SessionError::Compile(_) => EXIT_DATA,
            SessionError::Loader(e) => match e {
                LoaderError::Parse { .. }
                | LoaderError::Check { .. }
                | LoaderError::Compile { .. }
                | LoaderError::CircularDependency { .. }
                | LoaderError::Unresolved { .. } => EXIT_DATA,
                LoaderError::Exit(code) => *code,
                _ => EXIT_INTERNAL,
            },
            SessionError::Exit(code) => *code,
            _ => EXIT_INTERNAL,
        }
    }
}

impl From<LoaderError> for SessionError {
    fn from(e: LoaderError) -> Self {
        match e {
            LoaderError::Exit(code) => SessionError::Exit(code),
            other => SessionError::Loader(other),
        }
    }
}

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{codes, DiagnosticKind};

    #[test]
    fn test_exit_codes() {
        let syntax = SessionError::Syntax(Diagnostic::error(
            codes::SYNTAX_UNEXPECTED_TOKEN,
            DiagnosticKind::Syntax,
            "bad",
        ));
        assert_eq!(syntax.exit_code(), EXIT_DATA);

        let runtime = SessionError::Runtime {
            message: "boom".into(),
        };
        assert_eq!(runtime.exit_code(), EXIT_INTERNAL);

        assert_eq!(SessionError::Exit(3).exit_code(), 3);

        let cycle = SessionError::Loader(LoaderError::CircularDependency { cycle: vec![] });
        assert_eq!(cycle.exit_code(), EXIT_DATA);
    }
}
