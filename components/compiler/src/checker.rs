//! Type-checker contract.
//!
//! The compiler delegates to a checker before lowering. Which checker runs is
//! the session's choice; the compiler only depends on this trait and on the
//! `ignore_type_errors` switch: when it is false, any error-severity
//! diagnostic aborts compilation, and when true the diagnostics are reported
//! and lowering proceeds with `any` fallback typing.

use crate::ast::Program;
use core_types::{Diagnostic, Severity};

/// Whether the input is being checked as a script or as a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// Plain script or expression input.
    Script,
    /// Module input (import/export declarations in scope).
    Module,
}

/// A type checker the compiler can delegate to.
pub trait TypeCheck {
    /// Checks `program`, returning every diagnostic found.
    fn check(&mut self, program: &Program, mode: CheckMode) -> Vec<Diagnostic>;
}

/// The fallback checker: accepts everything as `any`.
///
/// Stands in wherever a session runs without a real checker (the
/// `--no-typecheck` flag) while keeping the compiler's control flow
/// identical.
#[derive(Debug, Default)]
pub struct PermissiveChecker;

impl TypeCheck for PermissiveChecker {
    fn check(&mut self, _program: &Program, _mode: CheckMode) -> Vec<Diagnostic> {
        Vec::new()
    }
}

/// True when any diagnostic in `diags` is an error.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.severity == Severity::Error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use core_types::{codes, DiagnosticKind};

    #[test]
    fn test_permissive_checker_accepts_everything() {
        let program = parse_program("let x = 1; x(2);").expect("parse");
        let mut checker = PermissiveChecker;
        assert!(checker.check(&program, CheckMode::Script).is_empty());
    }

    #[test]
    fn test_has_errors() {
        assert!(!has_errors(&[]));
        let err = Diagnostic::error(codes::TYPE_MISMATCH, DiagnosticKind::Type, "mismatch");
        assert!(has_errors(&[err]));
    }
}
