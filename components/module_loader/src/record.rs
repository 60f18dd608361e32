//! Module records and their lifecycle.

use bytecode::Chunk;
use compiler::ast::ImportDecl;
use compiler::Program;
use core_types::Diagnostic;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle state of a module. A record never moves backward, and once in
/// `Error` it never leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModuleState {
    /// Nothing known yet.
    Unknown,
    /// A resolver is being consulted.
    Resolving,
    /// The specifier resolved to a path.
    Resolved,
    /// Source is being read.
    Loading,
    /// Source is in memory.
    Loaded,
    /// A parse worker owns it.
    Parsing,
    /// AST and import/export lists are available.
    Parsed,
    /// The type checker is running.
    Checking,
    /// Checking finished (or was skipped).
    Checked,
    /// Lowering to bytecode.
    Compiling,
    /// Chunk and export map are final.
    Compiled,
    /// A phase failed; terminal.
    Error,
}

/// Timing collected across a record's lifecycle.
#[derive(Debug, Clone, Default)]
pub struct ModuleTiming {
    /// Time spent parsing, in milliseconds.
    pub parse_ms: Option<f64>,
    /// Time spent compiling, in milliseconds.
    pub compile_ms: Option<f64>,
    /// Time spent executing top-level code, in milliseconds.
    pub exec_ms: Option<f64>,
}

/// Everything the registry knows about one module.
///
/// Records cross the worker boundary, so they carry no runtime `Value`s; the
/// loader keeps the export-name → runtime-value half on the main thread and
/// joins it by path.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// The specifier that first discovered this module.
    pub specifier: String,
    /// Canonical resolved path.
    pub path: PathBuf,
    /// Name of the resolver that produced the path.
    pub resolver: &'static str,
    /// Lifecycle state.
    pub state: ModuleState,
    /// Source text, once loaded.
    pub source: Option<String>,
    /// Parsed program, once parsed.
    pub program: Option<Program>,
    /// Import declarations discovered by the parser.
    pub imports: Vec<ImportDecl>,
    /// Export names discovered by the parser.
    pub exports: Vec<String>,
    /// Compiled top-level chunk.
    pub chunk: Option<Arc<Chunk>>,
    /// Export name → global slot, as registered with the shared allocator.
    pub export_globals: HashMap<String, u16>,
    /// True for registered native modules.
    pub is_native: bool,
    /// True for JSON modules.
    pub is_json: bool,
    /// The first error this record hit.
    pub error: Option<Diagnostic>,
    /// Phase timings.
    pub timing: ModuleTiming,
    /// When the record was created, for cache eviction by age.
    pub loaded_at: Instant,
}

impl ModuleRecord {
    /// Creates a record in the `Unknown` state.
    pub fn new(specifier: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            specifier: specifier.into(),
            path: path.into(),
            resolver: "fs",
            state: ModuleState::Unknown,
            source: None,
            program: None,
            imports: Vec::new(),
            exports: Vec::new(),
            chunk: None,
            export_globals: HashMap::new(),
            is_native: false,
            is_json: false,
            error: None,
            timing: ModuleTiming::default(),
            loaded_at: Instant::now(),
        }
    }

    /// Advances the lifecycle. Backward moves and any transition out of
    /// `Error` are rejected.
    pub fn advance(&mut self, next: ModuleState) -> Result<(), String> {
        if self.state == ModuleState::Error {
            return Err(format!(
                "record for {} is in the Error state",
                self.path.display()
            ));
        }
        if next == ModuleState::Error {
            self.state = next;
            return Ok(());
        }
        if next <= self.state {
            return Err(format!(
                "cannot move {} from {:?} back to {:?}",
                self.path.display(),
                self.state,
                next
            ));
        }
        self.state = next;
        Ok(())
    }

    /// Marks the record failed with `diagnostic`. The first failure wins.
    pub fn fail(&mut self, diagnostic: Diagnostic) {
        if self.state != ModuleState::Error {
            self.state = ModuleState::Error;
            self.error = Some(diagnostic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{codes, DiagnosticKind};

    #[test]
    fn test_forward_transitions() {
        let mut record = ModuleRecord::new("./a", "/src/a.ts");
        for state in [
            ModuleState::Resolving,
            ModuleState::Resolved,
            ModuleState::Loading,
            ModuleState::Loaded,
            ModuleState::Parsing,
            ModuleState::Parsed,
            ModuleState::Checking,
            ModuleState::Checked,
            ModuleState::Compiling,
            ModuleState::Compiled,
        ] {
            record.advance(state).expect("forward transition");
        }
        assert_eq!(record.state, ModuleState::Compiled);
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut record = ModuleRecord::new("./a", "/src/a.ts");
        record.advance(ModuleState::Parsed).unwrap();
        assert!(record.advance(ModuleState::Loading).is_err());
        assert!(record.advance(ModuleState::Parsed).is_err());
    }

    #[test]
    fn test_error_is_terminal() {
        let mut record = ModuleRecord::new("./a", "/src/a.ts");
        record.fail(Diagnostic::error(
            codes::SYNTAX_UNEXPECTED_TOKEN,
            DiagnosticKind::Syntax,
            "bad token",
        ));
        assert_eq!(record.state, ModuleState::Error);
        assert!(record.advance(ModuleState::Compiled).is_err());

        // A second failure does not overwrite the first.
        record.fail(Diagnostic::error(
            codes::MODULE_LOAD,
            DiagnosticKind::Module,
            "later",
        ));
        assert_eq!(record.error.as_ref().unwrap().code, codes::SYNTAX_UNEXPECTED_TOKEN);
    }
}
