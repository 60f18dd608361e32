//! The session: one VM, one heap allocator, one compiler configuration and
//! checker, one module loader.
//!
//! Built-ins initialize exactly once, before any user code, so the standard
//! globals occupy a stable slot prefix shared by every compiler the session
//! creates.

use crate::error::{SessionError, SessionResult};
use bytecode::disassemble;
use compiler::{parse_program, Compiler, CompilerOptions, PermissiveChecker};
use core_types::{DiagnosticKind, HeapAllocator, PromiseState, Value};
use interpreter::{install_builtins, Vm, VmError};
use module_loader::{LoaderConfig, LoaderHost, ModuleLoader};
use std::path::PathBuf;

/// Session switches.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Run the type checker before lowering.
    pub typecheck: bool,
    /// Keep going past type errors with `any` fallback typing.
    pub ignore_type_errors: bool,
    /// Print chunk disassembly before executing.
    pub print_bytecode: bool,
    /// Print the AST before compiling.
    pub print_ast: bool,
    /// `process.argv` contents.
    pub argv: Vec<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            typecheck: true,
            ignore_type_errors: false,
            print_bytecode: false,
            print_ast: false,
            argv: Vec::new(),
        }
    }
}

/// A running engine instance.
pub struct Session {
    vm: Vm,
    heap: HeapAllocator,
    checker: PermissiveChecker,
    loader: ModuleLoader,
    options: SessionOptions,
    repl_inputs: usize,
}

impl Session {
    /// Creates a session rooted at `base_dir` and initializes built-ins.
    pub fn new(base_dir: impl Into<PathBuf>, options: SessionOptions) -> Self {
        let mut vm = Vm::new();
        let mut heap = HeapAllocator::new();
        install_builtins(&mut vm, &mut heap, &options.argv);
        let loader = ModuleLoader::new(base_dir, LoaderConfig::default());
        Self {
            vm,
            heap,
            checker: PermissiveChecker,
            loader,
            options,
            repl_inputs: 0,
        }
    }

    /// Registers a native module with a static export map.
    pub fn register_native_module(&mut self, name: &str, exports: Vec<(String, Value)>) {
        self.loader.register_native_module(name, exports);
    }

    /// Executes a file as a module; returns its completion value.
    pub fn run_file(&mut self, path: &str) -> SessionResult<Value> {
        let specifier = if path.starts_with('/') || path.starts_with("./") || path.starts_with("../")
        {
            path.to_string()
        } else {
            format!("./{}", path)
        };
        self.run_specifier(&specifier)
    }

    /// Executes a source string in module mode.
    pub fn run_module_source(&mut self, source: &str) -> SessionResult<Value> {
        self.repl_inputs += 1;
        let name = format!("repl:{}.ts", self.repl_inputs);
        self.loader.add_memory_module(&name, source);
        self.run_specifier(&name)
    }

    fn run_specifier(&mut self, specifier: &str) -> SessionResult<Value> {
        let mut host = LoaderHost {
            vm: &mut self.vm,
            heap: &mut self.heap,
            checker: Some(&mut self.checker),
            typecheck: self.options.typecheck,
            ignore_type_errors: self.options.ignore_type_errors,
        };
        let loaded = self.loader.load(specifier, &mut host)?;
        Ok(loaded.value)
    }

    /// Evaluates an expression or script input; top-level `await` is
    /// supported by running the input as an immediately-called async entry.
    pub fn run_expression(&mut self, source: &str) -> SessionResult<Value> {
        let program = parse_program(source).map_err(|d| match d.kind {
            DiagnosticKind::Syntax => SessionError::Syntax(d),
            _ => SessionError::Compile(d),
        })?;
        if self.options.print_ast {
            println!("{:#?}", program);
        }
        if program.has_module_syntax() {
            return self.run_module_source(source);
        }

        let mut compiler = Compiler::new(&mut self.heap).with_options(CompilerOptions {
            ignore_type_errors: self.options.ignore_type_errors,
        });
        if self.options.typecheck {
            compiler = compiler.with_checker(&mut self.checker);
        }
        let chunk = compiler.compile_script(&program).map_err(|d| match d.kind {
            DiagnosticKind::Syntax => SessionError::Syntax(d),
            _ => SessionError::Compile(d),
        })?;
        if self.options.print_bytecode {
            println!("{}", disassemble(&chunk));
        }

        self.vm.sync_global_names(&self.heap);
        let result = self
            .vm
            .execute(&chunk)
            .and_then(|value| {
                self.vm.drain_microtasks()?;
                Ok(value)
            })
            .map_err(|e| match e {
                VmError::Runtime(e) => SessionError::Runtime {
                    message: e.diagnostic.to_string(),
                },
                VmError::Exit(code) => SessionError::Exit(code),
            })?;

        // A top-level-await input evaluates to the promise of its
        // completion; unwrap it now that the queue is drained.
        if let Value::Promise(p) = &result {
            let p = p.borrow();
            return match p.state {
                PromiseState::Fulfilled => Ok(p.value.clone()),
                PromiseState::Rejected => Err(SessionError::Runtime {
                    message: format!(
                        "uncaught {}",
                        builtins::errors::describe_error(&p.value)
                    ),
                }),
                PromiseState::Pending => Ok(Value::Undefined),
            };
        }
        Ok(result)
    }

    /// The inline-cache statistics report.
    pub fn cache_stats_report(&self) -> String {
        self.vm.cache_stats_report()
    }

    /// Tears down loader↔VM links; further use starts fresh entry points.
    pub fn shutdown(&mut self) {
        self.loader.shutdown();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(".", SessionOptions::default())
    }

    #[test]
    fn test_expression_evaluation() {
        let mut s = session();
        assert_eq!(s.run_expression("let x = 1 + 2; x").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_state_persists_across_inputs() {
        let mut s = session();
        s.run_expression("let counter = 10;").unwrap();
        assert_eq!(s.run_expression("counter + 1").unwrap(), Value::Int(11));
    }

    #[test]
    fn test_top_level_await_expression() {
        let mut s = session();
        let value = s
            .run_expression("async function f() { return 42; } await f()")
            .unwrap();
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn test_syntax_error_mapping() {
        let mut s = session();
        let err = s.run_expression("let = 1").unwrap_err();
        assert!(matches!(err, SessionError::Syntax(_)));
        assert_eq!(err.exit_code(), crate::error::EXIT_DATA);
    }

    #[test]
    fn test_runtime_error_mapping() {
        let mut s = session();
        let err = s.run_expression("undefinedFn()").unwrap_err();
        assert!(matches!(err, SessionError::Runtime { .. }));
        assert_eq!(err.exit_code(), crate::error::EXIT_INTERNAL);
    }

    #[test]
    fn test_module_source_with_imports_switches_modes() {
        let mut s = session();
        let value = s
            .run_expression("export const x = 5; x * 2")
            .expect("module mode");
        assert_eq!(value, Value::Int(10));
    }

    #[test]
    fn test_process_exit_mapping() {
        let mut s = session();
        let err = s.run_expression("process.exit(7)").unwrap_err();
        assert!(matches!(err, SessionError::Exit(7)));
        assert_eq!(err.exit_code(), 7);
    }
}
