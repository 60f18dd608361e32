//! The loader: resolve, parse in parallel, order, compile, execute.

use crate::analyzer::DependencyAnalyzer;
use crate::error::LoaderError;
use crate::pipeline::ParsePipeline;
use crate::queue::ParseQueue;
use crate::record::{ModuleRecord, ModuleState};
use crate::registry::{ModuleRegistry, RegistryConfig};
use crate::resolver::{
    FsResolver, MemoryResolver, ModuleKind, NativeResolver, ResolvedModule, ResolverChain,
};
use compiler::{Compiler, CompilerOptions, ImportResolver, TypeCheck};
use core_types::{codes, Diagnostic, DiagnosticKind, HeapAllocator, Value};
use interpreter::{Vm, VmError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Loader tuning.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Parse worker count; defaults to the CPU count.
    pub worker_count: usize,
    /// Registry cache behavior.
    pub registry: RegistryConfig,
    /// Deadline for the parallel collect phase.
    pub load_timeout: Duration,
    /// How long a forced shutdown waits for workers.
    pub shutdown_grace: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            registry: RegistryConfig::default(),
            load_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

/// Main-thread services the loader drives during compile and execute.
pub struct LoaderHost<'a> {
    /// The session VM.
    pub vm: &'a mut Vm,
    /// The session-wide global slot registry.
    pub heap: &'a mut HeapAllocator,
    /// Type checker, when the session has one.
    pub checker: Option<&'a mut dyn TypeCheck>,
    /// Whether to run the checker at all.
    pub typecheck: bool,
    /// Proceed past type errors with `any` fallback typing.
    pub ignore_type_errors: bool,
}

/// What `load` hands back for the entry module.
#[derive(Debug)]
pub struct LoadedModule {
    /// Canonical path of the entry.
    pub path: PathBuf,
    /// Completion value of the entry's top-level code.
    pub value: Value,
    /// The entry's export names.
    pub exports: Vec<String>,
}

/// The module loader.
///
/// Owns the resolver chain and registry for a session. Runtime export
/// values live here (main thread only); the shared records carry the
/// thread-safe half.
pub struct ModuleLoader {
    chain: Arc<ResolverChain>,
    memory: Arc<MemoryResolver>,
    native: Arc<NativeResolver>,
    registry: Arc<ModuleRegistry>,
    analyzer: Arc<DependencyAnalyzer>,
    config: LoaderConfig,
    native_exports: HashMap<String, Vec<(String, Value)>>,
    runtime_exports: HashMap<PathBuf, HashMap<String, Value>>,
}

impl ModuleLoader {
    /// Creates a loader with the standard chain: native (priority 0),
    /// in-memory (5), file system rooted at `base_dir` (10).
    pub fn new(base_dir: impl Into<PathBuf>, config: LoaderConfig) -> Self {
        let memory = Arc::new(MemoryResolver::new(5));
        let native = Arc::new(NativeResolver::new(0));
        let mut chain = ResolverChain::new();
        chain.add(native.clone());
        chain.add(memory.clone());
        chain.add(Arc::new(FsResolver::new(base_dir, 10)));
        Self {
            chain: Arc::new(chain),
            memory,
            native,
            registry: Arc::new(ModuleRegistry::new(config.registry.clone())),
            analyzer: Arc::new(DependencyAnalyzer::new()),
            config,
            native_exports: HashMap::new(),
            runtime_exports: HashMap::new(),
        }
    }

    /// Registers an in-memory module (REPL input, embedded source).
    pub fn add_memory_module(&self, name: &str, source: &str) {
        self.memory.add(name, source);
    }

    /// Registers a native module: its exports become globals before any
    /// importer compiles.
    pub fn register_native_module(&mut self, name: &str, exports: Vec<(String, Value)>) {
        self.native.register(name);
        self.native_exports
            .insert(format!("native:{}", name), exports);
    }

    /// Registry hit/miss counters.
    pub fn registry_stats(&self) -> (u64, u64) {
        self.registry.stats()
    }

    /// Runtime export values of a loaded module.
    pub fn exports_of(&self, path: &Path) -> Option<&HashMap<String, Value>> {
        self.runtime_exports.get(path)
    }

    /// Drops main-thread runtime values; called at session teardown to
    /// break loader ↔ VM reference cycles.
    pub fn shutdown(&mut self) {
        self.runtime_exports.clear();
        self.native_exports.clear();
    }

    /// Loads, orders, compiles, and executes the module graph rooted at
    /// `specifier`, returning the entry module's record data.
    pub fn load(
        &mut self,
        specifier: &str,
        host: &mut LoaderHost<'_>,
    ) -> Result<LoadedModule, LoaderError> {
        let entry = self
            .chain
            .resolve(specifier, None)
            .ok_or_else(|| LoaderError::Unresolved {
                specifier: specifier.to_string(),
                importer: None,
            })?;
        let entry_path = entry.path.clone();
        self.discover(specifier, &entry);
        self.analyzer.add_module(&entry_path, 0);

        // Phase 1: parallel parse of the dependency graph.
        self.collect(&entry)?;

        // Phase 2: order.
        let order = self.analyzer.topo_order().map_err(|stuck| {
            LoaderError::CircularDependency {
                cycle: stuck
                    .iter()
                    .map(|p| display_path(p))
                    .collect(),
            }
        })?;
        log::debug!(
            "executing {} module(s): {:?}",
            order.len(),
            order.iter().map(|p| display_path(p)).collect::<Vec<_>>()
        );

        // Phase 3: check, compile, and execute in dependency order.
        let mut entry_value = Value::Undefined;
        for path in &order {
            let value = self.process_module(path, host)?;
            if path == &entry_path {
                entry_value = value;
            }
        }

        let exports = self
            .registry
            .get(&entry_path)
            .map(|r| r.exports)
            .unwrap_or_default();
        Ok(LoadedModule {
            path: entry_path,
            value: entry_value,
            exports,
        })
    }

    fn discover(&self, specifier: &str, resolved: &ResolvedModule) {
        if self.registry.contains(&resolved.path) {
            return;
        }
        let mut record = ModuleRecord::new(specifier, resolved.path.clone());
        record.resolver = resolved.resolver;
        record.is_json = resolved.kind == ModuleKind::Json;
        record.is_native = resolved.kind == ModuleKind::Native;
        let _ = record.advance(ModuleState::Resolving);
        let _ = record.advance(ModuleState::Resolved);
        self.registry.insert(record);
    }

    /// Drains the parse pipeline until every discovered source module has a
    /// result or the deadline passes.
    fn collect(&mut self, entry: &ResolvedModule) -> Result<(), LoaderError> {
        let queue = Arc::new(ParseQueue::new());
        let mut outstanding = 0usize;
        if entry.kind == ModuleKind::Source
            && queue.push(entry.path.clone(), entry.resolver, 0)
        {
            outstanding += 1;
        }
        if outstanding == 0 {
            return Ok(());
        }

        let pipeline = ParsePipeline::spawn(
            self.config.worker_count,
            queue.clone(),
            self.chain.clone(),
        );
        let deadline = Instant::now() + self.config.load_timeout;

        let outcome = loop {
            if outstanding == 0 {
                break Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                pipeline.cancel();
                break Err(LoaderError::Timeout(self.config.load_timeout));
            }
            let Some(result) = pipeline.recv_timeout(remaining) else {
                continue;
            };
            outstanding -= 1;

            let parsed = match result.result {
                Ok((source, parsed)) => {
                    self.registry.with_record_mut(&result.path, |record| {
                        let _ = record.advance(ModuleState::Loading);
                        record.source = Some(source);
                        let _ = record.advance(ModuleState::Loaded);
                        let _ = record.advance(ModuleState::Parsing);
                        record.program = Some(parsed.program.clone());
                        record.imports = parsed.imports.clone();
                        record.exports = parsed.exports.clone();
                        record.timing.parse_ms = Some(result.duration.as_secs_f64() * 1e3);
                        let _ = record.advance(ModuleState::Parsed);
                    });
                    parsed
                }
                Err(diagnostic) => {
                    self.registry.with_record_mut(&result.path, |record| {
                        record.fail(diagnostic.clone());
                    });
                    pipeline.cancel();
                    break Err(LoaderError::Parse {
                        path: result.path,
                        diagnostic,
                    });
                }
            };

            // Fan out the discovered imports.
            let importer = result.path.clone();
            let mut failed = None;
            for import in &parsed.imports {
                let Some(resolved) = self.chain.resolve(&import.specifier, Some(&importer))
                else {
                    self.registry.with_record_mut(&importer, |record| {
                        record.fail(
                            Diagnostic::error(
                                codes::MODULE_UNRESOLVED,
                                DiagnosticKind::Module,
                                format!("cannot resolve {:?}", import.specifier),
                            )
                            .with_path(importer.clone()),
                        );
                    });
                    failed = Some(LoaderError::Unresolved {
                        specifier: import.specifier.clone(),
                        importer: Some(importer.clone()),
                    });
                    break;
                };
                // An import attribute forces JSON regardless of extension.
                let json_attr = import
                    .attributes
                    .iter()
                    .any(|(k, v)| k == "type" && v == "json");
                let mut resolved = resolved;
                if json_attr {
                    resolved.kind = ModuleKind::Json;
                }

                self.discover(&import.specifier, &resolved);
                self.analyzer.add_edge(&importer, &resolved.path);
                // JSON forced by attribute after an earlier plain discovery.
                if json_attr {
                    self.registry
                        .with_record_mut(&resolved.path, |r| r.is_json = true);
                }
                if resolved.kind == ModuleKind::Source {
                    let priority = self.analyzer.priority_for(&resolved.path);
                    if queue.push(resolved.path.clone(), resolved.resolver, priority) {
                        outstanding += 1;
                    }
                }
            }
            if let Some(err) = failed {
                pipeline.cancel();
                break Err(err);
            }
        };

        pipeline.shutdown(self.config.shutdown_grace);
        outcome
    }

    /// Checks, compiles, and executes one module; returns its completion
    /// value.
    fn process_module(
        &mut self,
        path: &Path,
        host: &mut LoaderHost<'_>,
    ) -> Result<Value, LoaderError> {
        let record = self
            .registry
            .get(path)
            .ok_or_else(|| LoaderError::State {
                path: path.to_path_buf(),
                detail: "module vanished from the registry".into(),
            })?;

        if record.is_native {
            return self.process_native(&record, host);
        }
        if record.is_json {
            return self.process_json(&record, host);
        }

        let program = record.program.clone().ok_or_else(|| LoaderError::State {
            path: path.to_path_buf(),
            detail: format!("no AST in state {:?}", record.state),
        })?;
        let path_str = display_path(path);

        self.registry
            .with_record_mut(path, |r| r.advance(ModuleState::Checking))
            .transpose()
            .map_err(|detail| LoaderError::State {
                path: path.to_path_buf(),
                detail,
            })?;

        let compile_started = Instant::now();
        let mut compiler = Compiler::new(host.heap).with_options(CompilerOptions {
            ignore_type_errors: host.ignore_type_errors,
        });
        if host.typecheck {
            if let Some(checker) = host.checker.as_deref_mut() {
                compiler = compiler.with_checker(checker);
            }
        }
        let artifact = compiler
            .compile_module(&program, &path_str, &*self)
            .map_err(|diagnostic| {
                let diagnostic = if diagnostic.path.is_none() {
                    diagnostic.with_path(path)
                } else {
                    diagnostic
                };
                self.registry
                    .with_record_mut(path, |r| r.fail(diagnostic.clone()));
                match diagnostic.kind {
                    DiagnosticKind::Type => LoaderError::Check {
                        path: path.to_path_buf(),
                        diagnostic,
                    },
                    _ => LoaderError::Compile {
                        path: path.to_path_buf(),
                        diagnostic,
                    },
                }
            })?;

        self.registry.with_record_mut(path, |r| {
            let _ = r.advance(ModuleState::Checked);
            let _ = r.advance(ModuleState::Compiling);
            r.chunk = Some(artifact.chunk.clone());
            r.export_globals = artifact.exports.iter().cloned().collect();
            r.timing.compile_ms = Some(compile_started.elapsed().as_secs_f64() * 1e3);
            let _ = r.advance(ModuleState::Compiled);
        });

        // Dependencies are all Compiled and executed by topological order;
        // run this module's top-level code once.
        host.vm.sync_global_names(host.heap);
        let exec_started = Instant::now();
        let value = host
            .vm
            .execute(&artifact.chunk)
            .and_then(|value| {
                host.vm.drain_microtasks()?;
                Ok(value)
            })
            .map_err(|e| self.execution_error(path, e))?;
        self.registry.with_record_mut(path, |r| {
            r.timing.exec_ms = Some(exec_started.elapsed().as_secs_f64() * 1e3);
        });

        let mut values = HashMap::new();
        for (name, slot) in &artifact.exports {
            values.insert(name.clone(), host.vm.get_global(*slot));
        }
        self.runtime_exports.insert(path.to_path_buf(), values);
        Ok(value)
    }

    fn process_native(
        &mut self,
        record: &ModuleRecord,
        host: &mut LoaderHost<'_>,
    ) -> Result<Value, LoaderError> {
        let path_str = display_path(&record.path);
        let exports = self.native_exports.get(&path_str).cloned().unwrap_or_default();
        let mut globals = HashMap::new();
        let mut values = HashMap::new();
        for (name, value) in exports {
            let slot = host
                .heap
                .get_or_assign(&format!("{}#{}", record.specifier, name));
            host.vm.set_global(slot, value.clone());
            globals.insert(name.clone(), slot);
            values.insert(name, value);
        }
        host.vm.sync_global_names(host.heap);
        self.registry.with_record_mut(&record.path, |r| {
            r.export_globals = globals.clone();
            r.exports = globals.keys().cloned().collect();
            let _ = r.advance(ModuleState::Compiled);
        });
        self.runtime_exports.insert(record.path.clone(), values);
        Ok(Value::Undefined)
    }

    fn process_json(
        &mut self,
        record: &ModuleRecord,
        host: &mut LoaderHost<'_>,
    ) -> Result<Value, LoaderError> {
        let source = match &record.source {
            Some(source) => source.clone(),
            None => self
                .chain
                .load(&record.path, record.resolver)
                .map_err(|source| LoaderError::Load {
                    path: record.path.clone(),
                    source,
                })?,
        };
        let json: serde_json::Value = serde_json::from_str(&source).map_err(|e| {
            let diagnostic = Diagnostic::error(
                codes::SYNTAX_BAD_LITERAL,
                DiagnosticKind::Module,
                format!("invalid JSON module: {}", e),
            )
            .with_path(record.path.clone());
            self.registry
                .with_record_mut(&record.path, |r| r.fail(diagnostic.clone()));
            LoaderError::Parse {
                path: record.path.clone(),
                diagnostic,
            }
        })?;
        let value = builtins::json::json_to_value(host.vm, &json);

        let path_str = display_path(&record.path);
        let slot = host.heap.get_or_assign(&format!("{}#default", path_str));
        host.vm.set_global(slot, value.clone());
        host.vm.sync_global_names(host.heap);
        self.registry.with_record_mut(&record.path, |r| {
            r.export_globals.insert("default".into(), slot);
            r.exports = vec!["default".into()];
            let _ = r.advance(ModuleState::Compiled);
        });
        self.runtime_exports.insert(
            record.path.clone(),
            HashMap::from([("default".to_string(), value.clone())]),
        );
        Ok(value)
    }

    fn execution_error(&self, path: &Path, error: VmError) -> LoaderError {
        match error {
            VmError::Runtime(e) => {
                self.registry.with_record_mut(path, |r| {
                    r.fail(e.diagnostic.clone());
                });
                LoaderError::Execute {
                    path: path.to_path_buf(),
                    message: e.diagnostic.to_string(),
                }
            }
            VmError::Exit(code) => LoaderError::Exit(code),
        }
    }
}

impl ImportResolver for ModuleLoader {
    fn export_globals(
        &self,
        specifier: &str,
        importer: &str,
    ) -> Result<HashMap<String, u16>, Diagnostic> {
        let importer_path = PathBuf::from(importer);
        let resolved = self
            .chain
            .resolve(specifier, Some(&importer_path))
            .ok_or_else(|| {
                Diagnostic::error(
                    codes::MODULE_UNRESOLVED,
                    DiagnosticKind::Module,
                    format!("cannot resolve {:?}", specifier),
                )
            })?;
        let record = self.registry.get(&resolved.path).ok_or_else(|| {
            Diagnostic::error(
                codes::MODULE_LOAD,
                DiagnosticKind::Module,
                format!("module {:?} has not been loaded", specifier),
            )
        })?;
        if record.state != ModuleState::Compiled {
            return Err(Diagnostic::error(
                codes::MODULE_LOAD,
                DiagnosticKind::Module,
                format!(
                    "module {:?} is not initialized (state {:?})",
                    specifier, record.state
                ),
            ));
        }
        Ok(record.export_globals)
    }
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
