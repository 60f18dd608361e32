//! The resolver chain.
//!
//! Resolvers are consulted in ascending priority order; the first that
//! accepts a specifier wins. Source streams are opened and closed inside
//! `load`, on the worker that parses the module.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

/// How the loader should treat a resolved module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// TypeScript/JavaScript source to parse and compile.
    Source,
    /// JSON document published as a single default export.
    Json,
    /// Registered native module with a static export map.
    Native,
}

/// The outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct ResolvedModule {
    /// Canonical path identifying the module.
    pub path: PathBuf,
    /// How to process it.
    pub kind: ModuleKind,
    /// Name of the resolver that answered.
    pub resolver: &'static str,
}

/// One link in the resolver chain.
pub trait Resolver: Send + Sync {
    /// Resolver name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Chain position; lower numbers are consulted first.
    fn priority(&self) -> u32;

    /// Cheap acceptance test.
    fn can_resolve(&self, specifier: &str, importer: Option<&Path>) -> bool;

    /// Resolves a specifier to a canonical path.
    fn resolve(&self, specifier: &str, importer: Option<&Path>) -> Option<ResolvedModule>;

    /// Reads the source for a path this resolver produced.
    fn load(&self, path: &Path) -> io::Result<String>;
}

/// The ordered chain.
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl ResolverChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    /// Adds a resolver, keeping the chain sorted by ascending priority.
    pub fn add(&mut self, resolver: Arc<dyn Resolver>) {
        self.resolvers.push(resolver);
        self.resolvers.sort_by_key(|r| r.priority());
    }

    /// Walks the chain; the first resolver that accepts and resolves wins.
    pub fn resolve(&self, specifier: &str, importer: Option<&Path>) -> Option<ResolvedModule> {
        for resolver in &self.resolvers {
            if !resolver.can_resolve(specifier, importer) {
                continue;
            }
            if let Some(resolved) = resolver.resolve(specifier, importer) {
                log::debug!(
                    "{} resolved {:?} -> {}",
                    resolver.name(),
                    specifier,
                    resolved.path.display()
                );
                return Some(resolved);
            }
        }
        None
    }

    /// Loads source for `path` through the named resolver.
    pub fn load(&self, path: &Path, resolver: &str) -> io::Result<String> {
        for candidate in &self.resolvers {
            if candidate.name() == resolver {
                return candidate.load(path);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no resolver named {:?}", resolver),
        ))
    }
}

impl Default for ResolverChain {
    fn default() -> Self {
        Self::new()
    }
}

/// File-system resolver rooted at a base directory.
///
/// Tries the specifier verbatim, then with the TypeScript extension set,
/// maps `.js` imports onto `.ts` sources, and falls back to directory index
/// files.
pub struct FsResolver {
    root: PathBuf,
    priority: u32,
}

const EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "d.ts"];

impl FsResolver {
    /// Creates a resolver rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, priority: u32) -> Self {
        Self {
            root: root.into(),
            priority,
        }
    }

    fn candidates(&self, joined: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        out.push(joined.to_path_buf());
        // `.js` written in an import usually names a `.ts` source.
        if joined.extension().is_some_and(|e| e == "js") {
            out.push(joined.with_extension("ts"));
        }
        if joined.extension().is_none() {
            for ext in EXTENSIONS {
                out.push(PathBuf::from(format!("{}.{}", joined.display(), ext)));
            }
            for ext in EXTENSIONS {
                out.push(joined.join(format!("index.{}", ext)));
            }
        }
        out
    }
}

impl Resolver for FsResolver {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn can_resolve(&self, specifier: &str, _importer: Option<&Path>) -> bool {
        specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier.starts_with('/')
            || Path::new(specifier).extension().is_some()
    }

    fn resolve(&self, specifier: &str, importer: Option<&Path>) -> Option<ResolvedModule> {
        let base = match importer.and_then(Path::parent) {
            Some(parent) if specifier.starts_with('.') => parent.to_path_buf(),
            _ if specifier.starts_with('/') => PathBuf::new(),
            _ => self.root.clone(),
        };
        let joined = if specifier.starts_with('/') {
            PathBuf::from(specifier)
        } else {
            base.join(specifier)
        };
        for candidate in self.candidates(&joined) {
            if candidate.is_file() {
                let canonical = candidate.canonicalize().unwrap_or(candidate);
                let kind = if canonical.extension().is_some_and(|e| e == "json") {
                    ModuleKind::Json
                } else {
                    ModuleKind::Source
                };
                return Some(ResolvedModule {
                    path: canonical,
                    kind,
                    resolver: self.name(),
                });
            }
        }
        None
    }

    fn load(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// In-memory resolver for REPL and embedded sources.
pub struct MemoryResolver {
    files: RwLock<HashMap<String, String>>,
    priority: u32,
}

impl MemoryResolver {
    /// Creates an empty in-memory resolver.
    pub fn new(priority: u32) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            priority,
        }
    }

    /// Registers `source` under `name`.
    pub fn add(&self, name: impl Into<String>, source: impl Into<String>) {
        self.files.write().insert(name.into(), source.into());
    }

    fn key_of(path: &Path) -> Option<String> {
        path.to_str()?.strip_prefix("mem:").map(str::to_string)
    }
}

impl Resolver for MemoryResolver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn can_resolve(&self, specifier: &str, _importer: Option<&Path>) -> bool {
        self.files.read().contains_key(specifier)
    }

    fn resolve(&self, specifier: &str, _importer: Option<&Path>) -> Option<ResolvedModule> {
        if !self.files.read().contains_key(specifier) {
            return None;
        }
        let kind = if specifier.ends_with(".json") {
            ModuleKind::Json
        } else {
            ModuleKind::Source
        };
        Some(ResolvedModule {
            path: PathBuf::from(format!("mem:{}", specifier)),
            kind,
            resolver: self.name(),
        })
    }

    fn load(&self, path: &Path) -> io::Result<String> {
        let key = Self::key_of(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "not a memory path"))?;
        self.files
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown in-memory module"))
    }
}

/// Resolver answering for registered built-in module names.
pub struct NativeResolver {
    names: RwLock<HashSet<String>>,
    priority: u32,
}

impl NativeResolver {
    /// Creates an empty native resolver.
    pub fn new(priority: u32) -> Self {
        Self {
            names: RwLock::new(HashSet::new()),
            priority,
        }
    }

    /// Registers a native module name (e.g. `paserati/http`).
    pub fn register(&self, name: impl Into<String>) {
        self.names.write().insert(name.into());
    }
}

impl Resolver for NativeResolver {
    fn name(&self) -> &'static str {
        "native"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn can_resolve(&self, specifier: &str, _importer: Option<&Path>) -> bool {
        self.names.read().contains(specifier)
    }

    fn resolve(&self, specifier: &str, _importer: Option<&Path>) -> Option<ResolvedModule> {
        if !self.names.read().contains(specifier) {
            return None;
        }
        Some(ResolvedModule {
            path: PathBuf::from(format!("native:{}", specifier)),
            kind: ModuleKind::Native,
            resolver: self.name(),
        })
    }

    fn load(&self, _path: &Path) -> io::Result<String> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "native modules have no source",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_priority_order() {
        let mut chain = ResolverChain::new();
        let native = Arc::new(NativeResolver::new(0));
        native.register("engine/http");
        let memory = Arc::new(MemoryResolver::new(5));
        memory.add("engine/http", "hijacked");
        chain.add(memory);
        chain.add(native.clone());

        let resolved = chain.resolve("engine/http", None).expect("resolved");
        assert_eq!(resolved.resolver, "native");
        assert_eq!(resolved.kind, ModuleKind::Native);
    }

    #[test]
    fn test_memory_resolver_roundtrip() {
        let memory = MemoryResolver::new(5);
        memory.add("repl:input", "let x = 1;");
        let resolved = memory.resolve("repl:input", None).expect("resolved");
        assert_eq!(
            memory.load(&resolved.path).expect("load"),
            "let x = 1;"
        );
        assert!(memory.load(Path::new("mem:unknown")).is_err());
    }

    #[test]
    fn test_fs_resolver_extension_probing() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("util.ts"), "export const x = 1;").unwrap();
        std::fs::create_dir(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg/index.ts"), "export const y = 2;").unwrap();

        let fs = FsResolver::new(dir.path(), 10);
        let by_bare = fs.resolve("./util", Some(&dir.path().join("main.ts"))).unwrap();
        assert!(by_bare.path.ends_with("util.ts"));

        let by_js = fs.resolve("./util.js", Some(&dir.path().join("main.ts"))).unwrap();
        assert!(by_js.path.ends_with("util.ts"));

        let by_dir = fs.resolve("./pkg", Some(&dir.path().join("main.ts"))).unwrap();
        assert!(by_dir.path.ends_with("pkg/index.ts") || by_dir.path.ends_with("index.ts"));

        assert!(fs.resolve("./missing", Some(&dir.path().join("main.ts"))).is_none());
    }

    #[test]
    fn test_fs_resolver_detects_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        let fs = FsResolver::new(dir.path(), 10);
        let resolved = fs
            .resolve("./config.json", Some(&dir.path().join("main.ts")))
            .unwrap();
        assert_eq!(resolved.kind, ModuleKind::Json);
    }
}
