//! Module loading: resolver chain, parallel parse pipeline, dependency
//! analysis, and topologically-ordered compilation and execution.
//!
//! Workers only lex and parse. Type checking, compilation, and execution run
//! on the main thread in dependency order, so global-slot allocation and VM
//! state stay single-threaded.

#![warn(clippy::all)]

pub mod analyzer;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod registry;
pub mod resolver;

pub use analyzer::DependencyAnalyzer;
pub use error::LoaderError;
pub use loader::{LoadedModule, LoaderConfig, LoaderHost, ModuleLoader};
pub use pipeline::{ParsePipeline, ParseResult};
pub use queue::{ParseJob, ParseQueue};
pub use record::{ModuleRecord, ModuleState};
pub use registry::{ModuleRegistry, RegistryConfig};
pub use resolver::{FsResolver, MemoryResolver, ModuleKind, NativeResolver, ResolvedModule, Resolver, ResolverChain};
