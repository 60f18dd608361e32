//! Frontend: lexer, parser, type-checker contract, and the bytecode compiler.
//!
//! The parser produces the AST the compiler lowers; type annotations are
//! parsed and erased. The compiler routes every global and module-scope name
//! through the session's shared `HeapAllocator` so all compilers in a session
//! agree on global slot indices, and reserves one inline-cache slot per
//! property and method site.

#![warn(clippy::all)]

pub mod ast;
pub mod checker;
pub mod codegen;
pub mod lexer;
pub mod parser;

pub use ast::Program;
pub use checker::{CheckMode, PermissiveChecker, TypeCheck};
pub use codegen::{Compiler, CompilerOptions, ImportResolver, ModuleArtifact};
pub use parser::{parse_module, parse_program, ParsedModule};
