//! Core value model shared by the compiler, interpreter, and module loader.
//!
//! This crate defines the runtime `Value` representation and its heap object
//! payloads, hidden classes (shapes), the session string table, the global
//! slot registry, and the diagnostic types used across the workspace.

#![warn(clippy::all)]

pub mod diagnostics;
pub mod function;
pub mod heap_alloc;
pub mod host;
pub mod interner;
pub mod object;
pub mod promise;
pub mod shape;
pub mod value;

pub use diagnostics::{codes, Diagnostic, DiagnosticKind, Severity, Span};
pub use function::{
    AccessorPair, BoundMethod, ClosureObj, FunctionObj, NativeError, NativeFunction, NativeImpl,
    RegexObj, SymbolObj, Upvalue, UpvalueRef,
};
pub use heap_alloc::HeapAllocator;
pub use host::HostContext;
pub use interner::{JsStr, StringTable};
pub use object::{ArrayBufferObj, DictObject, JsArray, PlainObject, PropSlot, TypedArrayKind, TypedArrayObj};
pub use promise::{FrameSnapshot, HandlerRecord, PromiseObj, PromiseState, Reaction};
pub use shape::{Shape, ShapeId, ShapeTable};
pub use value::Value;
