//! Driver library: the session tying the VM, compiler, and loader together,
//! plus the REPL.

#![warn(clippy::all)]

pub mod error;
pub mod repl;
pub mod session;

pub use error::{SessionError, SessionResult};
pub use session::{Session, SessionOptions};
