//! The capability surface native functions see.
//!
//! Native callbacks run inside the VM but must not depend on the interpreter
//! crate, so the services they need are expressed as one small trait the VM
//! implements. The set is closed by design: allocation services, microtask
//! scheduling, reentrant calls, and named-global access.

use crate::function::NativeError;
use crate::interner::StringTable;
use crate::shape::ShapeTable;
use crate::value::Value;

/// Host services available to native functions.
pub trait HostContext {
    /// The session string table, for interning keys and results.
    fn strings(&mut self) -> &mut StringTable;

    /// The session shape table, for building objects.
    fn shapes(&mut self) -> &mut ShapeTable;

    /// Enqueues `callable(args…)` on the microtask queue.
    fn enqueue_microtask(&mut self, callable: Value, args: Vec<Value>);

    /// Calls a JavaScript value reentrantly and runs it to completion.
    fn call_value(
        &mut self,
        callee: Value,
        this: Value,
        args: &[Value],
    ) -> Result<Value, NativeError>;

    /// Reads a global by name through the published slot map.
    fn global_by_name(&self, name: &str) -> Option<Value>;

    /// Writes a global by name; false when the name has no slot.
    fn set_global_by_name(&mut self, name: &str, value: Value) -> bool;

    /// Settles a promise value as fulfilled, scheduling its reactions.
    fn resolve_promise(&mut self, promise: &Value, value: Value);

    /// Settles a promise value as rejected, scheduling its reactions.
    fn reject_promise(&mut self, promise: &Value, reason: Value);

    /// Registers `then`-style reactions on a promise and returns the
    /// chained promise they settle.
    fn promise_then(&mut self, promise: &Value, on_fulfilled: Value, on_rejected: Value) -> Value;
}
