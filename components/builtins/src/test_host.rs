//! A minimal `HostContext` double for unit tests.

use core_types::{HostContext, NativeError, PromiseObj, ShapeTable, StringTable, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Host double: real string/shape tables, inert scheduling, no globals.
pub struct TestHost {
    strings: StringTable,
    shapes: ShapeTable,
    /// Microtasks enqueued through the host, for assertions.
    pub microtasks: Vec<(Value, Vec<Value>)>,
}

impl TestHost {
    /// Creates a fresh host.
    pub fn new() -> Self {
        Self {
            strings: StringTable::new(),
            shapes: ShapeTable::new(),
            microtasks: Vec::new(),
        }
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostContext for TestHost {
    fn strings(&mut self) -> &mut StringTable {
        &mut self.strings
    }

    fn shapes(&mut self) -> &mut ShapeTable {
        &mut self.shapes
    }

    fn enqueue_microtask(&mut self, callable: Value, args: Vec<Value>) {
        self.microtasks.push((callable, args));
    }

    fn call_value(
        &mut self,
        _callee: Value,
        _this: Value,
        _args: &[Value],
    ) -> Result<Value, NativeError> {
        Ok(Value::Undefined)
    }

    fn global_by_name(&self, _name: &str) -> Option<Value> {
        None
    }

    fn set_global_by_name(&mut self, _name: &str, _value: Value) -> bool {
        false
    }

    fn resolve_promise(&mut self, promise: &Value, value: Value) {
        if let Value::Promise(p) = promise {
            p.borrow_mut().settle_fulfilled(value);
        }
    }

    fn reject_promise(&mut self, promise: &Value, reason: Value) {
        if let Value::Promise(p) = promise {
            p.borrow_mut().settle_rejected(reason);
        }
    }

    fn promise_then(&mut self, _promise: &Value, _f: Value, _r: Value) -> Value {
        Value::Promise(Rc::new(RefCell::new(PromiseObj::new())))
    }
}
