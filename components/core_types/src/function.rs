//! Callable payloads: bytecode functions, closures with upvalues, native
//! functions and constructors, bound methods, plus the accessor, symbol,
//! and regex object payloads.

use crate::host::HostContext;
use crate::interner::JsStr;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// A compiled bytecode function, identified by its slot in the VM's
/// function registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionObj {
    /// Index into the VM's registered chunk table.
    pub function: usize,
    /// Function name, if it has one.
    pub name: Option<JsStr>,
    /// Number of declared parameters.
    pub arity: u8,
    /// True when the last parameter is a rest parameter.
    pub is_variadic: bool,
    /// True for `async` functions; calling one produces a promise.
    pub is_async: bool,
}

/// A captured variable.
///
/// Open upvalues alias a live register slot on the VM's register stack;
/// when the owning frame ends they are closed: the value moves into a heap
/// cell and every holder reads and writes through that cell from then on.
/// A closed upvalue never reverts to open.
#[derive(Debug, Clone)]
pub enum Upvalue {
    /// The variable still lives on the register stack at this absolute index.
    Open {
        /// Absolute index into the VM register stack.
        stack_index: usize,
    },
    /// The variable has been moved to its own heap cell.
    Closed {
        /// The heap cell holding the value.
        value: Rc<RefCell<Value>>,
    },
}

impl Upvalue {
    /// Creates an open upvalue aliasing a register slot.
    pub fn new_open(stack_index: usize) -> Self {
        Upvalue::Open { stack_index }
    }

    /// Creates an already-closed upvalue owning `value`.
    pub fn new_closed(value: Value) -> Self {
        Upvalue::Closed {
            value: Rc::new(RefCell::new(value)),
        }
    }

    /// Closes this upvalue over `value`.
    pub fn close(&mut self, value: Value) {
        *self = Upvalue::Closed {
            value: Rc::new(RefCell::new(value)),
        };
    }

    /// Reads the captured value; open upvalues read from `stack`.
    pub fn get(&self, stack: &[Value]) -> Value {
        match self {
            Upvalue::Open { stack_index } => stack
                .get(*stack_index)
                .cloned()
                .unwrap_or(Value::Undefined),
            Upvalue::Closed { value } => value.borrow().clone(),
        }
    }

    /// Writes the captured value; open upvalues write to `stack`.
    pub fn set(&self, new_value: Value, stack: &mut [Value]) {
        match self {
            Upvalue::Open { stack_index } => {
                if *stack_index < stack.len() {
                    stack[*stack_index] = new_value;
                }
            }
            Upvalue::Closed { value } => {
                *value.borrow_mut() = new_value;
            }
        }
    }

    /// True while the upvalue still aliases a register.
    pub fn is_open(&self) -> bool {
        matches!(self, Upvalue::Open { .. })
    }

    /// The aliased register index of an open upvalue.
    pub fn stack_index(&self) -> Option<usize> {
        match self {
            Upvalue::Open { stack_index } => Some(*stack_index),
            Upvalue::Closed { .. } => None,
        }
    }
}

/// Shared handle to an upvalue. Two closures capturing the same variable
/// hold clones of the same handle.
pub type UpvalueRef = Rc<RefCell<Upvalue>>;

/// A function paired with its captured environment.
#[derive(Debug)]
pub struct ClosureObj {
    /// The underlying bytecode function.
    pub function: Rc<FunctionObj>,
    /// Captured variables, in descriptor order.
    pub upvalues: Vec<UpvalueRef>,
}

impl ClosureObj {
    /// Creates a closure over `function` with the given captures.
    pub fn new(function: Rc<FunctionObj>, upvalues: Vec<UpvalueRef>) -> Self {
        Self { function, upvalues }
    }

    /// Number of captured variables.
    pub fn upvalue_count(&self) -> usize {
        self.upvalues.len()
    }
}

/// Error channel for native callbacks.
#[derive(Debug)]
pub enum NativeError {
    /// A JavaScript value was thrown; unwinds like `throw`.
    Thrown(Value),
    /// The script requested process termination (`process.exit`).
    Exit(i32),
}

/// Signature of a native callback: host services, `this`, arguments.
pub type NativeImpl = fn(&mut dyn HostContext, Value, &[Value]) -> Result<Value, NativeError>;

/// A host function exposed to JavaScript.
#[derive(Clone)]
pub struct NativeFunction {
    /// Name reported by `Function.prototype.name`-style surfaces.
    pub name: JsStr,
    /// Minimum argument count; missing arguments arrive as `Undefined`.
    pub min_args: u8,
    /// True when the callback accepts any number of extra arguments.
    pub variadic: bool,
    /// The host callback.
    pub imp: NativeImpl,
    /// Static properties hung off the function value (`Array.isArray`, …).
    pub statics: Vec<(JsStr, Value)>,
}

impl NativeFunction {
    /// Creates a native function with no static properties.
    pub fn new(name: JsStr, min_args: u8, variadic: bool, imp: NativeImpl) -> Self {
        Self {
            name,
            min_args,
            variadic,
            imp,
            statics: Vec::new(),
        }
    }

    /// Looks up a static property by name.
    pub fn static_prop(&self, key: &str) -> Option<Value> {
        self.statics
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| v.clone())
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("variadic", &self.variadic)
            .field("statics", &self.statics.len())
            .finish()
    }
}

/// A callable with a pre-bound receiver and leading arguments.
#[derive(Debug)]
pub struct BoundMethod {
    /// The wrapped callable.
    pub target: Value,
    /// The receiver passed as `this`.
    pub receiver: Value,
    /// Arguments prepended to every call.
    pub bound_args: Vec<Value>,
}

/// Getter/setter pair stored in an object slot.
#[derive(Debug)]
pub struct AccessorPair {
    /// Getter callable, or `Undefined`.
    pub getter: Value,
    /// Setter callable, or `Undefined`.
    pub setter: Value,
}

/// A unique symbol. Identity is the allocation; the description is cosmetic.
#[derive(Debug)]
pub struct SymbolObj {
    /// Optional description shown by `toString`.
    pub description: Option<JsStr>,
}

/// A regular expression object: pattern and flags as written.
///
/// Compilation to a matcher happens lazily in the regexp builtin.
#[derive(Debug)]
pub struct RegexObj {
    /// The pattern source.
    pub source: JsStr,
    /// The flags string.
    pub flags: JsStr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_upvalue_reads_stack() {
        let upvalue = Upvalue::new_open(1);
        let stack = vec![Value::Int(10), Value::Int(20)];
        assert_eq!(upvalue.get(&stack), Value::Int(20));
    }

    #[test]
    fn test_open_upvalue_out_of_bounds() {
        let upvalue = Upvalue::new_open(10);
        let stack = vec![Value::Int(1)];
        assert_eq!(upvalue.get(&stack), Value::Undefined);
    }

    #[test]
    fn test_close_upvalue_moves_to_heap() {
        let mut upvalue = Upvalue::new_open(2);
        assert!(upvalue.is_open());
        upvalue.close(Value::Int(123));
        assert!(!upvalue.is_open());
        assert_eq!(upvalue.get(&[]), Value::Int(123));
    }

    #[test]
    fn test_closed_upvalue_shared_cell() {
        let handle: UpvalueRef = Rc::new(RefCell::new(Upvalue::new_closed(Value::Int(1))));
        let other = handle.clone();
        handle.borrow().set(Value::Int(99), &mut []);
        assert_eq!(other.borrow().get(&[]), Value::Int(99));
    }

    #[test]
    fn test_two_closures_share_capture() {
        let shared: UpvalueRef = Rc::new(RefCell::new(Upvalue::new_closed(Value::Int(42))));
        let func = Rc::new(FunctionObj {
            function: 0,
            name: None,
            arity: 0,
            is_variadic: false,
            is_async: false,
        });
        let c1 = ClosureObj::new(func.clone(), vec![shared.clone()]);
        let c2 = ClosureObj::new(func, vec![shared.clone()]);
        c1.upvalues[0].borrow().set(Value::Int(7), &mut []);
        assert_eq!(c2.upvalues[0].borrow().get(&[]), Value::Int(7));
    }
}
