//! The register VM: dispatch loop, calls, upvalues, exceptions, inline
//! caches, promises, and the microtask queue.

use crate::frame::CallFrame;
use crate::inline_cache::{CacheStats, CachedProp, IcSite};
use bytecode::{Chunk, Constant, Opcode, Reg};
use builtins::errors::describe_error;
use builtins::make_error;
use core_types::{
    codes, AccessorPair, ClosureObj, Diagnostic, DiagnosticKind, FrameSnapshot, FunctionObj,
    HandlerRecord, HeapAllocator, HostContext, JsArray, JsStr, NativeError, PlainObject,
    PromiseObj, PromiseState, PropSlot, Reaction, ShapeTable, StringTable, Upvalue, UpvalueRef,
    Value,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::Arc;

const MAX_FRAMES: usize = 1024;

/// An error that escaped every handler, with its JS-visible thrown value.
#[derive(Debug)]
pub struct RuntimeError {
    /// The thrown value.
    pub value: Value,
    /// The rendered diagnostic.
    pub diagnostic: Diagnostic,
}

/// How a VM run can fail.
#[derive(Debug)]
pub enum VmError {
    /// An uncaught exception reached the driver.
    Runtime(RuntimeError),
    /// The script requested process termination.
    Exit(i32),
}

/// A queued microtask.
#[derive(Debug)]
enum Microtask {
    /// Call a callable; optionally settle a chained promise with the result.
    Call {
        callable: Value,
        args: Vec<Value>,
        chained: Option<Rc<RefCell<PromiseObj>>>,
    },
    /// Settle a promise directly (callback pass-through).
    Settle {
        promise: Rc<RefCell<PromiseObj>>,
        result: Result<Value, Value>,
    },
    /// Resume a suspended async frame.
    Resume {
        snapshot: FrameSnapshot,
        result: Result<Value, Value>,
    },
}

enum Unwind {
    /// A handler caught the value (or an async frame consumed it); keep
    /// dispatching.
    Continue,
    /// Unwinding consumed the boundary frame; the current run is done.
    Done,
}

/// The virtual machine.
pub struct Vm {
    registers: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Vec<Value>,
    global_names: HashMap<String, u16>,
    global_extras: HashMap<String, Value>,
    open_upvalues: BTreeMap<usize, UpvalueRef>,
    microtasks: VecDeque<Microtask>,
    functions: Vec<Arc<Chunk>>,
    chunk_ids: HashMap<*const Chunk, usize>,
    ic_tables: Vec<Vec<IcSite>>,
    pub(crate) shapes: ShapeTable,
    pub(crate) strings: StringTable,
    last_throw_site: Option<(String, u32)>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Creates an empty VM.
    pub fn new() -> Self {
        Self {
            registers: Vec::with_capacity(256),
            frames: Vec::with_capacity(16),
            globals: Vec::new(),
            global_names: HashMap::new(),
            global_extras: HashMap::new(),
            open_upvalues: BTreeMap::new(),
            microtasks: VecDeque::new(),
            functions: Vec::new(),
            chunk_ids: HashMap::new(),
            ic_tables: Vec::new(),
            shapes: ShapeTable::new(),
            strings: StringTable::new(),
            last_throw_site: None,
        }
    }

    // Registration ---------------------------------------------------------

    /// Registers a chunk, allocating its inline-cache table. Idempotent per
    /// chunk identity.
    pub fn intern_function(&mut self, chunk: &Arc<Chunk>) -> usize {
        let key = Arc::as_ptr(chunk);
        if let Some(&id) = self.chunk_ids.get(&key) {
            return id;
        }
        let id = self.functions.len();
        self.functions.push(chunk.clone());
        self.ic_tables
            .push(vec![IcSite::new(); chunk.ic_slot_count as usize]);
        self.chunk_ids.insert(key, id);
        id
    }

    /// Publishes the allocator's `name → slot` map so `globalThis['name']`
    /// resolves, growing the global heap to match.
    pub fn sync_global_names(&mut self, heap: &HeapAllocator) {
        if self.globals.len() < heap.len() {
            self.globals.resize(heap.len(), Value::Undefined);
        }
        self.global_names = heap.names().into_iter().collect();
    }

    /// Writes a global by slot, growing the heap as needed.
    pub fn set_global(&mut self, slot: u16, value: Value) {
        let slot = slot as usize;
        if self.globals.len() <= slot {
            self.globals.resize(slot + 1, Value::Undefined);
        }
        self.globals[slot] = value;
    }

    /// Reads a global by slot; `Undefined` before first write.
    pub fn get_global(&self, slot: u16) -> Value {
        self.globals
            .get(slot as usize)
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    // Execution ------------------------------------------------------------

    /// Executes a chunk to completion and returns its value. Queued
    /// microtasks are not drained here; callers drain after the main chunk
    /// returns.
    pub fn execute(&mut self, chunk: &Arc<Chunk>) -> Result<Value, VmError> {
        let func = self.intern_function(chunk);
        let base = self.registers.len();
        self.registers
            .resize(base + chunk.register_count as usize, Value::Undefined);
        self.frames.push(CallFrame {
            func,
            closure: None,
            ip: 0,
            base,
            return_slot: None,
            this: Value::Undefined,
            handlers: Vec::new(),
            promise: None,
        });
        let depth = self.frames.len() - 1;
        match self.run(depth) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.recover();
                Err(e)
            }
        }
    }

    /// Clears transient execution state after an uncaught error. Globals,
    /// functions, and caches survive so the session keeps working.
    fn recover(&mut self) {
        self.frames.clear();
        self.registers.clear();
        self.open_upvalues.clear();
    }

    /// True when no microtasks are pending.
    pub fn microtasks_empty(&self) -> bool {
        self.microtasks.is_empty()
    }

    /// Runs queued microtasks in FIFO order until the queue is empty.
    /// Microtasks enqueued by running microtasks execute in the same pass.
    pub fn drain_microtasks(&mut self) -> Result<(), VmError> {
        while let Some(task) = self.microtasks.pop_front() {
            match task {
                Microtask::Call {
                    callable,
                    args,
                    chained,
                } => match self.call_value_inner(callable, Value::Undefined, &args) {
                    Ok(value) => {
                        if let Some(chained) = chained {
                            self.settle(chained, Ok(value));
                        }
                    }
                    Err(NativeError::Thrown(reason)) => match chained {
                        Some(chained) => self.settle(chained, Err(reason)),
                        None => {
                            self.recover();
                            return Err(VmError::Runtime(self.runtime_error(reason)));
                        }
                    },
                    Err(NativeError::Exit(code)) => return Err(VmError::Exit(code)),
                },
                Microtask::Settle { promise, result } => self.settle(promise, result),
                Microtask::Resume { snapshot, result } => self.resume(snapshot, result)?,
            }
        }
        Ok(())
    }

    fn run(&mut self, stop_at: usize) -> Result<Value, VmError> {
        loop {
            let frame_idx = self.frames.len() - 1;
            let (func, base, ip) = {
                let f = &self.frames[frame_idx];
                (f.func, f.base, f.ip)
            };
            let chunk = self.functions[func].clone();

            if ip >= chunk.code.len() {
                if let Some(value) = self.finish_frame(Value::Undefined, stop_at) {
                    return Ok(value);
                }
                continue;
            }
            let op = chunk.code[ip].clone();
            self.frames[frame_idx].ip = ip + 1;

            macro_rules! binop {
                ($fn:path, $dst:expr, $lhs:expr, $rhs:expr) => {{
                    let a = self.reg(base, $lhs);
                    let b = self.reg(base, $rhs);
                    match $fn(&a, &b) {
                        Ok(v) => self.set_reg(base, $dst, v),
                        Err(thrown) => {
                            self.note_throw_site(&chunk, ip);
                            match self.unwind(thrown, stop_at)? {
                                Unwind::Continue => {}
                                Unwind::Done => return Ok(Value::Undefined),
                            }
                        }
                    }
                }};
            }
            macro_rules! compare_op {
                ($which:expr, $dst:expr, $lhs:expr, $rhs:expr) => {{
                    let a = self.reg(base, $lhs);
                    let b = self.reg(base, $rhs);
                    match crate::ops::compare($which, &a, &b) {
                        Ok(v) => self.set_reg(base, $dst, v),
                        Err(thrown) => {
                            self.note_throw_site(&chunk, ip);
                            match self.unwind(thrown, stop_at)? {
                                Unwind::Continue => {}
                                Unwind::Done => return Ok(Value::Undefined),
                            }
                        }
                    }
                }};
            }
            macro_rules! bubble {
                ($result:expr) => {
                    match $result {
                        Ok(v) => v,
                        Err(NativeError::Thrown(thrown)) => {
                            self.note_throw_site(&chunk, ip);
                            match self.unwind(thrown, stop_at)? {
                                Unwind::Continue => continue,
                                Unwind::Done => return Ok(Value::Undefined),
                            }
                        }
                        Err(NativeError::Exit(code)) => return Err(VmError::Exit(code)),
                    }
                };
            }

            match op {
                Opcode::LoadConst { dst, idx } => {
                    let value = self.constant_value(&chunk, idx);
                    self.set_reg(base, dst, value);
                }
                Opcode::LoadUndefined { dst } => self.set_reg(base, dst, Value::Undefined),
                Opcode::LoadNull { dst } => self.set_reg(base, dst, Value::Null),
                Opcode::LoadBool { dst, value } => {
                    self.set_reg(base, dst, Value::Boolean(value))
                }
                Opcode::LoadGlobal { dst, slot } => {
                    let value = self.get_global(slot);
                    self.set_reg(base, dst, value);
                }
                Opcode::StoreGlobal { slot, src } => {
                    let value = self.reg(base, src);
                    self.set_global(slot, value);
                }
                Opcode::Move { dst, src } => {
                    let value = self.reg(base, src);
                    self.set_reg(base, dst, value);
                }
                Opcode::LoadThis { dst } => {
                    let this = self.frames[frame_idx].this.clone();
                    self.set_reg(base, dst, this);
                }

                Opcode::Add { dst, lhs, rhs } => binop!(crate::ops::add, dst, lhs, rhs),
                Opcode::Sub { dst, lhs, rhs } => binop!(crate::ops::sub, dst, lhs, rhs),
                Opcode::Mul { dst, lhs, rhs } => binop!(crate::ops::mul, dst, lhs, rhs),
                Opcode::Div { dst, lhs, rhs } => binop!(crate::ops::div, dst, lhs, rhs),
                Opcode::Rem { dst, lhs, rhs } => binop!(crate::ops::rem, dst, lhs, rhs),
                Opcode::Pow { dst, lhs, rhs } => binop!(crate::ops::pow, dst, lhs, rhs),
                Opcode::BitAnd { dst, lhs, rhs } => binop!(crate::ops::bit_and, dst, lhs, rhs),
                Opcode::BitOr { dst, lhs, rhs } => binop!(crate::ops::bit_or, dst, lhs, rhs),
                Opcode::BitXor { dst, lhs, rhs } => binop!(crate::ops::bit_xor, dst, lhs, rhs),
                Opcode::Shl { dst, lhs, rhs } => binop!(crate::ops::shl, dst, lhs, rhs),
                Opcode::Shr { dst, lhs, rhs } => binop!(crate::ops::shr, dst, lhs, rhs),
                Opcode::UShr { dst, lhs, rhs } => binop!(crate::ops::ushr, dst, lhs, rhs),

                Opcode::Neg { dst, src } => {
                    let v = self.reg(base, src);
                    match crate::ops::neg(&v) {
                        Ok(out) => self.set_reg(base, dst, out),
                        Err(thrown) => {
                            self.note_throw_site(&chunk, ip);
                            match self.unwind(thrown, stop_at)? {
                                Unwind::Continue => {}
                                Unwind::Done => return Ok(Value::Undefined),
                            }
                        }
                    }
                }
                Opcode::BitNot { dst, src } => {
                    let v = self.reg(base, src);
                    match crate::ops::bit_not(&v) {
                        Ok(out) => self.set_reg(base, dst, out),
                        Err(thrown) => {
                            self.note_throw_site(&chunk, ip);
                            match self.unwind(thrown, stop_at)? {
                                Unwind::Continue => {}
                                Unwind::Done => return Ok(Value::Undefined),
                            }
                        }
                    }
                }
                Opcode::Not { dst, src } => {
                    let v = self.reg(base, src);
                    self.set_reg(base, dst, Value::Boolean(!v.is_truthy()));
                }
                Opcode::TypeOf { dst, src } => {
                    let v = self.reg(base, src);
                    let name = self.strings.intern(v.type_of());
                    self.set_reg(base, dst, Value::String(name));
                }

                Opcode::Eq { dst, lhs, rhs } => {
                    let (a, b) = (self.reg(base, lhs), self.reg(base, rhs));
                    self.set_reg(base, dst, Value::Boolean(a.loose_equals(&b)));
                }
                Opcode::Ne { dst, lhs, rhs } => {
                    let (a, b) = (self.reg(base, lhs), self.reg(base, rhs));
                    self.set_reg(base, dst, Value::Boolean(!a.loose_equals(&b)));
                }
                Opcode::StrictEq { dst, lhs, rhs } => {
                    let (a, b) = (self.reg(base, lhs), self.reg(base, rhs));
                    self.set_reg(base, dst, Value::Boolean(a.strict_equals(&b)));
                }
                Opcode::StrictNe { dst, lhs, rhs } => {
                    let (a, b) = (self.reg(base, lhs), self.reg(base, rhs));
                    self.set_reg(base, dst, Value::Boolean(!a.strict_equals(&b)));
                }
                Opcode::Lt { dst, lhs, rhs } => {
                    compare_op!(crate::ops::Compare::Lt, dst, lhs, rhs)
                }
                Opcode::Le { dst, lhs, rhs } => {
                    compare_op!(crate::ops::Compare::Le, dst, lhs, rhs)
                }
                Opcode::Gt { dst, lhs, rhs } => {
                    compare_op!(crate::ops::Compare::Gt, dst, lhs, rhs)
                }
                Opcode::Ge { dst, lhs, rhs } => {
                    compare_op!(crate::ops::Compare::Ge, dst, lhs, rhs)
                }

                Opcode::Jump { offset } => {
                    self.jump(frame_idx, ip, offset);
                }
                Opcode::JumpIfFalse { cond, offset } => {
                    if !self.reg(base, cond).is_truthy() {
                        self.jump(frame_idx, ip, offset);
                    }
                }
                Opcode::JumpIfTrue { cond, offset } => {
                    if self.reg(base, cond).is_truthy() {
                        self.jump(frame_idx, ip, offset);
                    }
                }
                Opcode::JumpIfNullish { cond, offset } => {
                    if self.reg(base, cond).is_nullish() {
                        self.jump(frame_idx, ip, offset);
                    }
                }

                Opcode::Call { dst, callee, argc } => {
                    let callee_value = self.reg(base, callee);
                    let first = base + callee as usize + 1;
                    let args: Vec<Value> =
                        self.registers[first..first + argc as usize].to_vec();
                    bubble!(self.enter_call(
                        callee_value,
                        Value::Undefined,
                        args,
                        Some(base + dst as usize),
                    ));
                }
                Opcode::CallMethod {
                    dst,
                    recv,
                    name,
                    argc,
                    ic,
                } => {
                    let receiver = self.reg(base, recv);
                    let name_str = self.constant_string(&chunk, name);
                    let first = base + recv as usize + 1;
                    let args: Vec<Value> =
                        self.registers[first..first + argc as usize].to_vec();
                    let method =
                        bubble!(self.resolve_method(func, ic, &receiver, &name_str));
                    bubble!(self.enter_call(
                        method,
                        receiver,
                        args,
                        Some(base + dst as usize),
                    ));
                }
                Opcode::Return { src } => {
                    let value = self.reg(base, src);
                    if let Some(result) = self.finish_frame(value, stop_at) {
                        return Ok(result);
                    }
                }
                Opcode::ReturnUndefined => {
                    if let Some(result) = self.finish_frame(Value::Undefined, stop_at) {
                        return Ok(result);
                    }
                }
                Opcode::Throw { src } => {
                    let value = self.reg(base, src);
                    self.note_throw_site(&chunk, ip);
                    match self.unwind(value, stop_at)? {
                        Unwind::Continue => {}
                        Unwind::Done => return Ok(Value::Undefined),
                    }
                }

                Opcode::NewObject { dst } => {
                    let obj = PlainObject::new(&self.shapes);
                    self.set_reg(base, dst, Value::Object(Rc::new(RefCell::new(obj))));
                }
                Opcode::GetProp { dst, obj, name, ic } => {
                    let receiver = self.reg(base, obj);
                    let name_str = self.constant_string(&chunk, name);
                    let value = bubble!(self.get_prop(func, ic, &receiver, &name_str));
                    self.set_reg(base, dst, value);
                }
                Opcode::SetProp { obj, name, src, ic } => {
                    let receiver = self.reg(base, obj);
                    let name_str = self.constant_string(&chunk, name);
                    let value = self.reg(base, src);
                    bubble!(self.set_prop(func, ic, &receiver, name_str, value));
                }
                Opcode::GetIndex { dst, obj, idx, ic } => {
                    let receiver = self.reg(base, obj);
                    let index = self.reg(base, idx);
                    let value = bubble!(self.get_index(func, ic, &receiver, &index));
                    self.set_reg(base, dst, value);
                }
                Opcode::SetIndex { obj, idx, src, ic } => {
                    let receiver = self.reg(base, obj);
                    let index = self.reg(base, idx);
                    let value = self.reg(base, src);
                    bubble!(self.set_index(func, ic, &receiver, &index, value));
                }
                Opcode::DeleteProp { dst, obj, name } => {
                    let receiver = self.reg(base, obj);
                    let name_str = self.constant_string(&chunk, name);
                    let deleted = self.delete_prop(&receiver, &name_str);
                    self.set_reg(base, dst, Value::Boolean(deleted));
                }
                Opcode::NewArray { dst, start, count } => {
                    let first = base + start as usize;
                    let elements = self.registers[first..first + count as usize].to_vec();
                    self.set_reg(
                        base,
                        dst,
                        Value::Array(Rc::new(RefCell::new(JsArray::from_elements(elements)))),
                    );
                }
                Opcode::DefineAccessor {
                    obj,
                    name,
                    getter,
                    setter,
                } => {
                    let receiver = self.reg(base, obj);
                    let name_str = self.constant_string(&chunk, name);
                    let getter = self.reg(base, getter);
                    let setter = self.reg(base, setter);
                    bubble!(self.define_accessor(&receiver, name_str, getter, setter));
                }

                Opcode::MakeClosure { dst, func: fidx, upvalues } => {
                    let inner = chunk.functions[fidx as usize].clone();
                    let inner_id = self.intern_function(&inner);
                    let func_obj = Rc::new(FunctionObj {
                        function: inner_id,
                        name: inner
                            .name
                            .as_deref()
                            .map(|n| self.strings.intern(n)),
                        arity: inner.arity,
                        is_variadic: inner.is_variadic,
                        is_async: inner.is_async,
                    });
                    let value = if upvalues.is_empty() {
                        Value::Function(func_obj)
                    } else {
                        let mut captured = Vec::with_capacity(upvalues.len());
                        for desc in &upvalues {
                            if desc.is_local {
                                let at = base + desc.index as usize;
                                let handle = self
                                    .open_upvalues
                                    .entry(at)
                                    .or_insert_with(|| {
                                        Rc::new(RefCell::new(Upvalue::new_open(at)))
                                    })
                                    .clone();
                                captured.push(handle);
                            } else {
                                let handle = self.frames[frame_idx]
                                    .closure
                                    .as_ref()
                                    .and_then(|c| c.upvalues.get(desc.index as usize).cloned())
                                    .unwrap_or_else(|| {
                                        Rc::new(RefCell::new(Upvalue::new_closed(
                                            Value::Undefined,
                                        )))
                                    });
                                captured.push(handle);
                            }
                        }
                        Value::Closure(Rc::new(ClosureObj::new(func_obj, captured)))
                    };
                    self.set_reg(base, dst, value);
                }
                Opcode::GetUpvalue { dst, idx } => {
                    let value = self.frames[frame_idx]
                        .closure
                        .as_ref()
                        .and_then(|c| c.upvalues.get(idx as usize).cloned())
                        .map(|h| h.borrow().get(&self.registers))
                        .unwrap_or(Value::Undefined);
                    self.set_reg(base, dst, value);
                }
                Opcode::SetUpvalue { idx, src } => {
                    let value = self.reg(base, src);
                    if let Some(handle) = self.frames[frame_idx]
                        .closure
                        .as_ref()
                        .and_then(|c| c.upvalues.get(idx as usize).cloned())
                    {
                        handle.borrow().set(value, &mut self.registers);
                    }
                }
                Opcode::CloseUpvalues { from } => {
                    self.close_upvalues(base + from as usize);
                }

                Opcode::PushHandler { offset, reg } => {
                    let catch_ip = ((ip + 1) as i64 + offset as i64) as usize;
                    self.frames[frame_idx].handlers.push(HandlerRecord {
                        catch_ip,
                        catch_reg: reg,
                    });
                }
                Opcode::PopHandler => {
                    self.frames[frame_idx].handlers.pop();
                }

                Opcode::Await { dst, src } => {
                    let awaited = self.reg(base, src);
                    if self.frames[frame_idx].promise.is_none() {
                        let thrown =
                            make_error("TypeError", "await is only valid in async functions");
                        self.note_throw_site(&chunk, ip);
                        match self.unwind(thrown, stop_at)? {
                            Unwind::Continue => continue,
                            Unwind::Done => return Ok(Value::Undefined),
                        }
                    }
                    self.suspend(dst, awaited, &chunk);
                    if self.frames.len() == stop_at {
                        return Ok(Value::Undefined);
                    }
                }
            }
        }
    }

    fn jump(&mut self, frame_idx: usize, ip: usize, offset: i16) {
        self.frames[frame_idx].ip = ((ip + 1) as i64 + offset as i64) as usize;
    }

    fn reg(&self, base: usize, r: Reg) -> Value {
        self.registers
            .get(base + r as usize)
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    fn set_reg(&mut self, base: usize, r: Reg, value: Value) {
        let at = base + r as usize;
        if self.registers.len() <= at {
            self.registers.resize(at + 1, Value::Undefined);
        }
        self.registers[at] = value;
    }

    fn constant_value(&mut self, chunk: &Chunk, idx: u16) -> Value {
        match chunk.constants.get(idx as usize) {
            Some(Constant::Undefined) | None => Value::Undefined,
            Some(Constant::Null) => Value::Null,
            Some(Constant::Bool(b)) => Value::Boolean(*b),
            Some(Constant::Int(n)) => Value::Int(*n),
            Some(Constant::Number(n)) => Value::Number(*n),
            Some(Constant::String(s)) => Value::String(self.strings.intern(s)),
            Some(Constant::BigInt(n)) => Value::BigInt(Rc::new(n.clone())),
        }
    }

    fn constant_string(&mut self, chunk: &Chunk, idx: u16) -> JsStr {
        match chunk.constants.get(idx as usize) {
            Some(Constant::String(s)) => self.strings.intern(s),
            _ => self.strings.intern(""),
        }
    }

    fn note_throw_site(&mut self, chunk: &Chunk, ip: usize) {
        let name = chunk.name.clone().unwrap_or_else(|| "<anonymous>".into());
        self.last_throw_site = Some((name, chunk.line_for(ip)));
    }

    fn runtime_error(&self, value: Value) -> RuntimeError {
        let mut diagnostic = Diagnostic::error(
            codes::RUNTIME_UNCAUGHT,
            DiagnosticKind::Runtime,
            format!("uncaught {}", describe_error(&value)),
        );
        if let Some((name, line)) = &self.last_throw_site {
            diagnostic.message = format!(
                "uncaught {} (in {} at line {})",
                describe_error(&value),
                name,
                line
            );
        }
        RuntimeError { value, diagnostic }
    }

    // Frames, calls, and unwinding ----------------------------------------

    /// Pops the current frame with `value` as its result. Returns
    /// `Some(value)` when the pop reached `stop_at` and the run is complete.
    fn finish_frame(&mut self, value: Value, stop_at: usize) -> Option<Value> {
        let frame = self.frames.pop().expect("finish_frame with no frame");
        self.close_upvalues(frame.base);
        self.registers.truncate(frame.base);
        if let Some(promise) = frame.promise {
            self.settle(promise, Ok(value.clone()));
        } else if let Some(slot) = frame.return_slot {
            if self.registers.len() <= slot {
                self.registers.resize(slot + 1, Value::Undefined);
            }
            self.registers[slot] = value.clone();
        }
        if self.frames.len() == stop_at {
            Some(value)
        } else {
            None
        }
    }

    /// Unwinds `value` through handler stacks and frames.
    fn unwind(&mut self, value: Value, stop_at: usize) -> Result<Unwind, VmError> {
        let mut value = value;
        loop {
            if self.frames.len() == stop_at {
                return Err(VmError::Runtime(self.runtime_error(value)));
            }
            let frame_idx = self.frames.len() - 1;
            if let Some(handler) = self.frames[frame_idx].handlers.pop() {
                let base = self.frames[frame_idx].base;
                self.frames[frame_idx].ip = handler.catch_ip;
                self.set_reg(base, handler.catch_reg, value);
                return Ok(Unwind::Continue);
            }
            let frame = self.frames.pop().expect("unwind with no frame");
            log::trace!("unwinding past frame fn#{}", frame.func);
            self.close_upvalues(frame.base);
            self.registers.truncate(frame.base);
            if let Some(promise) = frame.promise {
                self.settle(promise, Err(value));
                if self.frames.len() == stop_at {
                    return Ok(Unwind::Done);
                }
                return Ok(Unwind::Continue);
            }
        }
    }

    /// Dispatches a call: native functions run immediately, bytecode
    /// callables get a frame. `return_slot` receives the result (or the
    /// promise, for async callees).
    fn enter_call(
        &mut self,
        callee: Value,
        this: Value,
        args: Vec<Value>,
        return_slot: Option<usize>,
    ) -> Result<(), NativeError> {
        match callee {
            Value::NativeFunction(nf) | Value::NativeConstructor(nf) => {
                let result = (nf.imp)(self, this, &args)?;
                if let Some(slot) = return_slot {
                    if self.registers.len() <= slot {
                        self.registers.resize(slot + 1, Value::Undefined);
                    }
                    self.registers[slot] = result;
                }
                Ok(())
            }
            Value::Function(func_obj) => {
                self.push_js_frame(&func_obj, None, this, &args, return_slot)?;
                Ok(())
            }
            Value::Closure(closure) => {
                let func_obj = closure.function.clone();
                self.push_js_frame(&func_obj, Some(closure), this, &args, return_slot)?;
                Ok(())
            }
            Value::BoundMethod(bound) => {
                let mut full_args = bound.bound_args.clone();
                full_args.extend(args);
                self.enter_call(
                    bound.target.clone(),
                    bound.receiver.clone(),
                    full_args,
                    return_slot,
                )
            }
            other => Err(NativeError::Thrown(make_error(
                "TypeError",
                &format!("{} is not callable", other.type_of()),
            ))),
        }
    }

    /// Pushes a bytecode frame, copying arguments into the fresh window and
    /// gathering rest arguments. Returns the promise for async callees.
    fn push_js_frame(
        &mut self,
        func_obj: &Rc<FunctionObj>,
        closure: Option<Rc<ClosureObj>>,
        this: Value,
        args: &[Value],
        return_slot: Option<usize>,
    ) -> Result<Option<Value>, NativeError> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(NativeError::Thrown(make_error(
                "RangeError",
                "maximum call stack size exceeded",
            )));
        }
        let chunk = self.functions[func_obj.function].clone();
        let base = self.registers.len();
        self.registers
            .resize(base + chunk.register_count as usize, Value::Undefined);

        let arity = chunk.arity as usize;
        for (i, arg) in args.iter().take(arity).enumerate() {
            self.registers[base + i] = arg.clone();
        }
        if chunk.is_variadic {
            let rest: Vec<Value> = args.get(arity..).map(<[Value]>::to_vec).unwrap_or_default();
            self.registers[base + arity] =
                Value::Array(Rc::new(RefCell::new(JsArray::from_elements(rest))));
        }

        let promise = if chunk.is_async {
            Some(Rc::new(RefCell::new(PromiseObj::new())))
        } else {
            None
        };
        if let (Some(slot), Some(p)) = (return_slot, &promise) {
            if self.registers.len() <= slot {
                self.registers.resize(slot + 1, Value::Undefined);
            }
            self.registers[slot] = Value::Promise(p.clone());
        }

        self.frames.push(CallFrame {
            func: func_obj.function,
            closure,
            ip: 0,
            base,
            return_slot: if promise.is_some() { None } else { return_slot },
            this,
            handlers: Vec::new(),
            promise: promise.clone(),
        });
        Ok(promise.map(Value::Promise))
    }

    /// Suspends the current (async) frame on `awaited`.
    fn suspend(&mut self, dst: Reg, awaited: Value, chunk: &Chunk) {
        let frame = self.frames.pop().expect("suspend with no frame");
        let window = chunk.register_count as usize;
        let registers = self.registers[frame.base..frame.base + window].to_vec();
        self.close_upvalues(frame.base);
        self.registers.truncate(frame.base);
        let snapshot = FrameSnapshot {
            function: frame.func,
            closure: frame.closure,
            registers,
            ip: frame.ip,
            handlers: frame.handlers,
            dst,
            promise: frame.promise.expect("suspend of non-async frame"),
        };
        match awaited {
            Value::Promise(p) => {
                let state = p.borrow().state;
                match state {
                    PromiseState::Pending => {
                        p.borrow_mut().reactions.push(Reaction::Resume(snapshot));
                    }
                    PromiseState::Fulfilled => {
                        let value = p.borrow().value.clone();
                        self.microtasks.push_back(Microtask::Resume {
                            snapshot,
                            result: Ok(value),
                        });
                    }
                    PromiseState::Rejected => {
                        let reason = p.borrow().value.clone();
                        self.microtasks.push_back(Microtask::Resume {
                            snapshot,
                            result: Err(reason),
                        });
                    }
                }
            }
            other => {
                // Awaiting a plain value still yields to the microtask queue.
                self.microtasks.push_back(Microtask::Resume {
                    snapshot,
                    result: Ok(other),
                });
            }
        }
    }

    /// Rebuilds a suspended frame at the top of the register stack and runs
    /// it until it returns, suspends again, or rejects.
    fn resume(
        &mut self,
        snapshot: FrameSnapshot,
        result: Result<Value, Value>,
    ) -> Result<(), VmError> {
        let chunk = self.functions[snapshot.function].clone();
        let base = self.registers.len();
        let window = chunk.register_count as usize;
        self.registers.extend(snapshot.registers);
        if self.registers.len() < base + window {
            self.registers.resize(base + window, Value::Undefined);
        }
        self.frames.push(CallFrame {
            func: snapshot.function,
            closure: snapshot.closure,
            ip: snapshot.ip,
            base,
            return_slot: None,
            this: Value::Undefined,
            handlers: snapshot.handlers,
            promise: Some(snapshot.promise),
        });
        let depth = self.frames.len() - 1;
        match result {
            Ok(value) => {
                let dst = snapshot.dst;
                self.set_reg(base, dst, value);
                self.run(depth)?;
            }
            Err(reason) => match self.unwind(reason, depth)? {
                Unwind::Continue => {
                    self.run(depth)?;
                }
                Unwind::Done => {}
            },
        }
        Ok(())
    }

    fn close_upvalues(&mut self, from: usize) {
        let to_close: Vec<(usize, UpvalueRef)> = self
            .open_upvalues
            .range(from..)
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        for (at, handle) in to_close {
            let value = self
                .registers
                .get(at)
                .cloned()
                .unwrap_or(Value::Undefined);
            handle.borrow_mut().close(value);
            self.open_upvalues.remove(&at);
        }
    }

    fn call_value_inner(
        &mut self,
        callee: Value,
        this: Value,
        args: &[Value],
    ) -> Result<Value, NativeError> {
        match callee {
            Value::NativeFunction(nf) | Value::NativeConstructor(nf) => {
                (nf.imp)(self, this, args)
            }
            Value::Function(_) | Value::Closure(_) => {
                let depth = self.frames.len();
                let promise = match &callee {
                    Value::Function(f) => {
                        self.push_js_frame(f, None, this, args, None)?
                    }
                    Value::Closure(c) => {
                        self.push_js_frame(&c.function.clone(), Some(c.clone()), this, args, None)?
                    }
                    _ => unreachable!(),
                };
                let result = self.run(depth).map_err(|e| match e {
                    VmError::Runtime(re) => NativeError::Thrown(re.value),
                    VmError::Exit(code) => NativeError::Exit(code),
                })?;
                Ok(promise.unwrap_or(result))
            }
            Value::BoundMethod(bound) => {
                let mut full_args = bound.bound_args.clone();
                full_args.extend_from_slice(args);
                self.call_value_inner(bound.target.clone(), bound.receiver.clone(), &full_args)
            }
            other => Err(NativeError::Thrown(make_error(
                "TypeError",
                &format!("{} is not callable", other.type_of()),
            ))),
        }
    }

    // Promises -------------------------------------------------------------

    /// Settles a promise, adopting inner promises and scheduling reactions.
    fn settle(&mut self, promise: Rc<RefCell<PromiseObj>>, result: Result<Value, Value>) {
        if let Ok(Value::Promise(inner)) = &result {
            if Rc::ptr_eq(inner, &promise) {
                let reason = make_error("TypeError", "promise resolved with itself");
                let reactions = promise.borrow_mut().settle_rejected(reason.clone());
                self.schedule_reactions(Err(reason), reactions);
                return;
            }
            let state = inner.borrow().state;
            match state {
                PromiseState::Pending => {
                    inner.borrow_mut().reactions.push(Reaction::Callbacks {
                        on_fulfilled: Value::Undefined,
                        on_rejected: Value::Undefined,
                        chained: promise,
                    });
                }
                PromiseState::Fulfilled => {
                    let value = inner.borrow().value.clone();
                    self.settle(promise, Ok(value));
                }
                PromiseState::Rejected => {
                    let reason = inner.borrow().value.clone();
                    self.settle(promise, Err(reason));
                }
            }
            return;
        }

        let reactions = match &result {
            Ok(value) => promise.borrow_mut().settle_fulfilled(value.clone()),
            Err(reason) => promise.borrow_mut().settle_rejected(reason.clone()),
        };
        self.schedule_reactions(result, reactions);
    }

    fn schedule_reactions(&mut self, result: Result<Value, Value>, reactions: Vec<Reaction>) {
        for reaction in reactions {
            match reaction {
                Reaction::Callbacks {
                    on_fulfilled,
                    on_rejected,
                    chained,
                } => {
                    let (callback, payload) = match &result {
                        Ok(value) => (on_fulfilled, value.clone()),
                        Err(reason) => (on_rejected, reason.clone()),
                    };
                    if callback.is_callable() {
                        self.microtasks.push_back(Microtask::Call {
                            callable: callback,
                            args: vec![payload],
                            chained: Some(chained),
                        });
                    } else {
                        // Pass-through keeps microtask ordering.
                        let result = match &result {
                            Ok(v) => Ok(v.clone()),
                            Err(e) => Err(e.clone()),
                        };
                        self.microtasks
                            .push_back(Microtask::Settle { promise: chained, result });
                    }
                }
                Reaction::Resume(snapshot) => {
                    let result = match &result {
                        Ok(v) => Ok(v.clone()),
                        Err(e) => Err(e.clone()),
                    };
                    self.microtasks
                        .push_back(Microtask::Resume { snapshot, result });
                }
            }
        }
    }

    // Properties -----------------------------------------------------------

    fn get_prop(
        &mut self,
        func: usize,
        ic: u16,
        receiver: &Value,
        name: &JsStr,
    ) -> Result<Value, NativeError> {
        match receiver {
            Value::Object(o) => {
                let shape_id = o.borrow().shape.id;
                if let Some(prop) = self.ic_lookup(func, ic, shape_id) {
                    match prop {
                        CachedProp::Slot(offset) => return Ok(o.borrow().slot(offset)),
                        CachedProp::Accessor(offset) => {
                            let accessor = o.borrow().slot(offset);
                            return self.call_accessor_get(accessor, receiver);
                        }
                        CachedProp::Transition { .. } => {}
                    }
                }
                self.ic_miss(func, ic);
                let resolved = o.borrow().resolve_own(name);
                match resolved {
                    Some(PropSlot::Data(offset)) => {
                        self.ic_install(func, ic, shape_id, CachedProp::Slot(offset));
                        Ok(o.borrow().slot(offset))
                    }
                    Some(PropSlot::Accessor(offset)) => {
                        self.ic_install(func, ic, shape_id, CachedProp::Accessor(offset));
                        let accessor = o.borrow().slot(offset);
                        self.call_accessor_get(accessor, receiver)
                    }
                    None => {
                        let proto = o.borrow().proto.clone();
                        self.proto_get(proto, name, receiver)
                    }
                }
            }
            Value::Dict(d) => {
                let own = d.borrow().get(name);
                match own {
                    Some(value) => Ok(value),
                    None => {
                        let proto = d.borrow().proto.clone();
                        self.proto_get(proto, name, receiver)
                    }
                }
            }
            Value::Array(a) => match &**name {
                "length" => Ok(Value::from_f64(a.borrow().len() as f64)),
                _ => Ok(builtins::method_for(receiver, name).unwrap_or(Value::Undefined)),
            },
            Value::TypedArray(t) => match &**name {
                "length" => Ok(Value::from_f64(t.borrow().length as f64)),
                "buffer" => Ok(Value::ArrayBuffer(t.borrow().buffer.clone())),
                _ => Ok(Value::Undefined),
            },
            Value::ArrayBuffer(b) => match &**name {
                "byteLength" => Ok(Value::from_f64(b.borrow().byte_length() as f64)),
                _ => Ok(Value::Undefined),
            },
            Value::String(s) => match &**name {
                "length" => Ok(Value::from_f64(s.chars().count() as f64)),
                _ => Ok(builtins::method_for(receiver, name).unwrap_or(Value::Undefined)),
            },
            Value::NativeFunction(nf) | Value::NativeConstructor(nf) => match &**name {
                "name" => Ok(Value::String(nf.name.clone())),
                _ => Ok(nf.static_prop(name).unwrap_or(Value::Undefined)),
            },
            Value::Function(f) => match &**name {
                "name" => Ok(f
                    .name
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Undefined)),
                _ => Ok(Value::Undefined),
            },
            Value::Closure(c) => match &**name {
                "name" => Ok(c
                    .function
                    .name
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Undefined)),
                _ => Ok(Value::Undefined),
            },
            Value::Regex(r) => match &**name {
                "source" => Ok(Value::String(r.source.clone())),
                "flags" => Ok(Value::String(r.flags.clone())),
                _ => Ok(builtins::method_for(receiver, name).unwrap_or(Value::Undefined)),
            },
            Value::Promise(_) => {
                Ok(builtins::method_for(receiver, name).unwrap_or(Value::Undefined))
            }
            Value::Symbol(s) => match &**name {
                "description" => Ok(s
                    .description
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Undefined)),
                _ => Ok(Value::Undefined),
            },
            Value::GlobalThis => Ok(self.global_by_name(name).unwrap_or(Value::Undefined)),
            Value::Undefined | Value::Null => Err(NativeError::Thrown(make_error(
                "TypeError",
                &format!(
                    "cannot read properties of {} (reading {:?})",
                    receiver.type_of(),
                    &**name
                ),
            ))),
            _ => Ok(builtins::method_for(receiver, name).unwrap_or(Value::Undefined)),
        }
    }

    fn proto_get(
        &mut self,
        mut proto: Value,
        name: &JsStr,
        receiver: &Value,
    ) -> Result<Value, NativeError> {
        loop {
            match proto {
                Value::Object(o) => {
                    let resolved = o.borrow().resolve_own(name);
                    match resolved {
                        Some(PropSlot::Data(offset)) => return Ok(o.borrow().slot(offset)),
                        Some(PropSlot::Accessor(offset)) => {
                            let accessor = o.borrow().slot(offset);
                            return self.call_accessor_get(accessor, receiver);
                        }
                        None => {
                            let next = o.borrow().proto.clone();
                            proto = next;
                        }
                    }
                }
                Value::Dict(d) => {
                    let own = d.borrow().get(name);
                    match own {
                        Some(value) => return Ok(value),
                        None => {
                            let next = d.borrow().proto.clone();
                            proto = next;
                        }
                    }
                }
                _ => return Ok(Value::Undefined),
            }
        }
    }

    fn call_accessor_get(
        &mut self,
        accessor: Value,
        receiver: &Value,
    ) -> Result<Value, NativeError> {
        match accessor {
            Value::Accessor(pair) => {
                if pair.getter.is_callable() {
                    self.call_value_inner(pair.getter.clone(), receiver.clone(), &[])
                } else {
                    Ok(Value::Undefined)
                }
            }
            other => Ok(other),
        }
    }

    fn set_prop(
        &mut self,
        func: usize,
        ic: u16,
        receiver: &Value,
        name: JsStr,
        value: Value,
    ) -> Result<(), NativeError> {
        match receiver {
            Value::Object(o) => {
                let shape_id = o.borrow().shape.id;
                if let Some(prop) = self.ic_lookup(func, ic, shape_id) {
                    match prop {
                        CachedProp::Slot(offset) => {
                            o.borrow_mut().set_slot(offset, value);
                            return Ok(());
                        }
                        CachedProp::Transition { to, offset } => {
                            let mut ob = o.borrow_mut();
                            ob.shape = to;
                            ob.set_slot(offset, value);
                            return Ok(());
                        }
                        CachedProp::Accessor(offset) => {
                            let accessor = o.borrow().slot(offset);
                            return self.call_accessor_set(accessor, receiver, value);
                        }
                    }
                }
                self.ic_miss(func, ic);
                let resolved = o.borrow().resolve_own(&name);
                match resolved {
                    Some(PropSlot::Data(offset)) => {
                        o.borrow_mut().set_slot(offset, value);
                        self.ic_install(func, ic, shape_id, CachedProp::Slot(offset));
                        Ok(())
                    }
                    Some(PropSlot::Accessor(offset)) => {
                        self.ic_install(func, ic, shape_id, CachedProp::Accessor(offset));
                        let accessor = o.borrow().slot(offset);
                        self.call_accessor_set(accessor, receiver, value)
                    }
                    None => {
                        // A setter anywhere on the chain intercepts the add.
                        if let Some(accessor) = self.proto_setter(o.borrow().proto.clone(), &name)
                        {
                            return self.call_accessor_set(accessor, receiver, value);
                        }
                        let offset = o.borrow_mut().set(&mut self.shapes, name, value);
                        let to = o.borrow().shape.clone();
                        self.ic_install(
                            func,
                            ic,
                            shape_id,
                            CachedProp::Transition { to, offset },
                        );
                        Ok(())
                    }
                }
            }
            Value::Dict(d) => {
                d.borrow_mut().set(name, value);
                Ok(())
            }
            Value::Array(a) => {
                if &*name == "length" {
                    let len = value.to_number();
                    if len.fract() != 0.0 || len < 0.0 {
                        return Err(NativeError::Thrown(make_error(
                            "RangeError",
                            "invalid array length",
                        )));
                    }
                    let len = len as usize;
                    a.borrow_mut().elements.resize(len, Value::Undefined);
                }
                Ok(())
            }
            Value::GlobalThis => {
                if !self.set_global_by_name(&name, value.clone()) {
                    self.global_extras.insert(name.to_string(), value);
                }
                Ok(())
            }
            Value::Undefined | Value::Null => Err(NativeError::Thrown(make_error(
                "TypeError",
                &format!(
                    "cannot set properties of {} (setting {:?})",
                    receiver.type_of(),
                    &*name
                ),
            ))),
            _ => Ok(()),
        }
    }

    fn proto_setter(&mut self, mut proto: Value, name: &JsStr) -> Option<Value> {
        loop {
            match proto {
                Value::Object(o) => {
                    let resolved = o.borrow().resolve_own(name);
                    match resolved {
                        Some(PropSlot::Accessor(offset)) => {
                            return Some(o.borrow().slot(offset));
                        }
                        Some(PropSlot::Data(_)) => return None,
                        None => {
                            let next = o.borrow().proto.clone();
                            proto = next;
                        }
                    }
                }
                _ => return None,
            }
        }
    }

    fn call_accessor_set(
        &mut self,
        accessor: Value,
        receiver: &Value,
        value: Value,
    ) -> Result<(), NativeError> {
        if let Value::Accessor(pair) = accessor {
            if pair.setter.is_callable() {
                self.call_value_inner(pair.setter.clone(), receiver.clone(), &[value])?;
            }
        }
        Ok(())
    }

    fn define_accessor(
        &mut self,
        receiver: &Value,
        name: JsStr,
        getter: Value,
        setter: Value,
    ) -> Result<(), NativeError> {
        let Value::Object(o) = receiver else {
            return Err(NativeError::Thrown(make_error(
                "TypeError",
                "accessors require an ordinary object",
            )));
        };
        let existing = o.borrow().get_own(&name);
        let pair = match existing {
            Some(Value::Accessor(old)) => AccessorPair {
                getter: if getter.is_callable() {
                    getter
                } else {
                    old.getter.clone()
                },
                setter: if setter.is_callable() {
                    setter
                } else {
                    old.setter.clone()
                },
            },
            _ => AccessorPair { getter, setter },
        };
        o.borrow_mut()
            .set(&mut self.shapes, name, Value::Accessor(Rc::new(pair)));
        Ok(())
    }

    fn get_index(
        &mut self,
        func: usize,
        ic: u16,
        receiver: &Value,
        index: &Value,
    ) -> Result<Value, NativeError> {
        match (receiver, index) {
            (Value::Array(a), _) if index.as_number().is_some() => {
                let n = index.as_number().unwrap_or(f64::NAN);
                if n.fract() != 0.0 || n < 0.0 {
                    return Ok(Value::Undefined);
                }
                Ok(a.borrow().get(n as usize))
            }
            (Value::TypedArray(t), _) if index.as_number().is_some() => {
                let n = index.as_number().unwrap_or(f64::NAN);
                if n.fract() != 0.0 || n < 0.0 {
                    return Ok(Value::Undefined);
                }
                Ok(t.borrow().get(n as usize))
            }
            (Value::String(s), _) if index.as_number().is_some() => {
                let n = index.as_number().unwrap_or(f64::NAN);
                if n.fract() != 0.0 || n < 0.0 {
                    return Ok(Value::Undefined);
                }
                Ok(s
                    .chars()
                    .nth(n as usize)
                    .map(|c| Value::String(self.strings.intern_owned(c.to_string())))
                    .unwrap_or(Value::Undefined))
            }
            (Value::Undefined | Value::Null, _) => Err(NativeError::Thrown(make_error(
                "TypeError",
                &format!("cannot read properties of {}", receiver.type_of()),
            ))),
            (_, Value::String(key)) => {
                let key = key.clone();
                self.get_prop(func, ic, receiver, &key)
            }
            (_, other) if other.as_number().is_some() => {
                let key = self.strings.intern_owned(other.to_string());
                self.get_prop(func, ic, receiver, &key)
            }
            _ => Ok(Value::Undefined),
        }
    }

    fn set_index(
        &mut self,
        func: usize,
        ic: u16,
        receiver: &Value,
        index: &Value,
        value: Value,
    ) -> Result<(), NativeError> {
        match (receiver, index) {
            (Value::Array(a), _) if index.as_number().is_some() => {
                let n = index.as_number().unwrap_or(f64::NAN);
                if n.fract() == 0.0 && n >= 0.0 {
                    a.borrow_mut().set(n as usize, value);
                }
                Ok(())
            }
            (Value::TypedArray(t), _) if index.as_number().is_some() => {
                let n = index.as_number().unwrap_or(f64::NAN);
                if n.fract() == 0.0 && n >= 0.0 {
                    t.borrow().set(n as usize, value.to_number());
                }
                Ok(())
            }
            (Value::Undefined | Value::Null, _) => Err(NativeError::Thrown(make_error(
                "TypeError",
                &format!("cannot set properties of {}", receiver.type_of()),
            ))),
            (_, Value::String(key)) => {
                let key = key.clone();
                self.set_prop(func, ic, receiver, key, value)
            }
            (_, other) if other.as_number().is_some() => {
                let key = self.strings.intern_owned(other.to_string());
                self.set_prop(func, ic, receiver, key, value)
            }
            _ => Ok(()),
        }
    }

    fn delete_prop(&mut self, receiver: &Value, name: &JsStr) -> bool {
        match receiver {
            Value::Object(o) => o.borrow_mut().delete(&mut self.shapes, name),
            Value::Dict(d) => d.borrow_mut().delete(name),
            _ => false,
        }
    }

    fn resolve_method(
        &mut self,
        func: usize,
        ic: u16,
        receiver: &Value,
        name: &JsStr,
    ) -> Result<Value, NativeError> {
        let method = match receiver {
            Value::Object(_)
            | Value::Dict(_)
            | Value::GlobalThis
            | Value::NativeFunction(_)
            | Value::NativeConstructor(_) => self.get_prop(func, ic, receiver, name)?,
            Value::Undefined | Value::Null => {
                return Err(NativeError::Thrown(make_error(
                    "TypeError",
                    &format!(
                        "cannot read properties of {} (calling {:?})",
                        receiver.type_of(),
                        &**name
                    ),
                )));
            }
            other => builtins::method_for(other, name).unwrap_or(Value::Undefined),
        };
        if !method.is_callable() {
            return Err(NativeError::Thrown(make_error(
                "TypeError",
                &format!("{:?} is not a function", &**name),
            )));
        }
        Ok(method)
    }

    // Inline-cache plumbing -------------------------------------------------

    fn ic_lookup(&mut self, func: usize, ic: u16, shape: usize) -> Option<CachedProp> {
        self.ic_tables
            .get_mut(func)
            .and_then(|table| table.get_mut(ic as usize))
            .and_then(|site| site.lookup(shape))
    }

    fn ic_miss(&mut self, func: usize, ic: u16) {
        if let Some(site) = self
            .ic_tables
            .get_mut(func)
            .and_then(|table| table.get_mut(ic as usize))
        {
            site.miss();
        }
    }

    fn ic_install(&mut self, func: usize, ic: u16, shape: usize, prop: CachedProp) {
        if let Some(site) = self
            .ic_tables
            .get_mut(func)
            .and_then(|table| table.get_mut(ic as usize))
        {
            log::trace!("ic install fn#{} slot {} shape {}", func, ic, shape);
            site.install(shape, prop);
        }
    }

    /// Aggregated cache counters across every registered chunk.
    pub fn cache_stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for table in &self.ic_tables {
            for site in table {
                if site.touched() {
                    stats.sites += 1;
                }
                stats.hits += site.hits;
                stats.misses += site.misses;
                stats.transitions += site.transitions;
            }
        }
        stats
    }

    /// Human-readable per-site report for the `--cache-stats` surface.
    pub fn cache_stats_report(&self) -> String {
        let mut out = String::new();
        for (func, table) in self.ic_tables.iter().enumerate() {
            let name = self.functions[func]
                .name
                .clone()
                .unwrap_or_else(|| format!("fn#{}", func));
            for (slot, site) in table.iter().enumerate() {
                if site.touched() {
                    let _ = writeln!(
                        out,
                        "{} ic{}: {} hits, {} misses, {} transitions",
                        name, slot, site.hits, site.misses, site.transitions
                    );
                }
            }
        }
        let stats = self.cache_stats();
        let _ = writeln!(
            out,
            "total: {} sites, {} hits, {} misses, {} transitions",
            stats.sites, stats.hits, stats.misses, stats.transitions
        );
        out
    }
}

impl HostContext for Vm {
    fn strings(&mut self) -> &mut StringTable {
        &mut self.strings
    }

    fn shapes(&mut self) -> &mut ShapeTable {
        &mut self.shapes
    }

    fn enqueue_microtask(&mut self, callable: Value, args: Vec<Value>) {
        self.microtasks.push_back(Microtask::Call {
            callable,
            args,
            chained: None,
        });
    }

    fn call_value(
        &mut self,
        callee: Value,
        this: Value,
        args: &[Value],
    ) -> Result<Value, NativeError> {
        self.call_value_inner(callee, this, args)
    }

    fn global_by_name(&self, name: &str) -> Option<Value> {
        if let Some(&slot) = self.global_names.get(name) {
            return Some(self.get_global(slot));
        }
        self.global_extras.get(name).cloned()
    }

    fn set_global_by_name(&mut self, name: &str, value: Value) -> bool {
        if let Some(&slot) = self.global_names.get(name) {
            self.set_global(slot, value);
            return true;
        }
        false
    }

    fn resolve_promise(&mut self, promise: &Value, value: Value) {
        if let Value::Promise(p) = promise {
            self.settle(p.clone(), Ok(value));
        }
    }

    fn reject_promise(&mut self, promise: &Value, reason: Value) {
        if let Value::Promise(p) = promise {
            self.settle(p.clone(), Err(reason));
        }
    }

    fn promise_then(&mut self, promise: &Value, on_fulfilled: Value, on_rejected: Value) -> Value {
        let chained = Rc::new(RefCell::new(PromiseObj::new()));
        if let Value::Promise(p) = promise {
            let state = p.borrow().state;
            match state {
                PromiseState::Pending => {
                    p.borrow_mut().reactions.push(Reaction::Callbacks {
                        on_fulfilled,
                        on_rejected,
                        chained: chained.clone(),
                    });
                }
                PromiseState::Fulfilled => {
                    let value = p.borrow().value.clone();
                    self.schedule_reactions(
                        Ok(value),
                        vec![Reaction::Callbacks {
                            on_fulfilled,
                            on_rejected,
                            chained: chained.clone(),
                        }],
                    );
                }
                PromiseState::Rejected => {
                    let reason = p.borrow().value.clone();
                    self.schedule_reactions(
                        Err(reason),
                        vec![Reaction::Callbacks {
                            on_fulfilled,
                            on_rejected,
                            chained: chained.clone(),
                        }],
                    );
                }
            }
        }
        Value::Promise(chained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode::Opcode;

    fn chunk_returning_const(constant: Constant) -> Arc<Chunk> {
        let mut chunk = Chunk::new();
        chunk.register_count = 1;
        let k = chunk.add_constant(constant);
        chunk.emit(Opcode::LoadConst { dst: 0, idx: k }, 1);
        chunk.emit(Opcode::Return { src: 0 }, 1);
        Arc::new(chunk)
    }

    #[test]
    fn test_execute_constant() {
        let mut vm = Vm::new();
        let result = vm.execute(&chunk_returning_const(Constant::Int(42))).unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn test_arithmetic_chunk() {
        let mut vm = Vm::new();
        let mut chunk = Chunk::new();
        chunk.register_count = 3;
        let one = chunk.add_constant(Constant::Int(1));
        let two = chunk.add_constant(Constant::Int(2));
        chunk.emit(Opcode::LoadConst { dst: 0, idx: one }, 1);
        chunk.emit(Opcode::LoadConst { dst: 1, idx: two }, 1);
        chunk.emit(
            Opcode::Add {
                dst: 2,
                lhs: 0,
                rhs: 1,
            },
            1,
        );
        chunk.emit(Opcode::Return { src: 2 }, 1);
        assert_eq!(vm.execute(&Arc::new(chunk)).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_globals_by_slot() {
        let mut vm = Vm::new();
        vm.set_global(3, Value::Int(7));
        assert_eq!(vm.get_global(3), Value::Int(7));
        assert_eq!(vm.get_global(10), Value::Undefined);
    }

    #[test]
    fn test_top_level_throw_returns_error_and_resets() {
        let mut vm = Vm::new();
        let mut chunk = Chunk::new();
        chunk.register_count = 1;
        let k = chunk.add_constant(Constant::String("boom".into()));
        chunk.emit(Opcode::LoadConst { dst: 0, idx: k }, 1);
        chunk.emit(Opcode::Throw { src: 0 }, 1);
        let err = vm.execute(&Arc::new(chunk)).unwrap_err();
        let VmError::Runtime(err) = err else {
            panic!("expected runtime error");
        };
        assert_eq!(err.value, Value::String(Rc::from("boom")));

        // VM state survives: another chunk executes normally.
        let ok = vm.execute(&chunk_returning_const(Constant::Int(1))).unwrap();
        assert_eq!(ok, Value::Int(1));
    }

    #[test]
    fn test_microtask_fifo_including_nested() {
        let mut vm = Vm::new();
        // A promise with a pass-through reaction enqueued during drain still
        // runs in the same pass.
        let p = Rc::new(RefCell::new(PromiseObj::new()));
        let chained = vm.promise_then(
            &Value::Promise(p.clone()),
            Value::Undefined,
            Value::Undefined,
        );
        vm.settle(p, Ok(Value::Int(5)));
        vm.drain_microtasks().unwrap();
        let Value::Promise(chained) = chained else {
            panic!()
        };
        assert_eq!(chained.borrow().state, PromiseState::Fulfilled);
        assert_eq!(chained.borrow().value, Value::Int(5));
        assert!(vm.microtasks_empty());
    }
}
