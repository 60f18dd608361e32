//! Heap object payloads: plain objects, dictionary objects, arrays, and
//! typed arrays over shared buffers.

use crate::interner::JsStr;
use crate::shape::{Shape, ShapeTable};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Result of resolving an own property on a plain object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropSlot {
    /// Plain data slot at the given offset.
    Data(u32),
    /// Accessor slot at the given offset; the slot holds a `Value::Accessor`.
    Accessor(u32),
}

/// An ordinary JavaScript object with shape-based property storage.
///
/// Property insertion order is observable and encoded in the shape. Adding or
/// deleting a key transitions the object to a different shape; overwriting an
/// existing key's value does not.
#[derive(Debug)]
pub struct PlainObject {
    /// The hidden class describing this object's key layout.
    pub shape: Rc<Shape>,
    /// Property values, indexed by shape offset.
    pub slots: Vec<Value>,
    /// Prototype object, or `Value::Null` / `Value::Undefined` for none.
    pub proto: Value,
}

impl PlainObject {
    /// Creates an empty object with the table's root shape and no prototype.
    pub fn new(shapes: &ShapeTable) -> Self {
        Self {
            shape: shapes.root(),
            slots: Vec::new(),
            proto: Value::Undefined,
        }
    }

    /// Resolves an own property to its slot kind and offset.
    pub fn resolve_own(&self, key: &str) -> Option<PropSlot> {
        let offset = self.shape.offset_of(key)?;
        match self.slots.get(offset as usize) {
            Some(Value::Accessor(_)) => Some(PropSlot::Accessor(offset)),
            Some(_) => Some(PropSlot::Data(offset)),
            None => None,
        }
    }

    /// Reads an own property value (accessor slots return the accessor pair).
    pub fn get_own(&self, key: &str) -> Option<Value> {
        let offset = self.shape.offset_of(key)?;
        self.slots.get(offset as usize).cloned()
    }

    /// Reads the slot at a known offset. Callers must have validated the
    /// offset against this object's shape (the inline-cache fast path).
    pub fn slot(&self, offset: u32) -> Value {
        self.slots
            .get(offset as usize)
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    /// Writes the slot at a known offset without changing shape.
    pub fn set_slot(&mut self, offset: u32, value: Value) {
        let offset = offset as usize;
        if self.slots.len() <= offset {
            self.slots.resize(offset + 1, Value::Undefined);
        }
        self.slots[offset] = value;
    }

    /// Sets `key` to `value`, transitioning to a new shape if the key is new.
    ///
    /// Returns the slot offset the value landed in.
    pub fn set(&mut self, shapes: &mut ShapeTable, key: JsStr, value: Value) -> u32 {
        if let Some(offset) = self.shape.offset_of(&key) {
            self.set_slot(offset, value);
            return offset;
        }
        let next = shapes.transition_add(&self.shape, key);
        let offset = (next.len() - 1) as u32;
        self.shape = next;
        self.set_slot(offset, value);
        offset
    }

    /// Deletes `key`, transitioning to the shape without it.
    ///
    /// Returns true when the key existed. Slot storage is compacted to match
    /// the new shape so offsets stay dense.
    pub fn delete(&mut self, shapes: &mut ShapeTable, key: &JsStr) -> bool {
        let Some(offset) = self.shape.offset_of(key) else {
            return false;
        };
        self.shape = shapes.transition_remove(&self.shape, key);
        if (offset as usize) < self.slots.len() {
            self.slots.remove(offset as usize);
        }
        true
    }

    /// Own keys in insertion order.
    pub fn keys(&self) -> &[JsStr] {
        &self.shape.keys
    }
}

/// A string-keyed, insertion-ordered object without a shape.
///
/// Used for objects that have left the shape system (heavy deletion churn).
/// Dictionary objects never hit the inline caches.
#[derive(Debug, Default)]
pub struct DictObject {
    entries: Vec<(JsStr, Value)>,
    index: HashMap<JsStr, usize>,
    /// Prototype object, or `Value::Undefined` for none.
    pub proto: Value,
}

impl DictObject {
    /// Creates an empty dictionary object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dictionary object from a plain object's current properties.
    pub fn from_plain(obj: &PlainObject) -> Self {
        let mut dict = Self::new();
        dict.proto = obj.proto.clone();
        for key in obj.keys().iter().cloned().collect::<Vec<_>>() {
            if let Some(value) = obj.get_own(&key) {
                dict.set(key, value);
            }
        }
        dict
    }

    /// Reads a property.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.index.get(key).map(|&i| self.entries[i].1.clone())
    }

    /// Sets a property, preserving insertion order for existing keys.
    pub fn set(&mut self, key: JsStr, value: Value) {
        if let Some(&i) = self.index.get(&key) {
            self.entries[i].1 = value;
            return;
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
    }

    /// Deletes a property; returns true when it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        let Some(&i) = self.index.get(key) else {
            return false;
        };
        self.index.remove(key);
        self.entries.remove(i);
        for (_, slot) in self.index.iter_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        true
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<JsStr> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the object has no properties.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A JavaScript array: dense element storage.
#[derive(Debug, Default)]
pub struct JsArray {
    /// The elements, index 0 first. Holes are `Value::Undefined`.
    pub elements: Vec<Value>,
}

impl JsArray {
    /// Creates an empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an array from existing elements.
    pub fn from_elements(elements: Vec<Value>) -> Self {
        Self { elements }
    }

    /// Reads the element at `index`, `Undefined` when out of bounds.
    pub fn get(&self, index: usize) -> Value {
        self.elements.get(index).cloned().unwrap_or(Value::Undefined)
    }

    /// Writes the element at `index`, growing with `Undefined` holes.
    pub fn set(&mut self, index: usize, value: Value) {
        if self.elements.len() <= index {
            self.elements.resize(index + 1, Value::Undefined);
        }
        self.elements[index] = value;
    }

    /// Current length.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true for a zero-length array.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Raw backing storage shared by typed-array views.
#[derive(Debug, Default)]
pub struct ArrayBufferObj {
    /// The raw bytes.
    pub bytes: Vec<u8>,
}

impl ArrayBufferObj {
    /// Creates a zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    /// Buffer length in bytes.
    pub fn byte_length(&self) -> usize {
        self.bytes.len()
    }
}

/// Element type of a typed-array view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedArrayKind {
    /// Signed 8-bit integers.
    Int8,
    /// Unsigned 8-bit integers.
    Uint8,
    /// Signed 32-bit integers.
    Int32,
    /// IEEE 754 doubles.
    Float64,
}

impl TypedArrayKind {
    /// Element width in bytes.
    pub fn element_size(&self) -> usize {
        match self {
            TypedArrayKind::Int8 | TypedArrayKind::Uint8 => 1,
            TypedArrayKind::Int32 => 4,
            TypedArrayKind::Float64 => 8,
        }
    }

    /// The constructor name, as JavaScript spells it.
    pub fn name(&self) -> &'static str {
        match self {
            TypedArrayKind::Int8 => "Int8Array",
            TypedArrayKind::Uint8 => "Uint8Array",
            TypedArrayKind::Int32 => "Int32Array",
            TypedArrayKind::Float64 => "Float64Array",
        }
    }
}

/// A typed view over a shared array buffer.
#[derive(Debug)]
pub struct TypedArrayObj {
    /// The shared backing buffer.
    pub buffer: Rc<RefCell<ArrayBufferObj>>,
    /// Element type.
    pub kind: TypedArrayKind,
    /// Byte offset of the view within the buffer.
    pub byte_offset: usize,
    /// Number of elements in the view.
    pub length: usize,
}

impl TypedArrayObj {
    /// Creates a view covering a fresh buffer of `length` elements.
    pub fn new(kind: TypedArrayKind, length: usize) -> Self {
        let buffer = Rc::new(RefCell::new(ArrayBufferObj::new(
            length * kind.element_size(),
        )));
        Self {
            buffer,
            kind,
            byte_offset: 0,
            length,
        }
    }

    /// Creates a view over an existing buffer. The view must fit.
    pub fn over(
        buffer: Rc<RefCell<ArrayBufferObj>>,
        kind: TypedArrayKind,
        byte_offset: usize,
        length: usize,
    ) -> Option<Self> {
        let needed = byte_offset + length * kind.element_size();
        if needed > buffer.borrow().byte_length() {
            return None;
        }
        Some(Self {
            buffer,
            kind,
            byte_offset,
            length,
        })
    }

    /// Reads element `index` as a number value, `Undefined` out of bounds.
    pub fn get(&self, index: usize) -> Value {
        if index >= self.length {
            return Value::Undefined;
        }
        let buf = self.buffer.borrow();
        let at = self.byte_offset + index * self.kind.element_size();
        match self.kind {
            TypedArrayKind::Int8 => Value::Int(buf.bytes[at] as i8 as i32),
            TypedArrayKind::Uint8 => Value::Int(buf.bytes[at] as i32),
            TypedArrayKind::Int32 => {
                let raw: [u8; 4] = buf.bytes[at..at + 4].try_into().unwrap_or([0; 4]);
                Value::Int(i32::from_le_bytes(raw))
            }
            TypedArrayKind::Float64 => {
                let raw: [u8; 8] = buf.bytes[at..at + 8].try_into().unwrap_or([0; 8]);
                Value::Number(f64::from_le_bytes(raw))
            }
        }
    }

    /// Writes element `index`, coercing through the element type. Writes out
    /// of bounds are ignored, matching typed-array semantics.
    pub fn set(&self, index: usize, value: f64) {
        if index >= self.length {
            return;
        }
        let mut buf = self.buffer.borrow_mut();
        let at = self.byte_offset + index * self.kind.element_size();
        match self.kind {
            TypedArrayKind::Int8 => buf.bytes[at] = (value as i64 & 0xff) as u8,
            TypedArrayKind::Uint8 => buf.bytes[at] = (value as i64 & 0xff) as u8,
            TypedArrayKind::Int32 => {
                let raw = (value as i64 as i32).to_le_bytes();
                buf.bytes[at..at + 4].copy_from_slice(&raw);
            }
            TypedArrayKind::Float64 => {
                let raw = value.to_le_bytes();
                buf.bytes[at..at + 8].copy_from_slice(&raw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> JsStr {
        Rc::from(s)
    }

    #[test]
    fn test_plain_object_insertion_order() {
        let mut shapes = ShapeTable::new();
        let mut obj = PlainObject::new(&shapes);
        obj.set(&mut shapes, key("b"), Value::Int(1));
        obj.set(&mut shapes, key("a"), Value::Int(2));
        obj.set(&mut shapes, key("c"), Value::Int(3));
        let keys: Vec<&str> = obj.keys().iter().map(|k| &**k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_plain_object_value_write_keeps_shape() {
        let mut shapes = ShapeTable::new();
        let mut obj = PlainObject::new(&shapes);
        obj.set(&mut shapes, key("x"), Value::Int(1));
        let shape_before = obj.shape.id;
        obj.set(&mut shapes, key("x"), Value::Int(2));
        assert_eq!(obj.shape.id, shape_before);
        assert_eq!(obj.get_own("x"), Some(Value::Int(2)));
    }

    #[test]
    fn test_plain_object_delete_changes_shape() {
        let mut shapes = ShapeTable::new();
        let mut obj = PlainObject::new(&shapes);
        obj.set(&mut shapes, key("x"), Value::Int(1));
        obj.set(&mut shapes, key("y"), Value::Int(2));
        let shape_before = obj.shape.id;
        assert!(obj.delete(&mut shapes, &key("x")));
        assert_ne!(obj.shape.id, shape_before);
        assert_eq!(obj.get_own("x"), None);
        assert_eq!(obj.get_own("y"), Some(Value::Int(2)));
    }

    #[test]
    fn test_dict_object_order_and_delete() {
        let mut dict = DictObject::new();
        dict.set(key("one"), Value::Int(1));
        dict.set(key("two"), Value::Int(2));
        dict.set(key("three"), Value::Int(3));
        assert!(dict.delete("two"));
        let keys: Vec<String> = dict.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["one", "three"]);
        assert_eq!(dict.get("three"), Some(Value::Int(3)));
    }

    #[test]
    fn test_array_growth() {
        let mut arr = JsArray::new();
        arr.set(2, Value::Int(7));
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.get(0), Value::Undefined);
        assert_eq!(arr.get(2), Value::Int(7));
        assert_eq!(arr.get(10), Value::Undefined);
    }

    #[test]
    fn test_typed_array_roundtrip() {
        let ta = TypedArrayObj::new(TypedArrayKind::Int32, 4);
        ta.set(1, -5.0);
        assert_eq!(ta.get(1), Value::Int(-5));
        assert_eq!(ta.get(9), Value::Undefined);
    }

    #[test]
    fn test_typed_array_shared_buffer() {
        let ta = TypedArrayObj::new(TypedArrayKind::Uint8, 8);
        let view = TypedArrayObj::over(ta.buffer.clone(), TypedArrayKind::Uint8, 4, 4)
            .expect("view fits");
        ta.set(4, 42.0);
        assert_eq!(view.get(0), Value::Int(42));
    }

    #[test]
    fn test_typed_array_view_overflow_rejected() {
        let buffer = Rc::new(RefCell::new(ArrayBufferObj::new(4)));
        assert!(TypedArrayObj::over(buffer, TypedArrayKind::Float64, 0, 1).is_none());
    }
}
