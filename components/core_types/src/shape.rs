//! Hidden classes (shapes) for object property layout.
//!
//! A shape records the ordered set of own property keys of an object. Objects
//! with the same keys in the same insertion order share a shape, which is what
//! makes inline caches effective: a cache entry keyed by `ShapeId` is valid
//! for every object of that shape.
//!
//! Shapes are interned in the session `ShapeTable`; add/remove transitions are
//! cached per `(shape, key)` so repeated construction of similarly-shaped
//! objects walks the same transition chain.

use crate::interner::JsStr;
use std::collections::HashMap;
use std::rc::Rc;

/// Dense identifier of a shape within a session.
pub type ShapeId = usize;

/// The layout identity of a plain object: its own keys in insertion order.
#[derive(Debug)]
pub struct Shape {
    /// Session-unique identifier, used as the inline-cache key.
    pub id: ShapeId,
    /// Own property keys in insertion order.
    pub keys: Vec<JsStr>,
    /// Key → slot offset, derived from `keys`.
    offsets: HashMap<JsStr, u32>,
}

impl Shape {
    fn new(id: ShapeId, keys: Vec<JsStr>) -> Self {
        let offsets = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i as u32))
            .collect();
        Self { id, keys, offsets }
    }

    /// Slot offset of `key`, if this shape has it.
    pub fn offset_of(&self, key: &str) -> Option<u32> {
        self.offsets.get(key).copied()
    }

    /// Number of own keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true for the root (empty) shape.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Interner and transition cache for shapes.
///
/// The table owns every shape created during a session. `transition_add` and
/// `transition_remove` are the only ways to derive new shapes, so any two
/// objects that end up with the same key ordering share one `ShapeId`.
#[derive(Debug)]
pub struct ShapeTable {
    shapes: Vec<Rc<Shape>>,
    by_keys: HashMap<Vec<JsStr>, Rc<Shape>>,
    add_transitions: HashMap<(ShapeId, JsStr), Rc<Shape>>,
    remove_transitions: HashMap<(ShapeId, JsStr), Rc<Shape>>,
}

impl ShapeTable {
    /// Creates a table containing only the root (empty) shape.
    pub fn new() -> Self {
        let root = Rc::new(Shape::new(0, Vec::new()));
        let mut by_keys = HashMap::new();
        by_keys.insert(Vec::new(), root.clone());
        Self {
            shapes: vec![root],
            by_keys,
            add_transitions: HashMap::new(),
            remove_transitions: HashMap::new(),
        }
    }

    /// The empty shape every new object starts with.
    pub fn root(&self) -> Rc<Shape> {
        self.shapes[0].clone()
    }

    /// Looks up a shape by id.
    pub fn get(&self, id: ShapeId) -> Option<Rc<Shape>> {
        self.shapes.get(id).cloned()
    }

    /// Number of distinct shapes observed so far.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Returns false; the root shape always exists.
    pub fn is_empty(&self) -> bool {
        false
    }

    fn intern(&mut self, keys: Vec<JsStr>) -> Rc<Shape> {
        if let Some(existing) = self.by_keys.get(&keys) {
            return existing.clone();
        }
        let shape = Rc::new(Shape::new(self.shapes.len(), keys.clone()));
        self.shapes.push(shape.clone());
        self.by_keys.insert(keys, shape.clone());
        shape
    }

    /// Shape reached by appending `key` to `from`'s key list.
    ///
    /// Cached per `(shape, key)`, so the common "build the same object layout
    /// in a loop" pattern hits the cache after the first iteration.
    pub fn transition_add(&mut self, from: &Rc<Shape>, key: JsStr) -> Rc<Shape> {
        let cache_key = (from.id, key.clone());
        if let Some(cached) = self.add_transitions.get(&cache_key) {
            return cached.clone();
        }
        let mut keys = from.keys.clone();
        keys.push(key);
        let next = self.intern(keys);
        self.add_transitions.insert(cache_key, next.clone());
        next
    }

    /// Shape reached by deleting `key` from `from`'s key list.
    ///
    /// Returns `from` unchanged when the key is absent.
    pub fn transition_remove(&mut self, from: &Rc<Shape>, key: &JsStr) -> Rc<Shape> {
        if from.offset_of(key).is_none() {
            return from.clone();
        }
        let cache_key = (from.id, key.clone());
        if let Some(cached) = self.remove_transitions.get(&cache_key) {
            return cached.clone();
        }
        let keys: Vec<JsStr> = from.keys.iter().filter(|k| *k != key).cloned().collect();
        let next = self.intern(keys);
        self.remove_transitions.insert(cache_key, next.clone());
        next
    }
}

impl Default for ShapeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn key(s: &str) -> JsStr {
        Rc::from(s)
    }

    #[test]
    fn test_root_shape_is_empty() {
        let table = ShapeTable::new();
        let root = table.root();
        assert_eq!(root.id, 0);
        assert!(root.is_empty());
    }

    #[test]
    fn test_add_transition_changes_id() {
        let mut table = ShapeTable::new();
        let root = table.root();
        let with_x = table.transition_add(&root, key("x"));
        assert_ne!(with_x.id, root.id);
        assert_eq!(with_x.offset_of("x"), Some(0));
    }

    #[test]
    fn test_same_key_order_shares_shape() {
        let mut table = ShapeTable::new();
        let root = table.root();
        let a1 = table.transition_add(&root, key("a"));
        let ab1 = table.transition_add(&a1, key("b"));
        let a2 = table.transition_add(&root, key("a"));
        let ab2 = table.transition_add(&a2, key("b"));
        assert_eq!(ab1.id, ab2.id);
    }

    #[test]
    fn test_different_key_order_distinct_shapes() {
        let mut table = ShapeTable::new();
        let root = table.root();
        let a = table.transition_add(&root, key("a"));
        let ab = table.transition_add(&a, key("b"));
        let b = table.transition_add(&root, key("b"));
        let ba = table.transition_add(&b, key("a"));
        assert_ne!(ab.id, ba.id);
    }

    #[test]
    fn test_remove_transition() {
        let mut table = ShapeTable::new();
        let root = table.root();
        let a = table.transition_add(&root, key("a"));
        let ab = table.transition_add(&a, key("b"));
        let removed = table.transition_remove(&ab, &key("a"));
        assert_ne!(removed.id, ab.id);
        assert_eq!(removed.offset_of("b"), Some(0));
        assert_eq!(removed.offset_of("a"), None);
    }

    #[test]
    fn test_remove_then_readd_reaches_interned_shape() {
        let mut table = ShapeTable::new();
        let root = table.root();
        let a = table.transition_add(&root, key("a"));
        let removed = table.transition_remove(&a, &key("a"));
        assert_eq!(removed.id, root.id);
    }
}
