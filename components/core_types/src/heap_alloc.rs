//! Global slot registry shared by every compiler in a session.
//!
//! Every global or module-scope name compiles to an index into the VM's
//! global heap. The allocator guarantees the mapping is injective and stable:
//! the first compiler to mention a name fixes its slot, and every later
//! compiler (top-level or per-module) resolves the same name to the same
//! slot. Built-in initializers run first so the standard globals occupy a
//! stable prefix.

use std::collections::HashMap;

/// Dense `name → slot` registry for the session's global heap.
#[derive(Debug, Default)]
pub struct HeapAllocator {
    slots: HashMap<String, u16>,
    names: Vec<String>,
}

impl HeapAllocator {
    /// Creates an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for `name`, assigning the next free slot on first use.
    pub fn get_or_assign(&mut self, name: &str) -> u16 {
        if let Some(&slot) = self.slots.get(name) {
            return slot;
        }
        let slot = self.names.len() as u16;
        self.slots.insert(name.to_string(), slot);
        self.names.push(name.to_string());
        slot
    }

    /// Returns the slot for `name` without assigning.
    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.slots.get(name).copied()
    }

    /// Reverse lookup: the name occupying `slot`.
    pub fn name_of(&self, slot: u16) -> Option<&str> {
        self.names.get(slot as usize).map(|s| s.as_str())
    }

    /// Number of assigned slots.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True before any name has been registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Snapshot of `name → slot`, in slot order. Used to publish the map to
    /// the VM so `globalThis['name']` resolves.
    pub fn names(&self) -> Vec<(String, u16)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i as u16))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_dense_and_stable() {
        let mut heap = HeapAllocator::new();
        assert_eq!(heap.get_or_assign("Array"), 0);
        assert_eq!(heap.get_or_assign("Object"), 1);
        assert_eq!(heap.get_or_assign("Array"), 0);
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn test_injective() {
        let mut heap = HeapAllocator::new();
        let a = heap.get_or_assign("a");
        let b = heap.get_or_assign("b");
        assert_ne!(a, b);
        assert_eq!(heap.name_of(a), Some("a"));
        assert_eq!(heap.name_of(b), Some("b"));
    }

    #[test]
    fn test_lookup_does_not_assign() {
        let mut heap = HeapAllocator::new();
        assert_eq!(heap.lookup("missing"), None);
        assert!(heap.is_empty());
        heap.get_or_assign("x");
        assert_eq!(heap.lookup("x"), Some(0));
    }

    #[test]
    fn test_names_snapshot_in_slot_order() {
        let mut heap = HeapAllocator::new();
        heap.get_or_assign("one");
        heap.get_or_assign("two");
        let names = heap.names();
        assert_eq!(names, vec![("one".to_string(), 0), ("two".to_string(), 1)]);
    }
}
