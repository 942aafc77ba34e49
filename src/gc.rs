// File: src/gc.rs
//
// Precise mark-and-sweep garbage collection. The VM owns a Gc and drives
// collection before allocations once the byte threshold is crossed; marking
// walks a gray worklist, interned strings are weak, and the threshold grows
// geometrically after each cycle.
//
// Debug switches, environment-variable driven:
//   DICTU_STRESS_GC  collect before every allocation
//   DICTU_LOG_GC     trace collections on stderr

use crate::object::{Heap, ObjKind, ObjRef, ObjString};
use crate::table::Table;
use crate::value::Value;

const FIRST_GC_THRESHOLD: usize = 1024 * 1024;
const HEAP_GROW_FACTOR: usize = 2;

pub struct Gc {
    pub heap: Heap,
    /// Intern pool. Held weakly: unmarked entries are dropped each cycle.
    pub strings: Table,
    bytes_allocated: usize,
    next_gc: usize,
    gray: Vec<ObjRef>,
    /// Objects kept alive while they are only reachable from native Rust
    /// state: the compiler chain's in-progress functions and values that
    /// exist between allocation and first attachment.
    protected: Vec<Value>,
    stress: bool,
    log: bool,
}

impl Gc {
    pub fn new() -> Self {
        Gc {
            heap: Heap::new(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_THRESHOLD,
            gray: Vec::new(),
            protected: Vec::new(),
            stress: std::env::var("DICTU_STRESS_GC").is_ok(),
            log: std::env::var("DICTU_LOG_GC").is_ok(),
        }
    }

    /// Forces a collection before every allocation. Exposed for embedders
    /// and the GC equivalence tests.
    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress;
    }

    /// True when the next allocation should be preceded by a collection.
    pub fn wants_collection(&self) -> bool {
        self.stress || self.bytes_allocated >= self.next_gc
    }

    pub fn allocate(&mut self, kind: ObjKind) -> ObjRef {
        let r = self.heap.alloc(kind);
        self.bytes_allocated += self.heap.size_of(r);
        r
    }

    /// Interns `chars`, returning the canonical string object. Exactly one
    /// string object exists per byte content.
    pub fn intern(&mut self, chars: &str) -> ObjRef {
        let hash = crate::object::hash_string(chars);
        if let Some(existing) = self.strings.find_string(&self.heap, chars, hash) {
            return existing;
        }
        let r = self.allocate(ObjKind::String(ObjString { chars: chars.to_string(), hash }));
        self.strings.set(r, hash, Value::Nil);
        r
    }

    pub fn protect(&mut self, value: Value) {
        self.protected.push(value);
    }

    pub fn unprotect(&mut self, n: usize) {
        let len = self.protected.len();
        self.protected.truncate(len - n);
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(r);
        }
    }

    pub fn mark_object(&mut self, r: ObjRef) {
        let obj = self.heap.get_mut(r);
        if obj.marked {
            return;
        }
        obj.marked = true;
        self.gray.push(r);
    }

    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.entries() {
            self.mark_object(key);
            self.mark_value(value);
        }
    }

    /// Runs after the caller has marked its roots: marks the protected
    /// stack, traces the gray worklist, clears dead intern entries, sweeps,
    /// and resets the threshold.
    pub fn finish_collection(&mut self) {
        let before = self.bytes_allocated;

        for i in 0..self.protected.len() {
            let value = self.protected[i];
            self.mark_value(value);
        }

        while let Some(r) = self.gray.pop() {
            let children = self.heap.children_of(r);
            for child in children {
                self.mark_value(child);
            }
        }

        self.strings.remove_unmarked(&self.heap);
        let freed = self.heap.sweep_slots();
        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed);
        self.next_gc = (self.bytes_allocated * HEAP_GROW_FACTOR).max(FIRST_GC_THRESHOLD / 4);

        if self.log {
            eprintln!(
                "-- gc: {} -> {} bytes ({} freed), next at {}",
                before, self.bytes_allocated, freed, self.next_gc
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_canonical() {
        let mut gc = Gc::new();
        let a = gc.intern("hello");
        let b = gc.intern("hello");
        let c = gc.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn unreachable_strings_are_swept_and_unintern() {
        let mut gc = Gc::new();
        let kept = gc.intern("kept");
        let _dropped = gc.intern("dropped");

        gc.mark_object(kept);
        gc.finish_collection();

        // "kept" survived and is still the canonical object.
        assert_eq!(gc.intern("kept"), kept);
        assert_eq!(gc.heap.live_objects(), 1);
        // "dropped" was collected; a fresh intern re-creates it.
        let again = gc.intern("dropped");
        assert_eq!(gc.heap.live_objects(), 2);
        assert_eq!(gc.heap.string(again).chars, "dropped");
    }

    #[test]
    fn protected_values_survive() {
        let mut gc = Gc::new();
        let s = gc.intern("pinned");
        gc.protect(Value::Obj(s));
        gc.finish_collection();
        assert_eq!(gc.intern("pinned"), s);
        gc.unprotect(1);
        gc.finish_collection();
        assert_eq!(gc.heap.live_objects(), 0);
    }

    #[test]
    fn tracing_reaches_nested_objects() {
        let mut gc = Gc::new();
        let name = gc.intern("inner");
        let list = gc.allocate(ObjKind::List(vec![Value::Obj(name), Value::Number(1.0)]));
        gc.mark_object(list);
        gc.finish_collection();
        assert_eq!(gc.heap.live_objects(), 2);
        assert_eq!(gc.heap.string(name).chars, "inner");
    }
}
