// File: src/table.rs
//
// Open-addressing hash tables. `Table` is keyed by interned strings and
// backs globals, fields, methods and the intern pool itself; `ValueDict` is
// keyed by values and backs user dictionaries. Both use linear probing with
// a 0.75 load factor and tombstone deletion so probe chains survive.
//
// Entries carry their key's hash so tables stored inside heap objects can
// be probed and grown without consulting the heap; callers supply the hash
// of the key they are looking up.

use crate::object::{Heap, ObjRef};
use crate::value::Value;

const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;
const MIN_CAPACITY: usize = 8;

#[derive(Clone, Copy)]
struct Entry {
    key: Option<ObjRef>,
    hash: u32,
    value: Value,
}

impl Entry {
    // Empty slots are (None, nil); tombstones are (None, true).
    const EMPTY: Entry = Entry { key: None, hash: 0, value: Value::Nil };
    const TOMBSTONE: Entry = Entry { key: None, hash: 0, value: Value::Bool(true) };

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && self.value == Value::Bool(true)
    }
}

/// String-keyed table. Keys are interned, so lookup compares handles.
#[derive(Clone)]
pub struct Table {
    /// Live entries plus tombstones; drives the load-factor check.
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Self {
        Table { count: 0, entries: Vec::new() }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_entry(entries: &[Entry], key: ObjRef, hash: u32) -> usize {
        let mask = entries.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                None => {
                    if entry.is_tombstone() {
                        // Probe chains pass through tombstones; remember the
                        // first so inserts can reuse it.
                        tombstone.get_or_insert(index);
                    } else {
                        return tombstone.unwrap_or(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        self.entries[index].key.map(|_| self.entries[index].value)
    }

    /// Inserts or updates. Returns true when the key was not present.
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) * MAX_LOAD_DEN > self.entries.len() * MAX_LOAD_NUM {
            self.grow();
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }
        *entry = Entry { key: Some(key), hash, value };
        is_new
    }

    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index] = Entry::TOMBSTONE;
        true
    }

    /// Copies every entry into `target`. Used for inheritance and traits.
    pub fn add_all_into(&self, target: &mut Table) {
        for entry in &self.entries {
            if let Some(key) = entry.key {
                target.set(key, entry.hash, entry.value);
            }
        }
    }

    /// Walks the probe chain comparing by length, hash and bytes. This is
    /// the one lookup that runs before a string has been interned.
    pub fn find_string(&self, heap: &Heap, chars: &str, hash: u32) -> Option<ObjRef> {
        if self.count == 0 {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if !entry.is_tombstone() {
                        return None;
                    }
                }
                Some(key) => {
                    let s = heap.string(key);
                    if s.chars.len() == chars.len() && s.hash == hash && s.chars == chars {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Drops entries whose key string was not marked this cycle. Run between
    /// mark and sweep, this is what makes the intern pool weak.
    pub fn remove_unmarked(&mut self, heap: &Heap) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !heap.get(key).marked {
                    *entry = Entry::TOMBSTONE;
                }
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries.iter().filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    fn grow(&mut self) {
        let capacity = (self.entries.len() * 2).max(MIN_CAPACITY);
        let old = std::mem::replace(&mut self.entries, vec![Entry::EMPTY; capacity]);
        // Rehash live entries only; tombstones are dropped here.
        self.count = 0;
        for entry in old {
            if let Some(key) = entry.key {
                let index = Self::find_entry(&self.entries, key, entry.hash);
                self.entries[index] = entry;
                self.count += 1;
            }
        }
    }
}

#[derive(Clone, Copy)]
struct DictEntry {
    key: Value,
    hash: u32,
    value: Value,
}

impl DictEntry {
    // Value::Empty is unrepresentable as a user key, so it doubles as the
    // vacant marker, with the same nil/true split as Table.
    const EMPTY: DictEntry = DictEntry { key: Value::Empty, hash: 0, value: Value::Nil };
    const TOMBSTONE: DictEntry =
        DictEntry { key: Value::Empty, hash: 0, value: Value::Bool(true) };

    fn is_vacant(&self) -> bool {
        self.key == Value::Empty
    }

    fn is_tombstone(&self) -> bool {
        self.is_vacant() && self.value == Value::Bool(true)
    }
}

/// Value-keyed open-addressed table for user dictionaries. Keys may be
/// strings, numbers, booleans or nil; key equality follows value equality.
pub struct ValueDict {
    count: usize,
    live: usize,
    entries: Vec<DictEntry>,
}

/// Only immutable value kinds can key a dictionary.
pub fn is_valid_key(heap: &Heap, value: Value) -> bool {
    match value {
        Value::Nil | Value::Bool(_) | Value::Number(_) => true,
        Value::Obj(r) => matches!(heap.get(r).kind, crate::object::ObjKind::String(_)),
        Value::Empty => false,
    }
}

/// Hash for a dictionary key. Callers must have checked `is_valid_key`.
pub fn hash_value(heap: &Heap, value: Value) -> u32 {
    match value {
        Value::Nil => 7,
        Value::Bool(false) => 3,
        Value::Bool(true) => 5,
        Value::Number(n) => {
            // Normalise -0.0 so equal keys share a bucket.
            let bits = if n == 0.0 { 0u64 } else { n.to_bits() };
            (bits ^ (bits >> 32)) as u32
        }
        Value::Obj(r) => heap.string(r).hash,
        Value::Empty => unreachable!("empty cannot key a dict"),
    }
}

impl ValueDict {
    pub fn new() -> Self {
        ValueDict { count: 0, live: 0, entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_entry(entries: &[DictEntry], key: Value, hash: u32) -> usize {
        let mask = entries.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            if entry.is_vacant() {
                if entry.is_tombstone() {
                    tombstone.get_or_insert(index);
                } else {
                    return tombstone.unwrap_or(index);
                }
            } else if entry.key == key {
                return index;
            }
            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, key: Value, hash: u32) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        if self.entries[index].is_vacant() {
            None
        } else {
            Some(self.entries[index].value)
        }
    }

    pub fn set(&mut self, key: Value, hash: u32, value: Value) -> bool {
        if (self.count + 1) * MAX_LOAD_DEN > self.entries.len() * MAX_LOAD_NUM {
            self.grow();
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.is_vacant();
        if is_new {
            if !entry.is_tombstone() {
                self.count += 1;
            }
            self.live += 1;
        }
        *entry = DictEntry { key, hash, value };
        is_new
    }

    pub fn delete(&mut self, key: Value, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        if self.entries[index].is_vacant() {
            return false;
        }
        self.entries[index] = DictEntry::TOMBSTONE;
        self.live -= 1;
        true
    }

    pub fn entries(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries.iter().filter(|e| !e.is_vacant()).map(|e| (e.key, e.value))
    }

    fn grow(&mut self) {
        let capacity = (self.entries.len() * 2).max(MIN_CAPACITY);
        let old = std::mem::replace(&mut self.entries, vec![DictEntry::EMPTY; capacity]);
        self.count = 0;
        for entry in old {
            if !entry.is_vacant() {
                let index = Self::find_entry(&self.entries, entry.key, entry.hash);
                self.entries[index] = entry;
                self.count += 1;
            }
        }
        self.live = self.count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::Gc;

    fn intern(gc: &mut Gc, chars: &str) -> (ObjRef, u32) {
        let key = gc.intern(chars);
        let hash = gc.heap.string(key).hash;
        (key, hash)
    }

    #[test]
    fn set_get_delete() {
        let mut gc = Gc::new();
        let (key, hash) = intern(&mut gc, "answer");
        let mut table = Table::new();
        assert!(table.set(key, hash, Value::Number(42.0)));
        assert_eq!(table.get(key, hash), Some(Value::Number(42.0)));
        assert!(!table.set(key, hash, Value::Number(43.0)));
        assert_eq!(table.get(key, hash), Some(Value::Number(43.0)));
        assert!(table.delete(key, hash));
        assert_eq!(table.get(key, hash), None);
        assert!(!table.delete(key, hash));
    }

    #[test]
    fn tombstones_preserve_probe_chains() {
        let mut gc = Gc::new();
        let keys: Vec<_> = (0..32).map(|i| intern(&mut gc, &format!("key{}", i))).collect();
        let mut table = Table::new();
        for (i, &(k, h)) in keys.iter().enumerate() {
            table.set(k, h, Value::Number(i as f64));
        }
        // Delete every other key, then verify the rest still resolve even
        // where their probe chains crossed the deleted slots.
        for &(k, h) in keys.iter().step_by(2) {
            assert!(table.delete(k, h));
        }
        for (i, &(k, h)) in keys.iter().enumerate() {
            let expected = if i % 2 == 0 { None } else { Some(Value::Number(i as f64)) };
            assert_eq!(table.get(k, h), expected);
        }
        // Tombstoned slots are reused by inserts.
        let (k0, h0) = intern(&mut gc, "key0");
        table.set(k0, h0, Value::Bool(true));
        assert_eq!(table.get(k0, h0), Some(Value::Bool(true)));
    }

    #[test]
    fn growth_rehashes_and_drops_tombstones() {
        let mut gc = Gc::new();
        let mut table = Table::new();
        let mut keys = Vec::new();
        for i in 0..100 {
            let (k, h) = intern(&mut gc, &format!("g{}", i));
            keys.push((k, h));
            table.set(k, h, Value::Number(i as f64));
        }
        for (i, &(k, h)) in keys.iter().enumerate() {
            assert_eq!(table.get(k, h), Some(Value::Number(i as f64)));
        }
    }

    #[test]
    fn add_all_copies_entries() {
        let mut gc = Gc::new();
        let (a, ha) = intern(&mut gc, "a");
        let (b, hb) = intern(&mut gc, "b");
        let mut source = Table::new();
        source.set(a, ha, Value::Number(1.0));
        source.set(b, hb, Value::Number(2.0));
        let mut target = Table::new();
        target.set(a, ha, Value::Number(9.0));
        source.add_all_into(&mut target);
        // Copied entries overwrite, like an inheriting class's table.
        assert_eq!(target.get(a, ha), Some(Value::Number(1.0)));
        assert_eq!(target.get(b, hb), Some(Value::Number(2.0)));
    }

    #[test]
    fn find_string_matches_content() {
        let mut gc = Gc::new();
        let (interned, hash) = intern(&mut gc, "hello");
        assert_eq!(gc.strings.find_string(&gc.heap, "hello", hash), Some(interned));
        let missing = crate::object::hash_string("other");
        assert_eq!(gc.strings.find_string(&gc.heap, "other", missing), None);
    }

    #[test]
    fn dict_keys_by_value_equality() {
        let mut gc = Gc::new();
        let mut dict = ValueDict::new();
        let one = Value::Number(1.0);
        dict.set(one, hash_value(&gc.heap, one), Value::Bool(true));
        dict.set(Value::Nil, hash_value(&gc.heap, Value::Nil), Value::Number(9.0));
        let no = Value::Bool(false);
        dict.set(no, hash_value(&gc.heap, no), Value::Number(8.0));
        let s = Value::Obj(gc.intern("k"));
        dict.set(s, hash_value(&gc.heap, s), Value::Number(7.0));

        assert_eq!(dict.get(one, hash_value(&gc.heap, one)), Some(Value::Bool(true)));
        assert_eq!(dict.get(Value::Nil, hash_value(&gc.heap, Value::Nil)), Some(Value::Number(9.0)));
        assert_eq!(dict.get(no, hash_value(&gc.heap, no)), Some(Value::Number(8.0)));
        // A second intern of the same bytes is the same key object.
        let s2 = Value::Obj(gc.intern("k"));
        assert_eq!(dict.get(s2, hash_value(&gc.heap, s2)), Some(Value::Number(7.0)));
        assert_eq!(dict.len(), 4);

        assert!(dict.delete(Value::Nil, hash_value(&gc.heap, Value::Nil)));
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.get(Value::Nil, hash_value(&gc.heap, Value::Nil)), None);
    }

    #[test]
    fn dict_negative_zero_and_positive_zero_are_one_key() {
        let gc = Gc::new();
        let mut dict = ValueDict::new();
        dict.set(Value::Number(0.0), hash_value(&gc.heap, Value::Number(0.0)), Value::Number(1.0));
        assert_eq!(
            dict.get(Value::Number(-0.0), hash_value(&gc.heap, Value::Number(-0.0))),
            Some(Value::Number(1.0))
        );
    }
}
