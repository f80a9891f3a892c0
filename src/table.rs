// SPDX-License-Identifier: GPL-3.0-or-later

//! Open-addressed, string-keyed hash table with tombstones.
//!
//! Used for string interning, globals, class method tables, and instance
//! field tables. Keys are always `ObjRef`s pointing at interned strings,
//! so key equality is identity (`ObjRef` equality), never a byte compare
//! — except inside [`Table::find_string`], which *is* the interning
//! probe and therefore the one place that compares string bytes.

#[cfg(test)]
mod table_test;

use crate::limits::{TABLE_GROWTH_FACTOR, TABLE_INITIAL_CAPACITY, TABLE_MAX_LOAD};
use crate::object::{Heap, ObjRef};
use crate::value::Value;

#[derive(Clone)]
struct Entry {
    /// `None` means either empty or a tombstone; the two are
    /// distinguished by `value`: a tombstone carries `Value::Bool(true)`,
    /// an empty slot carries `Value::Nil`.
    key: Option<ObjRef>,
    hash: u32,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry { key: None, hash: 0, value: Value::nil() }
    }
}

#[derive(Clone)]
pub struct Table {
    entries: Vec<Entry>,
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Table { entries: Vec::new(), count: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn find_entry(entries: &[Entry], key: ObjRef, hash: u32) -> usize {
        let cap = entries.len();
        let mut index = (hash as usize) & (cap - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                Some(k) if k == key => return index,
                None if entry.value.is_nil() => {
                    return tombstone.unwrap_or(index);
                }
                None => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Some(_) => {}
            }
            index = (index + 1) & (cap - 1);
        }
    }

    fn grow(&mut self) {
        let new_cap = if self.entries.is_empty() {
            TABLE_INITIAL_CAPACITY
        } else {
            self.entries.len() * TABLE_GROWTH_FACTOR
        };
        let mut new_entries = vec![Entry::empty(); new_cap];
        let mut new_count = 0;
        for entry in &self.entries {
            let Some(key) = entry.key else { continue };
            let index = Self::find_entry(&new_entries, key, entry.hash);
            new_entries[index] = Entry { key: Some(key), hash: entry.hash, value: entry.value };
            new_count += 1;
        }
        self.entries = new_entries;
        self.count = new_count;
    }

    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        self.entries[index].key.map(|_| self.entries[index].value)
    }

    pub fn contains(&self, key: ObjRef, hash: u32) -> bool {
        self.get(key, hash).is_some()
    }

    /// Returns `true` if this inserted a brand new key.
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * TABLE_MAX_LOAD {
            self.grow();
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        if is_new && entry.value.is_nil() {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.hash = hash;
        entry.value = value;
        is_new
    }

    /// Sets `key` only if it already exists; returns `false` (and leaves
    /// the table untouched) otherwise. Used by `OP_SET_GLOBAL`, so that a
    /// write to an undefined global never inserts a transient key (see
    /// `SPEC_FULL.md` §9, Open Question (d)).
    pub fn set_existing(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index].value = value;
        true
    }

    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index] = Entry { key: None, hash: 0, value: Value::bool_val(true) };
        true
    }

    /// Copies every live entry of `self` into `dest`. A snapshot copy,
    /// not a live view: tombstones are dropped, and later writes to
    /// `self` never retroactively appear in `dest`. Used by `OP_INHERIT`.
    pub fn add_all(&self, dest: &mut Table) {
        for entry in &self.entries {
            if let Some(key) = entry.key {
                dest.set(key, entry.hash, entry.value);
            }
        }
    }

    /// The interning probe: the only place string *bytes* (rather than
    /// `ObjRef` identity) are compared.
    pub fn find_string(&self, heap: &Heap, chars: &str, hash: u32) -> Option<ObjRef> {
        if self.entries.is_empty() {
            return None;
        }
        let cap = self.entries.len();
        let mut index = (hash as usize) & (cap - 1);
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None if entry.value.is_nil() => return None,
                Some(key) => {
                    let s = heap.as_string(key);
                    if s.hash == hash && s.chars == chars {
                        return Some(key);
                    }
                }
                None => {}
            }
            index = (index + 1) & (cap - 1);
        }
    }

    /// Removes every entry whose key is unmarked. Called on the interned
    /// strings table before sweep, so sweep can reclaim strings that are
    /// otherwise unreachable — the strings table holds only a weak
    /// reference to each string.
    pub fn remove_unmarked(&mut self, heap: &Heap) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key
                && !heap.is_marked(key)
            {
                *entry = Entry { key: None, hash: 0, value: Value::bool_val(true) };
                self.count -= 1;
            }
        }
    }

    pub fn keys_and_values(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries.iter().filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    pub fn approx_size(&self) -> usize {
        self.entries.len() * size_of::<Entry>()
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}
