// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for the open-addressed hash table.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::object::{ObjData, LoxString, hash_str};

fn intern(heap: &mut Heap, s: &str) -> ObjRef {
    let hash = hash_str(s);
    heap.alloc(ObjData::String(LoxString { chars: s.to_string(), hash }))
}

#[test]
fn set_reports_new_vs_overwrite() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    let key = intern(&mut heap, "x");
    let hash = hash_str("x");
    assert!(table.set(key, hash, Value::number(1.0)));
    assert!(!table.set(key, hash, Value::number(2.0)));
}

#[test]
fn lookup_returns_last_value_set() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    let key = intern(&mut heap, "x");
    let hash = hash_str("x");
    table.set(key, hash, Value::number(1.0));
    table.set(key, hash, Value::number(2.0));
    assert_eq!(table.get(key, hash).and_then(|v| v.as_number()), Some(2.0));
}

#[test]
fn delete_removes_key_but_not_others() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    let a = intern(&mut heap, "a");
    let b = intern(&mut heap, "b");
    let (ha, hb) = (hash_str("a"), hash_str("b"));
    table.set(a, ha, Value::number(1.0));
    table.set(b, hb, Value::number(2.0));
    assert!(table.delete(a, ha));
    assert!(table.get(a, ha).is_none());
    assert!(!table.delete(a, ha));
    assert_eq!(table.get(b, hb).and_then(|v| v.as_number()), Some(2.0));
}

#[test]
fn set_existing_never_inserts_an_undefined_key() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    let key = intern(&mut heap, "undefined");
    let hash = hash_str("undefined");
    assert!(!table.set_existing(key, hash, Value::number(1.0)));
    assert!(table.get(key, hash).is_none());
    assert_eq!(table.len(), 0);
}

#[test]
fn grows_past_the_load_factor() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    for i in 0..200 {
        let name = format!("key{i}");
        let key = intern(&mut heap, &name);
        table.set(key, hash_str(&name), Value::number(f64::from(i)));
    }
    assert_eq!(table.len(), 200);
    assert!((table.capacity() as f64) * TABLE_MAX_LOAD >= 200.0);
}

#[test]
fn add_all_is_a_snapshot_copy() {
    let mut heap = Heap::new();
    let mut src = Table::new();
    let mut dest = Table::new();
    let key = intern(&mut heap, "x");
    let hash = hash_str("x");
    src.set(key, hash, Value::number(1.0));
    src.add_all(&mut dest);
    src.set(key, hash, Value::number(2.0));
    assert_eq!(dest.get(key, hash).and_then(|v| v.as_number()), Some(1.0));
}
