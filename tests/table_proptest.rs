// SPDX-License-Identifier: GPL-3.0-or-later

//! Property tests for the hash table and value equality invariants.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use proptest::prelude::*;
use rlox::object::{Heap, ObjData, ObjRef, hash_str};
use rlox::table::Table;
use rlox::value::{Value, values_equal};

fn intern(heap: &mut Heap, s: &str) -> ObjRef {
    let hash = hash_str(s);
    heap.alloc(ObjData::String(rlox::object::LoxString { chars: s.to_owned(), hash }))
}

#[derive(Clone, Debug)]
enum Op {
    Set(String, i64),
    Delete(String),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let key = "[a-z]{1,4}";
    prop_oneof![
        (key, any::<i64>()).prop_map(|(k, v)| Op::Set(k, v)),
        key.prop_map(Op::Delete),
    ]
}

proptest! {
    /// For any sequence of set/delete operations, a final lookup returns
    /// the last value set for that key, or reports absence after a
    /// delete with no later set.
    #[test]
    fn table_lookup_reflects_the_last_write(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let mut model: std::collections::HashMap<String, i64> = std::collections::HashMap::new();

        for op in &ops {
            match op {
                Op::Set(k, v) => {
                    let key = intern(&mut heap, k);
                    let hash = hash_str(k);
                    table.set(key, hash, Value::number(*v as f64));
                    model.insert(k.clone(), *v);
                }
                Op::Delete(k) => {
                    let key = intern(&mut heap, k);
                    let hash = hash_str(k);
                    table.delete(key, hash);
                    model.remove(k);
                }
            }
        }

        for (k, expected) in &model {
            let key = intern(&mut heap, k);
            let hash = hash_str(k);
            let actual = table.get(key, hash).and_then(|v| v.as_number());
            prop_assert_eq!(actual, Some(*expected as f64));
        }

        // any key never present in the model is absent from the table too
        for k in ["zz", "qq", "xx"] {
            if !model.contains_key(k) {
                let key = intern(&mut heap, k);
                let hash = hash_str(k);
                prop_assert!(table.get(key, hash).is_none());
            }
        }
    }

    /// `values_equal` is reflexive and symmetric for numbers, bools, and
    /// nil (NaN excepted, per IEEE-754).
    #[test]
    fn values_equal_is_reflexive_and_symmetric_for_numbers(a in any::<f64>(), b in any::<f64>()) {
        let va = Value::number(a);
        let vb = Value::number(b);
        if !a.is_nan() {
            prop_assert!(values_equal(va, va));
        }
        prop_assert_eq!(values_equal(va, vb), values_equal(vb, va));
    }

    #[test]
    fn values_equal_is_reflexive_and_symmetric_for_bools(a in any::<bool>(), b in any::<bool>()) {
        let va = Value::bool_val(a);
        let vb = Value::bool_val(b);
        prop_assert!(values_equal(va, va));
        prop_assert_eq!(values_equal(va, vb), values_equal(vb, va));
        prop_assert_eq!(values_equal(va, vb), a == b);
    }

    /// A number is never equal to a bool or nil, regardless of value.
    #[test]
    fn numbers_never_equal_bools_or_nil(a in any::<f64>(), b in any::<bool>()) {
        let number = Value::number(a);
        let boolean = Value::bool_val(b);
        prop_assert!(!values_equal(number, boolean));
        prop_assert!(!values_equal(number, Value::nil()));
    }
}
