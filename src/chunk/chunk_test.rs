// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for chunk writes, constant-pool capacity, and growth.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::value::Value;

#[test]
fn write_appends_byte_and_line() {
    let mut chunk = Chunk::new();
    chunk.write_op(OpCode::Return, 7);
    assert_eq!(chunk.code, vec![OpCode::Return as u8]);
    assert_eq!(chunk.lines, vec![7]);
}

#[test]
fn constant_pool_returns_increasing_indices() {
    let mut chunk = Chunk::new();
    let a = chunk.add_constant(Value::number(1.0)).unwrap();
    let b = chunk.add_constant(Value::number(2.0)).unwrap();
    assert_eq!(a, 0);
    assert_eq!(b, 1);
}

#[test]
fn constant_pool_rejects_past_capacity() {
    let mut chunk = Chunk::new();
    for i in 0..MAX_CONSTANTS {
        assert!(chunk.add_constant(Value::number(i as f64)).is_some());
    }
    assert!(chunk.add_constant(Value::number(0.0)).is_none());
}

#[test]
fn code_array_grows_to_fit_every_write() {
    let mut chunk = Chunk::new();
    for i in 0..100u32 {
        chunk.write(0, i);
        assert!(chunk.code.capacity() >= chunk.code.len());
    }
    assert_eq!(chunk.code.len(), 100);
}
