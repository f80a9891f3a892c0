// SPDX-License-Identifier: GPL-3.0-or-later

//! Built-in self-test suite, run via `--test`/`-t`. Exercises the chunk,
//! constant pool, lexer, and hash table directly, in-process — no
//! subprocess spawning, no `cargo test` dependency. See `SPEC_FULL.md`
//! §8.

use std::io::IsTerminal;

use crate::chunk::{Chunk, OpCode};
use crate::lexer::{Lexer, TokenKind};
use crate::limits::MAX_CONSTANTS;
use crate::object::Heap;
use crate::table::Table;
use crate::value::Value;

/// Accumulates pass/fail counts for one named group of checks, printing
/// each failure as it's recorded rather than panicking — a single bad
/// assertion shouldn't stop the rest of the suite from reporting.
struct Tally {
    passed: usize,
    failed: usize,
}

impl Tally {
    fn new() -> Self {
        Tally { passed: 0, failed: 0 }
    }

    fn check(&mut self, name: &str, ok: bool) {
        if ok {
            self.passed += 1;
        } else {
            self.failed += 1;
            eprintln!("  FAIL: {name}");
        }
    }

    fn merge(&mut self, other: Self) {
        self.passed += other.passed;
        self.failed += other.failed;
    }
}

/// Runs every group and prints the summary line. Returns `true` iff
/// every check passed.
pub fn run() -> bool {
    let mut tally = Tally::new();
    tally.merge(test_chunk());
    tally.merge(test_constants());
    tally.merge(test_lexer());
    tally.merge(test_table());

    let total = tally.passed + tally.failed;
    if tally.failed == 0 {
        println!("{}", colorize(&format!("{total} tests passed."), Color::Green));
        true
    } else {
        let failed = tally.failed;
        let passed = tally.passed;
        println!("{}", colorize(&format!("{failed} tests failed, {passed} passed."), Color::Red));
        false
    }
}

enum Color {
    Green,
    Red,
}

fn colorize(s: &str, color: Color) -> String {
    if !std::io::stdout().is_terminal() {
        return s.to_string();
    }
    let code = match color {
        Color::Green => "32",
        Color::Red => "31",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn test_chunk() -> Tally {
    let mut tally = Tally::new();
    let mut chunk = Chunk::new();
    let heap = Heap::new();

    let constant = chunk.add_constant(Value::number(1.2));
    tally.check("constant index fits in a byte", constant.is_some());
    chunk.write_op(OpCode::Constant, 123);
    chunk.write(constant.expect("checked above"), 123);
    chunk.write_op(OpCode::Return, 123);

    tally.check("two opcodes plus one operand byte written", chunk.code.len() == 3);
    tally.check("one line number recorded per byte", chunk.lines.len() == chunk.code.len());
    tally.check("every written line number is 123", chunk.lines.iter().all(|&l| l == 123));

    let dump = crate::debug::disassemble_chunk(&heap, &chunk, "test chunk");
    tally.check("disassembly names the constant load", dump.contains("OP_CONSTANT"));
    tally.check("disassembly prints the constant's value", dump.contains("1.2"));
    tally.check("disassembly names the return", dump.contains("OP_RETURN"));
    tally.check("OP_FALSE is never mislabelled OP_TRUE", {
        let mut false_chunk = Chunk::new();
        false_chunk.write_op(OpCode::False, 1);
        let dump = crate::debug::disassemble_chunk(&heap, &false_chunk, "false chunk");
        dump.contains("OP_FALSE") && !dump.contains("OP_TRUE")
    });

    tally
}

fn test_constants() -> Tally {
    let mut tally = Tally::new();
    let mut chunk = Chunk::new();

    for i in 0..MAX_CONSTANTS {
        let idx = chunk.add_constant(Value::number(i as f64));
        tally.check("constant pool accepts up to its capacity", idx == Some(i as u8));
    }
    tally.check("constant pool rejects the one past capacity", chunk.add_constant(Value::number(0.0)).is_none());

    let mut growth_chunk = Chunk::new();
    for i in 0..40u32 {
        growth_chunk.write(0, i);
        tally.check("chunk capacity never falls short of its length", growth_chunk.code.capacity() >= growth_chunk.code.len());
    }
    tally.check("chunk count matches the number of writes", growth_chunk.code.len() == 40);
    // `reserve_exact` only guarantees capacity >= requested, never equality,
    // so the geometric 8, 12, 18, 27, 40 schedule is checked as a lower bound.
    tally.check("capacity keeps pace with the documented 8, 12, 18, 27, 40 schedule", growth_chunk.code.capacity() >= 40);

    tally
}

fn test_lexer() -> Tally {
    let mut tally = Tally::new();
    let source = "var x = 1 + 2.5; // comment\nif (x) { return x; } else { break; }";
    let mut lexer = Lexer::new(source);
    let mut kinds = Vec::new();
    loop {
        let tok = lexer.next_token();
        if tok.kind == TokenKind::Eof {
            break;
        }
        kinds.push(tok.kind);
    }
    let expected = vec![
        TokenKind::Var,
        TokenKind::Identifier,
        TokenKind::Equal,
        TokenKind::Int,
        TokenKind::Plus,
        TokenKind::Float64,
        TokenKind::Semicolon,
        TokenKind::If,
        TokenKind::LeftParen,
        TokenKind::Identifier,
        TokenKind::RightParen,
        TokenKind::LeftBrace,
        TokenKind::Return,
        TokenKind::Identifier,
        TokenKind::Semicolon,
        TokenKind::RightBrace,
        TokenKind::Else,
        TokenKind::LeftBrace,
        TokenKind::Break,
        TokenKind::Semicolon,
        TokenKind::RightBrace,
    ];
    tally.check("token stream matches the expected kinds", kinds == expected);

    let mut err_lexer = Lexer::new("\"unterminated");
    tally.check("unterminated string yields an error token", err_lexer.next_token().kind == TokenKind::Error);

    let mut num_lexer = Lexer::new("1_000_000 3.14e10");
    let first = num_lexer.next_token();
    let second = num_lexer.next_token();
    tally.check("underscore-separated integers lex as Int", first.kind == TokenKind::Int);
    tally.check("exponent literals lex as Float64", second.kind == TokenKind::Float64);

    tally
}

fn value_is(value: Option<Value>, expected: f64) -> bool {
    value.and_then(|v| v.as_number()) == Some(expected)
}

fn test_table() -> Tally {
    let mut tally = Tally::new();
    let mut heap = Heap::new();
    let mut table = Table::new();

    let mut intern = |heap: &mut Heap, s: &str| -> crate::object::ObjRef {
        let hash = crate::object::hash_str(s);
        heap.alloc(crate::object::ObjData::String(crate::object::LoxString { chars: s.to_string(), hash }))
    };

    let key_a = intern(&mut heap, "a");
    let key_b = intern(&mut heap, "b");
    let hash_a = crate::object::hash_str("a");
    let hash_b = crate::object::hash_str("b");

    tally.check("setting a brand new key reports true", table.set(key_a, hash_a, Value::number(1.0)));
    tally.check("overwriting an existing key reports false", !table.set(key_a, hash_a, Value::number(2.0)));
    tally.check("lookup returns the last value set", value_is(table.get(key_a, hash_a), 2.0));

    table.set(key_b, hash_b, Value::number(3.0));
    tally.check("deleting a present key succeeds", table.delete(key_a, hash_a));
    tally.check("deleted key is absent afterwards", table.get(key_a, hash_a).is_none());
    tally.check("deleting an absent key reports false", !table.delete(key_a, hash_a));
    tally.check("other keys survive a delete", value_is(table.get(key_b, hash_b), 3.0));

    let mut growth_table = Table::new();
    for i in 0..64 {
        let key = intern(&mut heap, &format!("key{i}"));
        let hash = crate::object::hash_str(&format!("key{i}"));
        growth_table.set(key, hash, Value::number(f64::from(i)));
    }
    tally.check("table grows to keep load factor under its cap", growth_table.len() == 64);

    tally
}
