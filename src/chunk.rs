// SPDX-License-Identifier: GPL-3.0-or-later

//! Bytecode chunk: an append-only instruction stream, a parallel
//! per-byte line-number array, and a constant pool.

#[cfg(test)]
mod chunk_test;

use crate::limits::{CHUNK_GROWTH_DENOMINATOR, CHUNK_GROWTH_NUMERATOR, CHUNK_INITIAL_CAPACITY, MAX_CONSTANTS};
use crate::value::Value;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum OpCode {
    Constant,
    Nil,
    True,
    False,
    Pop,
    GetLocal,
    SetLocal,
    GetUpvalue,
    SetUpvalue,
    DefineGlobal,
    GetGlobal,
    SetGlobal,
    GetProperty,
    SetProperty,
    Equal,
    Greater,
    Less,
    Add,
    Subtract,
    Multiply,
    Divide,
    Not,
    Negate,
    Jump,
    JumpIfFalse,
    Loop,
    Call,
    Invoke,
    Closure,
    CloseUpvalue,
    Return,
    Class,
    Inherit,
    Method,
    GetSuper,
    InvokeSuper,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use OpCode::*;
        const TABLE: &[OpCode] = &[
            Constant, Nil, True, False, Pop, GetLocal, SetLocal, GetUpvalue, SetUpvalue, DefineGlobal,
            GetGlobal, SetGlobal, GetProperty, SetProperty, Equal, Greater, Less, Add, Subtract,
            Multiply, Divide, Not, Negate, Jump, JumpIfFalse, Loop, Call, Invoke, Closure, CloseUpvalue,
            Return, Class, Inherit, Method, GetSuper, InvokeSuper,
        ];
        TABLE.get(byte as usize).copied()
    }
}

/// The reference's "constant vs local/global slot" disassembly naming,
/// used only in debug dumps (`--print-code`, `--trace-execution`, and
/// the chunk test in the self-test suite).
pub fn op_name(op: OpCode) -> &'static str {
    match op {
        OpCode::Constant => "OP_CONSTANT",
        OpCode::Nil => "OP_NIL",
        OpCode::True => "OP_TRUE",
        OpCode::False => "OP_FALSE",
        OpCode::Pop => "OP_POP",
        OpCode::GetLocal => "OP_GET_LOCAL",
        OpCode::SetLocal => "OP_SET_LOCAL",
        OpCode::GetUpvalue => "OP_GET_UPVALUE",
        OpCode::SetUpvalue => "OP_SET_UPVALUE",
        OpCode::DefineGlobal => "OP_DEFINE_GLOBAL",
        OpCode::GetGlobal => "OP_GET_GLOBAL",
        OpCode::SetGlobal => "OP_SET_GLOBAL",
        OpCode::GetProperty => "OP_GET_PROPERTY",
        OpCode::SetProperty => "OP_SET_PROPERTY",
        OpCode::Equal => "OP_EQUAL",
        OpCode::Greater => "OP_GREATER",
        OpCode::Less => "OP_LESS",
        OpCode::Add => "OP_ADD",
        OpCode::Subtract => "OP_SUB",
        OpCode::Multiply => "OP_MUL",
        OpCode::Divide => "OP_DIV",
        OpCode::Not => "OP_NOT",
        OpCode::Negate => "OP_NEGATE",
        OpCode::Jump => "OP_JUMP",
        OpCode::JumpIfFalse => "OP_JUMP_IF_FALSE",
        OpCode::Loop => "OP_LOOP",
        OpCode::Call => "OP_CALL",
        OpCode::Invoke => "OP_INVOKE",
        OpCode::Closure => "OP_CLOSURE",
        OpCode::CloseUpvalue => "OP_CLOSE_UPVALUE",
        OpCode::Return => "OP_RETURN",
        OpCode::Class => "OP_CLASS",
        OpCode::Inherit => "OP_INHERIT",
        OpCode::Method => "OP_METHOD",
        OpCode::GetSuper => "OP_GET_SUPER",
        OpCode::InvokeSuper => "OP_INVOKE_SUPER",
    }
}

#[derive(Clone, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub lines: Vec<u32>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    pub fn write(&mut self, byte: u8, line: u32) {
        if self.code.capacity() == self.code.len() {
            let new_cap = if self.code.is_empty() {
                CHUNK_INITIAL_CAPACITY
            } else {
                self.code.capacity() * CHUNK_GROWTH_NUMERATOR / CHUNK_GROWTH_DENOMINATOR
            };
            self.code.reserve_exact(new_cap - self.code.len());
            self.lines.reserve_exact(new_cap - self.lines.len());
        }
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn write_op(&mut self, op: OpCode, line: u32) {
        self.write(op as u8, line);
    }

    /// Adds `value` to the constant pool, returning its index.
    ///
    /// The reference pushes `value` onto the VM stack across the
    /// underlying array's growth (so a GC triggered by that growth
    /// cannot reclaim a freshly allocated constant) and pops it
    /// afterwards. This implementation doesn't need that dance: the
    /// constant pool is a plain `Vec<Value>` on the `Chunk`, which is
    /// itself already reachable from a GC root (the function under
    /// construction, via the active compiler chain — see
    /// `SPEC_FULL.md` §9, "Compiler ↔ GC coupling") before any constant
    /// is ever pushed into it.
    pub fn add_constant(&mut self, value: Value) -> Option<u8> {
        if self.constants.len() >= MAX_CONSTANTS {
            return None;
        }
        self.constants.push(value);
        Some((self.constants.len() - 1) as u8)
    }

    pub fn approx_size(&self) -> usize {
        self.code.len() + self.lines.len() * size_of::<u32>() + self.constants.len() * size_of::<Value>()
    }
}
