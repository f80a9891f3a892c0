// SPDX-License-Identifier: GPL-3.0-or-later

//! Bytecode disassembler, shared by `--print-code`, `--trace-execution`,
//! and the self-test suite's chunk checks.

use crate::chunk::{Chunk, OpCode, op_name};
use crate::object::Heap;

pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {name} ==\n");
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (line, next) = disassemble_one(heap, chunk, offset);
        out.push_str(&line);
        out.push('\n');
        offset = next;
    }
    out
}

/// Disassembles the single instruction at `ip`, without advancing past it.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, ip: usize) -> String {
    disassemble_one(heap, chunk, ip).0
}

fn disassemble_one(heap: &Heap, chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut out = format!("{offset:04} ");
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        out.push_str("   | ");
    } else {
        out.push_str(&format!("{:4} ", chunk.lines[offset]));
    }

    let Some(op) = OpCode::from_byte(chunk.code[offset]) else {
        out.push_str(&format!("Unknown opcode {}", chunk.code[offset]));
        return (out, offset + 1);
    };

    match op {
        OpCode::Constant | OpCode::DefineGlobal | OpCode::GetGlobal | OpCode::SetGlobal | OpCode::GetProperty
        | OpCode::SetProperty | OpCode::Class | OpCode::Method | OpCode::GetSuper => {
            let idx = chunk.code[offset + 1];
            out.push_str(&format!(
                "{:-16} {idx:4} '{}'",
                op_name(op),
                heap.value_to_string(chunk.constants[idx as usize])
            ));
            (out, offset + 2)
        }
        OpCode::GetLocal | OpCode::SetLocal | OpCode::GetUpvalue | OpCode::SetUpvalue | OpCode::Call => {
            let idx = chunk.code[offset + 1];
            out.push_str(&format!("{:-16} {idx:4}", op_name(op)));
            (out, offset + 2)
        }
        OpCode::Invoke | OpCode::InvokeSuper => {
            let idx = chunk.code[offset + 1];
            let arg_count = chunk.code[offset + 2];
            out.push_str(&format!(
                "{:-16} ({arg_count} args) {idx:4} '{}'",
                op_name(op),
                heap.value_to_string(chunk.constants[idx as usize])
            ));
            (out, offset + 3)
        }
        OpCode::Jump | OpCode::JumpIfFalse => {
            let jump = (u16::from(chunk.code[offset + 1]) << 8) | u16::from(chunk.code[offset + 2]);
            out.push_str(&format!("{:-16} {offset:4} -> {}", op_name(op), offset + 3 + jump as usize));
            (out, offset + 3)
        }
        OpCode::Loop => {
            let jump = (u16::from(chunk.code[offset + 1]) << 8) | u16::from(chunk.code[offset + 2]);
            out.push_str(&format!("{:-16} {offset:4} -> {}", op_name(op), offset + 3 - jump as usize));
            (out, offset + 3)
        }
        OpCode::Closure => {
            let idx = chunk.code[offset + 1];
            let constant = chunk.constants[idx as usize];
            out.push_str(&format!("{:-16} {idx:4} '{}'", op_name(op), heap.value_to_string(constant)));
            let mut next = offset + 2;
            if let Some(r) = constant.as_obj() {
                let upvalue_count = heap.as_function(r).upvalue_count;
                for _ in 0..upvalue_count {
                    let is_local = chunk.code[next];
                    let index = chunk.code[next + 1];
                    out.push_str(&format!(
                        "\n{next:04}      |                     {} {index}",
                        if is_local != 0 { "local" } else { "upvalue" }
                    ));
                    next += 2;
                }
            }
            (out, next)
        }
        _ => {
            out.push_str(op_name(op));
            (out, offset + 1)
        }
    }
}
