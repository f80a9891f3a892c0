// SPDX-License-Identifier: GPL-3.0-or-later

//! The bytecode interpreter: value stack, call frames, globals, and the
//! heap. Owns the single [`Heap`] instance for the whole run (see
//! `SPEC_FULL.md` §9, "Global VM state") and drives garbage collection
//! at every allocation.

use crate::chunk::OpCode;
use crate::error::{InterpretResult, RuntimeError};
use crate::limits::{FRAMES_MAX, GC_HEAP_GROW_FACTOR, GC_HEAP_MIN_BYTES, STACK_MAX};
use crate::object::{
    Heap, LoxBoundMethod, LoxClass, LoxClosure, LoxInstance, LoxNative, LoxString, NativeFn, ObjData, ObjRef,
    Upvalue, hash_str,
};
use crate::table::Table;
use crate::value::{Value, is_falsey, values_equal};

#[derive(Clone, Copy)]
struct CallFrame {
    closure: ObjRef,
    ip: usize,
    slot_base: usize,
}

/// Runtime toggles for the three diagnostic call sites. Each one is
/// still compiled out entirely unless its Cargo feature is enabled
/// (see `Cargo.toml`); when the feature *is* compiled in, these flags
/// let a single run opt in via a CLI flag instead of every run paying
/// for the trace output unconditionally. See `SPEC_FULL.md` §10.
#[derive(Clone, Copy, Default)]
pub struct Diagnostics {
    pub log_gc: bool,
    pub trace_execution: bool,
    pub print_code: bool,
}

pub struct Vm {
    heap: Heap,
    strings: Table,
    globals: Table,
    init_string: ObjRef,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    open_upvalues: Vec<ObjRef>,
    /// Function objects currently under construction by the active
    /// compiler, oldest-enclosing first. Marked as roots during a
    /// compile-time collection (see `SPEC_FULL.md` §9, "Compiler ↔ GC
    /// coupling").
    compiler_roots: Vec<ObjRef>,
    diagnostics: Diagnostics,
}

impl Vm {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let mut strings = Table::new();
        let init_string = intern_into(&mut heap, &mut strings, "init");
        let mut vm = Vm {
            heap,
            strings,
            globals: Table::new(),
            init_string,
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            open_upvalues: Vec::new(),
            compiler_roots: Vec::new(),
            diagnostics: Diagnostics::default(),
        };
        vm.install_natives();
        vm
    }

    pub fn set_diagnostics(&mut self, diagnostics: Diagnostics) {
        self.diagnostics = diagnostics;
    }

    pub(crate) fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    fn install_natives(&mut self) {
        for &(name, function) in crate::native::NATIVES {
            let name_ref = self.intern_string(name);
            let native_ref = self.heap.alloc(ObjData::Native(LoxNative { name, function }));
            let hash = self.heap.as_string(name_ref).hash;
            self.globals.set(name_ref, hash, Value::obj(native_ref));
        }
    }

    /// Compiles and runs one top-level program. The `Vm` remains usable
    /// for a subsequent call afterwards, REPL-style.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function_ref = match crate::compiler::compile(self, source) {
            Ok(f) => f,
            Err(errors) => return InterpretResult::CompileError(errors),
        };
        let closure_ref = self.alloc(ObjData::Closure(LoxClosure { function: function_ref, upvalues: Vec::new() }));
        self.push(Value::obj(closure_ref));
        if let Err(e) = self.call_closure(closure_ref, 0) {
            self.stack.clear();
            self.frames.clear();
            return InterpretResult::RuntimeError(e);
        }
        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(e) => {
                self.stack.clear();
                self.frames.clear();
                InterpretResult::RuntimeError(e)
            }
        }
    }

    /// Looks up a global by name without running any source. Intended for
    /// embedders inspecting a program's results after `interpret`, not
    /// used by the VM's own bytecode dispatch (which reads globals by
    /// interned `ObjRef`, not by string).
    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Value> {
        let hash = hash_str(name);
        let key = self.strings.find_string(&self.heap, name, hash)?;
        self.globals.get(key, hash)
    }

    /// Renders a value the same way `print`/`println` would.
    #[must_use]
    pub fn display_value(&self, value: Value) -> String {
        self.heap.value_to_string(value)
    }

    pub(crate) fn intern_string(&mut self, s: &str) -> ObjRef {
        let hash = hash_str(s);
        if let Some(existing) = self.strings.find_string(&self.heap, s, hash) {
            return existing;
        }
        let obj_ref = self.alloc(ObjData::String(LoxString { chars: s.to_string(), hash }));
        self.strings.set(obj_ref, hash, Value::nil());
        obj_ref
    }

    pub(crate) fn push_compiler_root(&mut self, r: ObjRef) {
        self.compiler_roots.push(r);
    }

    pub(crate) fn pop_compiler_root(&mut self) {
        self.compiler_roots.pop();
    }

    pub(crate) fn function_mut(&mut self, function_ref: ObjRef) -> &mut crate::object::LoxFunction {
        match self.heap.get_mut(function_ref) {
            ObjData::Function(f) => f,
            _ => unreachable!("compiler root must reference a function object"),
        }
    }

    pub(crate) fn function_name(&self, function_ref: ObjRef) -> Option<&str> {
        self.heap.as_function(function_ref).name.map(|n| self.heap.as_string(n).chars.as_str())
    }

    #[cfg(feature = "print-code")]
    pub(crate) fn disassemble(&self, function_ref: ObjRef, name: &str) -> String {
        crate::debug::disassemble_chunk(&self.heap, &self.heap.as_function(function_ref).chunk, name)
    }

    #[cfg(feature = "print-code")]
    pub(crate) fn should_print_code(&self) -> bool {
        self.diagnostics.print_code
    }

    /// Allocates a new heap object, collecting first if the heap has
    /// grown past its threshold (or unconditionally under `stress-gc`).
    pub(crate) fn alloc(&mut self, data: ObjData) -> ObjRef {
        if self.should_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(data)
    }

    fn should_collect(&self) -> bool {
        cfg!(feature = "stress-gc") || self.heap.bytes_allocated > self.heap.next_gc
    }

    pub fn collect_garbage(&mut self) {
        #[cfg(feature = "log-gc")]
        let before = self.heap.bytes_allocated;
        #[cfg(feature = "log-gc")]
        if self.diagnostics.log_gc {
            tracing::debug!(bytes_before = before, "gc begin");
        }

        let mut gray: Vec<ObjRef> = Vec::new();
        self.mark_roots(&mut gray);
        crate::gc::trace_references(&mut self.heap, &mut gray);
        self.strings.remove_unmarked(&self.heap);
        crate::gc::sweep(&mut self.heap);
        self.heap.next_gc =
            ((self.heap.bytes_allocated as f64) * GC_HEAP_GROW_FACTOR).max(GC_HEAP_MIN_BYTES as f64) as usize;

        #[cfg(feature = "log-gc")]
        if self.diagnostics.log_gc {
            tracing::debug!(
                bytes_before = before,
                bytes_after = self.heap.bytes_allocated,
                next_gc = self.heap.next_gc,
                "gc end"
            );
        }
    }

    fn mark_roots(&mut self, gray: &mut Vec<ObjRef>) {
        for i in 0..self.stack.len() {
            let v = self.stack[i];
            crate::gc::mark_value(&mut self.heap, gray, v);
        }
        for i in 0..self.frames.len() {
            let closure_ref = self.frames[i].closure;
            crate::gc::mark_object(&mut self.heap, gray, closure_ref);
        }
        for i in 0..self.open_upvalues.len() {
            let r = self.open_upvalues[i];
            crate::gc::mark_object(&mut self.heap, gray, r);
        }
        crate::gc::mark_table(&mut self.heap, gray, &self.globals);
        crate::gc::mark_object(&mut self.heap, gray, self.init_string);
        for i in 0..self.compiler_roots.len() {
            let r = self.compiler_roots[i];
            crate::gc::mark_object(&mut self.heap, gray, r);
        }
    }

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow: VM popped an empty stack")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn chunk_byte(&self, closure_ref: ObjRef, ip: usize) -> u8 {
        let function_ref = self.heap.as_closure(closure_ref).function;
        self.heap.as_function(function_ref).chunk.code[ip]
    }

    fn read_u8(&mut self, frame_idx: usize) -> u8 {
        let mut frame = self.frames[frame_idx];
        let byte = self.chunk_byte(frame.closure, frame.ip);
        frame.ip += 1;
        self.frames[frame_idx] = frame;
        byte
    }

    fn read_u16(&mut self, frame_idx: usize) -> u16 {
        let hi = u16::from(self.read_u8(frame_idx));
        let lo = u16::from(self.read_u8(frame_idx));
        (hi << 8) | lo
    }

    fn read_constant(&mut self, frame_idx: usize) -> Value {
        let index = self.read_u8(frame_idx);
        let function_ref = self.heap.as_closure(self.frames[frame_idx].closure).function;
        self.heap.as_function(function_ref).chunk.constants[index as usize]
    }

    fn build_trace(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let function_ref = self.heap.as_closure(frame.closure).function;
                let function = self.heap.as_function(function_ref);
                let line = function.chunk.lines.get(frame.ip.saturating_sub(1)).copied().unwrap_or(0);
                let name = match function.name {
                    Some(n) => format!("{}()", self.heap.as_string(n).chars),
                    None => "script".to_string(),
                };
                format!("[line {line}] in {name}")
            })
            .collect()
    }

    fn runtime_error(&mut self, message: impl Into<String>) -> RuntimeError {
        let mut err = RuntimeError::new(message);
        err.trace = self.build_trace();
        err
    }

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), RuntimeError> {
        let Some(r) = callee.as_obj() else {
            return Err(self.runtime_error("Can only call functions and classes."));
        };
        enum Kind {
            Bound(Value, ObjRef),
            Class(ObjRef),
            Closure(ObjRef),
            Native(NativeFn),
            Other,
        }
        let kind = match self.heap.get(r) {
            ObjData::BoundMethod(b) => Kind::Bound(b.receiver, b.method),
            ObjData::Class(_) => Kind::Class(r),
            ObjData::Closure(_) => Kind::Closure(r),
            ObjData::Native(n) => Kind::Native(n.function),
            _ => Kind::Other,
        };
        match kind {
            Kind::Bound(receiver, method_ref) => {
                let slot = self.stack.len() - arg_count as usize - 1;
                self.stack[slot] = receiver;
                self.call_closure(method_ref, arg_count)
            }
            Kind::Class(class_ref) => self.call_class(class_ref, arg_count),
            Kind::Closure(closure_ref) => self.call_closure(closure_ref, arg_count),
            Kind::Native(function) => self.call_native(function, arg_count),
            Kind::Other => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn call_closure(&mut self, closure_ref: ObjRef, arg_count: u8) -> Result<(), RuntimeError> {
        let function_ref = self.heap.as_closure(closure_ref).function;
        let arity = self.heap.as_function(function_ref).arity;
        if arg_count != arity {
            return Err(self.runtime_error(format!("Expected {arity} arguments but got {arg_count}.")));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let slot_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame { closure: closure_ref, ip: 0, slot_base });
        Ok(())
    }

    fn call_class(&mut self, class_ref: ObjRef, arg_count: u8) -> Result<(), RuntimeError> {
        let instance_ref = self.alloc(ObjData::Instance(LoxInstance { class: class_ref, fields: Table::new() }));
        let slot = self.stack.len() - arg_count as usize - 1;
        self.stack[slot] = Value::obj(instance_ref);
        let init_ref = self.init_string;
        let init_hash = self.heap.as_string(init_ref).hash;
        let initializer = self.heap.as_class(class_ref).methods.get(init_ref, init_hash);
        match initializer {
            Some(value) => {
                let method_ref = value.as_obj().expect("method table values are closures");
                self.call_closure(method_ref, arg_count)
            }
            None => {
                if arg_count != 0 {
                    return Err(self.runtime_error(format!("Expected 0 arguments but got {arg_count}.")));
                }
                Ok(())
            }
        }
    }

    fn call_native(&mut self, function: NativeFn, arg_count: u8) -> Result<(), RuntimeError> {
        let slot = self.stack.len() - arg_count as usize - 1;
        let args: Vec<Value> = self.stack[slot + 1..].to_vec();
        let result = function(&self.heap, &args).map_err(|e| self.runtime_error(e.0))?;
        self.stack.truncate(slot);
        self.push(result);
        Ok(())
    }

    fn capture_upvalue(&mut self, slot_index: usize) -> ObjRef {
        for &ov in &self.open_upvalues {
            if let ObjData::Upvalue(Upvalue::Open(loc)) = self.heap.get(ov)
                && *loc == slot_index
            {
                return ov;
            }
        }
        let new_ref = self.alloc(ObjData::Upvalue(Upvalue::Open(slot_index)));
        let pos = self
            .open_upvalues
            .iter()
            .position(|&ov| matches!(self.heap.get(ov), ObjData::Upvalue(Upvalue::Open(loc)) if *loc < slot_index))
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(pos, new_ref);
        new_ref
    }

    fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(&ov) = self.open_upvalues.first() {
            let loc = match self.heap.get(ov) {
                ObjData::Upvalue(Upvalue::Open(l)) => *l,
                _ => unreachable!("open-upvalue list must only contain open upvalues"),
            };
            if loc < from_slot {
                break;
            }
            let value = self.stack[loc];
            if let ObjData::Upvalue(u) = self.heap.get_mut(ov) {
                *u = Upvalue::Closed(value);
            }
            self.open_upvalues.remove(0);
        }
    }

    fn upvalue_value(&self, upvalue_ref: ObjRef) -> Value {
        match self.heap.get(upvalue_ref) {
            ObjData::Upvalue(Upvalue::Open(slot)) => self.stack[*slot],
            ObjData::Upvalue(Upvalue::Closed(v)) => *v,
            _ => unreachable!("OP_GET_UPVALUE operand must reference an upvalue object"),
        }
    }

    fn set_upvalue_value(&mut self, upvalue_ref: ObjRef, value: Value) {
        let open_slot = match self.heap.get(upvalue_ref) {
            ObjData::Upvalue(Upvalue::Open(slot)) => Some(*slot),
            ObjData::Upvalue(Upvalue::Closed(_)) => None,
            _ => unreachable!("OP_SET_UPVALUE operand must reference an upvalue object"),
        };
        match open_slot {
            Some(slot) => self.stack[slot] = value,
            None => {
                if let ObjData::Upvalue(u) = self.heap.get_mut(upvalue_ref) {
                    *u = Upvalue::Closed(value);
                }
            }
        }
    }

    fn make_closure(&mut self, frame_idx: usize, function_ref: ObjRef) {
        let upvalue_count = self.heap.as_function(function_ref).upvalue_count;
        let mut upvalues = Vec::with_capacity(upvalue_count);
        for _ in 0..upvalue_count {
            let is_local = self.read_u8(frame_idx) != 0;
            let index = self.read_u8(frame_idx) as usize;
            if is_local {
                let base = self.frames[frame_idx].slot_base;
                upvalues.push(self.capture_upvalue(base + index));
            } else {
                let enclosing_closure = self.frames[frame_idx].closure;
                upvalues.push(self.heap.as_closure(enclosing_closure).upvalues[index]);
            }
        }
        let closure_ref = self.alloc(ObjData::Closure(LoxClosure { function: function_ref, upvalues }));
        self.push(Value::obj(closure_ref));
    }

    fn bind_method(&mut self, class_ref: ObjRef, name_ref: ObjRef) -> Result<(), RuntimeError> {
        let hash = self.heap.as_string(name_ref).hash;
        let method_value = self.heap.as_class(class_ref).methods.get(name_ref, hash);
        let Some(method_value) = method_value else {
            let msg = format!("Undefined property '{}'.", self.heap.as_string(name_ref).chars);
            return Err(self.runtime_error(msg));
        };
        let method_ref = method_value.as_obj().expect("method table values are closures");
        let receiver = self.peek(0);
        let bound_ref = self.alloc(ObjData::BoundMethod(LoxBoundMethod { receiver, method: method_ref }));
        self.pop();
        self.push(Value::obj(bound_ref));
        Ok(())
    }

    fn get_property(&mut self, name_ref: ObjRef) -> Result<(), RuntimeError> {
        let receiver = self.peek(0);
        let is_instance = receiver.as_obj().is_some_and(|r| matches!(self.heap.get(r), ObjData::Instance(_)));
        if !is_instance {
            return Err(self.runtime_error("Only instances have properties."));
        }
        let instance_ref = receiver.as_obj().expect("checked above");
        let hash = self.heap.as_string(name_ref).hash;
        let field = self.heap.as_instance(instance_ref).fields.get(name_ref, hash);
        if let Some(value) = field {
            self.pop();
            self.push(value);
            return Ok(());
        }
        let class_ref = self.heap.as_instance(instance_ref).class;
        self.bind_method(class_ref, name_ref)
    }

    fn set_property(&mut self, name_ref: ObjRef) -> Result<(), RuntimeError> {
        let value = self.peek(0);
        let receiver = self.peek(1);
        let is_instance = receiver.as_obj().is_some_and(|r| matches!(self.heap.get(r), ObjData::Instance(_)));
        if !is_instance {
            return Err(self.runtime_error("Only instances have fields."));
        }
        let instance_ref = receiver.as_obj().expect("checked above");
        let hash = self.heap.as_string(name_ref).hash;
        if let ObjData::Instance(i) = self.heap.get_mut(instance_ref) {
            i.fields.set(name_ref, hash, value);
        }
        self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }

    fn invoke_from_class(&mut self, class_ref: ObjRef, name_ref: ObjRef, arg_count: u8) -> Result<(), RuntimeError> {
        let hash = self.heap.as_string(name_ref).hash;
        let method_value = self.heap.as_class(class_ref).methods.get(name_ref, hash);
        let Some(method_value) = method_value else {
            let msg = format!("Undefined property '{}'.", self.heap.as_string(name_ref).chars);
            return Err(self.runtime_error(msg));
        };
        let method_ref = method_value.as_obj().expect("method table values are closures");
        self.call_closure(method_ref, arg_count)
    }

    fn invoke(&mut self, name_ref: ObjRef, arg_count: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(arg_count as usize);
        let is_instance = receiver.as_obj().is_some_and(|r| matches!(self.heap.get(r), ObjData::Instance(_)));
        if !is_instance {
            return Err(self.runtime_error("Only instances have methods."));
        }
        let instance_ref = receiver.as_obj().expect("checked above");
        let hash = self.heap.as_string(name_ref).hash;
        let field = self.heap.as_instance(instance_ref).fields.get(name_ref, hash);
        if let Some(value) = field {
            let slot = self.stack.len() - arg_count as usize - 1;
            self.stack[slot] = value;
            return self.call_value(value, arg_count);
        }
        let class_ref = self.heap.as_instance(instance_ref).class;
        self.invoke_from_class(class_ref, name_ref, arg_count)
    }

    fn get_super(&mut self, name_ref: ObjRef) -> Result<(), RuntimeError> {
        let superclass_value = self.pop();
        let superclass_ref = superclass_value.as_obj().expect("OP_GET_SUPER superclass must be a class object");
        self.bind_method(superclass_ref, name_ref)
    }

    fn invoke_super(&mut self, name_ref: ObjRef, arg_count: u8) -> Result<(), RuntimeError> {
        let superclass_value = self.pop();
        let superclass_ref = superclass_value.as_obj().expect("OP_INVOKE_SUPER superclass must be a class object");
        self.invoke_from_class(superclass_ref, name_ref, arg_count)
    }

    fn define_method(&mut self, name_ref: ObjRef) {
        let method_value = self.pop();
        let class_ref = self.peek(0).as_obj().expect("OP_METHOD target must be a class object");
        let hash = self.heap.as_string(name_ref).hash;
        if let ObjData::Class(c) = self.heap.get_mut(class_ref) {
            c.methods.set(name_ref, hash, method_value);
        }
    }

    fn binary_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let b = self.peek(0);
        let a = self.peek(1);
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.pop();
                self.pop();
                self.push(Value::bool_val(op(x, y)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    fn binary_numeric(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.peek(0);
        let a = self.peek(1);
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.pop();
                self.pop();
                self.push(Value::number(op(x, y)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        let b = self.peek(0);
        let a = self.peek(1);
        if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
            self.pop();
            self.pop();
            self.push(Value::number(x + y));
            return Ok(());
        }
        let both_strings = a
            .as_obj()
            .zip(b.as_obj())
            .is_some_and(|(ar, br)| matches!(self.heap.get(ar), ObjData::String(_)) && matches!(self.heap.get(br), ObjData::String(_)));
        if both_strings {
            let a_ref = a.as_obj().expect("checked above");
            let b_ref = b.as_obj().expect("checked above");
            let mut concatenated = self.heap.as_string(a_ref).chars.clone();
            concatenated.push_str(&self.heap.as_string(b_ref).chars);
            self.pop();
            self.pop();
            let result_ref = self.intern_string(&concatenated);
            self.push(Value::obj(result_ref));
            return Ok(());
        }
        Err(self.runtime_error("Operands must be two numbers or two strings."))
    }

    #[cfg(feature = "trace-execution")]
    fn trace_instruction(&self, frame_idx: usize) {
        if !self.diagnostics.trace_execution {
            return;
        }
        let frame = self.frames[frame_idx];
        let function_ref = self.heap.as_closure(frame.closure).function;
        let function = self.heap.as_function(function_ref);
        let stack_dump: Vec<String> = self.stack.iter().map(|v| format!("[ {} ]", self.heap.value_to_string(*v))).collect();
        let instr = crate::debug::disassemble_instruction(&self.heap, &function.chunk, frame.ip);
        tracing::trace!(stack = %stack_dump.join(""), "{instr}");
    }

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let frame_idx = self.frames.len() - 1;
            #[cfg(feature = "trace-execution")]
            self.trace_instruction(frame_idx);

            let op_byte = self.read_u8(frame_idx);
            let Some(op) = OpCode::from_byte(op_byte) else {
                return Err(self.runtime_error("Invalid instruction encountered."));
            };

            match op {
                OpCode::Constant => {
                    let v = self.read_constant(frame_idx);
                    self.push(v);
                }
                OpCode::Nil => self.push(Value::nil()),
                OpCode::True => self.push(Value::bool_val(true)),
                OpCode::False => self.push(Value::bool_val(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_u8(frame_idx) as usize;
                    let base = self.frames[frame_idx].slot_base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_u8(frame_idx) as usize;
                    let base = self.frames[frame_idx].slot_base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_u8(frame_idx) as usize;
                    let closure_ref = self.frames[frame_idx].closure;
                    let upvalue_ref = self.heap.as_closure(closure_ref).upvalues[slot];
                    let value = self.upvalue_value(upvalue_ref);
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_u8(frame_idx) as usize;
                    let closure_ref = self.frames[frame_idx].closure;
                    let upvalue_ref = self.heap.as_closure(closure_ref).upvalues[slot];
                    let value = self.peek(0);
                    self.set_upvalue_value(upvalue_ref, value);
                }
                OpCode::DefineGlobal => {
                    let name = self.read_constant(frame_idx);
                    let name_ref = name.as_obj().expect("global name must be a string constant");
                    let hash = self.heap.as_string(name_ref).hash;
                    let value = self.pop();
                    self.globals.set(name_ref, hash, value);
                }
                OpCode::GetGlobal => {
                    let name = self.read_constant(frame_idx);
                    let name_ref = name.as_obj().expect("global name must be a string constant");
                    let hash = self.heap.as_string(name_ref).hash;
                    match self.globals.get(name_ref, hash) {
                        Some(v) => self.push(v),
                        None => {
                            let msg = format!("Undefined variable '{}'.", self.heap.as_string(name_ref).chars);
                            return Err(self.runtime_error(msg));
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let name = self.read_constant(frame_idx);
                    let name_ref = name.as_obj().expect("global name must be a string constant");
                    let hash = self.heap.as_string(name_ref).hash;
                    let value = self.peek(0);
                    if !self.globals.set_existing(name_ref, hash, value) {
                        let msg = format!("Undefined variable '{}'.", self.heap.as_string(name_ref).chars);
                        return Err(self.runtime_error(msg));
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_constant(frame_idx);
                    let name_ref = name.as_obj().expect("property name must be a string constant");
                    self.get_property(name_ref)?;
                }
                OpCode::SetProperty => {
                    let name = self.read_constant(frame_idx);
                    let name_ref = name.as_obj().expect("property name must be a string constant");
                    self.set_property(name_ref)?;
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::bool_val(values_equal(a, b)));
                }
                OpCode::Greater => self.binary_compare(|a, b| a > b)?,
                OpCode::Less => self.binary_compare(|a, b| a < b)?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_numeric(|a, b| a - b)?,
                OpCode::Multiply => self.binary_numeric(|a, b| a * b)?,
                OpCode::Divide => self.binary_numeric(|a, b| a / b)?,
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::bool_val(is_falsey(v)));
                }
                OpCode::Negate => match self.peek(0).as_number() {
                    Some(n) => {
                        self.pop();
                        self.push(Value::number(-n));
                    }
                    None => return Err(self.runtime_error("Operand must be a number.")),
                },
                OpCode::Jump => {
                    let offset = self.read_u16(frame_idx);
                    self.frames[frame_idx].ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16(frame_idx);
                    if is_falsey(self.peek(0)) {
                        self.frames[frame_idx].ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16(frame_idx);
                    self.frames[frame_idx].ip -= offset as usize;
                }
                OpCode::Call => {
                    let arg_count = self.read_u8(frame_idx);
                    let callee = self.peek(arg_count as usize);
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Invoke => {
                    let name = self.read_constant(frame_idx);
                    let name_ref = name.as_obj().expect("method name must be a string constant");
                    let arg_count = self.read_u8(frame_idx);
                    self.invoke(name_ref, arg_count)?;
                }
                OpCode::Closure => {
                    let function_value = self.read_constant(frame_idx);
                    let function_ref = function_value.as_obj().expect("closure constant must be a function");
                    self.make_closure(frame_idx, function_ref);
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let base = self.frames[frame_idx].slot_base;
                    self.close_upvalues(base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.stack.clear();
                        return Ok(());
                    }
                    self.stack.truncate(base);
                    self.push(result);
                }
                OpCode::Class => {
                    let name_value = self.read_constant(frame_idx);
                    let name_ref = name_value.as_obj().expect("class name must be a string constant");
                    let class_ref = self.alloc(ObjData::Class(LoxClass { name: name_ref, methods: Table::new() }));
                    self.push(Value::obj(class_ref));
                }
                OpCode::Inherit => {
                    let subclass_value = self.peek(0);
                    let superclass_value = self.peek(1);
                    let is_class =
                        superclass_value.as_obj().is_some_and(|r| matches!(self.heap.get(r), ObjData::Class(_)));
                    if !is_class {
                        return Err(self.runtime_error("Superclass must be a class."));
                    }
                    let superclass_ref = superclass_value.as_obj().expect("checked above");
                    let subclass_ref = subclass_value.as_obj().expect("OP_INHERIT subclass must be a class object");
                    let super_methods = self.heap.as_class(superclass_ref).methods.clone();
                    if let ObjData::Class(c) = self.heap.get_mut(subclass_ref) {
                        super_methods.add_all(&mut c.methods);
                    }
                    self.pop();
                }
                OpCode::Method => {
                    let name_value = self.read_constant(frame_idx);
                    let name_ref = name_value.as_obj().expect("method name must be a string constant");
                    self.define_method(name_ref);
                }
                OpCode::GetSuper => {
                    let name_value = self.read_constant(frame_idx);
                    let name_ref = name_value.as_obj().expect("super member name must be a string constant");
                    self.get_super(name_ref)?;
                }
                OpCode::InvokeSuper => {
                    let name_value = self.read_constant(frame_idx);
                    let name_ref = name_value.as_obj().expect("super member name must be a string constant");
                    let arg_count = self.read_u8(frame_idx);
                    self.invoke_super(name_ref, arg_count)?;
                }
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn intern_into(heap: &mut Heap, strings: &mut Table, s: &str) -> ObjRef {
    let hash = hash_str(s);
    if let Some(existing) = strings.find_string(heap, s, hash) {
        return existing;
    }
    let obj_ref = heap.alloc(ObjData::String(LoxString { chars: s.to_string(), hash }));
    strings.set(obj_ref, hash, Value::nil());
    obj_ref
}
