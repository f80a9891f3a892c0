// SPDX-License-Identifier: GPL-3.0-or-later

//! The heap object model and the slab-allocated [`Heap`] that owns it.
//!
//! The reference implementation threads every heap object onto an
//! intrusive `next` pointer list owned by the VM, and frees objects by
//! unlinking and `free`-ing them during sweep. Rust makes that pattern
//! awkward without `unsafe`: instead, every object lives in a slot of a
//! `Vec`, addressed by its index (an [`ObjRef`]). Sweep simply clears the
//! slots of unmarked objects and pushes their index onto a free list for
//! reuse, which gives the same "reclaim unreachable objects" behaviour
//! without raw pointers.

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;
use std::fmt;

/// A reference to a heap-allocated object. Two `ObjRef`s are equal if and
/// only if they name the same slot, which — because of string interning —
/// is exactly the identity-equality the language specifies for objects.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjRef(pub(crate) usize);

/// A native function's implementation. Natives run synchronously on the
/// same thread and must not call back into the interpreter. They take a
/// `&Heap` (read-only) so a native like `print` can render object
/// arguments (strings, instances, ...) without the VM needing a special
/// case outside the generic call-dispatch path.
pub type NativeFn = fn(&Heap, &[Value]) -> Result<Value, NativeError>;

/// The error a native function raises; plumbed into [`crate::error::RuntimeError`]
/// by the VM at the call site so natives don't need to depend on the VM.
#[derive(Debug, Clone)]
pub struct NativeError(pub String);

pub struct LoxString {
    pub chars: String,
    pub hash: u32,
}

pub struct LoxFunction {
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: Option<ObjRef>,
}

pub struct LoxNative {
    pub name: &'static str,
    pub function: NativeFn,
}

/// An upvalue is "open" while it aliases a live stack slot and "closed"
/// once that slot has been popped and the value copied in.
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

pub struct LoxClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

pub struct LoxClass {
    pub name: ObjRef,
    pub methods: Table,
}

pub struct LoxInstance {
    pub class: ObjRef,
    pub fields: Table,
}

pub struct LoxBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

pub enum ObjData {
    String(LoxString),
    Function(LoxFunction),
    Native(LoxNative),
    Upvalue(Upvalue),
    Closure(LoxClosure),
    Class(LoxClass),
    Instance(LoxInstance),
    BoundMethod(LoxBoundMethod),
}

impl ObjData {
    /// A coarse size estimate charged to `bytes_allocated`. The reference
    /// tracks exact byte deltas through its custom allocator; a rough
    /// per-variant estimate is enough to drive the same heap-growth
    /// policy without reproducing a C allocator's bookkeeping.
    fn approx_size(&self) -> usize {
        match self {
            ObjData::String(s) => size_of::<LoxString>() + s.chars.len(),
            ObjData::Function(f) => size_of::<LoxFunction>() + f.chunk.approx_size(),
            ObjData::Native(_) => size_of::<LoxNative>(),
            ObjData::Upvalue(_) => size_of::<Upvalue>(),
            ObjData::Closure(c) => size_of::<LoxClosure>() + c.upvalues.len() * size_of::<ObjRef>(),
            ObjData::Class(c) => size_of::<LoxClass>() + c.methods.approx_size(),
            ObjData::Instance(i) => size_of::<LoxInstance>() + i.fields.approx_size(),
            ObjData::BoundMethod(_) => size_of::<LoxBoundMethod>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ObjData::String(_) => "string",
            ObjData::Function(_) => "function",
            ObjData::Native(_) => "native function",
            ObjData::Upvalue(_) => "upvalue",
            ObjData::Closure(_) => "closure",
            ObjData::Class(_) => "class",
            ObjData::Instance(_) => "instance",
            ObjData::BoundMethod(_) => "bound method",
        }
    }
}

struct Slot {
    marked: bool,
    data: ObjData,
}

/// Owns every heap-allocated object the VM and compiler create.
///
/// A `Heap` is never a global: the `Vm` owns one, and the compiler
/// borrows it only for the duration of a single `compile` call (see
/// `SPEC_FULL.md` §9, "Global VM state").
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            bytes_allocated: 0,
            next_gc: crate::limits::GC_HEAP_MIN_BYTES,
        }
    }

    /// Allocate a new object. The caller must pin the resulting `ObjRef`
    /// (push it on the VM's value stack, or otherwise make it reachable
    /// from a known root) before performing any further allocation that
    /// could trigger a collection.
    pub fn alloc(&mut self, data: ObjData) -> ObjRef {
        self.bytes_allocated += data.approx_size();
        let slot = Slot { marked: false, data };
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(slot);
            ObjRef(index)
        } else {
            self.slots.push(Some(slot));
            ObjRef(self.slots.len() - 1)
        }
    }

    pub fn get(&self, r: ObjRef) -> &ObjData {
        &self.slots[r.0].as_ref().expect("dangling ObjRef").data
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut ObjData {
        &mut self.slots[r.0].as_mut().expect("dangling ObjRef").data
    }

    pub fn is_marked(&self, r: ObjRef) -> bool {
        self.slots[r.0].as_ref().expect("dangling ObjRef").marked
    }

    /// Transitions `r` from white to gray (if not already marked).
    /// Returns `true` if this call actually marked the object (i.e. the
    /// caller should push it onto the gray stack for blackening).
    pub fn mark(&mut self, r: ObjRef) -> bool {
        let slot = self.slots[r.0].as_mut().expect("dangling ObjRef");
        if slot.marked {
            false
        } else {
            slot.marked = true;
            true
        }
    }

    /// Every live object index, for the collector's sweep phase.
    pub fn live_refs(&self) -> Vec<ObjRef> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| ObjRef(i)))
            .collect()
    }

    pub fn unmark(&mut self, r: ObjRef) {
        self.slots[r.0].as_mut().expect("dangling ObjRef").marked = false;
    }

    pub fn free(&mut self, r: ObjRef) {
        if let Some(slot) = self.slots[r.0].take() {
            self.bytes_allocated = self.bytes_allocated.saturating_sub(slot.data.approx_size());
        }
        self.free.push(r.0);
    }

    pub fn as_string(&self, r: ObjRef) -> &LoxString {
        match self.get(r) {
            ObjData::String(s) => s,
            other => panic!("expected string object, found {}", other.type_name()),
        }
    }

    pub fn as_function(&self, r: ObjRef) -> &LoxFunction {
        match self.get(r) {
            ObjData::Function(f) => f,
            other => panic!("expected function object, found {}", other.type_name()),
        }
    }

    pub fn as_closure(&self, r: ObjRef) -> &LoxClosure {
        match self.get(r) {
            ObjData::Closure(c) => c,
            other => panic!("expected closure object, found {}", other.type_name()),
        }
    }

    pub fn as_class(&self, r: ObjRef) -> &LoxClass {
        match self.get(r) {
            ObjData::Class(c) => c,
            other => panic!("expected class object, found {}", other.type_name()),
        }
    }

    pub fn as_instance(&self, r: ObjRef) -> &LoxInstance {
        match self.get(r) {
            ObjData::Instance(i) => i,
            other => panic!("expected instance object, found {}", other.type_name()),
        }
    }

    /// Render a value's display form. Needs `self` because printing an
    /// object (a string, a class, ...) requires resolving its `ObjRef`.
    pub fn display_value(&self, value: Value, out: &mut impl fmt::Write) -> fmt::Result {
        if let Some(n) = value.as_number() {
            if n == n.trunc() && n.is_finite() && n.abs() < 1e15 {
                write!(out, "{n:.0}")
            } else {
                write!(out, "{n}")
            }
        } else if let Some(b) = value.as_bool() {
            write!(out, "{b}")
        } else if value.is_nil() {
            write!(out, "nil")
        } else {
            let r = value.as_obj().expect("value must be number, bool, nil, or object");
            self.display_obj(r, out)
        }
    }

    fn display_obj(&self, r: ObjRef, out: &mut impl fmt::Write) -> fmt::Result {
        match self.get(r) {
            ObjData::String(s) => write!(out, "{}", s.chars),
            ObjData::Function(f) => match f.name {
                Some(name) => write!(out, "<fn {}>", self.as_string(name).chars),
                None => write!(out, "<script>"),
            },
            ObjData::Native(n) => write!(out, "<native fn {}>", n.name),
            ObjData::Upvalue(_) => write!(out, "upvalue"),
            ObjData::Closure(c) => self.display_obj(c.function, out),
            ObjData::Class(c) => write!(out, "{}", self.as_string(c.name).chars),
            ObjData::Instance(i) => {
                write!(out, "{} instance", self.as_string(self.as_class(i.class).name).chars)
            }
            ObjData::BoundMethod(b) => {
                let closure = self.as_closure(b.method);
                self.display_obj(closure.function, out)
            }
        }
    }

    pub fn value_to_string(&self, value: Value) -> String {
        let mut s = String::new();
        self.display_value(value, &mut s).expect("writing to a String cannot fail");
        s
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a, seeded exactly as the reference seeds it.
pub fn hash_str(bytes: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in bytes.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
