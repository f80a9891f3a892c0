// SPDX-License-Identifier: GPL-3.0-or-later

//! Mark-and-sweep primitives, generic over whatever is marking roots.
//!
//! [`Vm::collect_garbage`](crate::vm::Vm::collect_garbage) owns the
//! orchestration (it knows the stack, frames, globals, and the
//! compiler's root list); this module only knows how to mark a value,
//! blacken an object, and sweep the heap once marking is done.

use crate::object::{Heap, ObjData, ObjRef, Upvalue};
use crate::table::Table;
use crate::value::Value;

/// Marks `r` gray (if it was white) and pushes it onto the worklist.
pub fn mark_object(heap: &mut Heap, gray: &mut Vec<ObjRef>, r: ObjRef) {
    if heap.mark(r) {
        gray.push(r);
    }
}

pub fn mark_value(heap: &mut Heap, gray: &mut Vec<ObjRef>, value: Value) {
    if let Some(r) = value.as_obj() {
        mark_object(heap, gray, r);
    }
}

pub fn mark_table(heap: &mut Heap, gray: &mut Vec<ObjRef>, table: &Table) {
    let entries: Vec<(ObjRef, Value)> = table.keys_and_values().collect();
    for (key, value) in entries {
        mark_object(heap, gray, key);
        mark_value(heap, gray, value);
    }
}

/// What an object directly references, extracted up front so blackening
/// doesn't need to hold a borrow of `heap` while marking other objects
/// through it. Mirrors the reference's `blacken_object` switch exactly
/// (`SPEC_FULL.md` §4.7).
enum Ref {
    Obj(ObjRef),
    Val(Value),
}

fn direct_refs(data: &ObjData) -> Vec<Ref> {
    match data {
        ObjData::String(_) | ObjData::Native(_) => Vec::new(),
        ObjData::Function(f) => {
            let mut refs = Vec::new();
            if let Some(name) = f.name {
                refs.push(Ref::Obj(name));
            }
            refs.extend(f.chunk.constants.iter().map(|v| Ref::Val(*v)));
            refs
        }
        ObjData::Upvalue(Upvalue::Closed(v)) => vec![Ref::Val(*v)],
        ObjData::Upvalue(Upvalue::Open(_)) => Vec::new(),
        ObjData::Closure(c) => {
            let mut refs = vec![Ref::Obj(c.function)];
            refs.extend(c.upvalues.iter().map(|u| Ref::Obj(*u)));
            refs
        }
        ObjData::Class(c) => {
            let mut refs = vec![Ref::Obj(c.name)];
            for (key, value) in c.methods.keys_and_values() {
                refs.push(Ref::Obj(key));
                refs.push(Ref::Val(value));
            }
            refs
        }
        ObjData::Instance(i) => {
            let mut refs = vec![Ref::Obj(i.class)];
            for (key, value) in i.fields.keys_and_values() {
                refs.push(Ref::Obj(key));
                refs.push(Ref::Val(value));
            }
            refs
        }
        ObjData::BoundMethod(b) => vec![Ref::Val(b.receiver), Ref::Obj(b.method)],
    }
}

fn blacken_object(heap: &mut Heap, gray: &mut Vec<ObjRef>, r: ObjRef) {
    let refs = direct_refs(heap.get(r));
    for reference in refs {
        match reference {
            Ref::Obj(o) => mark_object(heap, gray, o),
            Ref::Val(v) => mark_value(heap, gray, v),
        }
    }
}

pub fn trace_references(heap: &mut Heap, gray: &mut Vec<ObjRef>) {
    while let Some(r) = gray.pop() {
        blacken_object(heap, gray, r);
    }
}

/// Unlinks and frees every unmarked object; clears the mark bit on
/// survivors so the next collection starts from white again.
pub fn sweep(heap: &mut Heap) {
    for r in heap.live_refs() {
        if heap.is_marked(r) {
            heap.unmark(r);
        } else {
            heap.free(r);
        }
    }
}
