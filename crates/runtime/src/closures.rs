//! Closures, boxes and records.
//!
//! A closure is `{code_ptr, free_vars[]}`; a box is a one-cell mutable
//! reference introduced by the closure converter for shared/recursive
//! bindings. Environments are heap-allocated `HeapObj::Closure`/
//! `HeapObj::BoxCell` entries so the same copying GC in `heap.rs` tracks
//! them, rather than a raw `*mut [Value]` buffer.

use crate::heap::{Heap, HeapObj, ScmValue, Tag};
use schemec_core::{RuntimeError, RuntimeErrorKind};

pub fn make_closure(heap: &mut Heap, code_id: u32, free_vars: Vec<ScmValue>) -> ScmValue {
    heap.alloc(HeapObj::Closure { code_id, free_vars })
}

/// `v` is usually a `HeapObj::Closure` or an immediate `Tag::Function`
/// (no captures). It may also be a closure-converter-built record whose
/// field 0 holds the reified code pointer (the shared-closure-group
/// layout): a singleton group's record has its code cell at field 0, so
/// recursing through `fields[0]` recovers it the same way. A record
/// group member bound at a nonzero offset (only reachable from a
/// mutually-recursive `fix` of bare lambdas, which this compiler's
/// translator never emits) is not resolvable from the value alone and
/// falls through to the type-error arm.
pub fn closure_code_id(heap: &Heap, v: ScmValue) -> Result<u32, RuntimeError> {
    match v.heap_ref().map(|r| heap.get(r)) {
        Some(HeapObj::Closure { code_id, .. }) => Ok(*code_id),
        Some(HeapObj::Record { fields, .. }) => match fields.first() {
            Some(&field0) => closure_code_id(heap, field0),
            None => Err(type_error("closure-code", v)),
        },
        _ if v.tag == Tag::Function => Ok(v.bits as u32),
        _ => Err(type_error("closure-code", v)),
    }
}

pub fn closure_free_var(heap: &Heap, v: ScmValue, index: usize) -> Result<ScmValue, RuntimeError> {
    match v.heap_ref().map(|r| heap.get(r)) {
        Some(HeapObj::Closure { free_vars, .. }) => free_vars
            .get(index)
            .copied()
            .ok_or_else(|| bounds_error("closure-free-var", index, free_vars.len())),
        _ => Err(type_error("closure-free-var", v)),
    }
}

/// `make_box` — allocate a one-cell mutable reference.
pub fn make_box(heap: &mut Heap, init: ScmValue) -> ScmValue {
    heap.alloc(HeapObj::BoxCell(init))
}

/// `box_ref`.
pub fn box_ref(heap: &Heap, v: ScmValue) -> Result<ScmValue, RuntimeError> {
    match v.heap_ref().map(|r| heap.get(r)) {
        Some(HeapObj::BoxCell(inner)) => Ok(*inner),
        _ => Err(type_error("unbox", v)),
    }
}

/// `box_set`.
pub fn box_set(heap: &mut Heap, b: ScmValue, val: ScmValue) -> Result<(), RuntimeError> {
    match b.heap_ref() {
        Some(r) => match heap.get_mut(r) {
            HeapObj::BoxCell(slot) => {
                *slot = val;
                Ok(())
            }
            _ => Err(type_error("box-set!", b)),
        },
        None => Err(type_error("box-set!", b)),
    }
}

/// `make_record(nfields)` followed by field writes, matching the CPS
/// IR's `make_record`/`record`/`select`/`record_set` expression family.
pub fn make_record(heap: &mut Heap, nfields: usize, meta: ScmValue) -> ScmValue {
    heap.alloc(HeapObj::Record { fields: vec![ScmValue::VOID; nfields], meta })
}

pub fn record_ref(heap: &Heap, r: ScmValue, field: usize) -> Result<ScmValue, RuntimeError> {
    match r.heap_ref().map(|h| heap.get(h)) {
        Some(HeapObj::Record { fields, .. }) => fields
            .get(field)
            .copied()
            .ok_or_else(|| bounds_error("record-ref", field, fields.len())),
        _ => Err(type_error("record-ref", r)),
    }
}

pub fn record_set(heap: &mut Heap, r: ScmValue, field: usize, val: ScmValue) -> Result<(), RuntimeError> {
    match r.heap_ref() {
        Some(h) => match heap.get_mut(h) {
            HeapObj::Record { fields, .. } => {
                let slot = fields
                    .get_mut(field)
                    .ok_or_else(|| bounds_error("record-set!", field, fields.len()))?;
                *slot = val;
                Ok(())
            }
            _ => Err(type_error("record-set!", r)),
        },
        None => Err(type_error("record-set!", r)),
    }
}

pub fn record_meta_ref(heap: &Heap, r: ScmValue) -> Result<ScmValue, RuntimeError> {
    match r.heap_ref().map(|h| heap.get(h)) {
        Some(HeapObj::Record { meta, .. }) => Ok(*meta),
        _ => Err(type_error("record-meta-ref", r)),
    }
}

pub fn record_meta_set(heap: &mut Heap, r: ScmValue, new_meta: ScmValue) -> Result<(), RuntimeError> {
    match r.heap_ref() {
        Some(h) => match heap.get_mut(h) {
            HeapObj::Record { meta, .. } => {
                *meta = new_meta;
                Ok(())
            }
            _ => Err(type_error("record-meta-set!", r)),
        },
        None => Err(type_error("record-meta-set!", r)),
    }
}

fn type_error(function: &str, v: ScmValue) -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::Type, function, format!("unexpected tag {:?}", v.tag))
}

fn bounds_error(function: &str, index: usize, len: usize) -> RuntimeError {
    RuntimeError::new(
        RuntimeErrorKind::Bounds,
        function,
        format!("index {index} out of range for length {len}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_round_trips_free_vars() {
        let mut heap = Heap::default();
        let c = make_closure(&mut heap, 7, vec![ScmValue::int(10), ScmValue::int(20)]);
        assert_eq!(closure_code_id(&heap, c).unwrap(), 7);
        assert_eq!(closure_free_var(&heap, c, 1).unwrap().as_int(), Some(20));
    }

    #[test]
    fn closure_code_id_sees_through_converter_record() {
        let mut heap = Heap::default();
        let r = make_record(&mut heap, 2, ScmValue::VOID);
        record_set(&mut heap, r, 0, ScmValue::function(42)).unwrap();
        record_set(&mut heap, r, 1, ScmValue::int(99)).unwrap();
        assert_eq!(closure_code_id(&heap, r).unwrap(), 42);
    }

    #[test]
    fn box_set_then_ref() {
        let mut heap = Heap::default();
        let b = make_box(&mut heap, ScmValue::int(1));
        box_set(&mut heap, b, ScmValue::int(99)).unwrap();
        assert_eq!(box_ref(&heap, b).unwrap().as_int(), Some(99));
    }

    #[test]
    fn record_fields_and_meta() {
        let mut heap = Heap::default();
        let r = make_record(&mut heap, 2, ScmValue::symbol(0));
        record_set(&mut heap, r, 0, ScmValue::int(5)).unwrap();
        record_set(&mut heap, r, 1, ScmValue::int(6)).unwrap();
        assert_eq!(record_ref(&heap, r, 0).unwrap().as_int(), Some(5));
        assert_eq!(record_meta_ref(&heap, r).unwrap(), ScmValue::symbol(0));
        assert!(record_ref(&heap, r, 2).is_err());
    }
}

// ---------------------------------------------------------------------
// C ABI: make_closure, make_box, box_set/box_ref
// ---------------------------------------------------------------------

/// `make_closure` — allocate a closure from `code_id` and a caller-owned
/// array of its free variables.
///
/// # Safety
/// `free_vars` must point to `count` valid, initialized `ScmValue`s (or
/// be null when `count` is 0).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scm_make_closure(code_id: u32, free_vars: *const ScmValue, count: usize) -> ScmValue {
    let vars = if free_vars.is_null() {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(free_vars, count) }.to_vec()
    };
    crate::heap::with_heap(|heap| make_closure(heap, code_id, vars))
}

#[unsafe(no_mangle)]
pub extern "C" fn scm_make_box(init: ScmValue) -> ScmValue {
    crate::heap::with_heap(|heap| make_box(heap, init))
}

#[unsafe(no_mangle)]
pub extern "C" fn scm_box_ref(b: ScmValue) -> ScmValue {
    match crate::heap::with_heap(|heap| box_ref(heap, b)) {
        Ok(v) => v,
        Err(e) => crate::error::fatal(&e),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn scm_box_set(b: ScmValue, val: ScmValue) {
    if let Err(e) = crate::heap::with_heap(|heap| box_set(heap, b, val)) {
        crate::error::fatal(&e);
    }
}

/// `scm_make_record` — allocate an all-void record of `nfields` fields,
/// matching `Expr::MakeRecord`/`Expr::Record`; the emitter has no notion
/// of record metadata, so this always tags the record void.
#[unsafe(no_mangle)]
pub extern "C" fn scm_make_record(nfields: usize) -> ScmValue {
    crate::heap::with_heap(|heap| make_record(heap, nfields, ScmValue::VOID))
}

#[unsafe(no_mangle)]
pub extern "C" fn scm_record_ref(r: ScmValue, field: usize) -> ScmValue {
    crate::heap::with_heap(|heap| record_ref(heap, r, field)).unwrap_or_else(|e| crate::error::fatal(&e))
}

#[unsafe(no_mangle)]
pub extern "C" fn scm_record_set(r: ScmValue, field: usize, val: ScmValue) {
    if let Err(e) = crate::heap::with_heap(|heap| record_set(heap, r, field, val)) {
        crate::error::fatal(&e);
    }
}

/// `scm_closure_free_var` — read free variable `index` out of `self`.
/// Real emitted C accesses its closure's free-variable array as a plain
/// struct field (`self->free_vars[i]`); this function exists for callers
/// (tests, or any host code not itself emitted by the closure converter)
/// that only have an opaque `ScmValue` handle.
#[unsafe(no_mangle)]
pub extern "C" fn scm_closure_free_var(closure: ScmValue, index: usize) -> ScmValue {
    crate::heap::with_heap(|heap| closure_free_var(heap, closure, index)).unwrap_or_else(|e| crate::error::fatal(&e))
}
