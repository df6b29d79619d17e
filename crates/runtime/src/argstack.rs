//! The process-wide argument stack: the register file between functions.
//! Callers push arguments then the continuation; callees pop them.
//! Bounded at ~512 slots.

use crate::heap::{Heap, HeapObj, ScmValue, Tag};
use schemec_core::{RuntimeError, RuntimeErrorKind};

pub const ARG_STACK_CAPACITY: usize = 512;

pub struct ArgStack {
    slots: Vec<ScmValue>,
}

impl Default for ArgStack {
    fn default() -> Self {
        Self { slots: Vec::with_capacity(ARG_STACK_CAPACITY) }
    }
}

impl ArgStack {
    pub fn push(&mut self, v: ScmValue) -> Result<(), RuntimeError> {
        if self.slots.len() >= ARG_STACK_CAPACITY {
            return Err(RuntimeError::new(
                RuntimeErrorKind::AllocationFailure,
                "push_arg",
                "argument stack overflow",
            ));
        }
        self.slots.push(v);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<ScmValue> {
        self.slots.pop()
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Discard every slot above `depth`. Used to unwind the argument stack
    /// when an escape continuation fires: invoking the captured
    /// continuation abandons every frame pushed since the `call/cc` call,
    /// exactly the slots above the depth it recorded.
    pub fn truncate(&mut self, depth: usize) {
        self.slots.truncate(depth);
    }

    pub fn as_slice_mut(&mut self) -> &mut [ScmValue] {
        &mut self.slots
    }

    /// `chk_args(req, rest?)` — verify the number of pushed arguments
    /// against a procedure's arity.
    pub fn chk_args(&self, req: usize, rest: bool) -> Result<(), RuntimeError> {
        let got = self.slots.len();
        let ok = if rest { got >= req } else { got == req };
        if ok {
            Ok(())
        } else {
            Err(RuntimeError::new(
                RuntimeErrorKind::Arity,
                "chk_args",
                format!(
                    "expected {}{} argument(s), got {}",
                    req,
                    if rest { " or more" } else { "" },
                    got
                ),
            ))
        }
    }

    /// `cons_rest()` — consume all remaining pushed arguments into a
    /// proper list, used when the callee has a rest parameter. Pops in
    /// reverse order so the result preserves call-site left-to-right order.
    pub fn cons_rest(&mut self, req: usize, heap: &mut Heap) -> ScmValue {
        let rest_count = self.slots.len().saturating_sub(req);
        let mut items = self.slots.split_off(self.slots.len() - rest_count);
        let mut acc = ScmValue::NULL;
        while let Some(v) = items.pop() {
            acc = heap.alloc(HeapObj::Pair(v, acc));
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chk_args_exact_arity() {
        let mut s = ArgStack::default();
        s.push(ScmValue::int(1)).unwrap();
        s.push(ScmValue::int(2)).unwrap();
        assert!(s.chk_args(2, false).is_ok());
        assert!(s.chk_args(3, false).is_err());
    }

    #[test]
    fn chk_args_rest_allows_more() {
        let mut s = ArgStack::default();
        for i in 0..4 {
            s.push(ScmValue::int(i)).unwrap();
        }
        assert!(s.chk_args(2, true).is_ok());
        assert!(s.chk_args(5, true).is_err());
    }

    #[test]
    fn cons_rest_builds_list_in_call_order() {
        let mut heap = Heap::default();
        let mut s = ArgStack::default();
        for i in 1..=4 {
            s.push(ScmValue::int(i)).unwrap();
        }
        let rest = s.cons_rest(2, &mut heap);
        assert_eq!(s.depth(), 2);
        let HeapObj::Pair(a, tail) = heap.get(rest.heap_ref().unwrap()).clone() else {
            panic!("expected pair")
        };
        assert_eq!(a.as_int(), Some(3));
        let HeapObj::Pair(b, nil) = heap.get(tail.heap_ref().unwrap()).clone() else {
            panic!("expected pair")
        };
        assert_eq!(b.as_int(), Some(4));
        assert_eq!(nil.tag, Tag::Null);
    }

    #[test]
    fn overflow_is_rejected() {
        let mut s = ArgStack::default();
        for _ in 0..ARG_STACK_CAPACITY {
            s.push(ScmValue::VOID).unwrap();
        }
        assert!(s.push(ScmValue::VOID).is_err());
    }
}

// ---------------------------------------------------------------------
// C ABI: push_arg, pop_arg, push_ref
// ---------------------------------------------------------------------

use std::cell::RefCell;

thread_local! {
    static ARGS: RefCell<ArgStack> = RefCell::new(ArgStack::default());
}

#[unsafe(no_mangle)]
pub extern "C" fn push_arg(v: ScmValue) -> bool {
    ARGS.with(|a| a.borrow_mut().push(v).is_ok())
}

#[unsafe(no_mangle)]
pub extern "C" fn pop_arg() -> ScmValue {
    ARGS.with(|a| a.borrow_mut().pop().unwrap_or(ScmValue::VOID))
}

/// `push_ref` — push a value that must additionally be treated as a GC
/// root until explicitly popped (identical representation to `push_arg`
/// here since every slot on this stack is already a GC root).
#[unsafe(no_mangle)]
pub extern "C" fn push_ref(v: ScmValue) -> bool {
    push_arg(v)
}

/// Give other modules in this crate access to the thread-local argument
/// stack without exposing the `thread_local!` cell itself.
pub(crate) fn with_args<R>(f: impl FnOnce(&mut ArgStack) -> R) -> R {
    ARGS.with(|a| f(&mut a.borrow_mut()))
}

/// `chk_args` — a `kproc` prologue calls this before popping its
/// parameters; a mismatch is a fatal arity error.
#[unsafe(no_mangle)]
pub extern "C" fn scm_chk_args(req: usize, rest: bool) {
    if let Err(e) = ARGS.with(|a| a.borrow().chk_args(req, rest)) {
        crate::error::fatal(&e);
    }
}

/// `cons_rest` — collects every pushed argument beyond `req` into a
/// proper list, for a callee with a rest parameter.
#[unsafe(no_mangle)]
pub extern "C" fn scm_cons_rest(req: usize) -> ScmValue {
    ARGS.with(|a| crate::heap::with_heap(|h| a.borrow_mut().cons_rest(req, h)))
}

/// `scm_gc_safepoint` — the collection point every emitted continuation's
/// prologue calls before popping its arguments; collection only runs at
/// continuation entry. Unlike `scm_chk_heap`, which takes an explicit
/// root array for callers holding values outside the argument stack, the
/// roots here are exactly whatever is currently pushed: nothing else is
/// live across a continuation boundary, so the emitted C never needs to
/// hand the collector a pointer of its own.
#[unsafe(no_mangle)]
pub extern "C" fn scm_gc_safepoint() {
    ARGS.with(|a| {
        crate::heap::with_heap(|h| {
            if h.should_collect() {
                let mut a = a.borrow_mut();
                let mut refs: Vec<&mut ScmValue> = a.as_slice_mut().iter_mut().collect();
                h.collect(&mut refs);
            }
        })
    });
}
