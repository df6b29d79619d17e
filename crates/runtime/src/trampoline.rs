//! The trampoline: every tail call returns control to one driving loop
//! instead of recursing on the native call stack, so arbitrarily deep
//! Scheme tail recursion runs in bounded C stack space.
//!
//! The dispatch loop reads a registry of runnable units by id rather
//! than following raw function pointers directly: `CODE_TABLE:
//! Vec<Option<ContCode>>`, indexed by the `code_id` baked into each
//! closure/function value by the C emitter. This runtime is strictly
//! single-threaded; there is no concurrent scheduling.
//!
//! A continuation's body ends, in emitted C, with `return _tail_call(target);`
//! — `_tail_call` does no looping itself, it just hands the next closure
//! back up to [`run`]'s `while` loop, which is the actual trampoline.

use std::cell::RefCell;

use crate::closures::closure_code_id;
use crate::heap::{HeapObj, ScmValue};
use schemec_core::{RuntimeError, RuntimeErrorKind};

pub type ContCode = extern "C" fn(ScmValue) -> ScmValue;

/// Sentinel code id meaning "program has halted"; `run` stops the loop
/// when the current continuation resolves to this id instead of calling
/// into the (nonexistent) code table entry.
pub const HALT_CODE: u32 = u32::MAX;

thread_local! {
    static CODE_TABLE: RefCell<Vec<Option<ContCode>>> = const { RefCell::new(Vec::new()) };
    static RESULT: RefCell<ScmValue> = const { RefCell::new(ScmValue::VOID) };
}

/// Register a continuation's code pointer under the id the closure
/// converter assigned it. Called once per label by the emitted C
/// program's static initializer (or directly by tests).
#[unsafe(no_mangle)]
pub extern "C" fn scm_register_code(code_id: u32, code: ContCode) {
    CODE_TABLE.with(|t| {
        let mut t = t.borrow_mut();
        if t.len() <= code_id as usize {
            t.resize(code_id as usize + 1, None);
        }
        t[code_id as usize] = Some(code);
    });
}

/// Store the final value a program halts with, for `scm_trampoline`'s
/// caller (typically `main`) to retrieve after the loop stops.
#[unsafe(no_mangle)]
pub extern "C" fn scm_set_result(v: ScmValue) {
    RESULT.with(|r| *r.borrow_mut() = v);
}

fn lookup(code_id: u32) -> Result<ContCode, RuntimeError> {
    CODE_TABLE.with(|t| {
        t.borrow()
            .get(code_id as usize)
            .copied()
            .flatten()
            .ok_or_else(|| {
                RuntimeError::new(
                    RuntimeErrorKind::UndefinedReference,
                    "trampoline",
                    format!("no code registered for id {code_id}"),
                )
            })
    })
}

/// The trampoline proper: a top-level `while (alive) cc = cc->code(cc)`
/// loop. Drives `entry` to completion and returns the halt value.
/// Consults the process's single heap the same way every continuation
/// body does (through the thread-local singleton), since a `ContCode`
/// has no heap handle of its own to pass along.
pub fn run(entry: ScmValue) -> Result<ScmValue, RuntimeError> {
    let mut cc = entry;
    loop {
        if let Some(resumed) = try_resume_escape(cc) {
            cc = resumed;
            continue;
        }
        let code_id = crate::heap::with_heap(|heap| closure_code_id(heap, cc))?;
        if code_id == HALT_CODE {
            return Ok(RESULT.with(|r| *r.borrow()));
        }
        let code = lookup(code_id)?;
        cc = code(cc);
    }
}

/// Detects `call/cc`'s escape object (`prim_call_cc` in `primitives.rs`):
/// a heap closure tagged with [`HALT_CODE`] carrying `[depth, k]` as its
/// free variables, rather than a genuine program halt (which is always
/// the immediate value [`scm_halt_value`] returns, never heap-allocated).
/// Invoking it is an ordinary call from the emitted program's point of
/// view: the caller pushes the escape value itself (the implicit `clos`
/// argument every call prepends), then the supplied value, then the
/// trailing continuation, in that left-to-right order — so on top of the
/// stack sits the (unused) trailing continuation, then the delivered
/// value, then the escape value's own duplicate. Unwinding the stack back
/// to the recorded `depth` and resuming at `k` is what "truncates the
/// argument stack and pushes the supplied value" means.
fn try_resume_escape(cc: ScmValue) -> Option<ScmValue> {
    let r = cc.heap_ref()?;
    let (depth, resume) = crate::heap::with_heap(|heap| match heap.get(r) {
        HeapObj::Closure { code_id, free_vars } if *code_id == HALT_CODE && free_vars.len() == 2 => {
            free_vars[0].as_int().map(|d| (d as usize, free_vars[1]))
        }
        _ => None,
    })?;
    crate::argstack::with_args(|a| {
        a.pop(); // trailing continuation, unused
        let value = a.pop().unwrap_or(ScmValue::VOID);
        a.pop(); // escape value's own duplicate (clos argument)
        a.truncate(depth);
        let _ = a.push(value);
    });
    Some(resume)
}

/// `scm_trampoline` — the program entry point's ABI hook: drive `entry`
/// to completion, terminating fatally if the program raises past the
/// installed handler.
#[unsafe(no_mangle)]
pub extern "C" fn scm_trampoline(entry: ScmValue) -> ScmValue {
    match run(entry) {
        Ok(v) => v,
        Err(e) => crate::error::fatal(&e),
    }
}

/// `_tail_call` — forwards `target` back to the driving loop. A
/// continuation body's last statement in emitted C is
/// `return _tail_call(target);`.
#[unsafe(no_mangle)]
pub extern "C" fn _tail_call(target: ScmValue) -> ScmValue {
    target
}

/// The sentinel value the emitted program's synthetic halt continuation
/// returns after calling `scm_set_result`: an immediate `Tag::Function`
/// tagged with [`HALT_CODE`], which `run`'s dispatch loop recognizes
/// without a code-table lookup.
#[unsafe(no_mangle)]
pub extern "C" fn scm_halt_value() -> ScmValue {
    ScmValue::function(HALT_CODE)
}

/// `_cons` — the emitter's direct allocation hook for `(cons a d)` call
/// sites that don't go through the general primitive dispatch.
#[unsafe(no_mangle)]
pub extern "C" fn _cons(a: ScmValue, d: ScmValue) -> ScmValue {
    crate::heap::with_heap(|h| h.alloc(HeapObj::Pair(a, d)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closures::make_closure;

    extern "C" fn halt_soon(_self: ScmValue) -> ScmValue {
        ScmValue::function(HALT_CODE)
    }

    #[test]
    fn trampoline_runs_to_halt() {
        scm_register_code(3, halt_soon);
        scm_set_result(ScmValue::int(5));
        let entry = crate::heap::with_heap(|h| make_closure(h, 3, vec![]));
        let out = run(entry).unwrap();
        assert_eq!(out.as_int(), Some(5));
    }

    #[test]
    fn unregistered_code_id_is_an_error() {
        let entry = crate::heap::with_heap(|h| make_closure(h, 999, vec![]));
        assert!(run(entry).is_err());
    }
}
