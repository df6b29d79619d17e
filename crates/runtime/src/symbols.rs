//! Symbol interning, the compiled-constant table, and global-binding
//! lookup.
//!
//! Interning itself lives in `schemec_core::intern` so the compiler and
//! the runtime agree on `Symbol` identity; this module is the runtime-side
//! ABI around it: a name-keyed dictionary handing back a stable id on
//! first sight and the existing one on repeat, plus a side table of
//! compile-time constants the emitted code indexes into rather than
//! re-building. There is exactly one such table, global for the process.

use std::cell::RefCell;

use schemec_core::{RuntimeError, RuntimeErrorKind, Symbol};
use std::collections::HashMap;

use crate::heap::ScmValue;

thread_local! {
    static CONSTANTS: RefCell<Vec<ScmValue>> = const { RefCell::new(Vec::new()) };
    static GLOBALS: RefCell<HashMap<u32, ScmValue>> = RefCell::new(HashMap::new());
}

/// `scm_intern_constants` — called once at program start with the names
/// baked in by the compiler's `intern_constant` table; interns each and
/// records its `ScmValue::symbol` at the matching table index so
/// `const(sym)` terms become a simple indexed load in emitted C.
///
/// # Safety
/// `names` must point to `count` valid, null-terminated C strings, each
/// valid UTF-8.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scm_intern_constants(names: *const *const i8, count: usize) {
    if names.is_null() {
        return;
    }
    let table: Vec<ScmValue> = (0..count)
        .map(|i| {
            let ptr = unsafe { *names.add(i) };
            let cstr = unsafe { std::ffi::CStr::from_ptr(ptr) };
            let name = cstr.to_string_lossy();
            ScmValue::symbol(Symbol::intern(&name).id())
        })
        .collect();
    CONSTANTS.with(|c| *c.borrow_mut() = table);
}

#[unsafe(no_mangle)]
pub extern "C" fn scm_constant_ref(index: usize) -> ScmValue {
    CONSTANTS.with(|c| c.borrow().get(index).copied().unwrap_or(ScmValue::VOID))
}

/// `scm_module_define` — bind a top-level name (no true module system;
/// one flat global namespace, per the Open Question decision recorded in
/// `DESIGN.md`).
#[unsafe(no_mangle)]
pub extern "C" fn scm_module_define(name_id: u32, value: ScmValue) {
    GLOBALS.with(|g| {
        g.borrow_mut().insert(name_id, value);
    });
}

/// `scm_module_lookup` — resolve a top-level reference. An unbound name
/// is a fatal, non-resumable condition.
#[unsafe(no_mangle)]
pub extern "C" fn scm_module_lookup(name_id: u32) -> ScmValue {
    let found = GLOBALS.with(|g| g.borrow().get(&name_id).copied());
    match found {
        Some(v) => v,
        None => crate::error::fatal(&RuntimeError::new(
            RuntimeErrorKind::UndefinedReference,
            "module-lookup",
            format!("unbound variable (symbol id {name_id})"),
        )),
    }
}

/// `scm_runtime_load_dynamic` — stub. This runtime links one statically
/// compiled module (the emitted C plus this staticlib); it does not load
/// additional Scheme modules at run time. Always reports failure rather
/// than silently succeeding at nothing.
///
/// # Safety
/// `path` must be null or a valid null-terminated C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scm_runtime_load_dynamic(_path: *const i8) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_then_lookup() {
        let id = Symbol::intern("foo").id();
        scm_module_define(id, ScmValue::int(10));
        assert_eq!(scm_module_lookup(id).as_int(), Some(10));
    }

    #[test]
    fn constants_table_round_trips() {
        use std::ffi::CString;
        let a = CString::new("alpha").unwrap();
        let b = CString::new("beta").unwrap();
        let ptrs = [a.as_ptr(), b.as_ptr()];
        unsafe { scm_intern_constants(ptrs.as_ptr(), 2) };
        let alpha = scm_constant_ref(0);
        let beta = scm_constant_ref(1);
        assert_ne!(alpha.bits, beta.bits);
        assert_eq!(alpha.bits, Symbol::intern("alpha").id() as u64);
    }
}
