//! Integration tests driving the runtime crate the way compiled C linking
//! the staticlib would: through the `extern "C"` ABI against the single
//! process-wide heap, not the crate-internal module API.

use schemec_runtime::closures::{scm_box_ref, scm_box_set, scm_closure_free_var, scm_make_box, scm_make_closure};
use schemec_runtime::heap::scm_heap_init;
use schemec_runtime::trampoline::{scm_register_code, scm_set_result, scm_trampoline, HALT_CODE};
use schemec_runtime::ScmValue;

#[test]
fn closure_captures_a_boxed_free_variable() {
    scm_heap_init(4096);
    let cell = scm_make_box(ScmValue::int(1));
    let closure = unsafe { scm_make_closure(0, &cell as *const ScmValue, 1) };

    scm_box_set(cell, ScmValue::int(2));

    let captured = scm_closure_free_var(closure, 0);
    assert_eq!(scm_box_ref(captured).as_int(), Some(2));
}

/// Stands in for a `kproc` body compiled to C: unpack a captured box from
/// `self`, compute, store the trampoline's result, and halt.
extern "C" fn double_and_halt(self_val: ScmValue) -> ScmValue {
    let cell = scm_closure_free_var(self_val, 0);
    let n = scm_box_ref(cell).as_int().unwrap();
    scm_set_result(ScmValue::int(n * 2));
    ScmValue::function(HALT_CODE)
}

#[test]
fn trampoline_drives_a_registered_continuation_to_halt() {
    scm_heap_init(4096);
    scm_register_code(7, double_and_halt);

    let cell = scm_make_box(ScmValue::int(21));
    let entry = unsafe { scm_make_closure(7, &cell as *const ScmValue, 1) };
    let result = scm_trampoline(entry);
    assert_eq!(result.as_int(), Some(42));
}
