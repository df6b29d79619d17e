//! The installed, non-resumable exception handler.
//!
//! A thread-local last-error cell holds the structured `RuntimeError`
//! shared with `schemec-core`, so FFI callers can recover the error
//! kind, not just its rendered message. The runtime installs a single
//! non-resumable handler: a raised error that nobody catches prints and
//! terminates the process (`fatal`) rather than unwinding.

use std::cell::RefCell;
use std::ffi::CString;
use std::ptr;

use schemec_core::RuntimeError;

thread_local! {
    static LAST_ERROR: RefCell<Option<RuntimeError>> = const { RefCell::new(None) };
    static ERROR_CSTRING: RefCell<Option<CString>> = const { RefCell::new(None) };
}

pub fn set_runtime_error(err: RuntimeError) {
    ERROR_CSTRING.with(|cs| *cs.borrow_mut() = None);
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(err));
}

pub fn take_runtime_error() -> Option<RuntimeError> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

pub fn has_runtime_error() -> bool {
    LAST_ERROR.with(|e| e.borrow().is_some())
}

pub fn clear_runtime_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
    ERROR_CSTRING.with(|e| *e.borrow_mut() = None);
}

/// The installed handler: print the error as `Error: (<fn>) <msg>` to
/// stderr and terminate. There is nothing to
/// unwind to — the handler is not resumable — so this never returns.
pub fn fatal(err: &RuntimeError) -> ! {
    eprintln!("{err}");
    std::process::exit(1);
}

// ---------------------------------------------------------------------
// C ABI
// ---------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn scm_has_error() -> bool {
    has_runtime_error()
}

/// Returns a pointer to the rendered error message, or null if none is
/// pending. Valid only until the next call into this module's error API.
#[unsafe(no_mangle)]
pub extern "C" fn scm_get_error() -> *const i8 {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(err) => cache_and_return(err.to_string()),
        None => ptr::null(),
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn scm_take_error() -> *const i8 {
    match take_runtime_error() {
        Some(err) => cache_and_return(err.to_string()),
        None => ptr::null(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn scm_clear_error() {
    clear_runtime_error();
}

/// `scm_fatal_error` — the C emitter's call-site for a raised condition
/// that reached the installed top-level handler unresumed.
#[unsafe(no_mangle)]
pub extern "C" fn scm_fatal_error() -> ! {
    match take_runtime_error() {
        Some(err) => fatal(&err),
        None => {
            eprintln!("Error: (unknown) no error recorded");
            std::process::exit(1);
        }
    }
}

/// `scm_assert` — the emitter's call-site for every checked runtime
/// invariant (`chk_args` arity failures, tag checks, bounds checks) that
/// isn't already routed through a `RuntimeError`-returning helper.
/// Prints `Error: (<fn>) <msg>` and hands off to the installed handler;
/// never returns when `cond` is false.
///
/// # Safety
/// `function` and `msg` must be valid, NUL-terminated C strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scm_assert(cond: bool, function: *const i8, msg: *const i8) {
    if cond {
        return;
    }
    let function = unsafe { std::ffi::CStr::from_ptr(function) }.to_string_lossy();
    let msg = unsafe { std::ffi::CStr::from_ptr(msg) }.to_string_lossy();
    eprintln!("Error: ({function}) {msg}");
    std::process::exit(1);
}

fn cache_and_return(msg: String) -> *const i8 {
    let safe_msg: String = msg.chars().map(|c| if c == '\0' { '?' } else { c }).collect();
    let cstring = CString::new(safe_msg).expect("null bytes already replaced");
    ERROR_CSTRING.with(|cs| {
        let ptr = cstring.as_ptr();
        *cs.borrow_mut() = Some(cstring);
        ptr
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemec_core::RuntimeErrorKind;

    #[test]
    fn set_and_take_error() {
        clear_runtime_error();
        assert!(!has_runtime_error());
        set_runtime_error(RuntimeError::new(RuntimeErrorKind::DivideByZero, "/", "zero divisor"));
        assert!(has_runtime_error());
        let err = take_runtime_error().unwrap();
        assert_eq!(err.function, "/");
        assert!(!has_runtime_error());
    }

    #[test]
    fn clear_drops_pending_error() {
        set_runtime_error(RuntimeError::new(RuntimeErrorKind::Arity, "f", "bad arity"));
        clear_runtime_error();
        assert!(!has_runtime_error());
        assert!(take_runtime_error().is_none());
    }
}
