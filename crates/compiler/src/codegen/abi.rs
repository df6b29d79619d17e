//! Runtime ABI declarations for emitted C.
//!
//! All runtime function prototypes are declared here in one data-driven
//! table so the emitter's forward-declaration block and the actual call
//! sites in `emit.rs` agree on a single source of truth, rather than
//! duplicating each signature at every call site.

/// A single runtime function's C prototype, exactly as it should appear
/// in the forward-declaration block of emitted C.
pub struct AbiDecl {
    pub proto: &'static str,
}

/// Every `schemec-runtime` entry point the emitter may call, grounded on
/// the runtime crate's actual `#[unsafe(no_mangle)] extern "C"` surface
/// (`heap.rs`, `argstack.rs`, `closures.rs`, `trampoline.rs`,
/// `symbols.rs`, `error.rs`, `primitives.rs`).
pub const RUNTIME_DECLS: &[AbiDecl] = &[
    // heap.rs
    AbiDecl { proto: "void scm_heap_init(uint64_t initial_threshold);" },
    AbiDecl { proto: "void scm_chk_heap(value *roots_data, size_t roots_len);" },
    AbiDecl { proto: "value scm_code_value(uint32_t code_id);" },
    AbiDecl { proto: "value scm_make_string_literal(const uint8_t *bytes, size_t len);" },
    AbiDecl { proto: "value scm_make_bytevector_literal(const uint8_t *bytes, size_t len);" },
    AbiDecl { proto: "value scm_make_vector_literal(const value *items, size_t len);" },
    // argstack.rs
    AbiDecl { proto: "bool push_arg(value v);" },
    AbiDecl { proto: "value pop_arg(void);" },
    AbiDecl { proto: "bool push_ref(value v);" },
    AbiDecl { proto: "void scm_chk_args(size_t req, bool rest);" },
    AbiDecl { proto: "value scm_cons_rest(size_t req);" },
    AbiDecl { proto: "void scm_gc_safepoint(void);" },
    // closures.rs
    AbiDecl { proto: "value scm_make_closure(uint32_t code_id, const value *free_vars, size_t count);" },
    AbiDecl { proto: "value scm_make_box(value init);" },
    AbiDecl { proto: "value scm_box_ref(value b);" },
    AbiDecl { proto: "void scm_box_set(value b, value val);" },
    AbiDecl { proto: "value scm_make_record(size_t nfields);" },
    AbiDecl { proto: "value scm_record_ref(value r, size_t field);" },
    AbiDecl { proto: "void scm_record_set(value r, size_t field, value val);" },
    AbiDecl { proto: "value scm_closure_free_var(value closure, size_t index);" },
    // trampoline.rs
    AbiDecl { proto: "void scm_register_code(uint32_t code_id, value (*code)(value));" },
    AbiDecl { proto: "void scm_set_result(value v);" },
    AbiDecl { proto: "value scm_trampoline(value entry);" },
    AbiDecl { proto: "value _tail_call(value target);" },
    AbiDecl { proto: "value _cons(value a, value d);" },
    AbiDecl { proto: "value scm_halt_value(void);" },
    // symbols.rs
    AbiDecl { proto: "void scm_intern_constants(const char *const *names, size_t count);" },
    AbiDecl { proto: "value scm_constant_ref(size_t index);" },
    AbiDecl { proto: "void scm_module_define(uint32_t name_id, value v);" },
    AbiDecl { proto: "value scm_module_lookup(uint32_t name_id);" },
    AbiDecl { proto: "bool scm_runtime_load_dynamic(const char *path);" },
    // error.rs
    AbiDecl { proto: "bool scm_has_error(void);" },
    AbiDecl { proto: "const char *scm_get_error(void);" },
    AbiDecl { proto: "const char *scm_take_error(void);" },
    AbiDecl { proto: "void scm_clear_error(void);" },
    AbiDecl { proto: "_Noreturn void scm_fatal_error(void);" },
    AbiDecl { proto: "void scm_assert(bool cond, const char *function, const char *msg);" },
];

/// The fixed-arity primitive set (`primop_*`/`prim_*`, pop their operands
/// off the argument stack themselves) plus their emitted-call arity: `0`
/// means "no operand count parameter", matching the ordinary `primop_*`
/// shape; any other number is the `argc` parameter `+`/`-`/`*`/`list`/
/// `vector` take, since those are the runtime's variadic primitives.
pub const PRIMOPS: &[(&str, &str, bool)] = &[
    // (source name, C symbol, is_variadic)
    ("+", "primop_add", true),
    ("-", "primop_sub", true),
    ("*", "primop_mul", true),
    ("/", "primop_div", false),
    ("div", "primop_quotient", false),
    ("modulo", "primop_remainder", false),
    ("%", "primop_remainder", false),
    ("=", "primop_num_eq", false),
    ("<", "primop_lt", false),
    (">", "primop_gt", false),
    ("<=", "primop_le", false),
    (">=", "primop_ge", false),
    ("eq?", "primop_eq_p", false),
    ("eqv?", "primop_eqv_p", false),
    ("equal?", "primop_equal_p", false),
    ("null?", "primop_null_p", false),
    ("pair?", "primop_pair_p", false),
    ("number?", "primop_number_p", false),
    ("string?", "primop_string_p", false),
    ("symbol?", "primop_symbol_p", false),
    ("boolean?", "primop_boolean_p", false),
    ("vector?", "primop_vector_p", false),
    ("bytevector?", "primop_bytevector_p", false),
    ("record?", "primop_record_p", false),
    ("procedure?", "primop_procedure_p", false),
    ("cons", "primop_cons", false),
    ("car", "primop_car", false),
    ("cdr", "primop_cdr", false),
    ("set-car!", "primop_set_car", false),
    ("set-cdr!", "primop_set_cdr", false),
    ("list", "primop_list", true),
    ("list?", "primop_list_p", false),
    ("length", "primop_length", false),
    ("list-ref", "primop_list_ref", false),
    ("vector", "primop_vector", true),
    ("make-vector", "primop_make_vector", false),
    ("vector-length", "primop_vector_length", false),
    ("vector-ref", "primop_vector_ref", false),
    ("vector-set!", "primop_vector_set", false),
    ("make-bytevector", "primop_make_bytevector", false),
    ("bytevector-length", "primop_bytevector_length", false),
    ("bytevector-u8-ref", "primop_bytevector_ref", false),
    ("bytevector-u8-set!", "primop_bytevector_set", false),
    ("make-string", "primop_make_string", false),
    ("string-length", "primop_string_length", false),
    ("string-ref", "primop_string_ref", false),
    ("string-set!", "primop_string_set", false),
    ("string-copy", "primop_string_copy", false),
    ("string=?", "primop_string_eq", false),
    ("string<?", "primop_string_lt", false),
    ("make-record", "primop_make_record", false),
    ("record-ref", "primop_record_ref", false),
    ("record-set!", "primop_record_set", false),
    ("record-meta-ref", "primop_record_meta_ref", false),
    ("record-meta-set!", "primop_record_meta_set", false),
    ("procedure-check", "primop_chk_procedure", false),
    ("display", "primop_display", false),
    ("write", "primop_write", false),
    ("newline", "primop_newline", false),
];

/// Control primitives that transfer control (`prim_*`): the last operand
/// popped is the continuation they tail-call with their result.
pub const CONTROL_PRIMS: &[(&str, &str)] =
    &[("call/cc", "prim_call_cc"), ("call-with-values", "prim_call_with_values"), ("apply", "prim_apply")];

pub fn lookup_primop(name: &str) -> Option<(&'static str, bool)> {
    PRIMOPS.iter().find(|(n, _, _)| *n == name).map(|(_, sym, variadic)| (*sym, *variadic))
}

pub fn lookup_control_prim(name: &str) -> Option<&'static str> {
    CONTROL_PRIMS.iter().find(|(n, _)| *n == name).map(|(_, sym)| *sym)
}

/// Forward declarations for every `primop_*`/`prim_*` C symbol the emitter
/// might call, in the same unconditional style as [`RUNTIME_DECLS`]:
/// declare the whole fixed surface rather than compute which subset a
/// given program actually uses. A handful of source names share a C
/// symbol (`modulo`/`%` both fold to `primop_remainder`), so symbols are
/// deduplicated before rendering.
pub fn render_primop_decls() -> String {
    use std::fmt::Write as _;
    let mut seen = std::collections::HashSet::new();
    let mut out = String::new();
    for &(_, sym, variadic) in PRIMOPS {
        if seen.insert(sym) {
            let params = if variadic { "size_t argc" } else { "void" };
            let _ = writeln!(out, "value {sym}({params});");
        }
    }
    for &(_, sym) in CONTROL_PRIMS {
        if seen.insert(sym) {
            let _ = writeln!(out, "value {sym}(void);");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variadic_arithmetic_is_flagged() {
        assert_eq!(lookup_primop("+"), Some(("primop_add", true)));
        assert_eq!(lookup_primop("car"), Some(("primop_car", false)));
        assert_eq!(lookup_primop("nonexistent"), None);
    }

    #[test]
    fn primop_decls_dedupe_shared_symbols() {
        let decls = render_primop_decls();
        assert_eq!(decls.matches("value primop_remainder(void);").count(), 1);
        assert!(decls.contains("value primop_add(size_t argc);"));
        assert!(decls.contains("value prim_call_cc(void);"));
    }
}
