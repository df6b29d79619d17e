//! Assembles one C translation unit from a closure-converted graph: the
//! `value` struct layout, every runtime/primop forward
//! declaration, the constant table, the per-continuation function bodies
//! [`emit::emit`] produced, `load_dynamic()` (registers each function
//! under its `code_id` and returns the entry closure), and an optional
//! `main`.

pub mod abi;
pub mod constants;
pub mod emit;

use std::fmt::Write as _;

use crate::ast::Graph;
use crate::config::CompilerConfig;
use crate::errors::CompileResult;

/// The `ScmValue` struct layout mirrored in C: `tag` must be
/// a plain `uint8_t`, not a C `enum` (which typically widens to `int`),
/// so this matches `schemec_runtime::heap::ScmValue`'s `#[repr(C)]`
/// layout byte-for-byte. The named constants live in a separate
/// anonymous `enum` purely for readability at call sites; nothing is
/// ever declared with that enum's type.
const PREAMBLE: &str = r#"#include <stdbool.h>
#include <stddef.h>
#include <stdint.h>

typedef struct {
    uint8_t tag;
    uint64_t bits;
} value;

enum {
    SCM_VOID = 0,
    SCM_BOOL = 1,
    SCM_CHAR = 2,
    SCM_INT = 3,
    SCM_FLOAT = 4,
    SCM_NULL = 5,
    SCM_PAIR = 6,
    SCM_SYMBOL = 7,
    SCM_STR = 8,
    SCM_BYTEVECTOR = 9,
    SCM_VECTOR = 10,
    SCM_RECORD = 11,
    SCM_BOX = 12,
    SCM_CLOSURE = 13,
    SCM_FUNCTION = 14,
};
"#;

/// Render the complete C source for `graph`. `graph` must already be
/// closed, optimized (`contract::optimize`) and closure-converted
/// (`closure::convert`) — this module only lowers and assembles, it runs
/// no graph transformation of its own.
pub fn render(graph: &Graph, config: &CompilerConfig) -> CompileResult<String> {
    let emitted = emit::emit(graph, config)?;

    let mut out = String::new();
    out.push_str(PREAMBLE);
    out.push('\n');

    for decl in abi::RUNTIME_DECLS {
        let _ = writeln!(out, "{}", decl.proto);
    }
    out.push('\n');
    out.push_str(&abi::render_primop_decls());
    out.push('\n');

    for decl in &emitted.decls {
        let _ = writeln!(out, "{decl}");
    }
    out.push('\n');

    out.push_str(&emitted.constants.render());
    out.push('\n');

    out.push_str(&emitted.functions);

    render_load_dynamic(&mut out, &emitted);

    if config.emit_main {
        render_main(&mut out);
    }

    Ok(out)
}

/// `load_dynamic()` registers every emitted function under
/// the `code_id` the closure converter assigned its label, loads the
/// constant table, and returns the entry point as a bare code value —
/// the same immediate-`Function` shape `emit.rs`'s `lower_code` builds
/// for any other `kproc`-shaped reference, since the top-level program
/// is itself a zero-free-variable `kproc`.
fn render_load_dynamic(out: &mut String, emitted: &emit::Emitted) {
    let _ = writeln!(out, "value load_dynamic(void) {{");
    for (code_id, fn_name) in &emitted.registrations {
        let _ = writeln!(out, "    scm_register_code({code_id}, {fn_name});");
    }
    let _ = writeln!(out, "    scm_load_constant_table();");
    let _ = writeln!(out, "    return scm_code_value({});", emitted.entry_code_id);
    let _ = writeln!(out, "}}\n");
}

/// An optional `main`, gated on
/// [`CompilerConfig::emit_main`] — off for builds meant to link into a
/// larger host that drives `scm_trampoline` itself.
fn render_main(out: &mut String) {
    let _ = writeln!(out, "int main(void) {{");
    let _ = writeln!(out, "    scm_heap_init(1 << 20);");
    let _ = writeln!(out, "    scm_trampoline(load_dynamic());");
    let _ = writeln!(out, "    return 0;");
    let _ = writeln!(out, "}}\n");
}
