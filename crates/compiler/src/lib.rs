//! `schemec`: a CPS-based compiler for a Scheme-family language. Lowers
//! a macro-expanded S-expression AST to an optimized CPS graph,
//! closure-converts it, and emits C linked against `schemec-runtime`'s
//! tagged-value heap, argument stack, and trampoline.

pub mod ast;
pub mod closure;
pub mod codegen;
pub mod config;
pub mod contract;
pub mod errors;
pub mod freevars;
pub mod sexpr;
pub mod translate;
pub mod varinfo;

use config::CompilerConfig;
use errors::{CompileError, CompileResult};

/// The built `schemec-runtime` staticlib, embedded so a `Build` that
/// links against `cc` doesn't need the runtime crate installed
/// separately — the emitted C links against the runtime ABI.
/// Absent under the `docsrs` feature, where no C toolchain runs at all.
#[cfg(feature = "schemec-runtime")]
pub static RUNTIME_STATICLIB: &[u8] = include_bytes!(env!("SCHEMEC_RUNTIME_LIB_PATH"));

/// Run the full pipeline: read, translate to CPS, optimize to
/// a fixed point, closure-convert, emit C. Returns the rendered
/// translation unit; `Build`/`Run` in `main.rs` are thin wrappers that
/// write it out and optionally invoke `cc`.
pub fn compile(src: &str, config: &CompilerConfig) -> CompileResult<String> {
    let datums = sexpr::read_all(src).map_err(|e| CompileError::Read(e.0))?;
    sexpr::intern_symbol_names(&datums);
    let mut graph = translate::translate_program(&datums)?;
    let rounds = contract::optimize(&mut graph);
    tracing::debug!(rounds, "contraction fixed point reached");
    closure::convert(&mut graph);
    codegen::render(&graph, config)
}
