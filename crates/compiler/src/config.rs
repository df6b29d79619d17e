//! Compiler configuration for extensibility.
//!
//! Lets a host embedding this crate register extra primitives (provided by
//! a runtime extension) without touching the translator or the folder's
//! primop table.
//!
//! ```rust,ignore
//! use schemec::config::{CompilerConfig, ExternalBuiltin};
//!
//! let config = CompilerConfig::new()
//!     .with_builtin(ExternalBuiltin::new("journal-append", "my_runtime_journal_append"));
//! ```

/// An externally-provided primitive: a name usable in source, and the C
/// symbol the emitter should call for it.
#[derive(Debug, Clone)]
pub struct ExternalBuiltin {
    /// The name as written in source (e.g. `"journal-append"`).
    pub name: String,
    /// The C symbol the emitter links against.
    pub symbol: String,
    /// Declared arity, when known; `None` means variadic/unchecked.
    pub arity: Option<usize>,
}

impl ExternalBuiltin {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        ExternalBuiltin { name: name.into(), symbol: symbol.into(), arity: None }
    }

    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }
}

/// Compiler-wide configuration, threaded through translation and codegen.
#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    pub external_builtins: Vec<ExternalBuiltin>,
    /// Emit a `main` that calls `scm_trampoline(load_dynamic())` (spec
    /// §6.2's "optionally a `main`"). Off by default for library builds
    /// that get linked into a larger host.
    pub emit_main: bool,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_builtin(mut self, builtin: ExternalBuiltin) -> Self {
        self.external_builtins.push(builtin);
        self
    }

    pub fn with_emit_main(mut self, emit_main: bool) -> Self {
        self.emit_main = emit_main;
        self
    }

    pub fn builtin_names(&self) -> Vec<&str> {
        self.external_builtins.iter().map(|b| b.name.as_str()).collect()
    }
}

/// A bare C identifier may not contain `-`, `?`, `!`, `*`, `<`, `>`, `=`;
/// the codegen back-end legalizes every generated label/temporary (spec
/// §4.1, "Naming") through this same rule before splicing it into emitted C.
pub fn legalize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legalizes_scheme_identifier_punctuation() {
        assert_eq!(legalize_identifier("list->vector"), "list__vector");
        assert_eq!(legalize_identifier("null?"), "null_");
        assert_eq!(legalize_identifier("set!"), "set_");
    }

    #[test]
    fn config_builder_collects_builtins() {
        let cfg = CompilerConfig::new().with_builtin(ExternalBuiltin::new("foo", "my_foo"));
        assert_eq!(cfg.builtin_names(), vec!["foo"]);
    }
}
