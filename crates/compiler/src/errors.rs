//! Compiler error types.
//!
//! Mirrors the runtime crate's split between logical errors and
//! formatting errors, generalized to the whole pipeline: reading,
//! translation, optimization and emission all report through one
//! `CompileError`.

#[derive(Debug)]
pub enum CompileError {
    /// A malformed or unreadable S-expression.
    Read(String),
    /// An AST shape the translator doesn't recognize (bad special form,
    /// wrong arity for a core form).
    Translate(String),
    /// A label or variable reference the optimizer or closure converter
    /// could not resolve; indicates a malformed graph, not a user error.
    Graph(String),
    /// A formatting error while writing emitted C.
    Format(std::fmt::Error),
    /// An I/O failure reading source or writing output.
    Io(std::io::Error),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Read(s) => write!(f, "{s}"),
            CompileError::Translate(s) => write!(f, "{s}"),
            CompileError::Graph(s) => write!(f, "{s}"),
            CompileError::Format(e) => write!(f, "code generation error: {e}"),
            CompileError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<std::fmt::Error> for CompileError {
    fn from(e: std::fmt::Error) -> Self {
        CompileError::Format(e)
    }
}

impl From<std::io::Error> for CompileError {
    fn from(e: std::io::Error) -> Self {
        CompileError::Io(e)
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
