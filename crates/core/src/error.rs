//! The error taxonomy shared by compile-time diagnostics and the runtime's
//! installed exception handler.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    Arity,
    Type,
    Bounds,
    UndefinedReference,
    Overflow,
    DivideByZero,
    AllocationFailure,
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeErrorKind::Arity => "arity error",
            RuntimeErrorKind::Type => "type error",
            RuntimeErrorKind::Bounds => "bounds error",
            RuntimeErrorKind::UndefinedReference => "undefined reference",
            RuntimeErrorKind::Overflow => "integer overflow",
            RuntimeErrorKind::DivideByZero => "divide by zero",
            RuntimeErrorKind::AllocationFailure => "allocation failure",
        };
        write!(f, "{s}")
    }
}

/// A fatal runtime condition, rendered as `Error: (<fn>) <msg>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub function: String,
    pub message: String,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, function: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            function: function.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: ({}) {}", self.function, self.message)
    }
}

impl std::error::Error for RuntimeError {}
