//! schemec runtime: tagged values, heap, copying GC, argument stack,
//! trampoline, primitive library.
//!
//! Built as a `staticlib` so `schemec`'s codegen can statically link it
//! into the C it emits; also exposed as an `rlib` so this crate's own
//! tests can drive the runtime directly without going through C at all.

pub mod argstack;
pub mod closures;
pub mod error;
pub mod heap;
pub mod primitives;
pub mod symbols;
pub mod trampoline;

pub use argstack::ArgStack;
pub use heap::{Heap, HeapObj, HeapRef, ScmValue, Tag};
pub use trampoline::{ContCode, HALT_CODE};
