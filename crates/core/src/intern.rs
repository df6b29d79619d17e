//! Symbol interning.
//!
//! Equal symbols must be pointer-equal and symbol hash must be precomputed
//! so equality on hot paths (the optimizer's alias resolution, the
//! runtime's `eq?`) is an integer compare. We keep a single thread-local
//! table since the compiler and the constant-folding path it shares with
//! `schemec-runtime` are both strictly single-threaded.

use std::cell::RefCell;
use std::fmt;

thread_local! {
    static TABLE: RefCell<SymbolTable> = RefCell::new(SymbolTable::new());
}

/// An interned symbol: an index into the thread-local table plus the
/// FNV-1a hash computed at intern time.
#[derive(Clone, Copy, Eq)]
pub struct Symbol {
    id: u32,
    hash: u32,
}

impl Symbol {
    pub fn intern(name: &str) -> Self {
        TABLE.with(|t| t.borrow_mut().intern(name))
    }

    pub fn name(self) -> String {
        TABLE.with(|t| t.borrow().name(self.id))
    }

    /// Recover the `Symbol` a previously-interned table id refers to, for
    /// runtime code that only has a raw id (a tagged `ScmValue`'s payload)
    /// and needs the name back, e.g. to `display` it.
    pub fn from_id(id: u32) -> Self {
        TABLE.with(|t| t.borrow().from_id(id))
    }

    pub fn hash(self) -> u32 {
        self.hash
    }

    /// The raw table index, stable for the process lifetime. Used as the
    /// payload of a tagged `Symbol` value and as the key into the
    /// runtime's global-binding table.
    pub fn id(self) -> u32 {
        self.id
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

struct SymbolTable {
    names: Vec<String>,
    by_name: std::collections::HashMap<String, u32>,
}

impl SymbolTable {
    fn new() -> Self {
        Self {
            names: Vec::new(),
            by_name: std::collections::HashMap::new(),
        }
    }

    fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&id) = self.by_name.get(name) {
            return Symbol {
                id,
                hash: fnv1a(name),
            };
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        Symbol {
            id,
            hash: fnv1a(name),
        }
    }

    fn name(&self, id: u32) -> String {
        self.names[id as usize].clone()
    }

    fn from_id(&self, id: u32) -> Symbol {
        Symbol { id, hash: fnv1a(&self.names[id as usize]) }
    }
}

/// FNV-1a, used to precompute each interned symbol's hash once at
/// intern time.
fn fnv1a(s: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for b in s.as_bytes() {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_pointer_equal() {
        let a = Symbol::intern("foo");
        let b = Symbol::intern("foo");
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn distinct_names_distinct_symbols() {
        let a = Symbol::intern("foo");
        let b = Symbol::intern("bar");
        assert_ne!(a, b);
    }

    #[test]
    fn name_round_trips() {
        let s = Symbol::intern("my-symbol");
        assert_eq!(s.name(), "my-symbol");
    }

    #[test]
    fn from_id_recovers_symbol() {
        let s = Symbol::intern("round-trip-me");
        assert_eq!(Symbol::from_id(s.id()), s);
    }
}
