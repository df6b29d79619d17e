//! A minimal S-expression reader.
//!
//! The hyper-syntactic lexer and the ad-hoc surface parser are external
//! collaborators; what the CPS translator actually consumes is a
//! fully macro-expanded AST of S-expressions, where every node is
//! either an atom or a list of nodes. This reader produces that shape
//! directly from source text so the translator and its tests have
//! something concrete to drive off of — it does no hygiene, no macro
//! expansion, and no surface-syntax sugar beyond the reader abbreviations
//! every Scheme reader carries (`'x`, `#t`/`#f`, string/char literals).

use schemec_core::intern::Symbol;
use std::fmt;

/// A reader-level node: either an atom or a list. `Quote` is kept
/// distinct from a plain list so the translator
/// doesn't need to special-case a `(quote ...)` spelling that is really
/// reader sugar.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Bool(bool),
    Int(i32),
    Float(f64),
    Char(u8),
    Str(String),
    Symbol(String),
    Null,
    List(Vec<Datum>),
    Quote(Box<Datum>),
}

#[derive(Debug)]
pub struct ReadError(pub String);

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read error: {}", self.0)
    }
}

impl std::error::Error for ReadError {}

/// Read every top-level datum out of `src`.
pub fn read_all(src: &str) -> Result<Vec<Datum>, ReadError> {
    let mut r = Reader { chars: src.chars().collect(), pos: 0 };
    let mut out = Vec::new();
    loop {
        r.skip_atmosphere();
        if r.at_end() {
            break;
        }
        out.push(r.read_datum()?);
    }
    Ok(out)
}

/// Intern every symbol name appearing in `datums` into the process-wide
/// symbol table, used by the translator before emitting `Expr::Const` for a
/// quoted symbol.
pub fn intern_symbol_names(datums: &[Datum]) {
    fn walk(d: &Datum) {
        match d {
            Datum::Symbol(s) => {
                Symbol::intern(s);
            }
            Datum::List(items) => items.iter().for_each(walk),
            Datum::Quote(inner) => walk(inner),
            _ => {}
        }
    }
    for d in datums {
        walk(d);
    }
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
}

impl Reader {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_atmosphere(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.pos += 1;
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn read_datum(&mut self) -> Result<Datum, ReadError> {
        self.skip_atmosphere();
        match self.peek() {
            None => Err(ReadError("unexpected end of input".into())),
            Some('(') | Some('[') => self.read_list(),
            Some(')') | Some(']') => Err(ReadError("unexpected close paren".into())),
            Some('\'') => {
                self.bump();
                let inner = self.read_datum()?;
                Ok(Datum::Quote(Box::new(inner)))
            }
            Some('"') => self.read_string(),
            Some('#') => self.read_hash(),
            _ => self.read_atom(),
        }
    }

    fn read_list(&mut self) -> Result<Datum, ReadError> {
        let close = if self.bump() == Some('(') { ')' } else { ']' };
        let mut items = Vec::new();
        loop {
            self.skip_atmosphere();
            match self.peek() {
                None => return Err(ReadError("unterminated list".into())),
                Some(c) if c == close => {
                    self.bump();
                    break;
                }
                Some('.') if self.is_dot_separator() => {
                    self.bump();
                    let tail = self.read_datum()?;
                    self.skip_atmosphere();
                    if self.bump() != Some(close) {
                        return Err(ReadError("malformed dotted list".into()));
                    }
                    // Represented as an ordinary list with the dotted tail
                    // appended as a final improper marker the translator
                    // recognizes by convention: a trailing `Symbol(".")`
                    // immediately followed by the tail datum.
                    items.push(Datum::Symbol(".".into()));
                    items.push(tail);
                    break;
                }
                _ => items.push(self.read_datum()?),
            }
        }
        Ok(Datum::List(items))
    }

    fn is_dot_separator(&self) -> bool {
        if self.peek() != Some('.') {
            return false;
        }
        match self.chars.get(self.pos + 1) {
            None => true,
            Some(c) => c.is_whitespace() || *c == '(' || *c == ')',
        }
    }

    fn read_string(&mut self) -> Result<Datum, ReadError> {
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(ReadError("unterminated string".into())),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some(c) => s.push(c),
                    None => return Err(ReadError("unterminated escape".into())),
                },
                Some(c) => s.push(c),
            }
        }
        Ok(Datum::Str(s))
    }

    fn read_hash(&mut self) -> Result<Datum, ReadError> {
        self.bump();
        match self.bump() {
            Some('t') => Ok(Datum::Bool(true)),
            Some('f') => Ok(Datum::Bool(false)),
            Some('\\') => {
                let c = self.bump().ok_or_else(|| ReadError("unterminated char literal".into()))?;
                Ok(Datum::Char(c as u8))
            }
            other => Err(ReadError(format!("unsupported # syntax: #{:?}", other))),
        }
    }

    fn read_atom(&mut self) -> Result<Datum, ReadError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || "()[]'\";".contains(c) {
                break;
            }
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if text.is_empty() {
            return Err(ReadError("empty atom".into()));
        }
        if text == "()" {
            return Ok(Datum::Null);
        }
        if let Ok(i) = text.parse::<i32>() {
            return Ok(Datum::Int(i));
        }
        if let Ok(f) = text.parse::<f64>() {
            if text.contains('.') || text.contains('e') || text.contains('E') {
                return Ok(Datum::Float(f));
            }
        }
        Ok(Datum::Symbol(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_atoms() {
        let ds = read_all("42 3.5 #t foo \"hi\"").unwrap();
        assert_eq!(
            ds,
            vec![
                Datum::Int(42),
                Datum::Float(3.5),
                Datum::Bool(true),
                Datum::Symbol("foo".into()),
                Datum::Str("hi".into()),
            ]
        );
    }

    #[test]
    fn reads_nested_lists_and_quote() {
        let ds = read_all("(+ 1 (- 2 3)) '(a b)").unwrap();
        assert_eq!(ds.len(), 2);
        assert!(matches!(&ds[0], Datum::List(items) if items.len() == 3));
        assert!(matches!(&ds[1], Datum::Quote(_)));
    }

    #[test]
    fn rejects_unterminated_list() {
        assert!(read_all("(+ 1 2").is_err());
    }
}
