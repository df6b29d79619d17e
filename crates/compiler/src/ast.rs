//! The CPS intermediate representation.
//!
//! The graph is cyclic (mutual recursion through `fix`), so it is stored
//! as an arena indexed by a small integer rather than built from owning
//! pointers: a [`Graph`] is a `Vec<Option<Continuation>>` indexed by
//! [`Label`], and every cross-reference between continuations is an
//! index, not a reference. Optimization passes build a fresh label→node
//! map rather than mutating the old one in place.

use schemec_core::Value;
use std::fmt;

/// A fresh generated label, rendered as `_k<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_k{}", self.0)
    }
}

/// A fresh generated temporary, rendered as `_t<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(pub u32);

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_t{}", self.0)
    }
}

/// Allocates fresh labels and variables with process-unique ids. Shared by
/// the translator, the optimizer (beta-contraction alpha-renames using a
/// fresh supply) and the closure converter.
#[derive(Debug, Default, Clone)]
pub struct NameSupply {
    next_label: u32,
    next_var: u32,
}

impl NameSupply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    pub fn fresh_var(&mut self) -> Var {
        let v = Var(self.next_var);
        self.next_var += 1;
        v
    }
}

/// Procedure arity: a fixed count of required parameters plus an optional
/// rest parameter collecting everything beyond it (`kreceive`/`kproc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub req: usize,
    pub rest: bool,
}

impl Arity {
    pub fn fixed(req: usize) -> Self {
        Arity { req, rest: false }
    }

    pub fn with_rest(req: usize) -> Self {
        Arity { req, rest: true }
    }
}

/// Free-variable/record layout recorded on a `kproc` once closure
/// conversion has run: closure-definition/shares/offset, once a `kproc`
/// has been given a concrete representation.
#[derive(Debug, Clone)]
pub struct ClosureInfo {
    /// The captured free variables, in the order they occupy the closure
    /// record's free-variable slots (slot 0 is the code pointer).
    pub free_vars: Vec<Var>,
    /// Sibling procedure names sharing this same closure-group allocation
    /// (a `fix` of mutually-recursive procedures becomes one record with
    /// one code-pointer cell per procedure).
    pub shares: Vec<Var>,
    /// This procedure's code-pointer cell offset within the shared record.
    pub offset: usize,
}

/// Expression variants. An expression only ever appears as the
/// payload of a `Term::Continue`; it never appears "bare".
#[derive(Debug, Clone)]
pub enum Expr {
    Const(Value),
    /// Forward named values onward; identity/rebind, and the vehicle for
    /// alias resolution.
    Values(Vec<Var>),
    /// A primitive treated as a first-class value: a reference to a
    /// primitive name not immediately applied.
    Prim(String),
    /// A statically-known primitive application.
    Primcall(String, Vec<Var>),
    /// An ordinary procedure call; the enclosing term's continuation must
    /// be a `Kreceive`, except in tail position where it is a `Ktail`
    /// directly.
    Call(Var, Vec<Var>),
    /// A lambda value; `k` is the label of the `Kproc` for its body.
    Proc(Label),
    /// Simultaneous recursive bindings. `exprs[i]` is typically `Proc` or
    /// `Box`.
    Fix(Vec<Var>, Vec<Expr>),
    /// Assignment to a box.
    Set(Var, Var),
    /// Allocate a one-cell mutable reference.
    Box(Var),
    /// Read a box's current contents.
    Unbox(Var),
    /// Allocate a record from initializer values.
    Record(Vec<Var>),
    /// Read one field of a record.
    Select(Var, usize),
    /// Write one field of a record.
    RecordSet(Var, usize, Var),
    /// Allocate an all-void record of `nfields` fields, fields filled in by
    /// later `RecordSet`s (used by the closure converter building a
    /// multi-procedure closure group incrementally).
    MakeRecord(usize),
    /// Byte-offset pointer arithmetic within a record; only introduced by
    /// closure conversion for multi-closure records.
    Offset(Var, usize),
    /// Reify a label as a first-class code pointer.
    Code(Label),
}

/// Term variants: the tail of a `Kargs`.
#[derive(Debug, Clone)]
pub enum Term {
    /// Evaluate `expr`, pass its results to continuation `k`.
    Continue(Expr, Label),
    /// Jump on the truthiness of `arg` (false is the only false value).
    Branch(Var, Label, Label),
}

/// The four continuation flavors.
#[derive(Debug, Clone)]
pub enum Continuation {
    /// Sequential block bound to incoming values.
    Kargs { vars: Vec<Var>, term: Term },
    /// Checks return arity then forwards to `k`.
    Kreceive { arity: Arity, k: Label },
    /// Entry of a procedure; `body` is a `Kargs` whose `vars` are the
    /// parameters.
    Kproc { arity: Arity, tail: Label, body: Label, closure: Option<ClosureInfo> },
    /// The return continuation of a procedure.
    Ktail,
}

/// A CPS graph: an arena of continuations plus the label at which
/// execution begins.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Option<Continuation>>,
    pub entry: Label,
    pub names: NameSupply,
}

impl Graph {
    pub fn new(names: NameSupply, entry: Label) -> Self {
        Graph { nodes: Vec::new(), entry, names }
    }

    fn ensure_capacity(&mut self, label: Label) {
        let idx = label.0 as usize;
        if self.nodes.len() <= idx {
            self.nodes.resize(idx + 1, None);
        }
    }

    pub fn insert(&mut self, label: Label, cont: Continuation) {
        self.ensure_capacity(label);
        self.nodes[label.0 as usize] = Some(cont);
    }

    pub fn get(&self, label: Label) -> Option<&Continuation> {
        self.nodes.get(label.0 as usize).and_then(|n| n.as_ref())
    }

    pub fn get_mut(&mut self, label: Label) -> Option<&mut Continuation> {
        self.nodes.get_mut(label.0 as usize).and_then(|n| n.as_mut())
    }

    pub fn remove(&mut self, label: Label) -> Option<Continuation> {
        self.nodes.get_mut(label.0 as usize).and_then(|n| n.take())
    }

    /// All labels currently bound to a node, in index order (not control
    /// flow order). Used by invariant checks and dump tooling.
    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.nodes.iter().enumerate().filter_map(|(i, n)| n.as_ref().map(|_| Label(i as u32)))
    }

    pub fn fresh_label(&mut self) -> Label {
        self.names.fresh_label()
    }

    pub fn fresh_var(&mut self) -> Var {
        self.names.fresh_var()
    }

    /// Checks the graph is closed: every label reachable from the entry
    /// resolves. Walks the whole reachable subgraph, following every
    /// expression/term that names a label.
    pub fn check_closed(&self) -> Result<(), Label> {
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![self.entry];
        while let Some(l) = stack.pop() {
            if !seen.insert(l) {
                continue;
            }
            let Some(cont) = self.get(l) else { return Err(l) };
            match cont {
                Continuation::Kargs { term, .. } => collect_term_labels(term, &mut stack),
                Continuation::Kreceive { k, .. } => stack.push(*k),
                Continuation::Kproc { tail, body, .. } => {
                    stack.push(*tail);
                    stack.push(*body);
                }
                Continuation::Ktail => {}
            }
        }
        Ok(())
    }
}

fn collect_term_labels(term: &Term, stack: &mut Vec<Label>) {
    match term {
        Term::Continue(expr, k) => {
            stack.push(*k);
            collect_expr_labels(expr, stack);
        }
        Term::Branch(_, kt, kf) => {
            stack.push(*kt);
            stack.push(*kf);
        }
    }
}

fn collect_expr_labels(expr: &Expr, stack: &mut Vec<Label>) {
    match expr {
        Expr::Proc(k) | Expr::Code(k) => stack.push(*k),
        Expr::Fix(_, exprs) => {
            for e in exprs {
                collect_expr_labels(e, stack);
            }
        }
        _ => {}
    }
}
