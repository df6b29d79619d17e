//! Free-variable analysis: for every label, the set of
//! variables it references that aren't bound within its own subtree.
//! Memoized by label since the graph can share a continuation between
//! multiple predecessors (an `if`'s join point, a loop back-edge).
//!
//! A `kproc`'s free-variable set — its body's free set, which the `kargs`
//! case already prunes of the procedure's own parameters — is exactly the
//! capture list closure conversion needs: the free variables of its body
//! that aren't its own parameters.

use crate::ast::{Continuation, Expr, Graph, Label, Term, Var};
use std::collections::{BTreeSet, HashMap};

pub type VarSet = BTreeSet<Var>;

pub struct FreeVars {
    per_label: HashMap<Label, VarSet>,
}

impl FreeVars {
    pub fn of(&self, label: Label) -> &VarSet {
        static EMPTY: std::sync::OnceLock<VarSet> = std::sync::OnceLock::new();
        self.per_label.get(&label).unwrap_or_else(|| EMPTY.get_or_init(VarSet::new))
    }

    /// The capture list for a `kproc` at `label` — identical to its free
    /// set, named separately so call sites in `closure.rs` read clearly.
    pub fn captures_of(&self, label: Label) -> &VarSet {
        self.of(label)
    }
}

pub fn analyze(graph: &Graph, entry: Label) -> FreeVars {
    let mut memo = HashMap::new();
    free_of_label(graph, entry, &mut memo);
    FreeVars { per_label: memo }
}

fn free_of_label(graph: &Graph, label: Label, memo: &mut HashMap<Label, VarSet>) -> VarSet {
    if let Some(s) = memo.get(&label) {
        return s.clone();
    }
    // Insert a placeholder before recursing so a cyclic reference (mutual
    // recursion through `fix`) terminates instead of looping forever; the
    // placeholder is corrected once the true set is known below.
    memo.insert(label, VarSet::new());

    let result = match graph.get(label) {
        None => VarSet::new(),
        Some(Continuation::Kargs { vars, term }) => {
            let mut s = free_of_term(graph, term, memo);
            for v in vars {
                s.remove(v);
            }
            s
        }
        Some(Continuation::Kreceive { k, .. }) => free_of_label(graph, *k, memo),
        Some(Continuation::Kproc { tail, body, .. }) => {
            let mut s = free_of_label(graph, *body, memo);
            s.extend(free_of_label(graph, *tail, memo));
            s
        }
        Some(Continuation::Ktail) => VarSet::new(),
    };
    memo.insert(label, result.clone());
    result
}

fn free_of_term(graph: &Graph, term: &Term, memo: &mut HashMap<Label, VarSet>) -> VarSet {
    match term {
        Term::Continue(expr, k) => {
            let mut s = free_of_expr(graph, expr, memo);
            s.extend(free_of_label(graph, *k, memo));
            s
        }
        Term::Branch(arg, kt, kf) => {
            let mut s = VarSet::new();
            s.insert(*arg);
            s.extend(free_of_label(graph, *kt, memo));
            s.extend(free_of_label(graph, *kf, memo));
            s
        }
    }
}

fn free_of_expr(graph: &Graph, expr: &Expr, memo: &mut HashMap<Label, VarSet>) -> VarSet {
    match expr {
        Expr::Const(_) | Expr::Prim(_) | Expr::Code(_) | Expr::MakeRecord(_) => VarSet::new(),
        Expr::Values(vars) | Expr::Primcall(_, vars) | Expr::Record(vars) => vars.iter().copied().collect(),
        Expr::Call(f, args) => {
            let mut s: VarSet = args.iter().copied().collect();
            s.insert(*f);
            s
        }
        Expr::Proc(k) => free_of_label(graph, *k, memo),
        Expr::Fix(names, exprs) => {
            let mut s = VarSet::new();
            for e in exprs {
                s.extend(free_of_expr(graph, e, memo));
            }
            for n in names {
                s.remove(n);
            }
            s
        }
        Expr::Set(target, val) => {
            let mut s = VarSet::new();
            s.insert(*target);
            s.insert(*val);
            s
        }
        Expr::Box(v) | Expr::Unbox(v) | Expr::Select(v, _) | Expr::Offset(v, _) => {
            let mut s = VarSet::new();
            s.insert(*v);
            s
        }
        Expr::RecordSet(r, _, v) => {
            let mut s = VarSet::new();
            s.insert(*r);
            s.insert(*v);
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sexpr::read_all;
    use crate::translate::translate_program;

    #[test]
    fn closure_captures_enclosing_binding() {
        let forms = read_all("(define (make-adder n) (lambda (x) (+ x n))) (display ((make-adder 5) 1))").unwrap();
        let graph = translate_program(&forms).unwrap();
        let fv = analyze(&graph, graph.entry);
        // Find the inner lambda's kproc and confirm its capture set is
        // non-empty (it must capture `n`).
        let mut found_capture = false;
        for label in graph.labels() {
            if let Some(Continuation::Kproc { arity, .. }) = graph.get(label) {
                if arity.req == 1 && !fv.captures_of(label).is_empty() {
                    found_capture = true;
                }
            }
        }
        assert!(found_capture);
    }
}
