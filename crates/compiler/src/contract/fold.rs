//! Constant folding and dead-code elimination.
//!
//! Covers these shape-simplification rules:
//!   - a `primcall` whose arguments are all known constants folds to a
//!     `const`, using `schemec_core::primops::fold` so compile-time and
//!     run-time primitives agree operand-for-operand;
//!   - a producer binding a variable nobody uses, with no escaping
//!     side effect, is elided in favor of its continuation;
//!   - a `fix` all of whose bound names are unused is dropped entirely,
//!     pruning only the dead names if some survive;
//!   - a `branch` on a constant boolean collapses to an unconditional jump.

use crate::ast::{Continuation, Expr, Graph, Label, Term, Var};
use crate::varinfo::Analysis;
use schemec_core::{fold, PrimOp, Value};

pub fn run(graph: &mut Graph, analysis: &Analysis) -> u32 {
    let mut clicks = 0;
    let labels: Vec<_> = graph.labels().collect();
    for label in labels {
        clicks += fold_at(graph, analysis, label);
    }
    clicks
}

fn const_of(analysis: &Analysis, v: Var) -> Option<Value> {
    analysis.global.get(&v).and_then(|i| i.const_value.clone())
}

fn is_dead(analysis: &Analysis, v: Var) -> bool {
    analysis.global.get(&v).map(|i| i.used == 0 && i.escapes == 0).unwrap_or(true)
}

fn fold_at(graph: &mut Graph, analysis: &Analysis, label: Label) -> u32 {
    let mut clicks = 0;

    // Constant-fold a primcall whose args are all known constants.
    let folded_const = if let Some(Continuation::Kargs { term: Term::Continue(Expr::Primcall(name, args), _k), .. }) = graph.get(label) {
        if let Some(op) = PrimOp::from_name(name) {
            let consts: Option<Vec<Value>> = args.iter().map(|a| const_of(analysis, *a)).collect();
            consts.and_then(|cs| fold(op, &cs))
        } else {
            None
        }
    } else {
        None
    };
    if let Some(v) = folded_const {
        if let Some(Continuation::Kargs { term, .. }) = graph.get_mut(label) {
            if let Term::Continue(expr, _) = term {
                *expr = Expr::Const(v);
                clicks += 1;
            }
        }
    }

    // Branch on a known-constant boolean: collapse to an unconditional jump.
    if let Some(Continuation::Kargs { vars, term: Term::Branch(arg, kt, kf) }) = graph.get(label) {
        if vars.is_empty() {
            if let Some(Value::Bool(b)) = const_of(analysis, *arg) {
                let target = if b { *kt } else { *kf };
                if let Some(Continuation::Kargs { term, .. }) = graph.get_mut(label) {
                    *term = Term::Continue(Expr::Values(vec![]), target);
                    clicks += 1;
                }
            }
        }
    }

    // Dead single-result producer elision: nobody reads the bound value and
    // the producing expression has no side effect worth keeping.
    let elide = if let Some(Continuation::Kargs { vars, term: Term::Continue(expr, k) }) = graph.get(label) {
        match (vars.as_slice(), expr) {
            ([v], Expr::Const(_) | Expr::Prim(_) | Expr::Values(_) | Expr::Box(_) | Expr::Unbox(_)) if is_dead(analysis, *v) => Some(*k),
            _ => None,
        }
    } else {
        None
    };
    if let Some(k) = elide {
        if let Some(Continuation::Kargs { vars, term }) = graph.get_mut(label) {
            vars.clear();
            *term = Term::Continue(Expr::Values(vec![]), k);
            clicks += 1;
        }
    }

    // All-dead `fix`: every bound name unused. Drop the whole binding,
    // continuing straight to `k`. A partially-dead `fix` prunes just the
    // unused names/exprs, keeping the rest.
    let fix_action = if let Some(Continuation::Kargs { term: Term::Continue(Expr::Fix(names, _), k), .. }) = graph.get(label) {
        if names.iter().all(|n| is_dead(analysis, *n)) {
            Some((true, *k))
        } else if names.iter().any(|n| is_dead(analysis, *n)) {
            Some((false, *k))
        } else {
            None
        }
    } else {
        None
    };
    match fix_action {
        Some((true, k)) => {
            if let Some(Continuation::Kargs { term, .. }) = graph.get_mut(label) {
                *term = Term::Continue(Expr::Values(vec![]), k);
                clicks += 1;
            }
        }
        Some((false, _)) => {
            if let Some(Continuation::Kargs { term: Term::Continue(Expr::Fix(names, exprs), _), .. }) = graph.get_mut(label) {
                let mut kept_names = Vec::new();
                let mut kept_exprs = Vec::new();
                for (n, e) in names.drain(..).zip(exprs.drain(..)) {
                    if !is_dead(analysis, n) {
                        kept_names.push(n);
                        kept_exprs.push(e);
                    }
                }
                *names = kept_names;
                *exprs = kept_exprs;
                clicks += 1;
            }
        }
        None => {}
    }

    clicks
}
