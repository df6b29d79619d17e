//! Alias resolution: a name bound from a `values` forwarding another
//! name is rewritten away everywhere it's used, chasing transitive
//! alias chains to their root.

use crate::ast::{Continuation, Expr, Graph, Term, Var};
use crate::varinfo::Analysis;
use std::collections::HashMap;

pub fn run(graph: &mut Graph, analysis: &Analysis) -> u32 {
    let mut subst: HashMap<Var, Var> = HashMap::new();
    for (&v, info) in &analysis.global {
        if info.isalias {
            if let Some(target) = info.alias_target {
                subst.insert(v, target);
            }
        }
    }
    if subst.is_empty() {
        return 0;
    }
    let resolve = |mut v: Var| {
        let mut seen = 0;
        while let Some(&next) = subst.get(&v) {
            if next == v || seen > subst.len() + 1 {
                break;
            }
            v = next;
            seen += 1;
        }
        v
    };

    let mut clicks = 0;
    let labels: Vec<_> = graph.labels().collect();
    for label in labels {
        if let Some(cont) = graph.get_mut(label) {
            clicks += rewrite_continuation(cont, &resolve);
        }
    }
    clicks
}

fn rewrite_continuation(cont: &mut Continuation, resolve: &impl Fn(Var) -> Var) -> u32 {
    match cont {
        Continuation::Kargs { term, .. } => rewrite_term(term, resolve),
        Continuation::Kreceive { .. } | Continuation::Kproc { .. } | Continuation::Ktail => 0,
    }
}

fn rewrite_term(term: &mut Term, resolve: &impl Fn(Var) -> Var) -> u32 {
    match term {
        Term::Continue(expr, _) => rewrite_expr(expr, resolve),
        Term::Branch(arg, _, _) => rewrite_var(arg, resolve),
    }
}

fn rewrite_var(v: &mut Var, resolve: &impl Fn(Var) -> Var) -> u32 {
    let resolved = resolve(*v);
    if resolved != *v {
        *v = resolved;
        1
    } else {
        0
    }
}

fn rewrite_vars(vars: &mut [Var], resolve: &impl Fn(Var) -> Var) -> u32 {
    vars.iter_mut().map(|v| rewrite_var(v, resolve)).sum()
}

fn rewrite_expr(expr: &mut Expr, resolve: &impl Fn(Var) -> Var) -> u32 {
    match expr {
        Expr::Const(_) | Expr::Prim(_) | Expr::Code(_) | Expr::Proc(_) | Expr::MakeRecord(_) => 0,
        Expr::Values(vars) | Expr::Primcall(_, vars) | Expr::Record(vars) => rewrite_vars(vars, resolve),
        Expr::Call(f, args) => rewrite_var(f, resolve) + rewrite_vars(args, resolve),
        Expr::Fix(_, exprs) => exprs.iter_mut().map(|e| rewrite_expr(e, resolve)).sum(),
        Expr::Set(target, val) => rewrite_var(target, resolve) + rewrite_var(val, resolve),
        Expr::Box(v) | Expr::Unbox(v) | Expr::Select(v, _) | Expr::Offset(v, _) => rewrite_var(v, resolve),
        Expr::RecordSet(r, _, v) => rewrite_var(r, resolve) + rewrite_var(v, resolve),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sexpr::read_all;
    use crate::translate::translate_program;
    use crate::varinfo::analyze;

    #[test]
    fn resolves_single_value_alias_chain() {
        let forms = read_all("(define x 5) (display x)").unwrap();
        let mut graph = translate_program(&forms).unwrap();
        let analysis = analyze(&graph, graph.entry);
        run(&mut graph, &analysis);
        assert!(graph.check_closed().is_ok());
    }
}
