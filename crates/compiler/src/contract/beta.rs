//! Single-use beta-contraction: inline a globally-once-used,
//! non-escaping `proc` callee.
//!
//! A candidate is a name bound (via `fix`) to a `proc` whose only use in
//! the whole graph is as the callee of an ordinary `call`, with an arg
//! list matching the proc's arity exactly (no rest-splicing — a rest
//! parameter disqualifies a callee from this pass, it's still inlinable
//! by hand but not worth the bookkeeping here). Inlining deep-copies the
//! callee's body with every internally-bound label and variable replaced
//! by a fresh one drawn from the graph's own `NameSupply`, substituting
//! the call's actual argument variables for the callee's parameters and
//! the call site's own continuation for the callee's `tail`.

use crate::ast::{Continuation, Expr, Graph, Label, NameSupply, Term, Var};
use crate::varinfo::Analysis;
use std::collections::HashMap;

struct Candidate {
    fix_label: Label,
    fix_index: usize,
    proc_var: Var,
    kproc: Label,
    call_label: Label,
    call_args: Vec<Var>,
}

pub fn run(graph: &mut Graph, analysis: &Analysis) -> u32 {
    let candidates = find_candidates(graph, analysis);
    let mut clicks = 0;
    for c in candidates {
        if inline_one(graph, &c) {
            clicks += 1;
        }
    }
    clicks
}

fn find_candidates(graph: &Graph, analysis: &Analysis) -> Vec<Candidate> {
    let mut procs: HashMap<Var, (Label, usize, Label)> = HashMap::new();
    for label in graph.labels() {
        if let Some(Continuation::Kargs { term: Term::Continue(Expr::Fix(names, exprs), _), .. }) = graph.get(label) {
            for (i, (n, e)) in names.iter().zip(exprs.iter()).enumerate() {
                if let Expr::Proc(k) = e {
                    procs.insert(*n, (label, i, *k));
                }
            }
        }
    }

    let mut out = Vec::new();
    for (&var, &(fix_label, fix_index, kproc)) in &procs {
        let Some(info) = analysis.global.get(&var) else { continue };
        if info.used != 1 {
            continue;
        }
        let Some(Continuation::Kproc { arity, closure, .. }) = graph.get(kproc) else { continue };
        if arity.rest || closure.is_some() {
            continue;
        }
        let req = arity.req;
        if let Some((call_label, args)) = find_call_site(graph, var) {
            if args.len() == req {
                out.push(Candidate { fix_label, fix_index, proc_var: var, kproc, call_label, call_args: args });
            }
        }
    }
    out
}

/// The one place `var` is invoked as an ordinary call's callee, if the
/// single recorded use is in fact that (rather than, say, being captured
/// as a value elsewhere — in which case this candidate is left alone).
fn find_call_site(graph: &Graph, var: Var) -> Option<(Label, Vec<Var>)> {
    for label in graph.labels() {
        if let Some(Continuation::Kargs { term: Term::Continue(Expr::Call(f, args), _), .. }) = graph.get(label) {
            if *f == var {
                return Some((label, args.clone()));
            }
        }
    }
    None
}

fn inline_one(graph: &mut Graph, c: &Candidate) -> bool {
    let Some(Continuation::Kproc { tail, body, .. }) = graph.get(c.kproc).cloned() else { return false };
    // Revalidate the call site against what `find_candidates` saw: within a
    // single `run`, an earlier candidate's inlining can copy a nested call
    // to this same callee into fresh code while leaving the original call
    // node (now in a dead, unreachable region) physically in the arena.
    // Bail rather than rewrite a stale match.
    let Some(Continuation::Kargs { term: Term::Continue(Expr::Call(f, args), call_k), .. }) = graph.get(c.call_label) else { return false };
    if *f != c.proc_var || args.as_slice() != c.call_args.as_slice() {
        return false;
    }
    let call_k = *call_k;

    let Some(Continuation::Kargs { vars: params, .. }) = graph.get(body).cloned() else { return false };
    if params.len() != c.call_args.len() {
        return false;
    }
    let mut var_map: HashMap<Var, Var> = HashMap::new();
    for (p, a) in params.iter().zip(c.call_args.iter()) {
        var_map.insert(*p, *a);
    }

    // All fresh allocation for this inlining is driven from one local
    // `NameSupply` taken out of the graph, so nothing allocated while
    // building the label/var maps collides with labels allocated while
    // copying the body.
    let mut names = std::mem::take(&mut graph.names);

    // Collect the callee's reachable labels so every one gets a fresh
    // counterpart; `tail` maps directly onto the call site's own
    // continuation rather than being copied.
    let reachable = reachable_labels(graph, body);
    let mut label_map: HashMap<Label, Label> = HashMap::new();
    label_map.insert(tail, call_k);
    for l in &reachable {
        label_map.entry(*l).or_insert_with(|| names.fresh_label());
    }

    collect_bound_vars(graph, &reachable, &mut var_map, &mut names);

    for l in &reachable {
        // `tail` is identified with the call site's own existing
        // continuation (`call_k`), not copied — `call_k` already holds the
        // real downstream node, and copying `Ktail` over it would destroy it.
        if *l == tail {
            continue;
        }
        let new_label = label_map[l];
        let Some(cont) = graph.get(*l).cloned() else { continue };
        let new_cont = rename_continuation(cont, &label_map, &var_map, &mut names);
        graph.insert(new_label, new_cont);
    }
    graph.names = names;

    let new_entry = label_map[&body];
    // The copied entry's `vars` named the callee's own parameters; those
    // have already been substituted for the call's actual argument
    // variables everywhere they're used, so nothing needs to be (re)bound
    // when control reaches this node — it's entered with zero values.
    if let Some(Continuation::Kargs { vars, .. }) = graph.get_mut(new_entry) {
        vars.clear();
    }
    if let Some(Continuation::Kargs { vars, term }) = graph.get_mut(c.call_label) {
        vars.clear();
        *term = Term::Continue(Expr::Values(vec![]), new_entry);
    }

    // The `fix` binding that produced the now-dead proc var is pruned by
    // the folder's dead-`fix` rule on the next round; nothing further to
    // do with `c.fix_label`/`c.fix_index` here beyond having located them
    // for that pass to find.
    let _ = (c.fix_label, c.fix_index, c.proc_var);
    true
}

fn reachable_labels(graph: &Graph, root: Label) -> Vec<Label> {
    let mut seen = std::collections::HashSet::new();
    let mut stack = vec![root];
    let mut out = Vec::new();
    while let Some(l) = stack.pop() {
        if !seen.insert(l) {
            continue;
        }
        out.push(l);
        let Some(cont) = graph.get(l) else { continue };
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
    out
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
    if let Expr::Proc(k) | Expr::Code(k) = expr {
        stack.push(*k);
    }
    if let Expr::Fix(_, exprs) = expr {
        for e in exprs {
            collect_expr_labels(e, stack);
        }
    }
}

/// Every variable *bound* anywhere in the reachable subgraph (`kargs`
/// vars, `fix` names) needs a fresh counterpart so a second copy of this
/// body never aliases the first's temporaries.
fn collect_bound_vars(graph: &Graph, reachable: &[Label], var_map: &mut HashMap<Var, Var>, names: &mut NameSupply) {
    for l in reachable {
        let Some(cont) = graph.get(*l) else { continue };
        match cont {
            Continuation::Kargs { vars, term } => {
                for v in vars {
                    var_map.entry(*v).or_insert_with(|| names.fresh_var());
                }
                collect_bound_in_term(term, var_map, names);
            }
            _ => {}
        }
    }
}

fn collect_bound_in_term(term: &Term, var_map: &mut HashMap<Var, Var>, names: &mut NameSupply) {
    if let Term::Continue(expr, _) = term {
        collect_bound_in_expr(expr, var_map, names);
    }
}

fn collect_bound_in_expr(expr: &Expr, var_map: &mut HashMap<Var, Var>, names: &mut NameSupply) {
    if let Expr::Fix(ns, exprs) = expr {
        for n in ns {
            var_map.entry(*n).or_insert_with(|| names.fresh_var());
        }
        for e in exprs {
            collect_bound_in_expr(e, var_map, names);
        }
    }
}

fn rn_var(v: Var, var_map: &HashMap<Var, Var>) -> Var {
    var_map.get(&v).copied().unwrap_or(v)
}

fn rn_label(l: Label, label_map: &HashMap<Label, Label>) -> Label {
    label_map.get(&l).copied().unwrap_or(l)
}

fn rename_continuation(cont: Continuation, lm: &HashMap<Label, Label>, vm: &HashMap<Var, Var>, names: &mut NameSupply) -> Continuation {
    match cont {
        Continuation::Kargs { vars, term } => Continuation::Kargs {
            vars: vars.into_iter().map(|v| rn_var(v, vm)).collect(),
            term: rename_term(term, lm, vm, names),
        },
        Continuation::Kreceive { arity, k } => Continuation::Kreceive { arity, k: rn_label(k, lm) },
        Continuation::Kproc { arity, tail, body, closure } => {
            // A nested lambda defined inside the inlined body is copied
            // structurally but is its own alpha-renaming scope: its
            // internal labels were already included in the outer
            // reachability walk (so `lm`/lm-mapped), but its own `tail`
            // and parameter vars are fresh names it owns, not subject to
            // the outer substitution.
            Continuation::Kproc { arity, tail: rn_label(tail, lm), body: rn_label(body, lm), closure }
        }
        Continuation::Ktail => Continuation::Ktail,
    }
}

fn rename_term(term: Term, lm: &HashMap<Label, Label>, vm: &HashMap<Var, Var>, names: &mut NameSupply) -> Term {
    match term {
        Term::Continue(expr, k) => Term::Continue(rename_expr(expr, lm, vm, names), rn_label(k, lm)),
        Term::Branch(v, kt, kf) => Term::Branch(rn_var(v, vm), rn_label(kt, lm), rn_label(kf, lm)),
    }
}

fn rename_expr(expr: Expr, lm: &HashMap<Label, Label>, vm: &HashMap<Var, Var>, names: &mut NameSupply) -> Expr {
    match expr {
        Expr::Const(v) => Expr::Const(v),
        Expr::Values(vars) => Expr::Values(vars.into_iter().map(|v| rn_var(v, vm)).collect()),
        Expr::Prim(s) => Expr::Prim(s),
        Expr::Primcall(s, args) => Expr::Primcall(s, args.into_iter().map(|v| rn_var(v, vm)).collect()),
        Expr::Call(f, args) => Expr::Call(rn_var(f, vm), args.into_iter().map(|v| rn_var(v, vm)).collect()),
        Expr::Proc(k) => Expr::Proc(rn_label(k, lm)),
        Expr::Fix(names_, exprs) => Expr::Fix(
            names_.into_iter().map(|v| rn_var(v, vm)).collect(),
            exprs.into_iter().map(|e| rename_expr(e, lm, vm, names)).collect(),
        ),
        Expr::Set(a, b) => Expr::Set(rn_var(a, vm), rn_var(b, vm)),
        Expr::Box(v) => Expr::Box(rn_var(v, vm)),
        Expr::Unbox(v) => Expr::Unbox(rn_var(v, vm)),
        Expr::Record(vars) => Expr::Record(vars.into_iter().map(|v| rn_var(v, vm)).collect()),
        Expr::Select(v, i) => Expr::Select(rn_var(v, vm), i),
        Expr::RecordSet(r, i, v) => Expr::RecordSet(rn_var(r, vm), i, rn_var(v, vm)),
        Expr::MakeRecord(n) => Expr::MakeRecord(n),
        Expr::Offset(v, i) => Expr::Offset(rn_var(v, vm), i),
        Expr::Code(k) => Expr::Code(rn_label(k, lm)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sexpr::read_all;
    use crate::translate::translate_program;
    use crate::varinfo::analyze;

    #[test]
    fn inlines_single_use_helper() {
        let forms = read_all("(define (helper x) (+ x 1)) (display (helper 41))").unwrap();
        let mut graph = translate_program(&forms).unwrap();
        let analysis = analyze(&graph, graph.entry);
        run(&mut graph, &analysis);
        assert!(graph.check_closed().is_ok());
    }
}
