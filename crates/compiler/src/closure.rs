//! Closure conversion. After this pass runs, no `proc`
//! expression remains in the graph: every procedure is reached only
//! through a record of `(code_ptr, captured values...)`. The runtime
//! dispatches a call by reading the code pointer straight out of that
//! record (its field 0, for the singleton groups this translator ever
//! produces), so a call site only needs to prepend the callee's own
//! closure as an implicit leading argument; the callee's prologue reads
//! its captures back out of that same value.
//!
//! Mutable-and-captured variables are already represented as `box` cells
//! by the translator (every `define`/internal-letrec binding is
//! unconditionally boxed, a stricter version of the spec's "only if
//! captured" rule — see `translate.rs`'s module doc), so this pass doesn't
//! need its own box-insertion step: a captured box cell is just an
//! ordinary captured value as far as closure conversion is concerned.

use crate::ast::{ClosureInfo, Continuation, Expr, Graph, Label, Term, Var};
use crate::freevars::{self, FreeVars, VarSet};
use std::collections::HashSet;

pub fn convert(graph: &mut Graph) {
    let fv = freevars::analyze(graph, graph.entry);

    let mut converted_kprocs: HashSet<Label> = HashSet::new();
    let labels: Vec<Label> = graph.labels().collect();
    for label in labels {
        convert_procs_at(graph, &fv, label, &mut converted_kprocs);
    }

    // Re-collect: the pass above only ever appends fresh labels/vars, never
    // removes reachable ones, but a fresh scan keeps this step independent
    // of how many new nodes the first pass created.
    let labels: Vec<Label> = graph.labels().collect();
    for label in labels {
        convert_call_at(graph, label);
    }
}

fn set_term(graph: &mut Graph, label: Label, term: Term) {
    if let Some(Continuation::Kargs { term: t, .. }) = graph.get_mut(label) {
        *t = term;
    }
}

/// Builds a straight-line chain of fresh `kargs` nodes, each produced node
/// binding a chosen `Var` to one closure-conversion primitive (`make_record`,
/// `code`, `record_set`, `offset`, `select`). Every intermediate node gets a
/// placeholder term that the *next* step immediately overwrites; only the
/// final `finish` call leaves a real, reachable term behind.
struct Builder<'g> {
    graph: &'g mut Graph,
    cur: Label,
}

impl<'g> Builder<'g> {
    fn step(&mut self, vars: Vec<Var>, expr: Expr) {
        let next = self.graph.names.fresh_label();
        set_term(self.graph, self.cur, Term::Continue(expr, next));
        self.graph.insert(next, Continuation::Kargs { vars, term: Term::Continue(Expr::Values(vec![]), self.cur) });
        self.cur = next;
    }

    fn produce(&mut self, expr: Expr) -> Var {
        let v = self.graph.names.fresh_var();
        self.step(vec![v], expr);
        v
    }

    fn bind(&mut self, var: Var, expr: Expr) {
        self.step(vec![var], expr);
    }

    fn void(&mut self, expr: Expr) {
        self.step(vec![], expr);
    }

    fn finish(self, values: Vec<Var>, target: Label) {
        set_term(self.graph, self.cur, Term::Continue(Expr::Values(values), target));
    }
}

fn convert_procs_at(graph: &mut Graph, fv: &FreeVars, label: Label, converted: &mut HashSet<Label>) {
    let Some(Continuation::Kargs { term: Term::Continue(expr, k), .. }) = graph.get(label) else { return };
    let k = *k;
    match expr.clone() {
        Expr::Proc(kp) => {
            rewrite_proc_group(graph, fv, label, k, &[(None, kp)], converted);
        }
        Expr::Fix(names, exprs) if !names.is_empty() && exprs.iter().all(|e| matches!(e, Expr::Proc(_))) => {
            let group: Vec<(Option<Var>, Label)> = names
                .iter()
                .zip(exprs.iter())
                .map(|(n, e)| {
                    let Expr::Proc(kp) = e else { unreachable!() };
                    (Some(*n), *kp)
                })
                .collect();
            rewrite_proc_group(graph, fv, label, k, &group, converted);
        }
        // A `fix` mixing `proc` with other binding kinds (e.g. the
        // translator's own all-`box` letrec-slot fixes) never occurs for
        // the same names in this translator's output; left unconverted.
        _ => {}
    }
}

fn rewrite_proc_group(
    graph: &mut Graph,
    fv: &FreeVars,
    label: Label,
    k: Label,
    group: &[(Option<Var>, Label)],
    converted: &mut HashSet<Label>,
) {
    let k_total = group.len();
    let sibling_names: Vec<Var> = group.iter().filter_map(|(n, _)| *n).collect();

    // Sibling references inside a member's own body are captured like any
    // other free variable rather than reconstructed via relative pointer
    // arithmetic from each member's own closure slot: `Offset` only takes a
    // non-negative index, so a scheme that walked from member i's own slot
    // to an earlier sibling i' < i would need a negative step. Capturing
    // siblings as ordinary values (computed below via their own `offset`,
    // already live in this same record by the time any use is invoked) is
    // simple, sound, and only costs an extra slot copy — unreachable by
    // this translator's output anyway, since every `define` is boxed and
    // never produces a `fix` of `proc`s.
    let shared_free: Vec<Var> = {
        let mut set = VarSet::new();
        for &(_, kp) in group {
            set.extend(fv.captures_of(kp).iter().copied());
        }
        set.into_iter().collect()
    };
    let m = shared_free.len();

    for (i, &(_, kp)) in group.iter().enumerate() {
        if converted.insert(kp) {
            prepare_kproc_body(graph, fv, kp, k_total, i, &shared_free, sibling_names.clone());
        }
    }

    let mut b = Builder { graph, cur: label };
    let rec = b.produce(Expr::MakeRecord(k_total + m));

    // Every group name is bound to its `offset` view before anything is
    // written into the record: `offset` is pure pointer arithmetic on an
    // already-allocated (if not yet initialized) record, so this is safe,
    // and it means a sibling name captured as an ordinary free variable
    // below already has a value to copy.
    for (i, &(name, _)) in group.iter().enumerate() {
        if let Some(n) = name {
            b.bind(n, Expr::Offset(rec, i));
        }
    }

    for (i, &(_, kp)) in group.iter().enumerate() {
        let code_var = b.produce(Expr::Code(kp));
        b.void(Expr::RecordSet(rec, i, code_var));
    }
    for (j, &src) in shared_free.iter().enumerate() {
        b.void(Expr::RecordSet(rec, k_total + j, src));
    }

    if k_total == 1 && group[0].0.is_none() {
        // A bare `proc` (no enclosing `fix`): `k` is already waiting to
        // bind this expression's one result, so just forward the record.
        b.finish(vec![rec], k);
    } else {
        b.finish(vec![], k);
    }
}

fn prepare_kproc_body(
    graph: &mut Graph,
    fv: &FreeVars,
    kp: Label,
    k_total: usize,
    index: usize,
    shared_free: &[Var],
    shares: Vec<Var>,
) {
    let Some(Continuation::Kproc { arity, body, closure, .. }) = graph.get(kp).cloned() else { return };
    if closure.is_some() {
        return;
    }
    // This member's own captures, each mapped to ITS position in the
    // group's shared free-variable region — not its own index within this
    // (generally smaller) subset, which would point at the wrong slot
    // whenever a sibling member captures a different subset of names.
    let captures: Vec<(Var, usize)> = fv
        .captures_of(kp)
        .iter()
        .map(|&v| (v, shared_free.iter().position(|&s| s == v).expect("capture must be in shared_free")))
        .collect();
    let clos = graph.names.fresh_var();

    let Some(Continuation::Kargs { vars: params, term }) = graph.get(body).cloned() else { return };
    let mut new_params = Vec::with_capacity(params.len() + 1);
    new_params.push(clos);
    new_params.extend(params.iter().copied());

    // Stash the original body term behind a fresh label; the prologue
    // below falls into it once every captured free variable has been
    // rematerialized under its original identity.
    let body_rest = graph.names.fresh_label();
    graph.insert(body_rest, Continuation::Kargs { vars: vec![], term });

    // `prologue_entry` must be a real node from the start, not just a
    // reserved label: `Builder::finish` only overwrites an existing
    // `Kargs`'s term, and a kproc with zero captures never calls `step`
    // before `finish`, so an uninserted label here would leave `body`
    // jumping at a hole.
    let prologue_entry = graph.names.fresh_label();
    graph.insert(prologue_entry, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Values(vec![]), body_rest) });
    graph.insert(body, Continuation::Kargs { vars: new_params, term: Term::Continue(Expr::Values(vec![]), prologue_entry) });

    let free_vars: Vec<Var> = captures.iter().map(|&(v, _)| v).collect();

    let mut b = Builder { graph, cur: prologue_entry };
    for (fvar, j) in captures {
        // Member `index`'s own closure pointer sits at slot `index`; the
        // shared free-variable region starts right after all `k_total`
        // code-pointer cells, so the relative step from this member's own
        // slot to the shared region's `j`-th entry is `(k_total - index) + j`
        // — never negative, since `index < k_total`.
        b.bind(fvar, Expr::Select(clos, (k_total - index) + j));
    }
    b.finish(vec![], body_rest);

    if let Some(Continuation::Kproc { arity: a, closure: c, .. }) = graph.get_mut(kp) {
        *a = crate::ast::Arity { req: arity.req + 1, rest: arity.rest };
        *c = Some(ClosureInfo { free_vars, shares, offset: index });
    }
}

/// A call's target `f` is itself the value the trampoline dispatches on
/// (the runtime's `closure_code_id` reads a callable's code pointer
/// straight out of the closure/record, singleton-group field 0), so the
/// only rewrite needed here is to prepend `f` to the argument list: the
/// callee's prologue (`prepare_kproc_body`) already expects its own
/// closure as a leading `clos` parameter to unpack free variables from.
fn convert_call_at(graph: &mut Graph, label: Label) {
    let Some(Continuation::Kargs { term: Term::Continue(Expr::Call(f, args), k), .. }) = graph.get(label) else { return };
    let f = *f;
    let mut full_args = Vec::with_capacity(args.len() + 1);
    full_args.push(f);
    full_args.extend(args.iter().copied());
    let k = *k;
    set_term(graph, label, Term::Continue(Expr::Call(f, full_args), k));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Arity, NameSupply};
    use crate::sexpr::read_all;
    use crate::translate::translate_program;

    fn no_proc_remains(graph: &Graph, label: Label, seen: &mut HashSet<Label>) -> bool {
        if !seen.insert(label) {
            return true;
        }
        match graph.get(label) {
            None => true,
            Some(Continuation::Kargs { term, .. }) => match term {
                Term::Continue(Expr::Proc(_), _) => false,
                Term::Continue(Expr::Fix(_, exprs), k) => {
                    !exprs.iter().any(|e| matches!(e, Expr::Proc(_))) && no_proc_remains(graph, *k, seen)
                }
                Term::Continue(_, k) => no_proc_remains(graph, *k, seen),
                Term::Branch(_, kt, kf) => no_proc_remains(graph, *kt, seen) && no_proc_remains(graph, *kf, seen),
            },
            Some(Continuation::Kreceive { k, .. }) => no_proc_remains(graph, *k, seen),
            Some(Continuation::Kproc { tail, body, .. }) => {
                no_proc_remains(graph, *tail, seen) && no_proc_remains(graph, *body, seen)
            }
            Some(Continuation::Ktail) => true,
        }
    }

    #[test]
    fn closure_converts_captured_lambda() {
        let forms = read_all("(define (make-adder n) (lambda (x) (+ x n))) (display ((make-adder 5) 1))").unwrap();
        let mut graph = translate_program(&forms).unwrap();
        convert(&mut graph);
        assert!(graph.check_closed().is_ok());
        let mut seen = HashSet::new();
        assert!(no_proc_remains(&graph, graph.entry, &mut seen));
    }

    #[test]
    fn converts_mutually_recursive_fix_group() {
        // Hand-built graph: `fix((even_p, odd_p), (proc(k_even), proc(k_odd)))`
        // then `call(even_p, [])`, exercising the shared-record group path
        // the translator itself never emits (it always boxes `define`s).
        let mut names = NameSupply::new();
        let entry = names.fresh_label();
        let mut graph = Graph::new(names, entry);

        let even_name = graph.fresh_var();
        let odd_name = graph.fresh_var();

        let even_tail = graph.fresh_label();
        graph.insert(even_tail, Continuation::Ktail);
        let even_body = graph.fresh_label();
        graph.insert(
            even_body,
            Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Values(vec![odd_name]), even_tail) },
        );
        let even_kproc = graph.fresh_label();
        graph.insert(even_kproc, Continuation::Kproc { arity: Arity::fixed(0), tail: even_tail, body: even_body, closure: None });

        let odd_tail = graph.fresh_label();
        graph.insert(odd_tail, Continuation::Ktail);
        let odd_body = graph.fresh_label();
        graph.insert(
            odd_body,
            Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Values(vec![even_name]), odd_tail) },
        );
        let odd_kproc = graph.fresh_label();
        graph.insert(odd_kproc, Continuation::Kproc { arity: Arity::fixed(0), tail: odd_tail, body: odd_body, closure: None });

        let done = graph.fresh_label();
        graph.insert(done, Continuation::Ktail);

        let kreceive = graph.fresh_label();
        let recv_body = graph.fresh_label();
        graph.insert(recv_body, Continuation::Kargs { vars: vec![graph.fresh_var()], term: Term::Continue(Expr::Values(vec![]), done) });
        graph.insert(kreceive, Continuation::Kreceive { arity: Arity::fixed(1), k: recv_body });

        let call_label = graph.fresh_label();
        graph.insert(call_label, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Call(even_name, vec![]), kreceive) });

        let fix_label = entry;
        graph.insert(
            fix_label,
            Continuation::Kargs {
                vars: vec![],
                term: Term::Continue(Expr::Fix(vec![even_name, odd_name], vec![Expr::Proc(even_kproc), Expr::Proc(odd_kproc)]), call_label),
            },
        );
        let top_tail = graph.fresh_label();
        graph.insert(top_tail, Continuation::Ktail);
        graph.entry = graph.fresh_label();
        let real_entry = graph.entry;
        graph.insert(real_entry, Continuation::Kproc { arity: Arity::fixed(0), tail: top_tail, body: fix_label, closure: None });

        convert(&mut graph);
        assert!(graph.check_closed().is_ok());
        let mut seen = HashSet::new();
        assert!(no_proc_remains(&graph, graph.entry, &mut seen));

        if let Some(Continuation::Kproc { closure: Some(info), arity, .. }) = graph.get(even_kproc) {
            assert_eq!(info.offset, 0);
            assert_eq!(arity.req, 1);
        } else {
            panic!("even_kproc missing closure info after conversion");
        }
    }
}
