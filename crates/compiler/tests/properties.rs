//! Pipeline invariants checked against the public
//! pipeline API without shelling out to `cc` (the end-to-end scenarios in
//! `scenarios.rs` cover the runtime-observable ones: tail-call bounded
//! stack, `call/cc`, `call-with-values`).

use schemec::ast::{Continuation, Expr, Term};
use schemec::{closure, contract, sexpr, translate};

fn graph_for(src: &str) -> schemec::ast::Graph {
    let forms = sexpr::read_all(src).expect("read");
    translate::translate_program(&forms).expect("translate")
}

/// Closed graphs: after translation, after contraction, and
/// after closure conversion, every reachable label must still resolve.
#[test]
fn graph_stays_closed_through_the_whole_pipeline() {
    let programs = [
        "(display (+ 1 2 3))",
        "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (display (fact 10))",
        "(display (call/cc (lambda (k) (+ 1 (k 42)))))",
        "(define (map f xs) (if (null? xs) '() (cons (f (car xs)) (map f (cdr xs))))) (display (map (lambda (x) (* x x)) '(1 2 3 4)))",
        "(call-with-values (lambda () (values 1 2 3)) (lambda (a b c) (display (+ a b c))))",
    ];
    for src in programs {
        let mut graph = graph_for(src);
        assert!(graph.check_closed().is_ok(), "not closed after translate: {src}");
        contract::optimize(&mut graph);
        assert!(graph.check_closed().is_ok(), "not closed after optimize: {src}");
        closure::convert(&mut graph);
        assert!(graph.check_closed().is_ok(), "not closed after closure conversion: {src}");
    }
}

/// Confluence (weak): once contraction reaches its fixed point,
/// running it again on the same graph clicks zero more times.
#[test]
fn contraction_is_idempotent_once_fixed() {
    let mut graph = graph_for("(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (display (fact 10))");
    let first = contract::optimize(&mut graph);
    assert!(first > 0, "expected at least one rewrite on first pass");
    let second = contract::optimize(&mut graph);
    assert_eq!(second, 0, "fixed point should click zero more times");
}

/// Folding soundness: a primcall on all-constant operands
/// rewrites to a const equal to what the runtime would compute, and the
/// rewritten primcall no longer appears anywhere reachable.
#[test]
fn pure_primcalls_on_constants_disappear_after_folding() {
    let mut graph = graph_for("(display (* 6 7))");
    contract::optimize(&mut graph);
    for label in graph.labels() {
        if let Some(Continuation::Kargs { term: Term::Continue(Expr::Primcall(name, _), _), .. }) = graph.get(label) {
            assert_ne!(name, "*", "constant-operand primcall survived folding");
        }
    }
}

/// Dead-code safety: a `fix`-bound procedure never called from
/// anywhere reachable is dropped entirely, rather than merely its body.
#[test]
fn unreferenced_definitions_are_eliminated() {
    let mut graph = graph_for("(define (unused x) (* x x)) (display 5)");
    contract::optimize(&mut graph);
    let mut any_fix = false;
    for label in graph.labels() {
        if let Some(Continuation::Kargs { term: Term::Continue(Expr::Fix(..), _), .. }) = graph.get(label) {
            any_fix = true;
        }
    }
    assert!(!any_fix, "dead top-level definition should be eliminated by DCE");
}
