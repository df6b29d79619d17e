//! End-to-end scenarios: compile each program to C, link it
//! against the embedded runtime with `cc`, run it, and check stdout.

use schemec::config::CompilerConfig;

fn compile_and_run(src: &str) -> String {
    let dir = tempfile::tempdir().expect("tempdir");

    let config = CompilerConfig::new().with_emit_main(true);
    let c_src = schemec::compile(src, &config).expect("compile");

    let c_path = dir.path().join("out.c");
    std::fs::write(&c_path, &c_src).expect("write c source");

    let runtime_a = dir.path().join("libschemec_runtime.a");
    std::fs::write(&runtime_a, schemec::RUNTIME_STATICLIB).expect("write runtime archive");

    let exe_path = dir.path().join("out");
    let status = std::process::Command::new("cc")
        .arg(&c_path)
        .arg(&runtime_a)
        .arg("-o")
        .arg(&exe_path)
        .status()
        .expect("invoke cc");
    assert!(status.success(), "cc failed compiling:\n{c_src}");

    let output = std::process::Command::new(&exe_path).output().expect("run compiled program");
    assert!(output.status.success(), "program exited non-zero");
    String::from_utf8(output.stdout).expect("utf8 stdout")
}

#[test]
fn arithmetic_folds_to_a_constant() {
    assert_eq!(compile_and_run("(display (+ 1 2 3))"), "6");
}

#[test]
fn recursive_factorial() {
    let src = "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (display (fact 10))";
    assert_eq!(compile_and_run(src), "3628800");
}

#[test]
fn tail_recursive_loop_runs_in_bounded_stack() {
    let src = "(define (loop n) (if (= n 0) 'done (loop (- n 1)))) (display (loop 1000000))";
    assert_eq!(compile_and_run(src), "done");
}

#[test]
fn call_cc_escapes_with_a_value() {
    let src = "(display (call/cc (lambda (k) (+ 1 (k 42)))))";
    assert_eq!(compile_and_run(src), "42");
}

#[test]
fn map_over_a_list() {
    let src = "(define (map f xs) (if (null? xs) '() (cons (f (car xs)) (map f (cdr xs))))) \
               (display (map (lambda (x) (* x x)) '(1 2 3 4)))";
    assert_eq!(compile_and_run(src), "(1 4 9 16)");
}

#[test]
fn call_with_values_delivers_all_results() {
    let src = "(call-with-values (lambda () (values 1 2 3)) (lambda (a b c) (display (+ a b c))))";
    assert_eq!(compile_and_run(src), "6");
}
