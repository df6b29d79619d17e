//! C code generation: lowers a closed, closure-converted CPS graph to
//! one C function per reachable `kproc`/`kreceive` boundary, each
//! registered under the `code_id` the closure converter baked into its
//! closures — `label.0` directly.
//!
//! Calling convention, grounded in `argstack.rs`'s own
//! `cons_rest_builds_list_in_call_order` test and `primitives.rs`'s
//! `pop1`/`pop2`: every value a call delivers is pushed in plain
//! left-to-right order. A call targeting a `kproc` additionally pushes a
//! trailing continuation value on top, since a `kproc`'s prologue pops its
//! own `k` off the argument stack; a call targeting a `kreceive` does not,
//! since a `kreceive` reads `k` out of its own closure's free-variable
//! slot 0 instead. `call/cc`'s escape continuation is the one value ever
//! invoked as an ordinary `kproc`-shaped callee from outside the emitted
//! program's normal call graph — see `trampoline.rs`'s `try_resume_escape`.
//! The sole exception to plain push order is the control primitives
//! (`call/cc` et al), which pop their own operands reversed
//! (`primitives.rs::prim_call_cc`), so their push order is reversed too.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::ast::{Arity, Continuation, Expr, Graph, Label, Term, Var};
use crate::codegen::abi;
use crate::codegen::constants::{is_immediate, symbol_name, ConstantPool};
use crate::config::{legalize_identifier, CompilerConfig};
use crate::errors::{CompileError, CompileResult};
use crate::freevars::{self, FreeVars};
use schemec_core::Value;

/// Fixed arity for every non-variadic, non-control primitive, used only to
/// synthesize a wrapper closure when a primitive name is referenced as a
/// first-class value (`Expr::Prim`: a reference to a primitive name not
/// immediately applied) rather than called directly. Variadic
/// primitives (`+`, `-`, `*`, `list`, `vector`) and the control primitives
/// (`call/cc`, `call-with-values`, `apply`) aren't given wrappers — see
/// `DESIGN.md`'s Open Questions.
const PRIM_VALUE_ARITY: &[(&str, usize)] = &[
    ("/", 2),
    ("div", 2),
    ("modulo", 2),
    ("%", 2),
    ("=", 2),
    ("<", 2),
    (">", 2),
    ("<=", 2),
    (">=", 2),
    ("eq?", 2),
    ("eqv?", 2),
    ("equal?", 2),
    ("null?", 1),
    ("pair?", 1),
    ("number?", 1),
    ("string?", 1),
    ("symbol?", 1),
    ("boolean?", 1),
    ("vector?", 1),
    ("bytevector?", 1),
    ("record?", 1),
    ("procedure?", 1),
    ("cons", 2),
    ("car", 1),
    ("cdr", 1),
    ("set-car!", 2),
    ("set-cdr!", 2),
    ("list?", 1),
    ("length", 1),
    ("list-ref", 2),
    ("make-vector", 2),
    ("vector-length", 1),
    ("vector-ref", 2),
    ("vector-set!", 3),
    ("make-bytevector", 2),
    ("bytevector-length", 1),
    ("bytevector-u8-ref", 2),
    ("bytevector-u8-set!", 3),
    ("make-string", 2),
    ("string-length", 1),
    ("string-ref", 2),
    ("string-set!", 3),
    ("string-copy", 1),
    ("string=?", 2),
    ("string<?", 2),
    ("make-record", 2),
    ("record-ref", 2),
    ("record-set!", 3),
    ("record-meta-ref", 1),
    ("record-meta-set!", 2),
    ("procedure-check", 1),
    ("display", 1),
    ("write", 1),
    ("newline", 0),
];

/// Everything `codegen::mod` needs to assemble the final C translation
/// unit: forward declarations for the per-continuation functions, their
/// bodies, the reserved halt `code_id`, and the constant pool accumulated
/// while lowering `Expr::Const`.
pub struct Emitted {
    pub decls: Vec<String>,
    pub functions: String,
    pub halt_code_id: u32,
    pub entry_code_id: u32,
    pub constants: ConstantPool,
    /// `(code_id, fn_name)` for every continuation function this module
    /// defines, for `codegen::mod`'s `load_dynamic()` to register via
    /// `scm_register_code` before anything runs.
    pub registrations: Vec<(u32, String)>,
}

pub fn emit(graph: &Graph, config: &CompilerConfig) -> CompileResult<Emitted> {
    let fv = freevars::analyze(graph, graph.entry);
    let boundaries = reachable_boundaries(graph)?;
    let halt_code_id = boundaries.iter().chain(std::iter::once(&graph.entry)).map(|l| l.0).max().map_or(1, |m| m + 1);

    let mut ctx = Ctx {
        graph,
        fv: &fv,
        config,
        constants: ConstantPool::new(),
        tmp: 0,
        next_wrapper_code_id: halt_code_id + 1,
        prim_wrappers: Vec::new(),
    };
    let mut decls = Vec::new();
    let mut functions = String::new();
    let mut registrations = Vec::new();

    for &label in &boundaries {
        decls.push(format!("value fn_{}(value self);", label.0));
        registrations.push((label.0, format!("fn_{}", label.0)));
        match graph.get(label) {
            Some(&Continuation::Kproc { arity, body, .. }) => {
                ctx.emit_kproc(&mut functions, label, arity, body)?;
            }
            Some(&Continuation::Kreceive { arity, k }) => {
                ctx.emit_kreceive(&mut functions, label, arity, k)?;
            }
            _ => unreachable!("reachable_boundaries only collects kproc/kreceive labels"),
        }
    }

    decls.push(format!("value fn_{halt_code_id}(value self);"));
    registrations.push((halt_code_id, format!("fn_{halt_code_id}")));
    emit_halt(&mut functions, halt_code_id);

    for w in std::mem::take(&mut ctx.prim_wrappers) {
        decls.push(format!("value {}(value self);", w.fn_name));
        registrations.push((w.code_id, w.fn_name.clone()));
        emit_prim_wrapper(&mut functions, &w);
    }

    Ok(Emitted { decls, functions, halt_code_id, entry_code_id: graph.entry.0, constants: ctx.constants, registrations })
}

fn reachable_boundaries(graph: &Graph) -> CompileResult<Vec<Label>> {
    let mut seen = HashSet::new();
    let mut stack = vec![graph.entry];
    let mut boundaries = Vec::new();
    while let Some(l) = stack.pop() {
        if !seen.insert(l) {
            continue;
        }
        match graph.get(l) {
            None => return Err(CompileError::Graph(format!("dangling label {l}"))),
            Some(Continuation::Kargs { term, .. }) => collect_term_labels(term, &mut stack),
            Some(&Continuation::Kreceive { k, .. }) => {
                boundaries.push(l);
                stack.push(k);
            }
            Some(&Continuation::Kproc { tail, body, .. }) => {
                boundaries.push(l);
                stack.push(tail);
                stack.push(body);
            }
            Some(Continuation::Ktail) => {}
        }
    }
    boundaries.sort_by_key(|l| l.0);
    Ok(boundaries)
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

fn cvar(v: Var) -> String {
    v.to_string()
}

struct PrimWrapper {
    fn_name: String,
    symbol: String,
    arity: usize,
    code_id: u32,
}

struct Ctx<'a> {
    graph: &'a Graph,
    fv: &'a FreeVars,
    config: &'a CompilerConfig,
    constants: ConstantPool,
    tmp: u32,
    next_wrapper_code_id: u32,
    prim_wrappers: Vec<PrimWrapper>,
}

impl<'a> Ctx<'a> {
    fn fresh_tmp(&mut self) -> String {
        self.tmp += 1;
        format!("_ct{}", self.tmp)
    }

    fn kargs(&self, label: Label) -> CompileResult<(&'a [Var], &'a Term)> {
        match self.graph.get(label) {
            Some(Continuation::Kargs { vars, term }) => Ok((vars, term)),
            _ => Err(CompileError::Graph(format!("{label} is not a kargs"))),
        }
    }

    fn emit_kproc(&mut self, out: &mut String, label: Label, arity: Arity, body: Label) -> CompileResult<()> {
        let (vars, term) = self.kargs(body)?;
        let _ = writeln!(out, "value fn_{}(value self) {{", label.0);
        let _ = writeln!(out, "    (void)self;");
        let _ = writeln!(out, "    scm_gc_safepoint();");
        let _ = writeln!(out, "    value k = pop_arg();");
        let _ = writeln!(out, "    scm_chk_args({}, {});", arity.req, if arity.rest { "true" } else { "false" });
        self.emit_param_pops(out, vars, arity)?;
        self.emit_term_indented(out, term, "    ")?;
        let _ = writeln!(out, "}}\n");
        Ok(())
    }

    fn emit_kreceive(&mut self, out: &mut String, label: Label, arity: Arity, k: Label) -> CompileResult<()> {
        let (vars, term) = self.kargs(k)?;
        let _ = writeln!(out, "value fn_{}(value self) {{", label.0);
        let _ = writeln!(out, "    scm_gc_safepoint();");
        let _ = writeln!(out, "    value k = scm_closure_free_var(self, 0);");
        for (i, captured) in self.fv.of(label).iter().enumerate() {
            let _ = writeln!(out, "    value {} = scm_closure_free_var(self, {});", cvar(*captured), 1 + i);
        }
        let _ = writeln!(out, "    scm_chk_args({}, {});", arity.req, if arity.rest { "true" } else { "false" });
        self.emit_param_pops(out, vars, arity)?;
        self.emit_term_indented(out, term, "    ")?;
        let _ = writeln!(out, "}}\n");
        Ok(())
    }

    /// Renders `term` into its own buffer at base indent `""` and splices
    /// it into `out` with `indent` prefixed on every line — the one
    /// re-indentation point every inline-chain/branch recursion goes
    /// through, so nesting depth never has to be threaded as a running
    /// total.
    fn emit_term_indented(&mut self, out: &mut String, term: &Term, indent: &str) -> CompileResult<()> {
        let mut body = String::new();
        self.emit_term(&mut body, term)?;
        for line in body.lines() {
            let _ = writeln!(out, "{indent}{line}");
        }
        Ok(())
    }

    /// Pops the delivered values bound by `vars` (a `kproc`'s params, with
    /// `clos` already its own first entry, or a `kreceive`'s delivered
    /// values). A rest parameter is always `vars`'s last entry (spec
    /// §4.1's `translate_lambda`); `cons_rest` must run before the fixed
    /// entries are popped since it needs them still on the stack.
    fn emit_param_pops(&self, out: &mut String, vars: &[Var], arity: Arity) -> CompileResult<()> {
        let (fixed, rest_var) = if arity.rest {
            vars.split_last().map(|(r, f)| (f, Some(*r))).ok_or_else(|| {
                CompileError::Graph("rest arity with no rest variable bound".into())
            })?
        } else {
            (vars, None)
        };
        if let Some(rv) = rest_var {
            let _ = writeln!(out, "    value {} = scm_cons_rest({});", cvar(rv), arity.req);
        }
        for v in fixed.iter().rev() {
            let _ = writeln!(out, "    value {} = pop_arg();", cvar(*v));
        }
        Ok(())
    }

    fn emit_term(&mut self, out: &mut String, term: &Term) -> CompileResult<()> {
        match term {
            Term::Branch(arg, kt, kf) => {
                let _ = writeln!(out, "if (!({}.tag == SCM_BOOL && {}.bits == 0)) {{", cvar(*arg), cvar(*arg));
                self.emit_inline_target(out, *kt, "    ")?;
                let _ = writeln!(out, "}} else {{");
                self.emit_inline_target(out, *kf, "    ")?;
                let _ = writeln!(out, "}}");
                Ok(())
            }
            Term::Continue(expr, k) => self.emit_continue(out, expr, *k, ""),
        }
    }

    /// A branch arm's target is itself a label; render it as a nested
    /// block by recursing into its own `kargs`/`term` (branch targets are
    /// never `kproc`/`kreceive` boundaries — those always go through a
    /// `call`).
    fn emit_inline_target(&mut self, out: &mut String, label: Label, indent: &str) -> CompileResult<()> {
        let (vars, term) = self.kargs(label)?;
        if !vars.is_empty() {
            return Err(CompileError::Graph(format!("branch target {label} binds values")));
        }
        self.emit_term_indented(out, term, indent)
    }

    fn emit_continue(&mut self, out: &mut String, expr: &Expr, k: Label, indent: &str) -> CompileResult<()> {
        let is_tail = matches!(self.graph.get(k), Some(Continuation::Ktail));
        if let Expr::Call(f, args) = expr {
            return self.emit_call(out, *f, args, k, is_tail, indent);
        }
        if is_tail {
            return self.emit_tail_return(out, expr, indent);
        }
        match self.graph.get(k) {
            Some(Continuation::Kargs { vars, .. }) => {
                self.emit_binding(out, expr, vars, indent)?;
                let (_, term) = self.kargs(k)?;
                self.emit_term_indented(out, term, indent)
            }
            Some(Continuation::Kreceive { .. }) => {
                // A non-call expr's single result delivered straight into a
                // kreceive boundary (no intervening kargs): reify it and
                // tail-call, matching `translate_values`' fusion.
                let result = self.lower_single(out, expr, indent)?;
                let kc = self.reify_continuation(out, k, "k", indent)?;
                let _ = writeln!(out, "{indent}push_arg({result});");
                let _ = writeln!(out, "{indent}return _tail_call({kc});");
                Ok(())
            }
            other => Err(CompileError::Graph(format!("unexpected continuation target for {k}: {other:?}"))),
        }
    }

    /// Deliver `expr`'s value(s) to the enclosing function's own `k` (this
    /// activation's return point), no trailing continuation pushed — `k`
    /// is always a `kreceive`-shaped closure, which reads its own `k` out
    /// of its closure's free-variable slot rather than the argument stack.
    fn emit_tail_return(&mut self, out: &mut String, expr: &Expr, indent: &str) -> CompileResult<()> {
        if let Expr::Values(vars) = expr {
            for v in vars {
                let _ = writeln!(out, "{indent}push_arg({});", cvar(*v));
            }
        } else {
            let result = self.lower_single(out, expr, indent)?;
            let _ = writeln!(out, "{indent}push_arg({result});");
        }
        let _ = writeln!(out, "{indent}return _tail_call(k);");
        Ok(())
    }

    /// `expr`'s continuation `k` is an ordinary `kargs`: bind its result(s)
    /// to `vars` as plain C locals (same function, no call boundary).
    fn emit_binding(&mut self, out: &mut String, expr: &Expr, vars: &[Var], indent: &str) -> CompileResult<()> {
        if let Expr::Values(srcs) = expr {
            for (dst, src) in vars.iter().zip(srcs) {
                let _ = writeln!(out, "{indent}value {} = {};", cvar(*dst), cvar(*src));
            }
            return Ok(());
        }
        let result = self.lower_single(out, expr, indent)?;
        match vars {
            [] => {
                let _ = writeln!(out, "{indent}(void)({result});");
            }
            [v] => {
                let _ = writeln!(out, "{indent}value {} = {result};", cvar(*v));
            }
            _ => return Err(CompileError::Graph("expr bound to more than one var outside values/call".into())),
        }
        Ok(())
    }

    /// Lowers any single-value-producing expr (everything but `Call`,
    /// `Values`, `Fix`/`Proc`, handled by their own call sites) to one C
    /// expression or statement sequence, returning the name/expression
    /// holding the result.
    fn lower_single(&mut self, out: &mut String, expr: &Expr, indent: &str) -> CompileResult<String> {
        match expr {
            Expr::Const(v) => Ok(self.lower_const(out, v, indent)),
            Expr::Prim(name) => self.lower_prim_value(out, name, indent),
            Expr::Primcall(name, vars) => self.lower_primcall(out, name, vars, indent),
            Expr::Set(target, val) => {
                let _ = writeln!(out, "{indent}scm_box_set({}, {});", cvar(*target), cvar(*val));
                Ok("((value){SCM_VOID, 0ull})".into())
            }
            Expr::Box(v) => Ok(format!("scm_make_box({})", cvar(*v))),
            Expr::Unbox(v) => Ok(format!("scm_box_ref({})", cvar(*v))),
            Expr::Select(v, i) => Ok(format!("scm_record_ref({}, {i})", cvar(*v))),
            Expr::RecordSet(r, i, v) => {
                let _ = writeln!(out, "{indent}scm_record_set({}, {i}, {});", cvar(*r), cvar(*v));
                Ok("((value){SCM_VOID, 0ull})".into())
            }
            Expr::MakeRecord(n) => Ok(format!("scm_make_record({n})")),
            // `offset`'s only real use is a closure group's own code-cell
            // view of its shared record; this translator never
            // emits a multi-procedure `fix` group (every `define` is
            // boxed), so `i` is always 0 and the view is the record itself
            // — exactly what `closure_code_id`'s `fields[0]` recursion
            // expects.
            Expr::Offset(v, i) if *i == 0 => Ok(cvar(*v)),
            Expr::Offset(_, i) => Err(CompileError::Graph(format!("offset {i} unsupported: no multi-procedure fix group is ever emitted"))),
            Expr::Record(vars) => {
                let name = self.fresh_tmp();
                let _ = writeln!(out, "{indent}value {name} = scm_make_record({});", vars.len());
                for (i, v) in vars.iter().enumerate() {
                    let _ = writeln!(out, "{indent}scm_record_set({name}, {i}, {});", cvar(*v));
                }
                Ok(name)
            }
            Expr::Code(target) => self.lower_code(out, *target, "k", indent),
            Expr::Values(vars) => match vars.as_slice() {
                [v] => Ok(cvar(*v)),
                _ => Err(CompileError::Graph("multi-value Values used in single-value position".into())),
            },
            Expr::Call(..) => Err(CompileError::Graph("call handled by emit_continue, not lower_single".into())),
            Expr::Proc(_) | Expr::Fix(..) => {
                Err(CompileError::Graph("proc/fix survived closure conversion".into()))
            }
        }
    }

    /// `Expr::Code(label)`'s lowering is keyed off what `label` names, not
    /// off the call site: a closure group reifies a bare code pointer,
    /// while `translate_call_cc` reifies a `kreceive` the same way an
    /// ordinary call's continuation is reified. A `kproc`
    /// ignores `self` entirely (its captures are rematerialized via
    /// `select` on its own `clos` parameter), so it stays a bare code
    /// value; a `kreceive` always reads `k` from `self`'s free-variable
    /// slot 0, so it must be a real closure.
    fn lower_code(&mut self, out: &mut String, target: Label, current_k: &str, indent: &str) -> CompileResult<String> {
        match self.graph.get(target) {
            Some(Continuation::Kproc { .. }) => Ok(format!("scm_code_value({})", target.0)),
            Some(Continuation::Kreceive { .. }) => self.reify_continuation(out, target, current_k, indent),
            other => Err(CompileError::Graph(format!("code({target}) names {other:?}, not kproc/kreceive"))),
        }
    }

    /// Builds `scm_make_closure(code_id, [current_k, ...captures], ...)`
    /// for a `kreceive` target — the shape every reified continuation
    /// takes, whether built for an ordinary call's continuation or for
    /// `call/cc`'s escape object's resume point.
    fn reify_continuation(&mut self, out: &mut String, target: Label, current_k: &str, indent: &str) -> CompileResult<String> {
        let captures: Vec<Var> = self.fv.of(target).iter().copied().collect();
        let name = self.fresh_tmp();
        if captures.is_empty() {
            let _ = writeln!(
                out,
                "{indent}value {name}_fv[] = {{ {current_k} }};\n{indent}value {name} = scm_make_closure({}, {name}_fv, 1);",
                target.0
            );
        } else {
            let items = std::iter::once(current_k.to_string()).chain(captures.iter().map(|v| cvar(*v))).collect::<Vec<_>>().join(", ");
            let _ = writeln!(
                out,
                "{indent}value {name}_fv[] = {{ {items} }};\n{indent}value {name} = scm_make_closure({}, {name}_fv, {});",
                target.0,
                1 + captures.len()
            );
        }
        Ok(name)
    }

    /// A `call` expression: `f`'s full_args already has `f` itself
    /// prepended as `clos` by closure conversion's `convert_call_at`.
    /// Pushes plain
    /// left-to-right, then the trailing continuation — the current
    /// function's own `k` if reused in tail position, otherwise a freshly
    /// reified continuation for `k`'s own target.
    fn emit_call(&mut self, out: &mut String, f: Var, args: &[Var], k: Label, is_tail: bool, indent: &str) -> CompileResult<()> {
        let trailing = if is_tail {
            "k".to_string()
        } else {
            match self.graph.get(k) {
                Some(Continuation::Kreceive { .. }) => self.reify_continuation(out, k, "k", indent)?,
                other => return Err(CompileError::Graph(format!("non-tail call's continuation {k} is {other:?}, expected kreceive"))),
            }
        };
        for a in args {
            let _ = writeln!(out, "{indent}push_arg({});", cvar(*a));
        }
        let _ = writeln!(out, "{indent}push_arg({trailing});");
        let _ = writeln!(out, "{indent}return _tail_call({});", cvar(f));
        Ok(())
    }

    fn lower_primcall(&mut self, out: &mut String, name: &str, vars: &[Var], indent: &str) -> CompileResult<String> {
        if let Some(symbol) = abi::lookup_control_prim(name) {
            // The only control primitive the translator actually emits a
            // `primcall` for is `call/cc`, via `translate_call_cc`.
            // Its operands pop reversed (`prim_call_cc`'s pop1/pop1), so
            // they push reversed too.
            for v in vars.iter().rev() {
                let _ = writeln!(out, "{indent}push_arg({});", cvar(*v));
            }
            return Ok(format!("{symbol}()"));
        }
        if let Some((symbol, variadic)) = abi::lookup_primop(name) {
            for v in vars {
                let _ = writeln!(out, "{indent}push_arg({});", cvar(*v));
            }
            return Ok(if variadic { format!("{symbol}({})", vars.len()) } else { format!("{symbol}()") });
        }
        if let Some(b) = self.config.external_builtins.iter().find(|b| b.name == name) {
            if let Some(arity) = b.arity {
                if arity != vars.len() {
                    return Err(CompileError::Graph(format!("builtin {name} expects {arity} args, got {}", vars.len())));
                }
            }
            let args = vars.iter().map(|v| cvar(*v)).collect::<Vec<_>>().join(", ");
            return Ok(format!("{}({args})", b.symbol));
        }
        Err(CompileError::Graph(format!("unknown primitive {name}")))
    }

    /// A primitive name referenced as a first-class value (not called
    /// directly): synthesizes a small wrapper closure, one per distinct
    /// name actually referenced this way, that unpacks the ordinary call
    /// convention and forwards into the primop.
    fn lower_prim_value(&mut self, _out: &mut String, name: &str, _indent: &str) -> CompileResult<String> {
        let (symbol, variadic) = abi::lookup_primop(name)
            .ok_or_else(|| CompileError::Graph(format!("primitive {name} referenced as a value has no wrapper")))?;
        if variadic || abi::lookup_control_prim(name).is_some() {
            return Err(CompileError::Translate(format!(
                "{name} can't be used as a first-class value (variadic/control primitive)"
            )));
        }
        let arity = PRIM_VALUE_ARITY
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, a)| *a)
            .ok_or_else(|| CompileError::Graph(format!("no arity recorded for primitive value {name}")))?;
        let fn_name = format!("prim_value_{}", legalize_identifier(name));
        let code_id = match self.prim_wrappers.iter().find(|w| w.fn_name == fn_name) {
            Some(w) => w.code_id,
            None => {
                let id = self.next_wrapper_code_id;
                self.next_wrapper_code_id += 1;
                self.prim_wrappers.push(PrimWrapper { fn_name, symbol: symbol.to_string(), arity, code_id: id });
                id
            }
        };
        Ok(format!("scm_code_value({code_id})"))
    }

    fn lower_const(&mut self, out: &mut String, v: &Value, indent: &str) -> String {
        if is_immediate(v) {
            return self.lower_immediate(v);
        }
        match v {
            Value::Str(s) => {
                let name = self.fresh_tmp();
                self.emit_byte_array(out, &name, s.as_bytes(), indent);
                format!("scm_make_string_literal({name}_bytes, {})", s.len())
            }
            Value::Bytevector(bv) => {
                let name = self.fresh_tmp();
                self.emit_byte_array(out, &name, bv, indent);
                format!("scm_make_bytevector_literal({name}_bytes, {})", bv.len())
            }
            Value::Vector(items) => {
                let elems: Vec<String> = items.iter().map(|it| self.lower_const(out, it, indent)).collect();
                let name = self.fresh_tmp();
                if elems.is_empty() {
                    let _ = writeln!(out, "{indent}value {name}_items[1];");
                } else {
                    let _ = writeln!(out, "{indent}value {name}_items[] = {{ {} }};", elems.join(", "));
                }
                format!("scm_make_vector_literal({name}_items, {})", items.len())
            }
            Value::Pair(a, d) => {
                let av = self.lower_const(out, a, indent);
                let dv = self.lower_const(out, d, indent);
                format!("_cons({av}, {dv})")
            }
            Value::Record { fields, meta } => {
                let name = self.fresh_tmp();
                let _ = writeln!(out, "{indent}value {name} = scm_make_record({});", fields.len());
                for (i, f) in fields.iter().enumerate() {
                    let fv_expr = self.lower_const(out, f, indent);
                    let _ = writeln!(out, "{indent}scm_record_set({name}, {i}, {fv_expr});");
                }
                if !matches!(meta.as_ref(), Value::Void) {
                    let meta_expr = self.lower_const(out, meta, indent);
                    let _ = writeln!(out, "{indent}push_arg({name});");
                    let _ = writeln!(out, "{indent}push_arg({meta_expr});");
                    let _ = writeln!(out, "{indent}primop_record_meta_set();");
                }
                name
            }
            Value::Box(_) => unreachable!("a literal box constant never occurs (boxes are runtime-introduced)"),
            _ => unreachable!("is_immediate already handled the immediate variants"),
        }
    }

    fn lower_immediate(&mut self, v: &Value) -> String {
        match v {
            Value::Void => "((value){SCM_VOID, 0ull})".into(),
            Value::Null => "((value){SCM_NULL, 0ull})".into(),
            Value::Bool(b) => format!("((value){{SCM_BOOL, {}ull}})", *b as u64),
            Value::Char(c) => format!("((value){{SCM_CHAR, {}ull}})", *c as u64),
            Value::Int(i) => format!("((value){{SCM_INT, {}ull}})", *i as u32 as u64),
            Value::Float(f) => format!("((value){{SCM_FLOAT, {}ull}})", f.to_bits()),
            Value::Symbol(s) => {
                let idx = self.constants.intern(&symbol_name(*s));
                format!("scm_constant_ref({idx})")
            }
            _ => unreachable!("non-immediate reached lower_immediate"),
        }
    }

    fn emit_byte_array(&mut self, out: &mut String, name: &str, bytes: &[u8], indent: &str) {
        if bytes.is_empty() {
            let _ = writeln!(out, "{indent}static const uint8_t {name}_bytes[] = {{ 0 }};");
            return;
        }
        let list = bytes.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(", ");
        let _ = writeln!(out, "{indent}static const uint8_t {name}_bytes[] = {{ {list} }};");
    }
}

/// The synthetic halt continuation: the program's outermost
/// `k`, reached once the top-level `kproc`'s body tail-calls it. Pops the
/// one delivered value the same way any `kreceive`-shaped target would,
/// records it via `scm_set_result`, and returns the immediate halt value
/// `run`'s dispatch loop recognizes without a code-table lookup.
fn emit_halt(out: &mut String, code_id: u32) {
    let _ = writeln!(out, "value fn_{code_id}(value self) {{");
    let _ = writeln!(out, "    (void)self;");
    let _ = writeln!(out, "    scm_gc_safepoint();");
    let _ = writeln!(out, "    value result = pop_arg();");
    let _ = writeln!(out, "    scm_set_result(result);");
    let _ = writeln!(out, "    return scm_halt_value();");
    let _ = writeln!(out, "}}\n");
}

fn emit_prim_wrapper(out: &mut String, w: &PrimWrapper) {
    let _ = writeln!(out, "value {}(value self) {{", w.fn_name);
    let _ = writeln!(out, "    (void)self;");
    let _ = writeln!(out, "    scm_gc_safepoint();");
    let _ = writeln!(out, "    value k = pop_arg();");
    let _ = writeln!(out, "    scm_chk_args({}, false);", w.arity + 1);
    let mut names = Vec::with_capacity(w.arity);
    for i in (0..w.arity).rev() {
        let _ = writeln!(out, "    value _pv{i} = pop_arg();");
        names.push(i);
    }
    let _ = writeln!(out, "    value _pv_clos = pop_arg();");
    let _ = writeln!(out, "    (void)_pv_clos;");
    names.sort();
    for i in &names {
        let _ = writeln!(out, "    push_arg(_pv{i});");
    }
    let _ = writeln!(out, "    value result = {}();", w.symbol);
    let _ = writeln!(out, "    push_arg(result);");
    let _ = writeln!(out, "    return _tail_call(k);");
    let _ = writeln!(out, "}}\n");
}
