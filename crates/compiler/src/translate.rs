//! AST → CPS translation.
//!
//! Implemented in the standard one-pass CPS-conversion style: translating
//! a sub-expression takes a *meta-continuation* — a Rust closure that,
//! given the variable the sub-expression's value will land in, builds
//! everything downstream and returns the label where control should land
//! to start evaluating the sub-expression. This lets `if`'s two arms and a
//! call's argument list share one downstream continuation without
//! duplicating it ahead of time.
//!
//! Boxing policy: `define` unconditionally boxes, while closure conversion
//! only boxes "any variable with updates > 0 that is captured" — two
//! different rules for two different reasons. This translator:
//!   - always boxes `define` bindings (top-level and internal-letrec),
//!     because a `fix` group needs a pre-allocated slot for forward/mutual
//!     reference regardless of whether anyone ever mutates it;
//!   - boxes a lambda parameter only if the parameter is the target of a
//!     `set!` anywhere in its own defining body (a pre-scan, not a
//!     multi-pass fixpoint — nested lambdas' own parameters are excluded).
//! Recorded as a design decision in `DESIGN.md`.

use crate::ast::{Arity, Continuation, Expr, Graph, Label, NameSupply, Term, Var};
use crate::errors::{CompileError, CompileResult};
use crate::sexpr::Datum;
use schemec_core::Value;
use std::collections::HashMap;
use std::rc::Rc;

type Cont = Rc<dyn Fn(&mut Translator, Var) -> CompileResult<Label>>;
type ArgCont = Rc<dyn Fn(&mut Translator, Vec<Var>) -> CompileResult<Label>>;

#[derive(Clone, Copy)]
struct Binding {
    var: Var,
    boxed: bool,
}

pub struct Translator {
    pub graph: Graph,
    scopes: Vec<HashMap<String, Binding>>,
    primitives: std::collections::HashSet<&'static str>,
}

/// The full primitive roster the runtime exports; a reference
/// to one of these names that isn't in lexical scope becomes `Expr::Prim`
/// or a `primcall`, never a lexical/global variable lookup.
const PRIMITIVE_NAMES: &[&str] = &[
    "+", "-", "*", "/", "div", "modulo", "%", "=", "<", ">", "<=", ">=", "eq?", "eqv?", "equal?",
    "null?", "pair?", "number?", "string?", "symbol?", "boolean?", "vector?", "bytevector?",
    "procedure?", "record?", "cons", "car", "cdr", "set-car!", "set-cdr!", "list", "list?",
    "length", "list-ref", "vector", "make-vector", "vector-length", "vector-ref", "vector-set!",
    "make-bytevector", "bytevector-length", "bytevector-u8-ref", "bytevector-u8-set!", "make-string",
    "string-length", "string-ref", "string-set!", "string-copy", "string=?", "string<?",
    "make-record", "record-ref", "record-set!", "record-meta-ref", "record-meta-set!",
    "display", "newline", "write",
];

/// Translate a full program (a sequence of top-level forms) into a graph
/// rooted at a zero-argument `kproc` whose tail continuation is a fresh
/// `ktail` ("top-level definitions").
pub fn translate_program(forms: &[Datum]) -> CompileResult<Graph> {
    let mut names = NameSupply::new();
    let entry = names.fresh_label();
    let graph = Graph::new(names, entry);
    let mut t = Translator {
        graph,
        scopes: vec![HashMap::new()],
        primitives: PRIMITIVE_NAMES.iter().copied().collect(),
    };

    let tail = t.graph.fresh_label();
    t.graph.insert(tail, Continuation::Ktail);

    let body = t.translate_sequence_as_body(forms, tail)?;

    t.graph.insert(
        entry,
        Continuation::Kproc { arity: Arity::fixed(0), tail, body, closure: None },
    );
    Ok(t.graph)
}

impl Translator {
    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn bind(&mut self, name: &str, binding: Binding) {
        self.scopes.last_mut().unwrap().insert(name.to_string(), binding);
    }

    /// Translate a `begin`-like sequence that is itself a full lambda/top-
    /// level body: collects `define`s into one enclosing `fix` (letrec
    /// semantics), then sequences the remaining forms,
    /// forwarding the final form's value to `exit`.
    fn translate_sequence_as_body(&mut self, forms: &[Datum], exit: Label) -> CompileResult<Label> {
        self.scopes.push(HashMap::new());
        let define_names = collect_top_level_defines(forms);

        let entry = if define_names.is_empty() {
            self.translate_begin(forms, exit)?
        } else {
            let fix_names: Vec<Var> = define_names.iter().map(|_| self.graph.fresh_var()).collect();
            for (name, var) in define_names.iter().zip(&fix_names) {
                self.bind(name, Binding { var: *var, boxed: true });
            }
            let after_fix = self.graph.fresh_label();
            let body_after = self.translate_begin(forms, exit)?;
            let void_tmp = self.graph.fresh_var();
            let fix_label = self.graph.fresh_label();
            self.graph.insert(
                fix_label,
                Continuation::Kargs {
                    vars: vec![void_tmp],
                    term: Term::Continue(
                        Expr::Fix(fix_names.clone(), fix_names.iter().map(|_| Expr::Box(void_tmp)).collect()),
                        after_fix,
                    ),
                },
            );
            let const_void = self.graph.fresh_label();
            self.graph.insert(
                const_void,
                Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Const(Value::Void), fix_label) },
            );
            self.graph.insert(
                after_fix,
                Continuation::Kargs { vars: fix_names, term: Term::Continue(Expr::Values(vec![]), body_after) },
            );
            const_void
        };
        self.scopes.pop();
        Ok(entry)
    }

    /// `begin`: translate right-to-left so the current continuation
    /// threads through each form. The value of every form but
    /// the last is discarded.
    fn translate_begin(&mut self, forms: &[Datum], exit: Label) -> CompileResult<Label> {
        match forms {
            [] => {
                let l = self.graph.fresh_label();
                self.graph.insert(l, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Const(Value::Void), exit) });
                Ok(l)
            }
            [last] => self.translate_form(last, Rc::new(move |t: &mut Translator, v: Var| {
                let l = t.graph.fresh_label();
                t.graph.insert(l, Continuation::Kargs { vars: vec![v], term: Term::Continue(Expr::Values(vec![v]), exit) });
                Ok(l)
            })),
            [first, rest @ ..] => {
                let rest = rest.to_vec();
                self.translate_form(first, Rc::new(move |t: &mut Translator, _v: Var| {
                    t.translate_begin(&rest, exit)
                }))
            }
        }
    }

    /// Dispatch for a single top-level-or-nested form: `define`/`set!` are
    /// only meaningful here (not inside `translate_expr`'s general
    /// expression grammar), everything else delegates to `translate_expr`.
    fn translate_form(&mut self, form: &Datum, cc: Cont) -> CompileResult<Label> {
        if let Datum::List(items) = form {
            if let Some(Datum::Symbol(head)) = items.first() {
                match head.as_str() {
                    "define" => return self.translate_define(items, cc),
                    "set!" => return self.translate_set(items, cc),
                    _ => {}
                }
            }
        }
        self.translate_expr(form, cc)
    }

    fn translate_define(&mut self, items: &[Datum], cc: Cont) -> CompileResult<Label> {
        // (define name expr) or (define (name . args) body...) sugar.
        let (name, rhs): (String, Datum) = match items.get(1) {
            Some(Datum::Symbol(n)) => {
                let rhs = items.get(2).cloned().unwrap_or(Datum::List(vec![Datum::Symbol("void".into())]));
                (n.clone(), rhs)
            }
            Some(Datum::List(sig)) => {
                let Some(Datum::Symbol(n)) = sig.first() else {
                    return Err(CompileError::Translate("malformed define signature".into()));
                };
                let mut lambda = vec![Datum::Symbol("lambda".into()), Datum::List(sig[1..].to_vec())];
                lambda.extend_from_slice(&items[2..]);
                (n.clone(), Datum::List(lambda))
            }
            _ => return Err(CompileError::Translate("malformed define".into())),
        };
        let binding = self.lookup(&name).ok_or_else(|| CompileError::Translate(format!("define of unhoisted name {name}")))?;
        self.translate_expr(&rhs, Rc::new(move |t: &mut Translator, v: Var| {
            let l = t.graph.fresh_label();
            let next = cc(t, v)?;
            // `l` is the landing point for whatever upstream expr produced
            // `v` (it's passed as that expr's own continuation), so it must
            // bind `v` here — nothing else in the graph ever names it.
            t.graph.insert(l, Continuation::Kargs { vars: vec![v], term: Term::Continue(Expr::Set(binding.var, v), next) });
            Ok(l)
        }))
    }

    fn translate_set(&mut self, items: &[Datum], cc: Cont) -> CompileResult<Label> {
        let Some(Datum::Symbol(name)) = items.get(1) else {
            return Err(CompileError::Translate("malformed set!".into()));
        };
        let binding = self.lookup(name).ok_or_else(|| CompileError::Translate(format!("set! of unbound name {name}")))?;
        if !binding.boxed {
            return Err(CompileError::Translate(format!("set! target {name} was not pre-scanned as assigned")));
        }
        let rhs = items.get(2).cloned().ok_or_else(|| CompileError::Translate("set! missing value".into()))?;
        self.translate_expr(&rhs, Rc::new(move |t: &mut Translator, v: Var| {
            let l = t.graph.fresh_label();
            let next = cc(t, v)?;
            t.graph.insert(l, Continuation::Kargs { vars: vec![v], term: Term::Continue(Expr::Set(binding.var, v), next) });
            Ok(l)
        }))
    }

    fn translate_expr(&mut self, d: &Datum, cc: Cont) -> CompileResult<Label> {
        match d {
            Datum::Int(_) | Datum::Float(_) | Datum::Bool(_) | Datum::Char(_) | Datum::Str(_) | Datum::Null => {
                self.translate_const(datum_to_value(d), cc)
            }
            Datum::Quote(inner) => self.translate_const(quoted_datum_to_value(inner), cc),
            Datum::Symbol(name) => self.translate_var_ref(name, cc),
            Datum::List(items) => self.translate_list_form(items, cc),
        }
    }

    fn translate_const(&mut self, v: Value, cc: Cont) -> CompileResult<Label> {
        let t = self.graph.fresh_var();
        let next = cc(self, t)?;
        let l = self.graph.fresh_label();
        self.graph.insert(l, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Const(v), next) });
        Ok(l)
    }

    fn translate_var_ref(&mut self, name: &str, cc: Cont) -> CompileResult<Label> {
        if self.primitives.contains(name) && self.lookup(name).is_none() {
            let t = self.graph.fresh_var();
            let next = cc(self, t)?;
            let l = self.graph.fresh_label();
            self.graph.insert(l, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Prim(name.to_string()), next) });
            return Ok(l);
        }
        let binding = self.lookup(name).ok_or_else(|| CompileError::Translate(format!("unbound variable {name}")))?;
        if binding.boxed {
            let t = self.graph.fresh_var();
            let next = cc(self, t)?;
            let l = self.graph.fresh_label();
            self.graph.insert(l, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Unbox(binding.var), next) });
            Ok(l)
        } else {
            let t = self.graph.fresh_var();
            let next = cc(self, t)?;
            let l = self.graph.fresh_label();
            self.graph.insert(l, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Values(vec![binding.var]), next) });
            Ok(l)
        }
    }

    fn translate_list_form(&mut self, items: &[Datum], cc: Cont) -> CompileResult<Label> {
        match items.first() {
            Some(Datum::Symbol(head)) => match head.as_str() {
                "if" => self.translate_if(items, cc),
                "begin" => self.translate_begin_expr(&items[1..], cc),
                "lambda" => self.translate_lambda(items, cc),
                "quote" => self.translate_const(quoted_datum_to_value(&items[1]), cc),
                "call/cc" | "call-with-current-continuation" => self.translate_call_cc(items, cc),
                "values" => self.translate_values(&items[1..], cc),
                "call-with-values" => self.translate_call_with_values(items, cc),
                "apply" => self.translate_apply(items, cc),
                _ => self.translate_application(items, cc),
            },
            _ => self.translate_application(items, cc),
        }
    }

    /// `begin` used in expression (not body/letrec-collecting) position:
    /// no `define`s are hoisted, the final value goes to `cc`.
    fn translate_begin_expr(&mut self, forms: &[Datum], cc: Cont) -> CompileResult<Label> {
        match forms {
            [] => self.translate_const(Value::Void, cc),
            [last] => self.translate_expr(last, cc),
            [first, rest @ ..] => {
                let rest = rest.to_vec();
                self.translate_expr(first, Rc::new(move |t: &mut Translator, _v: Var| {
                    t.translate_begin_expr(&rest, cc.clone())
                }))
            }
        }
    }

    /// `if c t f`: `t`/`f` are each translated with continuation
    /// `cc`; `c` becomes a `branch` whose targets are zero-arg stubs
    /// heading into the translated arms (branch forwards no values).
    fn translate_if(&mut self, items: &[Datum], cc: Cont) -> CompileResult<Label> {
        let cond = items.get(1).ok_or_else(|| CompileError::Translate("if missing condition".into()))?.clone();
        let then = items.get(2).ok_or_else(|| CompileError::Translate("if missing then-branch".into()))?.clone();
        let els = items.get(3).cloned().unwrap_or(Datum::List(vec![Datum::Symbol("void".into())]));

        let then_entry = self.translate_expr(&then, cc.clone())?;
        let else_entry = self.translate_expr(&els, cc)?;

        let kt = self.graph.fresh_label();
        self.graph.insert(kt, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Values(vec![]), then_entry) });
        let kf = self.graph.fresh_label();
        self.graph.insert(kf, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Values(vec![]), else_entry) });

        self.translate_expr(&cond, Rc::new(move |t: &mut Translator, v: Var| {
            let l = t.graph.fresh_label();
            t.graph.insert(l, Continuation::Kargs { vars: vec![], term: Term::Branch(v, kt, kf) });
            Ok(l)
        }))
    }

    /// `lambda (args . rest) body...`.
    fn translate_lambda(&mut self, items: &[Datum], cc: Cont) -> CompileResult<Label> {
        let params = items.get(1).ok_or_else(|| CompileError::Translate("lambda missing parameter list".into()))?;
        let (param_names, has_rest) = parse_params(params)?;
        let body_forms = &items[2..];

        let assigned = assigned_names_in(body_forms);
        self.scopes.push(HashMap::new());
        let mut param_vars = Vec::with_capacity(param_names.len());
        for name in &param_names {
            let var = self.graph.fresh_var();
            let boxed = assigned.contains(name);
            self.bind(name, Binding { var, boxed });
            param_vars.push((var, boxed));
        }

        let tail = self.graph.fresh_label();
        self.graph.insert(tail, Continuation::Ktail);
        let after_unboxing = self.translate_sequence_as_body(body_forms, tail)?;

        // Materialize box cells for any assigned parameter before the
        // shared body logic runs: the `kproc`'s body binds the raw
        // incoming parameter values; boxed ones are immediately wrapped,
        // rebinding each assigned parameter's name to its box cell before
        // the translated body (which reads it back with `Unbox`) starts.
        let (body, raw_vars) = self.wrap_boxed_params(&param_vars, after_unboxing);
        self.scopes.pop();

        // `param_names` includes the rest parameter's own name as its last
        // element when `has_rest`, so the *required* count is one fewer.
        let arity = if has_rest { Arity::with_rest(param_names.len() - 1) } else { Arity::fixed(param_names.len()) };
        let kproc = self.graph.fresh_label();
        // `body` must itself be the `kargs` bound
        // to exactly the incoming parameters, in order.
        let kproc_body = self.graph.fresh_label();
        self.graph.insert(kproc_body, Continuation::Kargs { vars: raw_vars, term: Term::Continue(Expr::Values(vec![]), body) });
        self.graph.insert(kproc, Continuation::Kproc { arity, tail, body: kproc_body, closure: None });

        let t = self.graph.fresh_var();
        let next = cc(self, t)?;
        let l = self.graph.fresh_label();
        self.graph.insert(l, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Proc(kproc), next) });
        Ok(l)
    }

    /// For each assigned parameter, allocate a box from its raw incoming
    /// value before falling into the already-translated body (which reads
    /// it back with `Unbox` because its `Binding` was recorded `boxed`).
    /// Returns the label to continue into from the `kproc`'s own body
    /// `kargs`, plus the fresh vars that `kargs` must bind (one per
    /// parameter, positionally).
    fn wrap_boxed_params(&mut self, param_vars: &[(Var, bool)], next: Label) -> (Label, Vec<Var>) {
        let raw_vars: Vec<Var> = param_vars
            .iter()
            .map(|(binding_var, boxed)| if *boxed { self.graph.fresh_var() } else { *binding_var })
            .collect();
        let mut target = next;
        for (i, (binding_var, boxed)) in param_vars.iter().enumerate().rev() {
            if *boxed {
                let raw = raw_vars[i];
                let bind_label = self.graph.fresh_label();
                self.graph.insert(bind_label, Continuation::Kargs { vars: vec![*binding_var], term: Term::Continue(Expr::Values(vec![]), target) });
                let wrap_label = self.graph.fresh_label();
                self.graph.insert(wrap_label, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Box(raw), bind_label) });
                target = wrap_label;
            }
        }
        (target, raw_vars)
    }

    /// `(f . args)` — ordinary application, or a primcall when `f` names a
    /// known primitive not shadowed by a lexical binding.
    fn translate_application(&mut self, items: &[Datum], cc: Cont) -> CompileResult<Label> {
        let (f, args) = items.split_first().ok_or_else(|| CompileError::Translate("empty application".into()))?;
        if let Datum::Symbol(name) = f {
            if self.primitives.contains(name.as_str()) && self.lookup(name).is_none() {
                let name = name.clone();
                let args = args.to_vec();
                return self.translate_arg_list(&args, Rc::new(move |t: &mut Translator, vars: Vec<Var>| {
                    let res = t.graph.fresh_var();
                    let next = cc(t, res)?;
                    let l = t.graph.fresh_label();
                    t.graph.insert(l, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Primcall(name.clone(), vars), next) });
                    Ok(l)
                }));
            }
        }
        let f = f.clone();
        let args = args.to_vec();
        self.translate_expr(&f, Rc::new(move |t: &mut Translator, fvar: Var| {
            let args = args.clone();
            let cc = cc.clone();
            t.translate_arg_list(&args, Rc::new(move |t: &mut Translator, arg_vars: Vec<Var>| {
                let res = t.graph.fresh_var();
                let kreceive = t.graph.fresh_label();
                let recv_body = t.graph.fresh_label();
                let next = cc(t, res)?;
                t.graph.insert(recv_body, Continuation::Kargs { vars: vec![res], term: Term::Continue(Expr::Values(vec![res]), next) });
                t.graph.insert(kreceive, Continuation::Kreceive { arity: Arity::fixed(1), k: recv_body });
                let l = t.graph.fresh_label();
                t.graph.insert(l, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Call(fvar, arg_vars), kreceive) });
                Ok(l)
            }))
        }))
    }

    /// Evaluate each argument left-to-right into a fresh temp then hand the
    /// full `Vec<Var>` to `final_cc`.
    fn translate_arg_list(&mut self, items: &[Datum], final_cc: ArgCont) -> CompileResult<Label> {
        self.translate_arg_list_acc(items, Vec::new(), final_cc)
    }

    fn translate_arg_list_acc(
        &mut self,
        items: &[Datum],
        acc: Vec<Var>,
        final_cc: ArgCont,
    ) -> CompileResult<Label> {
        match items.split_first() {
            None => final_cc(self, acc),
            Some((first, rest)) => {
                let rest = rest.to_vec();
                self.translate_expr(first, Rc::new(move |t: &mut Translator, v: Var| {
                    let mut acc = acc.clone();
                    acc.push(v);
                    t.translate_arg_list_acc(&rest, acc, final_cc.clone())
                }))
            }
        }
    }

    /// `call/cc`: reifies the continuation
    /// that would have received call/cc's own result (the `kreceive` built
    /// below, same as an ordinary call) as a first-class code pointer via
    /// `Expr::Code`, and hands both it and the receiver to a `primcall`
    /// the codegen back-end lowers directly to `prim_call_cc`.
    /// This is why `call/cc` is never added to `PrimOp`'s foldable roster:
    /// it has no constant-folding meaning, only a codegen lowering.
    fn translate_call_cc(&mut self, items: &[Datum], cc: Cont) -> CompileResult<Label> {
        let receiver = items.get(1).ok_or_else(|| CompileError::Translate("call/cc missing receiver".into()))?.clone();
        self.translate_expr(&receiver, Rc::new(move |t: &mut Translator, fvar: Var| {
            let res = t.graph.fresh_var();
            let kreceive = t.graph.fresh_label();
            let recv_body = t.graph.fresh_label();
            let next = cc(t, res)?;
            t.graph.insert(recv_body, Continuation::Kargs { vars: vec![res], term: Term::Continue(Expr::Values(vec![res]), next) });
            t.graph.insert(kreceive, Continuation::Kreceive { arity: Arity::fixed(1), k: recv_body });

            let k_code = t.graph.fresh_var();
            let wrap_call = t.graph.fresh_label();
            t.graph.insert(
                wrap_call,
                Continuation::Kargs { vars: vec![k_code], term: Term::Continue(Expr::Primcall("call/cc".to_string(), vec![fvar, k_code]), kreceive) },
            );
            let reify = t.graph.fresh_label();
            t.graph.insert(reify, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Code(kreceive), wrap_call) });
            Ok(reify)
        }))
    }

    /// `(values ...)` outside a `call-with-values` consumer: this
    /// translator only ever threads a single value through a meta-
    /// continuation, so a multi-value `values` used here (a context
    /// expecting exactly one result) forwards its first value and drops
    /// the rest, matching R7RS's "unspecified" treatment of that case.
    /// `call-with-values` itself never goes through this path — it builds
    /// its own arity-matched `kreceive` directly.
    fn translate_values(&mut self, items: &[Datum], cc: Cont) -> CompileResult<Label> {
        let items = items.to_vec();
        self.translate_arg_list(&items, Rc::new(move |t: &mut Translator, vars: Vec<Var>| {
            match vars.first() {
                Some(&v) => cc(t, v),
                None => {
                    let void_var = t.graph.fresh_var();
                    let next = cc(t, void_var)?;
                    let l = t.graph.fresh_label();
                    t.graph.insert(l, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Const(Value::Void), next) });
                    Ok(l)
                }
            }
        }))
    }

    /// `call-with-values`: fuses producer/consumer through a `kreceive`
    /// whose arity matches the consumer's parameter count.
    fn translate_call_with_values(&mut self, items: &[Datum], cc: Cont) -> CompileResult<Label> {
        let producer = items.get(1).ok_or_else(|| CompileError::Translate("call-with-values missing producer".into()))?.clone();
        let consumer = items.get(2).ok_or_else(|| CompileError::Translate("call-with-values missing consumer".into()))?.clone();
        self.translate_expr(&producer, Rc::new(move |t: &mut Translator, pvar: Var| {
            let consumer = consumer.clone();
            let cc = cc.clone();
            t.translate_expr(&consumer, Rc::new(move |t: &mut Translator, cvar: Var| {
                let n = lambda_arity(&consumer).unwrap_or(1);
                let recv_vars: Vec<Var> = (0..n).map(|_| t.graph.fresh_var()).collect();
                let res = t.graph.fresh_var();
                let kreceive_outer = t.graph.fresh_label();
                let outer_body = t.graph.fresh_label();
                let next = cc(t, res)?;
                t.graph.insert(outer_body, Continuation::Kargs { vars: vec![res], term: Term::Continue(Expr::Values(vec![res]), next) });
                t.graph.insert(kreceive_outer, Continuation::Kreceive { arity: Arity::fixed(1), k: outer_body });
                let call_consumer = t.graph.fresh_label();
                t.graph.insert(call_consumer, Continuation::Kargs { vars: recv_vars.clone(), term: Term::Continue(Expr::Call(cvar, recv_vars), kreceive_outer) });
                let kreceive_inner = t.graph.fresh_label();
                t.graph.insert(kreceive_inner, Continuation::Kreceive { arity: Arity::fixed(n), k: call_consumer });
                let call_producer = t.graph.fresh_label();
                t.graph.insert(call_producer, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Call(pvar, vec![]), kreceive_inner) });
                Ok(call_producer)
            }))
        }))
    }

    /// `apply`: a `call` whose final argument is the splice list; the
    /// back-end expands it across the argument stack.
    fn translate_apply(&mut self, items: &[Datum], cc: Cont) -> CompileResult<Label> {
        let f = items.get(1).ok_or_else(|| CompileError::Translate("apply missing function".into()))?.clone();
        let rest_args = items[2..].to_vec();
        self.translate_expr(&f, Rc::new(move |t: &mut Translator, fvar: Var| {
            let rest_args = rest_args.clone();
            let cc = cc.clone();
            t.translate_arg_list(&rest_args, Rc::new(move |t: &mut Translator, arg_vars: Vec<Var>| {
                let res = t.graph.fresh_var();
                let kreceive = t.graph.fresh_label();
                let recv_body = t.graph.fresh_label();
                let next = cc(t, res)?;
                t.graph.insert(recv_body, Continuation::Kargs { vars: vec![res], term: Term::Continue(Expr::Values(vec![res]), next) });
                t.graph.insert(kreceive, Continuation::Kreceive { arity: Arity::with_rest(0), k: recv_body });
                let l = t.graph.fresh_label();
                t.graph.insert(l, Continuation::Kargs { vars: vec![], term: Term::Continue(Expr::Call(fvar, arg_vars), kreceive) });
                Ok(l)
            }))
        }))
    }
}

fn datum_to_value(d: &Datum) -> Value {
    match d {
        Datum::Int(i) => Value::Int(*i),
        Datum::Float(f) => Value::Float(*f),
        Datum::Bool(b) => Value::Bool(*b),
        Datum::Char(c) => Value::Char(*c),
        Datum::Str(s) => Value::Str(s.as_str().into()),
        Datum::Null => Value::Null,
        _ => Value::Void,
    }
}

fn quoted_datum_to_value(d: &Datum) -> Value {
    match d {
        Datum::Symbol(s) => Value::Symbol(schemec_core::Symbol::intern(s)),
        Datum::List(items) => {
            if let [a, Datum::Symbol(dot), b] = items.as_slice() {
                if dot == "." {
                    return Value::cons(quoted_datum_to_value(a), quoted_datum_to_value(b));
                }
            }
            Value::list(items.iter().map(quoted_datum_to_value).collect())
        }
        other => datum_to_value(other),
    }
}

fn parse_params(d: &Datum) -> CompileResult<(Vec<String>, bool)> {
    match d {
        Datum::Symbol(rest) => Ok((vec![rest.clone()], true)),
        Datum::Null => Ok((Vec::new(), false)),
        Datum::List(items) => {
            let mut names = Vec::new();
            let mut rest = false;
            let mut i = 0;
            while i < items.len() {
                match &items[i] {
                    Datum::Symbol(s) if s == "." => {
                        if let Some(Datum::Symbol(r)) = items.get(i + 1) {
                            names.push(r.clone());
                        }
                        rest = true;
                        break;
                    }
                    Datum::Symbol(s) => names.push(s.clone()),
                    _ => return Err(CompileError::Translate("malformed parameter list".into())),
                }
                i += 1;
            }
            Ok((names, rest))
        }
        _ => Err(CompileError::Translate("malformed parameter list".into())),
    }
}

/// Best-effort required-arity guess for a `(lambda (a b c) ...)` literal,
/// used to size the `kreceive` a `call-with-values` consumer is entered
/// through. Non-literal consumers default to unary.
fn lambda_arity(d: &Datum) -> Option<usize> {
    if let Datum::List(items) = d {
        if let Some(Datum::Symbol(s)) = items.first() {
            if s == "lambda" {
                if let Some(params) = items.get(1) {
                    let (names, rest) = parse_params(params).ok()?;
                    if !rest {
                        return Some(names.len());
                    }
                }
            }
        }
    }
    None
}

/// Names introduced by an immediate (non-nested-lambda) `define` in a
/// sequence of body forms — these get hoisted into the enclosing `fix`
/// (top-level `define`, and "local define behaves as letrec").
fn collect_top_level_defines(forms: &[Datum]) -> Vec<String> {
    let mut names = Vec::new();
    for form in forms {
        if let Datum::List(items) = form {
            if let Some(Datum::Symbol(head)) = items.first() {
                if head == "define" {
                    match items.get(1) {
                        Some(Datum::Symbol(n)) => names.push(n.clone()),
                        Some(Datum::List(sig)) => {
                            if let Some(Datum::Symbol(n)) = sig.first() {
                                names.push(n.clone());
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
    names
}

/// Names targeted by `set!` anywhere in `forms`, not descending into a
/// nested `lambda`'s own body (that lambda pre-scans itself independently
/// when it is translated).
fn assigned_names_in(forms: &[Datum]) -> std::collections::HashSet<String> {
    let mut out = std::collections::HashSet::new();
    fn walk(d: &Datum, out: &mut std::collections::HashSet<String>) {
        if let Datum::List(items) = d {
            match items.first() {
                Some(Datum::Symbol(s)) if s == "set!" => {
                    if let Some(Datum::Symbol(name)) = items.get(1) {
                        out.insert(name.clone());
                    }
                    if let Some(rhs) = items.get(2) {
                        walk(rhs, out);
                    }
                }
                Some(Datum::Symbol(s)) if s == "lambda" => {}
                _ => {
                    for item in items {
                        walk(item, out);
                    }
                }
            }
        }
    }
    for f in forms {
        walk(f, out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sexpr::read_all;

    #[test]
    fn translates_constant_arithmetic() {
        let forms = read_all("(display (+ 1 2 3))").unwrap();
        let graph = translate_program(&forms).unwrap();
        assert!(graph.check_closed().is_ok());
    }

    #[test]
    fn translates_factorial_definition() {
        let forms = read_all("(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (display (fact 10))").unwrap();
        let graph = translate_program(&forms).unwrap();
        assert!(graph.check_closed().is_ok());
    }

    #[test]
    fn translates_call_with_values() {
        let forms = read_all("(call-with-values (lambda () (values 1 2 3)) (lambda (a b c) (display (+ a b c))))").unwrap();
        let graph = translate_program(&forms).unwrap();
        assert!(graph.check_closed().is_ok());
    }
}
