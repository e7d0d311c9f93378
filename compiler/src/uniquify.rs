// uniquify.rs: Give every bound name in a program a unique spelling
//
// Renames each `let`, `let ... in`, and loop variable that re-binds a name
// already bound (or declared as a buffer or scalar) to a fresh `name_N`,
// rewriting the references in its scope. Later passes can then treat a
// name as identifying one binding.
//
// Preconditions: none; unbound references are left untouched.
// Postconditions: no two bindings share a name, and no binding shadows a
//                 declaration. The program computes the same values.
// Failure modes: none.
// Side effects: none (returns a new program).

use std::collections::{HashMap, HashSet};

use crate::ir::*;
use crate::scope::Scope;

/// Return a copy of `program` in which every bound name is unique.
pub fn uniquify_names(program: &Program) -> Program {
    let mut out = program.clone();
    let mut renamer = Renamer::new(program);
    renamer.visit_stmt(&mut out.body);
    if renamer.renamed > 0 {
        log::debug!("uniquify: renamed {} binding(s)", renamer.renamed);
    }
    out
}

struct Renamer {
    /// Current spelling of each source name in scope.
    names: Scope<'static, String>,
    /// Every name that appears anywhere, plus every name handed out.
    taken: HashSet<String>,
    /// Names that have been bound or declared so far.
    seen: HashSet<String>,
    next_suffix: HashMap<String, u32>,
    renamed: usize,
}

impl Renamer {
    fn new(program: &Program) -> Self {
        let mut taken = HashSet::new();
        collect_stmt_names(&program.body, &mut taken);
        let mut seen = HashSet::new();
        for name in program
            .buffers
            .iter()
            .map(|b| &b.name.name)
            .chain(program.scalars.iter().map(|s| &s.name.name))
        {
            taken.insert(name.clone());
            seen.insert(name.clone());
        }
        Renamer {
            names: Scope::new(),
            taken,
            seen,
            next_suffix: HashMap::new(),
            renamed: 0,
        }
    }

    fn fresh(&mut self, base: &str) -> String {
        let counter = self.next_suffix.entry(base.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{base}_{counter}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Enter a binding of `ident`, renaming it in place if needed.
    fn bind(&mut self, ident: &mut Ident) -> String {
        let original = ident.name.clone();
        let spelling = if self.seen.insert(original.clone()) {
            original.clone()
        } else {
            self.renamed += 1;
            self.fresh(&original)
        };
        self.seen.insert(spelling.clone());
        self.names.push(original.as_str(), spelling.clone());
        ident.name = spelling;
        original
    }

    fn unbind(&mut self, original: &str) {
        self.names.pop(original);
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) {
        match &mut stmt.kind {
            StmtKind::LetStmt { name, value, body } => {
                self.visit_expr(value);
                let original = self.bind(name);
                self.visit_stmt(body);
                self.unbind(&original);
            }
            StmtKind::For {
                var,
                min,
                max,
                body,
                ..
            } => {
                self.visit_expr(min);
                self.visit_expr(max);
                let original = self.bind(var);
                self.visit_stmt(body);
                self.unbind(&original);
            }
            StmtKind::IfThenElse {
                cond,
                then_case,
                else_case,
            } => {
                self.visit_expr(cond);
                self.visit_stmt(then_case);
                if let Some(else_case) = else_case {
                    self.visit_stmt(else_case);
                }
            }
            StmtKind::Store(store) => {
                self.visit_expr(&mut store.index);
                self.visit_expr(&mut store.value);
            }
            StmtKind::Evaluate(expr) => self.visit_expr(expr),
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.visit_stmt(s);
                }
            }
        }
    }

    fn visit_expr(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::IntImm(_) => {}
            ExprKind::Var(name) => {
                if let Some(spelling) = self.names.get(name) {
                    *name = spelling.clone();
                }
            }
            ExprKind::Binary(_, a, b) | ExprKind::Min(a, b) | ExprKind::Max(a, b) => {
                self.visit_expr(a);
                self.visit_expr(b);
            }
            ExprKind::Neg(a) | ExprKind::Cast(_, a) => self.visit_expr(a),
            ExprKind::Select {
                cond,
                true_value,
                false_value,
            } => {
                self.visit_expr(cond);
                self.visit_expr(true_value);
                self.visit_expr(false_value);
            }
            ExprKind::Let { name, value, body } => {
                self.visit_expr(value);
                let original = self.bind(name);
                self.visit_expr(body);
                self.unbind(&original);
            }
            ExprKind::Ramp { base, stride, .. } => {
                self.visit_expr(base);
                self.visit_expr(stride);
            }
            ExprKind::Broadcast { value, .. } => self.visit_expr(value),
            ExprKind::Load(load) => self.visit_expr(&mut load.index),
        }
    }
}

// ── Name collection ──

fn collect_stmt_names(stmt: &Stmt, out: &mut HashSet<String>) {
    match &stmt.kind {
        StmtKind::LetStmt { name, value, body } => {
            out.insert(name.name.clone());
            collect_expr_names(value, out);
            collect_stmt_names(body, out);
        }
        StmtKind::For {
            var,
            min,
            max,
            body,
            ..
        } => {
            out.insert(var.name.clone());
            collect_expr_names(min, out);
            collect_expr_names(max, out);
            collect_stmt_names(body, out);
        }
        StmtKind::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            collect_expr_names(cond, out);
            collect_stmt_names(then_case, out);
            if let Some(else_case) = else_case {
                collect_stmt_names(else_case, out);
            }
        }
        StmtKind::Store(store) => {
            collect_expr_names(&store.index, out);
            collect_expr_names(&store.value, out);
        }
        StmtKind::Evaluate(expr) => collect_expr_names(expr, out),
        StmtKind::Block(stmts) => {
            for s in stmts {
                collect_stmt_names(s, out);
            }
        }
    }
}

fn collect_expr_names(expr: &Expr, out: &mut HashSet<String>) {
    match &expr.kind {
        ExprKind::IntImm(_) => {}
        ExprKind::Var(name) => {
            out.insert(name.clone());
        }
        ExprKind::Binary(_, a, b) | ExprKind::Min(a, b) | ExprKind::Max(a, b) => {
            collect_expr_names(a, out);
            collect_expr_names(b, out);
        }
        ExprKind::Neg(a) | ExprKind::Cast(_, a) => collect_expr_names(a, out),
        ExprKind::Select {
            cond,
            true_value,
            false_value,
        } => {
            collect_expr_names(cond, out);
            collect_expr_names(true_value, out);
            collect_expr_names(false_value, out);
        }
        ExprKind::Let { name, value, body } => {
            out.insert(name.name.clone());
            collect_expr_names(value, out);
            collect_expr_names(body, out);
        }
        ExprKind::Ramp { base, stride, .. } => {
            collect_expr_names(base, out);
            collect_expr_names(stride, out);
        }
        ExprKind::Broadcast { value, .. } => collect_expr_names(value, out),
        ExprKind::Load(load) => collect_expr_names(&load.index, out),
    }
}
