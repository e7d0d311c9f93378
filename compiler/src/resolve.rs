// resolve.rs: Name resolution for valign programs
//
// Walks the parsed program, checks every variable reference against the
// enclosing bindings and scalar declarations, resolves every load and store
// to its buffer declaration, and attaches host alignment parameters to
// accesses of external buffers.
//
// Preconditions: `program` is a well-formed tree from the parser or a
//                library caller.
// Postconditions: every Load/Store whose buffer is an external declaration
//                 has `param` set; accesses to internal buffers have `param`
//                 cleared. All diagnostics are accumulated.
// Failure modes: unknown buffers, unbound names, and duplicate declarations
//                produce error diagnostics; element type mismatches produce
//                warnings. Resolution continues past errors.
// Side effects: mutates `param` fields of loads and stores in place.

use std::collections::HashMap;

use crate::diag::{codes, Diagnostic};
use crate::ir::*;
use crate::scope::Scope;

// ── Public types ────────────────────────────────────────────────────────────

/// Result of name resolution.
#[derive(Debug)]
pub struct ResolveResult {
    pub resolved: ResolvedProgram,
    pub diagnostics: Vec<Diagnostic>,
}

/// Declaration tables produced by name resolution.
#[derive(Debug, Default)]
pub struct ResolvedProgram {
    pub buffers: HashMap<String, BufferEntry>,
    pub scalars: HashMap<String, ScalarEntry>,
}

#[derive(Debug, Clone)]
pub struct BufferEntry {
    pub ty: ScalarType,
    pub kind: BufferKind,
    pub name_span: Span,
    pub loads: usize,
    pub stores: usize,
}

#[derive(Debug, Clone)]
pub struct ScalarEntry {
    pub ty: ScalarType,
    pub name_span: Span,
}

impl ResolvedProgram {
    /// Host-side parameter for `buffer`, if it is externally declared.
    pub fn param(&self, buffer: &str) -> Option<BufferParam> {
        match self.buffers.get(buffer)?.kind {
            BufferKind::External { host_alignment } => {
                Some(BufferParam::new(buffer, host_alignment))
            }
            BufferKind::Internal => None,
        }
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Resolve names in `program`, attaching buffer parameters in place.
pub fn resolve(program: &mut Program) -> ResolveResult {
    let mut resolver = Resolver::new();
    resolver.collect_declarations(program);
    resolver.resolve_stmt(&mut program.body);
    log::debug!(
        "resolve: {} buffer(s), {} scalar(s), {} diagnostic(s)",
        resolver.resolved.buffers.len(),
        resolver.resolved.scalars.len(),
        resolver.diagnostics.len()
    );
    ResolveResult {
        resolved: resolver.resolved,
        diagnostics: resolver.diagnostics,
    }
}

// ── Resolver ────────────────────────────────────────────────────────────────

struct Resolver {
    resolved: ResolvedProgram,
    /// Names bound by enclosing lets and loops, mapped to their binding span.
    bound: Scope<'static, Span>,
    diagnostics: Vec<Diagnostic>,
}

impl Resolver {
    fn new() -> Self {
        Resolver {
            resolved: ResolvedProgram::default(),
            bound: Scope::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Span of an existing buffer or scalar declaration named `name`.
    fn declared_span(&self, name: &str) -> Option<Span> {
        self.resolved
            .buffers
            .get(name)
            .map(|b| b.name_span)
            .or_else(|| self.resolved.scalars.get(name).map(|s| s.name_span))
    }

    fn duplicate(&mut self, name: &Ident, first: Span) {
        self.diagnostics.push(
            Diagnostic::error(name.span, format!("duplicate declaration of '{}'", name.name))
                .with_code(codes::E0102)
                .with_related(first, "first declared here"),
        );
    }

    // ── Pass 1: collect declarations ────────────────────────────────────

    fn collect_declarations(&mut self, program: &Program) {
        for buf in &program.buffers {
            if let Some(first) = self.declared_span(&buf.name.name) {
                self.duplicate(&buf.name, first);
                continue;
            }
            self.resolved.buffers.insert(
                buf.name.name.clone(),
                BufferEntry {
                    ty: buf.ty,
                    kind: buf.kind,
                    name_span: buf.name.span,
                    loads: 0,
                    stores: 0,
                },
            );
        }
        for scalar in &program.scalars {
            if let Some(first) = self.declared_span(&scalar.name.name) {
                self.duplicate(&scalar.name, first);
                continue;
            }
            self.resolved.scalars.insert(
                scalar.name.name.clone(),
                ScalarEntry {
                    ty: scalar.ty,
                    name_span: scalar.name.span,
                },
            );
        }
    }

    // ── Pass 2: walk the body ───────────────────────────────────────────

    fn resolve_stmt(&mut self, stmt: &mut Stmt) {
        match &mut stmt.kind {
            StmtKind::LetStmt { name, value, body } => {
                self.resolve_expr(value);
                self.bound.push(name.name.as_str(), name.span);
                self.resolve_stmt(body);
                self.bound.pop(&name.name);
            }
            StmtKind::For {
                var,
                min,
                max,
                body,
                ..
            } => {
                self.resolve_expr(min);
                self.resolve_expr(max);
                self.bound.push(var.name.as_str(), var.span);
                self.resolve_stmt(body);
                self.bound.pop(&var.name);
            }
            StmtKind::IfThenElse {
                cond,
                then_case,
                else_case,
            } => {
                self.resolve_expr(cond);
                self.resolve_stmt(then_case);
                if let Some(else_case) = else_case {
                    self.resolve_stmt(else_case);
                }
            }
            StmtKind::Store(store) => {
                self.resolve_expr(&mut store.index);
                self.resolve_expr(&mut store.value);
                store.param = self.resolve_access(&store.buffer, store.ty, AccessKind::Store);
            }
            StmtKind::Evaluate(expr) => self.resolve_expr(expr),
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.resolve_stmt(s);
                }
            }
        }
    }

    fn resolve_expr(&mut self, expr: &mut Expr) {
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::IntImm(_) => {}
            ExprKind::Var(name) => {
                if !self.bound.contains(name) && !self.resolved.scalars.contains_key(name.as_str())
                {
                    let hint = if self.resolved.buffers.contains_key(name.as_str()) {
                        format!("'{name}' is a buffer; read it with load<T>({name}, index)")
                    } else {
                        format!("declare it with `scalar {name}: i32` or bind it with `let`")
                    };
                    self.diagnostics.push(
                        Diagnostic::error(span, format!("unbound variable '{name}'"))
                            .with_code(codes::E0101)
                            .with_hint(hint),
                    );
                }
            }
            ExprKind::Binary(_, a, b) | ExprKind::Min(a, b) | ExprKind::Max(a, b) => {
                self.resolve_expr(a);
                self.resolve_expr(b);
            }
            ExprKind::Neg(a) | ExprKind::Cast(_, a) => self.resolve_expr(a),
            ExprKind::Select {
                cond,
                true_value,
                false_value,
            } => {
                self.resolve_expr(cond);
                self.resolve_expr(true_value);
                self.resolve_expr(false_value);
            }
            ExprKind::Let { name, value, body } => {
                self.resolve_expr(value);
                self.bound.push(name.name.as_str(), name.span);
                self.resolve_expr(body);
                self.bound.pop(&name.name);
            }
            ExprKind::Ramp { base, stride, .. } => {
                self.resolve_expr(base);
                self.resolve_expr(stride);
            }
            ExprKind::Broadcast { value, .. } => self.resolve_expr(value),
            ExprKind::Load(load) => {
                self.resolve_expr(&mut load.index);
                load.param = self.resolve_access(&load.buffer, load.ty, AccessKind::Load);
            }
        }
    }

    /// Look up the buffer an access names, record the use, and return its
    /// host parameter if external.
    fn resolve_access(
        &mut self,
        buffer: &Ident,
        ty: ScalarType,
        kind: AccessKind,
    ) -> Option<BufferParam> {
        let Some(entry) = self.resolved.buffers.get_mut(&buffer.name) else {
            let (verb, decl) = match kind {
                AccessKind::Load => ("load from", "buffer"),
                AccessKind::Store => ("store to", "alloc"),
            };
            self.diagnostics.push(
                Diagnostic::error(
                    buffer.span,
                    format!("{verb} undeclared buffer '{}'", buffer.name),
                )
                .with_code(codes::E0100)
                .with_hint(format!("declare it with `{decl} {}: {ty}`", buffer.name)),
            );
            return None;
        };
        match kind {
            AccessKind::Load => entry.loads += 1,
            AccessKind::Store => entry.stores += 1,
        }
        let declared = entry.ty;
        let name_span = entry.name_span;
        if declared != ty {
            self.diagnostics.push(
                Diagnostic::warning(
                    buffer.span,
                    format!(
                        "access type {ty} differs from the declared element type {declared} of '{}'",
                        buffer.name
                    ),
                )
                .with_code(codes::W0103)
                .with_related(name_span, "declared here"),
            );
        }
        self.resolved.param(&buffer.name)
    }
}

#[derive(Debug, Clone, Copy)]
enum AccessKind {
    Load,
    Store,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::has_errors;
    use crate::parser::parse;

    fn resolve_src(source: &str) -> (Program, ResolveResult) {
        let parsed = parse(source);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        let mut program = parsed.program.expect("program");
        let result = resolve(&mut program);
        (program, result)
    }

    fn codes_of(result: &ResolveResult) -> Vec<&'static str> {
        result
            .diagnostics
            .iter()
            .filter_map(|d| d.code.map(|c| c.0))
            .collect()
    }

    fn first_store(stmt: &Stmt) -> Option<&Store> {
        match &stmt.kind {
            StmtKind::Store(s) => Some(s),
            StmtKind::LetStmt { body, .. } | StmtKind::For { body, .. } => first_store(body),
            StmtKind::Block(stmts) => stmts.iter().find_map(first_store),
            _ => None,
        }
    }

    #[test]
    fn clean_program_attaches_params() {
        let (program, result) = resolve_src(
            "buffer input: u8 align 128\nalloc out: u8\nscalar n: i32\nfor x in 0..n step 128 {\n  store<u8>(out, ramp(x, 1, 128), load<u8>(input, ramp(x, 1, 128)))\n}\n",
        );
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let store = first_store(&program.body).expect("store");
        assert_eq!(store.param, None);
        let ExprKind::Load(load) = &store.value.kind else {
            panic!("expected load")
        };
        assert_eq!(load.param, Some(BufferParam::new("input", 128)));
        assert_eq!(result.resolved.buffers["input"].loads, 1);
        assert_eq!(result.resolved.buffers["out"].stores, 1);
    }

    #[test]
    fn unknown_buffer() {
        let (_, result) = resolve_src("store<u8>(nowhere, 0, 1)");
        assert_eq!(codes_of(&result), vec!["E0100"]);
        assert!(has_errors(&result.diagnostics));
    }

    #[test]
    fn unbound_variable() {
        let (_, result) = resolve_src("alloc out: u8\nstore<u8>(out, ramp(x, 1, 128), 0)");
        assert_eq!(codes_of(&result), vec!["E0101"]);
    }

    #[test]
    fn bindings_end_with_their_scope() {
        let (_, result) = resolve_src(
            "alloc out: u8\nfor x in 0..4 { eval x }\neval (let t = 1 in t) + t\n",
        );
        // Only the trailing `t` is out of scope.
        assert_eq!(codes_of(&result), vec!["E0101"]);
    }

    #[test]
    fn loop_bounds_do_not_see_loop_var() {
        let (_, result) = resolve_src("for x in 0..x { eval 0 }");
        assert_eq!(codes_of(&result), vec!["E0101"]);
    }

    #[test]
    fn duplicate_declarations() {
        let (_, result) = resolve_src("buffer a: u8\nalloc a: u8\nscalar a: i32\n");
        assert_eq!(codes_of(&result), vec!["E0102", "E0102"]);
        assert_eq!(result.diagnostics[0].related_spans.len(), 1);
    }

    #[test]
    fn type_mismatch_is_a_warning() {
        let (_, result) = resolve_src("buffer input: u8\neval load<i16>(input, 0)");
        assert_eq!(codes_of(&result), vec!["W0103"]);
        assert!(!has_errors(&result.diagnostics));
    }
}
