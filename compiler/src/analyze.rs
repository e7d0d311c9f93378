// analyze.rs: Program-level alignment analysis
//
// Walks a resolved program, maintaining congruence facts for every `let`,
// `let ... in`, and loop variable in scope, and classifies each load and
// store with the alignment analyzer. Produces a per-access report.
//
// Preconditions: `program` has been resolved (buffer parameters attached)
//                and, ideally, uniquified.
// Postconditions: returns one `AccessReport` per classified access, in
//                 program order (a store precedes the accesses inside its
//                 index and value), plus any contract diagnostics.
// Failure modes: a non-positive required alignment (E0200) or an element
//                size that does not divide it (E0201) produce diagnostics;
//                the offending accesses are left out of the report.
// Side effects: none.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::align::{AlignError, Alignment, AlignmentAnalyzer, MemoryAccess};
use crate::diag::{codes, Diagnostic};
use crate::ir::*;
use crate::modulus::{modulus_remainder, ModulusRemainder};
use crate::scope::Scope;

/// HVX vector width in bytes.
pub const DEFAULT_REQUIRED_ALIGNMENT: i64 = 128;

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnalysisOptions {
    /// Vector width in bytes that accesses must be aligned to.
    pub required_alignment: i64,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        AnalysisOptions {
            required_alignment: DEFAULT_REQUIRED_ALIGNMENT,
        }
    }
}

/// Result of alignment analysis.
#[derive(Debug)]
pub struct AnalysisResult {
    pub report: AlignmentReport,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Load,
    Store,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Load => write!(f, "load"),
            AccessKind::Store => write!(f, "store"),
        }
    }
}

/// Verdict for one memory access.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessReport {
    pub kind: AccessKind,
    pub buffer: String,
    pub element: ScalarType,
    /// The index expression as written after renaming.
    pub index: String,
    pub native_lanes: i64,
    #[serde(serialize_with = "serialize_span")]
    pub span: Span,
    #[serde(flatten)]
    pub alignment: Alignment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentReport {
    pub required_alignment: i64,
    pub accesses: Vec<AccessReport>,
}

impl AlignmentReport {
    fn count(&self, pred: impl Fn(&Alignment) -> bool) -> usize {
        self.accesses.iter().filter(|a| pred(&a.alignment)).count()
    }

    pub fn aligned(&self) -> usize {
        self.count(Alignment::is_aligned)
    }

    pub fn unaligned(&self) -> usize {
        self.count(|a| *a == Alignment::Unaligned)
    }

    pub fn unknown(&self) -> usize {
        self.count(|a| *a == Alignment::Unknown)
    }
}

impl fmt::Display for AlignmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "required alignment: {} bytes", self.required_alignment)?;
        for access in &self.accesses {
            writeln!(
                f,
                "{}<{}> {}[{}]: {} lanes={}",
                access.kind,
                access.element,
                access.buffer,
                access.index,
                access.alignment,
                access.native_lanes
            )?;
        }
        writeln!(
            f,
            "summary: {} aligned, {} unaligned, {} unknown",
            self.aligned(),
            self.unaligned(),
            self.unknown()
        )
    }
}

fn serialize_span<S: Serializer>(span: &Span, s: S) -> Result<S::Ok, S::Error> {
    [span.start, span.end].serialize(s)
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Classify every load and store in `program`.
pub fn analyze(program: &Program, options: &AnalysisOptions) -> AnalysisResult {
    let enclosing = Scope::new();
    analyze_in(program, options, &enclosing)
}

/// Like [`analyze`], with facts about free names supplied by `enclosing`.
pub fn analyze_in<'p>(
    program: &Program,
    options: &AnalysisOptions,
    enclosing: &'p Scope<'p, ModulusRemainder>,
) -> AnalysisResult {
    let mut report = AlignmentReport {
        required_alignment: options.required_alignment,
        accesses: Vec::new(),
    };
    let analyzer = match AlignmentAnalyzer::new(options.required_alignment, enclosing) {
        Ok(analyzer) => analyzer,
        Err(err) => {
            let diag = Diagnostic::error(program.span, err.to_string())
                .with_code(codes::E0200)
                .with_hint("use a positive vector width, e.g. `set alignment = 128`");
            return AnalysisResult {
                report,
                diagnostics: vec![diag],
            };
        }
    };

    let mut walker = Walker {
        analyzer,
        accesses: Vec::new(),
        diagnostics: Vec::new(),
    };
    walker.visit_stmt(&program.body);
    report.accesses = walker.accesses;

    log::debug!(
        "align: {} access(es): {} aligned, {} unaligned, {} unknown",
        report.accesses.len(),
        report.aligned(),
        report.unaligned(),
        report.unknown()
    );
    AnalysisResult {
        report,
        diagnostics: walker.diagnostics,
    }
}

// ── Walker ──────────────────────────────────────────────────────────────────

struct Walker<'p> {
    analyzer: AlignmentAnalyzer<'p>,
    accesses: Vec<AccessReport>,
    diagnostics: Vec<Diagnostic>,
}

impl Walker<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::LetStmt { name, value, body } => {
                self.visit_expr(value);
                self.analyzer.push(&name.name, value);
                self.visit_stmt(body);
                self.analyzer.pop(&name.name);
            }
            StmtKind::For {
                var,
                min,
                max,
                step,
                body,
            } => {
                self.visit_expr(min);
                self.visit_expr(max);
                // var = min + step * k for some k >= 0
                let fact = modulus_remainder(min, self.analyzer.scope())
                    + ModulusRemainder::new(*step, 0);
                self.analyzer.push_fact(&var.name, fact);
                self.visit_stmt(body);
                self.analyzer.pop(&var.name);
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
                self.record(AccessKind::Store, store, stmt.span);
                self.visit_expr(&store.index);
                self.visit_expr(&store.value);
            }
            StmtKind::Evaluate(expr) => self.visit_expr(expr),
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.visit_stmt(s);
                }
            }
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::IntImm(_) | ExprKind::Var(_) => {}
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
                self.analyzer.push(&name.name, value);
                self.visit_expr(body);
                self.analyzer.pop(&name.name);
            }
            ExprKind::Ramp { base, stride, .. } => {
                self.visit_expr(base);
                self.visit_expr(stride);
            }
            ExprKind::Broadcast { value, .. } => self.visit_expr(value),
            ExprKind::Load(load) => {
                self.record(AccessKind::Load, load, expr.span);
                self.visit_expr(&load.index);
            }
        }
    }

    fn record<A>(&mut self, kind: AccessKind, access: &A, span: Span)
    where
        A: MemoryAccess + Named,
    {
        let verdict = self
            .analyzer
            .native_lanes(access.element_type())
            .and_then(|lanes| self.analyzer.classify(access).map(|a| (lanes, a)));
        match verdict {
            Ok((native_lanes, alignment)) => self.accesses.push(AccessReport {
                kind,
                buffer: access.buffer_name().to_string(),
                element: access.element_type(),
                index: access.index().to_string(),
                native_lanes,
                span,
                alignment,
            }),
            Err(err) => self.contract_violation(err, access.buffer_name(), span),
        }
    }

    fn contract_violation(&mut self, err: AlignError, buffer: &str, span: Span) {
        let code = match err {
            AlignError::InvalidRequiredAlignment(_) => codes::E0200,
            AlignError::ElementSizeMismatch { .. } => codes::E0201,
        };
        self.diagnostics.push(
            Diagnostic::error(span, format!("cannot classify access to '{buffer}': {err}"))
                .with_code(code),
        );
    }
}

/// Name of the buffer an access touches.
trait Named {
    fn buffer_name(&self) -> &str;
}

impl Named for Load {
    fn buffer_name(&self) -> &str {
        &self.buffer.name
    }
}

impl Named for Store {
    fn buffer_name(&self) -> &str {
        &self.buffer.name
    }
}
