// ir.rs: Loop-nest IR inspected by the alignment analysis
//
// Expression and statement trees for vectorized index arithmetic and memory
// accesses. Produced by the parser (or built directly by library users) and
// read by resolve, uniquify, and the alignment analysis.
//
// Preconditions: none (data-only module).
// Postconditions: `Display` renders nodes in the textual syntax the parser
//                 accepts.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use chumsky::span::SimpleSpan;
use serde::{Serialize, Serializer};

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// Span for nodes built programmatically rather than parsed.
pub fn synthetic_span() -> Span {
    (0..0).into()
}

// ── Types ───────────────────────────────────────────────────────────────────

/// Element type of a scalar value or of one vector lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Int(u8),
    UInt(u8),
    Float(u8),
}

impl ScalarType {
    /// Parse a textual type name (`i8`..`i64`, `u8`..`u64`, `f16`, `f32`, `f64`).
    pub fn from_name(name: &str) -> Option<ScalarType> {
        match name {
            "i8" => Some(ScalarType::Int(8)),
            "i16" => Some(ScalarType::Int(16)),
            "i32" => Some(ScalarType::Int(32)),
            "i64" => Some(ScalarType::Int(64)),
            "u8" => Some(ScalarType::UInt(8)),
            "u16" => Some(ScalarType::UInt(16)),
            "u32" => Some(ScalarType::UInt(32)),
            "u64" => Some(ScalarType::UInt(64)),
            "f16" => Some(ScalarType::Float(16)),
            "f32" => Some(ScalarType::Float(32)),
            "f64" => Some(ScalarType::Float(64)),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            ScalarType::Int(b) | ScalarType::UInt(b) | ScalarType::Float(b) => u32::from(b),
        }
    }

    /// Size of one element in bytes.
    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }

    pub fn is_int(self) -> bool {
        matches!(self, ScalarType::Int(_))
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::Int(b) => write!(f, "i{b}"),
            ScalarType::UInt(b) => write!(f, "u{b}"),
            ScalarType::Float(b) => write!(f, "f{b}"),
        }
    }
}

impl Serialize for ScalarType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ── Names ───────────────────────────────────────────────────────────────────

/// A binding or declaration name with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>) -> Self {
        Ident {
            name: name.into(),
            span: synthetic_span(),
        }
    }
}

// ── Buffers ─────────────────────────────────────────────────────────────────

/// An externally declared buffer parameter. The host guarantees the buffer's
/// base address is a multiple of `host_alignment` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferParam {
    pub name: String,
    pub host_alignment: u32,
}

impl BufferParam {
    pub fn new(name: impl Into<String>, host_alignment: u32) -> Self {
        BufferParam {
            name: name.into(),
            host_alignment,
        }
    }

    pub fn host_alignment(&self) -> u32 {
        self.host_alignment
    }
}

// ── Expressions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    And,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::And => "&",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }

    /// Concrete integer semantics. `None` means the result is undefined
    /// (overflow or an out-of-range shift amount).
    pub fn apply(self, a: i64, b: i64) -> Option<i64> {
        match self {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div if b == 0 => Some(0),
            BinOp::Div => a.checked_div_euclid(b),
            BinOp::Mod if b == 0 => Some(0),
            BinOp::Mod => a.checked_rem_euclid(b),
            BinOp::Shl => a.checked_mul(pow2(b)?),
            BinOp::Shr => Some(a >> shift_amount(b)?),
            BinOp::And => Some(a & b),
            BinOp::Lt => Some(i64::from(a < b)),
            BinOp::Le => Some(i64::from(a <= b)),
            BinOp::Gt => Some(i64::from(a > b)),
            BinOp::Ge => Some(i64::from(a >= b)),
            BinOp::Eq => Some(i64::from(a == b)),
            BinOp::Ne => Some(i64::from(a != b)),
        }
    }
}

/// Largest constant shift amount the IR gives a meaning to.
pub const MAX_SHIFT: i64 = 62;

fn shift_amount(b: i64) -> Option<u32> {
    if (0..=MAX_SHIFT).contains(&b) {
        u32::try_from(b).ok()
    } else {
        None
    }
}

/// `2^k` for a valid shift amount `k`.
pub fn pow2(k: i64) -> Option<i64> {
    shift_amount(k).map(|k| 1i64 << k)
}

/// A memory read of one element (scalar index) or one vector (vector index).
#[derive(Debug, Clone, PartialEq)]
pub struct Load {
    pub buffer: Ident,
    pub ty: ScalarType,
    pub index: Box<Expr>,
    /// Set by resolve when `buffer` is an externally declared parameter.
    pub param: Option<BufferParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    IntImm(i64),
    Var(String),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Min(Box<Expr>, Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
    Select {
        cond: Box<Expr>,
        true_value: Box<Expr>,
        false_value: Box<Expr>,
    },
    Cast(ScalarType, Box<Expr>),
    Let {
        name: Ident,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    Ramp {
        base: Box<Expr>,
        stride: Box<Expr>,
        lanes: u32,
    },
    Broadcast {
        value: Box<Expr>,
        lanes: u32,
    },
    Load(Load),
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr { kind, span }
    }

    /// Build an unspanned node.
    pub fn synthetic(kind: ExprKind) -> Self {
        Expr::new(kind, synthetic_span())
    }

    pub fn int(v: i64) -> Self {
        Expr::synthetic(ExprKind::IntImm(v))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::synthetic(ExprKind::Var(name.into()))
    }

    pub fn binary(op: BinOp, a: Expr, b: Expr) -> Self {
        Expr::synthetic(ExprKind::Binary(op, Box::new(a), Box::new(b)))
    }

    pub fn ramp(base: Expr, stride: Expr, lanes: u32) -> Self {
        Expr::synthetic(ExprKind::Ramp {
            base: Box::new(base),
            stride: Box::new(stride),
            lanes,
        })
    }

    pub fn load(buffer: &str, ty: ScalarType, index: Expr, param: Option<BufferParam>) -> Self {
        Expr::synthetic(ExprKind::Load(Load {
            buffer: Ident::new(buffer),
            ty,
            index: Box::new(index),
            param,
        }))
    }

    /// The literal value, if this node is an integer literal.
    pub fn as_const_int(&self) -> Option<i64> {
        match self.kind {
            ExprKind::IntImm(v) => Some(v),
            _ => None,
        }
    }

    /// `(base, stride, lanes)` if this node is a ramp.
    pub fn as_ramp(&self) -> Option<(&Expr, &Expr, u32)> {
        match &self.kind {
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => Some((base, stride, *lanes)),
            _ => None,
        }
    }
}

// ── Statements ──────────────────────────────────────────────────────────────

/// A memory write of `value` at `index`.
#[derive(Debug, Clone, PartialEq)]
pub struct Store {
    pub buffer: Ident,
    /// Element type of the stored value.
    pub ty: ScalarType,
    pub index: Expr,
    pub value: Expr,
    /// Set by resolve when `buffer` is an externally declared parameter.
    pub param: Option<BufferParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `name` is bound to `value` for the extent of `body`.
    LetStmt {
        name: Ident,
        value: Expr,
        body: Box<Stmt>,
    },
    /// `var` takes the values `min, min + step, ...` while below `max`.
    For {
        var: Ident,
        min: Expr,
        max: Expr,
        step: i64,
        body: Box<Stmt>,
    },
    IfThenElse {
        cond: Expr,
        then_case: Box<Stmt>,
        else_case: Option<Box<Stmt>>,
    },
    Store(Store),
    Evaluate(Expr),
    Block(Vec<Stmt>),
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Stmt { kind, span }
    }

    pub fn synthetic(kind: StmtKind) -> Self {
        Stmt::new(kind, synthetic_span())
    }

    pub fn empty() -> Self {
        Stmt::synthetic(StmtKind::Block(Vec::new()))
    }
}

// ── Program ─────────────────────────────────────────────────────────────────

/// `set NAME = INT` configuration directive.
#[derive(Debug, Clone, PartialEq)]
pub struct SetDirective {
    pub name: Ident,
    pub value: i64,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Declared by the host; base address aligned to `host_alignment` bytes.
    External { host_alignment: u32 },
    /// Allocated by the compiler; assumed aligned to the vector width.
    Internal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDecl {
    pub name: Ident,
    pub ty: ScalarType,
    pub kind: BufferKind,
    pub span: Span,
}

impl BufferDecl {
    pub fn param(&self) -> Option<BufferParam> {
        match self.kind {
            BufferKind::External { host_alignment } => {
                Some(BufferParam::new(self.name.name.clone(), host_alignment))
            }
            BufferKind::Internal => None,
        }
    }
}

/// A free scalar parameter. Nothing is known about its value.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarDecl {
    pub name: Ident,
    pub ty: ScalarType,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub settings: Vec<SetDirective>,
    pub buffers: Vec<BufferDecl>,
    pub scalars: Vec<ScalarDecl>,
    pub body: Stmt,
    pub span: Span,
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::IntImm(v) => write!(f, "{v}"),
            ExprKind::Var(name) => write!(f, "{name}"),
            ExprKind::Binary(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            ExprKind::Neg(a) => write!(f, "-{a}"),
            ExprKind::Min(a, b) => write!(f, "min({a}, {b})"),
            ExprKind::Max(a, b) => write!(f, "max({a}, {b})"),
            ExprKind::Select {
                cond,
                true_value,
                false_value,
            } => write!(f, "select({cond}, {true_value}, {false_value})"),
            ExprKind::Cast(ty, a) => write!(f, "cast<{ty}>({a})"),
            ExprKind::Let { name, value, body } => {
                write!(f, "(let {} = {} in {})", name.name, value, body)
            }
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => write!(f, "ramp({base}, {stride}, {lanes})"),
            ExprKind::Broadcast { value, lanes } => write!(f, "bcast({value}, {lanes})"),
            ExprKind::Load(load) => write!(
                f,
                "load<{}>({}, {})",
                load.ty, load.buffer.name, load.index
            ),
        }
    }
}

fn write_indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        write!(f, "  ")?;
    }
    Ok(())
}

fn fmt_stmt(stmt: &Stmt, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &stmt.kind {
        StmtKind::LetStmt { name, value, body } => {
            write_indent(f, depth)?;
            writeln!(f, "let {} = {}", name.name, value)?;
            fmt_stmt(body, depth, f)
        }
        StmtKind::For {
            var,
            min,
            max,
            step,
            body,
        } => {
            write_indent(f, depth)?;
            if *step == 1 {
                writeln!(f, "for {} in {}..{} {{", var.name, min, max)?;
            } else {
                writeln!(f, "for {} in {}..{} step {} {{", var.name, min, max, step)?;
            }
            fmt_stmt(body, depth + 1, f)?;
            write_indent(f, depth)?;
            writeln!(f, "}}")
        }
        StmtKind::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            write_indent(f, depth)?;
            writeln!(f, "if {cond} {{")?;
            fmt_stmt(then_case, depth + 1, f)?;
            write_indent(f, depth)?;
            if let Some(else_case) = else_case {
                writeln!(f, "}} else {{")?;
                fmt_stmt(else_case, depth + 1, f)?;
                write_indent(f, depth)?;
            }
            writeln!(f, "}}")
        }
        StmtKind::Store(store) => {
            write_indent(f, depth)?;
            writeln!(
                f,
                "store<{}>({}, {}, {})",
                store.ty, store.buffer.name, store.index, store.value
            )
        }
        StmtKind::Evaluate(expr) => {
            write_indent(f, depth)?;
            writeln!(f, "eval {expr}")
        }
        StmtKind::Block(stmts) => {
            for s in stmts {
                fmt_stmt(s, depth, f)?;
            }
            Ok(())
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_stmt(self, 0, f)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for set in &self.settings {
            writeln!(f, "set {} = {}", set.name.name, set.value)?;
        }
        for buf in &self.buffers {
            match buf.kind {
                BufferKind::External { host_alignment } => writeln!(
                    f,
                    "buffer {}: {} align {}",
                    buf.name.name, buf.ty, host_alignment
                )?,
                BufferKind::Internal => writeln!(f, "alloc {}: {}", buf.name.name, buf.ty)?,
            }
        }
        for scalar in &self.scalars {
            writeln!(f, "scalar {}: {}", scalar.name.name, scalar.ty)?;
        }
        fmt_stmt(&self.body, 0, f)
    }
}
