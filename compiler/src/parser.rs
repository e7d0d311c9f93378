// Parser for valign .va source files.
//
// Parses a token stream (from the lexer) into the loop-nest IR. Uses chumsky
// combinators. Declarations (`set`, `buffer`, `alloc`, `scalar`) come first,
// followed by the statement body.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns a Program plus any parse errors (non-fatal). Block
//                 level `let` bindings scope over the rest of their block.
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ir::*;
use crate::lexer::Token;

/// Result of parsing: program plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a valign source string. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

/// Parse a single expression, e.g. for building test inputs.
pub fn parse_expr(source: &str) -> Result<Expr, Vec<Rich<'static, Token, SimpleSpan>>> {
    let wrapped = format!("eval {source}");
    let result = parse(&wrapped);
    if !result.errors.is_empty() {
        return Err(result.errors);
    }
    match result.program.map(|p| p.body.kind) {
        Some(StmtKind::Evaluate(expr)) => Ok(expr),
        _ => Err(vec![Rich::custom(
            (0..source.len()).into(),
            "expected a single expression",
        )]),
    }
}

// ── Intermediate forms ──

/// One element of a statement sequence before `let` folding.
enum Item {
    Let { name: Ident, value: Expr, span: Span },
    Stmt(Stmt),
}

enum Decl {
    Set(SetDirective),
    Buffer(BufferDecl),
    Scalar(ScalarDecl),
}

fn join(a: Span, b: Span) -> Span {
    (a.start..b.end.max(a.end)).into()
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = join(lhs.span, rhs.span);
    Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), span)
}

fn negate(op_span: Span, operand: Expr) -> Expr {
    let span = join(op_span, operand.span);
    match operand.kind {
        ExprKind::IntImm(v) if v.checked_neg().is_some() => Expr::new(ExprKind::IntImm(-v), span),
        _ => Expr::new(ExprKind::Neg(Box::new(operand)), span),
    }
}

/// A statement list as one statement. Singletons are unwrapped.
fn into_block(mut stmts: Vec<Stmt>, fallback: Span) -> Stmt {
    match stmts.len() {
        0 => Stmt::new(StmtKind::Block(stmts), fallback),
        1 => stmts.remove(0),
        _ => {
            let span = join(stmts[0].span, stmts[stmts.len() - 1].span);
            Stmt::new(StmtKind::Block(stmts), span)
        }
    }
}

/// Nest every block-level `let` around the statements that follow it.
fn fold_items(items: Vec<Item>, span: Span) -> Stmt {
    // Built back to front, so `rest` is in reverse source order.
    let mut rest: Vec<Stmt> = Vec::new();
    for item in items.into_iter().rev() {
        match item {
            Item::Stmt(stmt) => rest.push(stmt),
            Item::Let {
                name,
                value,
                span: let_span,
            } => {
                rest.reverse();
                let tail: Span = (let_span.end..let_span.end).into();
                let body = into_block(std::mem::take(&mut rest), tail);
                let span = join(let_span, body.span);
                rest.push(Stmt::new(
                    StmtKind::LetStmt {
                        name,
                        value,
                        body: Box::new(body),
                    },
                    span,
                ));
            }
        }
    }
    rest.reverse();
    into_block(rest, span)
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Element type: i8 .. i64, u8 .. u64, f16 .. f64 ──

    let scalar_type = ident.clone().try_map(|id: Ident, span| {
        ScalarType::from_name(&id.name).ok_or_else(|| {
            Rich::custom(
                span,
                format!("expected element type (i8, i16, i32, i64, u8, u16, u32, u64, f16, f32, f64), found '{}'", id.name),
            )
        })
    });

    let type_param = scalar_type
        .clone()
        .delimited_by(just(Token::Lt), just(Token::Gt));

    let int_lit = select! { Token::Int(v) => v };

    let lanes = int_lit.clone().try_map(|v, span| match u32::try_from(v) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Rich::custom(
            span,
            format!("lane count must be a positive 32-bit integer, found {v}"),
        )),
    });

    // ── Expressions ──

    let expr = recursive(|expr| {
        let comma = just(Token::Comma);
        let paren_pair = expr
            .clone()
            .then_ignore(comma.clone())
            .then(expr.clone())
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let int = int_lit.clone().map_with(|v, e| Expr::new(ExprKind::IntImm(v), e.span()));

        let var = ident
            .clone()
            .map(|id: Ident| Expr::new(ExprKind::Var(id.name), id.span));

        let ramp = just(Token::Ramp)
            .ignore_then(
                expr.clone()
                    .then_ignore(comma.clone())
                    .then(expr.clone())
                    .then_ignore(comma.clone())
                    .then(lanes.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|((base, stride), lanes), e| {
                Expr::new(
                    ExprKind::Ramp {
                        base: Box::new(base),
                        stride: Box::new(stride),
                        lanes,
                    },
                    e.span(),
                )
            });

        let bcast = just(Token::Bcast)
            .ignore_then(
                expr.clone()
                    .then_ignore(comma.clone())
                    .then(lanes.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|(value, lanes), e| {
                Expr::new(
                    ExprKind::Broadcast {
                        value: Box::new(value),
                        lanes,
                    },
                    e.span(),
                )
            });

        let min = just(Token::Min)
            .ignore_then(paren_pair.clone())
            .map_with(|(a, b), e| Expr::new(ExprKind::Min(Box::new(a), Box::new(b)), e.span()));

        let max = just(Token::Max)
            .ignore_then(paren_pair)
            .map_with(|(a, b), e| Expr::new(ExprKind::Max(Box::new(a), Box::new(b)), e.span()));

        let select = just(Token::Select)
            .ignore_then(
                expr.clone()
                    .then_ignore(comma.clone())
                    .then(expr.clone())
                    .then_ignore(comma.clone())
                    .then(expr.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|((cond, true_value), false_value), e| {
                Expr::new(
                    ExprKind::Select {
                        cond: Box::new(cond),
                        true_value: Box::new(true_value),
                        false_value: Box::new(false_value),
                    },
                    e.span(),
                )
            });

        let cast = just(Token::Cast)
            .ignore_then(type_param.clone())
            .then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|(ty, value), e| Expr::new(ExprKind::Cast(ty, Box::new(value)), e.span()));

        let load = just(Token::Load)
            .ignore_then(type_param.clone())
            .then(
                ident
                    .clone()
                    .then_ignore(comma)
                    .then(expr.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|(ty, (buffer, index)), e| {
                Expr::new(
                    ExprKind::Load(Load {
                        buffer,
                        ty,
                        index: Box::new(index),
                        param: None,
                    }),
                    e.span(),
                )
            });

        let let_expr = just(Token::Let)
            .ignore_then(ident.clone())
            .then_ignore(just(Token::Equals))
            .then(expr.clone())
            .then_ignore(just(Token::In))
            .then(expr.clone())
            .map_with(|((name, value), body), e| {
                Expr::new(
                    ExprKind::Let {
                        name,
                        value: Box::new(value),
                        body: Box::new(body),
                    },
                    e.span(),
                )
            });

        let parens = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let atom = choice((
            int, ramp, bcast, min, max, select, cast, load, let_expr, parens, var,
        ))
        .boxed();

        // Unary minus; `-<int>` folds to a negative literal.
        let unary = just(Token::Minus)
            .map_with(|_, e| e.span())
            .repeated()
            .foldr(atom, negate)
            .boxed();

        let product_op = select! {
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Mod,
        };
        let product = unary
            .clone()
            .foldl(product_op.then(unary).repeated(), |a, (op, b)| {
                binary(op, a, b)
            })
            .boxed();

        let sum_op = select! {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
        };
        let sum = product
            .clone()
            .foldl(sum_op.then(product).repeated(), |a, (op, b)| {
                binary(op, a, b)
            })
            .boxed();

        let shift_op = select! {
            Token::Shl => BinOp::Shl,
            Token::Shr => BinOp::Shr,
        };
        let shift = sum
            .clone()
            .foldl(shift_op.then(sum).repeated(), |a, (op, b)| binary(op, a, b))
            .boxed();

        let and = shift
            .clone()
            .foldl(
                just(Token::Amp).to(BinOp::And).then(shift).repeated(),
                |a, (op, b)| binary(op, a, b),
            )
            .boxed();

        let cmp_op = select! {
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            Token::EqEq => BinOp::Eq,
            Token::NotEq => BinOp::Ne,
        };
        and.clone()
            .foldl(cmp_op.then(and).repeated(), |a, (op, b)| binary(op, a, b))
            .boxed()
    });

    // ── Statements ──

    let step = int_lit.clone().try_map(|v, span| {
        if v > 0 {
            Ok(v)
        } else {
            Err(Rich::custom(
                span,
                format!("loop step must be positive, found {v}"),
            ))
        }
    });

    let body = recursive(|body| {
        let braced = body
            .clone()
            .delimited_by(just(Token::LBrace), just(Token::RBrace));

        let for_stmt = just(Token::For)
            .ignore_then(ident.clone())
            .then_ignore(just(Token::In))
            .then(expr.clone())
            .then_ignore(just(Token::DotDot))
            .then(expr.clone())
            .then(just(Token::Step).ignore_then(step).or_not())
            .then(braced.clone())
            .map_with(|((((var, min), max), step), body), e| {
                Item::Stmt(Stmt::new(
                    StmtKind::For {
                        var,
                        min,
                        max,
                        step: step.unwrap_or(1),
                        body: Box::new(body),
                    },
                    e.span(),
                ))
            });

        let if_stmt = just(Token::If)
            .ignore_then(expr.clone())
            .then(braced.clone())
            .then(just(Token::Else).ignore_then(braced).or_not())
            .map_with(|((cond, then_case), else_case), e| {
                Item::Stmt(Stmt::new(
                    StmtKind::IfThenElse {
                        cond,
                        then_case: Box::new(then_case),
                        else_case: else_case.map(Box::new),
                    },
                    e.span(),
                ))
            });

        let store_stmt = just(Token::Store)
            .ignore_then(type_param.clone())
            .then(
                ident
                    .clone()
                    .then_ignore(just(Token::Comma))
                    .then(expr.clone())
                    .then_ignore(just(Token::Comma))
                    .then(expr.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|(ty, ((buffer, index), value)), e| {
                Item::Stmt(Stmt::new(
                    StmtKind::Store(Store {
                        buffer,
                        ty,
                        index,
                        value,
                        param: None,
                    }),
                    e.span(),
                ))
            });

        let eval_stmt = just(Token::Eval)
            .ignore_then(expr.clone())
            .map_with(|value, e| Item::Stmt(Stmt::new(StmtKind::Evaluate(value), e.span())));

        let let_stmt = just(Token::Let)
            .ignore_then(ident.clone())
            .then_ignore(just(Token::Equals))
            .then(expr.clone())
            .map_with(|(name, value), e| Item::Let {
                name,
                value,
                span: e.span(),
            });

        choice((for_stmt, if_stmt, store_stmt, eval_stmt, let_stmt))
            .repeated()
            .collect::<Vec<_>>()
            .map_with(|items, e| fold_items(items, e.span()))
            .boxed()
    });

    // ── Declarations ──

    let set_decl = just(Token::Set)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(just(Token::Minus).or_not())
        .then(int_lit.clone())
        .map_with(|((name, minus), v), e| {
            Decl::Set(SetDirective {
                name,
                value: if minus.is_some() { -v } else { v },
                span: e.span(),
            })
        });

    let host_alignment = int_lit.try_map(|v, span| {
        u32::try_from(v).map_err(|_| {
            Rich::custom(
                span,
                format!("buffer alignment must fit in 32 bits, found {v}"),
            )
        })
    });

    let buffer_decl = just(Token::Buffer)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Colon))
        .then(scalar_type.clone())
        .then(just(Token::Align).ignore_then(host_alignment).or_not())
        .map_with(|((name, ty), align), e| {
            // Without an explicit promise the host only guarantees natural
            // alignment of one element.
            let host_alignment = align.unwrap_or_else(|| ty.bytes());
            Decl::Buffer(BufferDecl {
                name,
                ty,
                kind: BufferKind::External { host_alignment },
                span: e.span(),
            })
        });

    let alloc_decl = just(Token::Alloc)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Colon))
        .then(scalar_type.clone())
        .map_with(|(name, ty), e| {
            Decl::Buffer(BufferDecl {
                name,
                ty,
                kind: BufferKind::Internal,
                span: e.span(),
            })
        });

    let scalar_decl = just(Token::Scalar)
        .ignore_then(ident)
        .then_ignore(just(Token::Colon))
        .then(scalar_type)
        .map_with(|(name, ty), e| {
            Decl::Scalar(ScalarDecl {
                name,
                ty,
                span: e.span(),
            })
        });

    // ── Program ──

    choice((set_decl, buffer_decl, alloc_decl, scalar_decl))
        .repeated()
        .collect::<Vec<_>>()
        .then(body)
        .map_with(|(decls, body), e| {
            let mut program = Program {
                settings: Vec::new(),
                buffers: Vec::new(),
                scalars: Vec::new(),
                body,
                span: e.span(),
            };
            for decl in decls {
                match decl {
                    Decl::Set(s) => program.settings.push(s),
                    Decl::Buffer(b) => program.buffers.push(b),
                    Decl::Scalar(s) => program.scalars.push(s),
                }
            }
            program
        })
}

// ── Tests ──
