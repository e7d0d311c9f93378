// Lexer for valign .va source files.
//
// Tokenizes the textual loop-nest IR: declarations, statements, and integer
// index arithmetic. Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters and out-of-range integer literals
//                produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// valign token types.
///
/// Keywords and symbols are matched as fixed strings. Integer literals carry
/// their parsed value. Identifiers carry no value; use the span to retrieve
/// the text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|#[^\n]*")]
pub enum Token {
    // ── Declaration keywords ──
    #[token("set")]
    Set,
    #[token("buffer")]
    Buffer,
    #[token("alloc")]
    Alloc,
    #[token("scalar")]
    Scalar,
    #[token("align")]
    Align,

    // ── Statement keywords ──
    #[token("let")]
    Let,
    #[token("in")]
    In,
    #[token("for")]
    For,
    #[token("step")]
    Step,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("store")]
    Store,
    #[token("eval")]
    Eval,

    // ── Builtin expression forms ──
    #[token("load")]
    Load,
    #[token("ramp")]
    Ramp,
    #[token("bcast")]
    Bcast,
    #[token("min")]
    Min,
    #[token("max")]
    Max,
    #[token("select")]
    Select,
    #[token("cast")]
    Cast,

    // ── Symbols ──
    //
    // Two-character operators are listed alongside their one-character
    // prefixes; logos always takes the longest match.
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("..")]
    DotDot,
    #[token("=")]
    Equals,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,

    // ── Literals ──
    /// Non-negative integer literal. Negative values are written with
    /// unary minus and folded by the parser.
    #[regex(r"[0-9]+", parse_int)]
    Int(i64),

    // ── Identifier ──
    //
    // Placed after keywords: logos prioritises fixed `#[token]` matches
    // over regex for the same length, so `let` matches Let, not Ident.
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Set => write!(f, "set"),
            Token::Buffer => write!(f, "buffer"),
            Token::Alloc => write!(f, "alloc"),
            Token::Scalar => write!(f, "scalar"),
            Token::Align => write!(f, "align"),
            Token::Let => write!(f, "let"),
            Token::In => write!(f, "in"),
            Token::For => write!(f, "for"),
            Token::Step => write!(f, "step"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::Store => write!(f, "store"),
            Token::Eval => write!(f, "eval"),
            Token::Load => write!(f, "load"),
            Token::Ramp => write!(f, "ramp"),
            Token::Bcast => write!(f, "bcast"),
            Token::Min => write!(f, "min"),
            Token::Max => write!(f, "max"),
            Token::Select => write!(f, "select"),
            Token::Cast => write!(f, "cast"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::DotDot => write!(f, ".."),
            Token::Equals => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Amp => write!(f, "&"),
            Token::Shl => write!(f, "<<"),
            Token::Shr => write!(f, ">>"),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Int(v) => write!(f, "{v}"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex a valign source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected input: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
