//! Token types for the Rue scanner.
//!
//! Tokens carry their lexeme as an owned `String`, which keeps lifetime
//! parameters out of the compiler. Lexing is never the bottleneck of a
//! single-pass compiler, so the copy is not worth avoiding.

use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Token
// ─────────────────────────────────────────────────────────────────────────────

/// A single lexical token produced by the [`Scanner`](crate::lexer::Scanner).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The source text of the token. For [`TokenKind::Error`] this is the
    /// error message instead.
    pub lexeme: String,
    /// 1-indexed source line.
    pub line: u32,
}

impl Token {
    #[inline]
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            line,
        }
    }

    /// Build the end-of-input sentinel.
    #[inline]
    pub fn eof(line: u32) -> Self {
        Self::new(TokenKind::Eof, "", line)
    }

    /// Convenience: is this the end-of-file sentinel?
    #[inline]
    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at line {}", self.kind, self.line)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TokenKind
// ─────────────────────────────────────────────────────────────────────────────

/// The complete set of token kinds in Rue.
///
/// `class`, `mixin`, `this`, `use`, `.`, `:` and `::` are lexed but have no
/// compilation path yet; the compiler rejects them as expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // ── Punctuation ───────────────────────────────────────────────────────────
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Slash,
    Star,

    // ── One or two character operators ────────────────────────────────────────
    Colon,
    /// `::`
    Scope,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // ── Literals ──────────────────────────────────────────────────────────────
    Identifier,
    String,
    Number,

    // ── Keywords ──────────────────────────────────────────────────────────────
    And,
    Class,
    Else,
    False,
    For,
    Fn,
    Mixin,
    If,
    Nil,
    Or,
    Return,
    This,
    True,
    Var,
    While,
    Use,

    // ── Synthetic ────────────────────────────────────────────────────────────
    /// A scan failure; the token's lexeme holds the message.
    Error,
    /// End-of-file sentinel. Always the last token in the stream.
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::LeftParen => "`(`",
            TokenKind::RightParen => "`)`",
            TokenKind::LeftBrace => "`{`",
            TokenKind::RightBrace => "`}`",
            TokenKind::Comma => "`,`",
            TokenKind::Dot => "`.`",
            TokenKind::Minus => "`-`",
            TokenKind::Plus => "`+`",
            TokenKind::Slash => "`/`",
            TokenKind::Star => "`*`",
            TokenKind::Colon => "`:`",
            TokenKind::Scope => "`::`",
            TokenKind::Bang => "`!`",
            TokenKind::BangEqual => "`!=`",
            TokenKind::Equal => "`=`",
            TokenKind::EqualEqual => "`==`",
            TokenKind::Greater => "`>`",
            TokenKind::GreaterEqual => "`>=`",
            TokenKind::Less => "`<`",
            TokenKind::LessEqual => "`<=`",
            TokenKind::Identifier => "identifier",
            TokenKind::String => "string literal",
            TokenKind::Number => "number literal",
            TokenKind::And => "`and`",
            TokenKind::Class => "`class`",
            TokenKind::Else => "`else`",
            TokenKind::False => "`false`",
            TokenKind::For => "`for`",
            TokenKind::Fn => "`fn`",
            TokenKind::Mixin => "`mixin`",
            TokenKind::If => "`if`",
            TokenKind::Nil => "`nil`",
            TokenKind::Or => "`or`",
            TokenKind::Return => "`return`",
            TokenKind::This => "`this`",
            TokenKind::True => "`true`",
            TokenKind::Var => "`var`",
            TokenKind::While => "`while`",
            TokenKind::Use => "`use`",
            TokenKind::Error => "invalid token",
            TokenKind::Eof => "end of file",
        };
        f.write_str(text)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyword table
// ─────────────────────────────────────────────────────────────────────────────

/// Map a bare identifier to its keyword [`TokenKind`], if it is one.
pub fn keyword(s: &str) -> Option<TokenKind> {
    match s {
        "and" => Some(TokenKind::And),
        "class" => Some(TokenKind::Class),
        "else" => Some(TokenKind::Else),
        "false" => Some(TokenKind::False),
        "for" => Some(TokenKind::For),
        "fn" => Some(TokenKind::Fn),
        "mixin" => Some(TokenKind::Mixin),
        "if" => Some(TokenKind::If),
        "nil" => Some(TokenKind::Nil),
        "or" => Some(TokenKind::Or),
        "return" => Some(TokenKind::Return),
        "this" => Some(TokenKind::This),
        "true" => Some(TokenKind::True),
        "var" => Some(TokenKind::Var),
        "while" => Some(TokenKind::While),
        "use" => Some(TokenKind::Use),
        _ => None,
    }
}
