//! Hand-rolled scanner for the Rue language.
//!
//! The [`Scanner`] is a lazy iterator over [`Token`]s. It yields exactly one
//! [`TokenKind::Eof`] token at the end of input and then stops; it cannot be
//! restarted.
//!
//! # Error Handling
//!
//! Scan failures do not abort the stream. They are reported in-band as
//! [`TokenKind::Error`] tokens whose lexeme is the message, so the compiler
//! can record them alongside its own diagnostics and keep going.

use crate::token::{keyword, Token, TokenKind};

/// The Rue lexical scanner.
pub struct Scanner<'src> {
    /// The full source text being scanned.
    src: &'src str,
    /// Byte offset where the token being scanned begins.
    start: usize,
    /// Byte offset of the next unconsumed character.
    current: usize,
    /// Current source line (1-indexed).
    line: u32,
    /// Set once the `Eof` token has been handed out.
    finished: bool,
}

impl<'src> Scanner<'src> {
    /// Create a new scanner for the given source text.
    pub fn new(src: &'src str) -> Self {
        Self {
            src,
            start: 0,
            current: 0,
            line: 1,
            finished: false,
        }
    }

    /// The line the scanner is currently on.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Scan the next token. Returns `Eof` forever once the input is exhausted.
    pub fn scan_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        self.start = self.current;

        let Some(ch) = self.advance() else {
            return Token::eof(self.line);
        };

        match ch {
            '(' => self.make_token(TokenKind::LeftParen),
            ')' => self.make_token(TokenKind::RightParen),
            '{' => self.make_token(TokenKind::LeftBrace),
            '}' => self.make_token(TokenKind::RightBrace),
            ',' => self.make_token(TokenKind::Comma),
            '.' => self.make_token(TokenKind::Dot),
            '-' => self.make_token(TokenKind::Minus),
            '+' => self.make_token(TokenKind::Plus),
            '/' => self.make_token(TokenKind::Slash),
            '*' => self.make_token(TokenKind::Star),
            ':' => {
                let kind = if self.eat(':') {
                    TokenKind::Scope
                } else {
                    TokenKind::Colon
                };
                self.make_token(kind)
            }
            '!' => {
                let kind = if self.eat('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.make_token(kind)
            }
            '=' => {
                let kind = if self.eat('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.make_token(kind)
            }
            '<' => {
                let kind = if self.eat('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.make_token(kind)
            }
            '>' => {
                let kind = if self.eat('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.make_token(kind)
            }
            '"' => self.scan_string(),
            c if c.is_ascii_digit() => self.scan_number(),
            c if c.is_ascii_alphabetic() || c == '_' => self.scan_identifier(),
            _ => self.error_token("Unexpected character."),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal scanning helpers
    // ─────────────────────────────────────────────────────────────────────────

    #[inline]
    fn peek(&self) -> Option<char> {
        self.src[self.current..].chars().next()
    }

    #[inline]
    fn peek2(&self) -> Option<char> {
        let mut chars = self.src[self.current..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.current += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Skip whitespace and `//` line comments.
    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r' | '\n') => {
                    self.advance();
                }
                Some('/') if self.peek2() == Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, &self.src[self.start..self.current], self.line)
    }

    fn error_token(&self, message: &str) -> Token {
        Token::new(TokenKind::Error, message, self.line)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sub-scanners
    // ─────────────────────────────────────────────────────────────────────────

    /// Scan a string literal. The lexeme keeps both quotes; the token's line
    /// is the line of the closing quote.
    fn scan_string(&mut self) -> Token {
        while self.peek().is_some_and(|c| c != '"') {
            self.advance();
        }
        if self.peek().is_none() {
            return self.error_token("Unterminated string.");
        }
        // Closing quote.
        self.advance();
        self.make_token(TokenKind::String)
    }

    fn scan_number(&mut self) -> Token {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        // A fractional part needs at least one digit after the dot.
        if self.peek() == Some('.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        self.make_token(TokenKind::Number)
    }

    fn scan_identifier(&mut self) -> Token {
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.advance();
        }
        let text = &self.src[self.start..self.current];
        self.make_token(keyword(text).unwrap_or(TokenKind::Identifier))
    }
}

impl Iterator for Scanner<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.finished {
            return None;
        }
        let token = self.scan_token();
        if token.is_eof() {
            self.finished = true;
        }
        Some(token)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Scanner::new(src).map(|t| t.kind).collect()
    }

    #[test]
    fn test_single_chars() {
        assert_eq!(
            kinds("( ) { } , . - + / *"),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Minus,
                TokenKind::Plus,
                TokenKind::Slash,
                TokenKind::Star,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        let k = kinds("! != = == > >= < <= : ::");
        assert_eq!(
            k,
            vec![
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Colon,
                TokenKind::Scope,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let k = kinds("var fn fnord while _x and or");
        assert_eq!(k[0], TokenKind::Var);
        assert_eq!(k[1], TokenKind::Fn);
        assert_eq!(k[2], TokenKind::Identifier);
        assert_eq!(k[3], TokenKind::While);
        assert_eq!(k[4], TokenKind::Identifier);
        assert_eq!(k[5], TokenKind::And);
        assert_eq!(k[6], TokenKind::Or);
    }

    #[test]
    fn test_number_lexemes() {
        let toks: Vec<Token> = Scanner::new("42 3.25 7.").collect();
        assert_eq!(toks[0].lexeme, "42");
        assert_eq!(toks[1].lexeme, "3.25");
        // Trailing dot is not part of the number.
        assert_eq!(toks[2].lexeme, "7");
        assert_eq!(toks[3].kind, TokenKind::Dot);
    }

    #[test]
    fn test_string_keeps_quotes_and_counts_lines() {
        let toks: Vec<Token> = Scanner::new("\"a\nb\" x").collect();
        assert_eq!(toks[0].kind, TokenKind::String);
        assert_eq!(toks[0].lexeme, "\"a\nb\"");
        assert_eq!(toks[1].line, 2);
    }

    #[test]
    fn test_unterminated_string_is_error_token() {
        let toks: Vec<Token> = Scanner::new("\"abc").collect();
        assert_eq!(toks[0].kind, TokenKind::Error);
        assert_eq!(toks[0].lexeme, "Unterminated string.");
        assert_eq!(toks[1].kind, TokenKind::Eof);
    }

    #[test]
    fn test_unexpected_character() {
        let toks: Vec<Token> = Scanner::new("a ; é b").collect();
        assert_eq!(toks[1].kind, TokenKind::Error);
        assert_eq!(toks[2].kind, TokenKind::Error);
        assert_eq!(toks[3].lexeme, "b");
    }

    #[test]
    fn test_comments_and_lines() {
        let toks: Vec<Token> = Scanner::new("// comment\nvar x // trailing\n\nx").collect();
        assert_eq!(toks[0].line, 2);
        assert_eq!(toks[2].line, 4);
    }

    #[test]
    fn test_single_eof_then_exhausted() {
        let mut scanner = Scanner::new("");
        assert!(scanner.next().is_some_and(|t| t.is_eof()));
        assert!(scanner.next().is_none());
    }
}
