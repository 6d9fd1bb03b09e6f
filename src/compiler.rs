//! Single-pass source-to-bytecode compiler for the Rue language.
//!
//! There is no AST: expressions are parsed with a Pratt table ([`get_rule`])
//! and every construct emits bytecode into the current function's [`Chunk`]
//! as soon as it is recognised.
//!
//! # Scope model
//!
//! Locals are tracked in a flat `Vec<Local>` per function that mirrors the
//! runtime slot layout of its call frame; slot 0 is reserved for the callee.
//! When a block ends, every local declared inside it is popped, or retired
//! with `CLOSE_UPVALUE` if a closure captured it.
//!
//! Upvalues are resolved by walking the chain of enclosing function frames
//! by index, outermost (the script) first.
//!
//! # Error recovery
//!
//! The first error of a burst is recorded and the compiler enters panic mode;
//! after the current declaration it skips ahead to a likely declaration start.

use std::rc::Rc;

use log::{debug, log_enabled, Level};
use thiserror::Error;

use crate::bytecode::{disassemble, Chunk, OpCode};
use crate::config::Config;
use crate::lexer::Scanner;
use crate::token::{Token, TokenKind};
use crate::value::{Function, Value};

/// Slots per frame addressable by a one-byte operand.
const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_ARGS: usize = 255;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// A compile-time diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[line {line}] Error{location}: {message}")]
pub struct CompileError {
    pub line: u32,
    /// `" at 'lexeme'"`, `" at end"`, or empty for scanner errors.
    pub location: String,
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Local variable tracker
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Local {
    name: String,
    /// `None` while the variable's initializer is being compiled.
    depth: Option<u32>,
    /// `true` once a nested function captured this slot.
    is_captured: bool,
}

/// One captured variable of the function being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpvalueDesc {
    /// Captures a local of the immediately enclosing function (`true`) or
    /// re-captures one of its upvalues (`false`).
    is_local: bool,
    index: u8,
}

// ─────────────────────────────────────────────────────────────────────────────
// Compiler frame (one per function being compiled)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Frame {
    chunk: Chunk,
    /// `None` for the top-level script.
    name: Option<String>,
    locals: Vec<Local>,
    scope_depth: u32,
    upvalues: Vec<UpvalueDesc>,
    arity: u8,
    /// The last opcode emitted, cleared whenever a jump lands after it.
    last_op: Option<OpCode>,
}

impl Frame {
    fn new(name: Option<String>) -> Self {
        Frame {
            // Slot 0 holds the callee itself.
            locals: vec![Local {
                name: String::new(),
                depth: Some(0),
                is_captured: false,
            }],
            name,
            ..Frame::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pratt table
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src> = fn(&mut Compiler<'src>, bool);

struct ParseRule<'src> {
    prefix: Option<ParseFn<'src>>,
    infix: Option<ParseFn<'src>>,
    precedence: Precedence,
}

impl<'src> ParseRule<'src> {
    fn new(
        prefix: Option<ParseFn<'src>>,
        infix: Option<ParseFn<'src>>,
        precedence: Precedence,
    ) -> Self {
        Self {
            prefix,
            infix,
            precedence,
        }
    }
}

fn get_rule<'src>(kind: TokenKind) -> ParseRule<'src> {
    use Precedence as P;
    use TokenKind as T;

    match kind {
        T::LeftParen => ParseRule::new(Some(Compiler::grouping), Some(Compiler::call), P::Call),
        T::Minus => ParseRule::new(Some(Compiler::unary), Some(Compiler::binary), P::Term),
        T::Plus => ParseRule::new(None, Some(Compiler::binary), P::Term),
        T::Slash | T::Star => ParseRule::new(None, Some(Compiler::binary), P::Factor),
        T::Bang => ParseRule::new(Some(Compiler::unary), None, P::None),
        T::BangEqual | T::EqualEqual => ParseRule::new(None, Some(Compiler::binary), P::Equality),
        T::Greater | T::GreaterEqual | T::Less | T::LessEqual => {
            ParseRule::new(None, Some(Compiler::binary), P::Comparison)
        }
        T::Identifier => ParseRule::new(Some(Compiler::variable), None, P::None),
        T::String => ParseRule::new(Some(Compiler::string), None, P::None),
        T::Number => ParseRule::new(Some(Compiler::number), None, P::None),
        T::And => ParseRule::new(None, Some(Compiler::and), P::And),
        T::Or => ParseRule::new(None, Some(Compiler::or), P::Or),
        T::False | T::True | T::Nil => ParseRule::new(Some(Compiler::literal), None, P::None),
        T::RightParen
        | T::LeftBrace
        | T::RightBrace
        | T::Comma
        | T::Dot
        | T::Colon
        | T::Scope
        | T::Equal
        | T::Class
        | T::Else
        | T::For
        | T::Fn
        | T::Mixin
        | T::If
        | T::Return
        | T::This
        | T::Var
        | T::While
        | T::Use
        | T::Error
        | T::Eof => ParseRule::new(None, None, P::None),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compiler
// ─────────────────────────────────────────────────────────────────────────────

/// The Rue bytecode compiler.
///
/// Create one with [`Compiler::new`], then call [`Compiler::compile`].
pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    current: Token,
    previous: Token,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    /// The function being compiled right now.
    frame: Frame,
    /// Functions whose compilation is suspended, outermost first.
    enclosing: Vec<Frame>,
    print_code: bool,
}

impl<'src> Compiler<'src> {
    pub fn new(source: &'src str) -> Self {
        Self::with_config(source, &Config::default())
    }

    pub fn with_config(source: &'src str, config: &Config) -> Self {
        Compiler {
            scanner: Scanner::new(source),
            current: Token::eof(1),
            previous: Token::eof(1),
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            frame: Frame::new(None),
            enclosing: Vec::new(),
            print_code: config.print_code,
        }
    }

    /// Compile the whole source into the top-level script function.
    ///
    /// Every recorded diagnostic is returned on failure.
    pub fn compile(mut self) -> Result<Function, Vec<CompileError>> {
        self.advance();
        while !self.match_token(TokenKind::Eof) {
            self.declaration();
        }
        let (script, _) = self.end_function();
        if self.had_error {
            Err(self.errors)
        } else {
            Ok(script)
        }
    }

    // ── Token helpers ────────────────────────────────────────────────────────

    fn advance(&mut self) {
        let next = self.next_valid_token();
        self.previous = std::mem::replace(&mut self.current, next);
    }

    /// Pull tokens until a non-error one, reporting each scanner error.
    fn next_valid_token(&mut self) -> Token {
        loop {
            let token = self
                .scanner
                .next()
                .unwrap_or_else(|| Token::eof(self.scanner.line()));
            if token.kind != TokenKind::Error {
                return token;
            }
            self.error_at(&token, &token.lexeme);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    // ── Error helpers ────────────────────────────────────────────────────────

    fn error(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors.push(CompileError {
            line: token.line,
            location,
            message: message.to_string(),
        });
    }

    /// Skip to the next likely declaration boundary.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(TokenKind::Eof) {
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fn
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ── Emit helpers ─────────────────────────────────────────────────────────

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.frame.chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.previous.line;
        self.frame.chunk.write_op(op, line);
        self.frame.last_op = Some(op);
    }

    fn emit_op_u8(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        let line = self.previous.line;
        self.frame.last_op = Some(op);
        self.frame.chunk.emit_jump(op, line)
    }

    fn patch_jump(&mut self, offset: usize) {
        if self.frame.chunk.patch_jump(offset).is_err() {
            self.error("Too much code to jump over.");
        }
        // Control can now arrive here from elsewhere.
        self.frame.last_op = None;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.previous.line;
        self.frame.last_op = Some(OpCode::Loop);
        if self.frame.chunk.emit_loop(loop_start, line).is_err() {
            self.error("Loop body too large.");
        }
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.frame.chunk.add_constant(value);
        match u8::try_from(index) {
            Ok(index) => index,
            Err(_) => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op_u8(OpCode::Constant, index);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        self.make_constant(Value::string(name))
    }

    // ── Function frames ──────────────────────────────────────────────────────

    fn begin_function(&mut self, name: String) {
        let outer = std::mem::replace(&mut self.frame, Frame::new(Some(name)));
        self.enclosing.push(outer);
    }

    /// Finish the current function and resume its enclosing one.
    fn end_function(&mut self) -> (Function, Vec<UpvalueDesc>) {
        if self.frame.last_op != Some(OpCode::Return) {
            self.emit_op(OpCode::Nil);
            self.emit_op(OpCode::Return);
        }

        let outer = self.enclosing.pop().unwrap_or_default();
        let frame = std::mem::replace(&mut self.frame, outer);
        let function = Function {
            name: frame.name,
            arity: frame.arity,
            upvalue_count: frame.upvalues.len(),
            chunk: frame.chunk,
        };

        if self.print_code && !self.had_error && log_enabled!(Level::Debug) {
            debug!(
                "\n{}",
                disassemble(&function.chunk, function.display_name())
            );
        }

        (function, frame.upvalues)
    }

    /// The frame at `index` in the chain, where the last index is the
    /// function being compiled.
    fn frame_at(&mut self, index: usize) -> &mut Frame {
        if index == self.enclosing.len() {
            &mut self.frame
        } else {
            &mut self.enclosing[index]
        }
    }

    // ── Scope management ─────────────────────────────────────────────────────

    fn begin_scope(&mut self) {
        self.frame.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.frame.scope_depth -= 1;
        let depth = self.frame.scope_depth;

        while let Some(local) = self.frame.locals.last() {
            if local.depth.is_some_and(|d| d <= depth) {
                break;
            }
            let op = if local.is_captured {
                OpCode::CloseUpvalue
            } else {
                OpCode::Pop
            };
            self.frame.locals.pop();
            self.emit_op(op);
        }
    }

    // ── Variable declaration ─────────────────────────────────────────────────

    fn add_local(&mut self, name: String) {
        if self.frame.locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.frame.locals.push(Local {
            name,
            depth: None,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.frame.scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme.clone();
        let depth = self.frame.scope_depth;
        let duplicate = self
            .frame
            .locals
            .iter()
            .rev()
            .take_while(|local| !local.depth.is_some_and(|d| d < depth))
            .any(|local| local.name == name);
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    /// Consume a variable name; returns its name constant for globals.
    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.frame.scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.clone();
        self.identifier_constant(&name)
    }

    fn mark_initialized(&mut self) {
        let depth = self.frame.scope_depth;
        if depth == 0 {
            return;
        }
        if let Some(local) = self.frame.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.frame.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_u8(OpCode::DefineGlobal, global);
    }

    // ── Name resolution ──────────────────────────────────────────────────────

    fn resolve_local(&mut self, name: &str) -> Option<u8> {
        let (slot, initialized) = self
            .frame
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(slot, local)| (slot, local.depth.is_some()))?;
        if !initialized {
            self.error("Can't read local variable in its own initializer.");
        }
        // Slot count is capped at MAX_LOCALS.
        Some(slot as u8)
    }

    fn resolve_upvalue(&mut self, name: &str, frame_idx: usize) -> Option<u8> {
        if frame_idx == 0 {
            return None; // reached the script frame; treat as global
        }

        let local_idx = self.frame_at(frame_idx - 1)
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(i, _)| i as u8);

        if let Some(index) = local_idx {
            self.frame_at(frame_idx - 1).locals[index as usize].is_captured = true;
            return Some(self.add_upvalue(frame_idx, UpvalueDesc { is_local: true, index }));
        }

        let index = self.resolve_upvalue(name, frame_idx - 1)?;
        Some(self.add_upvalue(frame_idx, UpvalueDesc { is_local: false, index }))
    }

    fn add_upvalue(&mut self, frame_idx: usize, desc: UpvalueDesc) -> u8 {
        let upvalues = &self.frame_at(frame_idx).upvalues;
        if let Some(i) = upvalues.iter().position(|u| *u == desc) {
            return i as u8;
        }
        if upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        let upvalues = &mut self.frame_at(frame_idx).upvalues;
        upvalues.push(desc);
        (upvalues.len() - 1) as u8
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(index) = self.resolve_upvalue(name, self.enclosing.len()) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, index)
        } else {
            let index = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, index)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_u8(set_op, arg);
        } else {
            self.emit_op_u8(get_op, arg);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Declarations and statements
    // ─────────────────────────────────────────────────────────────────────────

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else if self.match_token(TokenKind::Fn) {
            self.fn_declaration();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else {
            self.expression_statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.define_variable(global);
    }

    fn fn_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // The body may refer to the function itself.
        self.mark_initialized();
        self.function();
        self.define_variable(global);
    }

    fn function(&mut self) {
        let name = self.previous.lexeme.clone();
        self.begin_function(name);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.frame.arity as usize == MAX_ARGS {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.frame.arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        // No end_scope: the whole frame goes away on return.
        let (function, upvalues) = self.end_function();
        let constant = self.make_constant(Value::Function(Rc::new(function)));
        self.emit_op_u8(OpCode::Closure, constant);
        for upvalue in upvalues {
            self.emit_byte(u8::from(upvalue.is_local));
            self.emit_byte(upvalue.index);
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    /// The body of a branch or loop gets its own scope, so a bare `var` or
    /// `fn` body is popped on every path.
    fn body(&mut self) {
        self.begin_scope();
        self.declaration();
        self.end_scope();
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.expression();

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.body();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.body();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.frame.chunk.code.len();
        self.expression();

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.body();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();

        if self.match_token(TokenKind::Comma) {
            // No initializer.
        } else {
            if self.match_token(TokenKind::Var) {
                self.var_declaration();
            } else {
                self.expression_statement();
            }
            self.consume(TokenKind::Comma, "Expect ',' after loop initializer.");
        }

        let mut loop_start = self.frame.chunk.code.len();

        let mut exit_jump = None;
        if !self.match_token(TokenKind::Comma) {
            self.expression();
            self.consume(TokenKind::Comma, "Expect ',' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::Comma) && !self.check(TokenKind::LeftBrace) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.frame.chunk.code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.body();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.check(TokenKind::RightBrace) || self.check(TokenKind::Eof) {
            self.emit_op(OpCode::Nil);
        } else {
            self.expression();
        }
        self.emit_op(OpCode::Return);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────────

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = get_rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = get_rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_op_u8(OpCode::Call, argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == MAX_ARGS {
                    self.error("Can't have more than 255 arguments.");
                } else {
                    argc += 1;
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc as u8
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => {}
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let precedence = get_rule(operator).precedence;
        self.parse_precedence(precedence.next());

        match operator {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            _ => {}
        }
    }

    fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme.clone();
        self.named_variable(&name, can_assign);
    }

    fn number(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(n) => self.emit_constant(Value::Number(n)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = &self.previous.lexeme;
        // Strip the surrounding quotes.
        let text = lexeme
            .get(1..lexeme.len().saturating_sub(1))
            .unwrap_or_default();
        let value = Value::string(text);
        self.emit_constant(value);
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => {}
        }
    }
}

/// Compile `source` into its top-level script function.
pub fn compile(source: &str) -> Result<Function, Vec<CompileError>> {
    Compiler::new(source).compile()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_src(src: &str) -> Function {
        compile(src).unwrap_or_else(|errs| panic!("compile failed: {errs:?}"))
    }

    fn ops(function: &Function) -> Vec<OpCode> {
        function
            .chunk
            .instructions()
            .unwrap()
            .into_iter()
            .map(|i| i.op)
            .collect()
    }

    /// The first function constant of `f`'s chunk.
    fn nested(f: &Function) -> Rc<Function> {
        f.chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Function(inner) => Some(inner.clone()),
                _ => None,
            })
            .expect("no function constant")
    }

    fn first_error(src: &str) -> CompileError {
        compile(src).unwrap_err().remove(0)
    }

    #[test]
    fn test_compile_return_arithmetic() {
        let f = compile_src("return 2 + 3");
        assert_eq!(
            ops(&f),
            vec![OpCode::Constant, OpCode::Constant, OpCode::Add, OpCode::Return]
        );
        assert_eq!(f.name, None);
    }

    #[test]
    fn test_implicit_nil_return() {
        let f = compile_src("1");
        assert_eq!(
            ops(&f),
            vec![OpCode::Constant, OpCode::Pop, OpCode::Nil, OpCode::Return]
        );
    }

    #[test]
    fn test_comparison_lowering() {
        assert_eq!(
            ops(&compile_src("return 1 >= 2")),
            vec![OpCode::Constant, OpCode::Constant, OpCode::Less, OpCode::Not, OpCode::Return]
        );
        assert_eq!(
            ops(&compile_src("return 1 <= 2")),
            vec![OpCode::Constant, OpCode::Constant, OpCode::Greater, OpCode::Not, OpCode::Return]
        );
        assert_eq!(
            ops(&compile_src("return 1 != 2")),
            vec![OpCode::Constant, OpCode::Constant, OpCode::Equal, OpCode::Not, OpCode::Return]
        );
    }

    #[test]
    fn test_precedence_factor_binds_tighter() {
        let f = compile_src("return 1 + 2 * 3");
        assert_eq!(
            ops(&f),
            vec![
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Multiply,
                OpCode::Add,
                OpCode::Return
            ]
        );
    }

    #[test]
    fn test_global_and_local_variables() {
        let f = compile_src("var a = 1 { var b = a b = 2 }");
        assert_eq!(
            ops(&f),
            vec![
                OpCode::Constant,
                OpCode::DefineGlobal,
                OpCode::GetGlobal,
                OpCode::Constant,
                OpCode::SetLocal,
                OpCode::Pop,
                OpCode::Pop,
                OpCode::Nil,
                OpCode::Return
            ]
        );
    }

    #[test]
    fn test_function_emits_closure_with_captures() {
        let f = compile_src("fn outer() { var x = 1 fn inner() { return x } return inner }");
        let instrs = f.chunk.instructions().unwrap();
        assert_eq!(instrs[0].op, OpCode::Closure);
        assert!(instrs[0].captures().is_empty());

        let Value::Function(outer) = &f.chunk.constants[instrs[0].operands[0] as usize] else {
            panic!("expected function constant");
        };
        assert_eq!(outer.name.as_deref(), Some("outer"));
        let closure = outer
            .chunk
            .instructions()
            .unwrap()
            .into_iter()
            .find(|i| i.op == OpCode::Closure)
            .unwrap();
        assert_eq!(closure.captures(), vec![(true, 1)]);

        let Value::Function(inner) = &outer.chunk.constants[closure.operands[0] as usize] else {
            panic!("expected function constant");
        };
        assert_eq!(inner.upvalue_count, 1);
        assert_eq!(
            ops(inner),
            vec![OpCode::GetUpvalue, OpCode::Return]
        );
    }

    #[test]
    fn test_upvalue_propagates_through_middle_function() {
        let f = compile_src(
            "fn a() { var x = 1 fn b() { fn c() { return x } return c } return b }",
        );
        let a = nested(&f);
        let b_closure = a
            .chunk
            .instructions()
            .unwrap()
            .into_iter()
            .find(|i| i.op == OpCode::Closure)
            .unwrap();
        assert_eq!(b_closure.captures(), vec![(true, 1)]);
        let b = nested(&a);
        let c_closure = b
            .chunk
            .instructions()
            .unwrap()
            .into_iter()
            .find(|i| i.op == OpCode::Closure)
            .unwrap();
        assert_eq!(c_closure.captures(), vec![(false, 0)]);
    }

    #[test]
    fn test_captured_block_local_is_closed() {
        let f = compile_src("{ var x = 1 fn f() { return x } }");
        let ops = ops(&f);
        assert_eq!(&ops[ops.len() - 4..], &[OpCode::Pop, OpCode::CloseUpvalue, OpCode::Nil, OpCode::Return]);
    }

    #[test]
    fn test_parameters_are_locals() {
        let f = compile_src("fn add(a, b) { return a + b }");
        let add = nested(&f);
        assert_eq!(add.arity, 2);
        let instrs = add.chunk.instructions().unwrap();
        assert_eq!(instrs[0].operands, vec![1]);
        assert_eq!(instrs[1].operands, vec![2]);
        // Explicit return: no trailing NIL RETURN.
        assert_eq!(instrs.len(), 4);
    }

    #[test]
    fn test_return_after_jump_still_gets_implicit_return() {
        let f = compile_src("fn f(x) { if x {} else return 2 }");
        let inner = nested(&f);
        let ops = ops(&inner);
        assert_eq!(&ops[ops.len() - 2..], &[OpCode::Nil, OpCode::Return]);
    }

    #[test]
    fn test_while_and_for_loops_compile() {
        let f = compile_src("var i = 0 while i < 3 i = i + 1");
        assert!(ops(&f).contains(&OpCode::Loop));
        let f = compile_src("for var i = 0, i < 3, i = i + 1 { }");
        assert_eq!(ops(&f).iter().filter(|op| **op == OpCode::Loop).count(), 2);
        let f = compile_src("for var i = 0, i < 3, { i = i + 1 }");
        assert_eq!(ops(&f).iter().filter(|op| **op == OpCode::Loop).count(), 1);
    }

    #[test]
    fn test_error_format() {
        let err = first_error("return 1 +");
        assert_eq!(err.to_string(), "[line 1] Error at end: Expect expression.");

        let err = first_error("\n1 = 2");
        assert_eq!(err.to_string(), "[line 2] Error at '=': Invalid assignment target.");

        let err = first_error("\"abc");
        assert_eq!(err.to_string(), "[line 1] Error: Unterminated string.");
    }

    #[test]
    fn test_redeclaration_in_same_scope() {
        let err = first_error("{ var a = 1 var a = 2 }");
        assert_eq!(err.message, "Already a variable with this name in this scope.");
        assert!(compile("{ var a = 1 { var a = 2 } }").is_ok());
    }

    #[test]
    fn test_local_in_own_initializer() {
        let err = first_error("{ var a = a }");
        assert_eq!(err.message, "Can't read local variable in its own initializer.");
    }

    #[test]
    fn test_class_tokens_are_not_expressions() {
        let err = first_error("class");
        assert_eq!(err.message, "Expect expression.");
    }

    #[test]
    fn test_recovery_reports_multiple_errors() {
        let errs = compile("var = 1\nvar y = \nfn").unwrap_err();
        assert!(errs.len() >= 2, "{errs:?}");
        assert_eq!(errs[0].line, 1);
    }

    #[test]
    fn test_too_many_constants() {
        let src = (0..300).map(|i| format!("{i}")).collect::<Vec<_>>().join("\n");
        let err = first_error(&src);
        assert_eq!(err.message, "Too many constants in one chunk.");
    }

    #[test]
    fn test_branch_body_gets_its_own_scope() {
        let f = compile_src("fn f(c) { if c var x = 1 var y = 2 return y }");
        let inner = nested(&f);
        let instrs = inner.chunk.instructions().unwrap();
        // `x` is popped inside the branch, so `y` reuses slot 2.
        let get_y = instrs.iter().rfind(|i| i.op == OpCode::GetLocal).unwrap();
        assert_eq!(get_y.operands, vec![2]);
    }

    #[test]
    fn test_too_many_locals() {
        let vars = (0..300).map(|i| format!("var a{i}")).collect::<Vec<_>>().join(" ");
        let err = first_error(&format!("{{ {vars} }}"));
        assert_eq!(err.message, "Too many local variables in function.");
    }

    #[test]
    fn test_too_many_parameters() {
        let params = (0..256).map(|i| format!("p{i}")).collect::<Vec<_>>().join(", ");
        let err = first_error(&format!("fn f({params}) {{ }}"));
        assert_eq!(err.message, "Can't have more than 255 parameters.");
    }

    #[test]
    fn test_too_many_closure_variables() {
        let outer = (0..200).map(|i| format!("var a{i}")).collect::<Vec<_>>().join(" ");
        let middle = (0..200).map(|i| format!("var b{i}")).collect::<Vec<_>>().join(" ");
        let uses = (0..200)
            .map(|i| format!("a{i} b{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let src = format!("fn o() {{ {outer} fn m() {{ {middle} fn i() {{ {uses} }} }} }}");
        let err = first_error(&src);
        assert_eq!(err.message, "Too many closure variables in function.");
    }

    #[test]
    fn test_jump_too_far() {
        let body = vec!["nil"; 200].join(" ");
        let err = first_error(&format!("if true {{ {body} }}"));
        assert_eq!(err.message, "Too much code to jump over.");
    }

    #[test]
    fn test_loop_body_too_large() {
        let body = vec!["nil"; 200].join(" ");
        let err = first_error(&format!("while false {{ {body} }}"));
        assert_eq!(err.message, "Loop body too large.");
    }

    #[test]
    fn test_too_many_arguments() {
        let args = vec!["nil"; 256].join(", ");
        let err = first_error(&format!("f({args})"));
        assert_eq!(err.message, "Can't have more than 255 arguments.");
    }
}
