//! The Rue scripting language: compiler and runtime library.
//!
//! This crate provides the complete Rue pipeline:
//!
//! 1. **Tokens** (`token`): token kinds and the keyword table.
//! 2. **Lexer** (`lexer`): on-demand scanner producing one token at a time.
//! 3. **Bytecode** (`bytecode`): `OpCode` definitions, `Chunk`, decoding and disassembly.
//! 4. **Values** (`value`): runtime `Value` enum, functions, closures, upvalue cells.
//! 5. **Compiler** (`compiler`): single-pass Pratt compiler from source to bytecode.
//! 6. **VM** (`vm`): stack-based interpreter with call frames and closures.
//! 7. **Builtins** (`builtins`): native Rust functions exposed to Rue programs.
//! 8. **Config** / **Profile**: diagnostic switches and per-opcode statistics.
//!
//! # Entry point
//!
//! ```rust
//! use rue::value::Value;
//!
//! let result = rue::interpret("return 2 + 3", &[]).unwrap();
//! assert_eq!(result, Value::Number(5.0));
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod lexer;
pub mod profile;
pub mod token;
pub mod value;
pub mod vm;

pub use compiler::compile;

// ─────────────────────────────────────────────────────────────────────────────
// Unified error type
// ─────────────────────────────────────────────────────────────────────────────

use crate::compiler::CompileError;
use crate::value::{NativeFunction, Value};
use crate::vm::{RuntimeError, Vm};

/// The unified error type for the Rue pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RueError {
    /// Every diagnostic reported while compiling.
    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))]
    Compile(Vec<CompileError>),

    /// A runtime error raised by the VM, with its stack trace.
    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    /// An I/O error (reading a script, the REPL terminal).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shorthand result type for all Rue operations.
pub type RueResult<T> = Result<T, RueError>;

/// Coarse outcome of interpreting a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretStatus {
    Ok,
    CompileError,
    RuntimeError,
}

impl RueError {
    /// The interpret status this error corresponds to.
    ///
    /// I/O failures happen before any code runs and count as compile errors.
    pub fn status(&self) -> InterpretStatus {
        match self {
            RueError::Compile(_) | RueError::Io(_) => InterpretStatus::CompileError,
            RueError::Runtime(_) => InterpretStatus::RuntimeError,
        }
    }
}

/// Status of an interpret result.
pub fn status<T>(result: &RueResult<T>) -> InterpretStatus {
    match result {
        Ok(_) => InterpretStatus::Ok,
        Err(err) => err.status(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Full pipeline: compile → run on a fresh VM.
///
/// `natives` are installed as globals before the program starts.
pub fn interpret(source: &str, natives: &[NativeFunction]) -> RueResult<Value> {
    let mut machine = Vm::new();
    machine.install_natives(natives);
    machine.interpret(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_ok() {
        let result = interpret("return 2 + 3", &[]);
        assert_eq!(status(&result), InterpretStatus::Ok);
        assert_eq!(result.unwrap(), Value::Number(5.0));
    }

    #[test]
    fn test_compile_error_status() {
        let err = interpret("return 1 +", &[]).unwrap_err();
        assert_eq!(err.status(), InterpretStatus::CompileError);
        assert_eq!(err.to_string(), "[line 1] Error at end: Expect expression.");
    }

    #[test]
    fn test_runtime_error_status() {
        let err = interpret("return -\"x\"", &[]).unwrap_err();
        assert_eq!(err.status(), InterpretStatus::RuntimeError);
    }

    #[test]
    fn test_natives_are_installed() {
        let twice = NativeFunction::new("twice", Some(1), |args| match args[0] {
            Value::Number(n) => Ok(Value::Number(n * 2.0)),
            _ => Err("twice expects a number".to_string()),
        });
        assert_eq!(
            interpret("return twice(21)", &[twice]).unwrap(),
            Value::Number(42.0)
        );
    }
}
