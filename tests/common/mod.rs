//! Shared helpers for Rue integration tests.
//!
//! ```ignore
//! mod common;
//! use common::*;
//! ```

use std::cell::RefCell;
use std::rc::Rc;

#[allow(unused_imports)]
pub use rue::compiler::CompileError;
pub use rue::value::Value;
#[allow(unused_imports)]
pub use rue::vm::{RuntimeError, Vm};
#[allow(unused_imports)]
pub use rue::{InterpretStatus, RueError};

use rue::builtins;
use rue::value::NativeFunction;

/// Natives for tests: the standard library with `print` captured in `out`.
pub fn natives(out: &Rc<RefCell<Vec<u8>>>) -> Vec<NativeFunction> {
    let mut natives: Vec<NativeFunction> = builtins::standard_library()
        .into_iter()
        .filter(|n| n.name != "print")
        .collect();
    natives.push(builtins::print_to(out.clone()));
    natives
}

/// Run `source` on a fresh VM, returning its result and printed output.
pub fn run(source: &str) -> (Result<Value, RueError>, String) {
    let out = Rc::new(RefCell::new(Vec::new()));
    let result = rue::interpret(source, &natives(&out));
    let printed = String::from_utf8_lossy(&out.borrow()).into_owned();
    (result, printed)
}

/// Run `source` and return its value, panicking on any error.
pub fn eval(source: &str) -> Value {
    match run(source).0 {
        Ok(value) => value,
        Err(err) => panic!("{source:?} failed:\n{err}"),
    }
}

/// Run `source` and return everything it printed.
#[allow(dead_code)]
pub fn output(source: &str) -> String {
    let (result, printed) = run(source);
    if let Err(err) = result {
        panic!("{source:?} failed:\n{err}");
    }
    printed
}

/// Run `source` expecting a runtime error.
#[allow(dead_code)]
pub fn runtime_error(source: &str) -> RuntimeError {
    match run(source).0 {
        Err(RueError::Runtime(err)) => err,
        other => panic!("{source:?}: expected runtime error, got {other:?}"),
    }
}

/// Compile `source` expecting diagnostics.
#[allow(dead_code)]
pub fn compile_errors(source: &str) -> Vec<CompileError> {
    match rue::compile(source) {
        Err(errors) => errors,
        Ok(_) => panic!("{source:?}: expected a compile error"),
    }
}
