//! Native (Rust) built-in functions for Rue programs.
//!
//! [`standard_library`] returns the natives every front end installs; each
//! is a [`NativeFunction`] whose body has the signature
//! `Fn(&[Value]) -> Result<Value, String>`.
//!
//! | Function | Arity | Result |
//! |----------|-------|--------|
//! | `print(v)` | 1 | writes `v` and a newline, returns `nil` |
//! | `assert(v)` | 1 | fails on `false`/`nil`, otherwise `true` |
//! | `type_of(v)` | 1 | the value's type name |
//! | `clock()` | 0 | seconds since the Unix epoch |

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::{NativeFunction, Value};
use crate::vm::Vm;

// ─────────────────────────────────────────────────────────────────────────────
// Registration entry points
// ─────────────────────────────────────────────────────────────────────────────

/// The standard natives, printing to stdout.
pub fn standard_library() -> Vec<NativeFunction> {
    vec![
        print_to(Rc::new(RefCell::new(io::stdout()))),
        NativeFunction::new("assert", Some(1), core_assert),
        NativeFunction::new("type_of", Some(1), core_type_of),
        NativeFunction::new("clock", Some(0), core_clock),
    ]
}

/// Install the standard natives into `vm`.
pub fn register_all(vm: &mut Vm) {
    vm.install_natives(&standard_library());
}

// ─────────────────────────────────────────────────────────────────────────────
// Core
// ─────────────────────────────────────────────────────────────────────────────

/// `print(value)` bound to an arbitrary writer.
pub fn print_to<W: Write + 'static>(out: Rc<RefCell<W>>) -> NativeFunction {
    NativeFunction::new("print", Some(1), move |args| {
        let value = first_arg("print", args)?;
        let mut out = out.borrow_mut();
        writeln!(out, "{value}")
            .and_then(|()| out.flush())
            .map_err(|e| format!("print failed: {e}"))?;
        Ok(Value::Nil)
    })
}

/// `assert(value)`: fail on `false` or `nil`.
fn core_assert(args: &[Value]) -> Result<Value, String> {
    match first_arg("assert", args)? {
        Value::Boolean(false) | Value::Nil => Err("Assert failed!".to_string()),
        _ => Ok(Value::Boolean(true)),
    }
}

fn core_type_of(args: &[Value]) -> Result<Value, String> {
    Ok(Value::string(first_arg("type_of", args)?.type_name()))
}

/// `clock()`: seconds since the Unix epoch.
fn core_clock(_args: &[Value]) -> Result<Value, String> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Number(secs))
}

fn first_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value, String> {
    args.first()
        .ok_or_else(|| format!("{name}() expects 1 argument but got 0."))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
