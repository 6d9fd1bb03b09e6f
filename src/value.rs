//! Runtime values for the Rue VM.
//!
//! The [`Value`] enum is the central representation of all data at runtime.
//! Scalars (`Number`, `Boolean`, `Nil`) are stored inline; strings are shared
//! `Rc<str>` and every callable object sits behind an `Rc`.
//!
//! # Object variants
//!
//! | Variant | Payload | Notes |
//! |---------|---------|-------|
//! | `Value::String` | `Rc<str>` | Immutable text, compared by content |
//! | `Value::Function` | `Rc<Function>` | Compiled function, owns its chunk |
//! | `Value::Closure` | `Rc<Closure>` | Function + captured cells |
//! | `Value::Upvalue` | [`Upvalue`] | Shared mutable cell |
//! | `Value::Native` | `Rc<NativeFunction>` | Host callable |

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::bytecode::Chunk;

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A runtime value in the Rue VM.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// 64-bit IEEE-754 float.
    Number(f64),
    String(Rc<str>),
    Boolean(bool),
    #[default]
    Nil,
    Function(Rc<Function>),
    Closure(Rc<Closure>),
    Upvalue(Upvalue),
    Native(Rc<NativeFunction>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Upvalue(a), Value::Upvalue(b)) => a.ptr_eq(b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write_number(f, *n),
            Value::String(s) => write!(f, "{s}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Nil => write!(f, "nil"),
            Value::Function(func) => write!(f, "{func}"),
            Value::Closure(c) => write!(f, "{}", c.function),
            Value::Upvalue(_) => write!(f, "<upvalue>"),
            Value::Native(n) => write!(f, "<native {}>", n.name),
        }
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        write!(f, "NaN")
    } else if n.is_infinite() {
        write!(f, "{}Infinity", if n < 0.0 { "-" } else { "" })
    } else {
        write!(f, "{n}")
    }
}

impl Value {
    /// Build a string value.
    pub fn string(s: impl AsRef<str>) -> Value {
        Value::String(Rc::from(s.as_ref()))
    }

    /// Truthiness, defined only for booleans and nil.
    ///
    /// Returns `None` for every other type; the caller turns that into a
    /// runtime type error.
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Nil => Some(false),
            Value::Number(_)
            | Value::String(_)
            | Value::Function(_)
            | Value::Closure(_)
            | Value::Upvalue(_)
            | Value::Native(_) => None,
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Return a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Nil => "nil",
            Value::Function(_) => "function",
            Value::Closure(_) => "closure",
            Value::Upvalue(_) => "upvalue",
            Value::Native(_) => "native function",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Callable objects
// ─────────────────────────────────────────────────────────────────────────────

// ── Function ──────────────────────────────────────────────────────────────────

/// A compiled function: its bytecode plus call metadata.
#[derive(Debug, Clone, Default)]
pub struct Function {
    /// `None` for the top-level script.
    pub name: Option<String>,
    pub arity: u8,
    /// Number of `(is_local, index)` pairs its `CLOSURE` instruction carries.
    pub upvalue_count: usize,
    pub chunk: Chunk,
}

impl Function {
    /// The name used in stack traces and listings.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("script")
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<fn {name}>"),
            None => write!(f, "<script>"),
        }
    }
}

// ── Closure ───────────────────────────────────────────────────────────────────

/// A function paired with the cells it captured.
#[derive(Debug, Clone)]
pub struct Closure {
    pub function: Rc<Function>,
    /// One cell per `function.upvalue_count`.
    pub upvalues: Vec<Upvalue>,
}

impl Closure {
    pub fn new(function: Rc<Function>, upvalues: Vec<Upvalue>) -> Self {
        Self { function, upvalues }
    }
}

// ── Upvalue ───────────────────────────────────────────────────────────────────

/// A captured variable cell.
///
/// The cell is filled with a copy of the local at capture time. Every closure
/// that captured the same open slot shares the same cell, so writes through
/// one are seen by the others.
#[derive(Clone, Default)]
pub struct Upvalue(Rc<RefCell<Value>>);

impl Upvalue {
    pub fn new(value: Value) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = value;
    }

    pub fn ptr_eq(&self, other: &Upvalue) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// A recursive closure's cell holds the closure itself; printing the contents
// would never terminate.
impl fmt::Debug for Upvalue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<upvalue>")
    }
}

// ── NativeFunction ────────────────────────────────────────────────────────────

/// The type signature of a native function.
///
/// Receives the call's arguments left to right; an `Err` aborts the program
/// with a runtime error carrying the message.
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, String>>;

/// A host function callable from Rue.
#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    /// `None` accepts any argument count.
    pub arity: Option<u8>,
    pub func: NativeFn,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        arity: Option<u8>,
        func: impl Fn(&[Value]) -> Result<Value, String> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity,
            func: Rc::new(func),
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, String> {
        (self.func)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native {}>", self.name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Number(42.0)), "42");
        assert_eq!(format!("{}", Value::Number(3.5)), "3.5");
        assert_eq!(format!("{}", Value::Number(f64::INFINITY)), "Infinity");
        assert_eq!(format!("{}", Value::Boolean(true)), "true");
        assert_eq!(format!("{}", Value::Nil), "nil");
        assert_eq!(format!("{}", Value::string("hi")), "hi");
        let f = Function {
            name: Some("add".into()),
            ..Function::default()
        };
        assert_eq!(format!("{}", Value::Function(Rc::new(f))), "<fn add>");
    }

    #[test]
    fn test_truthiness_only_for_boolean_and_nil() {
        assert_eq!(Value::Nil.truthiness(), Some(false));
        assert_eq!(Value::Boolean(false).truthiness(), Some(false));
        assert_eq!(Value::Boolean(true).truthiness(), Some(true));
        assert_eq!(Value::Number(0.0).truthiness(), None);
        assert_eq!(Value::string("x").truthiness(), None);
    }

    #[test]
    fn test_value_equality_is_tagged() {
        assert_eq!(Value::Number(1.0), Value::Number(1.0));
        assert_ne!(Value::Number(1.0), Value::string("1"));
        assert_ne!(Value::Nil, Value::Boolean(false));
        assert_eq!(Value::string("ab"), Value::string("ab"));
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn test_callables_compare_by_identity() {
        let f = Rc::new(Function::default());
        let a = Value::Function(f.clone());
        let b = Value::Function(f);
        let c = Value::Function(Rc::new(Function::default()));
        assert_eq!(a, b);
        assert_ne!(a, c);

        let cell = Upvalue::new(Value::Nil);
        assert_eq!(Value::Upvalue(cell.clone()), Value::Upvalue(cell));
        assert_ne!(
            Value::Upvalue(Upvalue::new(Value::Nil)),
            Value::Upvalue(Upvalue::new(Value::Nil))
        );
    }

    #[test]
    fn test_upvalue_cells_are_shared() {
        let cell = Upvalue::new(Value::Number(1.0));
        let alias = cell.clone();
        alias.set(Value::Number(2.0));
        assert_eq!(cell.get(), Value::Number(2.0));
    }

    #[test]
    fn test_native_call() {
        let native = NativeFunction::new("double", Some(1), |args| {
            args[0]
                .as_number()
                .map(|n| Value::Number(n * 2.0))
                .ok_or_else(|| "not a number".to_string())
        });
        assert_eq!(native.call(&[Value::Number(4.0)]), Ok(Value::Number(8.0)));
        assert!(native.call(&[Value::Nil]).is_err());
        assert_eq!(format!("{native:?}"), "<native double>");
    }
}
