//! The Rue virtual machine.
//!
//! The VM is a **stack-based interpreter** that executes [`Chunk`] bytecode.
//!
//! # Execution model
//!
//! - Each [`CallFrame`] owns its value slots: slot 0 is the callee, then the
//!   parameters and locals, then temporaries.
//! - The running frame is held apart from the suspended callers in
//!   `Vm::frames`; `CALL` moves the callee and its arguments out of the
//!   caller's slots into a fresh frame, `RETURN` drops the frame and pushes
//!   the result onto the caller.
//! - Captured locals live in shared [`Upvalue`] cells. Cells for locals of
//!   live frames stay registered in an open list ordered by (frame depth,
//!   slot) so every closure capturing the same slot shares one cell.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use log::{info, log_enabled, trace, Level};

use crate::bytecode::{disassemble_instruction, Chunk, OpCode};
use crate::compiler::Compiler;
use crate::config::Config;
use crate::profile::OpProfile;
use crate::value::{Closure, Function, NativeFunction, Upvalue, Value};
use crate::{RueError, RueResult};

// ─────────────────────────────────────────────────────────────────────────────
// Runtime error
// ─────────────────────────────────────────────────────────────────────────────

/// One line of a runtime stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// `None` for the top-level script.
    pub function: Option<String>,
    pub line: u32,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(name) => write!(f, "[line {}] in {name}()", self.line),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// A runtime error raised by the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    /// Innermost frame first.
    pub trace: Vec<TraceFrame>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for frame in &self.trace {
            write!(f, "\n{frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

pub type VmResult<T> = Result<T, RuntimeError>;

/// Failure inside the dispatch loop, before the stack trace is attached.
type StepResult<T> = Result<T, String>;

// ─────────────────────────────────────────────────────────────────────────────
// CallFrame
// ─────────────────────────────────────────────────────────────────────────────

/// One active call on the call stack.
struct CallFrame {
    closure: Rc<Closure>,
    /// Index of the next byte to execute.
    ip: usize,
    /// Locals followed by temporaries; slot 0 is the callee.
    slots: Vec<Value>,
}

impl CallFrame {
    fn new(closure: Rc<Closure>, slots: Vec<Value>) -> Self {
        Self {
            closure,
            ip: 0,
            slots,
        }
    }

    fn chunk(&self) -> &Chunk {
        &self.closure.function.chunk
    }

    fn read_byte(&mut self) -> StepResult<u8> {
        let byte = self
            .chunk()
            .code
            .get(self.ip)
            .copied()
            .ok_or_else(|| format!("Ran past the end of the code at offset {}.", self.ip))?;
        self.ip += 1;
        Ok(byte)
    }

    fn read_constant(&mut self) -> StepResult<Value> {
        let index = self.read_byte()?;
        self.chunk()
            .constants
            .get(index as usize)
            .cloned()
            .ok_or_else(|| format!("Constant index {index} out of range."))
    }

    fn read_name(&mut self) -> StepResult<Rc<str>> {
        match self.read_constant()? {
            Value::String(name) => Ok(name),
            other => Err(format!("Expected a variable name, found {}.", other.type_name())),
        }
    }

    fn current_line(&self) -> u32 {
        let ip = self.ip.saturating_sub(1);
        self.chunk().lines.get(ip).copied().unwrap_or(0)
    }

    #[inline]
    fn push(&mut self, value: Value) {
        self.slots.push(value);
    }

    #[inline]
    fn pop(&mut self) -> StepResult<Value> {
        self.slots.pop().ok_or_else(|| "Stack underflow.".to_string())
    }

    #[inline]
    fn peek(&self, distance: usize) -> StepResult<&Value> {
        self.slots
            .len()
            .checked_sub(distance + 1)
            .and_then(|i| self.slots.get(i))
            .ok_or_else(|| "Stack underflow.".to_string())
    }

    fn pop_numbers(&mut self) -> StepResult<(f64, f64)> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok((a, b)),
            _ => Err("Operands must be numbers.".to_string()),
        }
    }

    fn upvalue(&self, index: u8) -> StepResult<&Upvalue> {
        self.closure
            .upvalues
            .get(index as usize)
            .ok_or_else(|| format!("Upvalue index {index} out of range."))
    }

    fn slot_mut(&mut self, slot: u8) -> StepResult<&mut Value> {
        self.slots
            .get_mut(slot as usize)
            .ok_or_else(|| format!("Local slot {slot} out of range."))
    }
}

/// A cell still tied to a local of a live frame.
struct OpenUpvalue {
    /// Number of frames below the owning frame.
    depth: usize,
    slot: usize,
    cell: Upvalue,
}

// ─────────────────────────────────────────────────────────────────────────────
// Vm
// ─────────────────────────────────────────────────────────────────────────────

/// The Rue virtual machine.
///
/// Globals persist across runs until [`Vm::reset`]; everything else is
/// cleared when a run finishes.
pub struct Vm {
    /// Suspended caller frames (innermost last).
    frames: Vec<CallFrame>,
    globals: HashMap<String, Value>,
    /// Ordered by `(depth, slot)`.
    open_upvalues: Vec<OpenUpvalue>,
    config: Config,
    profile: Option<OpProfile>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Vm {
            frames: Vec::with_capacity(64),
            globals: HashMap::new(),
            open_upvalues: Vec::new(),
            profile: config.profile_ops.then(OpProfile::new),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a native function as a global.
    pub fn define_native(&mut self, native: NativeFunction) {
        let name = native.name.clone();
        self.globals.insert(name, Value::Native(Rc::new(native)));
    }

    /// Register every native in `natives` as a global.
    pub fn install_natives(&mut self, natives: &[NativeFunction]) {
        for native in natives {
            self.define_native(native.clone());
        }
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Cumulative opcode statistics, when profiling is enabled.
    pub fn profile(&self) -> Option<&OpProfile> {
        self.profile.as_ref()
    }

    /// Forget all globals and any leftover execution state.
    pub fn reset(&mut self) {
        self.globals.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        if let Some(profile) = self.profile.as_mut() {
            profile.clear();
        }
    }

    /// Compile and run `source`, keeping globals from earlier runs.
    pub fn interpret(&mut self, source: &str) -> RueResult<Value> {
        let function = Compiler::with_config(source, &self.config)
            .compile()
            .map_err(RueError::Compile)?;
        Ok(self.run(Rc::new(function))?)
    }

    /// Execute a compiled top-level function and return its result.
    pub fn run(&mut self, function: Rc<Function>) -> VmResult<Value> {
        let closure = Rc::new(Closure::new(function.clone(), Vec::new()));
        let mut frame = CallFrame::new(closure, vec![Value::Function(function)]);

        let result = self
            .dispatch(&mut frame)
            .map_err(|message| self.runtime_error(message, &frame));

        self.frames.clear();
        self.open_upvalues.clear();

        if let Some(profile) = &self.profile {
            info!(
                "opcode profile ({} instructions):\n{profile}",
                profile.instructions()
            );
        }
        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Main dispatch loop
    // ─────────────────────────────────────────────────────────────────────────

    fn dispatch(&mut self, frame: &mut CallFrame) -> StepResult<Value> {
        loop {
            if self.config.trace_execution && log_enabled!(Level::Trace) {
                self.trace_instruction(frame);
            }

            let offset = frame.ip;
            let byte = frame.read_byte()?;
            let op = OpCode::try_from(byte)
                .map_err(|b| format!("Unknown opcode {b:#04x} at offset {offset}."))?;

            let started = self.profile.as_ref().map(|_| Instant::now());
            let finished = self.execute(op, frame)?;
            if let (Some(profile), Some(started)) = (self.profile.as_mut(), started) {
                profile.record(op, started.elapsed());
            }

            if let Some(result) = finished {
                return Ok(result);
            }
        }
    }

    /// Execute one instruction. Returns the program's result once the
    /// outermost frame returns.
    fn execute(&mut self, op: OpCode, frame: &mut CallFrame) -> StepResult<Option<Value>> {
        match op {
            // ── Constants ────────────────────────────────────────────────────
            OpCode::Constant => {
                let value = frame.read_constant()?;
                frame.push(value);
            }
            OpCode::Nil => frame.push(Value::Nil),
            OpCode::True => frame.push(Value::Boolean(true)),
            OpCode::False => frame.push(Value::Boolean(false)),

            // ── Stack ────────────────────────────────────────────────────────
            OpCode::Pop => {
                frame.pop()?;
            }

            // ── Locals ───────────────────────────────────────────────────────
            OpCode::GetLocal => {
                let slot = frame.read_byte()?;
                let value = frame.slot_mut(slot)?.clone();
                frame.push(value);
            }
            OpCode::SetLocal => {
                let slot = frame.read_byte()?;
                let value = frame.peek(0)?.clone();
                *frame.slot_mut(slot)? = value;
            }

            // ── Globals ──────────────────────────────────────────────────────
            OpCode::GetGlobal => {
                let name = frame.read_name()?;
                let value = self
                    .globals
                    .get(&*name)
                    .cloned()
                    .ok_or_else(|| format!("Undefined variable '{name}'."))?;
                frame.push(value);
            }
            OpCode::DefineGlobal => {
                let name = frame.read_name()?;
                let value = frame.pop()?;
                self.globals.insert(name.to_string(), value);
            }
            OpCode::SetGlobal => {
                let name = frame.read_name()?;
                let value = frame.peek(0)?.clone();
                match self.globals.get_mut(&*name) {
                    Some(global) => *global = value,
                    None => return Err(format!("Undefined variable '{name}'.")),
                }
            }

            // ── Upvalues ─────────────────────────────────────────────────────
            OpCode::GetUpvalue => {
                let index = frame.read_byte()?;
                let value = frame.upvalue(index)?.get();
                frame.push(value);
            }
            OpCode::SetUpvalue => {
                let index = frame.read_byte()?;
                let value = frame.peek(0)?.clone();
                frame.upvalue(index)?.set(value);
            }
            OpCode::CloseUpvalue => {
                let slot = frame.slots.len().saturating_sub(1);
                let depth = self.frames.len();
                if let Ok(i) = self.find_open_upvalue(depth, slot) {
                    self.open_upvalues.remove(i);
                }
                frame.pop()?;
            }

            // ── Comparison ───────────────────────────────────────────────────
            OpCode::Equal => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(Value::Boolean(a == b));
            }
            OpCode::Greater => {
                let (a, b) = frame.pop_numbers()?;
                frame.push(Value::Boolean(a > b));
            }
            OpCode::Less => {
                let (a, b) = frame.pop_numbers()?;
                frame.push(Value::Boolean(a < b));
            }

            // ── Arithmetic ───────────────────────────────────────────────────
            OpCode::Add => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let result = match (a, b) {
                    (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
                    (Value::String(a), Value::String(b)) => {
                        let mut joined = String::with_capacity(a.len() + b.len());
                        joined.push_str(&a);
                        joined.push_str(&b);
                        Value::String(joined.into())
                    }
                    _ => return Err("Operands must be two numbers or two strings.".to_string()),
                };
                frame.push(result);
            }
            OpCode::Subtract => {
                let (a, b) = frame.pop_numbers()?;
                frame.push(Value::Number(a - b));
            }
            OpCode::Multiply => {
                let (a, b) = frame.pop_numbers()?;
                frame.push(Value::Number(a * b));
            }
            OpCode::Divide => {
                let (a, b) = frame.pop_numbers()?;
                frame.push(Value::Number(a / b));
            }

            // ── Unary ────────────────────────────────────────────────────────
            OpCode::Not => {
                let result = match frame.pop()? {
                    Value::Boolean(b) => !b,
                    Value::Nil => true,
                    _ => return Err("Operand must be a boolean or nil.".to_string()),
                };
                frame.push(Value::Boolean(result));
            }
            OpCode::Negate => match frame.pop()? {
                Value::Number(n) => frame.push(Value::Number(-n)),
                _ => return Err("Operand must be a number.".to_string()),
            },

            // ── Control flow ─────────────────────────────────────────────────
            OpCode::Jump => {
                let distance = frame.read_byte()?;
                frame.ip += distance as usize;
            }
            OpCode::JumpIfFalse => {
                let distance = frame.read_byte()?;
                let condition = frame.peek(0)?;
                let truthy = condition
                    .truthiness()
                    .ok_or_else(|| format!("Cannot use {} as a boolean.", condition.type_name()))?;
                if !truthy {
                    frame.ip += distance as usize;
                }
            }
            OpCode::Loop => {
                let distance = frame.read_byte()?;
                frame.ip = frame
                    .ip
                    .checked_sub(distance as usize)
                    .ok_or_else(|| format!("Loop target before offset 0 at offset {}.", frame.ip))?;
            }

            // ── Calls and returns ────────────────────────────────────────────
            OpCode::Call => {
                let argc = frame.read_byte()?;
                self.call_value(frame, argc as usize)?;
            }
            OpCode::Closure => {
                let function = match frame.read_constant()? {
                    Value::Function(function) => function,
                    other => return Err(format!("Cannot make a closure of {}.", other.type_name())),
                };
                let closure = self.make_closure(frame, function)?;
                frame.push(Value::Closure(closure));
            }
            OpCode::Return => {
                let result = frame.pop()?;
                let depth = self.frames.len();
                let keep = self.open_upvalues.partition_point(|u| u.depth < depth);
                self.open_upvalues.truncate(keep);

                match self.frames.pop() {
                    Some(caller) => {
                        *frame = caller;
                        frame.push(result);
                    }
                    None => return Ok(Some(result)),
                }
            }
        }
        Ok(None)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Call dispatch
    // ─────────────────────────────────────────────────────────────────────────

    fn call_value(&mut self, frame: &mut CallFrame, argc: usize) -> StepResult<()> {
        let callee_idx = frame
            .slots
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| "Stack underflow.".to_string())?;

        let closure = match frame.slots[callee_idx].clone() {
            Value::Closure(closure) => closure,
            Value::Function(function) => Rc::new(Closure::new(function, Vec::new())),
            Value::Native(native) => {
                if let Some(arity) = native.arity {
                    if arity as usize != argc {
                        return Err(format!("Expected {arity} arguments but got {argc}."));
                    }
                }
                let args = frame.slots.split_off(callee_idx + 1);
                frame.pop()?;
                let result = native.call(&args)?;
                frame.push(result);
                return Ok(());
            }
            Value::Number(_)
            | Value::String(_)
            | Value::Boolean(_)
            | Value::Nil
            | Value::Upvalue(_) => {
                return Err("Can only call functions and closures.".to_string());
            }
        };

        let arity = closure.function.arity as usize;
        if arity != argc {
            return Err(format!("Expected {arity} arguments but got {argc}."));
        }

        let slots = frame.slots.split_off(callee_idx);
        let callee = CallFrame::new(closure, slots);
        let caller = std::mem::replace(frame, callee);
        self.frames.push(caller);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Closures
    // ─────────────────────────────────────────────────────────────────────────

    fn make_closure(
        &mut self,
        frame: &mut CallFrame,
        function: Rc<Function>,
    ) -> StepResult<Rc<Closure>> {
        let depth = self.frames.len();
        // The slot the new closure will occupy once pushed.
        let own_slot = frame.slots.len();
        let mut upvalues = Vec::with_capacity(function.upvalue_count);
        let mut self_cells = Vec::new();

        for _ in 0..function.upvalue_count {
            let is_local = frame.read_byte()? == 1;
            let index = frame.read_byte()?;
            let cell = if is_local {
                let slot = index as usize;
                if slot == own_slot {
                    let cell = self.capture(depth, slot, Value::Nil);
                    self_cells.push(cell.clone());
                    cell
                } else {
                    let value = frame
                        .slots
                        .get(slot)
                        .cloned()
                        .ok_or_else(|| format!("Local slot {slot} out of range."))?;
                    self.capture(depth, slot, value)
                }
            } else {
                frame.upvalue(index)?.clone()
            };
            upvalues.push(cell);
        }

        let closure = Rc::new(Closure::new(function, upvalues));
        for cell in self_cells {
            cell.set(Value::Closure(closure.clone()));
        }
        Ok(closure)
    }

    fn find_open_upvalue(&self, depth: usize, slot: usize) -> Result<usize, usize> {
        self.open_upvalues
            .binary_search_by(|u| (u.depth, u.slot).cmp(&(depth, slot)))
    }

    /// Return the open cell for `(depth, slot)`, creating it from `value`
    /// if no closure captured that slot yet.
    fn capture(&mut self, depth: usize, slot: usize, value: Value) -> Upvalue {
        match self.find_open_upvalue(depth, slot) {
            Ok(i) => self.open_upvalues[i].cell.clone(),
            Err(i) => {
                let cell = Upvalue::new(value);
                self.open_upvalues.insert(
                    i,
                    OpenUpvalue {
                        depth,
                        slot,
                        cell: cell.clone(),
                    },
                );
                cell
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Diagnostics
    // ─────────────────────────────────────────────────────────────────────────

    fn trace_instruction(&self, frame: &CallFrame) {
        if self.config.trace_stack {
            let stack: String = frame.slots.iter().map(|v| format!("[ {v} ]")).collect();
            trace!("          {stack}");
        }
        if frame.ip < frame.chunk().code.len() {
            let (text, _) = disassemble_instruction(frame.chunk(), frame.ip);
            trace!("{text}");
        }
    }

    fn runtime_error(&self, message: String, frame: &CallFrame) -> RuntimeError {
        let trace = std::iter::once(frame)
            .chain(self.frames.iter().rev())
            .map(|f| TraceFrame {
                function: f.closure.function.name.clone(),
                line: f.current_line(),
            })
            .collect();
        RuntimeError { message, trace }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn run_src(src: &str) -> VmResult<Value> {
        let function = compile(src).unwrap_or_else(|errs| panic!("compile failed: {errs:?}"));
        Vm::new().run(Rc::new(function))
    }

    fn run_ok(src: &str) -> Value {
        run_src(src).unwrap_or_else(|err| panic!("runtime error: {err}"))
    }

    fn run_err(src: &str) -> RuntimeError {
        run_src(src).expect_err("expected a runtime error")
    }

    #[test]
    fn test_vm_arithmetic() {
        assert_eq!(run_ok("return 2 + 3"), Value::Number(5.0));
        assert_eq!(run_ok("return 10 - 4 / 2"), Value::Number(8.0));
        assert_eq!(run_ok("return -(1 + 2) * 3"), Value::Number(-9.0));
        assert_eq!(run_ok("return 1 / 0"), Value::Number(f64::INFINITY));
    }

    #[test]
    fn test_vm_strings() {
        assert_eq!(run_ok("return \"a\" + \"b\""), Value::string("ab"));
        assert_eq!(run_ok("return \"ab\" == \"a\" + \"b\""), Value::Boolean(true));
        assert_eq!(
            run_err("return \"a\" + 1").message,
            "Operands must be two numbers or two strings."
        );
    }

    #[test]
    fn test_vm_comparison_and_logic() {
        assert_eq!(run_ok("return 1 < 2 and 2 <= 2"), Value::Boolean(true));
        assert_eq!(run_ok("return nil or 3 >= 4"), Value::Boolean(false));
        assert_eq!(run_ok("return false and 1"), Value::Boolean(false));
        assert_eq!(run_ok("return !nil"), Value::Boolean(true));
        assert_eq!(run_ok("return 1 == \"1\""), Value::Boolean(false));
        assert_eq!(run_ok("return nil != false"), Value::Boolean(true));
    }

    #[test]
    fn test_vm_type_errors() {
        assert_eq!(run_err("return 1 < \"x\"").message, "Operands must be numbers.");
        assert_eq!(run_err("return -\"x\"").message, "Operand must be a number.");
        assert_eq!(run_err("return !1").message, "Operand must be a boolean or nil.");
        assert_eq!(run_err("if (0) 1").message, "Cannot use number as a boolean.");
        assert_eq!(run_err("if (\"x\") 1").message, "Cannot use string as a boolean.");
    }

    #[test]
    fn test_vm_globals() {
        assert_eq!(run_ok("var a = 1 var a = 2 return a"), Value::Number(2.0));
        assert_eq!(run_ok("var a return a"), Value::Nil);
        assert_eq!(run_err("return b").message, "Undefined variable 'b'.");
        assert_eq!(run_err("b = 1").message, "Undefined variable 'b'.");
    }

    #[test]
    fn test_vm_locals_and_blocks() {
        assert_eq!(
            run_ok("var r { var a = 1 { var b = a + 1 r = b } } return r"),
            Value::Number(2.0)
        );
        assert_eq!(
            run_err("{ var hidden = 1 } return hidden").message,
            "Undefined variable 'hidden'."
        );
    }

    #[test]
    fn test_vm_control_flow() {
        assert_eq!(
            run_ok("var x = 0 if (nil) x = 1 else x = 2 return x"),
            Value::Number(2.0)
        );
        assert_eq!(
            run_ok("var n = 0 while n < 5 n = n + 1 return n"),
            Value::Number(5.0)
        );
        assert_eq!(
            run_ok("var n = 0 while false n = n + 1 return n"),
            Value::Number(0.0)
        );
        assert_eq!(
            run_ok("var s = 0 for var i = 0, i < 4, i = i + 1 { s = s + i } return s"),
            Value::Number(6.0)
        );
        assert_eq!(
            run_ok("var s = 0 for var i = 0, i < 4, { s = s + i i = i + 1 } return s"),
            Value::Number(6.0)
        );
    }

    #[test]
    fn test_vm_functions() {
        assert_eq!(
            run_ok("fn add(a, b) { return a + b } return add(2, 3)"),
            Value::Number(5.0)
        );
        assert_eq!(run_ok("fn f() { } return f()"), Value::Nil);
        assert_eq!(
            run_ok("fn fib(n) { if n < 2 return n return fib(n - 1) + fib(n - 2) } return fib(10)"),
            Value::Number(55.0)
        );
    }

    #[test]
    fn test_vm_arity_mismatch() {
        let err = run_err("fn f(a, b) { return a } f(1)");
        assert_eq!(err.message, "Expected 2 arguments but got 1.");
        let err = run_err("var x = 1 x()");
        assert_eq!(err.message, "Can only call functions and closures.");
    }

    #[test]
    fn test_vm_closures_share_cells() {
        let src = "
            fn counter() {
                var count = 0
                fn inc() { count = count + 1 return count }
                return inc
            }
            var c = counter()
            c()
            c()
            return c()
        ";
        assert_eq!(run_ok(src), Value::Number(3.0));

        let src = "
            fn pair() {
                var n = 0
                fn inc() { n = n + 1 return n }
                fn get() { return n }
                inc()
                return get
            }
            return pair()()
        ";
        assert_eq!(run_ok(src), Value::Number(1.0));
    }

    #[test]
    fn test_vm_local_recursive_closure() {
        let src = "
            fn outer() {
                fn fact(n) { if n < 2 return 1 return n * fact(n - 1) }
                return fact(5)
            }
            return outer()
        ";
        assert_eq!(run_ok(src), Value::Number(120.0));
    }

    #[test]
    fn test_vm_closed_slot_gets_fresh_cell() {
        let src = "
            var first
            var second
            {
                var a = 1
                fn f() { return a }
                first = f
            }
            {
                var b = 2
                fn g() { return b }
                second = g
            }
            return first() + second()
        ";
        assert_eq!(run_ok(src), Value::Number(3.0));
    }

    #[test]
    fn test_vm_stack_trace() {
        let src = "fn inner() { return 1 + nil }\nfn outer() {\n return inner()\n}\nouter()";
        let err = run_err(src);
        assert_eq!(err.message, "Operands must be two numbers or two strings.");
        let lines: Vec<String> = err.trace.iter().map(|f| f.to_string()).collect();
        assert_eq!(
            lines,
            vec!["[line 1] in inner()", "[line 3] in outer()", "[line 5] in script"]
        );
    }

    #[test]
    fn test_vm_unknown_opcode() {
        let mut function = Function::default();
        function.chunk.write(0xee, 1);
        let err = Vm::new().run(Rc::new(function)).unwrap_err();
        assert_eq!(err.message, "Unknown opcode 0xee at offset 0.");
    }

    #[test]
    fn test_vm_natives() {
        let mut vm = Vm::new();
        vm.define_native(NativeFunction::new("twice", Some(1), |args| {
            args[0]
                .as_number()
                .map(|n| Value::Number(n * 2.0))
                .ok_or_else(|| "twice expects a number".to_string())
        }));
        assert_eq!(vm.interpret("return twice(21)").unwrap(), Value::Number(42.0));

        let err = vm.interpret("return twice(1, 2)").unwrap_err();
        assert_eq!(err.to_string(), "Expected 1 arguments but got 2.\n[line 1] in script");

        match vm.interpret("return twice(nil)") {
            Err(RueError::Runtime(err)) => assert_eq!(err.message, "twice expects a number"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_vm_globals_persist_until_reset() {
        let mut vm = Vm::new();
        vm.interpret("var x = 40").unwrap();
        assert_eq!(vm.interpret("return x + 2").unwrap(), Value::Number(42.0));
        assert_eq!(vm.global("x"), Some(&Value::Number(40.0)));
        vm.reset();
        assert!(vm.interpret("return x").is_err());
    }

    #[test]
    fn test_vm_profile_counts_ops() {
        let mut vm = Vm::with_config(Config {
            profile_ops: true,
            ..Config::default()
        });
        vm.interpret("return 1 + 2").unwrap();
        let profile = vm.profile().unwrap();
        assert_eq!(profile.get(OpCode::Add).map(|s| s.count), Some(1));
        assert_eq!(profile.get(OpCode::Constant).map(|s| s.count), Some(2));
    }
}
