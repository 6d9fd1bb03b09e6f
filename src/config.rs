//! Diagnostic switches shared by the compiler and the VM.
//!
//! None of these change what a program computes; they only control what gets
//! logged while it is compiled and run.

/// Diagnostic configuration for a compile/run session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    /// Log the disassembly of every compiled function at `debug` level.
    pub print_code: bool,
    /// Log each instruction before it executes at `trace` level.
    pub trace_execution: bool,
    /// Log the current frame's value stack alongside each traced instruction.
    pub trace_stack: bool,
    /// Accumulate per-opcode execution time and log it after each run.
    pub profile_ops: bool,
}

impl Config {
    /// Is any diagnostic output requested?
    pub fn is_diagnostic(&self) -> bool {
        self.print_code || self.trace_execution || self.trace_stack || self.profile_ops
    }

    /// The most verbose log level these switches need, if any.
    pub fn log_level(&self) -> Option<log::LevelFilter> {
        if self.trace_execution || self.trace_stack {
            Some(log::LevelFilter::Trace)
        } else if self.print_code {
            Some(log::LevelFilter::Debug)
        } else if self.profile_ops {
            Some(log::LevelFilter::Info)
        } else {
            None
        }
    }
}
