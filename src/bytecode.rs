//! Bytecode representation for the Rue virtual machine.
//!
//! A compiled Rue function is represented as a [`Chunk`]: a flat `Vec<u8>`
//! of instructions, a constant pool, and a line-number table parallel to the
//! instruction bytes.
//!
//! # Encoding
//!
//! Each instruction is one [`OpCode`] byte followed by zero or more
//! single-byte operands. `CLOSURE` is the only variable-length instruction:
//! its function constant is followed by one `(is_local, index)` byte pair per
//! upvalue the function captures.
//!
//! Jump operands are *relative* distances measured from the byte after the
//! operand: forward for `JUMP`/`JUMP_IF_FALSE`, backward for `LOOP`.

use std::fmt;

use thiserror::Error;

use crate::value::Value;

// ─────────────────────────────────────────────────────────────────────────────
// OpCode
// ─────────────────────────────────────────────────────────────────────────────

/// Every instruction the Rue VM can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ── Constants / literals ─────────────────────────────────────────────────
    /// Push a value from the constant pool. Operand: constant index.
    Constant = 0x00,
    Nil = 0x01,
    True = 0x02,
    False = 0x03,

    // ── Stack manipulation ────────────────────────────────────────────────────
    Pop = 0x04,

    // ── Variables ─────────────────────────────────────────────────────────────
    /// Operand: slot index in the current call frame.
    GetLocal = 0x05,
    /// Operand: slot index. Leaves the assigned value on the stack.
    SetLocal = 0x06,
    /// Operand: constant index of the name string.
    GetGlobal = 0x07,
    /// Operand: constant index of the name string. Pops the value.
    DefineGlobal = 0x08,
    /// Operand: constant index of the name string. Leaves the value.
    SetGlobal = 0x09,
    /// Operand: upvalue index in the running closure.
    GetUpvalue = 0x0a,
    /// Operand: upvalue index. Leaves the value.
    SetUpvalue = 0x0b,
    /// Retire the open cell for the top slot and pop it.
    CloseUpvalue = 0x0c,

    // ── Comparison ────────────────────────────────────────────────────────────
    Equal = 0x0d,
    Greater = 0x0e,
    Less = 0x0f,

    // ── Arithmetic ────────────────────────────────────────────────────────────
    Add = 0x10,
    Subtract = 0x11,
    Multiply = 0x12,
    Divide = 0x13,

    // ── Unary ─────────────────────────────────────────────────────────────────
    Not = 0x14,
    Negate = 0x15,

    // ── Control flow ──────────────────────────────────────────────────────────
    /// Operand: forward distance.
    Jump = 0x16,
    /// Operand: forward distance. Leaves the condition on the stack.
    JumpIfFalse = 0x17,
    /// Operand: backward distance.
    Loop = 0x18,

    // ── Calls and returns ─────────────────────────────────────────────────────
    /// Operand: number of arguments above the callee.
    Call = 0x19,
    /// Operands: function constant index, then `(is_local, index)` pairs.
    Closure = 0x1a,
    Return = 0x1b,
}

impl OpCode {
    /// Every opcode, in discriminant order.
    pub const ALL: [OpCode; 28] = [
        OpCode::Constant,
        OpCode::Nil,
        OpCode::True,
        OpCode::False,
        OpCode::Pop,
        OpCode::GetLocal,
        OpCode::SetLocal,
        OpCode::GetGlobal,
        OpCode::DefineGlobal,
        OpCode::SetGlobal,
        OpCode::GetUpvalue,
        OpCode::SetUpvalue,
        OpCode::CloseUpvalue,
        OpCode::Equal,
        OpCode::Greater,
        OpCode::Less,
        OpCode::Add,
        OpCode::Subtract,
        OpCode::Multiply,
        OpCode::Divide,
        OpCode::Not,
        OpCode::Negate,
        OpCode::Jump,
        OpCode::JumpIfFalse,
        OpCode::Loop,
        OpCode::Call,
        OpCode::Closure,
        OpCode::Return,
    ];

    /// The disassembler mnemonic.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Constant => "CONSTANT",
            OpCode::Nil => "NIL",
            OpCode::True => "TRUE",
            OpCode::False => "FALSE",
            OpCode::Pop => "POP",
            OpCode::GetLocal => "GET_LOCAL",
            OpCode::SetLocal => "SET_LOCAL",
            OpCode::GetGlobal => "GET_GLOBAL",
            OpCode::DefineGlobal => "DEFINE_GLOBAL",
            OpCode::SetGlobal => "SET_GLOBAL",
            OpCode::GetUpvalue => "GET_UPVALUE",
            OpCode::SetUpvalue => "SET_UPVALUE",
            OpCode::CloseUpvalue => "CLOSE_UPVALUE",
            OpCode::Equal => "EQUAL",
            OpCode::Greater => "GREATER",
            OpCode::Less => "LESS",
            OpCode::Add => "ADD",
            OpCode::Subtract => "SUBTRACT",
            OpCode::Multiply => "MULTIPLY",
            OpCode::Divide => "DIVIDE",
            OpCode::Not => "NOT",
            OpCode::Negate => "NEGATE",
            OpCode::Jump => "JUMP",
            OpCode::JumpIfFalse => "JUMP_IF_FALSE",
            OpCode::Loop => "LOOP",
            OpCode::Call => "CALL",
            OpCode::Closure => "CLOSURE",
            OpCode::Return => "RETURN",
        }
    }

    /// Number of fixed operand bytes following the opcode. `CLOSURE` carries
    /// additional upvalue pairs on top of this.
    pub fn operand_count(self) -> usize {
        match self {
            OpCode::Constant
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetGlobal
            | OpCode::DefineGlobal
            | OpCode::SetGlobal
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::Loop
            | OpCode::Call
            | OpCode::Closure => 1,
            OpCode::Nil
            | OpCode::True
            | OpCode::False
            | OpCode::Pop
            | OpCode::CloseUpvalue
            | OpCode::Equal
            | OpCode::Greater
            | OpCode::Less
            | OpCode::Add
            | OpCode::Subtract
            | OpCode::Multiply
            | OpCode::Divide
            | OpCode::Not
            | OpCode::Negate
            | OpCode::Return => 0,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;
    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        OpCode::ALL.get(byte as usize).copied().ok_or(byte)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk
// ─────────────────────────────────────────────────────────────────────────────

/// A bytecode chunk: the compiled form of one function (or the script).
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// Raw instruction bytes.
    pub code: Vec<u8>,
    /// Source line for each byte in `code`.
    pub lines: Vec<u32>,
    /// Constant pool. Not deduplicated.
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Emission helpers ─────────────────────────────────────────────────────

    /// Emit a single byte (raw opcode or operand).
    #[inline]
    pub fn write(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    #[inline]
    pub fn write_op(&mut self, op: OpCode, line: u32) {
        self.write(op as u8, line);
    }

    #[inline]
    pub fn write_op_u8(&mut self, op: OpCode, operand: u8, line: u32) {
        self.write_op(op, line);
        self.write(operand, line);
    }

    /// Append a constant and return its pool index. Range checking against
    /// the single-byte operand is left to the caller.
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    // ── Jump patching ────────────────────────────────────────────────────────

    /// Emit a jump with a placeholder operand and return the operand's offset.
    pub fn emit_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.write_op_u8(op, 0xff, line);
        self.code.len() - 1
    }

    /// Point the jump operand at `offset` to the current end of code.
    ///
    /// Fails with the required distance when it does not fit in one byte.
    pub fn patch_jump(&mut self, offset: usize) -> Result<(), usize> {
        let distance = self.code.len() - offset - 1;
        let byte = u8::try_from(distance).map_err(|_| distance)?;
        self.code[offset] = byte;
        Ok(())
    }

    /// Emit a `LOOP` back to `loop_start`.
    ///
    /// Fails with the required distance when it does not fit in one byte; the
    /// opcode is emitted either way so offsets stay consistent.
    pub fn emit_loop(&mut self, loop_start: usize, line: u32) -> Result<(), usize> {
        self.write_op(OpCode::Loop, line);
        let distance = self.code.len() - loop_start + 1;
        match u8::try_from(distance) {
            Ok(byte) => {
                self.write(byte, line);
                Ok(())
            }
            Err(_) => {
                self.write(0, line);
                Err(distance)
            }
        }
    }

    // ── Decoding ─────────────────────────────────────────────────────────────

    /// Decode the whole chunk into structured instructions.
    pub fn instructions(&self) -> Result<Vec<Instruction>, DecodeError> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < self.code.len() {
            let instruction = self.decode(offset)?;
            offset += instruction.len();
            out.push(instruction);
        }
        Ok(out)
    }

    /// Decode the single instruction starting at `offset`.
    pub fn decode(&self, offset: usize) -> Result<Instruction, DecodeError> {
        let byte = *self.code.get(offset).ok_or(DecodeError::Truncated { offset })?;
        let line = *self.lines.get(offset).ok_or(DecodeError::Truncated { offset })?;
        let op = OpCode::try_from(byte).map_err(|byte| DecodeError::UnknownOpcode { byte, offset })?;

        let mut len = op.operand_count();
        if op == OpCode::Closure {
            let index = self.operand(offset, 1)?;
            let upvalues = match self.constants.get(index as usize) {
                Some(Value::Function(function)) => function.upvalue_count,
                _ => return Err(DecodeError::NotAFunction { offset }),
            };
            len += upvalues * 2;
        }

        let operands = (1..=len)
            .map(|i| self.operand(offset, i))
            .collect::<Result<Vec<u8>, _>>()?;

        Ok(Instruction {
            offset,
            line,
            op,
            operands,
        })
    }

    fn operand(&self, offset: usize, i: usize) -> Result<u8, DecodeError> {
        self.code
            .get(offset + i)
            .copied()
            .ok_or(DecodeError::Truncated { offset })
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub line: u32,
    pub op: OpCode,
    pub operands: Vec<u8>,
}

impl Instruction {
    /// Encoded size in bytes.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        1 + self.operands.len()
    }

    /// The constant pool index this instruction references, if any.
    pub fn constant_index(&self) -> Option<usize> {
        match self.op {
            OpCode::Constant
            | OpCode::GetGlobal
            | OpCode::DefineGlobal
            | OpCode::SetGlobal
            | OpCode::Closure => self.operands.first().map(|&b| b as usize),
            _ => None,
        }
    }

    /// The `(is_local, index)` capture pairs of a `CLOSURE`.
    pub fn captures(&self) -> Vec<(bool, u8)> {
        if self.op != OpCode::Closure {
            return Vec::new();
        }
        self.operands[1..]
            .chunks_exact(2)
            .map(|pair| (pair[0] == 1, pair[1]))
            .collect()
    }

    /// Absolute target offset of a jump instruction.
    pub fn jump_target(&self) -> Option<usize> {
        let distance = *self.operands.first()? as usize;
        let next = self.offset + self.len();
        match self.op {
            OpCode::Jump | OpCode::JumpIfFalse => Some(next + distance),
            OpCode::Loop => next.checked_sub(distance),
            _ => None,
        }
    }
}

/// Failure to decode a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Unknown opcode {byte:#04x} at offset {offset}.")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("Truncated instruction at offset {offset}.")]
    Truncated { offset: usize },
    #[error("Closure at offset {offset} does not reference a function constant.")]
    NotAFunction { offset: usize },
}

// ─────────────────────────────────────────────────────────────────────────────
// Disassembler
// ─────────────────────────────────────────────────────────────────────────────

/// Disassemble `chunk` to a human-readable listing.
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = format!("=== {name} ===\n");
    let mut offset = 0usize;
    while offset < chunk.code.len() {
        let (text, size) = disassemble_instruction(chunk, offset);
        out.push_str(&text);
        out.push('\n');
        offset += size;
    }
    out
}

/// Disassemble a single instruction at `offset`.
///
/// Returns `(text, bytes_consumed)`.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let line = if offset > 0 && chunk.lines.get(offset) == chunk.lines.get(offset - 1) {
        "   |".to_string()
    } else {
        format!("{:4}", chunk.lines.get(offset).copied().unwrap_or(0))
    };
    let prefix = format!("{offset:04} {line} ");

    let instruction = match chunk.decode(offset) {
        Ok(instruction) => instruction,
        Err(err) => return (format!("{prefix}{err}"), 1),
    };

    let op = instruction.op;
    let body = match op {
        OpCode::Constant | OpCode::GetGlobal | OpCode::DefineGlobal | OpCode::SetGlobal => {
            let idx = instruction.operands[0];
            format!("{:<16} {idx:4} '{}'", op.name(), constant_text(chunk, idx))
        }
        OpCode::Closure => {
            let idx = instruction.operands[0];
            let mut text = format!("{:<16} {idx:4} {}", op.name(), constant_text(chunk, idx));
            for (is_local, index) in instruction.captures() {
                let kind = if is_local { "local" } else { "upvalue" };
                text.push_str(&format!(" ({kind} {index})"));
            }
            text
        }
        OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => {
            let target = instruction.jump_target().unwrap_or(0);
            format!("{:<16} {offset:4} -> {target}", op.name())
        }
        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call => format!("{:<16} {:4}", op.name(), instruction.operands[0]),
        OpCode::Nil
        | OpCode::True
        | OpCode::False
        | OpCode::Pop
        | OpCode::CloseUpvalue
        | OpCode::Equal
        | OpCode::Greater
        | OpCode::Less
        | OpCode::Add
        | OpCode::Subtract
        | OpCode::Multiply
        | OpCode::Divide
        | OpCode::Not
        | OpCode::Negate
        | OpCode::Return => op.name().to_string(),
    };

    (format!("{prefix}{body}"), instruction.len())
}

fn constant_text(chunk: &Chunk, idx: u8) -> String {
    chunk
        .constants
        .get(idx as usize)
        .map(|c| c.to_string())
        .unwrap_or_else(|| "<oob>".to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
