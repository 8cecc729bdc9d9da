//! Instruction format for bpfvm
//!
//! eBPF-style fixed-width instructions, one 8-byte record per slot.
//!
//! # Instruction Encoding
//!
//! ```text
//! ┌──────────┬─────────┬─────────┬──────────────┬──────────────────────┐
//! │   code   │ src_reg │ dst_reg │    offset    │      immediate       │
//! │  8 bits  │  4 bits │  4 bits │ 16 bits (LE) │     32 bits (LE)     │
//! └──────────┴─────────┴─────────┴──────────────┴──────────────────────┘
//! ```
//!
//! The opcode byte is split differently depending on the class:
//!
//! ```text
//! memory classes (LD, LDX, ST, STX):   mode(3) | size(2) | class(3)
//! ALU / JMP classes:                   op(4)   | src(1)  | class(3)
//! ```
//!
//! A 64-bit immediate load (`LD | DW | IMM`) occupies two slots: the second
//! slot is a placeholder `LD | W | IMM` with zero registers and offset whose
//! `imm` carries the high 32 bits.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of registers in the register file (r0..=r10)
pub const REGISTER_COUNT: usize = 11;

/// Size in bytes of one encoded instruction slot
pub const INSN_SIZE: usize = 8;

// Raw opcode field masks
const CLASS_MASK: u8 = 0x07;
const SIZE_MASK: u8 = 0x18;
const MODE_MASK: u8 = 0xe0;
const OP_MASK: u8 = 0xf0;
const SOURCE_MASK: u8 = 0x08;

/// Extract the class bits of an opcode
#[inline]
pub const fn class(code: u8) -> u8 {
    code & CLASS_MASK
}

/// Extract the size bits of a memory opcode
#[inline]
pub const fn size(code: u8) -> u8 {
    code & SIZE_MASK
}

/// Extract the mode bits of a memory opcode
#[inline]
pub const fn mode(code: u8) -> u8 {
    code & MODE_MASK
}

/// Extract the operation bits of an ALU/JMP opcode
#[inline]
pub const fn op(code: u8) -> u8 {
    code & OP_MASK
}

/// Extract the source-kind bit of an ALU/JMP opcode
#[inline]
pub const fn source_kind(code: u8) -> u8 {
    code & SOURCE_MASK
}

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("mode {mode:#04x} not implemented (code {code:#04x})")]
    ModeNotImplemented { code: u8, mode: u8 },

    #[error("instruction truncated: {len} bytes, need 8")]
    Truncated { len: usize },

    #[error("program length {len} is not a multiple of 8")]
    TrailingBytes { len: usize },

    #[error("invalid JSON program: {0}")]
    Json(#[from] serde_json::Error),
}

/// Instruction class (3 bits, every value is a class)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Class {
    Ld = 0x00,
    Ldx = 0x01,
    St = 0x02,
    Stx = 0x03,
    Alu = 0x04,
    Jmp = 0x05,
    Jmp32 = 0x06,
    Alu64 = 0x07,
}

impl Class {
    pub fn from_code(code: u8) -> Self {
        match class(code) {
            0x00 => Class::Ld,
            0x01 => Class::Ldx,
            0x02 => Class::St,
            0x03 => Class::Stx,
            0x04 => Class::Alu,
            0x05 => Class::Jmp,
            0x06 => Class::Jmp32,
            _ => Class::Alu64,
        }
    }

    /// Load/store classes carry size and mode fields
    pub fn is_memory(&self) -> bool {
        matches!(self, Class::Ld | Class::Ldx | Class::St | Class::Stx)
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, Class::Jmp | Class::Jmp32)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Class::Ld => "LD",
            Class::Ldx => "LDX",
            Class::St => "ST",
            Class::Stx => "STX",
            Class::Alu => "ALU",
            Class::Jmp => "JMP",
            Class::Jmp32 => "JMP32",
            Class::Alu64 => "ALU64",
        }
    }
}

/// Memory access width (2 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Size {
    W = 0x00,  // 32-bit
    H = 0x08,  // 16-bit
    B = 0x10,  // 8-bit
    Dw = 0x18, // 64-bit
}

impl Size {
    pub fn from_code(code: u8) -> Self {
        match size(code) {
            0x00 => Size::W,
            0x08 => Size::H,
            0x10 => Size::B,
            _ => Size::Dw,
        }
    }

    pub fn bytes(&self) -> usize {
        match self {
            Size::B => 1,
            Size::H => 2,
            Size::W => 4,
            Size::Dw => 8,
        }
    }

    pub fn bits(&self) -> u32 {
        self.bytes() as u32 * 8
    }
}

/// Memory addressing mode (3 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mode {
    Imm = 0x00,
    Abs = 0x20,
    Ind = 0x40,
    Mem = 0x60,
    Len = 0x80,
    Msh = 0xa0,
    /// Plain access with acquire (load) / release (store) intent
    MemAcqRel = 0xe0,
}

impl Mode {
    /// Returns None for 0xc0, which is not a defined mode
    pub fn from_code(code: u8) -> Option<Self> {
        match mode(code) {
            0x00 => Some(Mode::Imm),
            0x20 => Some(Mode::Abs),
            0x40 => Some(Mode::Ind),
            0x60 => Some(Mode::Mem),
            0x80 => Some(Mode::Len),
            0xa0 => Some(Mode::Msh),
            0xe0 => Some(Mode::MemAcqRel),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Imm => "imm",
            Mode::Abs => "abs",
            Mode::Ind => "ind",
            Mode::Mem => "mem",
            Mode::Len => "len",
            Mode::Msh => "msh",
            Mode::MemAcqRel => "mem_acq_rel",
        }
    }
}

/// Second operand kind for ALU/JMP instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Source {
    /// 32-bit immediate
    K = 0x00,
    /// Source register
    X = 0x08,
}

impl Source {
    pub fn from_code(code: u8) -> Self {
        if source_kind(code) == 0 {
            Source::K
        } else {
            Source::X
        }
    }
}

/// ALU operations (upper 4 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AluOp {
    Add = 0x00,
    Sub = 0x10,
    Mul = 0x20,
    Div = 0x30,
    Or = 0x40,
    And = 0x50,
    Lsh = 0x60,
    Rsh = 0x70,
    Neg = 0x80,
    Mod = 0x90,
    Xor = 0xa0,
    Mov = 0xb0,
    Arsh = 0xc0,
}

impl AluOp {
    pub const ALL: [AluOp; 13] = [
        AluOp::Add,
        AluOp::Sub,
        AluOp::Mul,
        AluOp::Div,
        AluOp::Or,
        AluOp::And,
        AluOp::Lsh,
        AluOp::Rsh,
        AluOp::Neg,
        AluOp::Mod,
        AluOp::Xor,
        AluOp::Mov,
        AluOp::Arsh,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        match op(code) {
            0x00 => Some(AluOp::Add),
            0x10 => Some(AluOp::Sub),
            0x20 => Some(AluOp::Mul),
            0x30 => Some(AluOp::Div),
            0x40 => Some(AluOp::Or),
            0x50 => Some(AluOp::And),
            0x60 => Some(AluOp::Lsh),
            0x70 => Some(AluOp::Rsh),
            0x80 => Some(AluOp::Neg),
            0x90 => Some(AluOp::Mod),
            0xa0 => Some(AluOp::Xor),
            0xb0 => Some(AluOp::Mov),
            0xc0 => Some(AluOp::Arsh),
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Mul => "mul",
            AluOp::Div => "div",
            AluOp::Or => "or",
            AluOp::And => "and",
            AluOp::Lsh => "lsh",
            AluOp::Rsh => "rsh",
            AluOp::Neg => "neg",
            AluOp::Mod => "mod",
            AluOp::Xor => "xor",
            AluOp::Mov => "mov",
            AluOp::Arsh => "arsh",
        }
    }

    /// Shift operations share the shift-amount guard
    pub fn is_shift(&self) -> bool {
        matches!(self, AluOp::Lsh | AluOp::Rsh | AluOp::Arsh)
    }
}

/// Jump operations (upper 4 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JmpOp {
    Ja = 0x00,
    Jeq = 0x10,
    Jgt = 0x20,
    Jge = 0x30,
    Jset = 0x40,
    Jne = 0x50,
    Jsgt = 0x60,
    Jsge = 0x70,
    Jlt = 0xa0,
    Jle = 0xb0,
    Jslt = 0xc0,
    Jsle = 0xd0,
}

impl JmpOp {
    pub const ALL: [JmpOp; 12] = [
        JmpOp::Ja,
        JmpOp::Jeq,
        JmpOp::Jgt,
        JmpOp::Jge,
        JmpOp::Jset,
        JmpOp::Jne,
        JmpOp::Jsgt,
        JmpOp::Jsge,
        JmpOp::Jlt,
        JmpOp::Jle,
        JmpOp::Jslt,
        JmpOp::Jsle,
    ];

    /// CALL (0x80), EXIT (0x90), 0xe0 and 0xf0 are not jump operations here
    pub fn from_code(code: u8) -> Option<Self> {
        match op(code) {
            0x00 => Some(JmpOp::Ja),
            0x10 => Some(JmpOp::Jeq),
            0x20 => Some(JmpOp::Jgt),
            0x30 => Some(JmpOp::Jge),
            0x40 => Some(JmpOp::Jset),
            0x50 => Some(JmpOp::Jne),
            0x60 => Some(JmpOp::Jsgt),
            0x70 => Some(JmpOp::Jsge),
            0xa0 => Some(JmpOp::Jlt),
            0xb0 => Some(JmpOp::Jle),
            0xc0 => Some(JmpOp::Jslt),
            0xd0 => Some(JmpOp::Jsle),
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            JmpOp::Ja => "ja",
            JmpOp::Jeq => "jeq",
            JmpOp::Jgt => "jgt",
            JmpOp::Jge => "jge",
            JmpOp::Jset => "jset",
            JmpOp::Jne => "jne",
            JmpOp::Jsgt => "jsgt",
            JmpOp::Jsge => "jsge",
            JmpOp::Jlt => "jlt",
            JmpOp::Jle => "jle",
            JmpOp::Jslt => "jslt",
            JmpOp::Jsle => "jsle",
        }
    }
}

/// Opcode of the wide-immediate placeholder slot
pub const PLACEHOLDER_CODE: u8 = Class::Ld as u8 | Size::W as u8 | Mode::Imm as u8;

/// Opcode of a 64-bit immediate load
pub const LD_IMM64_CODE: u8 = Class::Ld as u8 | Size::Dw as u8 | Mode::Imm as u8;

/// One raw instruction slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Instruction {
    pub code: u8,
    pub dst_reg: u8, // 4 bits on the wire
    pub src_reg: u8, // 4 bits on the wire
    #[serde(default)]
    pub off: i16,
    #[serde(default)]
    pub imm: i32,
}

impl Instruction {
    pub fn new(code: u8, dst_reg: u8, src_reg: u8, off: i16, imm: i32) -> Self {
        Self {
            code,
            dst_reg,
            src_reg,
            off,
            imm,
        }
    }

    #[inline]
    pub fn class(&self) -> Class {
        Class::from_code(self.code)
    }

    #[inline]
    pub fn size(&self) -> Size {
        Size::from_code(self.code)
    }

    #[inline]
    pub fn source(&self) -> Source {
        Source::from_code(self.code)
    }

    /// Decoded mode, or an error for the undefined mode bits
    pub fn mode(&self) -> Result<Mode, CodecError> {
        Mode::from_code(self.code).ok_or(CodecError::ModeNotImplemented {
            code: self.code,
            mode: mode(self.code),
        })
    }

    /// True iff this slot starts a two-slot 64-bit immediate load.
    ///
    /// Only memory classes can be wide immediates; for those an undefined
    /// mode is reported as an error instead of `false`.
    pub fn is_wide_immediate(&self) -> Result<bool, CodecError> {
        if !self.class().is_memory() {
            return Ok(false);
        }
        let mode = self.mode()?;
        Ok(mode == Mode::Imm && self.size() == Size::Dw)
    }

    /// True iff this slot has the exact shape of a wide-immediate placeholder
    pub fn is_placeholder(&self) -> bool {
        self.code == PLACEHOLDER_CODE && self.dst_reg == 0 && self.src_reg == 0 && self.off == 0
    }

    /// Encode to the 8-byte wire record
    pub fn encode(&self) -> [u8; INSN_SIZE] {
        let mut bytes = [0u8; INSN_SIZE];
        bytes[0] = self.code;
        bytes[1] = ((self.src_reg & 0x0f) << 4) | (self.dst_reg & 0x0f);
        bytes[2..4].copy_from_slice(&self.off.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.imm.to_le_bytes());
        bytes
    }

    /// Decode from the first 8 bytes of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < INSN_SIZE {
            return Err(CodecError::Truncated { len: bytes.len() });
        }

        Ok(Self {
            code: bytes[0],
            dst_reg: bytes[1] & 0x0f,
            src_reg: (bytes[1] >> 4) & 0x0f,
            off: i16::from_le_bytes([bytes[2], bytes[3]]),
            imm: i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "code={:#04x} dst=r{} src=r{} off={} imm={}",
            self.code, self.dst_reg, self.src_reg, self.off, self.imm
        )
    }
}

/// Program representation: an ordered sequence of instruction slots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub instructions: Vec<Instruction>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a program from a list of instructions
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn push(&mut self, insn: Instruction) {
        self.instructions.push(insn);
    }

    pub fn extend<I: IntoIterator<Item = Instruction>>(&mut self, insns: I) {
        self.instructions.extend(insns);
    }

    /// Number of slots (a wide immediate counts twice)
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Encode as a raw stream of 8-byte records
    pub fn to_bytes(&self) -> Vec<u8> {
        self.instructions.iter().flat_map(|i| i.encode()).collect()
    }

    /// Decode a raw stream of 8-byte records
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() % INSN_SIZE != 0 {
            return Err(CodecError::TrailingBytes { len: bytes.len() });
        }

        let instructions = bytes
            .chunks_exact(INSN_SIZE)
            .map(Instruction::decode)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { instructions })
    }

    /// JSON form: an array of `{code, dst_reg, src_reg, off, imm}` objects
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string_pretty(&self.instructions)?)
    }

    pub fn from_json(text: &str) -> Result<Self, CodecError> {
        let instructions: Vec<Instruction> = serde_json::from_str(text)?;
        Ok(Self { instructions })
    }
}

impl From<Vec<Instruction>> for Program {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self::from_instructions(instructions)
    }
}

impl AsRef<[Instruction]> for Program {
    fn as_ref(&self) -> &[Instruction] {
        &self.instructions
    }
}
