//! Tagged instruction decode
//!
//! Turns raw [`Instruction`] slots into the closed [`Insn`] sum type. The
//! validator and the interpreter both decode through [`Insn::decode`], so the
//! set of accepted opcode shapes is defined exactly once, here.

use super::format::{
    AluOp, Class, Instruction, JmpOp, Mode, Size, Source, REGISTER_COUNT,
};
use thiserror::Error;

/// Decode errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unsupported instruction (code {code:#04x})")]
    Unsupported { code: u8 },

    #[error("register r{reg} out of range")]
    RegisterOutOfRange { reg: u8 },

    #[error("wide immediate not followed by a placeholder slot")]
    MalformedWideImmediate,

    #[error("wide immediate truncated at end of program")]
    Truncated,
}

/// A register index known to be below [`REGISTER_COUNT`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(u8);

impl Reg {
    pub fn new(index: u8) -> Result<Self, DecodeError> {
        if (index as usize) < REGISTER_COUNT {
            Ok(Reg(index))
        } else {
            Err(DecodeError::RegisterOutOfRange { reg: index })
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Second operand of an ALU, jump or store instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Imm(i32),
    Reg(Reg),
}

/// Operation width for ALU and jump classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W32,
    W64,
}

/// Memory ordering requested by a load or store.
///
/// `AcquireRelease` is accepted and executed as a plain access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    Plain,
    AcquireRelease,
}

/// A fully decoded, register-checked instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insn {
    /// `LD | W | IMM`
    LoadImm { dst: Reg, imm: i32 },
    /// `LD | DW | IMM` plus its placeholder slot
    LoadImm64 { dst: Reg, value: u64 },
    /// `LDX`
    Load {
        size: Size,
        ordering: Ordering,
        dst: Reg,
        src: Reg,
        off: i16,
    },
    /// `ST` (immediate source) and `STX` (register source)
    Store {
        size: Size,
        ordering: Ordering,
        dst: Reg,
        src: Operand,
        off: i16,
    },
    Alu {
        width: Width,
        op: AluOp,
        dst: Reg,
        src: Operand,
    },
    Neg { width: Width, dst: Reg },
    Ja { width: Width, off: i16 },
    Jump {
        width: Width,
        op: JmpOp,
        dst: Reg,
        src: Operand,
        off: i16,
    },
}

/// Opcode shape, resolved before any register is looked at
enum Shape {
    LoadImm,
    LoadImm64,
    Load(Size, Ordering),
    Store(Size, Ordering),
    StoreReg(Size, Ordering),
    Alu(Width, AluOp, Source),
    Neg(Width),
    Ja(Width),
    Jump(Width, JmpOp, Source),
}

fn shape(insn: &Instruction) -> Option<Shape> {
    let class = insn.class();

    if class.is_memory() {
        let size = insn.size();
        let mode = Mode::from_code(insn.code)?;
        let ordering = match mode {
            Mode::Mem => Ordering::Plain,
            Mode::MemAcqRel => Ordering::AcquireRelease,
            Mode::Imm if class == Class::Ld => {
                return match size {
                    Size::W => Some(Shape::LoadImm),
                    Size::Dw => Some(Shape::LoadImm64),
                    _ => None,
                };
            }
            _ => return None,
        };
        return match class {
            Class::Ldx => Some(Shape::Load(size, ordering)),
            Class::St => Some(Shape::Store(size, ordering)),
            Class::Stx => Some(Shape::StoreReg(size, ordering)),
            _ => None,
        };
    }

    let width = match class {
        Class::Alu | Class::Jmp32 => Width::W32,
        _ => Width::W64,
    };
    let source = insn.source();

    if class.is_jump() {
        return match (JmpOp::from_code(insn.code)?, source) {
            (JmpOp::Ja, Source::K) => Some(Shape::Ja(width)),
            (JmpOp::Ja, Source::X) => None,
            (op, source) => Some(Shape::Jump(width, op, source)),
        };
    }

    match (AluOp::from_code(insn.code)?, source) {
        (AluOp::Neg, Source::K) => Some(Shape::Neg(width)),
        (AluOp::Neg, Source::X) => None,
        (op, source) => Some(Shape::Alu(width, op, source)),
    }
}

fn operand(insn: &Instruction, source: Source) -> Result<Operand, DecodeError> {
    match source {
        Source::K => Ok(Operand::Imm(insn.imm)),
        Source::X => Ok(Operand::Reg(Reg::new(insn.src_reg)?)),
    }
}

impl Insn {
    /// Decode the instruction at `pc`.
    ///
    /// Checks run in a fixed order: opcode shape, then the registers that
    /// shape uses, then the wide-immediate placeholder.
    pub fn decode(program: &[Instruction], pc: usize) -> Result<Self, DecodeError> {
        let insn = program.get(pc).ok_or(DecodeError::Truncated)?;
        let shape = shape(insn).ok_or(DecodeError::Unsupported { code: insn.code })?;

        let dst = Reg::new(insn.dst_reg)?;
        if insn.class().is_memory() {
            Reg::new(insn.src_reg)?;
        }

        let decoded = match shape {
            Shape::LoadImm => Insn::LoadImm { dst, imm: insn.imm },
            Shape::LoadImm64 => {
                let next = program.get(pc + 1).ok_or(DecodeError::Truncated)?;
                if !next.is_placeholder() {
                    return Err(DecodeError::MalformedWideImmediate);
                }
                let value = ((next.imm as u32 as u64) << 32) | (insn.imm as u32 as u64);
                Insn::LoadImm64 { dst, value }
            }
            Shape::Load(size, ordering) => Insn::Load {
                size,
                ordering,
                dst,
                src: Reg::new(insn.src_reg)?,
                off: insn.off,
            },
            Shape::Store(size, ordering) => Insn::Store {
                size,
                ordering,
                dst,
                src: Operand::Imm(insn.imm),
                off: insn.off,
            },
            Shape::StoreReg(size, ordering) => Insn::Store {
                size,
                ordering,
                dst,
                src: Operand::Reg(Reg::new(insn.src_reg)?),
                off: insn.off,
            },
            Shape::Alu(width, op, source) => Insn::Alu {
                width,
                op,
                dst,
                src: operand(insn, source)?,
            },
            Shape::Neg(width) => Insn::Neg { width, dst },
            Shape::Ja(width) => Insn::Ja {
                width,
                off: insn.off,
            },
            Shape::Jump(width, op, source) => Insn::Jump {
                width,
                op,
                dst,
                src: operand(insn, source)?,
                off: insn.off,
            },
        };

        Ok(decoded)
    }

    /// Number of program slots this instruction occupies
    pub fn slots(&self) -> usize {
        match self {
            Insn::LoadImm64 { .. } => 2,
            _ => 1,
        }
    }
}
