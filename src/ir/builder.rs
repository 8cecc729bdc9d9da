//! Instruction constructors
//!
//! Small helpers that pack opcode fields for every supported instruction
//! shape. Registers are taken as raw indices so callers can also build
//! deliberately invalid programs.

use super::format::{
    AluOp, Class, Instruction, JmpOp, Mode, Size, Source, LD_IMM64_CODE, PLACEHOLDER_CODE,
};

fn alu(class: Class, op: AluOp, source: Source, dst: u8, src: u8, imm: i32) -> Instruction {
    Instruction::new(class as u8 | op as u8 | source as u8, dst, src, 0, imm)
}

fn jmp(class: Class, op: JmpOp, source: Source, dst: u8, src: u8, off: i16, imm: i32) -> Instruction {
    Instruction::new(class as u8 | op as u8 | source as u8, dst, src, off, imm)
}

/// `dst = op(dst, imm)` on 64 bits
pub fn alu64_imm(op: AluOp, dst: u8, imm: i32) -> Instruction {
    alu(Class::Alu64, op, Source::K, dst, 0, imm)
}

/// `dst = op(dst, src)` on 64 bits
pub fn alu64_reg(op: AluOp, dst: u8, src: u8) -> Instruction {
    alu(Class::Alu64, op, Source::X, dst, src, 0)
}

/// `dst = op(dst, imm)` truncated to 32 bits
pub fn alu32_imm(op: AluOp, dst: u8, imm: i32) -> Instruction {
    alu(Class::Alu, op, Source::K, dst, 0, imm)
}

/// `dst = op(dst, src)` truncated to 32 bits
pub fn alu32_reg(op: AluOp, dst: u8, src: u8) -> Instruction {
    alu(Class::Alu, op, Source::X, dst, src, 0)
}

pub fn mov64_imm(dst: u8, imm: i32) -> Instruction {
    alu64_imm(AluOp::Mov, dst, imm)
}

pub fn mov64_reg(dst: u8, src: u8) -> Instruction {
    alu64_reg(AluOp::Mov, dst, src)
}

pub fn mov32_imm(dst: u8, imm: i32) -> Instruction {
    alu32_imm(AluOp::Mov, dst, imm)
}

pub fn neg64(dst: u8) -> Instruction {
    alu64_imm(AluOp::Neg, dst, 0)
}

pub fn neg32(dst: u8) -> Instruction {
    alu32_imm(AluOp::Neg, dst, 0)
}

/// `dst = sign_extend(imm)`
pub fn ld_imm32(dst: u8, imm: i32) -> Instruction {
    Instruction::new(PLACEHOLDER_CODE, dst, 0, 0, imm)
}

/// `dst = value`, as a wide immediate and its placeholder
pub fn ld_imm64(dst: u8, value: u64) -> [Instruction; 2] {
    [
        Instruction::new(LD_IMM64_CODE, dst, 0, 0, value as u32 as i32),
        Instruction::new(PLACEHOLDER_CODE, 0, 0, 0, (value >> 32) as u32 as i32),
    ]
}

/// `dst = *(size *)(src + off)`
pub fn load(size: Size, dst: u8, src: u8, off: i16) -> Instruction {
    Instruction::new(Class::Ldx as u8 | size as u8 | Mode::Mem as u8, dst, src, off, 0)
}

/// `*(size *)(dst + off) = imm`
pub fn store_imm(size: Size, dst: u8, off: i16, imm: i32) -> Instruction {
    Instruction::new(Class::St as u8 | size as u8 | Mode::Mem as u8, dst, 0, off, imm)
}

/// `*(size *)(dst + off) = src`
pub fn store_reg(size: Size, dst: u8, src: u8, off: i16) -> Instruction {
    Instruction::new(Class::Stx as u8 | size as u8 | Mode::Mem as u8, dst, src, off, 0)
}

/// Same as [`load`], `MEM_ACQ_REL` mode
pub fn load_acquire(size: Size, dst: u8, src: u8, off: i16) -> Instruction {
    Instruction::new(Class::Ldx as u8 | size as u8 | Mode::MemAcqRel as u8, dst, src, off, 0)
}

/// Same as [`store_reg`], `MEM_ACQ_REL` mode
pub fn store_release(size: Size, dst: u8, src: u8, off: i16) -> Instruction {
    Instruction::new(Class::Stx as u8 | size as u8 | Mode::MemAcqRel as u8, dst, src, off, 0)
}

/// Unconditional jump: `pc += 1 + off`
pub fn ja(off: i16) -> Instruction {
    jmp(Class::Jmp, JmpOp::Ja, Source::K, 0, 0, off, 0)
}

/// 64-bit compare of `dst` against `imm`
pub fn jmp_imm(op: JmpOp, dst: u8, imm: i32, off: i16) -> Instruction {
    jmp(Class::Jmp, op, Source::K, dst, 0, off, imm)
}

/// 64-bit compare of `dst` against `src`
pub fn jmp_reg(op: JmpOp, dst: u8, src: u8, off: i16) -> Instruction {
    jmp(Class::Jmp, op, Source::X, dst, src, off, 0)
}

/// 32-bit compare of `dst` against `imm`
pub fn jmp32_imm(op: JmpOp, dst: u8, imm: i32, off: i16) -> Instruction {
    jmp(Class::Jmp32, op, Source::K, dst, 0, off, imm)
}

/// 32-bit compare of `dst` against `src`
pub fn jmp32_reg(op: JmpOp, dst: u8, src: u8, off: i16) -> Instruction {
    jmp(Class::Jmp32, op, Source::X, dst, src, off, 0)
}
