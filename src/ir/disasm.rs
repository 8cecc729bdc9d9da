//! Disassembler for bpfvm programs
//!
//! Renders each slot as a comma-separated `key=value` description, e.g.
//!
//! ```text
//! class=LD,size=32-bit,mode=imm,imm=123,dst_reg=0,src_reg=0,off=0
//! class=ALU64,op=add,dst_reg=0,src_reg=1
//! class=JMP,op=ja,off=-2
//! ```
//!
//! A slot that cannot be described is reported on its own line; the rest of
//! the listing is still produced.

use super::format::{
    mode, op, AluOp, Class, CodecError, Instruction, JmpOp, Mode, Program, Size, Source, INSN_SIZE,
    REGISTER_COUNT,
};
use std::fmt;
use thiserror::Error;

/// Per-line description errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisasmError {
    #[error("mode {0:#04x} not implemented")]
    UnknownMode(u8),
    #[error("unsupported alu op {0:#04x}")]
    UnsupportedAluOp(u8),
    #[error("unsupported jmp op {0:#04x}")]
    UnsupportedJmpOp(u8),
    #[error("printing register {0}")]
    InvalidRegister(u8),
    #[error("immediate of size {0}-bit not implemented")]
    ImmediateSize(u32),
    #[error("wide immediate at {0} has no placeholder slot")]
    MissingPlaceholder(usize),
    #[error("no instruction at {0}")]
    OutOfRange(usize),
}

fn reg(r: u8) -> Result<u8, DisasmError> {
    if (r as usize) < REGISTER_COUNT {
        Ok(r)
    } else {
        Err(DisasmError::InvalidRegister(r))
    }
}

fn describe_source(out: &mut String, insn: &Instruction) -> Result<(), DisasmError> {
    match insn.source() {
        Source::K => out.push_str(&format!("imm={}", insn.imm)),
        Source::X => out.push_str(&format!("src_reg={}", reg(insn.src_reg)?)),
    }
    Ok(())
}

fn describe_memory(out: &mut String, program: &[Instruction], pc: usize) -> Result<(), DisasmError> {
    let insn = &program[pc];
    let size = insn.size();
    let mode = Mode::from_code(insn.code).ok_or(DisasmError::UnknownMode(mode(insn.code)))?;

    out.push_str(&format!(",size={}-bit", size.bits()));
    match mode {
        Mode::Imm => {
            out.push_str(",mode=imm,");
            match size {
                Size::W => out.push_str(&format!("imm={}", insn.imm)),
                Size::Dw => {
                    let next = program
                        .get(pc + 1)
                        .ok_or(DisasmError::MissingPlaceholder(pc))?;
                    let value = ((next.imm as u32 as u64) << 32) | (insn.imm as u32 as u64);
                    out.push_str(&format!("imm={}", value as i64));
                }
                Size::H | Size::B => return Err(DisasmError::ImmediateSize(size.bits())),
            }
        }
        Mode::Mem | Mode::MemAcqRel => out.push_str(&format!(",mode={}", mode.name())),
        _ => return Err(DisasmError::UnknownMode(mode as u8)),
    }

    out.push_str(&format!(
        ",dst_reg={},src_reg={},off={}",
        reg(insn.dst_reg)?,
        reg(insn.src_reg)?,
        insn.off
    ));
    Ok(())
}

fn describe_alu(out: &mut String, insn: &Instruction) -> Result<(), DisasmError> {
    let alu = AluOp::from_code(insn.code).ok_or(DisasmError::UnsupportedAluOp(op(insn.code)))?;
    out.push_str(&format!(",op={},dst_reg={}", alu.mnemonic(), reg(insn.dst_reg)?));
    if alu != AluOp::Neg {
        out.push(',');
        describe_source(out, insn)?;
    }
    Ok(())
}

fn describe_jmp(out: &mut String, insn: &Instruction) -> Result<(), DisasmError> {
    let jmp = JmpOp::from_code(insn.code).ok_or(DisasmError::UnsupportedJmpOp(op(insn.code)))?;
    out.push_str(&format!(",op={},off={}", jmp.mnemonic(), insn.off));
    if jmp != JmpOp::Ja {
        out.push_str(&format!(",dst_reg={},", reg(insn.dst_reg)?));
        describe_source(out, insn)?;
    }
    Ok(())
}

/// Describe the slot at `pc`
pub fn describe(program: &[Instruction], pc: usize) -> Result<String, DisasmError> {
    let insn = program.get(pc).ok_or(DisasmError::OutOfRange(pc))?;
    let class = insn.class();

    let mut out = format!("class={}", class.name());
    match class {
        Class::Ld | Class::Ldx | Class::St | Class::Stx => describe_memory(&mut out, program, pc)?,
        Class::Alu | Class::Alu64 => describe_alu(&mut out, insn)?,
        Class::Jmp | Class::Jmp32 => describe_jmp(&mut out, insn)?,
    }
    Ok(out)
}

/// One slot of a listing
#[derive(Debug, Clone)]
pub struct ListingLine {
    pub pc: usize,
    pub bytes: [u8; INSN_SIZE],
    pub text: Result<String, DisasmError>,
}

/// Result of disassembling a whole program
#[derive(Debug, Clone)]
pub struct Listing {
    pub lines: Vec<ListingLine>,
    show_offsets: bool,
    show_bytes: bool,
}

impl Listing {
    pub fn error_count(&self) -> usize {
        self.lines.iter().filter(|l| l.text.is_err()).count()
    }

    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }

    pub fn errors(&self) -> impl Iterator<Item = (usize, &DisasmError)> {
        self.lines
            .iter()
            .filter_map(|l| l.text.as_ref().err().map(|e| (l.pc, e)))
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            if self.show_offsets {
                write!(f, "{:04}:  ", line.pc)?;
            }
            if self.show_bytes {
                for b in &line.bytes {
                    write!(f, "{:02x} ", b)?;
                }
                write!(f, " ")?;
            }
            match &line.text {
                Ok(text) => writeln!(f, "{}", text)?,
                Err(e) => writeln!(f, "error: {}", e)?,
            }
        }
        Ok(())
    }
}

/// Disassembler for bpfvm
pub struct Disassembler {
    show_bytes: bool,
    show_offsets: bool,
}

impl Disassembler {
    pub fn new() -> Self {
        Self {
            show_bytes: false,
            show_offsets: false,
        }
    }

    pub fn with_bytes(mut self, show: bool) -> Self {
        self.show_bytes = show;
        self
    }

    pub fn with_offsets(mut self, show: bool) -> Self {
        self.show_offsets = show;
        self
    }

    /// Disassemble every slot, placeholder slots included
    pub fn disassemble(&self, program: &Program) -> Listing {
        let lines = program
            .instructions
            .iter()
            .enumerate()
            .map(|(pc, insn)| ListingLine {
                pc,
                bytes: insn.encode(),
                text: describe(&program.instructions, pc),
            })
            .collect();

        Listing {
            lines,
            show_offsets: self.show_offsets,
            show_bytes: self.show_bytes,
        }
    }

    /// Disassemble a raw record stream
    pub fn disassemble_bytes(&self, bytes: &[u8]) -> Result<Listing, CodecError> {
        Ok(self.disassemble(&Program::from_bytes(bytes)?))
    }
}

impl Default for Disassembler {
    fn default() -> Self {
        Self::new()
    }
}
