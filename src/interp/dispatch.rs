//! Interpreter for validated programs
//!
//! Fetch/decode/execute loop over a program, with a fixed instruction budget
//! as the only termination guarantee. Every run starts from a zeroed register
//! file at pc 0 and ends either halted (pc reached the end of the program) or
//! faulted.

use super::memory::Memory;
use crate::config::{JsetPolicy, DEFAULT_INSTRUCTION_BUDGET};
use crate::ir::{
    AluOp, DecodeError, Insn, JmpOp, Operand, Program, Reg, Width, REGISTER_COUNT,
};
use log::{debug, warn};
use std::fmt;
use thiserror::Error;

/// Register file snapshot
pub type Registers = [i64; REGISTER_COUNT];

/// Shift amounts at or above this value fault, for both widths
const SHIFT_LIMIT: i64 = 32;

/// Execution fault kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum FaultKind {
    #[error("division by zero")]
    DivideByZero,
    #[error("modulus is zero or negative")]
    InvalidModulus,
    #[error("shift amount out of range")]
    InvalidShiftAmount,
    #[error("program counter out of range")]
    PcOverflow,
    #[error("instruction budget exceeded")]
    BudgetExceeded,
    #[error("unsupported opcode")]
    UnsupportedOpcode,
    #[error("memory access out of bounds")]
    OutOfBounds,
    #[error("invalid register")]
    InvalidRegister,
}

/// A fault and the pc of the instruction that raised it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind} at pc {pc}")]
pub struct Fault {
    pub kind: FaultKind,
    pub pc: usize,
}

/// Result of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// pc reached the end of the program
    Halted { registers: Registers },
    /// Terminal fault; registers are not meaningful
    Faulted(Fault),
}

impl Outcome {
    pub fn into_result(self) -> Result<Registers, Fault> {
        match self {
            Outcome::Halted { registers } => Ok(registers),
            Outcome::Faulted(fault) => Err(fault),
        }
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, Outcome::Halted { .. })
    }

    pub fn fault(&self) -> Option<Fault> {
        match self {
            Outcome::Halted { .. } => None,
            Outcome::Faulted(fault) => Some(*fault),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Halted { registers } => write!(f, "halted, r0 = {}", registers[0]),
            Outcome::Faulted(fault) => write!(f, "faulted: {}", fault),
        }
    }
}

/// How the pc moves after an instruction
enum ControlFlow {
    /// Advance by this many slots
    Next(usize),
    /// Taken jump: pc += 1 + off
    Jump(i16),
}

/// Interpreter state
#[derive(Debug, Clone)]
pub struct Interpreter {
    /// Register file
    registers: Registers,
    /// Guest memory, owned by the caller across runs
    memory: Memory,
    /// Program counter
    pc: usize,
    /// Instructions dispatched in the current run
    dispatched: u64,
    /// Maximum instructions per run
    budget: u64,
    jset: JsetPolicy,
}

impl Interpreter {
    /// Create an interpreter with no memory and the default budget
    pub fn new() -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            memory: Memory::new(),
            pc: 0,
            dispatched: 0,
            budget: DEFAULT_INSTRUCTION_BUDGET,
            jset: JsetPolicy::default(),
        }
    }

    /// Set maximum instructions to execute per run
    pub fn with_budget(mut self, budget: u64) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_jset(mut self, policy: JsetPolicy) -> Self {
        self.jset = policy;
        self
    }

    pub fn with_memory(mut self, memory: Memory) -> Self {
        self.memory = memory;
        self
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Registers as left by the last run
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// Instructions dispatched by the last run
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    fn reset(&mut self) {
        self.registers = [0; REGISTER_COUNT];
        self.pc = 0;
        self.dispatched = 0;
    }

    fn fault(&self, kind: FaultKind) -> Outcome {
        warn!(
            "fault: {} at pc {} after {} instructions",
            kind, self.pc, self.dispatched
        );
        Outcome::Faulted(Fault { kind, pc: self.pc })
    }

    /// Execute a program from pc 0 with zeroed registers
    pub fn run(&mut self, program: &Program) -> Outcome {
        self.reset();
        let insns = &program.instructions;

        loop {
            if self.pc == insns.len() {
                debug!(
                    "halted after {} instructions, registers: {:?}",
                    self.dispatched, self.registers
                );
                return Outcome::Halted {
                    registers: self.registers,
                };
            }

            if self.pc > insns.len() {
                return self.fault(FaultKind::PcOverflow);
            }

            if self.dispatched >= self.budget {
                return self.fault(FaultKind::BudgetExceeded);
            }

            let insn = match Insn::decode(insns, self.pc) {
                Ok(insn) => insn,
                Err(e) => {
                    debug!("decode failed at pc {}: {}", self.pc, e);
                    return self.fault(match e {
                        DecodeError::RegisterOutOfRange { .. } => FaultKind::InvalidRegister,
                        DecodeError::Truncated => FaultKind::PcOverflow,
                        DecodeError::Unsupported { .. } | DecodeError::MalformedWideImmediate => {
                            FaultKind::UnsupportedOpcode
                        }
                    });
                }
            };

            #[cfg(feature = "trace")]
            log::trace!("{:4}: {:?}", self.pc, insn);

            match self.execute(&insn) {
                Ok(ControlFlow::Next(slots)) => {
                    self.dispatched += 1;
                    self.pc += slots;
                }
                Ok(ControlFlow::Jump(off)) => {
                    let target = self.pc as i64 + 1 + off as i64;
                    if target < 0 {
                        return self.fault(FaultKind::PcOverflow);
                    }
                    self.dispatched += 1;
                    self.pc = target as usize;
                }
                Err(kind) => return self.fault(kind),
            }
        }
    }

    #[inline]
    fn get_reg(&self, reg: Reg) -> i64 {
        self.registers[reg.index()]
    }

    #[inline]
    fn set_reg(&mut self, reg: Reg, value: i64) {
        self.registers[reg.index()] = value;
    }

    #[inline]
    fn operand(&self, src: Operand) -> i64 {
        match src {
            Operand::Imm(imm) => imm as i64,
            Operand::Reg(reg) => self.get_reg(reg),
        }
    }

    /// Execute a single instruction
    fn execute(&mut self, insn: &Insn) -> Result<ControlFlow, FaultKind> {
        match *insn {
            Insn::LoadImm { dst, imm } => self.set_reg(dst, imm as i64),

            Insn::LoadImm64 { dst, value } => {
                self.set_reg(dst, value as i64);
                return Ok(ControlFlow::Next(2));
            }

            // Acquire/release ordering is executed as a plain access
            Insn::Load {
                size, dst, src, off, ..
            } => {
                let addr = (self.get_reg(src) as u64).wrapping_add(off as i64 as u64);
                let value = self.memory.load(addr, size).map_err(|v| {
                    debug!("load of {} bytes at {:#x} out of bounds", v.len, v.addr);
                    FaultKind::OutOfBounds
                })?;
                self.set_reg(dst, value as i64);
            }

            Insn::Store {
                size, dst, src, off, ..
            } => {
                let addr = (self.get_reg(dst) as u64).wrapping_add(off as i64 as u64);
                let value = self.operand(src) as u64;
                self.memory.store(addr, value, size).map_err(|v| {
                    debug!("store of {} bytes at {:#x} out of bounds", v.len, v.addr);
                    FaultKind::OutOfBounds
                })?;
            }

            Insn::Alu {
                width,
                op,
                dst,
                src,
            } => {
                let result = alu_op(op, self.get_reg(dst), self.operand(src))?;
                self.set_reg(dst, truncate(width, result));
            }

            Insn::Neg { width, dst } => {
                let result = alu_op(AluOp::Neg, self.get_reg(dst), 0)?;
                self.set_reg(dst, truncate(width, result));
            }

            Insn::Ja { off, .. } => return Ok(ControlFlow::Jump(off)),

            Insn::Jump {
                width,
                op,
                dst,
                src,
                off,
            } => {
                if self.condition(width, op, self.get_reg(dst), self.operand(src))? {
                    return Ok(ControlFlow::Jump(off));
                }
            }
        }

        Ok(ControlFlow::Next(1))
    }

    /// Evaluate a conditional jump
    fn condition(&self, width: Width, op: JmpOp, dst: i64, src: i64) -> Result<bool, FaultKind> {
        let (ua, ub, sa, sb) = match width {
            Width::W64 => (dst as u64, src as u64, dst, src),
            Width::W32 => (
                dst as u32 as u64,
                src as u32 as u64,
                dst as i32 as i64,
                src as i32 as i64,
            ),
        };

        let taken = match op {
            JmpOp::Ja => true,
            JmpOp::Jeq => ua == ub,
            JmpOp::Jne => ua != ub,
            JmpOp::Jgt => ua > ub,
            JmpOp::Jge => ua >= ub,
            JmpOp::Jlt => ua < ub,
            JmpOp::Jle => ua <= ub,
            JmpOp::Jsgt => sa > sb,
            JmpOp::Jsge => sa >= sb,
            JmpOp::Jslt => sa < sb,
            JmpOp::Jsle => sa <= sb,
            JmpOp::Jset => match self.jset {
                JsetPolicy::Fault => return Err(FaultKind::UnsupportedOpcode),
                JsetPolicy::BitTest => ua & ub != 0,
                JsetPolicy::NoBranch => false,
            },
        };
        Ok(taken)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute an ALU operation on the full 64-bit values
fn alu_op(op: AluOp, dst: i64, src: i64) -> Result<i64, FaultKind> {
    if op.is_shift() && !(0..SHIFT_LIMIT).contains(&src) {
        return Err(FaultKind::InvalidShiftAmount);
    }

    let result = match op {
        AluOp::Add => dst.wrapping_add(src),
        AluOp::Sub => dst.wrapping_sub(src),
        AluOp::Mul => dst.wrapping_mul(src),
        AluOp::Div => {
            if src == 0 {
                return Err(FaultKind::DivideByZero);
            }
            dst.wrapping_div(src)
        }
        AluOp::Mod => {
            if src <= 0 {
                return Err(FaultKind::InvalidModulus);
            }
            dst.wrapping_rem(src)
        }
        AluOp::Or => dst | src,
        AluOp::And => dst & src,
        AluOp::Xor => dst ^ src,
        AluOp::Lsh => ((dst as u64) << src) as i64,
        AluOp::Rsh => ((dst as u64) >> src) as i64,
        AluOp::Arsh => dst >> src,
        AluOp::Neg => dst.wrapping_neg(),
        AluOp::Mov => src,
    };
    Ok(result)
}

/// ALU (32-bit) results keep only the low 32 bits, zero-extended
#[inline]
fn truncate(width: Width, value: i64) -> i64 {
    match width {
        Width::W64 => value,
        Width::W32 => value as u32 as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{builder, Instruction, Size};

    fn run(insns: Vec<Instruction>) -> Outcome {
        Interpreter::new().run(&Program::from_instructions(insns))
    }

    #[test]
    fn test_empty_program_halts() {
        let outcome = run(vec![]);
        assert_eq!(
            outcome,
            Outcome::Halted {
                registers: [0; REGISTER_COUNT]
            }
        );
    }

    #[test]
    fn test_simple_program() {
        let outcome = run(vec![builder::mov64_imm(0, 42)]);
        assert_eq!(outcome.into_result().unwrap()[0], 42);
    }

    #[test]
    fn test_alu_op_table() {
        assert_eq!(alu_op(AluOp::Sub, 5, 7), Ok(-2));
        assert_eq!(alu_op(AluOp::Div, -7, 2), Ok(-3));
        assert_eq!(alu_op(AluOp::Div, i64::MIN, -1), Ok(i64::MIN));
        assert_eq!(alu_op(AluOp::Mod, -7, 3), Ok(-1));
        assert_eq!(alu_op(AluOp::Rsh, -1, 60), Err(FaultKind::InvalidShiftAmount));
        assert_eq!(alu_op(AluOp::Rsh, -1, 31), Ok(0x1_ffff_ffff));
        assert_eq!(alu_op(AluOp::Arsh, -64, 3), Ok(-8));
        assert_eq!(alu_op(AluOp::Neg, 5, 0), Ok(-5));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate(Width::W32, -1), 0xffff_ffff);
        assert_eq!(truncate(Width::W64, -1), -1);
    }

    #[test]
    fn test_fibonacci() {
        // r1 = fib(10)
        let insns = vec![
            builder::mov64_imm(0, 10),
            builder::mov64_imm(1, 0),
            builder::mov64_imm(2, 1),
            // loop:
            builder::mov64_reg(3, 1),
            builder::alu64_reg(AluOp::Add, 3, 2),
            builder::mov64_reg(1, 2),
            builder::mov64_reg(2, 3),
            builder::alu64_imm(AluOp::Sub, 0, 1),
            builder::jmp_imm(JmpOp::Jne, 0, 0, -6),
        ];

        let regs = run(insns).into_result().unwrap();
        assert_eq!(regs[1], 55);
    }

    #[test]
    fn test_registers_reset_between_runs() {
        let prog = Program::from_instructions(vec![builder::alu64_imm(AluOp::Add, 0, 1)]);
        let mut interp = Interpreter::new();
        interp.run(&prog);
        let regs = interp.run(&prog).into_result().unwrap();
        assert_eq!(regs[0], 1);
        assert_eq!(interp.dispatched(), 1);
    }

    #[test]
    fn test_memory_persists_between_runs() {
        let mut memory = Memory::new();
        memory.map_zeroed(0x1000, 8).unwrap();

        let mut prog = Program::new();
        prog.extend(builder::ld_imm64(1, 0x1000));
        prog.push(builder::load(Size::W, 0, 1, 0));
        prog.push(builder::alu64_imm(AluOp::Add, 0, 1));
        prog.push(builder::store_reg(Size::W, 1, 0, 0));

        let mut interp = Interpreter::new().with_memory(memory);
        interp.run(&prog);
        let regs = interp.run(&prog).into_result().unwrap();
        assert_eq!(regs[0], 2);
        assert_eq!(interp.memory().load(0x1000, Size::W), Ok(2));
    }

    #[test]
    fn test_fault_pc_is_faulting_instruction() {
        let outcome = run(vec![
            builder::mov64_imm(0, 1),
            builder::alu64_imm(AluOp::Div, 0, 0),
        ]);
        assert_eq!(
            outcome,
            Outcome::Faulted(Fault {
                kind: FaultKind::DivideByZero,
                pc: 1
            })
        );
    }
}
