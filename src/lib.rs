//! bpfvm - validator and bounded interpreter for eBPF-style bytecode
//!
//! Programs are sequences of 8-byte instructions in the eBPF encoding. A
//! program is first checked by the [`Validator`] and only then executed by
//! the [`Interpreter`], which runs it to completion against an 11-register
//! file and caller-mapped guest memory, or stops it with a [`Fault`].
//!
//! # Features
//!
//! - **Static validation**: supported opcodes, register bounds, wide-immediate pairing
//! - **Bounded execution**: a per-run instruction budget (128 by default) terminates every loop
//! - **Checked memory**: loads and stores only reach regions the caller mapped
//! - **Disassembler**: `key=value` listing of every slot, with per-line errors
//!
//! # Example
//!
//! ```rust
//! use bpfvm::ir::{builder, AluOp, Program};
//!
//! let mut program = Program::new();
//! program.push(builder::mov32_imm(0, 123));
//! program.extend(builder::ld_imm64(1, 4566666666999));
//! program.push(builder::alu64_reg(AluOp::Add, 0, 1));
//!
//! assert!(bpfvm::is_valid(&mut program));
//! let registers = bpfvm::interpret(&program).into_result().unwrap();
//! assert_eq!(registers[0], 4566666667122);
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Program       │  8-byte records, raw or JSON
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Validator     │  reject, or accept and normalize self-jumps
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Interpreter   │  registers, pc, budget, guest memory
//! └────────┬────────┘
//!          │
//!     ┌────┴────┐
//!     ▼         ▼
//! ┌───────┐  ┌───────┐
//! │Halted │  │Faulted│
//! └───────┘  └───────┘
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod interp;
pub mod ir;
pub mod validator;

// Re-export commonly used types
pub use config::{ConfigError, JsetPolicy, VmConfig, DEFAULT_INSTRUCTION_BUDGET};
pub use interp::{Fault, FaultKind, Interpreter, Memory, MemoryError, Outcome, Registers};
pub use ir::{Disassembler, Instruction, Program, REGISTER_COUNT};
pub use validator::{ValidationError, ValidationReport, Validator};

/// Validate a program in place.
///
/// Self-jumps (`off == -1`) are rewritten to `off == -2`.
pub fn validate(program: &mut Program) -> Result<ValidationReport, ValidationError> {
    Validator::new().validate(&mut program.instructions)
}

/// Boolean view of [`validate`]
pub fn is_valid(program: &mut Program) -> bool {
    validate(program).is_ok()
}

/// Execute a program with no guest memory and the default budget.
///
/// The program is not validated first; see [`run`].
pub fn interpret(program: &Program) -> Outcome {
    Interpreter::new().run(program)
}

/// Validate a program, then execute it on `interp`
pub fn run(program: &mut Program, interp: &mut Interpreter) -> Result<Registers, VmError> {
    validate(program)?;
    Ok(interp.run(program).into_result()?)
}

/// Error type for [`run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Program rejected before execution
    Validation(ValidationError),
    /// Program faulted during execution
    Fault(Fault),
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmError::Validation(e) => write!(f, "Validation failed: {}", e),
            VmError::Fault(fault) => write!(f, "Execution faulted: {}", fault),
        }
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VmError::Validation(e) => Some(e),
            VmError::Fault(fault) => Some(fault),
        }
    }
}

impl From<ValidationError> for VmError {
    fn from(e: ValidationError) -> Self {
        VmError::Validation(e)
    }
}

impl From<Fault> for VmError {
    fn from(fault: Fault) -> Self {
        VmError::Fault(fault)
    }
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
