//! Static validation pass
//!
//! One forward pass over a program before it may be executed. The pass stops
//! at the first bad slot; a program is either valid as a whole or rejected.
//!
//! Checks, per instruction:
//!
//! 1. a wide immediate must be followed by an exact placeholder slot
//! 2. the opcode must be in the supported set
//! 3. every register the instruction uses must be below [`REGISTER_COUNT`]
//! 4. a jump with `off == -1` is rewritten to `off == -2`
//!
//! A taken jump lands at `pc + 1 + off`, so after the rewrite in step 4 the
//! jump goes back one slot instead of spinning on itself.
//!
//! [`REGISTER_COUNT`]: crate::ir::REGISTER_COUNT

use crate::ir::{DecodeError, Insn, Instruction};
use log::{debug, warn};
use thiserror::Error;

/// Offset written by a program that means "jump to self"
const SELF_JUMP_OFFSET: i16 = -1;

/// Offset that actually loops on the jump instruction
const NORMALIZED_SELF_JUMP_OFFSET: i16 = -2;

/// Validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unsupported instruction at {pc} (code {code:#04x})")]
    UnsupportedInstruction { pc: usize, code: u8 },

    #[error("malformed wide immediate pair at {pc}")]
    MalformedWideImmediatePair { pc: usize },

    #[error("register r{reg} out of range at {pc}")]
    RegisterOutOfRange { pc: usize, reg: u8 },
}

impl ValidationError {
    /// Slot index of the rejected instruction
    pub fn pc(&self) -> usize {
        match self {
            ValidationError::UnsupportedInstruction { pc, .. }
            | ValidationError::MalformedWideImmediatePair { pc }
            | ValidationError::RegisterOutOfRange { pc, .. } => *pc,
        }
    }
}

/// Summary of a successful validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Number of slots checked (placeholders included)
    pub slots: usize,
    /// Number of instructions checked (a wide immediate pair counts once)
    pub instructions: usize,
    /// Jumps whose offset was rewritten from -1 to -2
    pub normalized: Vec<usize>,
}

/// Program validator
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Validator
    }

    /// Validate `program` in place.
    ///
    /// Self-jump rewrites made before a rejection stay in the buffer. A
    /// rejected program must not be executed.
    pub fn validate(&self, program: &mut [Instruction]) -> Result<ValidationReport, ValidationError> {
        let mut report = ValidationReport::default();
        let mut pc = 0;

        while pc < program.len() {
            let slots = match self.check_insn(program, pc) {
                Ok(slots) => slots,
                Err(e) => {
                    warn!("rejected program: {}", e);
                    return Err(e);
                }
            };

            let insn = &mut program[pc];
            if insn.class().is_jump() && insn.off == SELF_JUMP_OFFSET {
                insn.off = NORMALIZED_SELF_JUMP_OFFSET;
                debug!("normalized self-jump at {}", pc);
                report.normalized.push(pc);
            }

            report.instructions += 1;
            pc += slots;
        }

        report.slots = program.len();
        debug!(
            "validated {} slots ({} normalized)",
            report.slots,
            report.normalized.len()
        );
        Ok(report)
    }

    /// Check one instruction and return the number of slots it occupies
    fn check_insn(&self, program: &[Instruction], pc: usize) -> Result<usize, ValidationError> {
        let insn = &program[pc];

        let wide = insn
            .is_wide_immediate()
            .map_err(|_| ValidationError::UnsupportedInstruction { pc, code: insn.code })?;
        if wide {
            match program.get(pc + 1) {
                Some(next) if next.is_placeholder() => {}
                _ => return Err(ValidationError::MalformedWideImmediatePair { pc }),
            }
        }

        let decoded = Insn::decode(program, pc).map_err(|e| match e {
            DecodeError::Unsupported { code } => ValidationError::UnsupportedInstruction { pc, code },
            DecodeError::RegisterOutOfRange { reg } => ValidationError::RegisterOutOfRange { pc, reg },
            DecodeError::MalformedWideImmediate | DecodeError::Truncated => {
                ValidationError::MalformedWideImmediatePair { pc }
            }
        })?;

        Ok(decoded.slots())
    }
}
