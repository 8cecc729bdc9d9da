//! Validator integration tests
//!
//! Acceptance, rejection and self-jump rewriting, through both the
//! [`Validator`] and the crate-level helpers.

use bpfvm::interp::FaultKind;
use bpfvm::ir::{builder, AluOp, Disassembler, Instruction, JmpOp, Program, Size};
use bpfvm::{ValidationError, Validator};

fn validate(insns: &mut [Instruction]) -> Result<bpfvm::ValidationReport, ValidationError> {
    Validator::new().validate(insns)
}

fn wide(dst: u8, value: u64) -> Vec<Instruction> {
    builder::ld_imm64(dst, value).to_vec()
}

// ============================================================================
// Register bounds
// ============================================================================

#[test]
fn test_dst_out_of_range() {
    for reg in 11..16u8 {
        let mut prog = vec![builder::mov64_imm(reg, 0)];
        assert_eq!(
            validate(&mut prog),
            Err(ValidationError::RegisterOutOfRange { pc: 0, reg })
        );
    }
}

#[test]
fn test_src_out_of_range() {
    let mut prog = vec![builder::alu64_reg(AluOp::Add, 0, 11)];
    assert_eq!(
        validate(&mut prog),
        Err(ValidationError::RegisterOutOfRange { pc: 0, reg: 11 })
    );

    let mut prog = vec![builder::jmp32_reg(JmpOp::Jgt, 1, 14, 0)];
    assert_eq!(
        validate(&mut prog),
        Err(ValidationError::RegisterOutOfRange { pc: 0, reg: 14 })
    );
}

#[test]
fn test_r10_is_addressable() {
    let mut prog = vec![
        builder::mov64_imm(10, 1),
        builder::store_reg(Size::Dw, 10, 10, -8),
        builder::load(Size::Dw, 10, 10, -8),
    ];
    assert!(validate(&mut prog).is_ok());
}

#[test]
fn test_memory_src_always_checked() {
    // a store-immediate never reads src, but the field still has to be a register
    let mut store = builder::store_imm(Size::W, 1, 0, 5);
    store.src_reg = 12;
    assert_eq!(
        validate(&mut [store]),
        Err(ValidationError::RegisterOutOfRange { pc: 0, reg: 12 })
    );
}

#[test]
fn test_immediate_alu_ignores_src() {
    let mut insn = builder::alu64_imm(AluOp::Add, 0, 1);
    insn.src_reg = 15;
    assert!(validate(&mut [insn]).is_ok());
}

#[test]
fn test_ja_checks_dst() {
    let mut insn = builder::ja(0);
    insn.dst_reg = 11;
    assert_eq!(
        validate(&mut [insn]),
        Err(ValidationError::RegisterOutOfRange { pc: 0, reg: 11 })
    );
}

// ============================================================================
// Wide immediates
// ============================================================================

#[test]
fn test_wide_immediate_accepted() {
    let mut prog = wide(3, 0x1234_5678_9abc_def0);
    prog.push(builder::mov64_reg(0, 3));
    let report = validate(&mut prog).unwrap();
    assert_eq!(report.slots, 3);
    assert_eq!(report.instructions, 2);
}

#[test]
fn test_trailing_wide_immediate() {
    let mut prog = vec![builder::mov64_imm(0, 1), wide(1, 5)[0]];
    assert_eq!(
        validate(&mut prog),
        Err(ValidationError::MalformedWideImmediatePair { pc: 1 })
    );
}

#[test]
fn test_bad_placeholder_fields() {
    let tamper: [fn(&mut Instruction); 4] = [
        |p| p.dst_reg = 1,
        |p| p.src_reg = 1,
        |p| p.off = 1,
        |p| p.code = 0x18,
    ];
    for f in tamper {
        let mut prog = wide(1, 5);
        f(&mut prog[1]);
        assert_eq!(
            validate(&mut prog),
            Err(ValidationError::MalformedWideImmediatePair { pc: 0 })
        );
    }
}

#[test]
fn test_placeholder_imm_is_free() {
    // the high word lives in the placeholder's imm
    let mut prog = wide(1, u64::MAX);
    assert_eq!(prog[1].imm, -1);
    assert!(validate(&mut prog).is_ok());
}

#[test]
fn test_pair_checked_before_registers() {
    let mut prog = vec![wide(11, 5)[0], builder::mov64_imm(0, 0)];
    assert_eq!(
        validate(&mut prog),
        Err(ValidationError::MalformedWideImmediatePair { pc: 0 })
    );

    let mut prog = wide(11, 5);
    assert_eq!(
        validate(&mut prog),
        Err(ValidationError::RegisterOutOfRange { pc: 0, reg: 11 })
    );
}

#[test]
fn test_placeholder_not_revalidated_as_instruction() {
    // skipping the second slot means a placeholder never counts on its own
    let mut prog = wide(2, 9);
    prog.extend(wide(3, 10));
    let report = validate(&mut prog).unwrap();
    assert_eq!(report.instructions, 2);
}

// ============================================================================
// Unsupported opcodes
// ============================================================================

#[test]
fn test_unsupported_opcodes() {
    let cases = [
        0x85u8, // call
        0x95,   // exit
        0xe5,   // JMP op 0xe0
        0x20,   // LD | W | ABS
        0x40,   // LD | W | IND
        0x81,   // LDX | W | LEN
        0x8f,   // ALU64 | X | NEG
        0x0d,   // JMP | X | JA
        0xd4,   // ALU op 0xd0
        0xc1,   // LDX | W | mode 0xc0
        0xc0,   // LD | W | mode 0xc0
        0x08,   // LD | H | IMM
    ];
    for code in cases {
        let mut prog = vec![Instruction::new(code, 0, 0, 0, 0)];
        assert_eq!(
            validate(&mut prog),
            Err(ValidationError::UnsupportedInstruction { pc: 0, code }),
            "code {:#04x}",
            code
        );
    }
}

#[test]
fn test_fail_fast_at_first_error() {
    let mut prog = vec![
        builder::mov64_imm(0, 1),
        Instruction::new(0x95, 0, 0, 0, 0),
        builder::mov64_imm(12, 1),
    ];
    let err = validate(&mut prog).unwrap_err();
    assert_eq!(err, ValidationError::UnsupportedInstruction { pc: 1, code: 0x95 });
    assert_eq!(err.pc(), 1);
    assert!(err.to_string().contains("0x95"));
}

// ============================================================================
// Self-jump normalization
// ============================================================================

#[test]
fn test_self_jump_rewritten() {
    let mut prog = vec![
        builder::ja(-1),
        builder::jmp_imm(JmpOp::Jne, 0, 0, -1),
        builder::jmp32_reg(JmpOp::Jsgt, 1, 2, -1),
        builder::jmp_imm(JmpOp::Jeq, 0, 0, -3),
    ];
    let report = validate(&mut prog).unwrap();
    assert_eq!(report.normalized, vec![0, 1, 2]);
    assert_eq!(prog[0].off, -2);
    assert_eq!(prog[1].off, -2);
    assert_eq!(prog[2].off, -2);
    assert_eq!(prog[3].off, -3);
}

#[test]
fn test_validation_is_idempotent() {
    let mut prog = vec![builder::mov64_imm(0, 0), builder::ja(-1)];
    validate(&mut prog).unwrap();
    let report = validate(&mut prog).unwrap();
    assert!(report.normalized.is_empty());
    assert_eq!(prog[1].off, -2);
}

#[test]
fn test_rewrites_before_rejection_persist() {
    let mut prog = vec![builder::ja(-1), Instruction::new(0x85, 0, 0, 0, 0)];
    assert!(validate(&mut prog).is_err());
    assert_eq!(prog[0].off, -2);
}

#[test]
fn test_normalized_jump_at_start_overflows() {
    // the rewritten jump lands one slot back, which is before slot 0 here
    let mut prog = Program::from_instructions(vec![builder::ja(-1)]);
    assert!(bpfvm::is_valid(&mut prog));
    let fault = bpfvm::interpret(&prog).fault().unwrap();
    assert_eq!(fault.kind, FaultKind::PcOverflow);
    assert_eq!(fault.pc, 0);
}

// ============================================================================
// Whole programs
// ============================================================================

#[test]
fn test_counting_loop_validates_and_disassembles() {
    let mut prog = Program::from_instructions(vec![
        builder::alu32_imm(AluOp::Add, 0, 1),
        builder::ja(-2),
    ]);
    let report = bpfvm::validate(&mut prog).unwrap();
    assert!(report.normalized.is_empty());

    let listing = Disassembler::new().disassemble(&prog);
    assert!(listing.is_clean());
    assert_eq!(
        listing.to_string(),
        "class=ALU,op=add,dst_reg=0,imm=1\nclass=JMP,op=ja,off=-2\n"
    );
}

#[test]
fn test_jump_targets_not_checked_statically() {
    let mut prog = Program::from_instructions(vec![builder::ja(100)]);
    assert!(bpfvm::is_valid(&mut prog));
    let fault = bpfvm::interpret(&prog).fault().unwrap();
    assert_eq!(fault.kind, FaultKind::PcOverflow);
}

#[test]
fn test_is_valid() {
    let mut good = Program::from_instructions(vec![builder::mov64_imm(0, 1)]);
    let mut bad = Program::from_instructions(vec![builder::mov64_imm(11, 1)]);
    assert!(bpfvm::is_valid(&mut good));
    assert!(!bpfvm::is_valid(&mut bad));
    assert!(bpfvm::is_valid(&mut Program::new()));
}
