//! bpfvm - eBPF-style bytecode validator and interpreter
//!
//! Main CLI entry point for validating, disassembling and running programs.

use anyhow::{bail, Context, Result};
use bpfvm::config::VmConfig;
use bpfvm::interp::{FaultKind, Interpreter, Outcome};
use bpfvm::ir::{builder, AluOp, Disassembler, JmpOp, Program, Size};
use bpfvm::JsetPolicy;
use clap::{ArgAction, Parser, Subcommand};
use env_logger::Builder;
use log::{info, LevelFilter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "bpfvm")]
#[command(version)]
#[command(about = "Validator and bounded interpreter for eBPF-style bytecode", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a program between raw (.bpf) and JSON (.json) form
    Convert {
        /// Input file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file; the format follows its extension
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Replay the built-in sample programs
    Demo,

    /// Disassemble a program
    Disasm {
        /// Input file (.bpf or .json)
        #[arg(short, long)]
        input: PathBuf,

        /// Show slot indices
        #[arg(long)]
        offsets: bool,

        /// Show raw instruction bytes
        #[arg(long)]
        bytes: bool,
    },

    /// Validate and run a program
    Run {
        /// Input file (.bpf or .json)
        #[arg(short, long)]
        input: PathBuf,

        /// Configuration file (default: search for bpfvm.toml upward from the current directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Instruction budget, overriding the configuration
        #[arg(long)]
        budget: Option<u64>,

        /// Map a zeroed guest region, as BASE:SIZE (hex with 0x, or decimal)
        #[arg(long = "map", value_name = "BASE:SIZE")]
        maps: Vec<String>,

        /// jset handling (fault, bit-test, no-branch), overriding the configuration
        #[arg(long)]
        jset: Option<JsetPolicy>,

        /// Show execution statistics
        #[arg(short, long)]
        stats: bool,

        /// Dump guest memory regions after the run
        #[arg(long)]
        dump: bool,
    },

    /// Validate a program
    Validate {
        /// Input file (.bpf or .json)
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Convert { input, output } => cmd_convert(&input, &output),
        Commands::Demo => cmd_demo(),
        Commands::Disasm {
            input,
            offsets,
            bytes,
        } => cmd_disasm(&input, offsets, bytes),
        Commands::Run {
            input,
            config,
            budget,
            maps,
            jset,
            stats,
            dump,
        } => cmd_run(&input, config.as_deref(), budget, &maps, jset, stats, dump),
        Commands::Validate { input } => cmd_validate(&input),
    }
}

/// `-v` flags pick the level; without them `RUST_LOG` applies, defaulting to warnings
fn init_logging(verbose: u8) {
    let mut builder = Builder::from_default_env();
    match verbose {
        0 => {
            if std::env::var_os("RUST_LOG").is_none() {
                builder.filter_level(LevelFilter::Warn);
            }
        }
        1 => {
            builder.filter_level(LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(LevelFilter::Trace);
        }
    }
    builder.format_timestamp(None).init();
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

fn load_program(path: &Path) -> Result<Program> {
    let program = if is_json(path) {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Program::from_json(&text).context("Invalid JSON program")?
    } else {
        let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Program::from_bytes(&data).context("Invalid binary format")?
    };
    info!("loaded {} slots from {}", program.len(), path.display());
    Ok(program)
}

fn save_program(program: &Program, path: &Path) -> Result<()> {
    if is_json(path) {
        fs::write(path, program.to_json()?).context("Failed to write output")?;
    } else {
        fs::write(path, program.to_bytes()).context("Failed to write output")?;
    }
    Ok(())
}

/// Parse `BASE:SIZE`, each part decimal or `0x` hex
fn parse_map(arg: &str) -> Result<(u64, usize)> {
    fn number(s: &str) -> Result<u64> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse(),
        };
        parsed.with_context(|| format!("Invalid number '{}'", s))
    }

    let (base, size) = arg
        .split_once(':')
        .with_context(|| format!("Invalid map '{}', expected BASE:SIZE", arg))?;
    let size = number(size)?;
    let size = usize::try_from(size)
        .with_context(|| format!("Region size {} does not fit in memory", size))?;
    Ok((number(base)?, size))
}

fn cmd_validate(input: &Path) -> Result<()> {
    let mut program = load_program(input)?;
    let report = bpfvm::validate(&mut program).context("Program rejected")?;
    println!(
        "valid ({} slots, {} normalized)",
        report.slots,
        report.normalized.len()
    );
    Ok(())
}

fn cmd_disasm(input: &Path, offsets: bool, bytes: bool) -> Result<()> {
    let disasm = Disassembler::new().with_offsets(offsets).with_bytes(bytes);
    let listing = if is_json(input) {
        disasm.disassemble(&load_program(input)?)
    } else {
        let data =
            fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
        disasm
            .disassemble_bytes(&data)
            .context("Invalid binary format")?
    };
    print!("{}", listing);

    if !listing.is_clean() {
        bail!("{} of {} lines failed", listing.error_count(), listing.lines.len());
    }
    Ok(())
}

fn cmd_run(
    input: &Path,
    config_path: Option<&Path>,
    budget: Option<u64>,
    maps: &[String],
    jset: Option<JsetPolicy>,
    show_stats: bool,
    dump: bool,
) -> Result<()> {
    let mut program = load_program(input)?;

    let mut config = match config_path {
        Some(path) => VmConfig::load(path).context("Failed to load configuration")?,
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            VmConfig::find_and_load(&cwd).context("Failed to load configuration")?
        }
    };
    if let Some(budget) = budget {
        config.interpreter.instruction_budget = budget;
    }
    if let Some(jset) = jset {
        config.interpreter.jset = jset;
    }

    let mut interp = config.build_interpreter()?;
    for map in maps {
        let (base, size) = parse_map(map)?;
        interp
            .memory_mut()
            .map_zeroed(base, size)
            .with_context(|| format!("Failed to map {}", map))?;
    }

    let report = bpfvm::validate(&mut program).context("Program rejected")?;
    info!(
        "validated {} slots, {} normalized",
        report.slots,
        report.normalized.len()
    );

    let start = Instant::now();
    let outcome = interp.run(&program);
    let elapsed = start.elapsed();

    if show_stats {
        println!("Statistics:");
        println!("  Instructions: {}", interp.dispatched());
        println!("  Budget: {}", interp.budget());
        println!("  Time: {:?}", elapsed);
    }

    if dump {
        for region in interp.memory().regions() {
            println!("{:#x}:", region.base());
            for (i, chunk) in region.bytes().chunks(16).enumerate() {
                let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
                println!("  {:#06x}  {}", i * 16, hex.join(" "));
            }
        }
    }

    match outcome {
        Outcome::Halted { registers } => {
            println!("Program halted");
            for (i, value) in registers.iter().enumerate() {
                println!("r{} = {}", i, value);
            }
            Ok(())
        }
        Outcome::Faulted(fault) => bail!("Execution faulted: {}", fault),
    }
}

fn cmd_convert(input: &Path, output: &Path) -> Result<()> {
    let program = load_program(input)?;
    save_program(&program, output)?;
    println!(
        "Wrote {} instructions to {}",
        program.len(),
        output.display()
    );
    Ok(())
}

const DEMO_ST_BASE: u64 = 0x1000;
const DEMO_STX_BASE: u64 = 0x2000;

/// Wide immediate arithmetic, a taken jlt and two 32-bit stores
fn demo_store_program() -> Program {
    let mut program = Program::new();
    program.push(builder::ld_imm32(0, 123));
    program.extend(builder::ld_imm64(1, 4566666666999));
    program.push(builder::alu64_reg(AluOp::Add, 0, 1));
    program.push(builder::jmp_reg(JmpOp::Jlt, 1, 0, 1));
    program.push(builder::ld_imm32(9, 666));
    program.push(builder::ld_imm32(10, 777));
    program.extend(builder::ld_imm64(2, DEMO_ST_BASE));
    program.push(builder::store_imm(Size::W, 2, 0, 444));
    program.extend(builder::ld_imm64(3, DEMO_STX_BASE));
    program.push(builder::store_reg(Size::W, 3, 10, 0));
    program
}

/// Counts in r0 until the budget runs out
fn demo_loop_program() -> Program {
    Program::from_instructions(vec![
        builder::alu32_imm(AluOp::Add, 0, 1),
        builder::ja(-2),
    ])
}

fn cmd_demo() -> Result<()> {
    let disasm = Disassembler::new();

    println!("== store/load ==");
    let mut program = demo_store_program();
    bpfvm::validate(&mut program).context("Error validating bytecode")?;
    print!("{}", disasm.disassemble(&program));

    let mut interp = Interpreter::new();
    interp.memory_mut().map_zeroed(DEMO_ST_BASE, 4)?;
    interp.memory_mut().map_zeroed(DEMO_STX_BASE, 4)?;
    let registers = interp
        .run(&program)
        .into_result()
        .context("Error interpreting bytecode")?;

    let test_st = interp.memory().load(DEMO_ST_BASE, Size::W);
    let test_stx = interp.memory().load(DEMO_STX_BASE, Size::W);
    println!("r0 = {}", registers[0]);
    println!("test_st: {}", test_st.map(|v| v as i32).unwrap_or_default());
    println!("test_stx: {}", test_stx.map(|v| v as i32).unwrap_or_default());
    if test_st != Ok(444) || test_stx != Ok(777) {
        bail!("Unexpected store results");
    }

    println!("== loop ==");
    let mut program = demo_loop_program();
    bpfvm::validate(&mut program).context("Error validating bytecode")?;
    print!("{}", disasm.disassemble(&program));

    match bpfvm::interpret(&program) {
        Outcome::Faulted(fault) if fault.kind == FaultKind::BudgetExceeded => {
            println!("expected fault: {}", fault);
            Ok(())
        }
        other => bail!("Expected budget fault, got {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_map() {
        assert_eq!(parse_map("0x1000:16").unwrap(), (0x1000, 16));
        assert_eq!(parse_map("4096:0X10").unwrap(), (4096, 16));
        assert!(parse_map("0x1000").is_err());
        assert!(parse_map("0x1000:lots").is_err());
    }

    #[cfg(target_pointer_width = "32")]
    #[test]
    fn test_parse_map_size_exceeds_usize() {
        let err = parse_map("0:0x100000000").unwrap_err();
        assert!(err.to_string().contains("does not fit in memory"));
    }
}
