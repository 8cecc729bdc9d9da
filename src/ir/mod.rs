//! IR (Intermediate Representation) module
//!
//! Defines the 8-byte eBPF-style instruction format, the tagged decode shared
//! by the validator and the interpreter, instruction builders and the
//! disassembler.

pub mod builder;
pub mod decode;
pub mod disasm;
pub mod format;

pub use decode::{DecodeError, Insn, Operand, Ordering, Reg, Width};
pub use disasm::{describe, DisasmError, Disassembler, Listing, ListingLine};
pub use format::*;
