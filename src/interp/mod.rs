//! Interpreter module
//!
//! Bounded execution of validated programs against caller-mapped guest memory.

pub mod dispatch;
pub mod memory;

pub use dispatch::{Fault, FaultKind, Interpreter, Outcome, Registers};
pub use memory::{AccessViolation, Memory, MemoryError, Region, MAX_REGION_SIZE};
