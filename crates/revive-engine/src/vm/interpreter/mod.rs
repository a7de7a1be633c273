//! Instruction interpreter
//!
//! Opcode handlers are grouped by category under [`opcodes`], each implemented
//! as methods on [`Interpreter`]. Engine-only instructions live in
//! `opcodes::live` and delegate to the reload runtime.

mod core;
mod execution;
pub mod opcodes;

pub use core::Interpreter;
pub use execution::{ControlFlow, Frame};
