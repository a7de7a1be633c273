//! Opcode handler modules for the interpreter
//!
//! Each module implements a category of opcode handlers as methods on `Interpreter`.

pub mod arithmetic;
pub mod calls;
pub mod comparison;
pub mod control_flow;
pub mod live;
pub mod objects;
pub mod stack;
