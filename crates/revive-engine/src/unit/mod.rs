//! Compiled unit format: encoding, instruction set, verification, builders

pub mod builder;
pub mod encoder;
pub mod format;
pub mod opcode;
pub mod types;
pub mod verify;

pub use builder::{BuildError, CodeBuilder, Label, UnitBuilder};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use format::{flags, unit_digest, CompiledUnit, FieldDef, MethodDef, UnitError, MAGIC, VERSION};
pub use opcode::{FieldAccess, FieldRef, Instr, InvokeKind, MethodRef, Opcode};
pub use types::{
    package_of, Annotation, MemberKey, MethodSig, Modifiers, TypeSig, Visibility,
    CONSTRUCTOR, STATIC_INIT,
};
pub use verify::{super_init_index, verify_unit, VerifyError};
