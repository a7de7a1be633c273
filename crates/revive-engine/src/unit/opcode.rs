//! Instruction set for compiled units
//!
//! Instructions are stored decoded (`Instr`) and serialized as a single opcode
//! byte followed by operands. Jump operands are instruction indexes, not byte
//! offsets, so rewriting passes remap them through an index table.
//!
//! Opcodes are grouped by range:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Locals
//! - 0x20-0x2F: Arithmetic & strings
//! - 0x30-0x3F: Comparison & logic
//! - 0x40-0x4F: Control flow
//! - 0x50-0x5F: Objects & arrays
//! - 0x60-0x6F: Invocation
//! - 0x70-0x7F: Field access
//! - 0xE0-0xEF: Live-update checks and indirection (engine-generated only)

use std::fmt;

use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use super::types::{MemberKey, MethodSig, TypeSig};

/// Symbolic reference to a field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Type named at the access site
    pub owner: String,
    /// Field name
    pub name: String,
    /// Field type expected by the access site
    pub sig: TypeSig,
}

impl FieldRef {
    /// Create a field reference
    pub fn new(owner: impl Into<String>, name: impl Into<String>, sig: TypeSig) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            sig,
        }
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.owner);
        writer.emit_string(&self.name);
        writer.emit_string(&self.sig.to_string());
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let owner = reader.read_string()?;
        let name = reader.read_string()?;
        let sig = TypeSig::parse(&reader.read_string()?)?;
        Ok(Self { owner, name, sig })
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.sig)
    }
}

/// Symbolic reference to a method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Type named at the call site
    pub owner: String,
    /// Method name
    pub name: String,
    /// Method signature expected by the call site
    pub sig: MethodSig,
}

impl MethodRef {
    /// Create a method reference
    pub fn new(owner: impl Into<String>, name: impl Into<String>, sig: MethodSig) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            sig,
        }
    }

    /// Name+signature identity of the referenced member
    pub fn key(&self) -> MemberKey {
        MemberKey::new(self.name.clone(), self.sig.clone())
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.owner);
        writer.emit_string(&self.name);
        writer.emit_string(&self.sig.to_string());
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let owner = reader.read_string()?;
        let name = reader.read_string()?;
        let sig = MethodSig::parse(&reader.read_string()?)?;
        Ok(Self { owner, name, sig })
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.sig)
    }
}

/// Invocation kind, shared by call-site checks and dynamic dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    /// Virtual dispatch on the receiver
    Virtual,
    /// Virtual dispatch through an interface
    Interface,
    /// No receiver
    Static,
    /// Non-virtual call (constructors, private methods, super calls)
    Special,
}

/// Field access kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldAccess {
    /// Instance read
    Get,
    /// Instance write
    Put,
    /// Static read
    GetStatic,
    /// Static write
    PutStatic,
}

impl FieldAccess {
    /// Whether the access targets a static field
    pub fn is_static(self) -> bool {
        matches!(self, FieldAccess::GetStatic | FieldAccess::PutStatic)
    }

    /// Whether the access writes
    pub fn is_write(self) -> bool {
        matches!(self, FieldAccess::Put | FieldAccess::PutStatic)
    }
}

/// Opcode bytes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value
    Pop = 0x01,
    /// Duplicate top value
    Dup = 0x02,
    /// Swap top two values
    Swap = 0x03,
    /// Push null
    ConstNull = 0x04,
    /// Push true
    ConstTrue = 0x05,
    /// Push false
    ConstFalse = 0x06,
    /// Push i64 (operand: i64)
    ConstInt = 0x07,
    /// Push f64 (operand: f64)
    ConstFloat = 0x08,
    /// Push string (operand: string)
    ConstStr = 0x09,

    // ===== Locals (0x10-0x1F) =====
    /// Load local (operand: u16)
    Load = 0x10,
    /// Store local (operand: u16)
    Store = 0x11,

    // ===== Arithmetic & Strings (0x20-0x2F) =====
    /// Add
    Add = 0x20,
    /// Subtract
    Sub = 0x21,
    /// Multiply
    Mul = 0x22,
    /// Divide
    Div = 0x23,
    /// Remainder
    Rem = 0x24,
    /// Negate
    Neg = 0x25,
    /// Concatenate the display forms of two values
    Concat = 0x26,

    // ===== Comparison & Logic (0x30-0x3F) =====
    /// Equal
    Eq = 0x30,
    /// Not equal
    Ne = 0x31,
    /// Less than
    Lt = 0x32,
    /// Less or equal
    Le = 0x33,
    /// Greater than
    Gt = 0x34,
    /// Greater or equal
    Ge = 0x35,
    /// Boolean not
    Not = 0x36,

    // ===== Control Flow (0x40-0x4F) =====
    /// Unconditional jump (operand: u32 instruction index)
    Jump = 0x40,
    /// Jump when true
    JumpIfTrue = 0x41,
    /// Jump when false
    JumpIfFalse = 0x42,
    /// Return without value
    Return = 0x43,
    /// Return top of stack
    ReturnValue = 0x44,

    // ===== Objects & Arrays (0x50-0x5F) =====
    /// Allocate instance (operand: type name)
    New = 0x50,
    /// Allocate array (operand: element signature)
    NewArray = 0x51,
    /// Array element load
    ArrayLoad = 0x52,
    /// Array element store
    ArrayStore = 0x53,
    /// Array length
    ArrayLength = 0x54,
    /// Type test (operand: type name)
    InstanceOf = 0x55,
    /// Checked cast (operand: type name)
    CheckCast = 0x56,

    // ===== Invocation (0x60-0x6F) =====
    /// Virtual invocation
    InvokeVirtual = 0x60,
    /// Interface invocation
    InvokeInterface = 0x61,
    /// Static invocation
    InvokeStatic = 0x62,
    /// Special (non-virtual) invocation
    InvokeSpecial = 0x63,

    // ===== Field Access (0x70-0x7F) =====
    /// Instance field read
    GetField = 0x70,
    /// Instance field write
    PutField = 0x71,
    /// Static field read
    GetStatic = 0x72,
    /// Static field write
    PutStatic = 0x73,

    // ===== Live-update (0xE0-0xEF) =====
    /// Method prologue redirecting to the live executor
    MethodEntryCheck = 0xE0,
    /// Guard preceding an invocation of a possibly-managed owner
    InvokeCheck = 0xE1,
    /// Guard preceding a field access on a possibly-managed owner
    FieldCheck = 0xE2,
    /// Privileged instance field read through the field store layer
    DynGetField = 0xE3,
    /// Privileged instance field write through the field store layer
    DynPutField = 0xE4,
    /// Privileged static field read through the field store layer
    DynGetStatic = 0xE5,
    /// Privileged static field write through the field store layer
    DynPutStatic = 0xE6,
    /// Privileged non-virtual call of a managed type's live member
    DynInvokeSpecial = 0xE7,
    /// Inherited-implementation call starting above a managed type
    DynInvokeSuper = 0xE8,
    /// Supertype construction against the live super chain
    DynInitSuper = 0xE9,
}

impl Opcode {
    /// Decode an opcode byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        use Opcode::*;
        Some(match byte {
            0x00 => Nop,
            0x01 => Pop,
            0x02 => Dup,
            0x03 => Swap,
            0x04 => ConstNull,
            0x05 => ConstTrue,
            0x06 => ConstFalse,
            0x07 => ConstInt,
            0x08 => ConstFloat,
            0x09 => ConstStr,
            0x10 => Load,
            0x11 => Store,
            0x20 => Add,
            0x21 => Sub,
            0x22 => Mul,
            0x23 => Div,
            0x24 => Rem,
            0x25 => Neg,
            0x26 => Concat,
            0x30 => Eq,
            0x31 => Ne,
            0x32 => Lt,
            0x33 => Le,
            0x34 => Gt,
            0x35 => Ge,
            0x36 => Not,
            0x40 => Jump,
            0x41 => JumpIfTrue,
            0x42 => JumpIfFalse,
            0x43 => Return,
            0x44 => ReturnValue,
            0x50 => New,
            0x51 => NewArray,
            0x52 => ArrayLoad,
            0x53 => ArrayStore,
            0x54 => ArrayLength,
            0x55 => InstanceOf,
            0x56 => CheckCast,
            0x60 => InvokeVirtual,
            0x61 => InvokeInterface,
            0x62 => InvokeStatic,
            0x63 => InvokeSpecial,
            0x70 => GetField,
            0x71 => PutField,
            0x72 => GetStatic,
            0x73 => PutStatic,
            0xE0 => MethodEntryCheck,
            0xE1 => InvokeCheck,
            0xE2 => FieldCheck,
            0xE3 => DynGetField,
            0xE4 => DynPutField,
            0xE5 => DynGetStatic,
            0xE6 => DynPutStatic,
            0xE7 => DynInvokeSpecial,
            0xE8 => DynInvokeSuper,
            0xE9 => DynInitSuper,
            _ => return None,
        })
    }

    /// Convert to byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// A decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// No operation
    Nop,
    /// Pop top value
    Pop,
    /// Duplicate top value
    Dup,
    /// Swap top two values
    Swap,
    /// Push null
    ConstNull,
    /// Push a boolean
    ConstBool(bool),
    /// Push an integer
    ConstInt(i64),
    /// Push a float
    ConstFloat(f64),
    /// Push a string
    ConstStr(String),
    /// Load local slot
    Load(u16),
    /// Store into local slot
    Store(u16),
    /// Add
    Add,
    /// Subtract
    Sub,
    /// Multiply
    Mul,
    /// Divide
    Div,
    /// Remainder
    Rem,
    /// Negate
    Neg,
    /// String concatenation
    Concat,
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less or equal
    Le,
    /// Greater than
    Gt,
    /// Greater or equal
    Ge,
    /// Boolean not
    Not,
    /// Jump to instruction index
    Jump(u32),
    /// Pop; jump when true
    JumpIfTrue(u32),
    /// Pop; jump when false
    JumpIfFalse(u32),
    /// Return without value
    Return,
    /// Return top of stack
    ReturnValue,
    /// Allocate an instance of the named type
    New(String),
    /// Pop length; allocate array
    NewArray(TypeSig),
    /// Pop index, array; push element
    ArrayLoad,
    /// Pop value, index, array; store element
    ArrayStore,
    /// Pop array; push length
    ArrayLength,
    /// Pop value; push whether it is an instance of the named type
    InstanceOf(String),
    /// Check the top value is an instance of the named type
    CheckCast(String),
    /// Virtual invocation
    InvokeVirtual(MethodRef),
    /// Interface invocation
    InvokeInterface(MethodRef),
    /// Static invocation
    InvokeStatic(MethodRef),
    /// Special invocation
    InvokeSpecial(MethodRef),
    /// Instance field read
    GetField(FieldRef),
    /// Instance field write
    PutField(FieldRef),
    /// Static field read
    GetStatic(FieldRef),
    /// Static field write
    PutStatic(FieldRef),
    /// Method prologue: redirect to the live executor of `slot` when one exists
    MethodEntryCheck {
        /// Managed type ID
        type_id: u32,
        /// Dispatch slot
        slot: u32,
    },
    /// Guard for the following invocation instruction
    InvokeCheck {
        /// Type ID of the call site's owner
        type_id: u32,
    },
    /// Guard for the following field access instruction
    FieldCheck {
        /// Type ID of the access site's owner
        type_id: u32,
    },
    /// Privileged instance field read on behalf of a managed type
    DynGetField {
        /// Managed type the code runs on behalf of
        type_id: u32,
        /// Field accessed
        field: FieldRef,
    },
    /// Privileged instance field write on behalf of a managed type
    DynPutField {
        /// Managed type the code runs on behalf of
        type_id: u32,
        /// Field accessed
        field: FieldRef,
    },
    /// Privileged static field read on behalf of a managed type
    DynGetStatic {
        /// Managed type the code runs on behalf of
        type_id: u32,
        /// Field accessed
        field: FieldRef,
    },
    /// Privileged static field write on behalf of a managed type
    DynPutStatic {
        /// Managed type the code runs on behalf of
        type_id: u32,
        /// Field accessed
        field: FieldRef,
    },
    /// Privileged non-virtual call of the live member of a managed type
    DynInvokeSpecial {
        /// Managed type the code runs on behalf of
        type_id: u32,
        /// Method called
        method: MethodRef,
    },
    /// Call of the inherited implementation above a managed type
    DynInvokeSuper {
        /// Managed type whose supertype chain is searched
        type_id: u32,
        /// Method called
        method: MethodRef,
    },
    /// Supertype construction resolved against the live super chain
    DynInitSuper {
        /// Managed type being constructed
        type_id: u32,
        /// Constructor called
        method: MethodRef,
    },
}

impl Instr {
    /// Opcode of this instruction
    pub fn opcode(&self) -> Opcode {
        match self {
            Instr::Nop => Opcode::Nop,
            Instr::Pop => Opcode::Pop,
            Instr::Dup => Opcode::Dup,
            Instr::Swap => Opcode::Swap,
            Instr::ConstNull => Opcode::ConstNull,
            Instr::ConstBool(true) => Opcode::ConstTrue,
            Instr::ConstBool(false) => Opcode::ConstFalse,
            Instr::ConstInt(_) => Opcode::ConstInt,
            Instr::ConstFloat(_) => Opcode::ConstFloat,
            Instr::ConstStr(_) => Opcode::ConstStr,
            Instr::Load(_) => Opcode::Load,
            Instr::Store(_) => Opcode::Store,
            Instr::Add => Opcode::Add,
            Instr::Sub => Opcode::Sub,
            Instr::Mul => Opcode::Mul,
            Instr::Div => Opcode::Div,
            Instr::Rem => Opcode::Rem,
            Instr::Neg => Opcode::Neg,
            Instr::Concat => Opcode::Concat,
            Instr::Eq => Opcode::Eq,
            Instr::Ne => Opcode::Ne,
            Instr::Lt => Opcode::Lt,
            Instr::Le => Opcode::Le,
            Instr::Gt => Opcode::Gt,
            Instr::Ge => Opcode::Ge,
            Instr::Not => Opcode::Not,
            Instr::Jump(_) => Opcode::Jump,
            Instr::JumpIfTrue(_) => Opcode::JumpIfTrue,
            Instr::JumpIfFalse(_) => Opcode::JumpIfFalse,
            Instr::Return => Opcode::Return,
            Instr::ReturnValue => Opcode::ReturnValue,
            Instr::New(_) => Opcode::New,
            Instr::NewArray(_) => Opcode::NewArray,
            Instr::ArrayLoad => Opcode::ArrayLoad,
            Instr::ArrayStore => Opcode::ArrayStore,
            Instr::ArrayLength => Opcode::ArrayLength,
            Instr::InstanceOf(_) => Opcode::InstanceOf,
            Instr::CheckCast(_) => Opcode::CheckCast,
            Instr::InvokeVirtual(_) => Opcode::InvokeVirtual,
            Instr::InvokeInterface(_) => Opcode::InvokeInterface,
            Instr::InvokeStatic(_) => Opcode::InvokeStatic,
            Instr::InvokeSpecial(_) => Opcode::InvokeSpecial,
            Instr::GetField(_) => Opcode::GetField,
            Instr::PutField(_) => Opcode::PutField,
            Instr::GetStatic(_) => Opcode::GetStatic,
            Instr::PutStatic(_) => Opcode::PutStatic,
            Instr::MethodEntryCheck { .. } => Opcode::MethodEntryCheck,
            Instr::InvokeCheck { .. } => Opcode::InvokeCheck,
            Instr::FieldCheck { .. } => Opcode::FieldCheck,
            Instr::DynGetField { .. } => Opcode::DynGetField,
            Instr::DynPutField { .. } => Opcode::DynPutField,
            Instr::DynGetStatic { .. } => Opcode::DynGetStatic,
            Instr::DynPutStatic { .. } => Opcode::DynPutStatic,
            Instr::DynInvokeSpecial { .. } => Opcode::DynInvokeSpecial,
            Instr::DynInvokeSuper { .. } => Opcode::DynInvokeSuper,
            Instr::DynInitSuper { .. } => Opcode::DynInitSuper,
        }
    }

    /// Whether control never falls through to the next instruction
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instr::Return | Instr::ReturnValue | Instr::Jump(_))
    }

    /// Jump target, if this is a jump
    pub fn jump_target(&self) -> Option<u32> {
        match self {
            Instr::Jump(t) | Instr::JumpIfTrue(t) | Instr::JumpIfFalse(t) => Some(*t),
            _ => None,
        }
    }

    /// Replace the jump target (no-op for non-jumps)
    pub fn retarget(&mut self, target: u32) {
        match self {
            Instr::Jump(t) | Instr::JumpIfTrue(t) | Instr::JumpIfFalse(t) => *t = target,
            _ => {}
        }
    }

    /// Invocation kind and reference, for the four invoke instructions
    pub fn as_invoke(&self) -> Option<(InvokeKind, &MethodRef)> {
        match self {
            Instr::InvokeVirtual(m) => Some((InvokeKind::Virtual, m)),
            Instr::InvokeInterface(m) => Some((InvokeKind::Interface, m)),
            Instr::InvokeStatic(m) => Some((InvokeKind::Static, m)),
            Instr::InvokeSpecial(m) => Some((InvokeKind::Special, m)),
            _ => None,
        }
    }

    /// Access kind and reference, for the four field instructions
    pub fn as_field_access(&self) -> Option<(FieldAccess, &FieldRef)> {
        match self {
            Instr::GetField(f) => Some((FieldAccess::Get, f)),
            Instr::PutField(f) => Some((FieldAccess::Put, f)),
            Instr::GetStatic(f) => Some((FieldAccess::GetStatic, f)),
            Instr::PutStatic(f) => Some((FieldAccess::PutStatic, f)),
            _ => None,
        }
    }

    /// Whether this instruction only exists in engine-generated code
    pub fn is_engine_only(&self) -> bool {
        self.opcode().to_u8() >= 0xE0
    }

    /// Encode to binary
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u8(self.opcode().to_u8());
        match self {
            Instr::ConstInt(v) => writer.emit_i64(*v),
            Instr::ConstFloat(v) => writer.emit_f64(*v),
            Instr::ConstStr(s) | Instr::New(s) | Instr::InstanceOf(s) | Instr::CheckCast(s) => {
                writer.emit_string(s)
            }
            Instr::Load(i) | Instr::Store(i) => writer.emit_u16(*i),
            Instr::Jump(t) | Instr::JumpIfTrue(t) | Instr::JumpIfFalse(t) => writer.emit_u32(*t),
            Instr::NewArray(sig) => writer.emit_string(&sig.to_string()),
            Instr::InvokeVirtual(m)
            | Instr::InvokeInterface(m)
            | Instr::InvokeStatic(m)
            | Instr::InvokeSpecial(m) => m.encode(writer),
            Instr::GetField(f) | Instr::PutField(f) | Instr::GetStatic(f) | Instr::PutStatic(f) => {
                f.encode(writer)
            }
            Instr::MethodEntryCheck { type_id, slot } => {
                writer.emit_u32(*type_id);
                writer.emit_u32(*slot);
            }
            Instr::InvokeCheck { type_id } | Instr::FieldCheck { type_id } => {
                writer.emit_u32(*type_id)
            }
            Instr::DynGetField { type_id, field }
            | Instr::DynPutField { type_id, field }
            | Instr::DynGetStatic { type_id, field }
            | Instr::DynPutStatic { type_id, field } => {
                writer.emit_u32(*type_id);
                field.encode(writer);
            }
            Instr::DynInvokeSpecial { type_id, method }
            | Instr::DynInvokeSuper { type_id, method }
            | Instr::DynInitSuper { type_id, method } => {
                writer.emit_u32(*type_id);
                method.encode(writer);
            }
            _ => {}
        }
    }

    /// Decode one instruction
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset))?;
        Ok(match opcode {
            Opcode::Nop => Instr::Nop,
            Opcode::Pop => Instr::Pop,
            Opcode::Dup => Instr::Dup,
            Opcode::Swap => Instr::Swap,
            Opcode::ConstNull => Instr::ConstNull,
            Opcode::ConstTrue => Instr::ConstBool(true),
            Opcode::ConstFalse => Instr::ConstBool(false),
            Opcode::ConstInt => Instr::ConstInt(reader.read_i64()?),
            Opcode::ConstFloat => Instr::ConstFloat(reader.read_f64()?),
            Opcode::ConstStr => Instr::ConstStr(reader.read_string()?),
            Opcode::Load => Instr::Load(reader.read_u16()?),
            Opcode::Store => Instr::Store(reader.read_u16()?),
            Opcode::Add => Instr::Add,
            Opcode::Sub => Instr::Sub,
            Opcode::Mul => Instr::Mul,
            Opcode::Div => Instr::Div,
            Opcode::Rem => Instr::Rem,
            Opcode::Neg => Instr::Neg,
            Opcode::Concat => Instr::Concat,
            Opcode::Eq => Instr::Eq,
            Opcode::Ne => Instr::Ne,
            Opcode::Lt => Instr::Lt,
            Opcode::Le => Instr::Le,
            Opcode::Gt => Instr::Gt,
            Opcode::Ge => Instr::Ge,
            Opcode::Not => Instr::Not,
            Opcode::Jump => Instr::Jump(reader.read_u32()?),
            Opcode::JumpIfTrue => Instr::JumpIfTrue(reader.read_u32()?),
            Opcode::JumpIfFalse => Instr::JumpIfFalse(reader.read_u32()?),
            Opcode::Return => Instr::Return,
            Opcode::ReturnValue => Instr::ReturnValue,
            Opcode::New => Instr::New(reader.read_string()?),
            Opcode::NewArray => Instr::NewArray(TypeSig::parse(&reader.read_string()?)?),
            Opcode::ArrayLoad => Instr::ArrayLoad,
            Opcode::ArrayStore => Instr::ArrayStore,
            Opcode::ArrayLength => Instr::ArrayLength,
            Opcode::InstanceOf => Instr::InstanceOf(reader.read_string()?),
            Opcode::CheckCast => Instr::CheckCast(reader.read_string()?),
            Opcode::InvokeVirtual => Instr::InvokeVirtual(MethodRef::decode(reader)?),
            Opcode::InvokeInterface => Instr::InvokeInterface(MethodRef::decode(reader)?),
            Opcode::InvokeStatic => Instr::InvokeStatic(MethodRef::decode(reader)?),
            Opcode::InvokeSpecial => Instr::InvokeSpecial(MethodRef::decode(reader)?),
            Opcode::GetField => Instr::GetField(FieldRef::decode(reader)?),
            Opcode::PutField => Instr::PutField(FieldRef::decode(reader)?),
            Opcode::GetStatic => Instr::GetStatic(FieldRef::decode(reader)?),
            Opcode::PutStatic => Instr::PutStatic(FieldRef::decode(reader)?),
            Opcode::MethodEntryCheck => Instr::MethodEntryCheck {
                type_id: reader.read_u32()?,
                slot: reader.read_u32()?,
            },
            Opcode::InvokeCheck => Instr::InvokeCheck {
                type_id: reader.read_u32()?,
            },
            Opcode::FieldCheck => Instr::FieldCheck {
                type_id: reader.read_u32()?,
            },
            Opcode::DynGetField => Instr::DynGetField {
                type_id: reader.read_u32()?,
                field: FieldRef::decode(reader)?,
            },
            Opcode::DynPutField => Instr::DynPutField {
                type_id: reader.read_u32()?,
                field: FieldRef::decode(reader)?,
            },
            Opcode::DynGetStatic => Instr::DynGetStatic {
                type_id: reader.read_u32()?,
                field: FieldRef::decode(reader)?,
            },
            Opcode::DynPutStatic => Instr::DynPutStatic {
                type_id: reader.read_u32()?,
                field: FieldRef::decode(reader)?,
            },
            Opcode::DynInvokeSpecial => Instr::DynInvokeSpecial {
                type_id: reader.read_u32()?,
                method: MethodRef::decode(reader)?,
            },
            Opcode::DynInvokeSuper => Instr::DynInvokeSuper {
                type_id: reader.read_u32()?,
                method: MethodRef::decode(reader)?,
            },
            Opcode::DynInitSuper => Instr::DynInitSuper {
                type_id: reader.read_u32()?,
                method: MethodRef::decode(reader)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_mapping() {
        for byte in 0u8..=0xFF {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op.to_u8(), byte);
            }
        }
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_member_instruction_encoding() {
        let instr = Instr::InvokeVirtual(MethodRef::new(
            "app.Greeter",
            "greet",
            MethodSig::parse("(str)->str").unwrap(),
        ));
        let mut writer = BytecodeWriter::new();
        instr.encode(&mut writer);
        let bytes = writer.into_bytes();
        assert_eq!(bytes[0], Opcode::InvokeVirtual.to_u8());
        let decoded = Instr::decode(&mut BytecodeReader::new(&bytes)).unwrap();
        assert_eq!(decoded, instr);
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let err = Instr::decode(&mut BytecodeReader::new(&[0xFE])).unwrap_err();
        assert_eq!(err, DecodeError::InvalidOpcode(0xFE, 0));
    }

    #[test]
    fn test_retarget() {
        let mut jump = Instr::JumpIfFalse(3);
        jump.retarget(9);
        assert_eq!(jump.jump_target(), Some(9));
        let mut add = Instr::Add;
        add.retarget(9);
        assert_eq!(add, Instr::Add);
    }

    #[test]
    fn test_engine_only() {
        assert!(Instr::InvokeCheck { type_id: 1 }.is_engine_only());
        assert!(!Instr::Return.is_engine_only());
    }
}
