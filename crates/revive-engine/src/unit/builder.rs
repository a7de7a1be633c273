//! Programmatic construction of compiled units
//!
//! `CodeBuilder` assembles an instruction stream with symbolic labels;
//! `UnitBuilder` assembles the surrounding type definition.

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::format::{CompiledUnit, FieldDef, MethodDef};
use super::opcode::{FieldRef, Instr, MethodRef};
use super::types::{Annotation, MethodSig, Modifiers, TypeSig, CONSTRUCTOR, STATIC_INIT};

/// Errors raised while finishing a builder
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A jump refers to a label that was never marked
    #[error("Label {0} is used but never marked")]
    UnmarkedLabel(usize),

    /// A label was marked twice
    #[error("Label {0} marked more than once")]
    DuplicateLabel(usize),
}

/// A jump target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    /// Label ID within its builder
    pub id: usize,
}

#[derive(Debug)]
struct UnresolvedJump {
    index: usize,
    target: Label,
}

/// Instruction stream builder with label resolution
#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<Instr>,
    next_label_id: usize,
    label_positions: FxHashMap<usize, u32>,
    unresolved_jumps: Vec<UnresolvedJump>,
    duplicate_label: Option<usize>,
}

impl CodeBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next instruction will occupy
    pub fn current_index(&self) -> u32 {
        self.code.len() as u32
    }

    /// Emit any instruction
    pub fn emit(&mut self, instr: Instr) -> &mut Self {
        self.code.push(instr);
        self
    }

    /// Define a new, unmarked label
    pub fn define_label(&mut self) -> Label {
        let label = Label {
            id: self.next_label_id,
        };
        self.next_label_id += 1;
        label
    }

    /// Mark the next instruction index with `label`
    pub fn mark_label(&mut self, label: Label) -> &mut Self {
        let index = self.current_index();
        if self.label_positions.insert(label.id, index).is_some() {
            self.duplicate_label.get_or_insert(label.id);
        }
        self
    }

    fn emit_jump_to(&mut self, instr: Instr, target: Label) -> &mut Self {
        self.unresolved_jumps.push(UnresolvedJump {
            index: self.code.len(),
            target,
        });
        self.emit(instr)
    }

    /// Unconditional jump
    pub fn jump(&mut self, target: Label) -> &mut Self {
        self.emit_jump_to(Instr::Jump(0), target)
    }

    /// Pop a boolean; jump when true
    pub fn jump_if_true(&mut self, target: Label) -> &mut Self {
        self.emit_jump_to(Instr::JumpIfTrue(0), target)
    }

    /// Pop a boolean; jump when false
    pub fn jump_if_false(&mut self, target: Label) -> &mut Self {
        self.emit_jump_to(Instr::JumpIfFalse(0), target)
    }

    /// Load a local
    pub fn load(&mut self, local: u16) -> &mut Self {
        self.emit(Instr::Load(local))
    }

    /// Store a local
    pub fn store(&mut self, local: u16) -> &mut Self {
        self.emit(Instr::Store(local))
    }

    /// Push an integer
    pub fn push_int(&mut self, value: i64) -> &mut Self {
        self.emit(Instr::ConstInt(value))
    }

    /// Push a string
    pub fn push_str(&mut self, value: impl Into<String>) -> &mut Self {
        self.emit(Instr::ConstStr(value.into()))
    }

    /// Instance field read
    pub fn get_field(&mut self, owner: &str, name: &str, sig: TypeSig) -> &mut Self {
        self.emit(Instr::GetField(FieldRef::new(owner, name, sig)))
    }

    /// Instance field write
    pub fn put_field(&mut self, owner: &str, name: &str, sig: TypeSig) -> &mut Self {
        self.emit(Instr::PutField(FieldRef::new(owner, name, sig)))
    }

    /// Static field read
    pub fn get_static(&mut self, owner: &str, name: &str, sig: TypeSig) -> &mut Self {
        self.emit(Instr::GetStatic(FieldRef::new(owner, name, sig)))
    }

    /// Static field write
    pub fn put_static(&mut self, owner: &str, name: &str, sig: TypeSig) -> &mut Self {
        self.emit(Instr::PutStatic(FieldRef::new(owner, name, sig)))
    }

    /// Virtual call
    pub fn invoke_virtual(&mut self, owner: &str, name: &str, sig: MethodSig) -> &mut Self {
        self.emit(Instr::InvokeVirtual(MethodRef::new(owner, name, sig)))
    }

    /// Static call
    pub fn invoke_static(&mut self, owner: &str, name: &str, sig: MethodSig) -> &mut Self {
        self.emit(Instr::InvokeStatic(MethodRef::new(owner, name, sig)))
    }

    /// Non-virtual call
    pub fn invoke_special(&mut self, owner: &str, name: &str, sig: MethodSig) -> &mut Self {
        self.emit(Instr::InvokeSpecial(MethodRef::new(owner, name, sig)))
    }

    /// Call the supertype's no-argument constructor on local 0
    pub fn init_super(&mut self, super_name: &str) -> &mut Self {
        self.load(0)
            .invoke_special(super_name, CONSTRUCTOR, MethodSig::void())
    }

    /// Return without value
    pub fn ret(&mut self) -> &mut Self {
        self.emit(Instr::Return)
    }

    /// Return top of stack
    pub fn ret_value(&mut self) -> &mut Self {
        self.emit(Instr::ReturnValue)
    }

    /// Resolve every label and take the instruction stream
    pub fn build(mut self) -> Result<Vec<Instr>, BuildError> {
        if let Some(id) = self.duplicate_label {
            return Err(BuildError::DuplicateLabel(id));
        }
        for jump in &self.unresolved_jumps {
            let target = *self
                .label_positions
                .get(&jump.target.id)
                .ok_or(BuildError::UnmarkedLabel(jump.target.id))?;
            self.code[jump.index].retarget(target);
        }
        Ok(self.code)
    }
}

/// Compiled unit builder
#[derive(Debug)]
pub struct UnitBuilder {
    unit: CompiledUnit,
}

impl UnitBuilder {
    /// Start a public class named `name`
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            unit: CompiledUnit::new(name),
        }
    }

    /// Start a public interface named `name`
    pub fn interface(name: impl Into<String>) -> Self {
        let mut unit = CompiledUnit::new(name);
        unit.modifiers = Modifiers::PUBLIC | Modifiers::INTERFACE | Modifiers::ABSTRACT;
        Self { unit }
    }

    /// Start a public fixed-instance-set type named `name`
    pub fn enumeration(name: impl Into<String>) -> Self {
        let mut unit = CompiledUnit::new(name);
        unit.modifiers = Modifiers::PUBLIC | Modifiers::FINAL | Modifiers::ENUM;
        Self { unit }
    }

    /// Set the supertype
    pub fn extends(mut self, super_name: impl Into<String>) -> Self {
        self.unit.super_name = Some(super_name.into());
        self
    }

    /// Add an implemented interface
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.unit.interfaces.push(interface.into());
        self
    }

    /// Replace the type modifiers
    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.unit.modifiers = modifiers;
        self
    }

    /// Add a type annotation
    pub fn annotated(mut self, annotation: Annotation) -> Self {
        self.unit.annotations.push(annotation);
        self
    }

    /// Set the source file
    pub fn source_file(mut self, path: impl Into<String>) -> Self {
        self.unit.source_file = Some(path.into());
        self
    }

    /// Add a field
    pub fn field(mut self, field: FieldDef) -> Self {
        self.unit.fields.push(field);
        self
    }

    /// Add a method or constructor
    pub fn method(mut self, method: MethodDef) -> Self {
        self.unit.methods.push(method);
        self
    }

    /// Add a public constructor with the given body
    pub fn constructor(self, sig: MethodSig, code: Vec<Instr>) -> Self {
        self.method(MethodDef::new(CONSTRUCTOR, sig, Modifiers::PUBLIC).with_code(code))
    }

    /// Add a public no-argument constructor that only initializes the supertype
    pub fn default_constructor(self) -> Self {
        let mut code = Vec::new();
        if let Some(super_name) = &self.unit.super_name {
            code.push(Instr::Load(0));
            code.push(Instr::InvokeSpecial(MethodRef::new(
                super_name.clone(),
                CONSTRUCTOR,
                MethodSig::void(),
            )));
        }
        code.push(Instr::Return);
        self.constructor(MethodSig::void(), code)
    }

    /// Add the static initializer
    pub fn static_init(self, code: Vec<Instr>) -> Self {
        self.method(MethodDef::new(STATIC_INIT, MethodSig::void(), Modifiers::STATIC).with_code(code))
    }

    /// Finish the unit
    pub fn build(self) -> CompiledUnit {
        self.unit
    }

    /// Finish and encode the unit
    pub fn encode(self) -> Vec<u8> {
        self.unit.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::verify::verify_unit;

    #[test]
    fn test_labels_resolve() {
        let mut code = CodeBuilder::new();
        let done = code.define_label();
        code.load(1).jump_if_false(done).push_int(1).ret_value();
        code.mark_label(done).push_int(0).ret_value();
        let instrs = code.build().unwrap();
        assert_eq!(instrs[1], Instr::JumpIfFalse(4));
    }

    #[test]
    fn test_unmarked_label() {
        let mut code = CodeBuilder::new();
        let nowhere = code.define_label();
        code.jump(nowhere);
        assert_eq!(code.build(), Err(BuildError::UnmarkedLabel(0)));
    }

    #[test]
    fn test_unit_builder_produces_verifiable_unit() {
        let unit = UnitBuilder::class("app.Child")
            .extends("app.Parent")
            .field(FieldDef::new("n", TypeSig::Int))
            .default_constructor()
            .build();
        assert!(verify_unit(&unit).is_ok());
        assert_eq!(unit.constructors().count(), 1);
    }
}
