//! Structural verification of compiled units

use rustc_hash::FxHashSet;

use super::format::{flags, CompiledUnit, MethodDef};
use super::opcode::Instr;
use super::types::{TypeSig, CONSTRUCTOR};

/// Unit verification errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// Header or naming problem
    #[error("Unit validation error: {0}")]
    UnitValidation(String),

    /// Two fields share a name
    #[error("Duplicate field '{field}' in {owner}")]
    DuplicateField {
        /// Declaring type
        owner: String,
        /// Field name
        field: String,
    },

    /// Two methods share a name and signature
    #[error("Duplicate method '{method}' in {owner}")]
    DuplicateMethod {
        /// Declaring type
        owner: String,
        /// Method name and signature
        method: String,
    },

    /// Interface declares something only classes may declare
    #[error("Interface {owner} cannot declare {what}")]
    InterfaceMember {
        /// Interface name
        owner: String,
        /// Offending member
        what: String,
    },

    /// Abstract method has code, or concrete method has none
    #[error("Method {method} in {owner}: {reason}")]
    BodyMismatch {
        /// Declaring type
        owner: String,
        /// Method name and signature
        method: String,
        /// What is wrong
        reason: &'static str,
    },

    /// Invalid jump target
    #[error("Invalid jump target {target} at {index} in {method}")]
    InvalidJumpTarget {
        /// Method name and signature
        method: String,
        /// Target instruction index
        target: u32,
        /// Index of the jump
        index: usize,
    },

    /// Invalid local variable reference
    #[error("Invalid local {local} (max {max}) at {index} in {method}")]
    InvalidLocalRef {
        /// Method name and signature
        method: String,
        /// Local index
        local: u16,
        /// Declared local count
        max: u16,
        /// Instruction index
        index: usize,
    },

    /// Declared local count cannot hold the parameters
    #[error("Method {method} declares {max} locals but needs {needed} for parameters")]
    TooFewLocals {
        /// Method name and signature
        method: String,
        /// Declared local count
        max: u16,
        /// Slots needed for receiver and parameters
        needed: usize,
    },

    /// Return kind does not match the signature
    #[error("Return mismatch at {index} in {method}")]
    ReturnMismatch {
        /// Method name and signature
        method: String,
        /// Instruction index
        index: usize,
    },

    /// Execution falls off the end of a method
    #[error("Execution falls off end of {0}")]
    FallOffEnd(String),

    /// Constructor never initializes its supertype
    #[error("Constructor {method} in {owner} never invokes a supertype or sibling constructor")]
    MissingSuperInit {
        /// Declaring type
        owner: String,
        /// Constructor signature
        method: String,
    },

    /// Engine-only instruction in a unit that was not produced by the engine
    #[error("Engine-only instruction {opcode:?} at {index} in {method}")]
    EngineInstruction {
        /// Method name and signature
        method: String,
        /// Opcode found
        opcode: super::opcode::Opcode,
        /// Instruction index
        index: usize,
    },
}

/// Verify a unit's structure and every method body
pub fn verify_unit(unit: &CompiledUnit) -> Result<(), VerifyError> {
    unit.validate().map_err(VerifyError::UnitValidation)?;

    let mut field_names = FxHashSet::default();
    for field in &unit.fields {
        if !field_names.insert(field.name.as_str()) {
            return Err(VerifyError::DuplicateField {
                owner: unit.name.clone(),
                field: field.name.clone(),
            });
        }
        if unit.is_interface() && !field.is_static() {
            return Err(VerifyError::InterfaceMember {
                owner: unit.name.clone(),
                what: format!("instance field '{}'", field.name),
            });
        }
    }

    let mut method_keys = FxHashSet::default();
    for method in &unit.methods {
        let key = method.key();
        if !method_keys.insert(key.clone()) {
            return Err(VerifyError::DuplicateMethod {
                owner: unit.name.clone(),
                method: key.to_string(),
            });
        }
        if unit.is_interface() && method.is_constructor() {
            return Err(VerifyError::InterfaceMember {
                owner: unit.name.clone(),
                what: "a constructor".to_string(),
            });
        }
        verify_method(unit, method)?;
    }

    Ok(())
}

fn verify_method(unit: &CompiledUnit, method: &MethodDef) -> Result<(), VerifyError> {
    let name = method.key().to_string();
    let body_error = |reason| VerifyError::BodyMismatch {
        owner: unit.name.clone(),
        method: name.clone(),
        reason,
    };

    if method.modifiers.is_abstract() {
        if !method.code.is_empty() {
            return Err(body_error("abstract method has code"));
        }
        if !unit.is_interface() && !unit.modifiers.is_abstract() {
            return Err(body_error("abstract method in concrete type"));
        }
        return Ok(());
    }
    if method.code.is_empty() {
        return Err(body_error("concrete method has no code"));
    }

    let needed = method.param_slots();
    if (method.max_locals as usize) < needed {
        return Err(VerifyError::TooFewLocals {
            method: name,
            max: method.max_locals,
            needed,
        });
    }

    let engine_unit = unit.flags & flags::ENGINE_REWRITTEN != 0;
    let returns_value = method.sig.ret != TypeSig::Void;
    let len = method.code.len() as u32;
    let mut initializes_super = false;

    for (index, instr) in method.code.iter().enumerate() {
        if instr.is_engine_only() && !engine_unit {
            return Err(VerifyError::EngineInstruction {
                method: name,
                opcode: instr.opcode(),
                index,
            });
        }
        if let Some(target) = instr.jump_target() {
            if target >= len {
                return Err(VerifyError::InvalidJumpTarget {
                    method: name,
                    target,
                    index,
                });
            }
        }
        match instr {
            Instr::Load(local) | Instr::Store(local) if *local >= method.max_locals => {
                return Err(VerifyError::InvalidLocalRef {
                    method: name,
                    local: *local,
                    max: method.max_locals,
                    index,
                });
            }
            Instr::Return if returns_value => {
                return Err(VerifyError::ReturnMismatch { method: name, index });
            }
            Instr::ReturnValue if !returns_value => {
                return Err(VerifyError::ReturnMismatch { method: name, index });
            }
            Instr::InvokeSpecial(target)
            | Instr::DynInvokeSpecial { method: target, .. }
            | Instr::DynInitSuper { method: target, .. }
                if target.name == CONSTRUCTOR =>
            {
                initializes_super = true;
            }
            _ => {}
        }
    }

    if let Some(last) = method.code.last() {
        if !last.is_terminator() {
            return Err(VerifyError::FallOffEnd(name));
        }
    }

    if method.is_constructor() && unit.super_name.is_some() && !initializes_super {
        return Err(VerifyError::MissingSuperInit {
            owner: unit.name.clone(),
            method: name,
        });
    }

    Ok(())
}

/// Index of the constructor's supertype/sibling constructor call
///
/// Everything before it is the pre-initialization segment: the receiver is not
/// yet a valid object there.
pub fn super_init_index(method: &MethodDef) -> Option<usize> {
    method.code.iter().position(|instr| match instr {
        Instr::InvokeSpecial(target)
        | Instr::DynInvokeSpecial { method: target, .. }
        | Instr::DynInitSuper { method: target, .. } => target.name == CONSTRUCTOR,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::format::FieldDef;
    use crate::unit::opcode::MethodRef;
    use crate::unit::types::{MethodSig, Modifiers};

    fn method(name: &str, sig: &str, code: Vec<Instr>) -> MethodDef {
        let mut def = MethodDef::new(name, MethodSig::parse(sig).unwrap(), Modifiers::PUBLIC);
        def.code = code;
        def
    }

    #[test]
    fn test_valid_unit() {
        let mut unit = CompiledUnit::new("app.A");
        unit.methods.push(method("answer", "()->i64", vec![Instr::ConstInt(42), Instr::ReturnValue]));
        assert!(verify_unit(&unit).is_ok());
    }

    #[test]
    fn test_duplicate_field() {
        let mut unit = CompiledUnit::new("app.A");
        unit.fields.push(FieldDef::new("x", TypeSig::Int));
        unit.fields.push(FieldDef::new("x", TypeSig::Float));
        assert!(matches!(verify_unit(&unit), Err(VerifyError::DuplicateField { .. })));
    }

    #[test]
    fn test_bad_jump() {
        let mut unit = CompiledUnit::new("app.A");
        unit.methods.push(method("run", "()->void", vec![Instr::Jump(5), Instr::Return]));
        assert!(matches!(verify_unit(&unit), Err(VerifyError::InvalidJumpTarget { target: 5, .. })));
    }

    #[test]
    fn test_fall_off_end() {
        let mut unit = CompiledUnit::new("app.A");
        unit.methods.push(method("run", "()->void", vec![Instr::Nop]));
        assert!(matches!(verify_unit(&unit), Err(VerifyError::FallOffEnd(_))));
    }

    #[test]
    fn test_return_mismatch() {
        let mut unit = CompiledUnit::new("app.A");
        unit.methods.push(method("run", "()->i64", vec![Instr::Return]));
        assert!(matches!(verify_unit(&unit), Err(VerifyError::ReturnMismatch { .. })));
    }

    #[test]
    fn test_engine_ops_rejected_in_user_units() {
        let mut unit = CompiledUnit::new("app.A");
        unit.methods.push(method(
            "run",
            "()->void",
            vec![Instr::MethodEntryCheck { type_id: 1, slot: 0 }, Instr::Return],
        ));
        assert!(matches!(verify_unit(&unit), Err(VerifyError::EngineInstruction { .. })));
        unit.flags |= flags::ENGINE_REWRITTEN;
        assert!(verify_unit(&unit).is_ok());
    }

    #[test]
    fn test_constructor_must_init_super() {
        let mut unit = CompiledUnit::new("app.B");
        unit.super_name = Some("app.A".to_string());
        unit.methods.push(method("<init>", "()->void", vec![Instr::Return]));
        assert!(matches!(verify_unit(&unit), Err(VerifyError::MissingSuperInit { .. })));

        unit.methods[0].code = vec![
            Instr::Load(0),
            Instr::InvokeSpecial(MethodRef::new("app.A", "<init>", MethodSig::void())),
            Instr::Return,
        ];
        assert!(verify_unit(&unit).is_ok());
        assert_eq!(super_init_index(&unit.methods[0]), Some(1));
    }
}
