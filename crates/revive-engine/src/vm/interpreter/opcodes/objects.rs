use std::sync::Arc;

use crate::unit::{FieldAccess, FieldRef, Instr, TypeSig};
use crate::vm::error::VmError;
use crate::vm::interpreter::{ControlFlow, Frame, Interpreter};
use crate::vm::object::{Class, Object, ResolvedField};
use crate::vm::value::{Array, Value};

impl<'s> Interpreter<'s> {
    pub(in crate::vm::interpreter) fn exec_object_ops(
        &mut self,
        frame: &mut Frame,
        instr: &Instr,
    ) -> Result<ControlFlow, VmError> {
        match instr {
            Instr::New(type_name) => {
                let object = self.instantiate(type_name)?;
                frame.push(Value::Object(object));
            }
            Instr::NewArray(element) => {
                let length = frame.pop()?.as_int()?;
                let length = usize::try_from(length)
                    .map_err(|_| VmError::IndexOutOfBounds { index: length, length: 0 })?;
                frame.push(Value::Array(Arc::new(Array::new(element.clone(), length))));
            }
            Instr::ArrayLoad => {
                let index = frame.pop()?.as_int()?;
                let array = frame.pop()?;
                let array = array
                    .as_array()
                    .ok_or_else(|| VmError::NullPointer("array load".to_string()))?;
                let value = array.get(index)?;
                frame.push(value);
            }
            Instr::ArrayStore => {
                let value = frame.pop()?;
                let index = frame.pop()?.as_int()?;
                let array = frame.pop()?;
                let array = array
                    .as_array()
                    .ok_or_else(|| VmError::NullPointer("array store".to_string()))?;
                if !value.conforms_to(&array.element) {
                    return Err(VmError::TypeMismatch {
                        expected: array.element.to_string(),
                        found: value.type_name(),
                    });
                }
                array.set(index, value)?;
            }
            Instr::ArrayLength => {
                let array = frame.pop()?;
                let array = array
                    .as_array()
                    .ok_or_else(|| VmError::NullPointer("array length".to_string()))?;
                frame.push(Value::Int(array.len() as i64));
            }
            Instr::InstanceOf(type_name) => {
                let value = frame.pop()?;
                let result = !value.is_null() && value.conforms_to(&TypeSig::reference(type_name.as_str()));
                frame.push(Value::Bool(result));
            }
            Instr::CheckCast(type_name) => {
                let value = frame.peek()?;
                if !value.is_null() && !value.conforms_to(&TypeSig::reference(type_name.as_str())) {
                    return Err(VmError::ClassCast {
                        found: value.type_name(),
                        target: type_name.clone(),
                    });
                }
            }
            Instr::GetField(field) => {
                let resolved = self.resolve_native_field(&frame.class, field, FieldAccess::Get)?;
                let receiver = frame.pop()?;
                let object = receiver_object(&receiver, field)?;
                let value = native_slot(object, &resolved, field)?;
                frame.push(value);
            }
            Instr::PutField(field) => {
                let resolved = self.resolve_native_field(&frame.class, field, FieldAccess::Put)?;
                let value = frame.pop()?;
                let receiver = frame.pop()?;
                let object = receiver_object(&receiver, field)?;
                check_conforms(&value, &resolved.slot.sig)?;
                let index = object
                    .class()
                    .field_slot(&resolved.slot.declaring, &resolved.slot.name)
                    .ok_or_else(|| VmError::no_such_field(&field.owner, &field.name, &field.sig))?;
                object.set_slot(index, value)?;
            }
            Instr::GetStatic(field) => {
                let resolved = self.resolve_native_field(&frame.class, field, FieldAccess::GetStatic)?;
                self.ensure_initialized(&resolved.class)?;
                let value = resolved
                    .class
                    .get_static(resolved.index)
                    .ok_or_else(|| VmError::no_such_field(&field.owner, &field.name, &field.sig))?;
                frame.push(value);
            }
            Instr::PutStatic(field) => {
                let resolved = self.resolve_native_field(&frame.class, field, FieldAccess::PutStatic)?;
                let value = frame.pop()?;
                check_conforms(&value, &resolved.slot.sig)?;
                self.ensure_initialized(&resolved.class)?;
                resolved.class.set_static(resolved.index, value)?;
            }
            other => {
                return Err(VmError::InvalidInstruction(format!(
                    "not an object instruction: {:?}",
                    other
                )))
            }
        }
        Ok(ControlFlow::Continue)
    }

    /// Allocate an instance of `type_name`, initializing the class first
    pub fn instantiate(&mut self, type_name: &str) -> Result<Arc<Object>, VmError> {
        let class = self.scope().classes().require(type_name)?;
        if class.is_abstract() {
            return Err(VmError::Instantiation(type_name.to_string()));
        }
        self.ensure_initialized(&class)?;
        Ok(Arc::new(Object::new(class)))
    }

    /// Host field resolution with the checks a direct access performs
    fn resolve_native_field(
        &self,
        caller: &Arc<Class>,
        field: &FieldRef,
        access: FieldAccess,
    ) -> Result<ResolvedField, VmError> {
        let owner = self.scope().classes().require(&field.owner)?;
        let resolved = owner
            .resolve_field(&field.name)
            .ok_or_else(|| VmError::no_such_field(&field.owner, &field.name, &field.sig))?;
        if resolved.is_static() != access.is_static() {
            return Err(VmError::IncompatibleClassChange(format!(
                "{} is {}a static field",
                field,
                if resolved.is_static() { "" } else { "not " }
            )));
        }
        if resolved.slot.sig != field.sig {
            return Err(VmError::no_such_field(&field.owner, &field.name, &field.sig));
        }
        self.check_access(caller, &resolved.slot.declaring, resolved.slot.modifiers, field)?;
        Ok(resolved)
    }
}

fn receiver_object<'v>(receiver: &'v Value, field: &FieldRef) -> Result<&'v Arc<Object>, VmError> {
    receiver
        .as_object()
        .ok_or_else(|| VmError::NullPointer(format!("field access {}", field)))
}

fn native_slot(object: &Object, resolved: &ResolvedField, field: &FieldRef) -> Result<Value, VmError> {
    object
        .class()
        .field_slot(&resolved.slot.declaring, &resolved.slot.name)
        .and_then(|index| object.get_slot(index))
        .ok_or_else(|| VmError::no_such_field(&field.owner, &field.name, &field.sig))
}

pub(crate) fn check_conforms(value: &Value, sig: &TypeSig) -> Result<(), VmError> {
    if value.conforms_to(sig) {
        Ok(())
    } else {
        Err(VmError::TypeMismatch {
            expected: sig.to_string(),
            found: value.type_name(),
        })
    }
}
