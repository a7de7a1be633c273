use std::sync::Arc;

use crate::unit::{Instr, InvokeKind, MethodRef, TypeSig};
use crate::vm::error::VmError;
use crate::vm::interpreter::{ControlFlow, Frame, Interpreter};
use crate::vm::object::Class;
use crate::vm::value::Value;

/// Number of stack values an invocation consumes
pub(crate) fn call_arg_count(kind: InvokeKind, method: &MethodRef) -> usize {
    method.sig.arity() + usize::from(kind != InvokeKind::Static)
}

impl<'s> Interpreter<'s> {
    pub(in crate::vm::interpreter) fn exec_call_ops(
        &mut self,
        frame: &mut Frame,
        instr: &Instr,
    ) -> Result<ControlFlow, VmError> {
        let Some((kind, method)) = instr.as_invoke() else {
            return Err(VmError::InvalidInstruction(format!("not a call instruction: {:?}", instr)));
        };
        let args = frame.pop_n(call_arg_count(kind, method))?;
        let result = self.call_native(&frame.class, kind, method, args)?;
        if method.sig.ret != TypeSig::Void {
            frame.push(result);
        }
        Ok(ControlFlow::Continue)
    }

    /// Perform an invocation exactly as the host links it
    pub fn call_native(
        &mut self,
        caller: &Arc<Class>,
        kind: InvokeKind,
        method: &MethodRef,
        args: Vec<Value>,
    ) -> Result<Value, VmError> {
        let owner = self.scope().classes().require(&method.owner)?;
        let key = method.key();
        let resolved = if kind == InvokeKind::Special && key.is_constructor() {
            owner.declared_method(&key).map(|m| (owner.clone(), m.clone()))
        } else {
            owner.resolve_method(&key)
        };
        let (declaring, resolved) =
            resolved.ok_or_else(|| VmError::no_such_method(&method.owner, &method.name, &method.sig))?;

        if resolved.is_static() != (kind == InvokeKind::Static) {
            return Err(VmError::IncompatibleClassChange(format!(
                "{} is {}a static method",
                method,
                if resolved.is_static() { "" } else { "not " }
            )));
        }
        self.check_access(caller, &resolved.declaring, resolved.declared_modifiers, method)?;

        match kind {
            InvokeKind::Static => self.invoke(&declaring, &resolved, args),
            InvokeKind::Special => {
                if !key.is_constructor() {
                    let effective = self.effective_caller(caller);
                    if !effective.extends(&owner.name) {
                        return Err(VmError::IllegalAccess(format!(
                            "{} cannot make a non-virtual call to {}",
                            effective.name, method
                        )));
                    }
                }
                if args.first().map_or(true, Value::is_null) {
                    return Err(VmError::NullPointer(format!("receiver of {}", method)));
                }
                self.invoke(&declaring, &resolved, args)
            }
            InvokeKind::Virtual | InvokeKind::Interface => {
                let receiver = match args.first() {
                    Some(Value::Object(object)) => object.class().clone(),
                    Some(Value::Null) | None => {
                        return Err(VmError::NullPointer(format!("receiver of {}", method)));
                    }
                    Some(other) => {
                        return Err(VmError::TypeMismatch {
                            expected: method.owner.clone(),
                            found: other.type_name(),
                        })
                    }
                };
                if !receiver.is_subtype_of(&method.owner) {
                    return Err(VmError::ClassCast {
                        found: receiver.name.to_string(),
                        target: method.owner.clone(),
                    });
                }
                if resolved.modifiers.is_private() {
                    return self.invoke(&declaring, &resolved, args);
                }
                match receiver.vtable_lookup(&key).cloned() {
                    Some(selected) if !selected.is_abstract() => {
                        let class = self.declaring_class(&receiver, &selected.declaring)?;
                        self.invoke(&class, &selected, args)
                    }
                    _ => self
                        .dispatch_virtual(&receiver, &key, args)?
                        .ok_or_else(|| VmError::AbstractMethod(format!("{}.{}", receiver.name, key))),
                }
            }
        }
    }
}
