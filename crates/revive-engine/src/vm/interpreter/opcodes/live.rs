use std::sync::Arc;

use crate::reload::dispatch::DispatchEntry;
use crate::reload::names::TypeId;
use crate::reload::runtime::{FieldRoute, InvokeRoute, LiveField};
use crate::unit::{FieldAccess, FieldRef, Instr, InvokeKind, TypeSig};
use crate::vm::error::VmError;
use crate::vm::interpreter::opcodes::calls::call_arg_count;
use crate::vm::interpreter::{ControlFlow, Frame, Interpreter};
use crate::vm::value::Value;

impl<'s> Interpreter<'s> {
    pub(in crate::vm::interpreter) fn exec_live_ops(
        &mut self,
        frame: &mut Frame,
        instr: &Instr,
    ) -> Result<ControlFlow, VmError> {
        match instr {
            Instr::MethodEntryCheck { type_id, slot } => self.method_entry(frame, *type_id, *slot),
            Instr::InvokeCheck { type_id } => {
                let next = guarded(frame)?;
                let Some((kind, method)) = next.as_invoke() else {
                    return Err(VmError::InvalidInstruction(format!("invoke check before {:?}", next)));
                };
                match self.route_invoke(&frame.class, TypeId(*type_id), kind, method)? {
                    InvokeRoute::Native => Ok(ControlFlow::Continue),
                    InvokeRoute::Dynamic(live) => {
                        let args = frame.pop_n(call_arg_count(kind, method))?;
                        let caller = frame.class.clone();
                        let result = self.invoke_dynamic(&caller, kind, method, &live, args)?;
                        if method.sig.ret != TypeSig::Void {
                            frame.push(result);
                        }
                        Ok(ControlFlow::Skip)
                    }
                }
            }
            Instr::FieldCheck { .. } => {
                let next = guarded(frame)?;
                let Some((access, field)) = next.as_field_access() else {
                    return Err(VmError::InvalidInstruction(format!("field check before {:?}", next)));
                };
                let caller = frame.class.clone();
                match self.route_field(&caller, access, field)? {
                    FieldRoute::Native => Ok(ControlFlow::Continue),
                    FieldRoute::Managed(live) => {
                        self.access_live_field(frame, access, field, &live)?;
                        Ok(ControlFlow::Skip)
                    }
                }
            }
            Instr::DynGetField { type_id, field } => self.privileged_field(frame, *type_id, FieldAccess::Get, field),
            Instr::DynPutField { type_id, field } => self.privileged_field(frame, *type_id, FieldAccess::Put, field),
            Instr::DynGetStatic { type_id, field } => {
                self.privileged_field(frame, *type_id, FieldAccess::GetStatic, field)
            }
            Instr::DynPutStatic { type_id, field } => {
                self.privileged_field(frame, *type_id, FieldAccess::PutStatic, field)
            }
            Instr::DynInvokeSpecial { type_id, method } => {
                let rtype = self.managed_type(*type_id)?;
                let is_static = rtype
                    .live()
                    .descriptor
                    .method(&method.key())
                    .map(|m| m.is_static())
                    .ok_or_else(|| VmError::no_such_method(&method.owner, &method.name, &method.sig))?;
                let kind = if is_static { InvokeKind::Static } else { InvokeKind::Special };
                let args = frame.pop_n(call_arg_count(kind, method))?;
                let result = self.invoke_special_live(&rtype, method, args)?;
                if method.sig.ret != TypeSig::Void {
                    frame.push(result);
                }
                Ok(ControlFlow::Continue)
            }
            Instr::DynInvokeSuper { type_id, method } | Instr::DynInitSuper { type_id, method } => {
                let rtype = self.managed_type(*type_id)?;
                let args = frame.pop_n(call_arg_count(InvokeKind::Special, method))?;
                let result = self.invoke_super(&rtype, &method.key(), args)?;
                if method.sig.ret != TypeSig::Void {
                    frame.push(result);
                }
                Ok(ControlFlow::Continue)
            }
            other => Err(VmError::InvalidInstruction(format!("not an engine instruction: {:?}", other))),
        }
    }

    /// Prologue of every concrete method of a managed type
    fn method_entry(&mut self, frame: &mut Frame, type_id: u32, slot: u32) -> Result<ControlFlow, VmError> {
        let Some(rtype) = self.scope().types().get(TypeId(type_id)) else {
            return Ok(ControlFlow::Continue);
        };
        let Some(dispatcher) = rtype.dispatcher() else {
            return Ok(ControlFlow::Continue);
        };
        let version = dispatcher.current();
        match version.dispatch.entry(slot) {
            None | Some(DispatchEntry::Original) => Ok(ControlFlow::Continue),
            Some(DispatchEntry::Executor(method)) => {
                let executor = version
                    .executor()
                    .cloned()
                    .ok_or_else(|| VmError::Link(format!("{} version {} has no executor", rtype.name(), version.number)))?;
                let args = frame.arguments();
                if args.len() != method.arg_count() {
                    return Err(VmError::IncompatibleClassChange(format!(
                        "{}.{} changed shape",
                        rtype.name(),
                        frame.method.key
                    )));
                }
                let method = method.clone();
                let value = self.forwarding(|interp| interp.invoke(&executor, &method, args))?;
                Ok(ControlFlow::Return(value))
            }
            Some(DispatchEntry::Deleted) => {
                let key = frame.method.key.clone();
                if frame.method.is_static() || frame.method.is_constructor() {
                    return Err(VmError::no_such_method(rtype.name(), &key.name, &key.sig));
                }
                let args = frame.arguments();
                let value = self.forwarding(|interp| interp.invoke_super(&rtype, &key, args))?;
                Ok(ControlFlow::Return(value))
            }
            Some(DispatchEntry::Abstract) => Err(VmError::AbstractMethod(format!(
                "{}.{}",
                rtype.name(),
                frame.method.key
            ))),
        }
    }

    /// Field access on behalf of a managed type, without access checks
    fn privileged_field(
        &mut self,
        frame: &mut Frame,
        type_id: u32,
        access: FieldAccess,
        field: &FieldRef,
    ) -> Result<ControlFlow, VmError> {
        let rtype = self.managed_type(type_id)?;
        let owner = rtype
            .native()
            .cloned()
            .ok_or_else(|| VmError::ClassNotFound(rtype.name().to_string()))?;
        let live = self.resolve_live_field(&owner, access, field)?;
        self.access_live_field(frame, access, field, &live)?;
        Ok(ControlFlow::Continue)
    }

    fn access_live_field(
        &mut self,
        frame: &mut Frame,
        access: FieldAccess,
        field: &FieldRef,
        live: &LiveField,
    ) -> Result<(), VmError> {
        match access {
            FieldAccess::Get => {
                let receiver = frame.pop()?;
                let object = field_receiver(&receiver, field)?;
                let value = live.get(self, Some(object))?;
                frame.push(value);
            }
            FieldAccess::Put => {
                let value = frame.pop()?;
                let receiver = frame.pop()?;
                let object = field_receiver(&receiver, field)?;
                live.set(self, Some(object), value)?;
            }
            FieldAccess::GetStatic => {
                let value = live.get(self, None)?;
                frame.push(value);
            }
            FieldAccess::PutStatic => {
                let value = frame.pop()?;
                live.set(self, None, value)?;
            }
        }
        Ok(())
    }
}

/// Instruction a guard at the current position protects
fn guarded(frame: &Frame) -> Result<Instr, VmError> {
    frame
        .method
        .code
        .get(frame.pc + 1)
        .cloned()
        .ok_or_else(|| VmError::InvalidInstruction(format!("dangling guard in {}", frame.method.key)))
}

fn field_receiver<'v>(receiver: &'v Value, field: &FieldRef) -> Result<&'v Arc<crate::vm::object::Object>, VmError> {
    receiver
        .as_object()
        .ok_or_else(|| VmError::NullPointer(format!("field access {}", field)))
}
