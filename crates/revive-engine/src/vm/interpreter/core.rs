//! Interpreter core: call setup, the execution loop and opcode dispatch

use std::fmt;
use std::sync::Arc;

use super::execution::{ControlFlow, Frame};
use crate::scope::Scope;
use crate::unit::{Instr, MemberKey, MethodSig, Modifiers, STATIC_INIT};
use crate::vm::access::can_access;
use crate::vm::error::{VmError, VmResult};
use crate::vm::object::{Class, MethodImpl};
use crate::vm::value::Value;

/// Executes method bodies against the classes of one scope
pub struct Interpreter<'s> {
    scope: &'s Scope,
    depth: usize,
    max_depth: usize,
}

impl<'s> Interpreter<'s> {
    /// Create an interpreter for `scope`
    pub fn new(scope: &'s Scope) -> Self {
        Self {
            scope,
            depth: 0,
            max_depth: scope.options().max_call_depth,
        }
    }

    /// Scope the interpreter runs in
    pub fn scope(&self) -> &'s Scope {
        self.scope
    }

    /// Current call depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Run `method` of `class` with `args` (receiver first for instance methods)
    ///
    /// Void methods produce `Value::Null`.
    pub fn invoke(&mut self, class: &Arc<Class>, method: &Arc<MethodImpl>, args: Vec<Value>) -> VmResult<Value> {
        if method.is_abstract() {
            return Err(VmError::AbstractMethod(format!("{}.{}", method.declaring, method.key)));
        }
        if args.len() != method.arg_count() {
            return Err(VmError::InvalidInstruction(format!(
                "{}.{} expects {} arguments, got {}",
                method.declaring,
                method.key,
                method.arg_count(),
                args.len()
            )));
        }
        if method.is_static() && !method.key.is_static_init() {
            self.ensure_initialized(class)?;
        }
        if self.depth >= self.max_depth {
            return Err(VmError::StackOverflow(self.depth));
        }

        self.depth += 1;
        let mut frame = Frame::new(class.clone(), method.clone(), args);
        let result = self.run(&mut frame);
        self.depth -= 1;
        result
    }

    /// Run `call` on behalf of the current frame, which only forwards to it
    /// and so does not count against the call depth while `call` runs
    pub(in crate::vm::interpreter) fn forwarding<T>(
        &mut self,
        call: impl FnOnce(&mut Self) -> VmResult<T>,
    ) -> VmResult<T> {
        let saved = self.depth;
        self.depth = saved.saturating_sub(1);
        let result = call(self);
        self.depth = saved;
        result
    }

    fn run(&mut self, frame: &mut Frame) -> VmResult<Value> {
        let code = frame.method.code.clone();
        loop {
            let Some(instr) = code.get(frame.pc) else {
                if frame.method.returns_value() {
                    return Err(VmError::InvalidInstruction(format!(
                        "fell off the end of {}.{}",
                        frame.method.declaring, frame.method.key
                    )));
                }
                return Ok(Value::Null);
            };
            match self.execute_instr(frame, instr)? {
                ControlFlow::Continue => frame.pc += 1,
                ControlFlow::Skip => frame.pc += 2,
                ControlFlow::Jump(target) => frame.pc = target,
                ControlFlow::Return(value) => return Ok(value),
            }
        }
    }

    fn execute_instr(&mut self, frame: &mut Frame, instr: &Instr) -> VmResult<ControlFlow> {
        match instr {
            Instr::Nop
            | Instr::Pop
            | Instr::Dup
            | Instr::Swap
            | Instr::ConstNull
            | Instr::ConstBool(_)
            | Instr::ConstInt(_)
            | Instr::ConstFloat(_)
            | Instr::ConstStr(_)
            | Instr::Load(_)
            | Instr::Store(_) => self.exec_stack_ops(frame, instr),

            Instr::Add | Instr::Sub | Instr::Mul | Instr::Div | Instr::Rem | Instr::Neg | Instr::Concat => {
                self.exec_arithmetic_ops(frame, instr)
            }

            Instr::Eq | Instr::Ne | Instr::Lt | Instr::Le | Instr::Gt | Instr::Ge | Instr::Not => {
                self.exec_comparison_ops(frame, instr)
            }

            Instr::Jump(_)
            | Instr::JumpIfTrue(_)
            | Instr::JumpIfFalse(_)
            | Instr::Return
            | Instr::ReturnValue => self.exec_control_flow_ops(frame, instr),

            Instr::New(_)
            | Instr::NewArray(_)
            | Instr::ArrayLoad
            | Instr::ArrayStore
            | Instr::ArrayLength
            | Instr::InstanceOf(_)
            | Instr::CheckCast(_)
            | Instr::GetField(_)
            | Instr::PutField(_)
            | Instr::GetStatic(_)
            | Instr::PutStatic(_) => self.exec_object_ops(frame, instr),

            Instr::InvokeVirtual(_)
            | Instr::InvokeInterface(_)
            | Instr::InvokeStatic(_)
            | Instr::InvokeSpecial(_) => self.exec_call_ops(frame, instr),

            Instr::MethodEntryCheck { .. }
            | Instr::InvokeCheck { .. }
            | Instr::FieldCheck { .. }
            | Instr::DynGetField { .. }
            | Instr::DynPutField { .. }
            | Instr::DynGetStatic { .. }
            | Instr::DynPutStatic { .. }
            | Instr::DynInvokeSpecial { .. }
            | Instr::DynInvokeSuper { .. }
            | Instr::DynInitSuper { .. } => self.exec_live_ops(frame, instr),
        }
    }

    /// Run the static initializer of `class` (supertypes first) if it has not started
    pub fn ensure_initialized(&mut self, class: &Arc<Class>) -> VmResult<()> {
        if class.is_initialized() {
            return Ok(());
        }
        if let Some(parent) = &class.super_class {
            self.ensure_initialized(parent)?;
        }
        if !class.begin_initialization() {
            return Ok(());
        }
        let key = MemberKey::new(STATIC_INIT, MethodSig::void());
        let result = match class.declared_method(&key) {
            Some(clinit) => {
                tracing::trace!(class = %class.name, "running static initializer");
                self.invoke(class, clinit, Vec::new()).map(drop)
            }
            None => Ok(()),
        };
        // waiters must not block forever on a failed initializer
        class.finish_initialization();
        result
    }

    /// The class code running in `class` acts as: the managed type an
    /// executor stands for, else the class itself
    pub fn effective_caller(&self, class: &Arc<Class>) -> Arc<Class> {
        class
            .stands_for
            .and_then(|id| self.scope.types().get(id))
            .and_then(|rtype| rtype.native().cloned())
            .unwrap_or_else(|| class.clone())
    }

    /// Fail with `IllegalAccess` unless code in `caller` may use the member
    pub fn check_access(
        &self,
        caller: &Arc<Class>,
        declaring: &str,
        modifiers: Modifiers,
        member: &dyn fmt::Display,
    ) -> VmResult<()> {
        let effective = self.effective_caller(caller);
        if can_access(&effective.name, declaring, modifiers, || effective.extends(declaring)) {
            Ok(())
        } else {
            Err(VmError::IllegalAccess(format!(
                "{} cannot access {:?} member {}",
                effective.name,
                modifiers.visibility(),
                member
            )))
        }
    }

    /// Class named `declaring` as seen from `class`'s hierarchy
    pub(crate) fn declaring_class(&self, class: &Arc<Class>, declaring: &str) -> VmResult<Arc<Class>> {
        match class.ancestor(declaring) {
            Some(found) => Ok(found),
            None => self.scope.classes().require(declaring),
        }
    }
}
