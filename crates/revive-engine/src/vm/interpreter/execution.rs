//! Frames and per-instruction control flow

use std::sync::Arc;

use crate::vm::error::{VmError, VmResult};
use crate::vm::object::{Class, MethodImpl};
use crate::vm::value::Value;

/// Control flow directive from executing one instruction
#[derive(Debug)]
pub enum ControlFlow {
    /// Continue to the next instruction
    Continue,
    /// A guard performed the following instruction itself; skip it
    Skip,
    /// Jump to an instruction index
    Jump(usize),
    /// Return from the current method
    Return(Value),
}

/// Activation record of one method call
#[derive(Debug)]
pub struct Frame {
    /// Class the running code belongs to
    pub class: Arc<Class>,
    /// Running method
    pub method: Arc<MethodImpl>,
    /// Local slots (receiver and arguments first)
    pub locals: Vec<Value>,
    /// Operand stack
    pub stack: Vec<Value>,
    /// Index of the current instruction
    pub pc: usize,
}

impl Frame {
    /// Create a frame with `args` in the first local slots
    pub fn new(class: Arc<Class>, method: Arc<MethodImpl>, mut args: Vec<Value>) -> Self {
        let locals = usize::from(method.max_locals).max(args.len());
        args.resize(locals, Value::Null);
        Self {
            class,
            method,
            locals: args,
            stack: Vec::with_capacity(8),
            pc: 0,
        }
    }

    /// Push onto the operand stack
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop the operand stack
    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or_else(|| self.underflow())
    }

    /// Pop `count` values, returned in push order
    pub fn pop_n(&mut self, count: usize) -> VmResult<Vec<Value>> {
        if self.stack.len() < count {
            return Err(self.underflow());
        }
        let at = self.stack.len() - count;
        Ok(self.stack.split_off(at))
    }

    /// Top of the operand stack
    pub fn peek(&self) -> VmResult<&Value> {
        self.stack.last().ok_or_else(|| self.underflow())
    }

    /// Value `depth` entries below the top
    pub fn peek_at(&self, depth: usize) -> VmResult<&Value> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.stack.get(i))
            .ok_or_else(|| self.underflow())
    }

    /// Read a local slot
    pub fn load(&self, index: u16) -> VmResult<Value> {
        self.locals
            .get(usize::from(index))
            .cloned()
            .ok_or(VmError::InvalidLocal(index))
    }

    /// Write a local slot
    pub fn store(&mut self, index: u16, value: Value) -> VmResult<()> {
        let slot = self
            .locals
            .get_mut(usize::from(index))
            .ok_or(VmError::InvalidLocal(index))?;
        *slot = value;
        Ok(())
    }

    /// The receiver and arguments this frame was entered with
    pub fn arguments(&self) -> Vec<Value> {
        self.locals[..self.method.arg_count().min(self.locals.len())].to_vec()
    }

    fn underflow(&self) -> VmError {
        VmError::StackUnderflow(format!("{}.{}", self.method.declaring, self.method.key))
    }
}
