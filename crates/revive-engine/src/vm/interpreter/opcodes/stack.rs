use crate::unit::Instr;
use crate::vm::error::VmError;
use crate::vm::interpreter::{ControlFlow, Frame, Interpreter};
use crate::vm::value::Value;

impl<'s> Interpreter<'s> {
    pub(in crate::vm::interpreter) fn exec_stack_ops(
        &mut self,
        frame: &mut Frame,
        instr: &Instr,
    ) -> Result<ControlFlow, VmError> {
        match instr {
            Instr::Nop => {}
            Instr::Pop => {
                frame.pop()?;
            }
            Instr::Dup => {
                let top = frame.peek()?.clone();
                frame.push(top);
            }
            Instr::Swap => {
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(a);
                frame.push(b);
            }
            Instr::ConstNull => frame.push(Value::Null),
            Instr::ConstBool(v) => frame.push(Value::Bool(*v)),
            Instr::ConstInt(v) => frame.push(Value::Int(*v)),
            Instr::ConstFloat(v) => frame.push(Value::Float(*v)),
            Instr::ConstStr(s) => frame.push(Value::str(s)),
            Instr::Load(index) => {
                let value = frame.load(*index)?;
                frame.push(value);
            }
            Instr::Store(index) => {
                let value = frame.pop()?;
                frame.store(*index, value)?;
            }
            other => return Err(VmError::InvalidInstruction(format!("not a stack instruction: {:?}", other))),
        }
        Ok(ControlFlow::Continue)
    }
}
