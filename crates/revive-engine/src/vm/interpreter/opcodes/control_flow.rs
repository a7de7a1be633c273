use crate::unit::Instr;
use crate::vm::error::VmError;
use crate::vm::interpreter::{ControlFlow, Frame, Interpreter};
use crate::vm::value::Value;

impl<'s> Interpreter<'s> {
    pub(in crate::vm::interpreter) fn exec_control_flow_ops(
        &mut self,
        frame: &mut Frame,
        instr: &Instr,
    ) -> Result<ControlFlow, VmError> {
        match instr {
            Instr::Jump(target) => Ok(ControlFlow::Jump(*target as usize)),
            Instr::JumpIfTrue(target) => {
                if frame.pop()?.as_bool()? {
                    Ok(ControlFlow::Jump(*target as usize))
                } else {
                    Ok(ControlFlow::Continue)
                }
            }
            Instr::JumpIfFalse(target) => {
                if frame.pop()?.as_bool()? {
                    Ok(ControlFlow::Continue)
                } else {
                    Ok(ControlFlow::Jump(*target as usize))
                }
            }
            Instr::Return => Ok(ControlFlow::Return(Value::Null)),
            Instr::ReturnValue => Ok(ControlFlow::Return(frame.pop()?)),
            other => Err(VmError::InvalidInstruction(format!(
                "not a control flow instruction: {:?}",
                other
            ))),
        }
    }
}
