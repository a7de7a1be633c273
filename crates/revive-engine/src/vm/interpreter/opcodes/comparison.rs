use std::cmp::Ordering;

use crate::unit::Instr;
use crate::vm::error::VmError;
use crate::vm::interpreter::{ControlFlow, Frame, Interpreter};
use crate::vm::value::Value;

/// Ordering of two comparable values; `None` when unordered (NaN)
fn compare(a: &Value, b: &Value) -> Result<Option<Ordering>, VmError> {
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => {
            return Err(VmError::TypeMismatch {
                expected: a.type_name(),
                found: b.type_name(),
            })
        }
    };
    Ok(ordering)
}

impl<'s> Interpreter<'s> {
    pub(in crate::vm::interpreter) fn exec_comparison_ops(
        &mut self,
        frame: &mut Frame,
        instr: &Instr,
    ) -> Result<ControlFlow, VmError> {
        if let Instr::Not = instr {
            let value = frame.pop()?.as_bool()?;
            frame.push(Value::Bool(!value));
            return Ok(ControlFlow::Continue);
        }

        let b = frame.pop()?;
        let a = frame.pop()?;
        let result = match instr {
            Instr::Eq => a == b,
            Instr::Ne => a != b,
            Instr::Lt => matches!(compare(&a, &b)?, Some(Ordering::Less)),
            Instr::Le => matches!(compare(&a, &b)?, Some(Ordering::Less | Ordering::Equal)),
            Instr::Gt => matches!(compare(&a, &b)?, Some(Ordering::Greater)),
            Instr::Ge => matches!(compare(&a, &b)?, Some(Ordering::Greater | Ordering::Equal)),
            other => {
                return Err(VmError::InvalidInstruction(format!(
                    "not a comparison instruction: {:?}",
                    other
                )))
            }
        };
        frame.push(Value::Bool(result));
        Ok(ControlFlow::Continue)
    }
}
