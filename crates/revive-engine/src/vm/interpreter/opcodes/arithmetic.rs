use crate::unit::Instr;
use crate::vm::error::VmError;
use crate::vm::interpreter::{ControlFlow, Frame, Interpreter};
use crate::vm::value::Value;

/// Numeric operand pair, promoted to float when either side is a float
enum Operands {
    Int(i64, i64),
    Float(f64, f64),
}

fn operands(a: &Value, b: &Value) -> Result<Operands, VmError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Operands::Int(*x, *y)),
        (Value::Int(x), Value::Float(y)) => Ok(Operands::Float(*x as f64, *y)),
        (Value::Float(x), Value::Int(y)) => Ok(Operands::Float(*x, *y as f64)),
        (Value::Float(x), Value::Float(y)) => Ok(Operands::Float(*x, *y)),
        (Value::Int(_) | Value::Float(_), other) | (other, _) => Err(VmError::TypeMismatch {
            expected: "number".to_string(),
            found: other.type_name(),
        }),
    }
}

impl<'s> Interpreter<'s> {
    pub(in crate::vm::interpreter) fn exec_arithmetic_ops(
        &mut self,
        frame: &mut Frame,
        instr: &Instr,
    ) -> Result<ControlFlow, VmError> {
        if let Instr::Neg = instr {
            let value = match frame.pop()? {
                Value::Int(v) => Value::Int(v.wrapping_neg()),
                Value::Float(v) => Value::Float(-v),
                other => {
                    return Err(VmError::TypeMismatch {
                        expected: "number".to_string(),
                        found: other.type_name(),
                    })
                }
            };
            frame.push(value);
            return Ok(ControlFlow::Continue);
        }

        let b = frame.pop()?;
        let a = frame.pop()?;
        if let Instr::Concat = instr {
            frame.push(Value::str(&format!("{}{}", a, b)));
            return Ok(ControlFlow::Continue);
        }

        let result = match (instr, operands(&a, &b)?) {
            (Instr::Add, Operands::Int(x, y)) => Value::Int(x.wrapping_add(y)),
            (Instr::Sub, Operands::Int(x, y)) => Value::Int(x.wrapping_sub(y)),
            (Instr::Mul, Operands::Int(x, y)) => Value::Int(x.wrapping_mul(y)),
            (Instr::Div | Instr::Rem, Operands::Int(_, 0)) => {
                return Err(VmError::Arithmetic("division by zero".to_string()));
            }
            (Instr::Div, Operands::Int(x, y)) => Value::Int(x.wrapping_div(y)),
            (Instr::Rem, Operands::Int(x, y)) => Value::Int(x.wrapping_rem(y)),
            (Instr::Add, Operands::Float(x, y)) => Value::Float(x + y),
            (Instr::Sub, Operands::Float(x, y)) => Value::Float(x - y),
            (Instr::Mul, Operands::Float(x, y)) => Value::Float(x * y),
            (Instr::Div, Operands::Float(x, y)) => Value::Float(x / y),
            (Instr::Rem, Operands::Float(x, y)) => Value::Float(x % y),
            (other, _) => {
                return Err(VmError::InvalidInstruction(format!(
                    "not an arithmetic instruction: {:?}",
                    other
                )))
            }
        };
        frame.push(result);
        Ok(ControlFlow::Continue)
    }
}
