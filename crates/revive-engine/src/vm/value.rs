//! Runtime values

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::unit::TypeSig;
use crate::vm::error::VmError;
use crate::vm::object::Object;

/// A runtime value
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Null reference (also the result of void calls)
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Immutable string
    Str(Arc<str>),
    /// Object reference
    Object(Arc<Object>),
    /// Array reference
    Array(Arc<Array>),
}

impl Value {
    /// Zero-equivalent for a declared type: 0, 0.0, false or null
    pub fn default_for(sig: &TypeSig) -> Value {
        match sig {
            TypeSig::Int => Value::Int(0),
            TypeSig::Float => Value::Float(0.0),
            TypeSig::Bool => Value::Bool(false),
            _ => Value::Null,
        }
    }

    /// String value
    pub fn str(text: &str) -> Value {
        Value::Str(Arc::from(text))
    }

    /// Whether this is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer payload
    pub fn as_int(&self) -> Result<i64, VmError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(other.mismatch("i64")),
        }
    }

    /// Float payload
    pub fn as_float(&self) -> Result<f64, VmError> {
        match self {
            Value::Float(v) => Ok(*v),
            other => Err(other.mismatch("f64")),
        }
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Result<bool, VmError> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(other.mismatch("bool")),
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Object payload
    pub fn as_object(&self) -> Option<&Arc<Object>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Array payload
    pub fn as_array(&self) -> Option<&Arc<Array>> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Runtime type name, as used in error messages
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "i64".to_string(),
            Value::Float(_) => "f64".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::Object(obj) => obj.class().name.to_string(),
            Value::Array(array) => format!("{}[]", array.element),
        }
    }

    /// Whether this value may be stored in a slot of the given declared type
    pub fn conforms_to(&self, sig: &TypeSig) -> bool {
        match (self, sig) {
            (Value::Int(_), TypeSig::Int)
            | (Value::Float(_), TypeSig::Float)
            | (Value::Bool(_), TypeSig::Bool)
            | (Value::Str(_), TypeSig::Str) => true,
            (Value::Null, sig) => sig.is_reference(),
            (Value::Object(obj), TypeSig::Ref(name)) => obj.class().is_subtype_of(name),
            (Value::Array(array), TypeSig::Array(element)) => match (&array.element, element.as_ref()) {
                (TypeSig::Ref(have), TypeSig::Ref(want)) => have == want || want == crate::vm::object::ROOT_CLASS,
                (have, want) => have == want,
            },
            (Value::Str(_) | Value::Array(_), TypeSig::Ref(name)) => name == crate::vm::object::ROOT_CLASS,
            _ => false,
        }
    }

    fn mismatch(&self, expected: &str) -> VmError {
        VmError::TypeMismatch {
            expected: expected.to_string(),
            found: self.type_name(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Object(obj) => write!(f, "{}@{:x}", obj.class().name, obj.object_id),
            Value::Array(array) => write!(f, "{}[{}]", array.element, array.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

/// Fixed-length array
#[derive(Debug)]
pub struct Array {
    /// Element type
    pub element: TypeSig,
    elements: Mutex<Vec<Value>>,
}

impl Array {
    /// Create an array of `length` zero-equivalent elements
    pub fn new(element: TypeSig, length: usize) -> Self {
        let zero = Value::default_for(&element);
        Self {
            element,
            elements: Mutex::new(vec![zero; length]),
        }
    }

    /// Create an array from existing values
    pub fn from_values(element: TypeSig, values: Vec<Value>) -> Self {
        Self {
            element,
            elements: Mutex::new(values),
        }
    }

    /// Array length
    pub fn len(&self) -> usize {
        self.elements.lock().len()
    }

    /// Whether the array is empty
    pub fn is_empty(&self) -> bool {
        self.elements.lock().is_empty()
    }

    /// Element at `index`
    pub fn get(&self, index: i64) -> Result<Value, VmError> {
        let elements = self.elements.lock();
        usize::try_from(index)
            .ok()
            .and_then(|i| elements.get(i).cloned())
            .ok_or(VmError::IndexOutOfBounds {
                index,
                length: elements.len(),
            })
    }

    /// Replace the element at `index`
    pub fn set(&self, index: i64, value: Value) -> Result<(), VmError> {
        let mut elements = self.elements.lock();
        let length = elements.len();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| elements.get_mut(i))
            .ok_or(VmError::IndexOutOfBounds { index, length })?;
        *slot = value;
        Ok(())
    }

    /// Copy of the elements
    pub fn to_vec(&self) -> Vec<Value> {
        self.elements.lock().clone()
    }
}
