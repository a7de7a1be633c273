//! Host virtual machine: classes, objects, values and the interpreter

pub mod access;
pub mod class_registry;
pub mod error;
pub mod interpreter;
pub mod object;
pub mod value;

pub use class_registry::ClassRegistry;
pub use error::{VmError, VmResult};
pub use interpreter::Interpreter;
pub use object::{Class, ClassSpec, MethodImpl, Object, ROOT_CLASS};
pub use value::{Array, Value};
