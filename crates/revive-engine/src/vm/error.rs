//! Host execution errors

use thiserror::Error;

use crate::unit::VerifyError;

/// VM execution and linkage errors
///
/// Linkage variants carry the symbolic reference that failed so the engine can
/// reproduce exactly what a direct call against the host would have raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// Type not defined in this scope
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    /// Method could not be resolved
    #[error("No such method: {owner}.{name}{sig}")]
    NoSuchMethod {
        /// Type named at the call site
        owner: String,
        /// Method name
        name: String,
        /// Method signature
        sig: String,
    },

    /// Field could not be resolved
    #[error("No such field: {owner}.{name}:{sig}")]
    NoSuchField {
        /// Type named at the access site
        owner: String,
        /// Field name
        name: String,
        /// Field type expected by the access site
        sig: String,
    },

    /// Static/instance kind of a member differs from what the site expects
    #[error("Incompatible class change: {0}")]
    IncompatibleClassChange(String),

    /// Member not accessible from the calling type
    #[error("Illegal access: {0}")]
    IllegalAccess(String),

    /// Selected implementation is abstract
    #[error("Abstract method: {0}")]
    AbstractMethod(String),

    /// Attempt to instantiate an abstract type or interface
    #[error("Cannot instantiate {0}")]
    Instantiation(String),

    /// Null receiver or operand
    #[error("Null pointer: {0}")]
    NullPointer(String),

    /// Operand of the wrong kind
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected kind
        expected: String,
        /// Found kind
        found: String,
    },

    /// Checked cast failed
    #[error("Class cast: {found} cannot be cast to {target}")]
    ClassCast {
        /// Actual runtime type
        found: String,
        /// Target type
        target: String,
    },

    /// Division by zero
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// Array index out of range
    #[error("Index {index} out of bounds for length {length}")]
    IndexOutOfBounds {
        /// Requested index
        index: i64,
        /// Array length
        length: usize,
    },

    /// Operand stack underflow
    #[error("Stack underflow in {0}")]
    StackUnderflow(String),

    /// Local slot outside the frame
    #[error("Invalid local {0}")]
    InvalidLocal(u16),

    /// Call depth limit exceeded
    #[error("Stack overflow (depth {0})")]
    StackOverflow(usize),

    /// Type defined twice in one scope
    #[error("Duplicate class: {0}")]
    DuplicateClass(String),

    /// Definition-time failure (bad supertype, bad layout)
    #[error("Link error: {0}")]
    Link(String),

    /// Unit failed structural verification
    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),

    /// Field-store value no longer matches the declared type
    #[error("Stored value for {owner}.{name} is not assignable to {sig}")]
    FieldTypeMismatch {
        /// Declaring type
        owner: String,
        /// Field name
        name: String,
        /// Current declared type
        sig: String,
    },

    /// Malformed instruction sequence at run time
    #[error("Invalid instruction: {0}")]
    InvalidInstruction(String),
}

impl VmError {
    /// `NoSuchMethod` for a symbolic method reference
    pub fn no_such_method(owner: &str, name: &str, sig: &impl std::fmt::Display) -> Self {
        VmError::NoSuchMethod {
            owner: owner.to_string(),
            name: name.to_string(),
            sig: sig.to_string(),
        }
    }

    /// `NoSuchField` for a symbolic field reference
    pub fn no_such_field(owner: &str, name: &str, sig: &impl std::fmt::Display) -> Self {
        VmError::NoSuchField {
            owner: owner.to_string(),
            name: name.to_string(),
            sig: sig.to_string(),
        }
    }
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
