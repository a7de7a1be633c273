//! Reload and registration errors

use thiserror::Error;

use super::descriptor::DescriptorError;
use super::observer::ObserverError;
use crate::unit::{UnitError, VerifyError};
use crate::vm::error::VmError;

/// Errors raised while registering or reloading a managed type
#[derive(Debug, Error)]
pub enum ReloadError {
    /// Bytes are not a well-formed unit
    #[error("Malformed unit: {0}")]
    Unit(#[from] UnitError),

    /// Unit failed instruction-stream verification
    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),

    /// Descriptor could not be extracted
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Host definition or execution failed
    #[error(transparent)]
    Vm(#[from] VmError),

    /// Bytes describe a different type than the one being reloaded
    #[error("Reload of {expected} received a unit for {found}")]
    NameMismatch {
        /// Type being reloaded
        expected: String,
        /// Type named in the bytes
        found: String,
    },

    /// Type is not managed by the engine
    #[error("{0} is not a managed type")]
    NotManaged(String),

    /// A reload observer failed
    #[error("Observer failed during reload of {type_name}: {source}")]
    Observer {
        /// Type being reloaded
        type_name: String,
        /// Observer failure
        #[source]
        source: ObserverError,
    },

    /// Owning scope was dropped
    #[error("Scope is closed")]
    ScopeClosed,

    /// Type registered twice
    #[error("{0} is already registered")]
    DuplicateType(String),
}
