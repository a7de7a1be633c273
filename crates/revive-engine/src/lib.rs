//! Revive live-update engine
//!
//! Lets running code pick up structural and behavioral changes to type
//! definitions without invalidating references already held to those types:
//! - **Units**: the compiled form of one type definition (`unit` module)
//! - **VM**: the host classes, objects and interpreter the engine works against (`vm` module)
//! - **Reload**: registry, descriptors, diffs, dispatch indirection and field stores (`reload` module)
//! - **Reflection**: introspection answering from live versions (`reflect` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use revive_engine::{EngineOptions, Scope};
//!
//! let scope = Scope::new(EngineOptions::default().include("app.*"))?;
//! scope.define(&counter_v1)?;
//! let counter = scope.new_instance("app.Counter", &MethodSig::void(), vec![])?;
//!
//! scope.reload("app.Counter", "v2", &counter_v2)?;
//! // `counter` now runs the v2 bodies
//! let value = scope.invoke_virtual(&counter, "get", &MethodSig::parse("()->i64")?, vec![])?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

// ============================================================================
// Core Modules
// ============================================================================

/// Engine configuration
pub mod config;

/// Reflection answering from live versions
pub mod reflect;

/// Reload machinery
pub mod reload;

/// Scopes: isolated type namespaces
pub mod scope;

/// Compiled unit format
pub mod unit;

/// Host virtual machine
pub mod vm;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{ConfigError, EngineOptions, TypeFilter};
pub use reflect::{FieldInfo, Introspector, MethodInfo, TypeMetadata};
pub use reload::{
    FieldIncompatibility, IncrementalDescriptor, LiveVersion, NameRegistry, ObserverError, ReloadError,
    ReloadEvent, ReloadObserver, ReloadableType, StructuralDescriptor, TypeId, TypeRegistry,
};
pub use scope::Scope;
pub use unit::{CompiledUnit, FieldDef, MemberKey, MethodDef, MethodSig, Modifiers, TypeSig, UnitBuilder};
pub use vm::{Value, VmError};
