//! Reload machinery: type identity, structural descriptors and diffs,
//! call-site and self rewriting, dispatch indirection, field stores, and the
//! live resolution guards fall back to once a type has changed.

pub mod descriptor;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod field_store;
pub mod names;
pub mod observer;
pub mod registry;
pub mod reloadable;
pub mod rewriter;
pub mod runtime;

pub use descriptor::{DescriptorError, FieldDescriptor, MethodDescriptor, StructuralDescriptor};
pub use diff::{IncrementalDescriptor, MethodChange};
pub use dispatch::{DispatchEntry, DispatchTable, Dispatcher};
pub use error::ReloadError;
pub use field_store::{FieldIncompatibility, FieldPlacement, FieldSource, FieldStore};
pub use names::{NameRegistry, TypeId};
pub use observer::{ObserverError, ReloadEvent, ReloadObserver};
pub use registry::TypeRegistry;
pub use reloadable::{LiveVersion, ReloadStats, ReloadableType, VersionArtifacts, ORIGINAL_STAMP};
pub use rewriter::{SlotInfo, SlotOrigin, SlotTable};
pub use runtime::{FieldRoute, InvokeRoute, LiveField, LiveMethod};
