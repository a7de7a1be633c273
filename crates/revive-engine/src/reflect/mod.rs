//! Reflection answering from live versions

pub mod introspection;
pub mod metadata;

pub use introspection::Introspector;
pub use metadata::{FieldInfo, MetadataCache, MethodInfo, TypeMetadata};
