//! Reflection metadata
//!
//! Metadata is built from a structural descriptor: the live descriptor for
//! managed types, the defined unit for everything else. Synthetic members
//! (catchers, super-dispatchers and other generated code) are never listed.

use std::sync::Arc;

use dashmap::DashMap;

use crate::reload::descriptor::{FieldDescriptor, MethodDescriptor, StructuralDescriptor};
use crate::unit::{Annotation, MemberKey, MethodSig, Modifiers, TypeSig};

/// A field as reported by reflection
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// Declaring type
    pub declaring: Arc<str>,
    /// Name
    pub name: String,
    /// Declared type
    pub sig: TypeSig,
    /// Declared modifiers
    pub modifiers: Modifiers,
    /// Generic signature
    pub generic_signature: Option<String>,
    /// Annotations
    pub annotations: Vec<Annotation>,
}

impl FieldInfo {
    fn new(declaring: &Arc<str>, field: &FieldDescriptor) -> Self {
        Self {
            declaring: declaring.clone(),
            name: field.name.clone(),
            sig: field.sig.clone(),
            modifiers: field.modifiers,
            generic_signature: field.generic_signature.clone(),
            annotations: field.annotations.clone(),
        }
    }

    /// Static field
    pub fn is_static(&self) -> bool {
        self.modifiers.is_static()
    }
}

/// A method or constructor as reported by reflection
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    /// Declaring type
    pub declaring: Arc<str>,
    /// Name
    pub name: String,
    /// Signature
    pub sig: MethodSig,
    /// Declared modifiers
    pub modifiers: Modifiers,
    /// Annotations
    pub annotations: Vec<Annotation>,
    /// Declared thrown types
    pub throws: Vec<String>,
}

impl MethodInfo {
    fn new(declaring: &Arc<str>, method: &MethodDescriptor) -> Self {
        Self {
            declaring: declaring.clone(),
            name: method.name.clone(),
            sig: method.sig.clone(),
            modifiers: method.modifiers,
            annotations: method.annotations.clone(),
            throws: method.throws.clone(),
        }
    }

    /// Name+signature identity
    pub fn key(&self) -> MemberKey {
        MemberKey::new(self.name.clone(), self.sig.clone())
    }

    /// Static method
    pub fn is_static(&self) -> bool {
        self.modifiers.is_static()
    }
}

/// Reflection view of one type at one version
#[derive(Debug, Clone)]
pub struct TypeMetadata {
    /// Type name
    pub name: Arc<str>,
    /// Version the metadata was built from (0 for unmanaged types)
    pub version: u32,
    /// Supertype
    pub super_name: Option<String>,
    /// Interfaces
    pub interfaces: Vec<String>,
    /// Type modifiers
    pub modifiers: Modifiers,
    /// Type annotations
    pub annotations: Vec<Annotation>,
    /// Declared fields, in declaration order
    pub fields: Vec<FieldInfo>,
    /// Declared methods, constructors and the static initializer excluded
    pub methods: Vec<MethodInfo>,
    /// Declared constructors
    pub constructors: Vec<MethodInfo>,
}

impl TypeMetadata {
    /// Build from a descriptor
    pub fn from_descriptor(descriptor: &StructuralDescriptor, version: u32) -> Self {
        let name: Arc<str> = Arc::from(descriptor.name.as_str());
        let visible = |modifiers: Modifiers| !modifiers.contains(Modifiers::SYNTHETIC);
        Self {
            version,
            super_name: descriptor.super_name.clone(),
            interfaces: descriptor.interfaces.clone(),
            modifiers: descriptor.modifiers,
            annotations: descriptor.annotations.clone(),
            fields: descriptor
                .fields
                .iter()
                .filter(|f| visible(f.modifiers))
                .map(|f| FieldInfo::new(&name, f))
                .collect(),
            methods: descriptor
                .plain_methods()
                .filter(|m| visible(m.modifiers))
                .map(|m| MethodInfo::new(&name, m))
                .collect(),
            constructors: descriptor
                .constructors()
                .filter(|m| visible(m.modifiers))
                .map(|m| MethodInfo::new(&name, m))
                .collect(),
            name,
        }
    }

    /// Declared field by name
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared method by name and signature
    pub fn method(&self, key: &MemberKey) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == key.name && m.sig == key.sig)
    }

    /// Declared constructor by signature
    pub fn constructor(&self, sig: &MethodSig) -> Option<&MethodInfo> {
        self.constructors.iter().find(|m| &m.sig == sig)
    }

    /// Fields naming the instances of a fixed-instance-set type, in order
    pub fn enum_constants(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields
            .iter()
            .filter(|f| f.is_static() && f.modifiers.contains(Modifiers::ENUM_CONSTANT))
    }
}

/// Metadata cache of one scope, keyed by type name
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: DashMap<Arc<str>, Arc<TypeMetadata>>,
}

impl MetadataCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached metadata, when it was built from `version`
    pub fn get(&self, name: &str, version: u32) -> Option<Arc<TypeMetadata>> {
        self.entries
            .get(name)
            .filter(|entry| entry.version == version)
            .map(|entry| entry.clone())
    }

    /// Cache `metadata`
    pub fn insert(&self, metadata: Arc<TypeMetadata>) {
        self.entries.insert(metadata.name.clone(), metadata);
    }

    /// Drop cached metadata of `name`
    pub fn invalidate(&self, name: &str) {
        self.entries.remove(name);
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{FieldDef, Instr, MethodDef, UnitBuilder};

    fn descriptor() -> StructuralDescriptor {
        let unit = UnitBuilder::class("app.Shape")
            .field(FieldDef::new("sides", TypeSig::Int))
            .field(FieldDef::new("hidden", TypeSig::Int).with_modifiers(Modifiers::SYNTHETIC))
            .method(
                MethodDef::new("area", MethodSig::parse("()->f64").unwrap(), Modifiers::PUBLIC)
                    .with_code(vec![Instr::ConstFloat(1.0), Instr::ReturnValue]),
            )
            .default_constructor()
            .build();
        StructuralDescriptor::extract(&unit).unwrap()
    }

    #[test]
    fn test_metadata_hides_synthetic_members() {
        let meta = TypeMetadata::from_descriptor(&descriptor(), 3);
        assert_eq!(meta.version, 3);
        assert_eq!(meta.fields.len(), 1);
        assert!(meta.field("hidden").is_none());
        assert_eq!(meta.methods.len(), 1);
        assert_eq!(meta.constructors.len(), 1);
        assert_eq!(&*meta.methods[0].declaring, "app.Shape");
    }

    #[test]
    fn test_cache_is_version_checked() {
        let cache = MetadataCache::new();
        cache.insert(Arc::new(TypeMetadata::from_descriptor(&descriptor(), 1)));
        assert!(cache.get("app.Shape", 1).is_some());
        assert!(cache.get("app.Shape", 2).is_none());
        cache.invalidate("app.Shape");
        assert!(cache.is_empty());
    }
}
