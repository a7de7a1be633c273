//! Structural descriptors: the shape of one type version

use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::unit::{
    Annotation, CompiledUnit, FieldDef, MemberKey, MethodDef, MethodSig, Modifiers, TypeSig, UnitError,
};

/// Descriptor extraction errors
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// Bytes are not a well-formed unit
    #[error("Malformed unit: {0}")]
    Unit(#[from] UnitError),

    /// Unit decoded but does not describe a usable type
    #[error("Invalid type {name}: {reason}")]
    Invalid {
        /// Type name
        name: String,
        /// What is wrong
        reason: String,
    },
}

/// Shape of a field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Name
    pub name: String,
    /// Declared type
    pub sig: TypeSig,
    /// Modifiers
    pub modifiers: Modifiers,
    /// Generic signature
    pub generic_signature: Option<String>,
    /// Annotations
    pub annotations: Vec<Annotation>,
}

impl FieldDescriptor {
    fn from_def(def: &FieldDef) -> Self {
        Self {
            name: def.name.clone(),
            sig: def.sig.clone(),
            modifiers: def.modifiers,
            generic_signature: def.generic_signature.clone(),
            annotations: def.annotations.clone(),
        }
    }

    /// Static field
    pub fn is_static(&self) -> bool {
        self.modifiers.is_static()
    }

    /// Named instance of a fixed-instance-set type
    pub fn is_enum_constant(&self) -> bool {
        self.modifiers.contains(Modifiers::ENUM_CONSTANT)
    }
}

/// Shape of a method or constructor
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    /// Name
    pub name: String,
    /// Signature
    pub sig: MethodSig,
    /// Modifiers
    pub modifiers: Modifiers,
    /// Annotations
    pub annotations: Vec<Annotation>,
    /// Declared thrown types, sorted
    pub throws: Vec<String>,
    /// SHA-256 of the encoded instruction stream (`None` when abstract)
    pub code_digest: Option<[u8; 32]>,
}

impl MethodDescriptor {
    fn from_def(def: &MethodDef) -> Self {
        let mut throws = def.throws.clone();
        throws.sort();
        throws.dedup();
        let code_digest: Option<[u8; 32]> = (!def.code.is_empty()).then(|| Sha256::digest(def.code_bytes()).into());
        Self {
            name: def.name.clone(),
            sig: def.sig.clone(),
            modifiers: def.modifiers,
            annotations: def.annotations.clone(),
            throws,
            code_digest,
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

    /// Constructor
    pub fn is_constructor(&self) -> bool {
        self.key().is_constructor()
    }

    /// Static initializer
    pub fn is_static_init(&self) -> bool {
        self.key().is_static_init()
    }

    /// Has no body
    pub fn is_abstract(&self) -> bool {
        self.modifiers.is_abstract()
    }

    /// Whether another type's member could override or be selected in place of this one
    pub fn is_overridable(&self) -> bool {
        !self.is_static()
            && !self.modifiers.is_private()
            && !self.modifiers.is_final()
            && !self.is_constructor()
            && !self.is_static_init()
    }
}

/// Shape of one version of a type
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralDescriptor {
    /// Type name
    pub name: String,
    /// Supertype
    pub super_name: Option<String>,
    /// Interfaces, sorted
    pub interfaces: Vec<String>,
    /// Type modifiers
    pub modifiers: Modifiers,
    /// Type annotations
    pub annotations: Vec<Annotation>,
    /// Fields in declaration order
    pub fields: Vec<FieldDescriptor>,
    /// Methods and constructors in declaration order
    pub methods: Vec<MethodDescriptor>,
}

impl StructuralDescriptor {
    /// Decode `bytes` and extract the descriptor
    pub fn from_bytes(bytes: &[u8]) -> Result<(Arc<CompiledUnit>, Self), DescriptorError> {
        let unit = CompiledUnit::decode(bytes)?;
        let descriptor = Self::extract(&unit)?;
        Ok((Arc::new(unit), descriptor))
    }

    /// Extract the descriptor of a decoded unit
    pub fn extract(unit: &CompiledUnit) -> Result<Self, DescriptorError> {
        let invalid = |reason: &str| DescriptorError::Invalid {
            name: unit.name.clone(),
            reason: reason.to_string(),
        };
        if unit.name.is_empty() {
            return Err(invalid("empty type name"));
        }
        if unit.super_name.as_deref() == Some(unit.name.as_str()) {
            return Err(invalid("type extends itself"));
        }
        if unit.fields.iter().any(|f| f.sig == TypeSig::Void) {
            return Err(invalid("field of type void"));
        }

        let mut interfaces = unit.interfaces.clone();
        interfaces.sort();
        Ok(Self {
            name: unit.name.clone(),
            super_name: unit.super_name.clone(),
            interfaces,
            modifiers: unit.modifiers,
            annotations: unit.annotations.clone(),
            fields: unit.fields.iter().map(FieldDescriptor::from_def).collect(),
            methods: unit.methods.iter().map(MethodDescriptor::from_def).collect(),
        })
    }

    /// Interface type
    pub fn is_interface(&self) -> bool {
        self.modifiers.is_interface()
    }

    /// Fixed-instance-set type
    pub fn is_enum(&self) -> bool {
        self.modifiers.contains(Modifiers::ENUM)
    }

    /// Field by name
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Method by name and signature
    pub fn method(&self, key: &MemberKey) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == key.name && m.sig == key.sig)
    }

    /// Constructors in declaration order
    pub fn constructors(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.iter().filter(|m| m.is_constructor())
    }

    /// Methods other than constructors and the static initializer
    pub fn plain_methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.iter().filter(|m| !m.is_constructor() && !m.is_static_init())
    }

    /// Static initializer
    pub fn static_initializer(&self) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.is_static_init())
    }

    /// Enum constant fields in declaration order
    pub fn enum_constants(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_enum_constant())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{Instr, UnitBuilder};

    fn unit_with_body(value: i64) -> CompiledUnit {
        UnitBuilder::class("app.A")
            .implements("app.Z")
            .implements("app.Y")
            .field(FieldDef::new("x", TypeSig::Int))
            .method(
                MethodDef::new("get", MethodSig::parse("()->i64").unwrap(), Modifiers::PUBLIC)
                    .throwing("app.E2")
                    .throwing("app.E1")
                    .with_code(vec![Instr::ConstInt(value), Instr::ReturnValue]),
            )
            .build()
    }

    #[test]
    fn test_extract_normalizes_unordered_parts() {
        let descriptor = StructuralDescriptor::extract(&unit_with_body(1)).unwrap();
        assert_eq!(descriptor.interfaces, vec!["app.Y", "app.Z"]);
        let get = &descriptor.methods[0];
        assert_eq!(get.throws, vec!["app.E1", "app.E2"]);
        assert!(get.code_digest.is_some());
        assert!(get.is_overridable());
    }

    #[test]
    fn test_body_digest_tracks_code() {
        let a = StructuralDescriptor::extract(&unit_with_body(1)).unwrap();
        let b = StructuralDescriptor::extract(&unit_with_body(1)).unwrap();
        let c = StructuralDescriptor::extract(&unit_with_body(2)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.methods[0].code_digest, c.methods[0].code_digest);
    }

    #[test]
    fn test_malformed_bytes() {
        assert!(matches!(
            StructuralDescriptor::from_bytes(b"not a unit"),
            Err(DescriptorError::Unit(_))
        ));
    }

    #[test]
    fn test_self_extension_rejected() {
        let unit = UnitBuilder::class("app.A").extends("app.A").build();
        assert!(matches!(
            StructuralDescriptor::extract(&unit),
            Err(DescriptorError::Invalid { .. })
        ));
    }
}
