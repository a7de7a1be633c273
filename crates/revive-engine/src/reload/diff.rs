//! Structural diff between two descriptors of the same type
//!
//! Fields are matched by name, so a type change is a change rather than a
//! remove+add. Methods are matched by name+signature. Ordering is ignored
//! except for enum constants, whose position is part of their identity.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::descriptor::{FieldDescriptor, MethodDescriptor, StructuralDescriptor};
use crate::unit::MemberKey;

/// What changed about a field that exists in both versions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldChange {
    /// Declared type or generic signature differs
    pub type_changed: bool,
    /// Modifiers differ
    pub access_changed: bool,
    /// Static/instance kind flipped
    pub static_flipped: bool,
    /// Annotations differ
    pub annotations_changed: bool,
}

impl FieldChange {
    fn between(old: &FieldDescriptor, new: &FieldDescriptor) -> Self {
        Self {
            type_changed: old.sig != new.sig || old.generic_signature != new.generic_signature,
            access_changed: old.modifiers != new.modifiers,
            static_flipped: old.is_static() != new.is_static(),
            annotations_changed: old.annotations != new.annotations,
        }
    }

    /// Whether anything changed
    pub fn any(&self) -> bool {
        self.type_changed || self.access_changed || self.annotations_changed
    }
}

/// What changed about a method that exists in the latest version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodChange {
    /// Not present in the earlier version
    pub added: bool,
    /// Instruction stream differs
    pub body_changed: bool,
    /// Modifiers differ
    pub access_changed: bool,
    /// Static/instance dispatch flipped
    pub static_flipped: bool,
    /// Thrown-exception set differs
    pub throws_changed: bool,
    /// Annotations differ
    pub annotations_changed: bool,
}

impl MethodChange {
    fn between(old: &MethodDescriptor, new: &MethodDescriptor) -> Self {
        Self {
            added: false,
            body_changed: old.code_digest != new.code_digest,
            access_changed: old.modifiers != new.modifiers,
            static_flipped: old.is_static() != new.is_static(),
            throws_changed: old.throws != new.throws,
            annotations_changed: old.annotations != new.annotations,
        }
    }

    /// Whether anything changed
    pub fn any(&self) -> bool {
        self.added || self.body_changed || self.access_changed || self.throws_changed || self.annotations_changed
    }
}

/// Changes between an earlier and a latest descriptor of one type
#[derive(Debug, Clone)]
pub struct IncrementalDescriptor {
    /// Earlier shape
    pub original: Arc<StructuralDescriptor>,
    /// Latest shape
    pub latest: Arc<StructuralDescriptor>,
    /// Fields only in the latest version
    pub added_fields: Vec<String>,
    /// Fields only in the earlier version
    pub removed_fields: Vec<String>,
    /// Fields present in both versions that changed
    pub changed_fields: Vec<(String, FieldChange)>,
    /// Methods added or changed, keyed by name+signature
    pub added_or_changed_methods: Vec<(MemberKey, MethodChange)>,
    /// Methods only in the earlier version
    pub deleted_methods: Vec<MemberKey>,
    /// Supertype differs
    pub supertype_changed: bool,
    /// Interface set differs
    pub interfaces_changed: bool,
    /// Type modifiers differ
    pub type_modifiers_changed: bool,
    /// Type annotations differ
    pub type_annotations_changed: bool,
    /// Ordered enum constant names differ
    pub enum_constants_changed: bool,
}

impl IncrementalDescriptor {
    /// Diff `latest` against `original`
    pub fn between(original: Arc<StructuralDescriptor>, latest: Arc<StructuralDescriptor>) -> Self {
        let old_fields: FxHashMap<&str, &FieldDescriptor> =
            original.fields.iter().map(|f| (f.name.as_str(), f)).collect();
        let new_fields: FxHashMap<&str, &FieldDescriptor> =
            latest.fields.iter().map(|f| (f.name.as_str(), f)).collect();

        let mut added_fields = Vec::new();
        let mut changed_fields = Vec::new();
        for field in &latest.fields {
            match old_fields.get(field.name.as_str()) {
                None => added_fields.push(field.name.clone()),
                Some(old) => {
                    let change = FieldChange::between(old, field);
                    if change.any() {
                        changed_fields.push((field.name.clone(), change));
                    }
                }
            }
        }
        let removed_fields = original
            .fields
            .iter()
            .filter(|f| !new_fields.contains_key(f.name.as_str()))
            .map(|f| f.name.clone())
            .collect();

        let old_methods: FxHashMap<MemberKey, &MethodDescriptor> =
            original.methods.iter().map(|m| (m.key(), m)).collect();
        let new_methods: FxHashMap<MemberKey, &MethodDescriptor> =
            latest.methods.iter().map(|m| (m.key(), m)).collect();

        let mut added_or_changed_methods = Vec::new();
        for method in &latest.methods {
            let key = method.key();
            let change = match old_methods.get(&key) {
                None => MethodChange {
                    added: true,
                    ..MethodChange::default()
                },
                Some(old) => MethodChange::between(old, method),
            };
            if change.any() {
                added_or_changed_methods.push((key, change));
            }
        }
        let deleted_methods = original
            .methods
            .iter()
            .map(MethodDescriptor::key)
            .filter(|key| !new_methods.contains_key(key))
            .collect();

        let enum_constants_changed = !original
            .enum_constants()
            .map(|f| f.name.as_str())
            .eq(latest.enum_constants().map(|f| f.name.as_str()));

        Self {
            supertype_changed: original.super_name != latest.super_name,
            interfaces_changed: original.interfaces != latest.interfaces,
            type_modifiers_changed: original.modifiers != latest.modifiers,
            type_annotations_changed: original.annotations != latest.annotations,
            enum_constants_changed,
            added_fields,
            removed_fields,
            changed_fields,
            added_or_changed_methods,
            deleted_methods,
            original,
            latest,
        }
    }

    /// Whether the two shapes are structurally identical
    pub fn is_empty(&self) -> bool {
        !self.has_changes()
    }

    /// Whether anything differs
    pub fn has_changes(&self) -> bool {
        !self.added_fields.is_empty()
            || !self.removed_fields.is_empty()
            || !self.changed_fields.is_empty()
            || !self.added_or_changed_methods.is_empty()
            || !self.deleted_methods.is_empty()
            || self.supertype_changed
            || self.interfaces_changed
            || self.type_modifiers_changed
            || self.type_annotations_changed
            || self.enum_constants_changed
    }

    /// Change record of a method present in the latest version
    pub fn method_change(&self, key: &MemberKey) -> Option<&MethodChange> {
        self.added_or_changed_methods
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, change)| change)
    }

    /// Whether the method exists in the latest version with a different body or shape
    pub fn is_method_changed(&self, key: &MemberKey) -> bool {
        self.method_change(key).is_some()
    }

    /// Whether the method existed earlier and is gone now
    pub fn is_method_deleted(&self, key: &MemberKey) -> bool {
        self.deleted_methods.contains(key)
    }

    /// Change record of a field present in both versions
    pub fn field_change(&self, name: &str) -> Option<&FieldChange> {
        self.changed_fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, change)| change)
    }

    /// Methods whose static/instance dispatch flipped
    pub fn static_flipped_methods(&self) -> impl Iterator<Item = &MemberKey> {
        self.added_or_changed_methods
            .iter()
            .filter(|(_, change)| change.static_flipped)
            .map(|(key, _)| key)
    }

    /// Whether the static initializer was added, removed or changed
    pub fn static_init_changed(&self) -> bool {
        self.added_or_changed_methods.iter().any(|(key, _)| key.is_static_init())
            || self.deleted_methods.iter().any(MemberKey::is_static_init)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{
        CompiledUnit, FieldDef, Instr, MethodDef, MethodSig, Modifiers, TypeSig, UnitBuilder,
    };

    fn describe(unit: &CompiledUnit) -> Arc<StructuralDescriptor> {
        Arc::new(StructuralDescriptor::extract(unit).unwrap())
    }

    fn getter(value: i64) -> MethodDef {
        MethodDef::new("get", MethodSig::parse("()->i64").unwrap(), Modifiers::PUBLIC)
            .with_code(vec![Instr::ConstInt(value), Instr::ReturnValue])
    }

    #[test]
    fn test_identical_shapes_have_no_changes() {
        let unit = UnitBuilder::class("app.A")
            .field(FieldDef::new("x", TypeSig::Int))
            .method(getter(5))
            .build();
        let diff = IncrementalDescriptor::between(describe(&unit), describe(&unit));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_member_order_is_irrelevant() {
        let a = UnitBuilder::class("app.A")
            .field(FieldDef::new("x", TypeSig::Int))
            .field(FieldDef::new("y", TypeSig::Int))
            .build();
        let b = UnitBuilder::class("app.A")
            .field(FieldDef::new("y", TypeSig::Int))
            .field(FieldDef::new("x", TypeSig::Int))
            .build();
        assert!(IncrementalDescriptor::between(describe(&a), describe(&b)).is_empty());
    }

    #[test]
    fn test_field_classification() {
        let old = UnitBuilder::class("app.A")
            .field(FieldDef::new("kept", TypeSig::Int))
            .field(FieldDef::new("retyped", TypeSig::Int))
            .field(FieldDef::new("gone", TypeSig::Int))
            .field(FieldDef::new("flipped", TypeSig::Int).with_modifiers(Modifiers::STATIC))
            .build();
        let new = UnitBuilder::class("app.A")
            .field(FieldDef::new("kept", TypeSig::Int))
            .field(FieldDef::new("retyped", TypeSig::Str))
            .field(FieldDef::new("fresh", TypeSig::Bool))
            .field(FieldDef::new("flipped", TypeSig::Int))
            .build();
        let diff = IncrementalDescriptor::between(describe(&old), describe(&new));
        assert_eq!(diff.added_fields, vec!["fresh"]);
        assert_eq!(diff.removed_fields, vec!["gone"]);
        assert!(diff.field_change("retyped").unwrap().type_changed);
        let flipped = diff.field_change("flipped").unwrap();
        assert!(flipped.static_flipped && flipped.access_changed);
        assert!(diff.field_change("kept").is_none());
    }

    #[test]
    fn test_method_classification() {
        let old = UnitBuilder::class("app.A")
            .method(getter(5))
            .method(
                MethodDef::new("old", MethodSig::void(), Modifiers::PUBLIC).with_code(vec![Instr::Return]),
            )
            .build();
        let new = UnitBuilder::class("app.A")
            .method(getter(7))
            .method(
                MethodDef::new("fresh", MethodSig::void(), Modifiers::PUBLIC).with_code(vec![Instr::Return]),
            )
            .build();
        let diff = IncrementalDescriptor::between(describe(&old), describe(&new));
        let get = MemberKey::new("get", MethodSig::parse("()->i64").unwrap());
        assert!(diff.method_change(&get).unwrap().body_changed);
        assert!(diff.method_change(&MemberKey::new("fresh", MethodSig::void())).unwrap().added);
        assert!(diff.is_method_deleted(&MemberKey::new("old", MethodSig::void())));
        assert!(!diff.static_init_changed());
    }

    #[test]
    fn test_enum_constant_order_matters() {
        let constant = |name: &str| {
            FieldDef::new(name, TypeSig::reference("app.Color"))
                .with_modifiers(Modifiers::PUBLIC | Modifiers::STATIC | Modifiers::FINAL | Modifiers::ENUM_CONSTANT)
        };
        let a = UnitBuilder::enumeration("app.Color").field(constant("RED")).field(constant("GREEN")).build();
        let b = UnitBuilder::enumeration("app.Color").field(constant("GREEN")).field(constant("RED")).build();
        let diff = IncrementalDescriptor::between(describe(&a), describe(&b));
        assert!(diff.enum_constants_changed);
        assert!(diff.has_changes());
    }
}
