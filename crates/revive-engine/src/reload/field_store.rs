//! Keyed field storage replacing fixed-offset slots for managed types
//!
//! One store exists per instance (created lazily on the object) and one per
//! managed type for statics. Entries are keyed by declaring type, then field
//! name, so a subtype and a supertype may both own a field called `x`. Each
//! store has its own lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::unit::TypeSig;
use crate::vm::error::VmError;
use crate::vm::value::Value;

/// What to do when a stored value no longer fits its field's declared type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldIncompatibility {
    /// Drop the stored value and fall through to the default
    #[default]
    DiscardAndDefault,
    /// Fail the read with `FieldTypeMismatch`
    Error,
}

/// Where a read was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    /// Existing store entry
    Stored,
    /// Same-named field of an unmanaged ancestor
    Revealed,
    /// Zero-equivalent of the declared type
    Default,
}

/// Keyed field values of one instance or one type
#[derive(Debug, Default)]
pub struct FieldStore {
    entries: Mutex<FxHashMap<Arc<str>, FxHashMap<Arc<str>, Value>>>,
    discards: AtomicU64,
}

/// Per-instance store
pub type InstanceFieldStore = FieldStore;

/// Per-type store for static fields
pub type StaticFieldStore = FieldStore;

impl FieldStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `declaring.name`, declared as `sig`
    ///
    /// An existing entry whose value no longer conforms to `sig` is handled
    /// per `policy`. Absent entries are filled from `reveal` when it yields a
    /// conforming value, else from the zero-equivalent of `sig`; either way the
    /// result is cached.
    pub fn get(
        &self,
        declaring: &str,
        name: &str,
        sig: &TypeSig,
        policy: FieldIncompatibility,
        reveal: impl FnOnce() -> Option<Value>,
    ) -> Result<(Value, FieldSource), VmError> {
        {
            let mut entries = self.entries.lock();
            if let Some(fields) = entries.get_mut(declaring) {
                if let Some(value) = fields.get(name) {
                    if value.conforms_to(sig) {
                        return Ok((value.clone(), FieldSource::Stored));
                    }
                    match policy {
                        FieldIncompatibility::Error => {
                            return Err(VmError::FieldTypeMismatch {
                                owner: declaring.to_string(),
                                name: name.to_string(),
                                sig: sig.to_string(),
                            });
                        }
                        FieldIncompatibility::DiscardAndDefault => {
                            tracing::trace!(
                                owner = declaring,
                                field = name,
                                found = %value.type_name(),
                                declared = %sig,
                                "discarding stored value of incompatible type"
                            );
                            fields.remove(name);
                            self.discards.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
        }

        let (value, source) = match reveal().filter(|v| v.conforms_to(sig)) {
            Some(value) => (value, FieldSource::Revealed),
            None => (Value::default_for(sig), FieldSource::Default),
        };

        // a write that landed while the lock was released wins over the fill
        let mut entries = self.entries.lock();
        let fields = entries.entry(Arc::from(declaring)).or_default();
        match fields.get(name) {
            Some(stored) => Ok((stored.clone(), FieldSource::Stored)),
            None => {
                fields.insert(Arc::from(name), value.clone());
                Ok((value, source))
            }
        }
    }

    /// Write `declaring.name`
    pub fn set(&self, declaring: &str, name: &str, value: Value) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(declaring) {
            entries.insert(Arc::from(declaring), FxHashMap::default());
        }
        let Some(fields) = entries.get_mut(declaring) else {
            return;
        };
        match fields.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                fields.insert(Arc::from(name), value);
            }
        }
    }

    /// Whether an entry exists
    pub fn contains(&self, declaring: &str, name: &str) -> bool {
        self.entries
            .lock()
            .get(declaring)
            .is_some_and(|fields| fields.contains_key(name))
    }

    /// Remove an entry, returning its value
    pub fn remove(&self, declaring: &str, name: &str) -> Option<Value> {
        self.entries.lock().get_mut(declaring)?.remove(name)
    }

    /// Number of entries across all declaring types
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(|fields| fields.len()).sum()
    }

    /// Whether the store holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of values dropped for type incompatibility
    pub fn discards(&self) -> u64 {
        self.discards.load(Ordering::Relaxed)
    }
}

/// How a managed type's field is stored in its live version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPlacement {
    /// Original fixed slot of the host class
    Native,
    /// Keyed entry in a field store
    Store,
}

/// Placement of a field given its original and live declarations
///
/// A field keeps its native slot only while its name, type and static-ness
/// are unchanged from the originally defined version.
pub fn placement(
    original: Option<&crate::reload::descriptor::FieldDescriptor>,
    live: &crate::reload::descriptor::FieldDescriptor,
) -> FieldPlacement {
    match original {
        Some(orig) if orig.sig == live.sig && orig.is_static() == live.is_static() => FieldPlacement::Native,
        _ => FieldPlacement::Store,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::descriptor::FieldDescriptor;
    use crate::unit::Modifiers;

    #[test]
    fn test_absent_field_reads_default_and_caches() {
        let store = FieldStore::new();
        let (value, source) = store
            .get("app.A", "count", &TypeSig::Int, FieldIncompatibility::DiscardAndDefault, || None)
            .unwrap();
        assert_eq!(value, Value::Int(0));
        assert_eq!(source, FieldSource::Default);
        assert!(store.contains("app.A", "count"));
    }

    #[test]
    fn test_fill_does_not_overwrite_racing_write() {
        let store = FieldStore::new();
        let (value, source) = store
            .get("app.A", "x", &TypeSig::Int, FieldIncompatibility::DiscardAndDefault, || {
                // another thread writes while the reveal runs unlocked
                store.set("app.A", "x", Value::Int(5));
                None
            })
            .unwrap();
        assert_eq!(value, Value::Int(5));
        assert_eq!(source, FieldSource::Stored);

        let (again, _) = store
            .get("app.A", "x", &TypeSig::Int, FieldIncompatibility::DiscardAndDefault, || None)
            .unwrap();
        assert_eq!(again, Value::Int(5));
    }

    #[test]
    fn test_defaults_per_type() {
        let store = FieldStore::new();
        for (sig, expected) in [
            (TypeSig::Float, Value::Float(0.0)),
            (TypeSig::Bool, Value::Bool(false)),
            (TypeSig::Str, Value::Null),
        ] {
            let (value, _) = store
                .get("app.A", &sig.to_string(), &sig, FieldIncompatibility::DiscardAndDefault, || None)
                .unwrap();
            assert_eq!(value, expected);
        }
    }

    #[test]
    fn test_stored_value_returned() {
        let store = FieldStore::new();
        store.set("app.A", "name", Value::str("x"));
        let (value, source) = store
            .get("app.A", "name", &TypeSig::Str, FieldIncompatibility::Error, || None)
            .unwrap();
        assert_eq!(value, Value::str("x"));
        assert_eq!(source, FieldSource::Stored);
    }

    #[test]
    fn test_incompatible_value_discarded() {
        let store = FieldStore::new();
        store.set("app.A", "v", Value::Int(3));
        let (value, source) = store
            .get("app.A", "v", &TypeSig::Str, FieldIncompatibility::DiscardAndDefault, || None)
            .unwrap();
        assert_eq!(value, Value::Null);
        assert_eq!(source, FieldSource::Default);
        assert_eq!(store.discards(), 1);
    }

    #[test]
    fn test_incompatible_value_errors_under_strict_policy() {
        let store = FieldStore::new();
        store.set("app.A", "v", Value::Int(3));
        let result = store.get("app.A", "v", &TypeSig::Str, FieldIncompatibility::Error, || None);
        assert!(matches!(result, Err(VmError::FieldTypeMismatch { .. })));
        assert!(store.contains("app.A", "v"));
    }

    #[test]
    fn test_reveal_used_when_absent() {
        let store = FieldStore::new();
        let (value, source) = store
            .get("app.A", "v", &TypeSig::Int, FieldIncompatibility::DiscardAndDefault, || {
                Some(Value::Int(42))
            })
            .unwrap();
        assert_eq!(value, Value::Int(42));
        assert_eq!(source, FieldSource::Revealed);
    }

    #[test]
    fn test_same_name_different_declaring_types() {
        let store = FieldStore::new();
        store.set("app.A", "x", Value::Int(1));
        store.set("app.B", "x", Value::Int(2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.remove("app.A", "x"), Some(Value::Int(1)));
        assert!(store.contains("app.B", "x"));
    }

    #[test]
    fn test_placement() {
        let field = |sig: TypeSig, modifiers: Modifiers| FieldDescriptor {
            name: "x".to_string(),
            sig,
            modifiers,
            generic_signature: None,
            annotations: Vec::new(),
        };
        let original = field(TypeSig::Int, Modifiers::PRIVATE);
        assert_eq!(placement(Some(&original), &field(TypeSig::Int, Modifiers::PUBLIC)), FieldPlacement::Native);
        assert_eq!(placement(Some(&original), &field(TypeSig::Str, Modifiers::PRIVATE)), FieldPlacement::Store);
        assert_eq!(placement(Some(&original), &field(TypeSig::Int, Modifiers::STATIC)), FieldPlacement::Store);
        assert_eq!(placement(None, &original), FieldPlacement::Store);
    }
}
