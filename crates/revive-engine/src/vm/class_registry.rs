//! Class registry for one scope

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::vm::error::VmError;
use crate::vm::object::{Class, ClassSpec};

/// Defined classes of one scope, by name
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: RwLock<FxHashMap<Arc<str>, Arc<Class>>>,
    next_id: AtomicU32,
}

impl ClassRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a class; fails if the name is already taken
    pub fn define(&self, spec: ClassSpec) -> Result<Arc<Class>, VmError> {
        let mut classes = self.classes.write();
        if classes.contains_key(spec.unit.name.as_str()) {
            return Err(VmError::DuplicateClass(spec.unit.name.clone()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let class = Arc::new(Class::define(id, spec)?);
        classes.insert(class.name.clone(), class.clone());
        Ok(class)
    }

    /// Get class by name
    pub fn get(&self, name: &str) -> Option<Arc<Class>> {
        self.classes.read().get(name).cloned()
    }

    /// Get class by name or fail with `ClassNotFound`
    pub fn require(&self, name: &str) -> Result<Arc<Class>, VmError> {
        self.get(name).ok_or_else(|| VmError::ClassNotFound(name.to_string()))
    }

    /// Whether a class is defined
    pub fn contains(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    /// Number of defined classes
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    /// Whether no class is defined
    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }

    /// Snapshot of all defined classes
    pub fn classes(&self) -> Vec<Arc<Class>> {
        self.classes.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitBuilder;

    fn spec(name: &str) -> ClassSpec {
        ClassSpec::new(Arc::new(UnitBuilder::class(name).build()), None, Vec::new())
    }

    #[test]
    fn test_define_and_lookup() {
        let registry = ClassRegistry::new();
        let point = registry.define(spec("app.Point")).unwrap();
        let circle = registry.define(spec("app.Circle")).unwrap();
        assert_ne!(point.id, circle.id);
        assert_eq!(registry.get("app.Point").unwrap().id, point.id);
        assert_eq!(registry.len(), 2);
        assert!(matches!(registry.require("app.Missing"), Err(VmError::ClassNotFound(_))));
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = ClassRegistry::new();
        registry.define(spec("app.Point")).unwrap();
        assert!(matches!(registry.define(spec("app.Point")), Err(VmError::DuplicateClass(_))));
    }
}
