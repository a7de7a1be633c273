//! Stable integer IDs for type names
//!
//! One `NameRegistry` is shared by every scope that should agree on IDs. The
//! process-wide instance is available through [`NameRegistry::global`], and
//! isolated instances can be created for tests or embedders.
//!
//! Lookups load an immutable snapshot through `ArcSwap` and never lock.
//! Allocation takes a narrow mutex, re-checks the snapshot, then publishes a
//! new snapshot with the added name.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Interned type identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Raw value, as embedded in engine instructions
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static GLOBAL: Lazy<Arc<NameRegistry>> = Lazy::new(|| Arc::new(NameRegistry::new()));

/// Monotonic name -> ID table
#[derive(Debug, Default)]
pub struct NameRegistry {
    ids: ArcSwap<FxHashMap<Arc<str>, TypeId>>,
    names: ArcSwap<Vec<Arc<str>>>,
    alloc_lock: Mutex<()>,
}

impl NameRegistry {
    /// Create an empty, isolated registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> Arc<NameRegistry> {
        GLOBAL.clone()
    }

    /// ID of `name`, allocating one on first sight
    pub fn id_for(&self, name: &str) -> TypeId {
        if let Some(id) = self.lookup(name) {
            return id;
        }

        let _guard = self.alloc_lock.lock();
        if let Some(id) = self.lookup(name) {
            return id;
        }

        let names = self.names.load_full();
        let id = TypeId(names.len() as u32);
        let name: Arc<str> = Arc::from(name);

        let mut next_names = Vec::with_capacity(names.len() + 1);
        next_names.extend(names.iter().cloned());
        next_names.push(name.clone());

        let mut next_ids = (**self.ids.load()).clone();
        next_ids.insert(name, id);

        // Names first: a reader that sees the ID must be able to resolve it.
        self.names.store(Arc::new(next_names));
        self.ids.store(Arc::new(next_ids));
        id
    }

    /// ID of `name` if one was ever allocated
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.ids.load().get(name).copied()
    }

    /// Name an ID was allocated for
    pub fn name_of(&self, id: TypeId) -> Option<Arc<str>> {
        self.names.load().get(id.0 as usize).cloned()
    }

    /// Number of allocated IDs
    pub fn len(&self) -> usize {
        self.names.load().len()
    }

    /// Whether no ID was allocated yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_ids_are_stable_and_distinct() {
        let registry = NameRegistry::new();
        let a = registry.id_for("app.A");
        let b = registry.id_for("app.B");
        assert_ne!(a, b);
        assert_eq!(registry.id_for("app.A"), a);
        assert_eq!(registry.name_of(b).as_deref(), Some("app.B"));
        assert_eq!(registry.lookup("app.C"), None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let registry = NameRegistry::new();
        let ids: Vec<_> = (0..10).map(|i| registry.id_for(&format!("app.T{}", i))).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_concurrent_allocation() {
        let registry = Arc::new(NameRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (0..50)
                        .map(|i| registry.id_for(&format!("app.T{}", i)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(registry.len(), 50);
    }

    #[test]
    fn test_isolated_registries() {
        let first = NameRegistry::new();
        let second = NameRegistry::new();
        first.id_for("app.X");
        assert_eq!(second.lookup("app.X"), None);
    }
}
