//! Managed types of one scope
//!
//! The registry owns every `ReloadableType` by ID, the reload observers, and
//! the reload epoch. The epoch starts at zero and is bumped on every
//! published reload; guards treat epoch zero as "nothing has changed yet" and
//! cache their routing decisions stamped with the epoch they were made in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::descriptor::StructuralDescriptor;
use super::error::ReloadError;
use super::names::{NameRegistry, TypeId};
use super::observer::ReloadObserver;
use super::reloadable::ReloadableType;
use super::rewriter::{rewrite_call_sites, self_rewrite};
use super::runtime::LiveMethod;
use crate::config::{EngineOptions, TypeFilter};
use crate::scope::Scope;
use crate::unit::{flags, CompiledUnit, InvokeKind, MemberKey, Modifiers};
use crate::vm::object::Class;

type RouteKey = (TypeId, InvokeKind, MemberKey);

#[derive(Debug, Clone)]
struct CachedRoute {
    epoch: u64,
    live: LiveMethod,
    native_ok: bool,
}

/// A newly registered managed type and the unit to define its host class from
#[derive(Debug)]
pub(crate) struct Registration {
    pub reloadable: Arc<ReloadableType>,
    pub unit: CompiledUnit,
    pub declared_access: FxHashMap<MemberKey, Modifiers>,
}

/// Registry of managed types
pub struct TypeRegistry {
    scope: Weak<Scope>,
    names: Arc<NameRegistry>,
    options: EngineOptions,
    filter: TypeFilter,
    by_id: DashMap<TypeId, Arc<ReloadableType>>,
    observers: RwLock<Vec<Arc<dyn ReloadObserver>>>,
    epoch: AtomicU64,
    routes: DashMap<RouteKey, CachedRoute>,
}

impl TypeRegistry {
    pub(crate) fn new(scope: Weak<Scope>, names: Arc<NameRegistry>, options: EngineOptions, filter: TypeFilter) -> Self {
        Self {
            scope,
            names,
            options,
            filter,
            by_id: DashMap::new(),
            observers: RwLock::new(Vec::new()),
            epoch: AtomicU64::new(0),
            routes: DashMap::new(),
        }
    }

    /// Name -> ID registry shared by this scope
    pub fn names(&self) -> &NameRegistry {
        &self.names
    }

    /// Whether a unit may become a managed type
    pub fn is_eligible(&self, unit: &CompiledUnit) -> bool {
        unit.flags & (flags::EXECUTOR | flags::CONTRACT) == 0
            && !unit.is_interface()
            && !unit.modifiers.contains(Modifiers::SYNTHETIC)
            && !self.options.is_system_type(&unit.name)
            && self.filter.is_eligible(&unit.name)
    }

    /// Register `unit` (decoded from `bytes`) and rewrite it for management
    pub(crate) fn add_type(
        &self,
        bytes: &[u8],
        unit: Arc<CompiledUnit>,
        super_class: Option<&Arc<Class>>,
    ) -> Result<Registration, ReloadError> {
        let id = self.names.id_for(&unit.name);
        let descriptor = Arc::new(StructuralDescriptor::extract(&unit)?);
        let guarded = rewrite_call_sites(&unit, &self.names, &self.options);
        let rewrite = self_rewrite(&guarded, id, super_class);

        let slot = match self.by_id.entry(id) {
            Entry::Occupied(_) => return Err(ReloadError::DuplicateType(unit.name.clone())),
            Entry::Vacant(slot) => slot,
        };
        let reloadable = Arc::new(ReloadableType::new(
            id,
            self.scope.clone(),
            Arc::from(bytes),
            unit,
            descriptor,
            rewrite.slots,
        ));
        slot.insert(reloadable.clone());
        tracing::debug!(type_name = reloadable.name(), id = %id, "registered managed type");

        Ok(Registration {
            reloadable,
            unit: rewrite.unit,
            declared_access: rewrite.declared_access,
        })
    }

    /// Drop a registration whose host class could not be defined
    pub(crate) fn remove(&self, id: TypeId) -> Option<Arc<ReloadableType>> {
        self.by_id.remove(&id).map(|(_, rtype)| rtype)
    }

    /// Managed type by ID
    pub fn get(&self, id: TypeId) -> Option<Arc<ReloadableType>> {
        self.by_id.get(&id).map(|entry| entry.clone())
    }

    /// Managed type by name
    pub fn get_by_name(&self, name: &str) -> Option<Arc<ReloadableType>> {
        self.names.lookup(name).and_then(|id| self.get(id))
    }

    /// Snapshot of all managed types, by ID
    pub fn types(&self) -> Vec<Arc<ReloadableType>> {
        let mut types: Vec<_> = self.by_id.iter().map(|entry| entry.value().clone()).collect();
        types.sort_by_key(|rtype| rtype.id());
        types
    }

    /// Number of managed types
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no type is managed
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Register an observer notified on every reload in this scope
    pub fn add_observer(&self, observer: Arc<dyn ReloadObserver>) {
        self.observers.write().push(observer);
    }

    /// Snapshot of the registered observers
    pub fn observers(&self) -> Vec<Arc<dyn ReloadObserver>> {
        self.observers.read().clone()
    }

    /// Number of reloads published in this scope
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.routes.clear();
    }

    pub(crate) fn cached_route(&self, key: &RouteKey, epoch: u64) -> Option<(LiveMethod, bool)> {
        let cached = self.routes.get(key)?;
        (cached.epoch == epoch).then(|| (cached.live.clone(), cached.native_ok))
    }

    pub(crate) fn cache_route(&self, key: RouteKey, epoch: u64, live: LiveMethod, native_ok: bool) {
        self.routes.insert(key, CachedRoute { epoch, live, native_ok });
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.by_id.len())
            .field("observers", &self.observers.read().len())
            .field("epoch", &self.epoch())
            .finish()
    }
}
