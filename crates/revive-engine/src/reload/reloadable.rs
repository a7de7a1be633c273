//! Managed types and their version history
//!
//! A `ReloadableType` is created once, when its unit is first defined in a
//! scope, and afterwards only grows: each accepted reload appends a
//! `LiveVersion` and publishes it through the type's dispatcher. Reloads of
//! one type are serialized by `reload_lock`; everything a running call reads
//! comes from the single version it loaded on entry.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

use super::descriptor::{FieldDescriptor, StructuralDescriptor};
use super::diff::IncrementalDescriptor;
use super::dispatch::{
    check_conformity, generate_contract, generate_executor, DispatchTable, Dispatcher, ExecutorContext,
    EXECUTOR_STATIC_INIT,
};
use super::error::ReloadError;
use super::field_store::{placement, FieldPlacement, FieldStore};
use super::names::TypeId;
use super::observer::ReloadEvent;
use super::rewriter::{SlotOrigin, SlotTable};
use crate::scope::Scope;
use crate::unit::{unit_digest, verify_unit, CompiledUnit, MemberKey, MethodSig, STATIC_INIT};
use crate::vm::error::VmError;
use crate::vm::object::{Class, ClassSpec};

/// Stamp of the version a type was first defined with
pub const ORIGINAL_STAMP: &str = "original";

/// Generated classes backing one version
#[derive(Debug)]
pub struct VersionArtifacts {
    /// Contract interface
    pub contract: Arc<Class>,
    /// Executor implementing the contract
    pub executor: Arc<Class>,
}

/// One published definition of a managed type
#[derive(Debug)]
pub struct LiveVersion {
    /// Position in the version history (0 = original)
    pub number: u32,
    /// Caller-supplied stamp
    pub stamp: Arc<str>,
    /// Compiled bytes
    pub bytes: Arc<[u8]>,
    /// Payload digest of `bytes`
    pub digest: Option<[u8; 32]>,
    /// Decoded unit
    pub unit: Arc<CompiledUnit>,
    /// Shape of this version
    pub descriptor: Arc<StructuralDescriptor>,
    /// Diff against the version it replaced
    pub delta: Option<IncrementalDescriptor>,
    /// Diff against the original, when not identical to it
    pub cumulative: Option<IncrementalDescriptor>,
    /// Contract and executor, when behavior differs from the original
    pub artifacts: Option<Arc<VersionArtifacts>>,
    /// Slot -> code table
    pub dispatch: DispatchTable,
    /// Whether publishing this version reran the static initializer
    pub rerun_static_init: bool,
}

impl LiveVersion {
    /// Whether this is the originally defined version
    pub fn is_original(&self) -> bool {
        self.number == 0
    }

    /// Hex form of the payload digest
    pub fn digest_hex(&self) -> Option<String> {
        self.digest.map(hex::encode)
    }

    /// Executor class of this version
    pub fn executor(&self) -> Option<&Arc<Class>> {
        self.artifacts.as_ref().map(|a| &a.executor)
    }
}

/// Point-in-time reload counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadStats {
    /// Accepted reloads
    pub reloads: u64,
    /// Reloads rejected by verification
    pub rejected: u64,
    /// Stamp of the last accepted reload
    pub last_stamp: Option<String>,
}

#[derive(Debug, Default)]
struct ReloadCounters {
    reloads: AtomicU64,
    rejected: AtomicU64,
    last_stamp: Mutex<Option<Arc<str>>>,
}

/// A type whose definition may change while code holding it keeps running
#[derive(Debug)]
pub struct ReloadableType {
    id: TypeId,
    name: Arc<str>,
    scope: Weak<Scope>,
    original: Arc<LiveVersion>,
    native: OnceCell<Arc<Class>>,
    super_type: OnceCell<Option<Arc<ReloadableType>>>,
    slots: Mutex<SlotTable>,
    versions: RwLock<Vec<Arc<LiveVersion>>>,
    dispatcher: OnceCell<Dispatcher>,
    statics: FieldStore,
    reload_lock: Mutex<()>,
    next_artifact: AtomicU32,
    counters: ReloadCounters,
}

impl ReloadableType {
    pub(crate) fn new(
        id: TypeId,
        scope: Weak<Scope>,
        bytes: Arc<[u8]>,
        unit: Arc<CompiledUnit>,
        descriptor: Arc<StructuralDescriptor>,
        slots: SlotTable,
    ) -> Self {
        let name: Arc<str> = Arc::from(unit.name.as_str());
        let original = Arc::new(LiveVersion {
            number: 0,
            stamp: Arc::from(ORIGINAL_STAMP),
            digest: unit_digest(&bytes),
            bytes,
            unit,
            descriptor,
            delta: None,
            cumulative: None,
            artifacts: None,
            dispatch: DispatchTable::original(&slots),
            rerun_static_init: false,
        });
        Self {
            id,
            name,
            scope,
            versions: RwLock::new(vec![original.clone()]),
            original,
            native: OnceCell::new(),
            super_type: OnceCell::new(),
            slots: Mutex::new(slots),
            dispatcher: OnceCell::new(),
            statics: FieldStore::new(),
            reload_lock: Mutex::new(()),
            next_artifact: AtomicU32::new(1),
            counters: ReloadCounters::default(),
        }
    }

    /// Stable ID
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning scope, while it is alive
    pub fn scope(&self) -> Option<Arc<Scope>> {
        self.scope.upgrade()
    }

    /// Host class defined from the self-rewritten original unit
    pub fn native(&self) -> Option<&Arc<Class>> {
        self.native.get()
    }

    pub(crate) fn bind_native(&self, class: Arc<Class>) {
        if self.native.set(class).is_err() {
            tracing::warn!(type_name = %self.name, "host class bound twice");
        }
    }

    /// The originally defined version
    pub fn original(&self) -> &Arc<LiveVersion> {
        &self.original
    }

    /// The currently published version
    pub fn live(&self) -> Arc<LiveVersion> {
        match self.dispatcher.get() {
            Some(dispatcher) => dispatcher.current(),
            None => self.original.clone(),
        }
    }

    /// Shape of the currently published version
    pub fn live_descriptor(&self) -> Arc<StructuralDescriptor> {
        self.live().descriptor.clone()
    }

    /// Version history, oldest first
    pub fn versions(&self) -> Vec<Arc<LiveVersion>> {
        self.versions.read().clone()
    }

    /// Number of recorded versions, the original included
    pub fn version_count(&self) -> usize {
        self.versions.read().len()
    }

    /// Dispatcher, once the type was reloaded
    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.get()
    }

    /// Whether any reload was published
    pub fn has_reloaded(&self) -> bool {
        self.dispatcher.get().is_some()
    }

    /// Static field store
    pub fn statics(&self) -> &FieldStore {
        &self.statics
    }

    /// Dispatch slot of a member
    pub fn slot_of(&self, key: &MemberKey) -> Option<u32> {
        self.slots.lock().slot_of(key)
    }

    /// Number of dispatch slots
    pub fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Managed supertype, resolved on first use
    pub fn super_type(&self) -> Option<Arc<ReloadableType>> {
        self.super_type
            .get_or_init(|| {
                let super_name = self.original.descriptor.super_name.as_deref()?;
                self.scope.upgrade()?.types().get_by_name(super_name)
            })
            .clone()
    }

    /// Placement of a field of the live version
    pub fn field_placement(&self, field: &FieldDescriptor) -> FieldPlacement {
        placement(self.original.descriptor.field(&field.name), field)
    }

    /// Reload counters
    pub fn stats(&self) -> ReloadStats {
        ReloadStats {
            reloads: self.counters.reloads.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            last_stamp: self.counters.last_stamp.lock().as_deref().map(str::to_string),
        }
    }

    /// Replace the live definition with `bytes`
    ///
    /// Returns `Ok(false)` when verification rejects the change; the previous
    /// version then stays authoritative.
    pub fn load_new_version(&self, stamp: &str, bytes: &[u8]) -> Result<bool, ReloadError> {
        let _guard = self.reload_lock.lock();
        let scope = self.scope.upgrade().ok_or(ReloadError::ScopeClosed)?;
        let native = self
            .native
            .get()
            .cloned()
            .ok_or_else(|| ReloadError::NotManaged(self.name.to_string()))?;

        let (unit, descriptor) = StructuralDescriptor::from_bytes(bytes)?;
        if unit.name != *self.name {
            return Err(ReloadError::NameMismatch {
                expected: self.name.to_string(),
                found: unit.name.clone(),
            });
        }
        verify_unit(&unit)?;

        let descriptor = Arc::new(descriptor);
        let current = self.live();
        let delta = IncrementalDescriptor::between(current.descriptor.clone(), descriptor.clone());
        let cumulative = IncrementalDescriptor::between(self.original.descriptor.clone(), descriptor.clone());

        if scope.options().verify_reloads {
            if let Err(reason) = self.check_safety(&native, &cumulative) {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(type_name = %self.name, stamp, %reason, "reload rejected");
                return Ok(false);
            }
        }

        let number = self.version_count() as u32;
        let event = ReloadEvent {
            type_name: &self.name,
            native: &native,
            stamp,
            version: number,
        };
        let observers = scope.types().observers();
        for observer in &observers {
            observer.before_reload(&event).map_err(|source| ReloadError::Observer {
                type_name: self.name.to_string(),
                source,
            })?;
        }

        let digest = unit_digest(bytes);
        let artifacts = if cumulative.is_empty() {
            None
        } else if digest.is_some() && digest == current.digest && current.artifacts.is_some() {
            current.artifacts.clone()
        } else {
            Some(self.define_artifacts(&scope, &native, &unit, &descriptor)?)
        };

        let dispatch = {
            let mut slots = self.slots.lock();
            for method in descriptor.methods.iter().filter(|m| !m.is_static_init()) {
                slots.assign(method.key(), SlotOrigin::Added);
            }
            DispatchTable::build(
                &self.name,
                &slots,
                &descriptor,
                (!cumulative.is_empty()).then_some(&cumulative),
                artifacts.as_ref().map(|a| &a.executor),
            )
        };

        let mut rerun = delta.static_init_changed();
        for observer in &observers {
            rerun |= observer.should_rerun_static_initializer(&event);
        }
        let redirected = dispatch.redirected();

        let version = Arc::new(LiveVersion {
            number,
            stamp: Arc::from(stamp),
            bytes: Arc::from(bytes),
            digest,
            unit,
            descriptor,
            delta: Some(delta),
            cumulative: (!cumulative.is_empty()).then_some(cumulative),
            artifacts,
            dispatch,
            rerun_static_init: rerun,
        });
        self.versions.write().push(version.clone());
        match self.dispatcher.get() {
            Some(dispatcher) => dispatcher.publish(version.clone()),
            None => {
                let _ = self.dispatcher.set(Dispatcher::new(self.name.clone(), version.clone()));
            }
        }
        scope.types().bump_epoch();
        scope.introspector().invalidate(&self.name);

        self.counters.reloads.fetch_add(1, Ordering::Relaxed);
        *self.counters.last_stamp.lock() = Some(version.stamp.clone());
        tracing::info!(
            type_name = %self.name,
            stamp,
            version = number,
            redirected,
            rerun_static_init = rerun,
            "published new version"
        );

        if rerun {
            self.rerun_static_init(&scope, &native, &version)?;
        }

        for observer in &observers {
            if let Err(source) = observer.after_reload(&event) {
                tracing::warn!(type_name = %self.name, stamp, error = %source, "post-reload observer failed");
                return Err(ReloadError::Observer {
                    type_name: self.name.to_string(),
                    source,
                });
            }
        }
        Ok(true)
    }

    /// Structural changes the host could not honor safely
    fn check_safety(&self, native: &Arc<Class>, cumulative: &IncrementalDescriptor) -> Result<(), String> {
        let latest = &cumulative.latest;
        if cumulative.supertype_changed {
            return Err(format!(
                "supertype changed from {:?} to {:?}",
                cumulative.original.super_name, latest.super_name
            ));
        }
        if cumulative.original.is_interface() != latest.is_interface() {
            return Err("class/interface kind changed".to_string());
        }
        let Some(parent) = &native.super_class else {
            return Ok(());
        };
        for method in latest.plain_methods() {
            if method.is_static() || method.modifiers.is_private() {
                continue;
            }
            let Some(inherited) = parent.vtable_lookup(&method.key()) else {
                continue;
            };
            if inherited.declared_modifiers.is_final() {
                return Err(format!("{} overrides final method of {}", method.key(), inherited.declaring));
            }
            if method.modifiers.visibility() > inherited.declared_modifiers.visibility() {
                return Err(format!(
                    "{} narrows visibility inherited from {}",
                    method.key(),
                    inherited.declaring
                ));
            }
        }
        Ok(())
    }

    fn define_artifacts(
        &self,
        scope: &Scope,
        native: &Arc<Class>,
        unit: &CompiledUnit,
        live: &StructuralDescriptor,
    ) -> Result<Arc<VersionArtifacts>, ReloadError> {
        let sequence = self.next_artifact.fetch_add(1, Ordering::Relaxed);
        let contract_unit = generate_contract(&self.name, sequence, live);
        let ctx = ExecutorContext {
            type_name: &self.name,
            type_id: self.id,
            host: native,
            live,
            names: scope.names(),
            options: scope.options(),
        };
        let executor_unit = generate_executor(&ctx, sequence, unit);
        check_conformity(&contract_unit, &executor_unit)?;

        let contract = scope
            .classes()
            .define(ClassSpec::new(Arc::new(contract_unit), None, Vec::new()))?;
        let mut spec = ClassSpec::new(Arc::new(executor_unit), None, vec![contract.clone()]);
        spec.stands_for = Some(self.id);
        let executor = scope.classes().define(spec)?;
        Ok(Arc::new(VersionArtifacts { contract, executor }))
    }

    fn rerun_static_init(&self, scope: &Scope, native: &Arc<Class>, version: &LiveVersion) -> Result<(), VmError> {
        if version.descriptor.static_initializer().is_none() {
            return Ok(());
        }
        let mut interpreter = scope.interpreter();
        let executor_key = MemberKey::new(EXECUTOR_STATIC_INIT, MethodSig::void());
        if let Some(executor) = version.executor() {
            if let Some(method) = executor.declared_method(&executor_key) {
                interpreter.invoke(executor, method, Vec::new())?;
                return Ok(());
            }
        }
        if let Some(method) = native.declared_method(&MemberKey::new(STATIC_INIT, MethodSig::void())) {
            interpreter.invoke(native, method, Vec::new())?;
        }
        Ok(())
    }
}
