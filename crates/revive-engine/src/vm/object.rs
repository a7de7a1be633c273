//! Object model and class system
//!
//! A `Class` is fixed at definition: its instance slot layout, static slots
//! and virtual table never change afterwards. Live updates work around that
//! through the per-object field store and the dispatch checks the engine
//! writes into method bodies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::reload::field_store::FieldStore;
use crate::reload::names::TypeId;
use crate::unit::{CompiledUnit, Instr, MemberKey, Modifiers, TypeSig, CONSTRUCTOR};
use crate::vm::error::VmError;
use crate::vm::value::Value;

/// Name every reference type is assignable to
pub const ROOT_CLASS: &str = "core.Object";

/// Global counter for generating unique object IDs
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

fn generate_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// One field slot in a class layout
#[derive(Debug, Clone)]
pub struct FieldSlot {
    /// Declaring type
    pub declaring: Arc<str>,
    /// Field name
    pub name: Arc<str>,
    /// Declared type
    pub sig: TypeSig,
    /// Modifiers
    pub modifiers: Modifiers,
}

/// A field resolved against a class hierarchy
#[derive(Debug, Clone)]
pub struct ResolvedField {
    /// Class declaring the field
    pub class: Arc<Class>,
    /// Instance slot index, or static slot index within `class`
    pub index: usize,
    /// Slot description
    pub slot: FieldSlot,
}

impl ResolvedField {
    /// Static field
    pub fn is_static(&self) -> bool {
        self.slot.modifiers.is_static()
    }
}

/// Executable method body bound to its declaring class
#[derive(Debug)]
pub struct MethodImpl {
    /// Name and signature
    pub key: MemberKey,
    /// Effective modifiers (after any widening)
    pub modifiers: Modifiers,
    /// Modifiers as originally declared
    pub declared_modifiers: Modifiers,
    /// Declaring type
    pub declaring: Arc<str>,
    /// Local slot count
    pub max_locals: u16,
    /// Instruction stream
    pub code: Arc<[Instr]>,
}

impl MethodImpl {
    /// Static method
    pub fn is_static(&self) -> bool {
        self.modifiers.is_static()
    }

    /// Abstract method
    pub fn is_abstract(&self) -> bool {
        self.modifiers.is_abstract()
    }

    /// Constructor
    pub fn is_constructor(&self) -> bool {
        self.key.is_constructor()
    }

    /// Number of argument values, receiver included
    pub fn arg_count(&self) -> usize {
        self.key.sig.arity() + usize::from(!self.is_static())
    }

    /// Whether a call produces a value
    pub fn returns_value(&self) -> bool {
        self.key.sig.ret != TypeSig::Void
    }
}

/// Inputs for defining a class
#[derive(Debug)]
pub struct ClassSpec {
    /// Unit to define (already rewritten, when rewriting applies)
    pub unit: Arc<CompiledUnit>,
    /// Resolved supertype
    pub super_class: Option<Arc<Class>>,
    /// Resolved interfaces
    pub interfaces: Vec<Arc<Class>>,
    /// Managed type this class is the host definition of
    pub managed: Option<TypeId>,
    /// Managed type a generated executor acts on behalf of
    pub stands_for: Option<TypeId>,
    /// Original modifiers of members whose access was widened
    pub declared_access: FxHashMap<MemberKey, Modifiers>,
}

impl ClassSpec {
    /// Plain definition without engine attributes
    pub fn new(unit: Arc<CompiledUnit>, super_class: Option<Arc<Class>>, interfaces: Vec<Arc<Class>>) -> Self {
        Self {
            unit,
            super_class,
            interfaces,
            managed: None,
            stands_for: None,
            declared_access: FxHashMap::default(),
        }
    }
}

/// Progress of a class's static initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Pending,
    Running(ThreadId),
    Done,
}

/// Class definition
#[derive(Debug)]
pub struct Class {
    /// Class ID within its registry
    pub id: u32,
    /// Fully qualified name
    pub name: Arc<str>,
    /// Supertype
    pub super_class: Option<Arc<Class>>,
    /// Implemented interfaces
    pub interfaces: Vec<Arc<Class>>,
    /// Type modifiers
    pub modifiers: Modifiers,
    /// The unit this class was defined from
    pub unit: Arc<CompiledUnit>,
    /// Managed type this class is the host definition of
    pub managed: Option<TypeId>,
    /// Managed type a generated executor acts on behalf of
    pub stands_for: Option<TypeId>,
    instance_fields: Vec<FieldSlot>,
    static_fields: Vec<FieldSlot>,
    static_values: Mutex<Vec<Value>>,
    methods: FxHashMap<MemberKey, Arc<MethodImpl>>,
    vtable: FxHashMap<MemberKey, Arc<MethodImpl>>,
    init_state: Mutex<InitState>,
    init_done: Condvar,
}

impl Class {
    /// Build a class from a definition spec
    pub fn define(id: u32, spec: ClassSpec) -> Result<Self, VmError> {
        let unit = spec.unit;
        let name: Arc<str> = Arc::from(unit.name.as_str());

        if let Some(parent) = &spec.super_class {
            if parent.modifiers.is_interface() {
                return Err(VmError::Link(format!("{} cannot extend interface {}", name, parent.name)));
            }
            if parent.modifiers.is_final() {
                return Err(VmError::Link(format!("{} cannot extend final {}", name, parent.name)));
            }
        }
        if let Some(iface) = spec.interfaces.iter().find(|i| !i.modifiers.is_interface()) {
            return Err(VmError::Link(format!("{} is not an interface", iface.name)));
        }

        let mut instance_fields = spec
            .super_class
            .as_ref()
            .map(|parent| parent.instance_fields.clone())
            .unwrap_or_default();
        let mut static_fields = Vec::new();
        for field in &unit.fields {
            let slot = FieldSlot {
                declaring: name.clone(),
                name: Arc::from(field.name.as_str()),
                sig: field.sig.clone(),
                modifiers: field.modifiers,
            };
            if field.is_static() {
                static_fields.push(slot);
            } else {
                instance_fields.push(slot);
            }
        }
        let static_values = static_fields.iter().map(|f| Value::default_for(&f.sig)).collect();

        let mut methods = FxHashMap::default();
        for def in &unit.methods {
            let key = def.key();
            let declared_modifiers = spec.declared_access.get(&key).copied().unwrap_or(def.modifiers);
            let method = Arc::new(MethodImpl {
                key: key.clone(),
                modifiers: def.modifiers,
                declared_modifiers,
                declaring: name.clone(),
                max_locals: def.max_locals,
                code: Arc::from(def.code.as_slice()),
            });
            methods.insert(key, method);
        }

        let mut vtable = spec
            .super_class
            .as_ref()
            .map(|parent| parent.vtable.clone())
            .unwrap_or_default();
        for (key, method) in &methods {
            if method.is_static() || method.is_constructor() || key.is_static_init() || method.modifiers.is_private() {
                continue;
            }
            if let Some(inherited) = vtable.get(key) {
                if inherited.modifiers.is_final() {
                    return Err(VmError::Link(format!(
                        "{}.{} overrides final method of {}",
                        name, key, inherited.declaring
                    )));
                }
            }
            vtable.insert(key.clone(), method.clone());
        }

        Ok(Self {
            id,
            name,
            super_class: spec.super_class,
            interfaces: spec.interfaces,
            modifiers: unit.modifiers,
            managed: spec.managed,
            stands_for: spec.stands_for,
            unit,
            instance_fields,
            static_fields,
            static_values: Mutex::new(static_values),
            methods,
            vtable,
            init_state: Mutex::new(InitState::Pending),
            init_done: Condvar::new(),
        })
    }

    /// Abstract class or interface
    pub fn is_abstract(&self) -> bool {
        self.modifiers.is_abstract() || self.modifiers.is_interface()
    }

    /// Interface
    pub fn is_interface(&self) -> bool {
        self.modifiers.is_interface()
    }

    /// Instance slot layout, inherited slots first
    pub fn instance_fields(&self) -> &[FieldSlot] {
        &self.instance_fields
    }

    /// Static slots declared by this class
    pub fn static_fields(&self) -> &[FieldSlot] {
        &self.static_fields
    }

    /// Method declared by this class
    pub fn declared_method(&self, key: &MemberKey) -> Option<&Arc<MethodImpl>> {
        self.methods.get(key)
    }

    /// Methods declared by this class
    pub fn declared_methods(&self) -> impl Iterator<Item = &Arc<MethodImpl>> {
        self.methods.values()
    }

    /// Virtual table entry
    pub fn vtable_lookup(&self, key: &MemberKey) -> Option<&Arc<MethodImpl>> {
        self.vtable.get(key)
    }

    /// Virtual table entries
    pub fn vtable(&self) -> impl Iterator<Item = (&MemberKey, &Arc<MethodImpl>)> {
        self.vtable.iter()
    }

    /// Supertypes, nearest first
    pub fn superclasses(&self) -> impl Iterator<Item = &Arc<Class>> {
        std::iter::successors(self.super_class.as_ref(), |c| c.super_class.as_ref())
    }

    /// Whether this class is `name` or extends/implements it
    pub fn is_subtype_of(&self, name: &str) -> bool {
        if &*self.name == name || name == ROOT_CLASS {
            return true;
        }
        if self.interfaces.iter().any(|i| i.is_subtype_of(name)) {
            return true;
        }
        self.super_class.as_ref().is_some_and(|parent| parent.is_subtype_of(name))
    }

    /// Whether this class strictly or reflexively extends `name` through the superclass chain
    pub fn extends(&self, name: &str) -> bool {
        &*self.name == name || self.superclasses().any(|c| &*c.name == name)
    }

    /// Class named `name` in this class's superclass chain (including itself)
    pub fn ancestor(self: &Arc<Self>, name: &str) -> Option<Arc<Class>> {
        if &*self.name == name {
            return Some(self.clone());
        }
        self.superclasses().find(|c| &*c.name == name).cloned()
    }

    /// Slot index of the instance field `name` declared by `declaring`
    pub fn field_slot(&self, declaring: &str, name: &str) -> Option<usize> {
        self.instance_fields
            .iter()
            .position(|f| &*f.declaring == declaring && &*f.name == name)
    }

    /// Resolve a field by name: this class, then interfaces, then supertypes
    pub fn resolve_field(self: &Arc<Self>, name: &str) -> Option<ResolvedField> {
        if let Some(index) = self.static_fields.iter().position(|f| &*f.name == name) {
            return Some(ResolvedField {
                class: self.clone(),
                index,
                slot: self.static_fields[index].clone(),
            });
        }
        if let Some(slot) = self.unit.fields.iter().find(|f| f.name == name && !f.is_static()) {
            let index = self.field_slot(&self.name, &slot.name)?;
            return Some(ResolvedField {
                class: self.clone(),
                index,
                slot: self.instance_fields[index].clone(),
            });
        }
        for iface in &self.interfaces {
            if let Some(found) = iface.resolve_field(name) {
                return Some(found);
            }
        }
        self.super_class.as_ref().and_then(|parent| parent.resolve_field(name))
    }

    /// Resolve a method: this class, then supertypes, then interfaces
    ///
    /// Constructors are only looked up in this class.
    pub fn resolve_method(self: &Arc<Self>, key: &MemberKey) -> Option<(Arc<Class>, Arc<MethodImpl>)> {
        if let Some(method) = self.methods.get(key) {
            return Some((self.clone(), method.clone()));
        }
        if key.is_constructor() || key.is_static_init() {
            return None;
        }
        if let Some(found) = self.super_class.as_ref().and_then(|p| p.resolve_method(key)) {
            return Some(found);
        }
        self.interfaces.iter().find_map(|i| i.resolve_method(key))
    }

    /// Read a static slot
    pub fn get_static(&self, index: usize) -> Option<Value> {
        self.static_values.lock().get(index).cloned()
    }

    /// Write a static slot
    pub fn set_static(&self, index: usize, value: Value) -> Result<(), VmError> {
        let mut values = self.static_values.lock();
        let slot = values
            .get_mut(index)
            .ok_or_else(|| VmError::InvalidInstruction(format!("static slot {} of {}", index, self.name)))?;
        *slot = value;
        Ok(())
    }

    /// Constructors declared by this class
    pub fn constructors(&self) -> impl Iterator<Item = &Arc<MethodImpl>> {
        self.methods.values().filter(|m| m.key.name == CONSTRUCTOR)
    }

    /// Claim static initialization for the calling thread
    ///
    /// Returns true when the caller must run the initializer and then call
    /// [`Class::finish_initialization`]. Returns false once initialization is
    /// done, or when the calling thread is already running it. A thread that
    /// finds another thread initializing blocks until that thread finishes.
    pub fn begin_initialization(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.init_state.lock();
        loop {
            match *state {
                InitState::Pending => {
                    *state = InitState::Running(me);
                    return true;
                }
                InitState::Running(owner) if owner == me => return false,
                InitState::Running(_) => self.init_done.wait(&mut state),
                InitState::Done => return false,
            }
        }
    }

    /// Mark static initialization finished and wake waiting threads
    pub fn finish_initialization(&self) {
        *self.init_state.lock() = InitState::Done;
        self.init_done.notify_all();
    }

    /// Whether static initialization has completed
    pub fn is_initialized(&self) -> bool {
        *self.init_state.lock() == InitState::Done
    }
}

/// Object instance
#[derive(Debug)]
pub struct Object {
    /// Unique object ID
    pub object_id: u64,
    class: Arc<Class>,
    slots: Mutex<Vec<Value>>,
    field_store: OnceCell<FieldStore>,
}

impl Object {
    /// Allocate an instance with every slot at its zero-equivalent
    pub fn new(class: Arc<Class>) -> Self {
        let slots = class
            .instance_fields
            .iter()
            .map(|f| Value::default_for(&f.sig))
            .collect();
        Self {
            object_id: generate_object_id(),
            class,
            slots: Mutex::new(slots),
            field_store: OnceCell::new(),
        }
    }

    /// Runtime class
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Read a native slot
    pub fn get_slot(&self, index: usize) -> Option<Value> {
        self.slots.lock().get(index).cloned()
    }

    /// Write a native slot
    pub fn set_slot(&self, index: usize, value: Value) -> Result<(), VmError> {
        let mut slots = self.slots.lock();
        let length = slots.len();
        let slot = slots.get_mut(index).ok_or(VmError::IndexOutOfBounds {
            index: index as i64,
            length,
        })?;
        *slot = value;
        Ok(())
    }

    /// Instance field store, created on first use
    pub fn field_store(&self) -> &FieldStore {
        self.field_store.get_or_init(FieldStore::new)
    }

    /// Instance field store, if one was ever created
    pub fn existing_field_store(&self) -> Option<&FieldStore> {
        self.field_store.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{FieldDef, MethodDef, MethodSig, UnitBuilder};

    fn define(unit: CompiledUnit, parent: Option<Arc<Class>>) -> Arc<Class> {
        Arc::new(Class::define(0, ClassSpec::new(Arc::new(unit), parent, Vec::new())).unwrap())
    }

    #[test]
    fn test_layout_inherited_first() {
        let base = define(
            UnitBuilder::class("app.Base").field(FieldDef::new("a", TypeSig::Int)).build(),
            None,
        );
        let derived = define(
            UnitBuilder::class("app.Derived")
                .extends("app.Base")
                .field(FieldDef::new("b", TypeSig::Str))
                .field(FieldDef::new("c", TypeSig::Int).with_modifiers(Modifiers::STATIC))
                .build(),
            Some(base),
        );
        let names: Vec<_> = derived.instance_fields().iter().map(|f| f.name.to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(derived.field_slot("app.Base", "a"), Some(0));
        assert_eq!(derived.static_fields().len(), 1);

        let resolved = derived.resolve_field("a").unwrap();
        assert_eq!(&*resolved.class.name, "app.Base");
        assert!(!resolved.is_static());
        assert!(derived.resolve_field("c").unwrap().is_static());
    }

    #[test]
    fn test_vtable_override() {
        let sig = MethodSig::parse("()->i64").unwrap();
        let body = |v| vec![Instr::ConstInt(v), Instr::ReturnValue];
        let base = define(
            UnitBuilder::class("app.Base")
                .method(MethodDef::new("get", sig.clone(), Modifiers::PUBLIC).with_code(body(1)))
                .build(),
            None,
        );
        let derived = define(
            UnitBuilder::class("app.Derived")
                .extends("app.Base")
                .method(MethodDef::new("get", sig.clone(), Modifiers::PUBLIC).with_code(body(2)))
                .build(),
            Some(base),
        );
        let key = MemberKey::new("get", sig);
        assert_eq!(&*derived.vtable_lookup(&key).unwrap().declaring, "app.Derived");
        assert!(derived.is_subtype_of("app.Base"));
        assert!(derived.is_subtype_of(ROOT_CLASS));
    }

    #[test]
    fn test_final_override_rejected() {
        let sig = MethodSig::void();
        let base = define(
            UnitBuilder::class("app.Base")
                .method(MethodDef::new("run", sig.clone(), Modifiers::PUBLIC | Modifiers::FINAL).with_code(vec![Instr::Return]))
                .build(),
            None,
        );
        let unit = UnitBuilder::class("app.Derived")
            .extends("app.Base")
            .method(MethodDef::new("run", sig, Modifiers::PUBLIC).with_code(vec![Instr::Return]))
            .build();
        let result = Class::define(1, ClassSpec::new(Arc::new(unit), Some(base), Vec::new()));
        assert!(matches!(result, Err(VmError::Link(_))));
    }

    #[test]
    fn test_object_slots_default() {
        let class = define(
            UnitBuilder::class("app.P")
                .field(FieldDef::new("x", TypeSig::Float))
                .field(FieldDef::new("s", TypeSig::Str))
                .build(),
            None,
        );
        let obj = Object::new(class);
        assert_eq!(obj.get_slot(0), Some(Value::Float(0.0)));
        assert_eq!(obj.get_slot(1), Some(Value::Null));
        assert!(obj.existing_field_store().is_none());
        obj.field_store();
        assert!(obj.existing_field_store().is_some());
    }

    #[test]
    fn test_initialization_waits_for_running_thread() {
        let class = define(UnitBuilder::class("app.Init").build(), None);
        assert!(class.begin_initialization());
        // re-entry from the initializing thread does not block
        assert!(!class.begin_initialization());
        assert!(!class.is_initialized());

        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let claimed = class.begin_initialization();
                (claimed, class.is_initialized())
            });
            std::thread::sleep(std::time::Duration::from_millis(20));
            class.finish_initialization();
            assert_eq!(waiter.join().unwrap(), (false, true));
        });
    }
}
