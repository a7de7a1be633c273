//! Scopes: isolated type namespaces
//!
//! A scope owns the host classes defined in it, the managed types registered
//! from them, and the reflection cache over both. Scopes share nothing but
//! the injected name registry, so independent scopes run fully concurrently.

use std::sync::Arc;

use crate::config::{ConfigError, EngineOptions};
use crate::reflect::introspection::Introspector;
use crate::reflect::metadata::MetadataCache;
use crate::reload::error::ReloadError;
use crate::reload::names::{NameRegistry, TypeId};
use crate::reload::observer::ReloadObserver;
use crate::reload::registry::TypeRegistry;
use crate::reload::reloadable::ReloadableType;
use crate::reload::rewriter::rewrite_call_sites;
use crate::reload::runtime::{resolve_field, resolve_method};
use crate::unit::{verify_unit, CompiledUnit, MemberKey, MethodSig};
use crate::vm::class_registry::ClassRegistry;
use crate::vm::error::{VmError, VmResult};
use crate::vm::interpreter::Interpreter;
use crate::vm::object::{Class, ClassSpec};
use crate::vm::value::Value;

/// An isolation boundary sharing one type namespace
pub struct Scope {
    options: EngineOptions,
    names: Arc<NameRegistry>,
    classes: ClassRegistry,
    types: TypeRegistry,
    metadata: MetadataCache,
}

impl Scope {
    /// Create a scope using the process-wide name registry
    pub fn new(options: EngineOptions) -> Result<Arc<Self>, ConfigError> {
        Self::with_names(options, NameRegistry::global())
    }

    /// Create a scope with an injected name registry
    pub fn with_names(options: EngineOptions, names: Arc<NameRegistry>) -> Result<Arc<Self>, ConfigError> {
        options.validate()?;
        let filter = options.type_filter()?;
        Ok(Arc::new_cyclic(|weak| Self {
            types: TypeRegistry::new(weak.clone(), names.clone(), options.clone(), filter),
            classes: ClassRegistry::new(),
            metadata: MetadataCache::new(),
            names,
            options,
        }))
    }

    /// Engine options
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Name registry
    pub fn names(&self) -> &NameRegistry {
        &self.names
    }

    /// Shared handle to the name registry, for creating sibling scopes
    pub fn name_registry(&self) -> Arc<NameRegistry> {
        self.names.clone()
    }

    /// Host classes
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// Managed types
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Reflection over this scope
    pub fn introspector(&self) -> Introspector<'_> {
        Introspector::new(self)
    }

    pub(crate) fn metadata_cache(&self) -> &MetadataCache {
        &self.metadata
    }

    /// A fresh interpreter running in this scope
    pub fn interpreter(&self) -> Interpreter<'_> {
        Interpreter::new(self)
    }

    /// Define a compiled unit
    ///
    /// Supertypes and interfaces must already be defined. Eligible units are
    /// registered as managed types and self-rewritten; every unit gets its
    /// call sites guarded. The class is statically initialized before return.
    pub fn define(&self, bytes: &[u8]) -> Result<Arc<Class>, ReloadError> {
        let unit = CompiledUnit::decode(bytes)?;
        verify_unit(&unit)?;
        if self.classes.contains(&unit.name) {
            return Err(VmError::DuplicateClass(unit.name.clone()).into());
        }
        let super_class = unit
            .super_name
            .as_deref()
            .map(|name| self.classes.require(name))
            .transpose()?;
        let interfaces = unit
            .interfaces
            .iter()
            .map(|name| self.classes.require(name))
            .collect::<Result<Vec<_>, _>>()?;
        let unit = Arc::new(unit);

        let class = if self.types.is_eligible(&unit) {
            let registration = self.types.add_type(bytes, unit, super_class.as_ref())?;
            let rtype = registration.reloadable;
            let mut spec = ClassSpec::new(Arc::new(registration.unit), super_class, interfaces);
            spec.managed = Some(rtype.id());
            spec.declared_access = registration.declared_access;
            let class = match self.classes.define(spec) {
                Ok(class) => class,
                Err(e) => {
                    self.types.remove(rtype.id());
                    return Err(e.into());
                }
            };
            rtype.bind_native(class.clone());
            class
        } else {
            let rewritten = rewrite_call_sites(&unit, &self.names, &self.options);
            self.classes
                .define(ClassSpec::new(Arc::new(rewritten), super_class, interfaces))?
        };

        self.interpreter().ensure_initialized(&class)?;
        Ok(class)
    }

    /// Define a unit that must become a managed type
    pub fn add_type(&self, bytes: &[u8]) -> Result<Arc<ReloadableType>, ReloadError> {
        let class = self.define(bytes)?;
        class
            .managed
            .and_then(|id| self.types.get(id))
            .ok_or_else(|| ReloadError::NotManaged(class.name.to_string()))
    }

    /// Managed type by name; `None` for types outside the managed universe
    pub fn reloadable_type(&self, name: &str) -> Option<Arc<ReloadableType>> {
        self.types.get_by_name(name)
    }

    /// Managed type by ID
    pub fn reloadable_type_by_id(&self, id: TypeId) -> Option<Arc<ReloadableType>> {
        self.types.get(id)
    }

    /// Load a new version of the managed type `name`
    pub fn reload(&self, name: &str, stamp: &str, bytes: &[u8]) -> Result<bool, ReloadError> {
        let rtype = self
            .reloadable_type(name)
            .ok_or_else(|| ReloadError::NotManaged(name.to_string()))?;
        rtype.load_new_version(stamp, bytes)
    }

    /// Register a reload observer
    pub fn add_observer(&self, observer: Arc<dyn ReloadObserver>) {
        self.types.add_observer(observer);
    }

    /// Construct an instance with the live constructor of signature `sig`
    pub fn new_instance(&self, type_name: &str, sig: &MethodSig, args: Vec<Value>) -> VmResult<Value> {
        self.introspector()
            .new_instance(type_name, sig, args)
            .map(Value::Object)
    }

    /// Virtual call of `name` on `receiver`, resolved against live versions
    pub fn invoke_virtual(&self, receiver: &Value, name: &str, sig: &MethodSig, args: Vec<Value>) -> VmResult<Value> {
        let object = receiver
            .as_object()
            .ok_or_else(|| VmError::NullPointer(format!("receiver of {}", name)))?;
        let key = MemberKey::new(name, sig.clone());
        let class = object.class().clone();
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(receiver.clone());
        full.extend(args);
        if let Some(value) = self.interpreter().dispatch_virtual(&class, &key, full)? {
            return Ok(value);
        }
        match resolve_method(self, &class, &key)? {
            Some(live) if live.is_static() => Err(VmError::IncompatibleClassChange(format!(
                "{}.{} is a static method",
                class.name, key
            ))),
            _ => Err(VmError::no_such_method(&class.name, name, sig)),
        }
    }

    /// Static call, resolved against live versions
    pub fn invoke_static(&self, type_name: &str, name: &str, sig: &MethodSig, args: Vec<Value>) -> VmResult<Value> {
        let class = self.classes.require(type_name)?;
        let key = MemberKey::new(name, sig.clone());
        let live = resolve_method(self, &class, &key)?
            .ok_or_else(|| VmError::no_such_method(type_name, name, sig))?;
        if !live.is_static() {
            return Err(VmError::IncompatibleClassChange(format!("{}.{} is not a static method", type_name, key)));
        }
        self.interpreter().call_resolved(&live, &key, args)
    }

    /// Read a static field of the live version
    pub fn get_static(&self, type_name: &str, field: &str) -> VmResult<Value> {
        self.require_static(type_name, field)?;
        self.introspector().get_field(type_name, field, None)
    }

    /// Write a static field of the live version
    pub fn set_static(&self, type_name: &str, field: &str, value: Value) -> VmResult<()> {
        self.require_static(type_name, field)?;
        self.introspector().set_field(type_name, field, None, value)
    }

    /// Read an instance field of the live version of `receiver`'s class
    pub fn get_field(&self, receiver: &Value, field: &str) -> VmResult<Value> {
        let object = receiver
            .as_object()
            .ok_or_else(|| VmError::NullPointer(format!("field access {}", field)))?;
        self.introspector().get_field(&object.class().name, field, Some(receiver))
    }

    /// Write an instance field of the live version of `receiver`'s class
    pub fn set_field(&self, receiver: &Value, field: &str, value: Value) -> VmResult<()> {
        let object = receiver
            .as_object()
            .ok_or_else(|| VmError::NullPointer(format!("field access {}", field)))?;
        self.introspector()
            .set_field(&object.class().name, field, Some(receiver), value)
    }

    fn require_static(&self, type_name: &str, field: &str) -> VmResult<()> {
        let class = self.classes.require(type_name)?;
        match resolve_field(self, &class, field)? {
            Some(live) if live.is_static() => Ok(()),
            Some(_) => Err(VmError::IncompatibleClassChange(format!(
                "{}.{} is not a static field",
                type_name, field
            ))),
            None => Err(VmError::no_such_field(type_name, field, &"*")),
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("classes", &self.classes.len())
            .field("types", &self.types)
            .finish()
    }
}
