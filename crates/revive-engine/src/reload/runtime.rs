//! Live resolution and dispatch
//!
//! Everything here answers "what would a direct access do against the
//! current versions of every managed type", walking supertype chains through
//! live descriptors for managed classes and through host classes otherwise.
//! Guards call into this module only once some type in the scope has been
//! reloaded; before that, every guard falls through to the host instruction.

use std::sync::Arc;

use super::dispatch::DispatchEntry;
use super::field_store::FieldPlacement;
use super::names::TypeId;
use super::reloadable::ReloadableType;
use crate::scope::Scope;
use crate::unit::{FieldAccess, FieldRef, InvokeKind, MemberKey, MethodRef, Modifiers, TypeSig};
use crate::vm::error::{VmError, VmResult};
use crate::vm::interpreter::opcodes::objects::check_conforms;
use crate::vm::interpreter::Interpreter;
use crate::vm::object::{Class, MethodImpl, Object};
use crate::vm::value::Value;

/// A method resolved against live versions
#[derive(Debug, Clone)]
pub struct LiveMethod {
    /// Type the live definition belongs to
    pub declaring: Arc<str>,
    /// Modifiers as declared (before any widening)
    pub modifiers: Modifiers,
    /// Managed declaring type
    pub managed: Option<Arc<ReloadableType>>,
    /// Host method of the declaring class, when it has one
    pub host: Option<(Arc<Class>, Arc<MethodImpl>)>,
}

impl LiveMethod {
    /// Static method
    pub fn is_static(&self) -> bool {
        self.modifiers.is_static()
    }

    /// Abstract method
    pub fn is_abstract(&self) -> bool {
        self.modifiers.is_abstract()
    }
}

/// A field resolved against live versions
#[derive(Debug, Clone)]
pub struct LiveField {
    /// Declaring type
    pub declaring: Arc<str>,
    /// Field name
    pub name: Arc<str>,
    /// Live declared type
    pub sig: TypeSig,
    /// Live modifiers
    pub modifiers: Modifiers,
    /// Managed declaring type
    pub managed: Option<Arc<ReloadableType>>,
    /// Host class of the declaring type
    pub class: Arc<Class>,
    /// Storage used by the live version
    pub placement: FieldPlacement,
}

impl LiveField {
    /// Static field
    pub fn is_static(&self) -> bool {
        self.modifiers.is_static()
    }
}

/// How a guarded invocation proceeds
#[derive(Debug, Clone)]
pub enum InvokeRoute {
    /// The host instruction links to the same member
    Native,
    /// The engine performs the call
    Dynamic(LiveMethod),
}

/// How a guarded field access proceeds
#[derive(Debug, Clone)]
pub enum FieldRoute {
    /// The host instruction reaches the same storage
    Native,
    /// The engine performs the access
    Managed(LiveField),
}

fn managed_of(scope: &Scope, class: &Class) -> Option<Arc<ReloadableType>> {
    class.managed.and_then(|id| scope.types().get(id))
}

/// Next class up the chain: the live supertype for managed classes
fn next_in_chain(scope: &Scope, class: &Arc<Class>, managed: Option<&ReloadableType>) -> VmResult<Option<Arc<Class>>> {
    match managed {
        Some(rtype) => match &rtype.live().descriptor.super_name {
            Some(name) => scope.classes().require(name).map(Some),
            None => Ok(None),
        },
        None => Ok(class.super_class.clone()),
    }
}

/// Resolve `key` starting at `owner`: the class, its supertypes, then interfaces
///
/// Constructors and the static initializer are only looked up in `owner`.
pub fn resolve_method(scope: &Scope, owner: &Arc<Class>, key: &MemberKey) -> VmResult<Option<LiveMethod>> {
    let own_only = key.is_constructor() || key.is_static_init();
    let mut current = Some(owner.clone());
    while let Some(class) = current {
        let managed = managed_of(scope, &class);
        match &managed {
            Some(rtype) => {
                if let Some(method) = rtype.live().descriptor.method(key) {
                    return Ok(Some(LiveMethod {
                        declaring: class.name.clone(),
                        modifiers: method.modifiers,
                        host: class.declared_method(key).map(|m| (class.clone(), m.clone())),
                        managed: managed.clone(),
                    }));
                }
            }
            None => {
                if let Some(method) = class.declared_method(key) {
                    return Ok(Some(LiveMethod {
                        declaring: class.name.clone(),
                        modifiers: method.declared_modifiers,
                        host: Some((class.clone(), method.clone())),
                        managed: None,
                    }));
                }
            }
        }
        if own_only {
            return Ok(None);
        }
        current = next_in_chain(scope, &class, managed.as_deref())?;
    }
    Ok(owner
        .resolve_method(key)
        .filter(|(class, _)| class.is_interface())
        .map(|(class, method)| LiveMethod {
            declaring: class.name.clone(),
            modifiers: method.declared_modifiers,
            host: Some((class, method)),
            managed: None,
        }))
}

/// Resolve field `name` starting at `owner`
pub fn resolve_field(scope: &Scope, owner: &Arc<Class>, name: &str) -> VmResult<Option<LiveField>> {
    let mut current = Some(owner.clone());
    while let Some(class) = current {
        let managed = managed_of(scope, &class);
        match &managed {
            Some(rtype) => {
                if let Some(field) = rtype.live().descriptor.field(name) {
                    return Ok(Some(LiveField {
                        declaring: class.name.clone(),
                        name: Arc::from(name),
                        sig: field.sig.clone(),
                        modifiers: field.modifiers,
                        placement: rtype.field_placement(field),
                        managed: managed.clone(),
                        class,
                    }));
                }
            }
            None => {
                if let Some(field) = class.unit.fields.iter().find(|f| f.name == name) {
                    return Ok(Some(LiveField {
                        declaring: class.name.clone(),
                        name: Arc::from(name),
                        sig: field.sig.clone(),
                        modifiers: field.modifiers,
                        placement: FieldPlacement::Native,
                        managed: None,
                        class,
                    }));
                }
            }
        }
        if let Some(found) = class.interfaces.iter().find_map(|i| i.resolve_field(name)) {
            return Ok(Some(LiveField {
                declaring: found.slot.declaring.clone(),
                name: found.slot.name.clone(),
                sig: found.slot.sig.clone(),
                modifiers: found.slot.modifiers,
                placement: FieldPlacement::Native,
                managed: None,
                class: found.class,
            }));
        }
        current = next_in_chain(scope, &class, managed.as_deref())?;
    }
    Ok(None)
}

/// Same-named instance field of the nearest unmanaged ancestor, read from its native slot
fn reveal_inherited(scope: &Scope, object: &Object, name: &str, sig: &TypeSig) -> Option<Value> {
    object
        .class()
        .superclasses()
        .filter(|class| managed_of(scope, class).is_none())
        .find_map(|class| {
            let field = class.unit.fields.iter().find(|f| f.name == name && !f.is_static())?;
            if &field.sig != sig {
                return None;
            }
            object.get_slot(object.class().field_slot(&class.name, name)?)
        })
}

impl LiveField {
    /// Read the live value
    pub fn get(&self, interp: &mut Interpreter<'_>, receiver: Option<&Arc<Object>>) -> VmResult<Value> {
        let scope = interp.scope();
        let policy = scope.options().field_incompatibility;
        match (receiver, &self.managed) {
            (None, Some(rtype)) if self.placement == FieldPlacement::Store => {
                interp.ensure_initialized(&self.class)?;
                let (value, _) = rtype.statics().get(&self.declaring, &self.name, &self.sig, policy, || None)?;
                Ok(value)
            }
            (None, _) => {
                interp.ensure_initialized(&self.class)?;
                self.class
                    .static_fields()
                    .iter()
                    .position(|f| *f.name == *self.name)
                    .and_then(|index| self.class.get_static(index))
                    .ok_or_else(|| self.missing())
            }
            (Some(object), Some(_)) if self.placement == FieldPlacement::Store => {
                let (value, _) = object.field_store().get(&self.declaring, &self.name, &self.sig, policy, || {
                    reveal_inherited(scope, object, &self.name, &self.sig)
                })?;
                Ok(value)
            }
            (Some(object), _) => object
                .class()
                .field_slot(&self.declaring, &self.name)
                .and_then(|index| object.get_slot(index))
                .ok_or_else(|| self.missing()),
        }
    }

    /// Write the live value
    pub fn set(&self, interp: &mut Interpreter<'_>, receiver: Option<&Arc<Object>>, value: Value) -> VmResult<()> {
        check_conforms(&value, &self.sig)?;
        match (receiver, &self.managed) {
            (None, Some(rtype)) if self.placement == FieldPlacement::Store => {
                interp.ensure_initialized(&self.class)?;
                rtype.statics().set(&self.declaring, &self.name, value);
                Ok(())
            }
            (None, _) => {
                interp.ensure_initialized(&self.class)?;
                let index = self
                    .class
                    .static_fields()
                    .iter()
                    .position(|f| *f.name == *self.name)
                    .ok_or_else(|| self.missing())?;
                self.class.set_static(index, value)
            }
            (Some(object), Some(_)) if self.placement == FieldPlacement::Store => {
                object.field_store().set(&self.declaring, &self.name, value);
                Ok(())
            }
            (Some(object), _) => {
                let index = object
                    .class()
                    .field_slot(&self.declaring, &self.name)
                    .ok_or_else(|| self.missing())?;
                object.set_slot(index, value)
            }
        }
    }

    fn missing(&self) -> VmError {
        VmError::no_such_field(&self.declaring, &self.name, &self.sig)
    }
}

fn receiver_of<'v>(args: &'v [Value], what: &dyn std::fmt::Display) -> VmResult<&'v Arc<Object>> {
    match args.first() {
        Some(Value::Object(object)) => Ok(object),
        _ => Err(VmError::NullPointer(format!("receiver of {}", what))),
    }
}

impl<'s> Interpreter<'s> {
    /// Decide how a guarded invocation against `type_id` proceeds
    pub fn route_invoke(
        &mut self,
        caller: &Arc<Class>,
        type_id: TypeId,
        kind: InvokeKind,
        method: &MethodRef,
    ) -> VmResult<InvokeRoute> {
        let scope = self.scope();
        let types = scope.types();
        let epoch = types.epoch();
        if epoch == 0 {
            return Ok(InvokeRoute::Native);
        }
        let key = method.key();
        let cache_key = (type_id, kind, key.clone());
        let (live, native_ok) = match types.cached_route(&cache_key, epoch) {
            Some(cached) => cached,
            None => {
                let Some(owner) = scope.classes().get(&method.owner) else {
                    return Ok(InvokeRoute::Native);
                };
                let live = resolve_method(scope, &owner, &key)?
                    .ok_or_else(|| VmError::no_such_method(&method.owner, &method.name, &method.sig))?;
                let native_ok = match owner.resolve_method(&key) {
                    Some((class, host)) => {
                        host.is_static() == live.is_static()
                            && (matches!(kind, InvokeKind::Virtual | InvokeKind::Interface)
                                || class.name == live.declaring)
                    }
                    None => false,
                };
                types.cache_route(cache_key, epoch, live.clone(), native_ok);
                (live, native_ok)
            }
        };

        if live.is_static() != (kind == InvokeKind::Static) {
            return Err(VmError::IncompatibleClassChange(format!(
                "{} is {}a static method",
                method,
                if live.is_static() { "" } else { "not " }
            )));
        }
        self.check_access(caller, &live.declaring, live.modifiers, method)?;
        if native_ok {
            Ok(InvokeRoute::Native)
        } else {
            tracing::trace!(method = %method, declaring = %live.declaring, "dynamic invocation");
            Ok(InvokeRoute::Dynamic(live))
        }
    }

    /// Decide how a guarded field access against `type_id` proceeds
    pub fn route_field(&mut self, caller: &Arc<Class>, access: FieldAccess, field: &FieldRef) -> VmResult<FieldRoute> {
        let scope = self.scope();
        if scope.types().epoch() == 0 {
            return Ok(FieldRoute::Native);
        }
        let Some(owner) = scope.classes().get(&field.owner) else {
            return Ok(FieldRoute::Native);
        };
        let live = self.resolve_live_field(&owner, access, field)?;
        self.check_access(caller, &live.declaring, live.modifiers, field)?;

        let native_ok = live.placement == FieldPlacement::Native
            && owner.resolve_field(&field.name).is_some_and(|host| {
                *host.slot.declaring == *live.declaring
                    && host.is_static() == live.is_static()
                    && host.slot.sig == live.sig
            });
        if native_ok {
            Ok(FieldRoute::Native)
        } else {
            Ok(FieldRoute::Managed(live))
        }
    }

    /// Live field with the kind and type checks a direct access performs
    pub(crate) fn resolve_live_field(
        &self,
        owner: &Arc<Class>,
        access: FieldAccess,
        field: &FieldRef,
    ) -> VmResult<LiveField> {
        let live = resolve_field(self.scope(), owner, &field.name)?
            .ok_or_else(|| VmError::no_such_field(&field.owner, &field.name, &field.sig))?;
        if live.is_static() != access.is_static() {
            return Err(VmError::IncompatibleClassChange(format!(
                "{} is {}a static field",
                field,
                if live.is_static() { "" } else { "not " }
            )));
        }
        if live.sig != field.sig {
            return Err(VmError::no_such_field(&field.owner, &field.name, &field.sig));
        }
        Ok(live)
    }

    /// Perform a routed invocation
    pub fn invoke_dynamic(
        &mut self,
        caller: &Arc<Class>,
        kind: InvokeKind,
        method: &MethodRef,
        live: &LiveMethod,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        let key = method.key();
        match kind {
            InvokeKind::Static => self.call_resolved(live, &key, args),
            InvokeKind::Special => {
                if !key.is_constructor() {
                    let effective = self.effective_caller(caller);
                    if !effective.extends(&method.owner) {
                        return Err(VmError::IllegalAccess(format!(
                            "{} cannot make a non-virtual call to {}",
                            effective.name, method
                        )));
                    }
                }
                receiver_of(&args, method)?;
                self.call_resolved(live, &key, args)
            }
            InvokeKind::Virtual | InvokeKind::Interface => {
                let receiver = receiver_of(&args, method)?.class().clone();
                if !receiver.is_subtype_of(&method.owner) {
                    return Err(VmError::ClassCast {
                        found: receiver.name.to_string(),
                        target: method.owner.clone(),
                    });
                }
                if live.modifiers.is_private() {
                    return self.call_resolved(live, &key, args);
                }
                self.dispatch_virtual(&receiver, &key, args)?
                    .ok_or_else(|| VmError::AbstractMethod(format!("{}.{}", receiver.name, key)))
            }
        }
    }

    /// Call a resolved member non-virtually
    pub(crate) fn call_resolved(&mut self, live: &LiveMethod, key: &MemberKey, args: Vec<Value>) -> VmResult<Value> {
        if live.is_abstract() {
            return Err(VmError::AbstractMethod(format!("{}.{}", live.declaring, key)));
        }
        match (&live.managed, &live.host) {
            (Some(rtype), _) => self.call_live_member(rtype, key, args),
            (None, Some((class, method))) => self.invoke(class, method, args),
            (None, None) => Err(VmError::no_such_method(&live.declaring, &key.name, &key.sig)),
        }
    }

    /// Run the code the current version of `rtype` has for `key`
    pub fn call_live_member(&mut self, rtype: &Arc<ReloadableType>, key: &MemberKey, args: Vec<Value>) -> VmResult<Value> {
        let native = rtype
            .native()
            .cloned()
            .ok_or_else(|| VmError::ClassNotFound(rtype.name().to_string()))?;
        let version = rtype.live();
        match version.dispatch.lookup(key) {
            Some(DispatchEntry::Executor(method)) => {
                let executor = version
                    .executor()
                    .ok_or_else(|| VmError::no_such_method(rtype.name(), &key.name, &key.sig))?;
                if version.descriptor.method(key).is_some_and(|m| m.is_static()) {
                    self.ensure_initialized(&native)?;
                }
                self.invoke(executor, method, args)
            }
            Some(DispatchEntry::Abstract) => Err(VmError::AbstractMethod(format!("{}.{}", rtype.name(), key))),
            Some(DispatchEntry::Deleted) => Err(VmError::no_such_method(rtype.name(), &key.name, &key.sig)),
            Some(DispatchEntry::Original) | None => match native.declared_method(key) {
                Some(method) => {
                    let method = method.clone();
                    self.invoke(&native, &method, args)
                }
                None => Err(VmError::no_such_method(rtype.name(), &key.name, &key.sig)),
            },
        }
    }

    /// Select and run the live implementation of `key` for a receiver of class `start`
    ///
    /// Returns `None` when no concrete implementation exists.
    pub fn dispatch_virtual(&mut self, start: &Arc<Class>, key: &MemberKey, args: Vec<Value>) -> VmResult<Option<Value>> {
        let scope = self.scope();
        let mut current = Some(start.clone());
        while let Some(class) = current {
            let managed = managed_of(scope, &class);
            match &managed {
                Some(rtype) => {
                    let live = rtype.live();
                    if let Some(method) = live.descriptor.method(key) {
                        if !method.is_static() && !method.modifiers.is_private() {
                            if method.is_abstract() {
                                return Err(VmError::AbstractMethod(format!("{}.{}", class.name, key)));
                            }
                            return self.call_live_member(rtype, key, args).map(Some);
                        }
                    }
                }
                None => {
                    if let Some(method) = class.declared_method(key) {
                        if !method.is_static() && !method.modifiers.is_private() {
                            if method.is_abstract() {
                                return Err(VmError::AbstractMethod(format!("{}.{}", class.name, key)));
                            }
                            let method = method.clone();
                            return self.invoke(&class, &method, args).map(Some);
                        }
                    }
                }
            }
            current = next_in_chain(scope, &class, managed.as_deref())?;
        }
        Ok(None)
    }

    /// Call the implementation of `key` inherited by `rtype`'s live version
    pub fn invoke_super(&mut self, rtype: &ReloadableType, key: &MemberKey, args: Vec<Value>) -> VmResult<Value> {
        let scope = self.scope();
        let live = rtype.live();
        let Some(super_name) = &live.descriptor.super_name else {
            return Err(VmError::no_such_method(rtype.name(), &key.name, &key.sig));
        };
        let parent = scope.classes().require(super_name)?;
        match resolve_method(scope, &parent, key)? {
            Some(found) => self.call_resolved(&found, key, args),
            None => Err(VmError::no_such_method(super_name, &key.name, &key.sig)),
        }
    }

    /// Managed type named by an engine instruction
    pub(crate) fn managed_type(&self, type_id: u32) -> VmResult<Arc<ReloadableType>> {
        let types = self.scope().types();
        types.get(TypeId(type_id)).ok_or_else(|| {
            let name = types
                .names()
                .name_of(TypeId(type_id))
                .map_or_else(|| TypeId(type_id).to_string(), |n| n.to_string());
            VmError::ClassNotFound(name)
        })
    }

    /// Privileged non-virtual call of a live member of `rtype`
    pub fn invoke_special_live(&mut self, rtype: &Arc<ReloadableType>, method: &MethodRef, args: Vec<Value>) -> VmResult<Value> {
        let key = method.key();
        let live = rtype.live();
        let Some(descriptor) = live.descriptor.method(&key) else {
            return Err(VmError::no_such_method(&method.owner, &method.name, &method.sig));
        };
        if !descriptor.is_static() {
            receiver_of(&args, method)?;
        }
        self.call_live_member(rtype, &key, args)
    }
}
