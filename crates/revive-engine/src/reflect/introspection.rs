//! Live-version-aware introspection
//!
//! The single path for reflective queries against a scope. Member lists come
//! from the live descriptor of a managed type, never from the host class it
//! was first defined as, and reflective reads, writes and calls go through
//! the same live resolution guarded call sites use. Reflection is privileged:
//! no access checks are applied.

use std::sync::Arc;

use super::metadata::{FieldInfo, MethodInfo, TypeMetadata};
use crate::reload::descriptor::StructuralDescriptor;
use crate::reload::runtime::{resolve_field, resolve_method, LiveField};
use crate::scope::Scope;
use crate::unit::{Annotation, MemberKey, MethodSig, Modifiers, CONSTRUCTOR};
use crate::vm::error::{VmError, VmResult};
use crate::vm::object::{Class, Object};
use crate::vm::value::Value;

/// Reflection over the types of one scope
#[derive(Clone, Copy)]
pub struct Introspector<'s> {
    scope: &'s Scope,
}

impl<'s> Introspector<'s> {
    pub(crate) fn new(scope: &'s Scope) -> Self {
        Self { scope }
    }

    /// Metadata of the current version of `type_name`
    pub fn metadata(&self, type_name: &str) -> VmResult<Arc<TypeMetadata>> {
        let class = self.scope.classes().require(type_name)?;
        let managed = class.managed.and_then(|id| self.scope.types().get(id));
        let version = managed.as_ref().map_or(0, |rtype| rtype.live().number);
        let cache = self.scope.metadata_cache();
        if let Some(cached) = cache.get(type_name, version) {
            return Ok(cached);
        }
        let metadata = match managed {
            Some(rtype) => {
                let live = rtype.live();
                TypeMetadata::from_descriptor(&live.descriptor, live.number)
            }
            None => {
                let descriptor = StructuralDescriptor::extract(&class.unit)
                    .map_err(|e| VmError::Link(format!("cannot describe {}: {}", type_name, e)))?;
                TypeMetadata::from_descriptor(&descriptor, 0)
            }
        };
        let metadata = Arc::new(metadata);
        cache.insert(metadata.clone());
        Ok(metadata)
    }

    /// Drop cached metadata of `type_name`
    pub fn invalidate(&self, type_name: &str) {
        self.scope.metadata_cache().invalidate(type_name);
    }

    /// Type modifiers
    pub fn modifiers(&self, type_name: &str) -> VmResult<Modifiers> {
        Ok(self.metadata(type_name)?.modifiers)
    }

    /// Type annotations
    pub fn annotations(&self, type_name: &str) -> VmResult<Vec<Annotation>> {
        Ok(self.metadata(type_name)?.annotations.clone())
    }

    /// Fields declared by `type_name`
    pub fn declared_fields(&self, type_name: &str) -> VmResult<Vec<FieldInfo>> {
        Ok(self.metadata(type_name)?.fields.clone())
    }

    /// Field declared by `type_name` or inherited by it
    pub fn field(&self, type_name: &str, name: &str) -> VmResult<Option<FieldInfo>> {
        let mut pending = vec![type_name.to_string()];
        while let Some(current) = pending.pop() {
            let metadata = self.metadata(&current)?;
            if let Some(field) = metadata.field(name) {
                return Ok(Some(field.clone()));
            }
            // supertype is searched after interfaces
            pending.extend(metadata.super_name.iter().cloned());
            pending.extend(metadata.interfaces.iter().rev().cloned());
        }
        Ok(None)
    }

    /// Methods declared by `type_name`
    pub fn declared_methods(&self, type_name: &str) -> VmResult<Vec<MethodInfo>> {
        Ok(self.metadata(type_name)?.methods.clone())
    }

    /// Method of `type_name` by name and signature, inherited ones included
    pub fn method(&self, type_name: &str, key: &MemberKey) -> VmResult<Option<MethodInfo>> {
        Ok(self.methods(type_name)?.into_iter().find(|m| m.name == key.name && m.sig == key.sig))
    }

    /// Every method of `type_name` and its supertypes, overridden ones omitted
    pub fn methods(&self, type_name: &str) -> VmResult<Vec<MethodInfo>> {
        let mut found: Vec<MethodInfo> = Vec::new();
        let mut pending = vec![type_name.to_string()];
        while let Some(current) = pending.pop() {
            let metadata = self.metadata(&current)?;
            for method in &metadata.methods {
                if !found.iter().any(|m| m.name == method.name && m.sig == method.sig) {
                    found.push(method.clone());
                }
            }
            pending.extend(metadata.interfaces.iter().rev().cloned());
            pending.extend(metadata.super_name.iter().cloned());
        }
        Ok(found)
    }

    /// Constructors of `type_name`
    pub fn constructors(&self, type_name: &str) -> VmResult<Vec<MethodInfo>> {
        Ok(self.metadata(type_name)?.constructors.clone())
    }

    /// Read a field; `receiver` is ignored for static fields
    pub fn get_field(&self, type_name: &str, name: &str, receiver: Option<&Value>) -> VmResult<Value> {
        let (field, object) = self.live_field(type_name, name, receiver)?;
        let mut interpreter = self.scope.interpreter();
        field.get(&mut interpreter, object.as_ref())
    }

    /// Write a field; `receiver` is ignored for static fields
    pub fn set_field(&self, type_name: &str, name: &str, receiver: Option<&Value>, value: Value) -> VmResult<()> {
        let (field, object) = self.live_field(type_name, name, receiver)?;
        let mut interpreter = self.scope.interpreter();
        field.set(&mut interpreter, object.as_ref(), value)
    }

    /// Invoke a method; instance methods take the receiver as the first argument
    /// and dispatch on its class
    pub fn invoke(&self, type_name: &str, key: &MemberKey, args: Vec<Value>) -> VmResult<Value> {
        let class = self.scope.classes().require(type_name)?;
        let live = resolve_method(self.scope, &class, key)?
            .ok_or_else(|| VmError::no_such_method(type_name, &key.name, &key.sig))?;
        let mut interpreter = self.scope.interpreter();
        if live.is_static() {
            return interpreter.call_resolved(&live, key, args);
        }
        let receiver = match args.first() {
            Some(Value::Object(object)) => object.class().clone(),
            _ => return Err(VmError::NullPointer(format!("receiver of {}.{}", type_name, key))),
        };
        if !receiver.is_subtype_of(type_name) {
            return Err(VmError::ClassCast {
                found: receiver.name.to_string(),
                target: type_name.to_string(),
            });
        }
        if live.modifiers.is_private() {
            return interpreter.call_resolved(&live, key, args);
        }
        interpreter
            .dispatch_virtual(&receiver, key, args)?
            .ok_or_else(|| VmError::AbstractMethod(format!("{}.{}", receiver.name, key)))
    }

    /// Allocate an instance and run the live constructor with `sig`
    pub fn new_instance(&self, type_name: &str, sig: &MethodSig, args: Vec<Value>) -> VmResult<Arc<Object>> {
        let class = self.scope.classes().require(type_name)?;
        let key = MemberKey::new(CONSTRUCTOR, sig.clone());
        let live = resolve_method(self.scope, &class, &key)?
            .ok_or_else(|| VmError::no_such_method(type_name, CONSTRUCTOR, sig))?;
        let mut interpreter = self.scope.interpreter();
        let object = interpreter.instantiate(type_name)?;
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Object(object.clone()));
        full.extend(args);
        interpreter.call_resolved(&live, &key, full)?;
        Ok(object)
    }

    /// Named instances of a fixed-instance-set type, in declaration order
    pub fn enum_constants(&self, type_name: &str) -> VmResult<Vec<Value>> {
        let metadata = self.metadata(type_name)?;
        if !metadata.modifiers.contains(Modifiers::ENUM) {
            return Err(VmError::IncompatibleClassChange(format!("{} is not an enumeration", type_name)));
        }
        metadata
            .enum_constants()
            .map(|field| self.get_field(type_name, &field.name, None))
            .collect()
    }

    fn live_field(
        &self,
        type_name: &str,
        name: &str,
        receiver: Option<&Value>,
    ) -> VmResult<(LiveField, Option<Arc<Object>>)> {
        let class: Arc<Class> = self.scope.classes().require(type_name)?;
        let field = resolve_field(self.scope, &class, name)?
            .ok_or_else(|| VmError::no_such_field(type_name, name, &"*"))?;
        if field.is_static() {
            return Ok((field, None));
        }
        let object = match receiver {
            Some(Value::Object(object)) => object.clone(),
            _ => return Err(VmError::NullPointer(format!("receiver of field {}.{}", type_name, name))),
        };
        if !object.class().is_subtype_of(type_name) {
            return Err(VmError::ClassCast {
                found: object.class().name.to_string(),
                target: type_name.to_string(),
            });
        }
        Ok((field, Some(object)))
    }
}

impl std::fmt::Debug for Introspector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Introspector")
            .field("cached", &self.scope.metadata_cache().len())
            .finish()
    }
}
