//! Dispatch indirection: per-version dispatch tables, the stable dispatcher,
//! and the generated catcher, super-dispatcher, contract and executor code.
//!
//! Each reload that changes behavior produces two units:
//!
//! - a contract interface `T$$I<n>` listing every live member with the
//!   receiver as an explicit first parameter, and
//! - an executor `T$$E<n>` implementing that contract with static methods
//!   compiled from the new bytes, own-member accesses turned into privileged
//!   dynamic instructions resolved against the live version.
//!
//! The dispatcher is created on the first reload and never replaced; it holds
//! the atomically swapped pointer to the current version, whose dispatch
//! table maps each slot of the type to the code that now runs for it.

use std::sync::Arc;

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;

use super::descriptor::{MethodDescriptor, StructuralDescriptor};
use super::diff::IncrementalDescriptor;
use super::names::{NameRegistry, TypeId};
use super::reloadable::LiveVersion;
use super::rewriter::{guard_for, remap_code, SlotOrigin, SlotTable};
use crate::config::EngineOptions;
use crate::unit::{
    flags, CompiledUnit, Instr, MemberKey, MethodDef, MethodRef, Modifiers, TypeSig,
};
use crate::vm::access::can_access;
use crate::vm::error::VmError;
use crate::vm::object::{Class, MethodImpl};

/// Executor member name standing for constructors
pub const EXECUTOR_CONSTRUCTOR: &str = "___init___";

/// Executor member name standing for the static initializer
pub const EXECUTOR_STATIC_INIT: &str = "___clinit___";

/// What runs when a slot is entered
#[derive(Debug, Clone)]
pub enum DispatchEntry {
    /// The host method as originally compiled
    Original,
    /// A static method of the current executor
    Executor(Arc<MethodImpl>),
    /// Member no longer exists
    Deleted,
    /// Member is abstract in the live version
    Abstract,
}

impl DispatchEntry {
    /// Whether the originally compiled body runs
    pub fn is_original(&self) -> bool {
        matches!(self, DispatchEntry::Original)
    }
}

/// Per-version slot -> entry table
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    entries: Vec<DispatchEntry>,
    by_key: FxHashMap<MemberKey, u32>,
}

impl DispatchTable {
    /// Table routing every slot to its original body
    pub fn original(slots: &SlotTable) -> Self {
        Self {
            entries: vec![DispatchEntry::Original; slots.len()],
            by_key: slots.iter().map(|(slot, info)| (info.key.clone(), slot)).collect(),
        }
    }

    /// Build the table of a live version
    ///
    /// `cumulative` is the diff of the live version against the original
    /// (None when identical); `executor` is the executor defined for it.
    pub fn build(
        type_name: &str,
        slots: &SlotTable,
        live: &StructuralDescriptor,
        cumulative: Option<&IncrementalDescriptor>,
        executor: Option<&Arc<Class>>,
    ) -> Self {
        let mut entries = Vec::with_capacity(slots.len());
        let mut by_key = FxHashMap::default();
        for (slot, info) in slots.iter() {
            by_key.insert(info.key.clone(), slot);
            let entry = match live.method(&info.key) {
                Some(method) if method.is_abstract() => DispatchEntry::Abstract,
                Some(method) => {
                    let unchanged = cumulative
                        .and_then(|diff| diff.method_change(&info.key))
                        .map_or(true, |change| !change.body_changed && !change.static_flipped);
                    if info.origin == SlotOrigin::Original && unchanged {
                        DispatchEntry::Original
                    } else {
                        let key = executor_key(type_name, method);
                        match executor.and_then(|class| class.declared_method(&key)) {
                            Some(target) => DispatchEntry::Executor(target.clone()),
                            None if info.origin == SlotOrigin::Original => DispatchEntry::Original,
                            None => DispatchEntry::Deleted,
                        }
                    }
                }
                None if info.origin == SlotOrigin::Catcher => DispatchEntry::Original,
                None => DispatchEntry::Deleted,
            };
            entries.push(entry);
        }
        Self { entries, by_key }
    }

    /// Entry of a slot
    pub fn entry(&self, slot: u32) -> Option<&DispatchEntry> {
        self.entries.get(slot as usize)
    }

    /// Entry of the slot assigned to `key`
    pub fn lookup(&self, key: &MemberKey) -> Option<&DispatchEntry> {
        self.by_key.get(key).and_then(|slot| self.entry(*slot))
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no slot
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of slots not running their original body
    pub fn redirected(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_original()).count()
    }
}

/// Stable forwarder to the current version of one managed type
#[derive(Debug)]
pub struct Dispatcher {
    type_name: Arc<str>,
    current: ArcSwap<LiveVersion>,
}

impl Dispatcher {
    /// Create a dispatcher publishing `initial`
    pub fn new(type_name: Arc<str>, initial: Arc<LiveVersion>) -> Self {
        Self {
            type_name,
            current: ArcSwap::new(initial),
        }
    }

    /// Managed type this dispatcher forwards for
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Version observed by a call entering now
    pub fn current(&self) -> Arc<LiveVersion> {
        self.current.load_full()
    }

    /// Entry of a slot in the current version
    pub fn entry(&self, slot: u32) -> Option<DispatchEntry> {
        self.current.load().dispatch.entry(slot).cloned()
    }

    /// Publish a new current version
    pub fn publish(&self, version: Arc<LiveVersion>) {
        self.current.store(version);
    }
}

/// Name of the executor generated for version `number` of `type_name`
pub fn executor_name(type_name: &str, number: u32) -> String {
    format!("{}$$E{}", type_name, number)
}

/// Name of the contract generated for version `number` of `type_name`
pub fn contract_name(type_name: &str, number: u32) -> String {
    format!("{}$$I{}", type_name, number)
}

/// Name of the super-dispatcher `type_name` carries for inherited `method`.
/// Built from the qualified name so no subtype can declare the same member.
pub fn super_dispatcher_name(type_name: &str, method: &str) -> String {
    format!("__super${}${}", type_name.replace('.', "$"), method)
}

/// Key of the executor member implementing `method` of `type_name`
pub fn executor_key(type_name: &str, method: &MethodDescriptor) -> MemberKey {
    if method.is_constructor() {
        MemberKey::new(EXECUTOR_CONSTRUCTOR, method.sig.with_receiver(type_name))
    } else if method.is_static_init() {
        MemberKey::new(EXECUTOR_STATIC_INIT, method.sig.clone())
    } else if method.is_static() {
        method.key()
    } else {
        MemberKey::new(method.name.clone(), method.sig.with_receiver(type_name))
    }
}

/// A generated catcher and the access it stands for
#[derive(Debug, Clone)]
pub(crate) struct Catcher {
    pub def: MethodDef,
    pub declared: Modifiers,
}

/// `[load receiver and args, invokespecial owner.key, return]`
fn forwarding_body(owner: &str, key: &MemberKey) -> Vec<Instr> {
    let mut code: Vec<Instr> = (0..=key.sig.arity() as u16).map(Instr::Load).collect();
    code.push(Instr::InvokeSpecial(MethodRef::new(owner, key.name.clone(), key.sig.clone())));
    code.push(if key.sig.ret == TypeSig::Void {
        Instr::Return
    } else {
        Instr::ReturnValue
    });
    code
}

/// Inherited methods `unit` may reach through `parent`, in a stable order
fn inherited_candidates<'c>(unit: &CompiledUnit, parent: &'c Arc<Class>) -> Vec<(&'c MemberKey, &'c Arc<MethodImpl>)> {
    let mut candidates: Vec<_> = parent
        .vtable()
        .filter(|(key, method)| {
            !method.is_abstract()
                && !method.is_static()
                && !method.modifiers.is_private()
                && !key.is_constructor()
                && !method.modifiers.contains(Modifiers::SUPER_DISPATCHER)
                && can_access(&unit.name, &method.declaring, method.declared_modifiers, || true)
        })
        .collect();
    candidates.sort_by_key(|(key, _)| key.to_string());
    candidates
}

/// Catchers for every inherited overridable method `unit` does not declare
pub(crate) fn catcher_methods(unit: &CompiledUnit, parent: &Arc<Class>) -> Vec<Catcher> {
    inherited_candidates(unit, parent)
        .into_iter()
        .filter(|(key, method)| !method.modifiers.is_final() && unit.method(key).is_none())
        .map(|(key, method)| Catcher {
            def: MethodDef::new(
                key.name.clone(),
                key.sig.clone(),
                Modifiers::PUBLIC | Modifiers::SYNTHETIC | Modifiers::CATCHER,
            )
            .with_code(forwarding_body(&parent.name, key)),
            declared: method.declared_modifiers | Modifiers::SYNTHETIC | Modifiers::CATCHER,
        })
        .collect()
}

/// Super-dispatchers for every inherited concrete method `unit` can reach
pub(crate) fn super_dispatcher_methods(unit: &CompiledUnit, parent: &Arc<Class>) -> Vec<MethodDef> {
    inherited_candidates(unit, parent)
        .into_iter()
        .filter_map(|(key, _)| {
            let name = super_dispatcher_name(&unit.name, &key.name);
            let dispatcher_key = MemberKey::new(name.clone(), key.sig.clone());
            if unit.method(&dispatcher_key).is_some() {
                return None;
            }
            Some(
                MethodDef::new(
                    name,
                    key.sig.clone(),
                    Modifiers::PUBLIC | Modifiers::SYNTHETIC | Modifiers::SUPER_DISPATCHER,
                )
                .with_code(forwarding_body(&parent.name, key)),
            )
        })
        .collect()
}

/// Contract interface of a live version
pub fn generate_contract(type_name: &str, number: u32, live: &StructuralDescriptor) -> CompiledUnit {
    let mut unit = CompiledUnit::new(contract_name(type_name, number));
    unit.modifiers = Modifiers::PUBLIC | Modifiers::INTERFACE | Modifiers::ABSTRACT | Modifiers::SYNTHETIC;
    unit.flags = flags::ENGINE_REWRITTEN | flags::CONTRACT;
    for method in live.methods.iter().filter(|m| !m.is_abstract()) {
        let key = executor_key(type_name, method);
        unit.methods.push(MethodDef::new(key.name, key.sig, Modifiers::PUBLIC | Modifiers::ABSTRACT));
    }
    unit
}

/// Inputs for compiling one version's executor
pub(crate) struct ExecutorContext<'a> {
    pub type_name: &'a str,
    pub type_id: TypeId,
    pub host: &'a Class,
    pub live: &'a StructuralDescriptor,
    pub names: &'a NameRegistry,
    pub options: &'a EngineOptions,
}

impl ExecutorContext<'_> {
    fn is_own(&self, owner: &str) -> bool {
        owner == self.type_name
    }

    fn expand(&self, instr: &Instr, out: &mut Vec<Instr>) {
        let type_id = self.type_id.raw();
        match instr {
            Instr::GetField(field) if self.is_own(&field.owner) => out.push(Instr::DynGetField {
                type_id,
                field: field.clone(),
            }),
            Instr::PutField(field) if self.is_own(&field.owner) => out.push(Instr::DynPutField {
                type_id,
                field: field.clone(),
            }),
            Instr::GetStatic(field) if self.is_own(&field.owner) => out.push(Instr::DynGetStatic {
                type_id,
                field: field.clone(),
            }),
            Instr::PutStatic(field) if self.is_own(&field.owner) => out.push(Instr::DynPutStatic {
                type_id,
                field: field.clone(),
            }),
            Instr::InvokeSpecial(method) if self.is_own(&method.owner) => out.push(Instr::DynInvokeSpecial {
                type_id,
                method: method.clone(),
            }),
            Instr::InvokeSpecial(method) if method.name == crate::unit::CONSTRUCTOR => {
                out.push(Instr::DynInitSuper {
                    type_id,
                    method: method.clone(),
                })
            }
            Instr::InvokeSpecial(method) => {
                let dispatcher = super_dispatcher_name(self.type_name, &method.name);
                let dispatcher_key = MemberKey::new(dispatcher.clone(), method.sig.clone());
                if self.host.declared_method(&dispatcher_key).is_some() {
                    out.push(Instr::InvokeSpecial(MethodRef::new(
                        self.type_name,
                        dispatcher,
                        method.sig.clone(),
                    )));
                } else {
                    out.push(Instr::DynInvokeSuper {
                        type_id,
                        method: method.clone(),
                    });
                }
            }
            Instr::InvokeVirtual(method) | Instr::InvokeStatic(method) | Instr::InvokeInterface(method)
                if self.is_own(&method.owner)
                    && self
                        .live
                        .method(&method.key())
                        .is_some_and(|m| m.modifiers.is_private()) =>
            {
                out.push(Instr::DynInvokeSpecial {
                    type_id,
                    method: method.clone(),
                })
            }
            other => {
                if let Some(guard) = guard_for(other, self.names, self.options) {
                    out.push(guard);
                }
                out.push(other.clone());
            }
        }
    }
}

/// Executor unit compiling the concrete methods of `unit`
pub(crate) fn generate_executor(ctx: &ExecutorContext<'_>, number: u32, unit: &CompiledUnit) -> CompiledUnit {
    let mut executor = CompiledUnit::new(executor_name(ctx.type_name, number));
    executor.modifiers = Modifiers::PUBLIC | Modifiers::FINAL | Modifiers::SYNTHETIC;
    executor.flags = flags::ENGINE_REWRITTEN | flags::EXECUTOR;
    executor.interfaces = vec![contract_name(ctx.type_name, number)];
    executor.source_file = unit.source_file.clone();

    for (def, descriptor) in unit.methods.iter().zip(&ctx.live.methods) {
        if def.code.is_empty() {
            continue;
        }
        let key = executor_key(ctx.type_name, descriptor);
        let mut method = MethodDef::new(key.name, key.sig, Modifiers::PUBLIC | Modifiers::STATIC | Modifiers::SYNTHETIC);
        method.annotations = def.annotations.clone();
        method.throws = def.throws.clone();
        method.max_locals = def.max_locals;
        method.code = remap_code(&def.code, &[], |instr, out| ctx.expand(instr, out));
        executor.methods.push(method);
    }
    tracing::debug!(
        type_name = ctx.type_name,
        executor = %executor.name,
        methods = executor.methods.len(),
        "generated executor"
    );
    executor
}

/// Check that `executor` implements every member of `contract`
pub fn check_conformity(contract: &CompiledUnit, executor: &CompiledUnit) -> Result<(), VmError> {
    for required in &contract.methods {
        let found = executor
            .method(&required.key())
            .is_some_and(|m| m.modifiers.contains(Modifiers::PUBLIC | Modifiers::STATIC));
        if !found {
            return Err(VmError::Link(format!(
                "{} does not implement {}.{}",
                executor.name,
                contract.name,
                required.key()
            )));
        }
    }
    Ok(())
}
