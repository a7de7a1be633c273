//! Call-site and self rewriting
//!
//! Every unit entering a scope has each invocation preceded by an
//! `InvokeCheck` and each field access preceded by a `FieldCheck` naming the
//! owner's type ID. While nothing in the scope has been reloaded both checks
//! fall through to the original instruction.
//!
//! A managed type's own unit is additionally self-rewritten: catchers and
//! super-dispatchers are added, protected and package members are widened to
//! public, and every concrete method gets a `MethodEntryCheck` prologue naming
//! its dispatch slot.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::dispatch::{catcher_methods, super_dispatcher_methods};
use super::names::{NameRegistry, TypeId};
use crate::config::EngineOptions;
use crate::unit::{flags, CompiledUnit, Instr, MemberKey, Modifiers, Visibility};
use crate::vm::object::Class;

/// Where a dispatch slot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOrigin {
    /// Declared by the original unit
    Original,
    /// Catcher for an inherited overridable method
    Catcher,
    /// First declared by a reloaded version
    Added,
}

/// One dispatch slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotInfo {
    /// Member the slot dispatches
    pub key: MemberKey,
    /// Where the slot came from
    pub origin: SlotOrigin,
}

/// Append-only member -> slot assignment of one managed type
#[derive(Debug, Clone, Default)]
pub struct SlotTable {
    slots: Vec<SlotInfo>,
    by_key: FxHashMap<MemberKey, u32>,
}

impl SlotTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot of `key`, allocating one if needed
    pub fn assign(&mut self, key: MemberKey, origin: SlotOrigin) -> u32 {
        if let Some(slot) = self.by_key.get(&key) {
            return *slot;
        }
        let slot = self.slots.len() as u32;
        self.by_key.insert(key.clone(), slot);
        self.slots.push(SlotInfo { key, origin });
        slot
    }

    /// Slot of `key`
    pub fn slot_of(&self, key: &MemberKey) -> Option<u32> {
        self.by_key.get(key).copied()
    }

    /// Slot description
    pub fn get(&self, slot: u32) -> Option<&SlotInfo> {
        self.slots.get(slot as usize)
    }

    /// Slots in allocation order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &SlotInfo)> {
        self.slots.iter().enumerate().map(|(i, info)| (i as u32, info))
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot was allocated
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Result of rewriting a managed type's own unit
#[derive(Debug)]
pub struct SelfRewrite {
    /// Unit to define the host class from
    pub unit: CompiledUnit,
    /// Original modifiers of widened and generated members
    pub declared_access: FxHashMap<MemberKey, Modifiers>,
    /// Initial slot assignment
    pub slots: SlotTable,
}

/// Rebuild an instruction stream with `prologue` in front and each
/// instruction replaced by whatever `expand` pushes for it
///
/// Jump targets are remapped to the first instruction emitted for their old
/// target, so a jump lands on any guard inserted before it.
pub(crate) fn remap_code(code: &[Instr], prologue: &[Instr], mut expand: impl FnMut(&Instr, &mut Vec<Instr>)) -> Vec<Instr> {
    let mut out = Vec::with_capacity(code.len() + prologue.len() + code.len() / 2);
    out.extend_from_slice(prologue);
    let mut index_map = Vec::with_capacity(code.len());
    let mut jumps = Vec::new();
    for instr in code {
        index_map.push(out.len() as u32);
        let start = out.len();
        expand(instr, &mut out);
        jumps.extend((start..out.len()).filter(|&i| out[i].jump_target().is_some()));
    }
    let end = out.len() as u32;
    for i in jumps {
        if let Some(target) = out[i].jump_target() {
            let mapped = index_map.get(target as usize).copied().unwrap_or(end);
            out[i].retarget(mapped);
        }
    }
    out
}

/// Guard instruction for an invocation or field access, if it needs one
pub(crate) fn guard_for(instr: &Instr, names: &NameRegistry, options: &EngineOptions) -> Option<Instr> {
    if let Some((_, method)) = instr.as_invoke() {
        if options.is_system_type(&method.owner) {
            return None;
        }
        return Some(Instr::InvokeCheck {
            type_id: names.id_for(&method.owner).raw(),
        });
    }
    if let Some((_, field)) = instr.as_field_access() {
        if options.is_system_type(&field.owner) {
            return None;
        }
        return Some(Instr::FieldCheck {
            type_id: names.id_for(&field.owner).raw(),
        });
    }
    None
}

/// Insert dispatch guards before every invocation and field access
pub fn rewrite_call_sites(unit: &CompiledUnit, names: &NameRegistry, options: &EngineOptions) -> CompiledUnit {
    let mut rewritten = unit.clone();
    let mut guards = 0usize;
    for method in &mut rewritten.methods {
        if method.code.is_empty() {
            continue;
        }
        method.code = remap_code(&method.code, &[], |instr, out| {
            if let Some(guard) = guard_for(instr, names, options) {
                guards += 1;
                out.push(guard);
            }
            out.push(instr.clone());
        });
    }
    rewritten.flags |= flags::ENGINE_REWRITTEN;
    tracing::debug!(unit = %unit.name, guards, "rewrote call sites");
    rewritten
}

/// Rewrite a managed type's (call-site rewritten) unit for dispatch indirection
pub fn self_rewrite(unit: &CompiledUnit, type_id: TypeId, super_class: Option<&Arc<Class>>) -> SelfRewrite {
    let mut rewritten = unit.clone();
    let mut declared_access = FxHashMap::default();
    let mut slots = SlotTable::new();

    for method in &rewritten.methods {
        if !method.is_static_init() {
            slots.assign(method.key(), SlotOrigin::Original);
        }
    }

    if let Some(parent) = super_class {
        for catcher in catcher_methods(unit, parent) {
            declared_access.insert(catcher.def.key(), catcher.declared);
            slots.assign(catcher.def.key(), SlotOrigin::Catcher);
            rewritten.methods.push(catcher.def);
        }
        for dispatcher in super_dispatcher_methods(unit, parent) {
            rewritten.methods.push(dispatcher);
        }
    }

    for method in &mut rewritten.methods {
        let visibility = method.modifiers.visibility();
        if matches!(visibility, Visibility::Protected | Visibility::Package) && !method.is_static_init() {
            declared_access.entry(method.key()).or_insert(method.modifiers);
            method.modifiers = method.modifiers.with_visibility(Visibility::Public);
        }

        let is_dispatcher = method.modifiers.contains(Modifiers::SUPER_DISPATCHER);
        if method.code.is_empty() || method.is_static_init() || is_dispatcher {
            continue;
        }
        let Some(slot) = slots.slot_of(&method.key()) else {
            continue;
        };
        let prologue = [Instr::MethodEntryCheck {
            type_id: type_id.raw(),
            slot,
        }];
        method.code = remap_code(&method.code, &prologue, |instr, out| out.push(instr.clone()));
    }

    rewritten.flags |= flags::ENGINE_REWRITTEN;
    tracing::debug!(
        unit = %unit.name,
        slots = slots.len(),
        widened = declared_access.len(),
        "self-rewrote managed type"
    );
    SelfRewrite {
        unit: rewritten,
        declared_access,
        slots,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{FieldDef, MethodDef, MethodSig, TypeSig, UnitBuilder};
    use crate::vm::object::ClassSpec;

    fn options() -> EngineOptions {
        EngineOptions::default()
    }

    #[test]
    fn test_remap_shifts_jumps_onto_guards() {
        let code = vec![
            Instr::Load(1),
            Instr::JumpIfFalse(3),
            Instr::Return,
            Instr::Load(0),
            Instr::Return,
        ];
        let out = remap_code(&code, &[Instr::Nop], |instr, out| {
            if matches!(instr, Instr::Load(0)) {
                out.push(Instr::Nop);
            }
            out.push(instr.clone());
        });
        assert_eq!(out[2], Instr::JumpIfFalse(4));
        assert_eq!(out[4], Instr::Nop);
        assert_eq!(out.len(), 7);
    }

    #[test]
    fn test_call_sites_guarded() {
        let names = NameRegistry::new();
        let unit = UnitBuilder::class("app.Caller")
            .method(
                MethodDef::new("run", MethodSig::parse("(app.Target)->i64").unwrap(), Modifiers::PUBLIC).with_code(vec![
                    Instr::Load(1),
                    Instr::GetField(crate::unit::FieldRef::new("app.Target", "x", TypeSig::Int)),
                    Instr::Load(1),
                    Instr::InvokeVirtual(crate::unit::MethodRef::new("core.Str", "len", MethodSig::parse("()->i64").unwrap())),
                    Instr::Add,
                    Instr::ReturnValue,
                ]),
            )
            .build();
        let rewritten = rewrite_call_sites(&unit, &names, &options());
        let code = &rewritten.methods[0].code;
        let target = names.lookup("app.Target").unwrap();
        assert_eq!(code[1], Instr::FieldCheck { type_id: target.raw() });
        // system owners are left alone
        assert!(matches!(code[4], Instr::InvokeVirtual(_)));
        assert_eq!(code.len(), 7);
        assert!(rewritten.flags & flags::ENGINE_REWRITTEN != 0);
        assert!(names.lookup("core.Str").is_none());
    }

    #[test]
    fn test_self_rewrite_adds_catchers_and_entry_checks() {
        let sig = MethodSig::parse("()->i64").unwrap();
        let parent_unit = UnitBuilder::class("lib.Base")
            .method(
                MethodDef::new("inherited", sig.clone(), Modifiers::PROTECTED)
                    .with_code(vec![Instr::ConstInt(1), Instr::ReturnValue]),
            )
            .method(
                MethodDef::new("locked", sig.clone(), Modifiers::PUBLIC | Modifiers::FINAL)
                    .with_code(vec![Instr::ConstInt(2), Instr::ReturnValue]),
            )
            .default_constructor()
            .build();
        let parent = Arc::new(Class::define(0, ClassSpec::new(Arc::new(parent_unit), None, Vec::new())).unwrap());

        let unit = UnitBuilder::class("app.Child")
            .extends("lib.Base")
            .field(FieldDef::new("n", TypeSig::Int))
            .method(
                MethodDef::new("own", sig.clone(), Modifiers::empty())
                    .with_code(vec![Instr::ConstInt(3), Instr::ReturnValue]),
            )
            .default_constructor()
            .build();
        let result = self_rewrite(&unit, TypeId(7), Some(&parent));

        let catcher = result.unit.method(&MemberKey::new("inherited", sig.clone())).unwrap();
        assert!(catcher.modifiers.contains(Modifiers::CATCHER));
        assert_eq!(catcher.modifiers.visibility(), Visibility::Public);
        assert!(result.unit.method(&MemberKey::new("locked", sig.clone())).is_none());
        assert_eq!(
            result.declared_access[&MemberKey::new("inherited", sig.clone())].visibility(),
            Visibility::Protected
        );

        let own = result.unit.method(&MemberKey::new("own", sig.clone())).unwrap();
        assert_eq!(own.modifiers.visibility(), Visibility::Public);
        let own_slot = result.slots.slot_of(&own.key()).unwrap();
        assert_eq!(own.code[0], Instr::MethodEntryCheck { type_id: 7, slot: own_slot });

        let dispatcher = result
            .unit
            .methods
            .iter()
            .find(|m| m.name == "__super$app$Child$locked")
            .unwrap();
        assert!(dispatcher.modifiers.contains(Modifiers::SUPER_DISPATCHER));
        assert!(!matches!(dispatcher.code[0], Instr::MethodEntryCheck { .. }));

        assert_eq!(result.slots.get(0).unwrap().origin, SlotOrigin::Original);
        assert!(result.slots.iter().any(|(_, info)| info.origin == SlotOrigin::Catcher));
    }
}
