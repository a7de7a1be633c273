//! Reload Semantics Tests
//!
//! Tests for what a reload does to state and what it refuses to do:
//! - Idempotent reloads and preserved field values
//! - Defaults for fields added after instances exist
//! - Incompatible stored values under each policy
//! - Fields revealed from unmanaged ancestors and reloaded constructors
//! - Deleted members
//! - Verification of unsafe structural changes
//! - Observer ordering and failure handling
//!
//! # Running Tests
//! ```bash
//! cargo test --test reload_semantics_tests
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use revive_engine::unit::{FieldRef, Instr, MethodRef};
use revive_engine::{
    EngineOptions, FieldDef, FieldIncompatibility, MethodDef, MethodSig, Modifiers, NameRegistry, ObserverError,
    ReloadError, ReloadEvent, ReloadObserver, Scope, TypeSig, UnitBuilder, Value, VmError,
};

fn scope_with(options: EngineOptions) -> Arc<Scope> {
    Scope::with_names(options, Arc::new(NameRegistry::new())).unwrap()
}

fn scope() -> Arc<Scope> {
    scope_with(EngineOptions::default().include("app.*"))
}

fn sig(text: &str) -> MethodSig {
    MethodSig::parse(text).unwrap()
}

fn count_ref() -> FieldRef {
    FieldRef::new("app.Counter", "count", TypeSig::Int)
}

/// `app.Counter` whose `inc` adds `step` to a private `count`
fn counter(step: i64) -> Vec<u8> {
    UnitBuilder::class("app.Counter")
        .field(FieldDef::new("count", TypeSig::Int).with_modifiers(Modifiers::PRIVATE))
        .method(MethodDef::new("inc", MethodSig::void(), Modifiers::PUBLIC).with_code(vec![
            Instr::Load(0),
            Instr::Load(0),
            Instr::GetField(count_ref()),
            Instr::ConstInt(step),
            Instr::Add,
            Instr::PutField(count_ref()),
            Instr::Return,
        ]))
        .method(MethodDef::new("get", sig("()->i64"), Modifiers::PUBLIC).with_code(vec![
            Instr::Load(0),
            Instr::GetField(count_ref()),
            Instr::ReturnValue,
        ]))
        .default_constructor()
        .encode()
}

fn inc(scope: &Scope, counter: &Value) {
    scope.invoke_virtual(counter, "inc", &MethodSig::void(), vec![]).unwrap();
}

fn get(scope: &Scope, counter: &Value) -> i64 {
    scope
        .invoke_virtual(counter, "get", &sig("()->i64"), vec![])
        .unwrap()
        .as_int()
        .unwrap()
}

// ===== State Preservation =====

#[test]
fn test_field_values_survive_reload() {
    let scope = scope();
    scope.define(&counter(1)).unwrap();
    let c = scope.new_instance("app.Counter", &MethodSig::void(), vec![]).unwrap();
    inc(&scope, &c);
    assert_eq!(get(&scope, &c), 1);

    scope.reload("app.Counter", "v2", &counter(10)).unwrap();
    assert_eq!(get(&scope, &c), 1);
    inc(&scope, &c);
    assert_eq!(get(&scope, &c), 11);
}

#[test]
fn test_idempotent_reload() {
    let scope = scope();
    scope.define(&counter(1)).unwrap();
    let c = scope.new_instance("app.Counter", &MethodSig::void(), vec![]).unwrap();
    inc(&scope, &c);

    assert!(scope.reload("app.Counter", "same", &counter(1)).unwrap());
    let rtype = scope.reloadable_type("app.Counter").unwrap();
    let live = rtype.live();
    assert_eq!(live.number, 1);
    assert!(live.artifacts.is_none());
    assert!(live.cumulative.is_none());
    assert_eq!(live.dispatch.redirected(), 0);

    inc(&scope, &c);
    assert_eq!(get(&scope, &c), 2);
}

#[test]
fn test_added_fields_read_defaults() {
    let scope = scope();
    scope.define(&counter(1)).unwrap();
    let c = scope.new_instance("app.Counter", &MethodSig::void(), vec![]).unwrap();

    let v2 = UnitBuilder::class("app.Counter")
        .field(FieldDef::new("count", TypeSig::Int).with_modifiers(Modifiers::PRIVATE))
        .field(FieldDef::new("a", TypeSig::Int))
        .field(FieldDef::new("b", TypeSig::Float))
        .field(FieldDef::new("c", TypeSig::Bool))
        .field(FieldDef::new("d", TypeSig::Str))
        .field(FieldDef::new("e", TypeSig::reference("app.Counter")))
        .field(FieldDef::new("total", TypeSig::Int).with_modifiers(Modifiers::STATIC))
        .default_constructor()
        .encode();
    scope.reload("app.Counter", "v2", &v2).unwrap();

    assert_eq!(scope.get_field(&c, "a").unwrap(), Value::Int(0));
    assert_eq!(scope.get_field(&c, "b").unwrap(), Value::Float(0.0));
    assert_eq!(scope.get_field(&c, "c").unwrap(), Value::Bool(false));
    assert!(scope.get_field(&c, "d").unwrap().is_null());
    assert!(scope.get_field(&c, "e").unwrap().is_null());
    assert_eq!(scope.get_static("app.Counter", "total").unwrap(), Value::Int(0));

    scope.set_field(&c, "d", Value::str("hello")).unwrap();
    assert_eq!(scope.get_field(&c, "d").unwrap().as_str(), Some("hello"));
    assert!(matches!(
        scope.set_field(&c, "a", Value::str("nope")),
        Err(VmError::TypeMismatch { .. })
    ));
}

fn with_level(sig: TypeSig) -> Vec<u8> {
    UnitBuilder::class("app.Counter")
        .field(FieldDef::new("count", TypeSig::Int).with_modifiers(Modifiers::PRIVATE))
        .field(FieldDef::new("level", sig))
        .default_constructor()
        .encode()
}

#[test]
fn test_incompatible_value_discarded_by_default() {
    let scope = scope();
    scope.define(&with_level(TypeSig::Int)).unwrap();
    let c = scope.new_instance("app.Counter", &MethodSig::void(), vec![]).unwrap();

    scope.reload("app.Counter", "v2", &with_level(TypeSig::Float)).unwrap();
    scope.set_field(&c, "level", Value::Float(2.5)).unwrap();
    assert_eq!(scope.get_field(&c, "level").unwrap(), Value::Float(2.5));

    scope.reload("app.Counter", "v3", &with_level(TypeSig::Str)).unwrap();
    assert!(scope.get_field(&c, "level").unwrap().is_null());
    let object = c.as_object().unwrap();
    assert_eq!(object.field_store().discards(), 1);
}

#[test]
fn test_incompatible_value_error_policy() {
    let scope = scope_with(
        EngineOptions::default()
            .include("app.*")
            .field_incompatibility(FieldIncompatibility::Error),
    );
    scope.define(&with_level(TypeSig::Int)).unwrap();
    let c = scope.new_instance("app.Counter", &MethodSig::void(), vec![]).unwrap();

    scope.reload("app.Counter", "v2", &with_level(TypeSig::Float)).unwrap();
    scope.set_field(&c, "level", Value::Float(2.5)).unwrap();
    scope.reload("app.Counter", "v3", &with_level(TypeSig::Str)).unwrap();
    assert!(matches!(
        scope.get_field(&c, "level"),
        Err(VmError::FieldTypeMismatch { .. })
    ));
}

#[test]
fn test_field_returning_to_original_type_uses_native_slot() {
    let scope = scope();
    scope.define(&with_level(TypeSig::Int)).unwrap();
    let c = scope.new_instance("app.Counter", &MethodSig::void(), vec![]).unwrap();
    scope.set_field(&c, "level", Value::Int(4)).unwrap();

    scope.reload("app.Counter", "v2", &with_level(TypeSig::Str)).unwrap();
    assert!(scope.get_field(&c, "level").unwrap().is_null());

    scope.reload("app.Counter", "v3", &with_level(TypeSig::Int)).unwrap();
    assert_eq!(scope.get_field(&c, "level").unwrap(), Value::Int(4));
}

// ===== Inherited Fields and Constructors =====

/// `lib.FB` whose constructor sets its own `x` to 5
fn field_base() -> Vec<u8> {
    UnitBuilder::class("lib.FB")
        .field(FieldDef::new("x", TypeSig::Int).with_modifiers(Modifiers::PROTECTED))
        .constructor(
            MethodSig::void(),
            vec![
                Instr::Load(0),
                Instr::ConstInt(5),
                Instr::PutField(FieldRef::new("lib.FB", "x", TypeSig::Int)),
                Instr::Return,
            ],
        )
        .encode()
}

/// `app.FS extends lib.FB`; the second version declares its own `x`
fn field_sub(own_x: bool) -> Vec<u8> {
    let read_x = if own_x {
        vec![
            Instr::Load(0),
            Instr::GetField(FieldRef::new("app.FS", "x", TypeSig::Int)),
            Instr::ReturnValue,
        ]
    } else {
        vec![Instr::ConstInt(-1), Instr::ReturnValue]
    };
    let mut builder = UnitBuilder::class("app.FS").extends("lib.FB");
    if own_x {
        builder = builder.field(FieldDef::new("x", TypeSig::Int));
    }
    builder
        .method(MethodDef::new("readX", sig("()->i64"), Modifiers::PUBLIC).with_code(read_x))
        .default_constructor()
        .encode()
}

#[test]
fn test_added_field_revealed_from_unmanaged_ancestor() {
    let scope = scope();
    scope.define(&field_base()).unwrap();
    scope.define(&field_sub(false)).unwrap();
    assert!(scope.reloadable_type("lib.FB").is_none());

    let before = scope.new_instance("app.FS", &MethodSig::void(), vec![]).unwrap();
    let read = |receiver: &Value| {
        scope
            .invoke_virtual(receiver, "readX", &sig("()->i64"), vec![])
            .unwrap()
    };
    assert_eq!(read(&before), Value::Int(-1));

    scope.reload("app.FS", "v2", &field_sub(true)).unwrap();
    assert_eq!(read(&before), Value::Int(5));
    let after = scope.new_instance("app.FS", &MethodSig::void(), vec![]).unwrap();
    assert_eq!(read(&after), Value::Int(5));
}

fn y_ref() -> FieldRef {
    FieldRef::new("app.Box", "y", TypeSig::Int)
}

/// `app.Box`; the second version adds `y` and sets it in its constructor
fn boxed(with_y: bool) -> Vec<u8> {
    let builder = UnitBuilder::class("app.Box");
    if !with_y {
        return builder.default_constructor().encode();
    }
    builder
        .field(FieldDef::new("y", TypeSig::Int))
        .method(MethodDef::new("getY", sig("()->i64"), Modifiers::PUBLIC).with_code(vec![
            Instr::Load(0),
            Instr::GetField(y_ref()),
            Instr::ReturnValue,
        ]))
        .constructor(
            MethodSig::void(),
            vec![Instr::Load(0), Instr::ConstInt(42), Instr::PutField(y_ref()), Instr::Return],
        )
        .encode()
}

#[test]
fn test_reloaded_constructor_runs_for_new_instances() {
    let scope = scope();
    scope.define(&boxed(false)).unwrap();
    let old = scope.new_instance("app.Box", &MethodSig::void(), vec![]).unwrap();

    scope.reload("app.Box", "v2", &boxed(true)).unwrap();
    let fresh = scope.new_instance("app.Box", &MethodSig::void(), vec![]).unwrap();
    assert_eq!(scope.get_field(&fresh, "y").unwrap(), Value::Int(42));
    assert_eq!(
        scope.invoke_virtual(&fresh, "getY", &sig("()->i64"), vec![]).unwrap(),
        Value::Int(42)
    );

    // instances built before the reload never ran the new constructor
    assert_eq!(scope.get_field(&old, "y").unwrap(), Value::Int(0));
}

// ===== Deleted Members =====

fn with_extra(include_extra: bool) -> Vec<u8> {
    let mut builder = UnitBuilder::class("app.Service")
        .method(MethodDef::new("main", sig("()->i64"), Modifiers::PUBLIC).with_code(vec![
            Instr::ConstInt(1),
            Instr::ReturnValue,
        ]));
    if include_extra {
        builder = builder.method(MethodDef::new("extra", sig("()->i64"), Modifiers::PUBLIC).with_code(vec![
            Instr::ConstInt(2),
            Instr::ReturnValue,
        ]));
    }
    builder.default_constructor().encode()
}

fn extra_caller() -> Vec<u8> {
    UnitBuilder::class("lib.Caller")
        .method(
            MethodDef::new("callExtra", sig("(app.Service)->i64"), Modifiers::PUBLIC | Modifiers::STATIC).with_code(
                vec![
                    Instr::Load(0),
                    Instr::InvokeVirtual(MethodRef::new("app.Service", "extra", sig("()->i64"))),
                    Instr::ReturnValue,
                ],
            ),
        )
        .default_constructor()
        .encode()
}

#[test]
fn test_deleted_method_is_no_such_method() {
    let scope = scope();
    scope.define(&with_extra(true)).unwrap();
    scope.define(&extra_caller()).unwrap();
    let service = scope.new_instance("app.Service", &MethodSig::void(), vec![]).unwrap();
    let call = || scope.invoke_static("lib.Caller", "callExtra", &sig("(app.Service)->i64"), vec![service.clone()]);
    assert_eq!(call().unwrap(), Value::Int(2));

    scope.reload("app.Service", "v2", &with_extra(false)).unwrap();
    assert!(matches!(call(), Err(VmError::NoSuchMethod { .. })));
    assert!(matches!(
        scope.invoke_virtual(&service, "extra", &sig("()->i64"), vec![]),
        Err(VmError::NoSuchMethod { .. })
    ));
    // untouched members keep working
    assert_eq!(
        scope.invoke_virtual(&service, "main", &sig("()->i64"), vec![]).unwrap(),
        Value::Int(1)
    );

    // restoring the method restores the call site
    scope.reload("app.Service", "v3", &with_extra(true)).unwrap();
    assert_eq!(call().unwrap(), Value::Int(2));
}

#[test]
fn test_added_method_callable() {
    let scope = scope();
    scope.define(&with_extra(false)).unwrap();
    let service = scope.new_instance("app.Service", &MethodSig::void(), vec![]).unwrap();
    assert!(scope.invoke_virtual(&service, "extra", &sig("()->i64"), vec![]).is_err());

    scope.reload("app.Service", "v2", &with_extra(true)).unwrap();
    assert_eq!(
        scope.invoke_virtual(&service, "extra", &sig("()->i64"), vec![]).unwrap(),
        Value::Int(2)
    );
}

// ===== Verification =====

fn parent(final_m: bool) -> Vec<u8> {
    let modifiers = if final_m {
        Modifiers::PUBLIC | Modifiers::FINAL
    } else {
        Modifiers::PUBLIC
    };
    UnitBuilder::class("lib.Parent")
        .method(MethodDef::new("m", sig("()->i64"), modifiers).with_code(vec![Instr::ConstInt(1), Instr::ReturnValue]))
        .default_constructor()
        .encode()
}

fn child(super_name: &str, m: Option<Modifiers>) -> Vec<u8> {
    let mut builder = UnitBuilder::class("app.Child").extends(super_name);
    if let Some(modifiers) = m {
        builder = builder
            .method(MethodDef::new("m", sig("()->i64"), modifiers).with_code(vec![Instr::ConstInt(2), Instr::ReturnValue]));
    }
    builder.default_constructor().encode()
}

fn other_parent() -> Vec<u8> {
    UnitBuilder::class("lib.Other").default_constructor().encode()
}

fn assert_rejected(scope: &Scope, bytes: &[u8]) {
    let rtype = scope.reloadable_type("app.Child").unwrap();
    assert!(!scope.reload("app.Child", "bad", bytes).unwrap());
    assert_eq!(rtype.version_count(), 1);
    assert_eq!(rtype.stats().rejected, 1);
    assert_eq!(rtype.stats().reloads, 0);
}

#[test]
fn test_override_of_final_rejected() {
    let scope = scope();
    scope.define(&parent(true)).unwrap();
    scope.define(&child("lib.Parent", None)).unwrap();
    assert_rejected(&scope, &child("lib.Parent", Some(Modifiers::PUBLIC)));
}

#[test]
fn test_supertype_change_rejected() {
    let scope = scope();
    scope.define(&parent(false)).unwrap();
    scope.define(&other_parent()).unwrap();
    scope.define(&child("lib.Parent", None)).unwrap();
    assert_rejected(&scope, &child("lib.Other", None));
}

#[test]
fn test_visibility_narrowing_rejected() {
    let scope = scope();
    scope.define(&parent(false)).unwrap();
    scope.define(&child("lib.Parent", Some(Modifiers::PUBLIC))).unwrap();
    assert_rejected(&scope, &child("lib.Parent", Some(Modifiers::empty())));
}

#[test]
fn test_unsafe_change_accepted_without_verification() {
    let scope = scope_with(EngineOptions::default().include("app.*").verify_reloads(false));
    scope.define(&parent(false)).unwrap();
    scope.define(&child("lib.Parent", Some(Modifiers::PUBLIC))).unwrap();
    assert!(scope
        .reload("app.Child", "v2", &child("lib.Parent", Some(Modifiers::empty())))
        .unwrap());
}

#[test]
fn test_malformed_body_is_verify_error() {
    let scope = scope();
    scope.define(&with_extra(false)).unwrap();
    let broken = UnitBuilder::class("app.Service")
        .method(MethodDef::new("main", sig("()->i64"), Modifiers::PUBLIC))
        .default_constructor()
        .encode();
    assert!(matches!(
        scope.reload("app.Service", "v2", &broken),
        Err(ReloadError::Verify(_))
    ));
    assert_eq!(scope.reloadable_type("app.Service").unwrap().version_count(), 1);
}

#[test]
fn test_unknown_type_not_managed() {
    let scope = scope();
    assert!(matches!(
        scope.reload("app.Missing", "v2", &with_extra(false)),
        Err(ReloadError::NotManaged(_))
    ));
}

// ===== Observers =====

#[derive(Default)]
struct Recorder {
    before: AtomicUsize,
    after: AtomicUsize,
    fail_before: bool,
    fail_after: bool,
    rerun: bool,
}

impl ReloadObserver for Recorder {
    fn before_reload(&self, event: &ReloadEvent<'_>) -> Result<(), ObserverError> {
        self.before.fetch_add(1, Ordering::SeqCst);
        if self.fail_before {
            return Err(ObserverError::new(format!("refusing {}", event.stamp)));
        }
        Ok(())
    }

    fn after_reload(&self, event: &ReloadEvent<'_>) -> Result<(), ObserverError> {
        self.after.fetch_add(1, Ordering::SeqCst);
        if self.fail_after {
            return Err(ObserverError::new(format!("post-reload hook failed for {}", event.type_name)));
        }
        Ok(())
    }

    fn should_rerun_static_initializer(&self, _event: &ReloadEvent<'_>) -> bool {
        self.rerun
    }
}

fn boot(extra: bool) -> Vec<u8> {
    let runs = FieldRef::new("app.Boot", "runs", TypeSig::Int);
    let mut builder = UnitBuilder::class("app.Boot")
        .field(FieldDef::new("runs", TypeSig::Int).with_modifiers(Modifiers::PUBLIC | Modifiers::STATIC))
        .static_init(vec![
            Instr::GetStatic(runs.clone()),
            Instr::ConstInt(1),
            Instr::Add,
            Instr::PutStatic(runs),
            Instr::Return,
        ]);
    if extra {
        builder = builder.method(
            MethodDef::new("ping", sig("()->i64"), Modifiers::PUBLIC | Modifiers::STATIC)
                .with_code(vec![Instr::ConstInt(0), Instr::ReturnValue]),
        );
    }
    builder.default_constructor().encode()
}

#[test]
fn test_observers_called_around_reload() {
    let scope = scope();
    let recorder = Arc::new(Recorder::default());
    scope.add_observer(recorder.clone());
    scope.define(&boot(false)).unwrap();

    scope.reload("app.Boot", "v2", &boot(true)).unwrap();
    assert_eq!(recorder.before.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.after.load(Ordering::SeqCst), 1);
    // static initializer unchanged and not requested: not rerun
    assert_eq!(scope.get_static("app.Boot", "runs").unwrap(), Value::Int(1));
}

#[test]
fn test_failing_before_observer_aborts() {
    let scope = scope();
    scope.add_observer(Arc::new(Recorder {
        fail_before: true,
        ..Recorder::default()
    }));
    scope.define(&boot(false)).unwrap();

    let err = scope.reload("app.Boot", "v2", &boot(true)).unwrap_err();
    assert!(matches!(err, ReloadError::Observer { .. }));
    let rtype = scope.reloadable_type("app.Boot").unwrap();
    assert_eq!(rtype.version_count(), 1);
    assert!(!rtype.has_reloaded());
    assert!(scope.invoke_static("app.Boot", "ping", &sig("()->i64"), vec![]).is_err());
}

#[test]
fn test_failing_after_observer_keeps_version() {
    let scope = scope();
    scope.add_observer(Arc::new(Recorder {
        fail_after: true,
        ..Recorder::default()
    }));
    scope.define(&boot(false)).unwrap();

    let err = scope.reload("app.Boot", "v2", &boot(true)).unwrap_err();
    assert!(matches!(err, ReloadError::Observer { .. }));
    let rtype = scope.reloadable_type("app.Boot").unwrap();
    assert_eq!(rtype.version_count(), 2);
    assert_eq!(
        scope.invoke_static("app.Boot", "ping", &sig("()->i64"), vec![]).unwrap(),
        Value::Int(0)
    );
}

#[test]
fn test_observer_requests_static_init_rerun() {
    let scope = scope();
    scope.add_observer(Arc::new(Recorder {
        rerun: true,
        ..Recorder::default()
    }));
    scope.define(&boot(false)).unwrap();
    assert_eq!(scope.get_static("app.Boot", "runs").unwrap(), Value::Int(1));

    scope.reload("app.Boot", "v2", &boot(true)).unwrap();
    assert!(scope.reloadable_type("app.Boot").unwrap().live().rerun_static_init);
    assert_eq!(scope.get_static("app.Boot", "runs").unwrap(), Value::Int(2));
}
