//! Reflection Tests
//!
//! Reflection must describe and operate on the live version of a managed
//! type, not the definition the host class was created from.
//!
//! # Running Tests
//! ```bash
//! cargo test --test reflection_tests
//! ```

use std::sync::Arc;

use revive_engine::unit::{Annotation, FieldRef, Instr};
use revive_engine::{
    EngineOptions, FieldDef, MemberKey, MethodDef, MethodSig, Modifiers, NameRegistry, Scope, TypeSig, UnitBuilder,
    Value, VmError,
};

fn scope() -> Arc<Scope> {
    Scope::with_names(EngineOptions::default().include("app.*"), Arc::new(NameRegistry::new())).unwrap()
}

fn sig(text: &str) -> MethodSig {
    MethodSig::parse(text).unwrap()
}

fn x_ref() -> FieldRef {
    FieldRef::new("app.Point", "x", TypeSig::Int)
}

fn point_v1() -> Vec<u8> {
    UnitBuilder::class("app.Point")
        .annotated(Annotation::marker("app.Entity").element("table", "points"))
        .field(FieldDef::new("x", TypeSig::Int).with_modifiers(Modifiers::PRIVATE))
        .method(MethodDef::new("getX", sig("()->i64"), Modifiers::PUBLIC).with_code(vec![
            Instr::Load(0),
            Instr::GetField(x_ref()),
            Instr::ReturnValue,
        ]))
        .default_constructor()
        .encode()
}

fn point_v2() -> Vec<u8> {
    UnitBuilder::class("app.Point")
        .annotated(Annotation::marker("app.Entity").element("table", "points_v2"))
        .field(FieldDef::new("x", TypeSig::Int).with_modifiers(Modifiers::PRIVATE))
        .field(
            FieldDef::new("tags", TypeSig::reference("app.List"))
                .with_generic_signature("app.List<str>")
                .annotated(Annotation::marker("app.Transient")),
        )
        .field(FieldDef::new("cache", TypeSig::Int).with_modifiers(Modifiers::SYNTHETIC))
        .method(MethodDef::new("getX", sig("()->i64"), Modifiers::PUBLIC).with_code(vec![
            Instr::Load(0),
            Instr::GetField(x_ref()),
            Instr::ReturnValue,
        ]))
        .method(
            MethodDef::new("doubled", sig("()->i64"), Modifiers::PUBLIC)
                .throwing("app.Overflow")
                .with_code(vec![
                    Instr::Load(0),
                    Instr::GetField(x_ref()),
                    Instr::ConstInt(2),
                    Instr::Mul,
                    Instr::ReturnValue,
                ]),
        )
        .method(
            MethodDef::new("origin", sig("()->i64"), Modifiers::PUBLIC | Modifiers::STATIC)
                .with_code(vec![Instr::ConstInt(0), Instr::ReturnValue]),
        )
        .method(
            MethodDef::new("probe", sig("()->i64"), Modifiers::PRIVATE | Modifiers::SYNTHETIC)
                .with_code(vec![Instr::ConstInt(-1), Instr::ReturnValue]),
        )
        .constructor(
            sig("(i64)->void"),
            vec![Instr::Load(0), Instr::Load(1), Instr::PutField(x_ref()), Instr::Return],
        )
        .default_constructor()
        .encode()
}

fn names<T>(items: &[T], name: impl Fn(&T) -> &str) -> Vec<String> {
    let mut names: Vec<String> = items.iter().map(|item| name(item).to_string()).collect();
    names.sort();
    names
}

// ===== Member Listing =====

#[test]
fn test_members_follow_live_version() {
    let scope = scope();
    scope.define(&point_v1()).unwrap();
    let introspector = scope.introspector();

    let fields = introspector.declared_fields("app.Point").unwrap();
    assert_eq!(names(&fields, |f| f.name.as_str()), vec!["x"]);
    let methods = introspector.declared_methods("app.Point").unwrap();
    assert_eq!(names(&methods, |m| m.name.as_str()), vec!["getX"]);

    scope.reload("app.Point", "v2", &point_v2()).unwrap();

    let fields = introspector.declared_fields("app.Point").unwrap();
    assert_eq!(names(&fields, |f| f.name.as_str()), vec!["tags", "x"]);
    let tags = introspector.field("app.Point", "tags").unwrap().unwrap();
    assert_eq!(tags.generic_signature.as_deref(), Some("app.List<str>"));
    assert_eq!(tags.annotations, vec![Annotation::marker("app.Transient")]);

    let methods = introspector.declared_methods("app.Point").unwrap();
    assert_eq!(names(&methods, |m| m.name.as_str()), vec!["doubled", "getX", "origin"]);
    let doubled = introspector
        .method("app.Point", &MemberKey::new("doubled", sig("()->i64")))
        .unwrap()
        .unwrap();
    assert_eq!(doubled.throws, vec!["app.Overflow".to_string()]);
    assert!(!doubled.is_static());

    let constructors = introspector.constructors("app.Point").unwrap();
    assert_eq!(constructors.len(), 2);
}

#[test]
fn test_synthetic_members_hidden() {
    let scope = scope();
    scope.define(&point_v1()).unwrap();
    scope.reload("app.Point", "v2", &point_v2()).unwrap();
    let introspector = scope.introspector();

    assert!(introspector.field("app.Point", "cache").unwrap().is_none());
    assert!(introspector
        .method("app.Point", &MemberKey::new("probe", sig("()->i64")))
        .unwrap()
        .is_none());
}

#[test]
fn test_annotations_follow_live_version() {
    let scope = scope();
    scope.define(&point_v1()).unwrap();
    let introspector = scope.introspector();
    let before = introspector.annotations("app.Point").unwrap();
    assert_eq!(before[0].get("table"), Some("points"));

    scope.reload("app.Point", "v2", &point_v2()).unwrap();
    let after = introspector.annotations("app.Point").unwrap();
    assert_eq!(after[0].get("table"), Some("points_v2"));
    assert!(introspector.modifiers("app.Point").unwrap().contains(Modifiers::PUBLIC));
}

#[test]
fn test_metadata_rebuilt_after_reload() {
    let scope = scope();
    scope.define(&point_v1()).unwrap();
    let introspector = scope.introspector();

    let first = introspector.metadata("app.Point").unwrap();
    let again = introspector.metadata("app.Point").unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(first.version, 0);

    scope.reload("app.Point", "v2", &point_v2()).unwrap();
    let second = introspector.metadata("app.Point").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.version, 1);

    introspector.invalidate("app.Point");
    let third = introspector.metadata("app.Point").unwrap();
    assert!(!Arc::ptr_eq(&second, &third));
    assert_eq!(third.version, 1);
}

#[test]
fn test_inherited_methods_listed_once() {
    let scope = scope();
    let base = UnitBuilder::class("lib.Shape")
        .method(MethodDef::new("area", sig("()->f64"), Modifiers::PUBLIC).with_code(vec![
            Instr::ConstFloat(0.0),
            Instr::ReturnValue,
        ]))
        .method(MethodDef::new("name", sig("()->str"), Modifiers::PUBLIC).with_code(vec![
            Instr::ConstStr("shape".to_string()),
            Instr::ReturnValue,
        ]))
        .default_constructor()
        .encode();
    let square = UnitBuilder::class("app.Square")
        .extends("lib.Shape")
        .method(MethodDef::new("area", sig("()->f64"), Modifiers::PUBLIC).with_code(vec![
            Instr::ConstFloat(4.0),
            Instr::ReturnValue,
        ]))
        .default_constructor()
        .encode();
    scope.define(&base).unwrap();
    scope.define(&square).unwrap();

    let methods = scope.introspector().methods("app.Square").unwrap();
    let area: Vec<_> = methods.iter().filter(|m| m.name == "area").collect();
    assert_eq!(area.len(), 1);
    assert_eq!(&*area[0].declaring, "app.Square");
    assert!(methods.iter().any(|m| m.name == "name" && &*m.declaring == "lib.Shape"));
}

// ===== Reflective Operations =====

#[test]
fn test_invoke_added_members() {
    let scope = scope();
    scope.define(&point_v1()).unwrap();
    let point = scope.new_instance("app.Point", &MethodSig::void(), vec![]).unwrap();
    scope.reload("app.Point", "v2", &point_v2()).unwrap();
    let introspector = scope.introspector();

    introspector.set_field("app.Point", "x", Some(&point), Value::Int(21)).unwrap();
    let doubled = introspector
        .invoke("app.Point", &MemberKey::new("doubled", sig("()->i64")), vec![point.clone()])
        .unwrap();
    assert_eq!(doubled, Value::Int(42));

    let origin = introspector
        .invoke("app.Point", &MemberKey::new("origin", sig("()->i64")), vec![])
        .unwrap();
    assert_eq!(origin, Value::Int(0));
}

#[test]
fn test_new_instance_with_added_constructor() {
    let scope = scope();
    scope.define(&point_v1()).unwrap();
    assert!(scope.new_instance("app.Point", &sig("(i64)->void"), vec![Value::Int(9)]).is_err());

    scope.reload("app.Point", "v2", &point_v2()).unwrap();
    let point = scope
        .new_instance("app.Point", &sig("(i64)->void"), vec![Value::Int(9)])
        .unwrap();
    assert_eq!(scope.get_field(&point, "x").unwrap(), Value::Int(9));
    assert_eq!(
        scope.invoke_virtual(&point, "getX", &sig("()->i64"), vec![]).unwrap(),
        Value::Int(9)
    );
}

#[test]
fn test_invoke_rejects_wrong_receiver() {
    let scope = scope();
    scope.define(&point_v1()).unwrap();
    let other = UnitBuilder::class("app.Other").default_constructor().encode();
    scope.define(&other).unwrap();
    let receiver = scope.new_instance("app.Other", &MethodSig::void(), vec![]).unwrap();

    let result = scope
        .introspector()
        .invoke("app.Point", &MemberKey::new("getX", sig("()->i64")), vec![receiver]);
    assert!(matches!(result, Err(VmError::ClassCast { .. })));
}

#[test]
fn test_unknown_type() {
    let scope = scope();
    assert!(matches!(
        scope.introspector().metadata("app.Nowhere"),
        Err(VmError::ClassNotFound(_))
    ));
}
