//! Integration tests for facts and identities

use std::sync::Arc;
use trellis_foundation::{ErrorKind, Fact, FactId, FieldDescriptor, FieldType, TypeSchema, Value};

fn user() -> Arc<TypeSchema> {
    Arc::new(
        TypeSchema::new(
            "User",
            vec![
                FieldDescriptor::key("team", FieldType::String),
                FieldDescriptor::key("login", FieldType::String),
                FieldDescriptor::new("age", FieldType::Number),
            ],
        )
        .unwrap(),
    )
}

fn reading() -> Arc<TypeSchema> {
    Arc::new(
        TypeSchema::new(
            "Reading",
            vec![
                FieldDescriptor::new("sensor", FieldType::String),
                FieldDescriptor::new("value", FieldType::Number),
            ],
        )
        .unwrap(),
    )
}

fn make_user(team: &str, login: &str, age: i64) -> Fact {
    Fact::new(
        user(),
        [
            ("team", Value::from(team)),
            ("login", Value::from(login)),
            ("age", Value::Int(age)),
        ],
    )
    .unwrap()
}

// =============================================================================
// Identity
// =============================================================================

#[test]
fn composite_key_identity() {
    let fact = make_user("core", "ada", 36);
    assert_eq!(fact.id().as_str(), "User~core_ada");
    assert_eq!(fact.id().type_name(), "User");
    assert_eq!(fact.id().key_components(), vec!["core", "ada"]);
}

#[test]
fn separators_in_keys_are_escaped() {
    let fact = make_user("a_b", "x~y z", 1);
    assert_eq!(fact.id().key_components(), vec!["a_b", "x~y z"]);
    assert_ne!(fact.id(), make_user("a", "b_x~y z", 1).id());
}

#[test]
fn identity_ignores_non_key_fields() {
    assert_eq!(make_user("core", "ada", 36).id(), make_user("core", "ada", 99).id());
}

#[test]
fn content_identity_is_order_independent() {
    let a = Fact::new(reading(), [("sensor", Value::from("t1")), ("value", Value::Int(5))]).unwrap();
    let b = Fact::new(reading(), [("value", Value::Int(5)), ("sensor", Value::from("t1"))]).unwrap();
    let c = Fact::new(reading(), [("value", Value::Int(6)), ("sensor", Value::from("t1"))]).unwrap();
    assert_eq!(a.id(), b.id());
    assert_ne!(a.id(), c.id());
    assert!(a.id().as_str().starts_with("Reading~"));
}

#[test]
fn raw_identities_compare_by_text() {
    assert_eq!(FactId::from("User~core_ada"), make_user("core", "ada", 1).id().clone());
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn missing_field_is_rejected() {
    let err = Fact::new(user(), [("team", Value::from("core"))]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::MissingField { .. }));
}

#[test]
fn unknown_field_is_rejected() {
    let err = Fact::new(
        reading(),
        [
            ("sensor", Value::from("t")),
            ("value", Value::Int(1)),
            ("unit", Value::from("C")),
        ],
    )
    .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownField { .. }));
}

#[test]
fn field_types_are_checked() {
    let err = Fact::new(
        reading(),
        [("sensor", Value::from("t")), ("value", Value::from("hot"))],
    )
    .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::FieldTypeMismatch { .. }));
}

#[test]
fn modified_copy_remembers_its_origin() {
    let original = make_user("core", "ada", 36);
    let older = original.with_fields([("age", Value::Int(37))]).unwrap();
    assert_eq!(older.origin(), Some(original.id()));
    assert_eq!(older.update_target(), original.id());
    assert_eq!(older.get("age"), Some(&Value::Int(37)));

    let moved = original.with_fields([("login", Value::from("grace"))]).unwrap();
    assert_ne!(moved.id(), original.id());
    assert_eq!(moved.update_target(), original.id());
}

#[test]
fn fields_iterate_in_declaration_order() {
    let fact = make_user("core", "ada", 36);
    let names: Vec<_> = fact.fields().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["team", "login", "age"]);
    assert_eq!(fact.to_string(), "User(team: \"core\", login: \"ada\", age: 36)");
}
