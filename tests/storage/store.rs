//! Integration tests for FactStore

use std::sync::Arc;
use trellis_foundation::{ErrorKind, Fact, FieldDescriptor, FieldType, TypeSchema, Value};
use trellis_storage::FactStore;

fn item(sku: &str, qty: i64) -> Arc<Fact> {
    let schema = Arc::new(
        TypeSchema::new(
            "Item",
            vec![
                FieldDescriptor::key("sku", FieldType::String),
                FieldDescriptor::new("qty", FieldType::Number),
            ],
        )
        .unwrap(),
    );
    Arc::new(Fact::new(schema, [("sku", Value::from(sku)), ("qty", Value::Int(qty))]).unwrap())
}

fn note(text: &str) -> Arc<Fact> {
    let schema =
        Arc::new(TypeSchema::new("Note", vec![FieldDescriptor::new("text", FieldType::String)]).unwrap());
    Arc::new(Fact::new(schema, [("text", Value::from(text))]).unwrap())
}

#[test]
fn add_and_lookup() {
    let mut store = FactStore::new();
    let fact = item("a", 1);
    let handle = store.add(Arc::clone(&fact)).unwrap();
    assert_eq!(store.get(fact.id()), Some(&fact));
    assert_eq!(store.handle_of(fact.id()), Some(handle));
    assert_eq!(store.resolve(handle), Some(&fact));
}

#[test]
fn duplicate_identity_is_rejected() {
    let mut store = FactStore::new();
    store.add(item("a", 1)).unwrap();
    let err = store.add(item("a", 2)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateIdentity(_)));
    assert_eq!(store.len(), 1);
}

#[test]
fn capacity_limit_is_enforced() {
    let mut store = FactStore::new().with_capacity_limit(2);
    store.add(item("a", 1)).unwrap();
    store.add(item("b", 1)).unwrap();
    let err = store.add(item("c", 1)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::CapacityExceeded { limit: 2 }));
    assert!(err.is_structural());
}

#[test]
fn handles_are_never_reused() {
    let mut store = FactStore::new();
    let first = store.add(item("a", 1)).unwrap();
    store.retract(item("a", 1).id()).unwrap();
    let second = store.add(item("a", 1)).unwrap();
    assert!(second > first);
    assert!(store.resolve(first).is_none());
}

#[test]
fn update_replaces_image_under_a_fresh_handle() {
    let mut store = FactStore::new();
    store.add(item("a", 1)).unwrap();
    store.add(item("b", 1)).unwrap();

    let replaced = store.update(item("a", 1).id(), item("a", 9)).unwrap();

    assert_eq!(replaced.old.get("qty"), Some(&Value::Int(1)));
    assert!(replaced.new_handle > replaced.old_handle);
    let order: Vec<_> = store.iter_type("Item").map(|(_, f)| f.id().to_string()).collect();
    assert_eq!(order, vec!["Item~b", "Item~a"]);
}

#[test]
fn update_checks_target_and_identity() {
    let mut store = FactStore::new();
    store.add(item("a", 1)).unwrap();

    let missing = store.update(item("zz", 1).id(), item("zz", 2)).unwrap_err();
    assert!(matches!(missing.kind, ErrorKind::FactNotFound(_)));

    let mismatch = store.update(item("a", 1).id(), item("b", 2)).unwrap_err();
    assert!(matches!(mismatch.kind, ErrorKind::PrimaryKeyMismatch { .. }));
}

#[test]
fn iteration_is_scoped_by_type() {
    let mut store = FactStore::new();
    store.add(item("a", 1)).unwrap();
    store.add(note("hello")).unwrap();
    store.add(item("b", 2)).unwrap();
    assert_eq!(store.iter_type("Item").count(), 2);
    assert_eq!(store.iter_type("Note").count(), 1);
    assert_eq!(store.iter_type("Ghost").count(), 0);
    assert_eq!(store.iter().count(), 3);
}

#[test]
fn snapshots_survive_later_changes() {
    let mut store = FactStore::new();
    store.add(item("a", 1)).unwrap();
    let snapshot = store.clone();
    store.retract(item("a", 1).id()).unwrap();
    store.add(item("b", 1)).unwrap();
    assert!(snapshot.contains(item("a", 1).id()));
    assert!(!snapshot.contains(item("b", 1).id()));
}
