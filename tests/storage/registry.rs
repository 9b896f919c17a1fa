//! Integration tests for TypeRegistry

use trellis_foundation::{ErrorKind, FieldDescriptor, FieldType, TypeSchema};
use trellis_storage::{Declared, TypeRegistry};

fn schema(name: &str, extra: bool) -> TypeSchema {
    let mut fields = vec![FieldDescriptor::key("id", FieldType::String)];
    if extra {
        fields.push(FieldDescriptor::new("note", FieldType::String));
    }
    TypeSchema::new(name, fields).unwrap()
}

#[test]
fn declare_is_idempotent_for_identical_schemas() {
    let mut registry = TypeRegistry::new();
    assert_eq!(registry.declare(schema("User", false)).unwrap(), Declared::Added);
    assert_eq!(registry.declare(schema("User", false)).unwrap(), Declared::Unchanged);
    assert_eq!(registry.len(), 1);
}

#[test]
fn conflicting_redeclaration_is_rejected() {
    let mut registry = TypeRegistry::new();
    registry.declare(schema("User", false)).unwrap();
    let err = registry.declare(schema("User", true)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateType(_)));
    assert!(registry.require("User").unwrap().field("note").is_none());
}

#[test]
fn iteration_follows_declaration_order() {
    let mut registry = TypeRegistry::new();
    for name in ["Zeta", "Alpha", "Mid"] {
        registry.declare(schema(name, false)).unwrap();
    }
    let names: Vec<_> = registry.iter().map(|s| s.name().to_string()).collect();
    assert_eq!(names, vec!["Zeta", "Alpha", "Mid"]);
}

#[test]
fn require_reports_unknown_types() {
    let registry = TypeRegistry::new();
    assert!(registry.is_empty());
    let err = registry.require("Ghost").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownType(ref name) if name == "Ghost"));
}

#[test]
fn clones_are_independent_snapshots() {
    let mut registry = TypeRegistry::new();
    registry.declare(schema("User", false)).unwrap();
    let snapshot = registry.clone();
    registry.declare(schema("Order", false)).unwrap();
    assert_eq!(snapshot.len(), 1);
    assert!(!snapshot.contains("Order"));
}
