//! Integration tests for Value

use std::collections::HashSet;
use std::sync::Arc;
use trellis_foundation::Value;

#[test]
fn nil_and_bool_accessors() {
    assert!(Value::Nil.is_nil());
    assert_eq!(Value::Bool(true).as_bool(), Some(true));
    assert_eq!(Value::Int(1).as_bool(), None);
}

#[test]
fn numeric_accessors() {
    assert_eq!(Value::Int(42).as_int(), Some(42));
    assert_eq!(Value::Int(42).as_float(), None);
    assert_eq!(Value::Float(1.5).as_number(), Some(1.5));
    assert_eq!(Value::Int(2).as_number(), Some(2.0));
    assert!(Value::Float(0.5).is_number());
    assert!(!Value::from("1").is_number());
}

#[test]
fn strict_equality_keeps_int_and_float_apart() {
    assert_ne!(Value::Int(3), Value::Float(3.0));
    assert!(Value::Int(3).loose_eq(&Value::Float(3.0)));
    assert!(!Value::Int(3).loose_eq(&Value::from("3")));
}

#[test]
fn equal_values_hash_alike() {
    let mut set = HashSet::new();
    set.insert(Value::String(Arc::from("a")));
    set.insert(Value::from("a"));
    set.insert(Value::Float(0.1 + 0.2));
    set.insert(Value::Float(0.1 + 0.2));
    assert_eq!(set.len(), 2);
}

#[test]
fn ordering_is_partial_across_kinds() {
    assert!(Value::Int(1) < Value::Float(1.5));
    assert!(Value::from("apple") < Value::from("banana"));
    assert_eq!(Value::from("a").partial_cmp(&Value::Int(1)), None);
    assert_eq!(Value::Nil.partial_cmp(&Value::Bool(false)), None);
}

#[test]
fn display_is_unquoted_and_debug_is_quoted() {
    assert_eq!(Value::from("hi").to_string(), "hi");
    assert_eq!(format!("{:?}", Value::from("hi")), "\"hi\"");
    assert_eq!(Value::Nil.to_string(), "null");
}
