//! Integration tests for Layer 4: Tuple-spaces
//!
//! Tests for policies, retention on a manual clock, and concurrent consumers.

mod concurrency;
mod lifecycle;

use std::sync::Arc;

use trellis_foundation::{Fact, FieldDescriptor, FieldType, TypeSchema, Value};

/// An `Alert(code)` fact.
pub fn alert(code: i64) -> Arc<Fact> {
    let schema = Arc::new(
        TypeSchema::new("Alert", vec![FieldDescriptor::key("code", FieldType::Number)]).unwrap(),
    );
    Arc::new(Fact::new(schema, [("code", Value::Int(code))]).unwrap())
}

/// The `code` of a xuple's payload.
pub fn code(xuple: &trellis_xuples::Xuple) -> i64 {
    xuple.payload.get("code").and_then(Value::as_int).unwrap()
}
