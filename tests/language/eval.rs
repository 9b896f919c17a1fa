//! Integration tests for compiling and evaluating expressions

use std::sync::Arc;
use trellis_foundation::{ErrorKind, Fact, FieldDescriptor, FieldType, TypeSchema, Value};
use trellis_language::{BinaryOp, Compiler, EmptyEnv, Expr, Scope, SliceEnv};

fn product() -> Arc<TypeSchema> {
    Arc::new(
        TypeSchema::new(
            "Product",
            vec![
                FieldDescriptor::key("sku", FieldType::String),
                FieldDescriptor::new("price", FieldType::Number),
                FieldDescriptor::new("label", FieldType::String),
            ],
        )
        .unwrap(),
    )
}

fn widget(price: i64) -> Value {
    Value::from(
        Fact::new(
            product(),
            [
                ("sku", Value::from("W-1")),
                ("price", Value::Int(price)),
                ("label", Value::from("Blue Widget")),
            ],
        )
        .unwrap(),
    )
}

fn eval(expr: &Expr) -> trellis_foundation::Result<Value> {
    let scope = Scope::new();
    Compiler::new(&scope).compile(expr)?.evaluate(&EmptyEnv)
}

fn eval_on(expr: &Expr, p: Value) -> trellis_foundation::Result<Value> {
    let scope = Scope::new().with_fact("p", 0, product());
    Compiler::new(&scope).compile(expr)?.evaluate(&SliceEnv(&[p]))
}

// =============================================================================
// Arithmetic
// =============================================================================

#[test]
fn integer_arithmetic_stays_integral() {
    let e = Expr::binary(BinaryOp::Mul, Expr::lit(6), Expr::lit(7));
    assert_eq!(eval(&e).unwrap(), Value::Int(42));
    let e = Expr::binary(BinaryOp::Div, Expr::lit(8), Expr::lit(2));
    assert_eq!(eval(&e).unwrap(), Value::Int(4));
}

#[test]
fn inexact_division_widens_to_float() {
    let e = Expr::binary(BinaryOp::Div, Expr::lit(7), Expr::lit(2));
    assert_eq!(eval(&e).unwrap(), Value::Float(3.5));
}

#[test]
fn division_by_zero_is_an_error() {
    let e = Expr::binary(BinaryOp::Mod, Expr::lit(7), Expr::lit(0));
    assert!(matches!(eval(&e).unwrap_err().kind, ErrorKind::DivisionByZero));
}

#[test]
fn integer_overflow_is_an_error() {
    let e = Expr::binary(BinaryOp::Add, Expr::lit(i64::MAX), Expr::lit(1));
    assert!(matches!(eval(&e).unwrap_err().kind, ErrorKind::Overflow(_)));
}

#[test]
fn string_concatenation() {
    let e = Expr::binary(BinaryOp::Add, Expr::lit("ab"), Expr::lit("cd"));
    assert_eq!(eval(&e).unwrap(), Value::from("abcd"));
}

// =============================================================================
// Null Semantics
// =============================================================================

#[test]
fn null_propagates_through_arithmetic_and_comparison() {
    let e = Expr::binary(BinaryOp::Add, Expr::lit(Value::Nil), Expr::lit(1));
    assert_eq!(eval(&e).unwrap(), Value::Nil);
    let e = Expr::lit(Value::Nil).less_than(Expr::lit(1));
    assert_eq!(eval(&e).unwrap(), Value::Nil);
}

#[test]
fn three_valued_logic() {
    let unknown = || Expr::lit(Value::Nil);
    assert_eq!(eval(&unknown().and(Expr::lit(false))).unwrap(), Value::Bool(false));
    assert_eq!(eval(&unknown().or(Expr::lit(true))).unwrap(), Value::Bool(true));
    assert_eq!(eval(&unknown().and(Expr::lit(true))).unwrap(), Value::Nil);
}

#[test]
fn null_condition_fails_without_error() {
    let scope = Scope::new();
    let compiled = Compiler::new(&scope)
        .compile(&Expr::lit(Value::Nil).greater_than(Expr::lit(0)))
        .unwrap();
    assert!(!compiled.test(&EmptyEnv).unwrap());
}

#[test]
fn equality_is_numeric_across_int_and_float() {
    assert_eq!(eval(&Expr::lit(3).equals(Expr::lit(3.0))).unwrap(), Value::Bool(true));
    assert_eq!(eval(&Expr::lit(3).not_equals(Expr::lit("3"))).unwrap(), Value::Bool(true));
}

// =============================================================================
// Fields, Patterns, Functions
// =============================================================================

#[test]
fn field_access_on_bound_fact() {
    let e = Expr::field("p", "price").at_least(Expr::lit(10));
    assert_eq!(eval_on(&e, widget(25)).unwrap(), Value::Bool(true));
    assert_eq!(eval_on(&e, widget(5)).unwrap(), Value::Bool(false));
}

#[test]
fn id_reads_the_internal_identity() {
    let e = Expr::field("p", "id");
    assert_eq!(eval_on(&e, widget(1)).unwrap(), Value::from("Product~W-1"));
}

#[test]
fn unknown_field_fails_at_compile_time() {
    let scope = Scope::new().with_fact("p", 0, product());
    let err = Compiler::new(&scope).compile(&Expr::field("p", "colour")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownField { .. }));
}

#[test]
fn unknown_variable_fails_at_compile_time() {
    let err = eval(&Expr::var("ghost")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownVariable(_)));
}

#[test]
fn like_and_matches() {
    let like = Expr::field("p", "label").like("Blue%");
    assert_eq!(eval_on(&like, widget(1)).unwrap(), Value::Bool(true));
    let like = Expr::field("p", "label").like("%Red%");
    assert_eq!(eval_on(&like, widget(1)).unwrap(), Value::Bool(false));
    let matches = Expr::field("p", "label").matches("[A-Z][a-z]+ W.*");
    assert_eq!(eval_on(&matches, widget(1)).unwrap(), Value::Bool(true));
}

#[test]
fn invalid_static_regex_fails_at_compile_time() {
    let err = eval(&Expr::lit("x").matches("(")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidRegex { .. }));
}

#[test]
fn membership_and_contains() {
    let e = Expr::lit(2).in_list(vec![Expr::lit(1), Expr::lit(2.0)]);
    assert_eq!(eval(&e).unwrap(), Value::Bool(true));
    let e = Expr::lit("haystack").contains(Expr::lit("st"));
    assert_eq!(eval(&e).unwrap(), Value::Bool(true));
}

#[test]
fn builtin_functions() {
    let e = Expr::call("upper", vec![Expr::call("trim", vec![Expr::lit("  hi ")])]);
    assert_eq!(eval(&e).unwrap(), Value::from("HI"));
    let e = Expr::call("MAX", vec![Expr::lit(3), Expr::lit(9.5), Expr::lit(-1)]);
    assert_eq!(eval(&e).unwrap(), Value::Float(9.5));
    let e = Expr::call("SUBSTRING", vec![Expr::lit("abcdef"), Expr::lit(1), Expr::lit(3)]);
    assert_eq!(eval(&e).unwrap(), Value::from("bcd"));
}

#[test]
fn unknown_function_and_bad_arity() {
    let err = eval(&Expr::call("SHOUT", vec![Expr::lit("x")])).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidExpression(_)));
    let err = eval(&Expr::call("ABS", vec![])).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::ArityMismatch { .. }));
}

#[test]
fn casts() {
    assert_eq!(eval(&Expr::lit("42").cast(FieldType::Number)).unwrap(), Value::Int(42));
    assert_eq!(eval(&Expr::lit(7).cast(FieldType::String)).unwrap(), Value::from("7"));
    let err = eval(&Expr::lit("seven").cast(FieldType::Number)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidCast { .. }));
}
