//! Integration tests for the program AST

use trellis_foundation::{ErrorKind, FieldType, Value};
use trellis_language::{
    AggregateFn, ActionDecl, Expr, ParamType, Program, RuleDecl, SubPattern, TypeDecl,
};

#[test]
fn type_decl_builds_a_schema() {
    let schema = TypeDecl::new("User")
        .key("id", FieldType::String)
        .field("age", FieldType::Number)
        .to_schema()
        .unwrap();
    assert_eq!(&**schema.name(), "User");
    assert!(schema.has_primary_key());
    assert_eq!(schema.field_index("age"), Some(1));
}

#[test]
fn duplicate_field_names_are_invalid() {
    let err = TypeDecl::new("User")
        .field("a", FieldType::String)
        .field("a", FieldType::Number)
        .to_schema()
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidSchema { .. }));
}

#[test]
fn rule_renders_as_source() {
    let rule = RuleDecl::new("adults")
        .pattern("u", "User")
        .when(Expr::field("u", "age").at_least(Expr::lit(18)))
        .then("Print", vec![Expr::field("u", "id")]);
    assert_eq!(
        rule.to_string(),
        "rule adults : {u: User} / (u.age >= 18) ==> Print(u.id)"
    );
}

#[test]
fn quantifiers_render_with_keywords() {
    let rule = RuleDecl::new("orphans")
        .pattern("u", "User")
        .when(Expr::not_exists(
            SubPattern::new("o", "Order").when(Expr::field("o", "user").equals(Expr::field("u", "id"))),
        ));
    assert!(rule.to_string().contains("NOT("));
}

#[test]
fn free_vars_include_outer_references_inside_sub_patterns() {
    let e = Expr::aggregate(
        AggregateFn::Sum,
        Some(Expr::field("o", "total")),
        SubPattern::new("o", "Order").when(Expr::field("o", "user").equals(Expr::field("u", "id"))),
    );
    let vars: Vec<_> = e.free_vars().into_iter().collect();
    assert_eq!(vars, vec!["u"]);
    assert!(e.contains_aggregate());
}

#[test]
fn conjoin_and_conjuncts_are_inverse() {
    let parts = vec![
        Expr::var("a"),
        Expr::var("b").or(Expr::var("c")),
        Expr::lit(true),
    ];
    let joined = Expr::conjoin(parts.clone()).unwrap();
    assert_eq!(joined.conjuncts(), parts);
    assert!(Expr::conjoin(Vec::new()).is_none());
}

#[test]
fn param_types_accept_values() {
    assert!(ParamType::Any.accepts(&Value::Nil));
    assert!(ParamType::Scalar(FieldType::Number).accepts(&Value::Float(1.0)));
    assert!(!ParamType::Scalar(FieldType::Number).accepts(&Value::from("1")));
    assert!(!ParamType::Record("User".into()).accepts(&Value::from("User~1")));
}

#[test]
fn program_builders_collect_declarations() {
    let program = Program::new()
        .with_type(TypeDecl::new("User").key("id", FieldType::String))
        .with_action(ActionDecl::new("notify").param("who", ParamType::Record("User".into())))
        .with_rule(RuleDecl::new("r").pattern("u", "User").then("notify", vec![Expr::var("u")]));
    assert_eq!(program.types.len(), 1);
    assert_eq!(program.actions[0].params.len(), 1);
    assert_eq!(program.rules[0].actions[0].name, "notify");
    assert!(program.facts.is_empty());
}
