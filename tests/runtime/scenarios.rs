//! Reference scenarios: filter, join, negation, accumulate, xuple
//! lifecycle, and nested epochs.

use std::sync::Arc;

use trellis_foundation::{FieldType, Value};
use trellis_language::{
    ActionDecl, AggregateFn, BinaryOp, Expr, FactDecl, OptionValue, ParamType, Program, RuleDecl,
    SpaceDecl, SubPattern, TypeDecl,
};
use trellis_runtime::{Engine, EngineConfig};
use trellis_xuples::{ManualClock, XupleManager};

use crate::{fact, fired};

#[test]
fn filter() {
    let program = Program::new()
        .with_type(
            TypeDecl::new("Product")
                .key("sku", FieldType::String)
                .field("price", FieldType::Number),
        )
        .with_action(ActionDecl::new("logExpensive").param("sku", ParamType::Scalar(FieldType::String)))
        .with_rule(
            RuleDecl::new("expensive")
                .pattern("p", "Product")
                .when(Expr::field("p", "price").greater_than(Expr::lit(100)))
                .then("logExpensive", vec![Expr::field("p", "sku")]),
        )
        .with_fact(FactDecl::new("Product").set("sku", "A").set("price", 150))
        .with_fact(FactDecl::new("Product").set("sku", "B").set("price", 25));
    let mut engine = Engine::new();

    engine.ingest(&program).unwrap();

    assert_eq!(fired(&engine), vec!["logExpensive(A)"]);
    assert!(engine.get_activations()[0].succeeded());
}

#[test]
fn join() {
    let program = Program::new()
        .with_type(
            TypeDecl::new("User")
                .key("id", FieldType::String)
                .field("age", FieldType::Number),
        )
        .with_type(
            TypeDecl::new("Address")
                .key("user_id", FieldType::String)
                .field("city", FieldType::String),
        )
        .with_action(ActionDecl::new("alert").param("user", ParamType::Any))
        .with_rule(
            RuleDecl::new("minor_in_lille")
                .pattern("u", "User")
                .pattern("a", "Address")
                .when(
                    Expr::field("u", "id")
                        .equals(Expr::field("a", "user_id"))
                        .and(Expr::field("u", "age").less_than(Expr::lit(18)))
                        .and(Expr::field("a", "city").equals(Expr::lit("Lille"))),
                )
                .then("alert", vec![Expr::field("u", "id")]),
        );
    let mut engine = Engine::new();
    engine.ingest(&program).unwrap();

    let user = fact(&engine, "User", vec![("id", "U001".into()), ("age", 16.into())]);
    engine.submit_fact(user).unwrap();
    assert!(engine.get_activations().is_empty());

    let address = fact(
        &engine,
        "Address",
        vec![("user_id", "U001".into()), ("city", "Lille".into())],
    );
    engine.submit_fact(address).unwrap();

    assert_eq!(fired(&engine), vec!["alert(U001)"]);
}

#[test]
fn negation() {
    let program = Program::new()
        .with_type(
            TypeDecl::new("Sensor")
                .key("id", FieldType::String)
                .field("status", FieldType::String),
        )
        .with_action(ActionDecl::new("lonely").param("sensor", ParamType::Any))
        .with_rule(
            RuleDecl::new("lonely")
                .pattern("s", "Sensor")
                .when(
                    Expr::field("s", "status")
                        .equals(Expr::lit("active"))
                        .and(Expr::not_exists(
                            SubPattern::new("other", "Sensor").when(
                                Expr::field("other", "id")
                                    .not_equals(Expr::field("s", "id"))
                                    .and(Expr::field("other", "status").equals(Expr::lit("active"))),
                            ),
                        )),
                )
                .then("lonely", vec![Expr::field("s", "id")]),
        );
    let mut engine = Engine::new();
    engine.ingest(&program).unwrap();

    let x = fact(&engine, "Sensor", vec![("id", "X".into()), ("status", "active".into())]);
    engine.submit_fact(x).unwrap();
    assert_eq!(fired(&engine), vec!["lonely(X)"]);
    assert_eq!(engine.terminal_tokens("lonely").unwrap().len(), 1);

    let y = fact(&engine, "Sensor", vec![("id", "Y".into()), ("status", "active".into())]);
    engine.submit_fact(y).unwrap();

    assert!(engine.get_activations().is_empty());
    assert!(engine.terminal_tokens("lonely").unwrap().is_empty());
}

#[test]
fn accumulate() {
    let program = Program::new()
        .with_type(TypeDecl::new("Order").field("total", FieldType::Number))
        .with_action(ActionDecl::new("audit"))
        .with_rule(
            RuleDecl::new("audit")
                .when(
                    Expr::aggregate(
                        AggregateFn::Sum,
                        Some(Expr::field("o", "total")),
                        SubPattern::new("o", "Order"),
                    )
                    .greater_than(Expr::lit(1000)),
                )
                .then("audit", vec![]),
        );
    let mut engine = Engine::new();
    engine.ingest(&program).unwrap();

    let first = engine
        .submit_fact(fact(&engine, "Order", vec![("total", 400.into())]))
        .unwrap();
    assert!(engine.get_activations().is_empty());

    engine
        .submit_fact(fact(&engine, "Order", vec![("total", 700.into())]))
        .unwrap();
    assert_eq!(fired(&engine), vec!["audit()"]);
    assert_eq!(engine.terminal_tokens("audit").unwrap().len(), 1);

    engine.retract_fact(&first).unwrap();
    assert!(engine.get_activations().is_empty());
    assert!(engine.terminal_tokens("audit").unwrap().is_empty());
}

#[test]
fn xuple_lifecycle() {
    let program = Program::new()
        .with_type(TypeDecl::new("Trigger").key("id", FieldType::String))
        .with_type(TypeDecl::new("Alert").key("code", FieldType::String))
        .with_space(
            SpaceDecl::new("alerts")
                .option("selection", OptionValue::word("lifo"))
                .option("consumption", OptionValue::word("per-agent")),
        )
        .with_rule(
            RuleDecl::new("raise")
                .pattern("t", "Trigger")
                .then(
                    "Xuple",
                    vec![Expr::lit("alerts"), Expr::fact("Alert", vec![("code", Expr::lit("A1"))])],
                )
                .then(
                    "Xuple",
                    vec![Expr::lit("alerts"), Expr::fact("Alert", vec![("code", Expr::lit("A2"))])],
                ),
        )
        .with_fact(FactDecl::new("Trigger").set("id", "go"));
    let clock = ManualClock::at_epoch();
    let spaces = Arc::new(XupleManager::with_clock(Arc::new(clock)));
    let mut engine = Engine::new().with_spaces(spaces);

    engine.ingest(&program).unwrap();

    let space = engine.get_space("alerts").unwrap();
    let code = |x: &trellis_xuples::Xuple| x.payload.get("code").cloned().unwrap();
    let a2 = space.retrieve("ag1").unwrap().unwrap();
    assert_eq!(code(&a2), Value::from("A2"));
    assert_eq!(a2.triggering_facts[0].id().as_str(), "Trigger~go");
    space.mark_consumed(a2.id, "ag1").unwrap();
    assert_eq!(code(&space.retrieve("ag1").unwrap().unwrap()), Value::from("A1"));
    assert_eq!(code(&space.retrieve("ag2").unwrap().unwrap()), Value::from("A2"));
    assert_eq!(engine.metrics().xuples_published, 2);
}

#[test]
fn nested_epoch() {
    let program = Program::new()
        .with_type(
            TypeDecl::new("Counter")
                .key("id", FieldType::String)
                .field("n", FieldType::Number),
        )
        .with_rule(
            RuleDecl::new("count")
                .pattern("c", "Counter")
                .when(Expr::field("c", "n").less_than(Expr::lit(3)))
                .then(
                    "Update",
                    vec![Expr::fact(
                        "Counter",
                        vec![
                            ("id", Expr::field("c", "id")),
                            (
                                "n",
                                Expr::binary(BinaryOp::Add, Expr::field("c", "n"), Expr::lit(1)),
                            ),
                        ],
                    )],
                ),
        );
    let mut engine = Engine::with_config(EngineConfig::development()).unwrap();
    engine.ingest(&program).unwrap();

    let id = engine
        .submit_fact(fact(&engine, "Counter", vec![("id", "k".into()), ("n", 0.into())]))
        .unwrap();

    let stored = engine.fact(&id).unwrap();
    assert_eq!(stored.get("n"), Some(&Value::Int(3)));
    let updates = engine
        .get_activations()
        .iter()
        .filter(|a| &*a.action == "Update")
        .count();
    assert_eq!(updates, 3);
    assert!(engine.metrics().max_depth <= 3);
}
