//! Property tests: the engine agrees with a plain map model

use std::collections::BTreeMap;

use proptest::prelude::*;
use trellis_foundation::{FactId, FieldType, Value};
use trellis_language::{Expr, Program, RuleDecl, TypeDecl};
use trellis_runtime::Engine;

use crate::fact;

#[derive(Clone, Debug)]
enum Op {
    Submit(u8, i64),
    Update(u8, i64),
    Retract(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, 0i64..5).prop_map(|(k, q)| Op::Submit(k, q)),
        (0u8..4, 0i64..5).prop_map(|(k, q)| Op::Update(k, q)),
        (0u8..4).prop_map(Op::Retract),
    ]
}

fn engine() -> Engine {
    let program = Program::new()
        .with_type(
            TypeDecl::new("Item")
                .key("sku", FieldType::String)
                .field("qty", FieldType::Number),
        )
        .with_rule(
            RuleDecl::new("restock")
                .pattern("i", "Item")
                .when(Expr::field("i", "qty").less_than(Expr::lit(2)))
                .then("Log", vec![Expr::field("i", "sku")]),
        );
    let mut engine = Engine::new();
    engine.ingest(&program).unwrap();
    engine
}

fn item(engine: &Engine, sku: u8, qty: i64) -> std::sync::Arc<trellis_foundation::Fact> {
    fact(
        engine,
        "Item",
        vec![("sku", Value::from(format!("s{sku}"))), ("qty", Value::Int(qty))],
    )
}

proptest! {
    #[test]
    fn engine_tracks_a_map_model(ops in prop::collection::vec(op(), 1..40)) {
        let mut engine = engine();
        let mut model: BTreeMap<u8, i64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Submit(k, q) => {
                    let ok = engine.submit_fact(item(&engine, k, q)).is_ok();
                    prop_assert_eq!(ok, !model.contains_key(&k));
                    model.entry(k).or_insert(q);
                }
                Op::Update(k, q) => {
                    let ok = engine.update_fact(item(&engine, k, q)).is_ok();
                    prop_assert_eq!(ok, model.contains_key(&k));
                    if let Some(stored) = model.get_mut(&k) {
                        *stored = q;
                    }
                }
                Op::Retract(k) => {
                    let id = FactId::from(format!("Item~s{k}").as_str());
                    let ok = engine.retract_fact(&id).is_ok();
                    prop_assert_eq!(ok, model.remove(&k).is_some());
                }
            }

            prop_assert_eq!(engine.fact_count(), model.len());
            let low = model.values().filter(|q| **q < 2).count();
            prop_assert_eq!(engine.terminal_tokens("restock").unwrap().len(), low);
        }
    }

    #[test]
    fn failed_calls_change_nothing(qty in 0i64..5) {
        let mut engine = engine();
        engine.submit_fact(item(&engine, 0, qty)).unwrap();
        let before = engine.network().contents();
        let count = engine.fact_count();

        prop_assert!(engine.submit_fact(item(&engine, 0, qty + 1)).is_err());
        prop_assert!(engine.update_fact(item(&engine, 9, qty)).is_err());

        prop_assert_eq!(engine.network().contents(), before);
        prop_assert_eq!(engine.fact_count(), count);
    }
}
