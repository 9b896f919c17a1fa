//! The shared engine handle

use std::thread;

use trellis_foundation::FieldType;
use trellis_language::{Expr, Program, RuleDecl, SpaceDecl, TypeDecl};
use trellis_runtime::{Engine, EngineHandle};

use crate::fact;

fn handle() -> EngineHandle {
    let program = Program::new()
        .with_type(TypeDecl::new("Task").key("id", FieldType::Number))
        .with_space(SpaceDecl::new("tasks"))
        .with_rule(
            RuleDecl::new("dispatch")
                .pattern("t", "Task")
                .then("Xuple", vec![Expr::lit("tasks"), Expr::var("t")]),
        );
    let mut engine = Engine::new();
    engine.ingest(&program).unwrap();
    EngineHandle::new(engine)
}

#[test]
fn producers_and_consumers_share_one_engine() {
    let handle = handle();

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let handle = handle.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let id = p * 100 + i;
                    let task = handle
                        .with_engine(|engine| fact(engine, "Task", vec![("id", id.into())]))
                        .unwrap();
                    handle.submit_fact(task).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let space = handle.spaces().get("tasks").unwrap();
    let mut consumed = 0;
    while space.retrieve("worker").unwrap().is_some() {
        consumed += 1;
    }
    assert_eq!(consumed, 100);
    let metrics = handle.metrics().unwrap();
    assert_eq!(metrics.facts_submitted, 100);
    assert_eq!(metrics.xuples_published, 100);
}

#[test]
fn handle_reports_the_last_calls_activations() {
    let handle = handle();
    let task = handle
        .with_engine(|engine| fact(engine, "Task", vec![("id", 1.into())]))
        .unwrap();

    let id = handle.submit_fact(task).unwrap();
    assert_eq!(handle.activations().unwrap().len(), 1);

    handle.retract_fact(&id).unwrap();
    assert!(handle.activations().unwrap().is_empty());
}

#[test]
fn removed_rule_stops_dispatching_through_the_handle() {
    let handle = handle();
    let first = handle
        .with_engine(|engine| fact(engine, "Task", vec![("id", 1.into())]))
        .unwrap();
    handle.submit_fact(first).unwrap();

    handle.remove_rule("dispatch").unwrap();
    let second = handle
        .with_engine(|engine| fact(engine, "Task", vec![("id", 2.into())]))
        .unwrap();
    handle.submit_fact(second).unwrap();

    assert!(handle.activations().unwrap().is_empty());
    let metrics = handle.metrics().unwrap();
    assert_eq!(metrics.xuples_published, 1);
    assert_eq!(metrics.rules_removed, 1);
    assert!(handle.remove_rule("dispatch").is_err());
}
