//! Integration tests for the error taxonomy

use trellis_foundation::{Error, ErrorCategory, ErrorContext, ErrorKind, FactId};

#[test]
fn every_kind_maps_to_one_category() {
    let cases = [
        (ErrorKind::UnknownType("T".into()), ErrorCategory::Validation),
        (ErrorKind::FactNotFound(FactId::from("T~1")), ErrorCategory::Validation),
        (ErrorKind::DivisionByZero, ErrorCategory::Execution),
        (ErrorKind::RecursionLimit { limit: 3 }, ErrorCategory::Execution),
        (
            ErrorKind::ActionValidation {
                action: "Print".into(),
                message: "expected string".into(),
            },
            ErrorCategory::ActionValidation,
        ),
        (ErrorKind::SpaceNotFound("s".into()), ErrorCategory::TupleSpace),
        (ErrorKind::Internal("boom".into()), ErrorCategory::Internal),
    ];
    for (kind, category) in cases {
        assert_eq!(kind.category(), category, "{kind}");
    }
}

#[test]
fn only_recursion_and_capacity_are_structural() {
    assert!(Error::new(ErrorKind::RecursionLimit { limit: 1 }).is_structural());
    assert!(Error::new(ErrorKind::CapacityExceeded { limit: 1 }).is_structural());
    assert!(!Error::new(ErrorKind::DivisionByZero).is_structural());
    assert!(!Error::unknown_type("T").is_structural());
}

#[test]
fn frames_accumulate_outermost_first() {
    let err = Error::new(ErrorKind::DivisionByZero)
        .with_frame("rule audit")
        .with_frame("action Print");
    let context = err.context.unwrap();
    assert_eq!(context.stack, vec!["rule audit", "action Print"]);
}

#[test]
fn context_renders_position_and_frames() {
    let context = ErrorContext::new()
        .with_source("orders.tsd")
        .with_position(3, 7)
        .with_frame("rule big");
    let rendered = context.to_string();
    assert!(rendered.starts_with("at orders.tsd:3:7"));
    assert!(rendered.contains("in rule big"));
}

#[test]
fn causes_are_exposed_as_sources() {
    let err = Error::new(ErrorKind::ActionExecution {
        action: "Xuple".into(),
        message: "tuple-space not found: s".into(),
    })
    .with_cause(Error::new(ErrorKind::SpaceNotFound("s".into())));
    let source = std::error::Error::source(&err).unwrap();
    assert_eq!(source.to_string(), "tuple-space not found: s");
}
