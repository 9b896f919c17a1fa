//! Matching through alpha, join, quantifier, and accumulate nodes

use trellis_foundation::{ErrorKind, FactId, Value};
use trellis_language::{AggregateFn, Expr, RuleDecl, SubPattern};

use crate::Fixture;

fn customer_orders() -> RuleDecl {
    RuleDecl::new("customer_orders")
        .pattern("c", "Customer")
        .pattern("o", "Order")
        .when(Expr::field("o", "customer").equals(Expr::field("c", "id")))
}

#[test]
fn two_way_join_on_a_shared_key() {
    let mut fx = Fixture::new();
    let rule = fx.rule(&customer_orders());
    fx.customer("ann", "gold");
    fx.customer("bob", "basic");
    fx.order("o1", "ann", 10);
    fx.order("o2", "zed", 10);

    assert_eq!(fx.matches(rule), vec![vec!["Customer~ann", "Order~o1"]]);
}

#[test]
fn three_way_join_with_a_filter() {
    let mut fx = Fixture::new();
    let rule = fx.rule(
        &RuleDecl::new("refunded_gold")
            .pattern("c", "Customer")
            .pattern("o", "Order")
            .pattern("r", "Refund")
            .when(
                Expr::field("o", "customer")
                    .equals(Expr::field("c", "id"))
                    .and(Expr::field("r", "order").equals(Expr::field("o", "id")))
                    .and(Expr::field("c", "tier").equals(Expr::lit("gold"))),
            ),
    );
    fx.customer("ann", "gold");
    fx.customer("bob", "basic");
    fx.order("o1", "ann", 10);
    fx.order("o2", "bob", 10);
    fx.refund("o1");
    fx.refund("o2");

    assert_eq!(
        fx.matches(rule),
        vec![vec!["Customer~ann", "Order~o1", "Refund~o1"]]
    );
}

#[test]
fn retracting_the_middle_fact_removes_the_match() {
    let mut fx = Fixture::new();
    let rule = fx.rule(&customer_orders());
    fx.customer("ann", "gold");
    fx.order("o1", "ann", 10);
    fx.order("o2", "ann", 20);
    assert_eq!(fx.matches(rule).len(), 2);

    fx.retract(&FactId::from("Order~o1"));

    assert_eq!(fx.matches(rule), vec![vec!["Customer~ann", "Order~o2"]]);
}

#[test]
fn negation_matches_until_a_blocker_arrives() {
    let mut fx = Fixture::new();
    let rule = fx.rule(
        &RuleDecl::new("idle").pattern("c", "Customer").when(Expr::not_exists(
            SubPattern::new("o", "Order").when(Expr::field("o", "customer").equals(Expr::field("c", "id"))),
        )),
    );
    fx.customer("ann", "gold");
    assert_eq!(fx.matches(rule).len(), 1);

    fx.order("o1", "ann", 5);
    assert!(fx.matches(rule).is_empty());

    fx.retract(&FactId::from("Order~o1"));
    assert_eq!(fx.matches(rule).len(), 1);
}

#[test]
fn exists_matches_once_regardless_of_witnesses() {
    let mut fx = Fixture::new();
    let rule = fx.rule(
        &RuleDecl::new("active").pattern("c", "Customer").when(Expr::exists(
            SubPattern::new("o", "Order").when(Expr::field("o", "customer").equals(Expr::field("c", "id"))),
        )),
    );
    fx.customer("ann", "gold");
    fx.order("o1", "ann", 5);
    fx.order("o2", "ann", 6);

    assert_eq!(fx.matches(rule), vec![vec!["Customer~ann"]]);
}

#[test]
fn correlated_average_with_threshold() {
    let mut fx = Fixture::new();
    let rule = fx.rule(
        &RuleDecl::new("big_spender").pattern("c", "Customer").when(
            Expr::aggregate(
                AggregateFn::Avg,
                Some(Expr::field("o", "total")),
                SubPattern::new("o", "Order").when(Expr::field("o", "customer").equals(Expr::field("c", "id"))),
            )
            .greater_than(Expr::lit(100)),
        ),
    );
    fx.customer("ann", "gold");
    fx.order("o1", "ann", 50);
    assert!(fx.matches(rule).is_empty());

    fx.order("o2", "ann", 250);
    assert_eq!(fx.matches(rule).len(), 1);

    fx.retract(&FactId::from("Order~o2"));
    assert!(fx.matches(rule).is_empty());
}

#[test]
fn count_over_no_facts_is_zero() {
    let mut fx = Fixture::new();
    let rule = fx.rule(
        &RuleDecl::new("quiet").when(
            Expr::aggregate(AggregateFn::Count, None, SubPattern::new("r", "Refund"))
                .equals(Expr::lit(0)),
        ),
    );
    assert_eq!(fx.network.terminal_tokens(rule).len(), 1);

    fx.refund("o1");
    assert!(fx.network.terminal_tokens(rule).is_empty());
}

#[test]
fn evaluation_errors_count_as_no_match() {
    let mut fx = Fixture::new();
    let rule = fx.rule(
        &RuleDecl::new("ratio")
            .pattern("o", "Order")
            .when(Expr::binary(trellis_language::BinaryOp::Div, Expr::lit(100), Expr::field("o", "total")).greater_than(Expr::lit(1))),
    );
    fx.order("zero", "ann", 0);
    fx.order("small", "ann", 2);

    assert_eq!(fx.matches(rule), vec![vec!["Order~small"]]);
    assert!(fx.network.stats().evaluation_errors >= 1);
}

#[test]
fn rule_compilation_errors() {
    let mut fx = Fixture::new();
    let unknown_type = RuleDecl::new("a").pattern("x", "Ghost");
    let err = fx
        .network
        .add_rule(&unknown_type, &fx.types, &fx.store, &mut fx.agenda)
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownType(_)));

    let unknown_var = RuleDecl::new("b")
        .pattern("o", "Order")
        .when(Expr::field("q", "total").equals(Expr::lit(Value::Int(1))));
    let err = fx
        .network
        .add_rule(&unknown_var, &fx.types, &fx.store, &mut fx.agenda)
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownVariable(_)));

    fx.rule(&customer_orders());
    let err = fx
        .network
        .add_rule(&customer_orders(), &fx.types, &fx.store, &mut fx.agenda)
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateRule(_)));
    assert_eq!(fx.network.rule_count(), 1);
}
