//! Removing rules from a live network

use trellis_foundation::ErrorKind;
use trellis_language::{Expr, RuleDecl};

use crate::Fixture;

fn gold_customers() -> RuleDecl {
    RuleDecl::new("gold_customers")
        .pattern("c", "Customer")
        .when(Expr::field("c", "tier").equals(Expr::lit("gold")))
}

fn gold_orders() -> RuleDecl {
    RuleDecl::new("gold_orders")
        .pattern("c", "Customer")
        .pattern("o", "Order")
        .when(
            Expr::field("c", "tier")
                .equals(Expr::lit("gold"))
                .and(Expr::field("o", "customer").equals(Expr::field("c", "id"))),
        )
}

#[test]
fn removing_the_join_rule_keeps_the_filter_rule_matching() {
    let mut fx = Fixture::new();
    let filter = fx.rule(&gold_customers());
    let join = fx.rule(&gold_orders());
    fx.customer("ann", "gold");
    fx.order("o1", "ann", 10);
    fx.agenda.drain();

    fx.network.remove_rule("gold_orders", &mut fx.agenda).unwrap();
    assert_eq!(fx.network.shape().joins, 0);

    fx.customer("cat", "gold");
    fx.order("o2", "cat", 10);
    let fired: Vec<_> = fx.agenda.drain().into_iter().map(|p| p.rule).collect();
    assert_eq!(fired, vec![filter]);
    assert_eq!(fx.matches(filter).len(), 2);
    assert!(fx.matches(join).is_empty());
}

#[test]
fn removing_the_filter_rule_keeps_the_join_rule_matching() {
    let mut fx = Fixture::new();
    fx.rule(&gold_customers());
    let join = fx.rule(&gold_orders());
    fx.customer("ann", "gold");

    fx.network.remove_rule("gold_customers", &mut fx.agenda).unwrap();
    assert!(fx.agenda.is_empty());

    fx.order("o1", "ann", 10);
    fx.customer("bob", "basic");
    fx.order("o2", "bob", 10);
    assert_eq!(fx.matches(join), vec![vec!["Customer~ann", "Order~o1"]]);
    let fired: Vec<_> = fx.agenda.drain().into_iter().map(|p| p.rule).collect();
    assert_eq!(fired, vec![join]);
}

#[test]
fn pending_activations_of_a_removed_rule_are_cancelled() {
    let mut fx = Fixture::new();
    fx.rule(&gold_customers());
    fx.customer("ann", "gold");
    fx.customer("bea", "gold");
    assert_eq!(fx.agenda.len(), 2);

    fx.network.remove_rule("gold_customers", &mut fx.agenda).unwrap();

    assert!(fx.agenda.is_empty());
    assert_eq!(fx.network.rule_count(), 0);
    let err = fx.network.remove_rule("gold_customers", &mut fx.agenda).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownRule(_)));
}

#[test]
fn a_rule_can_be_added_again_after_removal() {
    let mut fx = Fixture::new();
    let first = fx.rule(&gold_customers());
    fx.customer("ann", "gold");
    fx.network.remove_rule("gold_customers", &mut fx.agenda).unwrap();

    let again = fx.rule(&gold_customers());

    assert_ne!(first, again);
    assert_eq!(fx.matches(again), vec![vec!["Customer~ann"]]);
    assert_eq!(fx.agenda.len(), 1);
}
