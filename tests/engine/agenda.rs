//! Agenda ordering and cancellation

use trellis_engine::{Agenda, RuleId, Slot, Token};
use trellis_foundation::FactId;
use trellis_language::{Expr, RuleDecl};

use crate::Fixture;

#[test]
fn drain_orders_by_rule_then_arrival() {
    let mut agenda = Agenda::new();
    let token = |n: i64| Token::from_slots(vec![Slot::Value(n.into())]);
    agenda.push(RuleId::new(1), token(1));
    agenda.push(RuleId::new(0), token(2));
    agenda.push(RuleId::new(1), token(3));
    agenda.push(RuleId::new(0), token(4));

    let order: Vec<_> = agenda
        .drain()
        .into_iter()
        .map(|p| (p.rule.index(), p.token))
        .collect();

    assert_eq!(
        order,
        vec![(0, token(2)), (0, token(4)), (1, token(1)), (1, token(3))]
    );
    assert!(agenda.is_empty());
}

#[test]
fn cancel_removes_only_the_named_match() {
    let mut agenda = Agenda::new();
    let token = Token::from_slots(vec![Slot::Value(7.into())]);
    agenda.push(RuleId::new(0), token.clone());
    agenda.push(RuleId::new(1), token.clone());

    assert!(agenda.cancel(RuleId::new(0), &token));
    assert!(!agenda.cancel(RuleId::new(0), &token));
    assert_eq!(agenda.len(), 1);
}

#[test]
fn matches_retracted_before_firing_are_cancelled() {
    let mut fx = Fixture::new();
    fx.rule(
        &RuleDecl::new("gold")
            .pattern("c", "Customer")
            .when(Expr::field("c", "tier").equals(Expr::lit("gold"))),
    );
    fx.customer("ann", "gold");
    fx.customer("bea", "gold");
    assert_eq!(fx.agenda.len(), 2);

    fx.retract(&FactId::from("Customer~ann"));

    let pending = fx.agenda.drain();
    assert_eq!(pending.len(), 1);
    let fact = fx.store.resolve(pending[0].token.fact_handles().next().unwrap()).unwrap();
    assert_eq!(fact.id().as_str(), "Customer~bea");
}

#[test]
fn rules_fire_in_declaration_order() {
    let mut fx = Fixture::new();
    let second = RuleDecl::new("second").pattern("c", "Customer");
    let first = RuleDecl::new("first").pattern("o", "Order");
    let second = fx.rule(&second);
    let first = fx.rule(&first);
    fx.order("o1", "ann", 1);
    fx.customer("ann", "gold");

    let rules: Vec<_> = fx.agenda.drain().into_iter().map(|p| p.rule).collect();
    assert_eq!(rules, vec![second, first]);
}
