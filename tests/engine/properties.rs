//! Property tests: retraction undoes insertion

use proptest::prelude::*;
use trellis_foundation::FactId;
use trellis_language::{AggregateFn, Expr, RuleDecl, SubPattern};

use crate::Fixture;

fn with_rules() -> Fixture {
    let mut fx = Fixture::new();
    fx.rule(
        &RuleDecl::new("customer_orders")
            .pattern("c", "Customer")
            .pattern("o", "Order")
            .when(Expr::field("o", "customer").equals(Expr::field("c", "id"))),
    );
    fx.rule(
        &RuleDecl::new("idle").pattern("c", "Customer").when(Expr::not_exists(
            SubPattern::new("o", "Order").when(Expr::field("o", "customer").equals(Expr::field("c", "id"))),
        )),
    );
    fx.rule(
        &RuleDecl::new("volume").pattern("c", "Customer").when(
            Expr::aggregate(
                AggregateFn::Sum,
                Some(Expr::field("o", "total")),
                SubPattern::new("o", "Order").when(Expr::field("o", "customer").equals(Expr::field("c", "id"))),
            )
            .greater_than(Expr::lit(10)),
        ),
    );
    fx
}

proptest! {
    #[test]
    fn retracting_in_reverse_restores_every_memory(
        orders in prop::collection::vec((0usize..3, 0i64..20), 0..12),
    ) {
        let mut fx = with_rules();
        let customers = ["ann", "bob", "cat"];
        fx.customer("ann", "gold");
        let baseline = fx.network.contents();

        let mut inserted = Vec::new();
        for id in &customers[1..] {
            fx.customer(id, "basic");
            inserted.push(FactId::from(format!("Customer~{id}").as_str()));
        }
        for (i, (customer, total)) in orders.iter().enumerate() {
            let id = format!("o{i}");
            fx.order(&id, customers[*customer], *total);
            inserted.push(FactId::from(format!("Order~{id}").as_str()));
        }
        for id in inserted.iter().rev() {
            fx.retract(id);
        }

        prop_assert_eq!(fx.network.contents(), baseline);
    }

    #[test]
    fn join_matches_equal_the_naive_product(
        orders in prop::collection::vec((0usize..4, 0i64..5), 0..10),
    ) {
        let mut fx = with_rules();
        let names = ["ann", "bob", "cat", "dan"];
        for name in &names[..3] {
            fx.customer(name, "basic");
        }
        for (i, (customer, total)) in orders.iter().enumerate() {
            fx.order(&format!("o{i}"), names[*customer], *total);
        }
        let rule = fx.network.rule_by_name("customer_orders").unwrap().id;

        let expected = orders.iter().filter(|(c, _)| *c < 3).count();
        prop_assert_eq!(fx.matches(rule).len(), expected);
    }
}
