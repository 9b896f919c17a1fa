//! Integration tests for Layer 3: Engine
//!
//! Tests for network construction, matching, the agenda, retraction and
//! rule removal.

mod agenda;
mod matching;
mod properties;
mod removal;

use std::sync::Arc;

use trellis_engine::{Agenda, Network, RuleId};
use trellis_foundation::{Fact, FactId, FieldDescriptor, FieldType, TypeSchema, Value};
use trellis_language::RuleDecl;
use trellis_storage::{FactHandle, FactStore, TypeRegistry};

/// A network wired to its own registry, store, and agenda.
#[derive(Default)]
pub struct Fixture {
    pub types: TypeRegistry,
    pub store: FactStore,
    pub network: Network,
    pub agenda: Agenda,
}

impl Fixture {
    /// Declares `Customer(id, tier)`, `Order(id, customer, total)` and
    /// `Refund(order)`.
    pub fn new() -> Self {
        let mut fixture = Self::default();
        fixture.declare(
            "Customer",
            vec![
                FieldDescriptor::key("id", FieldType::String),
                FieldDescriptor::new("tier", FieldType::String),
            ],
        );
        fixture.declare(
            "Order",
            vec![
                FieldDescriptor::key("id", FieldType::String),
                FieldDescriptor::new("customer", FieldType::String),
                FieldDescriptor::new("total", FieldType::Number),
            ],
        );
        fixture.declare("Refund", vec![FieldDescriptor::key("order", FieldType::String)]);
        fixture
    }

    pub fn declare(&mut self, name: &str, fields: Vec<FieldDescriptor>) {
        let schema = TypeSchema::new(name, fields).unwrap();
        self.network.add_type(&schema, &self.store);
        self.types.declare(schema).unwrap();
    }

    pub fn rule(&mut self, decl: &RuleDecl) -> RuleId {
        self.network
            .add_rule(decl, &self.types, &self.store, &mut self.agenda)
            .unwrap()
    }

    pub fn insert(&mut self, type_name: &str, fields: Vec<(&str, Value)>) -> FactHandle {
        let schema = Arc::clone(self.types.require(type_name).unwrap());
        let fact = Arc::new(Fact::new(schema, fields).unwrap());
        let handle = self.store.add(fact).unwrap();
        self.network
            .insert_fact(handle, &self.store, &mut self.agenda)
            .unwrap();
        handle
    }

    pub fn retract(&mut self, id: &FactId) {
        let handle = self.store.handle_of(id).unwrap();
        let type_name = id.type_name().to_string();
        self.network
            .retract_fact(handle, &type_name, &self.store, &mut self.agenda)
            .unwrap();
        self.store.retract(id).unwrap();
    }

    pub fn customer(&mut self, id: &str, tier: &str) -> FactHandle {
        self.insert("Customer", vec![("id", Value::from(id)), ("tier", Value::from(tier))])
    }

    pub fn order(&mut self, id: &str, customer: &str, total: i64) -> FactHandle {
        self.insert(
            "Order",
            vec![
                ("id", Value::from(id)),
                ("customer", Value::from(customer)),
                ("total", Value::Int(total)),
            ],
        )
    }

    pub fn refund(&mut self, order: &str) -> FactHandle {
        self.insert("Refund", vec![("order", Value::from(order))])
    }

    /// Fact identities of every terminal token of `rule`.
    pub fn matches(&self, rule: RuleId) -> Vec<Vec<String>> {
        self.network
            .terminal_tokens(rule)
            .iter()
            .map(|token| {
                token
                    .fact_handles()
                    .filter_map(|h| self.store.resolve(h))
                    .map(|f| f.id().to_string())
                    .collect()
            })
            .collect()
    }
}
