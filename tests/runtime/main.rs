//! Integration tests for Layer 4: Runtime
//!
//! End-to-end scenarios through the engine facade, plus configuration
//! and the shared handle.

mod handle;
mod properties;
mod scenarios;

use std::sync::Arc;

use trellis_foundation::{Fact, Value};
use trellis_runtime::Engine;

/// Builds a fact of a type the engine has already ingested.
pub fn fact(engine: &Engine, type_name: &str, fields: Vec<(&str, Value)>) -> Arc<Fact> {
    let schema = Arc::clone(engine.types().require(type_name).unwrap());
    Arc::new(Fact::new(schema, fields).unwrap())
}

/// Renders every activation of the last call as `action(args)`.
pub fn fired(engine: &Engine) -> Vec<String> {
    engine
        .get_activations()
        .iter()
        .map(|a| {
            let args: Vec<_> = a.args.iter().map(ToString::to_string).collect();
            format!("{}({})", a.action, args.join(", "))
        })
        .collect()
}
