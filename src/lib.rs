//! Trellis - Forward-chaining rule engine with tuple-space output
//!
//! This crate re-exports all layers of the Trellis system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 4: trellis_runtime    - Engine facade, ingestion, actions, metrics
//!          trellis_xuples     - Policy-governed tuple-spaces
//! Layer 3: trellis_engine     - RETE network, tokens, agenda
//! Layer 2: trellis_language   - Program AST, expression compiler, evaluator
//! Layer 1: trellis_storage    - Type registry, fact store
//! Layer 0: trellis_foundation - Core types (Value, Fact, FactId, Error)
//! ```

pub use trellis_engine as engine;
pub use trellis_foundation as foundation;
pub use trellis_language as language;
pub use trellis_runtime as runtime;
pub use trellis_storage as storage;
pub use trellis_xuples as xuples;

pub use trellis_foundation::{Error, ErrorKind, Fact, FactId, Result, Value};
pub use trellis_language::Program;
pub use trellis_runtime::{Engine, EngineConfig, EngineHandle};
