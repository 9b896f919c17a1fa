//! Integration tests for Layer 0: Foundation
//!
//! Tests for values, fact identities, and the error taxonomy.

mod errors;
mod facts;
mod values;
