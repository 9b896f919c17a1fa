//! Integration tests for Layer 1: Storage
//!
//! Tests for the type registry and the fact store.

mod registry;
mod store;
