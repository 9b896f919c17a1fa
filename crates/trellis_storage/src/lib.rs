//! Type registry and fact store for Trellis.
//!
//! This crate provides:
//! - [`TypeRegistry`] - Declared record types, keyed by name
//! - [`FactStore`] - The owning repository of facts, addressed by [`FactHandle`] or identity

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod registry;
pub mod store;

pub use registry::{Declared, TypeRegistry};
pub use store::{FactHandle, FactStore, Replaced};
