//! Core values, facts, identities, and errors for Trellis.
//!
//! This crate provides:
//! - [`Value`] - The value type carried by fact fields and expressions
//! - [`TypeSchema`] - Record-type schemas with primary-key fields
//! - [`Fact`] / [`FactId`] - Validated records and their canonical identities
//! - [`Error`] - Rich error types with context and a coarse taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod fact;
pub mod types;
pub mod value;

pub use error::{Error, ErrorCategory, ErrorContext, ErrorKind};
pub use fact::{Fact, FactId};
pub use types::{FieldDescriptor, FieldType, TypeSchema};
pub use value::Value;

/// Result type alias using Trellis's Error type.
pub type Result<T> = std::result::Result<T, Error>;
