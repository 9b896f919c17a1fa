//! Engine facade, ingestion pipeline, and action executor for Trellis.
//!
//! This crate provides:
//! - [`Engine`] - Owns the store and network and runs propagation epochs
//! - [`EngineHandle`] - Thread-safe wrapper with a bounded lock wait
//! - [`EngineConfig`] - Logging, limits, and tuple-space defaults
//! - [`Metrics`] and [`IngestResult`] - Counters reported to callers
//! - [`Activation`] - One entry of the per-call activation log

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod engine;
pub mod executor;
pub mod handle;
mod ingest;
pub mod metrics;

pub use config::{DEFAULT_RECURSION_LIMIT, EngineConfig, LogLevel, SpaceDefaults};
pub use engine::{Engine, Updated};
pub use executor::{Activation, BuiltinAction, CapturedOutput};
pub use handle::EngineHandle;
pub use metrics::{IngestResult, IngestTimings, Metrics};
