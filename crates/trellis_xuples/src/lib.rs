//! Policy-governed tuple-spaces for Trellis.
//!
//! Rules publish facts into named spaces through the `Xuple` action;
//! external agents take them out again.
//!
//! This crate provides:
//! - [`XupleManager`] - The registry of named spaces
//! - [`XupleSpace`] - One space with its selection, consumption, retention and overflow policies
//! - [`Xuple`] - A published record with provenance and a consumption log
//! - [`Clock`] - Time sources, including [`ManualClock`] for deterministic expiry

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod manager;
pub mod policy;
pub mod space;
pub mod xuple;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{Created, XupleManager};
pub use policy::{ConsumptionPolicy, OverflowPolicy, RetentionPolicy, SelectionPolicy, SpaceConfig};
pub use space::{SpaceStats, XupleSpace};
pub use xuple::{Xuple, XupleId, XupleState};
