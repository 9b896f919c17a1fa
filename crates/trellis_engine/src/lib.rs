//! RETE discrimination network for Trellis.
//!
//! This crate provides:
//! - [`Network`] - Type, alpha, join, quantifier, accumulate and terminal nodes
//! - [`Token`] - Partial matches flowing between beta nodes
//! - [`Agenda`] - Complete matches waiting to fire, in firing order
//! - [`CompiledRule`] - A rule as installed, with its compiled actions

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agenda;
mod compiler;
pub mod memory;
pub mod network;
pub mod node;
pub mod rule;
pub mod token;

pub use agenda::{Agenda, PendingActivation};
pub use memory::{AlphaMemory, TokenMemory};
pub use network::{MemoryContents, Network, NetworkShape, PropagationStats};
pub use node::{Node, NodeId, NodeKind};
pub use rule::{CompiledAction, CompiledRule, PatternBinding, RuleId};
pub use token::{Slot, Token, TokenEnv};
