//! Compiled rules.

use std::fmt;
use std::sync::Arc;

use trellis_language::{CompiledExpr, Scope, Span};

use crate::node::NodeId;

/// Identifies a rule. Ids follow declaration order, which is firing order,
/// and are never reused after a rule is removed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(u32);

impl RuleId {
    /// Creates a rule id from a declaration index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the declaration index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuleId({})", self.0)
    }
}

/// An action call with its arguments compiled against the rule's scope.
#[derive(Clone, Debug)]
pub struct CompiledAction {
    /// Action name, built-in or user-declared.
    pub name: Arc<str>,
    /// Compiled arguments.
    pub args: Vec<CompiledExpr>,
    /// Source location of the call.
    pub span: Span,
}

/// A positive pattern of a compiled rule.
#[derive(Clone, Debug)]
pub struct PatternBinding {
    /// Bound variable.
    pub var: Arc<str>,
    /// Matched record type.
    pub type_name: Arc<str>,
    /// Token slot.
    pub slot: usize,
}

/// A rule installed in the network.
#[derive(Clone, Debug)]
pub struct CompiledRule {
    /// Rule id.
    pub id: RuleId,
    /// Rule name.
    pub name: Arc<str>,
    /// Canonical text of the declaration, for re-declaration checks.
    pub source: String,
    /// Positive patterns in slot order.
    pub patterns: Vec<PatternBinding>,
    /// Variables visible to actions: the patterns, then aggregate results.
    pub scope: Scope,
    /// Actions in written order.
    pub actions: Vec<CompiledAction>,
    /// The rule's terminal node.
    pub terminal: NodeId,
    /// Beta nodes and the terminal, in creation order. No other rule uses them.
    pub owned: Vec<NodeId>,
    /// Alpha nodes on the rule's input paths, once per use, root side first.
    pub alphas: Vec<NodeId>,
    /// Source location of the declaration.
    pub span: Span,
}
