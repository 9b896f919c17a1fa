//! Network node kinds and their state.
//!
//! Nodes live in one arena owned by the [`Network`](crate::Network) and refer
//! to each other by [`NodeId`]. Alpha-level nodes (root, type, alpha) hold
//! fact handles; beta-level nodes hold tokens. Removing a rule retires the
//! nodes nothing else uses, leaving their slots empty so ids stay stable.

use std::fmt;
use std::sync::Arc;

use trellis_foundation::Value;
use trellis_language::{AggregateFn, CompiledExpr, Quantifier};
use trellis_storage::FactHandle;

use crate::memory::{AlphaMemory, TokenMemory};
use crate::rule::RuleId;
use crate::token::Token;

/// Index of a node in the network arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Returns the arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A network node: its kind-specific state plus its successors.
#[derive(Clone, Debug)]
pub struct Node {
    /// Kind-specific state.
    pub kind: NodeKind,
    /// Successors, in creation order.
    pub children: Vec<NodeId>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
        }
    }

    /// Returns true for root, type and alpha nodes.
    #[must_use]
    pub fn is_alpha_level(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Root | NodeKind::Type(_) | NodeKind::Alpha(_)
        )
    }

    /// Returns the fact memory of an alpha-level node.
    #[must_use]
    pub fn alpha_memory(&self) -> Option<&AlphaMemory> {
        match &self.kind {
            NodeKind::Type(n) => Some(&n.memory),
            NodeKind::Alpha(n) => Some(&n.memory),
            _ => None,
        }
    }

    /// Returns the output memory of a beta-level node.
    #[must_use]
    pub fn token_memory(&self) -> Option<&TokenMemory> {
        match &self.kind {
            NodeKind::Join(n) => Some(&n.memory),
            NodeKind::Quantifier(n) => Some(&n.memory),
            NodeKind::Accumulate(n) => Some(&n.memory),
            NodeKind::Terminal(n) => Some(&n.memory),
            _ => None,
        }
    }

    /// Short name of the node kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Root => "root",
            NodeKind::Type(_) => "type",
            NodeKind::Alpha(_) => "alpha",
            NodeKind::Join(_) => "join",
            NodeKind::Quantifier(q) => match q.quantifier {
                Quantifier::Not => "not",
                Quantifier::Exists => "exists",
            },
            NodeKind::Accumulate(_) => "accumulate",
            NodeKind::Terminal(_) => "terminal",
            NodeKind::Retired => "retired",
        }
    }
}

/// Kind-specific node state.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Entry point for every fact.
    Root,
    /// Passes facts of one record type.
    Type(TypeNode),
    /// Passes facts satisfying a single-variable condition.
    Alpha(AlphaNode),
    /// Pairs left tokens with right facts.
    Join(JoinNode),
    /// Passes left tokens with zero (`NOT`) or some (`EXISTS`) correlated facts.
    Quantifier(QuantifierNode),
    /// Extends left tokens with an aggregate over correlated facts.
    Accumulate(AccumulateNode),
    /// Collects complete matches for one rule.
    Terminal(TerminalNode),
    /// A slot freed when the last rule using the node was removed.
    Retired,
}

/// Type node state.
#[derive(Clone, Debug)]
pub struct TypeNode {
    /// Record type accepted.
    pub type_name: Arc<str>,
    /// Facts of that type.
    pub memory: AlphaMemory,
}

/// Alpha node state.
#[derive(Clone, Debug)]
pub struct AlphaNode {
    /// Condition over a fact bound at slot 0.
    pub test: Arc<CompiledExpr>,
    /// Canonical text of the condition, the sharing key.
    pub key: Arc<str>,
    /// Facts that passed.
    pub memory: AlphaMemory,
}

/// Join node state.
#[derive(Clone, Debug)]
pub struct JoinNode {
    /// Left input; `None` means the single empty token.
    pub left: Option<NodeId>,
    /// Right input, an alpha-level node.
    pub right: NodeId,
    /// Condition over the joined token.
    pub test: Option<Arc<CompiledExpr>>,
    /// Joined tokens.
    pub memory: TokenMemory,
}

/// `NOT` / `EXISTS` node state.
#[derive(Clone, Debug)]
pub struct QuantifierNode {
    /// Which quantifier.
    pub quantifier: Quantifier,
    /// Left input; `None` means the single empty token.
    pub left: Option<NodeId>,
    /// Right input, an alpha-level node.
    pub right: NodeId,
    /// Correlated condition; the right fact sits just past the left token.
    pub test: Option<Arc<CompiledExpr>>,
    /// Right facts currently matching each left token.
    pub matches: im::HashMap<Token, im::OrdSet<FactHandle>>,
    /// Left tokens that currently pass.
    pub memory: TokenMemory,
}

impl QuantifierNode {
    pub(crate) fn passes(&self, matched: usize) -> bool {
        match self.quantifier {
            Quantifier::Not => matched == 0,
            Quantifier::Exists => matched > 0,
        }
    }
}

/// Per-left-token aggregation state.
#[derive(Clone, Debug, Default)]
pub struct Group {
    /// Matching right facts and their argument values.
    pub matched: im::OrdMap<FactHandle, Value>,
    /// The token currently emitted for this group, if any.
    pub emitted: Option<Token>,
}

/// Accumulate node state.
#[derive(Clone, Debug)]
pub struct AccumulateNode {
    /// Aggregate function.
    pub function: AggregateFn,
    /// Aggregated expression; `None` for `COUNT`.
    pub argument: Option<Arc<CompiledExpr>>,
    /// Left input; `None` means the single empty token.
    pub left: Option<NodeId>,
    /// Right input, an alpha-level node.
    pub right: NodeId,
    /// Correlated condition; the right fact sits just past the left token.
    pub test: Option<Arc<CompiledExpr>>,
    /// Condition on the extended token, typically comparing the result.
    pub guard: Option<Arc<CompiledExpr>>,
    /// State per left token.
    pub groups: im::HashMap<Token, Group>,
    /// Extended tokens currently emitted.
    pub memory: TokenMemory,
}

/// Terminal node state.
#[derive(Clone, Debug)]
pub struct TerminalNode {
    /// Owning rule.
    pub rule: RuleId,
    /// Left input; `None` means the single empty token.
    pub left: Option<NodeId>,
    /// Condition without variables, checked once per token.
    pub guard: Option<Arc<CompiledExpr>>,
    /// Complete matches.
    pub memory: TokenMemory,
}
