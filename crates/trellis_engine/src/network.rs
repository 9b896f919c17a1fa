//! The discrimination network.
//!
//! Facts enter at the root, are routed to the type node for their record
//! type, filter down alpha chains, and reach beta nodes as right
//! activations. Beta nodes pass tokens left to right until the rule's
//! terminal node, which pushes complete matches onto the [`Agenda`].
//!
//! Retraction mirrors insertion but never evaluates a condition: every
//! beta node remembers which left token each output came from, and
//! quantifier and accumulate nodes remember which right facts matched.
//!
//! A condition that fails to evaluate is treated as "no match"; the error is
//! logged and counted in [`PropagationStats`].
//!
//! Type and alpha nodes are shared between rules; beta nodes and terminals
//! belong to exactly one rule. Alpha nodes carry a use count so that
//! removing a rule retires only the nodes no remaining rule reaches.

use std::sync::Arc;

use trellis_foundation::{Error, ErrorKind, Fact, Result, TypeSchema, Value};
use trellis_language::eval::binary;
use trellis_language::{AggregateFn, BinaryOp, CompiledExpr, Env, Quantifier, RuleDecl, SliceEnv};
use trellis_storage::{FactHandle, FactStore, TypeRegistry};

use crate::agenda::Agenda;
use crate::compiler::{AlphaPath, BetaStep, RuleCompiler, RulePlan};
use crate::memory::{AlphaMemory, TokenMemory};
use crate::node::{
    AccumulateNode, AlphaNode, Group, JoinNode, Node, NodeId, NodeKind, QuantifierNode,
    TerminalNode, TypeNode,
};
use crate::rule::{CompiledRule, RuleId};
use crate::token::{Slot, Token, TokenEnv};

const ROOT: NodeId = NodeId(0);

// =============================================================================
// Statistics
// =============================================================================

/// Counters accumulated while propagating.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PropagationStats {
    /// Node activations, left and right.
    pub node_activations: u64,
    /// Tokens stored in terminal memories.
    pub terminal_insertions: u64,
    /// Tokens removed from terminal memories.
    pub terminal_retractions: u64,
    /// Conditions that failed to evaluate and were treated as no match.
    pub evaluation_errors: u64,
}

/// Structural summary of the network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkShape {
    /// Type nodes.
    pub types: usize,
    /// Alpha nodes.
    pub alphas: usize,
    /// Join nodes.
    pub joins: usize,
    /// `NOT` nodes.
    pub nots: usize,
    /// `EXISTS` nodes.
    pub exists: usize,
    /// Accumulate nodes.
    pub accumulates: usize,
    /// Terminal nodes.
    pub terminals: usize,
    /// Times a rule reused an existing alpha node instead of creating one.
    pub shared_alphas: usize,
}

/// Contents of one node's memory, for comparing network states.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryContents {
    /// The root and retired slots hold nothing.
    Root,
    /// Facts of a type or alpha node, in arrival order.
    Facts(Vec<FactHandle>),
    /// Tokens of a beta node, in arrival order.
    Tokens(Vec<Token>),
}

// =============================================================================
// Network
// =============================================================================

/// A RETE network with its installed rules.
///
/// Cloning is cheap enough to snapshot the network before a batch of work:
/// every memory is a persistent collection.
#[derive(Clone, Debug)]
pub struct Network {
    nodes: Vec<Node>,
    type_nodes: im::HashMap<Arc<str>, NodeId>,
    alpha_index: im::HashMap<(NodeId, Arc<str>), NodeId>,
    alpha_uses: im::HashMap<NodeId, usize>,
    rules: im::OrdMap<RuleId, Arc<CompiledRule>>,
    rule_names: im::HashMap<Arc<str>, RuleId>,
    next_rule: u32,
    shared_alphas: usize,
    stats: PropagationStats,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    /// Creates a network containing only the root node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Root)],
            type_nodes: im::HashMap::new(),
            alpha_index: im::HashMap::new(),
            alpha_uses: im::HashMap::new(),
            rules: im::OrdMap::new(),
            rule_names: im::HashMap::new(),
            next_rule: 0,
            shared_alphas: 0,
            stats: PropagationStats::default(),
        }
    }

    // -------------------------------------------------------------------------
    // Building
    // -------------------------------------------------------------------------

    /// Ensures a type node exists for `schema`, seeding it from `store`.
    pub fn add_type(&mut self, schema: &TypeSchema, store: &FactStore) -> NodeId {
        if let Some(id) = self.type_nodes.get(schema.name()) {
            return *id;
        }
        let mut memory = AlphaMemory::new();
        for (handle, _) in store.iter_type(schema.name()) {
            memory.insert(handle);
        }
        let id = self.push_node(NodeKind::Type(TypeNode {
            type_name: Arc::clone(schema.name()),
            memory,
        }));
        self.nodes[ROOT.index()].children.push(id);
        self.type_nodes.insert(Arc::clone(schema.name()), id);
        id
    }

    /// Compiles and installs a rule, then seeds it with existing facts.
    ///
    /// Matches that already hold are pushed onto `agenda` like any other.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRule` if the name is taken, and a validation error
    /// if the rule does not compile. The network is unchanged on error.
    pub fn add_rule(
        &mut self,
        decl: &RuleDecl,
        types: &TypeRegistry,
        store: &FactStore,
        agenda: &mut Agenda,
    ) -> Result<RuleId> {
        if self.rule_names.contains_key(decl.name.as_str()) {
            return Err(Error::new(ErrorKind::DuplicateRule(decl.name.clone()))
                .with_context(decl.span.context()));
        }
        let plan = RuleCompiler::new(types).plan(decl)?;
        let id = RuleId::new(self.next_rule);
        self.next_rule = self
            .next_rule
            .checked_add(1)
            .ok_or_else(|| Error::internal("rule ids exhausted"))?;
        Ok(self.install(id, plan, store, agenda))
    }

    /// Uninstalls a rule.
    ///
    /// The rule's beta nodes and terminal are retired with their memories,
    /// its pending activations are dropped from `agenda`, and each alpha
    /// node it used is retired once no other rule uses it. Type nodes stay.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRule` if no rule has this name.
    pub fn remove_rule(&mut self, name: &str, agenda: &mut Agenda) -> Result<RuleId> {
        let id = self
            .rule_names
            .remove(name)
            .ok_or_else(|| Error::new(ErrorKind::UnknownRule(name.to_string())))?;
        let rule = self
            .rules
            .remove(&id)
            .ok_or_else(|| Error::internal(format!("rule {name} has no entry for {id:?}")))?;
        let cancelled = agenda.cancel_rule(id);

        for node in rule.owned.iter().rev() {
            self.retire(*node);
        }
        // Each path lists parents first, so walking backwards releases a
        // child before its parent.
        let mut retired_alphas = 0;
        for alpha in rule.alphas.iter().rev() {
            let uses = self.alpha_uses.get(alpha).copied().unwrap_or(0);
            if uses > 1 {
                self.alpha_uses.insert(*alpha, uses - 1);
            } else {
                self.alpha_uses.remove(alpha);
                self.retire(*alpha);
                retired_alphas += 1;
            }
        }
        tracing::debug!(
            rule = %rule.name,
            nodes = rule.owned.len() + retired_alphas,
            cancelled,
            "rule removed"
        );
        Ok(id)
    }

    /// Empties a node's slot and unlinks it from its parents.
    fn retire(&mut self, id: NodeId) {
        for node in &mut self.nodes {
            node.children.retain(|child| *child != id);
        }
        if matches!(self.nodes[id.index()].kind, NodeKind::Alpha(_)) {
            self.alpha_index.retain(|_, node| *node != id);
        }
        self.nodes[id.index()] = Node::new(NodeKind::Retired);
    }

    fn install(&mut self, id: RuleId, plan: RulePlan, store: &FactStore, agenda: &mut Agenda) -> RuleId {
        let RulePlan {
            name,
            source,
            span,
            patterns,
            steps,
            terminal_guard,
            scope,
            actions,
        } = plan;

        let mut left: Option<NodeId> = None;
        let mut first: Option<NodeId> = None;
        let mut owned = Vec::new();
        let mut alphas = Vec::new();
        for step in steps {
            let node = match step {
                BetaStep::Join { right, test } => {
                    let right = self.alpha_chain(&right, store, &mut alphas);
                    self.push_beta(
                        NodeKind::Join(JoinNode {
                            left,
                            right,
                            test: test.map(Arc::new),
                            memory: TokenMemory::new(),
                        }),
                        left,
                        right,
                    )
                }
                BetaStep::Quantifier {
                    quantifier,
                    right,
                    test,
                } => {
                    let right = self.alpha_chain(&right, store, &mut alphas);
                    self.push_beta(
                        NodeKind::Quantifier(QuantifierNode {
                            quantifier,
                            left,
                            right,
                            test: test.map(Arc::new),
                            matches: im::HashMap::new(),
                            memory: TokenMemory::new(),
                        }),
                        left,
                        right,
                    )
                }
                BetaStep::Accumulate {
                    function,
                    argument,
                    right,
                    test,
                    guard,
                } => {
                    let right = self.alpha_chain(&right, store, &mut alphas);
                    self.push_beta(
                        NodeKind::Accumulate(AccumulateNode {
                            function,
                            argument: argument.map(Arc::new),
                            left,
                            right,
                            test: test.map(Arc::new),
                            guard: guard.map(Arc::new),
                            groups: im::HashMap::new(),
                            memory: TokenMemory::new(),
                        }),
                        left,
                        right,
                    )
                }
            };
            first.get_or_insert(node);
            owned.push(node);
            left = Some(node);
        }

        let terminal = self.push_node(NodeKind::Terminal(TerminalNode {
            rule: id,
            left,
            guard: terminal_guard.map(Arc::new),
            memory: TokenMemory::new(),
        }));
        if let Some(parent) = left {
            self.nodes[parent.index()].children.push(terminal);
        }
        first.get_or_insert(terminal);
        owned.push(terminal);

        let rule = Arc::new(CompiledRule {
            id,
            name: Arc::clone(&name),
            source,
            patterns,
            scope,
            actions,
            terminal,
            owned,
            alphas,
            span,
        });
        self.rules.insert(id, rule);
        self.rule_names.insert(Arc::clone(&name), id);

        if let Some(first) = first {
            let mut cx = Cx { store, agenda };
            self.left_insert(first, &Token::empty(), &mut cx);
        }
        tracing::debug!(rule = %name, "rule installed");
        id
    }

    /// Finds or builds the alpha nodes of `path`, recording each use in
    /// `used`.
    fn alpha_chain(&mut self, path: &AlphaPath, store: &FactStore, used: &mut Vec<NodeId>) -> NodeId {
        let mut parent = self.add_type(&path.schema, store);
        for step in &path.steps {
            let key = (parent, Arc::clone(&step.key));
            if let Some(existing) = self.alpha_index.get(&key).copied() {
                self.shared_alphas += 1;
                *self.alpha_uses.entry(existing).or_insert(0) += 1;
                used.push(existing);
                parent = existing;
                continue;
            }
            let mut memory = AlphaMemory::new();
            let seed = self.alpha_memory(parent).map(AlphaMemory::snapshot).unwrap_or_default();
            for handle in &seed {
                let Some(fact) = store.resolve(*handle) else {
                    continue;
                };
                let env = [Value::Fact(Arc::clone(fact))];
                match step.test.test(&SliceEnv(&env)) {
                    Ok(true) => {
                        memory.insert(*handle);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.stats.evaluation_errors += 1;
                        tracing::warn!(
                            condition = %step.key,
                            error = %e,
                            "condition failed to evaluate; treating as no match"
                        );
                    }
                }
            }
            let id = self.push_node(NodeKind::Alpha(AlphaNode {
                test: Arc::clone(&step.test),
                key: Arc::clone(&step.key),
                memory,
            }));
            self.nodes[parent.index()].children.push(id);
            self.alpha_index.insert(key, id);
            self.alpha_uses.insert(id, 1);
            used.push(id);
            parent = id;
        }
        parent
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(kind));
        id
    }

    fn push_beta(&mut self, kind: NodeKind, left: Option<NodeId>, right: NodeId) -> NodeId {
        let id = self.push_node(kind);
        if let Some(parent) = left {
            self.nodes[parent.index()].children.push(id);
        }
        self.nodes[right.index()].children.push(id);
        id
    }

    // -------------------------------------------------------------------------
    // Facts
    // -------------------------------------------------------------------------

    /// Propagates a fact that was just added to `store`.
    ///
    /// Returns how many tokens the fact carried into terminal memories.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the handle is not in the store or its
    /// type has no type node.
    pub fn insert_fact(
        &mut self,
        handle: FactHandle,
        store: &FactStore,
        agenda: &mut Agenda,
    ) -> Result<u64> {
        let fact = store
            .resolve(handle)
            .ok_or_else(|| Error::internal(format!("fact handle {handle:?} is not stored")))?;
        let node = self.type_node(fact.type_name())?;
        let fact = Arc::clone(fact);
        let reached = self.stats.terminal_insertions;
        let mut cx = Cx { store, agenda };
        self.stats.node_activations += 1;
        self.alpha_insert(node, handle, &fact, &mut cx);
        Ok(self.stats.terminal_insertions - reached)
    }

    /// Withdraws a fact from every memory.
    ///
    /// Call this while the fact is still resolvable in `store`: nothing is
    /// evaluated, but accumulate nodes read the stored argument values.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the type has no type node.
    pub fn retract_fact(
        &mut self,
        handle: FactHandle,
        type_name: &str,
        store: &FactStore,
        agenda: &mut Agenda,
    ) -> Result<()> {
        let node = self.type_node(type_name)?;
        let mut cx = Cx { store, agenda };
        self.stats.node_activations += 1;
        self.alpha_retract(node, handle, &mut cx);
        Ok(())
    }

    fn type_node(&self, type_name: &str) -> Result<NodeId> {
        self.type_nodes
            .get(type_name)
            .copied()
            .ok_or_else(|| Error::internal(format!("no type node for {type_name}")))
    }

    fn alpha_insert(&mut self, id: NodeId, handle: FactHandle, fact: &Arc<Fact>, cx: &mut Cx<'_>) {
        self.stats.node_activations += 1;
        let passes = match &self.nodes[id.index()].kind {
            NodeKind::Alpha(alpha) => {
                let test = Arc::clone(&alpha.test);
                let env = [Value::Fact(Arc::clone(fact))];
                self.check(id, &test, &SliceEnv(&env))
            }
            _ => true,
        };
        if !passes {
            return;
        }
        let inserted = match &mut self.nodes[id.index()].kind {
            NodeKind::Type(n) => n.memory.insert(handle),
            NodeKind::Alpha(n) => n.memory.insert(handle),
            _ => false,
        };
        if !inserted {
            return;
        }
        for child in self.nodes[id.index()].children.clone() {
            if self.nodes[child.index()].is_alpha_level() {
                self.alpha_insert(child, handle, fact, cx);
            } else {
                self.right_insert(child, handle, cx);
            }
        }
    }

    fn alpha_retract(&mut self, id: NodeId, handle: FactHandle, cx: &mut Cx<'_>) {
        self.stats.node_activations += 1;
        let removed = match &mut self.nodes[id.index()].kind {
            NodeKind::Type(n) => n.memory.remove(handle),
            NodeKind::Alpha(n) => n.memory.remove(handle),
            _ => false,
        };
        if !removed {
            return;
        }
        for child in self.nodes[id.index()].children.clone() {
            if self.nodes[child.index()].is_alpha_level() {
                self.alpha_retract(child, handle, cx);
            } else {
                self.right_retract(child, handle, cx);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Beta activations
    // -------------------------------------------------------------------------

    fn left_insert(&mut self, id: NodeId, token: &Token, cx: &mut Cx<'_>) {
        self.stats.node_activations += 1;
        match &self.nodes[id.index()].kind {
            NodeKind::Join(join) => {
                let right = self.right_facts(join.right);
                let test = join.test.clone();
                for handle in &right {
                    let candidate = token.extend(Slot::Fact(*handle));
                    if self.passes(id, test.as_deref(), &TokenEnv::new(&candidate, cx.store)) {
                        self.emit(id, candidate, token.clone(), cx);
                    }
                }
            }
            NodeKind::Quantifier(q) => {
                let right = self.right_facts(q.right);
                let test = q.test.clone();
                let mut matched = im::OrdSet::new();
                for handle in &right {
                    let env = TokenEnv::new(token, cx.store).with_candidate(*handle);
                    if self.passes(id, test.as_deref(), &env) {
                        matched.insert(*handle);
                    }
                }
                let count = matched.len();
                let pass = match &mut self.nodes[id.index()].kind {
                    NodeKind::Quantifier(q) => {
                        q.matches.insert(token.clone(), matched);
                        q.passes(count)
                    }
                    _ => false,
                };
                if pass {
                    self.emit(id, token.clone(), token.clone(), cx);
                }
            }
            NodeKind::Accumulate(acc) => {
                let right = self.right_facts(acc.right);
                let test = acc.test.clone();
                let argument = acc.argument.clone();
                let mut matched = im::OrdMap::new();
                for handle in &right {
                    let env = TokenEnv::new(token, cx.store).with_candidate(*handle);
                    if self.passes(id, test.as_deref(), &env) {
                        if let Some(value) = self.argument_value(id, argument.as_deref(), &env) {
                            matched.insert(*handle, value);
                        }
                    }
                }
                if let NodeKind::Accumulate(acc) = &mut self.nodes[id.index()].kind {
                    acc.groups.insert(
                        token.clone(),
                        Group {
                            matched,
                            emitted: None,
                        },
                    );
                }
                self.refresh_group(id, token, cx);
            }
            NodeKind::Terminal(terminal) => {
                let guard = terminal.guard.clone();
                let rule = terminal.rule;
                if !self.passes(id, guard.as_deref(), &TokenEnv::new(token, cx.store)) {
                    return;
                }
                let inserted = match &mut self.nodes[id.index()].kind {
                    NodeKind::Terminal(t) => t.memory.insert(token.clone(), token.clone()),
                    _ => false,
                };
                if inserted {
                    self.stats.terminal_insertions += 1;
                    cx.agenda.push(rule, token.clone());
                }
            }
            NodeKind::Root | NodeKind::Type(_) | NodeKind::Alpha(_) | NodeKind::Retired => {}
        }
    }

    fn left_retract(&mut self, id: NodeId, parent: &Token, cx: &mut Cx<'_>) {
        self.stats.node_activations += 1;
        let node = &mut self.nodes[id.index()];
        let removed = match &mut node.kind {
            NodeKind::Join(n) => n.memory.remove_children(parent),
            NodeKind::Quantifier(n) => {
                n.matches.remove(parent);
                n.memory.remove_children(parent)
            }
            NodeKind::Accumulate(n) => {
                n.groups.remove(parent);
                n.memory.remove_children(parent)
            }
            NodeKind::Terminal(n) => {
                let removed = n.memory.remove_children(parent);
                let rule = n.rule;
                for token in &removed {
                    self.stats.terminal_retractions += 1;
                    cx.agenda.cancel(rule, token);
                }
                return;
            }
            NodeKind::Root | NodeKind::Type(_) | NodeKind::Alpha(_) | NodeKind::Retired => {
                Vec::new()
            }
        };
        for token in removed {
            self.retract_downstream(id, &token, cx);
        }
    }

    fn right_insert(&mut self, id: NodeId, handle: FactHandle, cx: &mut Cx<'_>) {
        self.stats.node_activations += 1;
        match &self.nodes[id.index()].kind {
            NodeKind::Join(join) => {
                let lefts = self.left_tokens(join.left);
                let test = join.test.clone();
                for left in lefts {
                    let candidate = left.extend(Slot::Fact(handle));
                    if self.passes(id, test.as_deref(), &TokenEnv::new(&candidate, cx.store)) {
                        self.emit(id, candidate, left, cx);
                    }
                }
            }
            NodeKind::Quantifier(q) => {
                let lefts = self.left_tokens(q.left);
                let test = q.test.clone();
                for left in lefts {
                    let env = TokenEnv::new(&left, cx.store).with_candidate(handle);
                    if !self.passes(id, test.as_deref(), &env) {
                        continue;
                    }
                    let (before, after) = match &mut self.nodes[id.index()].kind {
                        NodeKind::Quantifier(q) => {
                            let set = q.matches.entry(left.clone()).or_insert_with(im::OrdSet::new);
                            let before = set.len();
                            set.insert(handle);
                            let after = set.len();
                            (q.passes(before), q.passes(after))
                        }
                        _ => continue,
                    };
                    self.flip(id, &left, before, after, cx);
                }
            }
            NodeKind::Accumulate(acc) => {
                let lefts = self.left_tokens(acc.left);
                let test = acc.test.clone();
                let argument = acc.argument.clone();
                for left in lefts {
                    let env = TokenEnv::new(&left, cx.store).with_candidate(handle);
                    if !self.passes(id, test.as_deref(), &env) {
                        continue;
                    }
                    let Some(value) = self.argument_value(id, argument.as_deref(), &env) else {
                        continue;
                    };
                    if let NodeKind::Accumulate(acc) = &mut self.nodes[id.index()].kind {
                        acc.groups
                            .entry(left.clone())
                            .or_insert_with(Group::default)
                            .matched
                            .insert(handle, value);
                    }
                    self.refresh_group(id, &left, cx);
                }
            }
            NodeKind::Root
            | NodeKind::Type(_)
            | NodeKind::Alpha(_)
            | NodeKind::Terminal(_)
            | NodeKind::Retired => {}
        }
    }

    fn right_retract(&mut self, id: NodeId, handle: FactHandle, cx: &mut Cx<'_>) {
        self.stats.node_activations += 1;
        match &self.nodes[id.index()].kind {
            NodeKind::Join(_) => {
                let removed = match &mut self.nodes[id.index()].kind {
                    NodeKind::Join(n) => n.memory.remove_where(|t| t.ends_with(handle)),
                    _ => Vec::new(),
                };
                for token in removed {
                    self.retract_downstream(id, &token, cx);
                }
            }
            NodeKind::Quantifier(q) => {
                for left in self.left_tokens(q.left) {
                    let (before, after) = match &mut self.nodes[id.index()].kind {
                        NodeKind::Quantifier(q) => match q.matches.get_mut(&left) {
                            Some(set) => {
                                let before = set.len();
                                if set.remove(&handle).is_none() {
                                    continue;
                                }
                                let after = set.len();
                                (q.passes(before), q.passes(after))
                            }
                            None => continue,
                        },
                        _ => continue,
                    };
                    self.flip(id, &left, before, after, cx);
                }
            }
            NodeKind::Accumulate(acc) => {
                for left in self.left_tokens(acc.left) {
                    let changed = match &mut self.nodes[id.index()].kind {
                        NodeKind::Accumulate(acc) => acc
                            .groups
                            .get_mut(&left)
                            .is_some_and(|g| g.matched.remove(&handle).is_some()),
                        _ => false,
                    };
                    if changed {
                        self.refresh_group(id, &left, cx);
                    }
                }
            }
            NodeKind::Root
            | NodeKind::Type(_)
            | NodeKind::Alpha(_)
            | NodeKind::Terminal(_)
            | NodeKind::Retired => {}
        }
    }

    /// Applies a change in a quantifier's pass state for one left token.
    fn flip(&mut self, id: NodeId, left: &Token, before: bool, after: bool, cx: &mut Cx<'_>) {
        match (before, after) {
            (false, true) => self.emit(id, left.clone(), left.clone(), cx),
            (true, false) => {
                let removed = match &mut self.nodes[id.index()].kind {
                    NodeKind::Quantifier(q) => q.memory.remove_children(left),
                    _ => Vec::new(),
                };
                for token in removed {
                    self.retract_downstream(id, &token, cx);
                }
            }
            _ => {}
        }
    }

    /// Recomputes an accumulate group and replaces its output token if the
    /// aggregate changed.
    fn refresh_group(&mut self, id: NodeId, left: &Token, cx: &mut Cx<'_>) {
        let (function, guard, group) = match &self.nodes[id.index()].kind {
            NodeKind::Accumulate(acc) => match acc.groups.get(left) {
                Some(group) => (acc.function, acc.guard.clone(), group.clone()),
                None => return,
            },
            _ => return,
        };
        let value = match aggregate(function, group.matched.values()) {
            Ok(value) => value,
            Err(e) => {
                self.note_error(id, &e);
                Value::Nil
            }
        };
        let extended = left.extend(Slot::Value(value));
        if group.emitted.as_ref() == Some(&extended) {
            return;
        }

        if let Some(old) = &group.emitted {
            let removed = match &mut self.nodes[id.index()].kind {
                NodeKind::Accumulate(acc) => acc.memory.remove(old),
                _ => false,
            };
            if removed {
                self.retract_downstream(id, old, cx);
            }
        }

        let pass = self.passes(id, guard.as_deref(), &TokenEnv::new(&extended, cx.store));
        if let NodeKind::Accumulate(acc) = &mut self.nodes[id.index()].kind {
            if let Some(g) = acc.groups.get_mut(left) {
                g.emitted = pass.then(|| extended.clone());
            }
        }
        if pass {
            self.emit(id, extended, left.clone(), cx);
        }
    }

    /// Stores an output token and passes it to every child.
    fn emit(&mut self, id: NodeId, token: Token, parent: Token, cx: &mut Cx<'_>) {
        let inserted = match &mut self.nodes[id.index()].kind {
            NodeKind::Join(n) => n.memory.insert(token.clone(), parent),
            NodeKind::Quantifier(n) => n.memory.insert(token.clone(), parent),
            NodeKind::Accumulate(n) => n.memory.insert(token.clone(), parent),
            _ => false,
        };
        if !inserted {
            return;
        }
        for child in self.nodes[id.index()].children.clone() {
            self.left_insert(child, &token, cx);
        }
    }

    /// Tells every child that `token` is gone.
    fn retract_downstream(&mut self, id: NodeId, token: &Token, cx: &mut Cx<'_>) {
        for child in self.nodes[id.index()].children.clone() {
            self.left_retract(child, token, cx);
        }
    }

    fn left_tokens(&self, left: Option<NodeId>) -> Vec<Token> {
        match left {
            None => vec![Token::empty()],
            Some(id) => self.nodes[id.index()]
                .token_memory()
                .map(TokenMemory::tokens)
                .unwrap_or_default(),
        }
    }

    fn right_facts(&self, right: NodeId) -> im::OrdSet<FactHandle> {
        self.alpha_memory(right).map(AlphaMemory::snapshot).unwrap_or_default()
    }

    fn alpha_memory(&self, id: NodeId) -> Option<&AlphaMemory> {
        self.nodes.get(id.index()).and_then(Node::alpha_memory)
    }

    fn passes(&mut self, id: NodeId, test: Option<&CompiledExpr>, env: &dyn Env) -> bool {
        match test {
            None => true,
            Some(test) => self.check(id, test, env),
        }
    }

    fn check(&mut self, id: NodeId, test: &CompiledExpr, env: &dyn Env) -> bool {
        match test.test(env) {
            Ok(pass) => pass,
            Err(e) => {
                self.note_error(id, &e);
                false
            }
        }
    }

    fn argument_value(
        &mut self,
        id: NodeId,
        argument: Option<&CompiledExpr>,
        env: &dyn Env,
    ) -> Option<Value> {
        match argument {
            None => Some(Value::Nil),
            Some(arg) => match arg.evaluate(env) {
                Ok(value) => Some(value),
                Err(e) => {
                    self.note_error(id, &e);
                    None
                }
            },
        }
    }

    fn note_error(&mut self, id: NodeId, error: &Error) {
        self.stats.evaluation_errors += 1;
        tracing::warn!(
            node = %id,
            kind = self.nodes[id.index()].kind_name(),
            error = %error,
            "condition failed to evaluate; treating as no match"
        );
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Returns the rule with the given id.
    #[must_use]
    pub fn rule(&self, id: RuleId) -> Option<&Arc<CompiledRule>> {
        self.rules.get(&id)
    }

    /// Looks a rule up by name.
    #[must_use]
    pub fn rule_by_name(&self, name: &str) -> Option<&Arc<CompiledRule>> {
        self.rule_names.get(name).and_then(|id| self.rule(*id))
    }

    /// Iterates rules in declaration order.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<CompiledRule>> {
        self.rules.values()
    }

    /// Returns the number of installed rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Returns the complete matches currently held for a rule.
    #[must_use]
    pub fn terminal_tokens(&self, rule: RuleId) -> Vec<Token> {
        self.rule(rule)
            .and_then(|r| self.nodes[r.terminal.index()].token_memory())
            .map(TokenMemory::tokens)
            .unwrap_or_default()
    }

    /// Returns true if `token` is still a complete match for `rule`.
    #[must_use]
    pub fn terminal_contains(&self, rule: RuleId, token: &Token) -> bool {
        self.rule(rule)
            .and_then(|r| self.nodes[r.terminal.index()].token_memory())
            .is_some_and(|m| m.contains(token))
    }

    /// Returns the node with the given id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Returns the number of node slots, including the root and retired slots.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Summarizes the network's structure.
    #[must_use]
    pub fn shape(&self) -> NetworkShape {
        let mut shape = NetworkShape {
            shared_alphas: self.shared_alphas,
            ..NetworkShape::default()
        };
        for node in &self.nodes {
            match &node.kind {
                NodeKind::Root | NodeKind::Retired => {}
                NodeKind::Type(_) => shape.types += 1,
                NodeKind::Alpha(_) => shape.alphas += 1,
                NodeKind::Join(_) => shape.joins += 1,
                NodeKind::Quantifier(q) => match q.quantifier {
                    Quantifier::Not => shape.nots += 1,
                    Quantifier::Exists => shape.exists += 1,
                },
                NodeKind::Accumulate(_) => shape.accumulates += 1,
                NodeKind::Terminal(_) => shape.terminals += 1,
            }
        }
        shape
    }

    /// Returns every node's memory, in node order.
    #[must_use]
    pub fn contents(&self) -> Vec<MemoryContents> {
        self.nodes
            .iter()
            .map(|node| match (node.alpha_memory(), node.token_memory()) {
                (Some(m), _) => MemoryContents::Facts(m.iter().collect()),
                (_, Some(m)) => MemoryContents::Tokens(m.tokens()),
                _ => MemoryContents::Root,
            })
            .collect()
    }

    /// Returns the counters accumulated since the last call, resetting them.
    pub fn take_stats(&mut self) -> PropagationStats {
        std::mem::take(&mut self.stats)
    }

    /// Returns the counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> PropagationStats {
        self.stats
    }
}

/// Borrowed state threaded through a propagation.
struct Cx<'a> {
    store: &'a FactStore,
    agenda: &'a mut Agenda,
}

// =============================================================================
// Aggregation
// =============================================================================

/// Folds the argument values of a group.
///
/// Null arguments are skipped. An empty group counts and sums to zero; its
/// average, minimum and maximum are null.
fn aggregate<'a>(function: AggregateFn, values: impl Iterator<Item = &'a Value>) -> Result<Value> {
    match function {
        AggregateFn::Count => {
            let n = values.count();
            Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
        }
        AggregateFn::Sum => values
            .filter(|v| !v.is_nil())
            .try_fold(Value::Int(0), |acc, v| numeric_add(&acc, v)),
        AggregateFn::Avg => {
            let mut count = 0u32;
            let mut sum = Value::Int(0);
            for v in values.filter(|v| !v.is_nil()) {
                sum = numeric_add(&sum, v)?;
                count += 1;
            }
            if count == 0 {
                return Ok(Value::Nil);
            }
            let total = sum.as_number().unwrap_or(0.0);
            Ok(Value::Float(total / f64::from(count)))
        }
        AggregateFn::Min | AggregateFn::Max => {
            let mut best: Option<&Value> = None;
            for v in values.filter(|v| !v.is_nil()) {
                let better = match best {
                    None => true,
                    Some(current) => {
                        let ordering = v.partial_cmp(current).ok_or_else(|| {
                            Error::type_mismatch(current.type_name(), v.type_name())
                        })?;
                        if function == AggregateFn::Min {
                            ordering.is_lt()
                        } else {
                            ordering.is_gt()
                        }
                    }
                };
                if better {
                    best = Some(v);
                }
            }
            Ok(best.cloned().unwrap_or(Value::Nil))
        }
    }
}

fn numeric_add(acc: &Value, v: &Value) -> Result<Value> {
    if !v.is_number() {
        return Err(Error::type_mismatch("number", v.type_name()));
    }
    binary(BinaryOp::Add, acc, v)
}
