//! The engine facade.
//!
//! An [`Engine`] owns the type registry, the fact store, the network and
//! the agenda, and shares a [`XupleManager`] with external consumers.
//!
//! Every top-level call is one transaction:
//! 1. Clear the activation log and the firing set
//! 2. Apply the fact operation and propagate it through the network
//! 3. Drain the agenda, firing activations in rule-declaration order
//! 4. On error, restore the snapshot taken in step 1
//!
//! Actions that insert, update or retract facts run a nested epoch before
//! the next action starts. Snapshots are O(1) because the registry, store
//! and memories are persistent collections.

use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use trellis_engine::{Agenda, Network, RuleId, Token};
use trellis_foundation::{Error, ErrorKind, Fact, FactId, Result};
use trellis_language::ActionDecl;
use trellis_storage::{FactHandle, FactStore, TypeRegistry};
use trellis_xuples::{Created, SpaceConfig, XupleManager, XupleSpace};

use crate::config::EngineConfig;
use crate::executor::{Activation, Output};
use crate::metrics::Metrics;

// =============================================================================
// Snapshot State
// =============================================================================

/// Everything a failed transaction restores.
#[derive(Clone, Debug, Default)]
pub(crate) struct State {
    pub(crate) types: TypeRegistry,
    pub(crate) store: FactStore,
    pub(crate) network: Network,
    pub(crate) agenda: Agenda,
    pub(crate) actions: im::OrdMap<Arc<str>, ActionDecl>,
}

/// Result of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Updated {
    /// The stored image was replaced.
    Replaced,
    /// The new image equals the stored one; nothing propagated.
    Unchanged,
}

// =============================================================================
// Engine
// =============================================================================

/// A forward-chaining rule engine with tuple-space output.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) state: State,
    pub(crate) spaces: Arc<XupleManager>,
    pub(crate) activations: Vec<Activation>,
    pub(crate) fired: HashSet<(RuleId, Token)>,
    pub(crate) metrics: Metrics,
    /// Fact-to-terminal propagations, counted whether or not metrics are on.
    pub(crate) propagations: u64,
    pub(crate) output: Output,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("types", &self.state.types.len())
            .field("facts", &self.state.store.len())
            .field("rules", &self.state.network.rule_count())
            .field("spaces", &self.spaces.len())
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(EngineConfig::default())
    }

    /// Creates an engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        let state = State {
            store: FactStore::new().with_capacity_limit(config.max_facts_in_memory),
            ..State::default()
        };
        let spaces = Arc::new(XupleManager::new().with_seed(config.random_seed));
        Self {
            config,
            state,
            spaces,
            activations: Vec::new(),
            fired: HashSet::new(),
            metrics: Metrics::default(),
            propagations: 0,
            output: Output::Stdout,
        }
    }

    /// Uses the given tuple-space manager, e.g. one on a manual clock.
    #[must_use]
    pub fn with_spaces(mut self, spaces: Arc<XupleManager>) -> Self {
        self.spaces = spaces;
        self
    }

    /// Sends `Print` output to `sink` instead of standard output.
    #[must_use]
    pub fn with_output(mut self, sink: impl Write + Send + 'static) -> Self {
        self.output = Output::Writer(Box::new(sink));
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Facts
    // -------------------------------------------------------------------------

    /// Adds a fact and runs the resulting epoch to quiescence.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` or `InvalidSchema` for a fact the engine cannot
    /// accept, `DuplicateIdentity` if the identity is taken, and
    /// `CapacityExceeded` or `RecursionLimit` if propagation aborts. The
    /// engine is unchanged on error.
    pub fn submit_fact(&mut self, fact: impl Into<Arc<Fact>>) -> Result<FactId> {
        let fact = fact.into();
        self.transaction(|engine| {
            let id = fact.id().clone();
            engine.insert(fact, 0)?;
            Ok(id)
        })
    }

    /// Removes a fact and runs the resulting epoch to quiescence.
    ///
    /// # Errors
    ///
    /// Returns `FactNotFound` for an unknown identity.
    pub fn retract_fact(&mut self, id: &FactId) -> Result<()> {
        self.transaction(|engine| engine.retract(id, 0))
    }

    /// Replaces the stored image of a fact.
    ///
    /// The target is the fact's origin for modified copies, its own
    /// identity otherwise.
    ///
    /// # Errors
    ///
    /// Returns `FactNotFound` if the target is absent and
    /// `PrimaryKeyMismatch` if the new image has a different identity.
    pub fn update_fact(&mut self, fact: impl Into<Arc<Fact>>) -> Result<Updated> {
        let fact = fact.into();
        self.transaction(|engine| engine.update(fact, 0))
    }

    // -------------------------------------------------------------------------
    // Rules
    // -------------------------------------------------------------------------

    /// Uninstalls a rule, dropping its pending activations and every
    /// network node no other rule uses.
    ///
    /// Facts stay stored. A rule declared later under the same name starts
    /// from scratch and sees them like any new rule.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRule` if no rule has this name.
    pub fn remove_rule(&mut self, name: &str) -> Result<()> {
        self.transaction(|engine| {
            let state = &mut engine.state;
            state.network.remove_rule(name, &mut state.agenda)?;
            engine.count(|m| m.rules_removed += 1);
            if engine.logs(tracing::Level::INFO) {
                tracing::info!(rule = name, "rule removed");
            }
            Ok(())
        })
    }

    /// Returns the activation log of the last top-level call.
    #[must_use]
    pub fn get_activations(&self) -> &[Activation] {
        &self.activations
    }

    /// Looks a fact up by identity.
    #[must_use]
    pub fn fact(&self, id: &FactId) -> Option<&Arc<Fact>> {
        self.state.store.get(id)
    }

    /// Iterates stored facts in arrival order.
    pub fn facts(&self) -> impl Iterator<Item = &Arc<Fact>> {
        self.state.store.iter().map(|(_, fact)| fact)
    }

    /// Number of stored facts.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.state.store.len()
    }

    /// Returns the type registry.
    #[must_use]
    pub const fn types(&self) -> &TypeRegistry {
        &self.state.types
    }

    /// Returns the network, for inspection.
    #[must_use]
    pub const fn network(&self) -> &Network {
        &self.state.network
    }

    /// Returns the declared user actions.
    pub fn actions(&self) -> impl Iterator<Item = &ActionDecl> {
        self.state.actions.values()
    }

    /// Lists the fact identities of every complete match of a rule.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRule` if no rule has this name.
    pub fn terminal_tokens(&self, rule: &str) -> Result<Vec<Vec<FactId>>> {
        let rule = self
            .state
            .network
            .rule_by_name(rule)
            .ok_or_else(|| Error::new(ErrorKind::UnknownRule(rule.to_string())))?;
        Ok(self
            .state
            .network
            .terminal_tokens(rule.id)
            .iter()
            .map(|token| {
                token
                    .fact_handles()
                    .filter_map(|h| self.state.store.resolve(h))
                    .map(|fact| fact.id().clone())
                    .collect()
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // Tuple-spaces
    // -------------------------------------------------------------------------

    /// Creates a tuple-space.
    ///
    /// # Errors
    ///
    /// Returns `SpaceExists` for a conflicting re-creation and
    /// `InvalidSpaceConfig` for a configuration that does not validate.
    pub fn create_space(&self, name: &str, config: SpaceConfig) -> Result<Created> {
        self.spaces.create(name, config)
    }

    /// Space names in creation order.
    #[must_use]
    pub fn list_spaces(&self) -> Vec<String> {
        self.spaces.list()
    }

    /// Looks a space up.
    ///
    /// # Errors
    ///
    /// Returns `SpaceNotFound` for an unknown name.
    pub fn get_space(&self, name: &str) -> Result<Arc<XupleSpace>> {
        self.spaces.get(name)
    }

    /// Returns the shared tuple-space manager.
    #[must_use]
    pub const fn spaces(&self) -> &Arc<XupleManager> {
        &self.spaces
    }

    // -------------------------------------------------------------------------
    // Metrics
    // -------------------------------------------------------------------------

    /// Returns the counters.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Resets the counters.
    pub fn reset_metrics(&mut self) {
        self.metrics = Metrics::default();
    }

    pub(crate) fn count(&mut self, update: impl FnOnce(&mut Metrics)) {
        if self.config.enable_metrics {
            update(&mut self.metrics);
        }
    }

    pub(crate) fn logs(&self, level: tracing::Level) -> bool {
        self.config.log_level.enabled(level)
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Runs `op` as one top-level call, restoring the pre-call state if it
    /// fails.
    pub(crate) fn transaction<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.activations.clear();
        self.fired.clear();
        let saved = self.state.clone();
        let started = Instant::now();

        let result = op(self);

        self.fired.clear();
        let stats = self.state.network.take_stats();
        self.count(|m| m.absorb(stats));
        if let Err(error) = &result {
            self.state = saved;
            self.count(|m| m.rollbacks += 1);
            if self.logs(tracing::Level::WARN) {
                tracing::warn!(error = %error, "transaction rolled back");
            }
        }
        if let Some(limit) = self.config.transaction_timeout {
            let elapsed = started.elapsed();
            if elapsed > limit {
                self.count(|m| m.timeouts += 1);
                if self.logs(tracing::Level::WARN) {
                    tracing::warn!(
                        elapsed_ms = elapsed.as_millis(),
                        limit_ms = limit.as_millis(),
                        "transaction exceeded its timeout"
                    );
                }
            }
        }
        result
    }

    /// Checks that a fact was built against the registered schema.
    fn admit(&self, fact: Arc<Fact>) -> Result<Arc<Fact>> {
        let schema = self.state.types.require(fact.type_name())?;
        if Arc::ptr_eq(schema, fact.schema()) || **schema == **fact.schema() {
            Ok(fact)
        } else {
            Err(Error::new(ErrorKind::InvalidSchema {
                type_name: fact.type_name().to_string(),
                message: "fact was built against a different declaration".to_string(),
            }))
        }
    }

    pub(crate) fn insert(&mut self, fact: Arc<Fact>, depth: usize) -> Result<FactHandle> {
        let fact = self.admit(fact)?;
        let state = &mut self.state;
        let handle = state.store.add(fact)?;
        let reached = state
            .network
            .insert_fact(handle, &state.store, &mut state.agenda)?;
        self.propagations += reached;
        self.count(|m| {
            m.facts_submitted += 1;
            m.facts_propagated += reached;
        });
        self.run_epoch(depth)?;
        Ok(handle)
    }

    pub(crate) fn retract(&mut self, id: &FactId, depth: usize) -> Result<()> {
        let state = &mut self.state;
        let handle = state
            .store
            .handle_of(id)
            .ok_or_else(|| Error::fact_not_found(id.clone()))?;
        let type_name = Arc::clone(
            state
                .store
                .resolve(handle)
                .ok_or_else(|| Error::internal(format!("identity {id} points at a dead handle")))?
                .type_name(),
        );
        // Retract from the network while the fact still resolves.
        state
            .network
            .retract_fact(handle, &type_name, &state.store, &mut state.agenda)?;
        state.store.retract(id)?;
        self.count(|m| m.facts_retracted += 1);
        self.run_epoch(depth)
    }

    pub(crate) fn update(&mut self, fact: Arc<Fact>, depth: usize) -> Result<Updated> {
        let fact = self.admit(fact)?;
        let target = fact.update_target().clone();
        let state = &mut self.state;
        let handle = state
            .store
            .handle_of(&target)
            .ok_or_else(|| Error::fact_not_found(target.clone()))?;
        if *fact.id() != target {
            return Err(Error::new(ErrorKind::PrimaryKeyMismatch {
                expected: target,
                actual: fact.id().clone(),
            }));
        }
        if state.store.resolve(handle).is_some_and(|old| **old == *fact) {
            return Ok(Updated::Unchanged);
        }

        state
            .network
            .retract_fact(handle, fact.type_name(), &state.store, &mut state.agenda)?;
        let replaced = state.store.update(&target, fact)?;
        let reached = state
            .network
            .insert_fact(replaced.new_handle, &state.store, &mut state.agenda)?;
        self.propagations += reached;
        self.count(|m| {
            m.facts_updated += 1;
            m.facts_propagated += reached;
        });
        self.run_epoch(depth)?;
        Ok(Updated::Replaced)
    }

    /// Fires everything on the agenda, depth-first through nested epochs.
    pub(crate) fn run_epoch(&mut self, depth: usize) -> Result<()> {
        if self.state.agenda.is_empty() {
            return Ok(());
        }
        if depth > self.config.recursion_limit {
            return Err(Error::new(ErrorKind::RecursionLimit {
                limit: self.config.recursion_limit,
            }));
        }
        self.count(|m| {
            m.epochs += 1;
            m.max_depth = m.max_depth.max(depth);
        });

        for pending in self.state.agenda.drain() {
            // An earlier firing in this epoch may have retracted the match.
            if !self.state.network.terminal_contains(pending.rule, &pending.token) {
                continue;
            }
            if !self.fired.insert((pending.rule, pending.token.clone())) {
                continue;
            }
            self.fire(pending.rule, &pending.token, depth)?;
        }
        Ok(())
    }
}
