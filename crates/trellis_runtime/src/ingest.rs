//! The ingestion pipeline.
//!
//! A program is ingested in a fixed order so that inline facts only ever
//! meet a complete network:
//! 1. Types
//! 2. User actions
//! 3. Tuple-spaces
//! 4. Rules
//! 5. Rule removals
//! 6. Matches against facts already stored fire
//! 7. Inline facts
//!
//! Each item that already exists unchanged is skipped, and removing a rule
//! that is not installed is logged and skipped. A failure anywhere rolls the
//! engine back and removes the spaces this ingest created, together with
//! anything published into them. Xuples published before the failure into
//! pre-existing spaces stay published.

use std::sync::Arc;
use std::time::Instant;

use trellis_foundation::{Error, ErrorKind, Fact, Result};
use trellis_language::{
    ActionDecl, Compiler, EmptyEnv, FactDecl, ParamType, Program, RemoveRuleDecl, RuleDecl, Scope,
    SpaceDecl, Span,
};
use trellis_storage::Declared;
use trellis_xuples::{Created, SpaceConfig};

use crate::engine::Engine;
use crate::executor::BuiltinAction;
use crate::metrics::IngestResult;

fn located(error: Error, span: Span) -> Error {
    if error.context.is_some() {
        error
    } else {
        error.with_context(span.context())
    }
}

impl Engine {
    /// Ingests a parsed program.
    ///
    /// # Errors
    ///
    /// Returns the first validation or propagation error. The engine is
    /// unchanged on error.
    pub fn ingest(&mut self, program: &Program) -> Result<IngestResult> {
        let mut created = Vec::new();
        let result = self.transaction(|engine| engine.ingest_steps(program, &mut created));
        if result.is_err() {
            for name in &created {
                self.spaces.remove(name);
            }
        }
        let result = result?;
        if self.logs(tracing::Level::INFO) {
            tracing::info!(
                types = result.types_added,
                rules = result.rules_added,
                removed = result.rules_removed,
                facts = result.facts_submitted,
                "program ingested"
            );
        }
        Ok(result)
    }

    fn ingest_steps(&mut self, program: &Program, created: &mut Vec<String>) -> Result<IngestResult> {
        let mut result = IngestResult::default();
        let propagated_before = self.state.network.stats();
        let facts_before = self.propagations;

        let started = Instant::now();
        for decl in &program.types {
            let schema = decl.to_schema()?;
            if self.state.types.declare(schema).map_err(|e| located(e, decl.span))? == Declared::Added {
                let schema = Arc::clone(self.state.types.require(&decl.name)?);
                self.state.network.add_type(&schema, &self.state.store);
                result.types_added += 1;
            }
        }
        result.timings.type_build = started.elapsed();

        for decl in &program.actions {
            if self.declare_action(decl).map_err(|e| located(e, decl.span))? {
                result.actions_added += 1;
            }
        }

        for decl in &program.spaces {
            let config = self.space_config(decl)?;
            let outcome = self
                .spaces
                .create(&decl.name, config)
                .map_err(|e| located(e, decl.span))?;
            if outcome == Created::Added {
                created.push(decl.name.clone());
                result.spaces_added += 1;
            }
        }

        let started = Instant::now();
        for decl in &program.rules {
            if self.install_rule(decl)? {
                result.rules_added += 1;
            }
        }
        for decl in &program.removals {
            if self.remove_declared_rule(decl)? {
                result.rules_removed += 1;
            }
        }
        result.timings.rule_build = started.elapsed();

        let started = Instant::now();
        self.run_epoch(0)?;
        for decl in &program.facts {
            let fact = self.build_fact(decl).map_err(|e| located(e, decl.span))?;
            if self.state.store.get(fact.id()).is_some_and(|stored| **stored == fact) {
                continue;
            }
            self.insert(Arc::new(fact), 0)
                .map_err(|e| located(e, decl.span))?;
            result.facts_submitted += 1;
        }
        result.timings.propagation = started.elapsed();

        let propagated_after = self.state.network.stats();
        result.propagation_targets =
            propagated_after.terminal_insertions - propagated_before.terminal_insertions;
        result.facts_propagated = self.propagations - facts_before;
        Ok(result)
    }

    /// Registers a user action; false if an identical one exists.
    fn declare_action(&mut self, decl: &ActionDecl) -> Result<bool> {
        if BuiltinAction::from_name(&decl.name).is_some() {
            return Err(Error::new(ErrorKind::DuplicateAction(decl.name.clone())));
        }
        if let Some(existing) = self.state.actions.get(decl.name.as_str()) {
            return if existing.params == decl.params {
                Ok(false)
            } else {
                Err(Error::new(ErrorKind::DuplicateAction(decl.name.clone())))
            };
        }
        for param in &decl.params {
            if let ParamType::Record(type_name) = &param.ty {
                self.state.types.require(type_name)?;
            }
        }
        self.state
            .actions
            .insert(Arc::from(decl.name.as_str()), decl.clone());
        Ok(true)
    }

    /// Applies a declaration's options on top of the configured defaults.
    fn space_config(&self, decl: &SpaceDecl) -> Result<SpaceConfig> {
        let mut config = self.config.space_config();
        for option in &decl.options {
            config
                .apply(&option.key, &option.value.to_string())
                .map_err(|e| {
                    let span = if option.span.is_known() { option.span } else { decl.span };
                    located(e, span).with_frame(format!("xuple-space {}", decl.name))
                })?;
        }
        Ok(config)
    }

    /// Validates a rule's actions and installs it; false if an identical
    /// rule is already installed.
    fn install_rule(&mut self, decl: &RuleDecl) -> Result<bool> {
        if let Some(existing) = self.state.network.rule_by_name(&decl.name) {
            if existing.source == decl.to_string() {
                return Ok(false);
            }
        }
        for call in &decl.actions {
            let expected = match BuiltinAction::from_name(&call.name) {
                Some(builtin) => builtin.arity(),
                None => self
                    .state
                    .actions
                    .get(call.name.as_str())
                    .map(|a| a.params.len())
                    .ok_or_else(|| {
                        located(Error::new(ErrorKind::UnknownAction(call.name.clone())), call.span)
                            .with_frame(format!("rule {}", decl.name))
                    })?,
            };
            if call.args.len() != expected {
                return Err(located(
                    Error::arity_mismatch(&call.name, expected.to_string(), call.args.len()),
                    call.span,
                )
                .with_frame(format!("rule {}", decl.name)));
            }
        }
        let state = &mut self.state;
        let reached = state.network.stats().terminal_insertions;
        state
            .network
            .add_rule(decl, &state.types, &state.store, &mut state.agenda)?;
        // Stored facts reaching the new rule count as propagations.
        let seeded = state.network.stats().terminal_insertions - reached;
        self.propagations += seeded;
        self.count(|m| m.facts_propagated += seeded);
        if self.logs(tracing::Level::DEBUG) {
            tracing::debug!(rule = %decl.name, seeded, "rule added");
        }
        Ok(true)
    }

    /// Uninstalls a rule named by the program; false if none is installed.
    fn remove_declared_rule(&mut self, decl: &RemoveRuleDecl) -> Result<bool> {
        let state = &mut self.state;
        match state.network.remove_rule(&decl.rule, &mut state.agenda) {
            Ok(_) => {
                self.count(|m| m.rules_removed += 1);
                if self.logs(tracing::Level::DEBUG) {
                    tracing::debug!(rule = %decl.rule, "rule removed");
                }
                Ok(true)
            }
            Err(e) if matches!(e.kind, ErrorKind::UnknownRule(_)) => {
                if self.logs(tracing::Level::WARN) {
                    tracing::warn!(rule = %decl.rule, "no such rule to remove; skipped");
                }
                Ok(false)
            }
            Err(e) => Err(located(e, decl.span)),
        }
    }

    /// Evaluates an inline fact's field expressions.
    fn build_fact(&self, decl: &FactDecl) -> Result<Fact> {
        let schema = self.state.types.require(&decl.type_name)?;
        let scope = Scope::new();
        let compiler = Compiler::new(&scope).with_types(&self.state.types);
        let mut fields = Vec::with_capacity(decl.fields.len());
        for (name, expr) in &decl.fields {
            let value = compiler
                .compile(expr)?
                .evaluate(&EmptyEnv)
                .map_err(|e| e.with_frame(format!("field {}.{name}", decl.type_name)))?;
            fields.push((name.as_str(), value));
        }
        Fact::new(Arc::clone(schema), fields)
    }
}
