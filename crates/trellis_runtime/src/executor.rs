//! The action executor.
//!
//! A firing evaluates each action's arguments against the token's bindings,
//! validates them, and dispatches by name. Built-in actions act on the
//! engine; user-declared actions only appear in the activation log.
//!
//! Errors are scoped to the firing: they are recorded in the log and the
//! epoch continues. Structural errors (recursion limit, capacity, internal)
//! propagate and abort the whole transaction.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use trellis_engine::{CompiledAction, CompiledRule, RuleId, Slot, Token};
use trellis_foundation::{Error, ErrorKind, Fact, Result, Value};
use trellis_language::{SliceEnv, Span};

use crate::engine::Engine;

// =============================================================================
// Built-in Actions
// =============================================================================

/// The reserved action names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinAction {
    /// `Print(text)`: write a line to the output sink.
    Print,
    /// `Log(text)`: emit an info event.
    Log,
    /// `Insert(fact)`: add a fact.
    Insert,
    /// `Update(fact)`: replace a fact's stored image.
    Update,
    /// `Retract(fact)`: remove a fact.
    Retract,
    /// `Xuple(space, fact)`: publish into a tuple-space.
    Xuple,
}

impl BuiltinAction {
    /// Every built-in, in documentation order.
    pub const ALL: [Self; 6] = [
        Self::Print,
        Self::Log,
        Self::Insert,
        Self::Update,
        Self::Retract,
        Self::Xuple,
    ];

    /// Looks a built-in up by its exact name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    /// The action name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Print => "Print",
            Self::Log => "Log",
            Self::Insert => "Insert",
            Self::Update => "Update",
            Self::Retract => "Retract",
            Self::Xuple => "Xuple",
        }
    }

    /// Number of arguments.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::Xuple => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for BuiltinAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Activation Log
// =============================================================================

/// One executed action.
#[derive(Clone, Debug)]
pub struct Activation {
    /// The firing rule.
    pub rule: Arc<str>,
    /// The action name.
    pub action: Arc<str>,
    /// Evaluated arguments; empty if evaluation failed.
    pub args: Vec<Value>,
    /// Facts of the firing token, in pattern order.
    pub triggering_facts: Vec<Arc<Fact>>,
    /// Epoch nesting depth; 0 for the top-level call.
    pub depth: usize,
    /// Why the action failed, if it did.
    pub error: Option<Arc<Error>>,
}

impl Activation {
    /// Returns true if the action ran to completion.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

// =============================================================================
// Output Sink
// =============================================================================

/// Where `Print` writes.
pub(crate) enum Output {
    Stdout,
    Writer(Box<dyn Write + Send>),
}

impl Output {
    fn write_line(&mut self, text: &str) -> io::Result<()> {
        match self {
            Self::Stdout => writeln!(io::stdout().lock(), "{text}"),
            Self::Writer(w) => {
                writeln!(w, "{text}")?;
                w.flush()
            }
        }
    }
}

/// An in-memory sink whose clones share one buffer.
#[derive(Clone, Debug, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    /// Written lines, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(ToString::to_string).collect()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Firing
// =============================================================================

fn invalid_args(action: &str, message: impl Into<String>) -> Error {
    Error::new(ErrorKind::ActionValidation {
        action: action.to_string(),
        message: message.into(),
    })
}

fn failed(action: &str, cause: Error) -> Error {
    match cause.kind {
        ErrorKind::ActionValidation { .. } | ErrorKind::ActionExecution { .. } => cause,
        _ => Error::new(ErrorKind::ActionExecution {
            action: action.to_string(),
            message: cause.kind.to_string(),
        })
        .with_cause(cause),
    }
}

fn located(error: Error, span: Span) -> Error {
    if error.context.is_some() {
        error
    } else {
        error.with_context(span.context())
    }
}

fn expect_string<'a>(action: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| invalid_args(action, format!("expected string, got {}", value.type_name())))
}

fn expect_fact<'a>(action: &str, value: &'a Value) -> Result<&'a Arc<Fact>> {
    value
        .as_fact()
        .ok_or_else(|| invalid_args(action, format!("expected fact, got {}", value.type_name())))
}

impl Engine {
    /// Runs a rule's actions for one token, in written order.
    pub(crate) fn fire(&mut self, rule: RuleId, token: &Token, depth: usize) -> Result<()> {
        let rule = Arc::clone(
            self.state
                .network
                .rule(rule)
                .ok_or_else(|| Error::internal(format!("agenda names unknown {rule:?}")))?,
        );

        // Bindings are captured once so later actions see the facts as
        // they were when the rule matched.
        let store = &self.state.store;
        let bindings: Vec<Value> = token
            .slots()
            .iter()
            .map(|slot| match slot {
                Slot::Fact(handle) => store
                    .resolve(*handle)
                    .map_or(Value::Nil, |f| Value::Fact(Arc::clone(f))),
                Slot::Value(v) => v.clone(),
            })
            .collect();
        let triggering: Vec<Arc<Fact>> = token
            .fact_handles()
            .filter_map(|h| store.resolve(h).cloned())
            .collect();

        self.count(|m| m.rules_fired += 1);
        if self.logs(tracing::Level::DEBUG) {
            tracing::debug!(rule = %rule.name, depth, facts = triggering.len(), "firing");
        }

        for action in &rule.actions {
            self.execute(&rule, action, &bindings, &triggering, depth)?;
        }
        Ok(())
    }

    fn execute(
        &mut self,
        rule: &CompiledRule,
        action: &CompiledAction,
        bindings: &[Value],
        triggering: &[Arc<Fact>],
        depth: usize,
    ) -> Result<()> {
        let env = SliceEnv(bindings);
        let evaluated: Result<Vec<Value>> = action.args.iter().map(|a| a.evaluate(&env)).collect();

        let index = self.activations.len();
        self.activations.push(Activation {
            rule: Arc::clone(&rule.name),
            action: Arc::clone(&action.name),
            args: evaluated.as_ref().map(Clone::clone).unwrap_or_default(),
            triggering_facts: triggering.to_vec(),
            depth,
            error: None,
        });

        let outcome = match evaluated {
            Ok(args) => self.dispatch(rule, &action.name, &args, triggering, depth),
            Err(e) => Err(e),
        };
        let Err(error) = outcome else {
            self.count(|m| m.actions_executed += 1);
            return Ok(());
        };
        if error.is_structural() {
            return Err(error);
        }

        let error = located(failed(&action.name, error), action.span)
            .with_frame(format!("rule {}", rule.name))
            .with_frame(format!("action {}", action.name));
        if matches!(error.kind, ErrorKind::ActionValidation { .. }) {
            self.count(|m| m.action_validation_errors += 1);
        } else {
            self.count(|m| m.action_execution_errors += 1);
        }
        if self.logs(tracing::Level::WARN) {
            tracing::warn!(rule = %rule.name, action = %action.name, error = %error, "action failed");
        }
        if let Some(entry) = self.activations.get_mut(index) {
            entry.error = Some(Arc::new(error));
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        rule: &CompiledRule,
        name: &str,
        args: &[Value],
        triggering: &[Arc<Fact>],
        depth: usize,
    ) -> Result<()> {
        let Some(builtin) = BuiltinAction::from_name(name) else {
            return self.check_user_args(name, args);
        };
        if args.len() != builtin.arity() {
            return Err(invalid_args(
                name,
                format!("expected {} argument(s), got {}", builtin.arity(), args.len()),
            ));
        }

        match builtin {
            BuiltinAction::Print => {
                let text = expect_string(name, &args[0])?;
                self.output
                    .write_line(text)
                    .map_err(|e| Error::new(ErrorKind::ActionExecution {
                        action: name.to_string(),
                        message: e.to_string(),
                    }))
            }
            BuiltinAction::Log => {
                let text = expect_string(name, &args[0])?;
                if self.logs(tracing::Level::INFO) {
                    tracing::info!(target: "trellis::action", rule = %rule.name, message = text);
                }
                Ok(())
            }
            BuiltinAction::Insert => {
                let fact = Arc::clone(expect_fact(name, &args[0])?);
                self.insert(fact, depth + 1).map(|_| ())
            }
            BuiltinAction::Update => {
                let fact = Arc::clone(expect_fact(name, &args[0])?);
                self.update(fact, depth + 1).map(|_| ())
            }
            BuiltinAction::Retract => {
                let id = expect_fact(name, &args[0])?.update_target().clone();
                self.retract(&id, depth + 1)
            }
            BuiltinAction::Xuple => {
                let space = expect_string(name, &args[0])?;
                let fact = Arc::clone(expect_fact(name, &args[1])?);
                let id = self.spaces.publish(space, fact, triggering.to_vec())?;
                self.count(|m| m.xuples_published += 1);
                if self.logs(tracing::Level::DEBUG) {
                    tracing::debug!(rule = %rule.name, space, xuple = %id, "published");
                }
                Ok(())
            }
        }
    }

    /// User actions have no effect; only their arguments are checked.
    fn check_user_args(&self, name: &str, args: &[Value]) -> Result<()> {
        let decl = self
            .state
            .actions
            .get(name)
            .ok_or_else(|| Error::new(ErrorKind::UnknownAction(name.to_string())))?;
        if decl.params.len() != args.len() {
            return Err(invalid_args(
                name,
                format!("expected {} argument(s), got {}", decl.params.len(), args.len()),
            ));
        }
        for (param, value) in decl.params.iter().zip(args) {
            if !param.ty.accepts(value) {
                return Err(invalid_args(
                    name,
                    format!("parameter {} expects {}, got {}", param.name, param.ty, value.type_name()),
                ));
            }
        }
        Ok(())
    }
}
