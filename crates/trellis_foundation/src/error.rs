//! Error types for the Trellis system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.
//! Every [`ErrorKind`] belongs to exactly one [`ErrorCategory`], which is
//! the coarse taxonomy callers match on.

use std::fmt;

use thiserror::Error;

use crate::fact::FactId;
use crate::types::FieldType;

/// The main error type for Trellis operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
    /// The underlying error, if this one wraps another.
    #[source]
    pub cause: Option<Box<Error>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            cause: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Pushes a frame onto this error's context, creating one if needed.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        let context = self.context.take().unwrap_or_default();
        self.context = Some(context.with_frame(frame));
        self
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the coarse category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error must abort the current propagation epoch.
    ///
    /// Structural errors roll the engine back to its pre-epoch state;
    /// everything else is scoped to a single firing or operation.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RecursionLimit { .. }
                | ErrorKind::CapacityExceeded { .. }
                | ErrorKind::Timeout { .. }
                | ErrorKind::Internal(_)
        )
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        })
    }

    /// Creates a field type mismatch error.
    #[must_use]
    pub fn field_type_mismatch(
        type_name: impl Into<String>,
        field: impl Into<String>,
        expected: FieldType,
        actual: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::FieldTypeMismatch {
            type_name: type_name.into(),
            field: field.into(),
            expected,
            actual: actual.into(),
        })
    }

    /// Creates an unknown type error.
    #[must_use]
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownType(name.into()))
    }

    /// Creates an unknown field error.
    #[must_use]
    pub fn unknown_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownField {
            type_name: type_name.into(),
            field: field.into(),
        })
    }

    /// Creates an unknown variable error.
    #[must_use]
    pub fn unknown_variable(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownVariable(name.into()))
    }

    /// Creates an arity mismatch error.
    #[must_use]
    pub fn arity_mismatch(name: impl Into<String>, expected: impl Into<String>, actual: usize) -> Self {
        Self::new(ErrorKind::ArityMismatch {
            name: name.into(),
            expected: expected.into(),
            actual,
        })
    }

    /// Creates a duplicate identity error.
    #[must_use]
    pub fn duplicate_identity(id: FactId) -> Self {
        Self::new(ErrorKind::DuplicateIdentity(id))
    }

    /// Creates a fact not found error.
    #[must_use]
    pub fn fact_not_found(id: FactId) -> Self {
        Self::new(ErrorKind::FactNotFound(id))
    }

    /// Creates an invalid expression error.
    #[must_use]
    pub fn invalid_expression(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidExpression(message.into()))
    }

    /// Creates an internal invariant violation error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }
}

/// Coarse error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Produced by an external parser; passed through unchanged.
    Parsing,
    /// Schema, reference, or configuration problems detected before execution.
    Validation,
    /// Failures while propagating facts through the network.
    Execution,
    /// A single action firing had invalid arguments.
    ActionValidation,
    /// A single action firing failed while running.
    ActionExecution,
    /// Tuple-space lookup, creation, and capacity failures.
    TupleSpace,
    /// Invariant violations.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parsing => "parsing error",
            Self::Validation => "validation error",
            Self::Execution => "execution error",
            Self::ActionValidation => "action validation error",
            Self::ActionExecution => "action execution error",
            Self::TupleSpace => "tuple-space error",
            Self::Internal => "internal error",
        };
        f.write_str(name)
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Parse error reported by the external parser.
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        /// Description of the parse error.
        message: String,
        /// Line number (1-indexed).
        line: u32,
        /// Column number (1-indexed).
        column: u32,
    },

    /// Value has the wrong type for an operator or function.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Description of the expected type.
        expected: String,
        /// Description of the actual value.
        actual: String,
    },

    /// A field value does not match its declared type.
    #[error("field {type_name}.{field} expects {expected}, got {actual}")]
    FieldTypeMismatch {
        /// The record type.
        type_name: String,
        /// The field name.
        field: String,
        /// The declared type.
        expected: FieldType,
        /// Description of the supplied value.
        actual: String,
    },

    /// Reference to a record type that was never declared.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Reference to a field the type does not declare.
    #[error("unknown field: {type_name}.{field}")]
    UnknownField {
        /// The record type.
        type_name: String,
        /// The missing field name.
        field: String,
    },

    /// A declared field was not supplied.
    #[error("missing field: {type_name}.{field}")]
    MissingField {
        /// The record type.
        type_name: String,
        /// The field that was not supplied.
        field: String,
    },

    /// Reference to a variable that is not bound in scope.
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// A type schema is malformed.
    #[error("invalid schema for {type_name}: {message}")]
    InvalidSchema {
        /// The record type.
        type_name: String,
        /// What is wrong with it.
        message: String,
    },

    /// A type was re-declared with a different schema.
    #[error("type {0} already declared with a different schema")]
    DuplicateType(String),

    /// A rule name is already taken by a different rule.
    #[error("rule {0} already declared with a different body")]
    DuplicateRule(String),

    /// No installed rule has this name.
    #[error("unknown rule: {0}")]
    UnknownRule(String),

    /// An action was re-declared with different parameters or shadows a built-in.
    #[error("action {0} conflicts with an existing declaration")]
    DuplicateAction(String),

    /// Reference to an action that was never declared.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Wrong number of arguments to a function or action.
    #[error("arity mismatch for {name}: expected {expected}, got {actual}")]
    ArityMismatch {
        /// The function or action name.
        name: String,
        /// Description of expected arity.
        expected: String,
        /// Actual number of arguments.
        actual: usize,
    },

    /// A fact with this identity already exists with different contents.
    #[error("duplicate fact identity: {0}")]
    DuplicateIdentity(FactId),

    /// No fact with this identity exists.
    #[error("fact not found: {0}")]
    FactNotFound(FactId),

    /// An update would change the fact's identity.
    #[error("update of {expected} would change identity to {actual}")]
    PrimaryKeyMismatch {
        /// The identity being updated.
        expected: FactId,
        /// The identity of the new image.
        actual: FactId,
    },

    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Integer arithmetic overflowed.
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    /// Regular expression failed to compile.
    #[error("invalid regex {pattern:?}: {message}")]
    InvalidRegex {
        /// The offending pattern.
        pattern: String,
        /// The compiler's message.
        message: String,
    },

    /// Expression is malformed or used where it is not allowed.
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// A value could not be converted by CAST.
    #[error("cannot cast {value} to {target}")]
    InvalidCast {
        /// Rendering of the source value.
        value: String,
        /// The target type.
        target: FieldType,
    },

    /// Nested epochs exceeded the configured depth.
    #[error("recursion limit ({limit}) exceeded")]
    RecursionLimit {
        /// The configured limit.
        limit: usize,
    },

    /// The fact store is full.
    #[error("capacity exceeded: at most {limit} facts in memory")]
    CapacityExceeded {
        /// The configured limit.
        limit: usize,
    },

    /// The engine lock could not be acquired in time.
    #[error("transaction timed out after {millis}ms")]
    Timeout {
        /// How long the caller waited.
        millis: u128,
    },

    /// Action arguments failed validation.
    #[error("invalid arguments for action {action}: {message}")]
    ActionValidation {
        /// The action name.
        action: String,
        /// What is wrong.
        message: String,
    },

    /// Action failed while running.
    #[error("action {action} failed: {message}")]
    ActionExecution {
        /// The action name.
        action: String,
        /// What went wrong.
        message: String,
    },

    /// A tuple-space with this name already exists.
    #[error("tuple-space already exists: {0}")]
    SpaceExists(String),

    /// No tuple-space with this name exists.
    #[error("tuple-space not found: {0}")]
    SpaceNotFound(String),

    /// Tuple-space is full and configured to reject.
    #[error("tuple-space {name} is full ({max_size} xuples)")]
    SpaceFull {
        /// The space name.
        name: String,
        /// Its configured maximum size.
        max_size: usize,
    },

    /// Tuple-space configuration is invalid.
    #[error("invalid tuple-space configuration: {0}")]
    InvalidSpaceConfig(String),

    /// No xuple with this id exists in the space.
    #[error("xuple not found: {0}")]
    XupleNotFound(String),

    /// Xuple exists but cannot be consumed by this agent.
    #[error("xuple {id} not available to agent {agent}")]
    XupleNotAvailable {
        /// The xuple id.
        id: String,
        /// The requesting agent.
        agent: String,
    },

    /// A tuple-space operation was called without an agent id.
    #[error("agent id must not be empty")]
    EmptyAgentId,

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// Maps this kind onto the coarse taxonomy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Parse { .. } => ErrorCategory::Parsing,
            Self::FieldTypeMismatch { .. }
            | Self::UnknownType(_)
            | Self::UnknownField { .. }
            | Self::MissingField { .. }
            | Self::UnknownVariable(_)
            | Self::InvalidSchema { .. }
            | Self::DuplicateType(_)
            | Self::DuplicateRule(_)
            | Self::UnknownRule(_)
            | Self::DuplicateAction(_)
            | Self::UnknownAction(_)
            | Self::ArityMismatch { .. }
            | Self::DuplicateIdentity(_)
            | Self::FactNotFound(_)
            | Self::PrimaryKeyMismatch { .. }
            | Self::InvalidExpression(_)
            | Self::InvalidSpaceConfig(_) => ErrorCategory::Validation,
            Self::TypeMismatch { .. }
            | Self::DivisionByZero
            | Self::Overflow(_)
            | Self::InvalidRegex { .. }
            | Self::InvalidCast { .. }
            | Self::RecursionLimit { .. }
            | Self::CapacityExceeded { .. }
            | Self::Timeout { .. } => ErrorCategory::Execution,
            Self::ActionValidation { .. } => ErrorCategory::ActionValidation,
            Self::ActionExecution { .. } => ErrorCategory::ActionExecution,
            Self::SpaceExists(_)
            | Self::SpaceNotFound(_)
            | Self::SpaceFull { .. }
            | Self::XupleNotFound(_)
            | Self::XupleNotAvailable { .. }
            | Self::EmptyAgentId => ErrorCategory::TupleSpace,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Source file or program name.
    pub source: Option<String>,
    /// Line number in source.
    pub line: Option<u32>,
    /// Column number in source.
    pub column: Option<u32>,
    /// Stack of rule/action frames, outermost first.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source location.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the line and column.
    #[must_use]
    pub fn with_position(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "at {source}")?;
        }
        if let (Some(line), Some(col)) = (self.line, self.column) {
            write!(f, ":{line}:{col}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}
