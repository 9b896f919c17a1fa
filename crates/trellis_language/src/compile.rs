//! Compilation of expressions against a variable scope.
//!
//! Compiling resolves every variable to a token slot, every field name to a
//! schema position, every function name to a [`Builtin`], and every literal
//! regex or LIKE pattern to a [`Regex`]. Evaluation then never fails for a
//! reason that could have been detected while building the rule.

use std::sync::Arc;

use regex::Regex;
use trellis_foundation::{Error, ErrorKind, FieldType, Result, TypeSchema, Value};
use trellis_storage::TypeRegistry;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::functions::Builtin;

// =============================================================================
// Scope
// =============================================================================

/// What a scope variable is bound to.
#[derive(Clone, Debug)]
pub enum BindingKind {
    /// A fact of a known type.
    Fact(Arc<TypeSchema>),
    /// A plain value, e.g. an aggregate result.
    Value,
}

/// One variable in scope.
#[derive(Clone, Debug)]
pub struct ScopeEntry {
    /// Variable name.
    pub name: Arc<str>,
    /// Token slot holding the binding.
    pub slot: usize,
    /// Binding kind.
    pub kind: BindingKind,
}

/// Variables visible to an expression, each mapped to a token slot.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    entries: Vec<ScopeEntry>,
}

impl Scope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to a fact of `schema` at `slot`, shadowing earlier bindings.
    #[must_use]
    pub fn with_fact(mut self, name: &str, slot: usize, schema: Arc<TypeSchema>) -> Self {
        self.push(name, slot, BindingKind::Fact(schema));
        self
    }

    /// Binds `name` to a plain value at `slot`.
    #[must_use]
    pub fn with_value(mut self, name: &str, slot: usize) -> Self {
        self.push(name, slot, BindingKind::Value);
        self
    }

    /// Binds in place.
    pub fn push(&mut self, name: &str, slot: usize, kind: BindingKind) {
        self.entries.push(ScopeEntry {
            name: name.into(),
            slot,
            kind,
        });
    }

    /// Looks a variable up; later bindings shadow earlier ones.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&ScopeEntry> {
        self.entries.iter().rev().find(|e| &*e.name == name)
    }

    /// Iterates bindings in the order they were added.
    pub fn iter(&self) -> impl Iterator<Item = &ScopeEntry> {
        self.entries.iter()
    }
}

// =============================================================================
// Compiled form
// =============================================================================

/// How a field access is resolved.
#[derive(Clone, Debug)]
pub enum FieldAccess {
    /// Position in the bound fact's schema.
    Index(usize),
    /// The fact's internal identity, for types with no field named `id`.
    Identity,
    /// Resolved at evaluation time, for value bindings.
    Dynamic,
}

/// A regex operand that is either precompiled or computed per evaluation.
#[derive(Clone, Debug)]
pub enum PatternOperand {
    /// Compiled at build time from a literal.
    Static(Regex),
    /// Evaluated, then compiled, on every evaluation.
    Dynamic(Box<CompiledExpr>),
}

/// An expression ready for evaluation.
#[derive(Clone, Debug)]
pub enum CompiledExpr {
    /// A literal value.
    Literal(Value),
    /// A whole binding.
    Slot {
        /// Token slot.
        slot: usize,
        /// Variable name, for messages.
        name: Arc<str>,
    },
    /// A field of a binding.
    Field {
        /// Token slot.
        slot: usize,
        /// Variable name, for messages.
        var: Arc<str>,
        /// Field name.
        field: Arc<str>,
        /// Resolution strategy.
        access: FieldAccess,
    },
    /// Unary operator.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<CompiledExpr>,
    },
    /// Arithmetic, comparison, logical, or CONTAINS operator.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<CompiledExpr>,
        /// Right operand.
        rhs: Box<CompiledExpr>,
    },
    /// LIKE or MATCHES; both reduce to an anchored regex.
    Regex {
        /// Tested string.
        subject: Box<CompiledExpr>,
        /// The pattern.
        pattern: PatternOperand,
        /// True for LIKE, whose dynamic patterns must be translated first.
        like: bool,
    },
    /// Membership in a literal list.
    In {
        /// Tested value.
        subject: Box<CompiledExpr>,
        /// Candidates.
        list: Vec<CompiledExpr>,
    },
    /// Built-in function call.
    Call {
        /// The function.
        function: Builtin,
        /// Arguments.
        args: Vec<CompiledExpr>,
    },
    /// Type conversion.
    Cast {
        /// Converted value.
        operand: Box<CompiledExpr>,
        /// Target type.
        target: FieldType,
    },
    /// Fact construction; fields in schema order.
    Construct {
        /// Record type.
        schema: Arc<TypeSchema>,
        /// One expression per schema field.
        fields: Vec<CompiledExpr>,
    },
    /// Copy of a bound fact with some fields replaced.
    Modify {
        /// Slot of the base fact.
        slot: usize,
        /// Variable name, for messages.
        var: Arc<str>,
        /// Replacements.
        updates: Vec<(Arc<str>, CompiledExpr)>,
    },
}

// =============================================================================
// Compiler
// =============================================================================

/// Compiles [`Expr`] trees against a [`Scope`].
#[derive(Clone, Copy, Debug)]
pub struct Compiler<'a> {
    scope: &'a Scope,
    types: Option<&'a TypeRegistry>,
}

impl<'a> Compiler<'a> {
    /// Creates a compiler for conditions: fact construction is rejected.
    #[must_use]
    pub fn new(scope: &'a Scope) -> Self {
        Self { scope, types: None }
    }

    /// Allows fact construction, resolving type names in `types`.
    #[must_use]
    pub fn with_types(mut self, types: &'a TypeRegistry) -> Self {
        self.types = Some(types);
        self
    }

    /// Compiles an expression.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown variables, fields, functions
    /// or types, `InvalidRegex` for a bad literal pattern, and
    /// `InvalidExpression` for sub-patterns or disallowed constructions.
    pub fn compile(&self, expr: &Expr) -> Result<CompiledExpr> {
        match expr {
            Expr::Literal(v) => Ok(CompiledExpr::Literal(v.clone())),
            Expr::Var(name) => {
                let entry = self.resolve(name)?;
                Ok(CompiledExpr::Slot {
                    slot: entry.slot,
                    name: Arc::clone(&entry.name),
                })
            }
            Expr::Field { var, field } => self.compile_field(var, field),
            Expr::Unary { op, operand } => Ok(CompiledExpr::Unary {
                op: *op,
                operand: Box::new(self.compile(operand)?),
            }),
            Expr::Binary {
                op: op @ (BinaryOp::Like | BinaryOp::Matches),
                lhs,
                rhs,
            } => self.compile_regex(*op == BinaryOp::Like, lhs, rhs),
            Expr::Binary { op, lhs, rhs } => Ok(CompiledExpr::Binary {
                op: *op,
                lhs: Box::new(self.compile(lhs)?),
                rhs: Box::new(self.compile(rhs)?),
            }),
            Expr::In { subject, list } => Ok(CompiledExpr::In {
                subject: Box::new(self.compile(subject)?),
                list: list.iter().map(|e| self.compile(e)).collect::<Result<_>>()?,
            }),
            Expr::Call { function, args } => {
                let builtin = Builtin::from_name(function).ok_or_else(|| {
                    Error::invalid_expression(format!("unknown function {function}"))
                })?;
                builtin.check_arity(args.len())?;
                Ok(CompiledExpr::Call {
                    function: builtin,
                    args: args.iter().map(|e| self.compile(e)).collect::<Result<_>>()?,
                })
            }
            Expr::Cast { operand, target } => Ok(CompiledExpr::Cast {
                operand: Box::new(self.compile(operand)?),
                target: *target,
            }),
            Expr::FactLiteral { type_name, fields } => self.compile_construct(type_name, fields),
            Expr::Modify { var, fields } => self.compile_modify(var, fields),
            Expr::Quantified { .. } => Err(Error::invalid_expression(
                "NOT/EXISTS sub-patterns may only appear as top-level conjuncts of a rule",
            )),
            Expr::Aggregate { function, .. } => Err(Error::invalid_expression(format!(
                "aggregate {} is only allowed in rule conditions",
                function.name()
            ))),
        }
    }

    fn resolve(&self, name: &str) -> Result<&'a ScopeEntry> {
        self.scope
            .lookup(name)
            .ok_or_else(|| Error::unknown_variable(name))
    }

    fn compile_field(&self, var: &str, field: &str) -> Result<CompiledExpr> {
        let entry = self.resolve(var)?;
        let access = match &entry.kind {
            BindingKind::Fact(schema) => match schema.field_index(field) {
                Some(i) => FieldAccess::Index(i),
                None if field == "id" => FieldAccess::Identity,
                None => return Err(Error::unknown_field(&**schema.name(), field)),
            },
            BindingKind::Value => FieldAccess::Dynamic,
        };
        Ok(CompiledExpr::Field {
            slot: entry.slot,
            var: Arc::clone(&entry.name),
            field: field.into(),
            access,
        })
    }

    fn compile_regex(&self, like: bool, lhs: &Expr, rhs: &Expr) -> Result<CompiledExpr> {
        let pattern = match rhs {
            Expr::Literal(Value::String(p)) => {
                let source = if like { like_to_regex(p) } else { anchor(p) };
                PatternOperand::Static(build_regex(&source)?)
            }
            other => PatternOperand::Dynamic(Box::new(self.compile(other)?)),
        };
        Ok(CompiledExpr::Regex {
            subject: Box::new(self.compile(lhs)?),
            pattern,
            like,
        })
    }

    fn compile_construct(&self, type_name: &str, fields: &[(String, Expr)]) -> Result<CompiledExpr> {
        let types = self.types.ok_or_else(|| {
            Error::invalid_expression(format!("cannot construct {type_name} facts in a condition"))
        })?;
        let schema = Arc::clone(types.require(type_name)?);

        let mut slots: Vec<Option<CompiledExpr>> = vec![None; schema.fields().len()];
        for (name, expr) in fields {
            let index = schema
                .field_index(name)
                .ok_or_else(|| Error::unknown_field(type_name, name.as_str()))?;
            if slots[index].replace(self.compile(expr)?).is_some() {
                return Err(Error::invalid_expression(format!(
                    "field {type_name}.{name} supplied more than once"
                )));
            }
        }
        let fields = slots
            .into_iter()
            .zip(schema.fields())
            .map(|(slot, desc)| {
                slot.ok_or_else(|| {
                    Error::new(ErrorKind::MissingField {
                        type_name: type_name.to_string(),
                        field: desc.name.to_string(),
                    })
                })
            })
            .collect::<Result<_>>()?;
        Ok(CompiledExpr::Construct { schema, fields })
    }

    fn compile_modify(&self, var: &str, fields: &[(String, Expr)]) -> Result<CompiledExpr> {
        if self.types.is_none() {
            return Err(Error::invalid_expression(format!(
                "cannot modify {var} in a condition"
            )));
        }
        let entry = self.resolve(var)?;
        let BindingKind::Fact(schema) = &entry.kind else {
            return Err(Error::type_mismatch("fact binding", format!("value binding {var}")));
        };
        let mut updates = Vec::with_capacity(fields.len());
        for (name, expr) in fields {
            if schema.field_index(name).is_none() {
                return Err(Error::unknown_field(&**schema.name(), name.as_str()));
            }
            updates.push((Arc::from(name.as_str()), self.compile(expr)?));
        }
        Ok(CompiledExpr::Modify {
            slot: entry.slot,
            var: Arc::clone(&entry.name),
            updates,
        })
    }
}

/// Compiles a regex source, mapping failures to `InvalidRegex`.
pub(crate) fn build_regex(source: &str) -> Result<Regex> {
    Regex::new(source).map_err(|e| {
        Error::new(ErrorKind::InvalidRegex {
            pattern: source.to_string(),
            message: e.to_string(),
        })
    })
}

/// Anchors a MATCHES pattern so it must cover the whole subject.
pub(crate) fn anchor(pattern: &str) -> String {
    format!("^(?:{pattern})$")
}

/// Translates a LIKE pattern (`%` = any run of characters) into an anchored regex.
pub(crate) fn like_to_regex(pattern: &str) -> String {
    let body = pattern
        .split('%')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    format!("(?s)^{body}$")
}
