//! Abstract Syntax Tree for Trellis programs.
//!
//! The engine consumes programs in this form; producing them from source
//! text is the job of an external parser. The builder methods at the bottom
//! of each section make it practical to assemble programs by hand.

use std::collections::BTreeSet;
use std::fmt;

use trellis_foundation::{FieldDescriptor, FieldType, Result, TypeSchema, Value};

use crate::span::Span;

// =============================================================================
// Program
// =============================================================================

/// A parsed program: declarations plus inline facts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    /// Record type declarations.
    pub types: Vec<TypeDecl>,
    /// User action declarations.
    pub actions: Vec<ActionDecl>,
    /// Tuple-space declarations.
    pub spaces: Vec<SpaceDecl>,
    /// Rules, in declaration order.
    pub rules: Vec<RuleDecl>,
    /// Rules to uninstall, applied after the rules above are installed.
    pub removals: Vec<RemoveRuleDecl>,
    /// Inline facts, in submission order.
    pub facts: Vec<FactDecl>,
}

impl Program {
    /// Creates an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a type declaration.
    #[must_use]
    pub fn with_type(mut self, decl: TypeDecl) -> Self {
        self.types.push(decl);
        self
    }

    /// Adds an action declaration.
    #[must_use]
    pub fn with_action(mut self, decl: ActionDecl) -> Self {
        self.actions.push(decl);
        self
    }

    /// Adds a tuple-space declaration.
    #[must_use]
    pub fn with_space(mut self, decl: SpaceDecl) -> Self {
        self.spaces.push(decl);
        self
    }

    /// Adds a rule.
    #[must_use]
    pub fn with_rule(mut self, decl: RuleDecl) -> Self {
        self.rules.push(decl);
        self
    }

    /// Adds a rule removal.
    #[must_use]
    pub fn with_removal(mut self, decl: RemoveRuleDecl) -> Self {
        self.removals.push(decl);
        self
    }

    /// Adds an inline fact.
    #[must_use]
    pub fn with_fact(mut self, decl: FactDecl) -> Self {
        self.facts.push(decl);
        self
    }
}

/// `remove rule name`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoveRuleDecl {
    /// Name of the rule to uninstall.
    pub rule: String,
    /// Source location.
    pub span: Span,
}

impl RemoveRuleDecl {
    /// Names the rule to remove.
    #[must_use]
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            span: Span::default(),
        }
    }

    /// Sets the source span.
    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

impl fmt::Display for RemoveRuleDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remove rule {}", self.rule)
    }
}

/// `type Name(#key: string, other: number)`
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDecl {
    /// Type name.
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<FieldDecl>,
    /// Source location.
    pub span: Span,
}

/// One field of a type declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDecl {
    /// Field name.
    pub name: String,
    /// Declared type.
    pub field_type: FieldType,
    /// Marked with `#`.
    pub primary_key: bool,
}

impl TypeDecl {
    /// Starts a type declaration with no fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            span: Span::default(),
        }
    }

    /// Adds a primary-key field.
    #[must_use]
    pub fn key(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldDecl {
            name: name.into(),
            field_type,
            primary_key: true,
        });
        self
    }

    /// Adds an ordinary field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldDecl {
            name: name.into(),
            field_type,
            primary_key: false,
        });
        self
    }

    /// Sets the source span.
    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Converts the declaration into a validated schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if names are empty or duplicated.
    pub fn to_schema(&self) -> Result<TypeSchema> {
        let fields = self
            .fields
            .iter()
            .map(|f| FieldDescriptor {
                name: f.name.as_str().into(),
                field_type: f.field_type,
                primary_key: f.primary_key,
            })
            .collect();
        TypeSchema::new(self.name.as_str(), fields).map_err(|e| e.with_context(self.span.context()))
    }
}

/// `action notify(user: string, level: number)`
#[derive(Clone, Debug, PartialEq)]
pub struct ActionDecl {
    /// Action name.
    pub name: String,
    /// Parameters in order.
    pub params: Vec<ParamDecl>,
    /// Source location.
    pub span: Span,
}

impl ActionDecl {
    /// Starts an action declaration with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            span: Span::default(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(ParamDecl {
            name: name.into(),
            ty,
        });
        self
    }

    /// Sets the source span.
    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// One action parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamDecl {
    /// Parameter name.
    pub name: String,
    /// Accepted argument type.
    pub ty: ParamType,
}

/// Argument type accepted by an action parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamType {
    /// Any value.
    Any,
    /// A scalar of the given field type.
    Scalar(FieldType),
    /// A fact of the named record type.
    Record(String),
}

impl ParamType {
    /// Returns true if `value` is acceptable for this parameter.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Scalar(t) => t.accepts(value),
            Self::Record(name) => value.as_fact().is_some_and(|f| **f.type_name() == **name),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Scalar(t) => write!(f, "{t}"),
            Self::Record(name) => f.write_str(name),
        }
    }
}

/// `xuple-space alerts { selection: lifo, consumption: per-agent }`
#[derive(Clone, Debug, PartialEq)]
pub struct SpaceDecl {
    /// Space name.
    pub name: String,
    /// Options as written; unset options fall back to configured defaults.
    pub options: Vec<SpaceOption>,
    /// Source location.
    pub span: Span,
}

impl SpaceDecl {
    /// Starts a space declaration with an empty option block.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
            span: Span::default(),
        }
    }

    /// Adds an option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: OptionValue) -> Self {
        self.options.push(SpaceOption {
            key: key.into(),
            value,
            span: Span::default(),
        });
        self
    }

    /// Sets the source span.
    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// One `key: value` entry of a space configuration block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpaceOption {
    /// Option name, e.g. `selection`.
    pub key: String,
    /// Option value.
    pub value: OptionValue,
    /// Source location.
    pub span: Span,
}

/// Value of a space option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionValue {
    /// A bare word such as `fifo` or `per-agent`.
    Word(String),
    /// A non-negative integer such as a max-size.
    Int(i64),
    /// `duration(N unit)`.
    Duration {
        /// Magnitude.
        amount: i64,
        /// Unit name, e.g. `s`, `minutes`.
        unit: String,
    },
}

impl OptionValue {
    /// Shorthand for a bare word.
    #[must_use]
    pub fn word(word: impl Into<String>) -> Self {
        Self::Word(word.into())
    }

    /// Shorthand for a duration.
    #[must_use]
    pub fn duration(amount: i64, unit: impl Into<String>) -> Self {
        Self::Duration {
            amount,
            unit: unit.into(),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(w) => f.write_str(w),
            Self::Int(n) => write!(f, "{n}"),
            Self::Duration { amount, unit } => write!(f, "duration({amount} {unit})"),
        }
    }
}

/// `rule name : {p: T, q: U} / constraint ==> actions`
#[derive(Clone, Debug, PartialEq)]
pub struct RuleDecl {
    /// Rule name, unique per engine.
    pub name: String,
    /// Positive patterns in order.
    pub patterns: Vec<PatternDecl>,
    /// Optional constraint over the pattern bindings.
    pub constraint: Option<Expr>,
    /// Actions in written order.
    pub actions: Vec<ActionCall>,
    /// Source location.
    pub span: Span,
}

impl RuleDecl {
    /// Starts a rule with no patterns, constraint, or actions.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            patterns: Vec::new(),
            constraint: None,
            actions: Vec::new(),
            span: Span::default(),
        }
    }

    /// Adds a pattern binding `var` to facts of `type_name`.
    #[must_use]
    pub fn pattern(mut self, var: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.patterns.push(PatternDecl::new(var, type_name));
        self
    }

    /// Sets the constraint.
    #[must_use]
    pub fn when(mut self, constraint: Expr) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Appends an action.
    #[must_use]
    pub fn then(mut self, name: impl Into<String>, args: Vec<Expr>) -> Self {
        self.actions.push(ActionCall {
            name: name.into(),
            args,
            span: Span::default(),
        });
        self
    }

    /// Sets the source span.
    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

impl fmt::Display for RuleDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {} : {{", self.name)?;
        for (i, p) in self.patterns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", p.var, p.type_name)?;
        }
        write!(f, "}}")?;
        if let Some(c) = &self.constraint {
            write!(f, " / {c}")?;
        }
        write!(f, " ==>")?;
        for (i, action) in self.actions.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {}(", action.name)?;
            write_list(f, &action.args)?;
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// `{var: Type}`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatternDecl {
    /// Bound variable name.
    pub var: String,
    /// Record type matched.
    pub type_name: String,
    /// Source location.
    pub span: Span,
}

impl PatternDecl {
    /// Creates a pattern.
    #[must_use]
    pub fn new(var: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            type_name: type_name.into(),
            span: Span::default(),
        }
    }
}

/// `Name(arg, ...)` in a rule's action list.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionCall {
    /// Action name, built-in or user-declared.
    pub name: String,
    /// Argument expressions.
    pub args: Vec<Expr>,
    /// Source location.
    pub span: Span,
}

/// `Type(field: value, ...)` at program top level.
#[derive(Clone, Debug, PartialEq)]
pub struct FactDecl {
    /// Record type.
    pub type_name: String,
    /// Field initializers.
    pub fields: Vec<(String, Expr)>,
    /// Source location.
    pub span: Span,
}

impl FactDecl {
    /// Starts an inline fact with no fields.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
            span: Span::default(),
        }
    }

    /// Sets a field to a literal value.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), Expr::Literal(value.into())));
        self
    }

    /// Sets a field to an expression.
    #[must_use]
    pub fn set_expr(mut self, field: impl Into<String>, value: Expr) -> Self {
        self.fields.push((field.into(), value));
        self
    }
}

// =============================================================================
// Expressions
// =============================================================================

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical NOT.
    Not,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `CONTAINS`
    Contains,
    /// `LIKE` with `%` wildcards
    Like,
    /// `MATCHES`, anchored regex
    Matches,
}

impl BinaryOp {
    /// Returns the operator's surface symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Contains => "CONTAINS",
            Self::Like => "LIKE",
            Self::Matches => "MATCHES",
        }
    }
}

/// Quantifier of a sub-pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Quantifier {
    /// No fact matches.
    Not,
    /// At least one fact matches.
    Exists,
}

/// Aggregate functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateFn {
    /// Sum of the argument.
    Sum,
    /// Number of matching facts.
    Count,
    /// Arithmetic mean of the argument.
    Avg,
    /// Smallest argument value.
    Min,
    /// Largest argument value.
    Max,
}

impl AggregateFn {
    /// Returns the surface name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// `{var: Type} / constraint` nested inside an expression.
#[derive(Clone, Debug, PartialEq)]
pub struct SubPattern {
    /// The pattern, whose variable is scoped to this sub-pattern.
    pub pattern: PatternDecl,
    /// Optional constraint; may also mention outer variables.
    pub constraint: Option<Expr>,
}

impl SubPattern {
    /// Creates an unconstrained sub-pattern.
    #[must_use]
    pub fn new(var: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            pattern: PatternDecl::new(var, type_name),
            constraint: None,
        }
    }

    /// Sets the constraint.
    #[must_use]
    pub fn when(mut self, constraint: Expr) -> Self {
        self.constraint = Some(constraint);
        self
    }
}

/// An expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A literal value.
    Literal(Value),
    /// A variable, yielding its bound fact as a whole.
    Var(String),
    /// `var.field`
    Field {
        /// Variable name.
        var: String,
        /// Field name.
        field: String,
    },
    /// Unary operator application.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Binary operator application.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// `expr IN [a, b, c]`
    In {
        /// Tested value.
        subject: Box<Expr>,
        /// Candidate values.
        list: Vec<Expr>,
    },
    /// Built-in function call.
    Call {
        /// Function name, case-insensitive.
        function: String,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// `CAST(expr AS type)`
    Cast {
        /// Converted value.
        operand: Box<Expr>,
        /// Target type.
        target: FieldType,
    },
    /// `Type(field: expr, ...)`, building a fact value.
    FactLiteral {
        /// Record type.
        type_name: String,
        /// Field initializers.
        fields: Vec<(String, Expr)>,
    },
    /// `var WITH (field: expr, ...)`, a bound fact with some fields replaced.
    Modify {
        /// Variable bound to the base fact.
        var: String,
        /// Replacement fields.
        fields: Vec<(String, Expr)>,
    },
    /// `NOT({v: T} / c)` or `EXISTS({v: T} / c)`.
    Quantified {
        /// Which quantifier.
        quantifier: Quantifier,
        /// The correlated sub-pattern.
        sub: Box<SubPattern>,
    },
    /// `SUM(v.f, {v: T} / c)` and friends.
    Aggregate {
        /// The aggregate function.
        function: AggregateFn,
        /// Aggregated expression; `None` for `COUNT`.
        argument: Option<Box<Expr>>,
        /// The correlated sub-pattern.
        sub: Box<SubPattern>,
    },
}

impl Expr {
    /// Returns the variables this expression reads from the enclosing scope.
    ///
    /// Variables bound by nested sub-patterns are not included, but outer
    /// variables mentioned inside a sub-pattern constraint are.
    #[must_use]
    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        self.collect_free_vars(&mut vars);
        vars
    }

    fn collect_free_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Literal(_) => {}
            Self::Var(v) | Self::Field { var: v, .. } => {
                out.insert(v.clone());
            }
            Self::Unary { operand, .. } | Self::Cast { operand, .. } => operand.collect_free_vars(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_free_vars(out);
                rhs.collect_free_vars(out);
            }
            Self::In { subject, list } => {
                subject.collect_free_vars(out);
                for e in list {
                    e.collect_free_vars(out);
                }
            }
            Self::Call { args, .. } => {
                for e in args {
                    e.collect_free_vars(out);
                }
            }
            Self::FactLiteral { fields, .. } => {
                for (_, e) in fields {
                    e.collect_free_vars(out);
                }
            }
            Self::Modify { var, fields } => {
                out.insert(var.clone());
                for (_, e) in fields {
                    e.collect_free_vars(out);
                }
            }
            Self::Quantified { sub, .. } => sub.collect_outer_vars(None, out),
            Self::Aggregate { argument, sub, .. } => sub.collect_outer_vars(argument.as_deref(), out),
        }
    }

    /// Splits a top-level `AND` chain into its conjuncts.
    #[must_use]
    pub fn conjuncts(self) -> Vec<Expr> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                Self::Binary {
                    op: BinaryOp::And,
                    lhs,
                    rhs,
                } => {
                    stack.push(*rhs);
                    stack.push(*lhs);
                }
                other => out.push(other),
            }
        }
        out
    }

    /// Joins expressions with `AND`; `None` for an empty list.
    #[must_use]
    pub fn conjoin(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// Returns a copy with every free occurrence of `from` renamed to `to`.
    #[must_use]
    pub fn rename_var(&self, from: &str, to: &str) -> Expr {
        let rename = |v: &String| if v == from { to.to_string() } else { v.clone() };
        let fields = |fs: &[(String, Expr)]| -> Vec<(String, Expr)> {
            fs.iter()
                .map(|(n, e)| (n.clone(), e.rename_var(from, to)))
                .collect()
        };
        match self {
            Self::Literal(v) => Self::Literal(v.clone()),
            Self::Var(v) => Self::Var(rename(v)),
            Self::Field { var, field } => Self::Field {
                var: rename(var),
                field: field.clone(),
            },
            Self::Unary { op, operand } => Self::Unary {
                op: *op,
                operand: Box::new(operand.rename_var(from, to)),
            },
            Self::Binary { op, lhs, rhs } => Self::Binary {
                op: *op,
                lhs: Box::new(lhs.rename_var(from, to)),
                rhs: Box::new(rhs.rename_var(from, to)),
            },
            Self::In { subject, list } => Self::In {
                subject: Box::new(subject.rename_var(from, to)),
                list: list.iter().map(|e| e.rename_var(from, to)).collect(),
            },
            Self::Call { function, args } => Self::Call {
                function: function.clone(),
                args: args.iter().map(|e| e.rename_var(from, to)).collect(),
            },
            Self::Cast { operand, target } => Self::Cast {
                operand: Box::new(operand.rename_var(from, to)),
                target: *target,
            },
            Self::FactLiteral { type_name, fields: fs } => Self::FactLiteral {
                type_name: type_name.clone(),
                fields: fields(fs),
            },
            Self::Modify { var, fields: fs } => Self::Modify {
                var: rename(var),
                fields: fields(fs),
            },
            Self::Quantified { quantifier, sub } => Self::Quantified {
                quantifier: *quantifier,
                sub: Box::new(sub.rename_outer(from, to)),
            },
            Self::Aggregate {
                function,
                argument,
                sub,
            } => {
                let shadowed = sub.pattern.var == from;
                Self::Aggregate {
                    function: *function,
                    argument: argument.as_ref().map(|a| {
                        Box::new(if shadowed {
                            (**a).clone()
                        } else {
                            a.rename_var(from, to)
                        })
                    }),
                    sub: Box::new(sub.rename_outer(from, to)),
                }
            }
        }
    }

    /// Returns true if a `NOT`/`EXISTS` sub-pattern appears anywhere inside.
    #[must_use]
    pub fn contains_quantifier(&self) -> bool {
        self.any(&|e| matches!(e, Self::Quantified { .. }))
    }

    /// Returns true if an aggregate appears anywhere inside.
    #[must_use]
    pub fn contains_aggregate(&self) -> bool {
        self.any(&|e| matches!(e, Self::Aggregate { .. }))
    }

    /// Returns true if a fact construction or modification appears anywhere inside.
    #[must_use]
    pub fn contains_construction(&self) -> bool {
        self.any(&|e| matches!(e, Self::FactLiteral { .. } | Self::Modify { .. }))
    }

    fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Self::Literal(_) | Self::Var(_) | Self::Field { .. } => false,
            Self::Unary { operand, .. } | Self::Cast { operand, .. } => operand.any(pred),
            Self::Binary { lhs, rhs, .. } => lhs.any(pred) || rhs.any(pred),
            Self::In { subject, list } => subject.any(pred) || list.iter().any(|e| e.any(pred)),
            Self::Call { args, .. } => args.iter().any(|e| e.any(pred)),
            Self::FactLiteral { fields, .. } | Self::Modify { fields, .. } => {
                fields.iter().any(|(_, e)| e.any(pred))
            }
            Self::Quantified { sub, .. } => sub.constraint.as_ref().is_some_and(|c| c.any(pred)),
            Self::Aggregate { argument, sub, .. } => {
                argument.as_ref().is_some_and(|a| a.any(pred))
                    || sub.constraint.as_ref().is_some_and(|c| c.any(pred))
            }
        }
    }
}

impl SubPattern {
    fn collect_outer_vars(&self, argument: Option<&Expr>, out: &mut BTreeSet<String>) {
        let mut inner = BTreeSet::new();
        if let Some(arg) = argument {
            arg.collect_free_vars(&mut inner);
        }
        if let Some(c) = &self.constraint {
            c.collect_free_vars(&mut inner);
        }
        inner.remove(&self.pattern.var);
        out.extend(inner);
    }

    fn rename_outer(&self, from: &str, to: &str) -> SubPattern {
        if self.pattern.var == from {
            return self.clone();
        }
        SubPattern {
            pattern: self.pattern.clone(),
            constraint: self.constraint.as_ref().map(|c| c.rename_var(from, to)),
        }
    }
}

// Helper constructors, mainly for assembling programs by hand.
impl Expr {
    /// A literal.
    #[must_use]
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// The null literal.
    #[must_use]
    pub const fn null() -> Self {
        Self::Literal(Value::Nil)
    }

    /// A variable reference.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    /// A field access `var.field`.
    #[must_use]
    pub fn field(var: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Field {
            var: var.into(),
            field: field.into(),
        }
    }

    /// A binary operator application.
    #[must_use]
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `self == rhs`
    #[must_use]
    pub fn equals(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Eq, self, rhs)
    }

    /// `self != rhs`
    #[must_use]
    pub fn not_equals(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Ne, self, rhs)
    }

    /// `self < rhs`
    #[must_use]
    pub fn less_than(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Lt, self, rhs)
    }

    /// `self <= rhs`
    #[must_use]
    pub fn at_most(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Le, self, rhs)
    }

    /// `self > rhs`
    #[must_use]
    pub fn greater_than(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Gt, self, rhs)
    }

    /// `self >= rhs`
    #[must_use]
    pub fn at_least(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Ge, self, rhs)
    }

    /// `self AND rhs`
    #[must_use]
    pub fn and(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::And, self, rhs)
    }

    /// `self OR rhs`
    #[must_use]
    pub fn or(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Or, self, rhs)
    }

    /// `self CONTAINS rhs`
    #[must_use]
    pub fn contains(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Contains, self, rhs)
    }

    /// `self LIKE pattern`
    #[must_use]
    pub fn like(self, pattern: impl Into<Value>) -> Self {
        Self::binary(BinaryOp::Like, self, Self::lit(pattern))
    }

    /// `self MATCHES regex`
    #[must_use]
    pub fn matches(self, regex: impl Into<Value>) -> Self {
        Self::binary(BinaryOp::Matches, self, Self::lit(regex))
    }

    /// `self IN [list]`
    #[must_use]
    pub fn in_list(self, list: Vec<Expr>) -> Self {
        Self::In {
            subject: Box::new(self),
            list,
        }
    }

    /// A built-in function call.
    #[must_use]
    pub fn call(function: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Call {
            function: function.into(),
            args,
        }
    }

    /// `CAST(self AS target)`
    #[must_use]
    pub fn cast(self, target: FieldType) -> Self {
        Self::Cast {
            operand: Box::new(self),
            target,
        }
    }

    /// A fact construction `Type(field: expr, ...)`.
    #[must_use]
    pub fn fact<S: Into<String>>(type_name: impl Into<String>, fields: Vec<(S, Expr)>) -> Self {
        Self::FactLiteral {
            type_name: type_name.into(),
            fields: fields.into_iter().map(|(n, e)| (n.into(), e)).collect(),
        }
    }

    /// A fact modification `var WITH (field: expr, ...)`.
    #[must_use]
    pub fn modify<S: Into<String>>(var: impl Into<String>, fields: Vec<(S, Expr)>) -> Self {
        Self::Modify {
            var: var.into(),
            fields: fields.into_iter().map(|(n, e)| (n.into(), e)).collect(),
        }
    }

    /// `NOT(sub)`
    #[must_use]
    pub fn not_exists(sub: SubPattern) -> Self {
        Self::Quantified {
            quantifier: Quantifier::Not,
            sub: Box::new(sub),
        }
    }

    /// `EXISTS(sub)`
    #[must_use]
    pub fn exists(sub: SubPattern) -> Self {
        Self::Quantified {
            quantifier: Quantifier::Exists,
            sub: Box::new(sub),
        }
    }

    /// An aggregate over a sub-pattern.
    #[must_use]
    pub fn aggregate(function: AggregateFn, argument: Option<Expr>, sub: SubPattern) -> Self {
        Self::Aggregate {
            function,
            argument: argument.map(Box::new),
            sub: Box::new(sub),
        }
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(self),
        }
    }
}

macro_rules! arithmetic_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl std::ops::$trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }
    };
}

arithmetic_op!(Add, add, BinaryOp::Add);
arithmetic_op!(Sub, sub, BinaryOp::Sub);
arithmetic_op!(Mul, mul, BinaryOp::Mul);
arithmetic_op!(Div, div, BinaryOp::Div);
arithmetic_op!(Rem, rem, BinaryOp::Mod);

// =============================================================================
// Display
// =============================================================================

// The rendering is fully parenthesized so that it doubles as a canonical
// key: two expressions render equal iff they are structurally equal.

fn write_list(f: &mut fmt::Formatter<'_>, exprs: &[Expr]) -> fmt::Result {
    for (i, e) in exprs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{e}")?;
    }
    Ok(())
}

fn write_fields(f: &mut fmt::Formatter<'_>, fields: &[(String, Expr)]) -> fmt::Result {
    for (i, (name, e)) in fields.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{name}: {e}")?;
    }
    Ok(())
}

impl fmt::Display for SubPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}: {}}}", self.pattern.var, self.pattern.type_name)?;
        if let Some(c) = &self.constraint {
            write!(f, " / {c}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v:?}"),
            Self::Var(v) => f.write_str(v),
            Self::Field { var, field } => write!(f, "{var}.{field}"),
            Self::Unary {
                op: UnaryOp::Neg,
                operand,
            } => write!(f, "(-{operand})"),
            Self::Unary {
                op: UnaryOp::Not,
                operand,
            } => write!(f, "(NOT {operand})"),
            Self::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Self::In { subject, list } => {
                write!(f, "({subject} IN [")?;
                write_list(f, list)?;
                write!(f, "])")
            }
            Self::Call { function, args } => {
                write!(f, "{}(", function.to_ascii_uppercase())?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Self::Cast { operand, target } => write!(f, "CAST({operand} AS {target})"),
            Self::FactLiteral { type_name, fields } => {
                write!(f, "{type_name}(")?;
                write_fields(f, fields)?;
                write!(f, ")")
            }
            Self::Modify { var, fields } => {
                write!(f, "({var} WITH (")?;
                write_fields(f, fields)?;
                write!(f, "))")
            }
            Self::Quantified { quantifier, sub } => {
                let kw = match quantifier {
                    Quantifier::Not => "NOT",
                    Quantifier::Exists => "EXISTS",
                };
                write!(f, "{kw}({sub})")
            }
            Self::Aggregate {
                function,
                argument,
                sub,
            } => {
                write!(f, "{}(", function.name())?;
                if let Some(arg) = argument {
                    write!(f, "{arg}, ")?;
                }
                write!(f, "{sub})")
            }
        }
    }
}
