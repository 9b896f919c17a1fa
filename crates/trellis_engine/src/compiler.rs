//! Rule compiler - turns a rule declaration into a network build plan.
//!
//! Planning is pure and fallible; the network only starts mutating once a
//! plan exists, so a rule that fails to compile leaves no nodes behind.
//!
//! The constraint is split into top-level conjuncts and each conjunct is
//! placed as early as its variables allow:
//!
//! - no variables: a guard on the terminal node
//! - one pattern variable: an alpha node under that pattern's type node,
//!   shared with any other rule testing the same condition
//! - several pattern variables: the join that binds the last of them
//! - `NOT` / `EXISTS` sub-pattern: a quantifier node after the joins
//! - aggregates: an accumulate node per aggregate, with the surrounding
//!   comparison as its guard

use std::collections::HashSet;
use std::sync::Arc;

use trellis_foundation::{Error, Result, TypeSchema};
use trellis_language::{
    AggregateFn, BindingKind, CompiledExpr, Compiler, Expr, Quantifier, RuleDecl, Scope, Span,
    SubPattern, UnaryOp,
};
use trellis_storage::TypeRegistry;

use crate::rule::{CompiledAction, PatternBinding};

/// Variable name that alpha conditions are normalized to before sharing.
const ALPHA_VAR: &str = "$";

// =============================================================================
// Plan
// =============================================================================

/// One alpha node to find or create.
#[derive(Clone, Debug)]
pub(crate) struct AlphaStep {
    pub key: Arc<str>,
    pub test: Arc<CompiledExpr>,
}

/// A type node followed by a chain of alpha nodes.
#[derive(Clone, Debug)]
pub(crate) struct AlphaPath {
    pub schema: Arc<TypeSchema>,
    pub steps: Vec<AlphaStep>,
}

/// One beta node, in chain order.
#[derive(Clone, Debug)]
pub(crate) enum BetaStep {
    Join {
        right: AlphaPath,
        test: Option<CompiledExpr>,
    },
    Quantifier {
        quantifier: Quantifier,
        right: AlphaPath,
        test: Option<CompiledExpr>,
    },
    Accumulate {
        function: AggregateFn,
        argument: Option<CompiledExpr>,
        right: AlphaPath,
        test: Option<CompiledExpr>,
        guard: Option<CompiledExpr>,
    },
}

/// Everything the network needs to install a rule.
#[derive(Clone, Debug)]
pub(crate) struct RulePlan {
    pub name: Arc<str>,
    pub source: String,
    pub span: Span,
    pub patterns: Vec<PatternBinding>,
    pub steps: Vec<BetaStep>,
    pub terminal_guard: Option<CompiledExpr>,
    pub scope: Scope,
    pub actions: Vec<CompiledAction>,
}

/// A sub-pattern conjunct, kept in written order.
enum SubConjunct {
    Quantified {
        quantifier: Quantifier,
        sub: SubPattern,
    },
    Aggregate {
        function: AggregateFn,
        argument: Option<Expr>,
        sub: SubPattern,
        var: String,
        guard: Option<Expr>,
    },
}

// =============================================================================
// Rule Compiler
// =============================================================================

/// Plans rule declarations against a type registry.
pub(crate) struct RuleCompiler<'a> {
    types: &'a TypeRegistry,
}

impl<'a> RuleCompiler<'a> {
    pub(crate) fn new(types: &'a TypeRegistry) -> Self {
        Self { types }
    }

    /// Plans a rule.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown types, variables or fields,
    /// misplaced sub-patterns, and anything the expression compiler rejects.
    pub(crate) fn plan(&self, decl: &RuleDecl) -> Result<RulePlan> {
        let context = decl.span.context().with_frame(format!("rule {}", decl.name));
        self.plan_inner(decl).map_err(|e| match e.context {
            Some(_) => e,
            None => e.with_context(context),
        })
    }

    fn plan_inner(&self, decl: &RuleDecl) -> Result<RulePlan> {
        if decl.name.trim().is_empty() {
            return Err(Error::invalid_expression("rule name must not be empty"));
        }

        let mut scope = Scope::new();
        let mut patterns = Vec::with_capacity(decl.patterns.len());
        let mut schemas = Vec::with_capacity(decl.patterns.len());
        let mut seen = HashSet::new();
        for (slot, pattern) in decl.patterns.iter().enumerate() {
            if !seen.insert(pattern.var.as_str()) {
                return Err(Error::invalid_expression(format!(
                    "variable '{}' is bound by more than one pattern",
                    pattern.var
                ))
                .with_context(pattern.span.context()));
            }
            let schema = Arc::clone(
                self.types
                    .require(&pattern.type_name)
                    .map_err(|e| e.with_context(pattern.span.context()))?,
            );
            scope.push(&pattern.var, slot, BindingKind::Fact(Arc::clone(&schema)));
            patterns.push(PatternBinding {
                var: Arc::from(pattern.var.as_str()),
                type_name: Arc::clone(schema.name()),
                slot,
            });
            schemas.push(schema);
        }

        // Placement of every top-level conjunct.
        let mut alpha: Vec<Vec<Expr>> = vec![Vec::new(); patterns.len()];
        let mut join: Vec<Vec<Expr>> = vec![Vec::new(); patterns.len()];
        let mut constant = Vec::new();
        let mut subs = Vec::new();
        let mut next_aggregate = 0usize;

        let conjuncts = decl.constraint.clone().map(Expr::conjuncts).unwrap_or_default();
        for conjunct in conjuncts {
            if let Some((quantifier, sub)) = as_quantified(&conjunct) {
                subs.push(SubConjunct::Quantified { quantifier, sub });
                continue;
            }
            if conjunct.contains_quantifier() {
                return Err(Error::invalid_expression(format!(
                    "NOT and EXISTS must appear as top-level conjuncts: {conjunct}"
                )));
            }
            if conjunct.contains_aggregate() {
                let mut found = Vec::new();
                let residual = lift_aggregates(conjunct, &mut found, &mut next_aggregate);
                let last = found.len().saturating_sub(1);
                for (i, (function, argument, sub, var)) in found.into_iter().enumerate() {
                    subs.push(SubConjunct::Aggregate {
                        function,
                        argument,
                        sub,
                        var,
                        guard: (i == last).then(|| residual.clone()),
                    });
                }
                continue;
            }

            let vars = conjunct.free_vars();
            let mut last_slot = None;
            for var in &vars {
                let slot = patterns
                    .iter()
                    .find(|p| &*p.var == var.as_str())
                    .map(|p| p.slot)
                    .ok_or_else(|| Error::unknown_variable(var.clone()))?;
                last_slot = Some(last_slot.map_or(slot, |s: usize| s.max(slot)));
            }
            match last_slot {
                None => constant.push(conjunct),
                Some(slot) if vars.len() == 1 => alpha[slot].push(conjunct),
                Some(slot) => join[slot].push(conjunct),
            }
        }

        let mut steps = Vec::with_capacity(patterns.len() + subs.len());
        for (slot, conds) in alpha.into_iter().enumerate() {
            let right = self.alpha_path(&schemas[slot], &patterns[slot].var, conds)?;
            let test = compile_all(&scope, std::mem::take(&mut join[slot]))?;
            steps.push(BetaStep::Join { right, test });
        }

        let mut width = patterns.len();
        for sub in subs {
            match sub {
                SubConjunct::Quantified { quantifier, sub } => {
                    let (right, test, _) = self.plan_sub(&sub, width, &scope)?;
                    steps.push(BetaStep::Quantifier {
                        quantifier,
                        right,
                        test,
                    });
                }
                SubConjunct::Aggregate {
                    function,
                    argument,
                    sub,
                    var,
                    guard,
                } => {
                    let (right, test, inner) = self.plan_sub(&sub, width, &scope)?;
                    let argument = match (function, argument) {
                        (AggregateFn::Count, _) => None,
                        (_, Some(arg)) => Some(Compiler::new(&inner).compile(&arg)?),
                        (f, None) => {
                            return Err(Error::invalid_expression(format!(
                                "{} requires an argument",
                                f.name()
                            )));
                        }
                    };
                    scope = scope.with_value(&var, width);
                    width += 1;
                    let guard = compile_all(&scope, guard)?;
                    steps.push(BetaStep::Accumulate {
                        function,
                        argument,
                        right,
                        test,
                        guard,
                    });
                }
            }
        }

        let terminal_guard = compile_all(&Scope::new(), constant)?;

        let actions = decl
            .actions
            .iter()
            .map(|call| {
                let compiler = Compiler::new(&scope).with_types(self.types);
                let args = call
                    .args
                    .iter()
                    .map(|a| compiler.compile(a))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| {
                        e.with_frame(format!("action {}", call.name))
                            .with_context(call.span.context())
                    })?;
                Ok(CompiledAction {
                    name: Arc::from(call.name.as_str()),
                    args,
                    span: call.span,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RulePlan {
            name: Arc::from(decl.name.as_str()),
            source: decl.to_string(),
            span: decl.span,
            patterns,
            steps,
            terminal_guard,
            scope,
            actions,
        })
    }

    /// Builds the alpha chain for single-variable conditions on `var`.
    fn alpha_path(
        &self,
        schema: &Arc<TypeSchema>,
        var: &str,
        conditions: Vec<Expr>,
    ) -> Result<AlphaPath> {
        let scope = Scope::new().with_fact(ALPHA_VAR, 0, Arc::clone(schema));
        let compiler = Compiler::new(&scope);
        let steps = conditions
            .into_iter()
            .map(|cond| {
                let canonical = cond.rename_var(var, ALPHA_VAR);
                let test = compiler.compile(&canonical)?;
                Ok(AlphaStep {
                    key: Arc::from(canonical.to_string()),
                    test: Arc::new(test),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(AlphaPath {
            schema: Arc::clone(schema),
            steps,
        })
    }

    /// Plans a sub-pattern whose variable sits at slot `width`.
    ///
    /// Returns the right input, the correlated test, and the scope seen by
    /// the test (the outer scope plus the sub-pattern variable).
    fn plan_sub(
        &self,
        sub: &SubPattern,
        width: usize,
        outer: &Scope,
    ) -> Result<(AlphaPath, Option<CompiledExpr>, Scope)> {
        let var = sub.pattern.var.as_str();
        let schema = Arc::clone(
            self.types
                .require(&sub.pattern.type_name)
                .map_err(|e| e.with_context(sub.pattern.span.context()))?,
        );

        let mut own = Vec::new();
        let mut correlated = Vec::new();
        for conjunct in sub.constraint.clone().map(Expr::conjuncts).unwrap_or_default() {
            if conjunct.contains_quantifier() || conjunct.contains_aggregate() {
                return Err(Error::invalid_expression(format!(
                    "sub-patterns cannot be nested: {conjunct}"
                )));
            }
            let vars = conjunct.free_vars();
            if vars.len() == 1 && vars.contains(var) {
                own.push(conjunct);
            } else {
                correlated.push(conjunct);
            }
        }

        let right = self.alpha_path(&schema, var, own)?;
        let inner = outer.clone().with_fact(var, width, schema);
        let test = compile_all(&inner, correlated)?;
        Ok((right, test, inner))
    }
}

fn compile_all(scope: &Scope, exprs: impl IntoIterator<Item = Expr>) -> Result<Option<CompiledExpr>> {
    Expr::conjoin(exprs)
        .map(|e| Compiler::new(scope).compile(&e))
        .transpose()
}

/// Recognizes a quantified conjunct, folding `NOT EXISTS` and `NOT NOT`.
fn as_quantified(expr: &Expr) -> Option<(Quantifier, SubPattern)> {
    match expr {
        Expr::Quantified { quantifier, sub } => Some((*quantifier, (**sub).clone())),
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
        } => match &**operand {
            Expr::Quantified { quantifier, sub } => {
                let flipped = match quantifier {
                    Quantifier::Not => Quantifier::Exists,
                    Quantifier::Exists => Quantifier::Not,
                };
                Some((flipped, (**sub).clone()))
            }
            _ => None,
        },
        _ => None,
    }
}

type Lifted = (AggregateFn, Option<Expr>, SubPattern, String);

/// Replaces every aggregate in `expr` with a fresh variable.
fn lift_aggregates(expr: Expr, found: &mut Vec<Lifted>, next: &mut usize) -> Expr {
    match expr {
        Expr::Aggregate {
            function,
            argument,
            sub,
        } => {
            let var = format!("$agg{next}");
            *next += 1;
            found.push((function, argument.map(|a| *a), *sub, var.clone()));
            Expr::Var(var)
        }
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: Box::new(lift_aggregates(*operand, found, next)),
        },
        Expr::Binary { op, lhs, rhs } => {
            let lhs = lift_aggregates(*lhs, found, next);
            let rhs = lift_aggregates(*rhs, found, next);
            Expr::binary(op, lhs, rhs)
        }
        Expr::In { subject, list } => Expr::In {
            subject: Box::new(lift_aggregates(*subject, found, next)),
            list: list
                .into_iter()
                .map(|e| lift_aggregates(e, found, next))
                .collect(),
        },
        Expr::Call { function, args } => Expr::Call {
            function,
            args: args
                .into_iter()
                .map(|e| lift_aggregates(e, found, next))
                .collect(),
        },
        Expr::Cast { operand, target } => Expr::Cast {
            operand: Box::new(lift_aggregates(*operand, found, next)),
            target,
        },
        other => other,
    }
}
