//! Expression evaluation.
//!
//! Comparisons and arithmetic follow SQL-style three-valued logic: a null
//! operand makes the result null, and `AND`/`OR`/`NOT` use Kleene truth
//! tables. Equality is the exception, where null equals only null.

use std::sync::Arc;

use trellis_foundation::{Error, ErrorKind, Fact, FieldType, Result, Value};

use crate::ast::{BinaryOp, UnaryOp};
use crate::compile::{CompiledExpr, FieldAccess, PatternOperand, anchor, build_regex, like_to_regex};

/// Source of slot bindings during evaluation.
pub trait Env {
    /// Returns the value bound at `slot`, if any.
    fn binding(&self, slot: usize) -> Option<Value>;
}

/// An environment with no bindings.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyEnv;

impl Env for EmptyEnv {
    fn binding(&self, _slot: usize) -> Option<Value> {
        None
    }
}

/// An environment backed by a slice of values, slot = index.
#[derive(Clone, Copy, Debug)]
pub struct SliceEnv<'a>(pub &'a [Value]);

impl Env for SliceEnv<'_> {
    fn binding(&self, slot: usize) -> Option<Value> {
        self.0.get(slot).cloned()
    }
}

impl CompiledExpr {
    /// Evaluates the expression.
    ///
    /// # Errors
    ///
    /// Returns `DivisionByZero`, `Overflow`, `TypeMismatch`, `InvalidRegex`
    /// (for dynamic patterns), or `InvalidCast` as the expression demands.
    pub fn evaluate(&self, env: &dyn Env) -> Result<Value> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Slot { slot, name } => binding(env, *slot, name),
            Self::Field {
                slot,
                var,
                field,
                access,
            } => read_field(&binding(env, *slot, var)?, field, access),
            Self::Unary { op, operand } => {
                let v = operand.evaluate(env)?;
                match op {
                    UnaryOp::Not => match v {
                        Value::Nil => Ok(Value::Nil),
                        Value::Bool(b) => Ok(Value::Bool(!b)),
                        other => Err(mismatch("bool", &other)),
                    },
                    UnaryOp::Neg => match v {
                        Value::Nil => Ok(Value::Nil),
                        Value::Int(n) => n
                            .checked_neg()
                            .map(Value::Int)
                            .ok_or_else(|| Error::new(ErrorKind::Overflow("negation"))),
                        Value::Float(x) => Ok(Value::Float(-x)),
                        other => Err(mismatch("number", &other)),
                    },
                }
            }
            Self::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                let l = truth(&lhs.evaluate(env)?)?;
                if l == Some(false) {
                    return Ok(Value::Bool(false));
                }
                let r = truth(&rhs.evaluate(env)?)?;
                Ok(match (l, r) {
                    (_, Some(false)) => Value::Bool(false),
                    (Some(true), Some(true)) => Value::Bool(true),
                    _ => Value::Nil,
                })
            }
            Self::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                let l = truth(&lhs.evaluate(env)?)?;
                if l == Some(true) {
                    return Ok(Value::Bool(true));
                }
                let r = truth(&rhs.evaluate(env)?)?;
                Ok(match (l, r) {
                    (_, Some(true)) => Value::Bool(true),
                    (Some(false), Some(false)) => Value::Bool(false),
                    _ => Value::Nil,
                })
            }
            Self::Binary { op, lhs, rhs } => {
                let l = lhs.evaluate(env)?;
                let r = rhs.evaluate(env)?;
                binary(*op, &l, &r)
            }
            Self::Regex {
                subject,
                pattern,
                like,
            } => {
                let subject = subject.evaluate(env)?;
                let text = match &subject {
                    Value::Nil => return Ok(Value::Nil),
                    Value::String(s) => Arc::clone(s),
                    other => return Err(mismatch("string", other)),
                };
                match pattern {
                    PatternOperand::Static(re) => Ok(Value::Bool(re.is_match(&text))),
                    PatternOperand::Dynamic(expr) => match expr.evaluate(env)? {
                        Value::Nil => Ok(Value::Nil),
                        Value::String(p) => {
                            let source = if *like { like_to_regex(&p) } else { anchor(&p) };
                            Ok(Value::Bool(build_regex(&source)?.is_match(&text)))
                        }
                        other => Err(mismatch("string pattern", &other)),
                    },
                }
            }
            Self::In { subject, list } => {
                let v = subject.evaluate(env)?;
                if v.is_nil() {
                    return Ok(Value::Nil);
                }
                for candidate in list {
                    if candidate.evaluate(env)?.loose_eq(&v) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Self::Call { function, args } => {
                let values = args
                    .iter()
                    .map(|a| a.evaluate(env))
                    .collect::<Result<Vec<_>>>()?;
                function.call(&values)
            }
            Self::Cast { operand, target } => cast(operand.evaluate(env)?, *target),
            Self::Construct { schema, fields } => {
                let values = fields
                    .iter()
                    .map(|f| f.evaluate(env))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::from(Fact::from_values(Arc::clone(schema), values)?))
            }
            Self::Modify { slot, var, updates } => {
                let base = binding(env, *slot, var)?;
                let fact = base
                    .as_fact()
                    .ok_or_else(|| mismatch("fact", &base))?;
                let values = updates
                    .iter()
                    .map(|(name, e)| -> Result<(Arc<str>, Value)> {
                        Ok((Arc::clone(name), e.evaluate(env)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::from(fact.with_fields(values)?))
            }
        }
    }

    /// Evaluates as a condition: only `true` passes.
    ///
    /// Null (unknown) fails the condition without error.
    ///
    /// # Errors
    ///
    /// Propagates evaluation errors, and returns `TypeMismatch` if the
    /// result is neither boolean nor null.
    pub fn test(&self, env: &dyn Env) -> Result<bool> {
        match self.evaluate(env)? {
            Value::Bool(b) => Ok(b),
            Value::Nil => Ok(false),
            other => Err(mismatch("bool", &other)),
        }
    }
}

fn binding(env: &dyn Env, slot: usize, name: &str) -> Result<Value> {
    env.binding(slot).ok_or_else(|| Error::unknown_variable(name))
}

fn mismatch(expected: &str, actual: &Value) -> Error {
    Error::type_mismatch(expected, format!("{} {actual:?}", actual.type_name()))
}

fn truth(v: &Value) -> Result<Option<bool>> {
    match v {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Nil => Ok(None),
        other => Err(mismatch("bool", other)),
    }
}

fn read_field(target: &Value, field: &str, access: &FieldAccess) -> Result<Value> {
    let fact = match target {
        Value::Nil => return Ok(Value::Nil),
        Value::Fact(f) => f,
        other => return Err(mismatch("fact", other)),
    };
    match access {
        FieldAccess::Index(i) => fact
            .value_at(*i)
            .cloned()
            .ok_or_else(|| Error::unknown_field(&**fact.type_name(), field)),
        FieldAccess::Identity => Ok(Value::from(fact.id().as_str())),
        FieldAccess::Dynamic => match fact.get(field) {
            Some(v) => Ok(v.clone()),
            None if field == "id" => Ok(Value::from(fact.id().as_str())),
            None => Err(Error::unknown_field(&**fact.type_name(), field)),
        },
    }
}

/// Applies a non-short-circuit binary operator.
///
/// # Errors
///
/// Returns arithmetic or type errors.
#[allow(clippy::cast_precision_loss)]
pub fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(l.loose_eq(r))),
        BinaryOp::Ne => return Ok(Value::Bool(!l.loose_eq(r))),
        _ => {}
    }
    if l.is_nil() || r.is_nil() {
        return Ok(Value::Nil);
    }

    match op {
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = l.partial_cmp(r).ok_or_else(|| {
                Error::type_mismatch(
                    format!("value comparable with {}", l.type_name()),
                    format!("{} {r:?}", r.type_name()),
                )
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::Contains => match (l, r) {
            (Value::String(a), Value::String(b)) => Ok(Value::Bool(a.contains(&**b))),
            (Value::String(_), other) | (other, _) => Err(mismatch("string", other)),
        },
        BinaryOp::Add => match (l, r) {
            (Value::String(a), Value::String(b)) => Ok(Value::from(format!("{a}{b}"))),
            _ => arithmetic(op, l, r),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => arithmetic(op, l, r),
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or | BinaryOp::Like | BinaryOp::Matches => {
            Err(Error::internal(format!("operator {} has a dedicated path", op.symbol())))
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        let (a, b) = (*a, *b);
        let overflow = || Error::new(ErrorKind::Overflow(op.symbol()));
        return match op {
            BinaryOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Div if b == 0 => Err(Error::new(ErrorKind::DivisionByZero)),
            BinaryOp::Div if a % b == 0 => a.checked_div(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Div => Ok(Value::Float(a as f64 / b as f64)),
            BinaryOp::Mod if b == 0 => Err(Error::new(ErrorKind::DivisionByZero)),
            _ => a.checked_rem(b).map(Value::Int).ok_or_else(overflow),
        };
    }

    let a = l.as_number().ok_or_else(|| mismatch("number", l))?;
    let b = r.as_number().ok_or_else(|| mismatch("number", r))?;
    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => Err(Error::new(ErrorKind::DivisionByZero)),
        BinaryOp::Div => Ok(Value::Float(a / b)),
        _ => Ok(Value::Float(a % b)),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn cast(value: Value, target: FieldType) -> Result<Value> {
    let fail = |v: &Value| {
        Error::new(ErrorKind::InvalidCast {
            value: format!("{v:?}"),
            target,
        })
    };
    match (target, &value) {
        (_, Value::Nil) => Ok(Value::Nil),
        (FieldType::String, Value::Fact(f)) => Ok(Value::from(f.id().as_str())),
        (FieldType::String, v) => Ok(Value::from(v.to_string())),
        (FieldType::Number, Value::Int(_) | Value::Float(_)) => Ok(value),
        (FieldType::Number, Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
        (FieldType::Number, Value::String(s)) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .map(Value::Int)
                .or_else(|_| trimmed.parse::<f64>().map(Value::Float))
                .map_err(|_| fail(&value))
        }
        (FieldType::Bool, Value::Bool(_)) => Ok(value),
        (FieldType::Bool, Value::Int(n)) => Ok(Value::Bool(*n != 0)),
        (FieldType::Bool, Value::Float(x)) => Ok(Value::Bool(*x != 0.0)),
        (FieldType::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(fail(&value)),
        },
        (FieldType::Number | FieldType::Bool, Value::Fact(_)) => Err(fail(&value)),
    }
}
