//! Built-in scalar functions.
//!
//! The set is closed: names resolve at compile time, so an unknown function
//! is a build-time error rather than a propagation-time one. Any null
//! argument makes the result null.

use std::fmt;

use trellis_foundation::{Error, ErrorKind, Result, Value};

/// A built-in function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// `ABS(n)`
    Abs,
    /// `MIN(a, b, ...)`
    Min,
    /// `MAX(a, b, ...)`
    Max,
    /// `ROUND(n)`
    Round,
    /// `FLOOR(n)`
    Floor,
    /// `CEIL(n)`
    Ceil,
    /// `LENGTH(s)`
    Length,
    /// `UPPER(s)`
    Upper,
    /// `LOWER(s)`
    Lower,
    /// `TRIM(s)`
    Trim,
    /// `SUBSTRING(s, start, len)`, zero-based, counted in characters.
    Substring,
}

impl Builtin {
    /// Resolves a function name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let builtin = match name.to_ascii_uppercase().as_str() {
            "ABS" => Self::Abs,
            "MIN" => Self::Min,
            "MAX" => Self::Max,
            "ROUND" => Self::Round,
            "FLOOR" => Self::Floor,
            "CEIL" | "CEILING" => Self::Ceil,
            "LENGTH" | "LEN" => Self::Length,
            "UPPER" => Self::Upper,
            "LOWER" => Self::Lower,
            "TRIM" => Self::Trim,
            "SUBSTRING" | "SUBSTR" => Self::Substring,
            _ => return None,
        };
        Some(builtin)
    }

    /// Returns the canonical name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Abs => "ABS",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Round => "ROUND",
            Self::Floor => "FLOOR",
            Self::Ceil => "CEIL",
            Self::Length => "LENGTH",
            Self::Upper => "UPPER",
            Self::Lower => "LOWER",
            Self::Trim => "TRIM",
            Self::Substring => "SUBSTRING",
        }
    }

    /// Checks an argument count.
    ///
    /// # Errors
    ///
    /// Returns `ArityMismatch` if `count` is not accepted.
    pub fn check_arity(self, count: usize) -> Result<()> {
        let (ok, expected) = match self {
            Self::Min | Self::Max => (count >= 1, "at least 1"),
            Self::Substring => (count == 3, "3"),
            _ => (count == 1, "1"),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::arity_mismatch(self.name(), expected, count))
        }
    }

    /// Applies the function to already-evaluated arguments.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for arguments of the wrong type and
    /// `Overflow` if `ABS` of `i64::MIN` is requested.
    pub fn call(self, args: &[Value]) -> Result<Value> {
        self.check_arity(args.len())?;
        if args.iter().any(Value::is_nil) {
            return Ok(Value::Nil);
        }

        match self {
            Self::Abs => match &args[0] {
                Value::Int(n) => n
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| Error::new(ErrorKind::Overflow("ABS"))),
                Value::Float(x) => Ok(Value::Float(x.abs())),
                other => Err(expect_number(other)),
            },
            Self::Min | Self::Max => extremum(self, args),
            Self::Round => round_with(&args[0], f64::round),
            Self::Floor => round_with(&args[0], f64::floor),
            Self::Ceil => round_with(&args[0], f64::ceil),
            Self::Length => {
                let s = string_arg(&args[0])?;
                Ok(Value::Int(i64::try_from(s.chars().count()).unwrap_or(i64::MAX)))
            }
            Self::Upper => Ok(Value::from(string_arg(&args[0])?.to_uppercase())),
            Self::Lower => Ok(Value::from(string_arg(&args[0])?.to_lowercase())),
            Self::Trim => Ok(Value::from(string_arg(&args[0])?.trim())),
            Self::Substring => {
                let s = string_arg(&args[0])?;
                let start = index_arg(&args[1])?;
                let len = index_arg(&args[2])?;
                Ok(Value::from(s.chars().skip(start).take(len).collect::<String>()))
            }
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn expect_number(value: &Value) -> Error {
    Error::type_mismatch("number", format!("{} {value:?}", value.type_name()))
}

fn string_arg(value: &Value) -> Result<&str> {
    value
        .as_str()
        .ok_or_else(|| Error::type_mismatch("string", format!("{} {value:?}", value.type_name())))
}

fn index_arg(value: &Value) -> Result<usize> {
    match value {
        Value::Int(n) => Ok(usize::try_from(*n).unwrap_or(0)),
        other => Err(Error::type_mismatch("integer", format!("{} {other:?}", other.type_name()))),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn round_with(value: &Value, f: fn(f64) -> f64) -> Result<Value> {
    match value {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(x) => {
            let r = f(*x);
            // i64::MAX as f64 rounds up to 2^63, so the bound must be exclusive.
            if r.is_finite() && r >= -9.223_372_036_854_775_808e18 && r < 9.223_372_036_854_775_808e18 {
                Ok(Value::Int(r as i64))
            } else {
                Ok(Value::Float(r))
            }
        }
        other => Err(expect_number(other)),
    }
}

fn extremum(which: Builtin, args: &[Value]) -> Result<Value> {
    let mut best = &args[0];
    if !(best.is_number() || best.as_str().is_some()) {
        return Err(expect_number(best));
    }
    for candidate in &args[1..] {
        let ordering = candidate.partial_cmp(best).ok_or_else(|| {
            Error::type_mismatch(best.type_name(), format!("{} {candidate:?}", candidate.type_name()))
        })?;
        let better = match which {
            Builtin::Min => ordering.is_lt(),
            _ => ordering.is_gt(),
        };
        if better {
            best = candidate;
        }
    }
    Ok(best.clone())
}
