//! Facts and their internal identities.
//!
//! A fact's identity is `Type~k1_k2...`: the type name, a tilde, and the
//! rendered primary-key values joined by underscores. Each rendered value
//! is escaped so the separators stay unambiguous. Types that declare no
//! primary key fall back to a content hash over all fields.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::types::TypeSchema;
use crate::value::Value;

// =============================================================================
// Identity
// =============================================================================

/// Canonical internal identity of a fact.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactId(Arc<str>);

impl FactId {
    /// Wraps an already-rendered identity string.
    #[must_use]
    pub fn from_raw(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    /// Builds the identity from a type name and its primary-key values.
    #[must_use]
    pub fn from_key<'a>(type_name: &str, key: impl IntoIterator<Item = &'a Value>) -> Self {
        let signature = key
            .into_iter()
            .map(|v| escape_component(&render_key_value(v)))
            .collect::<Vec<_>>()
            .join("_");
        Self(format!("{type_name}~{signature}").into())
    }

    /// Builds a content-hash identity for types without a primary key.
    ///
    /// The hash covers `name=value` pairs sorted by field name, so field
    /// order does not matter.
    #[must_use]
    pub fn from_content<'a>(
        type_name: &str,
        fields: impl IntoIterator<Item = (&'a str, &'a Value)>,
    ) -> Self {
        let mut pairs: Vec<String> = fields
            .into_iter()
            .map(|(name, value)| {
                format!(
                    "{}={}:{}",
                    escape_component(name),
                    value.type_name(),
                    escape_component(&render_key_value(value))
                )
            })
            .collect();
        pairs.sort();

        let mut hasher = blake3::Hasher::new();
        hasher.update(type_name.as_bytes());
        for pair in &pairs {
            hasher.update(b"\0");
            hasher.update(pair.as_bytes());
        }
        let digest = hasher.finalize();
        let hex: String = digest.as_bytes()[..8]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        Self(format!("{type_name}~{hex}").into())
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the type-name part of the identity.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.0.split_once('~').map_or(&*self.0, |(t, _)| t)
    }

    /// Splits the signature back into its unescaped key components.
    #[must_use]
    pub fn key_components(&self) -> Vec<String> {
        match self.0.split_once('~') {
            Some((_, sig)) if !sig.is_empty() => sig.split('_').map(unescape_component).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactId({})", self.0)
    }
}

impl From<&str> for FactId {
    fn from(s: &str) -> Self {
        Self::from_raw(s)
    }
}

/// Renders a value as it appears inside an identity signature.
///
/// Integral floats render without a fractional part so `3` and `3.0`
/// produce the same identity.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
pub fn render_key_value(value: &Value) -> String {
    match value {
        Value::Nil => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(x) if x.fract() == 0.0 && x.abs() < 9.0e15 => (*x as i64).to_string(),
        Value::Float(x) => x.to_string(),
        Value::String(s) => s.to_string(),
        Value::Fact(f) => f.id().to_string(),
    }
}

/// Escapes the identity separators and spaces in one component.
#[must_use]
pub fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '~' => out.push_str("%7E"),
            '_' => out.push_str("%5F"),
            ' ' => out.push_str("%20"),
            c => out.push(c),
        }
    }
    out
}

/// Reverses [`escape_component`].
#[must_use]
pub fn unescape_component(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3);
        let decoded = match code {
            Some("25") => Some('%'),
            Some("7E") => Some('~'),
            Some("5F") => Some('_'),
            Some("20") => Some(' '),
            _ => None,
        };
        if let Some(c) = decoded {
            out.push(c);
            rest = &rest[pos + 3..];
        } else {
            out.push('%');
            rest = &rest[pos + 1..];
        }
    }
    out.push_str(rest);
    out
}

// =============================================================================
// Fact
// =============================================================================

/// An immutable record carrying a value for every field of its type.
#[derive(Clone)]
pub struct Fact {
    schema: Arc<TypeSchema>,
    values: Vec<Value>,
    id: FactId,
    origin: Option<FactId>,
}

impl Fact {
    /// Builds a fact from named field values, validating against the schema.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField`, `MissingField`, or `FieldTypeMismatch` when
    /// the supplied fields do not match the schema.
    pub fn new<K, I>(schema: Arc<TypeSchema>, fields: I) -> crate::Result<Self>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut slots: Vec<Option<Value>> = vec![None; schema.fields().len()];
        for (name, value) in fields {
            let name = name.as_ref();
            let index = schema
                .field_index(name)
                .ok_or_else(|| Error::unknown_field(&**schema.name(), name))?;
            if slots[index].replace(value).is_some() {
                return Err(Error::invalid_expression(format!(
                    "field {}.{name} supplied more than once",
                    schema.name()
                )));
            }
        }

        let mut values = Vec::with_capacity(slots.len());
        for (slot, field) in slots.into_iter().zip(schema.fields()) {
            let value = slot.ok_or_else(|| {
                Error::new(ErrorKind::MissingField {
                    type_name: schema.name().to_string(),
                    field: field.name.to_string(),
                })
            })?;
            values.push(value);
        }

        Self::from_values(schema, values)
    }

    /// Builds a fact from values in field declaration order.
    ///
    /// # Errors
    ///
    /// Returns `ArityMismatch` if the count is wrong, or
    /// `FieldTypeMismatch` if a value does not fit its field.
    pub fn from_values(schema: Arc<TypeSchema>, values: Vec<Value>) -> crate::Result<Self> {
        if values.len() != schema.fields().len() {
            return Err(Error::arity_mismatch(
                &**schema.name(),
                schema.fields().len().to_string(),
                values.len(),
            ));
        }
        for (value, field) in values.iter().zip(schema.fields()) {
            if !field.field_type.accepts(value) {
                return Err(Error::field_type_mismatch(
                    &**schema.name(),
                    &*field.name,
                    field.field_type,
                    format!("{} {value:?}", value.type_name()),
                ));
            }
        }

        let id = compute_identity(&schema, &values);
        Ok(Self {
            schema,
            values,
            id,
            origin: None,
        })
    }

    /// Returns a copy with some fields replaced.
    ///
    /// The copy remembers this fact's identity as its origin, so an update
    /// can detect whether the modification changed the identity.
    ///
    /// # Errors
    ///
    /// Same as [`Fact::new`].
    pub fn with_fields<K, I>(&self, updates: I) -> crate::Result<Self>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut values = self.values.clone();
        for (name, value) in updates {
            let name = name.as_ref();
            let index = self
                .schema
                .field_index(name)
                .ok_or_else(|| Error::unknown_field(&**self.schema.name(), name))?;
            values[index] = value;
        }
        let mut fact = Self::from_values(Arc::clone(&self.schema), values)?;
        fact.origin = Some(self.origin.clone().unwrap_or_else(|| self.id.clone()));
        Ok(fact)
    }

    /// Returns the type name.
    #[must_use]
    pub fn type_name(&self) -> &Arc<str> {
        self.schema.name()
    }

    /// Returns the schema this fact was validated against.
    #[must_use]
    pub fn schema(&self) -> &Arc<TypeSchema> {
        &self.schema
    }

    /// Returns the internal identity.
    #[must_use]
    pub fn id(&self) -> &FactId {
        &self.id
    }

    /// Returns the identity this fact was derived from, if it is a modified copy.
    #[must_use]
    pub fn origin(&self) -> Option<&FactId> {
        self.origin.as_ref()
    }

    /// Returns the identity an update with this image should target.
    #[must_use]
    pub fn update_target(&self) -> &FactId {
        self.origin.as_ref().unwrap_or(&self.id)
    }

    /// Returns a field value by name.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.schema.field_index(field).map(|i| &self.values[i])
    }

    /// Returns a field value by declaration index.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Returns all values in declaration order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Iterates `(field name, value)` pairs in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.schema
            .fields()
            .iter()
            .map(|f| &*f.name)
            .zip(self.values.iter())
    }
}

fn compute_identity(schema: &TypeSchema, values: &[Value]) -> FactId {
    if schema.has_primary_key() {
        FactId::from_key(schema.name(), schema.key_indices().map(|i| &values[i]))
    } else {
        FactId::from_content(
            schema.name(),
            schema.fields().iter().map(|f| &*f.name).zip(values.iter()),
        )
    }
}

impl PartialEq for Fact {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name() && self.values == other.values
    }
}

impl Eq for Fact {}

impl Hash for Fact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.schema.name())?;
        for (i, (name, value)) in self.fields().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value:?}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self, self.id)
    }
}
