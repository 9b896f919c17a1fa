//! Field types and record-type schemas.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::value::Value;

/// Declared type tag of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// Integer or floating-point number.
    Number,
    /// Boolean.
    Bool,
}

impl FieldType {
    /// Returns true if `value` may be stored in a field of this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String, Value::String(_))
                | (Self::Number, Value::Int(_) | Value::Float(_))
                | (Self::Bool, Value::Bool(_))
        )
    }

    /// Returns the DSL keyword for this type.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for FieldType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "number" | "int" | "float" => Ok(Self::Number),
            "bool" | "boolean" => Ok(Self::Bool),
            other => Err(Error::new(ErrorKind::InvalidExpression(format!(
                "unknown field type: {other}"
            )))),
        }
    }
}

/// One field of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    /// Field name, unique within its type.
    pub name: Arc<str>,
    /// Declared value type.
    pub field_type: FieldType,
    /// Whether the field participates in the fact identity.
    pub primary_key: bool,
}

impl FieldDescriptor {
    /// Creates a non-key field.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            primary_key: false,
        }
    }

    /// Creates a primary-key field.
    #[must_use]
    pub fn key(name: impl Into<Arc<str>>, field_type: FieldType) -> Self {
        Self {
            primary_key: true,
            ..Self::new(name, field_type)
        }
    }
}

/// Schema of a record type: a name plus an ordered field list.
///
/// Schemas are validated on construction, so any `TypeSchema` in hand has a
/// non-empty name and unique, non-empty field names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeSchema {
    name: Arc<str>,
    fields: Vec<FieldDescriptor>,
}

impl TypeSchema {
    /// Creates and validates a schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if the name is empty, a field name is empty,
    /// or two fields share a name.
    pub fn new(name: impl Into<Arc<str>>, fields: Vec<FieldDescriptor>) -> crate::Result<Self> {
        let name = name.into();
        let invalid = |message: String| {
            Error::new(ErrorKind::InvalidSchema {
                type_name: name.to_string(),
                message,
            })
        };

        if name.is_empty() || name.contains('~') {
            return Err(invalid("type name must be non-empty and contain no '~'".into()));
        }
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(invalid(format!("field {i} has an empty name")));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(invalid(format!("duplicate field {}", field.name)));
            }
        }

        Ok(Self { name, fields })
    }

    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Returns the fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Returns the position of a field by name.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| &*f.name == name)
    }

    /// Returns a field descriptor by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    /// Returns true if at least one field is a primary key.
    #[must_use]
    pub fn has_primary_key(&self) -> bool {
        self.fields.iter().any(|f| f.primary_key)
    }

    /// Iterates primary-key field positions in declaration order.
    pub fn key_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.primary_key)
            .map(|(i, _)| i)
    }
}

impl fmt::Display for TypeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if field.primary_key {
                write!(f, "#")?;
            }
            write!(f, "{}: {}", field.name, field.field_type)?;
        }
        write!(f, ")")
    }
}
