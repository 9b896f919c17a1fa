//! Registry of declared record types.

use std::sync::Arc;

use trellis_foundation::{Error, ErrorKind, Result, TypeSchema};

/// Outcome of declaring a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declared {
    /// The type was new and has been registered.
    Added,
    /// An identical schema was already registered; nothing changed.
    Unchanged,
}

/// Registry of record types, keyed by name.
///
/// Backed by persistent maps so snapshots are O(1) to take and restore.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    by_name: im::HashMap<Arc<str>, Arc<TypeSchema>>,
    order: im::Vector<Arc<str>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a type.
    ///
    /// Re-declaring an identical schema is idempotent.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateType` if a different schema already uses the name.
    pub fn declare(&mut self, schema: TypeSchema) -> Result<Declared> {
        if let Some(existing) = self.by_name.get(schema.name()) {
            return if **existing == schema {
                Ok(Declared::Unchanged)
            } else {
                Err(Error::new(ErrorKind::DuplicateType(schema.name().to_string())))
            };
        }

        let name = Arc::clone(schema.name());
        self.by_name.insert(Arc::clone(&name), Arc::new(schema));
        self.order.push_back(name);
        Ok(Declared::Added)
    }

    /// Looks up a schema by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<TypeSchema>> {
        self.by_name.get(name)
    }

    /// Looks up a schema by name, failing with `UnknownType`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if no such type is declared.
    pub fn require(&self, name: &str) -> Result<&Arc<TypeSchema>> {
        self.get(name).ok_or_else(|| Error::unknown_type(name))
    }

    /// Returns true if the type is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Iterates schemas in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TypeSchema>> {
        self.order.iter().filter_map(|name| self.by_name.get(name))
    }

    /// Returns the number of declared types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no types are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
