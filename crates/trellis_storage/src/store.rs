//! The fact store.
//!
//! Facts are owned here and nowhere else. Every other component refers to
//! a fact through its [`FactHandle`], a monotone integer issued on insert,
//! or through its [`FactId`]. Handles are never reused, so a stale handle
//! simply fails to resolve.

use std::fmt;
use std::sync::Arc;

use trellis_foundation::{Error, ErrorKind, Fact, FactId, Result};

/// Stable arena handle for a stored fact.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactHandle(u64);

impl FactHandle {
    /// Returns the raw handle number.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of replacing a fact's image.
#[derive(Debug, Clone)]
pub struct Replaced {
    /// Handle of the retired image.
    pub old_handle: FactHandle,
    /// The retired image.
    pub old: Arc<Fact>,
    /// Handle of the new image.
    pub new_handle: FactHandle,
}

/// Owning repository of facts keyed by internal identity.
///
/// Backed by persistent maps so the whole store can be snapshotted and
/// restored in O(1).
#[derive(Clone, Debug, Default)]
pub struct FactStore {
    next_handle: u64,
    facts: im::OrdMap<FactHandle, Arc<Fact>>,
    by_id: im::HashMap<FactId, FactHandle>,
    by_type: im::HashMap<Arc<str>, im::OrdSet<FactHandle>>,
    capacity: usize,
}

impl FactStore {
    /// Creates an empty, unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits the number of facts held at once; 0 means unbounded.
    #[must_use]
    pub fn with_capacity_limit(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Returns the configured capacity limit (0 = unbounded).
    #[must_use]
    pub const fn capacity_limit(&self) -> usize {
        self.capacity
    }

    /// Adds a new fact.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateIdentity` if a fact with the same identity exists,
    /// or `CapacityExceeded` if the store is full.
    pub fn add(&mut self, fact: Arc<Fact>) -> Result<FactHandle> {
        if self.by_id.contains_key(fact.id()) {
            return Err(Error::duplicate_identity(fact.id().clone()));
        }
        if self.capacity > 0 && self.facts.len() >= self.capacity {
            return Err(Error::new(ErrorKind::CapacityExceeded {
                limit: self.capacity,
            }));
        }
        Ok(self.insert_unchecked(fact))
    }

    /// Replaces the fact stored under `target` with a new image.
    ///
    /// The new image gets a fresh handle, so it moves to the end of its
    /// type's insertion order.
    ///
    /// # Errors
    ///
    /// Returns `FactNotFound` if `target` is absent, or
    /// `PrimaryKeyMismatch` if the new image has a different identity.
    pub fn update(&mut self, target: &FactId, fact: Arc<Fact>) -> Result<Replaced> {
        if !self.by_id.contains_key(target) {
            return Err(Error::fact_not_found(target.clone()));
        }
        if fact.id() != target {
            return Err(Error::new(ErrorKind::PrimaryKeyMismatch {
                expected: target.clone(),
                actual: fact.id().clone(),
            }));
        }
        let (old_handle, old) = self.retract(target)?;
        let new_handle = self.insert_unchecked(fact);
        Ok(Replaced {
            old_handle,
            old,
            new_handle,
        })
    }

    /// Removes a fact by identity.
    ///
    /// # Errors
    ///
    /// Returns `FactNotFound` if no such fact exists.
    pub fn retract(&mut self, id: &FactId) -> Result<(FactHandle, Arc<Fact>)> {
        let handle = self
            .by_id
            .remove(id)
            .ok_or_else(|| Error::fact_not_found(id.clone()))?;
        let fact = self
            .facts
            .remove(&handle)
            .ok_or_else(|| Error::internal(format!("identity index points at dead handle {handle:?}")))?;
        if let Some(set) = self.by_type.get_mut(fact.type_name()) {
            set.remove(&handle);
        }
        Ok((handle, fact))
    }

    /// Looks up a fact by identity.
    #[must_use]
    pub fn get(&self, id: &FactId) -> Option<&Arc<Fact>> {
        self.by_id.get(id).and_then(|h| self.facts.get(h))
    }

    /// Returns the handle currently assigned to an identity.
    #[must_use]
    pub fn handle_of(&self, id: &FactId) -> Option<FactHandle> {
        self.by_id.get(id).copied()
    }

    /// Resolves a handle to its fact.
    #[must_use]
    pub fn resolve(&self, handle: FactHandle) -> Option<&Arc<Fact>> {
        self.facts.get(&handle)
    }

    /// Returns true if a fact with this identity is stored.
    #[must_use]
    pub fn contains(&self, id: &FactId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Iterates facts of one type in insertion order.
    pub fn iter_type<'a>(
        &'a self,
        type_name: &str,
    ) -> impl Iterator<Item = (FactHandle, &'a Arc<Fact>)> + 'a {
        self.by_type
            .get(type_name)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(move |h| self.facts.get(h).map(|f| (*h, f)))
    }

    /// Iterates every fact in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (FactHandle, &Arc<Fact>)> {
        self.facts.iter().map(|(h, f)| (*h, f))
    }

    /// Returns the number of stored facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    fn insert_unchecked(&mut self, fact: Arc<Fact>) -> FactHandle {
        let handle = FactHandle(self.next_handle);
        self.next_handle += 1;
        self.by_id.insert(fact.id().clone(), handle);
        self.by_type
            .entry(Arc::clone(fact.type_name()))
            .or_default()
            .insert(handle);
        self.facts.insert(handle, fact);
        handle
    }
}
