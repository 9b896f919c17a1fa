//! Partial matches flowing through the beta network.
//!
//! A token is an immutable, shared sequence of slots. Slot `i` holds the
//! binding of the rule's `i`-th variable: a fact handle for a pattern, or a
//! computed value for an aggregate result. Extending a token copies the
//! slot array once; the result is shared by every memory that stores it.

use std::fmt;
use std::sync::Arc;

use trellis_foundation::Value;
use trellis_language::Env;
use trellis_storage::{FactHandle, FactStore};

/// One binding in a token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// A stored fact.
    Fact(FactHandle),
    /// A computed value.
    Value(Value),
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fact(h) => write!(f, "{h:?}"),
            Self::Value(v) => write!(f, "{v:?}"),
        }
    }
}

/// A partial match.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(Arc<[Slot]>);

impl Token {
    /// The empty token that seeds every rule's first beta node.
    #[must_use]
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    /// Builds a token from slots.
    #[must_use]
    pub fn from_slots(slots: Vec<Slot>) -> Self {
        Self(Arc::from(slots))
    }

    /// Returns a new token with `slot` appended.
    #[must_use]
    pub fn extend(&self, slot: Slot) -> Self {
        let mut slots = Vec::with_capacity(self.0.len() + 1);
        slots.extend_from_slice(&self.0);
        slots.push(slot);
        Self(Arc::from(slots))
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty token.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the slot at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.0.get(index)
    }

    /// Returns the last slot.
    #[must_use]
    pub fn last(&self) -> Option<&Slot> {
        self.0.last()
    }

    /// Returns all slots.
    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.0
    }

    /// Iterates the fact handles, in slot order.
    pub fn fact_handles(&self) -> impl Iterator<Item = FactHandle> + '_ {
        self.0.iter().filter_map(|s| match s {
            Slot::Fact(h) => Some(*h),
            Slot::Value(_) => None,
        })
    }

    /// Returns true if the token binds `handle` anywhere.
    #[must_use]
    pub fn mentions(&self, handle: FactHandle) -> bool {
        self.0.iter().any(|s| *s == Slot::Fact(handle))
    }

    /// Returns true if the last slot binds `handle`.
    #[must_use]
    pub fn ends_with(&self, handle: FactHandle) -> bool {
        self.last() == Some(&Slot::Fact(handle))
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// Evaluation environment over a token, resolving fact slots through a store.
///
/// `extra` binds one more slot past the token's end, which is how a right
/// fact is tested against a left token without allocating the joined token.
pub struct TokenEnv<'a> {
    token: &'a Token,
    store: &'a FactStore,
    extra: Option<(usize, Value)>,
}

impl<'a> TokenEnv<'a> {
    /// Creates an environment over `token`.
    #[must_use]
    pub fn new(token: &'a Token, store: &'a FactStore) -> Self {
        Self {
            token,
            store,
            extra: None,
        }
    }

    /// Binds `handle`'s fact to the slot just past the token.
    #[must_use]
    pub fn with_candidate(mut self, handle: FactHandle) -> Self {
        if let Some(fact) = self.store.resolve(handle) {
            self.extra = Some((self.token.len(), Value::Fact(Arc::clone(fact))));
        }
        self
    }
}

impl Env for TokenEnv<'_> {
    fn binding(&self, slot: usize) -> Option<Value> {
        if let Some((extra_slot, value)) = &self.extra {
            if *extra_slot == slot {
                return Some(value.clone());
            }
        }
        match self.token.get(slot)? {
            Slot::Fact(h) => self.store.resolve(*h).map(|f| Value::Fact(Arc::clone(f))),
            Slot::Value(v) => Some(v.clone()),
        }
    }
}
