//! Node memories.
//!
//! Both kinds are persistent collections, so cloning a whole network for a
//! rollback snapshot shares structure instead of copying contents.

use trellis_storage::FactHandle;

use crate::token::Token;

// =============================================================================
// Alpha Memory
// =============================================================================

/// Facts that passed a type or alpha node.
///
/// Handles are allocated monotonically, so handle order is arrival order.
#[derive(Clone, Debug, Default)]
pub struct AlphaMemory {
    facts: im::OrdSet<FactHandle>,
}

impl AlphaMemory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fact. Returns false if it was already present.
    pub fn insert(&mut self, handle: FactHandle) -> bool {
        self.facts.insert(handle).is_none()
    }

    /// Removes a fact. Returns false if it was absent.
    pub fn remove(&mut self, handle: FactHandle) -> bool {
        self.facts.remove(&handle).is_some()
    }

    /// Returns true if the fact is present.
    #[must_use]
    pub fn contains(&self, handle: FactHandle) -> bool {
        self.facts.contains(&handle)
    }

    /// Returns a cheap snapshot of the contents, in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> im::OrdSet<FactHandle> {
        self.facts.clone()
    }

    /// Iterates facts in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = FactHandle> + '_ {
        self.facts.iter().copied()
    }

    /// Returns the number of facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

// =============================================================================
// Token Memory
// =============================================================================

#[derive(Clone, Debug)]
struct Entry {
    token: Token,
    parent: Token,
}

/// Tokens emitted by a beta node, each remembered with the left token it
/// was derived from.
///
/// Retraction arrives as "the parent token is gone", so entries are indexed
/// by parent as well as by value. Iteration follows arrival order.
#[derive(Clone, Debug, Default)]
pub struct TokenMemory {
    next_seq: u64,
    entries: im::OrdMap<u64, Entry>,
    index: im::HashMap<Token, u64>,
    by_parent: im::HashMap<Token, im::OrdSet<u64>>,
}

impl TokenMemory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `token`, derived from `parent`. Returns false if already stored.
    pub fn insert(&mut self, token: Token, parent: Token) -> bool {
        if self.index.contains_key(&token) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(token.clone(), seq);
        self.by_parent
            .entry(parent.clone())
            .or_insert_with(im::OrdSet::new)
            .insert(seq);
        self.entries.insert(seq, Entry { token, parent });
        true
    }

    /// Removes one token. Returns false if it was absent.
    pub fn remove(&mut self, token: &Token) -> bool {
        let Some(seq) = self.index.remove(token) else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&seq) {
            self.unlink_parent(&entry.parent, seq);
        }
        true
    }

    /// Removes every token derived from `parent`, returning them in arrival order.
    pub fn remove_children(&mut self, parent: &Token) -> Vec<Token> {
        let Some(seqs) = self.by_parent.remove(parent) else {
            return Vec::new();
        };
        let mut removed = Vec::with_capacity(seqs.len());
        for seq in &seqs {
            if let Some(entry) = self.entries.remove(seq) {
                self.index.remove(&entry.token);
                removed.push(entry.token);
            }
        }
        removed
    }

    /// Removes every token matching `pred`, returning them in arrival order.
    pub fn remove_where(&mut self, pred: impl Fn(&Token) -> bool) -> Vec<Token> {
        let doomed: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| pred(&e.token))
            .map(|(seq, _)| *seq)
            .collect();
        let mut removed = Vec::with_capacity(doomed.len());
        for seq in doomed {
            if let Some(entry) = self.entries.remove(&seq) {
                self.index.remove(&entry.token);
                self.unlink_parent(&entry.parent, seq);
                removed.push(entry.token);
            }
        }
        removed
    }

    /// Returns true if `token` is stored.
    #[must_use]
    pub fn contains(&self, token: &Token) -> bool {
        self.index.contains_key(token)
    }

    /// Returns the stored tokens in arrival order.
    #[must_use]
    pub fn tokens(&self) -> Vec<Token> {
        self.entries.values().map(|e| e.token.clone()).collect()
    }

    /// Iterates stored tokens in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.entries.values().map(|e| &e.token)
    }

    /// Returns the number of stored tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn unlink_parent(&mut self, parent: &Token, seq: u64) {
        let emptied = match self.by_parent.get_mut(parent) {
            Some(set) => {
                set.remove(&seq);
                set.is_empty()
            }
            None => false,
        };
        if emptied {
            self.by_parent.remove(parent);
        }
    }
}
