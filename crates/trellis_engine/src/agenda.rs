//! Pending activations collected during propagation.
//!
//! Terminal nodes push here as complete matches arrive and cancel when a
//! match is retracted before it fires. Draining yields the survivors in
//! firing order: rule declaration order, then arrival order within a rule.

use crate::rule::RuleId;
use crate::token::Token;

/// A complete match waiting to fire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingActivation {
    /// The matched rule.
    pub rule: RuleId,
    /// The complete token.
    pub token: Token,
    seq: u64,
}

impl PendingActivation {
    /// Returns the arrival sequence number.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

/// Ordered collection of pending activations.
#[derive(Clone, Debug, Default)]
pub struct Agenda {
    pending: Vec<PendingActivation>,
    next_seq: u64,
}

impl Agenda {
    /// Creates an empty agenda.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new complete match.
    pub fn push(&mut self, rule: RuleId, token: Token) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(PendingActivation { rule, token, seq });
    }

    /// Drops a pending match that was retracted before firing.
    ///
    /// Returns false if no such match was pending.
    pub fn cancel(&mut self, rule: RuleId, token: &Token) -> bool {
        match self
            .pending
            .iter()
            .position(|p| p.rule == rule && p.token == *token)
        {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drops every pending match of a rule, returning how many there were.
    pub fn cancel_rule(&mut self, rule: RuleId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|p| p.rule != rule);
        before - self.pending.len()
    }

    /// Takes every pending match, in firing order.
    pub fn drain(&mut self) -> Vec<PendingActivation> {
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|p| (p.rule, p.seq));
        pending
    }

    /// Returns the number of pending matches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
