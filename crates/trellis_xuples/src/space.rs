//! A single named tuple-space.
//!
//! All state sits behind one mutex, so selection and the consumption
//! transition of `retrieve` are atomic: two agents can never both receive
//! a once-consumed xuple.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use trellis_foundation::{Error, ErrorKind, Fact, Result};

use crate::clock::Clock;
use crate::policy::{OverflowPolicy, RetentionPolicy, SelectionPolicy, SpaceConfig};
use crate::xuple::{Xuple, XupleId, XupleState};

/// Counters kept per space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpaceStats {
    /// Xuples published.
    pub published: u64,
    /// Successful consumptions, counting each agent separately.
    pub consumed: u64,
    /// Xuples dropped to make room.
    pub evicted: u64,
    /// Expired xuples removed.
    pub expired_purged: u64,
}

#[derive(Debug)]
struct SpaceState {
    /// Held xuples in publication order.
    xuples: IndexMap<XupleId, Xuple>,
    rng: ChaCha8Rng,
    stats: SpaceStats,
}

impl SpaceState {
    /// Removes every xuple whose retention has passed.
    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.xuples.len();
        self.xuples.retain(|_, x| !x.refresh(now));
        let purged = before - self.xuples.len();
        self.stats.expired_purged += purged as u64;
        purged
    }

    /// Picks the index of the next xuple `agent` may consume.
    fn select(&mut self, config: &SpaceConfig, agent: &str, now: DateTime<Utc>) -> Option<usize> {
        let mut candidates = self
            .xuples
            .values()
            .enumerate()
            .filter(|(_, x)| x.available_to(agent, config.consumption, now))
            .map(|(i, _)| i);
        match config.selection {
            SelectionPolicy::Fifo => candidates.next(),
            SelectionPolicy::Lifo => candidates.next_back(),
            SelectionPolicy::Random => {
                let candidates: Vec<usize> = candidates.collect();
                if candidates.is_empty() {
                    None
                } else {
                    Some(candidates[self.rng.gen_range(0..candidates.len())])
                }
            }
        }
    }

    fn consume_at(&mut self, index: usize, config: &SpaceConfig, agent: &str, now: DateTime<Utc>) -> Option<Xuple> {
        let (_, xuple) = self.xuples.get_index_mut(index)?;
        xuple.consume(agent, config.consumption, now);
        self.stats.consumed += 1;
        Some(xuple.clone())
    }
}

/// A named, policy-governed container of xuples.
#[derive(Debug)]
pub struct XupleSpace {
    name: Arc<str>,
    config: SpaceConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<SpaceState>,
}

impl XupleSpace {
    /// Creates an empty space.
    ///
    /// `seed` drives the `Random` selection policy; without one the
    /// generator is seeded from the operating system.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpaceConfig` if the configuration does not validate.
    pub fn new(
        name: impl Into<Arc<str>>,
        config: SpaceConfig,
        clock: Arc<dyn Clock>,
        seed: Option<u64>,
    ) -> Result<Self> {
        config.validate()?;
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(Self {
            name: name.into(),
            config,
            clock,
            state: Mutex::new(SpaceState {
                xuples: IndexMap::new(),
                rng,
                stats: SpaceStats::default(),
            }),
        })
    }

    /// Returns the space name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SpaceConfig {
        &self.config
    }

    /// Publishes a fact, returning the new xuple's id.
    ///
    /// Expired xuples are purged first. If the space is still full the
    /// overflow policy either evicts the oldest xuple or rejects.
    ///
    /// # Errors
    ///
    /// Returns `SpaceFull` when full and configured to reject.
    pub fn publish(&self, payload: Arc<Fact>, triggering_facts: Vec<Arc<Fact>>) -> Result<XupleId> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.purge_expired(now);

        let max_size = self.config.max_size;
        if max_size > 0 && state.xuples.len() >= max_size {
            match self.config.overflow {
                OverflowPolicy::Reject => {
                    return Err(Error::new(ErrorKind::SpaceFull {
                        name: self.name.to_string(),
                        max_size,
                    }));
                }
                OverflowPolicy::EvictOldest => {
                    while state.xuples.len() >= max_size {
                        if let Some((id, _)) = state.xuples.shift_remove_index(0) {
                            state.stats.evicted += 1;
                            tracing::debug!(space = %self.name, xuple = %id, "evicted oldest xuple");
                        }
                    }
                }
            }
        }

        let expires_at = match self.config.retention {
            RetentionPolicy::Unlimited => None,
            RetentionPolicy::Duration(d) => chrono::Duration::from_std(d)
                .ok()
                .and_then(|d| now.checked_add_signed(d)),
        };
        let xuple = Xuple::new(payload, triggering_facts, now, expires_at);
        let id = xuple.id;
        state.xuples.insert(id, xuple);
        state.stats.published += 1;
        tracing::debug!(space = %self.name, xuple = %id, "published xuple");
        Ok(id)
    }

    /// Selects the next xuple for `agent` under the selection policy and
    /// marks it consumed by that agent. Returns `None` when nothing is
    /// available.
    ///
    /// # Errors
    ///
    /// Returns `EmptyAgentId` if `agent` is empty.
    pub fn retrieve(&self, agent: &str) -> Result<Option<Xuple>> {
        check_agent(agent)?;
        let now = self.clock.now();
        let mut state = self.state.lock();
        let Some(index) = state.select(&self.config, agent, now) else {
            return Ok(None);
        };
        Ok(state.consume_at(index, &self.config, agent, now))
    }

    /// Retrieves up to `n` xuples for `agent` in policy order, under one lock.
    ///
    /// # Errors
    ///
    /// Returns `EmptyAgentId` if `agent` is empty.
    pub fn retrieve_many(&self, agent: &str, n: usize) -> Result<Vec<Xuple>> {
        check_agent(agent)?;
        let now = self.clock.now();
        let mut state = self.state.lock();
        let mut taken = Vec::with_capacity(n.min(state.xuples.len()));
        while taken.len() < n {
            let Some(index) = state.select(&self.config, agent, now) else {
                break;
            };
            match state.consume_at(index, &self.config, agent, now) {
                Some(xuple) => taken.push(xuple),
                None => break,
            }
        }
        Ok(taken)
    }

    /// Records that `agent` consumed the xuple `id`.
    ///
    /// Repeating a consumption by the same agent succeeds without effect.
    ///
    /// # Errors
    ///
    /// Returns `EmptyAgentId` for an empty `agent`, `XupleNotFound` if the
    /// space holds no such xuple and `XupleNotAvailable` if the policy or
    /// state forbids consumption.
    pub fn mark_consumed(&self, id: XupleId, agent: &str) -> Result<()> {
        check_agent(agent)?;
        let now = self.clock.now();
        let mut state = self.state.lock();
        let Some(xuple) = state.xuples.get_mut(&id) else {
            return Err(Error::new(ErrorKind::XupleNotFound(id.to_string())));
        };
        if xuple.consumed_by_agent(agent) {
            return Ok(());
        }
        if !xuple.available_to(agent, self.config.consumption, now) {
            return Err(Error::new(ErrorKind::XupleNotAvailable {
                id: id.to_string(),
                agent: agent.to_string(),
            }));
        }
        xuple.consume(agent, self.config.consumption, now);
        state.stats.consumed += 1;
        Ok(())
    }

    /// Returns a copy of one xuple.
    #[must_use]
    pub fn get(&self, id: XupleId) -> Option<Xuple> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let xuple = state.xuples.get_mut(&id)?;
        xuple.refresh(now);
        Some(xuple.clone())
    }

    /// Returns a snapshot of every held xuple in publication order, with
    /// states brought up to date.
    #[must_use]
    pub fn list_all(&self) -> Vec<Xuple> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state
            .xuples
            .values_mut()
            .map(|x| {
                x.refresh(now);
                x.clone()
            })
            .collect()
    }

    /// Number of xuples in the `Available` state that have not expired.
    #[must_use]
    pub fn count(&self) -> usize {
        let now = self.clock.now();
        self.state
            .lock()
            .xuples
            .values()
            .filter(|x| x.state == XupleState::Available && !x.is_expired_at(now))
            .count()
    }

    /// Number of xuples held, whatever their state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().xuples.len()
    }

    /// Returns true if the space holds no xuples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().xuples.is_empty()
    }

    /// Removes expired xuples, returning how many were purged.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let purged = self.state.lock().purge_expired(now);
        if purged > 0 {
            tracing::debug!(space = %self.name, purged, "purged expired xuples");
        }
        purged
    }

    /// Returns the space's counters.
    #[must_use]
    pub fn stats(&self) -> SpaceStats {
        self.state.lock().stats
    }
}

fn check_agent(agent: &str) -> Result<()> {
    if agent.is_empty() {
        return Err(Error::new(ErrorKind::EmptyAgentId));
    }
    Ok(())
}
