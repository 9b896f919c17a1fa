//! The process-wide registry of tuple-spaces.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;
use trellis_foundation::{Error, ErrorKind, Fact, Result};

use crate::clock::{Clock, SystemClock};
use crate::policy::SpaceConfig;
use crate::space::XupleSpace;
use crate::xuple::XupleId;

/// Outcome of creating a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Created {
    /// The space was new.
    Added,
    /// A space with the same name and configuration already existed.
    Unchanged,
}

/// Named tuple-spaces, in creation order.
///
/// The registry and each space have their own locks, so consumers
/// retrieving from one space never wait on engine propagation or on
/// other spaces.
#[derive(Debug)]
pub struct XupleManager {
    spaces: RwLock<IndexMap<Arc<str>, Arc<XupleSpace>>>,
    clock: Arc<dyn Clock>,
    seed: Option<u64>,
    created: AtomicU64,
}

impl Default for XupleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl XupleManager {
    /// Creates an empty manager on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty manager on the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            spaces: RwLock::new(IndexMap::new()),
            clock,
            seed: None,
            created: AtomicU64::new(0),
        }
    }

    /// Seeds random selection. Each space gets its own stream derived from
    /// the seed and its creation index.
    #[must_use]
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Creates a space.
    ///
    /// # Errors
    ///
    /// Returns `SpaceExists` if a space with this name but a different
    /// configuration exists, or `InvalidSpaceConfig` if the configuration
    /// does not validate.
    pub fn create(&self, name: &str, config: SpaceConfig) -> Result<Created> {
        let mut spaces = self.spaces.write();
        if let Some(existing) = spaces.get(name) {
            if *existing.config() == config {
                return Ok(Created::Unchanged);
            }
            return Err(Error::new(ErrorKind::SpaceExists(name.to_string())));
        }
        let index = self.created.fetch_add(1, Ordering::Relaxed);
        let seed = self.seed.map(|seed| seed.wrapping_add(index));
        let space = XupleSpace::new(name, config, Arc::clone(&self.clock), seed)
            .map_err(|e| e.with_frame(format!("xuple-space {name}")))?;
        tracing::info!(space = name, %config, "created tuple-space");
        spaces.insert(Arc::from(name), Arc::new(space));
        Ok(Created::Added)
    }

    /// Looks up a space.
    ///
    /// # Errors
    ///
    /// Returns `SpaceNotFound` for an unknown name.
    pub fn get(&self, name: &str) -> Result<Arc<XupleSpace>> {
        self.spaces
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::SpaceNotFound(name.to_string())))
    }

    /// Returns true if a space with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.spaces.read().contains_key(name)
    }

    /// Space names in creation order.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.spaces.read().keys().map(ToString::to_string).collect()
    }

    /// Removes a space, returning it if it existed.
    pub fn remove(&self, name: &str) -> Option<Arc<XupleSpace>> {
        self.spaces.write().shift_remove(name)
    }

    /// Publishes into a named space.
    ///
    /// # Errors
    ///
    /// Returns `SpaceNotFound` for an unknown name, or the space's publish
    /// error.
    pub fn publish(
        &self,
        space: &str,
        payload: Arc<Fact>,
        triggering_facts: Vec<Arc<Fact>>,
    ) -> Result<XupleId> {
        self.get(space)?.publish(payload, triggering_facts)
    }

    /// Purges expired xuples from every space, returning the total purged.
    pub fn cleanup(&self) -> usize {
        let spaces: Vec<Arc<XupleSpace>> = self.spaces.read().values().cloned().collect();
        spaces.iter().map(|s| s.cleanup()).sum()
    }

    /// Number of spaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spaces.read().len()
    }

    /// Returns true if no spaces exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spaces.read().is_empty()
    }
}
