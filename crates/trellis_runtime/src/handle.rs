//! A shareable, thread-safe handle to an engine.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use trellis_foundation::{Error, ErrorKind, Fact, FactId, Result};
use trellis_language::Program;
use trellis_xuples::XupleManager;

use crate::engine::{Engine, Updated};
use crate::executor::Activation;
use crate::metrics::{IngestResult, Metrics};

/// Serializes callers on one engine lock.
///
/// Acquiring the lock is bounded by the configured transaction timeout.
/// Tuple-spaces are reachable without the engine lock, so consumers never
/// wait on propagation.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    engine: Arc<Mutex<Engine>>,
    spaces: Arc<XupleManager>,
    timeout: Option<Duration>,
}

impl EngineHandle {
    /// Wraps an engine.
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        let spaces = Arc::clone(engine.spaces());
        let timeout = engine.config().transaction_timeout;
        Self {
            engine: Arc::new(Mutex::new(engine)),
            spaces,
            timeout,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Engine>> {
        match self.timeout {
            None => Ok(self.engine.lock()),
            Some(timeout) => self.engine.try_lock_for(timeout).ok_or_else(|| {
                tracing::warn!(timeout_ms = timeout.as_millis(), "engine lock not acquired in time");
                Error::new(ErrorKind::Timeout {
                    millis: timeout.as_millis(),
                })
            }),
        }
    }

    /// See [`Engine::ingest`].
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the engine stays busy, or the ingest error.
    pub fn ingest(&self, program: &Program) -> Result<IngestResult> {
        self.lock()?.ingest(program)
    }

    /// See [`Engine::submit_fact`].
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the engine stays busy, or the submit error.
    pub fn submit_fact(&self, fact: impl Into<Arc<Fact>>) -> Result<FactId> {
        self.lock()?.submit_fact(fact)
    }

    /// See [`Engine::retract_fact`].
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the engine stays busy, or the retract error.
    pub fn retract_fact(&self, id: &FactId) -> Result<()> {
        self.lock()?.retract_fact(id)
    }

    /// See [`Engine::update_fact`].
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the engine stays busy, or the update error.
    pub fn update_fact(&self, fact: impl Into<Arc<Fact>>) -> Result<Updated> {
        self.lock()?.update_fact(fact)
    }

    /// See [`Engine::remove_rule`].
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the engine stays busy, or `UnknownRule`.
    pub fn remove_rule(&self, name: &str) -> Result<()> {
        self.lock()?.remove_rule(name)
    }

    /// Copies the activation log of the last call.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the engine stays busy.
    pub fn activations(&self) -> Result<Vec<Activation>> {
        Ok(self.lock()?.get_activations().to_vec())
    }

    /// Copies the counters.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the engine stays busy.
    pub fn metrics(&self) -> Result<Metrics> {
        Ok(*self.lock()?.metrics())
    }

    /// Runs `f` with exclusive access to the engine.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the engine stays busy.
    pub fn with_engine<T>(&self, f: impl FnOnce(&mut Engine) -> T) -> Result<T> {
        let mut engine = self.lock()?;
        Ok(f(&mut engine))
    }

    /// The tuple-spaces, without taking the engine lock.
    #[must_use]
    pub const fn spaces(&self) -> &Arc<XupleManager> {
        &self.spaces
    }
}
