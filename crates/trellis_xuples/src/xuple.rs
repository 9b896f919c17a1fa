//! Published records held in a tuple-space.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use trellis_foundation::{Error, ErrorKind, Fact, Result};
use uuid::Uuid;

use crate::policy::ConsumptionPolicy;

/// Identifies a xuple. Random (v4) and unique process-wide.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XupleId(Uuid);

impl XupleId {
    /// Generates a fresh id.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for XupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for XupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XupleId({})", self.0)
    }
}

impl FromStr for XupleId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::new(ErrorKind::XupleNotFound(s.to_string())))
    }
}

/// Lifecycle state of a xuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum XupleState {
    /// Can be retrieved.
    Available,
    /// No agent may retrieve it any more.
    Consumed,
    /// Past its retention period.
    Expired,
}

impl fmt::Display for XupleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Available => "available",
            Self::Consumed => "consumed",
            Self::Expired => "expired",
        })
    }
}

/// A published record with its provenance and consumption log.
#[derive(Clone, Debug)]
pub struct Xuple {
    /// Unique id.
    pub id: XupleId,
    /// The published fact.
    pub payload: Arc<Fact>,
    /// Facts of the activation that published it, in token order.
    pub triggering_facts: Vec<Arc<Fact>>,
    /// Publication time.
    pub created_at: DateTime<Utc>,
    /// End of retention, if any.
    pub expires_at: Option<DateTime<Utc>>,
    /// Current state.
    pub state: XupleState,
    /// Consuming agents and when they consumed it, in consumption order.
    pub consumed_by: IndexMap<String, DateTime<Utc>>,
}

impl Xuple {
    pub(crate) fn new(
        payload: Arc<Fact>,
        triggering_facts: Vec<Arc<Fact>>,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: XupleId::new_v4(),
            payload,
            triggering_facts,
            created_at,
            expires_at,
            state: XupleState::Available,
            consumed_by: IndexMap::new(),
        }
    }

    /// Returns true if the retention period has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state == XupleState::Expired || self.expires_at.is_some_and(|at| now > at)
    }

    /// Returns true if `agent` already consumed this xuple.
    #[must_use]
    pub fn consumed_by_agent(&self, agent: &str) -> bool {
        self.consumed_by.contains_key(agent)
    }

    /// Returns true if `agent` may consume this xuple at `now`.
    #[must_use]
    pub fn available_to(&self, agent: &str, policy: ConsumptionPolicy, now: DateTime<Utc>) -> bool {
        self.state == XupleState::Available
            && !self.is_expired_at(now)
            && policy.admits(self.consumed_by.keys().map(String::as_str), agent)
    }

    /// Records a consumption and applies the policy's state transition.
    pub(crate) fn consume(&mut self, agent: &str, policy: ConsumptionPolicy, now: DateTime<Utc>) {
        self.consumed_by.insert(agent.to_string(), now);
        if policy.exhausted(self.consumed_by.len()) {
            self.state = XupleState::Consumed;
        }
    }

    /// Moves the xuple to `Expired` if its retention has passed.
    pub(crate) fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if self.state == XupleState::Available && self.is_expired_at(now) {
            self.state = XupleState::Expired;
        }
        self.state == XupleState::Expired
    }
}
