//! Tuple-space policies and configuration.
//!
//! Every policy parses from and renders to the keyword used in program
//! declarations (`fifo`, `per-agent`, `duration(5m)`, ...).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use trellis_foundation::{Error, ErrorKind, Result};

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidSpaceConfig(message.into()))
}

/// How `retrieve` picks among available xuples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub enum SelectionPolicy {
    /// Oldest available first.
    #[default]
    Fifo,
    /// Newest available first.
    Lifo,
    /// Uniform over available xuples.
    Random,
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fifo => "fifo",
            Self::Lifo => "lifo",
            Self::Random => "random",
        })
    }
}

impl FromStr for SelectionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "lifo" => Ok(Self::Lifo),
            "random" => Ok(Self::Random),
            other => Err(invalid(format!("unknown selection policy '{other}'"))),
        }
    }
}

/// What it means for a xuple to be consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub enum ConsumptionPolicy {
    /// The first consumer takes it.
    #[default]
    Once,
    /// Each agent may consume it once.
    PerAgent {
        /// Stop offering the xuple after this many distinct agents.
        max_agents: Option<usize>,
    },
}

impl ConsumptionPolicy {
    /// Per-agent consumption without an agent limit.
    #[must_use]
    pub const fn per_agent() -> Self {
        Self::PerAgent { max_agents: None }
    }

    /// Returns true if `agent` may consume a xuple already consumed by
    /// `consumers`.
    #[must_use]
    pub fn admits<'a>(&self, consumers: impl ExactSizeIterator<Item = &'a str>, agent: &str) -> bool {
        match *self {
            Self::Once => consumers.len() == 0,
            Self::PerAgent { max_agents } => {
                let count = consumers.len();
                if max_agents.is_some_and(|max| count >= max) {
                    return false;
                }
                !consumers.into_iter().any(|a| a == agent)
            }
        }
    }

    /// Returns true once no further agent may consume a xuple with
    /// `consumers` distinct consumers.
    #[must_use]
    pub fn exhausted(&self, consumers: usize) -> bool {
        match *self {
            Self::Once => consumers > 0,
            Self::PerAgent { max_agents } => max_agents.is_some_and(|max| consumers >= max),
        }
    }
}

impl fmt::Display for ConsumptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once => f.write_str("once"),
            Self::PerAgent { max_agents: None } => f.write_str("per-agent"),
            Self::PerAgent {
                max_agents: Some(max),
            } => write!(f, "per-agent({max})"),
        }
    }
}

impl FromStr for ConsumptionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "once" => return Ok(Self::Once),
            "per-agent" | "per_agent" => return Ok(Self::per_agent()),
            _ => {}
        }
        let limit = call_argument(&s, "per-agent")
            .or_else(|| call_argument(&s, "per_agent"))
            .ok_or_else(|| invalid(format!("unknown consumption policy '{s}'")))?;
        let max: usize = limit
            .parse()
            .map_err(|_| invalid(format!("invalid agent limit '{limit}'")))?;
        if max == 0 {
            return Err(invalid("agent limit must be positive"));
        }
        Ok(Self::PerAgent {
            max_agents: Some(max),
        })
    }
}

/// When a xuple expires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub enum RetentionPolicy {
    /// Never.
    #[default]
    Unlimited,
    /// Once strictly more than this much time has passed since publication.
    Duration(Duration),
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Duration(d) => write!(f, "duration({})", render_duration(*d)),
        }
    }
}

impl FromStr for RetentionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "unlimited" {
            return Ok(Self::Unlimited);
        }
        let amount = call_argument(&s, "duration")
            .ok_or_else(|| invalid(format!("unknown retention policy '{s}'")))?;
        parse_duration(amount).map(Self::Duration)
    }
}

/// What `publish` does when the space is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub enum OverflowPolicy {
    /// Drop the oldest xuple to make room.
    #[default]
    EvictOldest,
    /// Fail with `SpaceFull`.
    Reject,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EvictOldest => "evict-oldest",
            Self::Reject => "reject",
        })
    }
}

impl FromStr for OverflowPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evict-oldest" | "evict_oldest" | "evict" => Ok(Self::EvictOldest),
            "reject" => Ok(Self::Reject),
            other => Err(invalid(format!("unknown overflow policy '{other}'"))),
        }
    }
}

/// Policies travel through serde in their keyword form, e.g.
/// `retention = "duration(5m)"` in TOML.
#[cfg(feature = "serde")]
macro_rules! keyword_serde {
    ($($policy:ty),*) => {$(
        impl TryFrom<String> for $policy {
            type Error = Error;

            fn try_from(s: String) -> Result<Self> {
                s.parse()
            }
        }

        impl From<$policy> for String {
            fn from(policy: $policy) -> Self {
                policy.to_string()
            }
        }
    )*};
}

#[cfg(feature = "serde")]
keyword_serde!(SelectionPolicy, ConsumptionPolicy, RetentionPolicy, OverflowPolicy);

/// Configuration of one tuple-space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SpaceConfig {
    /// Selection policy.
    pub selection: SelectionPolicy,
    /// Consumption policy.
    pub consumption: ConsumptionPolicy,
    /// Retention policy.
    pub retention: RetentionPolicy,
    /// Maximum number of held xuples; 0 = unbounded.
    pub max_size: usize,
    /// Behaviour when `max_size` is reached.
    pub overflow: OverflowPolicy,
}

impl SpaceConfig {
    /// Sets the selection policy.
    #[must_use]
    pub const fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    /// Sets the consumption policy.
    #[must_use]
    pub const fn with_consumption(mut self, consumption: ConsumptionPolicy) -> Self {
        self.consumption = consumption;
        self
    }

    /// Sets the retention policy.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the maximum size.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the overflow policy.
    #[must_use]
    pub const fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Checks the configuration for impossible settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpaceConfig` for a zero retention duration or a
    /// zero agent limit.
    pub fn validate(&self) -> Result<()> {
        if let RetentionPolicy::Duration(d) = self.retention {
            if d.is_zero() {
                return Err(invalid("retention duration must be positive"));
            }
        }
        if let ConsumptionPolicy::PerAgent {
            max_agents: Some(0),
        } = self.consumption
        {
            return Err(invalid("agent limit must be positive"));
        }
        Ok(())
    }

    /// Applies one `key: value` option from a declaration block.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpaceConfig` for unknown keys or unparsable values.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "selection" => self.selection = value.parse()?,
            "consumption" => self.consumption = value.parse()?,
            "retention" => self.retention = value.parse()?,
            "overflow" => self.overflow = value.parse()?,
            "max-size" => {
                self.max_size = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("max-size must be a non-negative integer, got '{value}'")))?;
            }
            other => return Err(invalid(format!("unknown option '{other}'"))),
        }
        Ok(())
    }
}

impl fmt::Display for SpaceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{selection: {}, consumption: {}, retention: {}, max-size: {}, overflow: {}}}",
            self.selection, self.consumption, self.retention, self.max_size, self.overflow
        )
    }
}

/// Returns the text between `name(` and a closing `)`.
fn call_argument<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    s.strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
        .map(str::trim)
}

/// Parses `N units` where units is one of ms, s, m, h, d (long forms accepted).
fn parse_duration(text: &str) -> Result<Duration> {
    let digits = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (amount, unit) = text.split_at(digits);
    let amount: u64 = amount
        .parse()
        .map_err(|_| invalid(format!("invalid duration '{text}'")))?;
    if amount == 0 {
        return Err(invalid("retention duration must be positive"));
    }
    let millis_per_unit = match unit.trim() {
        "ms" | "millisecond" | "milliseconds" => 1,
        "s" | "sec" | "second" | "seconds" => 1_000,
        "m" | "min" | "minute" | "minutes" => 60_000,
        "h" | "hour" | "hours" => 3_600_000,
        "d" | "day" | "days" => 86_400_000,
        other => return Err(invalid(format!("unknown duration unit '{other}'"))),
    };
    amount
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| invalid(format!("duration '{text}' is too large")))
}

/// Renders a duration in the largest unit that divides it exactly.
fn render_duration(d: Duration) -> String {
    let millis = d.as_millis();
    for (unit, size) in [("d", 86_400_000), ("h", 3_600_000), ("m", 60_000), ("s", 1_000)] {
        if millis > 0 && millis % size == 0 {
            return format!("{}{unit}", millis / size);
        }
    }
    format!("{millis}ms")
}
