//! Engine configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use trellis_foundation::{Error, Result};
use trellis_xuples::{
    ConsumptionPolicy, OverflowPolicy, RetentionPolicy, SelectionPolicy, SpaceConfig,
};

/// Default bound on nested epochs.
pub const DEFAULT_RECURSION_LIMIT: usize = 64;

// =============================================================================
// Log Level
// =============================================================================

/// How much the engine logs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LogLevel {
    /// Nothing.
    Silent,
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warn,
    /// Lifecycle events and `Log` actions.
    #[default]
    Info,
    /// Everything, including per-firing detail.
    Debug,
}

impl LogLevel {
    /// Returns true if events at `level` should be emitted.
    #[must_use]
    pub fn enabled(self, level: Level) -> bool {
        let threshold = match self {
            Self::Silent => return false,
            Self::Error => Level::ERROR,
            Self::Warn => Level::WARN,
            Self::Info => Level::INFO,
            Self::Debug => Level::TRACE,
        };
        level <= threshold
    }

    /// The equivalent filter for a `tracing` subscriber.
    #[must_use]
    pub const fn filter(self) -> LevelFilter {
        match self {
            Self::Silent => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        level.filter()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Silent => "silent",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        })
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" | "off" => Ok(Self::Silent),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(Error::invalid_expression(format!("unknown log level '{other}'"))),
        }
    }
}

// =============================================================================
// Tuple-space Defaults
// =============================================================================

/// Policies applied to space declarations that leave an option unset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SpaceDefaults {
    /// Default selection policy.
    pub selection: SelectionPolicy,
    /// Default consumption policy.
    pub consumption: ConsumptionPolicy,
    /// Default retention policy.
    pub retention: RetentionPolicy,
    /// Default maximum size; 0 = unbounded.
    pub max_size: usize,
    /// Default overflow behaviour.
    pub overflow: OverflowPolicy,
}

impl SpaceDefaults {
    /// The configuration a declaration with an empty block receives.
    #[must_use]
    pub const fn config(&self) -> SpaceConfig {
        SpaceConfig {
            selection: self.selection,
            consumption: self.consumption,
            retention: self.retention,
            max_size: self.max_size,
            overflow: self.overflow,
        }
    }
}

// =============================================================================
// Engine Config
// =============================================================================

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Log volume.
    pub log_level: LogLevel,
    /// Whether [`Metrics`](crate::Metrics) are updated.
    pub enable_metrics: bool,
    /// Maximum facts held at once; 0 = unbounded.
    pub max_facts_in_memory: usize,
    /// How long a caller waits for the engine lock.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub transaction_timeout: Option<Duration>,
    /// Maximum nesting of epochs triggered by actions.
    pub recursion_limit: usize,
    /// Defaults for tuple-space declarations.
    pub tuple_space_defaults: SpaceDefaults,
    /// Seed for random selection; `None` seeds from the OS.
    pub random_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            enable_metrics: true,
            max_facts_in_memory: 0,
            transaction_timeout: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            tuple_space_defaults: SpaceDefaults::default(),
            random_seed: None,
        }
    }
}

impl EngineConfig {
    /// Verbose logging and a fixed random seed.
    #[must_use]
    pub fn development() -> Self {
        Self {
            log_level: LogLevel::Debug,
            random_seed: Some(0),
            ..Self::default()
        }
    }

    /// Bounded memory, shallow nesting, and a lock timeout.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            log_level: LogLevel::Warn,
            max_facts_in_memory: 100_000,
            transaction_timeout: Some(Duration::from_secs(5)),
            recursion_limit: 16,
            ..Self::default()
        }
    }

    /// Sets the log level.
    #[must_use]
    pub const fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Enables or disables metrics.
    #[must_use]
    pub const fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    /// Sets the fact capacity; 0 = unbounded.
    #[must_use]
    pub const fn with_max_facts(mut self, max: usize) -> Self {
        self.max_facts_in_memory = max;
        self
    }

    /// Sets the lock timeout.
    #[must_use]
    pub const fn with_transaction_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Sets the nested-epoch limit.
    #[must_use]
    pub const fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Sets the tuple-space defaults.
    #[must_use]
    pub const fn with_space_defaults(mut self, defaults: SpaceDefaults) -> Self {
        self.tuple_space_defaults = defaults;
        self
    }

    /// Sets the random seed.
    #[must_use]
    pub const fn with_random_seed(mut self, seed: Option<u64>) -> Self {
        self.random_seed = seed;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero recursion limit or invalid space defaults.
    pub fn validate(&self) -> Result<()> {
        if self.recursion_limit == 0 {
            return Err(Error::invalid_expression("recursion-limit must be positive"));
        }
        self.tuple_space_defaults
            .config()
            .validate()
            .map_err(|e| e.with_frame("tuple-space-defaults"))
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    ///
    /// ```toml
    /// log_level = "warn"
    /// recursion_limit = 32
    /// transaction_timeout = 250
    ///
    /// [tuple_space_defaults]
    /// selection = "lifo"
    /// retention = "duration(10m)"
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a parse error for malformed TOML or a validation error for
    /// invalid settings.
    #[cfg(feature = "serde")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| {
            let span = e.span();
            Error::new(trellis_foundation::ErrorKind::Parse {
                message: e.message().to_string(),
                line: 0,
                column: span.map_or(0, |s| u32::try_from(s.start).unwrap_or(u32::MAX)),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an internal error if serialization fails.
    #[cfg(feature = "serde")]
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::internal(e.to_string()))
    }

    pub(crate) fn space_config(&self) -> SpaceConfig {
        self.tuple_space_defaults.config()
    }
}

/// `Option<Duration>` as whole milliseconds.
#[cfg(feature = "serde")]
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        value
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
