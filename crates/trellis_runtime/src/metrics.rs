//! Counters exposed to callers.

use std::time::Duration;

use trellis_engine::PropagationStats;

/// Engine-wide counters, accumulated across calls while metrics are enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Metrics {
    /// Facts added, at top level or by `Insert` actions.
    pub facts_submitted: u64,
    /// Facts removed.
    pub facts_retracted: u64,
    /// Facts replaced by a new image.
    pub facts_updated: u64,
    /// Fact-to-rule propagations: tokens that inserted facts, new images
    /// of updates included, carried into terminal memories.
    pub facts_propagated: u64,
    /// Node activations during propagation.
    pub node_activations: u64,
    /// Tokens that reached a terminal memory.
    pub propagation_targets: u64,
    /// Rule firings.
    pub rules_fired: u64,
    /// Rules uninstalled, directly or by ingest.
    pub rules_removed: u64,
    /// Actions run to completion.
    pub actions_executed: u64,
    /// Actions rejected because of their arguments.
    pub action_validation_errors: u64,
    /// Actions that failed while running.
    pub action_execution_errors: u64,
    /// Conditions that failed to evaluate and counted as no match.
    pub evaluation_errors: u64,
    /// Xuples published by `Xuple` actions.
    pub xuples_published: u64,
    /// Propagation epochs, nested ones included.
    pub epochs: u64,
    /// Deepest epoch nesting seen.
    pub max_depth: usize,
    /// Top-level calls rolled back after a structural error.
    pub rollbacks: u64,
    /// Calls that exceeded the transaction timeout.
    pub timeouts: u64,
}

impl Metrics {
    /// Folds network counters in.
    pub(crate) fn absorb(&mut self, stats: PropagationStats) {
        self.node_activations += stats.node_activations;
        self.propagation_targets += stats.terminal_insertions;
        self.evaluation_errors += stats.evaluation_errors;
    }
}

/// Time spent in each ingestion phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestTimings {
    /// Parsing. Programs arrive already parsed, so this stays zero unless
    /// the caller records it with [`IngestResult::with_parse_time`].
    pub parse: Duration,
    /// Declaring types and building type nodes.
    pub type_build: Duration,
    /// Compiling and installing rules.
    pub rule_build: Duration,
    /// Submitting inline facts and firing what they trigger.
    pub propagation: Duration,
}

/// What an ingest added.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestResult {
    /// New record types.
    pub types_added: usize,
    /// New user actions.
    pub actions_added: usize,
    /// New tuple-spaces.
    pub spaces_added: usize,
    /// New rules.
    pub rules_added: usize,
    /// Rules uninstalled by removal declarations.
    pub rules_removed: usize,
    /// Inline facts submitted (identical re-submissions excluded).
    pub facts_submitted: usize,
    /// Fact-to-rule propagations: tokens that inline facts, facts inserted
    /// or updated by actions, and stored facts meeting new rules carried
    /// into terminal memories. Counted even with metrics disabled.
    pub facts_propagated: u64,
    /// Tokens that reached a terminal memory.
    pub propagation_targets: u64,
    /// Phase timings.
    pub timings: IngestTimings,
}

impl IngestResult {
    /// Records time spent parsing the program before ingestion.
    #[must_use]
    pub const fn with_parse_time(mut self, parse: Duration) -> Self {
        self.timings.parse = parse;
        self
    }

    /// Returns true if the ingest changed nothing.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.types_added == 0
            && self.actions_added == 0
            && self.spaces_added == 0
            && self.rules_added == 0
            && self.rules_removed == 0
            && self.facts_submitted == 0
    }
}
