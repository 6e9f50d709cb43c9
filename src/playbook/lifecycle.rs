//! Lifecycle automaton
//!
//! Drafts that keep succeeding get promoted to active; active playbooks
//! whose track record turns bad get deprecated. Archival only happens
//! through pruning and is never undone here.

use tracing::info;

use super::{Playbook, Status};

/// Successes a draft needs before it is promoted
pub const MIN_SUCCESSES_FOR_PROMOTION: u32 = 3;

/// Executions an active playbook needs before it can be deprecated
pub const MIN_EXECUTIONS_FOR_DEPRECATION: u32 = 5;

/// Success rate below which an active playbook is deprecated
pub const DEFAULT_DEPRECATION_THRESHOLD: f64 = 0.3;

/// A status change applied by the automaton
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Status,
    pub to: Status,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

impl Playbook {
    pub fn should_promote(&self) -> bool {
        self.status == Status::Draft && self.success_count >= MIN_SUCCESSES_FOR_PROMOTION
    }

    pub fn should_deprecate(&self, threshold: f64) -> bool {
        self.status == Status::Active
            && self.total_executions() >= MIN_EXECUTIONS_FOR_DEPRECATION
            && self.success_rate < threshold
    }
}

/// Applies promotion and deprecation after each recorded execution
#[derive(Debug, Clone, Copy)]
pub struct LifecycleAutomaton {
    deprecation_threshold: f64,
}

impl Default for LifecycleAutomaton {
    fn default() -> Self {
        Self::new(DEFAULT_DEPRECATION_THRESHOLD)
    }
}

impl LifecycleAutomaton {
    pub fn new(deprecation_threshold: f64) -> Self {
        Self { deprecation_threshold }
    }

    pub fn deprecation_threshold(&self) -> f64 {
        self.deprecation_threshold
    }

    /// Apply at most one transition to `pb`
    ///
    /// Expects `update_stats` to have run. Promotion is checked first.
    pub fn advance(&self, pb: &mut Playbook) -> Option<Transition> {
        let from = pb.status;
        let to = if pb.should_promote() {
            Status::Active
        } else if pb.should_deprecate(self.deprecation_threshold) {
            Status::Deprecated
        } else {
            return None;
        };

        pb.status = to;
        info!(
            "Playbook {} {} -> {} (successes: {}, failures: {}, rate: {:.2})",
            pb.id, from, to, pb.success_count, pb.failure_count, pb.success_rate
        );
        Some(Transition { from, to })
    }
}
