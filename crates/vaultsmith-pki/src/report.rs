//! Bootstrap run reporting

use serde::Serialize;

/// What a single idempotent step did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Created,
    Skipped,
    Repaired,
    /// Declarative upsert that is always written and always safe
    /// (roles, policies, CA export); not counted as a change.
    Applied,
}

/// Operator-facing summary of one bootstrap run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapReport {
    pub steps: Vec<(String, StepOutcome)>,
}

impl BootstrapReport {
    pub fn record(&mut self, step: impl Into<String>, outcome: StepOutcome) {
        self.steps.push((step.into(), outcome));
    }

    pub fn created(&self) -> usize {
        self.count(StepOutcome::Created)
    }

    pub fn skipped(&self) -> usize {
        self.count(StepOutcome::Skipped)
    }

    pub fn repaired(&self) -> usize {
        self.count(StepOutcome::Repaired)
    }

    fn count(&self, outcome: StepOutcome) -> usize {
        self.steps.iter().filter(|(_, o)| *o == outcome).count()
    }

    /// True when the run changed nothing: every step was already done.
    pub fn is_noop(&self) -> bool {
        self.created() == 0 && self.repaired() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_outcome() {
        let mut report = BootstrapReport::default();
        report.record("root-ca", StepOutcome::Created);
        report.record("intermediate-ca", StepOutcome::Created);
        report.record("credential:postgres", StepOutcome::Skipped);
        report.record("credential:mysql", StepOutcome::Repaired);

        assert_eq!(report.created(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.repaired(), 1);
        assert!(!report.is_noop());
    }

    #[test]
    fn all_skipped_is_a_noop() {
        let mut report = BootstrapReport::default();
        report.record("root-ca", StepOutcome::Skipped);
        assert!(report.is_noop());
    }
}
