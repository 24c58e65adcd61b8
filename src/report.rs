use std::time::Duration;

use crate::models::{ResultRecord, RunSummary, Status};

/// Every result of one runner invocation, in execution order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    results: Vec<ResultRecord>,
    failed: usize,
    errors: usize,
    duration: Duration,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: ResultRecord) {
        match record.status() {
            Status::Pass => {}
            Status::Fail => self.failed += 1,
            Status::Error => self.errors += 1,
        }
        self.results.push(record);
    }

    pub fn total_run(&self) -> usize {
        self.results.len()
    }

    /// Failures plus errors.
    pub fn total_failed(&self) -> usize {
        self.failed + self.errors
    }

    /// Non-passing records in execution order.
    pub fn failures(&self) -> impl Iterator<Item = &ResultRecord> {
        self.results.iter().filter(|r| r.status().is_failure())
    }

    pub fn results(&self) -> &[ResultRecord] {
        &self.results
    }

    pub fn is_success(&self) -> bool {
        self.total_failed() == 0
    }

    pub(crate) fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.total_run(),
            passed: self.total_run() - self.total_failed(),
            failed: self.failed,
            errors: self.errors,
            duration: self.duration,
        }
    }
}
