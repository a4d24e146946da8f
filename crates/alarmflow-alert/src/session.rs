use alarmflow_common::id;

use crate::manager::CycleReport;

/// Per-worker counters. Each worker owns one session; nothing here is
/// process-wide.
#[derive(Debug, Clone)]
pub struct WorkerSession {
    pub session_id: String,
    pub cycles: u64,
    pub processed: u64,
    pub deferred: u64,
    pub failed_checks: u64,
    pub persist_failures: u64,
}

impl WorkerSession {
    pub fn new() -> Self {
        Self {
            session_id: id::generate_uuid(),
            cycles: 0,
            processed: 0,
            deferred: 0,
            failed_checks: 0,
            persist_failures: 0,
        }
    }

    pub fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.processed += report.processed as u64;
        self.deferred += report.deferred as u64;
        self.failed_checks += report.failed_checks as u64;
        self.persist_failures += report.persist_failures as u64;
    }
}

impl Default for WorkerSession {
    fn default() -> Self {
        Self::new()
    }
}
