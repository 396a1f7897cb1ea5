//! Generated reports, persisted separately from the query history.

use super::list::PersistedList;
use super::{Report, Storage};

use std::sync::Arc;

pub const REPORTS_KEY: &str = "reports";
pub const REPORTS_LIMIT: usize = 50;

pub struct ReportStore {
    reports: PersistedList<Report>,
}

impl ReportStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            reports: PersistedList::new(storage, REPORTS_KEY, REPORTS_LIMIT),
        }
    }

    pub fn load(&self) -> Vec<Report> {
        let reports = self.reports.load();
        tracing::info!("Loaded {} reports from storage", reports.len());
        reports
    }

    pub fn append(&self, report: Report) {
        self.reports.push(report);
    }

    pub fn all(&self) -> Vec<Report> {
        self.reports.all()
    }

    pub fn latest(&self) -> Option<Report> {
        self.reports.last()
    }

    /// Remove a report by id. Returns whether anything was removed.
    pub fn delete(&self, id: &str) -> bool {
        self.reports.retain(|r| r.id != id) > 0
    }

    pub fn clear(&self) {
        self.reports.clear();
    }
}
