//! Query history: the bounded, persisted log of sweeps.

use super::list::PersistedList;
use super::{QueryBatch, Storage};

use std::sync::Arc;

/// Storage key of the persisted history.
pub const HISTORY_KEY: &str = "queryHistory";

/// Number of batches kept, oldest evicted first.
pub const HISTORY_LIMIT: usize = 100;

/// Append-only log of query batches in chronological order.
pub struct HistoryStore {
    batches: PersistedList<QueryBatch>,
}

impl HistoryStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_limit(storage, HISTORY_LIMIT)
    }

    pub fn with_limit(storage: Arc<dyn Storage>, limit: usize) -> Self {
        Self {
            batches: PersistedList::new(storage, HISTORY_KEY, limit),
        }
    }

    /// Reload from storage, replacing what is held in memory.
    pub fn load(&self) -> Vec<QueryBatch> {
        let batches = self.batches.load();
        tracing::info!("Loaded {} query batches from storage", batches.len());
        batches
    }

    /// Append a batch and persist immediately. Empty batches are ignored.
    pub fn append(&self, batch: QueryBatch) {
        if batch.results.is_empty() {
            tracing::debug!("Skipping empty batch {}", batch.id);
            return;
        }
        self.batches.push(batch);
    }

    pub fn all(&self) -> Vec<QueryBatch> {
        self.batches.all()
    }

    pub fn latest(&self) -> Option<QueryBatch> {
        self.batches.last()
    }

    /// The most recent `n` batches, oldest first.
    pub fn recent(&self, n: usize) -> Vec<QueryBatch> {
        self.batches.tail(n)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn clear(&self) {
        self.batches.clear();
    }
}
