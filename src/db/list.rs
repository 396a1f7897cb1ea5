//! Size-bounded list mirrored to a single storage key as JSON.

use super::{Storage, StorageError};

use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) struct PersistedList<T> {
    storage: Arc<dyn Storage>,
    key: &'static str,
    limit: usize,
    items: RwLock<Vec<T>>,
}

impl<T> PersistedList<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    pub fn new(storage: Arc<dyn Storage>, key: &'static str, limit: usize) -> Self {
        Self {
            storage,
            key,
            limit,
            items: RwLock::new(Vec::new()),
        }
    }

    /// Replace the in-memory list with what is persisted.
    ///
    /// Unreadable or malformed data yields an empty list.
    pub fn load(&self) -> Vec<T> {
        let mut loaded = match self.storage.get(self.key) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<T>>(&raw) {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!("Discarding malformed '{}' data: {}", self.key, e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!("Failed to read '{}': {}", self.key, e);
                Vec::new()
            }
        };
        trim(&mut loaded, self.limit);

        let mut items = self.write();
        *items = loaded;
        items.clone()
    }

    /// Append and persist. Oldest entries are evicted past the limit.
    pub fn push(&self, item: T) {
        let mut items = self.write();
        items.push(item);
        trim(&mut items, self.limit);
        self.persist(&items);
    }

    /// Keep only the entries matching `keep`; returns how many were removed.
    pub fn retain(&self, keep: impl FnMut(&T) -> bool) -> usize {
        let mut items = self.write();
        let before = items.len();
        items.retain(keep);
        let removed = before - items.len();
        if removed > 0 {
            self.persist(&items);
        }
        removed
    }

    /// Empty the list and drop its storage key.
    pub fn clear(&self) {
        let mut items = self.write();
        items.clear();
        if let Err(e) = self.storage.remove(self.key) {
            tracing::error!("Failed to clear '{}': {}", self.key, e);
        }
    }

    pub fn all(&self) -> Vec<T> {
        self.read().clone()
    }

    pub fn last(&self) -> Option<T> {
        self.read().last().cloned()
    }

    /// The most recent `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<T> {
        let items = self.read();
        let start = items.len().saturating_sub(n);
        items[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    // Runs under the write lock so saves land in the same order as mutations.
    fn persist(&self, items: &[T]) {
        let result = serde_json::to_string(items)
            .map_err(StorageError::from)
            .and_then(|json| self.storage.set(self.key, &json));

        if let Err(e) = result {
            tracing::error!("Failed to persist '{}': {}", self.key, e);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.items.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.items.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn trim<T>(items: &mut Vec<T>, limit: usize) {
    if items.len() > limit {
        let excess = items.len() - limit;
        items.drain(..excess);
    }
}
