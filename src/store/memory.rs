use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::CounterStore;
use crate::content::ContentKey;
use crate::error::StoreError;

/// Process-local store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    counts: Mutex<HashMap<ContentKey, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn counts(&self) -> MutexGuard<'_, HashMap<ContentKey, u64>> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CounterStore for MemoryStore {
    fn get(&self, key: &ContentKey) -> Result<u64, StoreError> {
        Ok(self.counts().get(key).copied().unwrap_or(0))
    }

    fn add(&self, key: &ContentKey, amount: u64) -> Result<u64, StoreError> {
        let mut counts = self.counts();
        let count = counts.entry(key.clone()).or_insert(0);
        *count = count
            .checked_add(amount)
            .ok_or_else(|| StoreError::Overflow(key.to_string()))?;
        Ok(*count)
    }

    fn add_all(&self, entries: &[(ContentKey, u64)]) -> Result<(), StoreError> {
        let mut counts = self.counts();
        let mut staged: HashMap<ContentKey, u64> = HashMap::new();

        for (key, amount) in entries {
            let current = staged
                .get(key)
                .or_else(|| counts.get(key))
                .copied()
                .unwrap_or(0);
            let next = current
                .checked_add(*amount)
                .ok_or_else(|| StoreError::Overflow(key.to_string()))?;
            staged.insert(key.clone(), next);
        }

        counts.extend(staged);
        Ok(())
    }

    fn all(&self) -> Result<Vec<(ContentKey, u64)>, StoreError> {
        Ok(self
            .counts()
            .iter()
            .map(|(key, count)| (key.clone(), *count))
            .collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
