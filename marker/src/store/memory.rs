use crate::error::MarkerError;
use crate::store::lock::UnitLock;
use crate::traits::response_log::ResponseLog;
use crate::types::{UnitEvent, UnitKey};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-process log with the same semantics as the JSONL store.
#[derive(Debug, Default, Clone)]
pub struct MemoryResponseLog {
    events: Arc<Mutex<HashMap<UnitKey, Vec<UnitEvent>>>>,
    locked: Arc<Mutex<HashSet<UnitKey>>>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryResponseLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total events across all units.
    pub fn len(&self) -> usize {
        guard(&self.events).values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seeds a unit's stream directly, e.g. with events from an earlier run.
    pub fn preload(&self, key: &UnitKey, events: Vec<UnitEvent>) {
        guard(&self.events)
            .entry(key.clone())
            .or_default()
            .extend(events);
    }
}

#[async_trait]
impl ResponseLog for MemoryResponseLog {
    async fn append(&self, key: &UnitKey, event: &UnitEvent) -> Result<(), MarkerError> {
        guard(&self.events)
            .entry(key.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn events(&self, key: &UnitKey) -> Result<Vec<UnitEvent>, MarkerError> {
        Ok(guard(&self.events).get(key).cloned().unwrap_or_default())
    }

    fn lock(&self, key: &UnitKey) -> Result<UnitLock, MarkerError> {
        if !guard(&self.locked).insert(key.clone()) {
            return Err(MarkerError::UnitLocked(key.to_string()));
        }
        let locked = Arc::clone(&self.locked);
        let owned = key.clone();
        Ok(UnitLock::new(key.clone(), move || {
            guard(&locked).remove(&owned);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use code_runner::TestResult;
    use uuid::Uuid;

    #[tokio::test]
    async fn streams_are_kept_per_unit() {
        let log = MemoryResponseLog::new();
        let q1 = UnitKey::new("t", "s", "q1");
        let q2 = UnitKey::new("t", "s", "q2");
        let e = UnitEvent::TestResult {
            run_id: Uuid::new_v4(),
            result: TestResult::empty("q1", "No test file found"),
        };
        log.append(&q1, &e).await.unwrap();

        assert_eq!(log.events(&q1).await.unwrap(), vec![e]);
        assert!(log.events(&q2).await.unwrap().is_empty());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn lock_is_exclusive_per_unit() {
        let log = MemoryResponseLog::new();
        let q1 = UnitKey::new("t", "s", "q1");
        let held = log.lock(&q1).unwrap();
        assert!(log.lock(&UnitKey::new("t", "s", "q2")).is_ok());
        assert!(matches!(log.lock(&q1), Err(MarkerError::UnitLocked(_))));
        drop(held);
        assert!(log.lock(&q1).is_ok());
    }
}
