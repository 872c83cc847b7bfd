use super::{ArchiveEntry, ConfigurationSnapshot, ConnectionError, WalkerKey, WalkerSummary};
use parking_lot::FairMutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// Archive kept in memory, clones share the same contents
#[derive(Debug, Clone, Default)]
pub struct MemoryConnection(Arc<FairMutex<Inner>>);

#[derive(Debug, Default)]
struct Inner {
    configuration: Option<ConfigurationSnapshot>,
    entries: BTreeMap<WalkerKey, ArchiveEntry>,
    // global evaluation order over all walkers
    points: Vec<Vec<f64>>,
    barriers: BTreeMap<String, BTreeSet<usize>>,
}

impl MemoryConnection {
    pub fn load_entry(&self, key: &WalkerKey) -> Result<Option<ArchiveEntry>, ConnectionError> {
        Ok(self.0.lock().entries.get(key).cloned())
    }

    pub fn save(
        &self,
        key: &WalkerKey,
        entry: ArchiveEntry,
    ) -> Result<WalkerSummary, ConnectionError> {
        let mut inner = self.0.lock();
        let ArchiveEntry { record, state } = entry;

        inner.points.extend(record.history.points.iter().cloned());

        let stored = match inner.entries.remove(key) {
            Some(mut existing) => {
                existing.record.merge(record);
                existing.state = state;
                existing
            }
            None => ArchiveEntry { record, state },
        };
        let summary = stored.record.summary.clone();
        inner.entries.insert(key.clone(), stored);

        Ok(summary)
    }

    pub fn load_configuration(&self) -> Result<Option<ConfigurationSnapshot>, ConnectionError> {
        Ok(self.0.lock().configuration.clone())
    }

    pub fn save_configuration(
        &self,
        snapshot: &ConfigurationSnapshot,
    ) -> Result<(), ConnectionError> {
        let mut inner = self.0.lock();

        if let Some(stored) = &inner.configuration {
            return stored.validate(&snapshot.parameters);
        }

        inner.configuration = Some(snapshot.clone());

        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<WalkerKey>, ConnectionError> {
        Ok(self.0.lock().entries.keys().cloned().collect())
    }

    pub fn points(&self) -> Result<Vec<Vec<f64>>, ConnectionError> {
        Ok(self.0.lock().points.clone())
    }

    pub fn arrive(&self, barrier: &str, rank: usize) -> Result<(), ConnectionError> {
        self.0
            .lock()
            .barriers
            .entry(barrier.to_owned())
            .or_default()
            .insert(rank);

        Ok(())
    }

    pub fn reset_barrier(&self, barrier: &str) -> Result<(), ConnectionError> {
        self.0.lock().barriers.remove(barrier);

        Ok(())
    }

    pub fn arrivals(&self, barrier: &str) -> Result<usize, ConnectionError> {
        Ok(self
            .0
            .lock()
            .barriers
            .get(barrier)
            .map_or(0, BTreeSet::len))
    }
}
