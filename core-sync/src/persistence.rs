//! # Sync State Persistence
//!
//! Durable state consulted at startup and written after each session.
//!
//! ## Overview
//!
//! Four records are kept, each as one JSON value in a [`KeyValueStore`]:
//!
//! | Key | Contents |
//! |---|---|
//! | `sync.last_sync` | platform → timestamp of its last successful collection |
//! | `sync.versions` | item id → recorded [`ItemVersion`] |
//! | `sync.changelog` | applied changes, oldest first, bounded |
//! | `sync.statistics` | aggregate [`SyncStatistics`] |
//!
//! A missing key loads as an empty record, so a fresh store needs no
//! migration.

use crate::session::ChangeLogEntry;
use crate::Result;
use async_trait::async_trait;
use bridge_traits::{ItemVersion, KeyValueStore};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub const LAST_SYNC_KEY: &str = "sync.last_sync";
pub const VERSIONS_KEY: &str = "sync.versions";
pub const CHANGELOG_KEY: &str = "sync.changelog";
pub const STATISTICS_KEY: &str = "sync.statistics";

/// Aggregate counters across all sessions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStatistics {
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub failed_sessions: u64,
    pub cancelled_sessions: u64,
    pub total_conflicts: u64,
    pub auto_resolved_conflicts: u64,
    pub manually_resolved_conflicts: u64,
    pub items_synced: u64,
    pub items_skipped: u64,
    pub data_transferred: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Everything the coordinator keeps durably
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    /// Platform name → last successful collection
    pub last_sync: BTreeMap<String, DateTime<Utc>>,
    /// Item id → recorded version
    pub versions: BTreeMap<String, ItemVersion>,
    pub changelog: Vec<ChangeLogEntry>,
    pub statistics: SyncStatistics,
}

/// Append changes and drop the oldest entries beyond `max_entries`
pub fn append_changes(
    changelog: &mut Vec<ChangeLogEntry>,
    entries: &[ChangeLogEntry],
    max_entries: usize,
) {
    changelog.extend_from_slice(entries);
    if changelog.len() > max_entries {
        let excess = changelog.len() - max_entries;
        changelog.drain(..excess);
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Storage seam for the coordinator's durable state
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Load all records; missing records load empty
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a record is malformed
    async fn load(&self) -> Result<PersistedState>;

    async fn save_last_sync(&self, last_sync: &BTreeMap<String, DateTime<Utc>>) -> Result<()>;

    async fn save_versions(&self, versions: &BTreeMap<String, ItemVersion>) -> Result<()>;

    async fn save_changelog(&self, changelog: &[ChangeLogEntry]) -> Result<()>;

    async fn save_statistics(&self, statistics: &SyncStatistics) -> Result<()>;
}

// ============================================================================
// Key-Value Implementation
// ============================================================================

/// [`SyncStateStore`] backed by a host [`KeyValueStore`]
pub struct KeyValueSyncStateStore {
    store: Arc<dyn KeyValueStore>,
}

impl KeyValueSyncStateStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn read<T>(&self, key: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.store.get_string(key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(T::default()),
        }
    }

    async fn write<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let raw = serde_json::to_string(value)?;
        self.store.set_string(key, &raw).await?;
        debug!(key, bytes = raw.len(), "Persisted sync state");
        Ok(())
    }
}

#[async_trait]
impl SyncStateStore for KeyValueSyncStateStore {
    async fn load(&self) -> Result<PersistedState> {
        Ok(PersistedState {
            last_sync: self.read(LAST_SYNC_KEY).await?,
            versions: self.read(VERSIONS_KEY).await?,
            changelog: self.read(CHANGELOG_KEY).await?,
            statistics: self.read(STATISTICS_KEY).await?,
        })
    }

    async fn save_last_sync(&self, last_sync: &BTreeMap<String, DateTime<Utc>>) -> Result<()> {
        self.write(LAST_SYNC_KEY, last_sync).await
    }

    async fn save_versions(&self, versions: &BTreeMap<String, ItemVersion>) -> Result<()> {
        self.write(VERSIONS_KEY, versions).await
    }

    async fn save_changelog(&self, changelog: &[ChangeLogEntry]) -> Result<()> {
        self.write(CHANGELOG_KEY, changelog).await
    }

    async fn save_statistics(&self, statistics: &SyncStatistics) -> Result<()> {
        self.write(STATISTICS_KEY, statistics).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ConflictId;
    use crate::session::SyncSessionId;
    use crate::strategy::ResolutionStrategy;
    use crate::SyncError;
    use bridge_traits::error::Result as BridgeResult;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        values: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl KeyValueStore for MemoryStore {
        async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn delete(&self, key: &str) -> BridgeResult<()> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }

        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(self.values.lock().unwrap().keys().cloned().collect())
        }
    }

    fn entry(n: u32) -> ChangeLogEntry {
        ChangeLogEntry {
            session_id: SyncSessionId::new(),
            conflict_id: ConflictId::new(),
            item_ids: vec![format!("item-{}", n)],
            strategy: ResolutionStrategy::LatestTimestamp,
            reason: "newest".to_string(),
            applied_at: Utc.with_ymd_and_hms(2024, 1, n, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_empty_store_loads_defaults() {
        let state_store = KeyValueSyncStateStore::new(Arc::new(MemoryStore::default()));
        let state = state_store.load().await.unwrap();
        assert_eq!(state, PersistedState::default());
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let kv = Arc::new(MemoryStore::default());
        let state_store = KeyValueSyncStateStore::new(kv.clone());
        let at = Utc.with_ymd_and_hms(2024, 5, 5, 5, 5, 5).unwrap();

        let mut last_sync = BTreeMap::new();
        last_sync.insert("flickr".to_string(), at);
        let mut versions = BTreeMap::new();
        versions.insert(
            "f-1".to_string(),
            ItemVersion {
                hash: "abc".to_string(),
                timestamp: at,
                size: 10,
            },
        );
        let statistics = SyncStatistics {
            total_sessions: 2,
            completed_sessions: 1,
            last_sync_at: Some(at),
            ..SyncStatistics::default()
        };

        state_store.save_last_sync(&last_sync).await.unwrap();
        state_store.save_versions(&versions).await.unwrap();
        state_store.save_changelog(&[entry(1)]).await.unwrap();
        state_store.save_statistics(&statistics).await.unwrap();

        let reloaded = KeyValueSyncStateStore::new(kv.clone()).load().await.unwrap();
        assert_eq!(reloaded.last_sync, last_sync);
        assert_eq!(reloaded.versions, versions);
        assert_eq!(reloaded.changelog.len(), 1);
        assert_eq!(reloaded.statistics, statistics);

        let raw = kv.get_string(LAST_SYNC_KEY).await.unwrap().unwrap();
        assert!(raw.contains("flickr"));
    }

    #[tokio::test]
    async fn test_malformed_record_is_reported() {
        let kv = Arc::new(MemoryStore::default());
        kv.set_string(VERSIONS_KEY, "not json").await.unwrap();

        let result = KeyValueSyncStateStore::new(kv).load().await;
        assert!(matches!(result, Err(SyncError::Serialization(_))));
    }

    #[test]
    fn test_changelog_retention_drops_oldest() {
        let mut changelog = Vec::new();
        append_changes(&mut changelog, &[entry(1), entry(2)], 3);
        append_changes(&mut changelog, &[entry(3), entry(4)], 3);

        assert_eq!(changelog.len(), 3);
        assert_eq!(changelog[0].item_ids, vec!["item-2".to_string()]);
        assert_eq!(changelog[2].item_ids, vec!["item-4".to_string()]);
    }
}
