//! Host capabilities handed to the sync engine.
//!
//! A [`CoreConfig`] bundles the two bridges every coordinator needs, a
//! [`PlatformClient`] for listings and a [`KeyValueStore`] for durable state,
//! together with a [`Clock`] and the event channel capacity. The builder
//! fails fast with a [`Error::CapabilityMissing`] naming the absent bridge.
//!
//! With the `desktop-shims` feature a store is opened at `database_path`
//! whenever none is injected.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .platform_client(Arc::new(FlickrAndPhotosClient::new(token)))
//!     .database_path(data_dir.join("sync-state.db"))
//!     .event_buffer_size(256)
//!     .build()?;
//! ```
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // No platform client
//! CoreConfig::builder().build().unwrap();
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, KeyValueStore, PlatformClient, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;

/// Upper bound for the event channel capacity
pub const MAX_EVENT_BUFFER_SIZE: usize = 100_000;

/// Validated engine configuration, built through [`CoreConfig::builder`].
#[derive(Clone)]
pub struct CoreConfig {
    /// Client for fetching photo listings (required)
    pub platform_client: Arc<dyn PlatformClient>,

    /// Durable key-value storage for sync state (required)
    pub kv_store: Arc<dyn KeyValueStore>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Capacity of the event broadcast channel
    pub event_buffer_size: usize,

    /// Path of the SQLite file backing the default store, if any
    pub database_path: Option<PathBuf>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("platform_client", &"PlatformClient { ... }")
            .field("kv_store", &"KeyValueStore { ... }")
            .field("clock", &"Clock { ... }")
            .field("event_buffer_size", &self.event_buffer_size)
            .field("database_path", &self.database_path)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Event buffer must lie in `1..=MAX_EVENT_BUFFER_SIZE`; a database path, when set, must be non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size > MAX_EVENT_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "Event buffer size exceeds maximum of {}",
                MAX_EVENT_BUFFER_SIZE
            )));
        }

        if let Some(path) = &self.database_path {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("Database path cannot be empty".to_string()));
            }
        }

        Ok(())
    }
}

fn platform_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "PlatformClient".to_string(),
        message: "PlatformClient implementation is required to collect photo listings. \
                 Inject a client that talks to the platform APIs (Google Photos, Flickr, ...) \
                 with .platform_client()."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn kv_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "KeyValueStore".to_string(),
        message: "KeyValueStore implementation is required for durable sync state. \
                 Desktop: enable the 'desktop-shims' feature and set .database_path() to use the default SqliteKeyValueStore. \
                 Mobile: inject platform-native storage (UserDefaults/DataStore). \
                 Web: inject an IndexedDB-backed store."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_kv_store(database_path: Option<&PathBuf>) -> Result<Arc<dyn KeyValueStore>> {
    use bridge_desktop::SqliteKeyValueStore;
    use std::thread;
    use tokio::runtime::{Handle, Runtime};

    let path = database_path.cloned().ok_or_else(|| Error::CapabilityMissing {
        capability: "KeyValueStore".to_string(),
        message: "No KeyValueStore injected and no database path set. \
                 Use .kv_store() or .database_path() so the default SqliteKeyValueStore can be created."
            .to_string(),
    })?;

    let init_store = |path: PathBuf| -> Result<_> {
        let runtime = Runtime::new().map_err(|e| {
            Error::Internal(format!(
                "Failed to create Tokio runtime for default key-value store: {}",
                e
            ))
        })?;

        runtime
            .block_on(SqliteKeyValueStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default KeyValueStore: {}", e))
            })
    };

    // A nested runtime cannot block inside an existing one
    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(path))
            .join()
            .map_err(|_| {
                Error::Internal(
                    "Worker thread panicked while creating default KeyValueStore".to_string(),
                )
            })??,
        Err(_) => init_store(path)?,
    };

    let store: Arc<dyn KeyValueStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_kv_store(_database_path: Option<&PathBuf>) -> Result<Arc<dyn KeyValueStore>> {
    Err(kv_store_missing_error())
}

/// Collects bridges and options; [`build`](CoreConfigBuilder::build) validates them.
#[derive(Default)]
pub struct CoreConfigBuilder {
    platform_client: Option<Arc<dyn PlatformClient>>,
    kv_store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
    database_path: Option<PathBuf>,
}

impl CoreConfigBuilder {
    /// Required.
    pub fn platform_client(mut self, client: Arc<dyn PlatformClient>) -> Self {
        self.platform_client = Some(client);
        self
    }

    /// Sets the durable key-value store (required unless provided by `desktop-shims`).
    pub fn kv_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.kv_store = Some(store);
        self
    }

    /// Sets the time source.
    ///
    /// Default: [`SystemClock`]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the capacity of the event broadcast channel.
    ///
    /// Default: 100
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .event_buffer_size(512);
    /// ```
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Sets the SQLite file used by the default store.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_path("/path/to/sync-state.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Fails when the platform client is absent, when no store is injected
    /// and none can be opened, or when [`CoreConfig::validate`] rejects a value.
    pub fn build(self) -> Result<CoreConfig> {
        let platform_client = self
            .platform_client
            .ok_or_else(platform_client_missing_error)?;

        let kv_store = match self.kv_store {
            Some(store) => store,
            None => provide_default_kv_store(self.database_path.as_ref())?,
        };

        let config = CoreConfig {
            platform_client,
            kv_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            database_path: self.database_path,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{FetchOptions, FixedClock, PhotoItem, SourcePlatform};
    use chrono::{TimeZone, Utc};
    use mockall::mock;

    mock! {
        Client {}

        #[async_trait]
        impl PlatformClient for Client {
            async fn fetch_items(
                &self,
                platform: &SourcePlatform,
                options: FetchOptions,
            ) -> BridgeResult<Vec<PhotoItem>>;
        }
    }

    struct NullStore;

    #[async_trait]
    impl KeyValueStore for NullStore {
        async fn set_string(&self, _key: &str, _value: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_string(&self, _key: &str) -> BridgeResult<Option<String>> {
            Ok(None)
        }

        async fn delete(&self, _key: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .platform_client(Arc::new(MockClient::new()))
            .kv_store(Arc::new(NullStore))
    }

    #[test]
    fn test_builder_requires_platform_client() {
        let result = CoreConfig::builder().kv_store(Arc::new(NullStore)).build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "PlatformClient")
            }
            other => panic!("expected missing PlatformClient, got {:?}", other),
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_kv_store() {
        let result = CoreConfig::builder()
            .platform_client(Arc::new(MockClient::new()))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, message }) => {
                assert_eq!(capability, "KeyValueStore");
                assert!(message.contains("desktop-shims"));
            }
            other => panic!("expected missing KeyValueStore, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_defaults() {
        let config = complete_builder().build().unwrap();

        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_builder_with_custom_clock() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let config = complete_builder()
            .clock(Arc::new(FixedClock(instant)))
            .build()
            .unwrap();

        assert_eq!(config.clock.now(), instant);
    }

    #[test]
    fn test_validate_rejects_zero_event_buffer() {
        let result = complete_builder().event_buffer_size(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_excessive_event_buffer() {
        let result = complete_builder()
            .event_buffer_size(MAX_EVENT_BUFFER_SIZE + 1)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));

        let config = complete_builder()
            .event_buffer_size(MAX_EVENT_BUFFER_SIZE)
            .build()
            .unwrap();
        assert_eq!(config.event_buffer_size, MAX_EVENT_BUFFER_SIZE);
    }

    #[test]
    fn test_validate_rejects_empty_database_path() {
        let result = complete_builder().database_path("").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_config_debug_hides_bridges() {
        let config = complete_builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("PlatformClient { ... }"));
        assert!(debug.contains("event_buffer_size: 100"));
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = complete_builder().event_buffer_size(42).build().unwrap();
        let cloned = config.clone();
        assert_eq!(cloned.event_buffer_size, 42);
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_default_store() {
        let base = std::env::temp_dir().join(format!("core-runtime-test-{}", uuid::Uuid::new_v4()));
        let db_path = base.join("sync-state.db");

        let config = CoreConfig::builder()
            .platform_client(Arc::new(MockClient::new()))
            .database_path(&db_path)
            .build()
            .expect("desktop default store should be created");

        let store = config.kv_store.clone();
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            store.set_string("sync.last_sync", "{}").await.unwrap();
            let value = store.get_string("sync.last_sync").await.unwrap();
            assert_eq!(value.as_deref(), Some("{}"));
        });

        drop(config);
        let _ = std::fs::remove_dir_all(&base);
    }

    #[cfg(feature = "desktop-shims")]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_build_with_desktop_default_store_inside_runtime() {
        let base = std::env::temp_dir().join(format!("core-runtime-test-{}", uuid::Uuid::new_v4()));
        let db_path = base.join("sync-state.db");

        let config = CoreConfig::builder()
            .platform_client(Arc::new(MockClient::new()))
            .database_path(&db_path)
            .build()
            .expect("desktop default store should be created inside runtime");

        config
            .kv_store
            .set_string("sync.versions", "{}")
            .await
            .expect("write inside runtime");
        assert!(config.kv_store.has_key("sync.versions").await.unwrap());

        drop(config);
        let _ = tokio::fs::remove_dir_all(&base).await;
    }
}
