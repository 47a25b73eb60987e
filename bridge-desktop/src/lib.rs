//! Desktop adapters for the host bridges.
//!
//! Only storage has a desktop default: [`SqliteKeyValueStore`] keeps sync
//! state in a single SQLite table. Platform clients always come from the
//! host application.
//!
//! ```ignore
//! let store = SqliteKeyValueStore::new(data_dir.join("sync-state.db")).await?;
//! let config = CoreConfig::builder()
//!     .platform_client(client)
//!     .kv_store(Arc::new(store))
//!     .build()?;
//! ```

mod kv_store;

pub use kv_store::SqliteKeyValueStore;
