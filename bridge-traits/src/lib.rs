//! Contracts between the sync engine and the application embedding it.
//!
//! The engine reads photo listings through [`PlatformClient`], keeps durable
//! state in a [`KeyValueStore`] and takes time from a [`Clock`]. Hosts pass
//! concrete adapters to `core_runtime::config::CoreConfig`; nothing here
//! holds global state. Every trait is `Send + Sync` so one adapter can serve
//! many concurrent sessions behind an `Arc`, and every fallible call returns
//! a [`BridgeError`].
//!
//! ```ignore
//! use async_trait::async_trait;
//! use bridge_traits::{error::Result, FetchOptions, PhotoItem, PlatformClient, SourcePlatform};
//!
//! struct FlickrClient {
//!     api: flickr::Api,
//! }
//!
//! #[async_trait]
//! impl PlatformClient for FlickrClient {
//!     async fn fetch_items(
//!         &self,
//!         _platform: &SourcePlatform,
//!         options: FetchOptions,
//!     ) -> Result<Vec<PhotoItem>> {
//!         let page = self.api.photos(options.since, options.limit).await?;
//!         Ok(page.into_iter().map(PhotoItem::from).collect())
//!     }
//! }
//! ```

pub mod error;
pub mod source;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use source::{FetchOptions, ItemVersion, PhotoItem, PlatformClient, SourcePlatform};
pub use storage::KeyValueStore;
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
