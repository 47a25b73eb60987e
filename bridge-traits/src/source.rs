//! Photo Source Abstractions
//!
//! Defines the record shape reported by external photo platforms and the
//! client trait the sync engine uses to collect those records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Result;

/// External platform a photo record was reported by.
///
/// The named variants are the platforms the engine ranks explicitly; any
/// other platform is carried as [`SourcePlatform::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourcePlatform {
    GooglePhotos,
    Flickr,
    Facebook,
    Instagram,
    FiveHundredPx,
    Other(String),
}

impl SourcePlatform {
    /// Stable identifier used in storage keys and events
    pub fn as_str(&self) -> &str {
        match self {
            SourcePlatform::GooglePhotos => "google_photos",
            SourcePlatform::Flickr => "flickr",
            SourcePlatform::Facebook => "facebook",
            SourcePlatform::Instagram => "instagram",
            SourcePlatform::FiveHundredPx => "500px",
            SourcePlatform::Other(name) => name.as_str(),
        }
    }
}

impl From<&str> for SourcePlatform {
    fn from(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "google_photos" => SourcePlatform::GooglePhotos,
            "flickr" => SourcePlatform::Flickr,
            "facebook" => SourcePlatform::Facebook,
            "instagram" => SourcePlatform::Instagram,
            "500px" => SourcePlatform::FiveHundredPx,
            _ => SourcePlatform::Other(value.to_string()),
        }
    }
}

impl From<String> for SourcePlatform {
    fn from(value: String) -> Self {
        SourcePlatform::from(value.as_str())
    }
}

impl From<SourcePlatform> for String {
    fn from(value: SourcePlatform) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for SourcePlatform {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(SourcePlatform::from(s))
    }
}

impl fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content fingerprint of a photo record at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemVersion {
    /// Hash over the record's descriptive fields and content reference
    pub hash: String,
    /// When this version was computed
    pub timestamp: DateTime<Utc>,
    /// Reported byte size (0 when unknown)
    pub size: u64,
}

/// A photo record as reported by one platform.
///
/// Only `id`, `filename`, `source` and `metadata` are always present. Every
/// other field is optional because platforms differ in what they expose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoItem {
    /// Platform-local identifier
    pub id: String,
    /// File name as reported by the platform
    pub filename: String,
    /// Platform that reported this record
    pub source: SourcePlatform,
    /// Free-form descriptive metadata (title, tags, location, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Size in bytes
    pub size: Option<u64>,
    /// Capture/creation time
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time on the platform
    pub last_modified: Option<DateTime<Utc>>,
    /// Content URL
    pub url: Option<String>,
    /// Pixel width
    pub width: Option<u32>,
    /// Pixel height
    pub height: Option<u32>,
    /// Image format (e.g. "jpeg", "png")
    pub format: Option<String>,
    /// Camera manufacturer from EXIF
    pub camera_make: Option<String>,
    /// Camera model from EXIF
    pub camera_model: Option<String>,
    /// Previously recorded version, if the engine has seen this record before
    pub version: Option<ItemVersion>,
}

impl PhotoItem {
    /// Create a record with only the required fields set
    pub fn new(id: impl Into<String>, filename: impl Into<String>, source: SourcePlatform) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            source,
            metadata: BTreeMap::new(),
            size: None,
            created_at: None,
            last_modified: None,
            url: None,
            width: None,
            height: None,
            format: None,
            camera_make: None,
            camera_model: None,
            version: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_camera(mut self, make: impl Into<String>, model: impl Into<String>) -> Self {
        self.camera_make = Some(make.into());
        self.camera_model = Some(model.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The record's effective modification time (`last_modified`, falling
    /// back to `created_at`)
    pub fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_modified.or(self.created_at)
    }
}

/// Options for a single collection request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Only return records changed after this instant. `None` requests a full listing.
    pub since: Option<DateTime<Utc>>,
    /// Maximum number of records to return
    pub limit: usize,
    /// Whether descriptive metadata should be included
    pub include_metadata: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            since: None,
            limit: 1000,
            include_metadata: true,
        }
    }
}

/// Platform data-fetch client
///
/// Retrieves raw photo listings from external platforms. Implementations
/// must honour `since` for incremental collection.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::source::{FetchOptions, PlatformClient, SourcePlatform};
///
/// async fn count_new(client: &dyn PlatformClient, since: DateTime<Utc>) -> Result<usize> {
///     let options = FetchOptions { since: Some(since), ..FetchOptions::default() };
///     let items = client.fetch_items(&SourcePlatform::Flickr, options).await?;
///     Ok(items.len())
/// }
/// ```
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch photo records from `platform`
    async fn fetch_items(
        &self,
        platform: &SourcePlatform,
        options: FetchOptions,
    ) -> Result<Vec<PhotoItem>>;
}
