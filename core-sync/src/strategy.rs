//! # Resolution Strategies
//!
//! Deterministic rules for picking the authoritative record of a conflict,
//! plus one human-driven path.
//!
//! ## Strategies
//!
//! - **LatestTimestamp**: newest `last_modified` (falling back to `created_at`)
//! - **SourcePriority**: first platform in [`SOURCE_PRIORITY`]; unlisted platforms rank last
//! - **LargestSize**: largest reported byte size
//! - **HighestQuality**: best combined resolution, size and format score
//! - **MergeMetadata**: first record, overlaid with later records' metadata keys
//! - **KeepBoth**: no winner; every record is kept
//! - **Manual**: deferred to a caller through the pending queue
//!
//! Every automated strategy is side-effect free and total over a non-empty
//! input. Ties always go to the earliest record in input order.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::strategy::{resolve, ResolutionStrategy, StrategyOutcome};
//!
//! match resolve(ResolutionStrategy::SourcePriority, &conflict.items, now)? {
//!     StrategyOutcome::Resolved(resolution) => conflict.resolve(resolution)?,
//!     StrategyOutcome::Deferred => queue_for_review(conflict),
//! }
//! ```

use crate::error::{Result, SyncError};
use bridge_traits::{PhotoItem, SourcePlatform};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform ranking used by [`ResolutionStrategy::SourcePriority`]
pub const SOURCE_PRIORITY: [SourcePlatform; 5] = [
    SourcePlatform::GooglePhotos,
    SourcePlatform::Flickr,
    SourcePlatform::Facebook,
    SourcePlatform::Instagram,
    SourcePlatform::FiveHundredPx,
];

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// How a conflict is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    #[default]
    LatestTimestamp,
    SourcePriority,
    LargestSize,
    HighestQuality,
    MergeMetadata,
    KeepBoth,
    Manual,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::LatestTimestamp => "latest_timestamp",
            ResolutionStrategy::SourcePriority => "source_priority",
            ResolutionStrategy::LargestSize => "largest_size",
            ResolutionStrategy::HighestQuality => "highest_quality",
            ResolutionStrategy::MergeMetadata => "merge_metadata",
            ResolutionStrategy::KeepBoth => "keep_both",
            ResolutionStrategy::Manual => "manual",
        }
    }

    /// Whether the strategy resolves without a caller
    pub fn is_automatic(&self) -> bool {
        !matches!(self, ResolutionStrategy::Manual)
    }
}

impl FromStr for ResolutionStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "latest_timestamp" => Ok(ResolutionStrategy::LatestTimestamp),
            "source_priority" => Ok(ResolutionStrategy::SourcePriority),
            "largest_size" => Ok(ResolutionStrategy::LargestSize),
            "highest_quality" => Ok(ResolutionStrategy::HighestQuality),
            "merge_metadata" => Ok(ResolutionStrategy::MergeMetadata),
            "keep_both" => Ok(ResolutionStrategy::KeepBoth),
            "manual" => Ok(ResolutionStrategy::Manual),
            _ => Err(SyncError::InvalidStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records chosen by a resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum ResolutionSelection {
    /// One authoritative record
    Single(PhotoItem),
    /// Several records kept side by side
    Multiple(Vec<PhotoItem>),
}

impl ResolutionSelection {
    /// Selected records in order
    pub fn items(&self) -> Vec<&PhotoItem> {
        match self {
            ResolutionSelection::Single(item) => vec![item],
            ResolutionSelection::Multiple(items) => items.iter().collect(),
        }
    }
}

/// The outcome of resolving a conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub strategy: ResolutionStrategy,
    pub selection: ResolutionSelection,
    /// Human-readable explanation
    pub reason: String,
    pub resolved_at: DateTime<Utc>,
}

/// Result of running a strategy
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Resolved(Resolution),
    /// Left for manual resolution
    Deferred,
}

/// Resolve `items` with `strategy`.
///
/// # Errors
///
/// Returns [`SyncError::InvalidInput`] when `items` is empty.
pub fn resolve(
    strategy: ResolutionStrategy,
    items: &[PhotoItem],
    at: DateTime<Utc>,
) -> Result<StrategyOutcome> {
    ensure_not_empty(items)?;

    let (selection, reason) = match strategy {
        ResolutionStrategy::LatestTimestamp => {
            let winner = resolve_by_latest_timestamp(items)?;
            let reason = format!(
                "Selected most recently modified record from {}",
                winner.source
            );
            (ResolutionSelection::Single(winner), reason)
        }
        ResolutionStrategy::SourcePriority => {
            let winner = resolve_by_source_priority(items)?;
            let reason = format!("Selected record from highest priority source {}", winner.source);
            (ResolutionSelection::Single(winner), reason)
        }
        ResolutionStrategy::LargestSize => {
            let winner = resolve_by_largest_size(items)?;
            let reason = format!(
                "Selected largest record ({} bytes) from {}",
                winner.size.unwrap_or(0),
                winner.source
            );
            (ResolutionSelection::Single(winner), reason)
        }
        ResolutionStrategy::HighestQuality => {
            let winner = resolve_by_highest_quality(items)?;
            let reason = format!(
                "Selected highest quality record (score {:.2}) from {}",
                quality_score(&winner),
                winner.source
            );
            (ResolutionSelection::Single(winner), reason)
        }
        ResolutionStrategy::MergeMetadata => {
            let merged = resolve_by_merge_metadata(items)?;
            let reason = format!("Merged metadata from {} records", items.len());
            (ResolutionSelection::Single(merged), reason)
        }
        ResolutionStrategy::KeepBoth => {
            let reason = format!("Kept all {} records", items.len());
            (ResolutionSelection::Multiple(resolve_by_keep_both(items)), reason)
        }
        ResolutionStrategy::Manual => return Ok(StrategyOutcome::Deferred),
    };

    Ok(StrategyOutcome::Resolved(Resolution {
        strategy,
        selection,
        reason,
        resolved_at: at,
    }))
}

fn ensure_not_empty(items: &[PhotoItem]) -> Result<()> {
    if items.is_empty() {
        return Err(SyncError::InvalidInput {
            field: "items".to_string(),
            message: "Cannot resolve a conflict without records".to_string(),
        });
    }
    Ok(())
}

/// First record maximizing `key`; later records must be strictly better to win
fn select_max_by<K, F>(items: &[PhotoItem], key: F) -> Result<PhotoItem>
where
    K: PartialOrd,
    F: Fn(&PhotoItem) -> K,
{
    ensure_not_empty(items)?;

    let mut best = &items[0];
    let mut best_key = key(best);
    for item in &items[1..] {
        let candidate = key(item);
        if candidate > best_key {
            best = item;
            best_key = candidate;
        }
    }

    Ok(best.clone())
}

pub fn resolve_by_latest_timestamp(items: &[PhotoItem]) -> Result<PhotoItem> {
    select_max_by(items, |item| item.effective_timestamp())
}

pub fn resolve_by_source_priority(items: &[PhotoItem]) -> Result<PhotoItem> {
    // Lower rank is better, so negate for the max search
    select_max_by(items, |item| -(source_rank(&item.source) as i64))
}

pub fn resolve_by_largest_size(items: &[PhotoItem]) -> Result<PhotoItem> {
    select_max_by(items, |item| item.size.unwrap_or(0))
}

pub fn resolve_by_highest_quality(items: &[PhotoItem]) -> Result<PhotoItem> {
    select_max_by(items, quality_score)
}

/// Clone of the first record with later records' metadata keys written over it
pub fn resolve_by_merge_metadata(items: &[PhotoItem]) -> Result<PhotoItem> {
    ensure_not_empty(items)?;

    let mut merged = items[0].clone();
    for item in &items[1..] {
        for (key, value) in &item.metadata {
            merged.metadata.insert(key.clone(), value.clone());
        }
    }

    Ok(merged)
}

pub fn resolve_by_keep_both(items: &[PhotoItem]) -> Vec<PhotoItem> {
    items.to_vec()
}

/// Position in [`SOURCE_PRIORITY`]; unlisted platforms rank after all listed ones
pub fn source_rank(source: &SourcePlatform) -> usize {
    SOURCE_PRIORITY
        .iter()
        .position(|candidate| candidate == source)
        .unwrap_or(SOURCE_PRIORITY.len())
}

/// Score of an image format name (case-insensitive)
pub fn format_score(format: &str) -> f64 {
    match format.to_lowercase().as_str() {
        "png" => 10.0,
        "tiff" | "tif" => 9.0,
        "jpg" | "jpeg" => 7.0,
        "webp" => 6.0,
        "gif" => 3.0,
        _ => 0.0,
    }
}

/// Combined quality score: resolution in megapixel-ish units, size in MiB and format
pub fn quality_score(item: &PhotoItem) -> f64 {
    let resolution = match (item.width, item.height) {
        (Some(w), Some(h)) => (w as f64 * h as f64).sqrt() / 1000.0,
        _ => 0.0,
    };
    let size = item.size.unwrap_or(0) as f64 / BYTES_PER_MIB;

    let format = item.format.clone().or_else(|| {
        item.filename
            .rsplit_once('.')
            .map(|(_, extension)| extension.to_string())
    });
    let format = format.map(|f| format_score(&f)).unwrap_or(0.0);

    resolution + size + format
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn item(id: &str, source: SourcePlatform) -> PhotoItem {
        PhotoItem::new(id, format!("{}.jpg", id), source)
    }

    fn single(outcome: StrategyOutcome) -> PhotoItem {
        match outcome {
            StrategyOutcome::Resolved(Resolution {
                selection: ResolutionSelection::Single(item),
                ..
            }) => item,
            other => panic!("expected single selection, got {:?}", other),
        }
    }

    #[test]
    fn test_strategy_names_round_trip() {
        for strategy in [
            ResolutionStrategy::LatestTimestamp,
            ResolutionStrategy::SourcePriority,
            ResolutionStrategy::LargestSize,
            ResolutionStrategy::HighestQuality,
            ResolutionStrategy::MergeMetadata,
            ResolutionStrategy::KeepBoth,
            ResolutionStrategy::Manual,
        ] {
            assert_eq!(strategy.as_str().parse::<ResolutionStrategy>().unwrap(), strategy);
        }
        assert!("coin_flip".parse::<ResolutionStrategy>().is_err());
        assert_eq!(
            serde_json::to_string(&ResolutionStrategy::KeepBoth).unwrap(),
            "\"keep_both\""
        );
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let result = resolve(ResolutionStrategy::LatestTimestamp, &[], ts(1));
        assert!(matches!(result, Err(SyncError::InvalidInput { .. })));
        assert!(resolve_by_merge_metadata(&[]).is_err());
    }

    #[test]
    fn test_latest_timestamp_is_deterministic_and_stable() {
        let items = vec![
            item("a", SourcePlatform::Flickr).with_created_at(ts(3)),
            item("b", SourcePlatform::Facebook).with_created_at(ts(1)).with_last_modified(ts(5)),
            item("c", SourcePlatform::Instagram).with_last_modified(ts(5)),
        ];

        let first = single(resolve(ResolutionStrategy::LatestTimestamp, &items, ts(9)).unwrap());
        let second = single(resolve(ResolutionStrategy::LatestTimestamp, &items, ts(9)).unwrap());
        assert_eq!(first.id, "b");
        assert_eq!(first, second);
    }

    #[test]
    fn test_latest_timestamp_prefers_dated_records() {
        let items = vec![
            item("undated", SourcePlatform::Flickr),
            item("dated", SourcePlatform::Flickr).with_created_at(ts(1)),
        ];
        assert_eq!(resolve_by_latest_timestamp(&items).unwrap().id, "dated");
    }

    #[test]
    fn test_source_priority() {
        let items = vec![
            item("other", SourcePlatform::Other("smugmug".to_string())),
            item("flickr", SourcePlatform::Flickr),
            item("google", SourcePlatform::GooglePhotos),
        ];
        assert_eq!(resolve_by_source_priority(&items).unwrap().id, "google");

        let unlisted = vec![
            item("x", SourcePlatform::Other("x".to_string())),
            item("y", SourcePlatform::Other("y".to_string())),
        ];
        assert_eq!(resolve_by_source_priority(&unlisted).unwrap().id, "x");
        assert_eq!(source_rank(&SourcePlatform::FiveHundredPx), 4);
    }

    #[test]
    fn test_largest_size_ties_go_to_first() {
        let items = vec![
            item("a", SourcePlatform::Flickr).with_size(10),
            item("b", SourcePlatform::Flickr).with_size(20),
            item("c", SourcePlatform::Flickr).with_size(20),
            item("d", SourcePlatform::Flickr),
        ];
        assert_eq!(resolve_by_largest_size(&items).unwrap().id, "b");
    }

    #[test]
    fn test_highest_quality() {
        let jpeg = item("jpeg", SourcePlatform::Flickr)
            .with_dimensions(4000, 3000)
            .with_size(3 * 1024 * 1024);
        let png = PhotoItem::new("png", "shot.PNG", SourcePlatform::Flickr)
            .with_dimensions(1000, 1000)
            .with_size(1024 * 1024);

        // jpeg: 3.46 + 3 + 7, png: 1 + 1 + 10
        assert!(quality_score(&jpeg) > quality_score(&png));
        assert_eq!(
            resolve_by_highest_quality(&[png.clone(), jpeg.clone()]).unwrap().id,
            "jpeg"
        );

        let explicit = png.clone().with_format("gif");
        assert_eq!(quality_score(&explicit), 1.0 + 1.0 + 3.0);
        assert_eq!(format_score("TIF"), 9.0);
        assert_eq!(format_score("heic"), 0.0);
    }

    #[test]
    fn test_merge_metadata_precedence() {
        let items = vec![
            item("a", SourcePlatform::Flickr)
                .with_metadata("a", json!(1))
                .with_metadata("b", json!(2)),
            item("b", SourcePlatform::GooglePhotos)
                .with_metadata("b", json!(3))
                .with_metadata("c", json!(4)),
        ];

        let merged = resolve_by_merge_metadata(&items).unwrap();
        assert_eq!(merged.id, "a");
        assert_eq!(merged.metadata.get("a"), Some(&json!(1)));
        assert_eq!(merged.metadata.get("b"), Some(&json!(3)));
        assert_eq!(merged.metadata.get("c"), Some(&json!(4)));
        assert_eq!(merged.metadata.len(), 3);
    }

    #[test]
    fn test_keep_both_returns_identical_items() {
        let items = vec![
            item("a", SourcePlatform::Flickr),
            item("b", SourcePlatform::GooglePhotos),
        ];

        match resolve(ResolutionStrategy::KeepBoth, &items, ts(2)).unwrap() {
            StrategyOutcome::Resolved(resolution) => {
                assert_eq!(resolution.selection, ResolutionSelection::Multiple(items.clone()));
                assert_eq!(resolution.strategy, ResolutionStrategy::KeepBoth);
                assert_eq!(resolution.resolved_at, ts(2));
            }
            StrategyOutcome::Deferred => panic!("keep_both must resolve"),
        }
    }

    #[test]
    fn test_manual_is_deferred() {
        let items = vec![item("a", SourcePlatform::Flickr)];
        assert_eq!(
            resolve(ResolutionStrategy::Manual, &items, ts(1)).unwrap(),
            StrategyOutcome::Deferred
        );
        assert!(!ResolutionStrategy::Manual.is_automatic());
    }
}
