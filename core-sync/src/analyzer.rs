//! # Conflict Analyzer
//!
//! Groups collected records by identity and classifies disagreements.
//!
//! ## Overview
//!
//! Records reported by several platforms are flattened (platform order, then
//! item order) and grouped by [`identity_hash`]. Every group of two or more
//! records runs through four independent detectors:
//!
//! - **Metadata**: descriptive metadata differs
//! - **Content**: recorded version hashes differ
//! - **Timestamp**: effective modification times differ (a missing time counts as a value)
//! - **Version**: recorded version timestamps differ
//!
//! Only records that carry a recorded version take part in the content and
//! version detectors.
//!
//! ## Severity
//!
//! Severity starts at 1 and grows with the kinds of disagreement and the
//! group size:
//!
//! | Factor | Weight |
//! |---|---|
//! | content | +3 |
//! | version | +2 |
//! | metadata | +1 |
//! | each record beyond two | +1 (at most +3) |
//!
//! The result is clamped to 1..=10.

use crate::error::{Result, SyncError};
use crate::identity::{identity_hash, metadata_hash};
use crate::strategy::Resolution;
use bridge_traits::{PhotoItem, SourcePlatform};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Lowest possible severity
pub const MIN_SEVERITY: u8 = 1;

/// Highest possible severity
pub const MAX_SEVERITY: u8 = 10;

// ============================================================================
// ID Types
// ============================================================================

/// Identifier assigned to a conflict at detection time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

impl ConflictId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for ConflictId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s).map(Self).map_err(|e| SyncError::InvalidInput {
            field: "conflict_id".to_string(),
            message: e.to_string(),
        })
    }
}

// ============================================================================
// Conflict Types
// ============================================================================

/// Kind of disagreement found within an identity group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    MetadataConflict,
    ContentConflict,
    TimestampConflict,
    VersionConflict,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::MetadataConflict => "metadata_conflict",
            ConflictType::ContentConflict => "content_conflict",
            ConflictType::TimestampConflict => "timestamp_conflict",
            ConflictType::VersionConflict => "version_conflict",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records that share one identity but disagree.
///
/// `resolved` and `resolution` only change together through
/// [`Conflict::resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique identifier
    pub id: ConflictId,
    /// Shared identity hash of the records
    pub identity: String,
    /// Detected disagreement kinds (never empty)
    pub types: BTreeSet<ConflictType>,
    /// The disagreeing records (at least two)
    pub items: Vec<PhotoItem>,
    /// Severity, 1..=10
    pub severity: u8,
    /// When the conflict was detected
    pub detected_at: DateTime<Utc>,
    resolved: bool,
    resolution: Option<Resolution>,
}

impl Conflict {
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    /// Record the resolution of this conflict
    ///
    /// # Errors
    ///
    /// Returns an error if the conflict was already resolved
    pub fn resolve(&mut self, resolution: Resolution) -> Result<()> {
        if self.resolved {
            return Err(SyncError::InvalidStateTransition {
                from: "resolved".to_string(),
                to: "resolved".to_string(),
                reason: format!("Conflict {} is already resolved", self.id),
            });
        }

        self.resolved = true;
        self.resolution = Some(resolution);
        Ok(())
    }

    /// Platforms involved in this conflict, in record order without repeats
    pub fn sources(&self) -> Vec<SourcePlatform> {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .filter(|item| seen.insert(item.source.clone()))
            .map(|item| item.source.clone())
            .collect()
    }
}

// ============================================================================
// Grouping & Analysis
// ============================================================================

/// Flatten per-platform batches and group records by identity.
///
/// Groups are returned in first-seen order and keep the records' relative
/// order.
pub fn group_by_identity(
    batches: &[(SourcePlatform, Vec<PhotoItem>)],
) -> Vec<(String, Vec<PhotoItem>)> {
    let mut groups: Vec<(String, Vec<PhotoItem>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for item in batches.iter().flat_map(|(_, items)| items.iter()) {
        let identity = identity_hash(item);
        match index.get(&identity) {
            Some(&position) => groups[position].1.push(item.clone()),
            None => {
                index.insert(identity.clone(), groups.len());
                groups.push((identity, vec![item.clone()]));
            }
        }
    }

    groups
}

/// Classify one identity group.
///
/// Returns `None` for groups of fewer than two records or when every
/// detector agrees.
pub fn analyze(identity: &str, items: &[PhotoItem], at: DateTime<Utc>) -> Option<Conflict> {
    if items.len() < 2 {
        return None;
    }

    let types = detect_types(items);
    if types.is_empty() {
        return None;
    }

    Some(Conflict {
        id: ConflictId::new(),
        identity: identity.to_string(),
        severity: severity(&types, items.len()),
        types,
        items: items.to_vec(),
        detected_at: at,
        resolved: false,
        resolution: None,
    })
}

/// Run every detector over a group
pub fn detect_types(items: &[PhotoItem]) -> BTreeSet<ConflictType> {
    let mut types = BTreeSet::new();

    let metadata: HashSet<String> = items.iter().map(|i| metadata_hash(&i.metadata)).collect();
    if metadata.len() > 1 {
        types.insert(ConflictType::MetadataConflict);
    }

    let content: HashSet<&str> = items
        .iter()
        .filter_map(|i| i.version.as_ref().map(|v| v.hash.as_str()))
        .collect();
    if content.len() > 1 {
        types.insert(ConflictType::ContentConflict);
    }

    let timestamps: HashSet<Option<DateTime<Utc>>> =
        items.iter().map(|i| i.effective_timestamp()).collect();
    if timestamps.len() > 1 {
        types.insert(ConflictType::TimestampConflict);
    }

    let versions: HashSet<DateTime<Utc>> = items
        .iter()
        .filter_map(|i| i.version.as_ref().map(|v| v.timestamp))
        .collect();
    if versions.len() > 1 {
        types.insert(ConflictType::VersionConflict);
    }

    types
}

/// Severity score for a set of disagreement kinds over `item_count` records
pub fn severity(types: &BTreeSet<ConflictType>, item_count: usize) -> u8 {
    let mut score: usize = 1;

    if types.contains(&ConflictType::ContentConflict) {
        score += 3;
    }
    if types.contains(&ConflictType::VersionConflict) {
        score += 2;
    }
    if types.contains(&ConflictType::MetadataConflict) {
        score += 1;
    }
    score += item_count.saturating_sub(2).min(3);

    score.clamp(MIN_SEVERITY as usize, MAX_SEVERITY as usize) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{ResolutionSelection, ResolutionStrategy};
    use bridge_traits::ItemVersion;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()
    }

    fn photo(id: &str, source: SourcePlatform) -> PhotoItem {
        PhotoItem::new(id, "IMG_0042.jpg", source)
            .with_size(1_000)
            .with_created_at(Utc.with_ymd_and_hms(2023, 7, 4, 18, 30, 0).unwrap())
    }

    fn version(hash: &str, day: u32) -> ItemVersion {
        ItemVersion {
            hash: hash.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            size: 1_000,
        }
    }

    #[test]
    fn test_group_by_identity_preserves_first_seen_order() {
        let batches = vec![
            (
                SourcePlatform::Flickr,
                vec![
                    photo("f-1", SourcePlatform::Flickr),
                    PhotoItem::new("f-2", "other.png", SourcePlatform::Flickr),
                ],
            ),
            (
                SourcePlatform::GooglePhotos,
                vec![photo("g-1", SourcePlatform::GooglePhotos)],
            ),
        ];

        let groups = group_by_identity(&batches);
        assert_eq!(groups.len(), 2);

        let ids: Vec<&str> = groups[0].1.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["f-1", "g-1"]);
        assert_eq!(groups[1].1[0].id, "f-2");
    }

    #[test]
    fn test_metadata_only_difference() {
        let items = vec![
            photo("f-1", SourcePlatform::Flickr).with_metadata("title", json!("Beach")),
            photo("g-1", SourcePlatform::GooglePhotos).with_metadata("title", json!("Sunset")),
        ];

        let conflict = analyze("identity", &items, at()).expect("conflict");
        assert_eq!(
            conflict.types,
            BTreeSet::from([ConflictType::MetadataConflict])
        );
        assert_eq!(conflict.severity, 2);
        assert!(!conflict.is_resolved());
        assert!(conflict.resolution().is_none());
        assert_eq!(conflict.detected_at, at());
    }

    #[test]
    fn test_identical_group_has_no_conflict() {
        let items = vec![
            photo("f-1", SourcePlatform::Flickr),
            photo("g-1", SourcePlatform::GooglePhotos),
        ];
        assert!(analyze("identity", &items, at()).is_none());
        assert!(analyze("identity", &items[..1], at()).is_none());
    }

    #[test]
    fn test_missing_timestamp_counts_as_value() {
        let mut undated = photo("g-1", SourcePlatform::GooglePhotos);
        undated.created_at = None;
        let items = vec![photo("f-1", SourcePlatform::Flickr), undated];

        assert_eq!(
            detect_types(&items),
            BTreeSet::from([ConflictType::TimestampConflict])
        );
    }

    #[test]
    fn test_unversioned_items_do_not_raise_content_conflicts() {
        let mut versioned = photo("f-1", SourcePlatform::Flickr);
        versioned.version = Some(version("aaa", 1));
        let items = vec![versioned, photo("g-1", SourcePlatform::GooglePhotos)];

        assert!(detect_types(&items).is_empty());
    }

    #[test]
    fn test_content_and_version_conflicts() {
        let mut a = photo("f-1", SourcePlatform::Flickr);
        a.version = Some(version("aaa", 1));
        let mut b = photo("g-1", SourcePlatform::GooglePhotos);
        b.version = Some(version("bbb", 2));

        let conflict = analyze("identity", &[a, b], at()).expect("conflict");
        assert_eq!(
            conflict.types,
            BTreeSet::from([ConflictType::ContentConflict, ConflictType::VersionConflict])
        );
        assert_eq!(conflict.severity, 6);
    }

    #[test]
    fn test_severity_bounds() {
        let all = BTreeSet::from([
            ConflictType::MetadataConflict,
            ConflictType::ContentConflict,
            ConflictType::TimestampConflict,
            ConflictType::VersionConflict,
        ]);
        assert_eq!(severity(&all, 2), 7);
        assert_eq!(severity(&all, 5), 10);
        assert_eq!(severity(&all, 50), 10);
        assert_eq!(severity(&BTreeSet::new(), 0), 1);
        assert_eq!(
            severity(&BTreeSet::from([ConflictType::TimestampConflict]), 3),
            2
        );
    }

    #[test]
    fn test_resolve_sets_resolution_once() {
        let items = vec![
            photo("f-1", SourcePlatform::Flickr).with_metadata("a", json!(1)),
            photo("g-1", SourcePlatform::GooglePhotos),
        ];
        let mut conflict = analyze("identity", &items, at()).expect("conflict");

        let resolution = Resolution {
            strategy: ResolutionStrategy::KeepBoth,
            selection: ResolutionSelection::Multiple(items.clone()),
            reason: "Keeping both".to_string(),
            resolved_at: at(),
        };

        conflict.resolve(resolution.clone()).unwrap();
        assert!(conflict.is_resolved());
        assert_eq!(conflict.resolution(), Some(&resolution));
        assert!(conflict.resolve(resolution).is_err());
    }

    #[test]
    fn test_conflict_sources_and_serialization() {
        let items = vec![
            photo("f-1", SourcePlatform::Flickr).with_metadata("a", json!(1)),
            photo("f-2", SourcePlatform::Flickr),
            photo("g-1", SourcePlatform::GooglePhotos),
        ];
        let conflict = analyze("identity", &items, at()).expect("conflict");
        assert_eq!(
            conflict.sources(),
            vec![SourcePlatform::Flickr, SourcePlatform::GooglePhotos]
        );

        let json = serde_json::to_string(&conflict).unwrap();
        assert!(json.contains("metadata_conflict"));
        let back: Conflict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, conflict);
    }
}
