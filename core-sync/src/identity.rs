//! # Identity & Version Hashing
//!
//! Correlates records from different platforms and fingerprints their content.
//!
//! ## Overview
//!
//! Two records reported by different platforms are considered the same
//! logical photo when their *identity hash* matches. The identity is built
//! from descriptive factors that survive re-uploads (file name, byte size,
//! capture time, camera make and model). Factors a platform does not report
//! are left out instead of being padded, and every present factor is tagged
//! with its field name, so `(filename="a", size=None)` and
//! `(filename=None, size="a")` can never collide.
//!
//! The *version* of a record fingerprints what may change between syncs
//! (content reference, descriptive metadata, modification time).
//!
//! All functions here are pure and deterministic. SHA-256 is used for
//! convenience; collision resistance is best-effort.

use bridge_traits::{ItemVersion, PhotoItem};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const FIELD_SEPARATOR: u8 = 0x1f;
const RECORD_SEPARATOR: u8 = 0x1e;

fn update_tagged(hasher: &mut Sha256, name: &str, value: &str) {
    hasher.update(name.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(value.as_bytes());
    hasher.update([RECORD_SEPARATOR]);
}

/// Cross-platform identity key of a record (hex SHA-256).
///
/// Records with equal present factors always produce the same key.
pub fn identity_hash(item: &PhotoItem) -> String {
    let factors: [(&str, Option<String>); 5] = [
        ("filename", Some(item.filename.clone())),
        ("size", item.size.map(|size| size.to_string())),
        ("created_at", item.created_at.map(|ts| ts.to_rfc3339())),
        ("camera_make", item.camera_make.clone()),
        ("camera_model", item.camera_model.clone()),
    ];

    let mut hasher = Sha256::new();
    for (name, value) in factors.iter() {
        if let Some(value) = value {
            update_tagged(&mut hasher, name, value);
        }
    }

    format!("{:x}", hasher.finalize())
}

/// Hash of the canonical (key-ordered) JSON encoding of a metadata map.
pub fn metadata_hash(metadata: &BTreeMap<String, Value>) -> String {
    let canonical = canonical_json(metadata);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of the record's current content, stamped with `at`.
pub fn compute_version(item: &PhotoItem, at: DateTime<Utc>) -> ItemVersion {
    let mut hasher = Sha256::new();
    update_tagged(&mut hasher, "id", &item.id);
    if let Some(url) = &item.url {
        update_tagged(&mut hasher, "url", url);
    }
    update_tagged(&mut hasher, "metadata", &canonical_json(&item.metadata));
    if let Some(ts) = item.effective_timestamp() {
        update_tagged(&mut hasher, "modified", &ts.to_rfc3339());
    }

    ItemVersion {
        hash: format!("{:x}", hasher.finalize()),
        timestamp: at,
        size: item.size.unwrap_or(0),
    }
}

fn canonical_json(metadata: &BTreeMap<String, Value>) -> String {
    // BTreeMap keys serialize in order; nested objects use serde_json's sorted map
    serde_json::to_string(metadata).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::SourcePlatform;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample(source: SourcePlatform) -> PhotoItem {
        PhotoItem::new("1", "IMG_0001.jpg", source)
            .with_size(2_048)
            .with_created_at(Utc.with_ymd_and_hms(2023, 5, 1, 10, 0, 0).unwrap())
            .with_camera("Canon", "EOS R5")
    }

    #[test]
    fn test_identity_is_stable_across_sources() {
        let a = sample(SourcePlatform::Flickr).with_metadata("title", json!("Beach"));
        let mut b = sample(SourcePlatform::GooglePhotos).with_url("https://x/1");
        b.id = "gp-77".to_string();

        assert_eq!(identity_hash(&a), identity_hash(&b));
        assert_eq!(identity_hash(&a).len(), 64);
    }

    #[test]
    fn test_identity_changes_with_present_factor() {
        let a = sample(SourcePlatform::Flickr);
        let b = sample(SourcePlatform::Flickr).with_size(4_096);
        assert_ne!(identity_hash(&a), identity_hash(&b));
    }

    #[test]
    fn test_identity_distinguishes_absent_from_shifted_factors() {
        let mut a = PhotoItem::new("1", "Canon", SourcePlatform::Flickr);
        a.camera_model = Some("EOS".to_string());

        let mut b = PhotoItem::new("1", "Canon", SourcePlatform::Flickr);
        b.camera_make = Some("EOS".to_string());

        assert_ne!(identity_hash(&a), identity_hash(&b));
    }

    #[test]
    fn test_metadata_hash_ignores_insertion_order() {
        let mut first = BTreeMap::new();
        first.insert("a".to_string(), json!(1));
        first.insert("b".to_string(), json!({"y": 2, "x": 1}));

        let mut second = BTreeMap::new();
        second.insert("b".to_string(), json!({"x": 1, "y": 2}));
        second.insert("a".to_string(), json!(1));

        assert_eq!(metadata_hash(&first), metadata_hash(&second));

        second.insert("c".to_string(), json!(null));
        assert_ne!(metadata_hash(&first), metadata_hash(&second));
    }

    #[test]
    fn test_compute_version() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let item = sample(SourcePlatform::Flickr).with_metadata("title", json!("Beach"));

        let version = compute_version(&item, at);
        assert_eq!(version.timestamp, at);
        assert_eq!(version.size, 2_048);
        assert_eq!(version, compute_version(&item, at));

        let edited = item.clone().with_metadata("title", json!("Sunset"));
        assert_ne!(compute_version(&edited, at).hash, version.hash);

        let unsized_item = PhotoItem::new("2", "b.png", SourcePlatform::Instagram);
        assert_eq!(compute_version(&unsized_item, at).size, 0);
    }
}
