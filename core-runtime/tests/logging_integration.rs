//! Integration tests for logging configuration and redaction helpers

use bridge_traits::time::LogLevel;
use core_runtime::logging::{redact_if_sensitive, strip_path, LogFormat, LoggingConfig};

#[test]
fn test_config_builder() {
    // Only one subscriber can be installed per process, so only the builder is exercised here
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Debug)
        .with_pii_redaction(true)
        .with_spans(true);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Debug);
    assert!(config.redact_pii);
    assert!(config.enable_spans);
}

#[test]
fn test_platform_credentials_are_redacted() {
    assert_eq!(redact_if_sensitive("api_key", "flickr-3f9a"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("oauth_token", "ya29.a0Af"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("Authorization", "Bearer abc"), "[REDACTED]");
}

#[test]
fn test_signed_photo_urls_lose_their_query() {
    let url = "https://lh3.googleusercontent.com/p/AF1Q?sig=abc&expires=1700000000";
    let redacted = redact_if_sensitive("url", url);

    assert_eq!(redacted, "https://lh3.googleusercontent.com/p/AF1Q?[REDACTED]");
    assert!(!redacted.contains("sig="));

    let plain = "https://farm66.staticflickr.com/65535/photo.jpg";
    assert_eq!(redact_if_sensitive("url", plain), plain);
}

#[test]
fn test_owner_emails_are_partially_redacted() {
    let redacted = redact_if_sensitive("owner", "ana@example.com");

    assert!(redacted.starts_with('a'));
    assert!(redacted.contains("[REDACTED]"));
    assert!(!redacted.contains("example.com"));
}

#[test]
fn test_photo_fields_pass_through() {
    assert_eq!(redact_if_sensitive("item_id", "f-1"), "f-1");
    assert_eq!(redact_if_sensitive("title", "Sunset over Lisbon"), "Sunset over Lisbon");
    assert_eq!(redact_if_sensitive("platform", "google_photos"), "google_photos");
}

#[test]
fn test_path_stripping() {
    assert_eq!(strip_path("/home/ana/.local/share/photo-sync/state.db"), "state.db");
    assert_eq!(strip_path("C:\\Users\\Ana\\Pictures\\IMG_0001.jpg"), "IMG_0001.jpg");
    assert_eq!(strip_path("IMG_0001.jpg"), "IMG_0001.jpg");
    assert_eq!(strip_path("/var/cache/"), "");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_default_format_follows_build_profile() {
    #[cfg(debug_assertions)]
    assert_eq!(LoggingConfig::default().format, LogFormat::Pretty);

    #[cfg(not(debug_assertions))]
    assert_eq!(LoggingConfig::default().format, LogFormat::Json);
}

#[test]
fn test_custom_filter_is_kept_verbatim() {
    let config = LoggingConfig::default().with_filter("core_sync=trace,sqlx=warn");
    assert_eq!(config.filter, Some("core_sync=trace,sqlx=warn".to_string()));
}
