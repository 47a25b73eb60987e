//! Sync engine demonstration
//!
//! Runs two sessions against canned platform data: one resolved
//! automatically and one left for manual resolution.
//!
//! Run with:
//! ```bash
//! cargo run -p core-sync --example sync_demo
//! ```

use anyhow::Context;
use async_trait::async_trait;
use bridge_desktop::SqliteKeyValueStore;
use bridge_traits::{
    error::Result as BridgeResult, FetchOptions, LogLevel, PhotoItem, PlatformClient,
    SourcePlatform,
};
use chrono::{TimeZone, Utc};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, EventStream};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_sync::{
    ManualResolution, ResolutionSelection, ResolutionStrategy, SessionStatus, StartSyncOptions,
    SyncConfig, SyncCoordinator,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Serves the same sunset photo from two platforms with different titles
struct DemoClient;

#[async_trait]
impl PlatformClient for DemoClient {
    async fn fetch_items(
        &self,
        platform: &SourcePlatform,
        _options: FetchOptions,
    ) -> BridgeResult<Vec<PhotoItem>> {
        let title = match platform {
            SourcePlatform::Flickr => "Sunset over Lisbon",
            _ => "Lisbon, evening",
        };

        let photo = PhotoItem::new(
            format!("{}-0001", platform.as_str()),
            "IMG_0001.jpg",
            platform.clone(),
        )
        .with_size(3_145_728)
        .with_created_at(Utc.with_ymd_and_hms(2023, 9, 14, 19, 42, 0).unwrap())
        .with_camera("Fujifilm", "X-T4")
        .with_format("jpeg")
        .with_metadata("title", json!(title));

        Ok(vec![photo])
    }
}

async fn wait_until_finished(
    coordinator: &SyncCoordinator,
    session_id: core_sync::SyncSessionId,
) -> anyhow::Result<()> {
    loop {
        let session = coordinator.get_sync_status(session_id).await?;
        if session.status.is_terminal() || session.awaiting_resolution {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_level(LogLevel::Info),
    )
    .context("failed to initialize logging")?;

    let kv_store = Arc::new(SqliteKeyValueStore::in_memory().await?);
    let core_config = CoreConfig::builder()
        .platform_client(Arc::new(DemoClient))
        .kv_store(kv_store)
        .build()?;

    let event_bus = Arc::new(EventBus::new(core_config.event_buffer_size));
    let mut events = EventStream::new(event_bus.subscribe());
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                CoreEvent::Sync(_) => info!(session = event.session_id(), "{}", event.description()),
                CoreEvent::Conflict(_) => info!(
                    conflict = event.conflict_id().unwrap_or("-"),
                    "{}",
                    event.description()
                ),
            }
        }
    });

    let coordinator =
        SyncCoordinator::new(SyncConfig::default(), &core_config, Arc::clone(&event_bus)).await?;
    let platforms = vec![SourcePlatform::Flickr, SourcePlatform::GooglePhotos];

    // Automatic resolution
    let automatic = coordinator
        .start_sync(
            platforms.clone(),
            StartSyncOptions {
                strategy: Some(ResolutionStrategy::SourcePriority),
                ..StartSyncOptions::default()
            },
        )
        .await?;
    wait_until_finished(&coordinator, automatic).await?;

    // Manual resolution
    let manual = coordinator
        .start_sync(
            platforms,
            StartSyncOptions {
                strategy: Some(ResolutionStrategy::Manual),
                ..StartSyncOptions::default()
            },
        )
        .await?;
    wait_until_finished(&coordinator, manual).await?;

    for pending in coordinator.get_pending_conflicts().await {
        let chosen = pending
            .conflict
            .items
            .iter()
            .find(|item| item.source == SourcePlatform::Flickr)
            .cloned()
            .context("conflict has no Flickr record")?;

        coordinator
            .resolve_conflict_manually(
                pending.conflict_id,
                ManualResolution {
                    strategy: ResolutionStrategy::Manual,
                    selection: ResolutionSelection::Single(chosen),
                    reason: Some("Keep the photographer's title".to_string()),
                },
            )
            .await?;
    }

    loop {
        let session = coordinator.get_sync_status(manual).await?;
        if session.status == SessionStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let statistics = coordinator.get_statistics().await;
    info!(
        sessions = statistics.total_sessions,
        conflicts = statistics.total_conflicts,
        automatic = statistics.auto_resolved_conflicts,
        manual = statistics.manually_resolved_conflicts,
        "Finished"
    );

    for entry in coordinator.get_changelog(10).await {
        info!(items = ?entry.item_ids, strategy = %entry.strategy, "{}", entry.reason);
    }

    Ok(())
}
