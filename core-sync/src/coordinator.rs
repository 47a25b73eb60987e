//! # Sync Coordinator
//!
//! Orchestrates sync sessions across photo platforms.
//!
//! ## Overview
//!
//! The `SyncCoordinator` owns every session and drives each admitted one
//! through a fixed pipeline on a background task:
//!
//! 1. **Collect**: fetch records from each platform (incrementally when a
//!    last-sync timestamp is known) and attach recorded versions
//! 2. **Detect**: group records by identity and analyze each group
//! 3. **Resolve**: apply the session strategy, or defer to manual resolution
//! 4. **Apply**: record fresh versions for resolved conflicts and append the
//!    changelog
//! 5. **Complete**: advance last-sync timestamps and persist statistics
//!
//! Sessions beyond `max_concurrent_syncs` wait in a FIFO queue. Pause is
//! honored at phase boundaries; cancellation is checked at phase boundaries
//! and after every platform call or store write. A session with conflicts
//! deferred to manual resolution parks after apply until the last one is
//! resolved through [`SyncCoordinator::resolve_conflict_manually`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{StartSyncOptions, SyncConfig, SyncCoordinator};
//! use bridge_traits::SourcePlatform;
//!
//! let coordinator = SyncCoordinator::new(SyncConfig::default(), &core_config, event_bus).await?;
//! let session_id = coordinator
//!     .start_sync(
//!         vec![SourcePlatform::Flickr, SourcePlatform::GooglePhotos],
//!         StartSyncOptions::default(),
//!     )
//!     .await?;
//!
//! let session = coordinator.get_sync_status(session_id).await?;
//! println!("{}: {}%", session.status, session.progress.percentage);
//! ```

use crate::analyzer::{analyze, group_by_identity, Conflict, ConflictId};
use crate::identity::compute_version;
use crate::persistence::{
    append_changes, KeyValueSyncStateStore, PersistedState, SyncStateStore, SyncStatistics,
};
use crate::session::{
    ChangeLogEntry, SessionConfig, SessionStatus, SyncPhase, SyncSession, SyncSessionId, SyncType,
};
use crate::strategy::{
    self, Resolution, ResolutionSelection, ResolutionStrategy, StrategyOutcome,
};
use crate::{Result, SyncError};
use bridge_traits::{Clock, FetchOptions, PhotoItem, PlatformClient, SourcePlatform};
use chrono::{DateTime, Utc};
use core_runtime::config::CoreConfig;
use core_runtime::events::{ConflictEvent, CoreEvent, EventBus, SyncEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Sync coordinator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of sessions syncing or paused at once
    pub max_concurrent_syncs: usize,

    /// Strategy used when a sync request does not name one
    pub default_strategy: ResolutionStrategy,

    /// Page size requested from platforms
    pub fetch_limit: usize,

    /// Ask platforms for descriptive metadata
    pub include_metadata: bool,

    /// Changelog entries kept durably; older entries are dropped
    pub max_changelog_entries: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_syncs: 3,
            default_strategy: ResolutionStrategy::LatestTimestamp,
            fetch_limit: 1000,
            include_metadata: true,
            max_changelog_entries: 1000,
        }
    }
}

impl SyncConfig {
    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if any limit is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_syncs == 0 {
            return Err(SyncError::Config(
                "max_concurrent_syncs must be at least 1".to_string(),
            ));
        }
        if self.fetch_limit == 0 {
            return Err(SyncError::Config("fetch_limit must be at least 1".to_string()));
        }
        if self.max_changelog_entries == 0 {
            return Err(SyncError::Config(
                "max_changelog_entries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options of a single sync request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartSyncOptions {
    pub sync_type: SyncType,
    /// Overrides [`SyncConfig::default_strategy`]
    pub strategy: Option<ResolutionStrategy>,
    pub force_full: bool,
    pub dry_run: bool,
}

/// A conflict waiting for a caller decision
#[derive(Debug, Clone, PartialEq)]
pub struct PendingResolution {
    pub conflict_id: ConflictId,
    pub session_id: SyncSessionId,
    /// Snapshot taken when the conflict was deferred
    pub conflict: Conflict,
    pub enqueued_at: DateTime<Utc>,
}

/// A caller's decision for a pending conflict
#[derive(Debug, Clone, PartialEq)]
pub struct ManualResolution {
    pub strategy: ResolutionStrategy,
    pub selection: ResolutionSelection,
    pub reason: Option<String>,
}

// ============================================================================
// Internal State
// ============================================================================

/// Handles of an admitted session's background task
struct ActiveSync {
    cancellation_token: CancellationToken,
    pause_tx: watch::Sender<bool>,
    resolution_notify: Arc<Notify>,
    /// Set once completion starts writing durable state; cancel is refused from then on
    finishing: bool,
}

#[derive(Default)]
struct CoordinatorState {
    sessions: HashMap<SyncSessionId, SyncSession>,
    /// Creation order of `sessions`
    order: Vec<SyncSessionId>,
    wait_queue: VecDeque<SyncSessionId>,
    /// Oldest first
    pending: Vec<PendingResolution>,
    active: HashMap<SyncSessionId, ActiveSync>,
}

/// What the pipeline does after an apply pass
enum ApplyOutcome {
    Finished,
    MoreReady,
    AwaitingResolution,
}

/// Terminal outcome counted in the aggregate statistics
enum SessionOutcome {
    Completed,
    Failed,
    Cancelled,
}

fn live_session_mut<'a>(
    sessions: &'a mut HashMap<SyncSessionId, SyncSession>,
    session_id: &SyncSessionId,
) -> Result<&'a mut SyncSession> {
    let session = sessions
        .get_mut(session_id)
        .ok_or_else(|| SyncError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;

    // A terminal session no longer accepts pipeline results
    if session.status.is_terminal() {
        return Err(SyncError::Cancelled);
    }
    Ok(session)
}

// ============================================================================
// Sync Coordinator
// ============================================================================

/// Sync coordinator orchestrates sync sessions
pub struct SyncCoordinator {
    config: SyncConfig,
    platform_client: Arc<dyn PlatformClient>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    state_store: Arc<dyn SyncStateStore>,
    state: Arc<Mutex<CoordinatorState>>,
    persisted: Arc<Mutex<PersistedState>>,
}

impl SyncCoordinator {
    /// Create a coordinator from host capabilities.
    ///
    /// Durable state is kept in the configured key-value store and loaded
    /// before the coordinator is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the durable state
    /// cannot be loaded
    pub async fn new(
        config: SyncConfig,
        core_config: &CoreConfig,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        let state_store = Arc::new(KeyValueSyncStateStore::new(Arc::clone(
            &core_config.kv_store,
        )));

        Self::with_state_store(
            config,
            Arc::clone(&core_config.platform_client),
            Arc::clone(&core_config.clock),
            event_bus,
            state_store,
        )
        .await
    }

    /// Create a coordinator with an explicit state store
    pub async fn with_state_store(
        config: SyncConfig,
        platform_client: Arc<dyn PlatformClient>,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
        state_store: Arc<dyn SyncStateStore>,
    ) -> Result<Self> {
        config.validate()?;

        let persisted = state_store.load().await?;
        info!(
            platforms = persisted.last_sync.len(),
            versions = persisted.versions.len(),
            changelog = persisted.changelog.len(),
            "Loaded sync state"
        );

        Ok(Self {
            config,
            platform_client,
            clock,
            event_bus,
            state_store,
            state: Arc::new(Mutex::new(CoordinatorState::default())),
            persisted: Arc::new(Mutex::new(persisted)),
        })
    }

    /// Clone for background task (avoids Arc<Arc<...>>)
    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            platform_client: Arc::clone(&self.platform_client),
            clock: Arc::clone(&self.clock),
            event_bus: Arc::clone(&self.event_bus),
            state_store: Arc::clone(&self.state_store),
            state: Arc::clone(&self.state),
            persisted: Arc::clone(&self.persisted),
        }
    }

    fn emit(&self, event: CoreEvent) {
        self.event_bus.emit(event).ok();
    }

    // ------------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------------

    /// Create a session and admit it, or queue it when all slots are taken.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidInput`] if `platforms` is empty
    #[instrument(skip(self, platforms), fields(platforms = platforms.len()))]
    pub async fn start_sync(
        &self,
        platforms: Vec<SourcePlatform>,
        options: StartSyncOptions,
    ) -> Result<SyncSessionId> {
        let session_config = SessionConfig {
            strategy: options.strategy.unwrap_or(self.config.default_strategy),
            force_full: options.force_full,
            dry_run: options.dry_run,
        };
        let session = SyncSession::new(
            platforms,
            options.sync_type,
            session_config,
            self.clock.now(),
        )?;
        let session_id = session.id;

        let mut state = self.state.lock().await;
        state.sessions.insert(session_id, session);
        state.order.push(session_id);

        if state.active.len() < self.config.max_concurrent_syncs {
            self.admit(&mut state, session_id)?;
        } else {
            state.wait_queue.push_back(session_id);
            info!(
                session_id = %session_id,
                queued = state.wait_queue.len(),
                "All sync slots taken, session queued"
            );
        }

        Ok(session_id)
    }

    /// Start an idle session and spawn its pipeline task
    fn admit(&self, state: &mut CoordinatorState, session_id: SyncSessionId) -> Result<()> {
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| SyncError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        session.start(self.clock.now())?;

        let platforms = session
            .platforms
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        let sync_type = session.sync_type;

        let cancellation_token = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);
        let resolution_notify = Arc::new(Notify::new());

        state.active.insert(
            session_id,
            ActiveSync {
                cancellation_token: cancellation_token.clone(),
                pause_tx,
                resolution_notify: Arc::clone(&resolution_notify),
                finishing: false,
            },
        );

        self.emit(CoreEvent::Sync(SyncEvent::Started {
            session_id: session_id.to_string(),
            platforms,
            sync_type: sync_type.as_str().to_string(),
        }));

        let coordinator = self.clone_for_task();
        let pipeline = tokio::spawn(async move {
            coordinator
                .run_session(session_id, cancellation_token, pause_rx, resolution_notify)
                .await;
        });

        // A panicking pipeline must still release its slot
        let supervisor = self.clone_for_task();
        tokio::spawn(async move {
            if let Err(e) = pipeline.await {
                if e.is_panic() {
                    error!(session_id = %session_id, "Sync pipeline panicked");
                    supervisor
                        .fail_session(session_id, "Sync pipeline panicked".to_string())
                        .await;
                }
            }
        });

        info!(session_id = %session_id, sync_type = %sync_type, "Started sync session");
        Ok(())
    }

    /// Admit queued sessions while slots are free
    fn admit_next(&self, state: &mut CoordinatorState) {
        while state.active.len() < self.config.max_concurrent_syncs {
            let Some(session_id) = state.wait_queue.pop_front() else {
                break;
            };

            let idle = state
                .sessions
                .get(&session_id)
                .map(|s| s.status == SessionStatus::Idle)
                .unwrap_or(false);
            if !idle {
                continue;
            }

            if let Err(e) = self.admit(state, session_id) {
                error!(session_id = %session_id, error = %e, "Failed to admit queued session");
            }
        }
    }

    /// Run the pipeline of one session to a terminal state
    #[instrument(skip(self, cancellation_token, pause_rx, resolution_notify), fields(session_id = %session_id))]
    async fn run_session(
        &self,
        session_id: SyncSessionId,
        cancellation_token: CancellationToken,
        mut pause_rx: watch::Receiver<bool>,
        resolution_notify: Arc<Notify>,
    ) {
        let result = self
            .execute_session(
                session_id,
                &cancellation_token,
                &mut pause_rx,
                &resolution_notify,
            )
            .await;

        match result {
            Ok(()) => info!("Sync session {} completed", session_id),
            Err(SyncError::Cancelled) => {
                debug!("Sync session {} stopped after cancellation", session_id)
            }
            Err(e) => {
                error!("Sync session {} failed: {}", session_id, e);
                self.fail_session(session_id, e.to_string()).await;
            }
        }
    }

    async fn execute_session(
        &self,
        session_id: SyncSessionId,
        cancellation_token: &CancellationToken,
        pause_rx: &mut watch::Receiver<bool>,
        resolution_notify: &Notify,
    ) -> Result<()> {
        self.checkpoint(cancellation_token, pause_rx).await?;
        info!("Phase 1: Collecting items");
        let batches = self.collect(session_id, cancellation_token).await?;

        self.checkpoint(cancellation_token, pause_rx).await?;
        info!("Phase 2: Detecting conflicts");
        self.detect(session_id, &batches).await?;

        self.checkpoint(cancellation_token, pause_rx).await?;
        info!("Phase 3: Resolving conflicts");
        self.resolve(session_id).await?;

        loop {
            self.checkpoint(cancellation_token, pause_rx).await?;
            info!("Phase 4: Applying resolutions");
            match self.apply(session_id, cancellation_token).await? {
                ApplyOutcome::Finished => break,
                ApplyOutcome::MoreReady => continue,
                ApplyOutcome::AwaitingResolution => {
                    info!("Waiting for manual resolution");
                    tokio::select! {
                        _ = cancellation_token.cancelled() => return Err(SyncError::Cancelled),
                        _ = resolution_notify.notified() => {}
                    }
                }
            }
        }

        self.checkpoint(cancellation_token, pause_rx).await?;
        info!("Phase 5: Completing session");
        self.complete(session_id).await
    }

    /// Stop on cancellation and hold while paused
    async fn checkpoint(
        &self,
        cancellation_token: &CancellationToken,
        pause_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            if cancellation_token.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if !*pause_rx.borrow_and_update() {
                return Ok(());
            }

            debug!("Session paused at phase boundary");
            tokio::select! {
                _ = cancellation_token.cancelled() => return Err(SyncError::Cancelled),
                changed = pause_rx.changed() => {
                    if changed.is_err() {
                        return Err(SyncError::Cancelled);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Pipeline phases
    // ------------------------------------------------------------------------

    async fn collect(
        &self,
        session_id: SyncSessionId,
        cancellation_token: &CancellationToken,
    ) -> Result<Vec<(SourcePlatform, Vec<PhotoItem>)>> {
        let (platforms, full) = {
            let mut state = self.state.lock().await;
            let session = live_session_mut(&mut state.sessions, &session_id)?;
            (session.platforms.clone(), session.is_full_collection())
        };
        let (last_sync, versions) = {
            let persisted = self.persisted.lock().await;
            (persisted.last_sync.clone(), persisted.versions.clone())
        };

        let mut batches = Vec::with_capacity(platforms.len());
        for platform in platforms {
            let since = if full {
                None
            } else {
                last_sync.get(platform.as_str()).copied()
            };
            let options = FetchOptions {
                since,
                limit: self.config.fetch_limit,
                include_metadata: self.config.include_metadata,
            };

            debug!(platform = %platform, since = ?since, "Fetching items");
            let result = self.platform_client.fetch_items(&platform, options).await;
            if cancellation_token.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match result {
                Ok(mut items) => {
                    for item in items.iter_mut() {
                        if item.version.is_none() {
                            item.version = versions.get(&item.id).cloned();
                        }
                    }
                    info!(platform = %platform, count = items.len(), "Collected items");
                    batches.push((platform, items));
                }
                Err(e) => {
                    warn!(platform = %platform, error = %e, "Collection failed");
                    self.record_error(
                        session_id,
                        SyncPhase::Collect,
                        format!("Failed to collect from {}: {}", platform, e),
                    )
                    .await?;
                }
            }
        }

        let total: u64 = batches.iter().map(|(_, items)| items.len() as u64).sum();
        let transferred: u64 = batches
            .iter()
            .flat_map(|(_, items)| items.iter())
            .map(|item| item.size.unwrap_or(0))
            .sum();

        let mut state = self.state.lock().await;
        let session = live_session_mut(&mut state.sessions, &session_id)?;
        session.set_total_items(total);
        session.stats.data_transferred = transferred;
        session.collected_platforms = batches.iter().map(|(p, _)| p.clone()).collect();
        self.emit_progress(session, SyncPhase::Collect);

        Ok(batches)
    }

    async fn detect(
        &self,
        session_id: SyncSessionId,
        batches: &[(SourcePlatform, Vec<PhotoItem>)],
    ) -> Result<()> {
        let now = self.clock.now();
        let mut conflicts = Vec::new();
        let mut consistent = 0u64;

        for (identity, items) in group_by_identity(batches) {
            match analyze(&identity, &items, now) {
                Some(conflict) => conflicts.push(conflict),
                None => consistent += items.len() as u64,
            }
        }

        let conflict_items: u64 = conflicts.iter().map(|c| c.items.len() as u64).sum();
        let conflict_ids: Vec<String> = conflicts.iter().map(|c| c.id.to_string()).collect();
        info!(
            conflicts = conflicts.len(),
            consistent_items = consistent,
            "Conflict detection finished"
        );

        let mut state = self.state.lock().await;
        let session = live_session_mut(&mut state.sessions, &session_id)?;
        session.record_processed(consistent, true);
        session.record_conflict_items(conflict_items);
        session.stats.conflicts = conflicts;

        if !conflict_ids.is_empty() {
            self.emit(CoreEvent::Conflict(ConflictEvent::Detected {
                session_id: session_id.to_string(),
                conflict_ids,
            }));
        }
        self.emit_progress(session, SyncPhase::Detect);

        Ok(())
    }

    async fn resolve(&self, session_id: SyncSessionId) -> Result<()> {
        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let session = live_session_mut(&mut state.sessions, &session_id)?;
        let session_strategy = session.config.strategy;

        let mut deferred = Vec::new();
        let mut failures = Vec::new();
        let mut resolved = 0u64;

        for conflict in session.stats.conflicts.iter_mut() {
            match strategy::resolve(session_strategy, &conflict.items, now) {
                Ok(StrategyOutcome::Resolved(resolution)) => {
                    debug!(conflict_id = %conflict.id, reason = %resolution.reason, "Resolved conflict");
                    conflict.resolve(resolution)?;
                    resolved += 1;
                    self.emit(CoreEvent::Conflict(ConflictEvent::Resolved {
                        session_id: session_id.to_string(),
                        conflict_id: conflict.id.to_string(),
                        strategy: session_strategy.as_str().to_string(),
                    }));
                }
                Ok(StrategyOutcome::Deferred) => deferred.push(conflict.clone()),
                Err(e) => {
                    warn!(conflict_id = %conflict.id, error = %e, "Strategy failed, deferring");
                    failures.push(format!("Conflict {}: {}", conflict.id, e));
                    deferred.push(conflict.clone());
                }
            }
        }

        session.stats.resolved_automatically += resolved;
        for message in failures {
            session.record_error(SyncPhase::Resolve, message.clone(), now);
            self.emit(CoreEvent::Sync(SyncEvent::Error {
                session_id: session_id.to_string(),
                phase: SyncPhase::Resolve.as_str().to_string(),
                message,
            }));
        }
        self.emit_progress(session, SyncPhase::Resolve);

        for conflict in deferred {
            self.emit(CoreEvent::Conflict(ConflictEvent::RequiresResolution {
                session_id: session_id.to_string(),
                conflict_id: conflict.id.to_string(),
                severity: conflict.severity,
            }));
            state.pending.push(PendingResolution {
                conflict_id: conflict.id,
                session_id,
                conflict,
                enqueued_at: now,
            });
        }

        Ok(())
    }

    async fn apply(
        &self,
        session_id: SyncSessionId,
        cancellation_token: &CancellationToken,
    ) -> Result<ApplyOutcome> {
        let (ready, dry_run) = {
            let mut state = self.state.lock().await;
            let session = live_session_mut(&mut state.sessions, &session_id)?;
            session.awaiting_resolution = false;
            (session.conflicts_ready_to_apply(), session.config.dry_run)
        };

        for conflict in ready {
            let Some(resolution) = conflict.resolution().cloned() else {
                continue;
            };
            let item_count = conflict.items.len() as u64;

            if resolution.strategy == ResolutionStrategy::KeepBoth {
                let mut state = self.state.lock().await;
                let session = live_session_mut(&mut state.sessions, &session_id)?;
                session.applied_conflicts.insert(conflict.id);
                session.record_processed(item_count, true);
                debug!(conflict_id = %conflict.id, "Kept all records, no version recorded");
                continue;
            }

            let now = self.clock.now();
            let selected: Vec<PhotoItem> =
                resolution.selection.items().into_iter().cloned().collect();
            let entry = ChangeLogEntry {
                session_id,
                conflict_id: conflict.id,
                item_ids: selected.iter().map(|item| item.id.clone()).collect(),
                strategy: resolution.strategy,
                reason: resolution.reason.clone(),
                applied_at: now,
            };

            if cancellation_token.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let written = if dry_run {
                Ok(())
            } else {
                self.record_change(&selected, &entry, now, cancellation_token)
                    .await
            };
            if cancellation_token.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let mut state = self.state.lock().await;
            let session = live_session_mut(&mut state.sessions, &session_id)?;
            session.applied_conflicts.insert(conflict.id);
            match written {
                Ok(()) => {
                    session.record_processed(item_count, true);
                    self.emit(CoreEvent::Sync(SyncEvent::ChangeApplied {
                        session_id: session_id.to_string(),
                        conflict_id: conflict.id.to_string(),
                        item_ids: entry.item_ids.clone(),
                        dry_run,
                    }));
                    session.stats.changes.push(entry);
                }
                Err(e) => {
                    warn!(conflict_id = %conflict.id, error = %e, "Failed to apply resolution");
                    let message = format!("Failed to apply conflict {}: {}", conflict.id, e);
                    session.record_error(SyncPhase::Apply, message.clone(), now);
                    session.record_processed(item_count, false);
                    self.emit(CoreEvent::Sync(SyncEvent::Error {
                        session_id: session_id.to_string(),
                        phase: SyncPhase::Apply.as_str().to_string(),
                        message,
                    }));
                }
            }
        }

        let mut state = self.state.lock().await;
        let session = live_session_mut(&mut state.sessions, &session_id)?;
        self.emit_progress(session, SyncPhase::Apply);

        if !session.conflicts_ready_to_apply().is_empty() {
            return Ok(ApplyOutcome::MoreReady);
        }
        if session.unresolved_conflicts() > 0 {
            session.awaiting_resolution = true;
            return Ok(ApplyOutcome::AwaitingResolution);
        }
        Ok(ApplyOutcome::Finished)
    }

    /// Record fresh versions for `selected` and append `entry` to the changelog
    async fn record_change(
        &self,
        selected: &[PhotoItem],
        entry: &ChangeLogEntry,
        now: DateTime<Utc>,
        cancellation_token: &CancellationToken,
    ) -> Result<()> {
        let mut persisted = self.persisted.lock().await;
        if cancellation_token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut versions = persisted.versions.clone();
        for item in selected {
            versions.insert(item.id.clone(), compute_version(item, now));
        }
        self.state_store.save_versions(&versions).await?;
        persisted.versions = versions;
        if cancellation_token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut changelog = persisted.changelog.clone();
        append_changes(
            &mut changelog,
            std::slice::from_ref(entry),
            self.config.max_changelog_entries,
        );
        self.state_store.save_changelog(&changelog).await?;
        persisted.changelog = changelog;

        Ok(())
    }

    async fn complete(&self, session_id: SyncSessionId) -> Result<()> {
        let now = self.clock.now();
        let snapshot = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let session = live_session_mut(&mut state.sessions, &session_id)?.clone();
            if let Some(active) = state.active.get_mut(&session_id) {
                active.finishing = true;
            }
            session
        };

        // Durable writes run without the session lock
        let written = if snapshot.config.dry_run {
            Ok(())
        } else {
            let collected_at = snapshot.start_time.unwrap_or(now);
            let last_sync = self
                .persist_completion(&snapshot.collected_platforms, collected_at, now)
                .await;
            let statistics = self
                .record_outcome(&snapshot, SessionOutcome::Completed, now)
                .await;
            last_sync.and(statistics)
        };

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let session = live_session_mut(&mut state.sessions, &session_id)?;

        if let Err(e) = written {
            warn!(error = %e, "Failed to persist session results");
            let message = format!("Failed to persist session results: {}", e);
            session.record_error(SyncPhase::Complete, message.clone(), now);
            self.emit(CoreEvent::Sync(SyncEvent::Error {
                session_id: session_id.to_string(),
                phase: SyncPhase::Complete.as_str().to_string(),
                message,
            }));
        }

        session.complete(now)?;
        self.emit(CoreEvent::Sync(SyncEvent::Completed {
            session_id: session_id.to_string(),
            synced_items: session.progress.synced_items,
            skipped_items: session.progress.skipped_items,
            conflict_items: session.progress.conflict_items,
            error_count: session.stats.errors.len() as u64,
            duration_ms: session.duration_ms().unwrap_or(0),
        }));

        state.active.remove(&session_id);
        self.admit_next(state);
        Ok(())
    }

    /// Advance last-sync timestamps of the platforms that were collected
    async fn persist_completion(
        &self,
        collected: &[SourcePlatform],
        collected_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if collected.is_empty() {
            return Ok(());
        }

        let mut persisted = self.persisted.lock().await;
        let mut last_sync = persisted.last_sync.clone();
        for platform in collected {
            last_sync.insert(platform.as_str().to_string(), collected_at);
        }
        self.state_store.save_last_sync(&last_sync).await?;
        persisted.last_sync = last_sync;

        debug!(platforms = collected.len(), at = %now, "Advanced last-sync timestamps");
        Ok(())
    }

    /// Fold a terminal session into the aggregate statistics
    async fn record_outcome(
        &self,
        session: &SyncSession,
        outcome: SessionOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut persisted = self.persisted.lock().await;
        let mut statistics = persisted.statistics.clone();

        statistics.total_sessions += 1;
        match outcome {
            SessionOutcome::Completed => {
                statistics.completed_sessions += 1;
                statistics.total_conflicts += session.stats.conflicts.len() as u64;
                statistics.auto_resolved_conflicts += session.stats.resolved_automatically;
                statistics.manually_resolved_conflicts += session.stats.resolved_manually;
                statistics.items_synced += session.progress.synced_items;
                statistics.items_skipped += session.progress.skipped_items;
                statistics.data_transferred += session.stats.data_transferred;
                statistics.last_sync_at = Some(now);
            }
            SessionOutcome::Failed => statistics.failed_sessions += 1,
            SessionOutcome::Cancelled => statistics.cancelled_sessions += 1,
        }

        self.state_store.save_statistics(&statistics).await?;
        persisted.statistics = statistics;
        Ok(())
    }

    async fn fail_session(&self, session_id: SyncSessionId, message: String) {
        let now = self.clock.now();
        let failed = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let mut failed = None;
            if let Some(session) = state.sessions.get_mut(&session_id) {
                if session.fail(message.clone(), now).is_ok() {
                    self.emit(CoreEvent::Sync(SyncEvent::Failed {
                        session_id: session_id.to_string(),
                        message,
                        processed_items: session.progress.processed_items,
                    }));
                    failed = Some(session.clone());
                }
            }

            state.pending.retain(|p| p.session_id != session_id);
            state.active.remove(&session_id);
            self.admit_next(state);
            failed
        };

        if let Some(session) = failed.filter(|s| !s.config.dry_run) {
            if let Err(e) = self.record_outcome(&session, SessionOutcome::Failed, now).await {
                warn!(session_id = %session_id, error = %e, "Failed to persist statistics");
            }
        }
    }

    async fn record_error(
        &self,
        session_id: SyncSessionId,
        phase: SyncPhase,
        message: String,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let session = live_session_mut(&mut state.sessions, &session_id)?;
        session.record_error(phase, message.clone(), self.clock.now());

        self.emit(CoreEvent::Sync(SyncEvent::Error {
            session_id: session_id.to_string(),
            phase: phase.as_str().to_string(),
            message,
        }));
        Ok(())
    }

    fn emit_progress(&self, session: &SyncSession, phase: SyncPhase) {
        self.emit(CoreEvent::Sync(SyncEvent::Progress {
            session_id: session.id.to_string(),
            processed_items: session.progress.processed_items,
            total_items: session.progress.total_items,
            percentage: session.progress.percentage,
            phase: phase.as_str().to_string(),
        }));
    }

    // ------------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------------

    /// Pause a syncing session at its next phase boundary
    ///
    /// # Errors
    ///
    /// Returns an error if the session is unknown or not syncing
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn pause_sync(&self, session_id: SyncSessionId) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| SyncError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        session.pause()?;

        if let Some(active) = state.active.get(&session_id) {
            active.pause_tx.send_replace(true);
        }

        self.emit(CoreEvent::Sync(SyncEvent::Paused {
            session_id: session_id.to_string(),
        }));
        info!("Paused sync session {}", session_id);
        Ok(())
    }

    /// Resume a paused session
    ///
    /// # Errors
    ///
    /// Returns an error if the session is unknown or not paused
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn resume_sync(&self, session_id: SyncSessionId) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| SyncError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        session.resume()?;

        if let Some(active) = state.active.get(&session_id) {
            active.pause_tx.send_replace(false);
        }

        self.emit(CoreEvent::Sync(SyncEvent::Resumed {
            session_id: session_id.to_string(),
        }));
        info!("Resumed sync session {}", session_id);
        Ok(())
    }

    /// Cancel a session in any non-terminal state.
    ///
    /// Frees its slot, drops its pending conflicts and discards the results of
    /// any platform call still in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is unknown or already terminal
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn cancel_sync(&self, session_id: SyncSessionId) -> Result<()> {
        let now = self.clock.now();
        let cancelled = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let finishing = state
                .active
                .get(&session_id)
                .is_some_and(|active| active.finishing);
            let session = state
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| SyncError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
            if finishing {
                return Err(SyncError::InvalidStateTransition {
                    from: session.status.as_str().to_string(),
                    to: SessionStatus::Cancelled.as_str().to_string(),
                    reason: "Session is already writing its results".to_string(),
                });
            }
            session.cancel(now)?;

            self.emit(CoreEvent::Sync(SyncEvent::Cancelled {
                session_id: session_id.to_string(),
                processed_items: session.progress.processed_items,
            }));
            let cancelled = session.clone();

            state.wait_queue.retain(|id| *id != session_id);
            state.pending.retain(|p| p.session_id != session_id);
            if let Some(active) = state.active.remove(&session_id) {
                active.cancellation_token.cancel();
            }
            self.admit_next(state);
            cancelled
        };

        if !cancelled.config.dry_run {
            if let Err(e) = self
                .record_outcome(&cancelled, SessionOutcome::Cancelled, now)
                .await
            {
                warn!(error = %e, "Failed to persist statistics");
            }
        }

        info!("Cancelled sync session {}", session_id);
        Ok(())
    }

    /// Resolve a pending conflict with a caller decision.
    ///
    /// When this was the session's last unresolved conflict, the parked
    /// pipeline applies it and completes the session.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConflictNotFound`] if no such conflict is pending and
    /// [`SyncError::InvalidInput`] if the selection is empty
    #[instrument(skip(self, resolution), fields(conflict_id = %conflict_id))]
    pub async fn resolve_conflict_manually(
        &self,
        conflict_id: ConflictId,
        resolution: ManualResolution,
    ) -> Result<()> {
        if resolution.selection.items().is_empty() {
            return Err(SyncError::InvalidInput {
                field: "selection".to_string(),
                message: "At least one record must be selected".to_string(),
            });
        }

        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let index = state
            .pending
            .iter()
            .position(|p| p.conflict_id == conflict_id)
            .ok_or_else(|| SyncError::ConflictNotFound {
                conflict_id: conflict_id.to_string(),
            })?;
        let session_id = state.pending[index].session_id;

        let session = live_session_mut(&mut state.sessions, &session_id).map_err(|_| {
            SyncError::ConflictNotFound {
                conflict_id: conflict_id.to_string(),
            }
        })?;
        let conflict =
            session
                .conflict_mut(&conflict_id)
                .ok_or_else(|| SyncError::ConflictNotFound {
                    conflict_id: conflict_id.to_string(),
                })?;

        let foreign = resolution.selection.items().into_iter().find(|selected| {
            !conflict
                .items
                .iter()
                .any(|item| item.id == selected.id && item.source == selected.source)
        });
        if let Some(item) = foreign {
            return Err(SyncError::InvalidInput {
                field: "selection".to_string(),
                message: format!(
                    "Record {} from {} is not part of conflict {}",
                    item.id, item.source, conflict_id
                ),
            });
        }

        let strategy = resolution.strategy;
        conflict.resolve(Resolution {
            strategy,
            selection: resolution.selection,
            reason: resolution
                .reason
                .unwrap_or_else(|| "Resolved manually".to_string()),
            resolved_at: now,
        })?;
        session.stats.resolved_manually += 1;
        let remaining = session.unresolved_conflicts();
        state.pending.remove(index);

        self.emit(CoreEvent::Conflict(ConflictEvent::ResolvedManually {
            session_id: session_id.to_string(),
            conflict_id: conflict_id.to_string(),
            strategy: strategy.as_str().to_string(),
        }));

        if let Some(active) = state.active.get(&session_id) {
            active.resolution_notify.notify_one();
        }

        info!(remaining, "Conflict {} resolved manually", conflict_id);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Get a snapshot of a session
    pub async fn get_sync_status(&self, session_id: SyncSessionId) -> Result<SyncSession> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| SyncError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Snapshots of all known sessions in creation order
    pub async fn get_all_sync_sessions(&self) -> Vec<SyncSession> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|id| state.sessions.get(id).cloned())
            .collect()
    }

    /// Sessions waiting for a slot, in admission order
    pub async fn queued_sessions(&self) -> Vec<SyncSessionId> {
        self.state.lock().await.wait_queue.iter().copied().collect()
    }

    /// Conflicts waiting for manual resolution, oldest first
    pub async fn get_pending_conflicts(&self) -> Vec<PendingResolution> {
        let mut pending = self.state.lock().await.pending.clone();
        pending.sort_by_key(|p| p.enqueued_at);
        pending
    }

    pub async fn get_statistics(&self) -> SyncStatistics {
        self.persisted.lock().await.statistics.clone()
    }

    /// Most recent changelog entries, newest first
    pub async fn get_changelog(&self, limit: usize) -> Vec<ChangeLogEntry> {
        let persisted = self.persisted.lock().await;
        persisted.changelog.iter().rev().take(limit).cloned().collect()
    }

    /// Timestamp of the last successful collection from `platform`
    pub async fn last_sync_at(&self, platform: &SourcePlatform) -> Option<DateTime<Utc>> {
        self.persisted
            .lock()
            .await
            .last_sync
            .get(platform.as_str())
            .copied()
    }

    /// Drop terminal sessions that ended before `older_than`.
    ///
    /// Returns the number of sessions removed.
    pub async fn prune_sessions(&self, older_than: DateTime<Utc>) -> usize {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let before = state.sessions.len();
        state.sessions.retain(|_, session| {
            !(session.status.is_terminal()
                && session.end_time.map(|end| end < older_than).unwrap_or(false))
        });
        let sessions = &state.sessions;
        state.order.retain(|id| sessions.contains_key(id));

        let removed = before - state.sessions.len();
        if removed > 0 {
            info!(removed, "Pruned finished sync sessions");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent_syncs, 3);
        assert_eq!(config.default_strategy, ResolutionStrategy::LatestTimestamp);
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        let config = SyncConfig {
            max_concurrent_syncs: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let config = SyncConfig {
            fetch_limit: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let config = SyncConfig {
            max_changelog_entries: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_start_options_default_to_full_sync() {
        let options = StartSyncOptions::default();
        assert_eq!(options.sync_type, SyncType::Full);
        assert!(options.strategy.is_none());
        assert!(!options.force_full);
        assert!(!options.dry_run);
    }

    #[test]
    fn test_live_session_rejects_terminal_sessions() {
        let now = Utc::now();
        let mut session = SyncSession::new(
            vec![SourcePlatform::Flickr],
            SyncType::Full,
            SessionConfig::default(),
            now,
        )
        .unwrap();
        let id = session.id;
        session.cancel(now).unwrap();

        let mut sessions = HashMap::new();
        assert!(matches!(
            live_session_mut(&mut sessions, &id),
            Err(SyncError::SessionNotFound { .. })
        ));

        sessions.insert(id, session);
        assert!(matches!(
            live_session_mut(&mut sessions, &id),
            Err(SyncError::Cancelled)
        ));
    }
}
