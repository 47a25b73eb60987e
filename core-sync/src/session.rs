//! # Sync Session State Machine
//!
//! Manages the lifecycle of sync sessions with validated state transitions.
//!
//! ## Overview
//!
//! A session is one execution of a sync request over a set of platforms. The
//! coordinator is the only writer; every status change goes through a
//! transition method that rejects illegal moves with
//! [`SyncError::InvalidStateTransition`].
//!
//! ## State Machine
//!
//! ```text
//! Idle ──→ Syncing ⇄ Paused
//!  │          │        │
//!  │          ├────────┴──→ Completed
//!  │          ├────────┴──→ Failed
//!  └──────────┴────────┴──→ Cancelled
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::session::{SessionConfig, SyncSession, SyncType};
//! use bridge_traits::SourcePlatform;
//!
//! let mut session = SyncSession::new(
//!     vec![SourcePlatform::Flickr, SourcePlatform::GooglePhotos],
//!     SyncType::Full,
//!     SessionConfig::default(),
//!     now,
//! )?;
//!
//! session.start(now)?;
//! session.set_total_items(120);
//! session.record_processed(120, true);
//! session.complete(now)?;
//! ```

use crate::analyzer::{Conflict, ConflictId};
use crate::strategy::ResolutionStrategy;
use crate::{Result, SyncError};
use bridge_traits::SourcePlatform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Opaque session handle returned by `start_sync`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncSessionId(Uuid);

impl SyncSessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SyncSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for SyncSessionId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidSessionId(format!("{}: {}", s, e)))
    }
}

impl fmt::Display for SyncSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// The current status of a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created and waiting for a free slot
    Idle,
    /// Pipeline running
    Syncing,
    /// Pipeline halted at the next phase boundary
    Paused,
    /// Finished (possibly with non-fatal errors)
    Completed,
    /// Aborted by a structural error
    Failed,
    /// Cancelled by a caller
    Cancelled,
}

impl SessionStatus {
    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// Check if this session occupies a concurrency slot
    pub fn is_running(&self) -> bool {
        matches!(self, SessionStatus::Syncing | SessionStatus::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Syncing => "syncing",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(SessionStatus::Idle),
            "syncing" => Ok(SessionStatus::Syncing),
            "paused" => Ok(SessionStatus::Paused),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The type of sync being performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    /// Collect every record
    #[default]
    Full,
    /// Collect records changed since the platform's last sync
    Incremental,
    /// Collect changes since the last sync and compare against recorded versions
    Differential,
    /// Caller-triggered run
    Manual,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
            SyncType::Differential => "differential",
            SyncType::Manual => "manual",
        }
    }
}

impl FromStr for SyncType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" => Ok(SyncType::Full),
            "incremental" => Ok(SyncType::Incremental),
            "differential" => Ok(SyncType::Differential),
            "manual" => Ok(SyncType::Manual),
            _ => Err(SyncError::InvalidSyncType(s.to_string())),
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline phase, used to tag errors and progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Collect,
    Detect,
    Resolve,
    Apply,
    Complete,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Collect => "collect",
            SyncPhase::Detect => "detect",
            SyncPhase::Resolve => "resolve",
            SyncPhase::Apply => "apply",
            SyncPhase::Complete => "complete",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Config, Progress & Stats
// ============================================================================

/// Per-session options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Strategy applied to every detected conflict
    pub strategy: ResolutionStrategy,
    /// Ignore last-sync timestamps and collect everything
    pub force_full: bool,
    /// Run the full pipeline without writing durable state
    pub dry_run: bool,
}

/// Progress counters of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
    /// Records collected (fixed once collection completes)
    pub total_items: u64,
    /// Records processed so far
    pub processed_items: u64,
    /// Records synced without issue
    pub synced_items: u64,
    /// Records skipped after apply failures
    pub skipped_items: u64,
    /// Records that took part in a conflict
    pub conflict_items: u64,
    /// Derived: processed * 100 / total, clamped to 100
    pub percentage: u8,
}

impl SessionProgress {
    fn recompute(&mut self) {
        self.percentage = if self.total_items > 0 {
            (self.processed_items.saturating_mul(100) / self.total_items).min(100) as u8
        } else {
            0
        };
    }
}

/// A non-fatal error recorded during a phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub phase: SyncPhase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// One applied change, also appended to the durable changelog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub session_id: SyncSessionId,
    pub conflict_id: ConflictId,
    /// Records whose versions were recorded
    pub item_ids: Vec<String>,
    pub strategy: ResolutionStrategy,
    pub reason: String,
    pub applied_at: DateTime<Utc>,
}

/// Detailed statistics of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Sum of reported sizes of the collected records
    pub data_transferred: u64,
    pub conflicts: Vec<Conflict>,
    pub errors: Vec<SessionError>,
    pub changes: Vec<ChangeLogEntry>,
    /// Conflicts resolved by the session strategy
    pub resolved_automatically: u64,
    /// Conflicts resolved through the manual resolution API
    pub resolved_manually: u64,
}

// ============================================================================
// Sync Session Entity
// ============================================================================

/// A sync session with state machine semantics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSession {
    /// Unique identifier for this session
    pub id: SyncSessionId,
    /// Platforms to sync (non-empty, de-duplicated, order preserved)
    pub platforms: Vec<SourcePlatform>,
    pub sync_type: SyncType,
    pub status: SessionStatus,
    pub config: SessionConfig,
    pub progress: SessionProgress,
    pub stats: SessionStats,
    /// When the session was admitted
    pub start_time: Option<DateTime<Utc>>,
    /// When the session reached a terminal state
    pub end_time: Option<DateTime<Utc>>,
    /// Terminal failure message
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Pipeline finished resolving and waits for manual resolutions
    pub awaiting_resolution: bool,
    /// Platforms whose collection succeeded
    pub collected_platforms: Vec<SourcePlatform>,
    /// Conflicts whose resolution has been applied
    pub applied_conflicts: BTreeSet<ConflictId>,
}

impl SyncSession {
    /// Create a new session in `Idle` state
    ///
    /// # Errors
    ///
    /// Returns an error if `platforms` is empty
    pub fn new(
        platforms: Vec<SourcePlatform>,
        sync_type: SyncType,
        config: SessionConfig,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        let mut unique: Vec<SourcePlatform> = Vec::with_capacity(platforms.len());
        for platform in platforms {
            if !unique.contains(&platform) {
                unique.push(platform);
            }
        }

        if unique.is_empty() {
            return Err(SyncError::InvalidInput {
                field: "platforms".to_string(),
                message: "At least one platform is required".to_string(),
            });
        }

        Ok(Self {
            id: SyncSessionId::new(),
            platforms: unique,
            sync_type,
            status: SessionStatus::Idle,
            config,
            progress: SessionProgress::default(),
            stats: SessionStats::default(),
            start_time: None,
            end_time: None,
            error: None,
            created_at: at,
            awaiting_resolution: false,
            collected_platforms: Vec::new(),
            applied_conflicts: BTreeSet::new(),
        })
    }

    /// Whether collection ignores last-sync timestamps
    pub fn is_full_collection(&self) -> bool {
        self.sync_type == SyncType::Full || self.config.force_full
    }

    /// Admit the session: `Idle → Syncing`
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.validate_transition(SessionStatus::Syncing)?;
        self.status = SessionStatus::Syncing;
        self.start_time = Some(at);
        Ok(())
    }

    /// `Syncing → Paused`
    pub fn pause(&mut self) -> Result<()> {
        self.validate_transition(SessionStatus::Paused)?;
        self.status = SessionStatus::Paused;
        Ok(())
    }

    /// `Paused → Syncing`
    pub fn resume(&mut self) -> Result<()> {
        if self.status != SessionStatus::Paused {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: SessionStatus::Syncing.as_str().to_string(),
                reason: "Only a paused session can be resumed".to_string(),
            });
        }
        self.status = SessionStatus::Syncing;
        Ok(())
    }

    /// Mark the session as completed
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.validate_transition(SessionStatus::Completed)?;
        self.status = SessionStatus::Completed;
        self.end_time = Some(at);
        self.awaiting_resolution = false;
        self.progress.percentage = 100;
        Ok(())
    }

    /// Mark the session as failed with an error message
    pub fn fail(&mut self, message: impl Into<String>, at: DateTime<Utc>) -> Result<()> {
        self.validate_transition(SessionStatus::Failed)?;
        self.status = SessionStatus::Failed;
        self.end_time = Some(at);
        self.awaiting_resolution = false;
        self.error = Some(message.into());
        Ok(())
    }

    /// Cancel the session
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.validate_transition(SessionStatus::Cancelled)?;
        self.status = SessionStatus::Cancelled;
        self.end_time = Some(at);
        self.awaiting_resolution = false;
        Ok(())
    }

    /// Record a non-fatal error
    pub fn record_error(&mut self, phase: SyncPhase, message: impl Into<String>, at: DateTime<Utc>) {
        self.stats.errors.push(SessionError {
            phase,
            message: message.into(),
            timestamp: at,
        });
    }

    /// Fix the number of collected records
    pub fn set_total_items(&mut self, total: u64) {
        self.progress.total_items = total;
        self.progress.recompute();
    }

    /// Count `count` records as processed, either synced or skipped
    pub fn record_processed(&mut self, count: u64, synced: bool) {
        self.progress.processed_items += count;
        if synced {
            self.progress.synced_items += count;
        } else {
            self.progress.skipped_items += count;
        }
        self.progress.recompute();
    }

    /// Count records involved in conflicts
    pub fn record_conflict_items(&mut self, count: u64) {
        self.progress.conflict_items += count;
    }

    pub fn conflict(&self, conflict_id: &ConflictId) -> Option<&Conflict> {
        self.stats.conflicts.iter().find(|c| &c.id == conflict_id)
    }

    pub fn conflict_mut(&mut self, conflict_id: &ConflictId) -> Option<&mut Conflict> {
        self.stats.conflicts.iter_mut().find(|c| &c.id == conflict_id)
    }

    /// Number of conflicts still waiting for a resolution
    pub fn unresolved_conflicts(&self) -> usize {
        self.stats
            .conflicts
            .iter()
            .filter(|c| !c.is_resolved())
            .count()
    }

    /// Resolved conflicts whose resolution has not been applied yet
    pub fn conflicts_ready_to_apply(&self) -> Vec<Conflict> {
        self.stats
            .conflicts
            .iter()
            .filter(|c| c.is_resolved() && !self.applied_conflicts.contains(&c.id))
            .cloned()
            .collect()
    }

    /// Duration in milliseconds between admission and the terminal state
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }

    /// Validate a state transition
    fn validate_transition(&self, to: SessionStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (SessionStatus::Idle, SessionStatus::Syncing) => true,
            (SessionStatus::Idle, SessionStatus::Cancelled) => true,

            (SessionStatus::Syncing, SessionStatus::Paused) => true,
            (SessionStatus::Paused, SessionStatus::Syncing) => true,

            (SessionStatus::Syncing | SessionStatus::Paused, SessionStatus::Completed) => true,
            (SessionStatus::Syncing | SessionStatus::Paused, SessionStatus::Failed) => true,
            (SessionStatus::Syncing | SessionStatus::Paused, SessionStatus::Cancelled) => true,

            // Terminal states cannot transition
            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}
