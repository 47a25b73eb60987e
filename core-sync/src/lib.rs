//! # Photo Sync Engine
//!
//! Synchronizes photo records across platforms and resolves the conflicts
//! between them.
//!
//! ## Overview
//!
//! This module manages the lifecycle of sync sessions, including:
//! - Collecting records from each platform, incrementally where possible
//! - Correlating records by content identity
//! - Detecting metadata, content, timestamp and version conflicts
//! - Resolving conflicts automatically or through a manual queue
//! - Persisting versions, changelog, last-sync timestamps and statistics
//!
//! ## Components
//!
//! - **Identity** (`identity`): Identity and version hashing
//! - **Analyzer** (`analyzer`): Identity grouping, conflict typing and severity
//! - **Strategies** (`strategy`): Resolution strategies
//! - **Sync Session State Machine** (`session`): Session lifecycle with validated state transitions
//! - **Persistence** (`persistence`): Durable sync state over a key-value store
//! - **Sync Coordinator** (`coordinator`): Admission, pipeline and control API

pub mod analyzer;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod persistence;
pub mod session;
pub mod strategy;

pub use analyzer::{Conflict, ConflictId, ConflictType};
pub use coordinator::{
    ManualResolution, PendingResolution, StartSyncOptions, SyncConfig, SyncCoordinator,
};
pub use error::{Result, SyncError};
pub use persistence::{KeyValueSyncStateStore, PersistedState, SyncStateStore, SyncStatistics};
pub use session::{
    ChangeLogEntry, SessionConfig, SessionError, SessionProgress, SessionStats, SessionStatus,
    SyncPhase, SyncSession, SyncSessionId, SyncType,
};
pub use strategy::{Resolution, ResolutionSelection, ResolutionStrategy, StrategyOutcome};
