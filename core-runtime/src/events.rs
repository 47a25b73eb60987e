//! # Event Bus System
//!
//! Typed, one-way notifications from the sync engine using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies for sync sessions and conflicts
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! Emitting never blocks the publisher. Subscribers that fall behind receive
//! `RecvError::Lagged(n)` and can keep reading; `RecvError::Closed` signals
//! that every sender is gone.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   emit    ┌───────────┐   subscribe   ┌────────────┐
//! │ Sync Coordinator ├──────────>│ EventBus  ├──────────────>│ UI / Host  │
//! └──────────────────┘           │ (broadcast├──────────────>│ Reporter   │
//!                                │  channel) │               └────────────┘
//!                                └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Paused {
//!         session_id: "session-1".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.session_id(), "session-1");
//! # }
//! ```
//!
//! ## Event Types
//!
//! ### Sync Events
//! - `Started`, `Progress`, `Paused`, `Resumed`
//! - `ChangeApplied`: A resolved conflict was written to the version record
//! - `Completed`, `Failed`, `Cancelled`
//! - `Error`: A non-fatal, per-phase error was recorded
//!
//! ### Conflict Events
//! - `Detected`: Conflicts were found during detection
//! - `RequiresResolution`: A conflict was deferred to manual resolution
//! - `Resolved`: A conflict was resolved automatically
//! - `ResolvedManually`: A pending conflict was resolved by a caller

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;


pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Session lifecycle events
    Sync(SyncEvent),
    /// Conflict detection and resolution events
    Conflict(ConflictEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Conflict(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Error { .. }) => EventSeverity::Warning,
            CoreEvent::Conflict(ConflictEvent::RequiresResolution { .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Conflict(ConflictEvent::Detected { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Session the event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.session_id(),
            CoreEvent::Conflict(e) => e.session_id(),
        }
    }

    /// Conflict the event refers to, if any.
    pub fn conflict_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Sync(SyncEvent::ChangeApplied { conflict_id, .. }) => Some(conflict_id),
            CoreEvent::Sync(_) => None,
            CoreEvent::Conflict(e) => e.conflict_id(),
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events related to sync session lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Session admitted and pipeline started.
    Started {
        session_id: String,
        /// Platforms being synced.
        platforms: Vec<String>,
        /// Sync type (full, incremental, differential, manual).
        sync_type: String,
    },
    /// Progress update after a phase step.
    Progress {
        session_id: String,
        /// Number of items processed so far.
        processed_items: u64,
        /// Total items collected.
        total_items: u64,
        /// Progress percentage (0-100).
        percentage: u8,
        /// Current phase (e.g., "collect", "detect").
        phase: String,
    },
    /// Session paused between phases.
    Paused {
        session_id: String,
    },
    /// Paused session resumed.
    Resumed {
        session_id: String,
    },
    /// A resolved conflict was applied to the version record.
    ChangeApplied {
        session_id: String,
        /// The applied conflict.
        conflict_id: String,
        /// Item IDs whose versions were recorded.
        item_ids: Vec<String>,
        /// Whether the change was only simulated.
        dry_run: bool,
    },
    /// Session finished.
    Completed {
        session_id: String,
        /// Items synced.
        synced_items: u64,
        /// Items skipped after apply failures.
        skipped_items: u64,
        /// Items involved in conflicts.
        conflict_items: u64,
        /// Number of non-fatal errors recorded.
        error_count: u64,
        /// Duration of the session in milliseconds.
        duration_ms: u64,
    },
    /// Session failed with a structural error.
    Failed {
        session_id: String,
        /// Human-readable error message.
        message: String,
        /// Items processed before failure.
        processed_items: u64,
    },
    /// Session cancelled by a caller.
    Cancelled {
        session_id: String,
        /// Items processed before cancellation.
        processed_items: u64,
    },
    /// Non-fatal error recorded during a phase.
    Error {
        session_id: String,
        /// Phase the error occurred in.
        phase: String,
        /// Human-readable error message.
        message: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::Paused { .. } => "Sync paused",
            SyncEvent::Resumed { .. } => "Sync resumed",
            SyncEvent::ChangeApplied { .. } => "Change applied",
            SyncEvent::Completed { .. } => "Sync completed successfully",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
            SyncEvent::Error { .. } => "Sync error recorded",
        }
    }

    fn session_id(&self) -> &str {
        match self {
            SyncEvent::Started { session_id, .. }
            | SyncEvent::Progress { session_id, .. }
            | SyncEvent::Paused { session_id }
            | SyncEvent::Resumed { session_id }
            | SyncEvent::ChangeApplied { session_id, .. }
            | SyncEvent::Completed { session_id, .. }
            | SyncEvent::Failed { session_id, .. }
            | SyncEvent::Cancelled { session_id, .. }
            | SyncEvent::Error { session_id, .. } => session_id,
        }
    }
}

// ============================================================================
// Conflict Events
// ============================================================================

/// Events related to conflict detection and resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ConflictEvent {
    /// Conflicts found during detection.
    Detected {
        session_id: String,
        /// IDs of the detected conflicts.
        conflict_ids: Vec<String>,
    },
    /// Conflict deferred to manual resolution.
    RequiresResolution {
        session_id: String,
        /// The deferred conflict.
        conflict_id: String,
        /// Conflict severity (1-10).
        severity: u8,
    },
    /// Conflict resolved by an automatic strategy.
    Resolved {
        session_id: String,
        /// The resolved conflict.
        conflict_id: String,
        /// Strategy applied.
        strategy: String,
    },
    /// Pending conflict resolved by a caller.
    ResolvedManually {
        session_id: String,
        /// The resolved conflict.
        conflict_id: String,
        /// Strategy recorded by the caller.
        strategy: String,
    },
}

impl ConflictEvent {
    fn description(&self) -> &str {
        match self {
            ConflictEvent::Detected { .. } => "Conflicts detected",
            ConflictEvent::RequiresResolution { .. } => "Conflict requires resolution",
            ConflictEvent::Resolved { .. } => "Conflict resolved",
            ConflictEvent::ResolvedManually { .. } => "Conflict resolved manually",
        }
    }

    fn session_id(&self) -> &str {
        match self {
            ConflictEvent::Detected { session_id, .. }
            | ConflictEvent::RequiresResolution { session_id, .. }
            | ConflictEvent::Resolved { session_id, .. }
            | ConflictEvent::ResolvedManually { session_id, .. } => session_id,
        }
    }

    fn conflict_id(&self) -> Option<&str> {
        match self {
            ConflictEvent::Detected { .. } => None,
            ConflictEvent::RequiresResolution { conflict_id, .. }
            | ConflictEvent::Resolved { conflict_id, .. }
            | ConflictEvent::ResolvedManually { conflict_id, .. } => Some(conflict_id),
        }
    }
}

// ============================================================================
// Bus
// ============================================================================

/// Cloneable broadcast handle shared by the coordinator and its hosts.
///
/// Every subscriber sees every event emitted after it subscribed. Emitting
/// with nobody listening is not a failure for the engine; callers discard
/// the `SendError`.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` bounds how far a subscriber may fall behind before it lags.
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    /// Sends `event` to current subscribers and returns how many there were.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus({} subscribers)", self.subscriber_count())
    }
}

// ============================================================================
// Filtered stream
// ============================================================================

type Predicate = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver that skips events rejected by an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let conflicts = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Conflict(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    predicate: Option<Predicate>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            predicate: None,
        }
    }

    /// Replaces the predicate.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Box::new(predicate)),
            ..self
        }
    }

    /// Keeps only events carrying `session_id`.
    pub fn for_session(self, session_id: impl Into<String>) -> Self {
        let wanted = session_id.into();
        self.filter(move |event| event.session_id() == wanted)
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.predicate.as_ref().map_or(true, |keep| keep(event))
    }

    /// Waits for the next accepted event.
    ///
    /// Lag and closure surface as `RecvError::Lagged` and `RecvError::Closed`.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`EventStream::recv`]; `None` once the buffer is drained.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        use broadcast::error::TryRecvError;

        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(skipped)) => return Some(Err(RecvError::Lagged(skipped))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filtered", &self.predicate.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn started(session_id: &str) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::Started {
            session_id: session_id.to_string(),
            platforms: vec!["flickr".to_string(), "google_photos".to_string()],
            sync_type: "full".to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);

        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        // Should error when no subscribers
        assert!(bus.emit(started("s-1")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = started("s-1");
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Conflict(_)));

        bus.emit(started("s-1")).ok();

        let conflict_event = CoreEvent::Conflict(ConflictEvent::RequiresResolution {
            session_id: "s-1".to_string(),
            conflict_id: "c-1".to_string(),
            severity: 4,
        });
        bus.emit(conflict_event.clone()).ok();

        let received = stream.recv().await.unwrap();
        assert_eq!(received, conflict_event);
    }

    #[tokio::test]
    async fn test_event_stream_for_session() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe()).for_session("s-2");

        bus.emit(started("s-1")).ok();
        bus.emit(started("s-2")).ok();

        let received = stream.recv().await.unwrap();
        assert_eq!(received.session_id(), "s-2");
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(started(&format!("s-{}", i))).ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Sync(SyncEvent::Failed {
            session_id: "s-1".to_string(),
            message: "boom".to_string(),
            processed_items: 0,
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let pending = CoreEvent::Conflict(ConflictEvent::RequiresResolution {
            session_id: "s-1".to_string(),
            conflict_id: "c-1".to_string(),
            severity: 2,
        });
        assert_eq!(pending.severity(), EventSeverity::Warning);

        let progress = CoreEvent::Sync(SyncEvent::Progress {
            session_id: "s-1".to_string(),
            processed_items: 1,
            total_items: 2,
            percentage: 50,
            phase: "detect".to_string(),
        });
        assert_eq!(progress.severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_conflict_id_accessor() {
        let applied = CoreEvent::Sync(SyncEvent::ChangeApplied {
            session_id: "s-1".to_string(),
            conflict_id: "c-9".to_string(),
            item_ids: vec!["a".to_string()],
            dry_run: false,
        });
        assert_eq!(applied.conflict_id(), Some("c-9"));
        assert_eq!(started("s-1").conflict_id(), None);
        assert_eq!(applied.description(), "Change applied");
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Conflict(ConflictEvent::ResolvedManually {
            session_id: "s-1".to_string(),
            conflict_id: "c-1".to_string(),
            strategy: "keep_both".to_string(),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ResolvedManually"));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let handle1 = tokio::spawn(async move {
            for i in 0..10 {
                bus1.emit(started(&format!("a-{}", i))).ok();
            }
        });
        let handle2 = tokio::spawn(async move {
            for i in 0..10 {
                bus2.emit(started(&format!("b-{}", i))).ok();
            }
        });

        handle1.await.ok();
        handle2.await.ok();

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }
}
