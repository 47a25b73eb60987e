//! Workspace facade crate.
//!
//! Re-exports the sync engine crates behind feature flags so host
//! applications can depend on `photo-sync-workspace` and enable the
//! documented features without wiring each crate individually.
//!
//! - `engine` (default): `core-sync`, `core-runtime` and `bridge-traits`
//! - `desktop-shims`: additionally lets `CoreConfig` fall back to the
//!   SQLite-backed key-value store from `bridge-desktop`

#[cfg(feature = "engine")]
pub use bridge_traits;
#[cfg(feature = "engine")]
pub use core_runtime;
#[cfg(feature = "engine")]
pub use core_sync;
