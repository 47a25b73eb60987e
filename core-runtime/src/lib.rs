//! Runtime plumbing shared by the sync crates.
//!
//! - [`config`]: capability injection through [`config::CoreConfig`]
//! - [`events`]: session and conflict notifications on a broadcast bus
//! - [`logging`]: `tracing` subscriber setup with field redaction

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
