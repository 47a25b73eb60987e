//! Prints what a sync session looks like in each log format.
//!
//! ```bash
//! cargo run -p core-runtime --example logging_demo               # default format
//! cargo run -p core-runtime --example logging_demo -- json
//! cargo run -p core-runtime --example logging_demo -- compact core_sync=trace
//! cargo run -p core-runtime --example logging_demo -- pretty - sink
//! ```

use bridge_traits::time::{ConsoleLogger, LogLevel};
use core_runtime::logging::{
    init_logging, redact_if_sensitive, strip_path, LogFormat, LoggingConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, instrument, trace, warn, Instrument};

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);

    let format = match args.next().as_deref() {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::default(),
    };
    let mut config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Trace);

    if let Some(filter) = args.next().filter(|f| f != "-") {
        config = config.with_filter(filter);
    }
    if args.next().as_deref() == Some("sink") {
        config = config.with_logger_sink(Arc::new(ConsoleLogger {
            min_level: LogLevel::Debug,
        }));
    }

    if let Err(e) = init_logging(config) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    info!(?format, "Logging ready");

    run_session("demo-session")
        .instrument(info_span!("sync_session", session_id = "demo-session"))
        .await;

    let signed = "https://lh3.googleusercontent.com/p/AF1Q?sig=abc&expires=1700000000";
    info!(
        url = %redact_if_sensitive("url", signed),
        owner = %redact_if_sensitive("owner", "ana@example.com"),
        access_token = %redact_if_sensitive("access_token", "ya29.a0Af"),
        file = strip_path("/home/ana/Pictures/IMG_0001.jpg"),
        "Redacted fields"
    );
}

async fn run_session(session_id: &str) {
    info!(session_id, "Session started");

    for platform in ["flickr", "google_photos"] {
        collect(platform).await;
    }

    let span = info_span!("detect");
    let _entered = span.enter();
    debug!(groups = 148, conflicts = 2, "Grouped items by identity");
    warn!(conflict_id = "c-1", severity = 4, "Conflict requires manual resolution");
    drop(_entered);

    info!(synced = 150, skipped = 0, "Session completed");
}

#[instrument]
async fn collect(platform: &str) {
    tokio::time::sleep(Duration::from_millis(5)).await;
    for item in ["IMG_0001.jpg", "IMG_0002.jpg"] {
        trace!(item, "Fetched");
    }
    debug!(count = 75, "Collected items");
}
