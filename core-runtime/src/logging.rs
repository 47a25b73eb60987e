//! `tracing` setup for hosts embedding the sync engine.
//!
//! [`init_logging`] installs one global subscriber made of three layers:
//! a stdout formatter ([`LogFormat`]), an `EnvFilter` and, when a
//! [`LoggerSink`] is configured, a mirror that turns every surviving event
//! into a [`LogEntry`] for the host's own log pipeline.
//!
//! ```ignore
//! use bridge_traits::time::{ConsoleLogger, LogLevel};
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use std::sync::Arc;
//!
//! init_logging(
//!     LoggingConfig::default()
//!         .with_format(LogFormat::Compact)
//!         .with_level(LogLevel::Debug)
//!         .with_logger_sink(Arc::new(ConsoleLogger::default())),
//! )?;
//! tracing::info!(platform = "flickr", "Host ready");
//! ```
//!
//! Mirrored fields pass through [`redact_if_sensitive`] unless redaction is
//! switched off. Events emitted inside a Tokio runtime are handed to the sink
//! on a spawned task; elsewhere they are delivered on a short-lived
//! current-thread runtime.

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

/// Targets that follow [`LoggingConfig::level`] when no custom filter is set.
const ENGINE_TARGETS: &[&str] = &["core_runtime", "core_sync", "bridge_traits", "bridge_desktop"];

/// Field names whose values never leave the process.
const CREDENTIAL_MARKERS: &[&str] = &[
    "token",
    "password",
    "secret",
    "api_key",
    "authorization",
    "bearer",
    "cookie",
];

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored, with span enter/exit markers
    Pretty,
    /// One JSON object per line
    Json,
    /// Single-line text
    Compact,
}

impl Default for LogFormat {
    /// Pretty for debug builds, JSON for release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level applied to the engine crates by the default filter
    pub level: LogLevel,
    /// Scrub credentials, emails and signed URL queries in mirrored entries
    pub redact_pii: bool,
    /// `EnvFilter` directives replacing the default filter, e.g. `core_sync=trace,sqlx=info`
    pub filter: Option<String>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    pub enable_spans: bool,
    pub display_target: bool,
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            redact_pii: true,
            filter: None,
            logger_sink: None,
            enable_spans: true,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("redact_pii", &self.redact_pii)
            .field("filter", &self.filter)
            .field("has_sink", &self.logger_sink.is_some())
            .finish_non_exhaustive()
    }
}

impl LoggingConfig {
    pub fn with_format(self, format: LogFormat) -> Self {
        Self { format, ..self }
    }

    pub fn with_level(self, level: LogLevel) -> Self {
        Self { level, ..self }
    }

    pub fn with_pii_redaction(self, redact_pii: bool) -> Self {
        Self { redact_pii, ..self }
    }

    pub fn with_filter(self, filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..self
        }
    }

    pub fn with_logger_sink(self, sink: Arc<dyn LoggerSink>) -> Self {
        Self {
            logger_sink: Some(sink),
            ..self
        }
    }

    pub fn with_spans(self, enable_spans: bool) -> Self {
        Self {
            enable_spans,
            ..self
        }
    }

    pub fn with_target(self, display_target: bool) -> Self {
        Self {
            display_target,
            ..self
        }
    }

    pub fn with_thread_info(self, display_thread_info: bool) -> Self {
        Self {
            display_thread_info,
            ..self
        }
    }
}

/// Installs the global subscriber.
///
/// Fails with [`Error::Config`] on an unparsable filter or when a global
/// subscriber is already set.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let mirror = SinkMirror {
        sink: config.logger_sink.clone(),
        redact: config.redact_pii,
    };

    tracing_subscriber::registry()
        .with(output_layer(&config))
        .with(filter)
        .with(mirror)
        .try_init()
        .map_err(|e| Error::Config(format!("Logging already initialized or unusable: {}", e)))
}

fn output_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let base = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(config.display_target)
        .with_thread_ids(config.display_thread_info)
        .with_thread_names(config.display_thread_info);

    match config.format {
        LogFormat::Compact => base.compact().boxed(),
        LogFormat::Pretty if config.enable_spans => {
            base.pretty().with_span_events(FmtSpan::ACTIVE).boxed()
        }
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Json => base
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(config.enable_spans)
            .boxed(),
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = config.filter.clone().unwrap_or_else(|| {
        let level = config.level.as_str().to_ascii_lowercase();
        ENGINE_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, level))
            .chain(std::iter::once("sqlx=warn".to_string()))
            .collect::<Vec<_>>()
            .join(",")
    });

    EnvFilter::try_new(&directives)
        .map_err(|e| Error::Config(format!("Invalid log filter '{}': {}", directives, e)))
}

/// Copies events into the host [`LoggerSink`].
struct SinkMirror {
    sink: Option<Arc<dyn LoggerSink>>,
    redact: bool,
}

impl SinkMirror {
    fn entry_for<S>(&self, event: &Event<'_>, level: LogLevel, ctx: &Context<'_, S>) -> LogEntry
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let metadata = event.metadata();
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let message = fields
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());
        let mut entry = LogEntry::new(level, metadata.target(), message);

        entry.fields = fields
            .values
            .into_iter()
            .map(|(key, value)| {
                let value = if self.redact {
                    redact_if_sensitive(&key, &value)
                } else {
                    value
                };
                (key, value)
            })
            .collect();
        entry.span = ctx.lookup_current().map(|span| span.name().to_string());
        entry
    }
}

impl<S> Layer<S> for SinkMirror
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = &self.sink else { return };

        let level = log_level(*event.metadata().level());
        if level < sink.min_level() {
            return;
        }

        deliver(Arc::clone(sink), self.entry_for(event, level, &ctx));
    }
}

fn deliver(sink: Arc<dyn LoggerSink>, entry: LogEntry) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            if let Err(e) = sink.log(entry).await {
                eprintln!("log sink rejected entry: {}", e);
            }
        });
        return;
    }

    let outcome = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| e.to_string())
        .and_then(|runtime| runtime.block_on(sink.log(entry)).map_err(|e| e.to_string()));
    if let Err(e) = outcome {
        eprintln!("log sink rejected entry: {}", e);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: BTreeMap<String, String>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            name => {
                self.values.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_owned());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }
}

fn log_level(level: Level) -> LogLevel {
    match level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warn,
        Level::INFO => LogLevel::Info,
        Level::DEBUG => LogLevel::Debug,
        Level::TRACE => LogLevel::Trace,
    }
}

/// Scrubs `value` when the field name or the value's shape looks sensitive.
///
/// Credential-named fields become `[REDACTED]`, URLs lose their query
/// (signed photo URLs carry access tokens there) and email addresses keep
/// only their first character.
///
/// ```ignore
/// info!(url = %redact_if_sensitive("url", &item_url), "Collected item");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    let name = field_name.to_ascii_lowercase();
    if CREDENTIAL_MARKERS.iter().any(|marker| name.contains(marker)) {
        return REDACTED.to_string();
    }

    if value.starts_with("https://") || value.starts_with("http://") {
        if let Some((base, _query)) = value.split_once('?') {
            return format!("{}?{}", base, REDACTED);
        }
        return value.to_string();
    }

    if let Some((local, domain)) = value.split_once('@') {
        if domain.contains('.') {
            let initial: String = local.chars().take(1).collect();
            return format!("{}***@{}", initial, REDACTED);
        }
    }

    value.to_string()
}

/// File name component of a Unix or Windows path.
///
/// ```ignore
/// info!(file = %strip_path("/Users/jo/Pictures/IMG_0001.jpg"), "Importing");
/// ```
pub fn strip_path(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as SinkResult;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        entries: Mutex<Vec<LogEntry>>,
    }

    #[async_trait]
    impl LoggerSink for RecordingSink {
        async fn log(&self, entry: LogEntry) -> SinkResult<()> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }

        fn min_level(&self) -> LogLevel {
            LogLevel::Debug
        }
    }

    #[test]
    fn test_builder_methods_compose() {
        let config = LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_level(LogLevel::Warn)
            .with_pii_redaction(false)
            .with_filter("core_sync=trace")
            .with_spans(false)
            .with_target(false)
            .with_thread_info(true);

        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.level, LogLevel::Warn);
        assert!(!config.redact_pii);
        assert_eq!(config.filter.as_deref(), Some("core_sync=trace"));
        assert!(!config.enable_spans);
        assert!(!config.display_target);
        assert!(config.display_thread_info);
        assert!(format!("{:?}", config).contains("has_sink: false"));
    }

    #[test]
    fn test_default_filter_targets_engine_crates() {
        let config = LoggingConfig::default().with_level(LogLevel::Debug);
        let filter = build_filter(&config).unwrap().to_string();

        for target in ENGINE_TARGETS {
            assert!(filter.contains(&format!("{}=debug", target)));
        }
        assert!(filter.contains("sqlx=warn"));
    }

    #[test]
    fn test_custom_filter_replaces_default() {
        let config = LoggingConfig::default().with_filter("core_sync=trace,bridge_desktop=debug");
        let filter = build_filter(&config).unwrap().to_string();

        assert!(filter.contains("core_sync=trace"));
        assert!(!filter.contains("sqlx"));
    }

    #[test]
    fn test_unparsable_filter_is_rejected() {
        let config = LoggingConfig::default().with_filter("core_sync=[");
        assert!(matches!(build_filter(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_redaction_rules() {
        assert_eq!(redact_if_sensitive("refresh_token", "1//0g"), REDACTED);
        assert_eq!(redact_if_sensitive("Cookie", "sid=1"), REDACTED);
        assert_eq!(
            redact_if_sensitive("url", "https://cdn.example.com/p/1.jpg?sig=abc"),
            "https://cdn.example.com/p/1.jpg?[REDACTED]"
        );
        assert_eq!(redact_if_sensitive("owner", "jo@example.com"), "j***@[REDACTED]");
        assert_eq!(redact_if_sensitive("handle", "@jo"), "@jo");
        assert_eq!(redact_if_sensitive("item_id", "12345"), "12345");
    }

    #[test]
    fn test_strip_path_handles_both_separators() {
        assert_eq!(strip_path("/home/jo/photos/a.jpg"), "a.jpg");
        assert_eq!(strip_path("C:\\Users\\Jo\\a.jpg"), "a.jpg");
        assert_eq!(strip_path("mixed/dir\\a.jpg"), "a.jpg");
        assert_eq!(strip_path("a.jpg"), "a.jpg");
    }

    #[test]
    fn test_mirror_forwards_redacted_entry_with_span() {
        let sink = Arc::new(RecordingSink::default());
        let mirror = SinkMirror {
            sink: Some(sink.clone()),
            redact: true,
        };
        let subscriber = tracing_subscriber::registry().with(mirror);

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("collect");
            let _entered = span.enter();
            tracing::info!(
                target: "core_sync::coordinator",
                platform = "flickr",
                count = 3u64,
                api_key = "k-123",
                "Collected items"
            );
            tracing::trace!("below the sink level");
        });

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.target, "core_sync::coordinator");
        assert_eq!(entry.message, "Collected items");
        assert_eq!(entry.span.as_deref(), Some("collect"));
        assert_eq!(entry.fields["platform"], "flickr");
        assert_eq!(entry.fields["count"], "3");
        assert_eq!(entry.fields["api_key"], REDACTED);
    }
}
