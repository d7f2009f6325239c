//! Logging setup and per-session diagnostics
//!
//! Session diagnostics at info level and above are mirrored to the client as
//! `LOG` events so the browser console shows what the orchestrator does.

use std::fmt::Display;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{BridgeError, Result};
use crate::signaling::{EventSink, ServerEvent};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log spans
    pub log_spans: bool,
    /// Application name to include in logs
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "castbridge".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Install the global subscriber. `RUST_LOG` directives take precedence
/// over the configured level.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let span_events = if config.log_spans { FmtSpan::ACTIVE } else { FmtSpan::NONE };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| BridgeError::configuration(format!("Failed to install log subscriber: {}", e)))?;

    log_welcome(&config.app_name, env!("CARGO_PKG_VERSION"));
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| BridgeError::configuration(format!("Invalid log level: {}", level)))
}

pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}

/// Diagnostics for one session, mirrored to its client
#[derive(Debug, Clone)]
pub struct SessionLog {
    session_id: String,
    sink: Option<EventSink>,
}

impl SessionLog {
    pub fn new(session_id: impl Into<String>, sink: Option<EventSink>) -> Self {
        Self {
            session_id: session_id.into(),
            sink,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Step detail, not mirrored
    pub fn debug(&self, message: impl Display) {
        tracing::debug!(session_id = %self.session_id, "{}", message);
    }

    pub fn info(&self, message: impl Display) {
        let text = message.to_string();
        tracing::info!(session_id = %self.session_id, "{}", text);
        self.mirror(text);
    }

    pub fn warn(&self, message: impl Display) {
        let text = message.to_string();
        tracing::warn!(session_id = %self.session_id, "{}", text);
        self.mirror(text);
    }

    pub fn error(&self, message: impl Display) {
        let text = message.to_string();
        tracing::error!(session_id = %self.session_id, "{}", text);
        self.mirror(text);
    }

    /// Send an event to the client; a gone client is not an error
    pub fn emit(&self, event: ServerEvent) {
        if let Some(sink) = &self.sink {
            if sink.send(event).is_err() {
                tracing::trace!(session_id = %self.session_id, "Client channel closed, event dropped");
            }
        }
    }

    fn mirror(&self, text: String) {
        self.emit(ServerEvent::Log { text });
    }
}
