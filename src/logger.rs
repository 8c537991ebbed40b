//! Per-component logging handle.
//!
//! Every component owns one [`ComponentLogger`]. Its severity threshold belongs to that
//! component alone and is what SET_LOG_LEVEL adjusts. Records above the threshold are
//! always emitted as `tracing` events and, depending on the [`LogPolicy`], also appended
//! to a file or published on the bus as `LogMessage` frames.

use crate::config::{LogPolicy, LoggingSettings};
use crate::error::{AppResult, DaoError};
use crate::protocol::{self, LogLevel, LogMessage};
use crate::transport::{Context, Publisher, DEFAULT_HIGH_WATER_MARK};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing_appender::rolling::{self, RollingFileAppender};

enum Sink {
    Screen,
    File(Mutex<RollingFileAppender>),
    Network(Publisher),
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sink::Screen => f.write_str("Screen"),
            Sink::File(_) => f.write_str("File"),
            Sink::Network(_) => f.write_str("Network"),
        }
    }
}

/// Per-component logger applying the level threshold before routing a record.
#[derive(Debug)]
pub struct ComponentLogger {
    name: String,
    machine: String,
    threshold: AtomicI32,
    sink: Sink,
}

impl ComponentLogger {
    /// A logger that only emits `tracing` events.
    pub fn screen(name: impl Into<String>, level: LogLevel) -> Self {
        Self::with_sink(name.into(), level, Sink::Screen)
    }

    /// A logger that also appends formatted lines to `path`.
    pub fn file(name: impl Into<String>, level: LogLevel, path: &Path) -> AppResult<Self> {
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file_name = path
            .file_name()
            .ok_or_else(|| DaoError::LogFile(format!("{} is not a file path", path.display())))?;
        std::fs::create_dir_all(directory)?;
        let appender = rolling::never(directory, file_name);
        Ok(Self::with_sink(
            name.into(),
            level,
            Sink::File(Mutex::new(appender)),
        ))
    }

    /// A logger that also publishes every record to the bus ingress at `endpoint`.
    pub fn network(
        name: impl Into<String>,
        level: LogLevel,
        ctx: &Context,
        endpoint: &crate::transport::Endpoint,
    ) -> Self {
        let publisher = Publisher::connect(ctx, endpoint, DEFAULT_HIGH_WATER_MARK);
        Self::with_sink(name.into(), level, Sink::Network(publisher))
    }

    /// Build from a `[logging]` settings table.
    pub fn from_settings(
        name: impl Into<String>,
        settings: &LoggingSettings,
        ctx: &Context,
    ) -> AppResult<Self> {
        let name = name.into();
        let level = settings.log_level()?;
        match settings.policy {
            LogPolicy::Screen => Ok(Self::screen(name, level)),
            LogPolicy::File => {
                let path = settings.filename.as_deref().ok_or_else(|| {
                    DaoError::Configuration("logging.filename is required for the file policy".into())
                })?;
                Self::file(name, level, path)
            }
            LogPolicy::Network => {
                let endpoint = settings.endpoint.as_ref().ok_or_else(|| {
                    DaoError::Configuration("logging.endpoint is required for the network policy".into())
                })?;
                Ok(Self::network(name, level, ctx, endpoint))
            }
        }
    }

    fn with_sink(name: String, level: LogLevel, sink: Sink) -> Self {
        let machine = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            name,
            machine,
            threshold: AtomicI32::new(level as i32),
            sink,
        }
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host name stamped on records.
    pub fn machine(&self) -> &str {
        &self.machine
    }

    /// Current threshold.
    pub fn level(&self) -> LogLevel {
        LogLevel::from_code(self.threshold.load(Ordering::Relaxed))
    }

    /// Change the threshold; later records are filtered with it.
    pub fn set_level(&self, level: LogLevel) {
        self.threshold.store(level as i32, Ordering::Relaxed);
    }

    /// Whether a record at `level` passes the threshold.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level as i32 >= self.threshold.load(Ordering::Relaxed)
    }

    /// Emit a record. Returns whether it passed the threshold.
    pub fn log(&self, level: LogLevel, message: &str) -> bool {
        self.log_frame(level, 0, message)
    }

    /// Emit a record tagged with a frame number.
    pub fn log_frame(&self, level: LogLevel, frame_number: u64, message: &str) -> bool {
        if !self.enabled(level) {
            return false;
        }

        let component = self.name.as_str();
        match level {
            LogLevel::Noset | LogLevel::Trace => tracing::trace!(component, frame_number, "{message}"),
            LogLevel::Debug => tracing::debug!(component, frame_number, "{message}"),
            LogLevel::Info => tracing::info!(component, frame_number, "{message}"),
            LogLevel::Warning => tracing::warn!(component, frame_number, "{message}"),
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(component, frame_number, level = %level, "{message}")
            }
        }

        match &self.sink {
            Sink::Screen => {}
            Sink::File(appender) => {
                let line = self.record(level, frame_number, message).format_line();
                let mut appender = appender.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = writeln!(appender, "{line}") {
                    tracing::warn!(component, error = %e, "log file write failed");
                }
            }
            Sink::Network(publisher) => {
                let record = self.record(level, frame_number, message);
                publisher.send(protocol::encode(&record));
            }
        }
        true
    }

    fn record(&self, level: LogLevel, frame_number: u64, message: &str) -> LogMessage {
        LogMessage::now(self.machine.as_str(), self.name.as_str(), level, message)
            .with_frame_number(frame_number)
    }

    /// Log at `Trace`.
    pub fn trace(&self, message: &str) -> bool {
        self.log(LogLevel::Trace, message)
    }

    /// Log at `Debug`.
    pub fn debug(&self, message: &str) -> bool {
        self.log(LogLevel::Debug, message)
    }

    /// Log at `Info`.
    pub fn info(&self, message: &str) -> bool {
        self.log(LogLevel::Info, message)
    }

    /// Log at `Warning`.
    pub fn warning(&self, message: &str) -> bool {
        self.log(LogLevel::Warning, message)
    }

    /// Log at `Error`.
    pub fn error(&self, message: &str) -> bool {
        self.log(LogLevel::Error, message)
    }

    /// Log at `Critical`.
    pub fn critical(&self, message: &str) -> bool {
        self.log(LogLevel::Critical, message)
    }

    /// Stop network I/O. Records logged afterwards only reach `tracing`.
    pub fn close(&self) {
        if let Sink::Network(publisher) = &self.sink {
            publisher.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn threshold_filters_records() {
        let logger = ComponentLogger::screen("wfs", LogLevel::Warning);
        assert!(!logger.info("below threshold"));
        assert!(logger.warning("at threshold"));
        assert!(logger.critical("above threshold"));

        logger.set_level(LogLevel::Trace);
        assert_eq!(logger.level(), LogLevel::Trace);
        assert!(logger.debug("now visible"));
    }

    #[test]
    fn file_policy_appends_formatted_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wfs.log");
        let logger = ComponentLogger::file("wfs", LogLevel::Info, &path).unwrap();
        logger.debug("dropped");
        logger.error("loop diverged");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("- wfs [ERROR] : loop diverged"));
    }

    #[test]
    fn network_policy_publishes_log_messages() {
        let ctx = Context::new().unwrap();
        let mut bus = crate::transport::Subscriber::bind(
            &ctx,
            &crate::transport::Endpoint::local(0),
            16,
        )
        .unwrap();
        let port = bus.local_addr().unwrap().port();
        let logger = ComponentLogger::network(
            "dm",
            LogLevel::Debug,
            &ctx,
            &crate::transport::Endpoint::local(port),
        );

        assert!(logger.log_frame(LogLevel::Info, 42, "shape applied"));
        let frame = bus.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        let record: LogMessage = protocol::decode(&frame).unwrap();
        assert_eq!(record.component_name, "dm");
        assert_eq!(record.log_level(), LogLevel::Info);
        assert_eq!(record.frame_number, 42);
        assert_eq!(record.log_message, "shape applied");
        logger.close();
    }
}
