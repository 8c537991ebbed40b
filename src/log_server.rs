//! Central log server: a [`Broker`] whose capture stream is persisted to a rotating file.
//!
//! Every captured frame is decoded as a `LogMessage` and appended as
//! `[<time_stamp>] [<machine>] - <component> [<LEVEL>] : <message>`.
//!
//! Shutdown sequence (signal or [`LogServer::shutdown_handle`]):
//!
//! 1. the relay returns,
//! 2. the capture thread notices within one poll period and exits,
//! 3. ingress, egress, capture publisher and capture subscriber are closed in that order,
//! 4. the messaging context is released.

use crate::broker::{Broker, RelayStats};
use crate::config::{LogFileSettings, LogServerSettings, Rotation};
use crate::error::{AppResult, DaoError};
use crate::protocol::{self, LogMessage};
use crate::signals;
use crate::transport::Subscriber;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{self, RollingFileAppender};

/// How long the capture thread waits for a frame before re-checking for shutdown.
pub const CAPTURE_POLL: Duration = Duration::from_secs(1);

/// Build the rotating appender described by `settings`.
///
/// `backups` rotated segments are kept next to the live file. The appender prunes on
/// every rollover (it keeps `max_log_files - 1` old segments, then opens the new one);
/// segments left over from earlier runs are pruned here, before the live file opens.
pub fn open_log_file(settings: &LogFileSettings) -> AppResult<RollingFileAppender> {
    std::fs::create_dir_all(&settings.directory)?;
    prune_segments(settings)?;
    let rotation = match settings.rotation {
        Rotation::Minutely => rolling::Rotation::MINUTELY,
        Rotation::Hourly => rolling::Rotation::HOURLY,
        Rotation::Daily => rolling::Rotation::DAILY,
        Rotation::Never => rolling::Rotation::NEVER,
    };
    RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(settings.file_prefix.as_str())
        .filename_suffix("log")
        .max_log_files(settings.backups.saturating_add(1))
        .build(&settings.directory)
        .map_err(|e| DaoError::LogFile(e.to_string()))
}

/// Dated segments (`<prefix>.<date>.log`) of `settings`, oldest first.
fn dated_segments(settings: &LogFileSettings) -> AppResult<Vec<PathBuf>> {
    let head = format!("{}.", settings.file_prefix);
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(&settings.directory)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_segment = name
            .strip_prefix(head.as_str())
            .and_then(|rest| rest.strip_suffix(".log"))
            .is_some_and(|date| {
                !date.is_empty() && date.chars().all(|c| c.is_ascii_digit() || c == '-')
            });
        if is_segment && path.is_file() {
            segments.push(path);
        }
    }
    // dates are zero-padded, so name order is age order
    segments.sort();
    Ok(segments)
}

fn prune_segments(settings: &LogFileSettings) -> AppResult<()> {
    if settings.rotation == Rotation::Never {
        return Ok(());
    }
    let segments = dated_segments(settings)?;
    let excess = segments.len().saturating_sub(settings.backups);
    for stale in &segments[..excess] {
        debug!(file = %stale.display(), "removing old log segment");
        std::fs::remove_file(stale)?;
    }
    Ok(())
}

/// Counters reported when the server stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogServerStats {
    /// Broker counters
    pub relay: RelayStats,
    /// Lines appended to the log file
    pub lines_written: u64,
    /// Captured frames that were not log records
    pub undecodable: u64,
}

/// Broker plus a thread persisting every captured record.
#[derive(Debug)]
pub struct LogServer {
    broker: Broker,
    capture: Option<Subscriber>,
    log_file: LogFileSettings,
}

impl LogServer {
    /// Bind the broker and open the log file.
    pub fn new(settings: LogServerSettings) -> AppResult<Self> {
        settings.validate()?;
        let broker = Broker::new(settings.broker)?;
        let capture = broker.capture_subscriber();
        Ok(Self {
            broker,
            capture: Some(capture),
            log_file: settings.log_file,
        })
    }

    /// Token that stops [`LogServer::run`] when cancelled.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.broker.shutdown_handle()
    }

    /// Bound ingress address.
    pub fn ingress_addr(&self) -> Option<SocketAddr> {
        self.broker.ingress_addr()
    }

    /// Bound egress address, in bind mode.
    pub fn egress_addr(&self) -> Option<SocketAddr> {
        self.broker.egress_addr()
    }

    /// Also stop on SIGINT / SIGTERM.
    pub fn install_signal_handlers(&self) -> AppResult<()> {
        signals::cancel_on_signal(self.broker.context()?, self.shutdown_handle());
        Ok(())
    }

    /// Relay and persist until shut down, then release every resource.
    pub fn run(mut self) -> AppResult<LogServerStats> {
        let appender = open_log_file(&self.log_file)?;
        let capture = self.capture.take().ok_or(DaoError::ChannelClosed)?;
        let token = self.shutdown_handle();
        info!(
            directory = %self.log_file.directory.display(),
            prefix = %self.log_file.file_prefix,
            rotation = ?self.log_file.rotation,
            "log server running"
        );

        let consumer = spawn_capture_thread(capture, appender, token.clone())?;
        let relay = self.broker.run();
        // the relay only returns on shutdown or a dead ingress; stop the consumer either way
        token.cancel();

        let (capture, lines_written, undecodable) = consumer
            .join()
            .map_err(|_| DaoError::ThreadPanicked("log-capture".into()))?;

        self.broker.close();
        capture.close();
        drop(capture);
        self.broker.term();

        let stats = LogServerStats {
            relay: relay?,
            lines_written,
            undecodable,
        };
        info!(lines = stats.lines_written, "log server stopped");
        Ok(stats)
    }
}

type CaptureResult = (Subscriber, u64, u64);

fn spawn_capture_thread(
    mut capture: Subscriber,
    mut appender: RollingFileAppender,
    token: CancellationToken,
) -> AppResult<JoinHandle<CaptureResult>> {
    let handle = thread::Builder::new()
        .name("log-capture".into())
        .spawn(move || {
            let mut lines = 0u64;
            let mut undecodable = 0u64;
            while !token.is_cancelled() {
                match capture.recv_timeout(CAPTURE_POLL) {
                    Ok(Some(frame)) => match protocol::decode::<LogMessage>(&frame) {
                        Ok(record) => {
                            if let Err(e) = writeln!(appender, "{}", record.format_line()) {
                                warn!(error = %e, "log file write failed");
                            } else {
                                lines += 1;
                            }
                        }
                        Err(e) => {
                            undecodable += 1;
                            warn!(error = %e, "captured frame is not a log message");
                        }
                    },
                    Ok(None) => {}
                    Err(_) => break,
                }
            }
            if let Err(e) = appender.flush() {
                warn!(error = %e, "log file flush failed");
            }
            debug!(lines, "capture thread exiting");
            (capture, lines, undecodable)
        })?;
    Ok(handle)
}
