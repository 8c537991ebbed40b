//! Wire messages exchanged on the command channel and the log/event bus.
//!
//! Messages are protocol buffers encoded with `prost`. Every transport frame carries
//! exactly one encoded message.

use crate::error::{AppResult, DaoError};
use bytes::Bytes;
use prost::Message;
use std::fmt;
use std::str::FromStr;

/// Command codes understood by a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Command {
    /// Fire a lifecycle transition named by the payload
    Exec = 0,
    /// Reload configuration
    Setup = 1,
    /// Update a dynamic parameter
    Update = 2,
    /// Liveness check; replies with the process id
    Ping = 3,
    /// Current lifecycle state name
    State = 4,
    /// Payload is the level name
    SetLogLevel = 5,
    /// Dump internal state
    Dump = 6,
    /// Application-defined command
    Other = 7,
    /// Variable lookup
    Query = 8,
}

impl Command {
    /// Upper-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Exec => "EXEC",
            Command::Setup => "SETUP",
            Command::Update => "UPDATE",
            Command::Ping => "PING",
            Command::State => "STATE",
            Command::SetLogLevel => "SET_LOG_LEVEL",
            Command::Dump => "DUMP",
            Command::Other => "OTHER",
            Command::Query => "QUERY",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome carried by every reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ReplyStatus {
    /// Command handled
    Success = 0,
    /// Command rejected; payload holds the reason
    Failure = 1,
}

/// Severity of a log record, using the numeric codes carried on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum LogLevel {
    /// Unset; lets everything through
    Noset = 0,
    /// Finest detail
    Trace = 5,
    /// Diagnostics
    Debug = 10,
    /// Normal operation
    Info = 20,
    /// Unexpected but handled
    Warning = 30,
    /// Operation failed
    Error = 40,
    /// Component cannot continue
    Critical = 50,
}

impl LogLevel {
    /// Upper-case name as written in log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Noset => "NOSET",
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// Decode a wire code, mapping unknown codes to `Noset`.
    pub fn from_code(code: i32) -> Self {
        LogLevel::try_from(code).unwrap_or(LogLevel::Noset)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = DaoError;

    /// Case-insensitive. `FATAL` is an alias of `CRITICAL` and `WARN` of `WARNING`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" | "FATAL" => Ok(LogLevel::Critical),
            _ => Err(DaoError::UnknownLogLevel(s.to_string())),
        }
    }
}

/// A request sent to a component's command socket.
#[derive(Clone, PartialEq, Message)]
pub struct CommandMessage {
    /// [`Command`] code
    #[prost(enumeration = "Command", tag = "1")]
    pub function: i32,
    /// Command argument
    #[prost(string, tag = "2")]
    pub payload: String,
}

impl CommandMessage {
    /// Command `function` with its argument.
    pub fn new(function: Command, payload: impl Into<String>) -> Self {
        Self {
            function: function as i32,
            payload: payload.into(),
        }
    }
}

/// The single answer to a `CommandMessage`.
#[derive(Clone, PartialEq, Message)]
pub struct ReplyMessage {
    /// [`ReplyStatus`] code
    #[prost(enumeration = "ReplyStatus", tag = "1")]
    pub status: i32,
    /// Result or error text
    #[prost(string, optional, tag = "2")]
    pub payload: Option<String>,
}

impl ReplyMessage {
    /// A success reply.
    pub fn success(payload: Option<String>) -> Self {
        Self {
            status: ReplyStatus::Success as i32,
            payload,
        }
    }

    /// A failure carrying `message`.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Failure as i32,
            payload: Some(message.into()),
        }
    }

    /// Whether the status is `Success`.
    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success as i32
    }

    /// Payload text, empty when absent.
    pub fn text(&self) -> &str {
        self.payload.as_deref().unwrap_or_default()
    }
}

/// One log record on the bus.
#[derive(Clone, PartialEq, Message)]
pub struct LogMessage {
    /// Local time, `%Y-%m-%d %H:%M:%S%.3f`
    #[prost(string, tag = "1")]
    pub time_stamp: String,
    /// Host name of the sender
    #[prost(string, tag = "2")]
    pub machine: String,
    /// Sender component
    #[prost(string, tag = "3")]
    pub component_name: String,
    /// [`LogLevel`] code
    #[prost(enumeration = "LogLevel", tag = "4")]
    pub level: i32,
    /// Record text
    #[prost(string, tag = "5")]
    pub log_message: String,
    /// Frame the record refers to, 0 when none
    #[prost(uint64, tag = "6")]
    pub frame_number: u64,
}

impl LogMessage {
    /// A record stamped with the current local time.
    pub fn now(
        machine: impl Into<String>,
        component_name: impl Into<String>,
        level: LogLevel,
        log_message: impl Into<String>,
    ) -> Self {
        Self {
            time_stamp: timestamp(),
            machine: machine.into(),
            component_name: component_name.into(),
            level: level as i32,
            log_message: log_message.into(),
            frame_number: 0,
        }
    }

    /// Attach a frame number.
    pub fn with_frame_number(mut self, frame_number: u64) -> Self {
        self.frame_number = frame_number;
        self
    }

    /// Decoded level; unknown codes read as `Noset`.
    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_code(self.level)
    }

    /// `[<time_stamp>] [<machine>] - <component> [<LEVEL>] : <message>`
    pub fn format_line(&self) -> String {
        format!(
            "[{}] [{}] - {} [{}] : {}",
            self.time_stamp,
            self.machine,
            self.component_name,
            self.log_level(),
            self.log_message
        )
    }
}

/// Local wall-clock time with millisecond precision.
pub fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

/// Encode any message into a frame body.
pub fn encode<M: Message>(message: &M) -> Bytes {
    Bytes::from(message.encode_to_vec())
}

/// Decode a frame body.
pub fn decode<M: Message + Default>(frame: &[u8]) -> AppResult<M> {
    Ok(M::decode(frame)?)
}
