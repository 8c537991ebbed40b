//! Settings files for components and the log server.
//!
//! Settings are loaded from a TOML file and then overridden by environment variables
//! prefixed with `DAO_`. Nested keys are separated by a double underscore:
//!
//! ```text
//! DAO_CONTROL__PORT=9001
//! DAO_LOGGING__LEVEL=DEBUG
//! DAO_LOG_FILE__ROTATION=hourly
//! ```
//!
//! # Example
//! ```no_run
//! use dao_control::config::ComponentSettings;
//!
//! let settings = ComponentSettings::load_from("config/component.toml")?;
//! settings.validate()?;
//! println!("component {} on {}", settings.static_config.name, settings.control.endpoint());
//! # Ok::<(), dao_control::error::DaoError>(())
//! ```

use crate::error::{AppResult, DaoError};
use crate::protocol::LogLevel;
use crate::transport::{Endpoint, DEFAULT_HIGH_WATER_MARK};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Opaque key/value configuration record handed to component hooks.
pub type ConfigRecord = toml::Table;

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "DAO_";

fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

// ---------------------------------------------------------------------------
// Component settings
// ---------------------------------------------------------------------------

/// Everything needed to bring a component up from a settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSettings {
    /// `[static]` table
    #[serde(rename = "static")]
    pub static_config: StaticSettings,
    /// `[control]` table
    #[serde(default)]
    pub control: ControlSettings,
    /// `[logging]` table
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Handed to the dynamic-configuration hook on every Enable
    #[serde(default)]
    pub dynamic: ConfigRecord,
}

/// Loaded once, on Init.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticSettings {
    /// Component name, stamped on every log record
    pub name: String,
    /// Every other key of the `[static]` table
    #[serde(flatten)]
    pub extra: ConfigRecord,
}

/// Command channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Bind host; `*` binds every interface
    #[serde(default = "default_ip")]
    pub ip: String,
    /// Command socket port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Advance Init -> Enable -> Run right after construction
    #[serde(default)]
    pub auto_run: bool,
    /// Command socket poll timeout; also bounds how long `stop` waits for the command thread
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
    /// Idle delay between update sweeps, 0 for a pure spin
    #[serde(default = "default_update_idle_us")]
    pub update_idle_us: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            auto_run: false,
            recv_timeout_ms: default_recv_timeout_ms(),
            update_idle_us: default_update_idle_us(),
        }
    }
}

impl ControlSettings {
    /// Command socket endpoint built from `ip` and `port`.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip.clone(), self.port)
    }

    /// Command poll period.
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    /// Pause between update polls when no source advanced.
    pub fn update_idle(&self) -> Duration {
        Duration::from_micros(self.update_idle_us)
    }
}

/// Where a component's log records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogPolicy {
    /// Console through `tracing`
    #[default]
    Screen,
    /// Local rotating file
    File,
    /// Published on the log bus
    Network,
}

/// `[logging]` section of a component settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Where records go
    #[serde(default)]
    pub policy: LogPolicy,
    /// Threshold name, in either the bus or the `tracing` spelling
    #[serde(default = "default_level")]
    pub level: String,
    /// Bus ingress for the network policy
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
    /// Output file for the file policy
    #[serde(default)]
    pub filename: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            policy: LogPolicy::default(),
            level: default_level(),
            endpoint: None,
            filename: None,
        }
    }
}

impl LoggingSettings {
    /// Parsed `level`.
    pub fn log_level(&self) -> AppResult<LogLevel> {
        self.level.parse()
    }
}

fn default_ip() -> String {
    "*".to_string()
}

fn default_port() -> u16 {
    5556
}

fn default_recv_timeout_ms() -> u64 {
    20
}

fn default_update_idle_us() -> u64 {
    100
}

fn default_level() -> String {
    "INFO".to_string()
}

impl ComponentSettings {
    /// Load from `path` plus `DAO_` environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(figment_for(path.as_ref()).extract()?)
    }

    /// Reject settings a component cannot start with.
    pub fn validate(&self) -> AppResult<()> {
        if self.static_config.name.trim().is_empty() {
            return Err(DaoError::Configuration(
                "static.name must not be empty".into(),
            ));
        }
        if self.control.recv_timeout_ms == 0 {
            return Err(DaoError::Configuration(
                "control.recv_timeout_ms must be at least 1".into(),
            ));
        }
        self.logging.log_level().map_err(|_| {
            DaoError::Configuration(format!(
                "Invalid logging.level '{}'. Must be one of: TRACE, DEBUG, INFO, WARNING, ERROR, CRITICAL",
                self.logging.level
            ))
        })?;
        match self.logging.policy {
            LogPolicy::Network if self.logging.endpoint.is_none() => Err(
                DaoError::Configuration("logging.endpoint is required for the network policy".into()),
            ),
            LogPolicy::File if self.logging.filename.is_none() => Err(DaoError::Configuration(
                "logging.filename is required for the file policy".into(),
            )),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Log server settings
// ---------------------------------------------------------------------------

/// Settings file of the log server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogServerSettings {
    /// Relay endpoints
    #[serde(default)]
    pub broker: BrokerSettings,
    /// Persisted log
    #[serde(default)]
    pub log_file: LogFileSettings,
}

/// Whether the egress publisher listens or dials out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EgressMode {
    /// Bind the egress address
    #[default]
    Bind,
    /// Dial out to the egress address
    Connect,
}

/// Endpoints of the log bus relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Where records are published into the bus
    #[serde(default = "default_ingress")]
    pub ingress: Endpoint,
    /// Where readers pick records up
    #[serde(default = "default_egress")]
    pub egress: Endpoint,
    /// Bind or connect the egress side
    #[serde(default)]
    pub egress_mode: EgressMode,
    /// Optional TCP tap on the capture stream
    #[serde(default)]
    pub capture: Option<Endpoint>,
    /// Bounded queue depth per connection
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            ingress: default_ingress(),
            egress: default_egress(),
            egress_mode: EgressMode::default(),
            capture: None,
            high_water_mark: default_high_water_mark(),
        }
    }
}

impl BrokerSettings {
    /// Reject duplicate fixed ports.
    pub fn validate(&self) -> AppResult<()> {
        // port 0 asks the OS for a free port and never collides
        let collides = |a: &Endpoint, b: &Endpoint| a.port() != 0 && a.port() == b.port();
        if self.egress_mode == EgressMode::Bind && collides(&self.ingress, &self.egress) {
            return Err(DaoError::Configuration(format!(
                "ingress and egress cannot both bind port {}",
                self.ingress.port()
            )));
        }
        if let Some(capture) = &self.capture {
            if collides(capture, &self.ingress)
                || (self.egress_mode == EgressMode::Bind && collides(capture, &self.egress))
            {
                return Err(DaoError::Configuration(format!(
                    "capture port {} collides with a relay port",
                    capture.port()
                )));
            }
        }
        if self.high_water_mark == 0 {
            return Err(DaoError::Configuration(
                "broker.high_water_mark must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Rotation period of the persisted log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    /// Start a segment every minute
    Minutely,
    /// Start a segment every hour
    Hourly,
    /// Also accepts `midnight`
    #[default]
    #[serde(alias = "midnight")]
    Daily,
    /// One file, never rotated
    Never,
}

/// Location and retention of the persisted log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFileSettings {
    /// Directory of the live file and its segments
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
    /// Segments are named `<prefix>.<date>.log`
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// How often a new segment starts
    #[serde(default)]
    pub rotation: Rotation,
    /// Rotated segments kept besides the live one
    #[serde(default = "default_backups")]
    pub backups: usize,
}

impl Default for LogFileSettings {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            file_prefix: default_file_prefix(),
            rotation: Rotation::default(),
            backups: default_backups(),
        }
    }
}

fn default_ingress() -> Endpoint {
    Endpoint::wildcard(5558)
}

fn default_egress() -> Endpoint {
    Endpoint::wildcard(5559)
}

fn default_high_water_mark() -> usize {
    DEFAULT_HIGH_WATER_MARK
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_file_prefix() -> String {
    "dao".to_string()
}

fn default_backups() -> usize {
    7
}

impl LogServerSettings {
    /// Load from `path` plus `DAO_` environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(figment_for(path.as_ref()).extract()?)
    }

    /// Validate the broker and the log file settings.
    pub fn validate(&self) -> AppResult<()> {
        self.broker.validate()?;
        if self.log_file.file_prefix.is_empty() {
            return Err(DaoError::Configuration(
                "log_file.file_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Configuration loaders
// ---------------------------------------------------------------------------

/// Source of the records a component loads on Init (static) and Enable (dynamic).
pub trait ConfigLoader: Send + Sync {
    /// Record handed to `load_static_config` on Init.
    fn load_static(&self) -> AppResult<ConfigRecord>;

    /// Record handed to `load_dynamic_config` on every Enable.
    fn load_dynamic(&self) -> AppResult<ConfigRecord>;
}

#[derive(Debug, Default, Deserialize)]
struct Sections {
    #[serde(rename = "static", default)]
    static_section: ConfigRecord,
    #[serde(default)]
    dynamic: ConfigRecord,
}

/// Reads the `[static]` and `[dynamic]` tables of a settings file.
///
/// The file is re-read on every call, so edits show up on the next Enable.
#[derive(Debug, Clone)]
pub struct FileConfigLoader {
    path: PathBuf,
}

impl FileConfigLoader {
    /// Loader reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn sections(&self) -> AppResult<Sections> {
        if !self.path.is_file() {
            return Err(DaoError::Configuration(format!(
                "settings file {} not found",
                self.path.display()
            )));
        }
        Ok(figment_for(&self.path).extract()?)
    }
}

impl ConfigLoader for FileConfigLoader {
    fn load_static(&self) -> AppResult<ConfigRecord> {
        Ok(self.sections()?.static_section)
    }

    fn load_dynamic(&self) -> AppResult<ConfigRecord> {
        Ok(self.sections()?.dynamic)
    }
}

/// Records held in memory. The dynamic record can be replaced between Enables.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigLoader {
    static_record: ConfigRecord,
    dynamic_record: Arc<RwLock<ConfigRecord>>,
}

impl MemoryConfigLoader {
    /// Loader handing out the given records.
    pub fn new(static_record: ConfigRecord, dynamic_record: ConfigRecord) -> Self {
        Self {
            static_record,
            dynamic_record: Arc::new(RwLock::new(dynamic_record)),
        }
    }

    /// Replace the record handed out by the next Enable.
    pub fn set_dynamic(&self, record: ConfigRecord) {
        *self
            .dynamic_record
            .write()
            .unwrap_or_else(PoisonError::into_inner) = record;
    }
}

impl ConfigLoader for MemoryConfigLoader {
    fn load_static(&self) -> AppResult<ConfigRecord> {
        Ok(self.static_record.clone())
    }

    fn load_dynamic(&self) -> AppResult<ConfigRecord> {
        Ok(self
            .dynamic_record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_settings(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn component_settings_with_defaults() {
        let file = write_settings(
            r#"
            [static]
            name = "wfs"
            camera = "ocam"

            [control]
            port = 9000

            [dynamic]
            gain = 0.4
            "#,
        );
        let settings = ComponentSettings::load_from(file.path()).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.static_config.name, "wfs");
        assert_eq!(
            settings.static_config.extra.get("camera").and_then(|v| v.as_str()),
            Some("ocam")
        );
        assert_eq!(settings.control.endpoint().to_string(), "tcp://*:9000");
        assert_eq!(settings.control.recv_timeout(), Duration::from_millis(20));
        assert!(!settings.control.auto_run);
        assert_eq!(settings.logging.policy, LogPolicy::Screen);
        assert_eq!(settings.dynamic.get("gain").and_then(|v| v.as_float()), Some(0.4));
    }

    #[test]
    fn network_policy_requires_endpoint() {
        let file = write_settings(
            r#"
            [static]
            name = "dm"
            [logging]
            policy = "network"
            "#,
        );
        let settings = ComponentSettings::load_from(file.path()).unwrap();
        assert!(matches!(
            settings.validate(),
            Err(DaoError::Configuration(_))
        ));
    }

    #[test]
    fn invalid_level_rejected() {
        let file = write_settings(
            r#"
            [static]
            name = "dm"
            [logging]
            level = "LOUD"
            "#,
        );
        let settings = ComponentSettings::load_from(file.path()).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn log_server_settings_accept_midnight() {
        let file = write_settings(
            r#"
            [broker]
            ingress = "tcp://*:6001"
            egress = "tcp://*:6002"

            [log_file]
            directory = "/tmp/dao"
            rotation = "midnight"
            backups = 3
            "#,
        );
        let settings = LogServerSettings::load_from(file.path()).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.log_file.rotation, Rotation::Daily);
        assert_eq!(settings.log_file.backups, 3);
        assert_eq!(settings.broker.egress_mode, EgressMode::Bind);
        assert_eq!(settings.broker.high_water_mark, DEFAULT_HIGH_WATER_MARK);
    }

    #[test]
    fn same_port_binding_rejected() {
        let broker = BrokerSettings {
            ingress: Endpoint::wildcard(7000),
            egress: Endpoint::wildcard(7000),
            ..Default::default()
        };
        assert!(broker.validate().is_err());

        let connect = BrokerSettings {
            egress_mode: EgressMode::Connect,
            ..broker
        };
        assert!(connect.validate().is_ok());
    }

    #[test]
    fn file_loader_rereads_dynamic_section() {
        let file = write_settings("[static]\nname = \"ttm\"\n[dynamic]\nrate = 1\n");
        let loader = FileConfigLoader::new(file.path());
        assert_eq!(
            loader.load_static().unwrap().get("name").and_then(|v| v.as_str()),
            Some("ttm")
        );
        assert_eq!(
            loader.load_dynamic().unwrap().get("rate").and_then(|v| v.as_integer()),
            Some(1)
        );

        std::fs::write(file.path(), "[static]\nname = \"ttm\"\n[dynamic]\nrate = 2\n").unwrap();
        assert_eq!(
            loader.load_dynamic().unwrap().get("rate").and_then(|v| v.as_integer()),
            Some(2)
        );
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let loader = FileConfigLoader::new("/no/such/settings.toml");
        let err = loader.load_static().unwrap_err();
        assert!(err.is_fatal());
    }
}
