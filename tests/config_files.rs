//! Settings files and the file-backed config loader.

use dao_control::config::{
    ComponentSettings, ConfigLoader, ConfigRecord, EgressMode, FileConfigLoader,
    LogPolicy, LogServerSettings, Rotation,
};
use dao_control::component::ComponentHooks;
use dao_control::transport::Endpoint;
use dao_control::{AppResult, Component, DaoError, Transition};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

const COMPONENT: &str = r#"
[static]
name = "spectrometer"
pixels = 2048

[control]
port = 0
ip = "127.0.0.1"

[logging]
policy = "screen"
level = "debug"

[dynamic]
exposure_ms = 12
"#;

fn write_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[derive(Default)]
struct Captured {
    static_record: Mutex<Option<ConfigRecord>>,
    dynamic_record: Mutex<Option<ConfigRecord>>,
}

impl ComponentHooks for Captured {
    fn load_static_config(&self, record: &ConfigRecord) -> AppResult<()> {
        *self.static_record.lock().unwrap() = Some(record.clone());
        Ok(())
    }

    fn load_dynamic_config(&self, record: &ConfigRecord) -> AppResult<()> {
        *self.dynamic_record.lock().unwrap() = Some(record.clone());
        Ok(())
    }
}

#[test]
fn component_settings_from_file() {
    let file = write_file(COMPONENT);
    let settings = ComponentSettings::load_from(file.path()).unwrap();
    settings.validate().unwrap();

    assert_eq!(settings.static_config.name, "spectrometer");
    assert_eq!(
        settings.static_config.extra.get("pixels"),
        Some(&toml::Value::Integer(2048))
    );
    assert_eq!(settings.control.endpoint(), Endpoint::new("127.0.0.1", 0));
    assert!(!settings.control.auto_run);
    assert_eq!(settings.logging.policy, LogPolicy::Screen);
}

#[test]
fn hooks_receive_file_sections() {
    let file = write_file(COMPONENT);
    let settings = ComponentSettings::load_from(file.path()).unwrap();
    let hooks = Arc::new(Captured::default());

    let component = Component::builder(settings.static_config.name.clone())
        .endpoint(settings.control.endpoint())
        .shared_hooks(hooks.clone())
        .config_loader(FileConfigLoader::new(file.path()))
        .build()
        .unwrap();
    component.fire(Transition::Init).unwrap();
    component.fire(Transition::Enable).unwrap();

    let static_record = hooks.static_record.lock().unwrap().clone().unwrap();
    assert_eq!(static_record.get("name").and_then(|v| v.as_str()), Some("spectrometer"));
    let dynamic_record = hooks.dynamic_record.lock().unwrap().clone().unwrap();
    assert_eq!(
        dynamic_record.get("exposure_ms").and_then(|v| v.as_integer()),
        Some(12)
    );
    component.stop().unwrap();
}

#[test]
fn missing_file_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let loader = FileConfigLoader::new(dir.path().join("absent.toml"));
    assert!(matches!(loader.load_static(), Err(DaoError::Configuration(_))));
}

#[test]
fn missing_file_fires_the_fatal_handler() {
    let dir = tempfile::tempdir().unwrap();
    let fatal = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&fatal);

    let component = Component::builder("orphan")
        .endpoint(Endpoint::local(0))
        .config_loader(FileConfigLoader::new(dir.path().join("absent.toml")))
        .on_fatal(move |e| sink.lock().unwrap().push(e.to_string()))
        .build()
        .unwrap();

    assert!(component.fire(Transition::Init).is_err());
    assert_eq!(component.state(), dao_control::State::Off);
    assert_eq!(fatal.lock().unwrap().len(), 1);
    component.stop().unwrap();
}

#[test]
fn log_server_settings_accept_midnight_rotation() {
    let file = write_file(
        r#"
[broker]
ingress = "tcp://*:6000"
egress = "tcp://collector:6001"
egress_mode = "connect"

[log_file]
directory = "/var/log/dao"
rotation = "midnight"
backups = 3
"#,
    );
    let settings = LogServerSettings::load_from(file.path()).unwrap();
    settings.validate().unwrap();
    assert_eq!(settings.broker.ingress, Endpoint::wildcard(6000));
    assert_eq!(settings.broker.egress.host(), "collector");
    assert_eq!(settings.broker.egress_mode, EgressMode::Connect);
    assert_eq!(settings.log_file.rotation, Rotation::Daily);
    assert_eq!(settings.log_file.backups, 3);
    assert_eq!(settings.log_file.file_prefix, "dao");
}

#[test]
fn unknown_level_fails_validation() {
    let file = write_file("[static]\nname = \"x\"\n[logging]\nlevel = \"LOUD\"\n");
    let settings = ComponentSettings::load_from(file.path()).unwrap();
    assert!(matches!(settings.validate(), Err(DaoError::Configuration(_))));
}
