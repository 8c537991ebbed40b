//! Drives a component over its TCP command channel.

use dao_control::client::CommandClient;
use dao_control::component::{Component, ComponentHooks};
use dao_control::protocol::{Command, LogLevel};
use dao_control::transport::Endpoint;
use dao_control::{AppResult, Transition};
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PORT: u16 = 9000;

fn client() -> CommandClient {
    CommandClient::connect(&Endpoint::local(PORT)).expect("client")
}

#[derive(Default)]
struct Recorder {
    dynamic_loads: AtomicUsize,
}

impl ComponentHooks for Recorder {
    fn load_dynamic_config(&self, _record: &dao_control::config::ConfigRecord) -> AppResult<()> {
        self.dynamic_loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dump(&self) -> String {
        format!("dynamic loads: {}", self.dynamic_loads.load(Ordering::SeqCst))
    }

    fn process_other(&self, payload: &str) -> (bool, String) {
        match payload {
            "reverse" => (true, "esrever".to_string()),
            other => (false, format!("cannot {other}")),
        }
    }
}

#[test]
#[serial]
fn init_and_enable_report_idle() {
    let component = Component::builder("sensor").port(PORT).build().unwrap();
    let mut client = client();

    assert!(client.exec(Transition::Init).unwrap().is_success());
    assert!(client.exec(Transition::Enable).unwrap().is_success());

    let reply = client.state().unwrap();
    assert!(reply.is_success());
    assert_eq!(reply.text(), "Idle");

    component.stop().unwrap();
}

#[test]
#[serial]
fn ping_answers_with_process_id() {
    let component = Component::builder("sensor").port(PORT).build().unwrap();
    let reply = client().ping().unwrap();
    assert!(reply.is_success());
    assert_eq!(reply.text(), std::process::id().to_string());
    component.stop().unwrap();
}

#[test]
#[serial]
fn query_reads_published_variables() {
    let component = Component::builder("sensor").port(PORT).build().unwrap();
    component.variables().set("exposure_us", 250);
    let mut client = client();

    let found = client.query("exposure_us").unwrap();
    assert!(found.is_success());
    assert_eq!(found.text(), "250");

    let missing = client.query("gain").unwrap();
    assert!(!missing.is_success());
    assert_eq!(missing.text(), "Unknown variable name: gain");

    component.stop().unwrap();
}

#[test]
#[serial]
fn auto_run_reaches_running() {
    let component = Component::builder("sensor")
        .port(PORT)
        .go_running(true)
        .build()
        .unwrap();
    assert_eq!(client().state().unwrap().text(), "Running");
    assert!(component.is_processing());
    component.stop().unwrap();
}

#[test]
#[serial]
fn invalid_exec_keeps_state() {
    let component = Component::builder("sensor").port(PORT).build().unwrap();
    let mut client = client();

    let reply = client.exec(Transition::Run).unwrap();
    assert!(!reply.is_success());
    assert!(reply.text().contains("[Off : Run]"), "{}", reply.text());

    let reply = client.send(Command::Exec, "Explode").unwrap();
    assert!(!reply.is_success());
    assert!(reply.text().contains("Explode"));

    assert_eq!(client.state().unwrap().text(), "Off");
    component.stop().unwrap();
}

#[test]
#[serial]
fn stop_run_is_sent_as_idle() {
    let component = Component::builder("sensor")
        .port(PORT)
        .go_running(true)
        .build()
        .unwrap();
    let mut client = client();

    assert!(client.exec(Transition::StopRun).unwrap().is_success());
    assert_eq!(client.state().unwrap().text(), "Idle");
    assert!(!component.is_processing());

    component.stop().unwrap();
}

#[test]
#[serial]
fn set_log_level_changes_threshold() {
    let component = Component::builder("sensor").port(PORT).build().unwrap();
    let mut client = client();

    assert!(client.set_log_level(LogLevel::Debug).unwrap().is_success());
    assert_eq!(component.logger().level(), LogLevel::Debug);

    assert!(client.send(Command::SetLogLevel, "fatal").unwrap().is_success());
    assert_eq!(component.logger().level(), LogLevel::Critical);

    let rejected = client.send(Command::SetLogLevel, "LOUD").unwrap();
    assert!(!rejected.is_success());
    assert_eq!(component.logger().level(), LogLevel::Critical);

    component.stop().unwrap();
}

#[test]
#[serial]
fn setup_and_update_are_not_implemented() {
    let component = Component::builder("sensor").port(PORT).build().unwrap();
    let mut client = client();
    for command in [Command::Setup, Command::Update] {
        let reply = client.send(command, "").unwrap();
        assert!(!reply.is_success());
        assert!(reply.text().ends_with("Function not implemented"));
    }
    component.stop().unwrap();
}

#[test]
#[serial]
fn malformed_frames_get_failure_replies() {
    let component = Component::builder("sensor").port(PORT).build().unwrap();
    let mut client = client();

    let garbage = client.send_raw(vec![0xff, 0xff, 0xff]).unwrap();
    assert!(!garbage.is_success());

    // field 1 (function) = 42
    let unknown = client.send_raw(vec![0x08, 42]).unwrap();
    assert!(!unknown.is_success());
    assert_eq!(unknown.text(), "Unknown command: 42");

    // the channel keeps serving after bad input
    assert!(client.ping().unwrap().is_success());
    component.stop().unwrap();
}

#[test]
#[serial]
fn dump_and_other_reach_hooks() {
    let hooks = Arc::new(Recorder::default());
    let component = Component::builder("sensor")
        .port(PORT)
        .shared_hooks(hooks.clone())
        .build()
        .unwrap();
    let mut client = client();

    client.exec(Transition::Init).unwrap();
    client.exec(Transition::Enable).unwrap();
    client.exec(Transition::Disable).unwrap();
    client.exec(Transition::Enable).unwrap();
    assert_eq!(hooks.dynamic_loads.load(Ordering::SeqCst), 2);

    let dump = client.send(Command::Dump, "").unwrap();
    assert_eq!(dump.text(), "dynamic loads: 2");

    let other = client.send(Command::Other, "reverse").unwrap();
    assert!(other.is_success());
    assert_eq!(other.text(), "esrever");

    let refused = client.send(Command::Other, "fly").unwrap();
    assert!(!refused.is_success());
    assert_eq!(refused.text(), "cannot fly");

    component.stop().unwrap();
}

#[test]
#[serial]
fn port_is_reusable_after_stop() {
    for _ in 0..3 {
        let component = Component::builder("sensor").port(PORT).build().unwrap();
        assert!(client().ping().unwrap().is_success());
        component.stop().unwrap();
    }
}

#[test]
#[serial]
fn client_fails_without_component() {
    let result =
        CommandClient::connect_with_timeout(&Endpoint::local(PORT), Duration::from_millis(200));
    assert!(result.is_err());
}
