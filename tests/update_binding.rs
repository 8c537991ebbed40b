//! Update thread mirroring a counter-based source into a double buffer.

use dao_control::double_buffer::DoubleBuffer;
use dao_control::source::CounterSource;
use dao_control::transport::Endpoint;
use dao_control::{Component, State, Transition};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn wait_for<T: Clone>(buffer: &DoubleBuffer<T>, pred: impl Fn(&T) -> bool) -> Option<T> {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if let Some(value) = buffer.read() {
            if pred(&value) {
                return Some(value);
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

#[test]
fn published_frames_reach_the_buffer() {
    let source = Arc::new(CounterSource::new(0u32));
    let sink = Arc::new(DoubleBuffer::new());
    let component = Component::builder("camera")
        .endpoint(Endpoint::local(0))
        .update_map(Arc::clone(&source), Arc::clone(&sink))
        .build()
        .unwrap();

    component.fire(Transition::Init).unwrap();
    component.fire(Transition::Enable).unwrap();
    assert!(component.is_updating());
    assert_eq!(component.update_map_count(), 1);

    for value in 1..=5u32 {
        assert_eq!(source.publish(value * 10), u64::from(value));
    }
    assert_eq!(wait_for(&sink, |v| *v == 50), Some(50));

    component.fire(Transition::Disable).unwrap();
    assert!(!component.is_updating());
    assert_eq!(component.state(), State::Standby);
    component.stop().unwrap();
}

#[test]
fn bindings_survive_disable_and_enable() {
    let source = Arc::new(CounterSource::new(String::from("boot")));
    let sink = Arc::new(DoubleBuffer::new());
    let component = Component::builder("stage")
        .endpoint(Endpoint::local(0))
        .update_idle(Duration::ZERO)
        .build()
        .unwrap();
    component
        .add_update_map(Arc::clone(&source), Arc::clone(&sink))
        .unwrap();

    component.fire(Transition::Init).unwrap();
    component.fire(Transition::Enable).unwrap();
    assert_eq!(wait_for(&sink, |v| v == "boot").as_deref(), Some("boot"));

    component.fire(Transition::Disable).unwrap();
    source.publish("moved".to_string());
    component.fire(Transition::Enable).unwrap();
    assert_eq!(wait_for(&sink, |v| v == "moved").as_deref(), Some("moved"));

    component.stop().unwrap();
}
