use crate::config::ConfigRecord;
use crate::error::{AppResult, DaoError};
use crate::state_machine::{State, Transition};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

/// Application behaviour plugged into a [`Component`](super::Component).
///
/// Every method has a default, so an implementation only overrides what it needs.
/// Methods are called from the component's own threads:
///
/// | method                 | thread                                  |
/// |------------------------|-----------------------------------------|
/// | `load_*_config`        | whichever thread fires Init / Enable    |
/// | `process`              | processing thread, repeatedly while Running |
/// | `dump`, `process_other`| command thread                          |
/// | `on_*`                 | whichever thread fires the transition   |
///
/// Panics are caught and reported as failures. A failing `load_*_config` is fatal.
pub trait ComponentHooks: Send + Sync + 'static {
    /// Apply the static record (Init).
    fn load_static_config(&self, _record: &ConfigRecord) -> AppResult<()> {
        Ok(())
    }

    /// Apply the dynamic record (every Enable).
    fn load_dynamic_config(&self, _record: &ConfigRecord) -> AppResult<()> {
        Ok(())
    }

    /// One unit of the processing workload. Called in a loop until the component leaves
    /// Running, so it must return within a bounded time.
    ///
    /// Must not fire transitions on its own component.
    fn process(&self) {
        thread::park_timeout(Duration::from_millis(10));
    }

    /// Payload of the DUMP reply.
    fn dump(&self) -> String {
        String::new()
    }

    /// Handle an OTHER command. `(true, text)` answers SUCCESS, `(false, text)` FAILURE.
    fn process_other(&self, payload: &str) -> (bool, String) {
        (true, payload.to_string())
    }

    /// Leaving `_state`. An error vetoes the transition.
    fn on_exit(&self, _state: State) -> AppResult<()> {
        Ok(())
    }

    /// Between exit and enter, after any configuration load and before worker threads
    /// are started or stopped. An error vetoes the transition.
    fn on_transition(&self, _transition: Transition) -> AppResult<()> {
        Ok(())
    }

    /// The component has just entered `_state`.
    fn on_enter(&self, _state: State) -> AppResult<()> {
        Ok(())
    }
}

/// Hooks that keep every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl ComponentHooks for DefaultHooks {}

/// Run a user hook, turning a panic into [`DaoError::Hook`].
pub(crate) fn guard<T>(hook: impl FnOnce() -> T) -> AppResult<T> {
    catch_unwind(AssertUnwindSafe(hook)).map_err(|payload| DaoError::Hook(panic_message(&*payload)))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_reports_panic_text() {
        let err = guard(|| -> u32 { panic!("sensor offline") }).unwrap_err();
        assert_eq!(err.to_string(), "Hook failed: sensor offline");

        let err = guard(|| -> u32 { panic!("frame {} lost", 12) }).unwrap_err();
        assert!(err.to_string().contains("frame 12 lost"));

        assert_eq!(guard(|| 7).unwrap(), 7);
    }

    #[test]
    fn default_other_echoes() {
        assert_eq!(
            DefaultHooks.process_other("hello"),
            (true, "hello".to_string())
        );
        assert!(DefaultHooks.dump().is_empty());
    }
}
