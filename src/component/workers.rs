//! Threads whose lifetime follows the lifecycle state.
//!
//! | transition | action                                                    |
//! |------------|-----------------------------------------------------------|
//! | Init       | load the static record                                    |
//! | Enable     | load the dynamic record, start the update thread if bound |
//! | Disable    | stop and join the update thread                           |
//! | Run        | start the processing thread                               |
//! | StopRun    | stop and join the processing thread                       |
//! | Err        | stop and join the processing thread                       |
//!
//! Configuration is loaded before the application's own `on_transition`; threads are
//! started and stopped only after it succeeded, so a rejected transition leaves the
//! threads as they were.

use super::hooks::{guard, panic_message, ComponentHooks};
use super::FatalHandler;
use crate::config::{ConfigLoader, ConfigRecord};
use crate::error::{AppResult, DaoError};
use crate::logger::ComponentLogger;
use crate::protocol::LogLevel;
use crate::source::PollBinding;
use crate::state_machine::{LifecycleHooks, State, Transition};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// An OS thread paired with the token that asks it to finish.
///
/// Dropping it without [`ManagedThread::stop`] still cancels the token; the thread then
/// winds down on its own.
#[derive(Debug)]
pub(crate) struct ManagedThread<T> {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> ManagedThread<T> {
    pub(crate) fn spawn<F>(name: String, body: F) -> AppResult<Self>
    where
        F: FnOnce(CancellationToken) -> T + Send + 'static,
    {
        let token = CancellationToken::new();
        let thread_token = token.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(thread_token))?;
        Ok(Self {
            name,
            token,
            handle: Some(handle),
        })
    }

    /// Whether the thread body has returned (or panicked).
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Request the thread to finish and wait for it.
    pub(crate) fn stop(mut self) -> AppResult<T> {
        self.token.cancel();
        let handle = self.handle.take().ok_or(DaoError::ChannelClosed)?;
        handle.thread().unpark();
        handle.join().map_err(|payload| {
            DaoError::ThreadPanicked(format!("{}: {}", self.name, panic_message(&*payload)))
        })
    }
}

impl<T> Drop for ManagedThread<T> {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }
}

type Bindings = Vec<Box<dyn PollBinding>>;

pub(crate) struct Workers {
    pub(crate) name: String,
    pub(crate) hooks: Arc<dyn ComponentHooks>,
    pub(crate) loader: Option<Arc<dyn ConfigLoader>>,
    pub(crate) logger: Arc<ComponentLogger>,
    pub(crate) on_fatal: FatalHandler,
    pub(crate) update_idle: Duration,
    /// Held here while the update thread is stopped
    pub(crate) bindings: Bindings,
    /// Bindings currently owned by the update thread
    pub(crate) active_bindings: usize,
    pub(crate) update: Option<ManagedThread<Bindings>>,
    pub(crate) processing: Option<ManagedThread<()>>,
}

impl Workers {
    pub(crate) fn add_binding(&mut self, binding: Box<dyn PollBinding>) -> AppResult<()> {
        if self.update.is_some() {
            return Err(DaoError::Busy(
                "update bindings cannot change while the update thread runs".into(),
            ));
        }
        self.bindings.push(binding);
        Ok(())
    }

    pub(crate) fn binding_count(&self) -> usize {
        self.bindings.len() + self.active_bindings
    }

    pub(crate) fn update_running(&self) -> bool {
        self.update.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// False once the workload panicked, even while the state is still Running.
    pub(crate) fn processing_running(&self) -> bool {
        self.processing.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Load a record and hand it to `apply`. Any failure goes through the fatal handler.
    fn load_config(
        &self,
        kind: &str,
        load: impl FnOnce(&dyn ConfigLoader) -> AppResult<ConfigRecord>,
        apply: impl FnOnce(&dyn ComponentHooks, &ConfigRecord) -> AppResult<()>,
    ) -> AppResult<()> {
        let result = match &self.loader {
            Some(loader) => load(loader.as_ref()),
            None => Ok(ConfigRecord::new()),
        }
        .and_then(|record| guard(|| apply(self.hooks.as_ref(), &record)).and_then(|applied| applied));

        result.map_err(|e| {
            let err = DaoError::Configuration(format!("{kind} configuration: {e}"));
            self.logger.critical(&err.to_string());
            (self.on_fatal)(&err);
            err
        })
    }

    fn start_update(&mut self) -> AppResult<()> {
        if self.update.is_some() {
            return Err(DaoError::Busy("update thread already running".into()));
        }
        if self.bindings.is_empty() {
            self.logger
                .info("update binding list empty, update thread not started");
            return Ok(());
        }
        let bindings = std::mem::take(&mut self.bindings);
        self.active_bindings = bindings.len();
        let idle = self.update_idle;
        let logger = Arc::clone(&self.logger);
        self.update = Some(ManagedThread::spawn(
            format!("{}-update", self.name),
            move |token| run_update_loop(bindings, token, idle, logger),
        )?);
        Ok(())
    }

    pub(crate) fn stop_update(&mut self) -> AppResult<()> {
        if let Some(update) = self.update.take() {
            self.active_bindings = 0;
            match update.stop() {
                Ok(bindings) => self.bindings = bindings,
                Err(e) => {
                    self.logger
                        .error(&format!("update thread lost its bindings: {e}"));
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn start_processing(&mut self) -> AppResult<()> {
        if let Some(previous) = self.processing.take() {
            if !previous.is_finished() {
                self.processing = Some(previous);
                return Err(DaoError::Busy("processing thread already running".into()));
            }
            // a workload that died on its own is reaped before a fresh start
            if let Err(e) = previous.stop() {
                self.logger.warning(&format!("previous workload ended badly: {e}"));
            }
        }
        self.logger.trace("starting processing thread");
        let hooks = Arc::clone(&self.hooks);
        let logger = Arc::clone(&self.logger);
        self.processing = Some(ManagedThread::spawn(
            format!("{}-proc", self.name),
            move |token| run_processing_loop(hooks.as_ref(), &token, &logger),
        )?);
        Ok(())
    }

    pub(crate) fn stop_processing(&mut self) -> AppResult<()> {
        if let Some(processing) = self.processing.take() {
            self.logger.trace("stopping processing thread");
            processing.stop()?;
        }
        Ok(())
    }
}

impl LifecycleHooks for Workers {
    fn on_exit(&mut self, state: State) -> AppResult<()> {
        guard(|| self.hooks.on_exit(state))?
    }

    fn on_transition(&mut self, transition: Transition) -> AppResult<()> {
        match transition {
            Transition::Init => self.load_config(
                "static",
                |loader| loader.load_static(),
                |hooks, record| hooks.load_static_config(record),
            )?,
            Transition::Enable => self.load_config(
                "dynamic",
                |loader| loader.load_dynamic(),
                |hooks, record| hooks.load_dynamic_config(record),
            )?,
            _ => {}
        }

        guard(|| self.hooks.on_transition(transition))??;

        match transition {
            Transition::Enable => self.start_update(),
            Transition::Disable => self.stop_update(),
            Transition::Run => self.start_processing(),
            Transition::StopRun | Transition::Err => self.stop_processing(),
            Transition::Init | Transition::Stop | Transition::Err2 | Transition::Recover => Ok(()),
        }
    }

    fn on_enter(&mut self, state: State) -> AppResult<()> {
        self.logger.debug(&format!("entered {state}"));
        guard(|| self.hooks.on_enter(state))?
    }
}

fn run_update_loop(
    mut bindings: Bindings,
    token: CancellationToken,
    idle: Duration,
    logger: Arc<ComponentLogger>,
) -> Bindings {
    for binding in &mut bindings {
        binding.prime();
    }

    while !token.is_cancelled() {
        for (index, binding) in bindings.iter_mut().enumerate() {
            if binding.poll() && logger.enabled(LogLevel::Debug) {
                logger.log_frame(
                    LogLevel::Debug,
                    binding.last_counter(),
                    &format!("new frame available on binding {index}"),
                );
            }
        }
        if idle.is_zero() {
            std::hint::spin_loop();
        } else {
            thread::park_timeout(idle);
        }
    }
    bindings
}

fn run_processing_loop(
    hooks: &dyn ComponentHooks,
    token: &CancellationToken,
    logger: &ComponentLogger,
) {
    while !token.is_cancelled() {
        if let Err(e) = guard(|| hooks.process()) {
            logger.error(&format!("processing workload stopped: {e}"));
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn managed_thread_returns_value() {
        let worker = ManagedThread::spawn("counter".into(), |token: CancellationToken| {
            let mut spins = 0u64;
            while !token.is_cancelled() {
                spins += 1;
                thread::park_timeout(Duration::from_millis(1));
            }
            spins
        })
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(worker.stop().unwrap() > 0);
    }

    #[test]
    fn dropped_thread_is_cancelled() {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = ManagedThread::spawn("orphan".into(), move |token: CancellationToken| {
            while !token.is_cancelled() {
                thread::park_timeout(Duration::from_millis(50));
            }
            let _ = done_tx.send(());
        })
        .unwrap();
        drop(worker);
        assert!(done_rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn managed_thread_reports_panic() {
        let worker =
            ManagedThread::<()>::spawn("doomed".into(), |_token| panic!("detector saturated"))
                .unwrap();
        let err = worker.stop().unwrap_err();
        assert!(err.to_string().contains("detector saturated"));
    }

    #[test]
    fn processing_loop_runs_until_cancelled() {
        struct Count(AtomicUsize);
        impl ComponentHooks for Count {
            fn process(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1));
            }
        }

        let hooks = Arc::new(Count(AtomicUsize::new(0)));
        let logger = ComponentLogger::screen("proc", LogLevel::Info);
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let loop_hooks = Arc::clone(&hooks);
        let handle = thread::spawn(move || {
            run_processing_loop(loop_hooks.as_ref(), &loop_token, &logger)
        });
        thread::sleep(Duration::from_millis(30));
        token.cancel();
        handle.join().unwrap();
        assert!(hooks.0.load(Ordering::SeqCst) > 1);
    }
}
