//! Lifecycle-managed component.
//!
//! A [`Component`] couples a [`StateMachine`] with three threads:
//!
//! - the **command thread**, alive from construction to [`Component::stop`], serving
//!   `CommandMessage`s on a reply socket;
//! - the **update thread**, alive between Enable and Disable when at least one update
//!   binding exists, copying fresh frames from their sources into double buffers;
//! - the **processing thread**, alive while Running, calling
//!   [`ComponentHooks::process`] in a loop.
//!
//! Transitions fired remotely (EXEC) and locally ([`Component::fire`]) go through the
//! same lifecycle lock, so they are applied one at a time.
//!
//! # Example
//! ```no_run
//! use dao_control::component::{Component, ComponentHooks};
//! use dao_control::state_machine::{State, Transition};
//!
//! struct Loop;
//! impl ComponentHooks for Loop {
//!     fn process(&self) {
//!         // one control-loop iteration
//!     }
//! }
//!
//! let component = Component::builder("wfs").port(9000).hooks(Loop).build()?;
//! component.fire(Transition::Init)?;
//! component.fire(Transition::Enable)?;
//! assert_eq!(component.state(), State::Idle);
//! component.stop()?;
//! # Ok::<(), dao_control::error::DaoError>(())
//! ```

mod dispatch;
mod hooks;
mod variables;
mod workers;

pub use hooks::{ComponentHooks, DefaultHooks};
pub use variables::Variables;

use crate::config::{ComponentSettings, ConfigLoader, LoggingSettings};
use crate::double_buffer::DoubleBuffer;
use crate::error::{AppResult, DaoError};
use crate::logger::ComponentLogger;
use crate::protocol;
use crate::source::{FrameSource, UpdateBinding};
use crate::state_machine::{State, StateMachine, Transition};
use crate::transport::{Context, Endpoint, ReplySocket};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workers::{ManagedThread, Workers};

/// Called when configuration cannot be loaded. Replaceable for embedding and tests; if
/// it returns, the transition that triggered it fails.
pub type FatalHandler = Arc<dyn Fn(&DaoError) + Send + Sync>;

/// Exit status used by the default fatal handler (`EX_CONFIG`).
pub const CONFIG_EXIT_CODE: i32 = 78;

fn exit_on_fatal() -> FatalHandler {
    Arc::new(|err: &DaoError| {
        tracing::error!(error = %err, "fatal configuration error, exiting");
        std::process::exit(CONFIG_EXIT_CODE);
    })
}

struct Lifecycle {
    machine: StateMachine,
    workers: Workers,
}

/// State shared between the component handle and its command thread.
pub(crate) struct Inner {
    name: String,
    lifecycle: Mutex<Lifecycle>,
    hooks: Arc<dyn ComponentHooks>,
    variables: Variables,
    logger: Arc<ComponentLogger>,
}

impl Inner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> State {
        self.lifecycle().machine.state()
    }

    pub(crate) fn fire(&self, transition: Transition) -> AppResult<State> {
        let mut lifecycle = self.lifecycle();
        let Lifecycle { machine, workers } = &mut *lifecycle;
        let state = machine.fire(transition, workers)?;
        self.logger.info(&format!("{transition} -> {state}"));
        Ok(state)
    }
}

/// A running component. Dropping it stops every thread.
pub struct Component {
    inner: Arc<Inner>,
    command: Mutex<Option<ManagedThread<()>>>,
    ctx: Mutex<Option<Context>>,
    local_addr: SocketAddr,
    endpoint: Endpoint,
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.inner.name)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl Component {
    /// Start configuring a component named `name`.
    pub fn builder(name: impl Into<String>) -> ComponentBuilder {
        ComponentBuilder::new(name)
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.inner.state()
    }

    /// Fire a transition locally, exactly as EXEC would.
    pub fn fire(&self, transition: Transition) -> AppResult<State> {
        self.inner.fire(transition)
    }

    /// Register a source whose fresh frames are copied into `sink` by the update thread.
    ///
    /// Only allowed while the update thread is not running (before Enable or after
    /// Disable).
    pub fn add_update_map<S: FrameSource>(
        &self,
        source: S,
        sink: Arc<DoubleBuffer<S::Data>>,
    ) -> AppResult<()> {
        self.inner
            .lifecycle()
            .workers
            .add_binding(Box::new(UpdateBinding::new(source, sink)))
    }

    /// Number of registered update bindings.
    pub fn update_map_count(&self) -> usize {
        self.inner.lifecycle().workers.binding_count()
    }

    /// Whether the update thread is alive.
    pub fn is_updating(&self) -> bool {
        self.inner.lifecycle().workers.update_running()
    }

    /// Whether the processing thread is alive.
    pub fn is_processing(&self) -> bool {
        self.inner.lifecycle().workers.processing_running()
    }

    /// The store answered by QUERY.
    pub fn variables(&self) -> &Variables {
        &self.inner.variables
    }

    /// Logger the component and its hooks write through.
    pub fn logger(&self) -> &ComponentLogger {
        &self.inner.logger
    }

    /// Run one encoded command through the dispatcher and return the encoded reply.
    pub fn process_command(&self, frame: &[u8]) -> Bytes {
        protocol::encode(&self.inner.handle_command(frame))
    }

    /// Address the command socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint the command socket was asked to bind.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Stop all threads and release the messaging context. Idempotent.
    ///
    /// The command thread is joined first so no command can race the shutdown. The
    /// lifecycle state is left as it was.
    pub fn stop(&self) -> AppResult<()> {
        let command = self
            .command
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(command) = command else {
            return Ok(());
        };

        let mut result = command.stop();
        {
            let mut lifecycle = self.inner.lifecycle();
            if let Err(e) = lifecycle.workers.stop_update() {
                result = result.and(Err(e));
            }
            if let Err(e) = lifecycle.workers.stop_processing() {
                result = result.and(Err(e));
            }
        }
        self.inner.logger.close();
        if let Some(ctx) = self
            .ctx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            ctx.term();
        }
        tracing::debug!(component = %self.inner.name, "stopped");
        result
    }
}

impl Drop for Component {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(component = %self.inner.name, error = %e, "unclean stop");
        }
    }
}

fn run_command_loop(
    inner: Arc<Inner>,
    socket: ReplySocket,
    token: CancellationToken,
    recv_timeout: Duration,
) {
    inner.logger.trace("command thread started");
    loop {
        match socket.recv_timeout(recv_timeout) {
            Ok(Some(request)) => {
                let reply = inner.handle_command(request.frame());
                if let Err(e) = request.reply(protocol::encode(&reply)) {
                    inner
                        .logger
                        .warning(&format!("reply not delivered: {e}"));
                }
            }
            Ok(None) => {
                if token.is_cancelled() {
                    inner.logger.trace("stop detected, command thread exiting");
                    break;
                }
            }
            Err(e) => {
                inner.logger.error(&format!("command socket error: {e}"));
                if token.is_cancelled() {
                    break;
                }
                thread::park_timeout(recv_timeout);
            }
        }
    }
    socket.close();
}

/// Configures and starts a [`Component`].
pub struct ComponentBuilder {
    name: String,
    endpoint: Endpoint,
    hooks: Arc<dyn ComponentHooks>,
    loader: Option<Arc<dyn ConfigLoader>>,
    go_running: bool,
    recv_timeout: Duration,
    update_idle: Duration,
    logging: LoggingSettings,
    on_fatal: FatalHandler,
    bindings: Vec<Box<dyn crate::source::PollBinding>>,
}

impl ComponentBuilder {
    /// Builder with default endpoint, hooks and logging.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: Endpoint::wildcard(5556),
            hooks: Arc::new(DefaultHooks),
            loader: None,
            go_running: false,
            recv_timeout: Duration::from_millis(20),
            update_idle: Duration::from_micros(100),
            logging: LoggingSettings::default(),
            on_fatal: exit_on_fatal(),
            bindings: Vec::new(),
        }
    }

    /// Start from a settings file's `[static]`, `[control]` and `[logging]` tables.
    pub fn from_settings(settings: &ComponentSettings) -> Self {
        Self::new(settings.static_config.name.clone())
            .endpoint(settings.control.endpoint())
            .go_running(settings.control.auto_run)
            .recv_timeout(settings.control.recv_timeout())
            .update_idle(settings.control.update_idle())
            .logging(settings.logging.clone())
    }

    /// Bind the command socket on `tcp://*:<port>`.
    pub fn port(mut self, port: u16) -> Self {
        self.endpoint = Endpoint::wildcard(port);
        self
    }

    /// Command socket endpoint. Defaults to a free local port.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Application hooks. Defaults to hooks that accept everything.
    pub fn hooks(mut self, hooks: impl ComponentHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Share hooks the caller keeps a handle to.
    pub fn shared_hooks(mut self, hooks: Arc<dyn ComponentHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Source of static and dynamic configuration records.
    pub fn config_loader(mut self, loader: impl ConfigLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Fire Init, Enable and Run right after start-up.
    pub fn go_running(mut self, go_running: bool) -> Self {
        self.go_running = go_running;
        self
    }

    /// Poll period of the command thread.
    pub fn recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    /// Delay between update sweeps; zero spins.
    pub fn update_idle(mut self, idle: Duration) -> Self {
        self.update_idle = idle;
        self
    }

    /// Logging policy and level.
    pub fn logging(mut self, logging: LoggingSettings) -> Self {
        self.logging = logging;
        self
    }

    /// Called with the error whenever a transition or hook fails fatally.
    pub fn on_fatal(mut self, handler: impl Fn(&DaoError) + Send + Sync + 'static) -> Self {
        self.on_fatal = Arc::new(handler);
        self
    }

    /// Register an update binding up front, so it is live even with `go_running`.
    pub fn update_map<S: FrameSource>(mut self, source: S, sink: Arc<DoubleBuffer<S::Data>>) -> Self {
        self.bindings.push(Box::new(UpdateBinding::new(source, sink)));
        self
    }

    /// Bind the command socket, start the command thread and, with `go_running`, advance
    /// to Running.
    pub fn build(self) -> AppResult<Component> {
        let ctx = Context::new()?;
        let logger = Arc::new(ComponentLogger::from_settings(
            self.name.clone(),
            &self.logging,
            &ctx,
        )?);
        let socket = ReplySocket::bind(&ctx, &self.endpoint)?;
        let local_addr = socket.local_addr();

        let workers = Workers {
            name: self.name.clone(),
            hooks: Arc::clone(&self.hooks),
            loader: self.loader,
            logger: Arc::clone(&logger),
            on_fatal: self.on_fatal,
            update_idle: self.update_idle,
            bindings: self.bindings,
            active_bindings: 0,
            update: None,
            processing: None,
        };
        let inner = Arc::new(Inner {
            name: self.name.clone(),
            lifecycle: Mutex::new(Lifecycle {
                machine: StateMachine::new(),
                workers,
            }),
            hooks: self.hooks,
            variables: Variables::new(),
            logger,
        });

        let thread_inner = Arc::clone(&inner);
        let recv_timeout = self.recv_timeout;
        let command = ManagedThread::spawn(format!("{}-cmd", self.name), move |token| {
            run_command_loop(thread_inner, socket, token, recv_timeout)
        })?;

        let component = Component {
            inner,
            command: Mutex::new(Some(command)),
            ctx: Mutex::new(Some(ctx)),
            local_addr,
            endpoint: self.endpoint,
        };
        component
            .inner
            .logger
            .info(&format!("created, commands on {}", component.endpoint));

        if self.go_running {
            for transition in [Transition::Init, Transition::Enable, Transition::Run] {
                component.fire(transition)?;
            }
        }
        Ok(component)
    }
}
