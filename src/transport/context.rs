//! Messaging context: the async runtime every socket of a process runs on.

use crate::error::AppResult;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Owns the I/O runtime. Create one per component or broker, release it once with
/// [`Context::term`] after every socket is closed.
///
/// Sockets keep a [`Handle`] to the runtime, so their blocking methods must be called
/// from plain threads, never from inside an async task.
#[derive(Debug)]
pub struct Context {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl Context {
    /// Context with two I/O threads.
    pub fn new() -> AppResult<Self> {
        Self::with_io_threads(2)
    }

    /// Context with `threads` I/O threads.
    pub fn with_io_threads(threads: usize) -> AppResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name("dao-io")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    /// Runtime handle the sockets spawn onto.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `future` to completion from a synchronous caller.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Shut the runtime down, abandoning tasks that have not finished within a short grace
    /// period.
    pub fn term(mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
            tracing::debug!("messaging context terminated");
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        }
    }
}
