//! Blocking client for a component's command channel.
//!
//! Used by the `dao send` subcommand and by tests. Each call sends one
//! `CommandMessage` and waits for the matching `ReplyMessage`.

use crate::error::AppResult;
use crate::protocol::{self, Command, CommandMessage, LogLevel, ReplyMessage};
use crate::state_machine::Transition;
use crate::transport::{Context, Endpoint, RequestSocket};
use std::time::Duration;

/// Default time to wait for a reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Blocking command-channel client for one component.
#[derive(Debug)]
pub struct CommandClient {
    socket: RequestSocket,
    // kept last so the socket is dropped before the runtime it uses
    _ctx: Context,
}

impl CommandClient {
    /// Connect with the default reply timeout.
    pub fn connect(endpoint: &Endpoint) -> AppResult<Self> {
        Self::connect_with_timeout(endpoint, DEFAULT_REPLY_TIMEOUT)
    }

    /// Connect, failing requests that get no reply within `timeout`.
    pub fn connect_with_timeout(endpoint: &Endpoint, timeout: Duration) -> AppResult<Self> {
        let ctx = Context::with_io_threads(1)?;
        let socket = RequestSocket::connect(&ctx, endpoint, timeout)?;
        Ok(Self { socket, _ctx: ctx })
    }

    /// Send a command and return the decoded reply, whatever its status.
    pub fn send(&mut self, function: Command, payload: &str) -> AppResult<ReplyMessage> {
        let frame = protocol::encode(&CommandMessage::new(function, payload));
        self.send_raw(frame.to_vec())
    }

    /// Send an arbitrary frame. Useful for probing decode errors.
    pub fn send_raw(&mut self, frame: Vec<u8>) -> AppResult<ReplyMessage> {
        let reply = self.socket.request(frame)?;
        protocol::decode(&reply)
    }

    /// PING; a success reply carries the component's process id.
    pub fn ping(&mut self) -> AppResult<ReplyMessage> {
        self.send(Command::Ping, "")
    }

    /// STATE; the reply payload is the state name.
    pub fn state(&mut self) -> AppResult<ReplyMessage> {
        self.send(Command::State, "")
    }

    /// EXEC with the remote name of `transition` (`StopRun` is sent as `Idle`).
    pub fn exec(&mut self, transition: Transition) -> AppResult<ReplyMessage> {
        let name = match transition {
            Transition::StopRun => "Idle",
            other => other.as_str(),
        };
        self.send(Command::Exec, name)
    }

    /// QUERY the variable `name`.
    pub fn query(&mut self, name: &str) -> AppResult<ReplyMessage> {
        self.send(Command::Query, name)
    }

    /// SET_LOG_LEVEL on the component's logger.
    pub fn set_log_level(&mut self, level: LogLevel) -> AppResult<ReplyMessage> {
        self.send(Command::SetLogLevel, level.as_str())
    }

    /// Endpoint this client talks to.
    pub fn endpoint(&self) -> &Endpoint {
        self.socket.endpoint()
    }
}
