//! # dao_control
//!
//! Control-plane building blocks for distributed real-time instrument software.
//!
//! Each process in such a system is a *component*: it carries a lifecycle state machine,
//! answers control commands on a request/reply socket, and logs onto a shared
//! publish/subscribe bus that a central log server relays and persists.
//!
//! ## Crate Structure
//!
//! - **`state_machine`**: The closed lifecycle (`Off`, `Standby`, `Idle`, `Running`,
//!   `Error`) and its transition table, with exit/transition/enter hooks.
//! - **`component`**: `Component`, which starts and stops its command, update and
//!   processing threads as the lifecycle moves, and dispatches the command protocol.
//! - **`double_buffer`** / **`source`**: The swap buffer that decouples the update thread
//!   from consumers, and the counter-based frame sources it polls.
//! - **`protocol`**: Protocol-buffer messages (`CommandMessage`, `ReplyMessage`,
//!   `LogMessage`).
//! - **`transport`**: Framed TCP sockets (publish/subscribe and request/reply) on a
//!   per-process messaging context.
//! - **`broker`** / **`log_server`**: The bus relay with its capture tap, and the log
//!   server that persists captured records to a rotating file.
//! - **`logger`**: Per-component log handle with its own adjustable threshold.
//! - **`client`**: Blocking command client.
//! - **`config`**: Settings files loaded with `figment`.
//! - **`error`**: The crate-wide `DaoError`.
//! - **`tracing_setup`**: Global `tracing` subscriber initialisation for binaries.

pub mod broker;
pub mod client;
pub mod component;
pub mod config;
pub mod double_buffer;
pub mod error;
pub mod log_server;
pub mod logger;
pub mod protocol;
pub mod signals;
pub mod source;
pub mod state_machine;
pub mod tracing_setup;
pub mod transport;

pub use component::{Component, ComponentBuilder, ComponentHooks};
pub use error::{AppResult, DaoError};
pub use state_machine::{State, StateMachine, Transition};
