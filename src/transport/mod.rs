//! Message transport.
//!
//! A small socket layer over TCP with length-prefixed frames:
//!
//! - [`Publisher`] / [`Subscriber`]: fan-out of frames to every connected peer. Either
//!   side may bind or connect. Publishing never blocks; peers that fall more than the
//!   high-water mark behind lose frames.
//! - [`ReplySocket`] / [`RequestSocket`]: one reply per request, strictly alternating on
//!   each connection.
//!
//! All sockets run their I/O on the runtime owned by a [`Context`] and expose blocking
//! methods with explicit timeouts to the threads that use them.

mod context;
mod endpoint;
mod pubsub;
mod reqrep;

pub use context::Context;
pub use endpoint::Endpoint;
pub use pubsub::{Publisher, Subscriber};
pub use reqrep::{PendingRequest, ReplySocket, RequestSocket};

use crate::error::AppResult;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::codec::LengthDelimitedCodec;

/// Largest frame accepted on any socket.
pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Frames buffered per peer before the oldest are dropped.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1000;

/// Delay between reconnect attempts of connecting sockets.
pub(crate) const RECONNECT_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

pub(crate) fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Bind synchronously so address-in-use errors surface to the caller, then hand the
/// listener to the runtime.
pub(crate) fn bind_listener(
    ctx: &Context,
    endpoint: &Endpoint,
) -> AppResult<(TcpListener, SocketAddr)> {
    let listener = std::net::TcpListener::bind(endpoint.bind_addr())?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    let _guard = ctx.handle().enter();
    Ok((TcpListener::from_std(listener)?, local_addr))
}
