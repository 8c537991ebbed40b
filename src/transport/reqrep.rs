use super::{bind_listener, codec, Context, Endpoint};
use crate::error::{AppResult, DaoError};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A request waiting for its reply.
///
/// Dropping it without replying closes the requesting connection.
#[derive(Debug)]
pub struct PendingRequest {
    frame: Bytes,
    reply_tx: oneshot::Sender<Bytes>,
}

impl PendingRequest {
    /// Encoded request.
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    /// Send the reply. Fails when the requester has disconnected meanwhile.
    pub fn reply(self, frame: impl Into<Bytes>) -> AppResult<()> {
        self.reply_tx
            .send(frame.into())
            .map_err(|_| DaoError::ChannelClosed)
    }
}

/// Server side of the request/reply pattern.
///
/// Every connection is served strictly in turn: its next request is not read until the
/// reply to the previous one has been written.
#[derive(Debug)]
pub struct ReplySocket {
    requests: std_mpsc::Receiver<PendingRequest>,
    token: CancellationToken,
    local_addr: SocketAddr,
}

impl ReplySocket {
    /// Bind `endpoint` and start accepting requesters.
    pub fn bind(ctx: &Context, endpoint: &Endpoint) -> AppResult<Self> {
        let (listener, local_addr) = bind_listener(ctx, endpoint)?;
        let (tx, requests) = std_mpsc::channel();
        let token = CancellationToken::new();
        debug!(%endpoint, %local_addr, "reply socket bound");

        let accept_token = token.clone();
        ctx.handle().spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "requester connected");
                            tokio::spawn(serve_requester(stream, tx.clone(), accept_token.clone()));
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    },
                }
            }
        });

        Ok(Self {
            requests,
            token,
            local_addr,
        })
    }

    /// Wait up to `timeout` for the next request. `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> AppResult<Option<PendingRequest>> {
        match self.requests.recv_timeout(timeout) {
            Ok(request) => Ok(Some(request)),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(DaoError::ChannelClosed),
        }
    }

    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting; pending requests are dropped.
    pub fn close(&self) {
        self.token.cancel();
    }
}

impl Drop for ReplySocket {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn serve_requester(
    stream: TcpStream,
    requests: std_mpsc::Sender<PendingRequest>,
    token: CancellationToken,
) {
    let _ = stream.set_nodelay(true);
    let mut framed = Framed::new(stream, codec());
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = framed.next() => match frame {
                Some(Ok(frame)) => frame.freeze(),
                Some(Err(e)) => {
                    warn!(error = %e, "dropping requester after bad frame");
                    break;
                }
                None => break,
            },
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if requests.send(PendingRequest { frame, reply_tx }).is_err() {
            break;
        }

        let reply = tokio::select! {
            _ = token.cancelled() => break,
            reply = reply_rx => match reply {
                Ok(reply) => reply,
                Err(_) => break,
            },
        };
        if let Err(e) = framed.send(reply).await {
            debug!(error = %e, "reply write failed");
            break;
        }
    }
}

/// Client side of the request/reply pattern.
///
/// After a timeout the connection is discarded and re-established on the next request
/// so a late reply can never be mistaken for the answer to a newer request.
#[derive(Debug)]
pub struct RequestSocket {
    endpoint: Endpoint,
    framed: Option<Framed<TcpStream, LengthDelimitedCodec>>,
    handle: Handle,
    timeout: Duration,
}

impl RequestSocket {
    /// Connect to `endpoint`, failing requests unanswered within `timeout`.
    pub fn connect(ctx: &Context, endpoint: &Endpoint, timeout: Duration) -> AppResult<Self> {
        let mut socket = Self {
            endpoint: endpoint.clone(),
            framed: None,
            handle: ctx.handle().clone(),
            timeout,
        };
        socket.ensure_connected()?;
        Ok(socket)
    }

    fn ensure_connected(&mut self) -> AppResult<&mut Framed<TcpStream, LengthDelimitedCodec>> {
        if self.framed.is_none() {
            let addr = self.endpoint.connect_addr();
            let timeout = self.timeout;
            let stream = self
                .handle
                .block_on(async { tokio::time::timeout(timeout, TcpStream::connect(addr)).await })
                .map_err(|_| DaoError::Timeout(timeout))??;
            stream.set_nodelay(true)?;
            self.framed = Some(Framed::new(stream, codec()));
        }
        self.framed.as_mut().ok_or(DaoError::ChannelClosed)
    }

    /// Send `frame` and wait for the reply.
    pub fn request(&mut self, frame: impl Into<Bytes>) -> AppResult<Bytes> {
        let frame = frame.into();
        let timeout = self.timeout;
        let handle = self.handle.clone();
        let framed = self.ensure_connected()?;

        let result: AppResult<Bytes> = handle.block_on(async {
            framed.send(frame).await?;
            match tokio::time::timeout(timeout, framed.next()).await {
                Err(_) => Err(DaoError::Timeout(timeout)),
                Ok(None) => Err(DaoError::ChannelClosed),
                Ok(Some(reply)) => Ok(reply?.freeze()),
            }
        });
        if result.is_err() {
            self.framed = None;
        }
        result
    }

    /// Remote endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn request_reply_alternates() {
        let ctx = Context::new().unwrap();
        let server = ReplySocket::bind(&ctx, &Endpoint::local(0)).unwrap();
        let port = server.local_addr().port();

        let echo = thread::spawn(move || {
            for _ in 0..3 {
                let request = server
                    .recv_timeout(Duration::from_secs(2))
                    .unwrap()
                    .unwrap();
                let mut reply = request.frame().to_vec();
                reply.reverse();
                request.reply(reply).unwrap();
            }
        });

        let mut client =
            RequestSocket::connect(&ctx, &Endpoint::local(port), Duration::from_secs(2)).unwrap();
        assert_eq!(client.request(&b"abc"[..]).unwrap().as_ref(), b"cba");
        assert_eq!(client.request(&b"12"[..]).unwrap().as_ref(), b"21");
        assert_eq!(client.request(&b"x"[..]).unwrap().as_ref(), b"x");
        echo.join().unwrap();
    }

    #[test]
    fn idle_server_times_out_without_error() {
        let ctx = Context::new().unwrap();
        let server = ReplySocket::bind(&ctx, &Endpoint::local(0)).unwrap();
        assert!(server
            .recv_timeout(Duration::from_millis(20))
            .unwrap()
            .is_none());
    }

    #[test]
    fn unanswered_request_times_out() {
        let ctx = Context::new().unwrap();
        let server = ReplySocket::bind(&ctx, &Endpoint::local(0)).unwrap();
        let mut client = RequestSocket::connect(
            &ctx,
            &Endpoint::local(server.local_addr().port()),
            Duration::from_millis(100),
        )
        .unwrap();
        assert!(matches!(
            client.request(&b"ping"[..]),
            Err(DaoError::Timeout(_))
        ));
    }
}
