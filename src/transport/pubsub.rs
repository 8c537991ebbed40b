use super::{bind_listener, codec, Context, Endpoint, RECONNECT_INTERVAL};
use crate::error::{AppResult, DaoError};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Sends every frame to all connected subscribers.
///
/// Each peer owns a queue of at most `high_water_mark` frames. A peer that falls
/// further behind loses its oldest frames; `send` itself never blocks.
#[derive(Debug)]
pub struct Publisher {
    tx: broadcast::Sender<Bytes>,
    token: CancellationToken,
    handle: Handle,
    local_addr: Option<SocketAddr>,
    high_water_mark: usize,
}

impl Publisher {
    /// Listen on `endpoint` and serve every subscriber that connects.
    pub fn bind(ctx: &Context, endpoint: &Endpoint, high_water_mark: usize) -> AppResult<Self> {
        let (listener, local_addr) = bind_listener(ctx, endpoint)?;
        let publisher = Self::detached(ctx, high_water_mark, Some(local_addr));
        debug!(%endpoint, %local_addr, "publisher bound");
        ctx.handle().spawn(accept_subscribers(
            listener,
            publisher.tx.clone(),
            publisher.token.clone(),
        ));
        Ok(publisher)
    }

    /// Connect to a subscriber bound on `endpoint`, reconnecting whenever the link drops.
    ///
    /// Frames sent before the link is up are queued up to the high-water mark.
    pub fn connect(ctx: &Context, endpoint: &Endpoint, high_water_mark: usize) -> Self {
        let publisher = Self::detached(ctx, high_water_mark, None);
        let rx = publisher.tx.subscribe();
        ctx.handle().spawn(connect_and_forward(
            endpoint.connect_addr(),
            rx,
            publisher.token.clone(),
        ));
        debug!(%endpoint, "publisher connecting");
        publisher
    }

    /// A publisher with no network presence; only in-process subscribers receive frames.
    pub fn in_process(ctx: &Context, high_water_mark: usize) -> Self {
        Self::detached(ctx, high_water_mark, None)
    }

    fn detached(ctx: &Context, high_water_mark: usize, local_addr: Option<SocketAddr>) -> Self {
        let high_water_mark = high_water_mark.max(1);
        let (tx, _) = broadcast::channel(high_water_mark);
        Self {
            tx,
            token: CancellationToken::new(),
            handle: ctx.handle().clone(),
            local_addr,
            high_water_mark,
        }
    }

    /// Queue `frame` for every current subscriber. Returns how many will see it.
    pub fn send(&self, frame: impl Into<Bytes>) -> usize {
        self.tx.send(frame.into()).unwrap_or(0)
    }

    /// Additionally listen on `endpoint`, serving the same frame stream.
    pub fn also_bind(&self, ctx: &Context, endpoint: &Endpoint) -> AppResult<SocketAddr> {
        let (listener, local_addr) = bind_listener(ctx, endpoint)?;
        ctx.handle().spawn(accept_subscribers(
            listener,
            self.tx.clone(),
            self.token.clone(),
        ));
        Ok(local_addr)
    }

    /// A subscriber in this process that receives every frame sent from now on.
    pub fn subscribe_local(&self) -> Subscriber {
        let (frames_tx, frames_rx) = mpsc::channel(self.high_water_mark);
        let token = self.token.child_token();
        let mut rx = self.tx.subscribe();
        let forward_token = token.clone();
        self.handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = forward_token.cancelled() => break,
                    frame = rx.recv() => match frame {
                        Ok(frame) => {
                            if frames_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(dropped)) => {
                            trace!(dropped, "local subscriber lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
        Subscriber {
            rx: frames_rx,
            token,
            handle: self.handle.clone(),
            local_addr: None,
        }
    }

    /// Address actually bound, when the publisher listens.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop all I/O tasks. Frames still queued are dropped.
    pub fn close(&self) {
        self.token.cancel();
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn accept_subscribers(
    listener: TcpListener,
    tx: broadcast::Sender<Bytes>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "subscriber connected");
                    let rx = tx.subscribe();
                    let token = token.clone();
                    tokio::spawn(async move {
                        let mut rx = rx;
                        forward_frames(stream, &mut rx, &token).await;
                        debug!(%peer, "subscriber gone");
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
}

async fn connect_and_forward(
    addr: String,
    mut rx: broadcast::Receiver<Bytes>,
    token: CancellationToken,
) {
    while !token.is_cancelled() {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                debug!(%addr, "publisher connected");
                forward_frames(stream, &mut rx, &token).await;
            }
            Err(e) => trace!(%addr, error = %e, "publisher connect failed"),
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(RECONNECT_INTERVAL) => {}
        }
    }
}

/// Write frames from `rx` to `stream` until the peer goes away or `token` fires.
async fn forward_frames(
    stream: TcpStream,
    rx: &mut broadcast::Receiver<Bytes>,
    token: &CancellationToken,
) {
    let _ = stream.set_nodelay(true);
    let mut sink = FramedWrite::new(stream, codec());
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = rx.recv() => match frame {
                Ok(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        debug!(error = %e, "subscriber write failed");
                        break;
                    }
                }
                Err(RecvError::Lagged(dropped)) => {
                    warn!(dropped, "subscriber above high-water mark, frames dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Receives frames from one or more publishers.
///
/// Frames from a single publisher arrive in the order they were sent.
#[derive(Debug)]
pub struct Subscriber {
    rx: mpsc::Receiver<Bytes>,
    token: CancellationToken,
    handle: Handle,
    local_addr: Option<SocketAddr>,
}

impl Subscriber {
    /// Listen on `endpoint` and accept frames from every publisher that connects.
    pub fn bind(ctx: &Context, endpoint: &Endpoint, high_water_mark: usize) -> AppResult<Self> {
        let (listener, local_addr) = bind_listener(ctx, endpoint)?;
        let (tx, rx) = mpsc::channel(high_water_mark.max(1));
        let token = CancellationToken::new();
        debug!(%endpoint, %local_addr, "subscriber bound");

        let accept_token = token.clone();
        ctx.handle().spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "publisher connected");
                            tokio::spawn(read_frames(stream, tx.clone(), accept_token.clone()));
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    },
                }
            }
        });

        Ok(Self {
            rx,
            token,
            handle: ctx.handle().clone(),
            local_addr: Some(local_addr),
        })
    }

    /// Connect to a publisher bound on `endpoint`, reconnecting whenever the link drops.
    pub fn connect(ctx: &Context, endpoint: &Endpoint, high_water_mark: usize) -> Self {
        let (tx, rx) = mpsc::channel(high_water_mark.max(1));
        let token = CancellationToken::new();
        let addr = endpoint.connect_addr();
        debug!(%endpoint, "subscriber connecting");

        let connect_token = token.clone();
        ctx.handle().spawn(async move {
            while !connect_token.is_cancelled() {
                match TcpStream::connect(&addr).await {
                    Ok(stream) => read_frames(stream, tx.clone(), connect_token.clone()).await,
                    Err(e) => trace!(%addr, error = %e, "subscriber connect failed"),
                }
                tokio::select! {
                    _ = connect_token.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_INTERVAL) => {}
                }
            }
        });

        Self {
            rx,
            token,
            handle: ctx.handle().clone(),
            local_addr: None,
        }
    }

    /// Next frame. `None` once the socket is closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        tokio::select! {
            _ = self.token.cancelled() => None,
            frame = self.rx.recv() => frame,
        }
    }

    /// Blocking receive with a timeout. `Ok(None)` means nothing arrived in time.
    pub fn recv_timeout(&mut self, timeout: Duration) -> AppResult<Option<Bytes>> {
        let handle = self.handle.clone();
        match handle.block_on(async { tokio::time::timeout(timeout, self.recv()).await }) {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(DaoError::ChannelClosed),
            Err(_) => Ok(None),
        }
    }

    /// Bound address, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop the connection tasks. Later sends are dropped.
    pub fn close(&self) {
        self.token.cancel();
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn read_frames(stream: TcpStream, tx: mpsc::Sender<Bytes>, token: CancellationToken) {
    let mut frames = FramedRead::new(stream, codec());
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(frame)) => {
                    if tx.send(frame.freeze()).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "dropping publisher after bad frame");
                    break;
                }
                None => break,
            },
        }
    }
}
