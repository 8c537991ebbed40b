//! Publish/subscribe relay with a capture tap.
//!
//! ```text
//!  publishers ──► ingress (SUB, bound) ──► egress (PUB) ──► subscribers
//!                                     │
//!                                     └──► capture (PUB, in-process [+ tcp tap])
//! ```
//!
//! Frames are forwarded verbatim. Frames from one publisher keep their order on both
//! the egress and the capture side. Capture is lossy: a slow capture consumer drops
//! frames instead of stalling the relay.

use crate::config::{BrokerSettings, EgressMode};
use crate::error::{AppResult, DaoError};
use crate::transport::{Context, Publisher, Subscriber};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Counters reported when the relay stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Frames copied from ingress to egress
    pub frames_relayed: u64,
}

/// Forwarder between the ingress subscriber and the egress publisher, with a capture tap.
#[derive(Debug)]
pub struct Broker {
    settings: BrokerSettings,
    ingress: Subscriber,
    egress: Publisher,
    capture: Publisher,
    capture_addr: Option<SocketAddr>,
    token: CancellationToken,
    relayed: Arc<AtomicU64>,
    ctx: Option<Context>,
}

impl Broker {
    /// Bind and connect every socket. Nothing is relayed until [`Broker::run`].
    pub fn new(settings: BrokerSettings) -> AppResult<Self> {
        settings.validate()?;
        let ctx = Context::new()?;
        let hwm = settings.high_water_mark;

        let ingress = Subscriber::bind(&ctx, &settings.ingress, hwm)?;
        let egress = match settings.egress_mode {
            EgressMode::Bind => Publisher::bind(&ctx, &settings.egress, hwm)?,
            EgressMode::Connect => Publisher::connect(&ctx, &settings.egress, hwm),
        };
        let capture = Publisher::in_process(&ctx, hwm);
        let capture_addr = match &settings.capture {
            Some(endpoint) => Some(capture.also_bind(&ctx, endpoint)?),
            None => None,
        };

        info!(
            ingress = %settings.ingress,
            egress = %settings.egress,
            egress_mode = ?settings.egress_mode,
            "broker ready"
        );
        Ok(Self {
            settings,
            ingress,
            egress,
            capture,
            capture_addr,
            token: CancellationToken::new(),
            relayed: Arc::new(AtomicU64::new(0)),
            ctx: Some(ctx),
        })
    }

    /// A new in-process consumer of the capture stream. Subscribe before [`Broker::run`]
    /// to see every frame.
    pub fn capture_subscriber(&self) -> Subscriber {
        self.capture.subscribe_local()
    }

    /// Cancelling this token makes [`Broker::run`] return.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Live count of relayed frames.
    pub fn relayed(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    /// Bound ingress address, once bound.
    pub fn ingress_addr(&self) -> Option<SocketAddr> {
        self.ingress.local_addr()
    }

    /// Bound egress address; `None` in connect mode.
    pub fn egress_addr(&self) -> Option<SocketAddr> {
        self.egress.local_addr()
    }

    /// Bound capture address.
    pub fn capture_addr(&self) -> Option<SocketAddr> {
        self.capture_addr
    }

    /// Settings the broker was built from.
    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub(crate) fn context(&self) -> AppResult<&Context> {
        self.ctx.as_ref().ok_or(DaoError::ChannelClosed)
    }

    /// Relay until the shutdown handle is cancelled. Blocks the calling thread.
    pub fn run(&mut self) -> AppResult<RelayStats> {
        let ctx = self.ctx.as_ref().ok_or(DaoError::ChannelClosed)?;
        let ingress = &mut self.ingress;
        let egress = &self.egress;
        let capture = &self.capture;
        let token = &self.token;
        let relayed = &self.relayed;

        ctx.block_on(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    frame = ingress.recv() => match frame {
                        Some(frame) => {
                            egress.send(frame.clone());
                            capture.send(frame);
                            relayed.fetch_add(1, Ordering::Relaxed);
                        }
                        None => break,
                    },
                }
            }
        });

        let stats = RelayStats {
            frames_relayed: self.relayed(),
        };
        info!(frames = stats.frames_relayed, "relay stopped");
        Ok(stats)
    }

    /// Close ingress, egress and capture in that order. The context stays alive until
    /// [`Broker::term`] so capture consumers can still be closed.
    pub fn close(&self) {
        self.token.cancel();
        self.ingress.close();
        self.egress.close();
        self.capture.close();
        debug!("broker sockets closed");
    }

    /// Release the messaging context.
    pub fn term(mut self) {
        self.close();
        if let Some(ctx) = self.ctx.take() {
            ctx.term();
        }
    }
}
