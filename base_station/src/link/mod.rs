//! Sensor link engine.
//!
//! One task, one socket. Every tick re-reads the shared document, applies
//! address/port changes, sends a downlink frame when the poll interval has
//! elapsed, then waits a bounded time for an uplink frame. Each wait races
//! the stop signal, so shutdown and reconfiguration take effect within one
//! tick no matter what the sensor node does.
//!
//! ```text
//!   Idle <--enabled/disabled--> Active --port change--> Reconfiguring
//!                                 ^                          |
//!                                 +-------- bound -----------+
//!   any state --stop--> Closed
//! ```

pub mod timing;

#[cfg(test)]
mod tests;

use std::net::SocketAddr;

use chrono::Local;
use link_protocol::{
    ConfigStore, FRAME_LEN, LinkConfig, Reading, SequenceCounter, decode_uplink, encode_downlink,
};
use tokio::sync::watch;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::errors::LinkError;
use crate::logging::ReadingSink;
use crate::net::{Binder, LinkSocket};

pub use timing::{LinkTiming, PollTimer};

/// Receive buffer; larger than a frame so oversized datagrams are seen as
/// such instead of being truncated to 52 bytes.
const RECV_BUF_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Active,
    Reconfiguring,
    Closed,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Document missing or unreadable; backed off.
    ConfigUnavailable,
    /// Link disabled in the document; backed off, nothing sent.
    Disabled,
    /// Local port changed but could not be bound; retried next tick.
    RebindPending { port: u16 },
    /// Normal poll. `sent` is the sequence number put on the wire, if any.
    Polled {
        sent: Option<u8>,
        received: Option<Reading>,
    },
    /// Stop signal observed; socket closed.
    Closed,
}

enum Uplink {
    Frame(Reading),
    Nothing,
    Stopped,
}

pub struct LinkEngine<B: Binder, S: ReadingSink> {
    store: ConfigStore,
    binder: B,
    sink: S,
    timing: LinkTiming,
    stop: watch::Receiver<bool>,

    state: LinkState,
    socket: Option<B::Socket>,
    bound_port: u16,
    target: SocketAddr,
    sequence: SequenceCounter,
    poll: PollTimer,
}

impl<B: Binder, S: ReadingSink> LinkEngine<B, S> {
    /// Load the document and bind the configured local port. Either failure
    /// is fatal: the engine cannot run without a socket.
    pub async fn start(
        store: ConfigStore,
        binder: B,
        sink: S,
        timing: LinkTiming,
        stop: watch::Receiver<bool>,
    ) -> Result<Self, LinkError> {
        let cfg = store.load().await?.link_config();
        let socket = binder
            .bind(cfg.local_port)
            .await
            .map_err(|source| LinkError::Bind { port: cfg.local_port, source })?;

        info!(port = cfg.local_port, "UDP link listening");
        info!(target = %cfg.target, "monitoring sensor node");

        Ok(Self {
            store,
            binder,
            sink,
            timing,
            stop,
            state: if cfg.enabled { LinkState::Active } else { LinkState::Idle },
            socket: Some(socket),
            bound_port: cfg.local_port,
            target: cfg.target,
            sequence: SequenceCounter::default(),
            poll: PollTimer::default(),
        })
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn bound_port(&self) -> Option<u16> {
        self.socket.as_ref().map(|_| self.bound_port)
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Tick until the stop signal is observed.
    pub async fn run(mut self) {
        while self.tick().await != TickOutcome::Closed {}
        info!("link engine stopped");
    }

    pub async fn tick(&mut self) -> TickOutcome {
        if self.state == LinkState::Closed {
            return TickOutcome::Closed;
        }
        let stopping = *self.stop.borrow();
        if stopping {
            return self.close();
        }

        let cfg = match self.store.load().await {
            Ok(doc) => doc.link_config(),
            Err(e) => {
                let err = LinkError::from(e);
                warn!(error = %err, "backing off");
                return self.backoff(TickOutcome::ConfigUnavailable).await;
            }
        };

        if !cfg.enabled {
            if self.state != LinkState::Idle {
                info!("link disabled; transmission paused");
                self.state = LinkState::Idle;
            }
            return self.backoff(TickOutcome::Disabled).await;
        }

        if cfg.target != self.target {
            info!(from = %self.target, to = %cfg.target, "sensor target updated");
            self.target = cfg.target;
        }

        if self.socket.is_none() || cfg.local_port != self.bound_port {
            if let Err(err) = self.rebind(cfg.local_port).await {
                warn!(error = %err, "rebind failed; retrying next tick");
                let wait = self.timing.recv_timeout;
                return self.pause(wait, TickOutcome::RebindPending { port: cfg.local_port }).await;
            }
        }

        if self.state == LinkState::Idle {
            info!("link enabled; polling sensor node");
        }
        self.state = LinkState::Active;

        let now = Instant::now();
        let sent = if self.poll.due(now, cfg.poll_interval) {
            self.transmit(&cfg, now).await
        } else {
            None
        };

        let received = match self.receive().await {
            Uplink::Stopped => return self.close(),
            Uplink::Nothing => None,
            Uplink::Frame(reading) => {
                self.sink.record(&reading).await;
                Some(reading)
            }
        };

        let outcome = TickOutcome::Polled { sent, received };
        let slice = self.timing.yield_slice;
        self.pause(slice, outcome).await
    }

    /// Close the old socket, then bind the new port. On failure the old
    /// port number is kept so the next tick sees the mismatch and retries.
    async fn rebind(&mut self, port: u16) -> Result<(), LinkError> {
        self.state = LinkState::Reconfiguring;
        if let Some(old) = self.socket.take() {
            drop(old);
            info!(old_port = self.bound_port, new_port = port, "socket closed for reconfiguration");
        }
        let socket = self
            .binder
            .bind(port)
            .await
            .map_err(|source| LinkError::Bind { port, source })?;
        self.socket = Some(socket);
        self.bound_port = port;
        self.state = LinkState::Active;
        info!(port, "UDP link listening");
        Ok(())
    }

    async fn transmit(&mut self, cfg: &LinkConfig, now: Instant) -> Option<u8> {
        let sock = self.socket.as_ref()?;
        let late_ms = self.poll.lateness_ms(now, cfg.poll_interval);
        let seq = self.sequence.peek();
        let frame = encode_downlink(seq, cfg.attention_threshold, cfg.critical_threshold);

        // a failed send leaves counter and timer alone so the next tick retries
        match sock.send_to(&frame, self.target).await {
            Ok(_) => {
                self.sequence.advance();
                self.poll.mark_sent(now);
                debug!(seq, target = %self.target, ?late_ms, "downlink sent");
                trace!(frame = %hex::encode(frame), "downlink bytes");
                Some(seq)
            }
            Err(e) => {
                warn!(seq, target = %self.target, error = %e, "downlink send failed; frame dropped");
                None
            }
        }
    }

    async fn receive(&mut self) -> Uplink {
        let Some(sock) = self.socket.as_ref() else {
            return Uplink::Nothing;
        };
        let mut buf = [0u8; RECV_BUF_LEN];

        tokio::select! {
            _ = stop_requested(&mut self.stop) => Uplink::Stopped,
            res = time::timeout(self.timing.recv_timeout, sock.recv_from(&mut buf)) => match res {
                // no reply this tick: not an error, the node may just be out of sync
                Err(_elapsed) => Uplink::Nothing,
                Ok(Err(e)) => {
                    warn!(error = %e, "uplink receive failed");
                    Uplink::Nothing
                }
                Ok(Ok((n, from))) => match decode_uplink(&buf[..n]) {
                    Ok(fields) => {
                        let reading = Reading::from_uplink(&fields, Local::now());
                        info!(
                            %from,
                            luminosity = reading.luminosity,
                            rssi_dbm = reading.rssi_downlink_dbm,
                            "synchronized"
                        );
                        Uplink::Frame(reading)
                    }
                    Err(e) => {
                        debug!(%from, len = n, expected = FRAME_LEN, error = %LinkError::from(e), "datagram discarded");
                        Uplink::Nothing
                    }
                },
            },
        }
    }

    async fn backoff(&mut self, outcome: TickOutcome) -> TickOutcome {
        let wait = self.timing.idle_backoff;
        self.pause(wait, outcome).await
    }

    /// Sleep that gives way to the stop signal.
    async fn pause(&mut self, wait: Duration, outcome: TickOutcome) -> TickOutcome {
        let stopped = tokio::select! {
            _ = stop_requested(&mut self.stop) => true,
            _ = time::sleep(wait) => false,
        };
        if stopped { self.close() } else { outcome }
    }

    fn close(&mut self) -> TickOutcome {
        if self.socket.take().is_some() {
            info!(port = self.bound_port, "socket closed");
        }
        self.state = LinkState::Closed;
        TickOutcome::Closed
    }
}

/// Resolves once stop is requested or the sender is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
