//! TCP link to a remote processor.
//!
//! A supervisor task dials the processor, runs one framed session until the
//! link drops, then redials after a fixed delay. `Connected` and
//! `Disconnected` events are emitted on every edge so the controller can
//! pause and resume capture.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::codec::StreamCodec;
use crate::error::StreamError;
use crate::packet::Packet;
use crate::protocol::{OutgoingFrame, WireMessage};
use crate::task::TaskGroup;
use crate::transport::{
    ConnectionPhase, EVENT_QUEUE_DEPTH, FrameTransport, TransportEvent, check_outgoing,
};

#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// `host:port` of the processor.
    pub address: String,

    pub connect_timeout: Duration,

    /// Consecutive failed dials before giving up. `0` retries forever.
    pub reconnect_attempts: u32,

    pub reconnect_delay: Duration,

    pub heartbeat_interval: Duration,

    /// Frames that may wait for the socket before `send` reports `QueueFull`.
    pub queue_depth: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9750".to_string(),
            connect_timeout: Duration::from_secs(5),
            reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(5),
            queue_depth: 8,
        }
    }
}

pub struct TcpTransport {
    outbound: mpsc::Sender<OutgoingFrame>,
    phase: watch::Receiver<ConnectionPhase>,
    tasks: Mutex<TaskGroup>,
}

impl TcpTransport {
    /// Start the supervisor. Inbound events arrive on the returned receiver.
    pub fn spawn(config: TcpTransportConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_depth.max(1));
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (phase_tx, phase_rx) = watch::channel(ConnectionPhase::Disconnected);

        let mut tasks = TaskGroup::new("tcp-transport");
        tasks.spawn(supervise(config, outbound_rx, event_tx, phase_tx));

        let transport = Self {
            outbound: outbound_tx,
            phase: phase_rx,
            tasks: Mutex::new(tasks),
        };
        (transport, event_rx)
    }

    /// Current connection phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase.borrow().clone()
    }
}

#[async_trait]
impl FrameTransport for TcpTransport {
    fn send(&self, frame: OutgoingFrame) -> Result<(), StreamError> {
        if !self.is_connected() {
            return Err(StreamError::NotConnected);
        }
        check_outgoing(&frame)?;
        Ok(self.outbound.try_send(frame)?)
    }

    fn is_connected(&self) -> bool {
        self.phase.borrow().is_connected()
    }

    async fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.abort_all();
        }
    }
}

// ── Supervisor ───────────────────────────────────────────────────

enum SessionEnd {
    /// The link failed; redial.
    Lost(String),
    /// The owning transport or the event consumer went away.
    Closed,
}

fn set_phase(
    phase: &watch::Sender<ConnectionPhase>,
    f: impl FnOnce(&mut ConnectionPhase) -> Result<(), StreamError>,
) {
    phase.send_modify(|p| {
        if let Err(e) = f(p) {
            error!(error = %e, "connection phase");
        }
    });
}

async fn supervise(
    config: TcpTransportConfig,
    mut outbound: mpsc::Receiver<OutgoingFrame>,
    events: mpsc::Sender<TransportEvent>,
    phase: watch::Sender<ConnectionPhase>,
) {
    let mut failures: u32 = 0;

    loop {
        set_phase(&phase, |p| p.begin_connect(failures + 1));
        debug!(address = %config.address, attempt = failures + 1, "dialing processor");

        match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.address))
            .await
        {
            Ok(Ok(stream)) => {
                failures = 0;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "set_nodelay failed");
                }
                set_phase(&phase, ConnectionPhase::complete_connect);
                info!(address = %config.address, "connected to processor");
                if events.send(TransportEvent::Connected).await.is_err() {
                    return;
                }

                let end = run_session(stream, &config, &mut outbound, &events).await;
                set_phase(&phase, ConnectionPhase::connection_lost);

                // frames queued for the dead link are stale
                while outbound.try_recv().is_ok() {}

                match end {
                    SessionEnd::Closed => return,
                    SessionEnd::Lost(reason) => {
                        warn!(%reason, "processor link lost");
                        if events
                            .send(TransportEvent::Disconnected { reason })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                failures += 1;
                set_phase(&phase, ConnectionPhase::connection_lost);
                warn!(address = %config.address, error = %e, attempt = failures, "connect failed");
            }
            Err(_) => {
                failures += 1;
                set_phase(&phase, ConnectionPhase::connection_lost);
                warn!(
                    address = %config.address,
                    timeout = ?config.connect_timeout,
                    attempt = failures,
                    "connect timed out"
                );
            }
        }

        if config.reconnect_attempts > 0 && failures >= config.reconnect_attempts {
            set_phase(&phase, ConnectionPhase::give_up);
            error!(attempts = failures, "giving up on processor");
            return;
        }

        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn run_session(
    stream: TcpStream,
    config: &TcpTransportConfig,
    outbound: &mut mpsc::Receiver<OutgoingFrame>,
    events: &mpsc::Sender<TransportEvent>,
) -> SessionEnd {
    let (mut sink, mut source) = Framed::new(stream, StreamCodec).split();

    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    return SessionEnd::Closed;
                };
                let packet = match frame.to_packet() {
                    Ok(packet) => packet,
                    Err(e) => {
                        // already counted as in flight; release it
                        warn!(sequence_id = frame.sequence_id, error = %e, "unencodable frame");
                        let event = TransportEvent::MalformedResult { reason: e.to_string() };
                        if events.send(event).await.is_err() {
                            return SessionEnd::Closed;
                        }
                        continue;
                    }
                };
                if let Err(e) = sink.send(packet).await {
                    return SessionEnd::Lost(format!("write error: {e}"));
                }
            }
            inbound = source.next() => match inbound {
                Some(Ok(packet)) => {
                    if let Some(event) = TransportEvent::from_packet(&packet) {
                        if events.send(event).await.is_err() {
                            return SessionEnd::Closed;
                        }
                    }
                }
                Some(Err(e)) => return SessionEnd::Lost(format!("read error: {e}")),
                None => return SessionEnd::Lost("processor closed the connection".to_string()),
            },
            _ = heartbeat.tick() => {
                if let Err(e) = sink.send(Packet::heartbeat()).await {
                    return SessionEnd::Lost(format!("heartbeat failed: {e}"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_bounded() {
        let config = TcpTransportConfig::default();
        assert!(config.reconnect_attempts > 0);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert!(config.queue_depth > 0);
    }

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let (transport, _events) = TcpTransport::spawn(TcpTransportConfig {
            address: "127.0.0.1:1".to_string(),
            reconnect_attempts: 1,
            ..Default::default()
        });
        let frame = OutgoingFrame {
            frame_bytes: vec![1],
            sent_timestamp: 0,
            sequence_id: 0,
            quality: 0.8,
        };
        assert!(matches!(transport.send(frame), Err(StreamError::NotConnected)));
        transport.shutdown().await;
    }
}
