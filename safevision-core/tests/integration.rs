//! Integration tests: the TCP transport against a fake processor on
//! localhost, and the full stream service over the loopback transport.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use safevision_core::{
    AdaptationConfig, AnalysisResult, DeviceError, DisplaySource, FailsafeState, FrameTransport,
    LoopbackConfig, LoopbackHandle, LoopbackTransport, MessageKind, OutgoingFrame, Packet,
    ProcessedFrame, StreamCodec, StreamController, StreamEvent, StreamHandle, StreamService,
    StreamSettings, SyntheticCamera, TcpTransport, TcpTransportConfig, TransportEvent,
    WireMessage,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

// ── Helpers ──────────────────────────────────────────────────────

async fn ephemeral_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

fn tcp_config(address: String) -> TcpTransportConfig {
    TcpTransportConfig {
        address,
        connect_timeout: Duration::from_secs(2),
        reconnect_attempts: 0,
        reconnect_delay: Duration::from_millis(50),
        heartbeat_interval: Duration::from_millis(200),
        queue_depth: 8,
    }
}

/// Answer every frame on `stream` with an echo and an analysis result,
/// until the client hangs up.
async fn serve_processor(stream: TcpStream) {
    let mut framed = Framed::new(stream, StreamCodec);
    while let Some(Ok(packet)) = framed.next().await {
        if packet.kind() != MessageKind::StreamFrame {
            continue;
        }
        let frame = OutgoingFrame::from_packet(&packet).unwrap();
        let echo = ProcessedFrame::echo(&frame).to_packet().unwrap();
        let analysis = AnalysisResult {
            people_count: 2,
            behaviors: vec!["walking".to_string()],
            behavior_detected: false,
        }
        .to_packet()
        .unwrap();
        if framed.send(echo).await.is_err() || framed.send(analysis).await.is_err() {
            return;
        }
    }
}

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timeout")
        .expect("transport event channel closed")
}

fn frame(sequence_id: u64) -> OutgoingFrame {
    OutgoingFrame {
        frame_bytes: vec![0x5A; 256],
        sent_timestamp: 1_700_000_000_000 + sequence_id,
        sequence_id,
        quality: 0.8,
    }
}

struct Harness {
    handle: StreamHandle,
    link: LoopbackHandle,
    events: broadcast::Receiver<StreamEvent>,
    task: JoinHandle<()>,
}

fn spawn_service(camera: SyntheticCamera, loopback: LoopbackConfig) -> Harness {
    let controller =
        StreamController::new(StreamSettings::default(), AdaptationConfig::default()).unwrap();
    let (transport, transport_events) = LoopbackTransport::spawn(loopback);
    let link = transport.handle();
    let (service, handle) = StreamService::new(
        controller,
        Box::new(camera),
        Arc::new(transport),
        transport_events,
    );
    let events = handle.subscribe();
    let task = tokio::spawn(service.run());
    Harness {
        handle,
        link,
        events,
        task,
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<StreamEvent>,
    pred: impl Fn(&StreamEvent) -> bool,
) -> StreamEvent {
    loop {
        match events.recv().await {
            Ok(event) if pred(&event) => return event,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
        }
    }
}

impl Harness {
    async fn finish(self) {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap();
    }
}

// ── TCP transport ────────────────────────────────────────────────

#[tokio::test]
async fn tcp_round_trip_through_processor() {
    let (listener, address) = ephemeral_listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_processor(stream).await;
    });

    let (transport, mut events) = TcpTransport::spawn(tcp_config(address));
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    assert!(transport.is_connected());

    transport.send(frame(42)).unwrap();
    match next_event(&mut events).await {
        TransportEvent::Processed(processed) => {
            assert_eq!(processed.sequence_id, Some(42));
            assert_eq!(processed.echoed_timestamp, 1_700_000_000_042);
            assert_eq!(processed.frame_bytes.len(), 256);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match next_event(&mut events).await {
        TransportEvent::Analysis(analysis) => assert_eq!(analysis.people_count, 2),
        other => panic!("unexpected event: {other:?}"),
    }

    transport.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn tcp_heartbeats_keep_idle_link_open() {
    let (listener, address) = ephemeral_listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, StreamCodec);
        let mut heartbeats = 0;
        while let Some(Ok(packet)) = framed.next().await {
            if packet.kind() == MessageKind::Heartbeat {
                heartbeats += 1;
                if heartbeats == 2 {
                    return heartbeats;
                }
            }
        }
        heartbeats
    });

    let (transport, mut events) = TcpTransport::spawn(tcp_config(address));
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    let heartbeats = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(heartbeats, 2);
    transport.shutdown().await;
}

#[tokio::test]
async fn tcp_reconnects_after_processor_drops() {
    let (listener, address) = ephemeral_listener().await;
    let server = tokio::spawn(async move {
        // first session: hang up immediately
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        // second session: serve normally
        let (second, _) = listener.accept().await.unwrap();
        serve_processor(second).await;
    });

    let (transport, mut events) = TcpTransport::spawn(tcp_config(address));
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Disconnected { .. }
    ));
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    transport.send(frame(7)).unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Processed(p) if p.sequence_id == Some(7)
    ));

    transport.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn tcp_malformed_result_is_reported() {
    let (listener, address) = ephemeral_listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, StreamCodec);
        while let Some(Ok(packet)) = framed.next().await {
            if packet.kind() == MessageKind::StreamFrame {
                // checksummed, but not a ProcessedFrame body
                let junk = Packet::new(MessageKind::ProcessedFrame, vec![0xFF; 3]).unwrap();
                framed.send(junk).await.unwrap();
                break;
            }
        }
        // keep the link open until aborted
        std::future::pending::<()>().await;
    });

    let (transport, mut events) = TcpTransport::spawn(tcp_config(address));
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    transport.send(frame(1)).unwrap();

    let event = next_event(&mut events).await;
    assert!(matches!(event, TransportEvent::MalformedResult { .. }));
    assert!(event.is_result());

    transport.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn tcp_gives_up_after_bounded_attempts() {
    // bind then drop to get a port nobody listens on
    let (listener, address) = ephemeral_listener().await;
    drop(listener);

    let (transport, mut events) = TcpTransport::spawn(TcpTransportConfig {
        reconnect_attempts: 2,
        ..tcp_config(address)
    });

    // the supervisor exits without ever connecting, closing the channel
    let closed = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timeout");
    assert!(closed.is_none());
    assert!(transport.phase().is_failed());
}

// ── Stream service over loopback ─────────────────────────────────

#[tokio::test(start_paused = true)]
async fn service_streams_at_configured_rate() {
    let mut h = spawn_service(SyntheticCamera::new(), LoopbackConfig::default());
    h.handle.start().await.unwrap();

    wait_for(&mut h.events, |e| matches!(e, StreamEvent::SessionStarted { .. })).await;
    wait_for(&mut h.events, |e| matches!(e, StreamEvent::ResultReceived { .. })).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    let stats = h.handle.stats();
    assert!(stats.session_active);
    assert!(stats.connected);
    assert_eq!(stats.failsafe, FailsafeState::Normal);
    assert_eq!(stats.display, DisplaySource::Processed);
    // 10 fps for about two seconds, with at most two frames in flight
    assert!(stats.frames_sent >= 10, "sent {}", stats.frames_sent);
    assert!(stats.pending <= 2);
    assert!(stats.avg_latency_ms >= 150.0);

    h.handle.stop().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, StreamEvent::SessionStopped)).await;
    h.finish().await;
}

#[tokio::test(start_paused = true)]
async fn silent_processor_stalls_then_engages_failsafe_then_recovers() {
    let mut h = spawn_service(SyntheticCamera::new(), LoopbackConfig::default());
    h.handle.start().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, StreamEvent::ResultReceived { .. })).await;

    h.link.set_silent(true);

    let stall = wait_for(&mut h.events, |e| {
        matches!(
            e,
            StreamEvent::StallWarning { .. } | StreamEvent::FailsafeEngaged { .. }
        )
    })
    .await;
    assert!(matches!(stall, StreamEvent::StallWarning { .. }));

    let engaged =
        wait_for(&mut h.events, |e| matches!(e, StreamEvent::FailsafeEngaged { .. })).await;
    match engaged {
        StreamEvent::FailsafeEngaged { silent_ms } => assert!(silent_ms >= 10_000),
        _ => unreachable!(),
    }
    // let a few passthrough ticks through
    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = h.handle.stats();
    assert_eq!(stats.failsafe, FailsafeState::Fallback);
    assert_eq!(stats.display, DisplaySource::LocalPassthrough);
    assert_eq!(
        h.handle.display_receiver().borrow().source,
        DisplaySource::LocalPassthrough
    );

    h.link.set_silent(false);
    wait_for(&mut h.events, |e| matches!(e, StreamEvent::FailsafeRecovered)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let stats = h.handle.stats();
    assert_eq!(stats.failsafe, FailsafeState::Normal);
    assert_eq!(stats.display, DisplaySource::Processed);

    h.finish().await;
}

#[tokio::test(start_paused = true)]
async fn slow_processor_lowers_the_rate() {
    let mut h = spawn_service(
        SyntheticCamera::new(),
        LoopbackConfig {
            latency: Duration::from_millis(2_500),
            ..Default::default()
        },
    );
    h.handle.start().await.unwrap();

    let change = wait_for(&mut h.events, |e| matches!(e, StreamEvent::RateChanged { .. })).await;
    match change {
        StreamEvent::RateChanged { before, after } => assert!(after < before),
        _ => unreachable!(),
    }
    assert!(h.handle.stats().current_rate < 10.0);

    h.finish().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_pauses_capture_and_reconnect_resumes() {
    let mut h = spawn_service(SyntheticCamera::new(), LoopbackConfig::default());
    h.handle.start().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, StreamEvent::ResultReceived { .. })).await;

    h.link.disconnect();
    wait_for(&mut h.events, |e| matches!(e, StreamEvent::Disconnected { .. })).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let paused = h.handle.stats();
    assert!(!paused.connected);
    assert_eq!(paused.pending, 0);
    assert_eq!(paused.display, DisplaySource::LocalPassthrough);

    // nothing is sent while the link is down, and the failsafe stays quiet
    tokio::time::sleep(Duration::from_secs(15)).await;
    let still = h.handle.stats();
    assert_eq!(still.frames_sent, paused.frames_sent);
    assert_eq!(still.failsafe, FailsafeState::Normal);

    h.link.reconnect();
    wait_for(&mut h.events, |e| matches!(e, StreamEvent::Connected)).await;
    wait_for(&mut h.events, |e| matches!(e, StreamEvent::ResultReceived { .. })).await;
    assert!(h.handle.stats().frames_sent > paused.frames_sent);

    h.finish().await;
}

#[tokio::test(start_paused = true)]
async fn hidden_client_stops_sending() {
    let mut h = spawn_service(SyntheticCamera::new(), LoopbackConfig::default());
    h.handle.start().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, StreamEvent::ResultReceived { .. })).await;

    h.handle.set_visible(false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let hidden = h.handle.stats();
    assert!(!hidden.visible);

    tokio::time::sleep(Duration::from_secs(20)).await;
    let later = h.handle.stats();
    assert_eq!(later.frames_sent, hidden.frames_sent);
    assert_eq!(later.failsafe, FailsafeState::Normal);

    h.handle.set_visible(true).await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, StreamEvent::FrameSent { .. })).await;

    h.finish().await;
}

#[tokio::test(start_paused = true)]
async fn switching_to_missing_camera_fails_the_session() {
    let mut h = spawn_service(
        SyntheticCamera::single(safevision_core::Facing::Front),
        LoopbackConfig::default(),
    );
    h.handle.start().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, StreamEvent::SessionStarted { .. })).await;

    h.handle.switch_facing().await.unwrap();
    let failed = wait_for(&mut h.events, |e| matches!(e, StreamEvent::DeviceFailed { .. })).await;
    assert!(matches!(
        failed,
        StreamEvent::DeviceFailed {
            error: DeviceError::NotFound,
            ..
        }
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!h.handle.stats().session_active);

    h.finish().await;
}

#[tokio::test(start_paused = true)]
async fn analysis_results_raise_suspicion() {
    let mut h = spawn_service(
        SyntheticCamera::new(),
        LoopbackConfig {
            analysis: Some(AnalysisResult {
                people_count: 1,
                behaviors: vec!["loitering".to_string()],
                behavior_detected: true,
            }),
            ..Default::default()
        },
    );
    h.handle.start().await.unwrap();

    let event = wait_for(&mut h.events, |e| matches!(e, StreamEvent::Analysis { .. })).await;
    match event {
        StreamEvent::Analysis { result, suspicion } => {
            assert!(result.behavior_detected);
            assert_eq!(suspicion, 5);
        }
        _ => unreachable!(),
    }

    h.finish().await;
}

#[tokio::test(start_paused = true)]
async fn processing_errors_release_pending_without_recovering() {
    let mut h = spawn_service(
        SyntheticCamera::new(),
        LoopbackConfig {
            fail_processing: true,
            ..Default::default()
        },
    );
    h.handle.start().await.unwrap();

    wait_for(&mut h.events, |e| matches!(e, StreamEvent::RemoteError { .. })).await;
    wait_for(&mut h.events, |e| matches!(e, StreamEvent::FailsafeEngaged { .. })).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stats = h.handle.stats();
    assert!(stats.invalid_results > 0);
    assert_eq!(stats.results_received, 0);
    assert_eq!(stats.failsafe, FailsafeState::Fallback);

    h.finish().await;
}
