//! Client wiring: builds the transport, camera and stream service from the
//! configuration, runs until stopped and logs what happens.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use safevision_core::{
    FrameTransport, LagLevel, LoopbackTransport, RecordingService, StreamController, StreamError,
    StreamEvent, StreamService, StreamStats, SyntheticCamera, TcpTransport, TransportEvent,
};

use crate::config::ClientConfig;
use crate::recording::HttpRecordingClient;

const STATS_INTERVAL: Duration = Duration::from_secs(1);
const RECORDING_STOP_GRACE: Duration = Duration::from_secs(5);

/// Command-line overrides for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Processor address overriding `network.processor_address`.
    pub processor: Option<String>,
    /// Stream to the in-process loopback processor instead of TCP.
    pub loopback: bool,
    /// Stop after this long; run until Ctrl-C otherwise.
    pub duration: Option<Duration>,
    /// Start recording once the session is up.
    pub record: bool,
}

/// Logs processing lag once per level change.
#[derive(Debug, Default)]
pub struct LagMonitor {
    level: Option<LagLevel>,
}

impl LagMonitor {
    /// Returns the new level when it differs from the last one seen.
    pub fn observe(&mut self, stats: &StreamStats) -> Option<LagLevel> {
        if stats.results_received == 0 {
            return None;
        }
        let level = stats.processing_lag();
        if self.level == Some(level) {
            return None;
        }
        self.level = Some(level);
        Some(level)
    }
}

pub async fn run(config: ClientConfig, options: RunOptions) -> Result<(), StreamError> {
    let controller =
        StreamController::new(config.to_stream_settings(), config.to_adaptation_config())?;

    let (transport, transport_events): (Arc<dyn FrameTransport>, mpsc::Receiver<TransportEvent>) =
        if options.loopback {
            info!(latency_ms = config.network.loopback_latency_ms, "using loopback processor");
            let (transport, events) = LoopbackTransport::spawn(config.to_loopback_config());
            (Arc::new(transport), events)
        } else {
            let tcp = config.to_tcp_config(options.processor.as_deref());
            info!(address = %tcp.address, "using TCP processor");
            let (transport, events) = TcpTransport::spawn(tcp);
            (Arc::new(transport), events)
        };

    let (mut service, handle) = StreamService::new(
        controller,
        Box::new(SyntheticCamera::new()),
        transport,
        transport_events,
    );

    let record = options.record || config.recording.enabled;
    if record {
        let recorder = HttpRecordingClient::new(
            &config.recording.base_url,
            Duration::from_millis(config.recording.request_timeout_ms),
        )?;
        info!(base_url = recorder.base_url(), "recording enabled");
        let recorder: Arc<dyn RecordingService> = Arc::new(recorder);
        service = service.with_recorder(recorder, config.recording.session_id.clone());
    }

    let mut events = handle.subscribe();
    let service_task = tokio::spawn(service.run());

    handle.start().await?;
    if record {
        handle.start_recording().await?;
    }

    let deadline = async {
        match options.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
    let mut lag = LagMonitor::default();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            _ = &mut deadline => {
                info!("run duration elapsed, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "event log lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = stats_tick.tick() => {
                let stats = handle.stats();
                log_stats(&stats);
                if let Some(level) = lag.observe(&stats) {
                    log_lag(level, &stats);
                }
            }
        }
    }

    if handle.stats().recording {
        handle.stop_recording().await?;
        let stopped = tokio::time::timeout(RECORDING_STOP_GRACE, async {
            loop {
                match events.recv().await {
                    Ok(StreamEvent::RecordingStopped(_)) | Ok(StreamEvent::RecordingFailed { .. }) => {
                        return;
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
        .await;
        if stopped.is_err() {
            warn!("recording service did not confirm stop");
        }
    }

    handle.shutdown().await?;
    if let Err(e) = service_task.await {
        error!(error = %e, "stream service task failed");
    }

    let stats = handle.stats();
    info!(
        sent = stats.frames_sent,
        processed = stats.results_received,
        dropped = stats.dropped,
        "session summary"
    );
    Ok(())
}

fn log_event(event: &StreamEvent) {
    match event {
        StreamEvent::SessionStarted { facing, resolution } => {
            info!(%facing, %resolution, "stream started")
        }
        StreamEvent::SessionStopped => info!("stream stopped"),
        StreamEvent::FacingSwitched(facing) => info!(%facing, "camera switched"),
        StreamEvent::SettingsRejected { message } => warn!(%message, "settings rejected"),
        StreamEvent::DeviceFailed { error, message } => error!(%error, "{message}"),
        StreamEvent::Connected => info!("connected to processor"),
        StreamEvent::Disconnected { reason } => warn!(%reason, "disconnected from processor"),
        StreamEvent::RateChanged { before, after } => {
            info!(before = %format!("{before:.1}"), after = %format!("{after:.1}"), "frame rate adjusted")
        }
        StreamEvent::StallWarning { pending } => {
            warn!(pending, "frame in flight without a result")
        }
        StreamEvent::FailsafeEngaged { silent_ms } => {
            warn!(silent_ms, "processor silent, showing local camera")
        }
        StreamEvent::FailsafeRecovered => info!("processor responding again"),
        StreamEvent::InFlightExpired { frames } => warn!(frames, "unanswered frames written off"),
        StreamEvent::InvalidResult { reason } => warn!(%reason, "invalid result"),
        StreamEvent::RemoteError { message } => warn!(%message, "processor error"),
        StreamEvent::Analysis { result, suspicion } => {
            if result.behavior_detected {
                warn!(
                    people = result.people_count,
                    behaviors = ?result.behaviors,
                    suspicion,
                    "suspicious behaviour detected"
                );
            }
        }
        StreamEvent::RecordingStarted(started) => {
            info!(filename = %started.filename, "recording started")
        }
        StreamEvent::RecordingStopped(summary) => info!(
            duration_seconds = summary.duration_seconds,
            frames = summary.frame_count,
            size_mb = summary.file_size_mb,
            "recording saved"
        ),
        StreamEvent::RecordingFailed { message } => warn!(%message, "recording request failed"),
        // per-frame traffic is logged by the core at debug/trace
        StreamEvent::FrameSent { .. }
        | StreamEvent::FrameDropped { .. }
        | StreamEvent::ResultReceived { .. } => {}
    }
}

fn log_stats(stats: &StreamStats) {
    tracing::debug!(
        rate = %format!("{:.1}", stats.current_rate),
        pending = stats.pending,
        dropped = stats.dropped,
        avg_ms = %format!("{:.0}", stats.avg_latency_ms),
        quality = %format!("{:.2}", stats.last_quality),
        failsafe = ?stats.failsafe,
        "stream stats"
    );
}

fn log_lag(level: LagLevel, stats: &StreamStats) {
    let rtt = format!("{:.0}", stats.smoothed_rtt_ms);
    match level {
        LagLevel::Normal => info!(rtt_ms = %rtt, "processing lag back to normal"),
        LagLevel::Warning => warn!(rtt_ms = %rtt, "processing lag high"),
        LagLevel::Critical => error!(rtt_ms = %rtt, "processing lag critical"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(rtt: f64, results: u64) -> StreamStats {
        StreamStats {
            smoothed_rtt_ms: rtt,
            results_received: results,
            ..Default::default()
        }
    }

    #[test]
    fn lag_monitor_reports_level_changes_once() {
        let mut lag = LagMonitor::default();
        assert_eq!(lag.observe(&stats(9_000.0, 0)), None);
        assert_eq!(lag.observe(&stats(200.0, 1)), Some(LagLevel::Normal));
        assert_eq!(lag.observe(&stats(300.0, 2)), None);
        assert_eq!(lag.observe(&stats(2_500.0, 3)), Some(LagLevel::Warning));
        assert_eq!(lag.observe(&stats(6_000.0, 4)), Some(LagLevel::Critical));
        assert_eq!(lag.observe(&stats(6_500.0, 5)), None);
        assert_eq!(lag.observe(&stats(100.0, 6)), Some(LagLevel::Normal));
    }

    #[tokio::test(start_paused = true)]
    async fn loopback_run_stops_after_duration() {
        let options = RunOptions {
            loopback: true,
            duration: Some(Duration::from_secs(3)),
            ..Default::default()
        };
        run(ClientConfig::default(), options).await.unwrap();
    }
}
