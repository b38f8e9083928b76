//! Recording collaborator.
//!
//! The stream client does not record anything itself. It asks a recording
//! service to start and stop, and keeps a local flag that only changes when
//! the service confirms.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecordingError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingStarted {
    pub filename: String,
    #[serde(default)]
    pub filepath: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub duration_seconds: f64,
    pub frame_count: u64,
    pub file_size_mb: f64,
    #[serde(default)]
    pub filename: Option<String>,
}

#[async_trait]
pub trait RecordingService: Send + Sync {
    async fn start_recording(&self, session_id: &str) -> Result<RecordingStarted, RecordingError>;
    async fn stop_recording(&self, session_id: &str) -> Result<RecordingSummary, RecordingError>;
}

/// The client's view of recording. Only confirmed replies move it out of
/// `Starting` / `Stopping`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RecordingState {
    #[default]
    Idle,
    Starting,
    Recording { filename: String },
    Stopping { filename: String },
}

impl RecordingState {
    /// The local recording flag.
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording { .. } | Self::Stopping { .. })
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping { .. })
    }
}

/// `{"success": true, "filename": ...}` or `{"error": ...}`.
pub fn parse_start_reply(body: &str) -> Result<RecordingStarted, RecordingError> {
    let value = check_success(body)?;
    Ok(serde_json::from_value(value)?)
}

/// `{"success": true, "recording_info": {...}}`; the summary fields may also
/// sit at the top level.
pub fn parse_stop_reply(body: &str) -> Result<RecordingSummary, RecordingError> {
    let mut value = check_success(body)?;
    let info = match value.get_mut("recording_info").map(Value::take) {
        Some(info) => info,
        None => value,
    };
    Ok(serde_json::from_value(info)?)
}

fn check_success(body: &str) -> Result<Value, RecordingError> {
    let value: Value = serde_json::from_str(body)?;
    if let Some(err) = value.get("error") {
        let message = err.as_str().map_or_else(|| err.to_string(), str::to_string);
        return Err(RecordingError::Rejected(message));
    }
    if value.get("success").and_then(Value::as_bool) != Some(true) {
        return Err(RecordingError::InvalidResponse(
            "reply is missing \"success\": true".to_string(),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_reply() {
        let started = parse_start_reply(
            r#"{"success": true, "filename": "rec_20240101.mp4", "filepath": "/data/rec_20240101.mp4"}"#,
        )
        .unwrap();
        assert_eq!(started.filename, "rec_20240101.mp4");
        assert_eq!(started.filepath.as_deref(), Some("/data/rec_20240101.mp4"));
    }

    #[test]
    fn error_body_is_rejected() {
        let err = parse_start_reply(r#"{"error": "Recording already in progress"}"#).unwrap_err();
        assert_eq!(
            err,
            RecordingError::Rejected("Recording already in progress".to_string())
        );
    }

    #[test]
    fn parses_nested_stop_reply() {
        let summary = parse_stop_reply(
            r#"{"success": true, "recording_info": {"filename": "a.mp4", "duration_seconds": 12.5, "frame_count": 125, "file_size_mb": 3.2}}"#,
        )
        .unwrap();
        assert_eq!(summary.frame_count, 125);
        assert_eq!(summary.filename.as_deref(), Some("a.mp4"));
    }

    #[test]
    fn parses_flat_stop_reply() {
        let summary = parse_stop_reply(
            r#"{"success": true, "duration_seconds": 1.0, "frame_count": 10, "file_size_mb": 0.1}"#,
        )
        .unwrap();
        assert_eq!(summary.duration_seconds, 1.0);
    }

    #[test]
    fn missing_success_is_invalid() {
        assert!(matches!(
            parse_stop_reply(r#"{"frame_count": 1}"#),
            Err(RecordingError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_start_reply("not json"),
            Err(RecordingError::InvalidResponse(_))
        ));
    }

    #[test]
    fn flag_reflects_confirmed_state() {
        assert!(!RecordingState::Starting.is_recording());
        assert!(RecordingState::Recording { filename: "x".into() }.is_recording());
        assert!(RecordingState::Stopping { filename: "x".into() }.is_busy());
    }
}
