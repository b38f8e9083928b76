//! Connection lifecycle of a transport link.
//!
//! ```text
//!  Disconnected ──► Connecting ──► Connected
//!       ▲    │           │             │
//!       │    ▼           ▼             │
//!       │  Failed   (attempt failed)   │
//!       └────────────────┴─────────────┘
//! ```
//!
//! Transitions return `Result` instead of panicking so a supervisor bug
//! shows up as a logged error rather than a crash.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::StreamError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No link. Initial state and the state between attempts.
    #[default]
    Disconnected,

    /// Dialing the processor. `attempt` counts consecutive failures + 1.
    Connecting { attempt: u32 },

    /// Link established.
    Connected { since: Instant },

    /// Reconnect budget exhausted. Terminal.
    Failed,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting { attempt } => write!(f, "Connecting (attempt {attempt})"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl ConnectionPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn connected_duration(&self) -> Option<Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self, attempt: u32) -> Result<(), StreamError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting { attempt };
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot connect: not in Disconnected state",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting { .. } => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// A dial attempt failed or an established link dropped.
    ///
    /// Valid from: `Connecting`, `Connected`.
    pub fn connection_lost(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting { .. } | Self::Connected { .. } => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot lose connection: not connecting or connected",
            )),
        }
    }

    /// Valid from: `Disconnected`.
    pub fn give_up(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Disconnected => {
                *self = Self::Failed;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot give up: not in Disconnected state",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_lose_reconnect() {
        let mut phase = ConnectionPhase::default();
        phase.begin_connect(1).unwrap();
        assert_eq!(phase, ConnectionPhase::Connecting { attempt: 1 });

        phase.complete_connect().unwrap();
        assert!(phase.is_connected());
        assert!(phase.connected_duration().is_some());

        phase.connection_lost().unwrap();
        assert_eq!(phase, ConnectionPhase::Disconnected);

        phase.begin_connect(1).unwrap();
        phase.complete_connect().unwrap();
        assert!(phase.is_connected());
    }

    #[test]
    fn failed_attempts_then_give_up() {
        let mut phase = ConnectionPhase::Disconnected;
        for attempt in 1..=3 {
            phase.begin_connect(attempt).unwrap();
            phase.connection_lost().unwrap();
        }
        phase.give_up().unwrap();
        assert!(phase.is_failed());
        assert!(phase.begin_connect(4).is_err());
    }

    #[test]
    fn invalid_transitions_are_errors() {
        let mut phase = ConnectionPhase::Disconnected;
        assert!(phase.complete_connect().is_err());
        assert!(phase.connection_lost().is_err());

        phase.begin_connect(1).unwrap();
        assert!(phase.begin_connect(2).is_err());
        assert!(phase.give_up().is_err());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionPhase::Disconnected.to_string(), "Disconnected");
        assert_eq!(
            ConnectionPhase::Connecting { attempt: 2 }.to_string(),
            "Connecting (attempt 2)"
        );
        assert_eq!(ConnectionPhase::Failed.to_string(), "Failed");
    }
}
