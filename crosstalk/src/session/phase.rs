//! Session protocol phase state machine.

/// Protocol phase of one session.
///
/// Transitions:
/// - Uninitialized → Initializing (the `initialize` exchange begins)
/// - Initializing → Ready (`notifications/initialized` observed)
/// - any non-terminal → Closing (transport loss or local close)
/// - Closing → Closed (pending work settled)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Transport connected; no handshake traffic yet.
    Uninitialized,
    /// `initialize` exchanged; waiting for `notifications/initialized`.
    Initializing,
    /// Fully operational.
    Ready,
    /// Shutting down: failing pending requests, cancelling active tasks.
    Closing,
    /// Fully shut down. Terminal.
    Closed,
}

impl SessionPhase {
    /// Returns true for phases past which no frame is processed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns true once the handshake has begun, the earliest point at
    /// which `ping` is served.
    #[must_use]
    pub fn handshake_started(&self) -> bool {
        matches!(self, Self::Initializing | Self::Ready)
    }

    /// Checks whether a transition from this phase to another is valid.
    #[must_use]
    pub fn can_transition_to(&self, to: SessionPhase) -> bool {
        matches!(
            (self, to),
            (SessionPhase::Uninitialized, SessionPhase::Initializing)
                | (SessionPhase::Initializing, SessionPhase::Ready)
                | (SessionPhase::Uninitialized, SessionPhase::Closing)
                | (SessionPhase::Initializing, SessionPhase::Closing)
                | (SessionPhase::Ready, SessionPhase::Closing)
                | (SessionPhase::Closing, SessionPhase::Closed)
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
