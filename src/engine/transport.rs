//! Transport State Machine
//!
//! Tracks which path (capture or render) is current and what state it is
//! in. There is a single transition entry point taking the target
//! `(mode, state)` pair; it reports whether anything changed so the caller
//! can publish a notification.

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

pub use crate::engine::device::StreamState as TransportState;

/// Which logical path the transport drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportMode {
    /// Capture from the input device
    #[default]
    Input,
    /// Render to the output device
    Output,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Input => write!(f, "Input"),
            TransportMode::Output => write!(f, "Output"),
        }
    }
}

/// Current mode and state of the engine's transport
///
/// Only one mode can be streaming at a time, so a single pair is enough to
/// describe both paths: the mode that is not current is always stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transport {
    mode: TransportMode,
    state: TransportState,
}

impl Transport {
    /// A stopped transport in input mode
    ///
    /// # Example
    /// ```
    /// use pcmscope::engine::{Transport, TransportMode, TransportState};
    /// let transport = Transport::new();
    /// assert_eq!(transport.mode(), TransportMode::Input);
    /// assert_eq!(transport.state(), TransportState::Stopped);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `(mode, state)`
    ///
    /// Returns true when either component changed.
    ///
    /// # Example
    /// ```
    /// use pcmscope::engine::{Transport, TransportMode, TransportState};
    /// let mut transport = Transport::new();
    /// assert!(transport.transition(TransportMode::Output, TransportState::Active));
    /// assert!(!transport.transition(TransportMode::Output, TransportState::Active));
    /// ```
    pub fn transition(&mut self, mode: TransportMode, state: TransportState) -> bool {
        let changed = self.mode != mode || self.state != state;
        if changed {
            debug!(
                "[TRANSPORT] {}/{} -> {}/{}",
                self.mode, self.state, mode, state
            );
        }
        self.mode = mode;
        self.state = state;
        changed
    }

    /// Current mode
    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Current state
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Streaming, whether or not data is flowing right now
    pub fn is_active(&self) -> bool {
        matches!(self.state, TransportState::Active | TransportState::Idle)
    }

    /// Paused in the given mode
    pub fn is_suspended_in(&self, mode: TransportMode) -> bool {
        self.mode == mode && self.state == TransportState::Suspended
    }

    /// Whether `mode` is the one currently streaming
    pub fn is_streaming(&self, mode: TransportMode) -> bool {
        self.mode == mode && self.is_active()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_stopped_input() {
        let transport = Transport::default();
        assert_eq!(transport.mode(), TransportMode::Input);
        assert_eq!(transport.state(), TransportState::Stopped);
        assert!(!transport.is_active());
    }

    #[test]
    fn test_transition_reports_change() {
        let mut transport = Transport::new();
        assert!(transport.transition(TransportMode::Input, TransportState::Active));
        assert!(!transport.transition(TransportMode::Input, TransportState::Active));
        assert!(transport.transition(TransportMode::Output, TransportState::Active));
        assert!(transport.transition(TransportMode::Output, TransportState::Idle));
    }

    #[test]
    fn test_idle_counts_as_active() {
        let mut transport = Transport::new();
        transport.transition(TransportMode::Output, TransportState::Idle);
        assert!(transport.is_active());
        assert!(transport.is_streaming(TransportMode::Output));
        assert!(!transport.is_streaming(TransportMode::Input));
    }

    #[test]
    fn test_suspended_in_mode() {
        let mut transport = Transport::new();
        transport.transition(TransportMode::Input, TransportState::Suspended);
        assert!(transport.is_suspended_in(TransportMode::Input));
        assert!(!transport.is_suspended_in(TransportMode::Output));
        assert!(!transport.is_active());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(format!("{}", TransportMode::Input), "Input");
        assert_eq!(format!("{}", TransportMode::Output), "Output");
        assert_eq!(format!("{}", TransportState::Suspended), "Suspended");
    }
}
