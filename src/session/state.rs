use std::fmt;

/// Protocol state of one session.
///
/// `Rebalancing` is transient: it is entered and left within a single step
/// while a new assignment is applied, so callers only ever observe it from
/// logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Rebalancing,
    Closing,
    Closed,
}

impl SessionState {
    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionState::Streaming | SessionState::Rebalancing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "CONNECTING",
            SessionState::Streaming => "STREAMING",
            SessionState::Rebalancing => "REBALANCING",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
