use crate::store::SessionId;
use crate::transport::StreamEvent;

/// Where a tab is in its session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TabPhase {
    #[default]
    Idle,
    /// A create-session request is outstanding.
    Acquiring,
    Streaming {
        session_id: SessionId,
        connected: bool,
    },
    Reconnecting {
        session_id: SessionId,
        attempt: u32,
        max_attempts: u32,
    },
    /// The PTY exited. Held until the user acts on the tab.
    Ended,
    /// Allocation or the stream failed for good. Held until the user acts on the tab.
    Fatal { message: String },
}

impl TabPhase {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            TabPhase::Streaming { session_id, .. } | TabPhase::Reconnecting { session_id, .. } => {
                Some(session_id)
            }
            _ => None,
        }
    }

    /// Held phases suppress automatic acquisition.
    pub fn is_held(&self) -> bool {
        matches!(self, TabPhase::Ended | TabPhase::Fatal { .. })
    }

    /// Phase after `event` arrives for this phase's session.
    ///
    /// Events are only routed here after their session id matched the live stream, so a
    /// phase without a session ignores everything.
    pub fn on_event(&self, event: &StreamEvent) -> TabPhase {
        let Some(session_id) = self.session_id() else {
            return self.clone();
        };
        match event {
            StreamEvent::Connected => TabPhase::Streaming {
                session_id: session_id.to_string(),
                connected: true,
            },
            StreamEvent::Reconnecting {
                attempt,
                max_attempts,
            } => TabPhase::Reconnecting {
                session_id: session_id.to_string(),
                attempt: *attempt,
                max_attempts: *max_attempts,
            },
            StreamEvent::Data(_) | StreamEvent::Error { fatal: false, .. } => self.clone(),
            StreamEvent::Exit { .. } => TabPhase::Ended,
            StreamEvent::Error {
                message,
                fatal: true,
            } => TabPhase::Fatal {
                message: message.clone(),
            },
        }
    }
}
