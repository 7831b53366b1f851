//! Engine events
//!
//! Non-fatal outcomes (incomplete cleanup, expired sessions) are not errors for the
//! request that triggered them, so they are published here instead.

use marketplace_core::{SessionId, SessionStatus};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// An artifact was stored and the session completed.
    Assembled {
        session_id: SessionId,
        artifact_url: String,
        size_bytes: u64,
    },
    /// Purging a session left payloads or metadata behind.
    CleanupIncomplete {
        session_id: SessionId,
        failures: Vec<String>,
    },
    /// The sweeper purged an abandoned or expired session.
    SessionExpired {
        session_id: SessionId,
        status: SessionStatus,
    },
}

/// Broadcast channel for [`UploadEvent`]s
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<UploadEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: UploadEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No subscribers for upload event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
