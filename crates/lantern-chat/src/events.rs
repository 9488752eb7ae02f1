use lantern_core::types::{MessageId, ModelStatus};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Notifications pushed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A failure the user should see
    Alert { title: String, message: String },
    ModelStatusChanged { status: ModelStatus },
    DownloadProgress { percentage: f64 },
    /// The text of a message changed during streaming
    MessageUpdated { message_id: MessageId, text: String },
    /// The newest message should be brought into view
    ScrollToBottom,
}

/// Optional event channel shared by the session components.
///
/// Sends never block and are dropped when nobody listens.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("session event dropped: receiver closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_closed_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        sink.emit(SessionEvent::ScrollToBottom);
        assert_eq!(rx.recv().await, Some(SessionEvent::ScrollToBottom));

        drop(rx);
        sink.emit(SessionEvent::ScrollToBottom);
        EventSink::disabled().emit(SessionEvent::ScrollToBottom);
    }

    #[test]
    fn test_event_json() {
        let json = serde_json::to_value(SessionEvent::ModelStatusChanged {
            status: ModelStatus::Ready,
        })
        .unwrap();
        assert_eq!(json["type"], "model_status_changed");
        assert_eq!(json["status"], "ready");
    }
}
