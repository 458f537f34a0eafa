//! Events a discovery run reports, and the sinks that receive them.

use super::CancellationFlag;
use crate::registry::ServiceDescriptor;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    ServiceFound { service: ServiceDescriptor },
    StatusMessage { message: String },
    Progress { percent: u8 },
}

impl DiscoveryEvent {
    pub fn status(message: impl Into<String>) -> Self {
        DiscoveryEvent::StatusMessage {
            message: message.into(),
        }
    }

    pub fn progress(percent: u8) -> Self {
        DiscoveryEvent::Progress {
            percent: percent.min(100),
        }
    }
}

/// Final status line of a completed run.
pub fn found_summary(found: usize) -> String {
    if found == 1 {
        "Found 1 service.".to_string()
    } else {
        format!("Found {} services.", found)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    #[error("event receiver dropped")]
    Disconnected,

    #[error("cancelled while waiting to deliver an event")]
    Cancelled,
}

/// Receives events from the engine. An error ends the run.
pub trait EventSink {
    fn emit(&mut self, event: DiscoveryEvent) -> Result<(), EmitError>;
}

impl EventSink for Vec<DiscoveryEvent> {
    fn emit(&mut self, event: DiscoveryEvent) -> Result<(), EmitError> {
        self.push(event);
        Ok(())
    }
}

const DEFAULT_BACKOFF: Duration = Duration::from_millis(5);

/// Hands events to a bounded channel from a worker thread. While the channel
/// is full the sink sleeps briefly and re-checks the cancellation flag, so it
/// never blocks a cancelled run.
pub struct ChannelSink {
    tx: Sender<DiscoveryEvent>,
    cancel: CancellationFlag,
    backoff: Duration,
}

impl ChannelSink {
    pub fn new(tx: Sender<DiscoveryEvent>, cancel: CancellationFlag) -> Self {
        Self {
            tx,
            cancel,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

impl EventSink for ChannelSink {
    fn emit(&mut self, event: DiscoveryEvent) -> Result<(), EmitError> {
        let mut pending = event;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Err(EmitError::Disconnected),
                Err(TrySendError::Full(returned)) => {
                    if self.cancel.is_cancelled() {
                        return Err(EmitError::Cancelled);
                    }
                    pending = returned;
                    std::thread::sleep(self.backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    #[test]
    fn test_summary_wording() {
        assert_eq!(found_summary(0), "Found 0 services.");
        assert_eq!(found_summary(1), "Found 1 service.");
        assert_eq!(found_summary(7), "Found 7 services.");
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(DiscoveryEvent::progress(40)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "progress", "percent": 40}));
        let json = serde_json::to_value(DiscoveryEvent::status("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "status_message", "message": "hi"}));
    }

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = ChannelSink::new(tx, CancellationFlag::new());
        sink.emit(DiscoveryEvent::progress(1)).unwrap();
        sink.emit(DiscoveryEvent::progress(2)).unwrap();
        assert_eq!(rx.blocking_recv(), Some(DiscoveryEvent::progress(1)));
        assert_eq!(rx.blocking_recv(), Some(DiscoveryEvent::progress(2)));
    }

    #[test]
    fn test_full_channel_yields_to_cancellation() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationFlag::new();
        let mut sink = ChannelSink::new(tx, cancel.clone());
        sink.emit(DiscoveryEvent::progress(1)).unwrap();
        cancel.cancel();
        assert_eq!(sink.emit(DiscoveryEvent::progress(2)), Err(EmitError::Cancelled));
    }

    #[test]
    fn test_dropped_receiver_disconnects() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = ChannelSink::new(tx, CancellationFlag::new());
        assert_eq!(sink.emit(DiscoveryEvent::progress(1)), Err(EmitError::Disconnected));
    }
}
