use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::AppError;
use crate::models::{Accumulation, CitationRecord, WorkflowStep};
use crate::stream::events::ViewEvent;
use crate::stream::session::{ResponseOutcome, ResponseSnapshot};

/// Callbacks registered with a session at construction. Called synchronously
/// from the read loop, in frame order.
pub trait ViewObserver: Send {
    fn on_started(&mut self, _response_id: &str) {}

    fn on_view(&mut self, _response_id: &str, _view: &Accumulation) {}

    fn on_citation(&mut self, _response_id: &str, _record: &CitationRecord) {}

    fn on_workflow(&mut self, _response_id: &str, _steps: &[WorkflowStep]) {}

    fn on_error(&mut self, _response_id: &str, _error: &AppError) {}

    fn on_finished(&mut self, _snapshot: &ResponseSnapshot) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl ViewObserver for NoopObserver {}

/// Forwards every callback as a `ViewEvent` over a bounded channel.
///
/// The read loop never waits on the consumer. When the channel is full a
/// `View` event is dropped, since the next one carries the whole view. Every
/// other event is queued and delivered in order, and whatever is still queued
/// when the response finishes is handed to a drain task.
pub struct ChannelObserver {
    tx: mpsc::Sender<ViewEvent>,
    backlog: VecDeque<ViewEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<ViewEvent>) -> Self {
        Self {
            tx,
            backlog: VecDeque::new(),
        }
    }

    /// Pushes queued events until the channel fills up again. Returns false
    /// once the receiver is gone.
    fn flush(&mut self) -> bool {
        while let Some(event) = self.backlog.pop_front() {
            match self.tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.backlog.push_front(event);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    self.backlog.clear();
                    return false;
                }
            }
        }
        true
    }

    fn send_event(&mut self, event: ViewEvent) {
        if !self.flush() {
            log::debug!("view channel closed, dropping event");
            return;
        }
        let event = if self.backlog.is_empty() {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(event)) => event,
                Err(TrySendError::Closed(_)) => {
                    log::debug!("view channel closed, dropping event");
                    return;
                }
            }
        } else {
            event
        };

        if matches!(event, ViewEvent::View { .. }) {
            log::debug!("view channel full, skipping intermediate view");
        } else {
            self.backlog.push_back(event);
        }
    }

    /// Hands the remaining backlog to a task that waits for capacity.
    fn drain(&mut self) {
        if !self.flush() || self.backlog.is_empty() {
            return;
        }
        let pending: Vec<ViewEvent> = self.backlog.drain(..).collect();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let tx = self.tx.clone();
                handle.spawn(async move {
                    for event in pending {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                });
            }
            Err(_) => log::warn!("⚠️  {} view events lost: no runtime to deliver them", pending.len()),
        }
    }
}

impl ViewObserver for ChannelObserver {
    fn on_started(&mut self, response_id: &str) {
        self.send_event(ViewEvent::Started {
            response_id: response_id.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        });
    }

    fn on_view(&mut self, response_id: &str, view: &Accumulation) {
        self.send_event(ViewEvent::View {
            response_id: response_id.to_string(),
            view: view.clone(),
        });
    }

    fn on_citation(&mut self, response_id: &str, record: &CitationRecord) {
        self.send_event(ViewEvent::Citation {
            response_id: response_id.to_string(),
            record: record.clone(),
        });
    }

    fn on_workflow(&mut self, response_id: &str, steps: &[WorkflowStep]) {
        self.send_event(ViewEvent::Workflow {
            response_id: response_id.to_string(),
            steps: steps.to_vec(),
        });
    }

    fn on_error(&mut self, response_id: &str, error: &AppError) {
        self.send_event(ViewEvent::Error {
            response_id: response_id.to_string(),
            error: error.to_string(),
            recoverable: error.code.is_recoverable(),
            user_visible: error.code.is_user_visible(),
        });
    }

    fn on_finished(&mut self, snapshot: &ResponseSnapshot) {
        let event = match &snapshot.outcome {
            ResponseOutcome::Completed => ViewEvent::Completed {
                response_id: snapshot.response_id.clone(),
                timestamp: snapshot.completed_at.timestamp(),
            },
            ResponseOutcome::Cancelled => ViewEvent::Cancelled {
                response_id: snapshot.response_id.clone(),
                reason: "User cancelled".to_string(),
            },
            // Already reported through on_error
            ResponseOutcome::Failed { .. } => {
                self.drain();
                return;
            }
        };
        self.send_event(event);
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_forwards_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut observer = ChannelObserver::new(tx);
        observer.on_started("r1");
        observer.on_view("r1", &Accumulation::default());
        observer.on_error("r1", &AppError::transport("reset"));

        assert!(matches!(rx.try_recv(), Ok(ViewEvent::Started { .. })));
        assert!(matches!(rx.try_recv(), Ok(ViewEvent::View { .. })));
        match rx.try_recv() {
            Ok(ViewEvent::Error {
                recoverable,
                user_visible,
                ..
            }) => {
                assert!(recoverable);
                assert!(user_visible);
            }
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[test]
    fn test_full_channel_skips_views_but_queues_citations() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut observer = ChannelObserver::new(tx);
        observer.on_started("r1");
        observer.on_view("r1", &Accumulation::default());
        observer.on_citation(
            "r1",
            &CitationRecord::new(4, crate::models::CitationKind::Web, "T"),
        );
        observer.on_view("r1", &Accumulation::default());
        assert_eq!(observer.backlog.len(), 1);

        assert!(matches!(rx.try_recv(), Ok(ViewEvent::Started { .. })));
        observer.on_view("r1", &Accumulation::default());
        match rx.try_recv() {
            Ok(ViewEvent::Citation { record, .. }) => assert_eq!(record.id, 4),
            other => panic!("expected citation event, got {:?}", other),
        }
        assert!(observer.backlog.is_empty());
    }

    #[test]
    fn test_closed_channel_does_not_queue() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut observer = ChannelObserver::new(tx);
        observer.on_started("r1");
        observer.on_error("r1", &AppError::transport("reset"));
        assert!(observer.backlog.is_empty());
    }
}
