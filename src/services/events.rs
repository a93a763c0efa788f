//! Ordered progress events of one run.
//!
//! A run has at most one live subscriber. Dropping the subscription cancels
//! the run; a run without a subscriber publishes into the void.

use chrono::Utc;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::models::event::{EventKind, WorkflowEvent};

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Event subscriber disconnected")]
    SubscriberGone,
}

/// Publishing half, owned by the orchestrator of a single run.
#[derive(Debug)]
pub struct EventPublisher {
    request_id: Uuid,
    tx: Option<mpsc::Sender<WorkflowEvent>>,
    sequence: u64,
    cancel: CancellationToken,
}

/// Receiving half. Yields events in sequence order and cancels the run on drop.
#[derive(Debug)]
pub struct EventSubscription {
    events: ReceiverStream<WorkflowEvent>,
    _cancel_on_drop: DropGuard,
}

/// Create a publisher and its single subscription over a bounded channel.
pub fn channel(request_id: Uuid, capacity: usize) -> (EventPublisher, EventSubscription) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = CancellationToken::new();
    let subscription = EventSubscription {
        events: ReceiverStream::new(rx),
        _cancel_on_drop: cancel.clone().drop_guard(),
    };
    let publisher = EventPublisher {
        request_id,
        tx: Some(tx),
        sequence: 0,
        cancel,
    };
    (publisher, subscription)
}

impl EventPublisher {
    /// Publisher without a subscriber. Events are numbered and dropped.
    pub fn detached(request_id: Uuid) -> Self {
        Self {
            request_id,
            tx: None,
            sequence: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Token fired when the subscriber goes away.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of events published so far.
    pub fn published(&self) -> u64 {
        self.sequence
    }

    pub async fn publish(&mut self, kind: EventKind) -> Result<(), EventError> {
        self.sequence += 1;
        let event = WorkflowEvent {
            request_id: self.request_id,
            sequence: self.sequence,
            timestamp: Utc::now(),
            kind,
        };

        let Some(tx) = &self.tx else {
            return Ok(());
        };
        if tx.send(event).await.is_err() {
            tracing::debug!(request_id = %self.request_id, "Event subscriber gone, cancelling run");
            self.tx = None;
            self.cancel.cancel();
            return Err(EventError::SubscriberGone);
        }
        Ok(())
    }
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        self.events.next().await
    }
}

impl Stream for EventSubscription {
    type Item = WorkflowEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}
