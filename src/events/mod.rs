//! In-process event stream.
//!
//! Services publish lifecycle events onto a bounded channel; a single
//! listener task consumes them for structured audit logging. Publishing is
//! best-effort: a full or closed channel is logged and never fails the
//! operation that produced the event.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::models::{ChargeStatus, RefundStatus};

#[derive(Debug, Clone)]
pub enum Event {
    ChargeStatusChanged {
        external_id: String,
        from: ChargeStatus,
        to: ChargeStatus,
        at: DateTime<Utc>,
    },
    RefundStatusChanged {
        external_id: String,
        charge_external_id: String,
        status: RefundStatus,
        at: DateTime<Utc>,
    },
    CaptureSweepCompleted {
        submitted: usize,
        retried: usize,
        abandoned: usize,
        at: DateTime<Utc>,
    },
}

pub type EventSender = mpsc::Sender<Event>;

pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    mpsc::channel(capacity.max(1))
}

/// Fire-and-forget publish.
pub fn publish(sender: &EventSender, event: Event) {
    if let Err(err) = sender.try_send(event) {
        warn!(error = %err, "event channel rejected event");
    }
}

/// Consumes events until every sender is dropped.
pub async fn run_event_listener(mut receiver: mpsc::Receiver<Event>) {
    info!("event listener started");
    while let Some(event) = receiver.recv().await {
        match event {
            Event::ChargeStatusChanged {
                external_id,
                from,
                to,
                at,
            } => {
                info!(charge = %external_id, %from, %to, %at, "charge status changed");
            }
            Event::RefundStatusChanged {
                external_id,
                charge_external_id,
                status,
                at,
            } => {
                info!(
                    refund = %external_id,
                    charge = %charge_external_id,
                    %status,
                    %at,
                    "refund status changed"
                );
            }
            Event::CaptureSweepCompleted {
                submitted,
                retried,
                abandoned,
                at,
            } => {
                if abandoned > 0 {
                    error!(submitted, retried, abandoned, %at, "capture sweep abandoned charges");
                } else {
                    info!(submitted, retried, abandoned, %at, "capture sweep completed");
                }
            }
        }
    }
    info!("event listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_best_effort_on_a_full_channel() {
        let (sender, mut receiver) = event_channel(1);
        let event = Event::CaptureSweepCompleted {
            submitted: 1,
            retried: 0,
            abandoned: 0,
            at: Utc::now(),
        };
        publish(&sender, event.clone());
        // Channel is full now; the second publish must not panic or block.
        publish(&sender, event);
        assert!(receiver.recv().await.is_some());
    }
}
