use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tracing::{error, info, warn};

use crate::config::CaptureProcessConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::{self, Event, EventSender};
use crate::metrics::ConnectorMetrics;
use crate::models::ChargeStatus;
use crate::repositories::charge_repository;
use crate::services::capture::CaptureService;
use crate::services::card::OperationOutcome;

/// Outcome tally of one capture sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSweepSummary {
    pub eligible: u64,
    pub submitted: usize,
    pub retried: usize,
    /// Charges moved to CAPTURE_ERROR after exhausting their retries.
    pub abandoned: usize,
    pub skipped: usize,
    /// Attempts still running when the sweep stopped waiting for them.
    pub in_flight: usize,
}

/// Periodic batch job pushing approved charges through capture. Each run is
/// idempotent: a charge is picked up again only when a previous attempt
/// parked it in CAPTURE_APPROVED_RETRY and its backoff has elapsed.
pub struct CaptureProcess {
    db: Arc<DbPool>,
    capture: CaptureService,
    events: EventSender,
    metrics: Arc<ConnectorMetrics>,
    config: CaptureProcessConfig,
}

impl CaptureProcess {
    pub fn new(
        db: Arc<DbPool>,
        capture: CaptureService,
        events: EventSender,
        metrics: Arc<ConnectorMetrics>,
        config: CaptureProcessConfig,
    ) -> Self {
        Self {
            db,
            capture,
            events,
            metrics,
            config,
        }
    }

    /// Charges awaiting capture, including retries still inside backoff.
    pub async fn queue_size(&self) -> Result<u64, ServiceError> {
        charge_repository::count_eligible_for_capture(self.db.as_ref()).await
    }

    /// One sweep: select a bounded oldest-first batch and attempt each
    /// charge. Per-charge failures are logged and never abort the rest of
    /// the batch.
    pub async fn run_capture(&self) -> Result<CaptureSweepSummary, ServiceError> {
        let started = Instant::now();
        let mut summary = CaptureSweepSummary::default();

        summary.eligible = self.queue_size().await?;
        self.metrics.set_capture_queue_size(summary.eligible);

        let backoff = Duration::seconds(self.config.retry_backoff_secs as i64);
        let batch = charge_repository::find_batch_eligible_for_capture(
            self.db.as_ref(),
            self.config.batch_size,
            backoff,
        )
        .await?;
        info!(
            eligible = summary.eligible,
            batch = batch.len(),
            "capture sweep starting"
        );

        for charge in batch {
            let attempts =
                match charge_repository::count_capture_retries(self.db.as_ref(), charge.id).await {
                    Ok(attempts) => attempts,
                    Err(err) => {
                        error!(charge = %charge.external_id, error = %err, "retry count lookup failed");
                        summary.skipped += 1;
                        continue;
                    }
                };

            if attempts >= self.config.maximum_retries {
                warn!(
                    charge = %charge.external_id,
                    attempts,
                    "capture retries exhausted, abandoning charge"
                );
                match self.capture.mark_capture_error(&charge).await {
                    Ok(_) => summary.abandoned += 1,
                    Err(err) => {
                        error!(charge = %charge.external_id, error = %err, "could not mark capture error");
                        summary.skipped += 1;
                    }
                }
                continue;
            }

            match self.capture.do_capture(&charge.external_id).await {
                // The attempt outran the wait; it finishes in the background
                // and the charge must not be counted as a retry.
                Ok(OperationOutcome::InProgress(_)) => {
                    info!(charge = %charge.external_id, "capture still running, left in flight");
                    summary.in_flight += 1;
                }
                Ok(OperationOutcome::Completed(updated)) => match updated.charge_status() {
                    Ok(ChargeStatus::CaptureSubmitted) => summary.submitted += 1,
                    Ok(_) => summary.retried += 1,
                    Err(err) => {
                        error!(charge = %charge.external_id, error = %err, "capture outcome unreadable");
                        summary.skipped += 1;
                    }
                },
                // A concurrent operation won the charge; the next sweep
                // re-evaluates it.
                Err(
                    err @ (ServiceError::Conflict(_)
                    | ServiceError::OperationAlreadyInProgress(_)
                    | ServiceError::IllegalState { .. }),
                ) => {
                    info!(charge = %charge.external_id, error = %err, "charge contended, skipping");
                    summary.skipped += 1;
                }
                Err(err) => {
                    error!(charge = %charge.external_id, error = %err, "capture attempt failed");
                    summary.skipped += 1;
                }
            }
        }

        self.metrics.record_capture_sweep(started.elapsed());
        events::publish(
            &self.events,
            Event::CaptureSweepCompleted {
                submitted: summary.submitted,
                retried: summary.retried,
                abandoned: summary.abandoned,
                at: Utc::now(),
            },
        );
        info!(
            submitted = summary.submitted,
            retried = summary.retried,
            abandoned = summary.abandoned,
            skipped = summary.skipped,
            in_flight = summary.in_flight,
            "capture sweep finished"
        );
        Ok(summary)
    }

    /// Runs sweeps forever on the configured interval. Spawned once from the
    /// process entry point.
    pub async fn run_scheduler(self: Arc<Self>) {
        let period = std::time::Duration::from_secs(self.config.scheduler_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_capture().await {
                error!(error = %err, "capture sweep failed");
            }
        }
    }
}
