mod common;

use assert_matches::assert_matches;

use payment_connector::errors::ServiceError;
use payment_connector::models::ChargeStatus;
use payment_connector::repositories::charge_repository::{self, ChargeUpdate};
use payment_connector::services::{CancelType, OperationOutcome};

use common::{card_with_number, spawn_app, valid_card, SANDBOX_DECLINED_CARD, SANDBOX_ERROR_CARD};

#[tokio::test]
async fn charge_walks_the_full_capture_path() {
    let app = spawn_app().await;
    let created = app.create_charge(500, app.sandbox_account).await;
    assert_eq!(created.charge_status().unwrap(), ChargeStatus::Created);

    app.state
        .charges
        .begin_card_details(&created.external_id)
        .await
        .unwrap();

    let outcome = app
        .state
        .authorise
        .authorise(&created.external_id, valid_card())
        .await
        .unwrap();
    let authorised = assert_matches!(outcome, OperationOutcome::Completed(c) => c);
    assert_eq!(authorised.charge_status().unwrap(), ChargeStatus::AuthorisationSuccess);
    assert!(authorised.gateway_transaction_id.is_some());
    assert_eq!(authorised.last_digits_card_number.as_deref(), Some("4242"));
    assert_eq!(authorised.amount, 500);

    app.state
        .capture
        .mark_capture_approved(&created.external_id)
        .await
        .unwrap();

    let summary = app.state.capture_process().run_capture().await.unwrap();
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.abandoned, 0);

    let submitted = app.reload(&created.external_id).await;
    assert_eq!(submitted.charge_status().unwrap(), ChargeStatus::CaptureSubmitted);

    let statuses = app.charge_event_statuses(&created.external_id).await;
    assert_eq!(
        statuses,
        vec![
            "CREATED",
            "ENTERING_CARD_DETAILS",
            "AUTHORISATION_READY",
            "AUTHORISATION_SUCCESS",
            "CAPTURE_APPROVED",
            "CAPTURE_READY",
            "CAPTURE_SUBMITTED",
        ]
    );
}

#[tokio::test]
async fn reannounced_card_details_step_records_a_single_event() {
    let app = spawn_app().await;
    let created = app.create_charge(500, app.sandbox_account).await;

    for _ in 0..2 {
        app.state
            .charges
            .begin_card_details(&created.external_id)
            .await
            .unwrap();
    }

    // One event per transition: creation and the single real move.
    let statuses = app.charge_event_statuses(&created.external_id).await;
    assert_eq!(statuses, vec!["CREATED", "ENTERING_CARD_DETAILS"]);
}

#[tokio::test]
async fn authorise_requires_the_card_details_step() {
    let app = spawn_app().await;
    let created = app.create_charge(500, app.sandbox_account).await;

    let err = app
        .state
        .authorise
        .authorise(&created.external_id, valid_card())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::IllegalState { status, .. } => {
        assert_eq!(status, ChargeStatus::Created);
    });
}

#[tokio::test]
async fn reentrant_authorise_is_reported_as_in_progress() {
    let app = spawn_app().await;
    let created = app.create_charge(500, app.sandbox_account).await;
    app.state
        .charges
        .begin_card_details(&created.external_id)
        .await
        .unwrap();

    // A competing request has already reserved the charge.
    let charge = app.reload(&created.external_id).await;
    charge_repository::update_status_with_optimistic_check(
        app.state.db.as_ref(),
        &charge,
        ChargeStatus::AuthorisationReady,
        ChargeUpdate::default(),
    )
    .await
    .unwrap();

    let err = app
        .state
        .authorise
        .authorise(&created.external_id, valid_card())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::OperationAlreadyInProgress(_));
}

#[tokio::test]
async fn declined_card_ends_rejected_with_card_snapshot() {
    let app = spawn_app().await;
    let created = app.create_charge(500, app.sandbox_account).await;
    app.state
        .charges
        .begin_card_details(&created.external_id)
        .await
        .unwrap();

    let outcome = app
        .state
        .authorise
        .authorise(&created.external_id, card_with_number(SANDBOX_DECLINED_CARD))
        .await
        .unwrap();
    let rejected = assert_matches!(outcome, OperationOutcome::Completed(c) => c);
    assert_eq!(rejected.charge_status().unwrap(), ChargeStatus::AuthorisationRejected);
    assert_eq!(rejected.last_digits_card_number.as_deref(), Some("0002"));
}

#[tokio::test]
async fn gateway_error_card_ends_in_authorisation_error() {
    let app = spawn_app().await;
    let created = app.create_charge(500, app.sandbox_account).await;
    app.state
        .charges
        .begin_card_details(&created.external_id)
        .await
        .unwrap();

    let outcome = app
        .state
        .authorise
        .authorise(&created.external_id, card_with_number(SANDBOX_ERROR_CARD))
        .await
        .unwrap();
    let errored = assert_matches!(outcome, OperationOutcome::Completed(c) => c);
    assert_eq!(errored.charge_status().unwrap(), ChargeStatus::AuthorisationError);
}

#[tokio::test]
async fn maestro_without_3ds_account_aborts_before_the_gateway() {
    let app = spawn_app().await;
    let created = app.create_charge(500, app.sandbox_account).await;
    app.state
        .charges
        .begin_card_details(&created.external_id)
        .await
        .unwrap();

    let mut card = valid_card();
    card.card_brand = "maestro".to_string();
    let outcome = app
        .state
        .authorise
        .authorise(&created.external_id, card)
        .await
        .unwrap();
    let aborted = assert_matches!(outcome, OperationOutcome::Completed(c) => c);
    assert_eq!(aborted.charge_status().unwrap(), ChargeStatus::AuthorisationAborted);
    // Never reserved and never reached the gateway.
    assert!(aborted.gateway_transaction_id.is_none());
}

#[tokio::test]
async fn user_cancel_before_authorisation_is_local() {
    let app = spawn_app().await;
    let created = app.create_charge(500, app.sandbox_account).await;

    let outcome = app
        .state
        .cancel
        .cancel(&created.external_id, CancelType::User)
        .await
        .unwrap();
    let cancelled = assert_matches!(outcome, OperationOutcome::Completed(c) => c);
    assert_eq!(cancelled.charge_status().unwrap(), ChargeStatus::UserCancelled);

    let statuses = app.charge_event_statuses(&created.external_id).await;
    assert_eq!(statuses, vec!["CREATED", "USER_CANCELLED"]);
}

#[tokio::test]
async fn system_cancel_of_authorised_charge_goes_through_the_gateway() {
    let app = spawn_app().await;
    let authorised = app.authorised_charge(500).await;

    let outcome = app
        .state
        .cancel
        .cancel(&authorised.external_id, CancelType::System)
        .await
        .unwrap();
    let cancelled = assert_matches!(outcome, OperationOutcome::Completed(c) => c);
    // Sandbox cancels settle instantly.
    assert_eq!(cancelled.charge_status().unwrap(), ChargeStatus::SystemCancelled);
}

#[tokio::test]
async fn cancel_after_capture_is_rejected() {
    let app = spawn_app().await;
    let captured = app.captured_charge(500).await;

    let err = app
        .state
        .cancel
        .cancel(&captured.external_id, CancelType::User)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::IllegalState { .. });
}

#[tokio::test]
async fn out_of_band_status_token_surfaces_as_an_error() {
    use sea_orm::{ActiveModelTrait, ActiveValue, Set};

    let app = spawn_app().await;
    let created = app.create_charge(500, app.sandbox_account).await;

    // Simulate a row mangled outside the crate.
    let model = payment_connector::entities::charge::ActiveModel {
        id: ActiveValue::Unchanged(created.id),
        status: Set("NOT_A_STATUS".to_string()),
        ..Default::default()
    };
    model.update(app.state.db.as_ref()).await.unwrap();

    let current = app.reload(&created.external_id).await;
    assert_matches!(
        current.charge_status().unwrap_err(),
        ServiceError::InternalError(_)
    );
}

#[tokio::test]
async fn stale_writer_loses_the_version_race() {
    let app = spawn_app().await;
    let created = app.create_charge(500, app.sandbox_account).await;

    let snapshot_a = app.reload(&created.external_id).await;
    let snapshot_b = snapshot_a.clone();

    charge_repository::update_status_with_optimistic_check(
        app.state.db.as_ref(),
        &snapshot_a,
        ChargeStatus::EnteringCardDetails,
        ChargeUpdate::default(),
    )
    .await
    .unwrap();

    let err = charge_repository::update_status_with_optimistic_check(
        app.state.db.as_ref(),
        &snapshot_b,
        ChargeStatus::UserCancelled,
        ChargeUpdate::default(),
    )
    .await
    .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let current = app.reload(&created.external_id).await;
    assert_eq!(current.charge_status().unwrap(), ChargeStatus::EnteringCardDetails);
    assert_eq!(current.version, snapshot_a.version + 1);
}

#[tokio::test]
async fn capture_retries_exhaust_into_capture_error() {
    let app = spawn_app().await;
    let authorised = app.authorised_charge(500).await;

    // Park the charge in the retry state with one failed attempt on record.
    let charge = app
        .force_status_path(
            &authorised.external_id,
            &[
                ChargeStatus::CaptureApproved,
                ChargeStatus::CaptureReady,
                ChargeStatus::CaptureApprovedRetry,
            ],
            None,
        )
        .await;
    app.backdate_updated_at(&charge, 60).await;

    let mut process_config = app.state.config.capture.clone();
    process_config.maximum_retries = 1;
    let process = payment_connector::services::CaptureProcess::new(
        app.state.db.clone(),
        app.state.capture.clone(),
        app.state.events.clone(),
        app.state.metrics.clone(),
        process_config,
    );

    let summary = process.run_capture().await.unwrap();
    assert_eq!(summary.abandoned, 1);
    assert_eq!(summary.submitted, 0);

    let current = app.reload(&authorised.external_id).await;
    assert_eq!(current.charge_status().unwrap(), ChargeStatus::CaptureError);
}

#[tokio::test]
async fn in_flight_capture_is_not_counted_as_a_retry() {
    let app = spawn_app().await;
    let authorised = app.authorised_charge(500).await;
    app.state
        .capture
        .mark_capture_approved(&authorised.external_id)
        .await
        .unwrap();

    // A zero wait makes the sweep observe its own attempt mid-flight.
    let capture = payment_connector::services::CaptureService::new(
        app.state.db.clone(),
        app.state.registry.clone(),
        app.state.executor.clone(),
        app.state.events.clone(),
        app.state.metrics.clone(),
        std::time::Duration::ZERO,
    );
    let process = payment_connector::services::CaptureProcess::new(
        app.state.db.clone(),
        capture,
        app.state.events.clone(),
        app.state.metrics.clone(),
        app.state.config.capture.clone(),
    );

    let summary = process.run_capture().await.unwrap();
    assert_eq!(summary.in_flight, 1);
    assert_eq!(summary.retried, 0);
    assert_eq!(summary.submitted, 0);

    // The attempt still finishes in the background.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let current = app.reload(&authorised.external_id).await;
    assert_eq!(current.charge_status().unwrap(), ChargeStatus::CaptureSubmitted);
}

#[tokio::test]
async fn capture_sweep_is_idempotent_when_nothing_is_eligible() {
    let app = spawn_app().await;
    let _authorised = app.authorised_charge(500).await;

    let process = app.state.capture_process();
    let first = process.run_capture().await.unwrap();
    assert_eq!(first.eligible, 0);
    let second = process.run_capture().await.unwrap();
    assert_eq!(second.submitted, 0);
}
