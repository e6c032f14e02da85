use std::sync::Arc;

use chrono::Utc;
use sea_orm::Set;

use payment_connector::config::AppConfig;
use payment_connector::db;
use payment_connector::entities::{charge, gateway_account};
use payment_connector::events;
use payment_connector::gateway::CardDetails;
use payment_connector::models::ChargeStatus;
use payment_connector::repositories::charge_repository::{self, ChargeUpdate};
use payment_connector::services::card;
use payment_connector::AppState;

pub const SANDBOX_VALID_CARD: &str = "4242424242424242";
pub const SANDBOX_DECLINED_CARD: &str = "4000000000000002";
pub const SANDBOX_ERROR_CARD: &str = "4000000000000119";

pub struct TestApp {
    pub state: Arc<AppState>,
    pub sandbox_account: i64,
    pub smartpay_account: i64,
    pub worldpay_account: i64,
}

/// In-memory SQLite application with one seeded account per gateway. The
/// event listener runs for real so publish paths are exercised.
///
/// Each app gets its own named shared-cache database so every pooled
/// connection sees the same schema while tests stay isolated from each other.
pub async fn spawn_app() -> TestApp {
    static NEXT_DB: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let url = format!(
        "sqlite:file:testdb-{}?mode=memory&cache=shared",
        NEXT_DB.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    );
    let pool = db::connect(&url).await.expect("sqlite pool");
    db::ensure_schema(&pool).await.expect("schema");

    let (event_sender, event_receiver) = events::event_channel(256);
    tokio::spawn(events::run_event_listener(event_receiver));

    let mut config = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        0,
        "test".to_string(),
    );
    config.executor.operation_timeout_ms = 2_000;
    config.capture.retry_backoff_secs = 0;

    let state = Arc::new(AppState::build(config, pool, event_sender).expect("app state"));

    let sandbox_account = seed_account(&state, "sandbox", false).await;
    let smartpay_account = seed_account(&state, "smartpay", false).await;
    let worldpay_account = seed_account(&state, "worldpay", false).await;

    TestApp {
        state,
        sandbox_account,
        smartpay_account,
        worldpay_account,
    }
}

async fn seed_account(state: &Arc<AppState>, gateway_name: &str, requires_3ds: bool) -> i64 {
    use sea_orm::ActiveModelTrait;
    let account = gateway_account::ActiveModel {
        gateway_name: Set(gateway_name.to_string()),
        service_name: Set(Some(format!("{gateway_name} test service"))),
        requires_3ds: Set(requires_3ds),
        ..Default::default()
    };
    account
        .insert(state.db.as_ref())
        .await
        .expect("seed account")
        .id
}

pub fn valid_card() -> CardDetails {
    card_with_number(SANDBOX_VALID_CARD)
}

pub fn card_with_number(number: &str) -> CardDetails {
    CardDetails {
        card_number: number.to_string(),
        card_brand: "visa".to_string(),
        cardholder_name: "Jo Tester".to_string(),
        expiry_date: "12/27".to_string(),
        address_line1: Some("10 High Street".to_string()),
        address_city: Some("London".to_string()),
        address_postcode: Some("N1 9AA".to_string()),
        address_country: Some("GB".to_string()),
    }
}

impl TestApp {
    pub async fn create_charge(&self, amount: i64, account: i64) -> charge::Model {
        self.state
            .charges
            .create_charge(payment_connector::services::NewCharge {
                gateway_account_id: account,
                amount,
            })
            .await
            .expect("create charge")
    }

    pub async fn reload(&self, external_id: &str) -> charge::Model {
        charge_repository::find_by_external_id(self.state.db.as_ref(), external_id)
            .await
            .expect("reload charge")
            .expect("charge exists")
    }

    /// Creates a charge and walks it to AUTHORISATION_SUCCESS via the
    /// sandbox gateway.
    pub async fn authorised_charge(&self, amount: i64) -> charge::Model {
        let created = self.create_charge(amount, self.sandbox_account).await;
        self.state
            .charges
            .begin_card_details(&created.external_id)
            .await
            .expect("begin card details");
        let outcome = self
            .state
            .authorise
            .authorise(&created.external_id, valid_card())
            .await
            .expect("authorise");
        let charge = outcome.charge().clone();
        assert_eq!(charge.charge_status().unwrap(), ChargeStatus::AuthorisationSuccess);
        charge
    }

    /// Creates a charge and walks it all the way to CAPTURED.
    pub async fn captured_charge(&self, amount: i64) -> charge::Model {
        let authorised = self.authorised_charge(amount).await;
        self.state
            .capture
            .mark_capture_approved(&authorised.external_id)
            .await
            .expect("approve capture");
        let summary = self
            .state
            .capture_process()
            .run_capture()
            .await
            .expect("capture sweep");
        assert_eq!(summary.submitted, 1);
        let submitted = self.reload(&authorised.external_id).await;
        assert_eq!(submitted.charge_status().unwrap(), ChargeStatus::CaptureSubmitted);
        // Settlement confirmation normally arrives by notification; the
        // sandbox has none, so apply the final transition directly.
        card::transition(
            self.state.db.as_ref(),
            &submitted,
            ChargeStatus::Captured,
            ChargeUpdate::default(),
            None,
        )
        .await
        .expect("settle capture")
    }

    /// Drives a charge through an explicit status path without gateway
    /// calls, for scenarios the sandbox cannot produce.
    pub async fn force_status_path(
        &self,
        external_id: &str,
        path: &[ChargeStatus],
        gateway_transaction_id: Option<&str>,
    ) -> charge::Model {
        let mut current = self.reload(external_id).await;
        for (i, status) in path.iter().enumerate() {
            let update = if i == 0 {
                ChargeUpdate {
                    gateway_transaction_id: gateway_transaction_id.map(str::to_string),
                    ..Default::default()
                }
            } else {
                ChargeUpdate::default()
            };
            current = card::transition(self.state.db.as_ref(), &current, *status, update, None)
                .await
                .expect("forced transition");
        }
        current
    }

    pub async fn charge_event_statuses(&self, external_id: &str) -> Vec<String> {
        self.state
            .charges
            .charge_events(external_id)
            .await
            .expect("events")
            .into_iter()
            .map(|e| e.status)
            .collect()
    }

    pub async fn backdate_updated_at(&self, charge: &charge::Model, secs: i64) {
        use sea_orm::{ActiveModelTrait, ActiveValue};
        let when = Utc::now() - chrono::Duration::seconds(secs);
        let model = charge::ActiveModel {
            id: ActiveValue::Unchanged(charge.id),
            updated_at: Set(when),
            ..Default::default()
        };
        model.update(self.state.db.as_ref()).await.expect("backdate");
    }
}
