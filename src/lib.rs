//! Payment gateway connector: orchestrates the card charge and refund
//! lifecycle against external payment providers, recording every transition
//! in an append-only event history.

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod models;
pub mod repositories;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use config::AppConfig;
use db::DbPool;
use errors::ServiceError;
use events::EventSender;
use gateway::GatewayRegistry;
use metrics::ConnectorMetrics;
use services::{
    AuthoriseService, CancelService, CaptureProcess, CaptureService, CardExecutor, ChargeService,
    NotificationService, RefundService,
};

/// Everything the request handlers and background jobs share.
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: AppConfig,
    pub registry: Arc<GatewayRegistry>,
    pub executor: Arc<CardExecutor>,
    pub metrics: Arc<ConnectorMetrics>,
    pub events: EventSender,
    pub charges: ChargeService,
    pub authorise: AuthoriseService,
    pub capture: CaptureService,
    pub cancel: CancelService,
    pub refunds: RefundService,
    pub notifications: NotificationService,
}

impl AppState {
    pub fn build(
        config: AppConfig,
        db: DbPool,
        events: EventSender,
    ) -> Result<Self, ServiceError> {
        let db = Arc::new(db);
        let registry = Arc::new(
            GatewayRegistry::from_config(&config.gateways)
                .map_err(|e| ServiceError::InternalError(e.to_string()))?,
        );
        let executor = Arc::new(CardExecutor::start(&config.executor));
        let metrics = Arc::new(ConnectorMetrics::new());
        let operation_timeout = Duration::from_millis(config.executor.operation_timeout_ms);

        Ok(Self {
            charges: ChargeService::new(Arc::clone(&db), events.clone()),
            authorise: AuthoriseService::new(
                Arc::clone(&db),
                Arc::clone(&registry),
                Arc::clone(&executor),
                events.clone(),
                Arc::clone(&metrics),
                operation_timeout,
            ),
            capture: CaptureService::new(
                Arc::clone(&db),
                Arc::clone(&registry),
                Arc::clone(&executor),
                events.clone(),
                Arc::clone(&metrics),
                operation_timeout,
            ),
            cancel: CancelService::new(
                Arc::clone(&db),
                Arc::clone(&registry),
                Arc::clone(&executor),
                events.clone(),
                operation_timeout,
            ),
            refunds: RefundService::new(
                Arc::clone(&db),
                Arc::clone(&registry),
                events.clone(),
                Arc::clone(&metrics),
            ),
            notifications: NotificationService::new(
                Arc::clone(&db),
                Arc::clone(&registry),
                events.clone(),
                Arc::clone(&metrics),
            ),
            db,
            config,
            registry,
            executor,
            metrics,
            events,
        })
    }

    pub fn capture_process(&self) -> CaptureProcess {
        CaptureProcess::new(
            Arc::clone(&self.db),
            self.capture.clone(),
            self.events.clone(),
            Arc::clone(&self.metrics),
            self.config.capture.clone(),
        )
    }
}

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(handlers::router())
        .merge(health::router())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
