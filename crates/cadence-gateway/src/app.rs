use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use cadence_bus::JobBus;
use cadence_core::config::CadenceConfig;
use cadence_store::Store;
use cadence_umbrella::{SlotLedger, UmbrellaCoordinator, UmbrellaResolver};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CadenceConfig,
    pub store: Arc<Store>,
    pub bus: JobBus,
    pub coordinator: UmbrellaCoordinator,
    pub resolver: Arc<UmbrellaResolver>,
    pub ledger: Arc<SlotLedger>,
}

impl AppState {
    pub fn new(
        config: CadenceConfig,
        store: Arc<Store>,
        bus: JobBus,
        coordinator: UmbrellaCoordinator,
        resolver: Arc<UmbrellaResolver>,
        ledger: Arc<SlotLedger>,
    ) -> Self {
        Self {
            config,
            store,
            bus,
            coordinator,
            resolver,
            ledger,
        }
    }
}

/// Assemble the full Axum router. The webhook surface does signature
/// verification and enqueueing only; all real processing happens in the
/// event-processor pool.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/notifications/{tenant_id}",
            get(crate::http::notifications::notifications_handler),
        )
        .route(
            "/webhooks/voice/call-events",
            post(crate::http::webhooks::voice_call_events),
        )
        .route(
            "/webhooks/voice/concurrency-sync",
            post(crate::http::webhooks::voice_concurrency_sync),
        )
        .route("/webhooks/sms", post(crate::http::webhooks::sms_webhook))
        .route("/webhooks/email", post(crate::http::webhooks::email_webhook))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
