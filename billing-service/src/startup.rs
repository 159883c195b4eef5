//! Application startup and lifecycle management.

use crate::config::BillingConfig;
use crate::handlers::{health, invoices, lines, payments, sessions};
use crate::middleware::http_metrics_middleware;
use crate::services::{
    init_metrics, BillingEngine, Database, IdempotencyStore, InMemoryIdempotencyStore,
    RedisIdempotencyStore,
};
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{make_request_span, request_id_middleware};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub db: Arc<Database>,
    pub engine: Arc<BillingEngine>,
    pub idempotency: Arc<dyn IdempotencyStore>,
}

/// HTTP routes. Layers run outermost last: request id, then tracing, then metrics.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_handler))
        .route(
            "/visits/:visit_id/invoice",
            post(invoices::create_invoice_from_visit),
        )
        .route("/invoices/:invoice_id", get(invoices::get_invoice))
        .route("/invoices/:invoice_id/cancel", post(invoices::cancel_invoice))
        .route("/invoices/:invoice_id/lines", post(lines::add_line))
        .route(
            "/lines/:line_id",
            patch(lines::update_line).delete(lines::delete_line),
        )
        .route("/invoices/:invoice_id/payments", post(payments::create_payment))
        .route("/cash-sessions", post(sessions::open_session))
        .route("/cash-sessions/current", get(sessions::current_session))
        .route("/cash-sessions/:session_id", get(sessions::get_session))
        .route(
            "/cash-sessions/:session_id/close",
            post(sessions::close_session),
        )
        .route(
            "/cash-sessions/:session_id/audit-events",
            get(sessions::list_audit_events),
        )
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| make_request_span(request)),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: BillingConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);

        let idempotency: Arc<dyn IdempotencyStore> = match &config.redis_url {
            Some(url) => {
                let store = RedisIdempotencyStore::new(url.expose_secret())
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "Failed to connect to Redis");
                        AppError::InternalError(e)
                    })?;
                Arc::new(store)
            }
            None => {
                tracing::warn!(
                    "REDIS_URL not set - idempotency keys are only honoured within this instance"
                );
                Arc::new(InMemoryIdempotencyStore::new())
            }
        };

        let engine = Arc::new(BillingEngine::new(
            db.clone(),
            idempotency.clone(),
            config.default_currency.clone(),
            config.idempotency_ttl_seconds,
        ));

        let state = AppState {
            config: config.clone(),
            db,
            engine,
            idempotency,
        };

        let http_addr = config.common.socket_addr();
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Billing service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let app = router(self.state);

        tracing::info!(
            service = "billing-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, app).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
