//! Checkout API Library
//!
//! Order creation and payment settlement: the checkout saga, gateway callback
//! verification, cash-on-delivery orders and subscription renewals.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod rate_limiter;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{
    extract::FromRef,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use crate::auth::JwtVerifier;
use crate::rate_limiter::{
    CounterStore, DatabaseCounterStore, InMemoryCounterStore, RateLimiter, RedisCounterStore,
};
use crate::repositories::{CatalogRepository, OrderRepository, OrderStore, SubscriptionRepository};
use crate::services::audit::{AuditSink, DatabaseAuditLogger};
use crate::services::checkout::{CheckoutService, CheckoutSettings};
use crate::services::notifications::mailer_from_config;
use crate::services::payment_gateway::{GatewayClient, HttpGatewayClient};
use crate::services::payment_verification::{PaymentVerificationService, SignatureVerifier};
use crate::services::renewals::{RenewalScheduler, RenewalSettings};

/// Upper bound for a whole request, gateway round-trip included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub jwt: Arc<JwtVerifier>,
    pub orders: Arc<dyn OrderStore>,
    pub checkout: Arc<CheckoutService>,
    pub verification: Arc<PaymentVerificationService>,
    pub renewals: Arc<RenewalScheduler>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl AppState {
    /// Wires every service against the configured gateway, mail relay and counter store.
    pub fn from_config(
        config: config::AppConfig,
        db: Arc<DatabaseConnection>,
    ) -> anyhow::Result<Self> {
        let gateway: Arc<dyn GatewayClient> = Arc::new(HttpGatewayClient::from_config(&config)?);
        Self::with_gateway(config, db, gateway)
    }

    /// Same as [`AppState::from_config`] with an explicit gateway client.
    pub fn with_gateway(
        config: config::AppConfig,
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn GatewayClient>,
    ) -> anyhow::Result<Self> {
        let store = counter_store(&config, &db)?;
        let rate_limiter = Arc::new(RateLimiter::from_config(&config, store));
        let mailer = mailer_from_config(&config)?;
        let statement_timeout = config.db_statement_timeout();
        let audit: Arc<dyn AuditSink> = Arc::new(
            DatabaseAuditLogger::new(db.clone()).with_statement_timeout(statement_timeout),
        );
        let orders: Arc<dyn OrderStore> =
            Arc::new(OrderRepository::new(db.clone()).with_statement_timeout(statement_timeout));

        let checkout = CheckoutService::new(
            orders.clone(),
            gateway,
            audit.clone(),
            mailer.clone(),
            rate_limiter.clone(),
            CheckoutSettings::from(&config),
        );
        let verification = PaymentVerificationService::new(
            orders.clone(),
            audit.clone(),
            mailer,
            rate_limiter.clone(),
            SignatureVerifier::new(config.signature_secret()),
        );
        let renewals = RenewalScheduler::new(
            Arc::new(
                SubscriptionRepository::new(db.clone()).with_statement_timeout(statement_timeout),
            ),
            Arc::new(CatalogRepository::new(db.clone()).with_statement_timeout(statement_timeout)),
            orders.clone(),
            audit,
            RenewalSettings::from(&config),
        )
        .with_rate_limiter(rate_limiter.clone());

        Ok(Self {
            db,
            jwt: Arc::new(JwtVerifier::new(&config.jwt_secret)),
            config,
            orders,
            checkout: Arc::new(checkout),
            verification: Arc::new(verification),
            renewals: Arc::new(renewals),
            rate_limiter,
        })
    }
}

fn counter_store(
    config: &config::AppConfig,
    db: &Arc<DatabaseConnection>,
) -> anyhow::Result<Arc<dyn CounterStore>> {
    let namespace = config.rate_limit_namespace.clone();
    let store: Arc<dyn CounterStore> = match config.rate_limit_backend.to_ascii_lowercase().as_str()
    {
        "redis" => {
            let client = redis::Client::open(config.redis_url.as_str())?;
            Arc::new(RedisCounterStore::new(Arc::new(client), namespace))
        }
        "database" => Arc::new(DatabaseCounterStore::new(db.clone(), namespace)),
        _ => Arc::new(InMemoryCounterStore::new(namespace)),
    };
    ::tracing::info!(backend = store.backend_name(), "rate limiter ready");
    Ok(store)
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Customer-facing routes, mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/orders",
            get(handlers::orders::list_orders).post(handlers::orders::create_order),
        )
        .route("/orders/cod", post(handlers::orders::create_cod_order))
        .route(
            "/orders/by-number/:order_number",
            get(handlers::orders::get_order_by_number),
        )
        .route("/payments/verify", post(handlers::payments::verify_payment))
}

/// Full application router with request-id, tracing and timeout layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .route(
            "/internal/subscriptions/renew",
            post(handlers::subscriptions::run_renewals),
        )
        .route("/health", get(handlers::health::health))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .layer(middleware::from_fn(crate::tracing::request_id_middleware))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(crate::tracing::configure_http_tracing())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(crate::tracing::UuidRequestId))
        .with_state(state)
}
