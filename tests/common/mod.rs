#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{NaiveDate, Utc};
use checkout_api::{
    auth::{AuthUser, RequestOrigin},
    build_router,
    config::AppConfig,
    db,
    entities::{audit_event, order, order_item, product, subscription, user_address},
    errors::GatewayError,
    models::{CartItem, PlanCadence, ShippingAddress, SubscriptionStatus},
    services::{
        checkout::CreateOrderRequest,
        payment_gateway::{GatewayClient, RemoteOrder},
        payment_verification::SignatureVerifier,
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

/// What the stub gateway answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayBehaviour {
    Accept,
    Reject,
    Unavailable,
    /// Hangs for the given time, then reports a timeout.
    Stall(Duration),
}

/// In-process gateway that counts calls.
pub struct StubGateway {
    behaviour: GatewayBehaviour,
    calls: AtomicUsize,
}

impl StubGateway {
    pub fn new(behaviour: GatewayBehaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayClient for StubGateway {
    async fn create_remote_order(
        &self,
        amount_minor_units: i64,
        currency: String,
        receipt: String,
        local_order_id: Uuid,
    ) -> Result<RemoteOrder, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            GatewayBehaviour::Accept => Ok(RemoteOrder {
                reference: format!("order_{}", receipt),
                raw: json!({
                    "id": format!("order_{}", receipt),
                    "amount": amount_minor_units,
                    "currency": currency,
                    "notes": {"local_order_id": local_order_id.to_string()},
                }),
            }),
            GatewayBehaviour::Reject => Err(GatewayError::Rejected {
                status: 400,
                message: "amount exceeds maximum amount allowed".into(),
            }),
            GatewayBehaviour::Unavailable => {
                Err(GatewayError::Unavailable("connection reset".into()))
            }
            GatewayBehaviour::Stall(delay) => {
                tokio::time::sleep(delay).await;
                Err(GatewayError::Unavailable("operation timed out".into()))
            }
        }
    }
}

/// Application state backed by a migrated in-memory SQLite database.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub gateway: Arc<StubGateway>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with(GatewayBehaviour::Accept, |_| {}).await
    }

    pub async fn with_gateway(behaviour: GatewayBehaviour) -> Self {
        Self::with(behaviour, |_| {}).await
    }

    pub async fn with(behaviour: GatewayBehaviour, tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::for_tests("sqlite::memory:");
        tweak(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let gateway = StubGateway::new(behaviour);
        let state = AppState::with_gateway(cfg, Arc::new(pool), gateway.clone())
            .expect("test state should build");
        let router = build_router(state.clone());

        Self {
            state,
            router,
            gateway,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.state
            .jwt
            .issue(
                user_id,
                Some("asha@example.com".into()),
                chrono::Duration::hours(1),
            )
            .expect("token should sign")
    }

    pub fn signer(&self) -> SignatureVerifier {
        SignatureVerifier::new(self.state.config.signature_secret())
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("request should build"))
            .await
            .expect("router should respond");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

pub fn user(user_id: Uuid) -> AuthUser {
    AuthUser {
        user_id,
        email: Some("asha@example.com".into()),
    }
}

pub fn origin() -> RequestOrigin {
    RequestOrigin {
        ip_address: Some("203.0.113.7".into()),
        user_agent: Some("integration-test".into()),
    }
}

pub fn valid_address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Asha Rao".into(),
        email: "asha@example.com".into(),
        phone: "+91 98765 43210".into(),
        address_line1: "12 MG Road, Camp".into(),
        address_line2: None,
        city: "Pune".into(),
        state: "Maharashtra".into(),
        postal_code: "411001".into(),
        country: "India".into(),
    }
}

pub fn cart_item(id: &str, unit_price: Decimal, quantity: i64) -> CartItem {
    CartItem {
        id: id.into(),
        name: format!("Product {}", id),
        image: None,
        unit_price,
        quantity,
        total_price: unit_price * Decimal::from(quantity),
        is_subscription: false,
    }
}

/// Request whose amount matches the cart.
pub fn order_request(items: Vec<CartItem>) -> CreateOrderRequest {
    let total: Decimal = items.iter().map(|i| i.total_price).sum();
    CreateOrderRequest {
        amount_minor_units: checkout_api::models::to_minor_units(total),
        currency: Some("INR".into()),
        shipping_address: valid_address(),
        cart_items: items,
        coupon_code: None,
        discount_amount: None,
    }
}

pub async fn order_count(db: &DatabaseConnection) -> u64 {
    order::Entity::find().count(db).await.expect("count orders")
}

pub async fn order_item_count(db: &DatabaseConnection) -> u64 {
    order_item::Entity::find()
        .count(db)
        .await
        .expect("count order items")
}

pub async fn find_order(db: &DatabaseConnection, id: Uuid) -> Option<order::Model> {
    order::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("load order")
}

pub async fn audit_events(db: &DatabaseConnection, action: &str) -> Vec<audit_event::Model> {
    audit_event::Entity::find()
        .filter(audit_event::Column::Action.eq(action))
        .all(db)
        .await
        .expect("load audit events")
}

pub async fn seed_product(db: &DatabaseConnection, id: &str, price: i64, is_active: bool) {
    product::ActiveModel {
        id: Set(id.to_string()),
        name: Set(format!("Product {}", id)),
        price: Set(price),
        image_url: Set(None),
        is_active: Set(is_active),
        updated_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed product");
}

pub async fn seed_address(db: &DatabaseConnection, user_id: Uuid, is_default: bool) -> Uuid {
    let id = Uuid::new_v4();
    let address = valid_address();
    user_address::ActiveModel {
        id: Set(id),
        user_id: Set(user_id),
        full_name: Set(address.full_name),
        email: Set(address.email),
        phone: Set(address.phone),
        address_line1: Set(address.address_line1),
        address_line2: Set(address.address_line2),
        city: Set(address.city),
        state: Set(address.state),
        postal_code: Set(address.postal_code),
        country: Set(address.country),
        is_default: Set(is_default),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed address");
    id
}

pub async fn seed_subscription(
    db: &DatabaseConnection,
    user_id: Uuid,
    product_id: &str,
    plan: PlanCadence,
    status: SubscriptionStatus,
    next_delivery_date: NaiveDate,
    address_id: Option<Uuid>,
) -> subscription::Model {
    subscription::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        product_id: Set(product_id.to_string()),
        quantity: Set(2),
        plan: Set(plan),
        status: Set(status),
        last_delivery_date: Set(None),
        next_delivery_date: Set(next_delivery_date),
        address_id: Set(address_id),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed subscription")
}

pub async fn reload_subscription(db: &DatabaseConnection, id: Uuid) -> subscription::Model {
    subscription::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("load subscription")
        .expect("subscription exists")
}
