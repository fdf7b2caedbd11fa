/*!
 * # Order creation
 *
 * Creating an online order spans the local database and the remote payment gateway, which
 * cannot share a transaction. The flow is a forward-recovery saga:
 *
 * ```text
 * validating -> persisting_order -> persisting_items -> creating_remote_order -> linking -> done
 *                                         |                      |                  |
 *                                         +----------------------+------------------+--> rolled_back
 * ```
 *
 * Any failure after the order row is written deletes whatever this request wrote. A failure
 * while linking the remote reference leaves an orphaned remote order behind; it charges nobody,
 * so it is audited as critical for manual reconciliation rather than cancelled remotely.
 *
 * Cash-on-delivery orders take the same path up to `persisting_items` and never reach the
 * gateway.
 *
 * Everything from `persisting_order` on runs on its own task. A client disconnect or the
 * request timeout drops the caller's future, but the saga still ends in `done` or
 * `rolled_back`.
 */

use chrono::Utc;
use metrics::counter;
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AuthUser, RequestOrigin};
use crate::config::AppConfig;
use crate::entities::order;
use crate::errors::ServiceError;
use crate::models::{
    to_minor_units, CartItem, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress,
};
use crate::rate_limiter::{Endpoint, RateLimiter};
use crate::repositories::{NewOrder, NewOrderItem, OrderPatch, OrderStore, OrderWithItems};
use crate::services::audit::{AuditAction, AuditEvent, AuditSeverity, AuditSink};
use crate::services::notifications::{send_confirmation_best_effort, ConfirmationMailer};
use crate::services::payment_gateway::GatewayClient;
use crate::services::validation::{self, ValidationReport};
use crate::tracing::spawn_in_request_scope;

/// Steps of the order-creation saga, used in logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SagaStage {
    Validating,
    PersistingOrder,
    PersistingItems,
    CreatingRemoteOrder,
    Linking,
    Done,
    RolledBack,
}

/// Online and cash-on-delivery order request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    /// Amount the client expects to pay, in minor units
    pub amount_minor_units: i64,
    #[serde(default)]
    pub currency: Option<String>,
    pub shipping_address: ShippingAddress,
    pub cart_items: Vec<CartItem>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    /// Discount in major units
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "100.00")]
    pub discount_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderResponse {
    pub success: bool,
    pub gateway_order_reference: String,
    pub local_order_id: Uuid,
    pub order_number: String,
    pub amount_minor_units: i64,
    pub currency: String,
    /// Public key id the client hands to the gateway checkout
    pub gateway_key_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CodOrderResponse {
    pub success: bool,
    pub local_order_id: Uuid,
    pub order_number: String,
}

/// Limits and identifiers the saga needs from configuration.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub min_amount_minor_units: i64,
    pub max_amount_minor_units: i64,
    pub gateway_key_id: String,
}

impl From<&AppConfig> for CheckoutSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.currency.clone(),
            min_amount_minor_units: cfg.min_amount_minor_units,
            max_amount_minor_units: cfg.max_amount_minor_units,
            gateway_key_id: cfg.gateway_key_id.clone(),
        }
    }
}

/// A request that passed validation, with server-side amounts in minor units.
#[derive(Debug, Clone)]
struct PreparedOrder {
    items: Vec<NewOrderItem>,
    subtotal: i64,
    discount: i64,
    total: i64,
}

/// `ORD-{unix millis}-{6 random uppercase alphanumerics}`
pub fn generate_order_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Freezes cart lines into order items. Line totals are recomputed server-side and saturate
/// instead of wrapping; validation rejects such carts before anything is written.
pub fn order_items_from_cart(items: &[CartItem]) -> Vec<NewOrderItem> {
    items
        .iter()
        .map(|item| {
            let unit_price = to_minor_units(item.unit_price);
            NewOrderItem {
                product_id: item.id.clone(),
                product_name: item.name.clone(),
                product_image: item.image.clone(),
                unit_price,
                quantity: i32::try_from(item.quantity).unwrap_or(i32::MAX),
                line_total: unit_price.saturating_mul(item.quantity),
                is_subscription: item.is_subscription,
            }
        })
        .collect()
}

/// Writes an order and its items as one logical unit.
///
/// If the items cannot be written the order row is deleted again, so an order never exists
/// without its items.
pub async fn persist_order_with_items(
    orders: &dyn OrderStore,
    audit: &dyn AuditSink,
    new_order: NewOrder,
    items: Vec<NewOrderItem>,
) -> Result<OrderWithItems, ServiceError> {
    let user_id = new_order.user_id;
    let order_number = new_order.order_number.clone();

    let order = orders.create_order(new_order).await?;

    match orders.create_order_items(order.id, items).await {
        Ok(items) => Ok((order, items)),
        Err(e) => {
            warn!(
                stage = %SagaStage::PersistingItems,
                order_number = %order_number,
                error = %e,
                "order items failed, removing order"
            );
            counter!("checkout_compensations_total", 1, "stage" => SagaStage::PersistingItems.as_ref().to_string());
            if let Err(rollback) = orders.delete_order(order.id).await {
                report_rollback_failure(audit, user_id, &order, SagaStage::PersistingItems, &rollback)
                    .await;
            }
            Err(e)
        }
    }
}

fn saga_task_failed(err: JoinError) -> ServiceError {
    if err.is_panic() {
        std::panic::resume_unwind(err.into_panic());
    }
    error!(error = %err, "order saga task was cancelled");
    ServiceError::InternalError(format!("order saga task failed: {}", err))
}

async fn report_rollback_failure(
    audit: &dyn AuditSink,
    user_id: Uuid,
    order: &order::Model,
    stage: SagaStage,
    err: &ServiceError,
) {
    error!(
        order_id = %order.id,
        order_number = %order.order_number,
        %stage,
        error = %err,
        "compensation failed, order needs manual cleanup"
    );
    counter!("checkout_compensation_failures_total", 1);
    audit
        .record(
            AuditEvent::new(AuditAction::OrderRollbackFailed, "order")
                .actor(user_id)
                .entity(order.id)
                .severity(AuditSeverity::Critical)
                .metadata(json!({
                    "order_number": order.order_number,
                    "stage": stage.to_string(),
                    "error": err.to_string(),
                })),
        )
        .await;
}

/// Runs the order-creation saga and the cash-on-delivery variant.
#[derive(Clone)]
pub struct CheckoutService {
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn GatewayClient>,
    audit: Arc<dyn AuditSink>,
    mailer: Arc<dyn ConfirmationMailer>,
    rate_limiter: Arc<RateLimiter>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        gateway: Arc<dyn GatewayClient>,
        audit: Arc<dyn AuditSink>,
        mailer: Arc<dyn ConfirmationMailer>,
        rate_limiter: Arc<RateLimiter>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            orders,
            gateway,
            audit,
            mailer,
            rate_limiter,
            settings,
        }
    }

    /// Validates everything before any side effect and reports every failing reason.
    fn prepare(&self, request: &CreateOrderRequest) -> Result<PreparedOrder, ServiceError> {
        let mut report = ValidationReport::new();
        report.merge(validation::validate_amount(
            request.amount_minor_units,
            self.settings.min_amount_minor_units,
            self.settings.max_amount_minor_units,
        ));
        report.merge(validation::validate_address(&request.shipping_address));
        let cart_report = validation::validate_cart_items(&request.cart_items);
        let cart_ok = cart_report.is_valid();
        report.merge(cart_report);
        report.merge(validation::validate_coupon_code(
            request.coupon_code.as_deref().filter(|c| !c.is_empty()),
        ));

        if let Some(currency) = request.currency.as_deref() {
            report.check(
                currency.eq_ignore_ascii_case(&self.settings.currency),
                format!("Currency must be {}", self.settings.currency),
            );
        }

        let items = order_items_from_cart(&request.cart_items);
        let subtotal = items
            .iter()
            .fold(0i64, |acc, i| acc.saturating_add(i.line_total));
        let discount = request.discount_amount.map(to_minor_units).unwrap_or(0);

        // Totals are only meaningful once every line is sane
        if cart_ok {
            report.merge(validation::validate_order_totals(
                request.amount_minor_units,
                subtotal,
                discount,
            ));
        }

        report.into_result()?;

        Ok(PreparedOrder {
            items,
            subtotal,
            discount,
            total: subtotal - discount,
        })
    }

    async fn admit(&self, user: &AuthUser, endpoint: Endpoint) -> Result<(), ServiceError> {
        if self
            .rate_limiter
            .allow(&user.user_id.to_string(), endpoint)
            .await
        {
            Ok(())
        } else {
            Err(ServiceError::RateLimitExceeded)
        }
    }

    fn new_order(
        &self,
        user: &AuthUser,
        request: &CreateOrderRequest,
        prepared: &PreparedOrder,
        payment_status: PaymentStatus,
        payment_method: PaymentMethod,
    ) -> NewOrder {
        NewOrder {
            id: Uuid::new_v4(),
            order_number: generate_order_number(),
            user_id: user.user_id,
            status: OrderStatus::Pending,
            payment_status,
            payment_method,
            subtotal: prepared.subtotal,
            discount_amount: prepared.discount,
            total: prepared.total,
            currency: self.settings.currency.clone(),
            coupon_code: request.coupon_code.clone().filter(|c| !c.is_empty()),
            shipping_address: request.shipping_address.clone(),
            subscription_id: None,
        }
    }

    /// Removes the items and the order written earlier in this request.
    async fn compensate(&self, user: &AuthUser, order: &order::Model, stage: SagaStage) {
        counter!("checkout_compensations_total", 1, "stage" => stage.as_ref().to_string());
        warn!(order_id = %order.id, order_number = %order.order_number, %stage, "rolling back order");

        if let Err(e) = self.orders.delete_order_items(order.id).await {
            report_rollback_failure(self.audit.as_ref(), user.user_id, order, stage, &e).await;
        }
        if let Err(e) = self.orders.delete_order(order.id).await {
            report_rollback_failure(self.audit.as_ref(), user.user_id, order, stage, &e).await;
        }
        info!(order_number = %order.order_number, stage = %SagaStage::RolledBack, "order rolled back");
    }

    #[instrument(skip(self, user, origin, request), fields(user_id = %user.user_id))]
    pub async fn create_order(
        &self,
        user: &AuthUser,
        origin: &RequestOrigin,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError> {
        let prepared = self.prepare(&request)?;
        self.admit(user, Endpoint::CreateOrder).await?;

        let saga = self.clone();
        let (user, origin) = (user.clone(), origin.clone());
        spawn_in_request_scope(async move {
            saga.run_online(&user, &origin, &request, prepared).await
        })
        .await
        .map_err(saga_task_failed)?
    }

    async fn run_online(
        &self,
        user: &AuthUser,
        origin: &RequestOrigin,
        request: &CreateOrderRequest,
        prepared: PreparedOrder,
    ) -> Result<CreateOrderResponse, ServiceError> {
        let new_order = self.new_order(
            user,
            request,
            &prepared,
            PaymentStatus::Pending,
            PaymentMethod::Online,
        );
        let order_number = new_order.order_number.clone();
        info!(%order_number, stage = %SagaStage::PersistingOrder, total = prepared.total, "creating order");

        let (order, items) = persist_order_with_items(
            self.orders.as_ref(),
            self.audit.as_ref(),
            new_order,
            prepared.items,
        )
        .await?;

        let remote = match self
            .gateway
            .create_remote_order(
                order.total,
                order.currency.clone(),
                order.order_number.clone(),
                order.id,
            )
            .await
        {
            Ok(remote) => remote,
            Err(e) => {
                warn!(%order_number, stage = %SagaStage::CreatingRemoteOrder, error = %e, "gateway order failed");
                self.compensate(user, &order, SagaStage::CreatingRemoteOrder)
                    .await;
                return Err(e.into());
            }
        };

        let link = OrderPatch {
            gateway_order_reference: Some(remote.reference.clone()),
            ..Default::default()
        };
        if let Err(e) = self.orders.update_order(order.id, user.user_id, link).await {
            error!(
                %order_number,
                gateway_order_reference = %remote.reference,
                stage = %SagaStage::Linking,
                error = %e,
                "failed to link gateway order"
            );
            self.audit
                .record(
                    AuditEvent::new(AuditAction::GatewayLinkFailed, "order")
                        .actor(user.user_id)
                        .entity(order.id)
                        .severity(AuditSeverity::Critical)
                        .origin(origin)
                        .metadata(json!({
                            "order_number": order_number,
                            "gateway_order_reference": remote.reference,
                            "amount": order.total,
                            "error": e.to_string(),
                        })),
                )
                .await;
            self.compensate(user, &order, SagaStage::Linking).await;
            return Err(e);
        }

        self.audit
            .record(
                AuditEvent::new(AuditAction::OrderCreated, "order")
                    .actor(user.user_id)
                    .entity(order.id)
                    .origin(origin)
                    .values(
                        None,
                        Some(json!({
                            "status": OrderStatus::Pending.to_string(),
                            "payment_status": PaymentStatus::Pending.to_string(),
                        })),
                    )
                    .metadata(json!({
                        "order_number": order_number,
                        "amount": order.total,
                        "currency": order.currency,
                        "item_count": items.len(),
                        "gateway_order_reference": remote.reference,
                    })),
            )
            .await;

        counter!("checkout_orders_created_total", 1, "method" => "online");
        info!(%order_number, stage = %SagaStage::Done, "order created");

        Ok(CreateOrderResponse {
            success: true,
            gateway_order_reference: remote.reference,
            local_order_id: order.id,
            order_number: order.order_number,
            amount_minor_units: order.total,
            currency: order.currency,
            gateway_key_id: self.settings.gateway_key_id.clone(),
        })
    }

    #[instrument(skip(self, user, origin, request), fields(user_id = %user.user_id))]
    pub async fn create_cod_order(
        &self,
        user: &AuthUser,
        origin: &RequestOrigin,
        request: CreateOrderRequest,
    ) -> Result<CodOrderResponse, ServiceError> {
        let prepared = self.prepare(&request)?;
        self.admit(user, Endpoint::CreateCodOrder).await?;

        let saga = self.clone();
        let (user, origin) = (user.clone(), origin.clone());
        spawn_in_request_scope(async move {
            saga.run_cod(&user, &origin, &request, prepared).await
        })
        .await
        .map_err(saga_task_failed)?
    }

    async fn run_cod(
        &self,
        user: &AuthUser,
        origin: &RequestOrigin,
        request: &CreateOrderRequest,
        prepared: PreparedOrder,
    ) -> Result<CodOrderResponse, ServiceError> {
        let new_order = self.new_order(
            user,
            request,
            &prepared,
            PaymentStatus::CodPending,
            PaymentMethod::Cod,
        );

        let (order, items) = persist_order_with_items(
            self.orders.as_ref(),
            self.audit.as_ref(),
            new_order,
            prepared.items,
        )
        .await?;

        self.audit
            .record(
                AuditEvent::new(AuditAction::CodOrderCreated, "order")
                    .actor(user.user_id)
                    .entity(order.id)
                    .origin(origin)
                    .metadata(json!({
                        "order_number": order.order_number,
                        "amount": order.total,
                        "currency": order.currency,
                        "item_count": items.len(),
                    })),
            )
            .await;

        counter!("checkout_orders_created_total", 1, "method" => "cod");
        send_confirmation_best_effort(self.mailer.as_ref(), &order, &items).await;

        Ok(CodOrderResponse {
            success: true,
            local_order_id: order.id,
            order_number: order.order_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order_item;
    use crate::errors::GatewayError;
    use crate::repositories::order_repository::MockOrderStore;
    use crate::services::audit::MockAuditSink;
    use crate::services::notifications::MockConfirmationMailer;
    use crate::services::payment_gateway::{MockGatewayClient, RemoteOrder};
    use once_cell::sync::Lazy;
    use regex::Regex;
    use rust_decimal_macros::dec;

    static ORDER_NUMBER_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^ORD-\d{13}-[A-Z0-9]{6}$").unwrap());

    fn user() -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            email: None,
        }
    }

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            amount_minor_units: 135_000,
            currency: Some("INR".into()),
            shipping_address: ShippingAddress {
                full_name: "Asha Rao".into(),
                email: "asha@example.com".into(),
                phone: "9876543210".into(),
                address_line1: "12 MG Road".into(),
                address_line2: None,
                city: "Pune".into(),
                state: "Maharashtra".into(),
                postal_code: "411001".into(),
                country: "India".into(),
            },
            cart_items: vec![CartItem {
                id: "ghee-500".into(),
                name: "A2 Ghee".into(),
                image: None,
                unit_price: dec!(675),
                quantity: 2,
                total_price: dec!(1350),
                is_subscription: false,
            }],
            coupon_code: None,
            discount_amount: None,
        }
    }

    fn stored(new_order: NewOrder) -> order::Model {
        order::Model {
            id: new_order.id,
            order_number: new_order.order_number,
            user_id: new_order.user_id,
            status: new_order.status,
            payment_status: new_order.payment_status,
            payment_method: new_order.payment_method,
            subtotal: new_order.subtotal,
            discount_amount: new_order.discount_amount,
            shipping_amount: 0,
            total: new_order.total,
            currency: new_order.currency,
            coupon_code: new_order.coupon_code,
            shipping_address: new_order.shipping_address.to_json(),
            gateway_order_reference: None,
            gateway_payment_reference: None,
            subscription_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn stored_items(order_id: Uuid, items: Vec<NewOrderItem>) -> Vec<order_item::Model> {
        items
            .into_iter()
            .map(|i| order_item::Model {
                id: Uuid::new_v4(),
                order_id,
                product_id: i.product_id,
                product_name: i.product_name,
                product_image: i.product_image,
                unit_price: i.unit_price,
                quantity: i.quantity,
                line_total: i.line_total,
                is_subscription: i.is_subscription,
                created_at: Utc::now(),
            })
            .collect()
    }

    fn service(
        orders: MockOrderStore,
        gateway: MockGatewayClient,
        audit: MockAuditSink,
        mailer: MockConfirmationMailer,
    ) -> CheckoutService {
        let config = AppConfig::for_tests("sqlite::memory:");
        CheckoutService::new(
            Arc::new(orders),
            Arc::new(gateway),
            Arc::new(audit),
            Arc::new(mailer),
            Arc::new(RateLimiter::in_memory(&config)),
            CheckoutSettings::from(&config),
        )
    }

    #[test]
    fn order_numbers_match_format() {
        for _ in 0..20 {
            assert!(ORDER_NUMBER_RE.is_match(&generate_order_number()));
        }
    }

    #[test]
    fn line_totals_are_recomputed() {
        let mut cart = request().cart_items;
        cart[0].total_price = dec!(1350.40);
        let items = order_items_from_cart(&cart);
        assert_eq!(items[0].unit_price, 67_500);
        assert_eq!(items[0].line_total, 135_000);
    }

    #[tokio::test]
    async fn invalid_request_touches_nothing() {
        let svc = service(
            MockOrderStore::new(),
            MockGatewayClient::new(),
            MockAuditSink::new(),
            MockConfirmationMailer::new(),
        );
        let mut req = request();
        req.cart_items[0].total_price = dec!(5000);
        req.shipping_address.postal_code = "0123".into();

        let err = svc
            .create_order(&user(), &RequestOrigin::default(), req)
            .await
            .unwrap_err();
        match err {
            ServiceError::ValidationFailed(reasons) => assert_eq!(reasons.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn extreme_client_amounts_are_validation_errors() {
        let svc = service(
            MockOrderStore::new(),
            MockGatewayClient::new(),
            MockAuditSink::new(),
            MockConfirmationMailer::new(),
        );

        let mut req = request();
        req.amount_minor_units = i64::MIN;
        let err = svc
            .create_order(&user(), &RequestOrigin::default(), req)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationFailed(_)), "{:?}", err);

        let mut req = request();
        req.cart_items[0].unit_price = Decimal::from_i128_with_scale(100_000_000_000_000_000_000, 0);
        req.cart_items[0].quantity = 10_000_000_000;
        req.discount_amount = Some(Decimal::MIN);
        let err = svc
            .create_order(&user(), &RequestOrigin::default(), req)
            .await
            .unwrap_err();
        match err {
            ServiceError::ValidationFailed(reasons) => {
                assert!(reasons.iter().any(|r| r.contains("out of range")), "{:?}", reasons)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn oversized_lines_saturate_instead_of_wrapping() {
        let mut cart = request().cart_items;
        cart[0].unit_price = Decimal::from(i64::MAX);
        cart[0].quantity = 3;
        let items = order_items_from_cart(&cart);
        assert_eq!(items[0].line_total, i64::MAX);
    }

    #[tokio::test]
    async fn link_failure_is_audited_and_rolled_back() {
        let mut orders = MockOrderStore::new();
        orders
            .expect_create_order()
            .times(1)
            .returning(|n| Ok(stored(n)));
        orders
            .expect_create_order_items()
            .times(1)
            .returning(|id, items| Ok(stored_items(id, items)));
        orders
            .expect_update_order()
            .times(1)
            .returning(|_, _, _| Err(ServiceError::InternalError("connection reset".into())));
        orders
            .expect_delete_order_items()
            .times(1)
            .returning(|_| Ok(1));
        orders.expect_delete_order().times(1).returning(|_| Ok(()));

        let mut gateway = MockGatewayClient::new();
        gateway
            .expect_create_remote_order()
            .times(1)
            .returning(|_, _, _, _| {
                Ok(RemoteOrder {
                    reference: "order_ORPHAN".into(),
                    raw: json!({"id": "order_ORPHAN"}),
                })
            });

        let mut audit = MockAuditSink::new();
        audit
            .expect_record()
            .withf(|e| {
                e.action == AuditAction::GatewayLinkFailed
                    && e.severity == AuditSeverity::Critical
                    && e.metadata["gateway_order_reference"] == "order_ORPHAN"
            })
            .times(1)
            .return_const(());

        let svc = service(orders, gateway, audit, MockConfirmationMailer::new());
        let err = svc
            .create_order(&user(), &RequestOrigin::default(), request())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, ServiceError::InternalError(m) if m == "connection reset"),
            "{:?}",
            err
        );
    }

    #[tokio::test]
    async fn gateway_failure_deletes_items_then_order() {
        let mut orders = MockOrderStore::new();
        orders
            .expect_create_order()
            .times(1)
            .returning(|n| Ok(stored(n)));
        orders
            .expect_create_order_items()
            .times(1)
            .returning(|id, items| Ok(stored_items(id, items)));
        orders
            .expect_delete_order_items()
            .times(1)
            .returning(|_| Ok(1));
        orders.expect_delete_order().times(1).returning(|_| Ok(()));
        orders.expect_update_order().never();

        let mut gateway = MockGatewayClient::new();
        gateway
            .expect_create_remote_order()
            .times(1)
            .returning(|_, _, _, _| Err(GatewayError::Unavailable("timeout".into())));

        let mut audit = MockAuditSink::new();
        audit.expect_record().never();

        let svc = service(orders, gateway, audit, MockConfirmationMailer::new());
        let err = svc
            .create_order(&user(), &RequestOrigin::default(), request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Gateway(GatewayError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn item_failure_removes_order_and_skips_gateway() {
        let mut orders = MockOrderStore::new();
        orders
            .expect_create_order()
            .times(1)
            .returning(|n| Ok(stored(n)));
        orders
            .expect_create_order_items()
            .times(1)
            .returning(|_, _| Err(ServiceError::InternalError("disk full".into())));
        orders.expect_delete_order().times(1).returning(|_| Ok(()));

        let mut gateway = MockGatewayClient::new();
        gateway.expect_create_remote_order().never();

        let svc = service(
            orders,
            gateway,
            MockAuditSink::new(),
            MockConfirmationMailer::new(),
        );
        assert!(svc
            .create_order(&user(), &RequestOrigin::default(), request())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn failed_rollback_is_audited_as_critical() {
        let mut orders = MockOrderStore::new();
        orders
            .expect_create_order()
            .returning(|n| Ok(stored(n)));
        orders
            .expect_create_order_items()
            .returning(|_, _| Err(ServiceError::InternalError("constraint".into())));
        orders
            .expect_delete_order()
            .returning(|_| Err(ServiceError::InternalError("connection lost".into())));

        let mut audit = MockAuditSink::new();
        audit
            .expect_record()
            .withf(|e| {
                e.action == AuditAction::OrderRollbackFailed
                    && e.severity == AuditSeverity::Critical
            })
            .times(1)
            .return_const(());

        let svc = service(
            orders,
            MockGatewayClient::new(),
            audit,
            MockConfirmationMailer::new(),
        );
        assert!(svc
            .create_order(&user(), &RequestOrigin::default(), request())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn happy_path_links_reference_and_audits() {
        let mut orders = MockOrderStore::new();
        orders.expect_create_order().returning(|n| Ok(stored(n)));
        orders
            .expect_create_order_items()
            .returning(|id, items| Ok(stored_items(id, items)));
        orders
            .expect_update_order()
            .withf(|_, _, patch| patch.gateway_order_reference.as_deref() == Some("order_RMT1"))
            .times(1)
            .returning(|id, owner, _| {
                let mut o = stored(NewOrder {
                    id,
                    order_number: generate_order_number(),
                    user_id: owner,
                    status: OrderStatus::Pending,
                    payment_status: PaymentStatus::Pending,
                    payment_method: PaymentMethod::Online,
                    subtotal: 135_000,
                    discount_amount: 0,
                    total: 135_000,
                    currency: "INR".into(),
                    coupon_code: None,
                    shipping_address: request().shipping_address,
                    subscription_id: None,
                });
                o.gateway_order_reference = Some("order_RMT1".into());
                Ok(o)
            });

        let mut gateway = MockGatewayClient::new();
        gateway
            .expect_create_remote_order()
            .withf(|amount, currency, _, _| *amount == 135_000 && currency == "INR")
            .returning(|_, _, _, _| {
                Ok(RemoteOrder {
                    reference: "order_RMT1".into(),
                    raw: json!({"id": "order_RMT1"}),
                })
            });

        let mut audit = MockAuditSink::new();
        audit
            .expect_record()
            .withf(|e| e.action == AuditAction::OrderCreated && e.metadata["item_count"] == 1)
            .times(1)
            .return_const(());

        let svc = service(orders, gateway, audit, MockConfirmationMailer::new());
        let response = svc
            .create_order(&user(), &RequestOrigin::default(), request())
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.gateway_order_reference, "order_RMT1");
        assert_eq!(response.amount_minor_units, 135_000);
        assert_eq!(response.gateway_key_id, "rzp_test_key");
        assert!(ORDER_NUMBER_RE.is_match(&response.order_number));
    }

    #[tokio::test]
    async fn cod_order_skips_gateway_and_tolerates_mail_failure() {
        let mut orders = MockOrderStore::new();
        orders
            .expect_create_order()
            .withf(|n| {
                n.payment_status == PaymentStatus::CodPending
                    && n.payment_method == PaymentMethod::Cod
                    && n.status == OrderStatus::Pending
            })
            .returning(|n| Ok(stored(n)));
        orders
            .expect_create_order_items()
            .returning(|id, items| Ok(stored_items(id, items)));

        let mut gateway = MockGatewayClient::new();
        gateway.expect_create_remote_order().never();

        let mut audit = MockAuditSink::new();
        audit
            .expect_record()
            .withf(|e| e.action == AuditAction::CodOrderCreated)
            .times(1)
            .return_const(());

        let mut mailer = MockConfirmationMailer::new();
        mailer.expect_send_confirmation().times(1).returning(|_| {
            Err(crate::services::notifications::NotificationError::Delivery(
                "smtp down".into(),
            ))
        });

        let svc = service(orders, gateway, audit, mailer);
        let response = svc
            .create_cod_order(&user(), &RequestOrigin::default(), request())
            .await
            .unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn discount_reduces_charged_total() {
        let mut orders = MockOrderStore::new();
        orders
            .expect_create_order()
            .withf(|n| n.subtotal == 135_000 && n.discount_amount == 10_000 && n.total == 125_000)
            .returning(|n| Ok(stored(n)));
        orders
            .expect_create_order_items()
            .returning(|id, items| Ok(stored_items(id, items)));

        let mut audit = MockAuditSink::new();
        audit.expect_record().return_const(());
        let mut mailer = MockConfirmationMailer::new();
        mailer.expect_send_confirmation().returning(|_| Ok(()));

        let svc = service(orders, MockGatewayClient::new(), audit, mailer);
        let mut req = request();
        req.discount_amount = Some(dec!(100));
        req.amount_minor_units = 125_000;
        req.coupon_code = Some("SAVE100".into());
        assert!(svc
            .create_cod_order(&user(), &RequestOrigin::default(), req)
            .await
            .is_ok());
    }
}
