use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::{created_response, ApiJson};
use crate::auth::{AuthUser, RequestOrigin};
use crate::entities::{order, order_item};
use crate::errors::ServiceError;
use crate::models::{OrderStatus, PaymentMethod, PaymentStatus};
use crate::rate_limiter::Endpoint;
use crate::services::checkout::{CodOrderResponse, CreateOrderRequest, CreateOrderResponse};
use crate::{ApiResponse, ApiResult, AppState};

/// Frozen line snapshot as shown to the customer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    pub product_id: String,
    pub product_name: String,
    pub product_image: Option<String>,
    pub unit_price: i64,
    pub quantity: i32,
    pub line_total: i64,
    pub is_subscription: bool,
}

impl From<order_item::Model> for OrderItemView {
    fn from(item: order_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            product_name: item.product_name,
            product_image: item.product_image,
            unit_price: item.unit_price,
            quantity: item.quantity,
            line_total: item.line_total,
            is_subscription: item.is_subscription,
        }
    }
}

/// Order with its items. Amounts are in minor units.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub shipping_amount: i64,
    pub total: i64,
    pub currency: String,
    pub coupon_code: Option<String>,
    #[schema(value_type = Object)]
    pub shipping_address: serde_json::Value,
    pub gateway_order_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemView>,
}

impl OrderView {
    fn new(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            subtotal: order.subtotal,
            discount_amount: order.discount_amount,
            shipping_amount: order.shipping_amount,
            total: order.total,
            currency: order.currency,
            coupon_code: order.coupon_code,
            shipping_address: order.shipping_address,
            gateway_order_reference: order.gateway_order_reference,
            created_at: order.created_at,
            items: items.into_iter().map(OrderItemView::from).collect(),
        }
    }
}

async fn admit_read(state: &AppState, user: &AuthUser) -> Result<(), ServiceError> {
    if state
        .rate_limiter
        .allow(&user.user_id.to_string(), Endpoint::Default)
        .await
    {
        Ok(())
    } else {
        Err(ServiceError::RateLimitExceeded)
    }
}

/// Create an online order and its gateway payment intent
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Validates the cart, records a pending order and opens a payment intent on the gateway. Any failure after the order is written removes it again.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = CreateOrderResponse,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Validation failed or malformed body", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 422, description = "Gateway rejected the order", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    origin: RequestOrigin,
    ApiJson(payload): ApiJson<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.checkout.create_order(&user, &origin, payload).await?;
    Ok(created_response(response))
}

/// Create a cash-on-delivery order
#[utoipa::path(
    post,
    path = "/api/v1/orders/cod",
    summary = "Create cash-on-delivery order",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = CodOrderResponse),
        (status = 400, description = "Validation failed or malformed body", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_cod_order(
    State(state): State<AppState>,
    user: AuthUser,
    origin: RequestOrigin,
    ApiJson(payload): ApiJson<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state
        .checkout
        .create_cod_order(&user, &origin, payload)
        .await?;
    Ok(created_response(response))
}

/// List the caller's orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "The caller's orders, newest first. Orders without items are not shown.",
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<OrderView>> {
    admit_read(&state, &user).await?;
    let orders = state.orders.list_for_owner(user.user_id).await?;
    let views = orders
        .into_iter()
        .map(|(order, items)| OrderView::new(order, items))
        .collect();
    Ok(Json(ApiResponse::success(views)))
}

/// Get one of the caller's orders by its public number
#[utoipa::path(
    get,
    path = "/api/v1/orders/by-number/{order_number}",
    summary = "Get order by number",
    params(("order_number" = String, Path, description = "Public order number, e.g. ORD-1767225600000-K3Z9QW")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_number): Path<String>,
) -> ApiResult<OrderView> {
    admit_read(&state, &user).await?;
    let (order, items) = state
        .orders
        .find_owned_by_number(order_number, user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(OrderView::new(order, items))))
}
