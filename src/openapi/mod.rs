use axum::response::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Checkout API",
        version = "0.1.0",
        description = r#"
# Checkout API

Turns a validated cart into a durably recorded order, coordinates the matching payment
intent on the payment gateway and settles the order from the gateway's signed callback.

## Authentication

Customer endpoints take an HS256 bearer token issued by the identity provider:

```
Authorization: Bearer <your-jwt-token>
```

The renewal trigger takes the scheduler secret in `x-cron-secret` instead.

## Amounts

Order amounts are integers in minor units (paise for INR). Cart prices are sent as
decimals in major units and checked against `unit_price * quantity`.

## Error Handling

Every failure uses the same envelope:

```json
{
  "success": false,
  "error": "Bad Request",
  "code": "validation_error",
  "message": "Validation failed",
  "errors": ["Postal code must be 6 digits and cannot start with 0"],
  "request_id": "7d4f...",
  "timestamp": "2026-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order creation and lookup"),
        (name = "Payments", description = "Gateway callback verification"),
        (name = "Subscriptions", description = "Scheduled renewals"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::create_cod_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order_by_number,
        crate::handlers::payments::verify_payment,
        crate::handlers::subscriptions::run_renewals,
        crate::handlers::health::health,
    ),
    components(
        schemas(
            crate::models::ShippingAddress,
            crate::models::CartItem,
            crate::models::OrderStatus,
            crate::models::PaymentStatus,
            crate::models::PaymentMethod,
            crate::services::checkout::CreateOrderRequest,
            crate::services::checkout::CreateOrderResponse,
            crate::services::checkout::CodOrderResponse,
            crate::services::payment_verification::VerifyPaymentRequest,
            crate::services::payment_verification::VerifyPaymentResponse,
            crate::services::renewals::RenewalSummary,
            crate::services::renewals::RenewalOutcome,
            crate::services::renewals::RenewalStatus,
            crate::handlers::orders::OrderView,
            crate::handlers::orders::OrderItemView,
            crate::handlers::health::HealthReport,
            crate::handlers::health::ComponentStatus,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerSecurity)
)]
pub struct ApiDocV1;

struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Serves the generated document at `/api-docs/openapi.json`.
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}
