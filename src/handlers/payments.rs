use axum::{extract::State, response::Json};

use super::common::ApiJson;
use crate::auth::{AuthUser, RequestOrigin};
use crate::errors::ServiceError;
use crate::services::payment_verification::{VerifyPaymentRequest, VerifyPaymentResponse};
use crate::AppState;

/// Settle an order from a signed gateway callback
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    summary = "Verify payment",
    description = "Checks the gateway signature and marks the order paid. Repeating a verified call succeeds without side effects.",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment verified", body = VerifyPaymentResponse),
        (status = 400, description = "Signature mismatch or malformed body", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "No matching order for this caller", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    origin: RequestOrigin,
    ApiJson(payload): ApiJson<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, ServiceError> {
    let response = state.verification.verify(&user, &origin, payload).await?;
    Ok(Json(response))
}
