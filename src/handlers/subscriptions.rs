use axum::{extract::State, http::HeaderMap, response::Json};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::errors::ServiceError;
use crate::services::renewals::RenewalSummary;
use crate::tracing::spawn_in_request_scope;
use crate::AppState;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

/// Compares through HMAC so the check does not short-circuit on the first differing byte.
fn secrets_match(expected: &str, supplied: &str) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    mac.update(b"cron");
    let expected_tag = mac.finalize().into_bytes();

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(supplied.as_bytes()) else {
        return false;
    };
    mac.update(b"cron");
    mac.verify_slice(&expected_tag).is_ok()
}

fn authorize_scheduler(state: &AppState, headers: &HeaderMap) -> Result<(), ServiceError> {
    let expected = state
        .config
        .renewal_cron_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("Renewal trigger is disabled".to_string()))?;

    let supplied = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if secrets_match(expected, supplied) {
        Ok(())
    } else {
        warn!("renewal trigger called with a bad cron secret");
        Err(ServiceError::Unauthorized("Invalid cron secret".to_string()))
    }
}

/// Run the subscription renewal batch for today
#[utoipa::path(
    post,
    path = "/internal/subscriptions/renew",
    summary = "Run subscription renewals",
    description = "Called by the external scheduler. Each due subscription is renewed independently; failures are reported in the summary.",
    params(("x-cron-secret" = String, Header, description = "Shared scheduler secret")),
    responses(
        (status = 200, description = "Batch finished", body = RenewalSummary),
        (status = 401, description = "Missing or wrong scheduler secret", body = crate::errors::ErrorResponse),
        (status = 500, description = "Due subscriptions could not be loaded", body = crate::errors::ErrorResponse),
    ),
    tag = "Subscriptions"
)]
pub async fn run_renewals(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RenewalSummary>, ServiceError> {
    authorize_scheduler(&state, &headers)?;
    let renewals = state.renewals.clone();
    let today = Utc::now().date_naive();
    // The batch finishes even if the scheduler hangs up or the request times out
    let summary = spawn_in_request_scope(async move { renewals.run_due(today).await })
        .await
        .map_err(|e| ServiceError::InternalError(format!("renewal batch task failed: {}", e)))??;
    Ok(Json(summary))
}
