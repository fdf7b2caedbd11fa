use hmac::{Hmac, Mac};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AuthUser, RequestOrigin};
use crate::errors::ServiceError;
use crate::models::{OrderStatus, PaymentStatus};
use crate::rate_limiter::{Endpoint, RateLimiter};
use crate::repositories::{OrderStore, PaymentConfirmation};
use crate::services::audit::{AuditAction, AuditEvent, AuditSeverity, AuditSink};
use crate::services::notifications::{send_confirmation_best_effort, ConfirmationMailer};

type HmacSha256 = Hmac<Sha256>;

/// Gateway callback relayed by the client after checkout.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    #[serde(alias = "gateway_order_reference")]
    pub remote_order_reference: String,
    #[serde(alias = "gateway_payment_reference")]
    pub remote_payment_reference: String,
    /// Hex HMAC-SHA256 of `"{remote_order_reference}|{remote_payment_reference}"`
    pub signature: String,
    pub local_order_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// True when an earlier call had already settled this order
    pub already_verified: bool,
}

/// Checks gateway callback signatures with the shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, order_reference: &str, payment_reference: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(order_reference.as_bytes());
        mac.update(b"|");
        mac.update(payment_reference.as_bytes());
        mac
    }

    pub fn sign(&self, order_reference: &str, payment_reference: &str) -> String {
        hex::encode(self.mac(order_reference, payment_reference).finalize().into_bytes())
    }

    /// Constant-time comparison against the expected signature.
    pub fn verify(&self, order_reference: &str, payment_reference: &str, signature: &str) -> bool {
        let Ok(supplied) = hex::decode(signature.trim()) else {
            return false;
        };
        self.mac(order_reference, payment_reference)
            .verify_slice(&supplied)
            .is_ok()
    }
}

/// Settles orders from verified gateway callbacks. This is the only path to `paid`.
#[derive(Clone)]
pub struct PaymentVerificationService {
    orders: Arc<dyn OrderStore>,
    audit: Arc<dyn AuditSink>,
    mailer: Arc<dyn ConfirmationMailer>,
    rate_limiter: Arc<RateLimiter>,
    verifier: SignatureVerifier,
}

impl PaymentVerificationService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        audit: Arc<dyn AuditSink>,
        mailer: Arc<dyn ConfirmationMailer>,
        rate_limiter: Arc<RateLimiter>,
        verifier: SignatureVerifier,
    ) -> Self {
        Self {
            orders,
            audit,
            mailer,
            rate_limiter,
            verifier,
        }
    }

    #[instrument(
        skip(self, user, origin, request),
        fields(user_id = %user.user_id, order_id = %request.local_order_id)
    )]
    pub async fn verify(
        &self,
        user: &AuthUser,
        origin: &RequestOrigin,
        request: VerifyPaymentRequest,
    ) -> Result<VerifyPaymentResponse, ServiceError> {
        if !self
            .rate_limiter
            .allow(&user.user_id.to_string(), Endpoint::VerifyPayment)
            .await
        {
            return Err(ServiceError::RateLimitExceeded);
        }

        if !self.verifier.verify(
            &request.remote_order_reference,
            &request.remote_payment_reference,
            &request.signature,
        ) {
            warn!(
                gateway_order_reference = %request.remote_order_reference,
                "payment signature mismatch"
            );
            counter!("checkout_payment_verifications_total", 1, "outcome" => "signature_mismatch");
            self.audit
                .record(
                    AuditEvent::new(AuditAction::PaymentVerificationFailed, "order")
                        .actor(user.user_id)
                        .entity(request.local_order_id)
                        .severity(AuditSeverity::Critical)
                        .origin(origin)
                        .metadata(json!({
                            "gateway_order_reference": request.remote_order_reference,
                            "gateway_payment_reference": request.remote_payment_reference,
                            "reason": "signature mismatch",
                        })),
                )
                .await;
            return Err(ServiceError::SignatureMismatch);
        }

        let confirmation = self
            .orders
            .confirm_payment(
                request.local_order_id,
                user.user_id,
                request.remote_order_reference.clone(),
                request.remote_payment_reference.clone(),
            )
            .await?;

        let order = match confirmation {
            PaymentConfirmation::AlreadyPaid(order) => {
                info!(order_number = %order.order_number, "payment already verified");
                counter!("checkout_payment_verifications_total", 1, "outcome" => "already_paid");
                return Ok(VerifyPaymentResponse {
                    success: true,
                    order_number: order.order_number,
                    status: order.status,
                    payment_status: order.payment_status,
                    already_verified: true,
                });
            }
            PaymentConfirmation::Confirmed(order) => order,
        };

        counter!("checkout_payment_verifications_total", 1, "outcome" => "verified");
        info!(order_number = %order.order_number, "payment verified");

        self.audit
            .record(
                AuditEvent::new(AuditAction::PaymentVerified, "order")
                    .actor(user.user_id)
                    .entity(order.id)
                    .origin(origin)
                    .values(
                        Some(json!({
                            "status": OrderStatus::Pending.to_string(),
                            "payment_status": PaymentStatus::Pending.to_string(),
                        })),
                        Some(json!({
                            "status": order.status.to_string(),
                            "payment_status": order.payment_status.to_string(),
                        })),
                    )
                    .metadata(json!({
                        "order_number": order.order_number,
                        "gateway_order_reference": request.remote_order_reference,
                        "gateway_payment_reference": request.remote_payment_reference,
                        "amount": order.total,
                    })),
            )
            .await;

        match self.orders.get_order_with_items(order.id).await {
            Ok((order, items)) => {
                send_confirmation_best_effort(self.mailer.as_ref(), &order, &items).await
            }
            Err(e) => warn!(error = %e, "could not load order for confirmation mail"),
        }

        Ok(VerifyPaymentResponse {
            success: true,
            order_number: order.order_number,
            status: order.status,
            payment_status: order.payment_status,
            already_verified: false,
        })
    }
}
