use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::GatewayError;

/// A pending payment intent on the gateway side.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteOrder {
    pub reference: String,
    /// Full gateway response, kept for diagnostics
    pub raw: Value,
}

/// Remote payment gateway. This side can only create payment intents; money moves through the
/// gateway's own checkout and comes back as a signed callback.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// `receipt` is the local order number, which the gateway also uses to spot duplicates.
    async fn create_remote_order(
        &self,
        amount_minor_units: i64,
        currency: String,
        receipt: String,
        local_order_id: Uuid,
    ) -> Result<RemoteOrder, GatewayError>;
}

#[derive(Debug, Serialize)]
struct CreateOrderPayload<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: OrderNotes,
}

#[derive(Debug, Serialize)]
struct OrderNotes {
    local_order_id: String,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: Option<GatewayErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorDetail {
    description: Option<String>,
}

/// HTTPS client authenticated with the service key pair.
#[derive(Clone)]
pub struct HttpGatewayClient {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpGatewayClient {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("client setup failed: {}", e)))?;

        Ok(Self::with_client(client, base_url, key_id, key_secret))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, GatewayError> {
        Self::new(
            config.gateway_base_url.clone(),
            config.gateway_key_id.clone(),
            config.gateway_key_secret.clone(),
            config.gateway_timeout(),
        )
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    #[instrument(skip(self), fields(gateway = %self.base_url))]
    async fn create_remote_order(
        &self,
        amount_minor_units: i64,
        currency: String,
        receipt: String,
        local_order_id: Uuid,
    ) -> Result<RemoteOrder, GatewayError> {
        let payload = CreateOrderPayload {
            amount: amount_minor_units,
            currency: &currency,
            receipt: &receipt,
            notes: OrderNotes {
                local_order_id: local_order_id.to_string(),
            },
        };

        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GatewayErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .and_then(|d| d.description)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("rejected").to_string());
            warn!(status = status.as_u16(), %message, "gateway rejected order");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), "gateway returned an error status");
            return Err(GatewayError::Unavailable(format!(
                "gateway responded with {}",
                status
            )));
        }

        let raw: Value = response.json().await?;
        let reference = raw
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::Unavailable("gateway response is missing the order id".to_string())
            })?;

        debug!(%reference, "gateway order created");
        Ok(RemoteOrder { reference, raw })
    }
}
