use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::AppConfig;
use crate::entities::{order, order_item};

/// Upper bound for a single confirmation delivery.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("confirmation has no recipient address")]
    MissingRecipient,
    #[error("confirmation delivery failed: {0}")]
    Delivery(String),
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::Delivery(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationLine {
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub line_total: i64,
}

/// Everything a confirmation template needs, rendered elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderConfirmation {
    pub order_number: String,
    pub recipient_email: String,
    pub recipient_name: String,
    pub payment_method: String,
    pub payment_status: String,
    pub total: i64,
    pub currency: String,
    pub lines: Vec<ConfirmationLine>,
}

impl OrderConfirmation {
    pub fn from_order(
        order: &order::Model,
        items: &[order_item::Model],
    ) -> Result<Self, NotificationError> {
        let address = &order.shipping_address;
        let recipient_email = address
            .get("email")
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .ok_or(NotificationError::MissingRecipient)?
            .to_string();
        let recipient_name = address
            .get("full_name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            order_number: order.order_number.clone(),
            recipient_email,
            recipient_name,
            payment_method: order.payment_method.to_string(),
            payment_status: order.payment_status.to_string(),
            total: order.total,
            currency: order.currency.clone(),
            lines: items
                .iter()
                .map(|item| ConfirmationLine {
                    product_name: item.product_name.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    line_total: item.line_total,
                })
                .collect(),
        })
    }
}

/// Sends order confirmation mail. Callers treat failures as non-fatal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfirmationMailer: Send + Sync {
    async fn send_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError>;
}

/// Posts the confirmation as JSON to a mail relay webhook.
pub struct WebhookMailer {
    client: reqwest::Client,
    url: String,
}

impl WebhookMailer {
    pub fn new(url: impl Into<String>) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConfirmationMailer for WebhookMailer {
    #[instrument(skip(self, confirmation), fields(order_number = %confirmation.order_number))]
    async fn send_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError> {
        let response = self.client.post(&self.url).json(&confirmation).send().await?;
        if !response.status().is_success() {
            return Err(NotificationError::Delivery(format!(
                "mail relay responded with {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Used when no relay is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyMailer;

#[async_trait]
impl ConfirmationMailer for LogOnlyMailer {
    async fn send_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError> {
        info!(
            order_number = %confirmation.order_number,
            recipient = %confirmation.recipient_email,
            "order confirmation (no mail relay configured)"
        );
        Ok(())
    }
}

/// Sends the confirmation and swallows any failure after logging it.
pub async fn send_confirmation_best_effort(
    mailer: &dyn ConfirmationMailer,
    order: &order::Model,
    items: &[order_item::Model],
) {
    let outcome = match OrderConfirmation::from_order(order, items) {
        Ok(confirmation) => mailer.send_confirmation(confirmation).await,
        Err(e) => Err(e),
    };

    if let Err(e) = outcome {
        warn!(order_number = %order.order_number, error = %e, "order confirmation not sent");
        counter!("checkout_confirmation_failures_total", 1);
    }
}

pub fn mailer_from_config(
    config: &AppConfig,
) -> Result<Arc<dyn ConfirmationMailer>, NotificationError> {
    Ok(match config.confirmation_webhook_url.as_deref() {
        Some(url) if !url.is_empty() => Arc::new(WebhookMailer::new(url)?),
        _ => Arc::new(LogOnlyMailer),
    })
}
