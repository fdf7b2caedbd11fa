/*!
 * # Subscription renewals
 *
 * A batch job run on an external schedule. Every active subscription that is due becomes a
 * new pending order billed at today's catalog price less the loyalty discount, and its
 * delivery dates move forward by one cadence. Failures are isolated per subscription: the
 * batch records them and moves on.
 *
 * Runs may overlap (the in-process loop, the internal endpoint and the CLI runner). The date
 * advance is a compare-and-set on the observed next delivery date, so only one run keeps its
 * renewal order; a run that loses the race removes its own order and reports the
 * subscription as skipped.
 */

use chrono::{Duration, NaiveDate};
use metrics::counter;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{order, subscription};
use crate::errors::ServiceError;
use crate::models::{OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress};
use crate::rate_limiter::RateLimiter;
use crate::repositories::{CatalogStore, NewOrder, NewOrderItem, OrderStore, SubscriptionStore};
use crate::services::audit::{AuditAction, AuditEvent, AuditSeverity, AuditSink};
use crate::services::checkout::{generate_order_number, persist_order_with_items};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RenewalStatus {
    Renewed,
    /// Another run renewed this delivery first.
    Skipped,
    Failed,
}

/// Per-subscription result line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RenewalOutcome {
    pub subscription_id: Uuid,
    pub status: RenewalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_delivery_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RenewalSummary {
    pub processed: usize,
    #[serde(default)]
    pub skipped: usize,
    pub failed: usize,
    pub details: Vec<RenewalOutcome>,
}

#[derive(Debug, Clone)]
pub struct RenewalSettings {
    /// Loyalty multiplier applied to the catalog price
    pub price_multiplier: Decimal,
    pub currency: String,
}

impl From<&AppConfig> for RenewalSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            price_multiplier: cfg.renewal_price_multiplier,
            currency: cfg.currency.clone(),
        }
    }
}

/// Applies the loyalty multiplier to a minor-unit price, rounding half away from zero.
pub fn discounted_price(price: i64, multiplier: Decimal) -> i64 {
    (Decimal::from(price) * multiplier)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(price)
}

pub struct RenewalScheduler {
    subscriptions: Arc<dyn SubscriptionStore>,
    catalog: Arc<dyn CatalogStore>,
    orders: Arc<dyn OrderStore>,
    audit: Arc<dyn AuditSink>,
    rate_limiter: Option<Arc<RateLimiter>>,
    settings: RenewalSettings,
}

impl RenewalScheduler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        catalog: Arc<dyn CatalogStore>,
        orders: Arc<dyn OrderStore>,
        audit: Arc<dyn AuditSink>,
        settings: RenewalSettings,
    ) -> Self {
        Self {
            subscriptions,
            catalog,
            orders,
            audit,
            rate_limiter: None,
            settings,
        }
    }

    /// Purge expired rate-limit counters at the end of every run.
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Renews every active subscription due on or before `today`.
    #[instrument(skip(self))]
    pub async fn run_due(&self, today: NaiveDate) -> Result<RenewalSummary, ServiceError> {
        let due = self.subscriptions.due_subscriptions(today).await?;
        info!(due = due.len(), "starting renewal batch");

        let mut summary = RenewalSummary::default();
        for sub in due {
            match self.renew(&sub, today).await {
                Ok(None) => {
                    summary.skipped += 1;
                    counter!("checkout_renewals_total", 1, "outcome" => "already_renewed");
                    summary.details.push(RenewalOutcome {
                        subscription_id: sub.id,
                        status: RenewalStatus::Skipped,
                        order_number: None,
                        next_delivery_date: None,
                        error: None,
                    });
                }
                Ok(Some((order, next_delivery_date))) => {
                    summary.processed += 1;
                    counter!("checkout_renewals_total", 1, "outcome" => "renewed");
                    summary.details.push(RenewalOutcome {
                        subscription_id: sub.id,
                        status: RenewalStatus::Renewed,
                        order_number: Some(order.order_number),
                        next_delivery_date: Some(next_delivery_date),
                        error: None,
                    });
                }
                Err(e) => {
                    summary.failed += 1;
                    counter!("checkout_renewals_total", 1, "outcome" => "failed");
                    warn!(subscription_id = %sub.id, error = %e, "renewal failed");
                    self.audit
                        .record(
                            AuditEvent::new(AuditAction::SubscriptionRenewalFailed, "subscription")
                                .entity(sub.id)
                                .severity(AuditSeverity::Warning)
                                .metadata(json!({
                                    "user_id": sub.user_id,
                                    "product_id": sub.product_id,
                                    "error": e.to_string(),
                                })),
                        )
                        .await;
                    summary.details.push(RenewalOutcome {
                        subscription_id: sub.id,
                        status: RenewalStatus::Failed,
                        order_number: None,
                        next_delivery_date: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if let Some(rate_limiter) = &self.rate_limiter {
            match rate_limiter.purge_expired().await {
                Ok(purged) if purged > 0 => info!(purged, "purged expired rate-limit counters"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "rate-limit counter purge failed"),
            }
        }

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "renewal batch finished"
        );
        Ok(summary)
    }

    async fn shipping_address(
        &self,
        sub: &subscription::Model,
    ) -> Result<ShippingAddress, ServiceError> {
        if let Some(address_id) = sub.address_id {
            if let Some(bound) = self.catalog.find_address(address_id, sub.user_id).await? {
                return Ok(bound.into());
            }
        }
        if let Some(default) = self.catalog.default_address(sub.user_id).await? {
            return Ok(default.into());
        }
        Ok(ShippingAddress::on_file_placeholder("Subscriber"))
    }

    async fn renew(
        &self,
        sub: &subscription::Model,
        today: NaiveDate,
    ) -> Result<Option<(order::Model, NaiveDate)>, ServiceError> {
        if sub.quantity < 1 {
            return Err(ServiceError::validation("Subscription quantity must be positive"));
        }

        let product = self
            .catalog
            .find_product(sub.product_id.clone())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is no longer available", sub.product_id))
            })?;

        let quantity = i64::from(sub.quantity);
        let subtotal = product.price * quantity;
        let total = discounted_price(product.price, self.settings.price_multiplier) * quantity;
        let address = self.shipping_address(sub).await?;

        let new_order = NewOrder {
            id: Uuid::new_v4(),
            order_number: generate_order_number(),
            user_id: sub.user_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: PaymentMethod::Subscription,
            subtotal,
            discount_amount: subtotal - total,
            total,
            currency: self.settings.currency.clone(),
            coupon_code: None,
            shipping_address: address,
            subscription_id: Some(sub.id),
        };
        let item = NewOrderItem {
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            product_image: product.image_url.clone(),
            unit_price: product.price,
            quantity: sub.quantity,
            line_total: subtotal,
            is_subscription: true,
        };

        let (order, _) = persist_order_with_items(
            self.orders.as_ref(),
            self.audit.as_ref(),
            new_order,
            vec![item],
        )
        .await?;

        let next_delivery_date = today + Duration::days(sub.plan.interval_days());
        match self
            .subscriptions
            .advance_delivery(sub.id, sub.next_delivery_date, today, next_delivery_date)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!(subscription_id = %sub.id, order_number = %order.order_number, "subscription already renewed by another run, removing duplicate order");
                self.discard_renewal_order(&order).await;
                return Ok(None);
            }
            Err(e) => {
                // Without the date change the next run would bill this delivery again
                error!(subscription_id = %sub.id, order_number = %order.order_number, error = %e, "could not advance subscription, removing renewal order");
                self.discard_renewal_order(&order).await;
                return Err(e);
            }
        }

        self.audit
            .record(
                AuditEvent::new(AuditAction::SubscriptionRenewed, "subscription")
                    .entity(sub.id)
                    .values(
                        Some(json!({ "next_delivery_date": sub.next_delivery_date })),
                        Some(json!({
                            "last_delivery_date": today,
                            "next_delivery_date": next_delivery_date,
                        })),
                    )
                    .metadata(json!({
                        "user_id": sub.user_id,
                        "order_id": order.id,
                        "order_number": order.order_number,
                        "amount": order.total,
                    })),
            )
            .await;

        Ok(Some((order, next_delivery_date)))
    }

    async fn discard_renewal_order(&self, order: &order::Model) {
        if let Err(cleanup) = self.orders.delete_order_items(order.id).await {
            error!(order_id = %order.id, error = %cleanup, "renewal order items left behind");
        }
        if let Err(cleanup) = self.orders.delete_order(order.id).await {
            error!(order_id = %order.id, error = %cleanup, "renewal order left behind");
        }
    }
}
