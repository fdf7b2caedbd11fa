use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::entities::subscription::{self, Column, Entity as Subscription};
use crate::errors::ServiceError;
use crate::models::SubscriptionStatus;
use crate::repositories::Repository;

use super::BaseRepository;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Active subscriptions whose next delivery is on or before `today`.
    async fn due_subscriptions(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<subscription::Model>, ServiceError>;

    /// Moves both delivery dates forward, but only while `next_delivery_date` still equals
    /// `claimed_next_delivery`. Returns `false` when another run advanced it first.
    async fn advance_delivery(
        &self,
        id: Uuid,
        claimed_next_delivery: NaiveDate,
        last_delivery_date: NaiveDate,
        next_delivery_date: NaiveDate,
    ) -> Result<bool, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    base: BaseRepository,
}

impl SubscriptionRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub fn with_statement_timeout(mut self, statement_timeout: Duration) -> Self {
        self.base = self.base.with_statement_timeout(statement_timeout);
        self
    }
}

#[async_trait]
impl SubscriptionStore for SubscriptionRepository {
    async fn due_subscriptions(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<subscription::Model>, ServiceError> {
        self.base
            .bounded(
                Subscription::find()
                    .filter(Column::Status.eq(SubscriptionStatus::Active))
                    .filter(Column::NextDeliveryDate.lte(today))
                    .order_by_asc(Column::NextDeliveryDate)
                    .all(self.base.get_db()),
            )
            .await
    }

    async fn advance_delivery(
        &self,
        id: Uuid,
        claimed_next_delivery: NaiveDate,
        last_delivery_date: NaiveDate,
        next_delivery_date: NaiveDate,
    ) -> Result<bool, ServiceError> {
        let changes = subscription::ActiveModel {
            last_delivery_date: Set(Some(last_delivery_date)),
            next_delivery_date: Set(next_delivery_date),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };

        let result = self
            .base
            .bounded(
                Subscription::update_many()
                    .set(changes)
                    .filter(Column::Id.eq(id))
                    .filter(Column::NextDeliveryDate.eq(claimed_next_delivery))
                    .exec(self.base.get_db()),
            )
            .await?;

        Ok(result.rows_affected > 0)
    }
}
