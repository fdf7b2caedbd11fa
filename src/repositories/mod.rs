use sea_orm::{DatabaseConnection, DbErr};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::db::{with_statement_timeout, DEFAULT_STATEMENT_TIMEOUT};
use crate::errors::ServiceError;

pub mod catalog_repository;
pub mod order_repository;
pub mod subscription_repository;

pub use catalog_repository::{CatalogRepository, CatalogStore};
pub use order_repository::{
    NewOrder, NewOrderItem, OrderPatch, OrderRepository, OrderStore, OrderWithItems,
    PaymentConfirmation,
};
pub use subscription_repository::{SubscriptionRepository, SubscriptionStore};

/// Repository trait for common database operations
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
    statement_timeout: Duration,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    pub fn with_statement_timeout(mut self, statement_timeout: Duration) -> Self {
        self.statement_timeout = statement_timeout;
        self
    }

    /// Awaits one query or write under the statement timeout.
    pub async fn bounded<T, F>(&self, call: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, DbErr>>,
    {
        with_statement_timeout(self.statement_timeout, call).await
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_call_reports_the_configured_limit() {
        let base = BaseRepository::new(Arc::new(DatabaseConnection::Disconnected))
            .with_statement_timeout(Duration::from_millis(10));
        let err = base
            .bounded(std::future::pending::<Result<(), DbErr>>())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ServiceError::DatabaseTimeout(d) if d == Duration::from_millis(10)),
            "{:?}",
            err
        );
    }

    #[tokio::test]
    async fn disconnected_pool_fails_fast_inside_the_bound() {
        use crate::entities::order::Entity as Order;
        use sea_orm::EntityTrait;

        let base = BaseRepository::new(Arc::new(DatabaseConnection::Disconnected));
        let err = base
            .bounded(Order::find().one(base.get_db()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DatabaseError(_)), "{:?}", err);
    }
}
