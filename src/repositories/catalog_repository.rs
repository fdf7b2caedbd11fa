use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::entities::{product, user_address};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Read-only view of the catalog and saved addresses, used by renewals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Current catalog entry, `None` when deleted or deactivated.
    async fn find_product(&self, product_id: String)
        -> Result<Option<product::Model>, ServiceError>;

    async fn find_address(
        &self,
        address_id: Uuid,
        owner: Uuid,
    ) -> Result<Option<user_address::Model>, ServiceError>;

    async fn default_address(
        &self,
        owner: Uuid,
    ) -> Result<Option<user_address::Model>, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct CatalogRepository {
    base: BaseRepository,
}

impl CatalogRepository {
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
impl CatalogStore for CatalogRepository {
    async fn find_product(
        &self,
        product_id: String,
    ) -> Result<Option<product::Model>, ServiceError> {
        self.base
            .bounded(
                product::Entity::find_by_id(product_id)
                    .filter(product::Column::IsActive.eq(true))
                    .one(self.base.get_db()),
            )
            .await
    }

    async fn find_address(
        &self,
        address_id: Uuid,
        owner: Uuid,
    ) -> Result<Option<user_address::Model>, ServiceError> {
        self.base
            .bounded(
                user_address::Entity::find_by_id(address_id)
                    .filter(user_address::Column::UserId.eq(owner))
                    .one(self.base.get_db()),
            )
            .await
    }

    async fn default_address(
        &self,
        owner: Uuid,
    ) -> Result<Option<user_address::Model>, ServiceError> {
        self.base
            .bounded(
                user_address::Entity::find()
                    .filter(user_address::Column::UserId.eq(owner))
                    .filter(user_address::Column::IsDefault.eq(true))
                    .order_by_desc(user_address::Column::CreatedAt)
                    .one(self.base.get_db()),
            )
            .await
    }
}
