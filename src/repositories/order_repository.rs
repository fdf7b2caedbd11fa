use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::entities::order::{self, Column, Entity as Order};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::errors::ServiceError;
use crate::models::{OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress};
use crate::repositories::Repository;

use super::BaseRepository;

pub type OrderWithItems = (order::Model, Vec<order_item::Model>);

/// Everything needed to write a new order row.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub total: i64,
    pub currency: String,
    pub coupon_code: Option<String>,
    pub shipping_address: ShippingAddress,
    pub subscription_id: Option<Uuid>,
}

/// Frozen line snapshot; prices in minor units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: String,
    pub product_name: String,
    pub product_image: Option<String>,
    pub unit_price: i64,
    pub quantity: i32,
    pub line_total: i64,
    pub is_subscription: bool,
}

/// Partial update applied by `update_order`. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    /// Only applied while the stored reference is still empty
    pub gateway_order_reference: Option<String>,
    pub gateway_payment_reference: Option<String>,
}

/// Outcome of the conditional paid transition.
#[derive(Debug, Clone)]
pub enum PaymentConfirmation {
    /// This call moved the order to paid.
    Confirmed(order::Model),
    /// The order was already paid; nothing was written.
    AlreadyPaid(order::Model),
}

/// Storage operations on orders and their line items.
///
/// Every mutation that acts on behalf of a customer filters by owner as well as id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, new_order: NewOrder) -> Result<order::Model, ServiceError>;

    async fn create_order_items(
        &self,
        order_id: Uuid,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<order_item::Model>, ServiceError>;

    async fn update_order(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: OrderPatch,
    ) -> Result<order::Model, ServiceError>;

    /// Sets payment_status=paid, status=confirmed in one conditional write.
    ///
    /// Only an order whose status and payment status are both pending settles. Failed,
    /// refunded and cancelled orders are reported as missing.
    async fn confirm_payment(
        &self,
        id: Uuid,
        owner: Uuid,
        gateway_order_reference: String,
        gateway_payment_reference: String,
    ) -> Result<PaymentConfirmation, ServiceError>;

    async fn delete_order(&self, id: Uuid) -> Result<(), ServiceError>;

    async fn delete_order_items(&self, order_id: Uuid) -> Result<u64, ServiceError>;

    async fn get_order_by_number(&self, order_number: String)
        -> Result<order::Model, ServiceError>;

    async fn get_order_with_items(&self, id: Uuid) -> Result<OrderWithItems, ServiceError>;

    /// The owner's order with its items. Orders without items, and online orders not yet
    /// linked to a gateway order, are reported as missing.
    async fn find_owned_by_number(
        &self,
        order_number: String,
        owner: Uuid,
    ) -> Result<OrderWithItems, ServiceError>;

    /// The owner's orders, newest first, with the same visibility rule as
    /// `find_owned_by_number`.
    async fn list_for_owner(&self, owner: Uuid) -> Result<Vec<OrderWithItems>, ServiceError>;
}

/// sea-orm backed order store
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub fn with_statement_timeout(mut self, statement_timeout: Duration) -> Self {
        self.base = self.base.with_statement_timeout(statement_timeout);
        self
    }

    fn not_found() -> ServiceError {
        ServiceError::NotFound("Order not found".to_string())
    }

    /// Online orders only show up for their owner once the gateway order is linked.
    fn visible_to_owner() -> Condition {
        Condition::any()
            .add(Column::PaymentMethod.ne(PaymentMethod::Online))
            .add(Column::GatewayOrderReference.is_not_null())
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    #[instrument(skip(self, new_order), fields(order_number = %new_order.order_number))]
    async fn create_order(&self, new_order: NewOrder) -> Result<order::Model, ServiceError> {
        let now = Utc::now();
        let model = order::ActiveModel {
            id: Set(new_order.id),
            order_number: Set(new_order.order_number),
            user_id: Set(new_order.user_id),
            status: Set(new_order.status),
            payment_status: Set(new_order.payment_status),
            payment_method: Set(new_order.payment_method),
            subtotal: Set(new_order.subtotal),
            discount_amount: Set(new_order.discount_amount),
            shipping_amount: Set(0),
            total: Set(new_order.total),
            currency: Set(new_order.currency),
            coupon_code: Set(new_order.coupon_code),
            shipping_address: Set(serde_json::to_value(&new_order.shipping_address)?),
            gateway_order_reference: Set(None),
            gateway_payment_reference: Set(None),
            subscription_id: Set(new_order.subscription_id),
            created_at: Set(now),
            updated_at: Set(now),
        };

        self.base.bounded(model.insert(self.base.get_db())).await
    }

    #[instrument(skip(self, items), fields(item_count = items.len()))]
    async fn create_order_items(
        &self,
        order_id: Uuid,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::validation("Order must contain at least one item"));
        }

        let now = Utc::now();
        let rows: Vec<order_item::Model> = items
            .into_iter()
            .map(|item| order_item::Model {
                id: Uuid::new_v4(),
                order_id,
                product_id: item.product_id,
                product_name: item.product_name,
                product_image: item.product_image,
                unit_price: item.unit_price,
                quantity: item.quantity,
                line_total: item.line_total,
                is_subscription: item.is_subscription,
                created_at: now,
            })
            .collect();

        let active: Vec<order_item::ActiveModel> = rows
            .iter()
            .map(|row| order_item::ActiveModel {
                id: Set(row.id),
                order_id: Set(row.order_id),
                product_id: Set(row.product_id.clone()),
                product_name: Set(row.product_name.clone()),
                product_image: Set(row.product_image.clone()),
                unit_price: Set(row.unit_price),
                quantity: Set(row.quantity),
                line_total: Set(row.line_total),
                is_subscription: Set(row.is_subscription),
                created_at: Set(row.created_at),
            })
            .collect();

        // Single multi-row INSERT: either every line lands or none does
        self.base
            .bounded(OrderItem::insert_many(active).exec_without_returning(self.base.get_db()))
            .await?;

        Ok(rows)
    }

    #[instrument(skip(self, patch))]
    async fn update_order(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: OrderPatch,
    ) -> Result<order::Model, ServiceError> {
        let mut changes = order::ActiveModel {
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        if let Some(status) = patch.status {
            changes.status = Set(status);
        }
        if let Some(payment_status) = patch.payment_status {
            changes.payment_status = Set(payment_status);
        }
        if let Some(reference) = &patch.gateway_payment_reference {
            changes.gateway_payment_reference = Set(Some(reference.clone()));
        }

        let mut update = Order::update_many()
            .filter(Column::Id.eq(id))
            .filter(Column::UserId.eq(owner));

        if let Some(reference) = &patch.gateway_order_reference {
            changes.gateway_order_reference = Set(Some(reference.clone()));
            update = update.filter(Column::GatewayOrderReference.is_null());
        }

        let result = self
            .base
            .bounded(update.set(changes).exec(self.base.get_db()))
            .await?;
        if result.rows_affected == 0 {
            return Err(Self::not_found());
        }

        self.base
            .bounded(
                Order::find_by_id(id)
                    .filter(Column::UserId.eq(owner))
                    .one(self.base.get_db()),
            )
            .await?
            .ok_or_else(Self::not_found)
    }

    #[instrument(skip(self, gateway_payment_reference))]
    async fn confirm_payment(
        &self,
        id: Uuid,
        owner: Uuid,
        gateway_order_reference: String,
        gateway_payment_reference: String,
    ) -> Result<PaymentConfirmation, ServiceError> {
        let changes = order::ActiveModel {
            status: Set(OrderStatus::Confirmed),
            payment_status: Set(PaymentStatus::Paid),
            gateway_payment_reference: Set(Some(gateway_payment_reference)),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };

        // Only one caller can win this write; the rest observe rows_affected == 0
        let result = self
            .base
            .bounded(
                Order::update_many()
                    .set(changes)
                    .filter(Column::Id.eq(id))
                    .filter(Column::UserId.eq(owner))
                    .filter(Column::GatewayOrderReference.eq(gateway_order_reference.clone()))
                    .filter(Column::Status.eq(OrderStatus::Pending))
                    .filter(Column::PaymentStatus.eq(PaymentStatus::Pending))
                    .exec(self.base.get_db()),
            )
            .await?;

        let current = self
            .base
            .bounded(
                Order::find_by_id(id)
                    .filter(Column::UserId.eq(owner))
                    .filter(Column::GatewayOrderReference.eq(gateway_order_reference))
                    .one(self.base.get_db()),
            )
            .await?
            .ok_or_else(Self::not_found)?;

        if result.rows_affected > 0 {
            Ok(PaymentConfirmation::Confirmed(current))
        } else if current.payment_status == PaymentStatus::Paid {
            Ok(PaymentConfirmation::AlreadyPaid(current))
        } else {
            Err(Self::not_found())
        }
    }

    #[instrument(skip(self))]
    async fn delete_order(&self, id: Uuid) -> Result<(), ServiceError> {
        self.base
            .bounded(Order::delete_by_id(id).exec(self.base.get_db()))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_order_items(&self, order_id: Uuid) -> Result<u64, ServiceError> {
        let result = self
            .base
            .bounded(
                OrderItem::delete_many()
                    .filter(order_item::Column::OrderId.eq(order_id))
                    .exec(self.base.get_db()),
            )
            .await?;
        Ok(result.rows_affected)
    }

    async fn get_order_by_number(
        &self,
        order_number: String,
    ) -> Result<order::Model, ServiceError> {
        self.base
            .bounded(
                Order::find()
                    .filter(Column::OrderNumber.eq(order_number))
                    .one(self.base.get_db()),
            )
            .await?
            .ok_or_else(Self::not_found)
    }

    async fn get_order_with_items(&self, id: Uuid) -> Result<OrderWithItems, ServiceError> {
        self.base
            .bounded(
                Order::find_by_id(id)
                    .find_with_related(OrderItem)
                    .all(self.base.get_db()),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(Self::not_found)
    }

    async fn find_owned_by_number(
        &self,
        order_number: String,
        owner: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        self.base
            .bounded(
                Order::find()
                    .filter(Column::OrderNumber.eq(order_number))
                    .filter(Column::UserId.eq(owner))
                    .filter(Self::visible_to_owner())
                    .find_with_related(OrderItem)
                    .all(self.base.get_db()),
            )
            .await?
            .into_iter()
            .find(|(_, items)| !items.is_empty())
            .ok_or_else(Self::not_found)
    }

    async fn list_for_owner(&self, owner: Uuid) -> Result<Vec<OrderWithItems>, ServiceError> {
        let orders = self
            .base
            .bounded(
                Order::find()
                    .filter(Column::UserId.eq(owner))
                    .filter(Self::visible_to_owner())
                    .order_by_desc(Column::CreatedAt)
                    .find_with_related(OrderItem)
                    .all(self.base.get_db()),
            )
            .await?;

        Ok(orders
            .into_iter()
            .filter(|(_, items)| !items.is_empty())
            .collect())
    }
}
