use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260101_000001_create_orders_table::Migration),
            Box::new(m20260101_000002_create_order_items_table::Migration),
            Box::new(m20260101_000003_create_catalog_tables::Migration),
            Box::new(m20260101_000004_create_subscriptions_table::Migration),
            Box::new(m20260101_000005_create_audit_events_table::Migration),
            Box::new(m20260101_000006_create_rate_limit_counters_table::Migration),
        ]
    }
}

mod m20260101_000001_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000001_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string_len(50)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(
                            ColumnDef::new(Orders::PaymentStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::PaymentMethod)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::Subtotal).big_integer().not_null())
                        .col(
                            ColumnDef::new(Orders::DiscountAmount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippingAmount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Total).big_integer().not_null())
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Orders::CouponCode).string_len(50).null())
                        .col(ColumnDef::new(Orders::ShippingAddress).json().not_null())
                        .col(
                            ColumnDef::new(Orders::GatewayOrderReference)
                                .string()
                                .null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Orders::GatewayPaymentReference)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::SubscriptionId).uuid().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id_created_at")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Orders {
        Table,
        Id,
        OrderNumber,
        UserId,
        Status,
        PaymentStatus,
        PaymentMethod,
        Subtotal,
        DiscountAmount,
        ShippingAmount,
        Total,
        Currency,
        CouponCode,
        ShippingAddress,
        GatewayOrderReference,
        GatewayPaymentReference,
        SubscriptionId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20260101_000002_create_order_items_table {
    use super::m20260101_000001_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000002_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).string().not_null())
                        .col(ColumnDef::new(OrderItems::ProductName).string().not_null())
                        .col(ColumnDef::new(OrderItems::ProductImage).string().null())
                        .col(
                            ColumnDef::new(OrderItems::UnitPrice)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::LineTotal)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::IsSubscription)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(OrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        ProductName,
        ProductImage,
        UnitPrice,
        Quantity,
        LineTotal,
        IsSubscription,
        CreatedAt,
    }
}

mod m20260101_000003_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000003_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Price).big_integer().not_null())
                        .col(ColumnDef::new(Products::ImageUrl).string().null())
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(UserAddresses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UserAddresses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UserAddresses::UserId).uuid().not_null())
                        .col(ColumnDef::new(UserAddresses::FullName).string().not_null())
                        .col(ColumnDef::new(UserAddresses::Email).string().not_null())
                        .col(ColumnDef::new(UserAddresses::Phone).string().not_null())
                        .col(
                            ColumnDef::new(UserAddresses::AddressLine1)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UserAddresses::AddressLine2).string().null())
                        .col(ColumnDef::new(UserAddresses::City).string().not_null())
                        .col(ColumnDef::new(UserAddresses::State).string().not_null())
                        .col(
                            ColumnDef::new(UserAddresses::PostalCode)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UserAddresses::Country).string().not_null())
                        .col(
                            ColumnDef::new(UserAddresses::IsDefault)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(UserAddresses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_user_addresses_user_id")
                        .table(UserAddresses::Table)
                        .col(UserAddresses::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(UserAddresses::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        Name,
        Price,
        ImageUrl,
        IsActive,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum UserAddresses {
        Table,
        Id,
        UserId,
        FullName,
        Email,
        Phone,
        AddressLine1,
        AddressLine2,
        City,
        State,
        PostalCode,
        Country,
        IsDefault,
        CreatedAt,
    }
}

mod m20260101_000004_create_subscriptions_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000004_create_subscriptions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Subscriptions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Subscriptions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Subscriptions::UserId).uuid().not_null())
                        .col(ColumnDef::new(Subscriptions::ProductId).string().not_null())
                        .col(
                            ColumnDef::new(Subscriptions::Quantity)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(ColumnDef::new(Subscriptions::Plan).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Subscriptions::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Subscriptions::LastDeliveryDate).date().null())
                        .col(
                            ColumnDef::new(Subscriptions::NextDeliveryDate)
                                .date()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Subscriptions::AddressId).uuid().null())
                        .col(
                            ColumnDef::new(Subscriptions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Subscriptions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_subscriptions_status_next_delivery")
                        .table(Subscriptions::Table)
                        .col(Subscriptions::Status)
                        .col(Subscriptions::NextDeliveryDate)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Subscriptions {
        Table,
        Id,
        UserId,
        ProductId,
        Quantity,
        Plan,
        Status,
        LastDeliveryDate,
        NextDeliveryDate,
        AddressId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20260101_000005_create_audit_events_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000005_create_audit_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AuditEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AuditEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AuditEvents::ActorId).uuid().null())
                        .col(ColumnDef::new(AuditEvents::Action).string_len(64).not_null())
                        .col(
                            ColumnDef::new(AuditEvents::Severity)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AuditEvents::EntityType)
                                .string_len(64)
                                .not_null(),
                        )
                        .col(ColumnDef::new(AuditEvents::EntityId).string().null())
                        .col(ColumnDef::new(AuditEvents::OldValues).json().null())
                        .col(ColumnDef::new(AuditEvents::NewValues).json().null())
                        .col(ColumnDef::new(AuditEvents::IpAddress).string().null())
                        .col(ColumnDef::new(AuditEvents::UserAgent).string().null())
                        .col(ColumnDef::new(AuditEvents::Metadata).json().not_null())
                        .col(
                            ColumnDef::new(AuditEvents::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_audit_events_entity")
                        .table(AuditEvents::Table)
                        .col(AuditEvents::EntityType)
                        .col(AuditEvents::EntityId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AuditEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum AuditEvents {
        Table,
        Id,
        ActorId,
        Action,
        Severity,
        EntityType,
        EntityId,
        OldValues,
        NewValues,
        IpAddress,
        UserAgent,
        Metadata,
        CreatedAt,
    }
}

mod m20260101_000006_create_rate_limit_counters_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000006_create_rate_limit_counters_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RateLimitCounters::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RateLimitCounters::BucketKey)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RateLimitCounters::Identity)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RateLimitCounters::Endpoint)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RateLimitCounters::WindowStart)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RateLimitCounters::RequestCount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RateLimitCounters::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_rate_limit_counters_expires_at")
                        .table(RateLimitCounters::Table)
                        .col(RateLimitCounters::ExpiresAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RateLimitCounters::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum RateLimitCounters {
        Table,
        BucketKey,
        Identity,
        Endpoint,
        WindowStart,
        RequestCount,
        ExpiresAt,
    }
}
