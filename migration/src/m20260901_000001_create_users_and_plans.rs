use sea_orm_migration::prelude::extension::postgres::Type;
use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Email,
    Name,
    CurrentSubscriptionId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SubscriptionPlans {
    Table,
    Id,
    Name,
    PlanType,
    ProductId,
    PriceId,
    Price,
    Currency,
    Features,
    BillingInterval,
    IntervalCount,
    Seats,
    IsActive,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(Alias::new("plan_type"))
                    .values(vec![Alias::new("freemium"), Alias::new("premium")])
                    .to_owned(),
            )
            .await?;
        manager
            .create_type(
                Type::create()
                    .as_enum(Alias::new("billing_interval"))
                    .values(vec![
                        Alias::new("day"),
                        Alias::new("month"),
                        Alias::new("year"),
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Users::Email).string_len(255).not_null())
                    .col(ColumnDef::new(Users::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Users::CurrentSubscriptionId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SubscriptionPlans::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SubscriptionPlans::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlans::Name)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlans::PlanType)
                            .custom(Alias::new("plan_type"))
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlans::ProductId)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlans::PriceId)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlans::Price)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlans::Currency)
                            .string_len(10)
                            .not_null()
                            .default("usd"),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlans::Features)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'[]'::jsonb")),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlans::BillingInterval)
                            .custom(Alias::new("billing_interval"))
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlans::IntervalCount)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlans::Seats)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlans::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlans::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_subscription_plans_product_price")
                    .table(SubscriptionPlans::Table)
                    .col(SubscriptionPlans::ProductId)
                    .col(SubscriptionPlans::PriceId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .if_exists()
                    .table(SubscriptionPlans::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(Users::Table).to_owned())
            .await?;
        manager
            .drop_type(Type::drop().name(Alias::new("billing_interval")).to_owned())
            .await?;
        manager
            .drop_type(Type::drop().name(Alias::new("plan_type")).to_owned())
            .await?;
        Ok(())
    }
}
