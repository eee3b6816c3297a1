use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    Id,
    UserId,
    PlanId,
    PlanType,
    PlanSnapshot,
    PaymentGateway,
    ReferenceId,
    ExternalSubscriptionId,
    Seats,
    StartsAt,
    EndsAt,
    CancelAtPeriodEnd,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Invoices {
    Table,
    Id,
    UserId,
    InvoiceId,
    PaymentGateway,
    PeriodStart,
    PeriodEnd,
    Amount,
    Currency,
    DocumentUrl,
    SubscriptionId,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

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
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Subscriptions::PlanId).big_integer().null())
                    .col(
                        ColumnDef::new(Subscriptions::PlanType)
                            .custom(Alias::new("plan_type"))
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::PlanSnapshot)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::PaymentGateway)
                            .custom(Alias::new("payment_gateway"))
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::ReferenceId)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::ExternalSubscriptionId)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::Seats)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::StartsAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::EndsAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::CancelAtPeriodEnd)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::UpdatedAt)
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
                    .name("idx_subscriptions_user_reference")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::UserId)
                    .col(Subscriptions::ReferenceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Invoices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Invoices::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Invoices::UserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Invoices::InvoiceId)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Invoices::PaymentGateway)
                            .custom(Alias::new("payment_gateway"))
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Invoices::PeriodStart)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Invoices::PeriodEnd)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Invoices::Amount).big_integer().not_null())
                    .col(ColumnDef::new(Invoices::Currency).string_len(10).not_null())
                    .col(ColumnDef::new(Invoices::DocumentUrl).text().null())
                    .col(
                        ColumnDef::new(Invoices::SubscriptionId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Invoices::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        // idempotency key for subscription grants
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_invoices_invoice_gateway")
                    .table(Invoices::Table)
                    .col(Invoices::InvoiceId)
                    .col(Invoices::PaymentGateway)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().if_exists().table(Invoices::Table).to_owned())
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .if_exists()
                    .table(Subscriptions::Table)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
