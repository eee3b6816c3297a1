pub use sea_orm_migration::prelude::*;

mod m20260901_000001_create_users_and_plans;
mod m20260901_000002_create_orders;
mod m20260901_000003_create_subscriptions_and_invoices;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260901_000001_create_users_and_plans::Migration),
            Box::new(m20260901_000002_create_orders::Migration),
            Box::new(m20260901_000003_create_subscriptions_and_invoices::Migration),
        ]
    }
}
