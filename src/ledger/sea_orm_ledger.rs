use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
    TransactionTrait,
};
use std::collections::HashSet;
use std::sync::Arc;

use super::{
    InsertInvoiceOutcome, LedgerStore, LedgerTxn, NewInvoice, NewOrder, NewSubscription,
    SharedLedger, SweepWindow,
};
use crate::entities::{
    OrderStatus, PaymentGateway, PlanType, invoice_entity as invoices, order_entity as orders,
    plan_entity as plans, subscription_entity as subscriptions, user_entity as users,
};
use crate::error::{AppError, AppResult};

/// PostgreSQL-backed ledger.
#[derive(Clone)]
pub struct SeaOrmLedger {
    pool: DatabaseConnection,
}

impl SeaOrmLedger {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    pub fn shared(self) -> SharedLedger {
        Arc::new(self)
    }
}

#[async_trait]
impl LedgerStore for SeaOrmLedger {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTxn>> {
        let txn = self.pool.begin().await?;
        Ok(Box::new(SeaOrmTxn { txn }))
    }

    async fn find_order_by_reference(
        &self,
        reference_id: &str,
    ) -> AppResult<Option<orders::Model>> {
        Ok(orders::Entity::find()
            .filter(orders::Column::ReferenceId.eq(reference_id))
            .one(&self.pool)
            .await?)
    }

    async fn find_order_by_external_subscription(
        &self,
        gateway: PaymentGateway,
        external_subscription_id: &str,
    ) -> AppResult<Option<orders::Model>> {
        Ok(orders::Entity::find()
            .filter(orders::Column::PaymentGateway.eq(gateway))
            .filter(orders::Column::ExternalSubscriptionId.eq(external_subscription_id))
            .order_by_asc(orders::Column::CreatedAt)
            .one(&self.pool)
            .await?)
    }

    async fn list_sweepable_orders(&self, window: SweepWindow) -> AppResult<Vec<orders::Model>> {
        Ok(orders::Entity::find()
            .filter(orders::Column::Status.eq(OrderStatus::Pending))
            .filter(orders::Column::PaymentGateway.ne(PaymentGateway::Admin))
            .filter(orders::Column::CreatedAt.between(window.created_from, window.created_to))
            .order_by_asc(orders::Column::CreatedAt)
            .all(&self.pool)
            .await?)
    }

    async fn list_ungranted_orders(&self, window: SweepWindow) -> AppResult<Vec<orders::Model>> {
        let mut rows = orders::Entity::find()
            .filter(orders::Column::Status.eq(OrderStatus::Success))
            .filter(orders::Column::PaymentGateway.ne(PaymentGateway::Admin))
            .filter(orders::Column::CreatedAt.between(window.created_from, window.created_to))
            .order_by_asc(orders::Column::CreatedAt)
            .order_by_asc(orders::Column::Id)
            .all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Ok(rows);
        }

        let references: Vec<String> = rows.iter().map(|o| o.reference_id.clone()).collect();
        let granted: HashSet<(i64, String)> = subscriptions::Entity::find()
            .filter(subscriptions::Column::ReferenceId.is_in(references))
            .all(&self.pool)
            .await?
            .into_iter()
            .filter_map(|s| s.reference_id.map(|r| (s.user_id, r)))
            .collect();

        rows.retain(|o| !granted.contains(&(o.user_id, o.reference_id.clone())));
        Ok(rows)
    }

    async fn find_order_subscription(
        &self,
        user_id: i64,
        reference_id: &str,
    ) -> AppResult<Option<subscriptions::Model>> {
        Ok(subscriptions::Entity::find()
            .filter(subscriptions::Column::UserId.eq(user_id))
            .filter(subscriptions::Column::ReferenceId.eq(reference_id))
            .one(&self.pool)
            .await?)
    }

    async fn list_user_orders(
        &self,
        user_id: i64,
        offset: u64,
        limit: u64,
    ) -> AppResult<(Vec<orders::Model>, u64)> {
        let query = orders::Entity::find().filter(orders::Column::UserId.eq(user_id));
        let total = query.clone().count(&self.pool).await?;
        let items = query
            .order_by_desc(orders::Column::CreatedAt)
            .order_by_desc(orders::Column::Id)
            .offset(offset)
            .limit(limit)
            .all(&self.pool)
            .await?;
        Ok((items, total))
    }

    async fn find_user(&self, user_id: i64) -> AppResult<Option<users::Model>> {
        Ok(users::Entity::find_by_id(user_id).one(&self.pool).await?)
    }

    async fn find_plan(&self, plan_id: i64) -> AppResult<Option<plans::Model>> {
        Ok(plans::Entity::find_by_id(plan_id).one(&self.pool).await?)
    }

    async fn find_subscription(
        &self,
        subscription_id: i64,
    ) -> AppResult<Option<subscriptions::Model>> {
        Ok(subscriptions::Entity::find_by_id(subscription_id)
            .one(&self.pool)
            .await?)
    }
}

pub struct SeaOrmTxn {
    txn: DatabaseTransaction,
}

#[async_trait]
impl LedgerTxn for SeaOrmTxn {
    async fn lock_order_by_reference(
        &mut self,
        reference_id: &str,
    ) -> AppResult<Option<orders::Model>> {
        Ok(orders::Entity::find()
            .filter(orders::Column::ReferenceId.eq(reference_id))
            .lock_exclusive()
            .one(&self.txn)
            .await?)
    }

    async fn insert_order(&mut self, order: NewOrder) -> AppResult<orders::Model> {
        let now = Utc::now();
        let model = orders::ActiveModel {
            user_id: Set(order.user_id),
            status: Set(order.status),
            amount: Set(order.amount),
            currency: Set(order.currency),
            payment_gateway: Set(order.payment_gateway),
            plan_id: Set(order.plan_id),
            reference_id: Set(order.reference_id),
            external_subscription_id: Set(order.external_subscription_id),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.txn)
        .await?;
        Ok(model)
    }

    async fn update_order_status(
        &mut self,
        order_id: i64,
        status: OrderStatus,
        external_subscription_id: Option<String>,
    ) -> AppResult<orders::Model> {
        let order = orders::Entity::find_by_id(order_id)
            .one(&self.txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))?;

        let mut active = order.into_active_model();
        active.status = Set(status);
        if let Some(ext) = external_subscription_id {
            active.external_subscription_id = Set(Some(ext));
        }
        active.updated_at = Set(Utc::now());
        Ok(active.update(&self.txn).await?)
    }

    async fn find_invoice(
        &mut self,
        invoice_id: &str,
        gateway: PaymentGateway,
    ) -> AppResult<Option<invoices::Model>> {
        Ok(invoices::Entity::find()
            .filter(invoices::Column::InvoiceId.eq(invoice_id))
            .filter(invoices::Column::PaymentGateway.eq(gateway))
            .one(&self.txn)
            .await?)
    }

    async fn insert_invoice(&mut self, invoice: NewInvoice) -> AppResult<InsertInvoiceOutcome> {
        let active = invoices::ActiveModel {
            user_id: Set(invoice.user_id),
            invoice_id: Set(invoice.invoice_id),
            payment_gateway: Set(invoice.payment_gateway),
            period_start: Set(invoice.period_start),
            period_end: Set(invoice.period_end),
            amount: Set(invoice.amount),
            currency: Set(invoice.currency),
            document_url: Set(invoice.document_url),
            subscription_id: Set(invoice.subscription_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        match active.insert(&self.txn).await {
            Ok(model) => Ok(InsertInvoiceOutcome::Inserted(model)),
            Err(err) => match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => Ok(InsertInvoiceOutcome::Duplicate),
                _ => Err(err.into()),
            },
        }
    }

    async fn find_subscription_by_reference(
        &mut self,
        user_id: i64,
        reference_id: &str,
    ) -> AppResult<Option<subscriptions::Model>> {
        Ok(subscriptions::Entity::find()
            .filter(subscriptions::Column::UserId.eq(user_id))
            .filter(subscriptions::Column::ReferenceId.eq(reference_id))
            .lock_exclusive()
            .one(&self.txn)
            .await?)
    }

    async fn find_subscription(
        &mut self,
        subscription_id: i64,
    ) -> AppResult<Option<subscriptions::Model>> {
        Ok(subscriptions::Entity::find_by_id(subscription_id)
            .one(&self.txn)
            .await?)
    }

    async fn list_user_subscriptions(
        &mut self,
        user_id: i64,
    ) -> AppResult<Vec<subscriptions::Model>> {
        Ok(subscriptions::Entity::find()
            .filter(subscriptions::Column::UserId.eq(user_id))
            .order_by_desc(subscriptions::Column::CreatedAt)
            .all(&self.txn)
            .await?)
    }

    async fn insert_subscription(
        &mut self,
        subscription: NewSubscription,
    ) -> AppResult<subscriptions::Model> {
        let now = Utc::now();
        let model = subscriptions::ActiveModel {
            user_id: Set(subscription.user_id),
            plan_id: Set(subscription.plan_id),
            plan_type: Set(subscription.plan_type),
            plan_snapshot: Set(subscription.plan_snapshot),
            payment_gateway: Set(subscription.payment_gateway),
            reference_id: Set(subscription.reference_id),
            external_subscription_id: Set(subscription.external_subscription_id),
            seats: Set(subscription.seats),
            starts_at: Set(subscription.starts_at),
            ends_at: Set(subscription.ends_at),
            cancel_at_period_end: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.txn)
        .await?;
        Ok(model)
    }

    async fn update_subscription_period(
        &mut self,
        subscription_id: i64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> AppResult<subscriptions::Model> {
        let sub = subscriptions::Entity::find_by_id(subscription_id)
            .one(&self.txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Subscription {subscription_id} not found")))?;

        let mut active = sub.into_active_model();
        active.starts_at = Set(starts_at);
        active.ends_at = Set(ends_at);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&self.txn).await?)
    }

    async fn mark_subscription_cancel_at_period_end(
        &mut self,
        subscription_id: i64,
    ) -> AppResult<subscriptions::Model> {
        let sub = subscriptions::Entity::find_by_id(subscription_id)
            .one(&self.txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Subscription {subscription_id} not found")))?;

        let mut active = sub.into_active_model();
        active.cancel_at_period_end = Set(true);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&self.txn).await?)
    }

    async fn find_plan_by_price(
        &mut self,
        product_id: Option<&str>,
        price_id: &str,
    ) -> AppResult<Option<plans::Model>> {
        let mut query = plans::Entity::find()
            .filter(plans::Column::PriceId.eq(price_id))
            .filter(plans::Column::IsActive.eq(true));
        if let Some(product_id) = product_id {
            query = query.filter(plans::Column::ProductId.eq(product_id));
        }
        Ok(query.one(&self.txn).await?)
    }

    async fn find_plan(&mut self, plan_id: i64) -> AppResult<Option<plans::Model>> {
        Ok(plans::Entity::find_by_id(plan_id).one(&self.txn).await?)
    }

    async fn find_active_plan_by_type(
        &mut self,
        plan_type: PlanType,
    ) -> AppResult<Option<plans::Model>> {
        Ok(plans::Entity::find()
            .filter(plans::Column::PlanType.eq(plan_type))
            .filter(plans::Column::IsActive.eq(true))
            .order_by_asc(plans::Column::Id)
            .one(&self.txn)
            .await?)
    }

    async fn lock_user(&mut self, user_id: i64) -> AppResult<Option<users::Model>> {
        Ok(users::Entity::find_by_id(user_id)
            .lock_exclusive()
            .one(&self.txn)
            .await?)
    }

    async fn set_user_current_subscription(
        &mut self,
        user_id: i64,
        subscription_id: i64,
    ) -> AppResult<()> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;

        let mut active = user.into_active_model();
        active.current_subscription_id = Set(Some(subscription_id));
        active.update(&self.txn).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.txn.rollback().await?;
        Ok(())
    }
}
