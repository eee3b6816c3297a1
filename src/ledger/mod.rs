//! Transactional persistence context for orders, subscriptions and invoices.
//!
//! Services never hold a database handle directly. They receive an
//! `Arc<dyn LedgerStore>` constructed in `main`, open a [`LedgerTxn`] for every
//! mutation and either commit or roll it back. Writes made through a
//! transaction are invisible to other readers until `commit` returns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::entities::{
    OrderStatus, PaymentGateway, PlanType, invoice_entity, order_entity, plan_entity,
    subscription_entity, user_entity,
};
use crate::error::{AppError, AppResult};

#[cfg(test)]
pub mod memory;
pub mod sea_orm_ledger;

#[cfg(test)]
pub use memory::{FailPoint, MemoryLedger};
pub use sea_orm_ledger::SeaOrmLedger;

pub type SharedLedger = Arc<dyn LedgerStore>;

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub status: OrderStatus,
    pub amount: i64,
    pub currency: String,
    pub payment_gateway: PaymentGateway,
    pub plan_id: i64,
    pub reference_id: String,
    pub external_subscription_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: i64,
    pub plan_id: Option<i64>,
    pub plan_type: PlanType,
    pub plan_snapshot: serde_json::Value,
    pub payment_gateway: Option<PaymentGateway>,
    pub reference_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub seats: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub user_id: i64,
    pub invoice_id: String,
    pub payment_gateway: PaymentGateway,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub amount: i64,
    pub currency: String,
    pub document_url: Option<String>,
    pub subscription_id: i64,
}

/// Result of inserting an invoice row under the (invoice id, gateway)
/// uniqueness constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertInvoiceOutcome {
    Inserted(invoice_entity::Model),
    /// Another transaction recorded the same invoice first.
    Duplicate,
}

/// Inclusive `created_at` bounds for the pending-order sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepWindow {
    pub created_from: DateTime<Utc>,
    pub created_to: DateTime<Utc>,
}

/// Storage failures inside a transaction surface as `TransactionAborted`;
/// domain errors (`NotFound`, `Conflict`, ...) pass through unchanged.
pub fn into_aborted(operation: &str, err: AppError) -> AppError {
    match err {
        AppError::DatabaseError(e) => {
            AppError::TransactionAborted(format!("{operation}: {e}"))
        }
        other => other,
    }
}

/// Commits on `Ok`, rolls back on `Err`.
pub async fn finish_txn<T>(
    txn: Box<dyn LedgerTxn>,
    result: AppResult<T>,
    operation: &str,
) -> AppResult<T> {
    match result {
        Ok(value) => {
            txn.commit()
                .await
                .map_err(|e| into_aborted(operation, e))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(e) = txn.rollback().await {
                log::warn!("Rollback of {operation} failed: {e}");
            }
            log::warn!("{operation} aborted: {err}");
            Err(into_aborted(operation, err))
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTxn>>;

    async fn find_order_by_reference(
        &self,
        reference_id: &str,
    ) -> AppResult<Option<order_entity::Model>>;

    async fn find_order_by_external_subscription(
        &self,
        gateway: PaymentGateway,
        external_subscription_id: &str,
    ) -> AppResult<Option<order_entity::Model>>;

    /// `PENDING` orders of non-admin gateways created inside the window,
    /// oldest first.
    async fn list_sweepable_orders(
        &self,
        window: SweepWindow,
    ) -> AppResult<Vec<order_entity::Model>>;

    /// `SUCCESS` orders of non-admin gateways created inside the window that
    /// have no subscription carrying their reference, oldest first.
    async fn list_ungranted_orders(
        &self,
        window: SweepWindow,
    ) -> AppResult<Vec<order_entity::Model>>;

    /// Subscription created from the order with this reference, if any.
    async fn find_order_subscription(
        &self,
        user_id: i64,
        reference_id: &str,
    ) -> AppResult<Option<subscription_entity::Model>>;

    /// Newest first. Returns the page and the total row count.
    async fn list_user_orders(
        &self,
        user_id: i64,
        offset: u64,
        limit: u64,
    ) -> AppResult<(Vec<order_entity::Model>, u64)>;

    async fn find_user(&self, user_id: i64) -> AppResult<Option<user_entity::Model>>;

    async fn find_plan(&self, plan_id: i64) -> AppResult<Option<plan_entity::Model>>;

    async fn find_subscription(
        &self,
        subscription_id: i64,
    ) -> AppResult<Option<subscription_entity::Model>>;
}

#[async_trait]
pub trait LedgerTxn: Send {
    /// Reads the order and holds a write lock on it until the transaction ends.
    async fn lock_order_by_reference(
        &mut self,
        reference_id: &str,
    ) -> AppResult<Option<order_entity::Model>>;

    async fn insert_order(&mut self, order: NewOrder) -> AppResult<order_entity::Model>;

    async fn update_order_status(
        &mut self,
        order_id: i64,
        status: OrderStatus,
        external_subscription_id: Option<String>,
    ) -> AppResult<order_entity::Model>;

    async fn find_invoice(
        &mut self,
        invoice_id: &str,
        gateway: PaymentGateway,
    ) -> AppResult<Option<invoice_entity::Model>>;

    async fn insert_invoice(&mut self, invoice: NewInvoice) -> AppResult<InsertInvoiceOutcome>;

    async fn find_subscription_by_reference(
        &mut self,
        user_id: i64,
        reference_id: &str,
    ) -> AppResult<Option<subscription_entity::Model>>;

    async fn find_subscription(
        &mut self,
        subscription_id: i64,
    ) -> AppResult<Option<subscription_entity::Model>>;

    async fn list_user_subscriptions(
        &mut self,
        user_id: i64,
    ) -> AppResult<Vec<subscription_entity::Model>>;

    async fn insert_subscription(
        &mut self,
        subscription: NewSubscription,
    ) -> AppResult<subscription_entity::Model>;

    async fn update_subscription_period(
        &mut self,
        subscription_id: i64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> AppResult<subscription_entity::Model>;

    async fn mark_subscription_cancel_at_period_end(
        &mut self,
        subscription_id: i64,
    ) -> AppResult<subscription_entity::Model>;

    /// Active plan matching the gateway price, narrowed by product when given.
    async fn find_plan_by_price(
        &mut self,
        product_id: Option<&str>,
        price_id: &str,
    ) -> AppResult<Option<plan_entity::Model>>;

    async fn find_plan(&mut self, plan_id: i64) -> AppResult<Option<plan_entity::Model>>;

    async fn find_active_plan_by_type(
        &mut self,
        plan_type: PlanType,
    ) -> AppResult<Option<plan_entity::Model>>;

    /// Reads the user and holds a write lock on it until the transaction ends.
    async fn lock_user(&mut self, user_id: i64) -> AppResult<Option<user_entity::Model>>;

    async fn set_user_current_subscription(
        &mut self,
        user_id: i64,
        subscription_id: i64,
    ) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;

    async fn rollback(self: Box<Self>) -> AppResult<()>;
}
