//! In-memory ledger for tests.
//!
//! Transactions take the single state lock for their whole lifetime and work
//! on a private copy that replaces the shared state on commit, so concurrent
//! transactions are serialised and uncommitted writes are never visible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    InsertInvoiceOutcome, LedgerStore, LedgerTxn, NewInvoice, NewOrder, NewSubscription,
    SharedLedger, SweepWindow,
};
use crate::entities::{
    OrderStatus, PaymentGateway, PlanType, invoice_entity as invoices, order_entity as orders,
    plan_entity as plans, subscription_entity as subscriptions, user_entity as users,
};
use crate::error::{AppError, AppResult};

/// Places where a test can make the next write fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    UpdateOrder,
    InsertSubscription,
    UpdateSubscription,
    InsertInvoice,
    /// The invoice insert loses the uniqueness race to another writer.
    DuplicateInvoice,
    SetUserSubscription,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<i64, users::Model>,
    plans: BTreeMap<i64, plans::Model>,
    orders: BTreeMap<i64, orders::Model>,
    subscriptions: BTreeMap<i64, subscriptions::Model>,
    invoices: BTreeMap<i64, invoices::Model>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn order_by_reference(&self, reference_id: &str) -> Option<&orders::Model> {
        self.orders.values().find(|o| o.reference_id == reference_id)
    }

    fn subscription_for_order(
        &self,
        user_id: i64,
        reference_id: &str,
    ) -> Option<&subscriptions::Model> {
        self.subscriptions
            .values()
            .find(|s| s.user_id == user_id && s.reference_id.as_deref() == Some(reference_id))
    }

    fn orders_in_window(&self, status: OrderStatus, window: SweepWindow) -> Vec<orders::Model> {
        let mut rows: Vec<_> = self
            .orders
            .values()
            .filter(|o| {
                o.status == status
                    && o.payment_gateway != PaymentGateway::Admin
                    && o.created_at >= window.created_from
                    && o.created_at <= window.created_to
            })
            .cloned()
            .collect();
        rows.sort_by_key(|o| (o.created_at, o.id));
        rows
    }
}

#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<MemoryState>>,
    fail_points: Arc<StdMutex<HashSet<FailPoint>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> SharedLedger {
        Arc::new(self.clone())
    }

    /// Every subsequent write at `point` fails until [`clear_failures`](Self::clear_failures).
    pub fn fail_at(&self, point: FailPoint) {
        if let Ok(mut points) = self.fail_points.lock() {
            points.insert(point);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut points) = self.fail_points.lock() {
            points.clear();
        }
    }

    pub async fn insert_user(&self, id: i64, email: &str) -> users::Model {
        let user = users::Model {
            id,
            email: email.to_string(),
            name: email.split('@').next().unwrap_or_default().to_string(),
            current_subscription_id: None,
            created_at: Utc::now(),
        };
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(id);
        state.users.insert(id, user.clone());
        user
    }

    pub async fn insert_plan(&self, plan: plans::Model) -> plans::Model {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(plan.id);
        state.plans.insert(plan.id, plan.clone());
        plan
    }

    pub async fn insert_order_at(&self, order: NewOrder, created_at: DateTime<Utc>) -> orders::Model {
        let mut state = self.state.lock().await;
        let model = build_order(state.next_id(), order, created_at);
        state.orders.insert(model.id, model.clone());
        model
    }

    pub async fn orders(&self) -> Vec<orders::Model> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    pub async fn subscriptions(&self) -> Vec<subscriptions::Model> {
        self.state.lock().await.subscriptions.values().cloned().collect()
    }

    pub async fn invoices(&self) -> Vec<invoices::Model> {
        self.state.lock().await.invoices.values().cloned().collect()
    }

    pub async fn user(&self, id: i64) -> Option<users::Model> {
        self.state.lock().await.users.get(&id).cloned()
    }
}

fn build_order(id: i64, order: NewOrder, created_at: DateTime<Utc>) -> orders::Model {
    orders::Model {
        id,
        user_id: order.user_id,
        status: order.status,
        amount: order.amount,
        currency: order.currency,
        payment_gateway: order.payment_gateway,
        plan_id: order.plan_id,
        reference_id: order.reference_id,
        external_subscription_id: order.external_subscription_id,
        created_at,
        updated_at: created_at,
    }
}

fn check(fail_points: &StdMutex<HashSet<FailPoint>>, point: FailPoint) -> AppResult<()> {
    let armed = fail_points
        .lock()
        .map(|points| points.contains(&point))
        .unwrap_or(false);
    if armed {
        Err(AppError::DatabaseError(DbErr::Custom(format!(
            "injected failure at {point:?}"
        ))))
    } else {
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTxn>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTxn {
            guard,
            work,
            fail_points: self.fail_points.clone(),
        }))
    }

    async fn find_order_by_reference(
        &self,
        reference_id: &str,
    ) -> AppResult<Option<orders::Model>> {
        Ok(self.state.lock().await.order_by_reference(reference_id).cloned())
    }

    async fn find_order_by_external_subscription(
        &self,
        gateway: PaymentGateway,
        external_subscription_id: &str,
    ) -> AppResult<Option<orders::Model>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| {
                o.payment_gateway == gateway
                    && o.external_subscription_id.as_deref() == Some(external_subscription_id)
            })
            .min_by_key(|o| o.created_at)
            .cloned())
    }

    async fn list_sweepable_orders(&self, window: SweepWindow) -> AppResult<Vec<orders::Model>> {
        let state = self.state.lock().await;
        Ok(state.orders_in_window(OrderStatus::Pending, window))
    }

    async fn list_ungranted_orders(&self, window: SweepWindow) -> AppResult<Vec<orders::Model>> {
        let state = self.state.lock().await;
        let mut rows = state.orders_in_window(OrderStatus::Success, window);
        rows.retain(|o| state.subscription_for_order(o.user_id, &o.reference_id).is_none());
        Ok(rows)
    }

    async fn find_order_subscription(
        &self,
        user_id: i64,
        reference_id: &str,
    ) -> AppResult<Option<subscriptions::Model>> {
        let state = self.state.lock().await;
        Ok(state.subscription_for_order(user_id, reference_id).cloned())
    }

    async fn list_user_orders(
        &self,
        user_id: i64,
        offset: u64,
        limit: u64,
    ) -> AppResult<(Vec<orders::Model>, u64)> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        let total = rows.len() as u64;
        let page = rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn find_user(&self, user_id: i64) -> AppResult<Option<users::Model>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn find_plan(&self, plan_id: i64) -> AppResult<Option<plans::Model>> {
        Ok(self.state.lock().await.plans.get(&plan_id).cloned())
    }

    async fn find_subscription(
        &self,
        subscription_id: i64,
    ) -> AppResult<Option<subscriptions::Model>> {
        Ok(self
            .state
            .lock()
            .await
            .subscriptions
            .get(&subscription_id)
            .cloned())
    }
}

struct MemoryTxn {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
    fail_points: Arc<StdMutex<HashSet<FailPoint>>>,
}

impl MemoryTxn {
    fn check(&self, point: FailPoint) -> AppResult<()> {
        check(&self.fail_points, point)
    }
}

#[async_trait]
impl LedgerTxn for MemoryTxn {
    async fn lock_order_by_reference(
        &mut self,
        reference_id: &str,
    ) -> AppResult<Option<orders::Model>> {
        Ok(self.work.order_by_reference(reference_id).cloned())
    }

    async fn insert_order(&mut self, order: NewOrder) -> AppResult<orders::Model> {
        if self.work.order_by_reference(&order.reference_id).is_some() {
            return Err(AppError::DatabaseError(DbErr::Custom(format!(
                "duplicate order reference {}",
                order.reference_id
            ))));
        }
        let model = build_order(self.work.next_id(), order, Utc::now());
        self.work.orders.insert(model.id, model.clone());
        Ok(model)
    }

    async fn update_order_status(
        &mut self,
        order_id: i64,
        status: OrderStatus,
        external_subscription_id: Option<String>,
    ) -> AppResult<orders::Model> {
        self.check(FailPoint::UpdateOrder)?;
        let order = self
            .work
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))?;
        order.status = status;
        if external_subscription_id.is_some() {
            order.external_subscription_id = external_subscription_id;
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn find_invoice(
        &mut self,
        invoice_id: &str,
        gateway: PaymentGateway,
    ) -> AppResult<Option<invoices::Model>> {
        Ok(self
            .work
            .invoices
            .values()
            .find(|i| i.invoice_id == invoice_id && i.payment_gateway == gateway)
            .cloned())
    }

    async fn insert_invoice(&mut self, invoice: NewInvoice) -> AppResult<InsertInvoiceOutcome> {
        self.check(FailPoint::InsertInvoice)?;
        let exists = self.work.invoices.values().any(|i| {
            i.invoice_id == invoice.invoice_id && i.payment_gateway == invoice.payment_gateway
        });
        if exists || self.check(FailPoint::DuplicateInvoice).is_err() {
            return Ok(InsertInvoiceOutcome::Duplicate);
        }
        let model = invoices::Model {
            id: self.work.next_id(),
            user_id: invoice.user_id,
            invoice_id: invoice.invoice_id,
            payment_gateway: invoice.payment_gateway,
            period_start: invoice.period_start,
            period_end: invoice.period_end,
            amount: invoice.amount,
            currency: invoice.currency,
            document_url: invoice.document_url,
            subscription_id: invoice.subscription_id,
            created_at: Utc::now(),
        };
        self.work.invoices.insert(model.id, model.clone());
        Ok(InsertInvoiceOutcome::Inserted(model))
    }

    async fn find_subscription_by_reference(
        &mut self,
        user_id: i64,
        reference_id: &str,
    ) -> AppResult<Option<subscriptions::Model>> {
        Ok(self.work.subscription_for_order(user_id, reference_id).cloned())
    }

    async fn find_subscription(
        &mut self,
        subscription_id: i64,
    ) -> AppResult<Option<subscriptions::Model>> {
        Ok(self.work.subscriptions.get(&subscription_id).cloned())
    }

    async fn list_user_subscriptions(
        &mut self,
        user_id: i64,
    ) -> AppResult<Vec<subscriptions::Model>> {
        Ok(self
            .work
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_subscription(
        &mut self,
        subscription: NewSubscription,
    ) -> AppResult<subscriptions::Model> {
        self.check(FailPoint::InsertSubscription)?;
        let now = Utc::now();
        let model = subscriptions::Model {
            id: self.work.next_id(),
            user_id: subscription.user_id,
            plan_id: subscription.plan_id,
            plan_type: subscription.plan_type,
            plan_snapshot: subscription.plan_snapshot,
            payment_gateway: subscription.payment_gateway,
            reference_id: subscription.reference_id,
            external_subscription_id: subscription.external_subscription_id,
            seats: subscription.seats,
            starts_at: subscription.starts_at,
            ends_at: subscription.ends_at,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        };
        self.work.subscriptions.insert(model.id, model.clone());
        Ok(model)
    }

    async fn update_subscription_period(
        &mut self,
        subscription_id: i64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> AppResult<subscriptions::Model> {
        self.check(FailPoint::UpdateSubscription)?;
        let sub = self
            .work
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| AppError::NotFound(format!("Subscription {subscription_id} not found")))?;
        sub.starts_at = starts_at;
        sub.ends_at = ends_at;
        sub.updated_at = Utc::now();
        Ok(sub.clone())
    }

    async fn mark_subscription_cancel_at_period_end(
        &mut self,
        subscription_id: i64,
    ) -> AppResult<subscriptions::Model> {
        self.check(FailPoint::UpdateSubscription)?;
        let sub = self
            .work
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| AppError::NotFound(format!("Subscription {subscription_id} not found")))?;
        sub.cancel_at_period_end = true;
        sub.updated_at = Utc::now();
        Ok(sub.clone())
    }

    async fn find_plan_by_price(
        &mut self,
        product_id: Option<&str>,
        price_id: &str,
    ) -> AppResult<Option<plans::Model>> {
        Ok(self
            .work
            .plans
            .values()
            .find(|p| {
                p.is_active
                    && p.price_id.as_deref() == Some(price_id)
                    && product_id.is_none_or(|prod| p.product_id.as_deref() == Some(prod))
            })
            .cloned())
    }

    async fn find_plan(&mut self, plan_id: i64) -> AppResult<Option<plans::Model>> {
        Ok(self.work.plans.get(&plan_id).cloned())
    }

    async fn find_active_plan_by_type(
        &mut self,
        plan_type: PlanType,
    ) -> AppResult<Option<plans::Model>> {
        Ok(self
            .work
            .plans
            .values()
            .find(|p| p.is_active && p.plan_type == plan_type)
            .cloned())
    }

    async fn lock_user(&mut self, user_id: i64) -> AppResult<Option<users::Model>> {
        Ok(self.work.users.get(&user_id).cloned())
    }

    async fn set_user_current_subscription(
        &mut self,
        user_id: i64,
        subscription_id: i64,
    ) -> AppResult<()> {
        self.check(FailPoint::SetUserSubscription)?;
        let user = self
            .work
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;
        user.current_subscription_id = Some(subscription_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.check(FailPoint::Commit)?;
        let MemoryTxn {
            mut guard, work, ..
        } = *self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(reference: &str) -> NewOrder {
        NewOrder {
            user_id: 1,
            status: OrderStatus::Pending,
            amount: 1999,
            currency: "usd".into(),
            payment_gateway: PaymentGateway::Stripe,
            plan_id: 10,
            reference_id: reference.into(),
            external_subscription_id: None,
        }
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let ledger = MemoryLedger::new();
        let mut txn = ledger.begin().await.unwrap();
        txn.insert_order(pending("cs_a")).await.unwrap();
        txn.commit().await.unwrap();
        assert!(ledger.find_order_by_reference("cs_a").await.unwrap().is_some());

        let mut txn = ledger.begin().await.unwrap();
        txn.insert_order(pending("cs_b")).await.unwrap();
        txn.rollback().await.unwrap();
        assert!(ledger.find_order_by_reference("cs_b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let ledger = MemoryLedger::new();
        {
            let mut txn = ledger.begin().await.unwrap();
            txn.insert_order(pending("cs_c")).await.unwrap();
        }
        assert!(ledger.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_invoice_uniqueness_reports_duplicate() {
        let ledger = MemoryLedger::new();
        let invoice = NewInvoice {
            user_id: 1,
            invoice_id: "in_1".into(),
            payment_gateway: PaymentGateway::Stripe,
            period_start: Utc::now(),
            period_end: Utc::now(),
            amount: 100,
            currency: "usd".into(),
            document_url: None,
            subscription_id: 1,
        };
        let mut txn = ledger.begin().await.unwrap();
        assert!(matches!(
            txn.insert_invoice(invoice.clone()).await.unwrap(),
            InsertInvoiceOutcome::Inserted(_)
        ));
        assert_eq!(
            txn.insert_invoice(invoice).await.unwrap(),
            InsertInvoiceOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn test_fail_point_surfaces_database_error() {
        let ledger = MemoryLedger::new();
        ledger.fail_at(FailPoint::Commit);
        let mut txn = ledger.begin().await.unwrap();
        txn.insert_order(pending("cs_d")).await.unwrap();
        assert!(matches!(
            txn.commit().await,
            Err(AppError::DatabaseError(_))
        ));
        assert!(ledger.orders().await.is_empty());
    }
}
