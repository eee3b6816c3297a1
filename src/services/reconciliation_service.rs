//! Order settlement and subscription grants.
//!
//! This service is the only writer of order status and the only creator of
//! paid subscriptions. Webhooks, user polls and the periodic sweep all funnel
//! into [`ReconciliationService::settle_order`] and
//! [`ReconciliationService::grant_or_renew_subscription`], each of which runs
//! in a single ledger transaction.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::config::ReconciliationConfig;
use crate::entities::{
    OrderStatus, PaymentGateway, order_entity as orders, plan_entity as plans,
    subscription_entity as subscriptions,
};
use crate::error::{AppError, AppResult};
use crate::external::{
    CheckoutSessionState, CheckoutStatus, GatewayError, GatewayEvent, GatewayResult,
    InvoiceDetail, InvoiceStatus, PaymentGatewayAdapter,
};
use crate::ledger::{
    InsertInvoiceOutcome, LedgerTxn, NewInvoice, NewSubscription, SharedLedger, SweepWindow,
    finish_txn, into_aborted,
};
use crate::models::PlanSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Failed,
}

impl PaymentOutcome {
    fn status(self) -> OrderStatus {
        match self {
            PaymentOutcome::Paid => OrderStatus::Success,
            PaymentOutcome::Failed => OrderStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    /// The order moved out of `PENDING` in this call.
    Settled(orders::Model),
    /// The order had already left `PENDING`; nothing was written.
    AlreadySettled(orders::Model),
}

impl SettleOutcome {
    pub fn into_order(self) -> orders::Model {
        match self {
            SettleOutcome::Settled(o) | SettleOutcome::AlreadySettled(o) => o,
        }
    }
}

/// A paid gateway invoice resolved against the order that started it.
#[derive(Debug, Clone, PartialEq)]
pub struct PaidInvoice {
    /// Order reference (checkout session id) the subscription is keyed on.
    pub reference_id: String,
    pub invoice_id: String,
    pub user_id: i64,
    pub gateway: PaymentGateway,
    pub price_id: Option<String>,
    pub product_id: Option<String>,
    /// Plan chosen at checkout, used when the invoice carries no price.
    pub fallback_plan_id: Option<i64>,
    pub amount: i64,
    pub currency: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub document_url: Option<String>,
    pub external_subscription_id: Option<String>,
}

impl PaidInvoice {
    pub fn from_order(order: &orders::Model, invoice: &InvoiceDetail) -> Self {
        Self {
            reference_id: order.reference_id.clone(),
            invoice_id: invoice.invoice_ref.clone(),
            user_id: order.user_id,
            gateway: order.payment_gateway,
            price_id: invoice.price_id.clone(),
            product_id: invoice.product_id.clone(),
            fallback_plan_id: Some(order.plan_id),
            amount: invoice.amount,
            currency: invoice.currency.clone(),
            period_start: invoice.period_start,
            period_end: invoice.period_end,
            document_url: invoice.document_url.clone(),
            external_subscription_id: invoice
                .subscription_ref
                .clone()
                .or_else(|| order.external_subscription_id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GrantOutcome {
    /// The invoice was recorded before; nothing changed.
    AlreadyGranted,
    Renewed(subscriptions::Model),
    Granted(subscriptions::Model),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GrantStatus {
    NotAttempted,
    InvoiceNotPaid,
    Done(GrantOutcome),
    /// Settlement stuck but the grant did not; a later invoice webhook retries it.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub order: orders::Model,
    /// New status when this call moved the order out of `PENDING`.
    pub transition: Option<OrderStatus>,
    pub grant: GrantStatus,
}

impl ReconcileOutcome {
    fn unchanged(order: orders::Model) -> Self {
        Self {
            order,
            transition: None,
            grant: GrantStatus::NotAttempted,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepSummary {
    pub examined: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unchanged: usize,
    /// Already `SUCCESS` orders whose missing subscription was granted.
    pub regranted: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct ReconciliationService {
    ledger: SharedLedger,
    gateway: Arc<dyn PaymentGatewayAdapter>,
    sweep_min_age: Duration,
    sweep_max_age: Duration,
}

impl ReconciliationService {
    pub fn new(
        ledger: SharedLedger,
        gateway: Arc<dyn PaymentGatewayAdapter>,
        config: &ReconciliationConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            sweep_min_age: Duration::seconds(config.sweep_min_age_secs),
            sweep_max_age: Duration::seconds(config.sweep_max_age_secs),
        }
    }

    /// Moves a `PENDING` order to `SUCCESS` or `FAILED`. Orders that already
    /// left `PENDING` are returned untouched, so the first committed outcome wins.
    pub async fn settle_order(
        &self,
        reference_id: &str,
        outcome: PaymentOutcome,
        external_subscription_ref: Option<&str>,
    ) -> AppResult<SettleOutcome> {
        let mut txn = self.ledger.begin().await?;
        let result = settle_in(txn.as_mut(), reference_id, outcome, external_subscription_ref).await;
        let settled = finish_txn(txn, result, "settle_order").await?;

        if let SettleOutcome::Settled(order) = &settled {
            log::info!(
                "Order {} settled as {} (user_id={})",
                order.reference_id,
                order.status,
                order.user_id
            );
        }
        Ok(settled)
    }

    /// Records the invoice and grants or renews the matching subscription,
    /// all in one transaction. Replays of an invoice are a no-op.
    pub async fn grant_or_renew_subscription(&self, paid: &PaidInvoice) -> AppResult<GrantOutcome> {
        let mut txn = self.ledger.begin().await?;
        match grant_in(txn.as_mut(), paid).await {
            Ok(Some(outcome)) => {
                txn.commit()
                    .await
                    .map_err(|e| into_aborted("grant_or_renew_subscription", e))?;
                match &outcome {
                    GrantOutcome::Granted(sub) => log::info!(
                        "Granted subscription {} to user {} from invoice {}",
                        sub.id,
                        paid.user_id,
                        paid.invoice_id
                    ),
                    GrantOutcome::Renewed(sub) => log::info!(
                        "Renewed subscription {} until {} from invoice {}",
                        sub.id,
                        sub.ends_at,
                        paid.invoice_id
                    ),
                    GrantOutcome::AlreadyGranted => log::info!(
                        "Invoice {} already recorded; skipping grant",
                        paid.invoice_id
                    ),
                }
                Ok(outcome)
            }
            Ok(None) => {
                // Lost the race on the invoice uniqueness constraint.
                if let Err(e) = txn.rollback().await {
                    log::warn!("Rollback after duplicate invoice {} failed: {e}", paid.invoice_id);
                }
                log::info!("Invoice {} recorded concurrently; skipping grant", paid.invoice_id);
                Ok(GrantOutcome::AlreadyGranted)
            }
            Err(err) => {
                if let Err(e) = txn.rollback().await {
                    log::warn!("Rollback of grant for invoice {} failed: {e}", paid.invoice_id);
                }
                log::error!("Grant for invoice {} aborted: {err}", paid.invoice_id);
                Err(into_aborted("grant_or_renew_subscription", err))
            }
        }
    }

    /// Resolve, settle and grant for one order. Shared by poll and sweep.
    ///
    /// A `SUCCESS` order that never got its subscription (the grant failed
    /// after settlement) is resolved again so the grant is retried.
    pub async fn reconcile_checkout(&self, order: orders::Model) -> AppResult<ReconcileOutcome> {
        if order.payment_gateway == PaymentGateway::Admin
            || order.payment_gateway != self.gateway.gateway()
        {
            return Ok(ReconcileOutcome::unchanged(order));
        }
        match order.status {
            OrderStatus::Pending => {}
            OrderStatus::Success if !self.is_granted(&order).await? => {
                log::info!(
                    "Order {} is SUCCESS without a subscription; retrying grant",
                    order.reference_id
                );
            }
            _ => return Ok(ReconcileOutcome::unchanged(order)),
        }

        // The order exists locally, so a missing session is a gateway fault.
        let session = self
            .gateway
            .resolve_checkout_session(&order.reference_id)
            .await
            .map_err(|e| match e {
                GatewayError::NotFound(msg) => AppError::GatewayUnavailable(msg),
                other => other.into(),
            })?;
        self.apply_session(order, &session).await
    }

    async fn is_granted(&self, order: &orders::Model) -> AppResult<bool> {
        Ok(self
            .ledger
            .find_order_subscription(order.user_id, &order.reference_id)
            .await?
            .is_some())
    }

    pub fn verify_webhook_event(
        &self,
        raw_payload: &str,
        signature_header: &str,
    ) -> GatewayResult<GatewayEvent> {
        self.gateway
            .verify_webhook_event(raw_payload, signature_header)
    }

    /// Applies a verified webhook event. `NotFound` means the event refers
    /// to something this ledger does not know (yet).
    pub async fn handle_event(&self, event: &GatewayEvent) -> AppResult<()> {
        match event {
            GatewayEvent::CheckoutSessionCompleted { event_id, session } => {
                let order = self
                    .ledger
                    .find_order_by_reference(&session.session_ref)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("Order {} not found", session.session_ref))
                    })?;
                let outcome = self.apply_session(order, session).await?;
                log::info!(
                    "Event {event_id}: order {} is {} ({:?})",
                    outcome.order.reference_id,
                    outcome.order.status,
                    outcome.grant
                );
            }
            GatewayEvent::InvoicePaymentSucceeded { event_id, invoice } => {
                let outcome = self.grant_from_invoice(invoice).await?;
                log::info!("Event {event_id}: invoice {} -> {outcome:?}", invoice.invoice_ref);
            }
            GatewayEvent::Ignored {
                event_id,
                event_type,
            } => {
                log::info!("Ignoring webhook event {event_type} ({event_id})");
            }
        }
        Ok(())
    }

    /// Grant path for `invoice.payment_succeeded`: the order is found through
    /// the gateway subscription it created.
    pub async fn grant_from_invoice(&self, invoice: &InvoiceDetail) -> AppResult<Option<GrantOutcome>> {
        if invoice.status != InvoiceStatus::Paid {
            log::info!(
                "Invoice {} is {:?}; nothing to grant",
                invoice.invoice_ref,
                invoice.status
            );
            return Ok(None);
        }

        let subscription_ref = invoice.subscription_ref.as_deref().ok_or_else(|| {
            AppError::NotFound(format!("Invoice {} has no subscription", invoice.invoice_ref))
        })?;
        let order = self
            .ledger
            .find_order_by_external_subscription(self.gateway.gateway(), subscription_ref)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("No order for subscription {subscription_ref}"))
            })?;

        if order.status != OrderStatus::Success {
            log::warn!(
                "Paid invoice {} for order {} in state {}; not granting",
                invoice.invoice_ref,
                order.reference_id,
                order.status
            );
            return Ok(None);
        }

        let paid = PaidInvoice::from_order(&order, invoice);
        Ok(Some(self.grant_or_renew_subscription(&paid).await?))
    }

    pub fn sweep_window(&self, now: DateTime<Utc>) -> SweepWindow {
        SweepWindow {
            created_from: now - self.sweep_max_age,
            created_to: now - self.sweep_min_age,
        }
    }

    /// Reconciles every stale `PENDING` order, and every `SUCCESS` order in
    /// the window still missing its subscription, one by one. A failing order
    /// is counted and logged; it never stops the sweep.
    pub async fn sweep_pending_orders(&self, now: DateTime<Utc>) -> AppResult<SweepSummary> {
        let window = self.sweep_window(now);
        let mut orders = self.ledger.list_sweepable_orders(window).await?;
        orders.extend(self.ledger.list_ungranted_orders(window).await?);

        let mut summary = SweepSummary {
            examined: orders.len(),
            ..Default::default()
        };

        for order in orders {
            let reference = order.reference_id.clone();
            match self.reconcile_checkout(order).await {
                Ok(outcome) => {
                    match (outcome.transition, &outcome.grant) {
                        (Some(OrderStatus::Success), _) => summary.succeeded += 1,
                        (Some(OrderStatus::Failed), _) => summary.failed += 1,
                        (None, GrantStatus::Done(_)) => summary.regranted += 1,
                        _ => summary.unchanged += 1,
                    }
                    if let GrantStatus::Failed(reason) = outcome.grant {
                        summary.errors += 1;
                        log::warn!("Sweep settled {reference} but grant failed: {reason}");
                    }
                }
                Err(e) => {
                    summary.errors += 1;
                    log::warn!("Sweep could not reconcile order {reference}: {e}");
                }
            }
        }

        Ok(summary)
    }

    async fn apply_session(
        &self,
        order: orders::Model,
        session: &CheckoutSessionState,
    ) -> AppResult<ReconcileOutcome> {
        let outcome = match session.status {
            CheckoutStatus::Complete if session.payment_status.is_settled() => PaymentOutcome::Paid,
            CheckoutStatus::Complete | CheckoutStatus::Expired => PaymentOutcome::Failed,
            CheckoutStatus::Open => return Ok(ReconcileOutcome::unchanged(order)),
        };

        let settled = self
            .settle_order(
                &order.reference_id,
                outcome,
                session.subscription_ref.as_deref(),
            )
            .await?;
        let transition = match &settled {
            SettleOutcome::Settled(o) => Some(o.status),
            SettleOutcome::AlreadySettled(_) => None,
        };
        let order = settled.into_order();

        let grant = match (&order.status, session.invoice_ref.as_deref()) {
            (OrderStatus::Success, Some(invoice_ref)) => {
                match self.grant_for_invoice_ref(&order, invoice_ref).await {
                    Ok(status) => status,
                    Err(e) => {
                        log::warn!(
                            "Order {} settled but grant for invoice {invoice_ref} failed: {e}",
                            order.reference_id
                        );
                        GrantStatus::Failed(e.to_string())
                    }
                }
            }
            _ => GrantStatus::NotAttempted,
        };

        Ok(ReconcileOutcome {
            order,
            transition,
            grant,
        })
    }

    async fn grant_for_invoice_ref(
        &self,
        order: &orders::Model,
        invoice_ref: &str,
    ) -> AppResult<GrantStatus> {
        let invoice = self.gateway.resolve_invoice(invoice_ref).await?;
        if invoice.status != InvoiceStatus::Paid {
            return Ok(GrantStatus::InvoiceNotPaid);
        }
        let paid = PaidInvoice::from_order(order, &invoice);
        Ok(GrantStatus::Done(self.grant_or_renew_subscription(&paid).await?))
    }
}

async fn settle_in(
    txn: &mut dyn LedgerTxn,
    reference_id: &str,
    outcome: PaymentOutcome,
    external_subscription_ref: Option<&str>,
) -> AppResult<SettleOutcome> {
    let order = txn
        .lock_order_by_reference(reference_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {reference_id} not found")))?;

    if order.status != OrderStatus::Pending {
        if order.status == OrderStatus::Failed && outcome == PaymentOutcome::Paid {
            log::warn!("Paid outcome arrived for FAILED order {reference_id}; leaving it FAILED");
        }
        return Ok(SettleOutcome::AlreadySettled(order));
    }

    let updated = txn
        .update_order_status(
            order.id,
            outcome.status(),
            external_subscription_ref.map(str::to_string),
        )
        .await?;
    Ok(SettleOutcome::Settled(updated))
}

/// `Ok(None)` means the invoice insert hit the uniqueness constraint and the
/// transaction must be rolled back.
async fn grant_in(txn: &mut dyn LedgerTxn, paid: &PaidInvoice) -> AppResult<Option<GrantOutcome>> {
    if txn.find_invoice(&paid.invoice_id, paid.gateway).await?.is_some() {
        return Ok(Some(GrantOutcome::AlreadyGranted));
    }

    let existing = txn
        .find_subscription_by_reference(paid.user_id, &paid.reference_id)
        .await?;

    let (subscription, renewed) = match existing {
        Some(current) => {
            let snapshot = PlanSnapshot::from_json(&current.plan_snapshot)?;
            let ends_at = period_end(paid, &snapshot);
            // A late older invoice is recorded but never shortens the period.
            let sub = if ends_at > current.ends_at {
                txn.update_subscription_period(current.id, paid.period_start, ends_at)
                    .await?
            } else {
                current
            };
            (sub, true)
        }
        None => {
            let plan = resolve_plan(txn, paid).await?;
            let snapshot = PlanSnapshot::try_from(&plan)?;
            let sub = txn
                .insert_subscription(NewSubscription {
                    user_id: paid.user_id,
                    plan_id: Some(plan.id),
                    plan_type: plan.plan_type,
                    plan_snapshot: snapshot.to_json()?,
                    payment_gateway: Some(paid.gateway),
                    reference_id: Some(paid.reference_id.clone()),
                    external_subscription_id: paid.external_subscription_id.clone(),
                    seats: plan.seats,
                    starts_at: paid.period_start,
                    ends_at: period_end(paid, &snapshot),
                })
                .await?;
            (sub, false)
        }
    };

    let inserted = txn
        .insert_invoice(NewInvoice {
            user_id: paid.user_id,
            invoice_id: paid.invoice_id.clone(),
            payment_gateway: paid.gateway,
            period_start: paid.period_start,
            period_end: paid.period_end,
            amount: paid.amount,
            currency: paid.currency.clone(),
            document_url: paid.document_url.clone(),
            subscription_id: subscription.id,
        })
        .await?;
    if inserted == InsertInvoiceOutcome::Duplicate {
        return Ok(None);
    }

    txn.set_user_current_subscription(paid.user_id, subscription.id)
        .await?;

    Ok(Some(if renewed {
        GrantOutcome::Renewed(subscription)
    } else {
        GrantOutcome::Granted(subscription)
    }))
}

/// Invoice period end, or one plan interval from the start when the gateway
/// reports an empty period.
fn period_end(paid: &PaidInvoice, snapshot: &PlanSnapshot) -> DateTime<Utc> {
    if paid.period_end > paid.period_start {
        paid.period_end
    } else {
        snapshot
            .billing_interval
            .advance(paid.period_start, snapshot.period_count())
    }
}

async fn resolve_plan(txn: &mut dyn LedgerTxn, paid: &PaidInvoice) -> AppResult<plans::Model> {
    if let Some(price_id) = paid.price_id.as_deref()
        && let Some(plan) = txn
            .find_plan_by_price(paid.product_id.as_deref(), price_id)
            .await?
    {
        return Ok(plan);
    }
    if let Some(plan_id) = paid.fallback_plan_id
        && let Some(plan) = txn.find_plan(plan_id).await?
    {
        return Ok(plan);
    }
    Err(AppError::NotFound(format!(
        "No plan for price {:?} / product {:?}",
        paid.price_id, paid.product_id
    )))
}
