use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{OrderStatus, PaymentGateway, PlanType, subscription_entity as subscriptions};
use crate::error::{AppError, AppResult};
use crate::external::PaymentGatewayAdapter;
use crate::ledger::{LedgerTxn, NewOrder, NewSubscription, SharedLedger, finish_txn};
use crate::models::{AdminGrantRequest, AdminGrantResponse, PlanSnapshot, SubscriptionResponse};

#[derive(Clone)]
pub struct SubscriptionService {
    ledger: SharedLedger,
    gateway: Arc<dyn PaymentGatewayAdapter>,
}

impl SubscriptionService {
    pub fn new(ledger: SharedLedger, gateway: Arc<dyn PaymentGatewayAdapter>) -> Self {
        Self { ledger, gateway }
    }

    /// Starts the free trial. Refused when the user holds any subscription
    /// that has not expired, or ever held a freemium one.
    pub async fn create_freemium(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionResponse> {
        let mut txn = self.ledger.begin().await?;
        let result = freemium_in(txn.as_mut(), user_id, now).await;
        let sub = finish_txn(txn, result, "create_freemium").await?;

        log::info!(
            "Freemium subscription {} granted to user {user_id} until {}",
            sub.id,
            sub.ends_at
        );
        SubscriptionResponse::from_model(sub, now)
    }

    pub async fn current(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<SubscriptionResponse>> {
        let Some(sub) = self.current_model(user_id).await? else {
            return Ok(None);
        };
        Ok(Some(SubscriptionResponse::from_model(sub, now)?))
    }

    /// Stops renewal at the end of the current period. Gateway-backed
    /// subscriptions are cancelled at the gateway first; nothing is written
    /// locally if that call fails.
    pub async fn cancel_current(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionResponse> {
        let sub = self
            .current_model(user_id)
            .await?
            .filter(|s| s.is_active_at(now))
            .ok_or_else(|| AppError::NotFound("No active subscription".to_string()))?;

        if sub.cancel_at_period_end {
            return SubscriptionResponse::from_model(sub, now);
        }

        if sub.payment_gateway == Some(self.gateway.gateway())
            && let Some(external) = sub.external_subscription_id.as_deref()
        {
            self.gateway.cancel_subscription(external).await?;
        }

        let mut txn = self.ledger.begin().await?;
        let result = txn.mark_subscription_cancel_at_period_end(sub.id).await;
        let updated = finish_txn(txn, result, "cancel_subscription").await?;

        log::info!(
            "Subscription {} of user {user_id} will end at {}",
            updated.id,
            updated.ends_at
        );
        SubscriptionResponse::from_model(updated, now)
    }

    /// Grants a plan without payment: an `ADMIN` order already in `SUCCESS`
    /// plus a subscription for one billing period, in one transaction.
    pub async fn admin_grant(
        &self,
        request: &AdminGrantRequest,
        now: DateTime<Utc>,
    ) -> AppResult<AdminGrantResponse> {
        if let Some(seats) = request.seats
            && seats < 1
        {
            return Err(AppError::ValidationError("seats must be at least 1".to_string()));
        }

        let mut txn = self.ledger.begin().await?;
        let result = admin_grant_in(txn.as_mut(), request, now).await;
        let (order, sub) = finish_txn(txn, result, "admin_grant").await?;

        log::info!(
            "Admin granted plan {} to user {} (order {}, subscription {})",
            request.plan_id,
            request.user_id,
            order.reference_id,
            sub.id
        );
        Ok(AdminGrantResponse {
            order: order.into(),
            subscription: SubscriptionResponse::from_model(sub, now)?,
        })
    }

    async fn current_model(&self, user_id: i64) -> AppResult<Option<subscriptions::Model>> {
        let user = self
            .ledger
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        match user.current_subscription_id {
            Some(id) => self.ledger.find_subscription(id).await,
            None => Ok(None),
        }
    }
}

async fn freemium_in(
    txn: &mut dyn LedgerTxn,
    user_id: i64,
    now: DateTime<Utc>,
) -> AppResult<subscriptions::Model> {
    txn.lock_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let history = txn.list_user_subscriptions(user_id).await?;
    if history.iter().any(|s| s.ends_at > now) {
        return Err(AppError::Conflict(
            "User already has an active subscription".to_string(),
        ));
    }
    if history.iter().any(|s| s.plan_type == PlanType::Freemium) {
        return Err(AppError::Conflict(
            "Free trial has already been used".to_string(),
        ));
    }

    let plan = txn
        .find_active_plan_by_type(PlanType::Freemium)
        .await?
        .ok_or_else(|| AppError::NotFound("Freemium plan not configured".to_string()))?;
    let snapshot = PlanSnapshot::try_from(&plan)?;
    let ends_at = snapshot
        .billing_interval
        .advance(now, snapshot.period_count());

    let sub = txn
        .insert_subscription(NewSubscription {
            user_id,
            plan_id: Some(plan.id),
            plan_type: PlanType::Freemium,
            plan_snapshot: snapshot.to_json()?,
            payment_gateway: None,
            reference_id: None,
            external_subscription_id: None,
            seats: plan.seats,
            starts_at: now,
            ends_at,
        })
        .await?;
    txn.set_user_current_subscription(user_id, sub.id).await?;
    Ok(sub)
}

async fn admin_grant_in(
    txn: &mut dyn LedgerTxn,
    request: &AdminGrantRequest,
    now: DateTime<Utc>,
) -> AppResult<(crate::entities::order_entity::Model, subscriptions::Model)> {
    txn.lock_user(request.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    let plan = txn
        .find_plan(request.plan_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::NotFound("Plan not found".to_string()))?;
    let snapshot = PlanSnapshot::try_from(&plan)?;

    let reference_id = format!("admin_{}", Uuid::new_v4().simple());
    let order = txn
        .insert_order(NewOrder {
            user_id: request.user_id,
            status: OrderStatus::Success,
            amount: plan.price,
            currency: plan.currency.clone(),
            payment_gateway: PaymentGateway::Admin,
            plan_id: plan.id,
            reference_id: reference_id.clone(),
            external_subscription_id: None,
        })
        .await?;

    let sub = txn
        .insert_subscription(NewSubscription {
            user_id: request.user_id,
            plan_id: Some(plan.id),
            plan_type: plan.plan_type,
            plan_snapshot: snapshot.to_json()?,
            payment_gateway: Some(PaymentGateway::Admin),
            reference_id: Some(reference_id),
            external_subscription_id: None,
            seats: request.seats.unwrap_or(plan.seats),
            starts_at: now,
            ends_at: snapshot
                .billing_interval
                .advance(now, snapshot.period_count()),
        })
        .await?;
    txn.set_user_current_subscription(request.user_id, sub.id)
        .await?;
    Ok((order, sub))
}
