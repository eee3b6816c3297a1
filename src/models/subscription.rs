use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::order::OrderResponse;
use super::plan::{PlanResponse, PlanSnapshot};
use crate::entities::{PaymentGateway, PlanType, subscription_entity};
use crate::error::AppResult;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionResponse {
    pub id: i64,
    pub user_id: i64,
    pub plan_type: PlanType,
    pub plan: PlanResponse,
    pub payment_gateway: Option<PaymentGateway>,
    pub reference_id: Option<String>,
    pub seats: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub is_active: bool,
}

impl SubscriptionResponse {
    pub fn from_model(m: subscription_entity::Model, now: DateTime<Utc>) -> AppResult<Self> {
        let snapshot = PlanSnapshot::from_json(&m.plan_snapshot)?;
        let is_active = m.is_active_at(now);
        Ok(Self {
            id: m.id,
            user_id: m.user_id,
            plan_type: m.plan_type,
            plan: snapshot.into(),
            payment_gateway: m.payment_gateway,
            reference_id: m.reference_id,
            seats: m.seats,
            starts_at: m.starts_at,
            ends_at: m.ends_at,
            cancel_at_period_end: m.cancel_at_period_end,
            is_active,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdminGrantRequest {
    pub user_id: i64,
    pub plan_id: i64,
    /// Defaults to the plan's seat count.
    pub seats: Option<i32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminGrantResponse {
    pub order: OrderResponse,
    pub subscription: SubscriptionResponse,
}
