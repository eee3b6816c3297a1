use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::{BillingInterval, PlanType, plan_entity};
use crate::error::{AppError, AppResult};

/// Immutable copy of a catalog plan taken when a subscription is granted.
/// Later catalog edits never change what an existing subscription shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PlanSnapshot {
    pub plan_id: i64,
    pub name: String,
    pub plan_type: PlanType,
    pub price: i64,
    pub currency: String,
    pub features: Vec<String>,
    pub billing_interval: BillingInterval,
    pub interval_count: i32,
    pub seats: i32,
}

impl PlanSnapshot {
    pub fn to_json(&self) -> AppResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: &serde_json::Value) -> AppResult<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Length of one billing period as a count of `billing_interval`.
    pub fn period_count(&self) -> u32 {
        u32::try_from(self.interval_count).unwrap_or(1).max(1)
    }
}

impl TryFrom<&plan_entity::Model> for PlanSnapshot {
    type Error = AppError;

    fn try_from(plan: &plan_entity::Model) -> AppResult<Self> {
        let features: Vec<String> = serde_json::from_value(plan.features.clone()).map_err(|e| {
            AppError::InternalError(format!("Plan {} has malformed features: {e}", plan.id))
        })?;

        Ok(Self {
            plan_id: plan.id,
            name: plan.name.clone(),
            plan_type: plan.plan_type,
            price: plan.price,
            currency: plan.currency.clone(),
            features,
            billing_interval: plan.billing_interval,
            interval_count: plan.interval_count,
            seats: plan.seats,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PlanResponse {
    pub id: i64,
    pub name: String,
    pub plan_type: PlanType,
    pub price: i64,
    pub currency: String,
    pub features: Vec<String>,
    pub billing_interval: BillingInterval,
    pub interval_count: i32,
    pub seats: i32,
}

impl From<PlanSnapshot> for PlanResponse {
    fn from(s: PlanSnapshot) -> Self {
        Self {
            id: s.plan_id,
            name: s.name,
            plan_type: s.plan_type,
            price: s.price,
            currency: s.currency,
            features: s.features,
            billing_interval: s.billing_interval,
            interval_count: s.interval_count,
            seats: s.seats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_snapshot_copies_catalog_fields() {
        let plan = plan_entity::Model {
            id: 3,
            name: "Premium Monthly".into(),
            plan_type: PlanType::Premium,
            product_id: Some("prod_1".into()),
            price_id: Some("price_1".into()),
            price: 1999,
            currency: "usd".into(),
            features: json!(["tutor", "quizzes"]),
            billing_interval: BillingInterval::Month,
            interval_count: 1,
            seats: 5,
            is_active: true,
            created_at: Utc::now(),
        };
        let snap = PlanSnapshot::try_from(&plan).unwrap();
        assert_eq!(snap.features, vec!["tutor".to_string(), "quizzes".to_string()]);
        assert_eq!(snap.seats, 5);
        assert_eq!(PlanSnapshot::from_json(&snap.to_json().unwrap()).unwrap(), snap);
    }

    #[test]
    fn test_malformed_features_rejected() {
        let plan = plan_entity::Model {
            id: 4,
            name: "Broken".into(),
            plan_type: PlanType::Premium,
            product_id: None,
            price_id: None,
            price: 0,
            currency: "usd".into(),
            features: json!({"not": "a list"}),
            billing_interval: BillingInterval::Month,
            interval_count: 0,
            seats: 1,
            is_active: true,
            created_at: Utc::now(),
        };
        assert!(PlanSnapshot::try_from(&plan).is_err());
    }
}
