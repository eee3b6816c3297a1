use chrono::{DateTime, Months, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    ToSchema,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "plan_type")]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    #[sea_orm(string_value = "freemium")]
    Freemium,
    #[sea_orm(string_value = "premium")]
    Premium,
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanType::Freemium => write!(f, "freemium"),
            PlanType::Premium => write!(f, "premium"),
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    ToSchema,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "billing_interval")]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    #[sea_orm(string_value = "day")]
    Day,
    #[sea_orm(string_value = "month")]
    Month,
    #[sea_orm(string_value = "year")]
    Year,
}

impl BillingInterval {
    /// Adds `count` intervals to `from`. Month arithmetic clamps to the last
    /// day of the target month (Jan 31 + 1 month = Feb 28/29).
    pub fn advance(&self, from: DateTime<Utc>, count: u32) -> DateTime<Utc> {
        let count = count.max(1);
        match self {
            BillingInterval::Day => from + chrono::Duration::days(count as i64),
            BillingInterval::Month => from
                .checked_add_months(Months::new(count))
                .unwrap_or(from + chrono::Duration::days(30 * count as i64)),
            BillingInterval::Year => from
                .checked_add_months(Months::new(12 * count))
                .unwrap_or(from + chrono::Duration::days(365 * count as i64)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "subscription_plans")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    pub plan_type: PlanType,
    pub product_id: Option<String>,
    pub price_id: Option<String>,
    pub price: i64,
    pub currency: String,
    pub features: Json,
    pub billing_interval: BillingInterval,
    pub interval_count: i32,
    pub seats: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
