use crate::entities::{OrderStatus, PaymentGateway, order_entity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: i64,
    pub reference_id: String,
    pub status: OrderStatus,
    pub amount: i64,
    pub currency: String,
    pub payment_gateway: PaymentGateway,
    pub plan_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<order_entity::Model> for OrderResponse {
    fn from(m: order_entity::Model) -> Self {
        Self {
            id: m.id,
            reference_id: m.reference_id,
            status: m.status,
            amount: m.amount,
            currency: m.currency,
            payment_gateway: m.payment_gateway,
            plan_id: m.plan_id,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct OrderQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCheckoutRequest {
    pub plan_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateCheckoutResponse {
    pub reference_id: String,
    /// Hosted checkout page to redirect the user to.
    pub checkout_url: Option<String>,
    pub order: OrderResponse,
}
