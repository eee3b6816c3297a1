use std::sync::Arc;

use crate::entities::{OrderStatus, PaymentGateway, PlanType};
use crate::error::{AppError, AppResult};
use crate::external::{CheckoutRequest, PaymentGatewayAdapter};
use crate::ledger::{NewOrder, SharedLedger, finish_txn};
use crate::models::{
    CreateCheckoutResponse, OrderQuery, OrderResponse, PageRequest, PaginatedResponse,
};
use crate::services::ReconciliationService;

/// Checkout creation and the user-facing order views.
#[derive(Clone)]
pub struct PaymentService {
    ledger: SharedLedger,
    gateway: Arc<dyn PaymentGatewayAdapter>,
    reconciliation: ReconciliationService,
}

impl PaymentService {
    pub fn new(
        ledger: SharedLedger,
        gateway: Arc<dyn PaymentGatewayAdapter>,
        reconciliation: ReconciliationService,
    ) -> Self {
        Self {
            ledger,
            gateway,
            reconciliation,
        }
    }

    /// Opens a hosted checkout for a premium plan and records the `PENDING`
    /// order keyed by the checkout session id.
    pub async fn create_checkout(
        &self,
        user_id: i64,
        plan_id: i64,
    ) -> AppResult<CreateCheckoutResponse> {
        let user = self
            .ledger
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        let plan = self
            .ledger
            .find_plan(plan_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::NotFound("Plan not found".to_string()))?;

        if plan.plan_type != PlanType::Premium {
            return Err(AppError::ValidationError(
                "Only premium plans can be purchased".to_string(),
            ));
        }
        let price_id = plan.price_id.clone().ok_or_else(|| {
            AppError::ValidationError("Plan is not available for online purchase".to_string())
        })?;

        let handle = self
            .gateway
            .create_checkout_session(&CheckoutRequest {
                user_id,
                price_id,
                seats: u64::try_from(plan.seats).unwrap_or(1).max(1),
                customer_email: Some(user.email.clone()),
            })
            .await?;

        let mut txn = self.ledger.begin().await?;
        let result = txn
            .insert_order(NewOrder {
                user_id,
                status: OrderStatus::Pending,
                amount: plan.price,
                currency: plan.currency.clone(),
                payment_gateway: self.gateway.gateway(),
                plan_id: plan.id,
                reference_id: handle.session_ref.clone(),
                external_subscription_id: None,
            })
            .await;
        let order = finish_txn(txn, result, "create_checkout").await?;

        log::info!(
            "Checkout {} opened for user {} plan {}",
            order.reference_id,
            user_id,
            plan.id
        );

        Ok(CreateCheckoutResponse {
            reference_id: order.reference_id.clone(),
            checkout_url: handle.url,
            order: order.into(),
        })
    }

    /// Returns the caller's order, refreshed from the gateway while it is
    /// still `PENDING` or paid but not yet granted. Orders of other users are
    /// reported as not found.
    pub async fn check_order_status(
        &self,
        user_id: i64,
        reference_id: &str,
    ) -> AppResult<OrderResponse> {
        let order = self
            .ledger
            .find_order_by_reference(reference_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;

        if order.payment_gateway == PaymentGateway::Admin {
            return Ok(order.into());
        }

        let outcome = self.reconciliation.reconcile_checkout(order).await?;
        Ok(outcome.order.into())
    }

    pub async fn list_orders(
        &self,
        user_id: i64,
        query: &OrderQuery,
    ) -> AppResult<PaginatedResponse<OrderResponse>> {
        let page = PageRequest::new(query.page, query.page_size);
        let (rows, total) = self
            .ledger
            .list_user_orders(user_id, page.offset(), page.limit())
            .await?;
        let items = rows.into_iter().map(OrderResponse::from).collect();
        Ok(PaginatedResponse::new(items, page, total))
    }
}
