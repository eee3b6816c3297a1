//! Scripted gateway and fixtures shared by service and handler tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::entities::{BillingInterval, OrderStatus, PaymentGateway, PlanType, plan_entity};
use crate::external::{
    CheckoutPaymentStatus, CheckoutRequest, CheckoutSessionHandle, CheckoutSessionState,
    CheckoutStatus, GatewayError, GatewayEvent, GatewayResult, InvoiceDetail, InvoiceStatus,
    PaymentGatewayAdapter,
};
use crate::ledger::{MemoryLedger, NewOrder};

pub const SIGNATURE_OK: &str = "t=1,v1=fake";

#[derive(Default)]
pub struct FakeGateway {
    sessions: Mutex<HashMap<String, GatewayResult<CheckoutSessionState>>>,
    invoices: Mutex<HashMap<String, GatewayResult<InvoiceDetail>>>,
    event: Mutex<Option<GatewayEvent>>,
    cancelled: Mutex<Vec<String>>,
    checkouts: Mutex<Vec<CheckoutRequest>>,
    session_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_session(&self, session: CheckoutSessionState) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_ref.clone(), Ok(session));
    }

    pub fn fail_session(&self, session_ref: &str, err: GatewayError) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_ref.to_string(), Err(err));
    }

    pub fn script_invoice(&self, invoice: InvoiceDetail) {
        self.invoices
            .lock()
            .unwrap()
            .insert(invoice.invoice_ref.clone(), Ok(invoice));
    }

    pub fn fail_invoice(&self, invoice_ref: &str, err: GatewayError) {
        self.invoices
            .lock()
            .unwrap()
            .insert(invoice_ref.to_string(), Err(err));
    }

    /// Event returned for a webhook carrying [`SIGNATURE_OK`].
    pub fn script_event(&self, event: GatewayEvent) {
        *self.event.lock().unwrap() = Some(event);
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.checkouts.lock().unwrap().clone()
    }

    pub fn session_calls(&self) -> usize {
        self.session_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGatewayAdapter for FakeGateway {
    fn gateway(&self) -> PaymentGateway {
        PaymentGateway::Stripe
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> GatewayResult<CheckoutSessionHandle> {
        let mut checkouts = self.checkouts.lock().unwrap();
        checkouts.push(request.clone());
        let session_ref = format!("cs_test_{}", checkouts.len());
        Ok(CheckoutSessionHandle {
            url: Some(format!("https://checkout.example/{session_ref}")),
            session_ref,
        })
    }

    async fn resolve_checkout_session(
        &self,
        session_ref: &str,
    ) -> GatewayResult<CheckoutSessionState> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .unwrap()
            .get(session_ref)
            .cloned()
            .unwrap_or_else(|| Err(GatewayError::NotFound(session_ref.to_string())))
    }

    async fn resolve_invoice(&self, invoice_ref: &str) -> GatewayResult<InvoiceDetail> {
        self.invoices
            .lock()
            .unwrap()
            .get(invoice_ref)
            .cloned()
            .unwrap_or_else(|| Err(GatewayError::NotFound(invoice_ref.to_string())))
    }

    fn verify_webhook_event(
        &self,
        _raw_payload: &str,
        signature_header: &str,
    ) -> GatewayResult<GatewayEvent> {
        if signature_header != SIGNATURE_OK {
            return Err(GatewayError::SignatureInvalid);
        }
        self.event
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| GatewayError::Malformed("no scripted event".into()))
    }

    async fn cancel_subscription(&self, subscription_ref: &str) -> GatewayResult<()> {
        self.cancelled
            .lock()
            .unwrap()
            .push(subscription_ref.to_string());
        Ok(())
    }
}

pub fn session(
    session_ref: &str,
    status: CheckoutStatus,
    payment_status: CheckoutPaymentStatus,
    invoice_ref: Option<&str>,
    subscription_ref: Option<&str>,
) -> CheckoutSessionState {
    CheckoutSessionState {
        session_ref: session_ref.to_string(),
        status,
        payment_status,
        invoice_ref: invoice_ref.map(str::to_string),
        subscription_ref: subscription_ref.map(str::to_string),
    }
}

pub fn period_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap()
}

pub fn paid_invoice(invoice_ref: &str, subscription_ref: &str, start: DateTime<Utc>) -> InvoiceDetail {
    InvoiceDetail {
        invoice_ref: invoice_ref.to_string(),
        status: InvoiceStatus::Paid,
        period_start: start,
        period_end: BillingInterval::Month.advance(start, 1),
        amount: 1999,
        currency: "usd".to_string(),
        document_url: Some(format!("https://files.example/{invoice_ref}.pdf")),
        subscription_ref: Some(subscription_ref.to_string()),
        price_id: Some("price_premium".to_string()),
        product_id: Some("prod_premium".to_string()),
    }
}

pub fn premium_plan() -> plan_entity::Model {
    plan_entity::Model {
        id: 100,
        name: "Premium Monthly".to_string(),
        plan_type: PlanType::Premium,
        product_id: Some("prod_premium".to_string()),
        price_id: Some("price_premium".to_string()),
        price: 1999,
        currency: "usd".to_string(),
        features: json!(["ai_tutor", "unlimited_quizzes"]),
        billing_interval: BillingInterval::Month,
        interval_count: 1,
        seats: 1,
        is_active: true,
        created_at: Utc::now(),
    }
}

pub fn freemium_plan() -> plan_entity::Model {
    plan_entity::Model {
        id: 101,
        name: "Free Trial".to_string(),
        plan_type: PlanType::Freemium,
        product_id: None,
        price_id: None,
        price: 0,
        currency: "usd".to_string(),
        features: json!(["quizzes"]),
        billing_interval: BillingInterval::Day,
        interval_count: 14,
        seats: 1,
        is_active: true,
        created_at: Utc::now(),
    }
}

/// Ledger seeded with user 1, user 2 and both plans.
pub async fn seeded_ledger() -> MemoryLedger {
    let ledger = MemoryLedger::new();
    ledger.insert_user(1, "ada@example.com").await;
    ledger.insert_user(2, "grace@example.com").await;
    ledger.insert_plan(premium_plan()).await;
    ledger.insert_plan(freemium_plan()).await;
    ledger
}

pub fn stripe_order(user_id: i64, reference_id: &str) -> NewOrder {
    NewOrder {
        user_id,
        status: OrderStatus::Pending,
        amount: 1999,
        currency: "usd".to_string(),
        payment_gateway: PaymentGateway::Stripe,
        plan_id: premium_plan().id,
        reference_id: reference_id.to_string(),
        external_subscription_id: None,
    }
}

/// Creation time inside the default sweep window relative to `now`.
pub fn minutes_ago(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    now - Duration::minutes(minutes)
}
