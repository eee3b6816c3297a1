//! Payment gateway boundary.
//!
//! Everything the reconciliation engine knows about a payment provider goes
//! through [`PaymentGatewayAdapter`]. Vendor payloads are decoded into the
//! shapes below at the edge; nothing past this module inspects vendor JSON.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::entities::PaymentGateway;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Transport failure, timeout or a 5xx from the provider. Always retryable.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// The provider answered with something we could not decode.
    #[error("malformed gateway payload: {0}")]
    Malformed(String),

    #[error("gateway object not found: {0}")]
    NotFound(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    Open,
    Complete,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

impl CheckoutPaymentStatus {
    /// Whether money is considered collected for the session.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            CheckoutPaymentStatus::Paid | CheckoutPaymentStatus::NoPaymentRequired
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionState {
    pub session_ref: String,
    pub status: CheckoutStatus,
    pub payment_status: CheckoutPaymentStatus,
    pub invoice_ref: Option<String>,
    pub subscription_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Void,
    Uncollectible,
    Unknown,
}

impl InvoiceStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "draft" => InvoiceStatus::Draft,
            "open" => InvoiceStatus::Open,
            "paid" => InvoiceStatus::Paid,
            "void" => InvoiceStatus::Void,
            "uncollectible" => InvoiceStatus::Uncollectible,
            _ => InvoiceStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceDetail {
    pub invoice_ref: String,
    pub status: InvoiceStatus,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub amount: i64,
    pub currency: String,
    pub document_url: Option<String>,
    pub subscription_ref: Option<String>,
    pub price_id: Option<String>,
    pub product_id: Option<String>,
}

/// A verified, decoded webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    CheckoutSessionCompleted {
        event_id: String,
        session: CheckoutSessionState,
    },
    InvoicePaymentSucceeded {
        event_id: String,
        invoice: InvoiceDetail,
    },
    /// Any event type the engine does not act on.
    Ignored { event_id: String, event_type: String },
}

impl GatewayEvent {
    pub fn event_id(&self) -> &str {
        match self {
            GatewayEvent::CheckoutSessionCompleted { event_id, .. }
            | GatewayEvent::InvoicePaymentSucceeded { event_id, .. }
            | GatewayEvent::Ignored { event_id, .. } => event_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub user_id: i64,
    pub price_id: String,
    pub seats: u64,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionHandle {
    pub session_ref: String,
    pub url: Option<String>,
}

#[async_trait]
pub trait PaymentGatewayAdapter: Send + Sync {
    /// Which `payment_gateway` value rows created through this adapter carry.
    fn gateway(&self) -> PaymentGateway;

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> GatewayResult<CheckoutSessionHandle>;

    async fn resolve_checkout_session(&self, session_ref: &str)
        -> GatewayResult<CheckoutSessionState>;

    async fn resolve_invoice(&self, invoice_ref: &str) -> GatewayResult<InvoiceDetail>;

    /// Fails closed: any signature problem yields `SignatureInvalid` and the
    /// payload is not decoded.
    fn verify_webhook_event(
        &self,
        raw_payload: &str,
        signature_header: &str,
    ) -> GatewayResult<GatewayEvent>;

    /// Requests cancellation at the end of the current period.
    async fn cancel_subscription(&self, subscription_ref: &str) -> GatewayResult<()>;
}
