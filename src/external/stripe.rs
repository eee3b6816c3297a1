use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, Invoice, InvoiceId, StripeError, Subscription,
    SubscriptionId, UpdateSubscription, Webhook, WebhookError,
};

use crate::config::StripeConfig;
use crate::entities::PaymentGateway;
use crate::external::gateway::*;

/// Stripe implementation of [`PaymentGatewayAdapter`].
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    config: StripeConfig,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(config.secret_key.clone()),
            config,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs.max(1))
    }

    async fn call<T, F>(&self, what: &str, fut: F) -> GatewayResult<T>
    where
        F: std::future::Future<Output = Result<T, StripeError>>,
    {
        match tokio::time::timeout(self.timeout(), fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                log::warn!("Stripe {what} failed: {e}");
                Err(map_stripe_error(what, e))
            }
            Err(_) => {
                log::warn!("Stripe {what} timed out after {:?}", self.timeout());
                Err(GatewayError::Unavailable(format!("{what} timed out")))
            }
        }
    }
}

fn map_stripe_error(what: &str, err: StripeError) -> GatewayError {
    match err {
        StripeError::Stripe(req) if req.http_status == 404 => {
            GatewayError::NotFound(format!("{what}: {}", req.message.unwrap_or_default()))
        }
        other => GatewayError::Unavailable(format!("{what}: {other}")),
    }
}

#[async_trait]
impl PaymentGatewayAdapter for StripeGateway {
    fn gateway(&self) -> PaymentGateway {
        PaymentGateway::Stripe
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> GatewayResult<CheckoutSessionHandle> {
        let client_reference_id = request.user_id.to_string();
        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), client_reference_id.clone());

        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Subscription),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(request.price_id.clone()),
                quantity: Some(request.seats.max(1)),
                ..Default::default()
            }]),
            success_url: Some(&self.config.success_url),
            cancel_url: Some(&self.config.cancel_url),
            client_reference_id: Some(&client_reference_id),
            customer_email: request.customer_email.as_deref(),
            metadata: Some(metadata),
            ..Default::default()
        };

        let session = self
            .call("checkout session create", CheckoutSession::create(&self.client, params))
            .await?;

        Ok(CheckoutSessionHandle {
            session_ref: session.id.to_string(),
            url: session.url.clone(),
        })
    }

    async fn resolve_checkout_session(
        &self,
        session_ref: &str,
    ) -> GatewayResult<CheckoutSessionState> {
        let id = session_ref
            .parse::<CheckoutSessionId>()
            .map_err(|e| GatewayError::Malformed(format!("checkout session id {session_ref}: {e}")))?;
        let session = self
            .call(
                "checkout session retrieve",
                CheckoutSession::retrieve(&self.client, &id, &[]),
            )
            .await?;
        decode_checkout_session(to_value(&session)?)
    }

    async fn resolve_invoice(&self, invoice_ref: &str) -> GatewayResult<InvoiceDetail> {
        let id = invoice_ref
            .parse::<InvoiceId>()
            .map_err(|e| GatewayError::Malformed(format!("invoice id {invoice_ref}: {e}")))?;
        let invoice = self
            .call("invoice retrieve", Invoice::retrieve(&self.client, &id, &[]))
            .await?;
        decode_invoice(to_value(&invoice)?)
    }

    fn verify_webhook_event(
        &self,
        raw_payload: &str,
        signature_header: &str,
    ) -> GatewayResult<GatewayEvent> {
        verify_event(raw_payload, signature_header, &self.config.webhook_secret)
    }

    async fn cancel_subscription(&self, subscription_ref: &str) -> GatewayResult<()> {
        let id = subscription_ref
            .parse::<SubscriptionId>()
            .map_err(|e| GatewayError::Malformed(format!("subscription id {subscription_ref}: {e}")))?;
        let params = UpdateSubscription {
            cancel_at_period_end: Some(true),
            ..Default::default()
        };
        self.call(
            "subscription cancel",
            Subscription::update(&self.client, &id, params),
        )
        .await?;
        Ok(())
    }
}

fn to_value<T: serde::Serialize>(obj: &T) -> GatewayResult<serde_json::Value> {
    serde_json::to_value(obj).map_err(|e| GatewayError::Malformed(e.to_string()))
}

/// Verifies the `Stripe-Signature` header with the library check (HMAC-SHA256
/// over `"<t>.<payload>"`, 300 second tolerance), then decodes the payload.
///
/// A payload the library cannot map onto its own event types still carries a
/// valid signature; it is decoded from raw JSON like any other event.
pub fn verify_event(payload: &str, header: &str, secret: &str) -> GatewayResult<GatewayEvent> {
    if secret.is_empty() {
        log::error!("Webhook secret is not configured; rejecting event");
        return Err(GatewayError::SignatureInvalid);
    }

    match Webhook::construct_event(payload, header, secret) {
        Ok(_) => {}
        Err(WebhookError::BadParse(e)) => {
            log::debug!("Webhook signature OK but typed parse failed: {e}");
        }
        Err(e) => {
            log::warn!("Webhook signature verification failed: {e}");
            return Err(GatewayError::SignatureInvalid);
        }
    }
    decode_event(payload)
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

/// Expandable reference: either a bare id or an expanded object with an id.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRef {
    Id(String),
    Object { id: String },
}

impl RawRef {
    fn into_id(self) -> String {
        match self {
            RawRef::Id(id) | RawRef::Object { id } => id,
        }
    }
}

#[derive(Deserialize)]
struct RawCheckoutSession {
    id: String,
    status: Option<String>,
    payment_status: Option<String>,
    invoice: Option<RawRef>,
    subscription: Option<RawRef>,
}

#[derive(Deserialize)]
struct RawInvoice {
    id: String,
    status: Option<String>,
    period_start: Option<i64>,
    period_end: Option<i64>,
    amount_paid: Option<i64>,
    currency: Option<String>,
    invoice_pdf: Option<String>,
    hosted_invoice_url: Option<String>,
    subscription: Option<RawRef>,
    parent: Option<RawInvoiceParent>,
    lines: Option<RawList<RawLineItem>>,
}

#[derive(Deserialize)]
struct RawInvoiceParent {
    subscription_details: Option<RawSubscriptionDetails>,
}

#[derive(Deserialize)]
struct RawSubscriptionDetails {
    subscription: Option<RawRef>,
}

#[derive(Deserialize)]
struct RawList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct RawLineItem {
    price: Option<RawPrice>,
    period: Option<RawPeriod>,
}

#[derive(Deserialize)]
struct RawPrice {
    id: String,
    product: Option<RawRef>,
}

#[derive(Deserialize)]
struct RawPeriod {
    start: Option<i64>,
    end: Option<i64>,
}

fn parse<T: DeserializeOwned>(value: serde_json::Value, what: &str) -> GatewayResult<T> {
    serde_json::from_value(value).map_err(|e| GatewayError::Malformed(format!("{what}: {e}")))
}

fn timestamp(secs: i64, field: &str) -> GatewayResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| GatewayError::Malformed(format!("{field} out of range: {secs}")))
}

pub fn decode_event(payload: &str) -> GatewayResult<GatewayEvent> {
    let raw: RawEvent = serde_json::from_str(payload)
        .map_err(|e| GatewayError::Malformed(format!("event: {e}")))?;

    match raw.event_type.as_str() {
        "checkout.session.completed" => Ok(GatewayEvent::CheckoutSessionCompleted {
            event_id: raw.id,
            session: decode_checkout_session(raw.data.object)?,
        }),
        "invoice.payment_succeeded" => Ok(GatewayEvent::InvoicePaymentSucceeded {
            event_id: raw.id,
            invoice: decode_invoice(raw.data.object)?,
        }),
        _ => Ok(GatewayEvent::Ignored {
            event_id: raw.id,
            event_type: raw.event_type,
        }),
    }
}

pub fn decode_checkout_session(value: serde_json::Value) -> GatewayResult<CheckoutSessionState> {
    let raw: RawCheckoutSession = parse(value, "checkout session")?;

    let status = match raw.status.as_deref() {
        Some("complete") => CheckoutStatus::Complete,
        Some("expired") => CheckoutStatus::Expired,
        Some("open") | None => CheckoutStatus::Open,
        Some(other) => {
            return Err(GatewayError::Malformed(format!(
                "checkout session status {other}"
            )));
        }
    };
    let payment_status = match raw.payment_status.as_deref() {
        Some("paid") => CheckoutPaymentStatus::Paid,
        Some("no_payment_required") => CheckoutPaymentStatus::NoPaymentRequired,
        _ => CheckoutPaymentStatus::Unpaid,
    };

    Ok(CheckoutSessionState {
        session_ref: raw.id,
        status,
        payment_status,
        invoice_ref: raw.invoice.map(RawRef::into_id),
        subscription_ref: raw.subscription.map(RawRef::into_id),
    })
}

pub fn decode_invoice(value: serde_json::Value) -> GatewayResult<InvoiceDetail> {
    let raw: RawInvoice = parse(value, "invoice")?;

    let first_line = raw.lines.and_then(|l| l.data.into_iter().next());
    let (line_price, line_period) = match first_line {
        Some(line) => (line.price, line.period),
        None => (None, None),
    };

    // The line period is the service period; invoice-level bounds are the fallback.
    let period_start = line_period
        .as_ref()
        .and_then(|p| p.start)
        .or(raw.period_start)
        .ok_or_else(|| GatewayError::Malformed("invoice without period start".into()))?;
    let period_end = line_period
        .as_ref()
        .and_then(|p| p.end)
        .or(raw.period_end)
        .ok_or_else(|| GatewayError::Malformed("invoice without period end".into()))?;

    let subscription_ref = raw.subscription.map(RawRef::into_id).or_else(|| {
        raw.parent
            .and_then(|p| p.subscription_details)
            .and_then(|d| d.subscription)
            .map(RawRef::into_id)
    });

    let (price_id, product_id) = match line_price {
        Some(price) => (Some(price.id), price.product.map(RawRef::into_id)),
        None => (None, None),
    };

    Ok(InvoiceDetail {
        invoice_ref: raw.id,
        status: raw
            .status
            .as_deref()
            .map(InvoiceStatus::parse)
            .unwrap_or(InvoiceStatus::Unknown),
        period_start: timestamp(period_start, "period_start")?,
        period_end: timestamp(period_end, "period_end")?,
        amount: raw.amount_paid.unwrap_or(0),
        currency: raw.currency.unwrap_or_else(|| "usd".to_string()),
        document_url: raw.invoice_pdf.or(raw.hosted_invoice_url),
        subscription_ref,
        price_id,
        product_id,
    })
}
