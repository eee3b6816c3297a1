use crate::error::AppError;
use crate::external::GatewayError;
use crate::models::WebhookAck;
use crate::services::ReconciliationService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use log::{error, info, warn};

/// Stripe webhook endpoint.
///
/// Only a missing header or a failed verification produce an error status.
/// Once the event is verified the gateway always gets a 200: anything that
/// failed downstream is picked up again by the user poll or the sweep.
#[utoipa::path(
    post,
    path = "/webhook/stripe",
    tag = "webhook",
    request_body(content = String, description = "Raw Stripe event payload"),
    params(
        ("Stripe-Signature" = String, Header, description = "Stripe signature header")
    ),
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 400, description = "Missing signature header or malformed payload"),
        (status = 401, description = "Invalid signature")
    )
)]
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    reconciliation: web::Data<ReconciliationService>,
) -> Result<HttpResponse> {
    let Some(signature) = req
        .headers()
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        warn!("Missing Stripe-Signature header");
        return Ok(AppError::ValidationError("Missing Stripe-Signature header".to_string())
            .error_response());
    };

    let Ok(payload) = std::str::from_utf8(&body) else {
        warn!("Invalid UTF-8 in webhook payload");
        return Ok(
            AppError::ValidationError("Invalid payload encoding".to_string()).error_response(),
        );
    };

    let event = match reconciliation.verify_webhook_event(payload, signature) {
        Ok(event) => event,
        Err(GatewayError::SignatureInvalid) => {
            return Ok(AppError::SignatureInvalid.error_response());
        }
        Err(e) => {
            warn!("Rejected undecodable webhook payload: {e}");
            return Ok(AppError::ValidationError("Malformed event payload".to_string())
                .error_response());
        }
    };

    info!("Received Stripe webhook event {}", event.event_id());

    if let Err(e) = reconciliation.handle_event(&event).await {
        if e.is_retryable() {
            error!("Failed to process webhook event {}: {e}", event.event_id());
        } else {
            warn!("Webhook event {} not applied: {e}", event.event_id());
        }
    }

    Ok(HttpResponse::Ok().json(WebhookAck { received: true }))
}

pub fn webhook_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/webhook").route("/stripe", web::post().to(stripe_webhook)));
}
