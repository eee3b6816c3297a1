use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::{BillingInterval, OrderStatus, PaymentGateway, PlanType};
use crate::handlers;
use crate::models::*;
use crate::services::SweepSummary;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            )
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::payment::create_checkout,
        handlers::payment::list_orders,
        handlers::payment::check_order_status,
        handlers::subscription::create_freemium,
        handlers::subscription::get_current,
        handlers::subscription::cancel_current,
        handlers::admin::grant_subscription,
        handlers::internal::run_sweep,
        handlers::webhook::stripe_webhook,
    ),
    components(
        schemas(
            OrderStatus,
            PaymentGateway,
            PlanType,
            BillingInterval,
            OrderResponse,
            OrderQuery,
            PaginatedOrderResponse,
            CreateCheckoutRequest,
            CreateCheckoutResponse,
            PlanResponse,
            SubscriptionResponse,
            AdminGrantRequest,
            AdminGrantResponse,
            SweepSummary,
            WebhookAck,
            ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "payment", description = "Checkout and order status API"),
        (name = "subscription", description = "Subscription API"),
        (name = "admin", description = "Administrative grants"),
        (name = "internal", description = "Operational endpoints"),
        (name = "webhook", description = "Payment gateway callbacks"),
    ),
    info(
        title = "Edu Billing API",
        version = "1.0.0",
        description = "Subscription billing and payment reconciliation REST API"
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}
