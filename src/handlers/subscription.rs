use super::get_user_id_from_request;
use crate::models::*;
use crate::services::SubscriptionService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use chrono::Utc;

#[utoipa::path(
    post,
    path = "/subscriptions/freemium",
    tag = "subscription",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Free trial started", body = SubscriptionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "User already has or had a subscription")
    )
)]
pub async fn create_freemium(
    subscription_service: web::Data<SubscriptionService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user_id = match get_user_id_from_request(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match subscription_service.create_freemium(user_id, Utc::now()).await {
        Ok(sub) => Ok(HttpResponse::Ok().json(ApiResponse::success(sub))),
        Err(e) => Ok(e.error_response()),
    }
}

/// `data` is null when the user has never subscribed.
#[utoipa::path(
    get,
    path = "/subscriptions/current",
    tag = "subscription",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Current subscription", body = SubscriptionResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn get_current(
    subscription_service: web::Data<SubscriptionService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user_id = match get_user_id_from_request(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match subscription_service.current(user_id, Utc::now()).await {
        Ok(sub) => Ok(HttpResponse::Ok().json(ApiResponse::success(sub))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/subscriptions/current/cancel",
    tag = "subscription",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Subscription ends at period end", body = SubscriptionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No active subscription"),
        (status = 502, description = "Payment gateway unavailable")
    )
)]
pub async fn cancel_current(
    subscription_service: web::Data<SubscriptionService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user_id = match get_user_id_from_request(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match subscription_service.cancel_current(user_id, Utc::now()).await {
        Ok(sub) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            sub,
            "Subscription will not renew",
        ))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn subscription_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/subscriptions")
            .route("/freemium", web::post().to(create_freemium))
            .route("/current", web::get().to(get_current))
            .route("/current/cancel", web::post().to(cancel_current)),
    );
}
