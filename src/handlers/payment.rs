use super::get_user_id_from_request;
use crate::models::*;
use crate::services::PaymentService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

#[utoipa::path(
    post,
    path = "/payments/checkout",
    tag = "payment",
    request_body = CreateCheckoutRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Checkout session created", body = CreateCheckoutResponse),
        (status = 400, description = "Plan cannot be purchased"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Plan not found"),
        (status = 502, description = "Payment gateway unavailable")
    )
)]
pub async fn create_checkout(
    payment_service: web::Data<PaymentService>,
    req: HttpRequest,
    request: web::Json<CreateCheckoutRequest>,
) -> Result<HttpResponse> {
    let user_id = match get_user_id_from_request(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match payment_service
        .create_checkout(user_id, request.plan_id)
        .await
    {
        Ok(response) => Ok(HttpResponse::Ok().json(ApiResponse::success(response))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/payments/orders",
    tag = "payment",
    params(OrderQuery),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Orders of the current user", body = PaginatedOrderResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_orders(
    payment_service: web::Data<PaymentService>,
    req: HttpRequest,
    query: web::Query<OrderQuery>,
) -> Result<HttpResponse> {
    let user_id = match get_user_id_from_request(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match payment_service.list_orders(user_id, &query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

/// Returns the order and, while it is still pending, asks the gateway
/// whether the checkout has been paid.
#[utoipa::path(
    get,
    path = "/payments/orders/{reference_id}/status",
    tag = "payment",
    params(
        ("reference_id" = String, Path, description = "Checkout session id")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Current order status", body = OrderResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Order not found"),
        (status = 502, description = "Payment gateway unavailable")
    )
)]
pub async fn check_order_status(
    payment_service: web::Data<PaymentService>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let user_id = match get_user_id_from_request(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match payment_service.check_order_status(user_id, &path).await {
        Ok(order) => Ok(HttpResponse::Ok().json(ApiResponse::success(order))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn payment_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/payments")
            .route("/checkout", web::post().to(create_checkout))
            .route("/orders", web::get().to(list_orders))
            .route(
                "/orders/{reference_id}/status",
                web::get().to(check_order_status),
            ),
    );
}
