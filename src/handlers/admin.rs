use crate::models::*;
use crate::services::SubscriptionService;
use actix_web::{HttpResponse, ResponseError, Result, web};
use chrono::Utc;

/// Grants a plan without payment. Reachable only with an admin token.
#[utoipa::path(
    post,
    path = "/admin/subscriptions/grant",
    tag = "admin",
    request_body = AdminGrantRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Subscription granted", body = AdminGrantResponse),
        (status = 400, description = "Invalid seat count"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "User or plan not found")
    )
)]
pub async fn grant_subscription(
    subscription_service: web::Data<SubscriptionService>,
    request: web::Json<AdminGrantRequest>,
) -> Result<HttpResponse> {
    match subscription_service.admin_grant(&request, Utc::now()).await {
        Ok(granted) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            granted,
            "Subscription granted",
        ))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn admin_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin").route("/subscriptions/grant", web::post().to(grant_subscription)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{OrderStatus, PaymentGateway};
    use crate::ledger::MemoryLedger;
    use crate::middlewares::AuthMiddleware;
    use crate::testing::*;
    use crate::utils::{JwtService, Role};
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use serde_json::{Value, json};

    const SECRET: &str = "test-secret";

    async fn setup() -> (MemoryLedger, web::Data<SubscriptionService>) {
        let ledger = seeded_ledger().await;
        let service = SubscriptionService::new(ledger.shared(), FakeGateway::new());
        (ledger, web::Data::new(service))
    }

    fn bearer(user_id: i64, role: Role) -> (&'static str, String) {
        let token = JwtService::new(SECRET, 3600)
            .generate_access_token(user_id, role)
            .unwrap();
        ("Authorization", format!("Bearer {token}"))
    }

    macro_rules! app {
        ($service:expr) => {
            test::init_service(
                App::new()
                    .wrap(AuthMiddleware::new(JwtService::new(SECRET, 3600)))
                    .app_data($service.clone())
                    .service(web::scope("/api/v1").configure(admin_config)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_admin_grant_creates_order_and_subscription() {
        let (ledger, service) = setup().await;
        let app = app!(service);

        let req = test::TestRequest::post()
            .uri("/api/v1/admin/subscriptions/grant")
            .insert_header(bearer(9, Role::Admin))
            .set_json(json!({ "user_id": 2, "plan_id": premium_plan().id, "seats": 5 }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["data"]["subscription"]["seats"], 5);
        let orders = ledger.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Success);
        assert_eq!(orders[0].payment_gateway, PaymentGateway::Admin);
        assert!(orders[0].reference_id.starts_with("admin_"));
        assert_eq!(
            ledger.user(2).await.unwrap().current_subscription_id,
            Some(ledger.subscriptions().await[0].id)
        );
    }

    #[actix_web::test]
    async fn test_regular_user_is_forbidden() {
        let (ledger, service) = setup().await;
        let app = app!(service);

        let req = test::TestRequest::post()
            .uri("/api/v1/admin/subscriptions/grant")
            .insert_header(bearer(1, Role::User))
            .set_json(json!({ "user_id": 1, "plan_id": premium_plan().id }))
            .to_request();
        let status = match test::try_call_service(&app, req).await {
            Ok(resp) => resp.status(),
            Err(e) => e.as_response_error().status_code(),
        };

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(ledger.orders().await.is_empty());
    }

    #[actix_web::test]
    async fn test_grant_for_unknown_user_is_not_found() {
        let (_, service) = setup().await;
        let app = app!(service);

        let req = test::TestRequest::post()
            .uri("/api/v1/admin/subscriptions/grant")
            .insert_header(bearer(9, Role::Admin))
            .set_json(json!({ "user_id": 404, "plan_id": premium_plan().id }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
