use crate::config::ReconciliationConfig;
use crate::error::AppError;
use crate::models::ApiResponse;
use crate::services::{ReconciliationService, SweepSummary};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use chrono::Utc;
use subtle::ConstantTimeEq;

const TOKEN_HEADER: &str = "X-Internal-Token";

fn token_matches(req: &HttpRequest, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    req.headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|provided| bool::from(provided.as_bytes().ct_eq(expected.as_bytes())))
}

/// Runs one reconciliation sweep on demand, for schedulers outside the
/// process. Guarded by a shared token instead of a user JWT.
#[utoipa::path(
    post,
    path = "/internal/sweep",
    tag = "internal",
    params(
        ("X-Internal-Token" = String, Header, description = "Shared sweep token")
    ),
    responses(
        (status = 200, description = "Sweep finished", body = SweepSummary),
        (status = 403, description = "Missing or wrong token")
    )
)]
pub async fn run_sweep(
    req: HttpRequest,
    config: web::Data<ReconciliationConfig>,
    reconciliation: web::Data<ReconciliationService>,
) -> Result<HttpResponse> {
    if !token_matches(&req, &config.internal_token) {
        log::warn!("Rejected internal sweep request");
        return Ok(AppError::Forbidden.error_response());
    }

    match reconciliation.sweep_pending_orders(Utc::now()).await {
        Ok(summary) => {
            log::info!(
                "On-demand sweep: examined={} succeeded={} failed={} unchanged={} regranted={} errors={}",
                summary.examined,
                summary.succeeded,
                summary.failed,
                summary.unchanged,
                summary.regranted,
                summary.errors
            );
            Ok(HttpResponse::Ok().json(ApiResponse::success(summary)))
        }
        Err(e) => Ok(e.error_response()),
    }
}

pub fn internal_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/internal").route("/sweep", web::post().to(run_sweep)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::OrderStatus;
    use crate::external::{CheckoutPaymentStatus, CheckoutStatus};
    use crate::testing::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use serde_json::Value;

    fn config(token: &str) -> ReconciliationConfig {
        ReconciliationConfig {
            internal_token: token.to_string(),
            ..Default::default()
        }
    }

    macro_rules! app {
        ($config:expr, $service:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($config))
                    .app_data(web::Data::new($service))
                    .service(web::scope("/api/v1").configure(internal_config)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_sweep_settles_stale_orders() {
        let ledger = seeded_ledger().await;
        let gateway = FakeGateway::new();
        let now = Utc::now();
        ledger
            .insert_order_at(stripe_order(1, "cs_old"), minutes_ago(now, 30))
            .await;
        gateway.script_session(session(
            "cs_old",
            CheckoutStatus::Expired,
            CheckoutPaymentStatus::Unpaid,
            None,
            None,
        ));
        let cfg = config("s3cret");
        let service = ReconciliationService::new(ledger.shared(), gateway.clone(), &cfg);
        let app = app!(cfg, service);

        let req = test::TestRequest::post()
            .uri("/api/v1/internal/sweep")
            .insert_header((TOKEN_HEADER, "s3cret"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["data"]["examined"], 1);
        assert_eq!(body["data"]["failed"], 1);
        assert_eq!(ledger.orders().await[0].status, OrderStatus::Failed);
    }

    #[actix_web::test]
    async fn test_wrong_token_is_forbidden() {
        let ledger = seeded_ledger().await;
        let cfg = config("s3cret");
        let service = ReconciliationService::new(ledger.shared(), FakeGateway::new(), &cfg);
        let app = app!(cfg, service);

        let req = test::TestRequest::post()
            .uri("/api/v1/internal/sweep")
            .insert_header((TOKEN_HEADER, "guess"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_empty_configured_token_disables_endpoint() {
        let ledger = seeded_ledger().await;
        let cfg = config("");
        let service = ReconciliationService::new(ledger.shared(), FakeGateway::new(), &cfg);
        let app = app!(cfg, service);

        let req = test::TestRequest::post()
            .uri("/api/v1/internal/sweep")
            .insert_header((TOKEN_HEADER, ""))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
