pub mod admin;
pub mod internal;
pub mod payment;
pub mod subscription;
pub mod webhook;

pub use admin::admin_config;
pub use internal::internal_config;
pub use payment::payment_config;
pub use subscription::subscription_config;
pub use webhook::webhook_config;

use crate::error::{AppError, AppResult};
use actix_web::{HttpMessage, HttpRequest};

/// User id attached by `AuthMiddleware`.
fn get_user_id_from_request(req: &HttpRequest) -> AppResult<i64> {
    req.extensions()
        .get::<i64>()
        .copied()
        .ok_or_else(|| AppError::AuthError("Missing access token".to_string()))
}
