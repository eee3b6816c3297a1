use actix_cors::Cors;

/// Browser clients call the payment and subscription routes directly.
/// The webhook is server-to-server and unaffected by CORS.
pub fn create_cors() -> Cors {
    Cors::default()
        .allowed_origin_fn(|_, _req_head| true)
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}
