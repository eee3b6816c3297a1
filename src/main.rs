use actix_web::{App, HttpServer, middleware::Logger, web};
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;

use edu_billing_backend::{
    config::Config,
    database::{create_pool, run_migrations},
    external::{PaymentGatewayAdapter, StripeGateway},
    handlers,
    ledger::SeaOrmLedger,
    middlewares::{AuthMiddleware, create_cors},
    services::*,
    swagger::swagger_config,
    tasks,
    utils::JwtService,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    let config = Config::from_toml().expect("Failed to load configuration file");

    let pool = create_pool(&config.database)
        .await
        .expect("Failed to create database connection pool");

    run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let jwt_service = JwtService::new(&config.jwt.secret, config.jwt.access_token_expires_in);

    let ledger = SeaOrmLedger::new(pool).shared();
    let gateway: Arc<dyn PaymentGatewayAdapter> =
        Arc::new(StripeGateway::new(config.stripe.clone()));

    let reconciliation_service =
        ReconciliationService::new(ledger.clone(), gateway.clone(), &config.reconciliation);
    let payment_service = PaymentService::new(
        ledger.clone(),
        gateway.clone(),
        reconciliation_service.clone(),
    );
    let subscription_service = SubscriptionService::new(ledger.clone(), gateway.clone());

    tasks::spawn_all(
        reconciliation_service.clone(),
        config.reconciliation.sweep_interval_secs,
    );

    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    let reconciliation_config = config.reconciliation.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors())
            .wrap(AuthMiddleware::new(jwt_service.clone()))
            .app_data(web::Data::new(reconciliation_config.clone()))
            .app_data(web::Data::new(reconciliation_service.clone()))
            .app_data(web::Data::new(payment_service.clone()))
            .app_data(web::Data::new(subscription_service.clone()))
            .configure(swagger_config)
            .configure(handlers::webhook_config)
            .service(
                web::scope("/api/v1")
                    .configure(handlers::payment_config)
                    .configure(handlers::subscription_config)
                    .configure(handlers::admin_config)
                    .configure(handlers::internal_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}
