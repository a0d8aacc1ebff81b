use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use booking_core::Store;
use booking_engine::{CheckoutAdapter, MockCheckout, StripeCheckout};
use booking_service::{auth::JwtKeys, handlers, AppState, Config};
use dispatch::{LogMailer, OutboxWorker, RelayNotificationSink, ReminderScanner};
use dotenv::dotenv;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();
    init_tracing();

    info!("Starting booking service...");

    let config = Config::from_env().context("Failed to load configuration")?;
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        anyhow::bail!("Invalid configuration: {}", e);
    }

    let store = Arc::new(
        Store::open(config.store_config())
            .await
            .context("Failed to open booking store")?,
    );
    info!(data_dir = %config.store.data_dir, "Booking store opened");

    let checkout: Arc<dyn CheckoutAdapter> = if config.checkout.mode == "mock" {
        warn!("Using the in-memory checkout adapter");
        Arc::new(MockCheckout::new())
    } else {
        Arc::new(StripeCheckout::new(config.engine_config().checkout)?)
    };

    let state = Arc::new(AppState::build(store.clone(), checkout, &config)?);

    // No policy, no settlement: refuse to start
    match state.settlement.ensure_policy().await {
        Ok(policy) => info!(
            first_engagement = %policy.first_engagement(),
            repeat_engagement = %policy.repeat_engagement(),
            "Deduction policy loaded"
        ),
        Err(e) => {
            error!(error = %e, "Deduction policy unavailable");
            anyhow::bail!("Deduction policy unavailable: {}", e);
        }
    }

    // Background delivery
    let dispatch_config = config.dispatch_config();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = OutboxWorker::new(
        store.clone(),
        Arc::new(RelayNotificationSink::new(dispatch_config.relay.clone())?),
        Arc::new(LogMailer),
        dispatch_config.outbox.clone(),
    );
    let scanner = ReminderScanner::new(store.clone(), dispatch_config.reminders.clone());
    let worker_task = tokio::spawn(worker.run(shutdown_rx.clone()));
    let scanner_task = tokio::spawn(scanner.run(shutdown_rx));

    let server_config = config.server.clone();
    let state_data = web::Data::new(state);
    let keys = web::Data::new(JwtKeys::new(&config.auth.jwt_secret));

    info!(
        "Starting HTTP server on {}:{}",
        server_config.host, server_config.port
    );

    let served = HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .app_data(keys.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(handlers::configure_routes)
    })
    .workers(server_config.workers)
    .bind((server_config.host, server_config.port))?
    .run()
    .await;

    info!("HTTP server stopped, draining background tasks");
    let _ = shutdown_tx.send(true);
    for task in [worker_task, scanner_task] {
        if let Err(e) = task.await {
            error!(error = %e, "Background task failed");
        }
    }
    store.shutdown().await?;

    served?;
    Ok(())
}
