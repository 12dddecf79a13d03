//! Circulation Server - loan and reservation lifecycle engine
//!
//! REST API server plus the background lending sweeps.

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use circulation_server::{
    api,
    config::AppConfig,
    repository::{CatalogStore, Repository},
    services::{
        email::EmailService,
        notifications::{ChannelNotifier, Mailer, NotificationDispatcher, NotificationSink},
        Services,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("circulation_server={},tower_http=debug", config.logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Circulation Server v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await?;

    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!("Database migrations completed");

    let store: Arc<dyn CatalogStore> = Arc::new(Repository::new(pool));

    // Notifications are queued by the services and delivered by a separate task
    let mailer: Option<Arc<dyn Mailer>> = if config.email.enabled {
        tracing::info!(smtp_host = %config.email.smtp_host, "Email notifications enabled");
        Some(Arc::new(EmailService::new(config.email.clone())))
    } else {
        None
    };
    let (notifier, notification_rx) = ChannelNotifier::channel();
    let dispatcher = tokio::spawn(
        NotificationDispatcher::new(store.clone(), mailer).run(notification_rx),
    );
    let notifier: Arc<dyn NotificationSink> = Arc::new(notifier);

    let services = Services::new(store, notifier, config.lending.clone());

    let scheduler = if config.lending.sweep_enabled {
        let scheduler = services.scheduler();
        let shutdown = scheduler.shutdown_handle();
        let handle = tokio::spawn(async move { scheduler.run().await });
        Some((handle, shutdown))
    } else {
        tracing::info!("Lending sweeps disabled");
        None
    };

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);

    // Create application state
    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    let app = create_router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and with it the last notifier) is gone; let the scheduler
    // finish its tick, then let the dispatcher drain the queue
    if let Some((handle, shutdown)) = scheduler {
        shutdown.notify_one();
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Lending scheduler task failed");
        }
    }
    if let Err(e) = dispatcher.await {
        tracing::error!(error = %e, "Notification dispatcher task failed");
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

/// Create the application router with all routes
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API v1 routes
    let api_v1 = Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/ready", get(api::health::readiness_check))
        // Loans
        .route("/loans", post(api::loans::create_loan))
        .route("/loans/:id", get(api::loans::get_loan))
        .route("/loans/:id/return", post(api::loans::return_loan))
        .route("/loans/:id/extend", post(api::loans::extend_loan))
        .route("/loans/:id/pay-fine", post(api::loans::pay_fine))
        // Users
        .route("/users/:id/loans", get(api::loans::get_user_loans))
        .route("/users/:id/eligibility", get(api::loans::get_user_eligibility))
        .route(
            "/users/:id/reservations",
            get(api::reservations::get_user_reservations),
        )
        // Reservations
        .route("/reservations", post(api::reservations::create_reservation))
        .route("/reservations/:id", get(api::reservations::get_reservation))
        .route(
            "/reservations/:id/cancel",
            post(api::reservations::cancel_reservation),
        )
        .with_state(state);

    // OpenAPI documentation
    let openapi = api::openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
