use std::net::SocketAddr;
use std::sync::Arc;

use access_service::{
    build_router,
    config::AccessConfig,
    db,
    services::{
        metrics::init_metrics, GoogleTokenVerifier, PgAccessRequestStore, PgPrincipalStore,
        PgResourceLocator, SmtpNotifier,
    },
    utils::{RandomCodeGenerator, SystemClock},
    AppState, Backends,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on bad configuration
    let config = AccessConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting access service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;

    let notifications = SmtpNotifier::new(&config.smtp).map_err(AppError::ConfigError)?;
    let identity =
        GoogleTokenVerifier::new(config.google.client_id.clone()).map_err(AppError::ConfigError)?;

    let backends = Backends {
        principals: Arc::new(PgPrincipalStore::new(pool.clone())),
        requests: Arc::new(PgAccessRequestStore::new(pool.clone())),
        locator: Arc::new(PgResourceLocator::new(pool.clone())),
        notifications: Arc::new(notifications),
        identity: Arc::new(identity),
        codes: Arc::new(RandomCodeGenerator),
        clock: Arc::new(SystemClock),
        db: Some(pool),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    let state = AppState::new(config, backends);
    let app = build_router(state);

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
