use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tenant_api::{
    build_router,
    config::AppConfig,
    db,
    repositories::PgDirectory,
    services::RedisSessionCache,
    AppState, Backends,
};
use tokio::signal;

const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // Fail fast on bad configuration
    let config = AppConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting tenant API"
    );

    let pool = db::create_pool(&config.database).await?;
    db::prepare_schema(&pool, &config.database)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;
    let directory = Arc::new(PgDirectory::new(pool));

    let cache = RedisSessionCache::connect(&config.redis.url).await?;
    tracing::info!("Session cache initialized");

    let state = AppState::new(
        config.clone(),
        Backends {
            users: directory.clone(),
            tenants: directory.clone(),
            policies: directory.clone(),
            store: directory,
            cache: Arc::new(cache),
        },
    )
    .await?;
    tracing::info!(rules = state.policy.rule_count(), "Policy table ready");

    state.login_rate_limiter.start(RATE_LIMIT_PRUNE_INTERVAL);
    state.ip_rate_limiter.start(RATE_LIMIT_PRUNE_INTERVAL);

    #[cfg(unix)]
    spawn_policy_reloader(state.clone());

    let app = build_router(state.clone());

    let addr: SocketAddr = config.common.socket_addr();
    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.login_rate_limiter.stop();
    state.ip_rate_limiter.stop();

    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Reload the policy table from the store on SIGHUP.
#[cfg(unix)]
fn spawn_policy_reloader(state: AppState) {
    tokio::spawn(async move {
        let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "SIGHUP handler unavailable, policy reload disabled");
                return;
            }
        };

        while hangup.recv().await.is_some() {
            match state.reload_policies().await {
                Ok(rules) => tracing::info!(rules, "Policy table reloaded"),
                Err(e) => tracing::error!(error = %e, "Policy reload failed, keeping previous table"),
            }
        }
    });
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
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
