//! random-sync binary entrypoint wiring the REST, SSE and realtime sync layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use random_sync::{
    clock::{SharedClock, SystemClock},
    config::AppConfig,
    dao::{backend::GroupBackend, memory::MemoryBackend},
    guard::sweeper::{spawn_rate_limiter_sweeper, spawn_throttler_sweeper},
    realtime::ChangeHub,
    routes,
    services::backend_supervisor,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let sweep = config.sweep;
    let clock: SharedClock = Arc::new(SystemClock);
    let hub = ChangeHub::new(config.channel_capacity);
    let backend = build_backend(&hub)?;

    let app_state = AppState::new(config, clock, hub, backend);

    let _limiter_sweeper =
        spawn_rate_limiter_sweeper(app_state.rate_limiter(), sweep.rate_limiter_interval);
    let _throttler_sweeper =
        spawn_throttler_sweeper(app_state.throttler(), sweep.throttler_interval);
    tokio::spawn(backend_supervisor::run(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the backend named by `RANDOM_SYNC_BACKEND` (`memory` by default).
fn build_backend(hub: &Arc<ChangeHub>) -> anyhow::Result<Arc<dyn GroupBackend>> {
    let mode = env::var("RANDOM_SYNC_BACKEND").unwrap_or_else(|_| "memory".into());
    match mode.as_str() {
        "memory" => {
            info!("using in-memory backend");
            Ok(Arc::new(MemoryBackend::new(Some(hub.clone()))))
        }
        #[cfg(feature = "rest-backend")]
        "rest" => {
            use random_sync::dao::rest::{RestBackend, RestConfig};

            let config = RestConfig::from_env().context("reading REST backend configuration")?;
            let backend = RestBackend::connect(config).context("building REST backend client")?;
            info!("using REST backend");
            Ok(Arc::new(backend))
        }
        other => anyhow::bail!("unsupported backend `{other}`"),
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
