use axum::{middleware, routing::any, Router};
use clap::Parser;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

use rampart::{admin_router, CliArgs, Config, GuardState, Janitor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_args = CliArgs::parse();

    // Config errors are fatal before any traffic is served
    let config = Config::load(&cli_args)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Rampart starting");
    tracing::info!(
        window_ms = config.guard.window_ms,
        max_per_window = config.guard.max_requests_per_window,
        max_rps = config.guard.max_requests_per_second,
        "Protection thresholds loaded"
    );

    let janitor_interval = config.guard.janitor_interval();
    let (state, events) = GuardState::new(config.guard)?;

    tokio::spawn(rampart::run_event_logger(events));
    let janitor = Janitor::start(state.clone(), janitor_interval);

    // Admin routes stay outside the guard; everything else passes through it.
    let app = Router::new()
        .route("/", any(passed))
        .route("/*path", any(passed))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rampart::guard,
        ))
        .nest("/_rampart", admin_router(state))
        .layer(TraceLayer::new_for_http());

    tracing::info!(addr = %config.listen_addr, "Rampart listening");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    janitor.stop();
    tracing::info!("Rampart stopped");
    Ok(())
}

/// Placeholder downstream handler; in a deployment the guarded routes are
/// the application's own.
async fn passed() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
