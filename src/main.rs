//! Fleet orchestration engine entry point: loads configuration, brings
//! up the engine, and serves the ambient HTTP surface (`/healthz`,
//! `/metrics`) until a shutdown signal arrives.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{error, info, Level};

use fleet_hive::core::HiveEngine;
use fleet_hive::utils::config::HiveConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HiveConfig::load().unwrap_or_else(|e| {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    });

    let log_level = match config.logging.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(log_level).with_target(false).init();

    info!(swarm_id = %config.fleet.swarm_id, max_agents = config.fleet.max_agents, "starting fleet orchestration engine");

    let bind_addr = config.monitoring.metrics_bind_addr.clone();
    let engine = HiveEngine::new(config).await?;
    engine.initialize().await?;

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .with_state(Arc::clone(&engine));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "ambient http surface listening");

    let shutdown_engine = Arc::clone(&engine);
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install ctrl-c handler: {e}");
            return;
        }
        info!("shutdown signal received, draining fleet coordinator");
        if let Err(e) = shutdown_engine.shutdown().await {
            error!("error during shutdown: {e}");
        }
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal).await?;

    info!("fleet orchestration engine stopped");
    Ok(())
}

async fn healthz(State(engine): State<Arc<HiveEngine>>) -> Response {
    let status = engine.get_fleet_status().await;
    (StatusCode::OK, axum::Json(status)).into_response()
}

async fn metrics(State(engine): State<Arc<HiveEngine>>) -> Response {
    match engine.metrics.gather() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to gather metrics: {e}")).into_response(),
    }
}
