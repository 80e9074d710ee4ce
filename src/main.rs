use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use log::{error, info};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use sensor_bridge_rs::protocol::DashboardEvent;
use sensor_bridge_rs::{api, ws, AppState};

#[derive(Parser, Debug)]
#[command(name = "sensor_bridge")]
#[command(about = "Phone sensor bridge - streams phone sensors to dashboards", long_about = None)]
struct Args {
    /// Listen port
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Directory for append-only sensor logs
    #[arg(long, default_value = "sensor_logs")]
    log_dir: String,

    /// Seconds between serverStats broadcasts to dashboards
    #[arg(long, default_value = "30")]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let state = AppState::new(&args.log_dir);

    // Periodic server stats broadcast to dashboard subscribers.
    let stats_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(args.stats_interval.max(1)));
        interval.tick().await; // first tick fires immediately, skip it
        loop {
            interval.tick().await;
            if stats_state.connections.dashboard_count() > 0 {
                stats_state
                    .connections
                    .broadcast(&DashboardEvent::ServerStats(stats_state.server_stats()));
            }
            info!(
                "active connections: {} producers, {} dashboards",
                stats_state.connections.producer_count(),
                stats_state.connections.dashboard_count()
            );
        }
    });

    let app = Router::new()
        .route("/ws", get(ws::producer_ws))
        .route("/dashboard/ws", get(ws::dashboard_ws))
        .route("/api/stats", get(api::stats))
        .route("/api/logs", get(api::list_logs))
        .route("/api/logs/:filename", get(api::read_log))
        .route("/api/latest-data", get(api::latest_data))
        .route("/api/connections", get(api::connections))
        .route("/api/health", get(api::health))
        .route("/api/camera/latest", get(api::camera_latest))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("sensor bridge listening on http://{addr}");
    info!("  producer ws:  ws://{addr}/ws");
    info!("  dashboard ws: ws://{addr}/dashboard/ws");
    info!("  log dir:      {}", args.log_dir);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Final flush so a short buffer is not lost on shutdown.
    info!("shutting down, flushing log buffer");
    match state.logger.lock() {
        Ok(mut logger) => {
            if let Err(e) = logger.flush() {
                error!("final log flush failed: {e}");
            }
        }
        Err(_) => error!("logger lock poisoned during shutdown"),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
}
