//! Report server
//!
//! Hosts the rendered report directory until the process is interrupted.

use std::net::SocketAddr;
use std::path::Path;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::logging::log_file;
use crate::render::{REPORT_HTML, REPORT_JSON};

/// Routes over the files of a report directory
pub fn router(report_dir: &Path) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(report_dir.join(REPORT_HTML)))
        .route_service("/logs", ServeFile::new(log_file(report_dir)))
        .route_service("/report.json", ServeFile::new(report_dir.join(REPORT_JSON)))
        .fallback_service(ServeDir::new(report_dir))
        .layer(TraceLayer::new_for_http())
}

/// Serve the report directory on all interfaces until Ctrl-C or SIGTERM
pub async fn serve(report_dir: &Path, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(
        "If you run the checker inside kubernetes, use port forwarding to access the results page"
    );
    info!("Serving the report on http://{}", listener.local_addr()?);

    axum::serve(listener, router(report_dir))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
