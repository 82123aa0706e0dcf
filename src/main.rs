//! Audit Mirror API
//!
//! Connects to the configured database, attaches the tables listed in
//! `AUDIT_TABLES` and serves the capture and audit-view endpoints.

use audit_mirror::config::Settings;
use audit_mirror::mirror::MirrorOrchestrator;
use audit_mirror::routes::create_router;
use audit_mirror::state::AppState;
use audit_mirror::store::PgAuditStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("🚀 Starting Audit Mirror...");

    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let store = PgAuditStore::connect(&settings.database).await?;

    let mirror = MirrorOrchestrator::new(
        &settings.audit.encryption_key,
        settings.audit.policy.clone(),
    )
    .with_default_schema(settings.audit.schema.clone());

    if !settings.audit.tables.is_empty() {
        let report = mirror.attach_many(&store, &settings.audit.tables).await;
        for failure in &report.failed {
            warn!("⚠️  {} not attached: {}", failure.table, failure.error);
        }
    }

    let state = Arc::new(AppState::new(
        Arc::new(store),
        mirror,
        settings.jwt_secret.clone(),
    ));

    let app = create_router(state, &settings.cors);

    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   GET  /health                        - Liveness check");
    info!("   GET  /api/tables                    - List auditable tables");
    info!("   POST /api/tables/attach             - Attach several tables (admin)");
    info!("   POST /api/tables/{{table}}/attach     - Attach one table (admin)");
    info!("   GET  /api/tables/{{table}}/status     - Audit setup of a table");
    info!("   POST /api/tables/{{table}}/events     - Capture a write (recorder)");
    info!("   GET  /api/tables/{{table}}/events     - View the audit trail (auditor)");
    info!("");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,audit_mirror=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
